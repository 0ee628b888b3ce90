// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{FlushMode, Queue, QueueConfig, Result};

pub struct QueueBuilder {
    dir:    PathBuf,
    name:   Option<String>,
    config: QueueConfig,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir:    dir.into(),
            name:   None,
            config: QueueConfig::default(),
        }
    }

    /// Queue name used in logs and metrics. Defaults to the directory name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn segment_capacity(mut self, capacity: u32) -> Self {
        self.config.segment_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.config.flush_mode = mode;
        self
    }

    #[must_use]
    pub const fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn build(self) -> Result<Queue> {
        let name = self.name.unwrap_or_else(|| {
            self.dir
                .file_name()
                .map_or_else(|| "queue".to_string(), |n| n.to_string_lossy().into_owned())
        });
        Queue::open(name, self.dir, Arc::new(self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default_config() {
        let builder = QueueBuilder::new("/tmp/test_queue");
        assert_eq!(builder.dir, PathBuf::from("/tmp/test_queue"));
        assert_eq!(builder.config, QueueConfig::default());
        assert!(builder.name.is_none());
    }

    #[test]
    fn test_builder_custom_config() {
        let builder = QueueBuilder::new("/tmp/test_queue")
            .name("orders")
            .segment_capacity(4096)
            .flush_mode(FlushMode::Os)
            .heartbeat_interval(Duration::from_secs(1));

        assert_eq!(builder.name.as_deref(), Some("orders"));
        assert_eq!(builder.config.segment_capacity, 4096);
        assert_eq!(builder.config.flush_mode, FlushMode::Os);
        assert_eq!(builder.config.heartbeat_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_build_names_queue_after_directory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let queue = QueueBuilder::new(temp_dir.path().join("jobs"))
            .flush_mode(FlushMode::Os)
            .build()
            .unwrap();
        assert_eq!(queue.name(), "jobs");
    }
}
