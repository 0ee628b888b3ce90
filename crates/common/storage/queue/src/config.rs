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

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Segment capacity in bytes. A segment stops accepting writes once its write
/// cursor reaches this value.
pub const DEFAULT_SEGMENT_CAPACITY: u32 = 1024 * 1024;

/// How long a replication stream may stay silent before a heartbeat is sent.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub segment_capacity:   u32,
    pub flush_mode:         FlushMode,
    pub heartbeat_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            segment_capacity:   DEFAULT_SEGMENT_CAPACITY,
            flush_mode:         FlushMode::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// What "flushed" means before a segment or index write returns.
///
/// Neither mode buffers in process: every write reaches the kernel before the
/// call returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Hand the write to the OS page cache.
    Os,
    /// `fdatasync` after every write.
    #[default]
    Sync,
}

impl FlushMode {
    pub(crate) fn apply(self, file: &std::fs::File) -> std::io::Result<()> {
        match self {
            Self::Os => Ok(()),
            Self::Sync => file.sync_data(),
        }
    }
}
