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

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use parking_lot::{Mutex, RwLock};
use snafu::ensure;
use tracing::info;

use crate::{
    Queue, QueueConfig, Result,
    error::InvalidQueueNameSnafu,
    stats::QueueStats,
};

/// Live queues of one process, keyed by name. Each queue lives in
/// `root/<name>` and stays open for the registry's lifetime.
///
/// The map lock only guards slot insertion. Opening a queue happens under its
/// own slot, so a slow open never stalls lookups of other queues.
#[derive(Debug)]
pub struct Registry {
    root:   PathBuf,
    config: Arc<QueueConfig>,
    queues: RwLock<HashMap<String, Arc<Slot>>>,
}

/// One registry entry. Empty until the first successful open.
#[derive(Debug, Default)]
struct Slot {
    queue: OnceLock<Arc<Queue>>,
    init:  Mutex<()>,
}

impl Slot {
    fn get(&self) -> Option<Arc<Queue>> { self.queue.get().cloned() }

    fn get_or_open(&self, open: impl FnOnce() -> Result<Queue>) -> Result<Arc<Queue>> {
        if let Some(queue) = self.get() {
            return Ok(queue);
        }
        let _init = self.init.lock();
        if let Some(queue) = self.get() {
            return Ok(queue);
        }
        let queue = Arc::new(open()?);
        Ok(self.queue.get_or_init(|| queue).clone())
    }
}

impl Registry {
    pub fn new<P: Into<PathBuf>>(root: P, config: QueueConfig) -> Self {
        Self {
            root:   root.into(),
            config: Arc::new(config),
            queues: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn config(&self) -> &QueueConfig { &self.config }

    /// Queue `name`, opening or creating it on first reference.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<Queue>> {
        self.slot(name)?.get_or_open(|| {
            let queue = Queue::open(name, self.root.join(name), self.config.clone())?;
            info!(queue = name, "queue registered");
            Ok(queue)
        })
    }

    fn slot(&self, name: &str) -> Result<Arc<Slot>> {
        if let Some(slot) = self.queues.read().get(name) {
            return Ok(slot.clone());
        }
        validate_name(name)?;
        Ok(self
            .queues
            .write()
            .entry(name.to_string())
            .or_default()
            .clone())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.read().get(name).and_then(|slot| slot.get())
    }

    fn open_queues(&self) -> Vec<Arc<Queue>> {
        self.queues
            .read()
            .values()
            .filter_map(|slot| slot.get())
            .collect()
    }

    /// Open queue names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .open_queues()
            .iter()
            .map(|queue| queue.name().to_string())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn stats(&self) -> Result<BTreeMap<String, QueueStats>> {
        self.open_queues()
            .iter()
            .map(|queue| Ok((queue.name().to_string(), queue.stats()?)))
            .collect()
    }
}

/// A queue name becomes a directory name, so it must be exactly one normal
/// path component.
fn validate_name(name: &str) -> Result<()> {
    ensure!(
        !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']),
        InvalidQueueNameSnafu { name }
    );
    Ok(())
}
