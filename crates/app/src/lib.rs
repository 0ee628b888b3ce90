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

//! Process-level wiring: one [`Registry`] of queues under a data directory,
//! an in-process [`Broker`] carrying replication streams, and the tasks that
//! drive master and follower sessions.
//!
//! ```text
//!   App::push/pop ──► Registry ──► Queue
//!                                   │
//!   App::replicate ── ReplicationSource ──► Broker topic ──► ReplicationClient
//!                                                           (App::follow)
//! ```

pub mod broker;
pub mod error;
pub mod status;

use std::{path::PathBuf, sync::Arc};

use bon::Builder;
pub use broker::{Broker, BrokerSubscription, TopicPublisher, replication_topic};
use bytes::Bytes;
pub use error::{AppError, Result};
use rqueue_common_telemetry::{self as telemetry, LoggingOptions, WorkerGuard};
use rqueue_storage::{QueueConfig, Registry, ReplicationClient, ReplicationClientConfig, ReplicationSource};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ResultExt;
pub use status::StatusReport;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{JoinSnafu, QueueSnafu, ReplicationSnafu};

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_BROKER_CAPACITY: usize = 16 * 1024;

/// Configuration for the application
#[derive(Debug, Clone, PartialEq, Eq, SmartDefault, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root directory; each queue lives in a subdirectory named after it.
    #[default(_code = "PathBuf::from(DEFAULT_DATA_DIR)")]
    #[builder(into, default = PathBuf::from(DEFAULT_DATA_DIR))]
    pub data_dir:        PathBuf,
    #[builder(default)]
    pub queue:           QueueConfig,
    #[builder(default)]
    pub logging:         LoggingOptions,
    /// Messages a broker topic buffers before slow subscribers lag out.
    #[default(_code = "DEFAULT_BROKER_CAPACITY")]
    #[builder(default = DEFAULT_BROKER_CAPACITY)]
    pub broker_capacity: usize,
}

impl AppConfig {
    #[must_use]
    pub fn open(self) -> App {
        App {
            registry: Arc::new(Registry::new(&self.data_dir, self.queue.clone())),
            broker: Arc::new(Broker::new(self.broker_capacity)),
            config: self,
            ..Default::default()
        }
    }
}

/// Represents the main application with lifecycle management
#[derive(SmartDefault)]
pub struct App {
    pub config:             AppConfig,
    #[default(_code = "Arc::new(Registry::new(DEFAULT_DATA_DIR, QueueConfig::default()))")]
    registry:               Arc<Registry>,
    #[default(_code = "Arc::new(Broker::new(DEFAULT_BROKER_CAPACITY))")]
    broker:                 Arc<Broker>,
    /// Cancels every replication session started by this app.
    #[default(_code = "CancellationToken::new()")]
    pub cancellation_token: CancellationToken,
}

impl App {
    pub fn registry(&self) -> &Arc<Registry> { &self.registry }

    pub fn broker(&self) -> &Arc<Broker> { &self.broker }

    /// Install the global subscriber and panic hook. Keep the guards alive
    /// for as long as file logs should be flushed.
    pub fn init_logging(&self) -> Vec<WorkerGuard> {
        let guards = telemetry::init_global_logging(&self.config.logging);
        telemetry::set_panic_hook();
        info!(data_dir = %self.config.data_dir.display(), "rqueue starting");
        guards
    }

    /// Append `payload` to `queue`, creating the queue on first use.
    /// Returns the queue length after the push.
    pub fn push(&self, queue: &str, payload: &[u8]) -> Result<u32> {
        self.registry
            .get_or_create(queue)
            .and_then(|q| q.push(payload))
            .context(QueueSnafu)
    }

    pub fn pop(&self, queue: &str) -> Result<Bytes> {
        self.registry
            .get_or_create(queue)
            .and_then(|q| q.pop())
            .context(QueueSnafu)
    }

    pub fn status(&self) -> Result<StatusReport> {
        let queues = self.registry.stats().context(QueueSnafu)?;
        Ok(StatusReport::new(queues))
    }

    /// Stream `queue` onto its broker topic until the app shuts down.
    /// Subscribers attached before this call receive the full history.
    pub async fn replicate(&self, queue: &str) -> Result<ReplicationTask> {
        let queue = self.registry.get_or_create(queue).context(QueueSnafu)?;
        let name = queue.name().to_string();
        let publisher = self.broker.publisher(&replication_topic(&name)).await;
        let cancel = self.cancellation_token.child_token();

        let handle = tokio::spawn(async move {
            ReplicationSource::new(queue)
                .run(&publisher, cancel)
                .await
                .context(ReplicationSnafu)
        });
        Ok(ReplicationTask { queue: name, handle })
    }

    /// Mirror `queue`'s broker topic into `dir`. Resolves with the number of
    /// records applied once the app shuts down.
    pub async fn follow(
        &self,
        queue: &str,
        dir: impl Into<PathBuf>,
        config: ReplicationClientConfig,
    ) -> Result<ReplicationTask> {
        let mut client = ReplicationClient::new(dir, config).context(ReplicationSnafu)?;
        let mut subscription = self.broker.subscribe(&replication_topic(queue)).await;
        let cancel = self.cancellation_token.child_token();

        let handle = tokio::spawn(async move {
            let res = client.run(&mut subscription, &cancel).await;
            if let Err(e) = &res {
                warn!(dir = %client.dir().display(), error = %e, "follower session ended");
            }
            res.map(|()| client.applied()).context(ReplicationSnafu)
        });
        Ok(ReplicationTask {
            queue: queue.to_string(),
            handle,
        })
    }

    /// Cancel every session started by this app.
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown");
        self.cancellation_token.cancel();
    }

    #[must_use]
    pub fn is_running(&self) -> bool { !self.cancellation_token.is_cancelled() }

    pub async fn wait_for_shutdown(&self) { self.cancellation_token.cancelled().await; }
}

/// A spawned replication session. The output counts records published
/// (master side) or applied (follower side).
#[derive(Debug)]
pub struct ReplicationTask {
    queue:  String,
    handle: JoinHandle<Result<u64>>,
}

impl ReplicationTask {
    pub fn queue(&self) -> &str { &self.queue }

    pub fn is_finished(&self) -> bool { self.handle.is_finished() }

    pub fn abort(&self) { self.handle.abort(); }

    pub async fn join(self) -> Result<u64> { self.handle.await.context(JoinSnafu)? }
}
