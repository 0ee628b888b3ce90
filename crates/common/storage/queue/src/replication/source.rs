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

use std::sync::Arc;

use snafu::ResultExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{Operation, PROTOCOL_VERSION, Publisher};
use crate::{
    Queue,
    error::{ReplicationError, StorageSnafu},
    metrics::REPLICATION_SENT,
};

/// Publishes a queue's replication stream.
///
/// Drives [`Queue::sync_all`] and encodes every operation it yields onto a
/// [`Publisher`]. A publish failure stops the walk.
pub struct ReplicationSource {
    queue:  Arc<Queue>,
    buffer: usize,
}

impl ReplicationSource {
    /// Operations buffered between the segment walk and the publisher.
    pub const DEFAULT_BUFFER: usize = 1024;

    pub const fn new(queue: Arc<Queue>) -> Self {
        Self {
            queue,
            buffer: Self::DEFAULT_BUFFER,
        }
    }

    #[must_use]
    pub const fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn queue(&self) -> &Arc<Queue> { &self.queue }

    /// Run until `cancel` fires or the stream fails. Returns the number of
    /// records published.
    pub async fn run<P>(&self, publisher: &P, cancel: CancellationToken) -> Result<u64, ReplicationError>
    where
        P: Publisher + ?Sized,
    {
        let name = self.queue.name();
        info!(queue = %name, version = PROTOCOL_VERSION, "replication session started");

        let (tx, mut rx) = mpsc::channel::<Operation>(self.buffer.max(1));
        let walk_cancel = cancel.child_token();
        let walk = self.queue.sync_all(tx, walk_cancel.clone());

        let publish = async {
            let mut sent = 0u64;
            loop {
                let op = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    op = rx.recv() => match op {
                        Some(op) => op,
                        None => break,
                    },
                };
                if let Err(err) = publisher.publish(op.encode()).await {
                    walk_cancel.cancel();
                    return Err(err);
                }
                REPLICATION_SENT.with_label_values(&[name, op.name()]).inc();
                sent += 1;
            }
            Ok(sent)
        };

        let (walked, published) = tokio::join!(walk, publish);
        let res = published.and_then(|sent| walked.context(StorageSnafu).map(|()| sent));
        match &res {
            Ok(sent) => info!(queue = %name, sent, "replication session stopped"),
            Err(err) => error!(queue = %name, error = %err, "replication session failed"),
        }
        res
    }
}
