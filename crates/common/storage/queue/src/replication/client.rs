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
    path::{Path, PathBuf},
    time::Duration,
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Operation, Subscription};
use crate::{
    FlushMode,
    config::DEFAULT_SEGMENT_CAPACITY,
    error::{
        HeartbeatTimeoutSnafu, IoSnafu, ReplicationError, StorageSnafu, StreamClosedSnafu,
    },
    index::Index,
    metrics::{REPLICATION_APPLIED, REPLICATION_SKIPPED},
    path::index_file_path,
    segment::Segment,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationClientConfig {
    /// End the session when nothing arrives for this long. Should exceed the
    /// master's heartbeat interval.
    pub liveness_timeout: Option<Duration>,
    pub segment_capacity: u32,
    pub flush_mode:       FlushMode,
}

impl Default for ReplicationClientConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: None,
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            flush_mode:       FlushMode::default(),
        }
    }
}

/// Follower-side mirror of one master queue.
///
/// Holds the segment currently being appended to and the local index, both
/// created on first use.
pub struct ReplicationClient {
    dir:       PathBuf,
    config:    ReplicationClientConfig,
    segment:   Option<Segment>,
    index:     Option<Index>,
    last_seen: Instant,
    applied:   u64,
}

impl ReplicationClient {
    pub fn new<P: Into<PathBuf>>(
        dir: P,
        config: ReplicationClientConfig,
    ) -> Result<Self, ReplicationError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .context(IoSnafu { path: &dir })
            .context(StorageSnafu)?;
        Ok(Self {
            dir,
            config,
            segment: None,
            index: None,
            last_seen: Instant::now(),
            applied: 0,
        })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    pub const fn segment(&self) -> Option<&Segment> { self.segment.as_ref() }

    pub const fn index(&self) -> Option<&Index> { self.index.as_ref() }

    /// Number of operations applied so far.
    pub const fn applied(&self) -> u64 { self.applied }

    /// Decode and apply one record. Unknown or malformed records are logged
    /// and skipped.
    pub fn apply(&mut self, record: Bytes) -> Result<(), ReplicationError> {
        self.last_seen = Instant::now();
        match Operation::decode(record) {
            Ok(op) => self.apply_operation(op),
            Err(err) if err.is_skippable() => {
                warn!(dir = %self.dir.display(), error = %err, "skipping replication record");
                REPLICATION_SKIPPED.inc();
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn apply_operation(&mut self, op: Operation) -> Result<(), ReplicationError> {
        let name = op.name();
        match op {
            Operation::New(id) => {
                let segment = Segment::open(
                    &self.dir,
                    id,
                    self.config.segment_capacity,
                    self.config.flush_mode,
                )
                .context(StorageSnafu)?;
                segment.truncate().context(StorageSnafu)?;
                info!(dir = %self.dir.display(), segment = id, "following segment");
                self.segment = Some(segment);
            }
            Operation::Append(raw) => {
                let Some(segment) = &self.segment else {
                    warn!(len = raw.len(), "APPEND before any NEW, skipping");
                    REPLICATION_SKIPPED.inc();
                    return Ok(());
                };
                let next = segment.append_raw(&raw).context(StorageSnafu)?;
                debug!(segment = segment.id(), offset = next, "appended");
            }
            Operation::IdxSync {
                read_offset,
                write_offset,
                length,
            } => {
                let index = self.local_index()?;
                index.set_read_offset(read_offset).context(StorageSnafu)?;
                index.set_write_offset(write_offset).context(StorageSnafu)?;
                index.set_length(length).context(StorageSnafu)?;
            }
            Operation::ChangeReadSegment(id) => {
                self.local_index()?
                    .set_read_segment(id)
                    .context(StorageSnafu)?;
            }
            Operation::ChangeWriteSegment(id) => {
                self.local_index()?
                    .set_write_segment(id)
                    .context(StorageSnafu)?;
            }
            Operation::Heartbeat => debug!(dir = %self.dir.display(), "heartbeat"),
        }

        REPLICATION_APPLIED.with_label_values(&[name]).inc();
        self.applied += 1;
        Ok(())
    }

    fn local_index(&mut self) -> Result<&Index, ReplicationError> {
        let index = match self.index.take() {
            Some(index) => index,
            None => Index::open(index_file_path(&self.dir), self.config.flush_mode)
                .context(StorageSnafu)?,
        };
        Ok(self.index.insert(index))
    }

    /// Apply records from `subscription` until it ends, fails, goes silent
    /// past the liveness timeout, or `cancel` fires. Only cancellation ends
    /// the session with `Ok`.
    pub async fn run<S>(
        &mut self,
        subscription: &mut S,
        cancel: &CancellationToken,
    ) -> Result<(), ReplicationError>
    where
        S: Subscription + ?Sized,
    {
        info!(dir = %self.dir.display(), "replication client started");
        self.last_seen = Instant::now();

        let res = loop {
            let liveness = self.config.liveness_timeout;
            let last_seen = self.last_seen;
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                next = recv(subscription, liveness, last_seen) => next,
            };
            match next {
                Ok(Some(record)) => {
                    if let Err(err) = self.apply(record) {
                        break Err(err);
                    }
                }
                Ok(None) => break StreamClosedSnafu.fail(),
                Err(err) => break Err(err),
            }
        };

        match &res {
            Ok(()) => info!(dir = %self.dir.display(), applied = self.applied, "replication client stopped"),
            Err(err) => error!(dir = %self.dir.display(), error = %err, "replication client failed"),
        }
        res
    }
}

async fn recv<S>(
    subscription: &mut S,
    liveness: Option<Duration>,
    last_seen: Instant,
) -> Result<Option<Bytes>, ReplicationError>
where
    S: Subscription + ?Sized,
{
    let Some(liveness) = liveness else {
        return subscription.recv().await;
    };
    match tokio::time::timeout_at(last_seen + liveness, subscription.recv()).await {
        Ok(res) => res,
        Err(_) => HeartbeatTimeoutSnafu {
            elapsed: last_seen.elapsed(),
        }
        .fail(),
    }
}
