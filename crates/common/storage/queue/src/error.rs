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

use std::{io, path::PathBuf, time::Duration};

use snafu::Snafu;

/// Queue and storage errors.
///
/// `SegmentFull` and `SegmentExhausted` are rotation signals consumed inside
/// [`Queue`](crate::Queue); callers of `push`/`pop` only ever observe `Empty`
/// and the I/O class of errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueueError {
    /// Nothing to read yet. Retryable.
    #[snafu(display("Queue is empty"))]
    Empty,

    #[snafu(display("Segment {id} is full"))]
    SegmentFull { id: u32 },

    #[snafu(display("Segment {id} is exhausted"))]
    SegmentExhausted { id: u32 },

    /// Short read or write against storage.
    #[snafu(display("IO error on {}: {source}", path.display()))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("Corrupted record in segment {id} at offset {offset}"))]
    CorruptedRecord { id: u32, offset: u32 },

    /// The record would end past the 32-bit offset space.
    #[snafu(display("Payload of {len} bytes overflows the segment offset space"))]
    PayloadTooLarge { len: usize },

    #[snafu(display("Not a queue index file: {}", path.display()))]
    InvalidIndexFile { path: PathBuf },

    #[snafu(display("Inconsistent index {}: {reason}", path.display()))]
    InconsistentIndex { path: PathBuf, reason: String },

    #[snafu(display("Invalid queue name: {name:?}"))]
    InvalidQueueName { name: String },

    #[snafu(display("Segment streaming cancelled"))]
    Cancelled,

    #[snafu(display("Replication sink closed"))]
    SinkClosed,
}

impl QueueError {
    /// Whether this is the retryable "nothing to pop" condition.
    #[must_use]
    pub const fn is_empty(&self) -> bool { matches!(self, Self::Empty) }
}

/// Errors raised while producing or applying the replication stream.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReplicationError {
    #[snafu(display("Empty replication record"))]
    EmptyRecord,

    #[snafu(display("Unknown replication operation tag {tag}"))]
    UnknownTag { tag: u8 },

    #[snafu(display("Truncated {op} record of {len} bytes"))]
    Truncated { op: &'static str, len: usize },

    #[snafu(display("Storage error: {source}"))]
    Storage { source: QueueError },

    #[snafu(display("Replication stream closed"))]
    StreamClosed,

    #[snafu(display("No replication record received for {elapsed:?}"))]
    HeartbeatTimeout { elapsed: Duration },

    #[snafu(display("Replication transport error: {message}"))]
    Transport { message: String },
}

impl ReplicationError {
    /// Records that are logged and skipped instead of ending the session.
    #[must_use]
    pub const fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::EmptyRecord | Self::UnknownTag { .. } | Self::Truncated { .. }
        )
    }
}

/// Result type for queue operations.
pub type Result<T, E = QueueError> = std::result::Result<T, E>;
