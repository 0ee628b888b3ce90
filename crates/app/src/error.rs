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

use rqueue_storage::{QueueError, ReplicationError};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    #[snafu(display("Queue error: {source}"))]
    Queue { source: QueueError },

    #[snafu(display("Replication error: {source}"))]
    Replication { source: ReplicationError },

    #[snafu(display("Failed to encode status report: {source}"))]
    Status { source: serde_json::Error },

    #[snafu(display("Background task failed: {source}"))]
    Join { source: tokio::task::JoinError },
}

impl AppError {
    /// Whether this is a pop on an empty queue.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Queue { source } if source.is_empty())
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
