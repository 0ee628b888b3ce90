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

//! Segmented persistent FIFO queue with master → follower replication.
//!
//! ```text
//! queue_dir/
//! ├── queue.idx                 five recovery cursors
//! ├── segment_0000000001.log    sealed
//! ├── segment_0000000002.log    sealed
//! └── segment_0000000003.log    active write target
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod index;
pub mod metrics;
pub mod notify;
pub mod path;
pub mod queue;
pub mod record;
pub mod recovery;
pub mod registry;
pub mod replication;
pub mod segment;
pub mod stats;

pub use builder::QueueBuilder;
pub use config::{FlushMode, QueueConfig};
pub use error::{QueueError, ReplicationError, Result};
pub use index::Index;
pub use queue::Queue;
pub use registry::Registry;
pub use replication::{
    Operation, PROTOCOL_VERSION, Publisher, ReplicationClient, ReplicationClientConfig,
    ReplicationSource, Subscription,
};
pub use segment::{Records, Segment};
pub use stats::{IndexStats, QueueStats, SegmentStats};
