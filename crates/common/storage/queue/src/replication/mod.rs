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

//! Master → follower log replication.
//!
//! ```text
//!  master                                   follower
//!  ┌───────┐  Operation  ┌───────────────────┐  Bytes  ┌───────────────────┐
//!  │ Queue ├────────────►│ ReplicationSource ├────────►│ ReplicationClient │
//!  └───────┘  sync_all   └───────────────────┘ Publisher└───────────────────┘
//!                                               Subscription
//! ```
//!
//! The source replays every segment from the master's read cursor and then
//! follows live writes. The client applies records strictly in arrival order
//! to a local segment and index, ending with byte-identical files.

mod client;
mod op;
mod source;
mod transport;

pub use client::{ReplicationClient, ReplicationClientConfig};
pub use op::{OpCode, Operation, PROTOCOL_VERSION};
pub use source::ReplicationSource;
pub use transport::{Publisher, Subscription};

use snafu::OptionExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    Result,
    error::{CancelledSnafu, SinkClosedSnafu},
};

/// Send `op` into `sink` unless `cancel` fires first.
pub(crate) async fn forward(
    sink: &mpsc::Sender<Operation>,
    op: Operation,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => CancelledSnafu.fail(),
        res = sink.send(op) => res.ok().context(SinkClosedSnafu),
    }
}
