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

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{ReplicationError, StreamClosedSnafu};

/// Receiving end of a replication stream.
#[async_trait]
pub trait Subscription: Send {
    /// Next encoded record, or `None` once the stream has ended.
    async fn recv(&mut self) -> Result<Option<Bytes>, ReplicationError>;
}

/// Sending end of a replication stream.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, record: Bytes) -> Result<(), ReplicationError>;
}

#[async_trait]
impl Subscription for mpsc::Receiver<Bytes> {
    async fn recv(&mut self) -> Result<Option<Bytes>, ReplicationError> {
        Ok(mpsc::Receiver::recv(self).await)
    }
}

#[async_trait]
impl Publisher for mpsc::Sender<Bytes> {
    async fn publish(&self, record: Bytes) -> Result<(), ReplicationError> {
        self.send(record)
            .await
            .map_err(|_| StreamClosedSnafu.build())
    }
}
