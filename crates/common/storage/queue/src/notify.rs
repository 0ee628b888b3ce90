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

//! Best-effort change notification for streaming readers.
//!
//! Producers publish a value (a generation counter, or a segment's tail) and
//! never block doing so. A waiter compares what it last observed against the
//! current value, so any number of publishes between two observations collapse
//! into a single wakeup. Waiters must re-test their exit condition after every
//! wakeup instead of counting them.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Why [`Watcher::changed`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The published value changed since the last observation.
    Changed,
    /// The cancel token fired.
    Cancelled,
    /// The publisher is gone; nothing will change again.
    Closed,
}

/// Monotonically increasing change counter.
#[derive(Debug)]
pub struct Generation {
    tx: watch::Sender<u64>,
}

impl Default for Generation {
    fn default() -> Self { Self::new() }
}

impl Generation {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }

    /// Advance the generation and wake every waiter.
    pub fn bump(&self) { self.tx.send_modify(|generation| *generation = generation.wrapping_add(1)); }

    #[must_use]
    pub fn watch(&self) -> Watcher<u64> { Watcher::new(self.tx.subscribe()) }
}

/// Receiving side of a published value.
#[derive(Debug)]
pub struct Watcher<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> Watcher<T> {
    pub(crate) const fn new(rx: watch::Receiver<T>) -> Self { Self { rx } }

    /// Current value; marks it as seen.
    pub fn observe(&mut self) -> T { self.rx.borrow_and_update().clone() }

    /// Wait until the value changes after the last [`observe`](Self::observe)
    /// or `cancel` fires, whichever comes first.
    pub async fn changed(&mut self, cancel: &CancellationToken) -> Wake {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Wake::Cancelled,
            res = self.rx.changed() => match res {
                Ok(()) => Wake::Changed,
                Err(_) => Wake::Closed,
            },
        }
    }
}
