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

//! Named persistent FIFO queue.
//!
//! A [`Queue`] owns one [`Index`] and the segments it has touched. Writers
//! serialize on the write lock, readers on the read lock, and the two never
//! wait for each other:
//!
//! ```text
//!            push ──► writer lock ──► Segment[writeSeg] ──► Index.writeOffset, length
//!            pop  ──► reader lock ──► Segment[readSeg]  ──► Index.readOffset, length
//!                                          │
//!                     every change bumps ──┴──► Generation ──► replication streams
//! ```
//!
//! Segment bytes always land before the index cursor that covers them, so a
//! crash at any point recovers to the last acknowledged push and at worst
//! re-delivers a popped record.
//!
//! ## Usage
//!
//! ```ignore
//! let queue = QueueBuilder::new("/path/to/queue").name("orders").build()?;
//! queue.push(b"hello")?;
//! assert_eq!(queue.pop()?.as_ref(), b"hello");
//! ```

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    QueueConfig, Result,
    error::{CancelledSnafu, EmptySnafu, QueueError},
    index::Index,
    metrics::{QUEUE_LENGTH, QUEUE_POPPED, QUEUE_PUSHED, QUEUE_ROTATIONS},
    notify::{Generation, Wake},
    path::scan_segment_ids,
    recovery::{RecoveryResult, recover},
    replication::{Operation, forward},
    segment::Segment,
    stats::{IndexStats, QueueStats},
};

pub struct Queue {
    name:     String,
    dir:      PathBuf,
    config:   Arc<QueueConfig>,
    index:    Index,
    /// Every segment opened so far. Entries are never evicted.
    segments: RwLock<BTreeMap<u32, Arc<Segment>>>,
    writer:   Mutex<Arc<Segment>>,
    reader:   Mutex<Arc<Segment>>,
    changes:  Generation,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("index", &self.index.stats())
            .finish_non_exhaustive()
    }
}

impl Queue {
    /// Open the queue stored in `dir`, creating it if needed.
    pub fn open<P: Into<PathBuf>>(
        name: impl Into<String>,
        dir: P,
        config: Arc<QueueConfig>,
    ) -> Result<Self> {
        let name = name.into();
        let dir = dir.into();
        let RecoveryResult {
            index,
            segments,
            writer,
            reader,
        } = recover(&dir, &config)?;

        QUEUE_LENGTH
            .with_label_values(&[name.as_str()])
            .set(i64::from(index.length()));
        info!(queue = %name, dir = %dir.display(), "queue opened");

        Ok(Self {
            name,
            dir,
            config,
            index,
            segments: RwLock::new(segments),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            changes: Generation::new(),
        })
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn config(&self) -> &QueueConfig { &self.config }

    pub const fn index(&self) -> &Index { &self.index }

    /// Number of pending payloads.
    pub fn len(&self) -> u32 { self.index.length() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Append a payload, rotating to a fresh segment when the current one is
    /// full. Returns the queue length after the push.
    pub fn push(&self, payload: &[u8]) -> Result<u32> {
        let mut writer = self.writer.lock();
        let next = loop {
            match writer.write(payload) {
                Ok(next) => break next,
                Err(QueueError::SegmentFull { id }) => *writer = self.rotate(id)?,
                Err(err) => return Err(err),
            }
        };

        self.index.set_write_offset(next)?;
        let length = self.index.inc_length()?;
        self.changes.bump();

        QUEUE_PUSHED.with_label_values(&[self.name.as_str()]).inc();
        QUEUE_LENGTH
            .with_label_values(&[self.name.as_str()])
            .set(i64::from(length));
        debug!(queue = %self.name, segment = writer.id(), offset = next, length, "pushed");
        Ok(length)
    }

    /// Remove and return the oldest payload. `Empty` when nothing is pending.
    pub fn pop(&self) -> Result<Bytes> {
        let mut reader = self.reader.lock();
        let payload = loop {
            match reader.read() {
                Ok(payload) => break payload,
                Err(QueueError::SegmentExhausted { id }) if id < self.index.write_segment() => {
                    *reader = self.advance(id)?;
                }
                Err(QueueError::SegmentExhausted { .. }) => return EmptySnafu.fail(),
                Err(err) => return Err(err),
            }
        };

        self.index.set_read_offset(reader.read_pos())?;
        let length = self.index.dec_length()?;
        self.changes.bump();

        QUEUE_POPPED.with_label_values(&[self.name.as_str()]).inc();
        QUEUE_LENGTH
            .with_label_values(&[self.name.as_str()])
            .set(i64::from(length));
        Ok(payload)
    }

    fn rotate(&self, full: u32) -> Result<Arc<Segment>> {
        let id = full + 1;
        let segment = self.segment_or_open(id)?;
        // Leftovers from a rotation that crashed before reaching the index.
        if segment.write_pos() != 0 {
            segment.truncate()?;
        }

        self.index.set_write_segment(id)?;
        self.index.set_write_offset(0)?;
        self.changes.bump();

        QUEUE_ROTATIONS.with_label_values(&[self.name.as_str()]).inc();
        info!(queue = %self.name, from = full, to = id, "rotated write segment");
        Ok(segment)
    }

    fn advance(&self, exhausted: u32) -> Result<Arc<Segment>> {
        let id = exhausted + 1;
        let segment = self.segment_or_open(id)?;
        segment.set_read_pos(0);

        // A crash between these leaves the old segment's end offset behind;
        // recovery resets it to 0.
        self.index.set_read_segment(id)?;
        self.index.set_read_offset(0)?;
        self.changes.bump();

        info!(queue = %self.name, from = exhausted, to = id, "advanced read segment");
        Ok(segment)
    }

    /// Resident segment `id`, opening it on first use. Segments behind the
    /// write cursor are sealed.
    fn segment_or_open(&self, id: u32) -> Result<Arc<Segment>> {
        if let Some(segment) = self.segments.read().get(&id) {
            return Ok(segment.clone());
        }

        let mut segments = self.segments.write();
        if let Some(segment) = segments.get(&id) {
            return Ok(segment.clone());
        }
        let segment = Arc::new(Segment::open(
            &self.dir,
            id,
            self.config.segment_capacity,
            self.config.flush_mode,
        )?);
        if id < self.index.write_segment() {
            segment.seal();
        }
        segments.insert(id, segment.clone());
        Ok(segment)
    }

    /// Stream the queue's full state and every later change into `sink`.
    ///
    /// Segments from the read cursor onwards are replayed as `NEW` followed by
    /// `APPEND`s, while a companion loop reports index changes or heartbeats.
    /// Runs until `cancel` fires (returning `Ok`) or the sink goes away.
    pub async fn sync_all(
        &self,
        sink: mpsc::Sender<Operation>,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!(queue = %self.name, "replication walk started");
        let res = tokio::try_join!(
            self.stream_segments(&sink, &cancel),
            self.stream_index(&sink, &cancel),
        );
        info!(queue = %self.name, "replication walk stopped");
        match res {
            Ok(_) | Err(QueueError::Cancelled) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn stream_segments(
        &self,
        sink: &mpsc::Sender<Operation>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut changes = self.changes.watch();
        let mut id = self.index.read_segment();

        loop {
            changes.observe();
            let write_segment = self.index.write_segment();
            if id > write_segment {
                match changes.changed(cancel).await {
                    Wake::Changed => continue,
                    Wake::Cancelled => return CancelledSnafu.fail(),
                    Wake::Closed => return Ok(()),
                }
            }

            forward(sink, Operation::New(id), cancel).await?;
            let records = if id < write_segment {
                Segment::open_sealed(&self.dir, id, self.config.segment_capacity)?
                    .read_all(sink, cancel)
                    .await?
            } else {
                self.segment_or_open(id)?.read_all(sink, cancel).await?
            };
            debug!(queue = %self.name, segment = id, records, "segment replicated");
            id += 1;
        }
    }

    async fn stream_index(
        &self,
        sink: &mpsc::Sender<Operation>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut changes = self.changes.watch();
        changes.observe();

        let mut last = self.index.stats();
        forward(sink, Operation::ChangeReadSegment(last.read_segment), cancel).await?;
        forward(sink, Operation::ChangeWriteSegment(last.write_segment), cancel).await?;
        forward(sink, idx_sync(&last), cancel).await?;

        loop {
            let wake =
                tokio::time::timeout(self.config.heartbeat_interval, changes.changed(cancel)).await;
            match wake {
                Err(_) => {
                    forward(sink, Operation::Heartbeat, cancel).await?;
                    continue;
                }
                Ok(Wake::Changed) => {}
                Ok(Wake::Cancelled) => return CancelledSnafu.fail(),
                Ok(Wake::Closed) => return Ok(()),
            }

            changes.observe();
            let now = self.index.stats();
            if now.write_segment != last.write_segment {
                forward(sink, Operation::ChangeWriteSegment(now.write_segment), cancel).await?;
            }
            if now.read_segment != last.read_segment {
                forward(sink, Operation::ChangeReadSegment(now.read_segment), cancel).await?;
            }
            if (now.read_offset, now.write_offset, now.length)
                != (last.read_offset, last.write_offset, last.length)
            {
                forward(sink, idx_sync(&now), cancel).await?;
            }
            last = now;
        }
    }

    /// On-disk segments entirely behind the read cursor. Nothing reads them
    /// again; removing them is left to the operator.
    pub fn drained_segments(&self) -> Result<Vec<u32>> {
        let read_segment = self.index.read_segment();
        let mut ids = scan_segment_ids(&self.dir)?;
        ids.retain(|id| *id < read_segment);
        Ok(ids)
    }

    pub fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            name:     self.name.clone(),
            index:    self.index.stats(),
            segments: self
                .segments
                .read()
                .values()
                .map(|segment| segment.stats())
                .collect(),
            drained:  self.drained_segments()?,
        })
    }
}

const fn idx_sync(stats: &IndexStats) -> Operation {
    Operation::IdxSync {
        read_offset:  stats.read_offset,
        write_offset: stats.write_offset,
        length:       stats.length,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::FlushMode;

    fn open(dir: &Path, capacity: u32) -> Queue {
        let config = QueueConfig {
            segment_capacity: capacity,
            flush_mode: FlushMode::Os,
            heartbeat_interval: Duration::from_millis(50),
        };
        Queue::open("test", dir, Arc::new(config)).unwrap()
    }

    #[test]
    fn test_push_pop_in_order() {
        let dir = TempDir::new().unwrap();
        let queue = open(dir.path(), 1024);

        assert_eq!(queue.push(b"abc").unwrap(), 1);
        assert_eq!(queue.push(b"def").unwrap(), 2);
        assert_eq!(queue.pop().unwrap().as_ref(), b"abc");
        assert_eq!(queue.pop().unwrap().as_ref(), b"def");
        assert!(queue.pop().unwrap_err().is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_rotation_is_transparent() {
        let dir = TempDir::new().unwrap();
        let queue = open(dir.path(), 32);

        for i in 0u8..10 {
            queue.push(&[i; 10]).unwrap();
        }
        assert!(queue.index().write_segment() > 1);

        for i in 0u8..10 {
            assert_eq!(queue.pop().unwrap().as_ref(), [i; 10]);
        }
        assert!(queue.pop().unwrap_err().is_empty());
        assert_eq!(queue.index().read_segment(), queue.index().write_segment());
    }

    #[test]
    fn test_payload_larger_than_capacity() {
        let dir = TempDir::new().unwrap();
        let queue = open(dir.path(), 32);
        let big = vec![5u8; 100];

        queue.push(b"abc").unwrap();
        queue.push(&big).unwrap();
        queue.push(b"def").unwrap();
        queue.push(&big).unwrap();
        assert_eq!(queue.index().write_segment(), 2);

        assert_eq!(queue.pop().unwrap().as_ref(), b"abc");
        assert_eq!(queue.pop().unwrap(), big);
        assert_eq!(queue.pop().unwrap().as_ref(), b"def");
        assert_eq!(queue.pop().unwrap(), big);
        assert!(queue.pop().unwrap_err().is_empty());
    }

    #[test]
    fn test_crash_inside_read_advance() {
        let dir = TempDir::new().unwrap();
        {
            let queue = open(dir.path(), 32);
            // 11-byte records, three per segment.
            for i in 0u8..10 {
                queue.push(&[i; 7]).unwrap();
            }
            for _ in 0..3 {
                queue.pop().unwrap();
            }
            assert_eq!(queue.index().read_segment(), 1);
            // The next pop would advance; stop after the segment is persisted.
            queue.index().set_read_segment(2).unwrap();
        }

        let queue = open(dir.path(), 32);
        assert_eq!(queue.len(), 7);
        assert_eq!(queue.index().read_offset(), 0);
        for i in 3u8..10 {
            assert_eq!(queue.pop().unwrap().as_ref(), [i; 7]);
        }
        assert!(queue.pop().unwrap_err().is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_on_full_active_segment_is_empty() {
        let dir = TempDir::new().unwrap();
        let queue = open(dir.path(), 16);

        queue.push(&[1u8; 12]).unwrap();
        queue.pop().unwrap();
        // The active segment is sealed but the writer has not rotated yet.
        assert!(queue.pop().unwrap_err().is_empty());
        assert_eq!(queue.index().read_segment(), 1);
    }

    #[test]
    fn test_drained_segments() {
        let dir = TempDir::new().unwrap();
        let queue = open(dir.path(), 16);

        for _ in 0..3 {
            queue.push(&[0u8; 12]).unwrap();
        }
        assert!(queue.drained_segments().unwrap().is_empty());

        queue.pop().unwrap();
        queue.pop().unwrap();
        assert_eq!(queue.drained_segments().unwrap(), vec![1]);

        let stats = queue.stats().unwrap();
        assert_eq!(stats.name, "test");
        assert_eq!(stats.index.length, 1);
        assert_eq!(stats.drained, vec![1]);
        assert_eq!(stats.segments.len(), 3);
    }

    #[tokio::test]
    async fn test_sync_all_replays_then_follows() {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(open(dir.path(), 1024));
        queue.push(b"abc").unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let walk = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.sync_all(tx, cancel).await })
        };

        let mut seen = Vec::new();
        while seen.len() < 5 {
            seen.push(rx.recv().await.unwrap());
        }
        assert!(seen.contains(&Operation::New(1)));
        assert!(seen.contains(&Operation::Append(Bytes::from_static(&[
            0, 0, 0, 7, b'a', b'b', b'c'
        ]))));
        assert!(seen.contains(&Operation::IdxSync {
            read_offset:  0,
            write_offset: 7,
            length:       1,
        }));

        queue.push(b"def").unwrap();
        let mut live_append = false;
        let mut heartbeat = false;
        while !(live_append && heartbeat) {
            match rx.recv().await.unwrap() {
                Operation::Append(raw) => live_append = raw.ends_with(b"def"),
                Operation::Heartbeat => heartbeat = true,
                _ => {}
            }
        }

        cancel.cancel();
        walk.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_sync_all_fails_when_sink_dropped() {
        let dir = TempDir::new().unwrap();
        let queue = open(dir.path(), 1024);
        queue.push(b"abc").unwrap();

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(matches!(
            queue.sync_all(tx, CancellationToken::new()).await,
            Err(QueueError::SinkClosed)
        ));
    }
}
