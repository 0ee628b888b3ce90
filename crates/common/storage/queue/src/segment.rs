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

//! Append-only segment log.
//!
//! ```text
//!  0                                                  w        capacity
//!  ┌────────┬─────────┬────────┬─────────┬─────┬──────┐.........│
//!  │ next=a │ payload │ next=b │ payload │ ... │      │         │
//!  └────────┴─────────┴────────┴─────────┴─────┴──────┘.........│
//!  ^                   ^                        ^
//!  │                   a                        r (consumer cursor)
//! ```
//!
//! A segment holds up to three independent handles onto the same file: the
//! writer, the consumer reader and any number of replication streams. Each owns
//! its file position, so none of them seeks under another's feet. The writer
//! publishes a [`Tail`] after every flushed write; readers never look past it.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use snafu::{OptionExt, ResultExt, ensure};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    FlushMode, Result,
    error::{
        CancelledSnafu, CorruptedRecordSnafu, EmptySnafu, IoSnafu, PayloadTooLargeSnafu,
        SegmentExhaustedSnafu, SegmentFullSnafu,
    },
    notify::{Wake, Watcher},
    path::segment_file_path,
    record::{self, RECORD_HEADER_SIZE},
    replication::{Operation, forward},
    stats::SegmentStats,
};

/// Durable end of a segment as seen by readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tail {
    /// Offset one past the last flushed record.
    pub write:  u32,
    /// No further records will be written.
    pub sealed: bool,
}

struct SegmentWriter {
    file:      File,
    write_pos: u32,
    frozen:    bool,
}

struct SegmentReader {
    file:     File,
    read_pos: u32,
}

pub struct Segment {
    id:         u32,
    path:       PathBuf,
    capacity:   u32,
    flush_mode: FlushMode,
    writer:     Mutex<SegmentWriter>,
    reader:     Mutex<SegmentReader>,
    tail:       watch::Sender<Tail>,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("tail", &self.tail())
            .finish_non_exhaustive()
    }
}

impl Segment {
    /// Open segment `id` in `dir`, creating an empty file if it does not exist.
    ///
    /// The write cursor starts at the current file length; recovery moves it
    /// back to the persisted cursor with [`set_write_pos`](Self::set_write_pos).
    pub fn open<P: AsRef<Path>>(
        dir: P,
        id: u32,
        capacity: u32,
        flush_mode: FlushMode,
    ) -> Result<Self> {
        let path = segment_file_path(dir, id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .context(IoSnafu { path: &path })?;
        Self::from_file(id, path, capacity, flush_mode, file, false)
    }

    /// Open an existing segment for reading only. The returned handle is
    /// sealed at its current length and rejects writes.
    pub fn open_sealed<P: AsRef<Path>>(dir: P, id: u32, capacity: u32) -> Result<Self> {
        let path = segment_file_path(dir, id);
        let file = File::open(&path).context(IoSnafu { path: &path })?;
        Self::from_file(id, path, capacity, FlushMode::Os, file, true)
    }

    fn from_file(
        id: u32,
        path: PathBuf,
        capacity: u32,
        flush_mode: FlushMode,
        file: File,
        frozen: bool,
    ) -> Result<Self> {
        let len = file.metadata().context(IoSnafu { path: &path })?.len();
        let write_pos = u32::try_from(len)
            .ok()
            .context(CorruptedRecordSnafu { id, offset: u32::MAX })?;
        let reader = File::open(&path).context(IoSnafu { path: &path })?;
        let tail = Tail {
            write:  write_pos,
            sealed: frozen || write_pos >= capacity,
        };
        let (tail, _) = watch::channel(tail);

        Ok(Self {
            id,
            path,
            capacity,
            flush_mode,
            writer: Mutex::new(SegmentWriter {
                file,
                write_pos,
                frozen,
            }),
            reader: Mutex::new(SegmentReader {
                file:     reader,
                read_pos: 0,
            }),
            tail,
        })
    }

    pub const fn id(&self) -> u32 { self.id }

    pub fn path(&self) -> &Path { &self.path }

    pub const fn capacity(&self) -> u32 { self.capacity }

    pub fn write_pos(&self) -> u32 { self.writer.lock().write_pos }

    pub fn read_pos(&self) -> u32 { self.reader.lock().read_pos }

    pub fn tail(&self) -> Tail { *self.tail.borrow() }

    pub fn is_sealed(&self) -> bool { self.tail().sealed }

    /// Subscribe to tail changes.
    pub fn watch(&self) -> Watcher<Tail> { Watcher::new(self.tail.subscribe()) }

    pub fn stats(&self) -> SegmentStats {
        let tail = self.tail();
        SegmentStats {
            id:        self.id,
            write_pos: tail.write,
            read_pos:  self.read_pos(),
            sealed:    tail.sealed,
        }
    }

    /// Append one record. Returns the new write cursor.
    ///
    /// Accepted whenever the cursor is below capacity, so a payload larger
    /// than the capacity lands alone in a fresh segment.
    pub fn write(&self, payload: &[u8]) -> Result<u32> {
        let mut writer = self.writer.lock();
        let at = writer.write_pos;
        ensure!(
            !writer.frozen && at < self.capacity,
            SegmentFullSnafu { id: self.id }
        );

        let next = record::next_offset(at, payload.len()).context(PayloadTooLargeSnafu {
            len: payload.len(),
        })?;
        let buf = record::encode(at, next, payload);
        self.write_at(&mut writer.file, at, &buf)?;

        writer.write_pos = next;
        self.publish(next, writer.frozen);
        Ok(next)
    }

    /// Append a raw record (header included) verbatim at the write cursor,
    /// ignoring capacity. Used by followers mirroring a master's segment.
    pub fn append_raw(&self, raw: &[u8]) -> Result<u32> {
        let mut writer = self.writer.lock();
        let at = writer.write_pos;
        ensure!(
            raw.len() >= RECORD_HEADER_SIZE,
            CorruptedRecordSnafu {
                id:     self.id,
                offset: at,
            }
        );

        let next = record::next_offset(at, raw.len() - RECORD_HEADER_SIZE)
            .context(PayloadTooLargeSnafu { len: raw.len() })?;
        let mut header = [0u8; RECORD_HEADER_SIZE];
        header.copy_from_slice(&raw[..RECORD_HEADER_SIZE]);
        let declared = u32::from_be_bytes(header);
        if declared != next {
            debug!(
                segment = self.id,
                offset = at,
                declared,
                expected = next,
                "raw record header disagrees with local offset"
            );
        }

        self.write_at(&mut writer.file, at, raw)?;
        writer.write_pos = next;
        self.publish(next, writer.frozen);
        Ok(next)
    }

    /// Read the record at the consumer cursor and advance past it.
    ///
    /// `Empty` at the tail of an open segment, `SegmentExhausted` at the tail of
    /// a sealed one.
    pub fn read(&self) -> Result<Bytes> {
        let mut reader = self.reader.lock();
        let tail = self.tail();
        let at = reader.read_pos;
        if at >= tail.write {
            return if tail.sealed {
                SegmentExhaustedSnafu { id: self.id }.fail()
            } else {
                EmptySnafu.fail()
            };
        }

        let raw = read_raw(&mut reader.file, &self.path, self.id, at, tail.write)?;
        reader.read_pos = at + raw_len(&raw);
        Ok(raw.slice(RECORD_HEADER_SIZE..))
    }

    /// Iterate the flushed records from offset 0 as `(offset, payload)`
    /// through a private read handle. Stops after the first corrupted record.
    pub fn records(&self) -> Result<Records> {
        let file = File::open(&self.path).context(IoSnafu { path: &self.path })?;
        Ok(Records {
            id: self.id,
            path: self.path.clone(),
            file,
            at: 0,
            end: self.tail().write,
            failed: false,
        })
    }

    /// Whether a record starts at `offset`, or `offset` is the write cursor.
    pub fn is_record_boundary(&self, offset: u32) -> Result<bool> {
        for record in self.records()? {
            let (at, _) = record?;
            if at >= offset {
                return Ok(at == offset);
            }
        }
        Ok(offset == self.tail().write)
    }

    /// Stream every record from offset 0 into `sink` as `APPEND` operations,
    /// following the tail until the segment is sealed and drained. Returns the
    /// number of records sent.
    pub async fn read_all(
        &self,
        sink: &mpsc::Sender<Operation>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut file = File::open(&self.path).context(IoSnafu { path: &self.path })?;
        let mut watcher = self.watch();
        let mut at = 0u32;
        let mut sent = 0u64;

        loop {
            let tail = watcher.observe();
            while at < tail.write {
                let raw = read_raw(&mut file, &self.path, self.id, at, tail.write)?;
                at += raw_len(&raw);
                forward(sink, Operation::Append(raw), cancel).await?;
                sent += 1;
            }
            if tail.sealed {
                debug!(segment = self.id, records = sent, "segment drained");
                return Ok(sent);
            }

            match watcher.changed(cancel).await {
                Wake::Changed => {}
                Wake::Cancelled => return CancelledSnafu.fail(),
                Wake::Closed => return Ok(sent),
            }
        }
    }

    /// Stop accepting writes. Readers drain what is already there.
    pub fn seal(&self) {
        let mut writer = self.writer.lock();
        writer.frozen = true;
        self.publish(writer.write_pos, true);
    }

    /// Move the write cursor to a recovered position, discarding any bytes
    /// past it.
    pub fn set_write_pos(&self, pos: u32) -> Result<()> {
        let mut writer = self.writer.lock();
        writer
            .file
            .set_len(pos.into())
            .context(IoSnafu { path: &self.path })?;
        writer.write_pos = pos;
        self.publish(pos, writer.frozen);
        Ok(())
    }

    pub fn set_read_pos(&self, pos: u32) { self.reader.lock().read_pos = pos; }

    /// Empty the segment and reopen it for writes.
    pub fn truncate(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        let mut reader = self.reader.lock();
        writer
            .file
            .set_len(0)
            .context(IoSnafu { path: &self.path })?;
        writer.write_pos = 0;
        writer.frozen = false;
        reader.read_pos = 0;
        self.publish(0, false);
        Ok(())
    }

    fn write_at(&self, file: &mut File, at: u32, buf: &[u8]) -> Result<()> {
        let path = &self.path;
        file.seek(SeekFrom::Start(at.into()))
            .context(IoSnafu { path })?;
        file.write_all(buf).context(IoSnafu { path })?;
        self.flush_mode.apply(file).context(IoSnafu { path })
    }

    fn publish(&self, write: u32, frozen: bool) {
        self.tail.send_replace(Tail {
            write,
            sealed: frozen || write >= self.capacity,
        });
    }
}

/// Records of one segment, see [`Segment::records`].
pub struct Records {
    id:     u32,
    path:   PathBuf,
    file:   File,
    at:     u32,
    end:    u32,
    failed: bool,
}

impl Iterator for Records {
    type Item = Result<(u32, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.at >= self.end {
            return None;
        }
        let at = self.at;
        match read_raw(&mut self.file, &self.path, self.id, at, self.end) {
            Ok(raw) => {
                self.at += raw_len(&raw);
                Some(Ok((at, raw.slice(RECORD_HEADER_SIZE..))))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn raw_len(raw: &Bytes) -> u32 { raw.len() as u32 }

/// Read the raw record (header included) at `at`, bounded by `limit`.
fn read_raw(file: &mut File, path: &Path, id: u32, at: u32, limit: u32) -> Result<Bytes> {
    ensure!(
        at.checked_add(RECORD_HEADER_SIZE as u32)
            .is_some_and(|end| end <= limit),
        CorruptedRecordSnafu { id, offset: at }
    );

    let mut header = [0u8; RECORD_HEADER_SIZE];
    file.seek(SeekFrom::Start(at.into()))
        .context(IoSnafu { path })?;
    file.read_exact(&mut header).context(IoSnafu { path })?;

    let next = u32::from_be_bytes(header);
    let len = record::payload_len(at, next)
        .filter(|_| next <= limit)
        .context(CorruptedRecordSnafu { id, offset: at })?;

    let mut raw = BytesMut::zeroed(RECORD_HEADER_SIZE + len as usize);
    raw[..RECORD_HEADER_SIZE].copy_from_slice(&header);
    file.read_exact(&mut raw[RECORD_HEADER_SIZE..])
        .context(IoSnafu { path })?;
    Ok(raw.freeze())
}
