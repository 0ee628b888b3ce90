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

//! Queue cursor index.
//!
//! ## Index File Format
//!
//! ```text
//! ┌──────────────┬──────────┬──────────┬──────────┬──────────┬──────────┐
//! │ magic (6B)   │ read seg │ read off │ write seg│ write off│ length   │
//! │ "dqueue"     │ 6..10    │ 10..14   │ 14..18   │ 18..22   │ 22..26   │
//! └──────────────┴──────────┴──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! All fields are u32 big-endian. Each setter persists its own field with one
//! positioned write, so a crash can leave the fields mutually inconsistent by
//! at most the operation in flight. Recovery trusts whatever is on disk.
//!
//! Getters return a cached copy and never touch the file.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
};

use parking_lot::Mutex;
use snafu::{ResultExt, ensure};

use crate::{
    FlushMode, Result,
    error::{InvalidIndexFileSnafu, IoSnafu},
    stats::IndexStats,
};

/// Leading bytes of every index file.
pub const INDEX_MAGIC: &[u8; 6] = b"dqueue";

/// Total size of an index file in bytes.
pub const INDEX_FILE_SIZE: usize = 26;

/// Persisted cursor fields and their byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    ReadSegment,
    ReadOffset,
    WriteSegment,
    WriteOffset,
    Length,
}

impl Field {
    const ALL: [Self; 5] = [
        Self::ReadSegment,
        Self::ReadOffset,
        Self::WriteSegment,
        Self::WriteOffset,
        Self::Length,
    ];

    pub const fn offset(self) -> usize {
        match self {
            Self::ReadSegment => 6,
            Self::ReadOffset => 10,
            Self::WriteSegment => 14,
            Self::WriteOffset => 18,
            Self::Length => 22,
        }
    }
}

#[derive(Debug)]
pub struct Index {
    path:          PathBuf,
    flush_mode:    FlushMode,
    file:          Mutex<File>,
    read_segment:  AtomicU32,
    read_offset:   AtomicU32,
    write_segment: AtomicU32,
    write_offset:  AtomicU32,
    length:        AtomicU32,
}

impl Index {
    /// Open the index at `path`, creating it with default cursors if it does
    /// not exist or is empty.
    pub fn open<P: AsRef<Path>>(path: P, flush_mode: FlushMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .context(IoSnafu { path: &path })?;

        let len = file.metadata().context(IoSnafu { path: &path })?.len();
        let stats = if len == 0 {
            let stats = IndexStats::default();
            file.write_all(&encode(&stats))
                .context(IoSnafu { path: &path })?;
            flush_mode.apply(&file).context(IoSnafu { path: &path })?;
            stats
        } else {
            read_stats(&mut file, &path)?
        };

        Ok(Self {
            path,
            flush_mode,
            file: Mutex::new(file),
            read_segment: AtomicU32::new(stats.read_segment),
            read_offset: AtomicU32::new(stats.read_offset),
            write_segment: AtomicU32::new(stats.write_segment),
            write_offset: AtomicU32::new(stats.write_offset),
            length: AtomicU32::new(stats.length),
        })
    }

    /// Read the cursors of an existing index file without opening it for
    /// writing.
    pub fn read_snapshot<P: AsRef<Path>>(path: P) -> Result<IndexStats> {
        let path = path.as_ref();
        let mut file = File::open(path).context(IoSnafu { path })?;
        read_stats(&mut file, path)
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn read_segment(&self) -> u32 { self.read_segment.load(Ordering::Acquire) }

    pub fn read_offset(&self) -> u32 { self.read_offset.load(Ordering::Acquire) }

    pub fn write_segment(&self) -> u32 { self.write_segment.load(Ordering::Acquire) }

    pub fn write_offset(&self) -> u32 { self.write_offset.load(Ordering::Acquire) }

    pub fn length(&self) -> u32 { self.length.load(Ordering::Acquire) }

    pub fn set_read_segment(&self, value: u32) -> Result<()> { self.set(Field::ReadSegment, value) }

    pub fn set_read_offset(&self, value: u32) -> Result<()> { self.set(Field::ReadOffset, value) }

    pub fn set_write_segment(&self, value: u32) -> Result<()> { self.set(Field::WriteSegment, value) }

    pub fn set_write_offset(&self, value: u32) -> Result<()> { self.set(Field::WriteOffset, value) }

    pub fn set_length(&self, value: u32) -> Result<()> { self.set(Field::Length, value) }

    /// Increment the pending length, returning the new value.
    pub fn inc_length(&self) -> Result<u32> { self.update_length(|len| len.saturating_add(1)) }

    /// Decrement the pending length, returning the new value. Never goes below
    /// zero.
    pub fn dec_length(&self) -> Result<u32> { self.update_length(|len| len.saturating_sub(1)) }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            read_segment:  self.read_segment(),
            read_offset:   self.read_offset(),
            write_segment: self.write_segment(),
            write_offset:  self.write_offset(),
            length:        self.length(),
        }
    }

    fn cell(&self, field: Field) -> &AtomicU32 {
        match field {
            Field::ReadSegment => &self.read_segment,
            Field::ReadOffset => &self.read_offset,
            Field::WriteSegment => &self.write_segment,
            Field::WriteOffset => &self.write_offset,
            Field::Length => &self.length,
        }
    }

    fn set(&self, field: Field, value: u32) -> Result<()> {
        let mut file = self.file.lock();
        self.persist(&mut file, field, value)?;
        self.cell(field).store(value, Ordering::Release);
        Ok(())
    }

    // Push and pop both touch the length under different queue locks; the
    // file lock serializes the read-modify-write.
    fn update_length(&self, f: impl FnOnce(u32) -> u32) -> Result<u32> {
        let mut file = self.file.lock();
        let value = f(self.length.load(Ordering::Acquire));
        self.persist(&mut file, Field::Length, value)?;
        self.length.store(value, Ordering::Release);
        Ok(value)
    }

    fn persist(&self, file: &mut File, field: Field, value: u32) -> Result<()> {
        let path = &self.path;
        file.seek(SeekFrom::Start(field.offset() as u64))
            .context(IoSnafu { path })?;
        file.write_all(&value.to_be_bytes())
            .context(IoSnafu { path })?;
        self.flush_mode.apply(file).context(IoSnafu { path })
    }
}

fn encode(stats: &IndexStats) -> [u8; INDEX_FILE_SIZE] {
    let mut buf = [0u8; INDEX_FILE_SIZE];
    buf[..INDEX_MAGIC.len()].copy_from_slice(INDEX_MAGIC);
    for field in Field::ALL {
        let value = match field {
            Field::ReadSegment => stats.read_segment,
            Field::ReadOffset => stats.read_offset,
            Field::WriteSegment => stats.write_segment,
            Field::WriteOffset => stats.write_offset,
            Field::Length => stats.length,
        };
        let at = field.offset();
        buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }
    buf
}

fn read_stats(file: &mut File, path: &Path) -> Result<IndexStats> {
    let mut buf = Vec::with_capacity(INDEX_FILE_SIZE);
    file.seek(SeekFrom::Start(0)).context(IoSnafu { path })?;
    file.read_to_end(&mut buf).context(IoSnafu { path })?;
    ensure!(
        buf.len() >= INDEX_FILE_SIZE && buf.starts_with(INDEX_MAGIC),
        InvalidIndexFileSnafu { path }
    );

    let field = |field: Field| {
        let at = field.offset();
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&buf[at..at + 4]);
        u32::from_be_bytes(bytes)
    };
    Ok(IndexStats {
        read_segment:  field(Field::ReadSegment),
        read_offset:   field(Field::ReadOffset),
        write_segment: field(Field::WriteSegment),
        write_offset:  field(Field::WriteOffset),
        length:        field(Field::Length),
    })
}
