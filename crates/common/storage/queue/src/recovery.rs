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

//! Startup and crash recovery.
//!
//! There is no separate recovery procedure: opening a queue directory reads
//! the index and places the read and write segments' cursors where the index
//! says they are. Bytes written past the persisted write cursor belong to a
//! push that never acknowledged and are discarded.
//!
//! 1. Open (or create) the index
//! 2. Validate the cursor ordering
//! 3. Open the write segment at `writeOffset`
//! 4. Open the read segment, sealed if it is behind the writer
//! 5. Reset a read offset left over from an interrupted advance, then place
//!    the consumer cursor at `readOffset`

use std::{collections::BTreeMap, path::Path, sync::Arc};

use snafu::{ResultExt, ensure};
use tracing::{info, warn};

use crate::{
    QueueConfig, Result,
    error::{InconsistentIndexSnafu, IoSnafu},
    index::Index,
    path::{index_file_path, segment_file_path},
    segment::Segment,
    stats::IndexStats,
};

/// Queue state reconstructed from disk.
pub struct RecoveryResult {
    pub index:    Index,
    pub segments: BTreeMap<u32, Arc<Segment>>,
    pub writer:   Arc<Segment>,
    pub reader:   Arc<Segment>,
}

pub fn recover(dir: &Path, config: &QueueConfig) -> Result<RecoveryResult> {
    std::fs::create_dir_all(dir).context(IoSnafu { path: dir })?;

    let index = Index::open(index_file_path(dir), config.flush_mode)?;
    let stats = index.stats();
    validate(&index, &stats)?;

    let writer = Arc::new(Segment::open(
        dir,
        stats.write_segment,
        config.segment_capacity,
        config.flush_mode,
    )?);
    let len = writer.write_pos();
    if len < stats.write_offset {
        // Rotation persists the new segment id before resetting the offset.
        warn!(
            segment = stats.write_segment,
            len,
            write_offset = stats.write_offset,
            "write offset past segment end, clamping"
        );
        index.set_write_offset(len)?;
    }
    let stats = index.stats();
    writer.set_write_pos(stats.write_offset)?;

    let mut segments = BTreeMap::new();
    segments.insert(writer.id(), writer.clone());

    let reader = if stats.read_segment == stats.write_segment {
        writer.clone()
    } else {
        ensure!(
            segment_file_path(dir, stats.read_segment).exists(),
            InconsistentIndexSnafu {
                path:   index.path(),
                reason: format!("read segment {} is missing", stats.read_segment),
            }
        );
        let reader = Arc::new(Segment::open(
            dir,
            stats.read_segment,
            config.segment_capacity,
            config.flush_mode,
        )?);
        reader.seal();
        segments.insert(reader.id(), reader.clone());
        reader
    };
    if stale_read_offset(dir, config, &stats, &reader, &writer)? {
        // The read advance persists the new segment before resetting the offset.
        warn!(
            segment = stats.read_segment,
            read_offset = stats.read_offset,
            "read offset left over from the previous segment, resetting"
        );
        index.set_read_offset(0)?;
    }
    let stats = index.stats();
    ensure!(
        stats.read_offset <= reader.write_pos(),
        InconsistentIndexSnafu {
            path:   index.path(),
            reason: format!(
                "read offset {} is past the end of segment {}",
                stats.read_offset, stats.read_segment
            ),
        }
    );
    reader.set_read_pos(stats.read_offset);

    info!(
        dir = %dir.display(),
        read_segment = stats.read_segment,
        read_offset = stats.read_offset,
        write_segment = stats.write_segment,
        write_offset = stats.write_offset,
        length = stats.length,
        "queue recovered"
    );

    Ok(RecoveryResult {
        index,
        segments,
        writer,
        reader,
    })
}

/// Whether the read offset still points at the end of segment
/// `read_segment - 1`, as left by a crash inside the read advance.
///
/// Such an offset equals that segment's length. When it is also a valid
/// position in the current read segment, the pending record count decides:
/// a stale offset hides records that `length` still counts.
fn stale_read_offset(
    dir: &Path,
    config: &QueueConfig,
    stats: &IndexStats,
    reader: &Segment,
    writer: &Segment,
) -> Result<bool> {
    if stats.read_segment <= 1 || stats.read_offset == 0 {
        return Ok(false);
    }
    let previous = segment_file_path(dir, stats.read_segment - 1);
    let Ok(meta) = std::fs::metadata(&previous) else {
        return Ok(false);
    };
    if meta.len() != u64::from(stats.read_offset) {
        return Ok(false);
    }
    if stats.read_offset > reader.write_pos() || !reader.is_record_boundary(stats.read_offset)? {
        return Ok(true);
    }

    let mut pending = count_records(reader, stats.read_offset)?;
    for id in stats.read_segment + 1..stats.write_segment {
        let sealed = Segment::open_sealed(dir, id, config.segment_capacity)?;
        pending += count_records(&sealed, 0)?;
    }
    if stats.read_segment != stats.write_segment {
        pending += count_records(writer, 0)?;
    }
    Ok(pending < u64::from(stats.length))
}

fn count_records(segment: &Segment, from: u32) -> Result<u64> {
    let mut count = 0;
    for record in segment.records()? {
        let (at, _) = record?;
        if at >= from {
            count += 1;
        }
    }
    Ok(count)
}

fn validate(index: &Index, stats: &IndexStats) -> Result<()> {
    let fail = |reason: &str| {
        InconsistentIndexSnafu {
            path:   index.path(),
            reason: reason.to_string(),
        }
        .fail()
    };

    if stats.read_segment == 0 || stats.write_segment == 0 {
        return fail("segment ids start at 1");
    }
    if stats.read_segment > stats.write_segment {
        return fail("read segment is ahead of write segment");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{FlushMode, error::QueueError};

    fn config() -> QueueConfig {
        QueueConfig {
            flush_mode: FlushMode::Os,
            ..Default::default()
        }
    }

    #[test]
    fn test_fresh_directory() {
        let dir = TempDir::new().unwrap();
        let recovered = recover(&dir.path().join("q"), &config()).unwrap();

        assert_eq!(recovered.index.stats(), IndexStats::default());
        assert!(Arc::ptr_eq(&recovered.writer, &recovered.reader));
        assert_eq!(recovered.writer.id(), 1);
        assert!(dir.path().join("q").join("segment_0000000001.log").exists());
    }

    #[test]
    fn test_discards_unacknowledged_tail() {
        let dir = TempDir::new().unwrap();
        {
            let recovered = recover(dir.path(), &config()).unwrap();
            recovered.writer.write(b"abc").unwrap();
            recovered.index.set_write_offset(7).unwrap();
            // Crash before the index learns about this one.
            recovered.writer.write(b"lost").unwrap();
        }

        let recovered = recover(dir.path(), &config()).unwrap();
        assert_eq!(recovered.writer.write_pos(), 7);
        assert_eq!(recovered.reader.read().unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_read_segment_behind_writer_is_sealed() {
        let dir = TempDir::new().unwrap();
        {
            let recovered = recover(dir.path(), &config()).unwrap();
            recovered.writer.write(b"abc").unwrap();
            recovered.index.set_write_offset(7).unwrap();
            recovered.index.set_write_segment(2).unwrap();
            recovered.index.set_write_offset(0).unwrap();
        }

        let recovered = recover(dir.path(), &config()).unwrap();
        assert_eq!(recovered.reader.id(), 1);
        assert!(recovered.reader.is_sealed());
        assert_eq!(recovered.writer.id(), 2);
        assert_eq!(recovered.segments.len(), 2);
    }

    #[test]
    fn test_inconsistent_cursors() {
        let dir = TempDir::new().unwrap();
        {
            let recovered = recover(dir.path(), &config()).unwrap();
            recovered.index.set_read_segment(3).unwrap();
        }
        assert!(matches!(
            recover(dir.path(), &config()),
            Err(QueueError::InconsistentIndex { .. })
        ));
    }

    #[test]
    fn test_interrupted_rotation() {
        let dir = TempDir::new().unwrap();
        {
            let recovered = recover(dir.path(), &config()).unwrap();
            recovered.writer.write(b"abc").unwrap();
            recovered.index.set_write_offset(7).unwrap();
            // Crash after switching segments but before resetting the offset.
            recovered.index.set_write_segment(2).unwrap();
        }

        let recovered = recover(dir.path(), &config()).unwrap();
        assert_eq!(recovered.writer.id(), 2);
        assert_eq!(recovered.writer.write_pos(), 0);
        assert_eq!(recovered.index.write_offset(), 0);
        assert_eq!(recovered.reader.read().unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_read_offset_past_segment_end() {
        let dir = TempDir::new().unwrap();
        {
            let recovered = recover(dir.path(), &config()).unwrap();
            recovered.index.set_write_offset(100).unwrap();
            recovered.index.set_read_offset(50).unwrap();
        }
        assert!(matches!(
            recover(dir.path(), &config()),
            Err(QueueError::InconsistentIndex { .. })
        ));
    }

    fn seven_byte_records(dir: &Path, count: u8, pops: usize) -> QueueConfig {
        // 11-byte records: three fill a 32-byte segment.
        let config = QueueConfig {
            segment_capacity: 32,
            ..config()
        };
        let queue = crate::Queue::open("q", dir, Arc::new(config.clone())).unwrap();
        for i in 0..count {
            queue.push(&[i; 7]).unwrap();
        }
        for _ in 0..pops {
            queue.pop().unwrap();
        }
        config
    }

    #[test]
    fn test_interrupted_read_advance() {
        let dir = TempDir::new().unwrap();
        let config = seven_byte_records(dir.path(), 10, 3);
        {
            let index = Index::open(index_file_path(dir.path()), FlushMode::Os).unwrap();
            assert_eq!((index.read_segment(), index.read_offset()), (1, 33));
            // Crash after persisting the new segment but before the offset.
            index.set_read_segment(2).unwrap();
        }

        let recovered = recover(dir.path(), &config).unwrap();
        assert_eq!(recovered.index.read_segment(), 2);
        assert_eq!(recovered.index.read_offset(), 0);
        assert_eq!(recovered.reader.read().unwrap().as_ref(), [3u8; 7]);
    }

    #[test]
    fn test_interrupted_advance_into_active_segment() {
        let dir = TempDir::new().unwrap();
        let config = seven_byte_records(dir.path(), 4, 3);
        {
            let index = Index::open(index_file_path(dir.path()), FlushMode::Os).unwrap();
            assert_eq!((index.write_segment(), index.write_offset()), (2, 11));
            index.set_read_segment(2).unwrap();
        }

        let recovered = recover(dir.path(), &config).unwrap();
        assert_eq!(recovered.index.read_offset(), 0);
        assert!(Arc::ptr_eq(&recovered.reader, &recovered.writer));
        assert_eq!(recovered.reader.read().unwrap().as_ref(), [3u8; 7]);
    }

    #[test]
    fn test_read_offset_matching_previous_segment_is_kept() {
        let dir = TempDir::new().unwrap();
        // Segment 2 fully consumed: its end offset equals segment 1's length.
        let config = seven_byte_records(dir.path(), 10, 6);

        let recovered = recover(dir.path(), &config).unwrap();
        assert_eq!(recovered.index.read_segment(), 2);
        assert_eq!(recovered.index.read_offset(), 33);
        assert!(matches!(
            recovered.reader.read(),
            Err(QueueError::SegmentExhausted { id: 2 })
        ));
    }
}
