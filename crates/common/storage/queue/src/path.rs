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

use std::path::{Path, PathBuf};

use snafu::ResultExt;

use crate::{Result, error::IoSnafu};

/// File name of the per-queue cursor index.
pub const INDEX_FILE_NAME: &str = "queue.idx";

const SEGMENT_PREFIX: &str = "segment_";
const SEGMENT_EXTENSION: &str = "log";

/// Generates a segment file name: `segment_NNNNNNNNNN.log`.
pub fn segment_file_name(id: u32) -> String { format!("{SEGMENT_PREFIX}{id:010}.{SEGMENT_EXTENSION}") }

/// Returns full path to a segment file: `dir/segment_NNNNNNNNNN.log`.
pub fn segment_file_path<P: AsRef<Path>>(dir: P, id: u32) -> PathBuf {
    dir.as_ref().join(segment_file_name(id))
}

/// Returns full path to the queue index: `dir/queue.idx`.
pub fn index_file_path<P: AsRef<Path>>(dir: P) -> PathBuf { dir.as_ref().join(INDEX_FILE_NAME) }

/// Extracts the segment id from a segment file path.
pub fn parse_segment_id(path: &Path) -> Option<u32> {
    if path.extension().and_then(|s| s.to_str()) != Some(SEGMENT_EXTENSION) {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(SEGMENT_PREFIX)?
        .parse()
        .ok()
}

/// Lists the ids of all segment files in `dir`, ascending.
pub fn scan_segment_ids<P: AsRef<Path>>(dir: P) -> Result<Vec<u32>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir).context(IoSnafu { path: dir })? {
        let entry = entry.context(IoSnafu { path: dir })?;
        if let Some(id) = parse_segment_id(&entry.path()) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}
