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

use serde::{Deserialize, Serialize};

/// The five persisted cursors of a queue index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub read_segment:  u32,
    pub read_offset:   u32,
    pub write_segment: u32,
    pub write_offset:  u32,
    pub length:        u32,
}

impl Default for IndexStats {
    fn default() -> Self {
        Self {
            read_segment:  1,
            read_offset:   0,
            write_segment: 1,
            write_offset:  0,
            length:        0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub id:        u32,
    pub write_pos: u32,
    pub read_pos:  u32,
    pub sealed:    bool,
}

/// Point-in-time view of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub name:     String,
    pub index:    IndexStats,
    /// Resident segments, ascending by id.
    pub segments: Vec<SegmentStats>,
    /// On-disk segments fully consumed and eligible for removal.
    pub drained:  Vec<u32>,
}
