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

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rqueue_storage::QueueStats;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{Result, StatusSnafu};

/// Point-in-time view of every open queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub queues:       BTreeMap<String, QueueStats>,
}

impl StatusReport {
    pub fn new(queues: BTreeMap<String, QueueStats>) -> Self {
        Self {
            generated_at: Utc::now(),
            queues,
        }
    }

    /// Total records waiting across all queues.
    pub fn total_length(&self) -> u64 {
        self.queues
            .values()
            .map(|q| u64::from(q.index.length))
            .sum()
    }

    pub fn to_json(&self) -> Result<String> { serde_json::to_string_pretty(self).context(StatusSnafu) }
}

#[cfg(test)]
mod tests {
    use rqueue_storage::{IndexStats, SegmentStats};

    use super::*;

    fn stats(name: &str, length: u32) -> QueueStats {
        QueueStats {
            name:     name.to_string(),
            index:    IndexStats {
                length,
                ..IndexStats::default()
            },
            segments: vec![SegmentStats {
                id:        1,
                write_pos: 0,
                read_pos:  0,
                sealed:    false,
            }],
            drained:  vec![],
        }
    }

    #[test]
    fn test_json_shape() {
        let report = StatusReport::new(BTreeMap::from([
            ("a".to_string(), stats("a", 2)),
            ("b".to_string(), stats("b", 3)),
        ]));
        assert_eq!(report.total_length(), 5);

        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["generated_at"].is_string());
        assert_eq!(value["queues"]["b"]["index"]["length"], 3);

        let back: StatusReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
