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

use std::sync::LazyLock;

use prometheus::{
    IntCounter, IntCounterVec, IntGaugeVec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec,
};

pub const QUEUE_LABEL: &str = "queue";
pub const OP_LABEL: &str = "op";

pub static QUEUE_PUSHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "queue_pushed_total",
        "Total number of payloads pushed",
        &[QUEUE_LABEL]
    )
    .unwrap()
});

pub static QUEUE_POPPED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "queue_popped_total",
        "Total number of payloads popped",
        &[QUEUE_LABEL]
    )
    .unwrap()
});

pub static QUEUE_ROTATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "queue_segment_rotations_total",
        "Total number of write segment rotations",
        &[QUEUE_LABEL]
    )
    .unwrap()
});

pub static QUEUE_LENGTH: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "queue_length",
        "Number of payloads pending in the queue",
        &[QUEUE_LABEL]
    )
    .unwrap()
});

pub static REPLICATION_SENT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "replication_operations_sent_total",
        "Total number of replication operations published",
        &[QUEUE_LABEL, OP_LABEL]
    )
    .unwrap()
});

pub static REPLICATION_APPLIED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "replication_operations_applied_total",
        "Total number of replication operations applied by followers",
        &[OP_LABEL]
    )
    .unwrap()
});

pub static REPLICATION_SKIPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "replication_records_skipped_total",
        "Total number of unrecognised replication records skipped"
    )
    .unwrap()
});
