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

//! On-disk record framing.
//!
//! A segment file is a contiguous sequence of records starting at offset 0:
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────┐
//! │  Next offset (4B)        │   Payload (variable) │
//! │  big-endian, absolute    │   raw bytes          │
//! └──────────────────────────┴──────────────────────┘
//! ```
//!
//! The header holds the absolute file offset where the *following* record
//! begins, not a length. The payload length of the record at `at` is therefore
//! `next - at - 4`. A replicated `APPEND` carries exactly these bytes, so a
//! follower that appends them in order ends up with an identical file.

/// Size of the next-offset header in bytes.
pub const RECORD_HEADER_SIZE: usize = 4;

/// Offset of the record following a payload of `payload_len` bytes written at
/// `at`, or `None` if it does not fit a 32-bit offset.
#[inline]
pub(crate) fn next_offset(at: u32, payload_len: usize) -> Option<u32> {
    let len = u32::try_from(payload_len).ok()?;
    at.checked_add(RECORD_HEADER_SIZE as u32)?.checked_add(len)
}

/// Payload length of a record at `at` whose header reads `next`, or `None` if
/// the header points backwards.
#[inline]
pub(crate) fn payload_len(at: u32, next: u32) -> Option<u32> {
    next.checked_sub(at.checked_add(RECORD_HEADER_SIZE as u32)?)
}

/// Frame `payload` for writing at offset `at`.
pub(crate) fn encode(at: u32, next: u32, payload: &[u8]) -> Vec<u8> {
    debug_assert_eq!(next_offset(at, payload.len()), Some(next));
    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&next.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(0, 3, Some(7) ; "first record")]
    #[test_case(1_047_552, 1020, Some(1_048_576) ; "fills a default segment")]
    #[test_case(u32::MAX - 4, 1, None ; "overflows offset")]
    fn test_next_offset(at: u32, len: usize, expected: Option<u32>) {
        assert_eq!(next_offset(at, len), expected);
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(payload_len(0, 7), Some(3));
        assert_eq!(payload_len(7, 11), Some(0));
        assert_eq!(payload_len(7, 10), None);
    }

    #[test]
    fn test_encode_writes_absolute_next_offset() {
        let buf = encode(7, 14, b"def");
        assert_eq!(&buf[..4], &14u32.to_be_bytes());
        assert_eq!(&buf[4..], b"def");
    }
}
