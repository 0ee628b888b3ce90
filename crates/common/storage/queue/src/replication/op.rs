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

//! Replication wire records.
//!
//! ```text
//! ┌─────────┬──────────────────────────────────────────────┐
//! │ Tag(1B) │ Body                                         │
//! ├─────────┼──────────────────────────────────────────────┤
//! │ 1 NEW   │ segment id (u32)                             │
//! │ 2 APPEND│ raw record: next offset (u32) + payload      │
//! │ 3 IDX   │ read offset, write offset, length (3 × u32)  │
//! │ 4 CHG_R │ read segment id (u32)                        │
//! │ 5 CHG_W │ write segment id (u32)                       │
//! │ 6 HB    │ empty                                        │
//! └─────────┴──────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use snafu::ensure;

use crate::error::{EmptyRecordSnafu, ReplicationError, TruncatedSnafu, UnknownTagSnafu};

/// Version of the operation set below. Bumped whenever a tag is added or a
/// body changes shape.
pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    New                = 1,
    Append             = 2,
    IdxSync            = 3,
    ChangeReadSegment  = 4,
    ChangeWriteSegment = 5,
    Heartbeat          = 6,
}

impl TryFrom<u8> for OpCode {
    type Error = ReplicationError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            1 => Self::New,
            2 => Self::Append,
            3 => Self::IdxSync,
            4 => Self::ChangeReadSegment,
            5 => Self::ChangeWriteSegment,
            6 => Self::Heartbeat,
            tag => return UnknownTagSnafu { tag }.fail(),
        })
    }
}

impl OpCode {
    pub const fn name(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Append => "APPEND",
            Self::IdxSync => "IDX_SYNC",
            Self::ChangeReadSegment => "CHANGE_READ_SEGMENT",
            Self::ChangeWriteSegment => "CHANGE_WRITE_SEGMENT",
            Self::Heartbeat => "HEARTBEAT",
        }
    }
}

/// One state-transfer step from a master queue to a follower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Start (or restart) segment `id` from empty.
    New(u32),
    /// Raw record bytes, header included.
    Append(Bytes),
    IdxSync {
        read_offset:  u32,
        write_offset: u32,
        length:       u32,
    },
    ChangeReadSegment(u32),
    ChangeWriteSegment(u32),
    Heartbeat,
}

impl Operation {
    pub const fn op_code(&self) -> OpCode {
        match self {
            Self::New(_) => OpCode::New,
            Self::Append(_) => OpCode::Append,
            Self::IdxSync { .. } => OpCode::IdxSync,
            Self::ChangeReadSegment(_) => OpCode::ChangeReadSegment,
            Self::ChangeWriteSegment(_) => OpCode::ChangeWriteSegment,
            Self::Heartbeat => OpCode::Heartbeat,
        }
    }

    pub const fn name(&self) -> &'static str { self.op_code().name() }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.op_code() as u8);
        match self {
            Self::New(id) | Self::ChangeReadSegment(id) | Self::ChangeWriteSegment(id) => {
                buf.put_u32(*id);
            }
            Self::Append(raw) => buf.put_slice(raw),
            Self::IdxSync {
                read_offset,
                write_offset,
                length,
            } => {
                buf.put_u32(*read_offset);
                buf.put_u32(*write_offset);
                buf.put_u32(*length);
            }
            Self::Heartbeat => {}
        }
        buf.freeze()
    }

    fn encoded_len(&self) -> usize {
        1 + match self {
            Self::New(_) | Self::ChangeReadSegment(_) | Self::ChangeWriteSegment(_) => 4,
            Self::Append(raw) => raw.len(),
            Self::IdxSync { .. } => 12,
            Self::Heartbeat => 0,
        }
    }

    /// Decode one record. Bodies must have exactly the expected length, except
    /// `APPEND` which needs at least a record header.
    pub fn decode(mut record: Bytes) -> Result<Self, ReplicationError> {
        ensure!(record.has_remaining(), EmptyRecordSnafu);
        let op = OpCode::try_from(record.get_u8())?;
        let len = record.len();
        let expected = match op {
            OpCode::New | OpCode::ChangeReadSegment | OpCode::ChangeWriteSegment => len == 4,
            OpCode::Append => len >= 4,
            OpCode::IdxSync => len == 12,
            OpCode::Heartbeat => len == 0,
        };
        ensure!(expected, TruncatedSnafu { op: op.name(), len });

        Ok(match op {
            OpCode::New => Self::New(record.get_u32()),
            OpCode::Append => Self::Append(record),
            OpCode::IdxSync => Self::IdxSync {
                read_offset:  record.get_u32(),
                write_offset: record.get_u32(),
                length:       record.get_u32(),
            },
            OpCode::ChangeReadSegment => Self::ChangeReadSegment(record.get_u32()),
            OpCode::ChangeWriteSegment => Self::ChangeWriteSegment(record.get_u32()),
            OpCode::Heartbeat => Self::Heartbeat,
        })
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_wire_layout() {
        assert_eq!(Operation::New(7).encode().as_ref(), [1, 0, 0, 0, 7]);
        assert_eq!(
            Operation::IdxSync {
                read_offset:  1,
                write_offset: 2,
                length:       3,
            }
            .encode()
            .as_ref(),
            [3, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]
        );
        assert_eq!(Operation::Heartbeat.encode().as_ref(), [6]);
        assert_eq!(
            Operation::Append(Bytes::from_static(&[0, 0, 0, 5, b'x'])).encode().as_ref(),
            [2, 0, 0, 0, 5, b'x']
        );
    }

    #[test]
    fn test_decode_each_tag() {
        let ops = [
            Operation::New(1),
            Operation::Append(Bytes::from_static(&[0, 0, 0, 7, b'a', b'b', b'c'])),
            Operation::IdxSync {
                read_offset:  7,
                write_offset: 14,
                length:       1,
            },
            Operation::ChangeReadSegment(2),
            Operation::ChangeWriteSegment(3),
            Operation::Heartbeat,
        ];
        for op in ops {
            assert_eq!(Operation::decode(op.encode()).unwrap(), op);
        }
    }

    #[test]
    fn test_unknown_tag() {
        let err = Operation::decode(Bytes::from_static(&[42, 0, 0])).unwrap_err();
        assert!(matches!(err, ReplicationError::UnknownTag { tag: 42 }));
        assert!(err.is_skippable());
    }

    #[test_case(&[] ; "empty record")]
    #[test_case(&[1, 0, 0] ; "short new")]
    #[test_case(&[2, 0, 0] ; "append without header")]
    #[test_case(&[3, 0, 0, 0, 1] ; "short idx sync")]
    #[test_case(&[6, 0] ; "heartbeat with body")]
    fn test_malformed_records_are_skippable(record: &'static [u8]) {
        let err = Operation::decode(Bytes::from_static(record)).unwrap_err();
        assert!(err.is_skippable(), "{err}");
    }
}
