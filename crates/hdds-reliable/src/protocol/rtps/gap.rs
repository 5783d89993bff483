// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! GAP submessage (RTPS 2.3 Section 8.3.7.4)
//!
//! Sent by a writer to declare sequence numbers that will never be sent:
//! the contiguous range `[gapStart, gapList.base)` plus every bit set in
//! `gapList`.
//!
//! ```text
//! +---------------+---------------+-------------------------------+
//! |     GAP       |X|X|X|X|X|X|X|E|      octetsToNextHeader       |
//! +---------------+---------------+-------------------------------+
//! |                         readerId                              |
//! +---------------------------------------------------------------+
//! |                         writerId                              |
//! +---------------------------------------------------------------+
//! |                    gapStart (SequenceNumber)                  |
//! +---------------------------------------------------------------+
//! |                  gapList (SequenceNumberSet)                  |
//! +---------------------------------------------------------------+
//! ```

use super::{begin_submessage, finish_submessage, put_seq, SequenceNumberSet, WireReader};
use crate::core::{EntityId, SequenceNumber};
use crate::protocol::{DecodeError, DecodeResult, EncodeResult, SUBMSG_GAP};

/// GAP submessage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub gap_start: SequenceNumber,
    pub gap_list: SequenceNumberSet,
}

impl Gap {
    /// GAP covering `[start, end)`.
    pub fn range(
        reader_id: EntityId,
        writer_id: EntityId,
        start: SequenceNumber,
        end: SequenceNumber,
    ) -> Self {
        Self {
            reader_id,
            writer_id,
            gap_start: start,
            gap_list: SequenceNumberSet::empty(end.max(start)),
        }
    }

    /// Minimal list of GAPs covering `sequences` (ascending, deduplicated).
    pub fn covering(
        reader_id: EntityId,
        writer_id: EntityId,
        sequences: &[SequenceNumber],
    ) -> Vec<Gap> {
        let mut gaps = Vec::new();
        let mut idx = 0;
        while idx < sequences.len() {
            let start = sequences[idx];
            let mut end = start + 1;
            idx += 1;
            while idx < sequences.len() && sequences[idx] == end {
                end += 1;
                idx += 1;
            }
            let mut list = SequenceNumberSet::empty(end);
            while idx < sequences.len() && list.insert(sequences[idx]) {
                idx += 1;
            }
            gaps.push(Gap {
                reader_id,
                writer_id,
                gap_start: start,
                gap_list: list,
            });
        }
        gaps
    }

    /// Every sequence number declared irrelevant, ascending.
    pub fn irrelevant(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        (self.gap_start..self.gap_list.base()).chain(self.gap_list.iter())
    }

    /// Encode with submessage header.
    pub fn encode(&self) -> EncodeResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(4 + 16 + self.gap_list.wire_len());
        let start = begin_submessage(&mut buf, SUBMSG_GAP, 0);
        buf.extend_from_slice(&self.reader_id);
        buf.extend_from_slice(&self.writer_id);
        put_seq(&mut buf, self.gap_start);
        self.gap_list.encode_into(&mut buf);
        finish_submessage(&mut buf, start)?;
        Ok(buf)
    }

    /// Decode from submessage flags and body.
    pub fn decode(flags: u8, body: &[u8]) -> DecodeResult<Self> {
        let mut r = WireReader::new(body, flags);
        let reader_id = r.entity_id()?;
        let writer_id = r.entity_id()?;
        let gap_start = r.seq()?;
        let gap_list = SequenceNumberSet::decode(&mut r)?;
        if gap_start == 0 {
            return Err(DecodeError::InvalidField("GAP gapStart must be >= 1"));
        }
        Ok(Self {
            reader_id,
            writer_id,
            gap_start,
            gap_list,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::rtps::Submessage;

    #[test]
    fn test_gap_range_irrelevant() {
        let gap = Gap::range([0; 4], [0, 0, 1, 2], 5, 8);
        assert_eq!(gap.irrelevant().collect::<Vec<_>>(), vec![5, 6, 7]);

        let buf = gap.encode().expect("encode");
        let (decoded, used) = Submessage::decode(&buf).expect("decode");
        assert_eq!(used, buf.len());
        assert_eq!(decoded, Submessage::Gap(gap));
    }

    #[test]
    fn test_gap_covering_splits_runs() {
        let gaps = Gap::covering([0; 4], [0; 4], &[3, 4, 5, 9, 11]);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].gap_start, 3);
        assert_eq!(gaps[0].gap_list.base(), 6);
        assert_eq!(gaps[0].irrelevant().collect::<Vec<_>>(), vec![3, 4, 5, 9, 11]);

        let far = Gap::covering([0; 4], [0; 4], &[1, 1000]);
        assert_eq!(far.len(), 2);
        assert_eq!(far[1].irrelevant().collect::<Vec<_>>(), vec![1000]);
    }
}
