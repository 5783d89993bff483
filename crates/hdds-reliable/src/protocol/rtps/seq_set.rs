// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SequenceNumberSet (RTPS 2.3 Sec.9.4.2.6)
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                  bitmapBase (SequenceNumber)                  |
//! +---------------------------------------------------------------+
//! |                           numBits                             |
//! +---------------------------------------------------------------+
//! |                bitmap[0] .. bitmap[(numBits+31)/32 - 1]       |
//! +---------------------------------------------------------------+
//! ```
//!
//! Bit `i` (MSB-first within each word) stands for `bitmapBase + i`.

use super::{put_seq, WireReader};
use crate::config::MAX_BITMAP_BITS;
use crate::core::SequenceNumber;
use crate::protocol::{DecodeError, DecodeResult};

const WORD_BITS: u32 = 32;
const BITMAP_WORDS: usize = (MAX_BITMAP_BITS / WORD_BITS) as usize;

/// Base sequence number plus a bitmap of at most 256 following numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumberSet {
    base: SequenceNumber,
    num_bits: u32,
    bitmap: [u32; BITMAP_WORDS],
}

impl SequenceNumberSet {
    /// Maximum number of bitmap bits.
    pub const MAX_BITS: u32 = MAX_BITMAP_BITS;

    /// Empty set at `base`.
    pub fn empty(base: SequenceNumber) -> Self {
        Self {
            base,
            num_bits: 0,
            bitmap: [0; BITMAP_WORDS],
        }
    }

    /// Set containing `sequences`; `None` if any lies outside `[base, base + 256)`.
    pub fn from_sequences(base: SequenceNumber, sequences: &[SequenceNumber]) -> Option<Self> {
        let mut set = Self::empty(base);
        for &seq in sequences {
            if !set.insert(seq) {
                return None;
            }
        }
        Some(set)
    }

    /// Add `seq`; returns `false` when it does not fit the bitmap window.
    pub fn insert(&mut self, seq: SequenceNumber) -> bool {
        let Some(offset) = self.offset_of(seq) else {
            return false;
        };
        let word = (offset / WORD_BITS) as usize;
        let bit = offset % WORD_BITS;
        self.bitmap[word] |= 1 << (31 - bit);
        self.num_bits = self.num_bits.max(offset + 1);
        true
    }

    /// Whether `seq` is in the set.
    pub fn contains(&self, seq: SequenceNumber) -> bool {
        match self.offset_of(seq) {
            Some(offset) if offset < self.num_bits => {
                let word = (offset / WORD_BITS) as usize;
                self.bitmap[word] & (1 << (31 - offset % WORD_BITS)) != 0
            }
            _ => false,
        }
    }

    fn offset_of(&self, seq: SequenceNumber) -> Option<u32> {
        let offset = seq.checked_sub(self.base)?;
        if offset >= u64::from(MAX_BITMAP_BITS) {
            return None;
        }
        Some(offset as u32)
    }

    /// Base sequence number of the set.
    pub fn base(&self) -> SequenceNumber {
        self.base
    }

    /// Number of bitmap bits in use.
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// True when no bit is set.
    pub fn is_empty(&self) -> bool {
        self.bitmap.iter().all(|w| *w == 0)
    }

    /// Iterate over the contained sequence numbers in ascending order.
    pub fn iter(&self) -> SequenceNumberIter {
        SequenceNumberIter {
            base: self.base,
            num_bits: self.num_bits,
            bitmap: self.bitmap,
            index: 0,
        }
    }

    fn word_count(&self) -> usize {
        self.num_bits.div_ceil(WORD_BITS) as usize
    }

    /// Encoded size in bytes.
    pub fn wire_len(&self) -> usize {
        8 + 4 + self.word_count() * 4
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        put_seq(buf, self.base);
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        for word in &self.bitmap[..self.word_count()] {
            buf.extend_from_slice(&word.to_le_bytes());
        }
    }

    pub(crate) fn decode(reader: &mut WireReader<'_>) -> DecodeResult<Self> {
        let base = reader.seq()?;
        let num_bits = reader.u32()?;
        if num_bits > MAX_BITMAP_BITS {
            return Err(DecodeError::InvalidField("SequenceNumberSet numBits > 256"));
        }
        let mut set = Self::empty(base);
        set.num_bits = num_bits;
        for idx in 0..set.word_count() {
            set.bitmap[idx] = reader.u32()?;
        }
        // Bits past numBits carry no meaning
        let tail = num_bits % WORD_BITS;
        if tail != 0 {
            let last = set.word_count() - 1;
            set.bitmap[last] &= u32::MAX << (WORD_BITS - tail);
        }
        Ok(set)
    }
}

/// Iterator over sequences contained in a `SequenceNumberSet`.
#[derive(Clone)]
pub struct SequenceNumberIter {
    base: SequenceNumber,
    num_bits: u32,
    bitmap: [u32; BITMAP_WORDS],
    index: u32,
}

impl Iterator for SequenceNumberIter {
    type Item = SequenceNumber;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.num_bits {
            let offset = self.index;
            let word = (offset / WORD_BITS) as usize;
            let mask = 1u32 << (31 - offset % WORD_BITS);
            self.index += 1;
            if self.bitmap[word] & mask != 0 {
                return Some(self.base + u64::from(offset));
            }
        }
        None
    }
}

impl IntoIterator for &SequenceNumberSet {
    type Item = SequenceNumber;
    type IntoIter = SequenceNumberIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_are_msb_first() {
        let set = SequenceNumberSet::from_sequences(10, &[10, 12]).expect("fits");
        let mut buf = Vec::new();
        set.encode_into(&mut buf);

        // base(8) + numBits(4) + 1 word
        assert_eq!(buf.len(), 16);
        assert_eq!(u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]), 3);
        let word = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        assert_eq!(word, 0xA000_0000);
    }

    #[test]
    fn test_window_limit() {
        let mut set = SequenceNumberSet::empty(1);
        assert!(set.insert(256));
        assert!(!set.insert(257));
        assert!(!set.insert(0));
        assert_eq!(set.num_bits(), 256);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![256]);
    }

    #[test]
    fn test_decode_rejects_oversized_bitmap() {
        let mut buf = Vec::new();
        put_seq(&mut buf, 1);
        buf.extend_from_slice(&257u32.to_le_bytes());
        let mut reader = WireReader::new(&buf, 0x01);
        assert!(SequenceNumberSet::decode(&mut reader).is_err());
    }

    #[test]
    fn test_empty_set_encodes_no_words() {
        let set = SequenceNumberSet::empty(7);
        assert!(set.is_empty());
        assert_eq!(set.wire_len(), 12);
        assert!(!set.contains(7));
    }
}
