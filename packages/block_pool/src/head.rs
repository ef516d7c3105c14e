//! Packed representation of the lock-free free-list head.
//!
//! The head of the lock-free free list is a single `AtomicU64` holding three fields:
//!
//! ```text
//!  63                    2*B   2*B-1           B   B-1             0
//! ┌───────────────────────────┬─────────────────┬─────────────────┐
//! │            tag            │      next       │      index      │
//! └───────────────────────────┴─────────────────┴─────────────────┘
//! ```
//!
//! * `index` is the block at the front of the free list (the sentinel if the list is empty).
//! * `next` is the successor of `index` at the time it became the front of the list.
//! * `tag` is incremented on every successful update of the head.
//!
//! `B` is the smallest width that can represent the sentinel. Comparing the whole word in a CAS
//! detects not only a changed front block but also a changed link behind it and, via the tag,
//! any sequence of pops and pushes that restored both.

/// A lock-free head word must keep at least this many bits for the generation tag.
pub(crate) const MIN_TAG_BITS: u32 = 16;

/// The widest `index` and `next` fields that still leave [`MIN_TAG_BITS`] for the tag.
#[allow(clippy::integer_division, reason = "64 - 16 is even, no remainder is lost")]
pub(crate) const MAX_INDEX_BITS: u32 = (u64::BITS - MIN_TAG_BITS) / 2;

/// Decoded value of the head word.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Head {
    pub(crate) index: usize,
    pub(crate) next: usize,
    pub(crate) tag: u64,
}

/// Encodes and decodes head words for a pool with a specific sentinel value.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HeadCodec {
    index_bits: u32,
    index_mask: u64,
    tag_mask: u64,
}

impl HeadCodec {
    /// # Panics
    ///
    /// Panics if `sentinel` needs more than [`MAX_INDEX_BITS`] bits.
    #[must_use]
    pub(crate) fn new(sentinel: usize) -> Self {
        let index_bits = usize::BITS.saturating_sub(sentinel.leading_zeros()).max(1);

        assert!(
            index_bits <= MAX_INDEX_BITS,
            "lock-free block pool supports at most {} blocks, requested {sentinel}",
            (1_u64 << MAX_INDEX_BITS).saturating_sub(1)
        );

        let index_mask = (1_u64 << index_bits).wrapping_sub(1);
        let tag_mask = u64::MAX >> index_bits.wrapping_mul(2);

        Self {
            index_bits,
            index_mask,
            tag_mask,
        }
    }

    /// Number of bits available to the generation tag.
    #[must_use]
    pub(crate) fn tag_bits(&self) -> u32 {
        self.tag_mask.count_ones()
    }

    /// Encodes the head. The tag is truncated to the available tag bits, so incrementing the
    /// tag with wrapping arithmetic before encoding is always valid.
    #[must_use]
    pub(crate) fn encode(&self, head: Head) -> u64 {
        let index = u64::try_from(head.index).expect("usize is never wider than u64");
        let next = u64::try_from(head.next).expect("usize is never wider than u64");

        debug_assert!(index <= self.index_mask, "index {index} does not fit in head word");
        debug_assert!(next <= self.index_mask, "next {next} does not fit in head word");

        (index & self.index_mask)
            | ((next & self.index_mask) << self.index_bits)
            | ((head.tag & self.tag_mask) << self.index_bits.wrapping_mul(2))
    }

    #[must_use]
    pub(crate) fn decode(&self, word: u64) -> Head {
        let index = word & self.index_mask;
        let next = (word >> self.index_bits) & self.index_mask;
        let tag = (word >> self.index_bits.wrapping_mul(2)) & self.tag_mask;

        Head {
            index: usize::try_from(index).expect("index is at most MAX_INDEX_BITS wide"),
            next: usize::try_from(next).expect("next is at most MAX_INDEX_BITS wide"),
            tag,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn field_widths_follow_sentinel() {
        // Sentinel 16 needs 5 bits, leaving 64 - 10 bits for the tag.
        let codec = HeadCodec::new(16);
        assert_eq!(codec.index_bits, 5);
        assert_eq!(codec.tag_bits(), 54);

        let codec = HeadCodec::new(15);
        assert_eq!(codec.index_bits, 4);
        assert_eq!(codec.tag_bits(), 56);
    }

    #[test]
    fn zero_sentinel_still_has_one_index_bit() {
        let codec = HeadCodec::new(0);

        assert_eq!(codec.index_bits, 1);
        assert_eq!(
            codec.decode(codec.encode(Head {
                index: 0,
                next: 0,
                tag: 0
            })),
            Head {
                index: 0,
                next: 0,
                tag: 0
            }
        );
    }

    #[test]
    fn largest_supported_sentinel() {
        let sentinel = (1_usize << MAX_INDEX_BITS) - 1;
        let codec = HeadCodec::new(sentinel);

        assert_eq!(codec.tag_bits(), MIN_TAG_BITS);

        let head = Head {
            index: sentinel,
            next: sentinel - 1,
            tag: 0xFFFF,
        };
        assert_eq!(codec.decode(codec.encode(head)), head);
    }

    #[test]
    #[should_panic]
    fn sentinel_too_large_panics() {
        let _codec = HeadCodec::new(1_usize << MAX_INDEX_BITS);
    }

    #[test]
    fn fields_do_not_bleed_into_each_other() {
        let codec = HeadCodec::new(16);

        let head = Head {
            index: 16,
            next: 3,
            tag: 12345,
        };
        let word = codec.encode(head);

        assert_eq!(word & 0b1_1111, 16);
        assert_eq!((word >> 5) & 0b1_1111, 3);
        assert_eq!(word >> 10, 12345);
        assert_eq!(codec.decode(word), head);
    }

    #[test]
    fn tag_wraps_within_tag_bits() {
        let codec = HeadCodec::new((1_usize << MAX_INDEX_BITS) - 1);

        let head = Head {
            index: 7,
            next: 8,
            tag: u64::from(u16::MAX),
        };
        let wrapped = Head {
            tag: head.tag.wrapping_add(1),
            ..head
        };

        assert_eq!(codec.decode(codec.encode(wrapped)).tag, 0);
        assert_eq!(codec.decode(codec.encode(wrapped)).index, 7);
        assert_eq!(codec.decode(codec.encode(wrapped)).next, 8);
    }

    #[test]
    fn same_pair_with_different_tag_is_different_word() {
        let codec = HeadCodec::new(16);

        let before = Head {
            index: 2,
            next: 5,
            tag: 10,
        };
        let after = Head { tag: 14, ..before };

        assert_ne!(codec.encode(before), codec.encode(after));
    }
}
