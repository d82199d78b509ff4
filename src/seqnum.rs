// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;

/// Number of bits in a DCCP sequence number.
/// See RFC 4340 Section 7.1
pub const SEQ_BITS: u32 = 48;

/// Sequence numbers are taken modulo 2^48.
pub const SEQ_MODULUS: u64 = 1 << SEQ_BITS;

const SEQ_MASK: u64 = SEQ_MODULUS - 1;

/// Half of the sequence space, used by the circular comparison.
const SEQ_HALF: u64 = SEQ_MODULUS >> 1;

/// A 48-bit wrapping sequence number.
///
/// Comparison is circular: `a` is before `b` if `b` can be reached from `a`
/// by moving forward less than half of the sequence space. Because that
/// relation is not transitive over the whole space, `SeqNum` deliberately
/// does not implement `Ord`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNum(u64);

impl SeqNum {
    /// Build a sequence number, discarding bits above bit 47.
    pub const fn new(v: u64) -> Self {
        SeqNum(v & SEQ_MASK)
    }

    /// Return the raw 48-bit value.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Move forward by `n`, wrapping at 2^48.
    pub const fn add(self, n: u64) -> Self {
        SeqNum(self.0.wrapping_add(n) & SEQ_MASK)
    }

    /// Move backward by `n`, wrapping at 2^48.
    pub const fn sub(self, n: u64) -> Self {
        SeqNum(self.0.wrapping_sub(n) & SEQ_MASK)
    }

    /// Return the next sequence number.
    pub const fn next(self) -> Self {
        self.add(1)
    }

    /// Return the forward distance from `from` to `self`, i.e. the `n` for
    /// which `from.add(n) == self`.
    pub const fn distance_from(self, from: SeqNum) -> u64 {
        self.0.wrapping_sub(from.0) & SEQ_MASK
    }

    /// Return the signed circular difference `self - other`.
    pub fn delta(self, other: SeqNum) -> i64 {
        let d = self.distance_from(other);
        if d >= SEQ_HALF {
            d as i64 - SEQ_MODULUS as i64
        } else {
            d as i64
        }
    }

    /// Whether `self` is strictly before `other`.
    pub fn before(self, other: SeqNum) -> bool {
        self.delta(other) < 0
    }

    /// Whether `self` is strictly after `other`.
    pub fn after(self, other: SeqNum) -> bool {
        self.delta(other) > 0
    }

    /// Return the later of the two sequence numbers.
    pub fn max(self, other: SeqNum) -> SeqNum {
        if other.after(self) {
            other
        } else {
            self
        }
    }
}

impl From<u64> for SeqNum {
    fn from(v: u64) -> Self {
        SeqNum::new(v)
    }
}

impl fmt::Debug for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seqnum_mask() {
        assert_eq!(SeqNum::new(SEQ_MODULUS).value(), 0);
        assert_eq!(SeqNum::new(SEQ_MODULUS + 5).value(), 5);
        assert_eq!(SeqNum::new(u64::MAX).value(), SEQ_MODULUS - 1);
    }

    #[test]
    fn seqnum_wrap() {
        let top = SeqNum::new(SEQ_MODULUS - 1);
        assert_eq!(top.next(), SeqNum::new(0));
        assert_eq!(top.add(3), SeqNum::new(2));
        assert_eq!(SeqNum::new(1).sub(3), SeqNum::new(SEQ_MODULUS - 2));
        assert_eq!(SeqNum::new(2).distance_from(top), 3);
        assert_eq!(top.distance_from(SeqNum::new(2)), SEQ_MODULUS - 3);
    }

    #[test]
    fn seqnum_compare_across_wrap() {
        let top = SeqNum::new(SEQ_MODULUS - 2);
        let low = SeqNum::new(1);
        assert!(top.before(low));
        assert!(low.after(top));
        assert_eq!(low.delta(top), 3);
        assert_eq!(top.delta(low), -3);
        assert_eq!(top.max(low), low);
        assert_eq!(low.max(top), low);

        let a = SeqNum::new(100);
        assert!(!a.before(a));
        assert!(!a.after(a));
        assert_eq!(a.delta(a), 0);
    }

    #[test]
    fn seqnum_half_space() {
        let a = SeqNum::new(0);
        let b = SeqNum::new(SEQ_HALF - 1);
        assert!(a.before(b));

        // Exactly half way around is treated as behind.
        let c = SeqNum::new(SEQ_HALF);
        assert!(c.before(a));
    }
}
