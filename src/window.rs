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

use log::*;

use crate::error::Error;
use crate::seqnum::SeqNum;
use crate::Result;

/// The tracker grows once fewer than this many free entries remain.
pub const GROWTH_MARGIN: u64 = 32;

/// Smallest capacity of the tracker, in entries.
const MIN_CAPACITY: u64 = 64;

const WORD_BITS: u64 = u64::BITS as u64;

/// State of a sent segment as seen by the tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentState {
    /// The segment was sent and has not been acknowledged yet.
    Outstanding,

    /// The segment was acknowledged, or given up on.
    Acknowledged,
}

/// A growable circular bitmap of the sent segments that are still
/// unacknowledged.
///
/// The tracked range is `[head, tail)`. Bit `i` of the ring stands for every
/// sequence number congruent to `i` modulo the capacity; bits outside the
/// tracked range are always zero.
#[derive(Debug)]
pub struct SegmentTracker {
    /// Bitmap words.
    words: Vec<u64>,

    /// Capacity in entries, always a power of two.
    capacity: u64,

    /// The oldest tracked sequence number.
    head: SeqNum,

    /// One past the newest tracked sequence number.
    tail: SeqNum,

    /// Number of set bits.
    population: u64,

    /// Number of rejected sequence numbers.
    anomalies: u64,

    /// Number of failed attempts to grow the ring.
    alloc_failures: u64,
}

impl SegmentTracker {
    /// Create a tracker holding at least `capacity` entries.
    pub fn new(capacity: u64) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        Self {
            words: vec![0; (capacity / WORD_BITS) as usize],
            capacity,
            head: SeqNum::default(),
            tail: SeqNum::default(),
            population: 0,
            anomalies: 0,
            alloc_failures: 0,
        }
    }

    /// Return the capacity in entries.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Return the oldest tracked sequence number.
    pub fn head(&self) -> SeqNum {
        self.head
    }

    /// Return one past the newest tracked sequence number.
    pub fn tail(&self) -> SeqNum {
        self.tail
    }

    /// Return the width of the tracked range.
    pub fn len(&self) -> u64 {
        self.tail.distance_from(self.head)
    }

    /// Whether the tracked range is empty.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Return the number of outstanding segments.
    pub fn population(&self) -> u64 {
        self.population
    }

    /// Return the number of sequence numbers rejected as anomalous.
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Return the number of failed growth attempts.
    pub fn alloc_failures(&self) -> u64 {
        self.alloc_failures
    }

    /// Mark `seq` as outstanding.
    pub fn insert(&mut self, seq: SeqNum) -> Result<()> {
        if self.is_empty() {
            self.head = seq;
            self.tail = seq;
        }

        if seq.before(self.head) {
            self.anomalies += 1;
            return Err(Error::ProtocolAnomaly(format!(
                "seq {} behind tracker head {}",
                seq, self.head
            )));
        }

        let gap = seq.distance_from(self.head);
        if gap >= self.capacity {
            self.anomalies += 1;
            warn!(
                "segment tracker gap {} exceeds capacity {}, seq {} ignored",
                gap, self.capacity, seq
            );
            return Err(Error::ProtocolAnomaly(format!(
                "gap {} exceeds capacity {}",
                gap, self.capacity
            )));
        }

        if self.set(seq) {
            self.population += 1;
        }
        if gap >= self.len() {
            self.tail = seq.next();
        }

        if self.capacity - self.len() < GROWTH_MARGIN {
            if let Err(e) = self.grow() {
                // The ring keeps working at its old size.
                self.alloc_failures += 1;
                warn!("segment tracker failed to grow: {:?}", e);
            }
        }

        Ok(())
    }

    /// Mark `seq` as acknowledged. Return whether it was outstanding.
    pub fn clear(&mut self, seq: SeqNum) -> bool {
        if !self.contains(seq) {
            return false;
        }

        let (w, mask) = self.index(seq);
        if self.words[w] & mask == 0 {
            return false;
        }

        self.words[w] &= !mask;
        self.population -= 1;
        true
    }

    /// Move the head of the tracked range forward to `seq`.
    ///
    /// Return true if any of the skipped entries was still outstanding; such
    /// segments were never acknowledged and are presumed lost.
    pub fn truncate_before(&mut self, seq: SeqNum) -> bool {
        if !seq.after(self.head) {
            return false;
        }

        let end = if seq.after(self.tail) { self.tail } else { seq };
        let mut skipped = false;
        let mut cur = self.head;
        while cur != end {
            let (w, mask) = self.index(cur);
            if self.words[w] & mask != 0 {
                self.words[w] &= !mask;
                self.population -= 1;
                skipped = true;
            }
            cur = cur.next();
        }

        self.head = seq;
        if seq.after(self.tail) {
            self.tail = seq;
        }

        skipped
    }

    /// Return the state of `seq`.
    ///
    /// Sequence numbers beyond the tracked range are reported as outstanding:
    /// without information the sender must assume the segment is in flight.
    /// Sequence numbers truncated away are no longer outstanding.
    pub fn state_of(&self, seq: SeqNum) -> SegmentState {
        if seq.before(self.head) {
            return SegmentState::Acknowledged;
        }

        if !self.contains(seq) {
            return SegmentState::Outstanding;
        }

        let (w, mask) = self.index(seq);
        if self.words[w] & mask != 0 {
            SegmentState::Outstanding
        } else {
            SegmentState::Acknowledged
        }
    }

    /// Whether `seq` was tracked and is still unacknowledged.
    pub fn is_outstanding(&self, seq: SeqNum) -> bool {
        if !self.contains(seq) {
            return false;
        }
        let (w, mask) = self.index(seq);
        self.words[w] & mask != 0
    }

    /// Forget every tracked segment. The range restarts at the current tail.
    pub fn reset(&mut self) {
        self.truncate_before(self.tail);
        self.head = self.tail;
        debug_assert_eq!(self.population, 0);
    }

    /// Whether `seq` lies in `[head, tail)`.
    fn contains(&self, seq: SeqNum) -> bool {
        seq.distance_from(self.head) < self.len()
    }

    /// Set the bit of `seq`. Return true if it was not set before.
    fn set(&mut self, seq: SeqNum) -> bool {
        let (w, mask) = self.index(seq);
        let fresh = self.words[w] & mask == 0;
        self.words[w] |= mask;
        fresh
    }

    fn index(&self, seq: SeqNum) -> (usize, u64) {
        let i = seq.value() & (self.capacity - 1);
        ((i / WORD_BITS) as usize, 1_u64 << (i % WORD_BITS))
    }

    /// Double the capacity, keeping every tracked bit.
    fn grow(&mut self) -> Result<()> {
        let capacity = self.capacity * 2;
        let nwords = (capacity / WORD_BITS) as usize;

        let mut words: Vec<u64> = Vec::new();
        words
            .try_reserve_exact(nwords)
            .map_err(|_| Error::ResourceExhaustion)?;
        words.resize(nwords, 0);

        let mut cur = self.head;
        while cur != self.tail {
            let (w, mask) = self.index(cur);
            if self.words[w] & mask != 0 {
                let i = cur.value() & (capacity - 1);
                words[(i / WORD_BITS) as usize] |= 1_u64 << (i % WORD_BITS);
            }
            cur = cur.next();
        }

        trace!(
            "segment tracker grows {} -> {}, range [{}, {})",
            self.capacity,
            capacity,
            self.head,
            self.tail
        );
        self.words = words;
        self.capacity = capacity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seqnum::SEQ_MODULUS;

    fn seq(n: u64) -> SeqNum {
        SeqNum::new(n)
    }

    #[test]
    fn tracker_default() {
        let t = SegmentTracker::new(0);
        assert_eq!(t.capacity(), MIN_CAPACITY);
        assert!(t.is_empty());
        assert_eq!(t.population(), 0);
        assert_eq!(t.state_of(seq(0)), SegmentState::Outstanding);

        let t = SegmentTracker::new(100);
        assert_eq!(t.capacity(), 128);
    }

    #[test]
    fn tracker_insert_clear() {
        let mut t = SegmentTracker::new(128);
        assert!(t.insert(seq(10)).is_ok());
        assert!(t.insert(seq(11)).is_ok());
        assert!(t.insert(seq(13)).is_ok());
        assert_eq!(t.population(), 3);
        assert_eq!(t.head(), seq(10));
        assert_eq!(t.tail(), seq(14));
        assert_eq!(t.state_of(seq(12)), SegmentState::Acknowledged);
        assert_eq!(t.state_of(seq(13)), SegmentState::Outstanding);

        // Inserting an outstanding segment again changes nothing.
        assert!(t.insert(seq(11)).is_ok());
        assert_eq!(t.population(), 3);

        // Clearing is idempotent.
        assert!(t.clear(seq(11)));
        assert!(!t.clear(seq(11)));
        assert_eq!(t.population(), 2);
        assert_eq!(t.state_of(seq(11)), SegmentState::Acknowledged);

        assert!(t.is_outstanding(seq(13)));
        assert!(!t.is_outstanding(seq(11)));
        // Never sent, unlike state_of this is not outstanding.
        assert!(!t.is_outstanding(seq(20)));

        // Out of range.
        assert!(!t.clear(seq(100)));
        assert!(!t.clear(seq(2)));
        assert_eq!(t.population(), 2);
    }

    #[test]
    fn tracker_reject_anomalies() {
        let mut t = SegmentTracker::new(128);
        assert!(t.insert(seq(1000)).is_ok());

        // Gap wider than the ring.
        assert!(t.insert(seq(1000 + 128)).is_err());
        // Behind the head.
        assert!(t.insert(seq(999)).is_err());

        assert_eq!(t.anomalies(), 2);
        assert_eq!(t.population(), 1);
        assert_eq!(t.tail(), seq(1001));
    }

    #[test]
    fn tracker_truncate() {
        let mut t = SegmentTracker::new(128);
        for i in 0..10 {
            t.insert(seq(i)).unwrap();
        }
        for i in 0..5 {
            t.clear(seq(i));
        }

        // Nothing outstanding is skipped.
        assert!(!t.truncate_before(seq(5)));
        assert_eq!(t.population(), 5);
        assert_eq!(t.head(), seq(5));

        // Moving backward is a no-op.
        assert!(!t.truncate_before(seq(3)));
        assert_eq!(t.head(), seq(5));

        // Entries 5 and 6 are still outstanding.
        assert!(t.truncate_before(seq(7)));
        assert_eq!(t.population(), 3);
        for i in 0..7 {
            assert_eq!(t.state_of(seq(i)), SegmentState::Acknowledged);
        }
        assert_eq!(t.state_of(seq(7)), SegmentState::Outstanding);

        // Beyond the tail empties the tracker.
        assert!(t.truncate_before(seq(20)));
        assert!(t.is_empty());
        assert_eq!(t.population(), 0);
        assert_eq!(t.head(), seq(20));
        assert!(t.insert(seq(20)).is_ok());
        assert_eq!(t.population(), 1);
    }

    #[test]
    fn tracker_grow_once() {
        let mut t = SegmentTracker::new(128);
        for i in 0..200 {
            assert!(t.insert(seq(i)).is_ok());
        }
        assert_eq!(t.capacity(), 256);
        assert_eq!(t.population(), 200);
        for i in 0..200 {
            assert_eq!(t.state_of(seq(i)), SegmentState::Outstanding);
        }
    }

    #[test]
    fn tracker_grow_preserves_holes() {
        let mut t = SegmentTracker::new(64);
        for i in 500..540 {
            t.insert(seq(i)).unwrap();
            if i % 3 == 0 {
                t.clear(seq(i));
            }
        }
        assert_eq!(t.capacity(), 128);
        for i in 500..540 {
            let exp = if i % 3 == 0 {
                SegmentState::Acknowledged
            } else {
                SegmentState::Outstanding
            };
            assert_eq!(t.state_of(seq(i)), exp);
        }
    }

    #[test]
    fn tracker_wrap() {
        let mut t = SegmentTracker::new(64);
        let start = SEQ_MODULUS - 5;
        for i in 0..10 {
            t.insert(seq(start).add(i)).unwrap();
        }
        assert_eq!(t.population(), 10);
        assert_eq!(t.tail(), seq(5));

        assert!(t.clear(seq(SEQ_MODULUS - 1)));
        assert!(t.clear(seq(0)));
        assert_eq!(t.state_of(seq(0)), SegmentState::Acknowledged);

        assert!(t.truncate_before(seq(2)));
        assert_eq!(t.population(), 3);
        assert_eq!(t.state_of(seq(SEQ_MODULUS - 3)), SegmentState::Acknowledged);
        assert_eq!(t.state_of(seq(2)), SegmentState::Outstanding);
    }

    #[test]
    fn tracker_reset() {
        let mut t = SegmentTracker::new(64);
        for i in 0..20 {
            t.insert(seq(i)).unwrap();
        }
        t.reset();
        assert_eq!(t.population(), 0);
        assert!(t.is_empty());
        assert_eq!(t.state_of(seq(3)), SegmentState::Acknowledged);

        t.insert(seq(20)).unwrap();
        assert_eq!(t.population(), 1);
        assert_eq!(t.head(), seq(20));
    }
}
