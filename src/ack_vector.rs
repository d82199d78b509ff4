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

//! Ack vectors, see RFC 4340 Section 11.4.
//!
//! An ack vector reports, starting at the acknowledgement number and moving
//! backward, which packets were received. Each byte is a run: the top two
//! bits carry the state and the low six bits carry the run length minus one.

use log::*;
use smallvec::SmallVec;

use crate::error::Error;
use crate::seqnum::SeqNum;
use crate::Result;

/// Longest run a single ack vector byte can describe.
pub const MAX_RUN_LENGTH: u64 = 64;

/// Maximum size of the ack vector carried by one option.
pub const MAX_ACK_VECTOR_LEN: usize = 253;

/// The receive buffer grows once fewer than this many free entries remain.
const GROWTH_MARGIN: u64 = 32;

/// Smallest capacity of the receive buffer, in entries.
const MIN_CAPACITY: u64 = 64;

const STATE_MASK: u8 = 0x03;

/// Every entry of a fresh byte is `NotReceived`.
const ALL_NOT_RECEIVED: u8 = 0xff;

/// The state of a packet in an ack vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketState {
    /// The packet was received.
    Received,

    /// The packet was received with an ECN congestion mark.
    ReceivedEcnMarked,

    /// The packet has not been received.
    NotReceived,
}

impl PacketState {
    /// Return the 2-bit wire value.
    pub fn to_bits(self) -> u8 {
        match self {
            PacketState::Received => 0,
            PacketState::ReceivedEcnMarked => 1,
            PacketState::NotReceived => 3,
        }
    }

    /// Parse a 2-bit wire value. State 2 is reserved.
    pub fn from_bits(bits: u8) -> Option<PacketState> {
        match bits & STATE_MASK {
            0 => Some(PacketState::Received),
            1 => Some(PacketState::ReceivedEcnMarked),
            3 => Some(PacketState::NotReceived),
            _ => None,
        }
    }

    /// Whether the packet reached the peer.
    pub fn is_received(self) -> bool {
        self != PacketState::NotReceived
    }
}

/// A run-length encoded ack vector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AckVector {
    runs: SmallVec<[u8; 16]>,
}

impl AckVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an ack vector from the option payload.
    pub fn from_bytes(buf: &[u8]) -> Result<AckVector> {
        if buf.is_empty() || buf.len() > MAX_ACK_VECTOR_LEN {
            return Err(Error::ProtocolAnomaly(format!(
                "ack vector length {}",
                buf.len()
            )));
        }

        if let Some(b) = buf.iter().find(|b| PacketState::from_bits(*b >> 6).is_none()) {
            return Err(Error::ProtocolAnomaly(format!(
                "reserved ack vector state in run {:#04x}",
                b
            )));
        }

        Ok(AckVector {
            runs: SmallVec::from_slice(buf),
        })
    }

    /// Return the encoded runs.
    pub fn as_bytes(&self) -> &[u8] {
        &self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Return the number of packets described by the vector.
    pub fn packets(&self) -> u64 {
        self.runs.iter().map(|b| (b & 0x3f) as u64 + 1).sum()
    }

    /// Append `count` packets in `state`, extending the last run when
    /// possible. Return the number of packets actually appended, which is
    /// less than `count` once the vector is full.
    pub fn push(&mut self, state: PacketState, mut count: u64) -> u64 {
        let requested = count;
        let bits = state.to_bits() << 6;

        if let Some(last) = self.runs.last_mut() {
            if *last & !0x3f == bits {
                let len = (*last & 0x3f) as u64 + 1;
                let n = std::cmp::min(MAX_RUN_LENGTH - len, count);
                *last += n as u8;
                count -= n;
            }
        }

        while count > 0 && self.runs.len() < MAX_ACK_VECTOR_LEN {
            let n = std::cmp::min(MAX_RUN_LENGTH, count);
            self.runs.push(bits | (n - 1) as u8);
            count -= n;
        }

        requested - count
    }

    /// Iterate over the described packets, from `ack` backward.
    pub fn iter(&self, ack: SeqNum) -> AckVectorIter<'_> {
        AckVectorIter {
            runs: &self.runs,
            run: 0,
            left: 0,
            state: PacketState::NotReceived,
            seq: ack,
        }
    }
}

/// Iterator over the packets of an ack vector, newest first.
pub struct AckVectorIter<'a> {
    runs: &'a [u8],
    run: usize,
    left: u64,
    state: PacketState,
    seq: SeqNum,
}

impl<'a> Iterator for AckVectorIter<'a> {
    type Item = (SeqNum, PacketState);

    fn next(&mut self) -> Option<Self::Item> {
        while self.left == 0 {
            let b = *self.runs.get(self.run)?;
            self.run += 1;
            self.state = PacketState::from_bits(b >> 6).unwrap_or(PacketState::NotReceived);
            self.left = (b & 0x3f) as u64 + 1;
        }

        let item = (self.seq, self.state);
        self.left -= 1;
        self.seq = self.seq.sub(1);
        Some(item)
    }
}

/// The receiver's record of the packets it got from the peer.
///
/// A growable ring of 2-bit states over `[low, high)`. `low` is the trim
/// point: entries before it were reported and the report was acknowledged.
#[derive(Debug)]
pub struct ReceiveBuffer {
    /// Four entries per byte.
    cells: Vec<u8>,

    /// Capacity in entries, always a power of two.
    capacity: u64,

    /// The oldest entry still reported.
    low: SeqNum,

    /// One past the newest received sequence number.
    high: SeqNum,

    /// Whether any packet was recorded yet.
    started: bool,

    /// Number of rejected sequence numbers.
    anomalies: u64,

    /// Number of failed attempts to grow the ring.
    alloc_failures: u64,
}

impl ReceiveBuffer {
    pub fn new(capacity: u64) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        Self {
            cells: vec![ALL_NOT_RECEIVED; (capacity / 4) as usize],
            capacity,
            low: SeqNum::default(),
            high: SeqNum::default(),
            started: false,
            anomalies: 0,
            alloc_failures: 0,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Return the trim point.
    pub fn low(&self) -> SeqNum {
        self.low
    }

    /// Return the newest received sequence number.
    pub fn highest(&self) -> Option<SeqNum> {
        if self.started {
            Some(self.high.sub(1))
        } else {
            None
        }
    }

    pub fn len(&self) -> u64 {
        self.high.distance_from(self.low)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    pub fn alloc_failures(&self) -> u64 {
        self.alloc_failures
    }

    /// Record the reception of `seq`.
    pub fn record(&mut self, seq: SeqNum) -> Result<()> {
        if !self.started {
            self.low = seq;
            self.high = seq;
            self.started = true;
        }

        if seq.before(self.low) {
            self.anomalies += 1;
            return Err(Error::ProtocolAnomaly(format!(
                "seq {} behind trim point {}",
                seq, self.low
            )));
        }

        let gap = seq.distance_from(self.low);
        if gap >= self.capacity {
            self.anomalies += 1;
            warn!(
                "receive buffer gap {} exceeds capacity {}, seq {} ignored",
                gap, self.capacity, seq
            );
            return Err(Error::ProtocolAnomaly(format!(
                "gap {} exceeds capacity {}",
                gap, self.capacity
            )));
        }

        self.set(seq, PacketState::Received);
        if gap >= self.len() {
            self.high = seq.next();
        }

        if self.capacity - self.len() < GROWTH_MARGIN {
            if let Err(e) = self.grow() {
                self.alloc_failures += 1;
                warn!("receive buffer failed to grow: {:?}", e);
            }
        }

        Ok(())
    }

    /// Return the state of `seq`. Anything outside the buffer is reported
    /// as not received.
    pub fn state_of(&self, seq: SeqNum) -> PacketState {
        if seq.distance_from(self.low) >= self.len() {
            return PacketState::NotReceived;
        }

        let (i, shift) = self.index(seq);
        PacketState::from_bits(self.cells[i] >> shift).unwrap_or(PacketState::NotReceived)
    }

    /// Drop every entry before `seq`.
    pub fn trim(&mut self, seq: SeqNum) {
        if !self.started || !seq.after(self.low) {
            return;
        }

        let end = if seq.after(self.high) { self.high } else { seq };
        let mut cur = self.low;
        while cur != end {
            self.set(cur, PacketState::NotReceived);
            cur = cur.next();
        }

        self.low = seq;
        if seq.after(self.high) {
            self.high = seq;
        }
    }

    /// Build the ack vector that acknowledges `ack`, covering everything back
    /// to the trim point.
    pub fn ack_vector(&self, ack: SeqNum) -> AckVector {
        let mut av = AckVector::new();
        if !self.started || ack.before(self.low) {
            return av;
        }

        // Packets newer than anything recorded were not received.
        let mut seq = ack;
        if !ack.before(self.high) {
            let beyond = ack.distance_from(self.high) + 1;
            if av.push(PacketState::NotReceived, beyond) < beyond {
                return av;
            }
            seq = self.high.sub(1);
            if self.is_empty() {
                return av;
            }
        }

        loop {
            if av.push(self.state_of(seq), 1) == 0 {
                break;
            }
            if seq == self.low {
                break;
            }
            seq = seq.sub(1);
        }

        av
    }

    fn index(&self, seq: SeqNum) -> (usize, u32) {
        let i = seq.value() & (self.capacity - 1);
        ((i / 4) as usize, ((i % 4) * 2) as u32)
    }

    fn set(&mut self, seq: SeqNum, state: PacketState) {
        let (i, shift) = self.index(seq);
        self.cells[i] = (self.cells[i] & !(STATE_MASK << shift)) | (state.to_bits() << shift);
    }

    /// Double the capacity, keeping every entry.
    fn grow(&mut self) -> Result<()> {
        let capacity = self.capacity * 2;
        let nbytes = (capacity / 4) as usize;

        let mut cells: Vec<u8> = Vec::new();
        cells
            .try_reserve_exact(nbytes)
            .map_err(|_| Error::ResourceExhaustion)?;
        cells.resize(nbytes, ALL_NOT_RECEIVED);

        let mut cur = self.low;
        while cur != self.high {
            let state = self.state_of(cur);
            let i = cur.value() & (capacity - 1);
            let (byte, shift) = ((i / 4) as usize, ((i % 4) * 2) as u32);
            cells[byte] = (cells[byte] & !(STATE_MASK << shift)) | (state.to_bits() << shift);
            cur = cur.next();
        }

        trace!(
            "receive buffer grows {} -> {}, range [{}, {})",
            self.capacity,
            capacity,
            self.low,
            self.high
        );
        self.cells = cells;
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
    fn ack_vector_parse() {
        // 3 received, 2 lost, 1 received.
        let av = AckVector::from_bytes(&[0x02, 0xc1, 0x00]).unwrap();
        assert_eq!(av.packets(), 6);

        let items: Vec<_> = av.iter(seq(10)).collect();
        assert_eq!(
            items,
            vec![
                (seq(10), PacketState::Received),
                (seq(9), PacketState::Received),
                (seq(8), PacketState::Received),
                (seq(7), PacketState::NotReceived),
                (seq(6), PacketState::NotReceived),
                (seq(5), PacketState::Received),
            ]
        );
    }

    #[test]
    fn ack_vector_malformed() {
        assert!(AckVector::from_bytes(&[]).is_err());
        // State 2 is reserved.
        assert!(AckVector::from_bytes(&[0x00, 0x85]).is_err());
        assert!(AckVector::from_bytes(&[0; MAX_ACK_VECTOR_LEN + 1]).is_err());
        assert!(AckVector::from_bytes(&[0x40]).is_ok());
    }

    #[test]
    fn ack_vector_iter_wrap() {
        let av = AckVector::from_bytes(&[0x03]).unwrap();
        let seqs: Vec<_> = av.iter(seq(1)).map(|(s, _)| s).collect();
        assert_eq!(
            seqs,
            vec![seq(1), seq(0), seq(SEQ_MODULUS - 1), seq(SEQ_MODULUS - 2)]
        );
    }

    #[test]
    fn ack_vector_push() {
        let mut av = AckVector::new();
        assert_eq!(av.push(PacketState::Received, 70), 70);
        assert_eq!(av.as_bytes(), &[0x3f, 0x05]);
        assert_eq!(av.push(PacketState::Received, 1), 1);
        assert_eq!(av.as_bytes(), &[0x3f, 0x06]);
        assert_eq!(av.push(PacketState::NotReceived, 2), 2);
        assert_eq!(av.as_bytes(), &[0x3f, 0x06, 0xc1]);
        assert_eq!(av.packets(), 73);

        // The vector is bounded by the option size.
        let mut av = AckVector::new();
        let max = MAX_RUN_LENGTH * MAX_ACK_VECTOR_LEN as u64;
        assert_eq!(av.push(PacketState::Received, max + 10), max);
        assert_eq!(av.as_bytes().len(), MAX_ACK_VECTOR_LEN);
        assert_eq!(av.push(PacketState::NotReceived, 1), 0);
    }

    #[test]
    fn receive_buffer_record() {
        let mut rb = ReceiveBuffer::new(64);
        assert_eq!(rb.highest(), None);
        assert!(rb.ack_vector(seq(5)).is_empty());

        rb.record(seq(100)).unwrap();
        rb.record(seq(101)).unwrap();
        rb.record(seq(104)).unwrap();
        assert_eq!(rb.highest(), Some(seq(104)));
        assert_eq!(rb.state_of(seq(102)), PacketState::NotReceived);
        assert_eq!(rb.state_of(seq(104)), PacketState::Received);

        // A late packet fills the hole.
        rb.record(seq(103)).unwrap();
        assert_eq!(rb.highest(), Some(seq(104)));

        let av = rb.ack_vector(seq(104));
        // 103..104 received, 102 missing, 100..101 received.
        assert_eq!(av.as_bytes(), &[0x01, 0xc0, 0x01]);
    }

    #[test]
    fn receive_buffer_anomaly() {
        let mut rb = ReceiveBuffer::new(64);
        rb.record(seq(10)).unwrap();
        assert!(rb.record(seq(9)).is_err());
        assert!(rb.record(seq(10 + 64)).is_err());
        assert_eq!(rb.anomalies(), 2);
        assert_eq!(rb.highest(), Some(seq(10)));
    }

    #[test]
    fn receive_buffer_trim() {
        let mut rb = ReceiveBuffer::new(64);
        for i in 0..10 {
            rb.record(seq(i)).unwrap();
        }
        rb.trim(seq(7));
        assert_eq!(rb.low(), seq(7));
        assert_eq!(rb.len(), 3);
        assert_eq!(rb.state_of(seq(6)), PacketState::NotReceived);
        assert_eq!(rb.ack_vector(seq(9)).as_bytes(), &[0x02]);

        // Trimming backward is a no-op.
        rb.trim(seq(3));
        assert_eq!(rb.low(), seq(7));

        // An ack number ahead of the buffer starts with missing packets.
        assert_eq!(rb.ack_vector(seq(11)).as_bytes(), &[0xc1, 0x02]);
    }

    #[test]
    fn receive_buffer_grow() {
        let mut rb = ReceiveBuffer::new(64);
        for i in 0..100 {
            if i % 10 != 0 {
                rb.record(seq(i)).unwrap();
            }
        }
        assert_eq!(rb.capacity(), 256);
        for i in 1..100 {
            let exp = if i % 10 == 0 {
                PacketState::NotReceived
            } else {
                PacketState::Received
            };
            assert_eq!(rb.state_of(seq(i)), exp);
        }
    }

    #[test]
    fn receive_buffer_wrap() {
        let mut rb = ReceiveBuffer::new(64);
        let start = seq(SEQ_MODULUS - 2);
        for i in 0..4 {
            rb.record(start.add(i)).unwrap();
        }
        assert_eq!(rb.highest(), Some(seq(1)));
        assert_eq!(rb.ack_vector(seq(1)).as_bytes(), &[0x03]);

        rb.trim(seq(0));
        assert_eq!(rb.ack_vector(seq(1)).as_bytes(), &[0x01]);
    }
}
