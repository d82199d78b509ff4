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

use std::cmp;

use log::*;

use crate::seqnum::SeqNum;

/// Number of ack packets that must follow a missing one before the miss is
/// considered persistent.
pub const DUP_ACK_THRESHOLD: u64 = 3;

/// Ack ratio control of the sender half, see RFC 4341 Section 6.1.2.
///
/// The ack ratio is the number of data packets the peer may receive before it
/// has to send an ack. It is raised when the peer's acks get lost and lowered
/// again after enough loss-free windows.
#[derive(Debug)]
pub struct AckRatioController {
    /// Current ack ratio.
    ratio: u64,

    /// Sequence number of the latest ack packet received from the peer.
    ack_last: Option<SeqNum>,

    /// The oldest ack packet found missing, if any.
    ack_miss: Option<SeqNum>,

    /// Number of persistent ack misses.
    acks_missed: u64,

    /// Ratio sent to the peer and not yet confirmed.
    pending: Option<u64>,

    /// Number of ratio changes.
    changes: u64,
}

impl AckRatioController {
    pub fn new(initial_ratio: u64) -> Self {
        Self {
            ratio: cmp::max(initial_ratio, 1),
            ack_last: None,
            ack_miss: None,
            acks_missed: 0,
            pending: None,
            changes: 0,
        }
    }

    pub fn ratio(&self) -> u64 {
        self.ratio
    }

    pub fn ack_last(&self) -> Option<SeqNum> {
        self.ack_last
    }

    pub fn ack_miss(&self) -> Option<SeqNum> {
        self.ack_miss
    }

    pub fn acks_missed(&self) -> u64 {
        self.acks_missed
    }

    pub fn changes(&self) -> u64 {
        self.changes
    }

    /// Return the ratio that still has to be negotiated with the peer.
    pub fn pending_change(&self) -> Option<u64> {
        self.pending
    }

    /// The peer confirmed `value`.
    pub fn on_confirm(&mut self, value: u64) {
        if self.pending == Some(value) {
            self.pending = None;
        }
    }

    /// Feed the sequence number of an ack packet from the peer. Return true if
    /// the ratio changed.
    pub fn on_ack_seq(&mut self, seq: SeqNum, cwnd: u64) -> bool {
        let last = match self.ack_last {
            Some(last) => last,
            None => {
                self.ack_last = Some(seq);
                return false;
            }
        };

        if seq == last.next() {
            self.ack_last = Some(seq);
        } else if seq.after(last) {
            if self.ack_miss.is_none() {
                self.ack_miss = Some(last.next());
            }
            self.ack_last = Some(seq);
        } else if Some(seq) == self.ack_miss {
            // The missing ack was only reordered.
            self.ack_miss = None;
        }

        let miss = match self.ack_miss {
            Some(miss) => miss,
            None => return false,
        };
        let last = seq.max(last);
        if last.distance_from(miss) < DUP_ACK_THRESHOLD {
            return false;
        }

        self.ack_miss = None;
        self.acks_missed += 1;

        let ratio = cmp::min(self.ratio.saturating_mul(2), Self::upper_bound(cwnd));
        trace!(
            "ack {} missed, ack ratio {} -> {}, cwnd {}",
            miss,
            self.ratio,
            ratio,
            cwnd
        );
        self.set(ratio)
    }

    /// Lower the ratio by one once `acked_windows` loss-free windows were
    /// acknowledged. Return true if the ratio changed.
    pub fn on_windows_acked(&mut self, acked_windows: u64, cwnd: u64) -> bool {
        if self.ratio <= 2 || cwnd < 4 {
            return false;
        }

        let windows = cwnd / (self.ratio * self.ratio - self.ratio);
        if acked_windows < windows {
            return false;
        }

        self.set(self.ratio - 1)
    }

    /// Keep the ratio within `[2, cwnd / 2]`, or `[1, 1]` for tiny windows.
    /// Return true if the ratio changed.
    pub fn clamp(&mut self, cwnd: u64) -> bool {
        let upper = Self::upper_bound(cwnd);
        if self.ratio > upper {
            return self.set(upper);
        }
        if cwnd >= 4 && self.ratio < 2 {
            return self.set(2);
        }
        false
    }

    /// Drop back to an ack for every packet after a retransmission timeout.
    /// The peer is told even if the ratio was already 1.
    pub fn reset(&mut self) {
        if self.ratio != 1 {
            self.changes += 1;
        }
        self.ratio = 1;
        self.pending = Some(1);
        self.ack_miss = None;
    }

    fn upper_bound(cwnd: u64) -> u64 {
        cmp::max(cwnd / 2, 1)
    }

    fn set(&mut self, ratio: u64) -> bool {
        if ratio == self.ratio {
            return false;
        }
        self.ratio = ratio;
        self.pending = Some(ratio);
        self.changes += 1;
        true
    }
}
