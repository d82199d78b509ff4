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

use std::collections::VecDeque;
use std::time::Instant;

use log::*;

use super::ReceivedPacket;
use crate::ack_vector::ReceiveBuffer;
use crate::options::feature_value;
use crate::options::DccpOption;
use crate::options::FeatureOp;
use crate::options::OptionList;
use crate::options::FEATURE_ACK_RATIO;
use crate::seqnum::SeqNum;
use crate::Config;

/// Upper bound of acks waiting for an ack-of-ack. The oldest entry is
/// dropped beyond it.
const MAX_PENDING_ACKS: usize = 1024;

/// The receiver half of TCP-like congestion control.
///
/// It records the packets received from the peer, asks for an ack every
/// `ack_ratio` data packets and writes the ack vector of each ack. Entries
/// are dropped from the vector once the peer acknowledged an ack covering
/// them, see RFC 4341 Section 6.1.
#[derive(Debug)]
pub struct AckEngine {
    trace_id: String,

    /// Data packets to receive before an ack is due.
    ack_ratio: u64,

    /// Data packets received since the last ack.
    unacked: u64,

    /// States of the received packets.
    buffer: ReceiveBuffer,

    /// Acks sent, as (local sequence number, acknowledged peer sequence
    /// number), oldest first.
    acks_sent: VecDeque<(SeqNum, SeqNum)>,

    /// Timestamp to echo with the time it was received.
    pending_echo: Option<(u32, Instant)>,

    /// Ack ratio to confirm to the peer.
    pending_confirm: Option<u64>,

    /// Total acks written.
    acks_written: u64,
}

impl AckEngine {
    pub fn new(conf: &Config, trace_id: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            ack_ratio: conf.initial_ack_ratio,
            unacked: 0,
            buffer: ReceiveBuffer::new(conf.ack_vector_capacity),
            acks_sent: VecDeque::new(),
            pending_echo: None,
            pending_confirm: None,
            acks_written: 0,
        }
    }

    pub fn ack_ratio(&self) -> u64 {
        self.ack_ratio
    }

    pub fn unacked_count(&self) -> u64 {
        self.unacked
    }

    pub fn buffer(&self) -> &ReceiveBuffer {
        &self.buffer
    }

    pub fn acks_written(&self) -> u64 {
        self.acks_written
    }

    /// Number of acks still waiting for an ack-of-ack.
    pub fn pending_acks(&self) -> usize {
        self.acks_sent.len()
    }

    /// Return the newest peer sequence number received.
    pub fn highest(&self) -> Option<SeqNum> {
        self.buffer.highest()
    }

    /// Record a packet from the peer. Return true if an ack is due.
    pub fn on_packet_received(&mut self, pkt: &ReceivedPacket, now: Instant) -> bool {
        if let Err(e) = self.buffer.record(pkt.seq) {
            debug!(
                "{} TCPLIKE ON_RECV seq {} not recorded: {:?}",
                self.trace_id, pkt.seq, e
            );
        }

        if let Some(ts) = pkt.options.timestamp() {
            self.pending_echo = Some((ts, now));
        }

        let mut ack_due = false;
        if let Some(ratio) = pkt
            .options
            .feature(FeatureOp::ChangeR, FEATURE_ACK_RATIO)
            .and_then(feature_value)
        {
            if ratio > 0 {
                trace!(
                    "{} TCPLIKE ON_RECV ack ratio {} -> {}",
                    self.trace_id,
                    self.ack_ratio,
                    ratio
                );
                self.ack_ratio = ratio;
                self.pending_confirm = Some(ratio);
                ack_due = true;
            } else {
                debug!("{} TCPLIKE ON_RECV invalid ack ratio 0", self.trace_id);
            }
        }

        if pkt.kind.has_data() {
            self.unacked += 1;
            if self.unacked >= self.ack_ratio {
                ack_due = true;
            }
        }

        ack_due
    }

    /// Write the options of the ack packet `local_seq` acknowledging
    /// `ack_number`.
    pub fn write_ack(
        &mut self,
        local_seq: SeqNum,
        ack_number: SeqNum,
        now: Instant,
        opts: &mut OptionList,
    ) {
        let vector = self.buffer.ack_vector(ack_number);
        if !vector.is_empty() {
            opts.push(DccpOption::AckVector {
                nonce: false,
                vector,
            });
        }

        if let Some((timestamp, received)) = self.pending_echo.take() {
            let elapsed = now.saturating_duration_since(received).as_micros() / 10;
            opts.push(DccpOption::TimestampEcho {
                timestamp,
                elapsed: elapsed.min(u32::MAX as u128) as u32,
            });
        }

        if let Some(ratio) = self.pending_confirm.take() {
            opts.push(DccpOption::confirm_ack_ratio(ratio.min(u16::MAX as u64) as u16));
        }

        trace!(
            "{} TCPLIKE WRITE_ACK seq {} ack {} unacked {}",
            self.trace_id,
            local_seq,
            ack_number,
            self.unacked
        );

        self.unacked = 0;
        self.acks_written += 1;
        if self.acks_sent.len() >= MAX_PENDING_ACKS {
            self.acks_sent.pop_front();
        }
        self.acks_sent.push_back((local_seq, ack_number));
    }

    /// The peer acknowledged packet `ack_number`. If it was one of our acks,
    /// the entries it reported no longer need to be reported.
    pub fn on_ack_of_ack(&mut self, ack_number: SeqNum) {
        let pos = match self.acks_sent.iter().position(|(seq, _)| *seq == ack_number) {
            Some(pos) => pos,
            None => return,
        };

        let mut acked = None;
        for _ in 0..=pos {
            acked = self.acks_sent.pop_front();
        }

        if let Some((_, highest)) = acked {
            trace!(
                "{} TCPLIKE ACK_OF_ACK seq {} trim to {}",
                self.trace_id,
                ack_number,
                highest
            );
            self.buffer.trim(highest);
        }
    }
}
