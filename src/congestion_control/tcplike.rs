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

//! TCP-like congestion control, see RFC 4341.
//!
//! The sender keeps a window of `cwnd` unacknowledged packets. It grows by
//! one packet per ack in slow start and by one packet per window in
//! congestion avoidance, and is halved once per window of data in which a
//! loss was reported by the peer's ack vectors.

use std::cmp;
use std::time::Duration;
use std::time::Instant;

use log::*;

use super::Actions;
use super::AckEngine;
use super::AckRatioController;
use super::CongestionController;
use super::CongestionStats;
use super::ReceivedPacket;
use crate::ack_vector::PacketState;
use crate::connection::rtt::RttEstimator;
use crate::options::feature_value;
use crate::options::DccpOption;
use crate::options::FeatureOp;
use crate::options::OptionList;
use crate::options::FEATURE_ACK_RATIO;
use crate::seqnum::SeqNum;
use crate::window::SegmentTracker;
use crate::Config;

use super::ack_ratio::DUP_ACK_THRESHOLD;

/// Timestamps wrap at 2^32 units; a difference above half of that is taken
/// as negative.
const TIMESTAMP_HALF: u32 = 1 << 31;

/// Timestamp and elapsed time options count in units of 10 microseconds.
const TIMESTAMP_UNIT_MICROS: u64 = 10;

/// The sender half of TCP-like congestion control.
#[derive(Debug)]
pub struct TcpLikeSender {
    trace_id: String,

    /// Congestion window in packets.
    cwnd: u64,

    /// Slow start threshold in packets.
    ssthresh: u64,

    /// Packets sent and not yet acknowledged.
    outstanding: u64,

    /// Unacknowledged packets.
    tracker: SegmentTracker,

    /// RTT estimation.
    rtt: RttEstimator,

    /// Ack ratio requested from the peer.
    ack_ratio: AckRatioController,

    /// Packets acknowledged in the current window.
    acked_in_window: u64,

    /// Windows acknowledged without loss since the last ack ratio change.
    acked_windows: u64,

    /// Latest sequence number sent when the window was last reduced. Losses
    /// up to it belong to the reduced window.
    window_loss_marker: Option<SeqNum>,

    /// Timestamp sent and not yet echoed.
    rtt_probe: Option<u32>,

    /// Whether the retransmission timer is armed.
    timer_armed: bool,

    /// Origin of the timestamps.
    epoch: Instant,

    stats: CongestionStats,
}

impl TcpLikeSender {
    pub fn new(conf: &Config, epoch: Instant, trace_id: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            cwnd: cmp::max(conf.initial_cwnd, 1),
            ssthresh: cmp::max(conf.initial_ssthresh, 1),
            outstanding: 0,
            tracker: SegmentTracker::new(conf.tracker_capacity),
            rtt: RttEstimator::new(conf.initial_rto, conf.min_rto, conf.max_rto),
            ack_ratio: AckRatioController::new(conf.initial_ack_ratio),
            acked_in_window: 0,
            acked_windows: 0,
            window_loss_marker: None,
            rtt_probe: None,
            timer_armed: false,
            epoch,
            stats: Default::default(),
        }
    }

    pub fn cwnd(&self) -> u64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u64 {
        self.ssthresh
    }

    pub fn outstanding(&self) -> u64 {
        self.outstanding
    }

    pub fn tracker(&self) -> &SegmentTracker {
        &self.tracker
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn ack_ratio(&self) -> &AckRatioController {
        &self.ack_ratio
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    pub fn stats(&self) -> &CongestionStats {
        &self.stats
    }

    /// Check whether another packet fits in the window. If not, make sure the
    /// retransmission timer runs.
    pub fn send_permitted(&mut self, now: Instant, actions: &mut Actions) -> bool {
        if self.outstanding < self.cwnd {
            return true;
        }

        if !self.timer_armed {
            self.timer_armed = true;
            actions.arm_timer = Some(now + self.rtt.rto());
            actions.disarm_timer = false;
            trace!(
                "{} TCPLIKE BLOCKED cwnd {} outstanding {} rto {:?}",
                self.trace_id,
                self.cwnd,
                self.outstanding,
                self.rtt.rto()
            );
        }
        false
    }

    pub fn on_sent(
        &mut self,
        seq: SeqNum,
        size: usize,
        now: Instant,
        opts: &mut OptionList,
        actions: &mut Actions,
    ) {
        if let Err(e) = self.tracker.insert(seq) {
            debug!(
                "{} TCPLIKE ON_SENT seq {} not tracked: {:?}",
                self.trace_id, seq, e
            );
        }
        self.outstanding = self.tracker.population();

        if self.timer_armed {
            self.timer_armed = false;
            actions.arm_timer = None;
            actions.disarm_timer = true;
        }

        if self.rtt_probe.is_none() {
            let ts = self.timestamp(now);
            opts.push(DccpOption::Timestamp(ts));
            self.rtt_probe = Some(ts);
        }

        if let Some(ratio) = self.ack_ratio.pending_change() {
            opts.push(DccpOption::change_ack_ratio(
                cmp::min(ratio, u16::MAX as u64) as u16,
            ));
        }

        self.stats.segments_sent += 1;
        self.stats.bytes_sent += size as u64;
        self.stats.segments_in_flight = self.outstanding;

        trace!(
            "{} TCPLIKE ON_SENT seq {} cwnd {} outstanding {}",
            self.trace_id,
            seq,
            self.cwnd,
            self.outstanding
        );
    }

    /// Process an ack from the peer. `send_seq` is the latest sequence
    /// number sent.
    pub fn on_ack_received(
        &mut self,
        pkt: &ReceivedPacket,
        send_seq: SeqNum,
        now: Instant,
        actions: &mut Actions,
    ) {
        let ack = match pkt.ack_number {
            Some(ack) => ack,
            None => return,
        };

        if let Some(ratio) = pkt
            .options
            .feature(FeatureOp::ConfirmL, FEATURE_ACK_RATIO)
            .and_then(feature_value)
        {
            self.ack_ratio.on_confirm(ratio);
        }

        self.sample_rtt(pkt, now);

        if self.ack_ratio.on_ack_seq(pkt.seq, self.cwnd) {
            self.stats.ack_ratio_changes += 1;
            debug!(
                "{} TCPLIKE ON_ACK ack ratio raised to {}",
                self.trace_id,
                self.ack_ratio.ratio()
            );
        }

        let (acked, mut lost) = match pkt.options.ack_vector() {
            Some(vector) => self.process_ack_vector(vector.iter(ack)),
            None => (self.tracker.clear(ack) as u64, 0),
        };

        // Everything three packets behind the ack is settled.
        let settled = ack.sub(DUP_ACK_THRESHOLD);
        let counted = self.is_after_loss_marker(settled.sub(1));
        if self.tracker.truncate_before(settled) && counted {
            lost += 1;
        }

        self.outstanding = self.tracker.population();
        self.stats.segments_acked += acked;
        self.stats.segments_in_flight = self.outstanding;

        if acked == 0 {
            return;
        }

        if lost > 0 {
            self.on_loss(lost, send_seq);
        } else {
            self.on_window_progress(acked);
        }

        if self
            .ack_ratio
            .on_windows_acked(self.acked_windows, self.cwnd)
        {
            self.acked_windows = 0;
            self.stats.ack_ratio_changes += 1;
        }
        if self.ack_ratio.clamp(self.cwnd) {
            self.stats.ack_ratio_changes += 1;
        }

        trace!(
            "{} TCPLIKE ON_ACK ack {} acked {} lost {} cwnd {} ssthresh {} outstanding {} ack_ratio {}",
            self.trace_id,
            ack,
            acked,
            lost,
            self.cwnd,
            self.ssthresh,
            self.outstanding,
            self.ack_ratio.ratio()
        );

        if self.cwnd > self.outstanding && self.timer_armed {
            self.timer_armed = false;
            actions.arm_timer = None;
            actions.disarm_timer = true;
            actions.send_requested = true;
        }
    }

    /// Handle the expiry of the retransmission timer.
    pub fn on_timeout(&mut self, now: Instant, actions: &mut Actions) {
        self.timer_armed = false;
        self.ssthresh = cmp::max(self.cwnd / 2, 1);
        self.cwnd = 1;
        self.tracker.reset();
        self.outstanding = 0;
        self.rtt.backoff();
        self.ack_ratio.reset();
        self.acked_in_window = 0;
        self.acked_windows = 0;
        self.rtt_probe = None;

        self.stats.timeouts += 1;
        self.stats.ack_ratio_changes += 1;
        self.stats.segments_in_flight = 0;

        debug!(
            "{} TCPLIKE ON_TIMEOUT ssthresh {} rto {:?}",
            self.trace_id,
            self.ssthresh,
            self.rtt.rto()
        );

        actions.send_requested = true;
    }

    /// Walk an ack vector from the ack number backward. Return the number of
    /// packets newly acknowledged and the number of packets found lost.
    fn process_ack_vector<I>(&mut self, iter: I) -> (u64, u64)
    where
        I: Iterator<Item = (SeqNum, PacketState)>,
    {
        let mut acked = 0;
        let mut lost = 0;
        let head = self.tracker.head();

        for (seq, state) in iter {
            if seq.before(head) {
                break;
            }

            match state {
                PacketState::Received => {
                    if self.tracker.clear(seq) {
                        acked += 1;
                    }
                }

                // A congestion mark is a loss that was not dropped.
                PacketState::ReceivedEcnMarked => {
                    if self.tracker.clear(seq) {
                        acked += 1;
                        if self.is_after_loss_marker(seq) {
                            lost += 1;
                        }
                    }
                }

                PacketState::NotReceived => {
                    if self.is_after_loss_marker(seq) && self.tracker.is_outstanding(seq) {
                        lost += 1;
                    }
                }
            }
        }

        (acked, lost)
    }

    fn is_after_loss_marker(&self, seq: SeqNum) -> bool {
        match self.window_loss_marker {
            Some(marker) => seq.after(marker),
            None => true,
        }
    }

    fn on_loss(&mut self, lost: u64, send_seq: SeqNum) {
        self.ssthresh = cmp::max(self.cwnd / 2, 1);
        self.cwnd = self.ssthresh;
        self.acked_in_window = 0;
        self.acked_windows = 0;
        self.window_loss_marker = Some(send_seq);

        self.stats.segments_lost += lost;
        self.stats.loss_events += 1;

        debug!(
            "{} TCPLIKE ON_LOSS lost {} cwnd {} marker {}",
            self.trace_id, lost, self.cwnd, send_seq
        );
    }

    fn on_window_progress(&mut self, acked: u64) {
        self.acked_in_window += acked;

        if self.cwnd < self.ssthresh {
            // Slow start.
            self.cwnd += 1;
            if self.acked_in_window >= self.cwnd {
                self.acked_in_window = 0;
                self.acked_windows += 1;
            }
            return;
        }

        // Congestion avoidance.
        if self.acked_in_window > self.cwnd {
            self.cwnd += 1;
            self.acked_in_window = 0;
            self.acked_windows += 1;
        }
    }

    /// Take an RTT sample from the echo of our pending timestamp.
    fn sample_rtt(&mut self, pkt: &ReceivedPacket, now: Instant) {
        let (ts, elapsed) = match (self.rtt_probe, pkt.options.timestamp_echo()) {
            (Some(probe), Some((ts, elapsed))) if probe == ts => (ts, elapsed),
            _ => return,
        };
        self.rtt_probe = None;

        let delta = self.timestamp(now).wrapping_sub(ts).wrapping_sub(elapsed);
        if delta >= TIMESTAMP_HALF {
            debug!(
                "{} TCPLIKE ON_ACK echo {} elapsed {} from the future",
                self.trace_id, ts, elapsed
            );
            return;
        }

        let sample = Duration::from_micros(delta as u64 * TIMESTAMP_UNIT_MICROS);
        self.rtt.update(sample);
        trace!(
            "{} TCPLIKE ON_ACK rtt sample {:?} srtt {:?} rto {:?}",
            self.trace_id,
            sample,
            self.rtt.smoothed_rtt(),
            self.rtt.rto()
        );
    }

    /// Current time in timestamp units.
    fn timestamp(&self, now: Instant) -> u32 {
        let micros = now.saturating_duration_since(self.epoch).as_micros() as u64;
        (micros / TIMESTAMP_UNIT_MICROS) as u32
    }
}

/// TCP-like congestion control of one connection: the sender half for the
/// packets we send and the receiver half for the packets we get.
#[derive(Debug)]
pub struct TcpLike {
    sender: TcpLikeSender,
    receiver: AckEngine,
    stats: CongestionStats,
}

impl TcpLike {
    pub fn new(conf: &Config, epoch: Instant, trace_id: &str) -> Self {
        Self {
            sender: TcpLikeSender::new(conf, epoch, trace_id),
            receiver: AckEngine::new(conf, trace_id),
            stats: Default::default(),
        }
    }

    pub fn sender(&self) -> &TcpLikeSender {
        &self.sender
    }

    pub fn receiver(&self) -> &AckEngine {
        &self.receiver
    }

    fn update_stats(&mut self) {
        let buffer = self.receiver.buffer();
        let tracker = self.sender.tracker();

        self.stats = self.sender.stats().clone();
        self.stats.acks_missed = self.sender.ack_ratio().acks_missed();
        self.stats.acks_sent = self.receiver.acks_written();
        self.stats.anomalies = tracker.anomalies() + buffer.anomalies();
        self.stats.alloc_failures = tracker.alloc_failures() + buffer.alloc_failures();
    }
}

impl CongestionController for TcpLike {
    fn name(&self) -> &str {
        "TCPLIKE"
    }

    fn send_permitted(&mut self, _size: usize, now: Instant, actions: &mut Actions) -> bool {
        self.sender.send_permitted(now, actions)
    }

    fn on_sent(
        &mut self,
        seq: SeqNum,
        size: usize,
        now: Instant,
        opts: &mut OptionList,
        actions: &mut Actions,
    ) {
        self.sender.on_sent(seq, size, now, opts, actions);

        // Piggyback the ack vector when received data is unreported.
        if self.receiver.unacked_count() > 0 {
            if let Some(highest) = self.receiver.highest() {
                self.receiver.write_ack(seq, highest, now, opts);
            }
        }
        self.update_stats();
    }

    fn on_ack_received(
        &mut self,
        pkt: &ReceivedPacket,
        send_seq: SeqNum,
        now: Instant,
        actions: &mut Actions,
    ) {
        self.sender.on_ack_received(pkt, send_seq, now, actions);
        if let Some(ack) = pkt.ack_number {
            self.receiver.on_ack_of_ack(ack);
        }
        self.update_stats();
    }

    fn on_data_received(&mut self, pkt: &ReceivedPacket, now: Instant, actions: &mut Actions) {
        if self.receiver.on_packet_received(pkt, now) {
            actions.ack_requested = true;
        }
        self.update_stats();
    }

    fn write_ack(
        &mut self,
        local_seq: SeqNum,
        ack_number: SeqNum,
        now: Instant,
        opts: &mut OptionList,
    ) {
        self.receiver.write_ack(local_seq, ack_number, now, opts);
        self.update_stats();
    }

    fn on_timeout(&mut self, now: Instant, actions: &mut Actions) {
        self.sender.on_timeout(now, actions);
        self.update_stats();
    }

    fn in_slow_start(&self) -> bool {
        self.sender.cwnd() < self.sender.ssthresh()
    }

    fn congestion_window(&self) -> u64 {
        self.sender.cwnd()
    }

    fn in_flight(&self) -> u64 {
        self.sender.outstanding()
    }

    fn ack_ratio(&self) -> Option<u64> {
        Some(self.sender.ack_ratio().ratio())
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack_vector::AckVector;
    use crate::congestion_control::PacketType;
    use crate::window::SegmentState;
    use rand::Rng;

    fn seq(n: u64) -> SeqNum {
        SeqNum::new(n)
    }

    fn sender(cwnd: u64, ssthresh: u64) -> TcpLikeSender {
        let mut conf = Config::new();
        conf.set_initial_cwnd(cwnd);
        conf.set_initial_ssthresh(ssthresh);
        conf.set_initial_rto(200);
        TcpLikeSender::new(&conf, Instant::now(), "")
    }

    /// Send `n` packets starting at `start`.
    fn send(s: &mut TcpLikeSender, start: u64, n: u64, now: Instant) {
        for i in start..start + n {
            let mut actions = Actions::default();
            assert!(s.send_permitted(now, &mut actions));
            s.on_sent(seq(i), 1000, now, &mut OptionList::new(), &mut actions);
        }
    }

    /// An ack packet `ack_seq` acknowledging `ack` with the given runs.
    fn ack_packet(ack_seq: u64, ack: u64, runs: &[u8]) -> ReceivedPacket {
        let mut opts = OptionList::new();
        opts.push(DccpOption::AckVector {
            nonce: false,
            vector: AckVector::from_bytes(runs).unwrap(),
        });
        ReceivedPacket::ack(seq(ack_seq), seq(ack), opts)
    }

    #[test]
    fn first_ack_grows_window() {
        let mut s = sender(4, u64::MAX);
        let now = Instant::now();
        assert_eq!(s.cwnd(), 4);

        send(&mut s, 0, 4, now);
        assert_eq!(s.outstanding(), 4);

        let mut actions = Actions::default();
        s.on_ack_received(&ack_packet(1, 0, &[0x00]), seq(3), now, &mut actions);
        assert_eq!(s.cwnd(), 5);
        assert_eq!(s.outstanding(), 3);
        assert_eq!(s.outstanding(), s.tracker().population());
    }

    #[test]
    fn window_blocks_and_arms_timer() {
        let mut s = sender(2, u64::MAX);
        let now = Instant::now();
        send(&mut s, 0, 2, now);

        let mut actions = Actions::default();
        assert!(!s.send_permitted(now, &mut actions));
        assert_eq!(actions.arm_timer, Some(now + Duration::from_millis(200)));
        assert!(s.timer_armed());

        // Armed once.
        let mut actions = Actions::default();
        assert!(!s.send_permitted(now, &mut actions));
        assert_eq!(actions.arm_timer, None);

        // An ack opening the window disarms the timer and asks for data.
        let mut actions = Actions::default();
        s.on_ack_received(&ack_packet(1, 1, &[0x01]), seq(1), now, &mut actions);
        assert!(actions.disarm_timer);
        assert!(actions.send_requested);
        assert!(!s.timer_armed());
        assert_eq!(s.cwnd(), 3);
        assert_eq!(s.outstanding(), 0);
    }

    #[test]
    fn single_loss_halves_window() {
        let mut s = sender(20, 1000);
        let now = Instant::now();
        send(&mut s, 0, 20, now);

        // 19..18 received, 17 lost, 16..0 received.
        let mut actions = Actions::default();
        let pkt = ack_packet(1, 19, &[0x01, 0xc0, 0x10]);
        s.on_ack_received(&pkt, seq(19), now, &mut actions);
        assert_eq!(s.ssthresh(), 10);
        assert_eq!(s.cwnd(), 10);
        assert_eq!(s.outstanding(), 1);
        assert_eq!(s.tracker().state_of(seq(17)), SegmentState::Outstanding);
        assert_eq!(s.stats().segments_lost, 1);
        assert_eq!(s.stats().loss_events, 1);

        // The same loss reported again belongs to the reduced window.
        let mut actions = Actions::default();
        let pkt = ack_packet(2, 19, &[0x01, 0xc0, 0x10]);
        s.on_ack_received(&pkt, seq(19), now, &mut actions);
        assert_eq!(s.cwnd(), 10);
        assert_eq!(s.stats().loss_events, 1);
    }

    #[test]
    fn loss_counted_twice_in_one_ack() {
        let mut s = sender(20, 1000);
        let now = Instant::now();
        send(&mut s, 0, 20, now);

        // 14 is reported lost and also falls behind the settled point.
        let mut actions = Actions::default();
        let pkt = ack_packet(1, 19, &[0x04, 0xc0, 0x0d]);
        s.on_ack_received(&pkt, seq(19), now, &mut actions);
        assert_eq!(s.cwnd(), 10);
        assert_eq!(s.outstanding(), 0);
        assert_eq!(s.tracker().state_of(seq(14)), SegmentState::Acknowledged);
        assert_eq!(s.stats().segments_lost, 2);
        assert_eq!(s.stats().loss_events, 1);
    }

    #[test]
    fn truncation_counts_loss() {
        let mut s = sender(10, 1000);
        let now = Instant::now();
        send(&mut s, 0, 10, now);

        // A plain ack of 9 without a vector settles everything before 6.
        let mut actions = Actions::default();
        let pkt = ReceivedPacket::ack(seq(1), seq(9), OptionList::new());
        s.on_ack_received(&pkt, seq(9), now, &mut actions);
        assert_eq!(s.cwnd(), 5);
        assert_eq!(s.ssthresh(), 5);
        assert_eq!(s.tracker().head(), seq(6));
        assert_eq!(s.outstanding(), 3);
        for i in 0..6 {
            assert_eq!(s.tracker().state_of(seq(i)), SegmentState::Acknowledged);
        }
    }

    #[test]
    fn duplicate_ack_is_ignored() {
        let mut s = sender(4, u64::MAX);
        let now = Instant::now();
        send(&mut s, 0, 4, now);

        let mut actions = Actions::default();
        s.on_ack_received(&ack_packet(1, 1, &[0x01]), seq(3), now, &mut actions);
        assert_eq!(s.cwnd(), 5);

        let mut actions = Actions::default();
        s.on_ack_received(&ack_packet(2, 1, &[0x01]), seq(3), now, &mut actions);
        assert_eq!(s.cwnd(), 5);
        assert!(actions.is_empty());
    }

    #[test]
    fn loss_without_new_ack_is_ignored() {
        let mut s = sender(20, 1000);
        let now = Instant::now();
        send(&mut s, 0, 10, now);

        let mut actions = Actions::default();
        s.on_ack_received(&ack_packet(1, 8, &[0x08]), seq(9), now, &mut actions);
        assert_eq!(s.cwnd(), 21);
        assert_eq!(s.outstanding(), 1);

        // Only 9 reported, as not received. Nothing is newly cleared.
        let mut actions = Actions::default();
        s.on_ack_received(&ack_packet(2, 9, &[0xc0]), seq(9), now, &mut actions);
        assert_eq!(s.cwnd(), 21);
        assert_eq!(s.ssthresh(), 1000);
        assert_eq!(s.outstanding(), 1);
        assert_eq!(s.stats().loss_events, 0);
        assert_eq!(s.stats().segments_lost, 0);
        assert!(actions.is_empty());
    }

    #[test]
    fn truncated_loss_of_reduced_window_not_counted() {
        let mut s = sender(20, 1000);
        let now = Instant::now();
        send(&mut s, 0, 20, now);

        // 17 lost, the window is reduced with 19 as the loss marker.
        let mut actions = Actions::default();
        s.on_ack_received(&ack_packet(1, 19, &[0x01, 0xc0, 0x10]), seq(19), now, &mut actions);
        assert_eq!(s.cwnd(), 10);
        assert_eq!(s.stats().segments_lost, 1);

        // Acking 21 settles everything before 18 and drops the still set
        // bit of 17. It belongs to the reduced window.
        send(&mut s, 20, 2, now);
        let mut actions = Actions::default();
        s.on_ack_received(&ack_packet(2, 21, &[0x01]), seq(21), now, &mut actions);
        assert_eq!(s.tracker().state_of(seq(17)), SegmentState::Acknowledged);
        assert_eq!(s.outstanding(), 0);
        assert_eq!(s.cwnd(), 10);
        assert_eq!(s.ssthresh(), 10);
        assert_eq!(s.stats().segments_lost, 1);
        assert_eq!(s.stats().loss_events, 1);
    }

    #[test]
    fn congestion_avoidance_growth() {
        let mut s = sender(4, 4);
        let now = Instant::now();
        send(&mut s, 0, 4, now);

        // Four acked packets do not exceed the window yet.
        let mut actions = Actions::default();
        s.on_ack_received(&ack_packet(1, 3, &[0x03]), seq(3), now, &mut actions);
        assert_eq!(s.cwnd(), 4);

        send(&mut s, 4, 4, now);
        let mut actions = Actions::default();
        s.on_ack_received(&ack_packet(2, 4, &[0x00]), seq(7), now, &mut actions);
        assert_eq!(s.cwnd(), 5);
    }

    #[test]
    fn retransmission_timeout() {
        let mut s = sender(16, u64::MAX);
        let now = Instant::now();
        send(&mut s, 0, 16, now);
        assert_eq!(s.rtt().rto(), Duration::from_millis(200));

        let mut actions = Actions::default();
        assert!(!s.send_permitted(now, &mut actions));

        let mut actions = Actions::default();
        s.on_timeout(now, &mut actions);
        assert_eq!(s.cwnd(), 1);
        assert_eq!(s.ssthresh(), 8);
        assert_eq!(s.rtt().rto(), Duration::from_millis(400));
        assert_eq!(s.ack_ratio().ratio(), 1);
        assert_eq!(s.ack_ratio().pending_change(), Some(1));
        assert_eq!(s.outstanding(), 0);
        assert_eq!(s.tracker().population(), 0);
        assert!(actions.send_requested);
        assert!(!s.timer_armed());

        // The renegotiation rides on the next packet.
        let mut actions = Actions::default();
        let mut opts = OptionList::new();
        assert!(s.send_permitted(now, &mut actions));
        s.on_sent(seq(16), 1000, now, &mut opts, &mut actions);
        let change = opts.feature(FeatureOp::ChangeR, FEATURE_ACK_RATIO);
        assert_eq!(change.and_then(feature_value), Some(1));
    }

    #[test]
    fn rtt_sample_from_echo() {
        let epoch = Instant::now();
        let mut conf = Config::new();
        conf.set_initial_rto(1000);
        let mut s = TcpLikeSender::new(&conf, epoch, "");

        let sent = epoch + Duration::from_millis(10);
        let mut opts = OptionList::new();
        let mut actions = Actions::default();
        s.on_sent(seq(0), 1000, sent, &mut opts, &mut actions);
        let ts = opts.timestamp().unwrap();
        assert_eq!(ts, 1000);

        // A probe is in flight, no new timestamp.
        let mut opts = OptionList::new();
        s.on_sent(seq(1), 1000, sent, &mut opts, &mut actions);
        assert_eq!(opts.timestamp(), None);

        // 100ms later, the peer held the timestamp for 20ms.
        let mut opts = OptionList::new();
        opts.push(DccpOption::TimestampEcho {
            timestamp: ts,
            elapsed: 2000,
        });
        let pkt = ReceivedPacket::ack(seq(1), seq(0), opts);
        s.on_ack_received(&pkt, seq(1), sent + Duration::from_millis(100), &mut actions);
        assert_eq!(s.rtt().latest_rtt(), Duration::from_millis(80));
        assert_eq!(s.rtt().smoothed_rtt(), Duration::from_millis(80));
    }

    #[test]
    fn ack_ratio_confirmed() {
        let mut s = sender(16, u64::MAX);
        let now = Instant::now();
        let mut actions = Actions::default();
        s.on_timeout(now, &mut actions);
        assert_eq!(s.ack_ratio().pending_change(), Some(1));

        let mut opts = OptionList::new();
        opts.push(DccpOption::confirm_ack_ratio(1));
        let pkt = ReceivedPacket::ack(seq(1), seq(0), opts);
        s.on_ack_received(&pkt, seq(0), now, &mut actions);
        assert_eq!(s.ack_ratio().pending_change(), None);
    }

    #[test]
    fn loss_free_runs() {
        let mut rng = rand::thread_rng();
        let now = Instant::now();

        for _ in 0..20 {
            let mut s = sender(4, rng.gen_range(2..64));
            let mut next = 0_u64;
            let mut acked = 0_u64;
            let mut ack_seq = 0_u64;
            let mut last_cwnd = s.cwnd();

            for _ in 0..200 {
                // Fill the window.
                loop {
                    let mut actions = Actions::default();
                    if !s.send_permitted(now, &mut actions) {
                        break;
                    }
                    s.on_sent(seq(next), 1000, now, &mut OptionList::new(), &mut actions);
                    next += 1;
                    assert_eq!(s.outstanding(), s.tracker().population());
                }

                // Ack a random prefix of what is outstanding.
                let n = rng.gen_range(1..=cmp::min(next - acked, 64));
                let ack = acked + n - 1;
                let pkt = ack_packet(ack_seq, ack, &[(n - 1) as u8]);
                ack_seq += 1;
                acked += n;

                let mut actions = Actions::default();
                s.on_ack_received(&pkt, seq(next - 1), now, &mut actions);
                assert!(s.cwnd() >= last_cwnd);
                assert_eq!(s.outstanding(), s.tracker().population());
                assert_eq!(s.stats().loss_events, 0);
                last_cwnd = s.cwnd();
            }
        }
    }

    #[test]
    fn tcplike_receiver_half() {
        let mut conf = Config::new();
        conf.set_initial_ack_ratio(3);
        let now = Instant::now();
        let mut cc = TcpLike::new(&conf, now, "");

        for i in 0..3 {
            let mut actions = Actions::default();
            cc.on_data_received(&ReceivedPacket::data(seq(i), OptionList::new()), now, &mut actions);
            assert_eq!(actions.ack_requested, i == 2);
        }

        let mut opts = OptionList::new();
        cc.write_ack(seq(50), seq(2), now, &mut opts);
        assert_eq!(cc.receiver().unacked_count(), 0);
        assert_eq!(opts.ack_vector().unwrap().packets(), 3);
        assert_eq!(cc.stats().acks_sent, 1);

        // Data arriving afterwards is piggybacked on the next data packet.
        let mut actions = Actions::default();
        let pkt = ReceivedPacket {
            seq: seq(3),
            kind: PacketType::DataAck,
            ack_number: Some(seq(50)),
            options: OptionList::new(),
        };
        cc.on_data_received(&pkt, now, &mut actions);
        cc.on_ack_received(&pkt, seq(50), now, &mut actions);
        assert_eq!(cc.receiver().pending_acks(), 0);

        let mut opts = OptionList::new();
        cc.on_sent(seq(51), 100, now, &mut opts, &mut actions);
        assert!(opts.timestamp().is_some());
        assert_eq!(opts.ack_vector().unwrap().packets(), 2);
        assert_eq!(cc.receiver().unacked_count(), 0);
        assert_eq!(cc.in_flight(), 1);
        assert!(cc.in_slow_start());
    }
}
