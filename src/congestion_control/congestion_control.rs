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

#![allow(unused_variables)]

use core::str::FromStr;
use std::fmt;
use std::time::Instant;

use crate::options::OptionList;
use crate::seqnum::SeqNum;
use crate::Config;
use crate::Error;
use crate::Result;
pub use ack_ratio::AckRatioController;
pub use nocc::NoCc;
pub use receiver::AckEngine;
pub use tcplike::TcpLike;
pub use tcplike::TcpLikeSender;

/// Available congestion control algorithm
#[repr(C)]
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum CongestionControlAlgorithm {
    /// TCP-like congestion control (CCID 2). A window based AIMD controller
    /// driven by ack vectors, see RFC 4341.
    #[default]
    TcpLike,

    /// No congestion control. Every packet may be sent at once. It is
    /// intended to be used for testing and experiments.
    NoCc,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        if algor.eq_ignore_ascii_case("tcplike") || algor.eq_ignore_ascii_case("ccid2") {
            Ok(CongestionControlAlgorithm::TcpLike)
        } else if algor.eq_ignore_ascii_case("nocc") {
            Ok(CongestionControlAlgorithm::NoCc)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// Type of a received packet, as far as congestion control cares.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum PacketType {
    /// Data without an acknowledgement number.
    Data,

    /// Pure acknowledgement.
    Ack,

    /// Data with a piggybacked acknowledgement.
    DataAck,
}

impl PacketType {
    /// Whether the packet carries application data.
    pub fn has_data(self) -> bool {
        matches!(self, PacketType::Data | PacketType::DataAck)
    }

    /// Whether the packet carries an acknowledgement number.
    pub fn has_ack(self) -> bool {
        matches!(self, PacketType::Ack | PacketType::DataAck)
    }
}

/// A packet received from the peer, reduced to the fields congestion control
/// reads.
#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    /// Sequence number of the packet.
    pub seq: SeqNum,

    /// Packet type.
    pub kind: PacketType,

    /// Acknowledgement number, present for acks.
    pub ack_number: Option<SeqNum>,

    /// Decoded options of the packet.
    pub options: OptionList,
}

impl ReceivedPacket {
    pub fn data(seq: SeqNum, options: OptionList) -> Self {
        Self {
            seq,
            kind: PacketType::Data,
            ack_number: None,
            options,
        }
    }

    pub fn ack(seq: SeqNum, ack_number: SeqNum, options: OptionList) -> Self {
        Self {
            seq,
            kind: PacketType::Ack,
            ack_number: Some(ack_number),
            options,
        }
    }
}

/// Side effects requested by a controller. They are carried out by the
/// caller once the connection lock is released.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Actions {
    /// Arm the retransmission timer to fire at the given time.
    pub arm_timer: Option<Instant>,

    /// Cancel the retransmission timer.
    pub disarm_timer: bool,

    /// Ask the transport to send pending data.
    pub send_requested: bool,

    /// Ask the transport to send an acknowledgement.
    pub ack_requested: bool,
}

impl Actions {
    /// Merge the requests of `other` into `self`. A later arm or disarm
    /// overrides an earlier one.
    pub fn merge(&mut self, other: Actions) {
        if other.arm_timer.is_some() {
            self.arm_timer = other.arm_timer;
            self.disarm_timer = false;
        } else if other.disarm_timer {
            self.arm_timer = None;
            self.disarm_timer = true;
        }
        self.send_requested |= other.send_requested;
        self.ack_requested |= other.ack_requested;
    }

    pub fn is_empty(&self) -> bool {
        *self == Actions::default()
    }
}

/// Congestion control statistics.
#[derive(Debug, Default, Clone)]
pub struct CongestionStats {
    /// Segments in flight.
    pub segments_in_flight: u64,

    /// Total segments sent.
    pub segments_sent: u64,

    /// Total bytes sent.
    pub bytes_sent: u64,

    /// Total segments acked.
    pub segments_acked: u64,

    /// Total segments detected lost.
    pub segments_lost: u64,

    /// Number of congestion events, at most one per ack.
    pub loss_events: u64,

    /// Number of retransmission timeouts.
    pub timeouts: u64,

    /// Number of ack ratio changes requested from the peer.
    pub ack_ratio_changes: u64,

    /// Number of persistent gaps in the peer's ack sequence.
    pub acks_missed: u64,

    /// Total acks sent by the receiver half.
    pub acks_sent: u64,

    /// Number of events ignored because the peer data did not fit local
    /// state.
    pub anomalies: u64,

    /// Number of ring buffer growths that failed to allocate.
    pub alloc_failures: u64,
}

/// Congestion control interfaces shared by different algorithms.
///
/// A controller drives both halves of a connection: the sender half gates
/// outgoing packets, the receiver half acknowledges incoming ones.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Check whether a packet of `size` bytes may be sent now.
    fn send_permitted(&mut self, size: usize, now: Instant, actions: &mut Actions) -> bool;

    /// Callback after data packet `seq` was sent out. Options the packet
    /// should carry are appended to `opts`.
    fn on_sent(
        &mut self,
        seq: SeqNum,
        size: usize,
        now: Instant,
        opts: &mut OptionList,
        actions: &mut Actions,
    );

    /// Callback for a received packet carrying an acknowledgement.
    /// `send_seq` is the latest sequence number sent locally.
    fn on_ack_received(
        &mut self,
        pkt: &ReceivedPacket,
        send_seq: SeqNum,
        now: Instant,
        actions: &mut Actions,
    ) {
    }

    /// Callback for every received packet.
    fn on_data_received(&mut self, pkt: &ReceivedPacket, now: Instant, actions: &mut Actions) {}

    /// Build the options of the ack packet `local_seq` acknowledging
    /// `ack_number`.
    fn write_ack(
        &mut self,
        local_seq: SeqNum,
        ack_number: SeqNum,
        now: Instant,
        opts: &mut OptionList,
    ) {
    }

    /// Callback for the retransmission timer.
    fn on_timeout(&mut self, now: Instant, actions: &mut Actions) {}

    /// Check if in slow start.
    fn in_slow_start(&self) -> bool {
        false
    }

    /// Current congestion window in segments.
    fn congestion_window(&self) -> u64;

    /// Segments sent and not yet acknowledged.
    fn in_flight(&self) -> u64;

    /// Current ack ratio requested from the peer, if any.
    fn ack_ratio(&self) -> Option<u64> {
        None
    }

    /// Congestion stats.
    fn stats(&self) -> &CongestionStats;
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller.")
    }
}

impl fmt::Debug for dyn CongestionController + Send {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller.")
    }
}

/// Build a congestion controller. Timestamps carried in options are relative
/// to `epoch`.
pub fn build_congestion_controller(
    conf: &Config,
    epoch: Instant,
    trace_id: &str,
) -> Box<dyn CongestionController + Send> {
    match conf.cc_algorithm {
        CongestionControlAlgorithm::TcpLike => Box::new(TcpLike::new(conf, epoch, trace_id)),
        CongestionControlAlgorithm::NoCc => Box::new(NoCc::new(conf, trace_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn congestion_control_name() {
        let cases = [
            ("tcplike", Ok(CongestionControlAlgorithm::TcpLike)),
            ("TcpLike", Ok(CongestionControlAlgorithm::TcpLike)),
            ("CCID2", Ok(CongestionControlAlgorithm::TcpLike)),
            ("ccid2", Ok(CongestionControlAlgorithm::TcpLike)),
            ("nocc", Ok(CongestionControlAlgorithm::NoCc)),
            ("NOCC", Ok(CongestionControlAlgorithm::NoCc)),
            ("cubic", Err(Error::InvalidConfig("unknown".into()))),
        ];

        for (name, algor) in cases {
            assert_eq!(CongestionControlAlgorithm::from_str(name), algor);
        }
    }

    #[test]
    fn build_controller() {
        let mut conf = Config::new();
        let now = Instant::now();

        let cc = build_congestion_controller(&conf, now, "");
        assert_eq!(cc.name(), "TCPLIKE");
        assert_eq!(cc.congestion_window(), 4);

        conf.set_congestion_control_algorithm(CongestionControlAlgorithm::NoCc);
        let cc = build_congestion_controller(&conf, now, "");
        assert_eq!(cc.name(), "NOCC");
    }

    #[test]
    fn actions_merge() {
        let now = Instant::now();
        let mut a = Actions {
            disarm_timer: true,
            ..Actions::default()
        };
        assert!(!a.is_empty());

        a.merge(Actions {
            arm_timer: Some(now),
            send_requested: true,
            ..Actions::default()
        });
        assert_eq!(a.arm_timer, Some(now));
        assert!(!a.disarm_timer);
        assert!(a.send_requested);
        assert!(!a.ack_requested);

        a.merge(Actions {
            disarm_timer: true,
            ack_requested: true,
            ..Actions::default()
        });
        assert_eq!(a.arm_timer, None);
        assert!(a.disarm_timer);
        assert!(a.send_requested);
        assert!(a.ack_requested);
    }

    #[test]
    fn packet_type() {
        assert!(PacketType::Data.has_data());
        assert!(!PacketType::Data.has_ack());
        assert!(PacketType::Ack.has_ack());
        assert!(!PacketType::Ack.has_data());
        assert!(PacketType::DataAck.has_data() && PacketType::DataAck.has_ack());
    }
}

mod ack_ratio;
mod nocc;
mod receiver;
mod tcplike;
