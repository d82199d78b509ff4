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

//! TCPLIKE is an implementation of TCP-like congestion control (CCID 2) for
//! DCCP, see [RFC 4341](https://www.rfc-editor.org/rfc/rfc4341).
//!
//! ## Features
//!
//! * **Window based AIMD**: the sender keeps a congestion window counted in
//!   packets, with slow start, congestion avoidance and a halving response
//!   to loss reported in the peer's ack vectors.
//! * **Ack ratio**: the number of data packets per ack is negotiated with
//!   the peer and adapted to lost acks and to the congestion window.
//! * **Receiver half**: received packets are recorded and reported in ack
//!   vectors, which are trimmed once the peer acknowledged them.
//! * **Pluggable**: the transport and the timer facility are traits, the
//!   controller can be driven by any datagram engine.
//!
//! ## Get started
//!
//! Create an [`Endpoint`], add a connection with its [`Transport`], and ask
//! the returned [`Ccid`] handle before sending each packet. Feed the timers
//! expired at [`Endpoint::timeout`] back with [`Endpoint::on_timeout`].

#![allow(unused_imports)]
#![allow(dead_code)]

use std::cmp;
use std::time;
use std::time::Duration;

/// The default initial congestion window in packets, see RFC 4341 Section 5.
const DEFAULT_INITIAL_CWND: u64 = 4;

/// The initial retransmission timeout, see RFC 6298 Section 2.1.
const DEFAULT_INITIAL_RTO: Duration = Duration::from_secs(1);

/// The lower bound of the retransmission timeout.
const DEFAULT_MIN_RTO: Duration = Duration::from_millis(200);

/// The upper bound of the retransmission timeout.
const DEFAULT_MAX_RTO: Duration = Duration::from_secs(64);

/// The default ack ratio, see RFC 4341 Section 6.1.2.
const DEFAULT_ACK_RATIO: u64 = 2;

/// Initial capacity of the outstanding packet tracker, in packets.
const DEFAULT_TRACKER_CAPACITY: u64 = 512;

/// Initial capacity of the ack vector buffer, in packets.
const DEFAULT_ACK_VECTOR_CAPACITY: u64 = 512;

/// How long a closed controller is kept before it is released.
const DEFAULT_RELEASE_GRACE: Duration = Duration::from_secs(1);

/// The granularity of the configured timeouts.
pub const TIMER_GRANULARITY: Duration = Duration::from_millis(1);

/// A specialized [`Result`] type for tcplike operations.
///
/// This type is used throughout the public API for any operation that
/// can produce an error.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about congestion control.
#[derive(Debug, Clone)]
pub struct Config {
    /// The congestion control algorithm used by new connections.
    pub(crate) cc_algorithm: CongestionControlAlgorithm,

    /// Initial congestion window in packets.
    pub(crate) initial_cwnd: u64,

    /// Initial slow start threshold in packets.
    pub(crate) initial_ssthresh: u64,

    /// Retransmission timeout before any RTT sample.
    pub(crate) initial_rto: time::Duration,

    /// Lower bound of the retransmission timeout.
    pub(crate) min_rto: time::Duration,

    /// Upper bound of the retransmission timeout.
    pub(crate) max_rto: time::Duration,

    /// Ack ratio requested from the peer initially.
    pub(crate) initial_ack_ratio: u64,

    /// Initial capacity of the outstanding packet tracker.
    pub(crate) tracker_capacity: u64,

    /// Initial capacity of the ack vector buffer.
    pub(crate) ack_vector_capacity: u64,

    /// Delay between closing a controller and releasing it.
    pub(crate) release_grace: time::Duration,
}

impl Config {
    /// Create default configuration.
    ///
    /// The configuration may be customized by calling related set methods.
    ///
    /// ## Examples:
    ///
    /// ```
    /// let mut conf = tcplike::Config::new();
    /// conf.set_initial_cwnd(10);
    /// conf.set_min_rto(100);
    /// ```
    pub fn new() -> Self {
        Self {
            cc_algorithm: CongestionControlAlgorithm::TcpLike,
            initial_cwnd: DEFAULT_INITIAL_CWND,
            initial_ssthresh: u64::MAX,
            initial_rto: DEFAULT_INITIAL_RTO,
            min_rto: DEFAULT_MIN_RTO,
            max_rto: DEFAULT_MAX_RTO,
            initial_ack_ratio: DEFAULT_ACK_RATIO,
            tracker_capacity: DEFAULT_TRACKER_CAPACITY,
            ack_vector_capacity: DEFAULT_ACK_VECTOR_CAPACITY,
            release_grace: DEFAULT_RELEASE_GRACE,
        }
    }

    /// Set congestion control algorithm that the connection would use.
    /// The default value is TcpLike.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.cc_algorithm = cca;
    }

    /// Set the initial congestion window in packets.
    /// The default value is 4. Lower values than 1 are raised to 1.
    pub fn set_initial_cwnd(&mut self, packets: u64) {
        self.initial_cwnd = cmp::max(packets, 1);
    }

    /// Set the initial slow start threshold in packets.
    /// The default value is the maximum value of u64.
    pub fn set_initial_ssthresh(&mut self, packets: u64) {
        self.initial_ssthresh = cmp::max(packets, 1);
    }

    /// Set the initial retransmission timeout in milliseconds.
    /// The default value is 1000 milliseconds.
    pub fn set_initial_rto(&mut self, millis: u64) {
        self.initial_rto = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
    }

    /// Set the lower bound of the retransmission timeout in milliseconds.
    /// The default value is 200 milliseconds. The upper bound is raised if
    /// it falls below.
    pub fn set_min_rto(&mut self, millis: u64) {
        self.min_rto = cmp::max(Duration::from_millis(millis), TIMER_GRANULARITY);
        self.max_rto = cmp::max(self.max_rto, self.min_rto);
    }

    /// Set the upper bound of the retransmission timeout in milliseconds.
    /// The default value is 64 seconds. Values below the lower bound are
    /// raised to it.
    pub fn set_max_rto(&mut self, millis: u64) {
        self.max_rto = cmp::max(Duration::from_millis(millis), self.min_rto);
    }

    /// Set the ack ratio requested from the peer initially.
    /// The default value is 2.
    pub fn set_initial_ack_ratio(&mut self, v: u64) {
        self.initial_ack_ratio = v.clamp(1, u16::MAX as u64);
    }

    /// Set the initial capacity of the outstanding packet tracker in packets.
    /// The default value is 512.
    pub fn set_tracker_capacity(&mut self, packets: u64) {
        self.tracker_capacity = packets;
    }

    /// Set the initial capacity of the ack vector buffer in packets.
    /// The default value is 512.
    pub fn set_ack_vector_capacity(&mut self, packets: u64) {
        self.ack_vector_capacity = packets;
    }

    /// Set how long a closed controller is kept before it is released, in
    /// milliseconds. The default value is 1000 milliseconds.
    pub fn set_release_grace(&mut self, millis: u64) {
        self.release_grace = Duration::from_millis(millis);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// The datagram engine driven by the congestion controller.
///
/// The methods are called without the controller lock held, except
/// `alloc_sequence` and the sequence getters which must not call back into
/// the controller.
pub trait Transport: Send + Sync {
    /// Allocate the sequence number of the next packet to send.
    fn alloc_sequence(&self) -> SeqNum;

    /// Send a packet `seq` with `payload` and `options`. An empty payload
    /// makes a pure ack.
    fn send_datagram(&self, seq: SeqNum, payload: &[u8], options: &OptionList) -> Result<()>;

    /// The latest sequence number sent.
    fn current_send_sequence(&self) -> SeqNum;

    /// The latest sequence number received from the peer.
    fn current_receive_sequence(&self) -> SeqNum;

    /// Ask the transport to try sending queued data.
    fn request_output(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let conf = Config::default();
        assert_eq!(conf.cc_algorithm, CongestionControlAlgorithm::TcpLike);
        assert_eq!(conf.initial_cwnd, 4);
        assert_eq!(conf.initial_ssthresh, u64::MAX);
        assert_eq!(conf.initial_rto, Duration::from_secs(1));
        assert_eq!(conf.initial_ack_ratio, 2);
    }

    #[test]
    fn rto_bounds() {
        let mut conf = Config::new();

        conf.set_initial_rto(0);
        assert_eq!(conf.initial_rto, TIMER_GRANULARITY);

        conf.set_max_rto(100);
        assert_eq!(conf.max_rto, Duration::from_millis(200));

        conf.set_min_rto(500);
        assert_eq!(conf.min_rto, Duration::from_millis(500));
        assert_eq!(conf.max_rto, Duration::from_millis(500));

        conf.set_max_rto(300000);
        assert_eq!(conf.max_rto, Duration::from_secs(300));
    }

    #[test]
    fn window_settings() {
        let mut conf = Config::new();

        conf.set_initial_cwnd(0);
        assert_eq!(conf.initial_cwnd, 1);

        conf.set_initial_ssthresh(0);
        assert_eq!(conf.initial_ssthresh, 1);

        conf.set_initial_ack_ratio(0);
        assert_eq!(conf.initial_ack_ratio, 1);

        conf.set_initial_ack_ratio(u64::MAX);
        assert_eq!(conf.initial_ack_ratio, u16::MAX as u64);
    }
}

pub use crate::congestion_control::CongestionControlAlgorithm;
pub use crate::congestion_control::CongestionStats;
pub use crate::congestion_control::PacketType;
pub use crate::congestion_control::ReceivedPacket;
pub use crate::connection::Ccid;
pub use crate::endpoint::Endpoint;
pub use crate::error::Error;
pub use crate::options::DccpOption;
pub use crate::options::OptionList;
pub use crate::seqnum::SeqNum;

#[path = "connection/connection.rs"]
pub mod connection;

#[path = "congestion_control/congestion_control.rs"]
pub mod congestion_control;

pub mod ack_vector;
mod codec;
pub mod endpoint;
pub mod error;
pub mod options;
pub mod seqnum;
pub mod timer_queue;
pub mod window;
