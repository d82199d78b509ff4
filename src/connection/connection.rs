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

//! Per-connection congestion control handle.

use std::sync::Arc;
use std::time;
use std::time::Instant;

use log::*;
use parking_lot::Mutex;

use self::timer::Timer;
use self::timer::TimerService;
use self::timer::TimerTable;
use self::timer::TimerToken;
use crate::congestion_control::build_congestion_controller;
use crate::congestion_control::Actions;
use crate::congestion_control::CongestionController;
use crate::congestion_control::CongestionStats;
use crate::congestion_control::ReceivedPacket;
use crate::error::Error;
use crate::options::OptionList;
use crate::seqnum::SeqNum;
use crate::Config;
use crate::Result;
use crate::Transport;

/// State guarded by the connection lock.
struct Inner {
    cc: Box<dyn CongestionController + Send>,

    /// Deadlines of the timers scheduled for this connection.
    timers: TimerTable,

    /// Whether the controller was torn down.
    closed: bool,
}

/// The congestion control handle of one connection.
///
/// Every event is processed under a per-connection lock. The controller
/// reports the side effects it wants as [`Actions`]; timers are scheduled or
/// cancelled and the transport is invoked only after the lock is released, so
/// neither may call back into a locked controller.
pub struct Ccid<T: Transport> {
    /// Connection id, unique within an endpoint.
    id: u64,

    /// Unique trace id for debug logging.
    trace_id: String,

    inner: Mutex<Inner>,

    transport: Arc<T>,

    timer_service: Arc<dyn TimerService>,

    /// How long a closed controller is kept before it is released.
    release_grace: time::Duration,
}

impl<T: Transport> Ccid<T> {
    /// Create the congestion control handle of connection `id`.
    pub fn new(
        id: u64,
        conf: &Config,
        transport: Arc<T>,
        timer_service: Arc<dyn TimerService>,
        now: Instant,
    ) -> Self {
        let trace_id = format!("CONN-{}", id);
        let cc = build_congestion_controller(conf, now, &trace_id);
        debug!("{} congestion control {} created", trace_id, cc.name());

        Ccid {
            id,
            trace_id,
            inner: Mutex::new(Inner {
                cc,
                timers: TimerTable::default(),
                closed: false,
            }),
            transport,
            timer_service,
            release_grace: conf.release_grace,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Check whether a packet of `size` bytes may be sent now. A blocked
    /// sender gets its retransmission timer armed.
    pub fn send_permitted(&self, size: usize, now: Instant) -> bool {
        let mut actions = Actions::default();
        let permitted = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            let permitted = inner.cc.send_permitted(size, now, &mut actions);
            Self::record_timer(&mut inner, &actions);
            permitted
        };

        self.apply(actions, now);
        permitted
    }

    /// Notify that data packet `seq` of `size` bytes was sent. Return the
    /// options the packet has to carry.
    pub fn notify_segment_sent(&self, seq: SeqNum, size: usize, now: Instant) -> OptionList {
        let mut opts = OptionList::new();
        let mut actions = Actions::default();
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return opts;
            }
            inner.cc.on_sent(seq, size, now, &mut opts, &mut actions);
            Self::record_timer(&mut inner, &actions);
        }

        self.apply(actions, now);
        opts
    }

    /// Notify that a packet carrying an acknowledgement was received.
    pub fn notify_ack_received(&self, pkt: &ReceivedPacket, now: Instant) {
        let send_seq = self.transport.current_send_sequence();
        let mut actions = Actions::default();
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.cc.on_ack_received(pkt, send_seq, now, &mut actions);
            Self::record_timer(&mut inner, &actions);
        }

        self.apply(actions, now);
    }

    /// Notify that a packet was received. Pure acks are reported too, they
    /// show up in our ack vectors.
    pub fn notify_data_received(&self, pkt: &ReceivedPacket, now: Instant) {
        let mut actions = Actions::default();
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.cc.on_data_received(pkt, now, &mut actions);
        }

        self.apply(actions, now);
    }

    /// Dispatch a received packet to both halves of the controller.
    pub fn notify_packet_received(&self, pkt: &ReceivedPacket, now: Instant) {
        self.notify_data_received(pkt, now);
        if pkt.kind.has_ack() {
            self.notify_ack_received(pkt, now);
        }
    }

    /// Handle the expiry of the retransmission timer. A firing is ignored
    /// unless the timer is armed and due, since a schedule issued after the
    /// lock was released may outlive the disarm that followed it.
    pub fn on_retransmission_timeout(&self, now: Instant) {
        let mut actions = Actions::default();
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                trace!("{} timer {:?} after close", self.trace_id, Timer::Retransmission);
                return;
            }
            if !inner.timers.is_expired(Timer::Retransmission, now) {
                trace!(
                    "{} timer {:?} stale, armed {:?}",
                    self.trace_id,
                    Timer::Retransmission,
                    inner.timers.get(Timer::Retransmission)
                );
                return;
            }
            trace!("{} timer {:?} timeout", self.trace_id, Timer::Retransmission);
            inner.timers.stop(Timer::Retransmission);
            inner.cc.on_timeout(now, &mut actions);
            Self::record_timer(&mut inner, &actions);
        }

        self.apply(actions, now);
    }

    /// Tear the controller down. Every later event is ignored; the
    /// controller is released by its owner once the release timer fires.
    pub fn close(&self, now: Instant) -> Result<()> {
        let release_at = now + self.release_grace;
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(Error::Done);
            }
            inner.closed = true;
            inner.timers.stop(Timer::Retransmission);
            inner.timers.set(Timer::Release, release_at);
        }

        self.timer_service
            .cancel(TimerToken::new(self.id, Timer::Retransmission));
        self.timer_service
            .schedule(TimerToken::new(self.id, Timer::Release), release_at);
        debug!("{} closed, released at {:?}", self.trace_id, release_at);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Return whether the release timer expired.
    pub fn is_released(&self, now: Instant) -> bool {
        let inner = self.inner.lock();
        inner.closed && inner.timers.is_expired(Timer::Release, now)
    }

    /// Return the earliest timer deadline of the connection.
    pub fn timeout(&self) -> Option<Instant> {
        self.inner.lock().timers.next_timeout()
    }

    pub fn congestion_window(&self) -> u64 {
        self.inner.lock().cc.congestion_window()
    }

    pub fn in_flight(&self) -> u64 {
        self.inner.lock().cc.in_flight()
    }

    pub fn ack_ratio(&self) -> Option<u64> {
        self.inner.lock().cc.ack_ratio()
    }

    pub fn stats(&self) -> CongestionStats {
        self.inner.lock().cc.stats().clone()
    }

    fn record_timer(inner: &mut Inner, actions: &Actions) {
        if let Some(deadline) = actions.arm_timer {
            inner.timers.set(Timer::Retransmission, deadline);
        } else if actions.disarm_timer {
            inner.timers.stop(Timer::Retransmission);
        }
    }

    /// Carry out the side effects of an event. Must be called without the
    /// lock held.
    fn apply(&self, actions: Actions, now: Instant) {
        let token = TimerToken::new(self.id, Timer::Retransmission);
        if let Some(deadline) = actions.arm_timer {
            self.timer_service.schedule(token, deadline);
        } else if actions.disarm_timer {
            self.timer_service.cancel(token);
        }

        if actions.ack_requested {
            if let Err(e) = self.send_ack(now) {
                warn!("{} failed to send ack: {:?}", self.trace_id, e);
            }
        }

        if actions.send_requested {
            self.transport.request_output();
        }
    }

    /// Build an ack under the lock and send it once the lock is released.
    fn send_ack(&self, now: Instant) -> Result<()> {
        let mut opts = OptionList::new();
        let seq = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(Error::InvalidState("closed".into()));
            }
            let seq = self.transport.alloc_sequence();
            let ack_number = self.transport.current_receive_sequence();
            inner.cc.write_ack(seq, ack_number, now, &mut opts);
            seq
        };

        trace!("{} send ack {} options {}", self.trace_id, seq, opts.len());
        self.transport.send_datagram(seq, &[], &opts)
    }
}

impl<T: Transport> std::fmt::Debug for Ccid<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.trace_id)
    }
}


pub mod rtt;
pub mod timer;
