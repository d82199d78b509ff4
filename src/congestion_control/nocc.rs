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

use std::time::Instant;

use log::*;

use super::Actions;
use super::CongestionController;
use super::CongestionStats;
use super::ReceivedPacket;
use crate::options::OptionList;
use crate::seqnum::SeqNum;
use crate::Config;

/// NoCc does no congestion control at all: every packet may be sent and
/// nothing is acknowledged. It is intended to be used for testing and
/// experiments.
#[derive(Debug)]
pub struct NoCc {
    trace_id: String,

    /// Congestion statistics.
    stats: CongestionStats,
}

impl NoCc {
    pub fn new(conf: &Config, trace_id: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            stats: Default::default(),
        }
    }
}

impl CongestionController for NoCc {
    fn name(&self) -> &str {
        "NOCC"
    }

    fn send_permitted(&mut self, size: usize, now: Instant, actions: &mut Actions) -> bool {
        true
    }

    fn on_sent(
        &mut self,
        seq: SeqNum,
        size: usize,
        now: Instant,
        opts: &mut OptionList,
        actions: &mut Actions,
    ) {
        self.stats.segments_sent = self.stats.segments_sent.saturating_add(1);
        self.stats.bytes_sent = self.stats.bytes_sent.saturating_add(size as u64);
    }

    fn on_ack_received(
        &mut self,
        pkt: &ReceivedPacket,
        send_seq: SeqNum,
        now: Instant,
        actions: &mut Actions,
    ) {
        trace!(
            "{} NOCC ON_ACK seq {} ack {:?}",
            self.trace_id,
            pkt.seq,
            pkt.ack_number
        );
    }

    fn on_timeout(&mut self, now: Instant, actions: &mut Actions) {
        // Do nothing.
    }

    fn congestion_window(&self) -> u64 {
        u64::MAX
    }

    fn in_flight(&self) -> u64 {
        0
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}
