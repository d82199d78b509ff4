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

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use log::*;
use rustc_hash::FxHashMap;

use crate::connection::timer::Timer;
use crate::connection::timer::TimerService;
use crate::connection::Ccid;
use crate::error::Error;
use crate::timer_queue::SharedTimerQueue;
use crate::Config;
use crate::Result;
use crate::Transport;

/// An endpoint owns the congestion controllers of its connections and the
/// timer queue they share.
pub struct Endpoint<T: Transport> {
    /// Configuration of new connections.
    conf: Config,

    /// Controllers indexed by connection id.
    conns: FxHashMap<u64, Arc<Ccid<T>>>,

    /// Timers of all the connections.
    timers: Arc<SharedTimerQueue>,

    /// Id of the next connection.
    next_id: u64,

    /// Unique trace id for debug logging.
    trace_id: String,
}

impl<T: Transport> Endpoint<T> {
    /// Create an endpoint with the given configuration.
    pub fn new(conf: Config) -> Self {
        Self {
            conf,
            conns: FxHashMap::default(),
            timers: Arc::new(SharedTimerQueue::new()),
            next_id: 0,
            trace_id: "ENDPOINT".to_string(),
        }
    }

    /// Create the congestion controller of a new connection.
    pub fn add(&mut self, transport: Arc<T>, now: Instant) -> Arc<Ccid<T>> {
        let id = self.next_id;
        self.next_id += 1;

        let timers: Arc<dyn TimerService> = self.timers.clone();
        let ccid = Arc::new(Ccid::new(id, &self.conf, transport, timers, now));
        self.conns.insert(id, ccid.clone());
        trace!("{} add connection {}", self.trace_id, id);
        ccid
    }

    /// Return the controller of connection `id`.
    pub fn get(&self, id: u64) -> Option<Arc<Ccid<T>>> {
        self.conns.get(&id).cloned()
    }

    /// Close the controller of connection `id`. It is released after the
    /// grace interval.
    pub fn close(&mut self, id: u64, now: Instant) -> Result<()> {
        match self.conns.get(&id) {
            Some(ccid) => ccid.close(now),
            None => Err(Error::InvalidState(format!("unknown connection {}", id))),
        }
    }

    /// Return the number of connections, including closed ones not yet
    /// released.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Return the amount of time until the next timeout event.
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        self.timers.time_remaining(now)
    }

    /// Process the timers expired at `now`.
    pub fn on_timeout(&mut self, now: Instant) {
        for token in self.timers.expired(now) {
            let ccid = match self.conns.get(&token.conn) {
                Some(ccid) => ccid.clone(),
                None => {
                    trace!("{} timer {:?} of a released connection", self.trace_id, token);
                    continue;
                }
            };

            match token.timer {
                Timer::Retransmission => ccid.on_retransmission_timeout(now),

                Timer::Release => {
                    if ccid.is_closed() {
                        self.conns.remove(&token.conn);
                        debug!("{} connection {} released", self.trace_id, token.conn);
                    }
                }
            }
        }
    }
}

impl<T: Transport> std::fmt::Debug for Endpoint<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} conns {}", self.trace_id, self.conns.len())
    }
}
