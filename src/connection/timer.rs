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

use std::time::Instant;

use strum::EnumCount;
use strum_macros::EnumCount;
use strum_macros::EnumIter;

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, EnumIter, EnumCount)]
pub enum Timer {
    /// When to collapse the congestion window because no ack opened it
    Retransmission,

    /// When a closed controller can be released
    Release,
}

/// Identifies one timer of one connection.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct TimerToken {
    /// Connection id.
    pub conn: u64,

    /// Timer kind.
    pub timer: Timer,
}

impl TimerToken {
    pub fn new(conn: u64, timer: Timer) -> Self {
        Self { conn, timer }
    }
}

/// The timer facility used by congestion controllers.
///
/// Scheduling an already scheduled token moves its deadline. Cancelling an
/// unknown token is a no-op. Implementations must not call back into the
/// controller from `schedule` or `cancel`.
pub trait TimerService: Send + Sync {
    /// Fire `token` at `deadline`.
    fn schedule(&self, token: TimerToken, deadline: Instant);

    /// Cancel `token`.
    fn cancel(&self, token: TimerToken);
}

/// Associated timeout values with each `Timer`
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct TimerTable {
    expires: [Option<Instant>; Timer::COUNT],
}

impl TimerTable {
    /// Set expiration time for the giver timer
    pub fn set(&mut self, timer: Timer, time: Instant) {
        self.expires[timer as usize] = Some(time);
    }

    /// Get expiration time for the giver timer
    pub fn get(&self, timer: Timer) -> Option<Instant> {
        self.expires[timer as usize]
    }

    /// Cancel the giver timer
    pub fn stop(&mut self, timer: Timer) {
        self.expires[timer as usize] = None;
    }

    /// Get the minmium expiration time of all timers
    pub fn next_timeout(&self) -> Option<Instant> {
        self.expires.iter().filter_map(|&x| x).min()
    }

    /// Check whether the given timer is expired
    pub fn is_expired(&self, timer: Timer, after: Instant) -> bool {
        self.expires[timer as usize].map_or(false, |x| x <= after)
    }
}
