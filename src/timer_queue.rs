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

use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use priority_queue::double_priority_queue::DoublePriorityQueue;

use crate::connection::timer::TimerService;
use crate::connection::timer::TimerToken;

/// Store timers in a binary queue. Keep them sorted by which timer is going to expire first.
#[derive(Debug)]
pub struct TimerQueue {
    timers: DoublePriorityQueue<TimerToken, Instant>,
}

impl TimerQueue {
    /// Create a new TimerQueue.
    pub fn new() -> Self {
        Self {
            timers: DoublePriorityQueue::new(),
        }
    }

    /// Creates an empty timer queue with a specific capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timers: DoublePriorityQueue::with_capacity(capacity),
        }
    }

    /// Return the number of timers in the queue.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Return if the timer queue is empty.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Add a timer into the queue, replacing any existing timer if one exists.
    pub fn add(&mut self, token: TimerToken, deadline: Instant) {
        _ = self.timers.push(token, deadline);
    }

    /// Delete a timer.
    pub fn del(&mut self, token: &TimerToken) {
        _ = self.timers.remove(token);
    }

    /// Return the deadline of a timer.
    pub fn deadline(&self, token: &TimerToken) -> Option<Instant> {
        self.timers.get_priority(token).copied()
    }

    /// Return the amount of time remaining for the earliest expiring timer.
    pub fn time_remaining(&self, now: Instant) -> Option<Duration> {
        self.timers
            .peek_min()
            .map(|(_, expires_at)| expires_at.saturating_duration_since(now))
    }

    /// Return the next expired timer if any.
    pub fn next_expire(&mut self, now: Instant) -> Option<TimerToken> {
        match self.timers.peek_min() {
            Some((_, expires_at)) if *expires_at <= now => {
                self.timers.pop_min().map(|(token, _)| token)
            }
            _ => None,
        }
    }

    /// Clear all the timers
    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A timer queue shared between the controllers of an endpoint.
#[derive(Debug, Default)]
pub struct SharedTimerQueue {
    queue: Mutex<TimerQueue>,
}

impl SharedTimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn deadline(&self, token: &TimerToken) -> Option<Instant> {
        self.queue.lock().deadline(token)
    }

    pub fn time_remaining(&self, now: Instant) -> Option<Duration> {
        self.queue.lock().time_remaining(now)
    }

    /// Pop every timer expired at `now`, earliest first.
    pub fn expired(&self, now: Instant) -> Vec<TimerToken> {
        let mut queue = self.queue.lock();
        let mut tokens = Vec::new();
        while let Some(token) = queue.next_expire(now) {
            tokens.push(token);
        }
        tokens
    }
}

impl TimerService for SharedTimerQueue {
    fn schedule(&self, token: TimerToken, deadline: Instant) {
        self.queue.lock().add(token, deadline);
    }

    fn cancel(&self, token: TimerToken) {
        self.queue.lock().del(&token);
    }
}
