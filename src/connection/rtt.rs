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
use std::time::Duration;

/// RTT estimation for a TCP-like sender.
/// See RFC 6298 Section 2 and RFC 4341 Section 5.
///
/// All arithmetic is done on integer microseconds with the classic shifts:
/// gain 1/8 for the smoothed RTT and 1/4 for the mean deviation.
#[derive(Debug)]
pub struct RttEstimator {
    /// The smoothed RTT in microseconds, `None` until the first sample.
    srtt: Option<i64>,

    /// The RTT mean deviation in microseconds.
    rttvar: i64,

    /// The most recent RTT sample.
    latest_rtt: Duration,

    /// The current retransmission timeout.
    rto: Duration,

    /// Lower bound of the retransmission timeout.
    min_rto: Duration,

    /// Upper bound of the retransmission timeout.
    max_rto: Duration,
}

impl RttEstimator {
    pub fn new(initial_rto: Duration, min_rto: Duration, max_rto: Duration) -> Self {
        Self {
            srtt: None,
            rttvar: 0,
            latest_rtt: Duration::ZERO,
            rto: initial_rto.clamp(min_rto, max_rto),
            min_rto,
            max_rto,
        }
    }

    /// Return the smoothed RTT, zero before the first sample.
    pub fn smoothed_rtt(&self) -> Duration {
        Duration::from_micros(self.srtt.unwrap_or(0) as u64)
    }

    /// Return the variation in the RTT samples.
    pub fn rttvar(&self) -> Duration {
        Duration::from_micros(self.rttvar as u64)
    }

    /// Return the latest rtt sample
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    /// Return the retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Whether at least one sample was taken.
    pub fn has_sample(&self) -> bool {
        self.srtt.is_some()
    }

    /// Update estimator with the given RTT sample.
    ///
    /// The timeout is floored at twice the smoothed RTT and at the lower
    /// bound, then capped at the upper bound. On a path slower than half the
    /// upper bound the cap wins and the timeout stays below `2 * srtt`.
    pub fn update(&mut self, measured: Duration) {
        self.latest_rtt = measured;
        let m = cmp::max(measured.as_micros() as i64, 1);

        let srtt = match self.srtt {
            Some(srtt) => {
                let err = m - srtt;
                let srtt = srtt + (err >> 3);
                self.rttvar = cmp::max(self.rttvar + ((err.abs() - self.rttvar) >> 2), 0);
                self.rto = Duration::from_micros((srtt + 4 * self.rttvar) as u64);
                srtt
            }
            None => {
                self.rttvar = m / 4;
                self.rto = Duration::from_micros(2 * m as u64);
                m
            }
        };
        self.srtt = Some(srtt);

        let floor = cmp::max(Duration::from_micros(2 * srtt as u64), self.min_rto);
        self.rto = cmp::min(cmp::max(self.rto, floor), self.max_rto);
    }

    /// Double the retransmission timeout after it fired.
    pub fn backoff(&mut self) {
        self.rto = cmp::min(self.rto.saturating_mul(2), self.max_rto);
    }

    #[cfg(test)]
    pub(crate) fn set_rto(&mut self, rto: Duration) {
        self.rto = rto;
    }
}
