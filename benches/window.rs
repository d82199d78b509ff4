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

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;

use tcplike::ack_vector::ReceiveBuffer;
use tcplike::seqnum::SeqNum;
use tcplike::window::SegmentTracker;

const RANGE: u64 = 10_000;

pub fn tracker_insert_and_clear(c: &mut Criterion) {
    c.bench_function("tracker insert clear", |b| {
        b.iter(|| {
            let mut tracker = SegmentTracker::new(64);
            for i in 0..RANGE {
                let _ = tracker.insert(SeqNum::new(i));
                if i >= 32 {
                    tracker.clear(SeqNum::new(i - 32));
                }
            }
            tracker.population()
        })
    });
}

pub fn tracker_truncate(c: &mut Criterion) {
    c.bench_function("tracker truncate", |b| {
        b.iter(|| {
            let mut tracker = SegmentTracker::new(512);
            for i in 0..RANGE {
                let _ = tracker.insert(SeqNum::new(i));
                if i % 64 == 63 {
                    tracker.truncate_before(SeqNum::new(i - 3));
                }
            }
            tracker.population()
        })
    });
}

pub fn ack_vector_generation(c: &mut Criterion) {
    let mut buffer = ReceiveBuffer::new(512);
    for i in 0..400 {
        // Every tenth packet is lost.
        if i % 10 != 9 {
            let _ = buffer.record(SeqNum::new(i));
        }
    }

    c.bench_function("ack vector generation", |b| {
        b.iter(|| buffer.ack_vector(SeqNum::new(399)))
    });
}

criterion_group!(
    benches,
    tracker_insert_and_clear,
    tracker_truncate,
    ack_vector_generation,
);
criterion_main!(benches);
