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

#![no_main]

use libfuzzer_sys::fuzz_target;

use tcplike::options::OptionList;
use tcplike::SeqNum;

fuzz_target!(|data: &[u8]| {
    let opts = OptionList::parse(data);
    if let Some(vector) = opts.ack_vector() {
        for _ in vector.iter(SeqNum::new(1 << 40)) {}
    }

    if let Ok(opts) = OptionList::from_bytes(data) {
        let mut buf = vec![0; opts.wire_len()];
        let _ = opts.to_bytes(&mut buf);
    }
});
