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

//! DCCP options used by the congestion controllers.
//! See RFC 4340 Section 5.8.

use log::*;
use smallvec::SmallVec;

use crate::ack_vector::AckVector;
use crate::codec::Decoder;
use crate::codec::Encoder;
use crate::error::Error;
use crate::Result;

pub const OPT_PADDING: u8 = 0;
pub const OPT_MANDATORY: u8 = 1;
pub const OPT_SLOW_RECEIVER: u8 = 2;
pub const OPT_CHANGE_L: u8 = 32;
pub const OPT_CONFIRM_L: u8 = 33;
pub const OPT_CHANGE_R: u8 = 34;
pub const OPT_CONFIRM_R: u8 = 35;
pub const OPT_NDP_COUNT: u8 = 37;
pub const OPT_ACK_VECTOR_NONCE0: u8 = 38;
pub const OPT_ACK_VECTOR_NONCE1: u8 = 39;
pub const OPT_DATA_DROPPED: u8 = 40;
pub const OPT_TIMESTAMP: u8 = 41;
pub const OPT_TIMESTAMP_ECHO: u8 = 42;
pub const OPT_ELAPSED_TIME: u8 = 43;

/// Options below this type are a single byte long.
const SINGLE_BYTE_LIMIT: u8 = 32;

/// The largest option, including the type and length bytes.
pub const MAX_OPTION_LEN: usize = 255;

/// Feature numbers, see RFC 4340 Section 6.4.
pub const FEATURE_CCID: u8 = 1;
pub const FEATURE_ACK_RATIO: u8 = 5;
pub const FEATURE_SEND_ACK_VECTOR: u8 = 6;

/// Feature negotiation option kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureOp {
    ChangeL,
    ConfirmL,
    ChangeR,
    ConfirmR,
}

impl FeatureOp {
    fn to_type(self) -> u8 {
        match self {
            FeatureOp::ChangeL => OPT_CHANGE_L,
            FeatureOp::ConfirmL => OPT_CONFIRM_L,
            FeatureOp::ChangeR => OPT_CHANGE_R,
            FeatureOp::ConfirmR => OPT_CONFIRM_R,
        }
    }
}

/// A DCCP option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DccpOption {
    Padding,

    Mandatory,

    SlowReceiver,

    /// Change/Confirm L/R of a feature.
    Feature {
        op: FeatureOp,
        feature: u8,
        value: SmallVec<[u8; 4]>,
    },

    /// Ack vector, the nonce selects option type 38 or 39.
    AckVector { nonce: bool, vector: AckVector },

    /// Timestamp in units of 10 microseconds.
    Timestamp(u32),

    /// Echo of a received timestamp, with the time the receiver held it in
    /// units of 10 microseconds.
    TimestampEcho { timestamp: u32, elapsed: u32 },

    /// Elapsed time in units of 10 microseconds.
    ElapsedTime(u32),

    /// Any other option, carried opaquely.
    Unknown { kind: u8, data: SmallVec<[u8; 8]> },
}

impl DccpOption {
    /// Build the option that asks the peer to use `ratio` as its ack ratio.
    pub fn change_ack_ratio(ratio: u16) -> DccpOption {
        DccpOption::Feature {
            op: FeatureOp::ChangeR,
            feature: FEATURE_ACK_RATIO,
            value: SmallVec::from_slice(&ratio.to_be_bytes()),
        }
    }

    /// Build the option confirming the ack ratio chosen by the peer.
    pub fn confirm_ack_ratio(ratio: u16) -> DccpOption {
        DccpOption::Feature {
            op: FeatureOp::ConfirmL,
            feature: FEATURE_ACK_RATIO,
            value: SmallVec::from_slice(&ratio.to_be_bytes()),
        }
    }

    /// Return the option type byte.
    pub fn kind(&self) -> u8 {
        match self {
            DccpOption::Padding => OPT_PADDING,
            DccpOption::Mandatory => OPT_MANDATORY,
            DccpOption::SlowReceiver => OPT_SLOW_RECEIVER,
            DccpOption::Feature { op, .. } => op.to_type(),
            DccpOption::AckVector { nonce: false, .. } => OPT_ACK_VECTOR_NONCE0,
            DccpOption::AckVector { nonce: true, .. } => OPT_ACK_VECTOR_NONCE1,
            DccpOption::Timestamp(_) => OPT_TIMESTAMP,
            DccpOption::TimestampEcho { .. } => OPT_TIMESTAMP_ECHO,
            DccpOption::ElapsedTime(_) => OPT_ELAPSED_TIME,
            DccpOption::Unknown { kind, .. } => *kind,
        }
    }

    /// Decode an option from the front of `buf`, returning it with the
    /// number of bytes consumed.
    pub fn from_bytes(buf: &[u8]) -> Result<(DccpOption, usize)> {
        let mut b = buf;
        let kind = b.read_u8()?;

        if kind < SINGLE_BYTE_LIMIT {
            let opt = match kind {
                OPT_PADDING => DccpOption::Padding,
                OPT_MANDATORY => DccpOption::Mandatory,
                OPT_SLOW_RECEIVER => DccpOption::SlowReceiver,
                _ => DccpOption::Unknown {
                    kind,
                    data: SmallVec::new(),
                },
            };
            return Ok((opt, 1));
        }

        let len = b.read_u8()? as usize;
        if len < 2 {
            return Err(Error::InvalidOption(kind));
        }
        if b.len() < len - 2 {
            return Err(Error::BufferTooShort);
        }
        let mut data = &b[..len - 2];

        let opt = match kind {
            OPT_CHANGE_L | OPT_CONFIRM_L | OPT_CHANGE_R | OPT_CONFIRM_R => {
                let op = match kind {
                    OPT_CHANGE_L => FeatureOp::ChangeL,
                    OPT_CONFIRM_L => FeatureOp::ConfirmL,
                    OPT_CHANGE_R => FeatureOp::ChangeR,
                    _ => FeatureOp::ConfirmR,
                };
                let feature = data.read_u8().map_err(|_| Error::InvalidOption(kind))?;
                DccpOption::Feature {
                    op,
                    feature,
                    value: SmallVec::from_slice(data),
                }
            }

            OPT_ACK_VECTOR_NONCE0 | OPT_ACK_VECTOR_NONCE1 => DccpOption::AckVector {
                nonce: kind == OPT_ACK_VECTOR_NONCE1,
                vector: AckVector::from_bytes(data)?,
            },

            OPT_TIMESTAMP => {
                if data.len() != 4 {
                    return Err(Error::InvalidOption(kind));
                }
                DccpOption::Timestamp(data.read_u32()?)
            }

            OPT_TIMESTAMP_ECHO => {
                let timestamp = data.read_u32().map_err(|_| Error::InvalidOption(kind))?;
                let elapsed = match data.len() {
                    0 => 0,
                    2 => data.read_u16()? as u32,
                    4 => data.read_u32()?,
                    _ => return Err(Error::InvalidOption(kind)),
                };
                DccpOption::TimestampEcho { timestamp, elapsed }
            }

            OPT_ELAPSED_TIME => match data.len() {
                2 => DccpOption::ElapsedTime(data.read_u16()? as u32),
                4 => DccpOption::ElapsedTime(data.read_u32()?),
                _ => return Err(Error::InvalidOption(kind)),
            },

            _ => DccpOption::Unknown {
                kind,
                data: SmallVec::from_slice(data),
            },
        };

        Ok((opt, len))
    }

    /// Encode the option into `buf`, returning the number of bytes written.
    pub fn to_bytes(&self, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        let mut b = buf;

        let wire_len = self.wire_len();
        if wire_len > MAX_OPTION_LEN {
            return Err(Error::InvalidOption(self.kind()));
        }

        b.write_u8(self.kind())?;
        if wire_len == 1 {
            return Ok(1);
        }
        b.write_u8(wire_len as u8)?;

        match self {
            DccpOption::Padding | DccpOption::Mandatory | DccpOption::SlowReceiver => (),

            DccpOption::Feature { feature, value, .. } => {
                b.write_u8(*feature)?;
                b.write(value)?;
            }

            DccpOption::AckVector { vector, .. } => {
                b.write(vector.as_bytes())?;
            }

            DccpOption::Timestamp(ts) => {
                b.write_u32(*ts)?;
            }

            DccpOption::TimestampEcho { timestamp, elapsed } => {
                b.write_u32(*timestamp)?;
                b.write_u32(*elapsed)?;
            }

            DccpOption::ElapsedTime(elapsed) => {
                b.write_u32(*elapsed)?;
            }

            DccpOption::Unknown { data, .. } => {
                b.write(data)?;
            }
        }

        Ok(len - b.len())
    }

    /// Return the encoded length of the option.
    pub fn wire_len(&self) -> usize {
        match self {
            DccpOption::Padding | DccpOption::Mandatory | DccpOption::SlowReceiver => 1,
            DccpOption::Feature { value, .. } => 3 + value.len(),
            DccpOption::AckVector { vector, .. } => 2 + vector.as_bytes().len(),
            DccpOption::Timestamp(_) => 6,
            DccpOption::TimestampEcho { .. } => 10,
            DccpOption::ElapsedTime(_) => 6,
            DccpOption::Unknown { kind, data } => {
                if *kind < SINGLE_BYTE_LIMIT {
                    1
                } else {
                    2 + data.len()
                }
            }
        }
    }
}

/// The options of one packet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionList {
    opts: SmallVec<[DccpOption; 4]>,
}

impl OptionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, opt: DccpOption) {
        self.opts.push(opt);
    }

    pub fn extend<I: IntoIterator<Item = DccpOption>>(&mut self, iter: I) {
        self.opts.extend(iter);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DccpOption> {
        self.opts.iter()
    }

    pub fn len(&self) -> usize {
        self.opts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opts.is_empty()
    }

    /// Decode every option in `buf`. Any malformed option fails the whole
    /// list.
    pub fn from_bytes(buf: &[u8]) -> Result<OptionList> {
        let mut list = OptionList::new();
        let mut b = buf;
        while !b.is_empty() {
            let (opt, len) = DccpOption::from_bytes(b)?;
            if opt != DccpOption::Padding {
                list.push(opt);
            }
            b = &b[len..];
        }
        Ok(list)
    }

    /// Decode the options in `buf`, skipping options with an invalid body and
    /// stopping at the first option whose length runs past the buffer.
    pub fn parse(buf: &[u8]) -> OptionList {
        let mut list = OptionList::new();
        let mut b = buf;
        while !b.is_empty() {
            let kind = b[0];
            match DccpOption::from_bytes(b) {
                Ok((opt, len)) => {
                    if opt != DccpOption::Padding {
                        list.push(opt);
                    }
                    b = &b[len..];
                }
                Err(e) => {
                    let len = if kind < SINGLE_BYTE_LIMIT {
                        1
                    } else {
                        b.get(1).map_or(0, |l| *l as usize)
                    };
                    if len < 2 || len > b.len() {
                        debug!("option {} truncated, stop parsing: {:?}", kind, e);
                        break;
                    }
                    debug!("option {} skipped: {:?}", kind, e);
                    b = &b[len..];
                }
            }
        }
        list
    }

    /// Encode the options into `buf`, padded to a multiple of four bytes.
    pub fn to_bytes(&self, buf: &mut [u8]) -> Result<usize> {
        let mut len = 0;
        for opt in self.opts.iter() {
            len += opt.to_bytes(&mut buf[len..])?;
        }
        while len % 4 != 0 {
            let mut b = &mut buf[len..];
            len += b.write_u8(OPT_PADDING)?;
        }
        Ok(len)
    }

    /// Return the encoded length including padding.
    pub fn wire_len(&self) -> usize {
        let len: usize = self.opts.iter().map(|o| o.wire_len()).sum();
        (len + 3) & !3
    }

    /// Return the first Timestamp option.
    pub fn timestamp(&self) -> Option<u32> {
        self.opts.iter().find_map(|o| match o {
            DccpOption::Timestamp(ts) => Some(*ts),
            _ => None,
        })
    }

    /// Return the first Timestamp Echo option as `(timestamp, elapsed)`.
    pub fn timestamp_echo(&self) -> Option<(u32, u32)> {
        self.opts.iter().find_map(|o| match o {
            DccpOption::TimestampEcho { timestamp, elapsed } => Some((*timestamp, *elapsed)),
            _ => None,
        })
    }

    /// Return the first Ack Vector option.
    pub fn ack_vector(&self) -> Option<&AckVector> {
        self.opts.iter().find_map(|o| match o {
            DccpOption::AckVector { vector, .. } => Some(vector),
            _ => None,
        })
    }

    /// Return the value of the first feature option of kind `op` for
    /// `feature`.
    pub fn feature(&self, op: FeatureOp, feature: u8) -> Option<&[u8]> {
        self.opts.iter().find_map(|o| match o {
            DccpOption::Feature {
                op: o_op,
                feature: f,
                value,
            } if *o_op == op && *f == feature => Some(&value[..]),
            _ => None,
        })
    }
}

impl FromIterator<DccpOption> for OptionList {
    fn from_iter<I: IntoIterator<Item = DccpOption>>(iter: I) -> Self {
        OptionList {
            opts: iter.into_iter().collect(),
        }
    }
}

/// Read a feature value as an unsigned big-endian integer.
pub fn feature_value(value: &[u8]) -> Option<u64> {
    if value.is_empty() || value.len() > 8 {
        return None;
    }
    Some(value.iter().fold(0, |v, b| (v << 8) | *b as u64))
}
