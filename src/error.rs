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

//! Error type for congestion control operations.

use strum_macros::EnumIter;

/// Congestion control error.
///
/// None of these errors is fatal for the owning connection. The controller
/// absorbs them locally and at most degrades throughput.
#[derive(Clone, Debug, Default, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// There is no more work to do.
    #[default]
    Done,

    /// The provided buffer is too short.
    BufferTooShort,

    /// A ring buffer could not be grown because memory allocation failed.
    /// The previous state is left unchanged.
    ResourceExhaustion,

    /// The peer sent something that does not fit the local state, for
    /// instance a sequence gap wider than a ring buffer or a malformed ack
    /// vector run. It is treated as carrying no information.
    ProtocolAnomaly(String),

    /// An option could not be parsed.
    InvalidOption(u8),

    /// The operation cannot be completed because it was attempted in an
    /// invalid state.
    InvalidState(String),

    /// The configuration is invalid.
    InvalidConfig(String),

    /// I/O error reported by the transport.
    IoError(String),
}

impl Error {
    /// Whether the error was caused by data received from the peer.
    pub fn is_peer_error(&self) -> bool {
        matches!(self, Error::ProtocolAnomaly(_) | Error::InvalidOption(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(format!("{}", err))
    }
}
