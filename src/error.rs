// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library error type and the taxonomy it implements

use core::fmt;

/// A specialized [`Result`] type for Modbus operations.
pub type Result<T> = core::result::Result<T, Error>;

/// One of the four Modbus exception codes this core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    /// 0x01 — the function code is not supported by the server.
    IllegalFunction = 0x01,
    /// 0x02 — the address (or address range) is not served by any region.
    IllegalDataAddress = 0x02,
    /// 0x03 — the value is outside the range the function code allows.
    IllegalDataValue = 0x03,
    /// 0x04 — an internal failure occurred while handling the request.
    ServerDeviceFailure = 0x04,
}

impl ExceptionCode {
    /// Parse a raw exception byte, accepting only 0x01..=0x04 as the spec requires.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::ServerDeviceFailure),
            _ => None,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::ServerDeviceFailure => "server device failure",
        };
        f.write_str(s)
    }
}

/// The error taxonomy shared by every component in this crate.
///
/// Variants map 1:1 onto the kinds documented by the error handling design:
/// `InvalidArgument` is never retried, `Timeout`/`Transport` are retried by
/// the client state machine's own policy, `Crc` is absorbed and counted, and
/// `Exception` carries a legitimate server response back to the caller.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Caller misuse: a malformed PDU, an out-of-range quantity, or a
    /// buffer too small to hold the encoded frame. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The transaction's deadline elapsed while `Waiting` for a response.
    #[error("timed out waiting for a response")]
    Timeout,

    /// The transport reported an I/O failure (peer reset, EOF, serial fault).
    #[error("transport error")]
    Transport,

    /// An RTU frame failed its CRC-16 check and was discarded.
    #[error("CRC mismatch")]
    Crc,

    /// The transaction was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,

    /// The transaction pool has no free slot, or the high-priority queue is full.
    #[error("no resources available")]
    NoResources,

    /// The normal-priority queue is full; the caller should back off and retry.
    #[error("busy")]
    Busy,

    /// The auto-heal supervisor's circuit breaker is open.
    #[error("circuit open")]
    CircuitOpen,

    /// The server returned a Modbus exception response.
    #[error("exception 0x{code:02X?} on function 0x{function:02X}")]
    Exception {
        /// The original request's function code (top bit cleared).
        function: u8,
        /// The exception code reported by the server.
        code: ExceptionCode,
    },
}

impl Error {
    /// The diagnostics slot this error increments, per the counters layout in §3.
    #[must_use]
    pub fn diag_slot(&self) -> crate::diagnostics::ErrorSlot {
        use crate::diagnostics::ErrorSlot;
        match self {
            Self::InvalidArgument(_) => ErrorSlot::InvalidArgument,
            Self::Timeout => ErrorSlot::Timeout,
            Self::Transport => ErrorSlot::Transport,
            Self::Crc => ErrorSlot::Crc,
            Self::Cancelled => ErrorSlot::Cancelled,
            Self::NoResources => ErrorSlot::NoResources,
            Self::Busy | Self::CircuitOpen => ErrorSlot::Other,
            Self::Exception { code, .. } => match code {
                ExceptionCode::IllegalFunction => ErrorSlot::ExceptionIllegalFunction,
                ExceptionCode::IllegalDataAddress => ErrorSlot::ExceptionIllegalDataAddress,
                ExceptionCode::IllegalDataValue => ErrorSlot::ExceptionIllegalDataValue,
                ExceptionCode::ServerDeviceFailure => ErrorSlot::ExceptionServerDeviceFailure,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_code_round_trip() {
        for raw in 0x01u8..=0x04 {
            let code = ExceptionCode::from_u8(raw).unwrap();
            assert_eq!(code as u8, raw);
        }
    }

    #[test]
    fn exception_code_rejects_out_of_range() {
        assert!(ExceptionCode::from_u8(0x00).is_none());
        assert!(ExceptionCode::from_u8(0x05).is_none());
        assert!(ExceptionCode::from_u8(0xFF).is_none());
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(format!("{}", Error::Busy), "busy");
        assert_eq!(
            format!("{}", ExceptionCode::IllegalDataAddress),
            "illegal data address"
        );
    }
}
