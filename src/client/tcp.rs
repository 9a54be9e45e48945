// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wires [`frame::mbap`](crate::frame::mbap) into a
//! [`Client`](super::Client): length-delimited framing with a wrapping,
//! zero-skipping transaction id per request (§4.2).

use crate::error::Result;
use crate::frame::mbap::{encode_frame, MbapReceiver};
use crate::frame::OwnedAdu;
use crate::transport::Transport;

use super::{Client, ClientFramer};

/// The TCP half of [`ClientFramer`]: MBAP framing plus a monotonic
/// transaction-id counter.
pub struct TcpClientFramer {
    receiver: MbapReceiver,
    next_tid: u16,
}

impl Default for TcpClientFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpClientFramer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            receiver: MbapReceiver::new(),
            next_tid: 1,
        }
    }

    /// Hands out the next transaction id, wrapping from `u16::MAX` back to
    /// `1` so `0` is never assigned.
    fn advance_tid(&mut self) -> u16 {
        let tid = self.next_tid;
        self.next_tid = if tid == u16::MAX { 1 } else { tid + 1 };
        tid
    }
}

impl ClientFramer for TcpClientFramer {
    fn encode(&mut self, buf: &mut [u8], unit: u8, pdu: &[u8]) -> Result<(usize, Option<u16>)> {
        let tid = self.advance_tid();
        let len = encode_frame(buf, tid, unit, pdu)?;
        Ok((len, Some(tid)))
    }

    fn on_bytes(&mut self, bytes: &[u8], _now_us: u64) -> Result<()> {
        self.receiver.on_bytes(bytes)
    }

    fn poll_decode(&mut self, _now_us: u64) -> Option<Result<OwnedAdu>> {
        self.receiver
            .poll()
            .map(|result| result.and_then(|frame| OwnedAdu::from_adu(&frame.as_adu())))
    }
}

/// Builds an MBAP-framed client over an already-connected TCP transport.
#[must_use]
pub fn new<'a, T, const N: usize, const REQ_CAP: usize, const HIGH: usize, const NORMAL: usize>(
    transport: T,
    policy: crate::qos::PriorityPolicy,
    watchdog_ms: u32,
    initial_backoff_ms: u32,
    max_backoff_ms: u32,
) -> Client<'a, T, TcpClientFramer, N, REQ_CAP, HIGH, NORMAL>
where
    T: Transport,
{
    Client::new(transport, TcpClientFramer::new(), policy, watchdog_ms, initial_backoff_ms, max_backoff_ms)
}
