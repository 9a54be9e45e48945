// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wires [`frame::rtu`](crate::frame::rtu) into a [`Client`](super::Client):
//! silence-delimited framing, no transaction id (RTU is half-duplex, one
//! outstanding request at a time).

use crate::error::Result;
use crate::frame::rtu::{encode_frame, t35_micros, RtuReceiver};
use crate::frame::OwnedAdu;
use crate::transport::Transport;

use super::{Client, ClientFramer};

/// The RTU half of [`ClientFramer`]: CRC-16 framing with T3.5 silence
/// detection, no transaction id correlation.
pub struct RtuClientFramer {
    receiver: RtuReceiver,
}

impl RtuClientFramer {
    /// Builds a framer whose silence window is derived from `baud`, unless
    /// `silence_us_override` is set.
    #[must_use]
    pub fn new(baud: u32, silence_us_override: Option<u32>) -> Self {
        Self {
            receiver: RtuReceiver::new(t35_micros(baud, silence_us_override)),
        }
    }
}

impl ClientFramer for RtuClientFramer {
    fn encode(&mut self, buf: &mut [u8], unit: u8, pdu: &[u8]) -> Result<(usize, Option<u16>)> {
        let len = encode_frame(buf, unit, pdu)?;
        Ok((len, None))
    }

    fn on_bytes(&mut self, bytes: &[u8], now_us: u64) -> Result<()> {
        self.receiver.on_bytes(bytes, now_us)
    }

    fn poll_decode(&mut self, now_us: u64) -> Option<Result<OwnedAdu>> {
        self.receiver
            .poll(now_us)
            .map(|result| result.and_then(|frame| OwnedAdu::from_adu(&frame.as_adu())))
    }
}

/// Builds an RTU-framed client. `baud`/`silence_us_override` set the T3.5
/// silence window (§4.2); see [`crate::frame::rtu::t35_micros`].
#[must_use]
pub fn new<'a, T, const N: usize, const REQ_CAP: usize, const HIGH: usize, const NORMAL: usize>(
    transport: T,
    baud: u32,
    silence_us_override: Option<u32>,
    policy: crate::qos::PriorityPolicy,
    watchdog_ms: u32,
    initial_backoff_ms: u32,
    max_backoff_ms: u32,
) -> Client<'a, T, RtuClientFramer, N, REQ_CAP, HIGH, NORMAL>
where
    T: Transport,
{
    let framer = RtuClientFramer::new(baud, silence_us_override);
    Client::new(transport, framer, policy, watchdog_ms, initial_backoff_ms, max_backoff_ms)
}
