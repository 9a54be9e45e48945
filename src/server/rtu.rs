// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wires [`frame::rtu`](crate::frame::rtu) into a [`Server`](super::Server):
//! silence-delimited framing, responses addressed with the requester's unit
//! id and no transaction id.

use crate::error::Result;
use crate::frame::rtu::{encode_frame, t35_micros, RtuReceiver};
use crate::frame::OwnedAdu;
use crate::region::RegionTable;
use crate::transport::Transport;

use super::{Server, ServerFramer};

/// The RTU half of [`ServerFramer`]: CRC-16 framing with T3.5 silence
/// detection.
pub struct RtuServerFramer {
    receiver: RtuReceiver,
}

impl RtuServerFramer {
    /// Builds a framer whose silence window is derived from `baud`, unless
    /// `silence_us_override` is set.
    #[must_use]
    pub fn new(baud: u32, silence_us_override: Option<u32>) -> Self {
        Self {
            receiver: RtuReceiver::new(t35_micros(baud, silence_us_override)),
        }
    }
}

impl ServerFramer for RtuServerFramer {
    fn on_bytes(&mut self, bytes: &[u8], now_us: u64) -> Result<()> {
        self.receiver.on_bytes(bytes, now_us)
    }

    fn poll_decode(&mut self, now_us: u64) -> Option<Result<OwnedAdu>> {
        self.receiver
            .poll(now_us)
            .map(|result| result.and_then(|frame| OwnedAdu::from_adu(&frame.as_adu())))
    }

    fn encode_response(&mut self, buf: &mut [u8], unit: u8, _tid: Option<u16>, pdu: &[u8]) -> Result<usize> {
        encode_frame(buf, unit, pdu)
    }
}

/// Builds an RTU-framed server. `baud`/`silence_us_override` set the T3.5
/// silence window (§4.2); see [`crate::frame::rtu::t35_micros`].
#[must_use]
pub fn new<'a, T, const N: usize>(
    transport: T,
    baud: u32,
    silence_us_override: Option<u32>,
    regions: RegionTable<'a, N>,
    unit_id: u8,
    accept_gateway_wildcard: bool,
) -> Server<'a, T, RtuServerFramer, N>
where
    T: Transport,
{
    let framer = RtuServerFramer::new(baud, silence_us_override);
    Server::new(transport, framer, regions, unit_id, accept_gateway_wildcard)
}
