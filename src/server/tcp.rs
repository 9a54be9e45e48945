// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wires [`frame::mbap`](crate::frame::mbap) into a [`Server`](super::Server):
//! length-delimited framing, responses echo the request's transaction id.

use crate::error::{Error, Result};
use crate::frame::mbap::{encode_frame, MbapReceiver};
use crate::frame::OwnedAdu;
use crate::region::RegionTable;
use crate::transport::Transport;

use super::{Server, ServerFramer};

/// The TCP half of [`ServerFramer`]: MBAP framing, echoing back whatever
/// transaction id the request carried.
#[derive(Default)]
pub struct TcpServerFramer {
    receiver: MbapReceiver,
}

impl TcpServerFramer {
    #[must_use]
    pub fn new() -> Self {
        Self { receiver: MbapReceiver::new() }
    }
}

impl ServerFramer for TcpServerFramer {
    fn on_bytes(&mut self, bytes: &[u8], _now_us: u64) -> Result<()> {
        self.receiver.on_bytes(bytes)
    }

    fn poll_decode(&mut self, _now_us: u64) -> Option<Result<OwnedAdu>> {
        self.receiver
            .poll()
            .map(|result| result.and_then(|frame| OwnedAdu::from_adu(&frame.as_adu())))
    }

    fn encode_response(&mut self, buf: &mut [u8], unit: u8, tid: Option<u16>, pdu: &[u8]) -> Result<usize> {
        let tid = tid.ok_or(Error::InvalidArgument("MBAP response requires the request's transaction id"))?;
        encode_frame(buf, tid, unit, pdu)
    }
}

/// Builds an MBAP-framed server over an already-accepted TCP connection.
#[must_use]
pub fn new<'a, T, const N: usize>(
    transport: T,
    regions: RegionTable<'a, N>,
    unit_id: u8,
    accept_gateway_wildcard: bool,
) -> Server<'a, T, TcpServerFramer, N>
where
    T: Transport,
{
    Server::new(transport, TcpServerFramer::new(), regions, unit_id, accept_gateway_wildcard)
}
