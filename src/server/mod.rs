// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The server (slave) state machine: decodes one request at a time,
//! dispatches it against a [`RegionTable`](crate::region::RegionTable), and
//! sends back the response. Like [`Client`](crate::client::Client), `poll()`
//! never blocks and advances at most one logical step per call.

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

use crate::config::ServerConfig;
use crate::diagnostics::{Diagnostics, ErrorSlot, TraceEntry, TraceEvent, TraceSource};
use crate::error::ExceptionCode;
use crate::frame::OwnedAdu;
use crate::pdu::{self, function_code as fc, Request, MAX_PDU_LEN};
use crate::region::RegionTable;
use crate::transport::{try_send_all, IoResult, Transport};

/// Large enough for either framer's worst case response frame: MBAP header
/// (7) + PDU (253), or RTU unit+PDU+CRC (1 + 253 + 2).
const MAX_FRAME_LEN: usize = 260;

/// Fixed trace ring depth for the server's own [`Diagnostics`] instance; see
/// [`crate::client::mod`]'s `CLIENT_TRACE_DEPTH` for why this isn't a const
/// generic on [`Server`] instead.
const SERVER_TRACE_DEPTH: usize = 32;

/// Maps an [`ExceptionCode`] onto the diagnostics slot it's filed under.
fn exception_slot(code: ExceptionCode) -> ErrorSlot {
    match code {
        ExceptionCode::IllegalFunction => ErrorSlot::ExceptionIllegalFunction,
        ExceptionCode::IllegalDataAddress => ErrorSlot::ExceptionIllegalDataAddress,
        ExceptionCode::IllegalDataValue => ErrorSlot::ExceptionIllegalDataValue,
        ExceptionCode::ServerDeviceFailure => ErrorSlot::ExceptionServerDeviceFailure,
    }
}

/// The transport-specific half of the server: feeds inbound bytes to the
/// framer, reports decoded request ADUs, and encodes outgoing responses.
/// RTU and TCP each implement this once so [`Server`] stays
/// transport-agnostic.
pub trait ServerFramer {
    /// Feeds freshly received bytes into the framer's receive buffer.
    fn on_bytes(&mut self, bytes: &[u8], now_us: u64) -> crate::error::Result<()>;

    /// Attempts to decode one complete request ADU. Returns `None` while
    /// more bytes are needed.
    fn poll_decode(&mut self, now_us: u64) -> Option<crate::error::Result<OwnedAdu>>;

    /// Encodes a response `pdu` addressed to `unit`, replying to `tid`
    /// (ignored by RTU). Returns the number of bytes written.
    fn encode_response(&mut self, buf: &mut [u8], unit: u8, tid: Option<u16>, pdu: &[u8]) -> crate::error::Result<usize>;
}

enum Step {
    Idle,
    Responding { frame: [u8; MAX_FRAME_LEN], len: usize, sent: usize },
}

/// Returns whether `function` is one of the function codes this server
/// implements. Anything else is answered with Illegal Function (0x01).
fn is_supported_function(function: u8) -> bool {
    matches!(
        function,
        fc::READ_COILS
            | fc::READ_DISCRETE_INPUTS
            | fc::READ_HOLDING_REGISTERS
            | fc::READ_INPUT_REGISTERS
            | fc::WRITE_SINGLE_COIL
            | fc::WRITE_SINGLE_REGISTER
            | fc::WRITE_MULTIPLE_COILS
            | fc::WRITE_MULTIPLE_REGISTERS
            | fc::READ_WRITE_MULTIPLE_REGISTERS
    )
}

/// The server state machine: one transport, one framer, one address map.
///
/// `N` is the [`RegionTable`] region capacity per namespace. Requests
/// addressed to `unit_id`, the broadcast unit `0`, and optionally the
/// gateway wildcard `0xFF` are accepted; anything else is silently
/// discarded, as if it had been addressed to a different device sharing
/// the same line.
pub struct Server<'a, T, F, const N: usize> {
    transport: T,
    framer: F,
    regions: RegionTable<'a, N>,
    unit_id: u8,
    accept_gateway_wildcard: bool,
    server_config: ServerConfig,
    diagnostics: Diagnostics<'a, SERVER_TRACE_DEPTH>,
    step: Step,
}

impl<'a, T, F, const N: usize> Server<'a, T, F, N>
where
    T: Transport,
    F: ServerFramer,
{
    /// Builds a server listening as `unit_id`, dispatching into `regions`.
    /// `accept_gateway_wildcard` additionally accepts unit id `0xFF`, the
    /// reserved address for a directly connected TCP device (§6).
    #[must_use]
    pub fn new(transport: T, framer: F, regions: RegionTable<'a, N>, unit_id: u8, accept_gateway_wildcard: bool) -> Self {
        Self {
            transport,
            framer,
            regions,
            unit_id,
            accept_gateway_wildcard,
            server_config: ServerConfig::default(),
            diagnostics: Diagnostics::new(true),
            step: Step::Idle,
        }
    }

    /// Applies per-function-code dispatch timeout overrides (§4.8).
    #[must_use]
    pub fn with_server_config(mut self, server_config: ServerConfig) -> Self {
        self.server_config = server_config;
        self
    }

    /// Gives back the region table, consuming the server.
    #[must_use]
    pub fn into_regions(self) -> RegionTable<'a, N> {
        self.regions
    }

    /// Mutable access to the address map, e.g. to update owned storage a
    /// callback region doesn't already cover.
    pub fn regions_mut(&mut self) -> &mut RegionTable<'a, N> {
        &mut self.regions
    }

    /// Read-only access to the server's diagnostics counters and trace ring.
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics<'a, SERVER_TRACE_DEPTH> {
        &self.diagnostics
    }

    /// Installs a synchronous diagnostics event sink; see
    /// [`Diagnostics::set_sink`].
    pub fn set_diagnostics_sink(&mut self, sink: &'a mut dyn FnMut(&TraceEntry)) {
        self.diagnostics.set_sink(sink);
    }

    /// Advances the state machine by one cooperative step. Never blocks.
    pub fn poll(&mut self) {
        let now_us = self.transport.now_us();
        let now_ms = self.transport.now_ms();

        let mut scratch = [0u8; MAX_FRAME_LEN];
        if let IoResult::Ok { processed } = self.transport.recv(&mut scratch) {
            if processed > 0 {
                let _ = self.framer.on_bytes(&scratch[..processed], now_us);
            }
        }

        match core::mem::replace(&mut self.step, Step::Idle) {
            Step::Idle => self.drive_idle(now_us, now_ms),
            Step::Responding { frame, len, sent } => self.drive_respond(frame, len, sent),
        }
    }

    fn accepts_unit(&self, unit: u8) -> bool {
        unit == self.unit_id || unit == 0 || (self.accept_gateway_wildcard && unit == 0xFF)
    }

    fn drive_idle(&mut self, now_us: u64, now_ms: u64) {
        let Some(result) = self.framer.poll_decode(now_us) else {
            return;
        };
        let adu = match result {
            Ok(adu) => adu,
            Err(err) => {
                log::warn!("server dropped an unparseable frame: {err}");
                self.diagnostics
                    .record(TraceSource::Server, TraceEvent::FrameRejected, 0, err.diag_slot(), now_ms);
                return;
            }
        };
        if !self.accepts_unit(adu.unit_id) {
            return;
        }
        self.dispatch(adu.unit_id, adu.transaction_id, &adu.pdu, now_ms);
    }

    fn dispatch(&mut self, unit: u8, tid: Option<u16>, request_pdu: &[u8], now_ms: u64) {
        let function = request_pdu.first().copied().unwrap_or(0);
        let broadcast = unit == 0;
        let start_us = self.transport.now_us();

        let mut outcome = if !is_supported_function(function) {
            Err(ExceptionCode::IllegalFunction)
        } else {
            match pdu::parse_request(request_pdu) {
                Ok(request) => self.execute(request),
                Err(_) => Err(ExceptionCode::IllegalDataValue),
            }
        };

        if let Some(timeout_ms) = self.server_config.timeout_for(function) {
            let elapsed_us = self.transport.now_us().saturating_sub(start_us);
            if elapsed_us > u64::from(timeout_ms) * 1000 {
                log::warn!("function 0x{function:02X} exceeded its {timeout_ms}ms per-function deadline");
                outcome = Err(ExceptionCode::ServerDeviceFailure);
            }
        }

        let slot = match &outcome {
            Ok(_) => ErrorSlot::Ok,
            Err(code) => exception_slot(*code),
        };
        self.diagnostics
            .record(TraceSource::Server, TraceEvent::Dispatch, function, slot, now_ms);

        if broadcast {
            // Broadcast requests are applied but never answered (§6).
            return;
        }

        let (response_buf, response_len) = match outcome {
            Ok(buf) => buf,
            Err(code) => {
                log::warn!("function 0x{function:02X} rejected with exception {code}");
                let mut buf = [0u8; MAX_PDU_LEN];
                let len = pdu::build_exception_response(&mut buf, function, code).unwrap_or(0);
                (buf, len)
            }
        };

        let mut frame = [0u8; MAX_FRAME_LEN];
        match self.framer.encode_response(&mut frame, unit, tid, &response_buf[..response_len]) {
            Ok(len) => self.step = Step::Responding { frame, len, sent: 0 },
            Err(_) => self.step = Step::Idle,
        }
    }

    /// Runs one request against the address map, producing a response PDU.
    fn execute(&mut self, request: Request<'_>) -> core::result::Result<([u8; MAX_PDU_LEN], usize), ExceptionCode> {
        let mut buf = [0u8; MAX_PDU_LEN];
        let len = match request {
            Request::ReadCoils { start, quantity } => {
                let mut values = [false; 2000];
                let n = usize::from(quantity);
                self.regions.read_coils(start, quantity, &mut values[..n])?;
                pdu::build_read_bits_response(&mut buf, fc::READ_COILS, &values[..n])
                    .map_err(|_| ExceptionCode::ServerDeviceFailure)?
            }
            Request::ReadDiscreteInputs { start, quantity } => {
                let mut values = [false; 2000];
                let n = usize::from(quantity);
                self.regions.read_discrete(start, quantity, &mut values[..n])?;
                pdu::build_read_bits_response(&mut buf, fc::READ_DISCRETE_INPUTS, &values[..n])
                    .map_err(|_| ExceptionCode::ServerDeviceFailure)?
            }
            Request::ReadHoldingRegisters { start, quantity } => {
                let mut values = [0u16; 125];
                let n = usize::from(quantity);
                self.regions.read_holding(start, quantity, &mut values[..n])?;
                pdu::build_read_registers_response(&mut buf, fc::READ_HOLDING_REGISTERS, &values[..n])
                    .map_err(|_| ExceptionCode::ServerDeviceFailure)?
            }
            Request::ReadInputRegisters { start, quantity } => {
                let mut values = [0u16; 125];
                let n = usize::from(quantity);
                self.regions.read_input(start, quantity, &mut values[..n])?;
                pdu::build_read_registers_response(&mut buf, fc::READ_INPUT_REGISTERS, &values[..n])
                    .map_err(|_| ExceptionCode::ServerDeviceFailure)?
            }
            Request::WriteSingleCoil { address, value } => {
                self.regions.write_coils(address, &[value])?;
                pdu::build_write_single_coil_response(&mut buf, address, value)
                    .map_err(|_| ExceptionCode::ServerDeviceFailure)?
            }
            Request::WriteSingleRegister { address, value } => {
                self.regions.write_holding(address, &[value])?;
                pdu::build_write_single_register_response(&mut buf, address, value)
                    .map_err(|_| ExceptionCode::ServerDeviceFailure)?
            }
            Request::WriteMultipleCoils { start, quantity, coils } => {
                let mut values = [false; 1968];
                let n = usize::from(quantity);
                for (i, slot) in values[..n].iter_mut().enumerate() {
                    *slot = coils.get(i).unwrap_or(false);
                }
                self.regions.write_coils(start, &values[..n])?;
                pdu::build_write_multiple_response(&mut buf, fc::WRITE_MULTIPLE_COILS, start, quantity)
                    .map_err(|_| ExceptionCode::ServerDeviceFailure)?
            }
            Request::WriteMultipleRegisters { start, registers } => {
                let mut values = [0u16; 123];
                let n = registers.len();
                for (i, slot) in values[..n].iter_mut().enumerate() {
                    *slot = registers.get(i).unwrap_or(0);
                }
                #[allow(clippy::cast_possible_truncation)]
                let quantity = n as u16;
                self.regions.write_holding(start, &values[..n])?;
                pdu::build_write_multiple_response(&mut buf, fc::WRITE_MULTIPLE_REGISTERS, start, quantity)
                    .map_err(|_| ExceptionCode::ServerDeviceFailure)?
            }
            Request::ReadWriteMultipleRegisters {
                read_start,
                read_quantity,
                write_start,
                write_registers,
            } => {
                // Writes are applied before the read, per the function's
                // defined semantics (§6).
                let mut write_values = [0u16; 121];
                let wn = write_registers.len();
                for (i, slot) in write_values[..wn].iter_mut().enumerate() {
                    *slot = write_registers.get(i).unwrap_or(0);
                }
                self.regions.write_holding(write_start, &write_values[..wn])?;

                let mut read_values = [0u16; 125];
                let rn = usize::from(read_quantity);
                self.regions.read_holding(read_start, read_quantity, &mut read_values[..rn])?;
                pdu::build_read_registers_response(&mut buf, fc::READ_WRITE_MULTIPLE_REGISTERS, &read_values[..rn])
                    .map_err(|_| ExceptionCode::ServerDeviceFailure)?
            }
        };
        Ok((buf, len))
    }

    fn drive_respond(&mut self, frame: [u8; MAX_FRAME_LEN], len: usize, sent: usize) {
        match try_send_all(&mut self.transport, &frame[sent..len]) {
            Ok(processed) => {
                let new_sent = sent + processed;
                self.step = if new_sent >= len {
                    Step::Idle
                } else {
                    Step::Responding { frame, len, sent: new_sent }
                };
            }
            Err(_) => self.step = Step::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegisterRegion;
    use crate::transport::test_support::MemoryTransport;

    /// A trivial loopback framer mirroring the client tests' one, minus
    /// transaction-id assignment (the server replies to whatever tid it
    /// was asked under).
    struct LoopbackFramer {
        inbound: heapless::Deque<u8, 512>,
    }

    impl LoopbackFramer {
        fn new() -> Self {
            Self { inbound: heapless::Deque::new() }
        }
    }

    impl ServerFramer for LoopbackFramer {
        fn on_bytes(&mut self, bytes: &[u8], _now_us: u64) -> crate::error::Result<()> {
            for &b in bytes {
                let _ = self.inbound.push_back(b);
            }
            Ok(())
        }

        fn poll_decode(&mut self, _now_us: u64) -> Option<crate::error::Result<OwnedAdu>> {
            if self.inbound.is_empty() {
                return None;
            }
            let mut pdu = heapless::Vec::new();
            while let Some(b) = self.inbound.pop_front() {
                let _ = pdu.push(b);
            }
            Some(Ok(OwnedAdu { unit_id: 1, pdu, transaction_id: Some(7) }))
        }

        fn encode_response(&mut self, buf: &mut [u8], _unit: u8, _tid: Option<u16>, pdu: &[u8]) -> crate::error::Result<usize> {
            buf[..pdu.len()].copy_from_slice(pdu);
            Ok(pdu.len())
        }
    }

    #[test]
    fn read_holding_registers_dispatches_into_owned_storage() {
        let mut storage = [10u16, 20, 30, 40];
        let mut regions: RegionTable<'_, 4> = RegionTable::new();
        regions.insert_holding(RegisterRegion::owned(0, &mut storage)).unwrap();

        let transport: MemoryTransport<512> = MemoryTransport::default();
        let framer = LoopbackFramer::new();
        let mut server = Server::new(transport, framer, regions, 1, false);

        let request = [fc::READ_HOLDING_REGISTERS, 0x00, 0x01, 0x00, 0x02];
        server.transport.push_inbound(&request);
        server.poll(); // Idle -> Responding
        server.poll(); // Responding -> Idle (loopback drains in one go)

        let out = server.transport.take_outbound();
        assert_eq!(out.as_slice(), &[fc::READ_HOLDING_REGISTERS, 0x04, 0x00, 0x14, 0x00, 0x1E]);
        assert_eq!(server.diagnostics().function_count(fc::READ_HOLDING_REGISTERS), 1);
        assert_eq!(server.diagnostics().error_count(ErrorSlot::Ok), 1);
    }

    /// A transport whose `now_us` advances on every call, standing in for a
    /// real clock so dispatch timing can be exercised deterministically.
    struct TickingTransport<const N: usize> {
        inner: MemoryTransport<N>,
        tick_us: core::cell::Cell<u64>,
    }

    impl<const N: usize> TickingTransport<N> {
        fn new() -> Self {
            Self { inner: MemoryTransport::default(), tick_us: core::cell::Cell::new(0) }
        }
    }

    impl<const N: usize> Transport for TickingTransport<N> {
        fn send(&mut self, buf: &[u8]) -> IoResult {
            self.inner.send(buf)
        }

        fn recv(&mut self, buf: &mut [u8]) -> IoResult {
            self.inner.recv(buf)
        }

        fn now_ms(&self) -> u64 {
            self.inner.now_ms()
        }

        fn now_us(&self) -> u64 {
            let now = self.tick_us.get();
            self.tick_us.set(now + 2_000);
            now
        }
    }

    #[test]
    fn per_function_timeout_override_rejects_slow_dispatch() {
        let mut storage = [10u16, 20, 30, 40];
        let mut regions: RegionTable<'_, 4> = RegionTable::new();
        regions.insert_holding(RegisterRegion::owned(0, &mut storage)).unwrap();

        let transport: TickingTransport<512> = TickingTransport::new();
        let framer = LoopbackFramer::new();
        let server_config = crate::config::ServerConfig::default().with_timeout(fc::READ_HOLDING_REGISTERS, 1);
        let mut server = Server::new(transport, framer, regions, 1, false).with_server_config(server_config);

        let request = [fc::READ_HOLDING_REGISTERS, 0x00, 0x01, 0x00, 0x02];
        server.transport.inner.push_inbound(&request);
        server.poll();
        server.poll();

        let out = server.transport.inner.take_outbound();
        assert_eq!(
            out.as_slice(),
            &[fc::READ_HOLDING_REGISTERS | fc::EXCEPTION_BIT, ExceptionCode::ServerDeviceFailure as u8]
        );
        assert_eq!(server.diagnostics().error_count(ErrorSlot::ExceptionServerDeviceFailure), 1);
    }

    #[test]
    fn illegal_address_returns_exception() {
        let mut storage = [0u16; 2];
        let mut regions: RegionTable<'_, 4> = RegionTable::new();
        regions.insert_holding(RegisterRegion::owned(0, &mut storage)).unwrap();

        let transport: MemoryTransport<512> = MemoryTransport::default();
        let framer = LoopbackFramer::new();
        let mut server = Server::new(transport, framer, regions, 1, false);

        let request = [fc::READ_HOLDING_REGISTERS, 0x00, 0x64, 0x00, 0x01];
        server.transport.push_inbound(&request);
        server.poll();
        server.poll();

        let out = server.transport.take_outbound();
        assert_eq!(out.as_slice(), &[fc::READ_HOLDING_REGISTERS | fc::EXCEPTION_BIT, ExceptionCode::IllegalDataAddress as u8]);
    }

    #[test]
    fn unsupported_function_is_illegal_function() {
        let regions: RegionTable<'_, 4> = RegionTable::new();
        let transport: MemoryTransport<512> = MemoryTransport::default();
        let framer = LoopbackFramer::new();
        let mut server = Server::new(transport, framer, regions, 1, false);

        server.transport.push_inbound(&[0x2B, 0x0E, 0x01, 0x00]);
        server.poll();
        server.poll();

        let out = server.transport.take_outbound();
        assert_eq!(out.as_slice(), &[0x2B | fc::EXCEPTION_BIT, ExceptionCode::IllegalFunction as u8]);
    }

    #[test]
    fn broadcast_request_is_applied_without_a_response() {
        let mut storage = [0u16; 4];
        let mut regions: RegionTable<'_, 4> = RegionTable::new();
        regions.insert_holding(RegisterRegion::owned(0, &mut storage)).unwrap();

        let transport: MemoryTransport<512> = MemoryTransport::default();
        let framer = LoopbackFramer::new();
        let mut server = Server::new(transport, framer, regions, 1, false);

        let request = [fc::WRITE_SINGLE_REGISTER, 0x00, 0x01, 0x00, 0x2A];
        server.transport.push_inbound(&request);
        server.poll();
        server.poll();

        assert!(server.transport.take_outbound().is_empty());
        let mut out = [0u16; 1];
        server.regions_mut().read_holding(1, 1, &mut out).unwrap();
        assert_eq!(out[0], 0x2A);
    }

    #[test]
    fn foreign_unit_id_is_ignored() {
        let regions: RegionTable<'_, 4> = RegionTable::new();
        let transport: MemoryTransport<512> = MemoryTransport::default();
        struct OtherUnitFramer(LoopbackFramer);
        impl ServerFramer for OtherUnitFramer {
            fn on_bytes(&mut self, bytes: &[u8], now_us: u64) -> crate::error::Result<()> {
                self.0.on_bytes(bytes, now_us)
            }
            fn poll_decode(&mut self, now_us: u64) -> Option<crate::error::Result<OwnedAdu>> {
                self.0.poll_decode(now_us).map(|r| {
                    r.map(|mut adu| {
                        adu.unit_id = 9;
                        adu
                    })
                })
            }
            fn encode_response(&mut self, buf: &mut [u8], unit: u8, tid: Option<u16>, pdu: &[u8]) -> crate::error::Result<usize> {
                self.0.encode_response(buf, unit, tid, pdu)
            }
        }
        let framer = OtherUnitFramer(LoopbackFramer::new());
        let mut server = Server::new(transport, framer, regions, 1, false);

        server.transport.push_inbound(&[fc::READ_HOLDING_REGISTERS, 0x00, 0x00, 0x00, 0x01]);
        server.poll();
        server.poll();
        assert!(server.transport.take_outbound().is_empty());
    }
}
