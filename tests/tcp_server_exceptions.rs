// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drives a [`Server`](modbus_core::server::Server) with hand-built MBAP
//! frames to exercise exception generation, broadcast handling, and unit-id
//! acceptance without needing a full client on the other end.

#![cfg(all(feature = "tcp", feature = "server"))]

mod common;

use modbus_core::error::ExceptionCode;
use modbus_core::frame::mbap::{encode_frame, MAX_MBAP_FRAME_LEN};
use modbus_core::pdu::function_code as fc;
use modbus_core::region::{RegionTable, RegisterRegion};
use modbus_core::server::tcp as server_tcp;

fn send_request(from_peer: &common::Link, tid: u16, unit: u8, pdu: &[u8]) {
    let mut frame = [0u8; MAX_MBAP_FRAME_LEN];
    let len = encode_frame(&mut frame, tid, unit, pdu).unwrap();
    from_peer.push(&frame[..len]);
}

#[test]
fn unsupported_function_code_is_illegal_function() {
    let regions: RegionTable<'_, 4> = RegionTable::new();
    let (transport, to_peer, from_peer) = common::harness_transport();
    let mut server = server_tcp::new(transport, regions, 0x01, false);

    send_request(&from_peer, 1, 0x01, &[0x2B, 0x0E, 0x01, 0x00]);
    for _ in 0..4 {
        server.poll();
    }

    let frame = to_peer.drain();
    let pdu = &frame[7..];
    assert_eq!(pdu, &[0x2B | fc::EXCEPTION_BIT, ExceptionCode::IllegalFunction as u8]);
}

#[test]
fn out_of_range_address_is_illegal_data_address() {
    let mut storage = [0u16; 4];
    let mut regions: RegionTable<'_, 4> = RegionTable::new();
    regions.insert_holding(RegisterRegion::owned(0, &mut storage)).unwrap();
    let (transport, to_peer, from_peer) = common::harness_transport();
    let mut server = server_tcp::new(transport, regions, 0x01, false);

    // Holding registers only span 0..4; ask for register 100.
    send_request(&from_peer, 9, 0x01, &[fc::READ_HOLDING_REGISTERS, 0x00, 0x64, 0x00, 0x01]);
    for _ in 0..4 {
        server.poll();
    }

    let frame = to_peer.drain();
    assert_eq!(&frame[0..2], &[0x00, 0x09], "response must echo the request's transaction id");
    let pdu = &frame[7..];
    assert_eq!(pdu, &[fc::READ_HOLDING_REGISTERS | fc::EXCEPTION_BIT, ExceptionCode::IllegalDataAddress as u8]);
}

#[test]
fn malformed_pdu_is_illegal_data_value() {
    let regions: RegionTable<'_, 4> = RegionTable::new();
    let (transport, to_peer, from_peer) = common::harness_transport();
    let mut server = server_tcp::new(transport, regions, 0x01, false);

    // A supported function code, but the request is truncated.
    send_request(&from_peer, 1, 0x01, &[fc::READ_HOLDING_REGISTERS, 0x00, 0x00]);
    for _ in 0..4 {
        server.poll();
    }

    let frame = to_peer.drain();
    let pdu = &frame[7..];
    assert_eq!(pdu, &[fc::READ_HOLDING_REGISTERS | fc::EXCEPTION_BIT, ExceptionCode::IllegalDataValue as u8]);
}

#[test]
fn broadcast_unit_zero_is_applied_but_never_answered() {
    let mut storage = [0u16; 4];
    let mut regions: RegionTable<'_, 4> = RegionTable::new();
    regions.insert_holding(RegisterRegion::owned(0, &mut storage)).unwrap();
    let (transport, to_peer, from_peer) = common::harness_transport();
    let mut server = server_tcp::new(transport, regions, 0x01, false);

    send_request(&from_peer, 1, 0x00, &[fc::WRITE_SINGLE_REGISTER, 0x00, 0x01, 0x00, 0x2A]);
    for _ in 0..4 {
        server.poll();
    }

    assert!(to_peer.drain().is_empty(), "broadcast requests must never be answered");
    let mut out = [0u16; 1];
    server.regions_mut().read_holding(1, 1, &mut out).unwrap();
    assert_eq!(out[0], 0x2A, "broadcast write must still be applied");
}

#[test]
fn foreign_unit_id_is_silently_discarded() {
    let regions: RegionTable<'_, 4> = RegionTable::new();
    let (transport, to_peer, from_peer) = common::harness_transport();
    let mut server = server_tcp::new(transport, regions, 0x01, false);

    send_request(&from_peer, 1, 0x09, &[fc::READ_HOLDING_REGISTERS, 0x00, 0x00, 0x00, 0x01]);
    for _ in 0..4 {
        server.poll();
    }

    assert!(to_peer.drain().is_empty(), "a request for a different unit id must be ignored, not answered");
}

#[test]
fn gateway_wildcard_unit_is_accepted_only_when_enabled() {
    let mut storage = [7u16; 2];
    let mut regions: RegionTable<'_, 4> = RegionTable::new();
    regions.insert_holding(RegisterRegion::owned(0, &mut storage)).unwrap();
    let (transport, to_peer, from_peer) = common::harness_transport();
    let mut server = server_tcp::new(transport, regions, 0x01, true);

    send_request(&from_peer, 3, 0xFF, &[fc::READ_HOLDING_REGISTERS, 0x00, 0x00, 0x00, 0x01]);
    for _ in 0..4 {
        server.poll();
    }

    let frame = to_peer.drain();
    assert!(!frame.is_empty(), "0xFF must be accepted when accept_gateway_wildcard is set");
    let pdu = &frame[7..];
    assert_eq!(pdu, &[fc::READ_HOLDING_REGISTERS, 0x02, 0x00, 0x07]);
}
