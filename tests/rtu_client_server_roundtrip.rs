// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end exercise of a [`Client`](modbus_core::client::Client) talking
//! RTU to a [`Server`](modbus_core::server::Server): silence-delimited
//! framing with CRC-16, over a pair of linked in-memory transports.

#![cfg(all(feature = "rtu", feature = "server"))]

mod common;

use modbus_core::client::rtu as client_rtu;
use modbus_core::pdu;
use modbus_core::qos::PriorityPolicy;
use modbus_core::region::{CoilRegion, RegionTable};
use modbus_core::server::rtu as server_rtu;
use modbus_core::transaction::{Priority, TransactionStatus};

const BAUD: u32 = 19_200;
const SILENCE_US: u32 = 1_750;

#[test]
fn write_single_coil_round_trip_over_silence_delimited_frames() {
    let mut storage = [false; 8];
    let mut regions: RegionTable<'_, 4> = RegionTable::new();
    regions.insert_coil(CoilRegion::owned(0, &mut storage)).unwrap();

    let (client_transport, server_transport, clock) = common::linked_pair();

    let mut client: modbus_core::client::Client<'_, _, client_rtu::RtuClientFramer, 4, 32, 4, 8> =
        client_rtu::new(client_transport, BAUD, None, PriorityPolicy::Application, 2_000, 10, 100);
    let mut server = server_rtu::new(server_transport, BAUD, None, regions, 0x11, false);

    let mut write_pdu = [0u8; 8];
    let write_len = pdu::build_write_single_coil_request(&mut write_pdu, 2, true).unwrap();

    let mut done = None;
    let mut cb = |_id: u16, c: &modbus_core::transaction::Completion<'_>| {
        done = Some(c.status);
    };
    client
        .submit(0x11, &write_pdu[..write_len], 10_000, 2, Priority::Normal, Some(&mut cb))
        .unwrap();

    // RTU frame boundaries are silence-delimited: nudge the shared clock
    // past T3.5 between every hop so the receiving side's `poll()` treats
    // the buffered bytes as a complete frame.
    for _ in 0..10 {
        client.poll();
        server.poll();
        clock.advance_ms(u64::from(SILENCE_US) / 1000 + 1);
    }

    assert_eq!(done, Some(TransactionStatus::Done));
    let mut out = [false; 1];
    server.regions_mut().read_coils(2, 1, &mut out).unwrap();
    assert!(out[0]);
}
