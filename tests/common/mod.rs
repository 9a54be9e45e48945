// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A pair of loopback transports wired to each other, standing in for a
//! real UART pair or TCP connection in end-to-end tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use modbus_core::transport::{IoResult, Transport};

#[derive(Clone)]
pub struct Link(Rc<RefCell<VecDeque<u8>>>);

impl Link {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(VecDeque::new())))
    }

    pub fn push(&self, bytes: &[u8]) {
        self.0.borrow_mut().extend(bytes.iter().copied());
    }

    pub fn drain(&self) -> Vec<u8> {
        self.0.borrow_mut().drain(..).collect()
    }
}

/// A [`Transport`] backed by two shared byte queues: everything written
/// with `send` becomes readable by whoever holds the other end's `inbound`
/// queue via `recv`.
pub struct LinkedTransport {
    outbound: Link,
    inbound: Link,
    clock_ms: Rc<RefCell<u64>>,
}

impl Transport for LinkedTransport {
    fn send(&mut self, buf: &[u8]) -> IoResult {
        self.outbound.push(buf);
        IoResult::Ok { processed: buf.len() }
    }

    fn recv(&mut self, buf: &mut [u8]) -> IoResult {
        let mut inbound = self.inbound.0.borrow_mut();
        let mut processed = 0;
        for slot in buf.iter_mut() {
            match inbound.pop_front() {
                Some(b) => {
                    *slot = b;
                    processed += 1;
                }
                None => break,
            }
        }
        if processed == 0 {
            IoResult::WouldBlock { processed: 0 }
        } else {
            IoResult::Ok { processed }
        }
    }

    fn now_ms(&self) -> u64 {
        *self.clock_ms.borrow()
    }
}

impl LinkedTransport {
    /// Advances the shared clock both ends of the link observe.
    pub fn advance_ms(&self, delta_ms: u64) {
        *self.clock_ms.borrow_mut() += delta_ms;
    }
}

/// A handle onto a link's shared clock, kept separately from the
/// [`LinkedTransport`]s so the test can still advance time after both ends
/// have been moved into a `Client`/`Server`.
#[derive(Clone)]
#[allow(dead_code)]
pub struct ClockHandle(Rc<RefCell<u64>>);

impl ClockHandle {
    pub fn advance_ms(&self, delta_ms: u64) {
        *self.0.borrow_mut() += delta_ms;
    }
}

/// Builds a connected pair (`client_side`, `server_side`) sharing one
/// clock, plus a [`ClockHandle`] for advancing time after both transports
/// have been handed off to a `Client`/`Server`.
#[allow(dead_code)]
pub fn linked_pair() -> (LinkedTransport, LinkedTransport, ClockHandle) {
    let a_to_b = Link::new();
    let b_to_a = Link::new();
    let clock = Rc::new(RefCell::new(0u64));
    let client_side = LinkedTransport {
        outbound: a_to_b.clone(),
        inbound: b_to_a.clone(),
        clock_ms: Rc::clone(&clock),
    };
    let server_side = LinkedTransport {
        outbound: b_to_a,
        inbound: a_to_b,
        clock_ms: Rc::clone(&clock),
    };
    (client_side, server_side, ClockHandle(clock))
}

/// Builds one [`LinkedTransport`] plus the two [`Link`] handles the test
/// keeps for itself: `to_peer` is what the transport writes with `send`,
/// `from_peer` is what it reads with `recv`.
#[allow(dead_code)]
pub fn harness_transport() -> (LinkedTransport, Link, Link) {
    let to_peer = Link::new();
    let from_peer = Link::new();
    let clock = Rc::new(RefCell::new(0u64));
    let transport = LinkedTransport {
        outbound: to_peer.clone(),
        inbound: from_peer.clone(),
        clock_ms: clock,
    };
    (transport, to_peer, from_peer)
}
