// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The capability interface the state machines poll instead of owning an
//! executor or a reactor. Implementers provide one value of this shape per
//! platform (a serial port, a TCP socket, a test double); the core never
//! assumes anything about how bytes actually move.

use crate::error::Error;

/// Outcome of a non-blocking transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoResult {
    /// The operation completed; `processed` bytes were moved.
    Ok {
        /// Number of bytes sent or received.
        processed: usize,
    },
    /// The operation could not complete without blocking; `processed` is
    /// always `0` for `recv`, but may be nonzero for a partial `send`.
    WouldBlock {
        /// Number of bytes already moved before the operation would block.
        processed: usize,
    },
    /// The underlying medium reported a failure.
    IoError,
}

/// The transport port consumed by the client and server state machines.
///
/// Every method must be non-blocking: an implementation backed by a real
/// socket or UART returns [`IoResult::WouldBlock`] rather than parking the
/// calling thread. `poll()` callers rely on this to keep their own
/// never-blocks contract.
pub trait Transport {
    /// Attempts to write `buf`, returning how much was accepted.
    fn send(&mut self, buf: &[u8]) -> IoResult;

    /// Attempts to fill `buf` with newly available bytes.
    fn recv(&mut self, buf: &mut [u8]) -> IoResult;

    /// Monotonic milliseconds since an arbitrary epoch (e.g. boot).
    fn now_ms(&self) -> u64;

    /// Monotonic microseconds since an arbitrary epoch. RTU framing needs
    /// sub-millisecond resolution to detect T3.5 silence accurately;
    /// implementations may derive this from the same clock as `now_ms`.
    fn now_us(&self) -> u64 {
        self.now_ms() * 1000
    }

    /// A cooperative hint that the caller has no more useful work this
    /// round. May sleep briefly on a scheduler that supports it, or be a
    /// complete no-op.
    fn yield_now(&mut self) {}

    /// Toggles a half-duplex RTU transceiver's driver-enable line. No-op
    /// for transports that are inherently full-duplex (TCP, full-duplex
    /// RS-485 bridges).
    fn set_direction(&mut self, _transmit: bool) {}
}

/// Drains `buf` fully into `transport`, returning `Ok(())` once every byte
/// has been accepted or an error/would-block condition otherwise.
///
/// This is a single attempt, not a blocking retry loop: state machines call
/// it once per `poll()` and track how much of `buf` remains unsent
/// themselves.
pub fn try_send_all(transport: &mut dyn Transport, buf: &[u8]) -> Result<usize, Error> {
    match transport.send(buf) {
        IoResult::Ok { processed } | IoResult::WouldBlock { processed } => Ok(processed),
        IoResult::IoError => Err(Error::Transport),
    }
}

/// An in-memory loopback transport for exercising framers and state
/// machines without a real socket or UART. Built for unit tests, and
/// exposed to integration tests behind the `test-support` feature.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::{IoResult, Transport};
    use heapless::Deque;

    /// An in-memory loopback pair for exercising framers and state
    /// machines without a real socket or UART.
    pub struct MemoryTransport<const N: usize> {
        pub inbound: Deque<u8, N>,
        pub outbound: Deque<u8, N>,
        pub clock_ms: u64,
        pub fail_send: bool,
        pub fail_recv: bool,
    }

    impl<const N: usize> Default for MemoryTransport<N> {
        fn default() -> Self {
            Self {
                inbound: Deque::new(),
                outbound: Deque::new(),
                clock_ms: 0,
                fail_send: false,
                fail_recv: false,
            }
        }
    }

    impl<const N: usize> MemoryTransport<N> {
        pub fn push_inbound(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.inbound.push_back(b).unwrap();
            }
        }

        pub fn take_outbound(&mut self) -> heapless::Vec<u8, N> {
            let mut out = heapless::Vec::new();
            while let Some(b) = self.outbound.pop_front() {
                out.push(b).unwrap();
            }
            out
        }

        pub fn advance_ms(&mut self, delta: u64) {
            self.clock_ms += delta;
        }
    }

    impl<const N: usize> Transport for MemoryTransport<N> {
        fn send(&mut self, buf: &[u8]) -> IoResult {
            if self.fail_send {
                return IoResult::IoError;
            }
            let mut processed = 0;
            for &b in buf {
                if self.outbound.push_back(b).is_err() {
                    break;
                }
                processed += 1;
            }
            if processed == buf.len() {
                IoResult::Ok { processed }
            } else {
                IoResult::WouldBlock { processed }
            }
        }

        fn recv(&mut self, buf: &mut [u8]) -> IoResult {
            if self.fail_recv {
                return IoResult::IoError;
            }
            let mut processed = 0;
            for slot in buf.iter_mut() {
                match self.inbound.pop_front() {
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
            self.clock_ms
        }
    }
}
