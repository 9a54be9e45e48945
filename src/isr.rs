// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interrupt-context intake and transmit-completion API, kept entirely
//! separate from the main state machine. Both directions ride on
//! [`heapless::spsc::Queue`], whose enqueue/dequeue pair already gives the
//! acquire/release ordering a single-producer/single-consumer ring needs —
//! no `unsafe` is required at this layer.
//!
//! Byte ordering is preserved because the ISR is the sole producer of the
//! RX ring and the main `poll()` loop is its sole consumer; the reverse
//! holds for the TX ring.

use crate::error::Error;
use crate::transport::{IoResult, Transport};

/// Outcome of feeding a chunk of bytes from interrupt context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsrRxResult {
    /// The whole chunk was accepted.
    Ok,
    /// The ring was full; `accepted` bytes (a prefix of the chunk) were
    /// still enqueued before space ran out.
    QueueFull { accepted: usize },
}

/// A lock-free byte ring fed from interrupt context and drained by the
/// main state machine's `poll()`.
pub struct IsrRxRing<const N: usize> {
    queue: heapless::spsc::Queue<u8, N>,
}

impl<const N: usize> Default for IsrRxRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> IsrRxRing<N> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: heapless::spsc::Queue::new(),
        }
    }

    /// Called from interrupt context with freshly received bytes.
    pub fn on_rx_chunk_from_isr(&mut self, bytes: &[u8]) -> IsrRxResult {
        for (i, &b) in bytes.iter().enumerate() {
            if self.queue.enqueue(b).is_err() {
                return IsrRxResult::QueueFull { accepted: i };
            }
        }
        IsrRxResult::Ok
    }

    /// Called from `poll()`: drains as many bytes as fit in `out`,
    /// returning the count actually drained.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.queue.dequeue() {
                Some(b) => {
                    out[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.len() == 0
    }
}

/// One frame queued for interrupt-driven transmission.
pub struct TxFrame<const FRAME_CAP: usize> {
    bytes: heapless::Vec<u8, FRAME_CAP>,
}

/// A ring of whole frames handed off from `poll()` to the interrupt
/// handler that drives the hardware transmitter.
pub struct IsrTxRing<const N: usize, const FRAME_CAP: usize> {
    queue: heapless::spsc::Queue<TxFrame<FRAME_CAP>, N>,
    in_flight: bool,
}

impl<const N: usize, const FRAME_CAP: usize> Default for IsrTxRing<N, FRAME_CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const FRAME_CAP: usize> IsrTxRing<N, FRAME_CAP> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: heapless::spsc::Queue::new(),
            in_flight: false,
        }
    }

    /// Called from `poll()`: hands a freshly encoded frame to the TX ring.
    pub fn push_frame(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let mut frame = TxFrame { bytes: heapless::Vec::new() };
        frame
            .bytes
            .extend_from_slice(bytes)
            .map_err(|()| Error::InvalidArgument("frame exceeds ISR TX ring's frame capacity"))?;
        self.queue
            .enqueue(frame)
            .map_err(|_| Error::NoResources)
    }

    /// Called from interrupt context: if a frame is queued and none is
    /// currently in flight, returns its bytes and marks it in flight.
    /// Returns `None` if there is nothing new to start.
    pub fn try_tx_from_isr(&mut self) -> Option<&[u8]> {
        if self.in_flight {
            return None;
        }
        let started = self.queue.peek().is_some();
        if started {
            self.in_flight = true;
        }
        self.queue.peek().map(|f| f.bytes.as_slice())
    }

    /// Called from interrupt context once hardware transmission of the
    /// current frame completes: pops it and arms the next one.
    pub fn tx_complete_from_isr(&mut self) {
        self.queue.dequeue();
        self.in_flight = false;
    }
}

/// A [`Transport`] backed by an [`IsrRxRing`]/[`IsrTxRing`] pair, so a main
/// `poll()` loop can drain interrupt-fed bytes through the same non-blocking
/// contract it uses for any other port — `Client`/`Server` never need to
/// know their bytes came from an ISR.
///
/// The interrupt handler drives [`Self::on_rx_chunk_from_isr`],
/// [`Self::try_tx_from_isr`], and [`Self::tx_complete_from_isr`]; `poll()`
/// only ever calls the [`Transport`] methods.
pub struct IsrTransport<const RX: usize, const TX: usize, const FRAME_CAP: usize> {
    rx: IsrRxRing<RX>,
    tx: IsrTxRing<TX, FRAME_CAP>,
    clock_ms: u64,
}

impl<const RX: usize, const TX: usize, const FRAME_CAP: usize> Default for IsrTransport<RX, TX, FRAME_CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const RX: usize, const TX: usize, const FRAME_CAP: usize> IsrTransport<RX, TX, FRAME_CAP> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rx: IsrRxRing::new(),
            tx: IsrTxRing::new(),
            clock_ms: 0,
        }
    }

    /// Called from interrupt context with freshly received bytes.
    pub fn on_rx_chunk_from_isr(&mut self, bytes: &[u8]) -> IsrRxResult {
        self.rx.on_rx_chunk_from_isr(bytes)
    }

    /// Called from interrupt context: starts the next queued frame's
    /// transmission if none is already in flight.
    pub fn try_tx_from_isr(&mut self) -> Option<&[u8]> {
        self.tx.try_tx_from_isr()
    }

    /// Called from interrupt context once hardware transmission completes.
    pub fn tx_complete_from_isr(&mut self) {
        self.tx.tx_complete_from_isr();
    }

    /// Advances the clock `poll()` reads through [`Transport::now_ms`].
    /// Interrupt-driven deployments typically derive this from a
    /// free-running hardware timer rather than the RX/TX rings.
    pub fn set_now_ms(&mut self, now_ms: u64) {
        self.clock_ms = now_ms;
    }
}

impl<const RX: usize, const TX: usize, const FRAME_CAP: usize> Transport for IsrTransport<RX, TX, FRAME_CAP> {
    fn send(&mut self, buf: &[u8]) -> IoResult {
        match self.tx.push_frame(buf) {
            Ok(()) => IoResult::Ok { processed: buf.len() },
            Err(Error::NoResources) => IoResult::WouldBlock { processed: 0 },
            Err(_) => IoResult::IoError,
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> IoResult {
        let processed = self.rx.drain_into(buf);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rx_ring_preserves_byte_order() {
        let mut ring: IsrRxRing<8> = IsrRxRing::new();
        assert_eq!(ring.on_rx_chunk_from_isr(&[1, 2, 3]), IsrRxResult::Ok);
        let mut out = [0u8; 3];
        assert_eq!(ring.drain_into(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn rx_ring_reports_partial_acceptance_on_overflow() {
        let mut ring: IsrRxRing<4> = IsrRxRing::new();
        // heapless spsc::Queue<T, N> has usable capacity N - 1.
        let result = ring.on_rx_chunk_from_isr(&[1, 2, 3, 4, 5]);
        assert!(matches!(result, IsrRxResult::QueueFull { accepted: 3 }));
    }

    #[test]
    fn tx_ring_starts_one_frame_at_a_time() {
        let mut ring: IsrTxRing<4, 16> = IsrTxRing::new();
        ring.push_frame(&[0xAA, 0xBB]).unwrap();
        ring.push_frame(&[0xCC]).unwrap();

        let started = ring.try_tx_from_isr().unwrap().to_vec();
        assert_eq!(started, vec![0xAA, 0xBB]);
        assert!(ring.try_tx_from_isr().is_none(), "already in flight");

        ring.tx_complete_from_isr();
        let next = ring.try_tx_from_isr().unwrap().to_vec();
        assert_eq!(next, vec![0xCC]);
    }

    #[test]
    fn isr_transport_round_trips_through_the_transport_trait() {
        let mut port: IsrTransport<8, 4, 16> = IsrTransport::new();
        assert_eq!(port.on_rx_chunk_from_isr(&[0xAA, 0xBB, 0xCC]), IsrRxResult::Ok);

        let mut buf = [0u8; 3];
        assert_eq!(port.recv(&mut buf), IoResult::Ok { processed: 3 });
        assert_eq!(buf, [0xAA, 0xBB, 0xCC]);
        assert_eq!(port.recv(&mut buf), IoResult::WouldBlock { processed: 0 });

        assert_eq!(port.send(&[0x01, 0x02]), IoResult::Ok { processed: 2 });
        let started = port.try_tx_from_isr().unwrap().to_vec();
        assert_eq!(started, vec![0x01, 0x02]);
        assert!(port.try_tx_from_isr().is_none(), "already in flight");
        port.tx_complete_from_isr();
        assert!(port.try_tx_from_isr().is_none(), "nothing else queued");

        port.set_now_ms(42);
        assert_eq!(port.now_ms(), 42);
    }
}
