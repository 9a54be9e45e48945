// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing: `[unit][PDU][CRC-lo][CRC-hi]` with frame boundaries
//! detected by observing at least T3.5 of inter-frame silence.

use crate::bytes_util::crc16;
use crate::error::{Error, Result};
use crate::pdu::MAX_PDU_LEN;

use super::Adu;

/// Maximum encoded RTU frame: unit (1) + PDU (253) + CRC (2).
pub const MAX_RTU_FRAME_LEN: usize = 1 + MAX_PDU_LEN + 2;

/// Derives the mandatory T3.5 inter-frame silence, in microseconds.
///
/// `override_us`, when set, always wins over the derived value (§9 design
/// note: "implementers should document precedence clearly").
#[must_use]
pub fn t35_micros(baud: u32, override_us: Option<u32>) -> u32 {
    if let Some(us) = override_us {
        return us;
    }
    if baud > 19_200 {
        1750
    } else {
        // 11 bit times per character (start + 8 data + parity + stop,
        // worst case), times 3.5, converted to microseconds.
        ((11.0 / f64::from(baud)) * 3.5 * 1_000_000.0).ceil() as u32
    }
}

/// Encodes `pdu` addressed to `unit_id` into `buf`, appending the CRC-16.
/// Returns the number of bytes written.
pub fn encode_frame(buf: &mut [u8], unit_id: u8, pdu: &[u8]) -> Result<usize> {
    let len = 1 + pdu.len() + 2;
    if pdu.is_empty() || pdu.len() > MAX_PDU_LEN {
        return Err(Error::InvalidArgument("PDU length out of range for an RTU frame"));
    }
    if buf.len() < len {
        return Err(Error::InvalidArgument("buffer too small for RTU frame"));
    }
    buf[0] = unit_id;
    buf[1..1 + pdu.len()].copy_from_slice(pdu);
    let crc = crc16(&buf[..1 + pdu.len()]);
    buf[1 + pdu.len()..len].copy_from_slice(&crc.to_le_bytes());
    Ok(len)
}

/// A fully received and CRC-validated RTU frame, copied out of the
/// receiver's scratch buffer so the caller can keep accumulating bytes
/// immediately afterwards.
#[derive(Debug, Clone, Copy)]
pub struct DecodedFrame {
    unit_id: u8,
    pdu_buf: [u8; MAX_PDU_LEN],
    pdu_len: usize,
}

impl DecodedFrame {
    /// View this decoded frame as an [`Adu`].
    #[must_use]
    pub fn as_adu(&self) -> Adu<'_> {
        Adu::rtu(self.unit_id, &self.pdu_buf[..self.pdu_len])
    }
}

/// Accumulates inbound bytes and detects RTU frame boundaries by silence.
pub struct RtuReceiver {
    buf: heapless::Vec<u8, MAX_RTU_FRAME_LEN>,
    last_activity_us: u64,
    silence_us: u32,
}

impl RtuReceiver {
    /// Creates a receiver that waits `silence_us` of quiet before treating
    /// the buffered bytes as a complete frame.
    #[must_use]
    pub fn new(silence_us: u32) -> Self {
        Self {
            buf: heapless::Vec::new(),
            last_activity_us: 0,
            silence_us,
        }
    }

    /// Feeds newly received bytes into the receive buffer.
    ///
    /// Returns `Err(Error::NoResources)` if the buffer would overflow
    /// (a malformed or oversized stream); the buffer is reset so the next
    /// silence window starts clean.
    pub fn on_bytes(&mut self, bytes: &[u8], now_us: u64) -> Result<()> {
        self.last_activity_us = now_us;
        for &b in bytes {
            if self.buf.push(b).is_err() {
                self.buf.clear();
                return Err(Error::NoResources);
            }
        }
        Ok(())
    }

    /// Checks whether T3.5 silence has elapsed and, if so, attempts to
    /// decode the accumulated buffer as one RTU frame. The buffer is always
    /// cleared before returning `Some(_)`, success or failure, so the next
    /// frame starts from an empty window.
    pub fn poll(&mut self, now_us: u64) -> Option<Result<DecodedFrame>> {
        if self.buf.is_empty() {
            return None;
        }
        if now_us.saturating_sub(self.last_activity_us) < u64::from(self.silence_us) {
            return None;
        }
        let result = self.decode();
        self.buf.clear();
        Some(result)
    }

    fn decode(&self) -> Result<DecodedFrame> {
        let len = self.buf.len();
        if len < 4 {
            return Err(Error::InvalidArgument("RTU frame shorter than minimum 4 bytes"));
        }
        let crc_calc = crc16(&self.buf[..len - 2]);
        let crc_recv = u16::from_le_bytes([self.buf[len - 2], self.buf[len - 1]]);
        if crc_calc != crc_recv {
            log::warn!("RTU frame dropped: CRC mismatch (calculated 0x{crc_calc:04X}, received 0x{crc_recv:04X})");
            return Err(Error::Crc);
        }
        let unit_id = self.buf[0];
        let pdu = &self.buf[1..len - 2];
        let mut pdu_buf = [0u8; MAX_PDU_LEN];
        pdu_buf[..pdu.len()].copy_from_slice(pdu);
        Ok(DecodedFrame {
            unit_id,
            pdu_buf,
            pdu_len: pdu.len(),
        })
    }
}
