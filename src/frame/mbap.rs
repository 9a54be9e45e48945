// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing for Modbus TCP: a 7-byte header (transaction id, protocol
//! id, length, unit id) followed by the PDU. Frame boundaries are
//! length-delimited rather than silence-based.

use crate::bytes_util::{read_u16_be, write_u16_be};
use crate::error::{Error, Result};
use crate::pdu::MAX_PDU_LEN;

use super::Adu;

const HEADER_LEN: usize = 7;

/// Maximum encoded MBAP frame: header (7) + PDU (253).
pub const MAX_MBAP_FRAME_LEN: usize = HEADER_LEN + MAX_PDU_LEN;

/// Encodes `pdu`, addressed to `unit_id` under transaction `tid`, into
/// `buf`. Returns the number of bytes written.
pub fn encode_frame(buf: &mut [u8], tid: u16, unit_id: u8, pdu: &[u8]) -> Result<usize> {
    if pdu.is_empty() || pdu.len() > MAX_PDU_LEN {
        return Err(Error::InvalidArgument("PDU length out of range for an MBAP frame"));
    }
    let length = 1 + pdu.len();
    let total = HEADER_LEN + pdu.len();
    if buf.len() < total {
        return Err(Error::InvalidArgument("buffer too small for MBAP frame"));
    }
    write_u16_be(&mut buf[0..2], tid);
    write_u16_be(&mut buf[2..4], 0);
    #[allow(clippy::cast_possible_truncation)]
    write_u16_be(&mut buf[4..6], length as u16);
    buf[6] = unit_id;
    buf[7..total].copy_from_slice(pdu);
    Ok(total)
}

/// A fully received MBAP frame, copied out of the receiver's scratch
/// buffer.
#[derive(Debug, Clone, Copy)]
pub struct DecodedFrame {
    unit_id: u8,
    transaction_id: u16,
    pdu_buf: [u8; MAX_PDU_LEN],
    pdu_len: usize,
}

impl DecodedFrame {
    /// View this decoded frame as an [`Adu`].
    #[must_use]
    pub fn as_adu(&self) -> Adu<'_> {
        Adu::tcp(self.unit_id, &self.pdu_buf[..self.pdu_len], self.transaction_id)
    }
}

/// Accumulates inbound bytes and decodes length-delimited MBAP frames.
pub struct MbapReceiver {
    buf: heapless::Vec<u8, MAX_MBAP_FRAME_LEN>,
}

impl Default for MbapReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl MbapReceiver {
    /// Creates an empty receiver.
    #[must_use]
    pub fn new() -> Self {
        Self { buf: heapless::Vec::new() }
    }

    /// Feeds newly received bytes into the receive buffer.
    ///
    /// Returns `Err(Error::NoResources)` if the buffer would overflow; the
    /// buffer is reset so the stream can resynchronize on the next frame.
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for &b in bytes {
            if self.buf.push(b).is_err() {
                self.buf.clear();
                return Err(Error::NoResources);
            }
        }
        Ok(())
    }

    /// Attempts to decode one complete frame from the buffer. Returns
    /// `None` while more bytes are still needed.
    pub fn poll(&mut self) -> Option<Result<DecodedFrame>> {
        if self.buf.len() < 6 {
            return None;
        }
        let protocol_id = read_u16_be(&self.buf[2..4]);
        let length = usize::from(read_u16_be(&self.buf[4..6]));
        if protocol_id != 0 || length < 2 || length > 254 {
            log::warn!("MBAP frame dropped: malformed header (protocol_id={protocol_id}, length={length})");
            self.buf.clear();
            return Some(Err(Error::InvalidArgument("malformed MBAP header")));
        }
        let total = HEADER_LEN - 1 + length;
        if self.buf.len() < total {
            return None;
        }
        if self.buf.len() > total {
            // Desynchronized stream: more bytes arrived than the header
            // promised. Drop and let the next silence/reconnect resync.
            self.buf.clear();
            return Some(Err(Error::Transport));
        }
        let transaction_id = read_u16_be(&self.buf[0..2]);
        let unit_id = self.buf[6];
        let pdu = &self.buf[7..total];
        let mut pdu_buf = [0u8; MAX_PDU_LEN];
        pdu_buf[..pdu.len()].copy_from_slice(pdu);
        let result = Ok(DecodedFrame {
            unit_id,
            transaction_id,
            pdu_buf,
            pdu_len: pdu.len(),
        });
        self.buf.clear();
        Some(result)
    }
}
