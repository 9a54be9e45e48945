// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Application Data Units: a PDU plus the addressing/framing metadata its
//! transport wraps it in. Both framers below produce and consume the same
//! borrowed view so the client/server state machines stay transport-agnostic.

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod mbap;

/// Maximum payload bytes inside one PDU (§3: `payload_len <= 252`).
pub const MAX_ADU_PAYLOAD: usize = 252;

/// A decoded Application Data Unit: a unit id plus a borrowed PDU slice.
///
/// This is the common currency both framers hand to the client/server
/// state machines; neither framer leaks its own header format beyond this
/// point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adu<'a> {
    /// The unit/slave identifier this frame was addressed to.
    pub unit_id: u8,
    /// The raw PDU bytes: function code followed by payload.
    pub pdu: &'a [u8],
    /// Present only for MBAP frames; `None` on RTU, which has no TID.
    pub transaction_id: Option<u16>,
}

impl<'a> Adu<'a> {
    /// Builds an RTU-style ADU view (no transaction id).
    #[must_use]
    pub fn rtu(unit_id: u8, pdu: &'a [u8]) -> Self {
        Self {
            unit_id,
            pdu,
            transaction_id: None,
        }
    }

    /// Builds an MBAP-style ADU view.
    #[must_use]
    pub fn tcp(unit_id: u8, pdu: &'a [u8], transaction_id: u16) -> Self {
        Self {
            unit_id,
            pdu,
            transaction_id: Some(transaction_id),
        }
    }

    /// `true` if this frame addresses the broadcast unit id (`0`).
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.unit_id == 0
    }
}

/// An ADU copied out of a framer's internal receive buffer, so it can cross
/// a trait boundary without entangling its lifetime with the framer that
/// produced it. Shared by the client and server state machines.
pub(crate) struct OwnedAdu {
    pub unit_id: u8,
    pub pdu: heapless::Vec<u8, { crate::pdu::MAX_PDU_LEN }>,
    pub transaction_id: Option<u16>,
}

impl OwnedAdu {
    pub(crate) fn from_adu(adu: &Adu<'_>) -> crate::error::Result<Self> {
        let mut pdu = heapless::Vec::new();
        pdu.extend_from_slice(adu.pdu)
            .map_err(|()| crate::error::Error::InvalidArgument("ADU payload exceeds PDU capacity"))?;
        Ok(Self {
            unit_id: adu.unit_id,
            pdu,
            transaction_id: adu.transaction_id,
        })
    }
}
