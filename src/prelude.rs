// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types, re-exported for a single `use modbus_core::prelude::*;`.

///////////////////////////////////////////////////////////////////
/// Modules
///////////////////////////////////////////////////////////////////
pub use crate::client;

#[cfg(feature = "server")]
pub use crate::server;

#[allow(missing_docs)]
#[cfg(feature = "rtu")]
pub mod rtu {
    pub use crate::client::rtu::*;

    #[cfg(feature = "server")]
    pub use crate::server::rtu::*;
}

#[allow(missing_docs)]
#[cfg(feature = "tcp")]
pub mod tcp {
    pub use crate::client::tcp::*;

    #[cfg(feature = "server")]
    pub use crate::server::tcp::*;
}

///////////////////////////////////////////////////////////////////
/// Structs and enums
///////////////////////////////////////////////////////////////////
pub use crate::pdu::{Request, Response};
pub use crate::region::{CoilRegion, RegionTable, RegisterRegion};
pub use crate::slave::{Slave, SlaveId};
pub use crate::transaction::{Priority, TransactionStatus};

pub use crate::error::{Error, ExceptionCode, Result};

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::client::{Client, ClientFramer};

#[cfg(feature = "server")]
pub use crate::server::{Server, ServerFramer};

pub use crate::slave::SlaveContext;
pub use crate::transport::Transport;
