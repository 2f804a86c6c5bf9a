// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common imports.

pub use crate::client::{Bus, Network, Request, RequestOptions, Response};
pub use crate::device::{scan_devices, Device, DeviceProbe};
pub use crate::{Error, Exception, ExpectedRespLenSpec, Result, Slave, SlaveId};

#[cfg(feature = "rtu")]
pub use crate::client::rtu;

#[cfg(feature = "tcp")]
pub use crate::client::tcp;
