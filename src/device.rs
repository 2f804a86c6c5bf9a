// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Addressed device handles and bus scanning.

use async_trait::async_trait;

use crate::{
    client::{Network, Request, RequestOptions, Response},
    error::Error,
    frame::FunctionCode,
    slave::{Slave, SlaveId},
};

impl Network {
    /// Returns a view of the network bound to one device address.
    pub fn device(&mut self, slave: impl Into<Slave>) -> Device<'_> {
        Device {
            bus: self,
            slave: slave.into(),
        }
    }
}

/// A [`Network`] bound to one device address.
pub struct Device<'a> {
    bus: &'a mut Network,
    slave: Slave,
}

impl Device<'_> {
    #[must_use]
    pub fn slave(&self) -> Slave {
        self.slave
    }

    /// Issues a transaction addressed to this device.
    pub async fn request(
        &mut self,
        fn_code: FunctionCode,
        req: Option<&dyn Request>,
        resp: Option<&mut dyn Response>,
        opts: &RequestOptions,
    ) -> Result<(), Error> {
        self.bus
            .request(self.slave.into(), fn_code, req, resp, opts)
            .await
    }
}

/// Probe invoked by [`scan_devices`] for every address.
#[async_trait]
pub trait DeviceProbe: Send {
    async fn probe(&mut self, slave: SlaveId, device: &mut Device<'_>) -> Result<(), Error>;
}

/// Iterates the addresses `min..=max`, issuing one probe per address.
/// Timeouts and corrupted replies mean "no device there" and continue the
/// scan; any other error stops it.
pub async fn scan_devices(
    network: &mut Network,
    min: SlaveId,
    max: SlaveId,
    probe: &mut dyn DeviceProbe,
) -> Result<(), Error> {
    for addr in min..=max {
        let mut device = network.device(addr);
        match probe.probe(addr, &mut device).await {
            Ok(()) | Err(Error::Timeout) => {}
            Err(err) if err.is_msg_invalid() => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
