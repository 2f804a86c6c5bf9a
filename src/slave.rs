// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device addressing.

use std::{fmt, num::ParseIntError, ops::RangeInclusive, str::FromStr};

/// Slave identifier, the unit address byte of a framed request.
pub type SlaveId = u8;

/// Address classes of the unit address byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrKind {
    /// One-way request to all connected devices at once. No response is
    /// expected; a transaction completes right after the turnaround delay.
    Broadcast,
    /// A single addressable device on the bus.
    Device,
    /// Reserved by the serial line specification. `0xFF` conventionally
    /// addresses a Modbus TCP device directly, bypassing gateway
    /// forwarding.
    Reserved,
}

/// A single byte addressing Modbus slave devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Slave(pub SlaveId);

impl Slave {
    /// The broadcast address. Requests sent here are one-way: the engine
    /// transmits, sleeps for the turnaround delay and reports success
    /// without touching the receive path.
    pub const BROADCAST: Self = Self(0);

    /// Addresses assignable to individual devices on a serial line.
    pub const DEVICE_ADDRS: RangeInclusive<SlaveId> = 1..=247;

    /// The conventional unit address of a directly connected Modbus TCP
    /// device.
    pub const TCP_DEVICE: Self = Self(0xFF);

    #[must_use]
    pub fn kind(self) -> AddrKind {
        match self.0 {
            0 => AddrKind::Broadcast,
            addr if Self::DEVICE_ADDRS.contains(&addr) => AddrKind::Device,
            _ => AddrKind::Reserved,
        }
    }

    /// Whether a transaction addressed this way waits for a reply at all.
    #[must_use]
    pub fn expects_response(self) -> bool {
        self.kind() != AddrKind::Broadcast
    }

    #[must_use]
    pub fn is_broadcast(self) -> bool {
        self.kind() == AddrKind::Broadcast
    }

    #[must_use]
    pub fn is_single_device(self) -> bool {
        self.kind() == AddrKind::Device
    }

    #[must_use]
    pub fn is_reserved(self) -> bool {
        self.kind() == AddrKind::Reserved
    }
}

impl From<SlaveId> for Slave {
    fn from(id: SlaveId) -> Self {
        Self(id)
    }
}

impl From<Slave> for SlaveId {
    fn from(slave: Slave) -> Self {
        slave.0
    }
}

impl FromStr for Slave {
    type Err = ParseIntError;

    /// Accepts a decimal address or a hexadecimal one prefixed with
    /// `0x`/`0X`, as commonly found in device manuals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => SlaveId::from_str_radix(hex, 16)?,
            None => s.parse()?,
        };
        Ok(Self(id))
    }
}

impl fmt::Display for Slave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::UpperHex for Slave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_classes() {
        assert_eq!(Slave::BROADCAST.kind(), AddrKind::Broadcast);
        assert_eq!(Slave(1).kind(), AddrKind::Device);
        assert_eq!(Slave(247).kind(), AddrKind::Device);
        assert_eq!(Slave(248).kind(), AddrKind::Reserved);
        assert_eq!(Slave::TCP_DEVICE.kind(), AddrKind::Reserved);

        assert!(!Slave::BROADCAST.expects_response());
        assert!(Slave(17).expects_response());
        assert!(Slave::TCP_DEVICE.expects_response());
    }

    #[test]
    fn parse() {
        assert_eq!("0".parse(), Ok(Slave::BROADCAST));
        assert_eq!("17".parse(), Ok(Slave(17)));
        assert_eq!("0x11".parse(), Ok(Slave(0x11)));
        assert_eq!("0XFF".parse(), Ok(Slave(0xFF)));
        assert!("256".parse::<Slave>().is_err());
        assert!("0x100".parse::<Slave>().is_err());
        assert!("".parse::<Slave>().is_err());
    }

    #[test]
    fn formatting() {
        assert_eq!(format!("{}", Slave(17)), "17");
        assert_eq!(format!("{:X}", Slave(0x0B)), "0B");
    }
}
