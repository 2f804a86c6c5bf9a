// SPDX-FileCopyrightText: Copyright (c) 2017-2026 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An async [Modbus](https://en.wikipedia.org/wiki/Modbus) master stack
//! based on [tokio](https://tokio.rs), speaking both RTU (serial,
//! CRC-framed) and TCP (MBAP-framed) transports.
//!
//! The crate is built around a transport-neutral transaction engine
//! ([`client::Network`]): requests encode an address, function code and
//! data part; responses are matched against the request header, validated
//! against an expected-length spec and decoded. Retry, timeout, broadcast
//! turnaround and admission policies are configured per request through
//! [`client::RequestOptions`].
//!
//! Below the engine, a shared stream-to-frame [`reader`] turns the raw
//! byte stream into frames using an interceptor for in-band completion
//! detection and an inter-byte timer as fallback; the RTU and TCP framers
//! in [`codec`] supply the transport-specific message boundaries.
//!
//! # Example
//!
//! ```rust,no_run
//! use modbus_master::{client::RequestOptions, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let socket_addr = "192.168.0.222:502".parse().unwrap();
//!     let mut network = modbus_master::client::tcp::connect(socket_addr).await?;
//!
//!     let mut regs = [0u16; 7];
//!     network
//!         .device(0xFF)
//!         .read_holding_registers(0x1000, &mut regs, &RequestOptions::new())
//!         .await?;
//!     println!("Response is '{regs:?}'");
//!     Ok(())
//! }
//! ```
//!
//! # Protocol specifications
//!
//! - [MODBUS Application Protocol Specification v1.1b3 (PDF)](http://modbus.org/docs/Modbus_Application_Protocol_V1_1b3.pdf)
//! - [MODBUS over serial line specification and implementation guide v1.02 (PDF)](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf)
//! - [MODBUS Messaging on TCP/IP Implementation Guide v1.0b (PDF)](http://modbus.org/docs/Modbus_Messaging_Implementation_Guide_V1_0b.pdf)

pub mod prelude;

pub mod client;
pub mod codec;
pub mod device;
pub mod did;
pub mod mei;
pub mod reader;

mod error;
mod frame;
mod register;
mod slave;
mod stats;

pub use crate::{
    error::{Error, InvalidLenError, MismatchError, MsgContext},
    frame::{
        Adu, Exception, ExpectedRespLenSpec, FunctionCode, MsgHdr, VariableRespLenSpec,
        ERROR_MASK,
    },
    slave::{AddrKind, Slave, SlaveId},
    stats::RequestStats,
};

/// Crate-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
