#![cfg_attr(docsrs, feature(doc_cfg))]
//! # silbms_lib
//!
//! This crate implements the wire protocol of SIL battery management systems
//! reached over Bluetooth Low Energy: command frames, response decoding,
//! reassembly of notification chunks and a session manager that serializes
//! requests on the single physical link.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `silbms` command-line tool.
//!
//! ### Transport Features
//! - `ble`: Enables the [`bluest_transport`] backend using the `bluest` crate.
//!
//! The in-memory [`simulator`] backend is always available.
//!
//! ### Utility Features
//! - `bin-dependencies`: Enables all features required by the `silbms` binary executable (currently `ble`).

/// Table driven CRC-8 checksum.
pub mod crc8;
/// Contains error types for the library.
mod error;
/// Defines the command and response frames of the BMS.
pub mod protocol;
/// Reassembly of response frames from notification chunks.
pub mod reassembly;
/// Connection, locking and request handling for one BMS.
pub mod session;
/// In-memory BMS for development and tests.
pub mod simulator;
/// Radio and peripheral abstraction the session manager runs on.
pub mod transport;

pub use error::Error;

/// Bluetooth Low Energy backend.
#[cfg_attr(docsrs, doc(cfg(feature = "ble")))]
#[cfg(feature = "ble")]
pub mod bluest_transport;
