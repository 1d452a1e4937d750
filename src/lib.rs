//! A library and CLI tool for interacting with OpenCore-based lightsaber
//! controllers (Polaris Anima EVO and compatibles) over a serial link.
//!
//! The [Flasher] struct is the main entry point: it owns an exclusive
//! session with the saber and exposes the four user-facing operations
//! (query firmware identity, list stored files, upload files, erase all
//! files). The lower layers are available for building custom tooling:
//! [connection::Connection] runs single framed exchanges with a bounded
//! retry policy, and [interface::Transport] abstracts the serial link.

pub mod command;
pub mod connection;
pub mod error;
pub mod flasher;
pub mod interface;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::{
    error::Error,
    flasher::{DeviceInfo, Flasher},
};
