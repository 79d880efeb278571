//! `tiltbridge-hal` – the motion platform side.
//!
//! - [`mapper`] – pure translation of combined channel state into a
//!   [`PlatformCommand`][tiltbridge_types::PlatformCommand].
//! - [`platform`] – the [`Platform`] output seam and its UDP driver.

pub mod mapper;
pub mod platform;

pub use mapper::{CommandMapper, MappingMode};
pub use platform::{Platform, UdpPlatform, encode_command};
