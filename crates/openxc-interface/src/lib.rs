//! Vehicle interface abstractions for OpenXC transports.
//!
//! Higher layers (message parsers, vehicle services) only depend on the
//! byte-stream interface trait defined in this crate.

pub mod interface;

pub use interface::{InterfaceHealthSnapshot, VehicleInterface};
