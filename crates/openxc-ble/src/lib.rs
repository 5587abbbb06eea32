//! Bluetooth LE transport for OpenXC vehicle interfaces.
//!
//! The vehicle interface exposes one GATT service with a write characteristic
//! and a notify characteristic. This crate turns that pair into a byte stream:
//! outbound bytes are queued and written in small fragments one at a time,
//! inbound notifications are concatenated for the consumer to read. The
//! platform radio is abstracted behind [`RadioAdapter`]; enable the
//! `btleplug` feature for the desktop hardware backend.

use thiserror::Error;

pub mod address;
#[cfg(feature = "btleplug")]
pub mod btleplug_backend;
pub mod candidates;
pub mod config;
pub mod driver;
pub mod framer;
pub mod interface;
pub mod persistence;
pub mod protocol;
pub mod radio;
pub mod reassembly;
pub mod reconnect;
pub mod state;

pub use address::{CandidateDevice, CandidateSource, DiscoveredDevice, LinkType, PeerAddress};
pub use candidates::CandidateSelector;
pub use config::BleInterfaceConfig;
pub use driver::InterfaceDriver;
pub use interface::BleVehicleInterface;
pub use persistence::{
    DeviceStore, FileDeviceStore, MemoryDeviceStore, PersistedDeviceSet, PersistenceError,
};
pub use radio::{
    radio_channel, LinkState, MockRadio, MockRadioBehaviour, RadioAdapter, RadioCall, RadioEvent,
    RadioEventReceiver, RadioEventSender,
};
pub use reconnect::ReconnectMode;
pub use state::{ConnectionState, StateTransitionError};

#[derive(Debug, Error)]
pub enum BleError {
    #[error("\"{0}\" is not a valid Bluetooth address")]
    InvalidAddress(String),
    #[error("no Bluetooth LE adapter available")]
    AdapterUnavailable,
    #[error("not connected to a vehicle interface")]
    NotConnected,
    #[error("outbound queue full ({requested} bytes requested, capacity {capacity})")]
    BufferOverflow { capacity: usize, requested: usize },
    #[error("unable to connect to {0}")]
    ConnectFailed(PeerAddress),
    #[error("fragment write failed; queued bytes discarded")]
    WriteFailed,
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
