use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::OPENXC_SERVICE_UUID;
use crate::BleError;

/// Validated 48-bit link-layer address, rendered as `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    pub const fn from_octets(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Parses `XX:XX:XX:XX:XX:XX` (hex digits in either case).
    pub fn parse(s: &str) -> Result<Self, BleError> {
        let invalid = || BleError::InvalidAddress(s.to_string());
        if s.len() != 17 {
            return Err(invalid());
        }
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            hex::decode_to_slice(part, std::slice::from_mut(octet)).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for PeerAddress {
    type Err = BleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = BleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeerAddress> for String {
    fn from(addr: PeerAddress) -> Self {
        addr.to_string()
    }
}

/// Radio link technology reported for a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkType {
    Classic,
    Le,
    Dual,
    #[default]
    Unknown,
}

/// A device as reported by the radio: either bonded or seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: PeerAddress,
    pub name: Option<String>,
    pub bonded: bool,
    pub link_type: LinkType,
    /// Service UUIDs carried in the advertisement, if any.
    pub services: Vec<Uuid>,
}

impl DiscoveredDevice {
    pub fn new(address: PeerAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: Some(name.into()),
            bonded: false,
            link_type: LinkType::Le,
            services: Vec::new(),
        }
    }

    pub fn bonded(mut self, bonded: bool) -> Self {
        self.bonded = bonded;
        self
    }

    pub fn with_link_type(mut self, link_type: LinkType) -> Self {
        self.link_type = link_type;
        self
    }

    pub fn with_service(mut self, service: Uuid) -> Self {
        self.services.push(service);
        self
    }

    pub fn name_has_prefix(&self, prefix: &str) -> bool {
        self.name
            .as_deref()
            .map(|name| name.starts_with(prefix))
            .unwrap_or(false)
    }

    /// Whether this device looks like an OpenXC vehicle interface.
    pub fn is_vehicle_interface(&self, prefix: &str) -> bool {
        self.name_has_prefix(prefix) || self.services.contains(&OPENXC_SERVICE_UUID)
    }

    /// Human-readable `name (address)` summary.
    pub fn summary(&self) -> String {
        format!(
            "{} ({})",
            self.name.as_deref().unwrap_or("unknown"),
            self.address
        )
    }
}

/// Where a candidate device came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Scan,
    Paired,
    Persisted,
}

/// A peer eligible for a connection attempt. Equality is by address only.
#[derive(Debug, Clone)]
pub struct CandidateDevice {
    pub address: PeerAddress,
    pub display_name: String,
    pub is_bonded: bool,
    pub source: CandidateSource,
}

impl CandidateDevice {
    pub fn persisted(address: PeerAddress) -> Self {
        Self {
            address,
            display_name: address.to_string(),
            is_bonded: false,
            source: CandidateSource::Persisted,
        }
    }

    pub fn from_discovered(device: &DiscoveredDevice, source: CandidateSource) -> Self {
        Self {
            address: device.address,
            display_name: device
                .name
                .clone()
                .unwrap_or_else(|| device.address.to_string()),
            is_bonded: device.bonded,
            source,
        }
    }
}

impl PartialEq for CandidateDevice {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for CandidateDevice {}

impl Hash for CandidateDevice {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for CandidateDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.address)
    }
}
