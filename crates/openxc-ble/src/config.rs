use std::time::Duration;

use serde::Deserialize;

use crate::protocol::{DEFAULT_OUTBOUND_CAPACITY, DEVICE_NAME_PREFIX, MAX_FRAGMENT_LEN};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BleInterfaceConfig {
    /// Advertised name prefix that marks a vehicle interface.
    pub device_name_prefix: String,
    /// Outbound queue capacity in bytes.
    pub outbound_capacity: usize,
    /// Largest single characteristic write.
    pub max_fragment_len: usize,
    /// Pause between consecutive fragment submissions.
    #[serde(with = "humantime_serde")]
    pub inter_write_delay: Duration,
    /// Length of an active scan window.
    #[serde(with = "humantime_serde")]
    pub scan_window: Duration,
    /// Reconnect cadence while idle.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Reconnect cadence while fast polling.
    #[serde(with = "humantime_serde")]
    pub fast_poll_interval: Duration,
    /// Rank and try candidates when no explicit address is set.
    pub automatic_scan: bool,
}

impl Default for BleInterfaceConfig {
    fn default() -> Self {
        Self {
            device_name_prefix: DEVICE_NAME_PREFIX.to_string(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            max_fragment_len: MAX_FRAGMENT_LEN,
            inter_write_delay: Duration::from_millis(50),
            scan_window: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            fast_poll_interval: Duration::from_secs(1),
            automatic_scan: true,
        }
    }
}

impl BleInterfaceConfig {
    /// Defaults with no pacing delay, for tests and simulations.
    pub fn unpaced() -> Self {
        Self {
            inter_write_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}
