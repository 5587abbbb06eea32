use uuid::Uuid;

/// Primary GATT service exposed by OpenXC BLE vehicle interfaces.
pub const OPENXC_SERVICE_UUID: Uuid = Uuid::from_u128(0x6800d38b_423d_4bdb_ba05_c9276d8453e1);
/// Characteristic the central writes outbound fragments to.
pub const OPENXC_WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x6800d38b_5262_11e5_885d_feff819cdce2);
/// Characteristic the peripheral notifies inbound fragments on.
pub const OPENXC_NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x6800d38b_5262_11e5_885d_feff819cdce3);

/// Largest payload a single characteristic write may carry on this link.
pub const MAX_FRAGMENT_LEN: usize = 20;
/// Default capacity of the outbound queue, in bytes.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;
/// Advertised name prefix carried by OpenXC vehicle interfaces.
pub const DEVICE_NAME_PREFIX: &str = "OpenXC";

/// GATT characteristic roles used by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    Write,
    Notify,
}

impl Characteristic {
    pub fn uuid(self) -> Uuid {
        match self {
            Characteristic::Write => OPENXC_WRITE_CHAR_UUID,
            Characteristic::Notify => OPENXC_NOTIFY_CHAR_UUID,
        }
    }
}
