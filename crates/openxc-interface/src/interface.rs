/// Coarse per-interface link health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceHealthSnapshot {
    pub connected: bool,
    pub outbound_queued: u64,
    pub fragments_submitted: u64,
    pub fragments_acknowledged: u64,
    pub fragments_failed: u64,
    pub inbound_received: u64,
    pub inbound_buffered: u64,
    pub connect_attempts: u64,
    pub last_error: Option<String>,
}

/// Byte-stream contract between a vehicle interface transport and the
/// message layer above it.
///
/// Link instability never surfaces as an error here: callers observe
/// `is_connected()` transitions and the return values of `read`/`write`.
pub trait VehicleInterface {
    /// Link-layer address type used to pick a device.
    type Address: Clone + Eq;
    /// Error raised synchronously for malformed addresses.
    type Error;

    /// Requests a connection, to `target` only or to the best candidate.
    fn connect(&self, target: Option<Self::Address>);
    /// Requests link teardown; completion is reported asynchronously.
    fn disconnect(&self);
    fn is_connected(&self) -> bool;
    /// Queues bytes for transmission. False means nothing was queued.
    fn write(&self, bytes: &[u8]) -> bool;
    /// Returns up to `max_len` received bytes without blocking.
    fn read(&self, max_len: usize) -> Vec<u8>;

    /// Whether a `read` would currently return bytes.
    fn has_available_data(&self) -> bool {
        false
    }

    /// Replaces the configured device. Returns whether the current link has to
    /// be re-established to honour the new target.
    fn set_target(&self, target: Option<&str>) -> Result<bool, Self::Error>;

    /// Best-effort health counters for diagnostics.
    fn health_snapshot(&self) -> InterfaceHealthSnapshot {
        InterfaceHealthSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::{InterfaceHealthSnapshot, VehicleInterface};

    #[derive(Default)]
    struct Loopback {
        buffer: RefCell<Vec<u8>>,
    }

    impl VehicleInterface for Loopback {
        type Address = String;
        type Error = &'static str;

        fn connect(&self, _target: Option<String>) {}

        fn disconnect(&self) {}

        fn is_connected(&self) -> bool {
            true
        }

        fn write(&self, bytes: &[u8]) -> bool {
            self.buffer.borrow_mut().extend_from_slice(bytes);
            true
        }

        fn read(&self, max_len: usize) -> Vec<u8> {
            let mut buffer = self.buffer.borrow_mut();
            let len = buffer.len().min(max_len);
            buffer.drain(..len).collect()
        }

        fn set_target(&self, target: Option<&str>) -> Result<bool, Self::Error> {
            match target {
                Some("") => Err("empty address"),
                _ => Ok(false),
            }
        }
    }

    #[test]
    fn default_methods_are_conservative() {
        let lo = Loopback::default();
        assert!(!lo.has_available_data());
        assert_eq!(lo.health_snapshot(), InterfaceHealthSnapshot::default());
    }

    #[test]
    fn trait_objects_carry_byte_streams() {
        let lo = Loopback::default();
        let iface: &dyn VehicleInterface<Address = String, Error = &'static str> = &lo;
        assert!(iface.write(b"{\"command\":\"version\"}"));
        assert_eq!(iface.read(10), b"{\"command\"".to_vec());
        assert_eq!(iface.read(64), b":\"version\"}".to_vec());
        assert_eq!(iface.set_target(Some("")), Err("empty address"));
        assert_eq!(iface.set_target(None), Ok(false));
    }
}
