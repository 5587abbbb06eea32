//! Boundary between the transport core and the Bluetooth radio driver.
//!
//! Requests flow into the radio through [`RadioAdapter`]; completions flow back
//! as [`RadioEvent`] values over a channel. Radio implementations must only
//! report through their [`RadioEventSender`] and never call back into the
//! transport directly, so every event is handled serially by whoever pumps the
//! matching [`RadioEventReceiver`].

use std::collections::HashSet;
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::address::{DiscoveredDevice, PeerAddress};
use crate::protocol::Characteristic;

/// Link state reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Asynchronous completion delivered by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    ScanResult(DiscoveredDevice),
    /// The active scan window ended.
    ScanComplete,
    ConnectionStateChanged(LinkState),
    ServicesDiscovered { success: bool },
    WriteComplete { success: bool },
    CharacteristicChanged(Vec<u8>),
}

/// Requests the transport issues to the radio. Each call only starts an
/// operation; the `bool` reports whether the radio accepted the request.
pub trait RadioAdapter: Send + Sync {
    /// Whether the host has a usable LE radio at all.
    fn is_available(&self) -> bool;
    /// Devices bonded with the host, with their advertised names and link types.
    fn bonded_devices(&self) -> Vec<DiscoveredDevice>;
    fn scan(&self, window: Duration) -> bool;
    fn stop_scan(&self);
    fn connect(&self, address: &PeerAddress) -> bool;
    fn disconnect(&self);
    fn discover_services(&self) -> bool;
    fn enable_notify(&self, characteristic: Characteristic) -> bool;
    fn write_characteristic(&self, characteristic: Characteristic, bytes: &[u8]) -> bool;
}

/// Creates the event channel shared by a radio and the transport.
pub fn radio_channel() -> (RadioEventSender, RadioEventReceiver) {
    let (tx, rx) = mpsc::channel();
    (RadioEventSender(tx), RadioEventReceiver(rx))
}

#[derive(Debug, Clone)]
pub struct RadioEventSender(mpsc::Sender<RadioEvent>);

impl RadioEventSender {
    /// Returns false once the receiving side has been dropped.
    pub fn send(&self, event: RadioEvent) -> bool {
        self.0.send(event).is_ok()
    }
}

#[derive(Debug)]
pub struct RadioEventReceiver(mpsc::Receiver<RadioEvent>);

impl RadioEventReceiver {
    pub fn try_recv(&self) -> Option<RadioEvent> {
        self.0.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<RadioEvent> {
        self.0.recv_timeout(timeout).ok()
    }
}

/// Every request a [`MockRadio`] has received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Scan(Duration),
    StopScan,
    Connect(PeerAddress),
    Disconnect,
    DiscoverServices,
    EnableNotify(Characteristic),
    Write(Characteristic, Vec<u8>),
}

/// Knobs controlling how a [`MockRadio`] answers requests.
#[derive(Debug, Clone)]
pub struct MockRadioBehaviour {
    pub available: bool,
    pub accept_connects: bool,
    /// Report `Connected` right after an accepted connect.
    pub auto_connect: bool,
    /// Report `Disconnected` right after `disconnect()`.
    pub auto_disconnect: bool,
    pub auto_discover: bool,
    pub accept_notify: bool,
    pub auto_ack_writes: bool,
    /// Outcome reported for acknowledged writes.
    pub write_success: bool,
    /// Addresses whose connect attempts fail asynchronously.
    pub unreachable: HashSet<PeerAddress>,
}

impl Default for MockRadioBehaviour {
    fn default() -> Self {
        Self {
            available: true,
            accept_connects: true,
            auto_connect: true,
            auto_disconnect: true,
            auto_discover: true,
            accept_notify: true,
            auto_ack_writes: true,
            write_success: true,
            unreachable: HashSet::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MockRadioState {
    behaviour: MockRadioBehaviour,
    bonded: Vec<DiscoveredDevice>,
    calls: Vec<RadioCall>,
}

/// In-process radio that records requests and answers them through the event
/// channel according to its [`MockRadioBehaviour`].
#[derive(Debug)]
pub struct MockRadio {
    events: RadioEventSender,
    state: Mutex<MockRadioState>,
}

impl MockRadio {
    pub fn new(events: RadioEventSender) -> Self {
        Self::with_behaviour(events, MockRadioBehaviour::default())
    }

    pub fn with_behaviour(events: RadioEventSender, behaviour: MockRadioBehaviour) -> Self {
        Self {
            events,
            state: Mutex::new(MockRadioState {
                behaviour,
                ..MockRadioState::default()
            }),
        }
    }

    pub fn set_bonded(&self, bonded: Vec<DiscoveredDevice>) {
        self.state.lock().bonded = bonded;
    }

    pub fn update_behaviour(&self, f: impl FnOnce(&mut MockRadioBehaviour)) {
        f(&mut self.state.lock().behaviour);
    }

    /// Injects an event as if the radio had produced it.
    pub fn emit(&self, event: RadioEvent) {
        self.events.send(event);
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.state.lock().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<RadioCall> {
        std::mem::take(&mut self.state.lock().calls)
    }

    /// Payloads of every characteristic write submitted so far.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                RadioCall::Write(_, bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RadioCall) -> MockRadioBehaviour {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.behaviour.clone()
    }
}

impl RadioAdapter for MockRadio {
    fn is_available(&self) -> bool {
        self.state.lock().behaviour.available
    }

    fn bonded_devices(&self) -> Vec<DiscoveredDevice> {
        self.state.lock().bonded.clone()
    }

    fn scan(&self, window: Duration) -> bool {
        self.record(RadioCall::Scan(window));
        true
    }

    fn stop_scan(&self) {
        self.record(RadioCall::StopScan);
    }

    fn connect(&self, address: &PeerAddress) -> bool {
        let behaviour = self.record(RadioCall::Connect(*address));
        if !behaviour.accept_connects {
            return false;
        }
        if behaviour.unreachable.contains(address) {
            self.emit(RadioEvent::ConnectionStateChanged(LinkState::Disconnected));
        } else if behaviour.auto_connect {
            self.emit(RadioEvent::ConnectionStateChanged(LinkState::Connected));
        }
        true
    }

    fn disconnect(&self) {
        let behaviour = self.record(RadioCall::Disconnect);
        if behaviour.auto_disconnect {
            self.emit(RadioEvent::ConnectionStateChanged(LinkState::Disconnected));
        }
    }

    fn discover_services(&self) -> bool {
        let behaviour = self.record(RadioCall::DiscoverServices);
        if behaviour.auto_discover {
            self.emit(RadioEvent::ServicesDiscovered { success: true });
        }
        true
    }

    fn enable_notify(&self, characteristic: Characteristic) -> bool {
        self.record(RadioCall::EnableNotify(characteristic))
            .accept_notify
    }

    fn write_characteristic(&self, characteristic: Characteristic, bytes: &[u8]) -> bool {
        let behaviour = self.record(RadioCall::Write(characteristic, bytes.to_vec()));
        if behaviour.auto_ack_writes {
            self.emit(RadioEvent::WriteComplete {
                success: behaviour.write_success,
            });
        }
        true
    }
}
