use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use openxc_interface::{InterfaceHealthSnapshot, VehicleInterface};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::address::{CandidateDevice, DiscoveredDevice, PeerAddress};
use crate::candidates::CandidateSelector;
use crate::config::BleInterfaceConfig;
use crate::framer::{OutboundFramer, WriteOutcome};
use crate::persistence::{DeviceStore, PersistedDeviceSet};
use crate::protocol::Characteristic;
use crate::radio::{LinkState, RadioAdapter, RadioEvent, RadioEventReceiver};
use crate::reassembly::InboundReassembler;
use crate::reconnect::{ConnectPlan, ReconnectMode, ReconnectPolicy};
use crate::state::{ConnectionState, ConnectionStateMachine, LinkDown, LinkUp};
use crate::BleError;

/// Outbound queue plus pacing and deferred-failure bookkeeping.
#[derive(Debug)]
struct Outbound {
    framer: OutboundFramer,
    /// Earliest instant the next fragment may be submitted.
    next_submission_at: Option<Instant>,
    /// A fragment failed since the last `write()`; the next one reports it.
    failed: bool,
}

impl Outbound {
    fn is_due(&self, now: Instant) -> bool {
        self.next_submission_at.map_or(true, |at| now >= at)
    }

    /// Time left before a queued fragment may go out, if one is held back.
    fn pacing_remaining(&self, now: Instant) -> Option<Duration> {
        if self.framer.queued_len() == 0 || self.framer.pending_writes() > 0 {
            return None;
        }
        self.next_submission_at
            .filter(|at| *at > now)
            .map(|at| at.duration_since(now))
    }
}

/// Connection-dependent resources, guarded together by one reader/writer lock.
#[derive(Debug)]
struct Link {
    machine: ConnectionStateMachine,
    inbound: Mutex<InboundReassembler>,
    outbound: Mutex<Outbound>,
}

/// Reconnect bookkeeping that is never touched from the read/write path.
#[derive(Debug)]
struct Control {
    policy: ReconnectPolicy,
    devices: PersistedDeviceSet,
    attempts: VecDeque<CandidateDevice>,
    observed: Vec<DiscoveredDevice>,
    scanning: bool,
    discovered: BTreeMap<PeerAddress, String>,
}

#[derive(Debug, Default)]
struct Metrics {
    fragments_submitted: AtomicU64,
    fragments_acknowledged: AtomicU64,
    fragments_failed: AtomicU64,
    connect_attempts: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Metrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, err: &BleError) {
        *self.last_error.lock() = Some(err.to_string());
    }
}

/// BLE transport to an OpenXC vehicle interface.
///
/// Lock order is `control`, then `link`, then the inbound/outbound mutexes
/// inside it. Radio events are handled one at a time by whoever pumps the
/// event receiver (usually an [`InterfaceDriver`](crate::driver::InterfaceDriver)).
pub struct BleVehicleInterface<R: RadioAdapter> {
    radio: R,
    events: Mutex<RadioEventReceiver>,
    store: Box<dyn DeviceStore>,
    config: BleInterfaceConfig,
    selector: CandidateSelector,
    running: AtomicBool,
    control: Mutex<Control>,
    link: RwLock<Link>,
    metrics: Metrics,
}

impl<R: RadioAdapter> BleVehicleInterface<R> {
    /// Builds a stopped interface. `target` pins an explicit device address.
    pub fn new(
        radio: R,
        events: RadioEventReceiver,
        store: impl DeviceStore + 'static,
        target: Option<&str>,
        config: BleInterfaceConfig,
    ) -> Result<Self, BleError> {
        if !radio.is_available() {
            warn!("this host most likely does not have a Bluetooth LE adapter");
            return Err(BleError::AdapterUnavailable);
        }
        let target = target.map(PeerAddress::parse).transpose()?;
        let devices = store.load().unwrap_or_else(|err| {
            warn!("unable to load remembered devices: {}", err);
            PersistedDeviceSet::default()
        });
        debug!("initializing BLE vehicle interface");

        let policy = ReconnectPolicy::new(
            target,
            config.automatic_scan,
            config.poll_interval,
            config.fast_poll_interval,
        );
        let link = Link {
            machine: ConnectionStateMachine::new(),
            inbound: Mutex::new(InboundReassembler::new()),
            outbound: Mutex::new(Outbound {
                framer: OutboundFramer::new(config.outbound_capacity, config.max_fragment_len),
                next_submission_at: None,
                failed: false,
            }),
        };

        Ok(Self {
            radio,
            events: Mutex::new(events),
            store: Box::new(store),
            selector: CandidateSelector::new(config.device_name_prefix.clone()),
            config,
            running: AtomicBool::new(false),
            control: Mutex::new(Control {
                policy,
                devices,
                attempts: VecDeque::new(),
                observed: Vec::new(),
                scanning: false,
                discovered: BTreeMap::new(),
            }),
            link: RwLock::new(link),
            metrics: Metrics::default(),
        })
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn config(&self) -> &BleInterfaceConfig {
        &self.config
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("BLE vehicle interface started");
        }
    }

    /// Stops scanning, tears down the link, and blocks further connects.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.radio.stop_scan();
            self.control.lock().scanning = false;
            self.disconnect();
            info!("BLE vehicle interface stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.read().machine.state()
    }

    pub fn is_connected(&self) -> bool {
        self.link.read().machine.is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.link.read().machine.is_connecting()
    }

    /// Connected with notifications enabled, so application I/O can flow.
    pub fn is_ready(&self) -> bool {
        self.link.read().machine.is_ready()
    }

    /// Peer currently connected or being attempted.
    pub fn peer(&self) -> Option<PeerAddress> {
        self.link.read().machine.peer()
    }

    pub fn reconnect_mode(&self) -> ReconnectMode {
        self.control.lock().policy.mode()
    }

    pub fn fast_polling(&self) -> bool {
        self.control.lock().policy.fast_polling()
    }

    pub fn persisted_devices(&self) -> PersistedDeviceSet {
        self.control.lock().devices.clone()
    }

    /// Every device seen so far, as `name (address)` summaries.
    pub fn discovered_devices(&self) -> BTreeMap<PeerAddress, String> {
        self.control.lock().discovered.clone()
    }

    /// Requests a connection. With an explicit `target` only that address is
    /// tried; otherwise the reconnect policy picks the configured address or
    /// ranks candidates. No-op while stopped, connected, or connecting.
    pub fn connect(&self, target: Option<PeerAddress>) {
        if !self.is_running() {
            debug!("ignoring connect request; interface is not running");
            return;
        }
        let mut control = self.control.lock();
        {
            let link = self.link.read();
            if link.machine.is_connected() || link.machine.is_connecting() {
                return;
            }
        }

        control.attempts.clear();
        let plan = match target {
            Some(addr) => ConnectPlan::Target(addr),
            None => control.policy.plan(control.devices.last_connected),
        };
        match plan {
            ConnectPlan::Target(addr) => {
                info!("connecting to Bluetooth device {}", addr);
                control.attempts.push_back(CandidateDevice::persisted(addr));
            }
            ConnectPlan::Rank => {
                debug!("attempting automatic detection of a vehicle interface");
                let bonded = self.radio.bonded_devices();
                let before = control.devices.clone();
                let Control {
                    devices, observed, ..
                } = &mut *control;
                let ranked = self.selector.rank(&bonded, observed, devices);
                if control.devices != before {
                    self.persist(&control.devices);
                }
                for candidate in &ranked {
                    control
                        .discovered
                        .insert(candidate.address, candidate.to_string());
                }
                debug!("candidate devices are: {:?}", ranked);
                if ranked.is_empty() && !control.scanning {
                    self.begin_scan(&mut control);
                }
                control.attempts.extend(ranked);
            }
            ConnectPlan::Idle => {
                debug!("no detected or stored Bluetooth device address, not attempting connection");
            }
        }
        self.attempt_next(&mut control);
    }

    /// Tries queued candidates until the radio accepts one.
    fn attempt_next(&self, control: &mut Control) -> bool {
        while let Some(candidate) = control.attempts.pop_front() {
            let mut link = self.link.write();
            if link.machine.state() != ConnectionState::Disconnected {
                return false;
            }
            Metrics::bump(&self.metrics.connect_attempts);
            info!("attempting connection to {}", candidate);
            if !self.radio.connect(&candidate.address) {
                warn!("radio refused connection request to {}", candidate.address);
                self.metrics
                    .record_error(&BleError::ConnectFailed(candidate.address));
                continue;
            }
            if let Err(err) = link.machine.begin_attempt(candidate.address) {
                warn!("unable to start connection attempt: {}", err);
                return false;
            }
            return true;
        }
        false
    }

    /// Requests teardown. The state only changes once the radio confirms.
    pub fn disconnect(&self) {
        let mut control = self.control.lock();
        control.attempts.clear();
        let mut link = self.link.write();
        if !link.machine.request_teardown() {
            debug!("disconnect requested while already disconnected");
            return;
        }
        let discarded = link.outbound.get_mut().framer.reset();
        if discarded > 0 {
            debug!("discarded {} queued outbound bytes on disconnect", discarded);
        }
        info!("disconnecting from {:?}", link.machine.peer());
        self.radio.disconnect();
    }

    /// Queues `bytes` for transmission and kicks off draining. Returns false
    /// without queuing anything when not connected, when the queue would
    /// overflow, or once after a fragment failure.
    pub fn write(&self, bytes: &[u8]) -> bool {
        let link = self.link.read();
        if !link.machine.is_connected() {
            warn!("write attempted while not connected");
            self.metrics.record_error(&BleError::NotConnected);
            return false;
        }
        let mut outbound = link.outbound.lock();
        if std::mem::take(&mut outbound.failed) {
            warn!("previous fragment write failed; rejecting write");
            return false;
        }
        if let Err(err) = outbound.framer.enqueue(bytes) {
            warn!("{}", err);
            self.metrics.record_error(&err);
            return false;
        }
        self.drain(&link.machine, &mut outbound);
        true
    }

    /// Returns up to `max_len` reassembled bytes; empty when not connected or
    /// nothing has arrived.
    pub fn read(&self, max_len: usize) -> Vec<u8> {
        let link = self.link.read();
        if !link.machine.is_connected() {
            return Vec::new();
        }
        let bytes = link.inbound.lock().read(max_len);
        bytes
    }

    pub fn has_available_data(&self) -> bool {
        let link = self.link.read();
        let available = link.machine.is_connected() && link.inbound.lock().has_available_data();
        available
    }

    /// Replaces the explicit target (`None` switches to automatic mode).
    /// Returns whether the current link must be re-established.
    pub fn set_target(&self, target: Option<&str>) -> Result<bool, BleError> {
        let target = target.map(PeerAddress::parse).transpose()?;
        let mut control = self.control.lock();
        let connected_to = {
            let link = self.link.read();
            link.machine.peer().filter(|_| link.machine.is_connected())
        };
        let reconnect = control.policy.set_target(target, connected_to);
        debug!(
            "target set to {:?}; reconnect required: {}",
            target, reconnect
        );
        Ok(reconnect)
    }

    /// Starts an active scan window, forgetting the previous window's results.
    pub fn start_scan(&self) -> bool {
        let mut control = self.control.lock();
        self.begin_scan(&mut control)
    }

    fn begin_scan(&self, control: &mut Control) -> bool {
        control.observed.clear();
        control.scanning = self.radio.scan(self.config.scan_window);
        if control.scanning {
            debug!("scanning for vehicle interfaces for {:?}", self.config.scan_window);
        }
        control.scanning
    }

    /// Polling tick: attempts a connection when idle and the policy's
    /// interval has elapsed.
    pub fn poll(&self) {
        self.poll_at(Instant::now());
    }

    pub fn poll_at(&self, now: Instant) {
        if !self.is_running() {
            return;
        }
        {
            let mut control = self.control.lock();
            let link = self.link.read();
            if link.machine.is_connected() || link.machine.is_connecting() {
                return;
            }
            drop(link);
            if !control.policy.is_due(now) {
                return;
            }
            control.policy.record_attempt(now);
        }
        self.connect(None);
    }

    /// Handles every queued radio event, including ones raised while handling,
    /// and submits a paced fragment once its delay has passed.
    pub fn pump_events(&self) -> usize {
        let mut handled = 0;
        loop {
            let event = self.events.lock().try_recv();
            match event {
                Some(event) => {
                    self.handle_event(event);
                    handled += 1;
                }
                None if self.drain_due() => {}
                None => return handled,
            }
        }
    }

    /// Waits up to `timeout` for a first event, then drains the queue. The
    /// wait is cut short when a held-back fragment becomes due.
    pub fn pump_events_timeout(&self, timeout: Duration) -> usize {
        let wait = self
            .pacing_remaining()
            .map_or(timeout, |remaining| remaining.min(timeout));
        let first = self.events.lock().recv_timeout(wait);
        match first {
            Some(event) => {
                self.handle_event(event);
                1 + self.pump_events()
            }
            None => self.pump_events(),
        }
    }

    /// Submits the next queued fragment if the inter-write delay has passed.
    /// Returns whether a fragment went out.
    pub fn drain_due(&self) -> bool {
        let link = self.link.read();
        let mut outbound = link.outbound.lock();
        self.drain(&link.machine, &mut outbound)
    }

    /// How long until a held-back fragment may be submitted; `None` when
    /// nothing is waiting on the inter-write delay.
    pub fn pacing_remaining(&self) -> Option<Duration> {
        let link = self.link.read();
        if !link.machine.is_ready() {
            return None;
        }
        let remaining = link.outbound.lock().pacing_remaining(Instant::now());
        remaining
    }

    pub fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::ScanResult(device) => self.on_scan_result(device),
            RadioEvent::ScanComplete => self.on_scan_complete(),
            RadioEvent::ConnectionStateChanged(LinkState::Connected) => self.on_link_up(),
            RadioEvent::ConnectionStateChanged(LinkState::Disconnected) => self.on_link_down(),
            RadioEvent::ServicesDiscovered { success } => self.on_services_discovered(success),
            RadioEvent::WriteComplete { success } => self.on_write_complete(success),
            RadioEvent::CharacteristicChanged(bytes) => self.on_fragment_received(&bytes),
        }
    }

    fn on_scan_result(&self, device: DiscoveredDevice) {
        let mut control = self.control.lock();
        control
            .discovered
            .insert(device.address, device.summary());
        if device.is_vehicle_interface(self.selector.name_prefix()) && !device.bonded {
            debug!("found unpaired vehicle interface {}", device.summary());
            if control.devices.remember(device.address) {
                self.persist(&control.devices);
            }
        }
        match control
            .observed
            .iter()
            .position(|seen| seen.address == device.address)
        {
            Some(index) => control.observed[index] = device,
            None => control.observed.push(device),
        }
    }

    fn on_scan_complete(&self) {
        debug!("received BLE scan complete");
        let mut control = self.control.lock();
        control.scanning = false;
        let idle = self.link.read().machine.state() == ConnectionState::Disconnected;
        if idle {
            control.policy.set_fast_polling(true);
        }
    }

    fn on_link_up(&self) {
        let mut control = self.control.lock();
        let mut link = self.link.write();
        match link.machine.on_link_up() {
            Ok(LinkUp::Established(peer)) => {
                info!("connected to GATT server on {}", peer);
                control.attempts.clear();
                control.policy.set_fast_polling(false);
                if control.devices.record_connected(peer) {
                    debug!("stored last connected device {}", peer);
                    self.persist(&control.devices);
                }
                if control.scanning {
                    self.radio.stop_scan();
                    control.scanning = false;
                }
                link.inbound.get_mut().clear();
                let outbound = link.outbound.get_mut();
                outbound.framer.reset();
                outbound.failed = false;
                if !self.radio.discover_services() {
                    warn!("radio refused service discovery on {}", peer);
                    control.policy.set_fast_polling(true);
                    link.machine.request_teardown();
                    self.radio.disconnect();
                }
            }
            Ok(LinkUp::Cancelled(peer)) => {
                info!("link to {} came up after disconnect was requested; dropping it", peer);
                self.radio.disconnect();
            }
            Err(err) => warn!("ignoring unexpected link up: {}", err),
        }
    }

    fn on_link_down(&self) {
        let mut control = self.control.lock();
        let outcome = {
            let mut link = self.link.write();
            let outcome = link.machine.on_link_down();
            if outcome != LinkDown::Ignored {
                link.outbound.get_mut().framer.reset();
                link.inbound.get_mut().clear();
            }
            outcome
        };
        match outcome {
            LinkDown::AttemptFailed(peer) => {
                warn!("unable to connect to {}", peer);
                self.metrics.record_error(&BleError::ConnectFailed(peer));
                if !self.attempt_next(&mut control) {
                    debug!("no more candidates to try");
                }
            }
            LinkDown::AttemptCancelled(peer) => {
                info!("connection attempt to {} cancelled", peer);
                control.attempts.clear();
            }
            LinkDown::Lost(peer) => {
                warn!("lost connection to {}", peer);
                control.policy.set_fast_polling(true);
            }
            LinkDown::Closed(peer) => info!("disconnected from {}", peer),
            LinkDown::Ignored => debug!("ignoring disconnect while already disconnected"),
        }
    }

    fn on_services_discovered(&self, success: bool) {
        let mut link = self.link.write();
        if !link.machine.is_connected() || link.machine.teardown_requested() {
            debug!("ignoring service discovery result; link not connected");
            return;
        }
        if success && self.radio.enable_notify(Characteristic::Notify) {
            link.machine.mark_ready();
            info!("notifications enabled; link to {:?} ready", link.machine.peer());
            let Link {
                machine, outbound, ..
            } = &mut *link;
            self.drain(machine, outbound.get_mut());
            return;
        }
        if success {
            warn!("unable to enable notifications; dropping link");
        } else {
            warn!("service discovery failed; dropping link");
        }
        link.machine.request_teardown();
        drop(link);
        self.control.lock().policy.set_fast_polling(true);
        self.radio.disconnect();
    }

    fn on_write_complete(&self, success: bool) {
        let link = self.link.read();
        let mut outbound = link.outbound.lock();
        match outbound.framer.on_write_complete(success) {
            WriteOutcome::Acknowledged { remaining } => {
                Metrics::bump(&self.metrics.fragments_acknowledged);
                if remaining > 0 {
                    self.drain(&link.machine, &mut outbound);
                }
            }
            WriteOutcome::Failed { discarded } => {
                Metrics::bump(&self.metrics.fragments_failed);
                warn!("fragment write failed; discarded {} queued bytes", discarded);
                outbound.failed = true;
                self.metrics.record_error(&BleError::WriteFailed);
            }
            WriteOutcome::Unexpected => debug!("write completion with no write outstanding"),
        }
    }

    fn on_fragment_received(&self, fragment: &[u8]) {
        let link = self.link.read();
        if !link.machine.is_connected() {
            debug!("dropping {} bytes received while not connected", fragment.len());
            return;
        }
        link.inbound.lock().on_fragment_received(fragment);
    }

    /// Submits the next fragment when the link is ready, nothing is in flight,
    /// and the inter-write delay since the previous submission has passed.
    /// A fragment held back by the delay stays queued for [`Self::drain_due`].
    fn drain(&self, machine: &ConnectionStateMachine, outbound: &mut Outbound) -> bool {
        if !machine.is_ready() {
            return false;
        }
        let now = Instant::now();
        if !outbound.is_due(now) {
            return false;
        }
        while let Some(fragment) = outbound.framer.next_fragment() {
            outbound.next_submission_at = Some(now + self.config.inter_write_delay);
            if self
                .radio
                .write_characteristic(Characteristic::Write, &fragment)
            {
                Metrics::bump(&self.metrics.fragments_submitted);
                return true;
            }
            Metrics::bump(&self.metrics.fragments_failed);
            let discarded = match outbound.framer.on_write_complete(false) {
                WriteOutcome::Failed { discarded } => discarded,
                _ => 0,
            };
            warn!(
                "radio refused fragment write; discarded {} queued bytes",
                discarded
            );
            outbound.failed = true;
            self.metrics.record_error(&BleError::WriteFailed);
        }
        false
    }

    fn persist(&self, devices: &PersistedDeviceSet) {
        if let Err(err) = self.store.save(devices) {
            warn!("unable to persist remembered devices: {}", err);
        }
    }

    pub fn health_snapshot(&self) -> InterfaceHealthSnapshot {
        let link = self.link.read();
        let outbound_queued = link.outbound.lock().framer.queued_len() as u64;
        let (inbound_received, inbound_buffered) = {
            let inbound = link.inbound.lock();
            (inbound.received_total(), inbound.available() as u64)
        };
        InterfaceHealthSnapshot {
            connected: link.machine.is_connected(),
            outbound_queued,
            fragments_submitted: self.metrics.fragments_submitted.load(Ordering::Relaxed),
            fragments_acknowledged: self.metrics.fragments_acknowledged.load(Ordering::Relaxed),
            fragments_failed: self.metrics.fragments_failed.load(Ordering::Relaxed),
            inbound_received,
            inbound_buffered,
            connect_attempts: self.metrics.connect_attempts.load(Ordering::Relaxed),
            last_error: self.metrics.last_error.lock().clone(),
        }
    }

    /// Outstanding unacknowledged fragment writes (0 or 1).
    pub fn pending_writes(&self) -> usize {
        let link = self.link.read();
        let pending = link.outbound.lock().framer.pending_writes();
        pending
    }
}

impl<R: RadioAdapter> VehicleInterface for BleVehicleInterface<R> {
    type Address = PeerAddress;
    type Error = BleError;

    fn connect(&self, target: Option<PeerAddress>) {
        BleVehicleInterface::connect(self, target)
    }

    fn disconnect(&self) {
        BleVehicleInterface::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        BleVehicleInterface::is_connected(self)
    }

    fn write(&self, bytes: &[u8]) -> bool {
        BleVehicleInterface::write(self, bytes)
    }

    fn read(&self, max_len: usize) -> Vec<u8> {
        BleVehicleInterface::read(self, max_len)
    }

    fn has_available_data(&self) -> bool {
        BleVehicleInterface::has_available_data(self)
    }

    fn set_target(&self, target: Option<&str>) -> Result<bool, BleError> {
        BleVehicleInterface::set_target(self, target)
    }

    fn health_snapshot(&self) -> InterfaceHealthSnapshot {
        BleVehicleInterface::health_snapshot(self)
    }
}

impl<R: RadioAdapter> fmt::Display for BleVehicleInterface<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let device = self.peer();
        let explicit = self.control.lock().policy.target();
        let show = |addr: Option<PeerAddress>| {
            addr.map(|a| a.to_string())
                .unwrap_or_else(|| "none".to_string())
        };
        write!(
            f,
            "BleVehicleInterface{{device_address={}, explicit_device_address={}}}",
            show(device),
            show(explicit)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryDeviceStore;
    use crate::radio::{radio_channel, MockRadio, MockRadioBehaviour, RadioCall};

    const VI: &str = "00:11:22:33:44:55";

    fn vi() -> PeerAddress {
        PeerAddress::parse(VI).expect("valid address")
    }

    fn build(
        behaviour: MockRadioBehaviour,
        target: Option<&str>,
    ) -> (BleVehicleInterface<MockRadio>, MemoryDeviceStore) {
        let (tx, rx) = radio_channel();
        let store = MemoryDeviceStore::default();
        let iface = BleVehicleInterface::new(
            MockRadio::with_behaviour(tx, behaviour),
            rx,
            store.clone(),
            target,
            BleInterfaceConfig::unpaced(),
        )
        .expect("interface should build");
        iface.start();
        (iface, store)
    }

    fn connected() -> BleVehicleInterface<MockRadio> {
        let (iface, _) = build(MockRadioBehaviour::default(), Some(VI));
        iface.connect(None);
        iface.pump_events();
        assert!(iface.is_ready());
        iface.radio().take_calls();
        iface
    }

    #[test]
    fn construction_fails_without_adapter() {
        let (tx, rx) = radio_channel();
        let behaviour = MockRadioBehaviour {
            available: false,
            ..MockRadioBehaviour::default()
        };
        let result = BleVehicleInterface::new(
            MockRadio::with_behaviour(tx, behaviour),
            rx,
            MemoryDeviceStore::default(),
            None,
            BleInterfaceConfig::default(),
        );
        assert!(matches!(result, Err(BleError::AdapterUnavailable)));
    }

    #[test]
    fn construction_rejects_malformed_target() {
        let (tx, rx) = radio_channel();
        let result = BleVehicleInterface::new(
            MockRadio::new(tx),
            rx,
            MemoryDeviceStore::default(),
            Some("not-a-mac"),
            BleInterfaceConfig::default(),
        );
        assert!(matches!(result, Err(BleError::InvalidAddress(_))));
    }

    #[test]
    fn connect_is_a_no_op_while_stopped() {
        let (iface, _) = build(MockRadioBehaviour::default(), Some(VI));
        iface.stop();
        iface.radio().take_calls();
        iface.connect(None);
        assert!(iface.radio().calls().is_empty());
        assert!(!iface.is_connecting());
    }

    #[test]
    fn connected_only_after_radio_confirms() {
        let behaviour = MockRadioBehaviour {
            auto_connect: false,
            ..MockRadioBehaviour::default()
        };
        let (iface, store) = build(behaviour, Some(VI));
        assert!(!iface.is_connected());

        iface.connect(None);
        assert!(iface.is_connecting());
        assert!(!iface.is_connected());
        assert_eq!(iface.radio().calls(), vec![RadioCall::Connect(vi())]);

        iface.radio().emit(RadioEvent::ConnectionStateChanged(LinkState::Connected));
        iface.pump_events();
        assert!(iface.is_connected());
        assert!(iface.is_ready());
        assert_eq!(
            iface.radio().calls(),
            vec![
                RadioCall::Connect(vi()),
                RadioCall::DiscoverServices,
                RadioCall::EnableNotify(Characteristic::Notify),
            ]
        );
        assert_eq!(store.snapshot().last_connected, Some(vi()));
    }

    #[test]
    fn connect_while_connected_is_ignored() {
        let iface = connected();
        iface.connect(Some(PeerAddress::from_octets([1; 6])));
        assert!(iface.radio().calls().is_empty());
        assert_eq!(iface.peer(), Some(vi()));
    }

    #[test]
    fn not_ready_until_notifications_enabled() {
        let behaviour = MockRadioBehaviour {
            auto_discover: false,
            ..MockRadioBehaviour::default()
        };
        let (iface, _) = build(behaviour, Some(VI));
        iface.connect(None);
        iface.pump_events();
        assert!(iface.is_connected());
        assert!(!iface.is_ready());

        assert!(iface.write(&[1, 2, 3]));
        assert!(iface.radio().writes().is_empty());

        iface
            .radio()
            .emit(RadioEvent::ServicesDiscovered { success: true });
        iface.pump_events();
        assert!(iface.is_ready());
        assert_eq!(iface.radio().writes(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn failed_discovery_drops_the_link() {
        let behaviour = MockRadioBehaviour {
            auto_discover: false,
            ..MockRadioBehaviour::default()
        };
        let (iface, _) = build(behaviour, Some(VI));
        iface.connect(None);
        iface.pump_events();
        iface
            .radio()
            .emit(RadioEvent::ServicesDiscovered { success: false });
        iface.pump_events();
        assert!(!iface.is_connected());
        assert!(iface.fast_polling());
        assert!(iface.radio().calls().contains(&RadioCall::Disconnect));
    }

    #[test]
    fn write_fails_when_not_connected() {
        let (iface, _) = build(MockRadioBehaviour::default(), None);
        assert!(!iface.write(&[1]));
        assert_eq!(
            iface.health_snapshot().last_error.as_deref(),
            Some("not connected to a vehicle interface")
        );
    }

    #[test]
    fn overflow_rejects_without_partial_enqueue() {
        let behaviour = MockRadioBehaviour {
            auto_ack_writes: false,
            ..MockRadioBehaviour::default()
        };
        let (iface, _) = build(behaviour, Some(VI));
        iface.connect(None);
        iface.pump_events();

        assert!(iface.write(&[0; 1000]));
        // 20 bytes left the queue as the first fragment
        assert_eq!(iface.health_snapshot().outbound_queued, 980);
        assert!(!iface.write(&[0; 45]));
        assert_eq!(iface.health_snapshot().outbound_queued, 980);
        assert!(iface.write(&[0; 44]));
        assert_eq!(iface.health_snapshot().outbound_queued, 1024);
    }

    #[test]
    fn fragment_failure_is_reported_on_next_write() {
        let behaviour = MockRadioBehaviour {
            write_success: false,
            ..MockRadioBehaviour::default()
        };
        let (iface, _) = build(behaviour, Some(VI));
        iface.connect(None);
        iface.pump_events();

        assert!(iface.write(&[9; 50]));
        iface.pump_events();
        assert_eq!(iface.radio().writes().len(), 1);
        assert_eq!(iface.health_snapshot().outbound_queued, 0);

        assert!(!iface.write(&[1]));
        iface.radio().update_behaviour(|b| b.write_success = true);
        assert!(iface.write(&[1]));
    }

    #[test]
    fn reads_return_nothing_when_disconnected() {
        let iface = connected();
        iface
            .radio()
            .emit(RadioEvent::CharacteristicChanged(vec![1, 2, 3]));
        iface.pump_events();
        assert!(iface.has_available_data());

        iface.disconnect();
        iface.pump_events();
        assert!(!iface.is_connected());
        assert!(!iface.has_available_data());
        assert!(iface.read(10).is_empty());
    }

    #[test]
    fn disconnect_waits_for_confirmation() {
        let behaviour = MockRadioBehaviour {
            auto_disconnect: false,
            ..MockRadioBehaviour::default()
        };
        let (iface, _) = build(behaviour, Some(VI));
        iface.connect(None);
        iface.pump_events();
        iface.disconnect();
        assert!(iface.is_connected());
        iface
            .radio()
            .emit(RadioEvent::ConnectionStateChanged(LinkState::Disconnected));
        iface.pump_events();
        assert!(!iface.is_connected());
        // already disconnected: no second teardown request
        iface.radio().take_calls();
        iface.disconnect();
        assert!(iface.radio().calls().is_empty());
    }

    #[test]
    fn disconnect_while_connecting_cancels_the_attempt() {
        let behaviour = MockRadioBehaviour {
            auto_connect: false,
            auto_disconnect: false,
            ..MockRadioBehaviour::default()
        };
        let (iface, _) = build(behaviour, Some(VI));
        iface.connect(None);
        assert!(iface.is_connecting());
        iface.disconnect();
        assert!(iface.is_connecting());

        iface.radio().emit(RadioEvent::ConnectionStateChanged(LinkState::Connected));
        iface.pump_events();
        assert_eq!(iface.connection_state(), ConnectionState::Disconnected);
        let disconnects = iface
            .radio()
            .calls()
            .iter()
            .filter(|c| **c == RadioCall::Disconnect)
            .count();
        assert_eq!(disconnects, 2);
    }

    #[test]
    fn set_target_validates_and_reports_reconnect() {
        let iface = connected();
        assert!(matches!(
            iface.set_target(Some("zz")),
            Err(BleError::InvalidAddress(_))
        ));
        assert!(!iface.set_target(Some(VI)).expect("valid"));
        assert!(iface.set_target(Some("66:77:88:99:AA:BB")).expect("valid"));
        assert!(!iface.set_target(None).expect("valid"));
        assert_eq!(iface.reconnect_mode(), ReconnectMode::Automatic);
    }

    #[test]
    fn lost_link_enables_fast_polling_and_poll_reconnects() {
        let iface = connected();
        iface
            .radio()
            .emit(RadioEvent::ConnectionStateChanged(LinkState::Disconnected));
        iface.pump_events();
        assert!(!iface.is_connected());
        assert!(iface.fast_polling());

        iface.poll();
        iface.pump_events();
        assert!(iface.is_connected());
        assert!(!iface.fast_polling());
    }

    #[test]
    fn scan_complete_enables_fast_polling_only_when_idle() {
        let iface = connected();
        iface.radio().emit(RadioEvent::ScanComplete);
        iface.pump_events();
        assert!(!iface.fast_polling());

        let (idle, _) = build(MockRadioBehaviour::default(), None);
        idle.radio().emit(RadioEvent::ScanComplete);
        idle.pump_events();
        assert!(idle.fast_polling());
    }

    #[test]
    fn display_shows_device_and_explicit_address() {
        let iface = connected();
        assert_eq!(
            iface.to_string(),
            "BleVehicleInterface{device_address=00:11:22:33:44:55, explicit_device_address=00:11:22:33:44:55}"
        );
    }
}
