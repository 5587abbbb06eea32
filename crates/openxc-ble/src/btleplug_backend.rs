use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic as GattCharacteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::address::{DiscoveredDevice, PeerAddress};
use crate::protocol::{Characteristic, OPENXC_SERVICE_UUID};
use crate::radio::{LinkState, RadioAdapter, RadioEvent, RadioEventSender};

#[derive(Debug, Clone)]
pub struct BtleplugRadioConfig {
    pub connect_timeout: Duration,
    pub startup_timeout: Duration,
    pub command_queue_capacity: usize,
}

impl Default for BtleplugRadioConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(6),
            startup_timeout: Duration::from_secs(5),
            command_queue_capacity: 256,
        }
    }
}

#[derive(Debug, Error)]
pub enum BtleplugRadioError {
    #[error("bluetooth manager unavailable")]
    ManagerUnavailable,
    #[error("no bluetooth adapter found")]
    AdapterUnavailable,
    #[error("radio worker failed to start")]
    WorkerFailed,
}

#[derive(Debug)]
enum Command {
    Scan(Duration),
    StopScan,
    Connect(PeerAddress),
    Disconnect,
    DiscoverServices,
    EnableNotify(Characteristic),
    Write(Characteristic, Vec<u8>),
}

/// [`RadioAdapter`] backed by the host Bluetooth stack through btleplug.
///
/// Requests are forwarded to a worker thread running a single-threaded tokio
/// runtime; completions come back through the [`RadioEventSender`]. btleplug
/// exposes no bond information, so `bonded_devices` is always empty and
/// candidates come from scans and remembered addresses.
#[derive(Debug)]
pub struct BtleplugRadio {
    commands: tokio_mpsc::Sender<Command>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl BtleplugRadio {
    pub fn spawn(
        events: RadioEventSender,
        config: BtleplugRadioConfig,
    ) -> Result<Self, BtleplugRadioError> {
        let (commands, command_rx) = tokio_mpsc::channel(config.command_queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), BtleplugRadioError>>(1);
        let worker_config = config.clone();

        let worker = thread::Builder::new()
            .name("openxc-btleplug".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        warn!("unable to build radio runtime: {}", err);
                        let _ = ready_tx.send(Err(BtleplugRadioError::WorkerFailed));
                        return;
                    }
                };
                runtime.block_on(async move {
                    let adapter = match open_adapter().await {
                        Ok(adapter) => {
                            let _ = ready_tx.send(Ok(()));
                            adapter
                        }
                        Err(err) => {
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };
                    let mut worker = Worker {
                        adapter,
                        config: worker_config,
                        events,
                        current: None,
                        scan_deadline: None,
                        notify_task: None,
                    };
                    worker.run(command_rx, shutdown_rx).await;
                });
            })
            .map_err(|_| BtleplugRadioError::WorkerFailed)?;

        match ready_rx.recv_timeout(config.startup_timeout) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(err);
            }
            Err(_) => {
                let _ = shutdown_tx.send(());
                return Err(BtleplugRadioError::WorkerFailed);
            }
        }

        info!("btleplug radio ready");
        Ok(Self {
            commands,
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
        })
    }

    fn submit(&self, command: Command) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(err) => {
                warn!("radio command rejected: {}", err);
                false
            }
        }
    }
}

impl RadioAdapter for BtleplugRadio {
    fn is_available(&self) -> bool {
        !self.commands.is_closed()
    }

    fn bonded_devices(&self) -> Vec<DiscoveredDevice> {
        Vec::new()
    }

    fn scan(&self, window: Duration) -> bool {
        self.submit(Command::Scan(window))
    }

    fn stop_scan(&self) {
        self.submit(Command::StopScan);
    }

    fn connect(&self, address: &PeerAddress) -> bool {
        self.submit(Command::Connect(*address))
    }

    fn disconnect(&self) {
        self.submit(Command::Disconnect);
    }

    fn discover_services(&self) -> bool {
        self.submit(Command::DiscoverServices)
    }

    fn enable_notify(&self, characteristic: Characteristic) -> bool {
        self.submit(Command::EnableNotify(characteristic))
    }

    fn write_characteristic(&self, characteristic: Characteristic, bytes: &[u8]) -> bool {
        self.submit(Command::Write(characteristic, bytes.to_vec()))
    }
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

async fn open_adapter() -> Result<Adapter, BtleplugRadioError> {
    let manager = Manager::new()
        .await
        .map_err(|_| BtleplugRadioError::ManagerUnavailable)?;
    let adapters = manager
        .adapters()
        .await
        .map_err(|_| BtleplugRadioError::AdapterUnavailable)?;
    adapters
        .into_iter()
        .next()
        .ok_or(BtleplugRadioError::AdapterUnavailable)
}

struct Worker {
    adapter: Adapter,
    config: BtleplugRadioConfig,
    events: RadioEventSender,
    current: Option<Peripheral>,
    scan_deadline: Option<Instant>,
    notify_task: Option<tokio::task::JoinHandle<()>>,
}

impl Worker {
    async fn run(
        &mut self,
        mut commands: tokio_mpsc::Receiver<Command>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut central = match self.adapter.events().await {
            Ok(events) => events,
            Err(err) => {
                warn!("unable to subscribe to adapter events: {}", err);
                return;
            }
        };

        loop {
            let deadline = self.scan_deadline;
            tokio::select! {
                _ = &mut shutdown_rx => break,
                maybe_command = commands.recv() => match maybe_command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = central.next() => self.handle_central(event).await,
                _ = wait_until(deadline) => {
                    self.scan_deadline = None;
                    let _ = self.adapter.stop_scan().await;
                    self.emit(RadioEvent::ScanComplete);
                }
            }
        }

        self.drop_link().await;
    }

    fn emit(&self, event: RadioEvent) {
        if !self.events.send(event) {
            debug!("radio event dropped; receiver gone");
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Scan(window) => match self.adapter.start_scan(ScanFilter::default()).await {
                Ok(()) => self.scan_deadline = Some(Instant::now() + window),
                Err(err) => {
                    warn!("unable to start scan: {}", err);
                    self.emit(RadioEvent::ScanComplete);
                }
            },
            Command::StopScan => {
                if self.scan_deadline.take().is_some() {
                    let _ = self.adapter.stop_scan().await;
                }
            }
            Command::Connect(address) => {
                let up = self.open_link(address).await;
                let state = if up {
                    LinkState::Connected
                } else {
                    LinkState::Disconnected
                };
                self.emit(RadioEvent::ConnectionStateChanged(state));
            }
            Command::Disconnect => {
                if self.drop_link().await {
                    self.emit(RadioEvent::ConnectionStateChanged(LinkState::Disconnected));
                }
            }
            Command::DiscoverServices => {
                let success = match &self.current {
                    Some(peripheral) => peripheral.discover_services().await.is_ok(),
                    None => false,
                };
                self.emit(RadioEvent::ServicesDiscovered { success });
            }
            Command::EnableNotify(characteristic) => {
                if !self.subscribe(characteristic).await {
                    warn!("unable to enable notifications; dropping link");
                    if self.drop_link().await {
                        self.emit(RadioEvent::ConnectionStateChanged(LinkState::Disconnected));
                    }
                }
            }
            Command::Write(characteristic, bytes) => {
                let success = self.write(characteristic, &bytes).await;
                self.emit(RadioEvent::WriteComplete { success });
            }
        }
    }

    async fn handle_central(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if self.scan_deadline.is_none() {
                    return;
                }
                if let Some(device) = self.describe(&id).await {
                    self.emit(RadioEvent::ScanResult(device));
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let ours = self.current.as_ref().is_some_and(|p| p.id() == id);
                if ours {
                    debug!("peripheral {:?} dropped the link", id);
                    self.current = None;
                    self.stop_notifications();
                    self.emit(RadioEvent::ConnectionStateChanged(LinkState::Disconnected));
                }
            }
            _ => {}
        }
    }

    async fn describe(&self, id: &PeripheralId) -> Option<DiscoveredDevice> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let properties = peripheral.properties().await.ok()??;
        let mut device = DiscoveredDevice::new(
            PeerAddress::from_octets(properties.address.into_inner()),
            properties.local_name.unwrap_or_default(),
        );
        device.name = device.name.filter(|name| !name.is_empty());
        device.services = properties.services;
        Some(device)
    }

    async fn find(&self, address: PeerAddress) -> Option<Peripheral> {
        let peripherals = self.adapter.peripherals().await.ok()?;
        for peripheral in peripherals {
            if PeerAddress::from_octets(peripheral.address().into_inner()) == address {
                return Some(peripheral);
            }
        }
        None
    }

    async fn open_link(&mut self, address: PeerAddress) -> bool {
        if self.current.is_some() {
            self.drop_link().await;
        }
        let Some(peripheral) = self.find(address).await else {
            warn!("{} has not been seen by the adapter", address);
            return false;
        };
        match tokio::time::timeout(self.config.connect_timeout, peripheral.connect()).await {
            Ok(Ok(())) => {
                self.current = Some(peripheral);
                true
            }
            Ok(Err(err)) => {
                warn!("connect to {} failed: {}", address, err);
                false
            }
            Err(_) => {
                warn!("connect to {} timed out", address);
                false
            }
        }
    }

    /// Returns whether a link was actually open.
    async fn drop_link(&mut self) -> bool {
        self.stop_notifications();
        let Some(peripheral) = self.current.take() else {
            return false;
        };
        if let Err(err) = peripheral.disconnect().await {
            debug!("disconnect reported an error: {}", err);
        }
        true
    }

    fn stop_notifications(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
    }

    fn characteristic(&self, which: Characteristic) -> Option<GattCharacteristic> {
        let peripheral = self.current.as_ref()?;
        let uuid = which.uuid();
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == OPENXC_SERVICE_UUID)
    }

    async fn subscribe(&mut self, which: Characteristic) -> bool {
        let (Some(peripheral), Some(characteristic)) =
            (self.current.clone(), self.characteristic(which))
        else {
            return false;
        };
        if let Err(err) = peripheral.subscribe(&characteristic).await {
            warn!("subscribe failed: {}", err);
            return false;
        }
        let mut notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("notification stream unavailable: {}", err);
                return false;
            }
        };
        let events = self.events.clone();
        let uuid = characteristic.uuid;
        self.stop_notifications();
        self.notify_task = Some(tokio::spawn(async move {
            while let Some(data) = notifications.next().await {
                if data.uuid == uuid && !events.send(RadioEvent::CharacteristicChanged(data.value)) {
                    break;
                }
            }
        }));
        true
    }

    async fn write(&self, which: Characteristic, bytes: &[u8]) -> bool {
        let (Some(peripheral), Some(characteristic)) = (&self.current, self.characteristic(which))
        else {
            return false;
        };
        match peripheral
            .write(&characteristic, bytes, WriteType::WithResponse)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!("characteristic write failed: {}", err);
                false
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
