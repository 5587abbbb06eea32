use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use openxc_ble::{
    radio_channel, BleVehicleInterface, FileDeviceStore, InterfaceDriver, RadioEventSender,
};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use tracing::{error, info, warn};

mod config;

use crate::config::ProbeConfig;

#[cfg(feature = "btleplug")]
use openxc_ble::btleplug_backend::{BtleplugRadio, BtleplugRadioConfig};
#[cfg(not(feature = "btleplug"))]
use openxc_ble::{DiscoveredDevice, MockRadio, PeerAddress, RadioEvent};

#[cfg(feature = "btleplug")]
type Radio = BtleplugRadio;
#[cfg(not(feature = "btleplug"))]
type Radio = MockRadio;

/// Connects to an OpenXC vehicle interface over BLE, sends commands, and
/// prints whatever the interface streams back.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Vehicle interface address, e.g. 00:11:22:33:44:55
    #[arg(long, short)]
    address: Option<String>,
    /// Where remembered devices are stored
    #[arg(long)]
    store: Option<PathBuf>,
}

#[cfg(feature = "btleplug")]
fn build_radio(events: RadioEventSender) -> Option<Radio> {
    match BtleplugRadio::spawn(events, BtleplugRadioConfig::default()) {
        Ok(radio) => Some(radio),
        Err(err) => {
            error!("bluetooth unavailable: {err}");
            None
        }
    }
}

#[cfg(not(feature = "btleplug"))]
const SIMULATED_ADDRESS: PeerAddress = PeerAddress::from_octets([0x00, 0x0E, 0x5C, 0x00, 0x00, 0x01]);

#[cfg(not(feature = "btleplug"))]
fn build_radio(events: RadioEventSender) -> Option<Radio> {
    warn!("built without btleplug; talking to a simulated vehicle interface");
    let radio = MockRadio::new(events);
    radio.set_bonded(vec![
        DiscoveredDevice::new(SIMULATED_ADDRESS, "OpenXC-VI-SIM").bonded(true),
    ]);
    Some(radio)
}

#[cfg(not(feature = "btleplug"))]
fn simulate_reply(iface: &BleVehicleInterface<Radio>) {
    iface.radio().emit(RadioEvent::CharacteristicChanged(
        br#"{"command_response":"version","message":"simulated"}"#.to_vec(),
    ));
}

#[cfg(feature = "btleplug")]
fn simulate_reply(_iface: &BleVehicleInterface<Radio>) {}

fn main() -> ExitCode {
    let filter = std::env::var("OPENXC_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let mut cfg = match ProbeConfig::new(cli.config.clone()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(address) = cli.address {
        cfg.address = Some(address);
    }
    if let Some(store) = cli.store {
        cfg.store_path = store;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(err) = flag::register(signal, shutdown.clone()) {
            warn!("unable to register signal handler: {err}");
        }
    }

    let (events_tx, events_rx) = radio_channel();
    let Some(radio) = build_radio(events_tx) else {
        return ExitCode::FAILURE;
    };
    let iface = match BleVehicleInterface::new(
        radio,
        events_rx,
        FileDeviceStore::new(&cfg.store_path),
        cfg.address.as_deref(),
        cfg.interface_config(),
    ) {
        Ok(iface) => Arc::new(iface),
        Err(err) => {
            error!("unable to create vehicle interface: {err}");
            return ExitCode::FAILURE;
        }
    };

    iface.start();
    let mut driver = InterfaceDriver::spawn_with_tick(iface.clone(), cfg.tick_interval);
    info!("probing with {}", iface);

    let deadline = cfg.run_for.map(|d| Instant::now() + d);
    let mut sent = false;
    while !shutdown.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if iface.is_ready() && !sent {
            for command in &cfg.commands {
                if !iface.write(command.as_bytes()) {
                    warn!("unable to queue command {command}");
                }
            }
            simulate_reply(&iface);
            sent = true;
        } else if !iface.is_connected() {
            sent = false;
        }

        let bytes = iface.read(cfg.read_chunk);
        if !bytes.is_empty() {
            println!("{}", String::from_utf8_lossy(&bytes));
        }
        thread::sleep(cfg.tick_interval);
    }

    iface.stop();
    driver.shutdown();
    info!("final link health: {:?}", iface.health_snapshot());
    ExitCode::SUCCESS
}
