use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use crate::interface::BleVehicleInterface;
use crate::radio::RadioAdapter;

/// How long the worker waits for a radio event before running a poll tick.
/// A fragment held back by the inter-write delay shortens the wait.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Background thread that delivers radio events to an interface and drives
/// its reconnect polling. Dropping the driver stops the thread.
#[derive(Debug)]
pub struct InterfaceDriver {
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl InterfaceDriver {
    pub fn spawn<R: RadioAdapter + 'static>(interface: Arc<BleVehicleInterface<R>>) -> Self {
        Self::spawn_with_tick(interface, DEFAULT_TICK)
    }

    pub fn spawn_with_tick<R: RadioAdapter + 'static>(
        interface: Arc<BleVehicleInterface<R>>,
        tick: Duration,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();
        let worker = thread::Builder::new()
            .name("openxc-ble-driver".to_string())
            .spawn(move || {
                debug!("interface driver started");
                while !stop.load(Ordering::SeqCst) {
                    interface.pump_events_timeout(tick);
                    interface.poll();
                }
                debug!("interface driver stopped");
            });
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!("unable to spawn interface driver: {}", err);
                None
            }
        };
        Self { shutdown, worker }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Signals the worker and waits for it to exit.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for InterfaceDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::config::BleInterfaceConfig;
    use crate::persistence::MemoryDeviceStore;
    use crate::radio::{radio_channel, MockRadio};

    #[test]
    fn driver_connects_in_the_background() {
        let (tx, rx) = radio_channel();
        let iface = Arc::new(
            BleVehicleInterface::new(
                MockRadio::new(tx),
                rx,
                MemoryDeviceStore::default(),
                Some("00:11:22:33:44:55"),
                BleInterfaceConfig::unpaced(),
            )
            .expect("interface"),
        );
        iface.start();
        let mut driver = InterfaceDriver::spawn_with_tick(iface.clone(), Duration::from_millis(5));
        assert!(driver.is_running());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !iface.is_ready() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(iface.is_ready());

        driver.shutdown();
        assert!(!driver.is_running());
    }
}
