//! USB worker thread
//!
//! Dedicated thread that runs the libusb event loop and is the only caller
//! of the driver's probe/disconnect callbacks. Communicates with the Tokio
//! runtime via the driver bridge.

use crate::usb::manager::DeviceManager;
use common::{DriverCommand, DriverWorker};
use driver::UsbDriver;
use rusb::UsbContext;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Outcome of the worker's USB initialization, sent once before it starts looping
pub type WorkerStartup = oneshot::Receiver<Result<(), rusb::Error>>;

/// USB worker thread
pub struct UsbWorkerThread {
    manager: DeviceManager,
    worker: DriverWorker,
}

impl UsbWorkerThread {
    /// Create the device manager and offer present devices to the driver
    pub fn new(
        worker: DriverWorker,
        driver: Arc<dyn UsbDriver>,
        rescan_interval: Duration,
    ) -> Result<Self, rusb::Error> {
        let mut manager = DeviceManager::new(driver, worker.event_sender(), rescan_interval)?;
        manager.initialize()?;

        Ok(Self { manager, worker })
    }

    /// Run the USB worker thread event loop
    ///
    /// Each iteration:
    /// 1. Checks for incoming commands from Tokio (non-blocking)
    /// 2. Processes USB events (with timeout)
    /// 3. Applies queued hot-plug arrivals and departures
    /// 4. Rescans if hot-plug is unavailable
    ///
    /// The loop continues until a Shutdown command is received or the bridge
    /// is dropped; either way every attached peripheral is released first.
    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("USB worker thread started");

        loop {
            match self.worker.try_recv_command() {
                Some(DriverCommand::Shutdown) => {
                    info!("USB worker shutting down");
                    break;
                }
                Some(DriverCommand::ListAttached { response }) => {
                    let attached = self.manager.driver().attached();
                    debug!("Listing {} attached peripherals", attached.len());
                    let _ = response.send(attached);
                }
                None if self.worker.is_closed() => {
                    warn!("Driver bridge closed, stopping USB worker");
                    break;
                }
                None => {}
            }

            let timeout = Duration::from_millis(100);

            match self.manager.context().handle_events(Some(timeout)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }

            self.manager.process_hotplug_events();
            self.manager.rescan_if_due();
        }

        self.manager.release_all();
        info!("USB worker thread stopped");
        Ok(())
    }
}

/// Spawn the USB worker thread
///
/// The thread runs until a Shutdown command is received or an error occurs.
/// The returned [`WorkerStartup`] resolves once libusb is initialized and
/// present devices have been offered to the driver, or with the error that
/// stopped the thread.
pub fn spawn_usb_worker(
    worker: DriverWorker,
    driver: Arc<dyn UsbDriver>,
    rescan_interval: Duration,
) -> std::io::Result<(JoinHandle<Result<(), rusb::Error>>, WorkerStartup)> {
    let (started_tx, started_rx) = oneshot::channel();

    let handle = std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            let worker_thread = match UsbWorkerThread::new(worker, driver, rescan_interval) {
                Ok(thread) => thread,
                Err(e) => {
                    error!("Failed to initialize USB subsystem: {}", e);
                    let _ = started_tx.send(Err(e));
                    return Err(e);
                }
            };
            let _ = started_tx.send(Ok(()));
            worker_thread.run()
        })?;

    Ok((handle, started_rx))
}
