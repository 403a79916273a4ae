//! USB device manager
//!
//! Handles device enumeration, hot-plug events, and the probe/disconnect
//! bookkeeping for every interface offered to the driver. This module runs
//! in the USB thread.

use common::{DeviceIdentity, DriverEvent, PeripheralHandle};
use driver::{ProbeOutcome, UsbDriver};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// A matched device and the interfaces offered to the driver
#[derive(Debug)]
struct TrackedDevice {
    identity: DeviceIdentity,
    interfaces: Vec<u8>,
    claimed: HashSet<PeripheralHandle>,
}

/// Hot-plug notification forwarded to the worker thread
enum HotplugEvent {
    Arrived(Device<Context>),
    Left { bus: u8, address: u8 },
}

/// Summary of a connected device listed in the driver's id table
#[derive(Debug, Clone)]
pub struct MatchingDevice {
    pub identity: DeviceIdentity,
    pub bus_number: u8,
    pub device_address: u8,
    pub interfaces: Vec<u8>,
}

/// USB device manager
///
/// Tracks devices whose identity is in the driver's id table; everything
/// else is never offered to the driver.
pub struct DeviceManager {
    /// USB context for device operations
    context: Context,
    driver: Arc<dyn UsbDriver>,
    /// Matched devices keyed by (bus, address)
    devices: HashMap<(u8, u8), TrackedDevice>,
    /// Hot-plug registration, `None` when libusb lacks hot-plug support
    _hotplug_registration: Option<Registration<Context>>,
    hotplug_tx: async_channel::Sender<HotplugEvent>,
    hotplug_rx: async_channel::Receiver<HotplugEvent>,
    /// Event sender for driver outcomes
    event_sender: async_channel::Sender<DriverEvent>,
    rescan_interval: Duration,
    last_rescan: Instant,
}

impl DeviceManager {
    /// Create a new device manager
    pub fn new(
        driver: Arc<dyn UsbDriver>,
        event_sender: async_channel::Sender<DriverEvent>,
        rescan_interval: Duration,
    ) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        let (hotplug_tx, hotplug_rx) = async_channel::unbounded();

        Ok(Self {
            context,
            driver,
            devices: HashMap::new(),
            _hotplug_registration: None,
            hotplug_tx,
            hotplug_rx,
            event_sender,
            rescan_interval,
            last_rescan: Instant::now(),
        })
    }

    /// Initialize device enumeration and hot-plug callbacks
    ///
    /// This should be called once after creating the manager.
    pub fn initialize(&mut self) -> Result<(), rusb::Error> {
        self.enumerate_devices()?;

        if rusb::has_hotplug() {
            self.register_hotplug()?;
        } else {
            warn!(
                "libusb has no hot-plug support, rescanning every {:?}",
                self.rescan_interval
            );
        }

        info!(
            "Device manager initialized: {} {} device(s) present",
            self.devices.len(),
            self.driver.name()
        );
        Ok(())
    }

    /// Offer every currently connected matching device to the driver
    fn enumerate_devices(&mut self) -> Result<(), rusb::Error> {
        let devices = self.context.devices()?;

        for device in devices.iter() {
            self.handle_device_arrived(device);
        }

        debug!("Enumerated {} matching devices", self.devices.len());
        Ok(())
    }

    /// Register hot-plug callbacks
    fn register_hotplug(&mut self) -> Result<(), rusb::Error> {
        let callback = HotplugForwarder {
            sender: self.hotplug_tx.clone(),
        };

        let registration = HotplugBuilder::new()
            .enumerate(false) // We already enumerated
            .register(&self.context, Box::new(callback))?;

        self._hotplug_registration = Some(registration);
        debug!("Hot-plug callbacks registered");
        Ok(())
    }

    /// Get USB context
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn driver(&self) -> &Arc<dyn UsbDriver> {
        &self.driver
    }

    /// Apply hot-plug notifications queued by the callback
    pub fn process_hotplug_events(&mut self) {
        while let Ok(event) = self.hotplug_rx.try_recv() {
            match event {
                HotplugEvent::Arrived(device) => self.handle_device_arrived(device),
                HotplugEvent::Left { bus, address } => self.handle_device_left(bus, address),
            }
        }
    }

    /// Re-enumerate when hot-plug is unavailable and the interval elapsed
    pub fn rescan_if_due(&mut self) {
        if self._hotplug_registration.is_some() || self.last_rescan.elapsed() < self.rescan_interval
        {
            return;
        }
        self.last_rescan = Instant::now();

        let devices = match self.context.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Rescan failed: {}", e);
                return;
            }
        };

        let present: HashSet<(u8, u8)> = devices
            .iter()
            .map(|d| (d.bus_number(), d.address()))
            .collect();

        let gone: Vec<(u8, u8)> = self
            .devices
            .keys()
            .filter(|key| !present.contains(*key))
            .copied()
            .collect();
        for (bus, address) in gone {
            self.handle_device_left(bus, address);
        }

        for device in devices.iter() {
            self.handle_device_arrived(device);
        }
    }

    /// Handle device arrival (enumeration, hot-plug or rescan)
    pub fn handle_device_arrived(&mut self, device: Device<Context>) {
        let key = (device.bus_number(), device.address());
        if self.devices.contains_key(&key) {
            return;
        }

        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to read descriptor of bus={} addr={}: {}", key.0, key.1, e);
                return;
            }
        };

        let Some(identity) = self
            .driver
            .id_table()
            .lookup(descriptor.vendor_id(), descriptor.product_id())
            .copied()
        else {
            trace!(
                "Not offering bus={} addr={} ({:04x}:{:04x}) to {}",
                key.0,
                key.1,
                descriptor.vendor_id(),
                descriptor.product_id(),
                self.driver.name()
            );
            return;
        };

        let interfaces = interface_numbers(&device);
        debug!(
            "Device {} at bus={} addr={} with interfaces {:?}",
            identity, key.0, key.1, interfaces
        );

        let mut tracked = TrackedDevice {
            identity,
            interfaces,
            claimed: HashSet::new(),
        };

        for &interface in &tracked.interfaces {
            let handle = PeripheralHandle::new(key.0, key.1, interface);
            let event = match self.driver.probe(identity, handle) {
                Ok(ProbeOutcome::Claimed(peripheral)) => {
                    tracked.claimed.insert(handle);
                    DriverEvent::Claimed { peripheral }
                }
                Ok(ProbeOutcome::Ignored(reason)) => DriverEvent::Ignored {
                    identity,
                    handle,
                    reason,
                },
                Err(e) => DriverEvent::RegistrationFailed {
                    identity,
                    handle,
                    error: e.to_string(),
                },
            };
            self.send_event(event);
        }

        self.devices.insert(key, tracked);
    }

    /// Handle device removal (hot-plug or rescan)
    pub fn handle_device_left(&mut self, bus: u8, address: u8) {
        let Some(tracked) = self.devices.remove(&(bus, address)) else {
            return;
        };

        debug!(
            "Device {} left bus={} addr={}",
            tracked.identity, bus, address
        );
        self.disconnect_device(bus, address, &tracked);
    }

    /// Disconnect every tracked device, as on driver unload
    pub fn release_all(&mut self) {
        let devices: Vec<((u8, u8), TrackedDevice)> = self.devices.drain().collect();
        for ((bus, address), tracked) in devices {
            self.disconnect_device(bus, address, &tracked);
        }
    }

    fn disconnect_device(&self, bus: u8, address: u8, tracked: &TrackedDevice) {
        for &interface in &tracked.interfaces {
            let handle = PeripheralHandle::new(bus, address, interface);
            self.driver.disconnect(handle);
            if tracked.claimed.contains(&handle) {
                self.send_event(DriverEvent::Released { handle });
            }
        }
    }

    fn send_event(&self, event: DriverEvent) {
        if let Err(e) = self.event_sender.send_blocking(event) {
            error!("Failed to send driver event: {}", e);
        }
    }
}

/// Interface numbers of the active (or first) configuration
fn interface_numbers<T: UsbContext>(device: &Device<T>) -> Vec<u8> {
    let config = device
        .active_config_descriptor()
        .or_else(|_| device.config_descriptor(0));

    match config {
        Ok(config) => {
            let mut numbers: Vec<u8> = config.interfaces().map(|i| i.number()).collect();
            numbers.sort_unstable();
            numbers.dedup();
            numbers
        }
        Err(e) => {
            // Interface 0 always exists on a configured device
            debug!("No configuration descriptor ({}), assuming interface 0", e);
            vec![0]
        }
    }
}

/// List connected devices present in `table` without probing them
pub fn list_matching_devices(table: &driver::IdTable) -> Result<Vec<MatchingDevice>, rusb::Error> {
    let context = Context::new()?;
    let mut found = Vec::new();

    for device in context.devices()?.iter() {
        let Ok(descriptor) = device.device_descriptor() else {
            continue;
        };
        if let Some(identity) = table.lookup(descriptor.vendor_id(), descriptor.product_id()) {
            found.push(MatchingDevice {
                identity: *identity,
                bus_number: device.bus_number(),
                device_address: device.address(),
                interfaces: interface_numbers(&device),
            });
        }
    }

    found.sort_by_key(|d| (d.bus_number, d.device_address));
    Ok(found)
}

/// Hot-plug callback handler
///
/// libusb invokes it from inside `handle_events`; it only queues the
/// notification so the manager processes it right after.
struct HotplugForwarder {
    sender: async_channel::Sender<HotplugEvent>,
}

impl Hotplug<Context> for HotplugForwarder {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if self.sender.try_send(HotplugEvent::Arrived(device)).is_err() {
            warn!("Hot-plug queue closed, dropping arrival");
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        let event = HotplugEvent::Left {
            bus: device.bus_number(),
            address: device.address(),
        };
        if self.sender.try_send(event).is_err() {
            warn!("Hot-plug queue closed, dropping departure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driver::{MinorTable, ServoDriver};

    #[test]
    fn test_manager_creation() {
        let (tx, _rx) = async_channel::bounded(8);
        let driver: Arc<dyn UsbDriver> = Arc::new(ServoDriver::with_naming(MinorTable::new(4)));

        // USB context creation may fail without libusb access
        match DeviceManager::new(driver, tx, Duration::from_secs(1)) {
            Ok(manager) => assert!(manager.devices.is_empty()),
            Err(e) => eprintln!("USB context unavailable (expected in sandboxes): {}", e),
        }
    }

    #[test]
    fn test_release_all_reports_claimed_only() {
        let (tx, rx) = async_channel::bounded(8);
        let servo = Arc::new(ServoDriver::with_naming(MinorTable::new(4)));
        let shared: Arc<dyn UsbDriver> = servo.clone();

        let Ok(mut manager) = DeviceManager::new(shared, tx, Duration::from_secs(1)) else {
            return;
        };

        let identity = driver::table::SERVO_TABLE[0];
        let claimed = PeripheralHandle::new(9, 9, 0);
        servo.probe(identity, claimed).unwrap();
        manager.devices.insert(
            (9, 9),
            TrackedDevice {
                identity,
                interfaces: vec![0, 1],
                claimed: HashSet::from([claimed]),
            },
        );

        manager.release_all();

        assert!(servo.attached().is_empty());
        match rx.try_recv().unwrap() {
            DriverEvent::Released { handle } => assert_eq!(handle, claimed),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
