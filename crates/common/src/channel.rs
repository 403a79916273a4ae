//! Async channel bridge between Tokio runtime and USB thread

use crate::usb_types::{AttachedPeripheral, DeviceIdentity, PeripheralHandle, RejectReason};
use async_channel::{Receiver, Sender, bounded};

/// Commands from Tokio runtime to USB thread
#[derive(Debug)]
pub enum DriverCommand {
    /// List peripherals currently holding a device node
    ListAttached {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<Vec<AttachedPeripheral>>,
    },

    /// Release every attached peripheral and stop the USB thread
    Shutdown,
}

/// Attach/detach outcomes reported by the USB thread
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// Peripheral matched and its device node is registered
    Claimed { peripheral: AttachedPeripheral },

    /// Peripheral was offered to the driver and not claimed
    Ignored {
        identity: DeviceIdentity,
        handle: PeripheralHandle,
        reason: RejectReason,
    },

    /// Peripheral matched but no device node could be registered
    RegistrationFailed {
        identity: DeviceIdentity,
        handle: PeripheralHandle,
        error: String,
    },

    /// Peripheral removed and its device node revoked
    Released { handle: PeripheralHandle },
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct DriverBridge {
    cmd_tx: Sender<DriverCommand>,
    event_rx: Receiver<DriverEvent>,
}

impl DriverBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: DriverCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the USB thread
    pub async fn recv_event(&self) -> crate::Result<DriverEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for USB thread (blocking)
pub struct DriverWorker {
    cmd_rx: Receiver<DriverCommand>,
    event_tx: Sender<DriverEvent>,
}

impl DriverWorker {
    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<DriverCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// True once every `DriverBridge` has been dropped
    pub fn is_closed(&self) -> bool {
        self.cmd_rx.is_closed()
    }

    /// Send an event to Tokio runtime (blocking)
    pub fn send_event(&self, event: DriverEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Clone of the event sender, for components that report on their own
    pub fn event_sender(&self) -> Sender<DriverEvent> {
        self.event_tx.clone()
    }
}

/// Create the channel bridge between Tokio and USB thread
///
/// Returns (DriverBridge for Tokio, DriverWorker for USB thread)
pub fn create_driver_bridge() -> (DriverBridge, DriverWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(256);

    (
        DriverBridge { cmd_tx, event_rx },
        DriverWorker { cmd_rx, event_tx },
    )
}
