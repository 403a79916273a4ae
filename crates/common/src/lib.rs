//! Common utilities for google-servo
//!
//! This crate provides shared functionality between the driver core and the
//! server, including USB identity types, error handling, logging setup, and
//! the async channel bridge for USB thread communication.

pub mod channel;
pub mod error;
pub mod logging;
pub mod usb_types;

pub use channel::{DriverBridge, DriverCommand, DriverEvent, DriverWorker, create_driver_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{AttachedPeripheral, DeviceIdentity, PeripheralHandle, RejectReason, Slot};
