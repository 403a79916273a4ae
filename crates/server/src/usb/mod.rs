//! USB subsystem
//!
//! Plays the platform role for the Servo driver: enumerates devices with
//! libusb, filters them through the driver's id table, and turns arrivals
//! and departures into `probe`/`disconnect` calls.
//!
//! All driver callbacks originate from a dedicated worker thread so the
//! Tokio runtime is never blocked by libusb.

pub mod manager;
pub mod worker;

pub use manager::list_matching_devices;
pub use worker::spawn_usb_worker;
