//! Attach manager for Google Servo debug/control boards
//!
//! Decides which enumerated USB peripherals belong to the driver and, for
//! those it claims, registers a device node (`usb/google-servo<N>`) with a
//! naming service. Registration and deregistration are serialized by a single
//! lock owned by [`RegistrationGuard`].
//!
//! No data transfer happens through the exposed nodes; the driver only
//! manages their existence.

pub mod class;
pub mod driver;
pub mod error;
pub mod guard;
pub mod matcher;
pub mod naming;
pub mod table;

pub use class::ClassDriver;
pub use driver::{ProbeOutcome, ServoDriver, UsbDriver};
pub use error::{NamingError, RegistrationError};
pub use guard::{PeripheralState, RegistrationGuard};
pub use matcher::{IdentityMatcher, MatchResult};
#[cfg(unix)]
pub use naming::DevfsNaming;
pub use naming::{Allocation, MinorTable, NamingService};
pub use table::IdTable;
