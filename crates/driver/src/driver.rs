//! Platform-facing driver
//!
//! The platform (the server's USB worker, or a test harness) looks up
//! peripherals in [`UsbDriver::id_table`] and only then calls
//! [`UsbDriver::probe`]; [`UsbDriver::disconnect`] follows physical removal.

use crate::class::ClassDriver;
use crate::error::Result;
use crate::guard::RegistrationGuard;
use crate::matcher::{IdentityMatcher, MatchResult};
use crate::naming::NamingService;
use crate::table::IdTable;
use common::{AttachedPeripheral, DeviceIdentity, PeripheralHandle, RejectReason};
use tracing::{debug, info};

pub const DRIVER_NAME: &str = "google-servo";
pub const DRIVER_DESC: &str = "Google Servo USB control board";

/// Result of a probe that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Claimed(AttachedPeripheral),
    Ignored(RejectReason),
}

/// Callbacks a platform invokes for matching peripherals
pub trait UsbDriver: Send + Sync {
    fn name(&self) -> &str;

    fn id_table(&self) -> &IdTable;

    /// A peripheral listed in the id table was enumerated
    fn probe(&self, identity: DeviceIdentity, handle: PeripheralHandle) -> Result<ProbeOutcome>;

    /// A previously probed peripheral was removed
    fn disconnect(&self, handle: PeripheralHandle);

    /// Peripherals currently holding a device node
    fn attached(&self) -> Vec<AttachedPeripheral>;
}

/// Identity matcher plus registration guard for Servo boards
pub struct ServoDriver<N> {
    matcher: IdentityMatcher,
    guard: RegistrationGuard<N>,
}

impl<N: NamingService> ServoDriver<N> {
    pub fn new(table: IdTable, class: ClassDriver, naming: N) -> Self {
        Self {
            matcher: IdentityMatcher::new(table),
            guard: RegistrationGuard::new(class, naming),
        }
    }

    /// Driver with the built-in id table and class
    pub fn with_naming(naming: N) -> Self {
        Self::new(IdTable::servo(), ClassDriver::default(), naming)
    }

    pub fn matcher(&self) -> &IdentityMatcher {
        &self.matcher
    }

    pub fn guard(&self) -> &RegistrationGuard<N> {
        &self.guard
    }
}

impl<N: NamingService> UsbDriver for ServoDriver<N> {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn id_table(&self) -> &IdTable {
        self.matcher.table()
    }

    fn probe(&self, identity: DeviceIdentity, handle: PeripheralHandle) -> Result<ProbeOutcome> {
        match self.matcher.matches_identity(&identity, handle.interface_number) {
            MatchResult::Accept => {
                let peripheral = self.guard.register_peripheral(handle, identity)?;
                Ok(ProbeOutcome::Claimed(peripheral))
            }
            MatchResult::Reject(reason @ RejectReason::UnknownInterface) => {
                info!("{}: ignoring interface {}", handle, handle.interface_number);
                Ok(ProbeOutcome::Ignored(reason))
            }
            MatchResult::Reject(reason) => {
                debug!("{}: {} not handled by {}", handle, identity, DRIVER_NAME);
                Ok(ProbeOutcome::Ignored(reason))
            }
        }
    }

    fn disconnect(&self, handle: PeripheralHandle) {
        self.guard.deregister(handle);
    }

    fn attached(&self) -> Vec<AttachedPeripheral> {
        self.guard.list()
    }
}
