//! Identity matcher
//!
//! Decides whether the driver claims a freshly enumerated peripheral. Only
//! interface 0 of a device listed in the id table is claimed; secondary
//! interfaces of composite devices are a normal, expected rejection.

use crate::table::IdTable;
use common::{DeviceIdentity, RejectReason};

/// Outcome of [`IdentityMatcher::matches`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Accept,
    Reject(RejectReason),
}

impl MatchResult {
    pub fn is_accept(&self) -> bool {
        matches!(self, MatchResult::Accept)
    }
}

/// The only interface the driver binds to
pub const CLAIMED_INTERFACE: u8 = 0;

#[derive(Debug, Clone, Default)]
pub struct IdentityMatcher {
    table: IdTable,
}

impl IdentityMatcher {
    pub fn new(table: IdTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &IdTable {
        &self.table
    }

    /// Pure function of its inputs
    pub fn matches(&self, vendor_id: u16, product_id: u16, interface_number: u8) -> MatchResult {
        if self.table.lookup(vendor_id, product_id).is_none() {
            return MatchResult::Reject(RejectReason::UnknownDevice);
        }

        if interface_number != CLAIMED_INTERFACE {
            return MatchResult::Reject(RejectReason::UnknownInterface);
        }

        MatchResult::Accept
    }

    pub fn matches_identity(&self, identity: &DeviceIdentity, interface_number: u8) -> MatchResult {
        self.matches(identity.vendor_id, identity.product_id, interface_number)
    }
}
