//! Device id table
//!
//! The ordered list of vendor/product pairs the driver accepts. The platform
//! consults it before a peripheral is ever offered to the driver.

use common::DeviceIdentity;

/// Google USB vendor ID
pub const GOOGLE_USB_VENDOR_ID: u16 = 0x18d1;

pub const SERVO_V2_PRODUCT_ID: u16 = 0x5002;
pub const SERVO_V3_PRODUCT_ID: u16 = 0x5004;
pub const SERVO_MICRO_PRODUCT_ID: u16 = 0x501a;
pub const SERVO_V4_PRODUCT_ID: u16 = 0x501b;

/// Servo boards supported out of the box
pub const SERVO_TABLE: &[DeviceIdentity] = &[
    DeviceIdentity::new(GOOGLE_USB_VENDOR_ID, SERVO_V2_PRODUCT_ID),
    DeviceIdentity::new(GOOGLE_USB_VENDOR_ID, SERVO_V3_PRODUCT_ID),
    DeviceIdentity::new(GOOGLE_USB_VENDOR_ID, SERVO_MICRO_PRODUCT_ID),
    DeviceIdentity::new(GOOGLE_USB_VENDOR_ID, SERVO_V4_PRODUCT_ID),
];

/// Ordered, duplicate-free set of accepted identities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdTable {
    entries: Vec<DeviceIdentity>,
}

impl IdTable {
    /// Table holding exactly [`SERVO_TABLE`]
    pub fn servo() -> Self {
        Self::from_entries(SERVO_TABLE.iter().copied())
    }

    /// Build a table from arbitrary entries, keeping first occurrence order
    pub fn from_entries(entries: impl IntoIterator<Item = DeviceIdentity>) -> Self {
        let mut table = Self {
            entries: Vec::new(),
        };
        table.extend(entries);
        table
    }

    /// Append identities that are not already present
    pub fn with_extra(mut self, extra: impl IntoIterator<Item = DeviceIdentity>) -> Self {
        self.extend(extra);
        self
    }

    fn extend(&mut self, entries: impl IntoIterator<Item = DeviceIdentity>) {
        for id in entries {
            if !self.entries.contains(&id) {
                self.entries.push(id);
            }
        }
    }

    pub fn lookup(&self, vendor_id: u16, product_id: u16) -> Option<&DeviceIdentity> {
        self.entries
            .iter()
            .find(|id| id.vendor_id == vendor_id && id.product_id == product_id)
    }

    pub fn contains(&self, identity: &DeviceIdentity) -> bool {
        self.entries.contains(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceIdentity> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for IdTable {
    fn default() -> Self {
        Self::servo()
    }
}

/// Human-readable board name for the built-in identities
pub fn model_name(identity: &DeviceIdentity) -> Option<&'static str> {
    if identity.vendor_id != GOOGLE_USB_VENDOR_ID {
        return None;
    }

    match identity.product_id {
        SERVO_V2_PRODUCT_ID => Some("Servo V2"),
        SERVO_V3_PRODUCT_ID => Some("Servo V3"),
        SERVO_MICRO_PRODUCT_ID => Some("Servo Micro"),
        SERVO_V4_PRODUCT_ID => Some("Servo V4"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_servo_table_order() {
        let table = IdTable::servo();
        let pids: Vec<u16> = table.iter().map(|id| id.product_id).collect();
        assert_eq!(pids, vec![0x5002, 0x5004, 0x501a, 0x501b]);
        assert!(table.iter().all(|id| id.vendor_id == 0x18d1));
    }

    #[test]
    fn test_lookup_exact() {
        let table = IdTable::servo();
        assert!(table.lookup(0x18d1, 0x5002).is_some());
        assert!(table.lookup(0x18d1, 0x5003).is_none());
        assert!(table.lookup(0x18d2, 0x5002).is_none());
    }

    #[test]
    fn test_with_extra_skips_duplicates() {
        let extra = DeviceIdentity::new(0x18d1, 0x520d);
        let table = IdTable::servo().with_extra([extra, extra, SERVO_TABLE[0]]);

        assert_eq!(table.len(), 5);
        assert_eq!(table.iter().last(), Some(&extra));
        assert!(table.contains(&extra));
    }

    #[test]
    fn test_model_name() {
        assert_eq!(
            model_name(&DeviceIdentity::new(0x18d1, 0x501a)),
            Some("Servo Micro")
        );
        assert_eq!(model_name(&DeviceIdentity::new(0x18d1, 0x520d)), None);
        assert_eq!(model_name(&DeviceIdentity::new(0x1234, 0x5002)), None);
    }
}
