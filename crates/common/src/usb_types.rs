//! USB identity and attachment types shared by the driver and the server

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Vendor/product pair reported by a device descriptor
///
/// Match tables compare identities by exact equality; there are no wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

impl FromStr for DeviceIdentity {
    type Err = crate::Error;

    /// Parse `0x18d1:0x5002` or `18d1:5002`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid, pid) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| crate::Error::Config(format!("Invalid identity '{}', expected VID:PID", s)))?;

        Ok(Self::new(parse_hex_id(vid, "VID")?, parse_hex_id(pid, "PID")?))
    }
}

fn parse_hex_id(id: &str, name: &str) -> crate::Result<u16> {
    let hex = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .unwrap_or(id);

    if hex.is_empty() || hex.len() > 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(crate::Error::Config(format!(
            "Invalid {} '{}', expected 1-4 hex digits",
            name, id
        )));
    }

    u16::from_str_radix(hex, 16)
        .map_err(|_| crate::Error::Config(format!("Invalid {} '{}', not a valid hex number", name, id)))
}

/// Platform handle for one interface of one physical device
///
/// The platform owns the device; the attach manager only keeps this handle
/// as a key for its per-peripheral context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeripheralHandle {
    pub bus_number: u8,
    pub device_address: u8,
    pub interface_number: u8,
}

impl PeripheralHandle {
    pub const fn new(bus_number: u8, device_address: u8, interface_number: u8) -> Self {
        Self {
            bus_number,
            device_address,
            interface_number,
        }
    }

    /// usbfs node of the device this interface belongs to
    pub fn usbfs_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "/dev/bus/usb/{:03}/{:03}",
            self.bus_number, self.device_address
        ))
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}:{}",
            self.bus_number, self.device_address, self.interface_number
        )
    }
}

/// Instance index handed out by a naming service (0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot(pub u32);

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a peripheral was not claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Vendor/product pair is not in the match table
    UnknownDevice,
    /// Known device, but a secondary interface (only interface 0 is claimed)
    UnknownInterface,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::UnknownDevice => write!(f, "unknown device"),
            RejectReason::UnknownInterface => write!(f, "unknown interface"),
        }
    }
}

/// A matched peripheral holding a registered device node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedPeripheral {
    pub handle: PeripheralHandle,
    pub identity: DeviceIdentity,
    pub slot: Slot,
    /// Minor number (`minor_base + slot`)
    pub minor: u32,
    /// Instance name, e.g. `google-servo0`
    pub name: String,
    /// Device node path relative to the node root, e.g. `usb/google-servo0`
    pub node: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        let id = DeviceIdentity::new(0x18d1, 0x5002);
        assert_eq!(id.to_string(), "18d1:5002");
    }

    #[test]
    fn test_identity_parse() {
        let expected = DeviceIdentity::new(0x18d1, 0x501a);
        assert_eq!("0x18d1:0x501a".parse::<DeviceIdentity>().unwrap(), expected);
        assert_eq!("18d1:501A".parse::<DeviceIdentity>().unwrap(), expected);
        assert_eq!(" 0X18D1:0x501a ".parse::<DeviceIdentity>().unwrap(), expected);
    }

    #[test]
    fn test_identity_parse_invalid() {
        assert!("18d1".parse::<DeviceIdentity>().is_err());
        assert!("0x18d1:".parse::<DeviceIdentity>().is_err());
        assert!("0x12345:0x5002".parse::<DeviceIdentity>().is_err());
        assert!("0xGHIJ:0x5002".parse::<DeviceIdentity>().is_err());
        assert!("18d1:*".parse::<DeviceIdentity>().is_err());
        assert!("0x+1:0x5002".parse::<DeviceIdentity>().is_err());
        assert!("18d1:+502".parse::<DeviceIdentity>().is_err());
        assert!("0x-1:0x5002".parse::<DeviceIdentity>().is_err());
    }

    #[test]
    fn test_usbfs_path() {
        let handle = PeripheralHandle::new(1, 7, 0);
        assert_eq!(handle.usbfs_path(), PathBuf::from("/dev/bus/usb/001/007"));
        assert_eq!(handle.to_string(), "1-7:0");
    }
}
