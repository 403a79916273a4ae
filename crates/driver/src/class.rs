//! Class driver description and device node naming

use std::path::{Path, PathBuf};

/// Total minor numbers shared by all USB class drivers
pub const USB_MAXMINORS: u32 = 256;

/// Minor number of the first Servo instance
pub const GOOGLE_SERVO_MINOR_BASE: u32 = 160;

/// How instances of this driver are named and numbered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDriver {
    /// Instance name with `%d` standing for the instance index
    pub name_template: String,
    pub minor_base: u32,
    /// Directory prefix of exposed nodes
    pub devnode_dir: String,
}

impl Default for ClassDriver {
    fn default() -> Self {
        Self {
            name_template: "google-servo%d".to_string(),
            minor_base: GOOGLE_SERVO_MINOR_BASE,
            devnode_dir: "usb".to_string(),
        }
    }
}

impl ClassDriver {
    /// `google-servo%d` + 3 -> `google-servo3`
    pub fn instance_name(&self, index: u32) -> String {
        if self.name_template.contains("%d") {
            self.name_template.replacen("%d", &index.to_string(), 1)
        } else {
            format!("{}{}", self.name_template, index)
        }
    }

    /// Node path for an instance name: `usb/google-servo0`
    pub fn devnode(&self, name: &str) -> PathBuf {
        Path::new(&self.devnode_dir).join(name)
    }

    pub fn minor_for(&self, index: u32) -> u32 {
        self.minor_base + index
    }

    /// Instances available before the minor range runs out
    pub fn capacity(&self) -> u32 {
        USB_MAXMINORS.saturating_sub(self.minor_base)
    }
}
