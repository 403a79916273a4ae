//! Naming services
//!
//! A naming service owns the slot (minor number) space of a class driver and
//! exposes one device node per allocated slot. The registration guard only
//! ever calls it while holding its lock.

use crate::class::ClassDriver;
use crate::error::NamingError;
use common::{PeripheralHandle, Slot};
use std::path::PathBuf;
use tracing::{debug, trace};

/// Result of a successful allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub slot: Slot,
    pub minor: u32,
    /// Instance name, e.g. `google-servo0`
    pub name: String,
    /// Node path relative to the node root, e.g. `usb/google-servo0`
    pub node: PathBuf,
}

pub trait NamingService: Send {
    /// Reserve a slot and expose a device node for `handle`
    fn allocate(
        &mut self,
        class: &ClassDriver,
        handle: &PeripheralHandle,
    ) -> Result<Allocation, NamingError>;

    /// Remove the node and free the slot; revoking a free slot is a no-op
    fn revoke(&mut self, allocation: &Allocation);

    /// Number of slots currently allocated
    fn in_use(&self) -> usize;
}

/// In-memory minor bookkeeping with lowest-free-slot allocation
#[derive(Debug, Clone)]
pub struct MinorTable {
    used: Vec<bool>,
}

impl MinorTable {
    pub fn new(capacity: u32) -> Self {
        Self {
            used: vec![false; capacity as usize],
        }
    }

    /// Table sized to the class driver's minor range
    pub fn for_class(class: &ClassDriver) -> Self {
        Self::new(class.capacity())
    }

    pub fn capacity(&self) -> u32 {
        self.used.len() as u32
    }

    pub fn is_allocated(&self, slot: Slot) -> bool {
        self.used.get(slot.0 as usize).copied().unwrap_or(false)
    }
}

impl NamingService for MinorTable {
    fn allocate(
        &mut self,
        class: &ClassDriver,
        handle: &PeripheralHandle,
    ) -> Result<Allocation, NamingError> {
        let index = self
            .used
            .iter()
            .position(|used| !used)
            .ok_or(NamingError::Exhausted {
                capacity: self.capacity(),
            })?;
        self.used[index] = true;

        let slot = Slot(index as u32);
        let name = class.instance_name(slot.0);
        let node = class.devnode(&name);
        trace!("Allocated slot {} ({}) for {}", slot, name, handle);

        Ok(Allocation {
            slot,
            minor: class.minor_for(slot.0),
            name,
            node,
        })
    }

    fn revoke(&mut self, allocation: &Allocation) {
        match self.used.get_mut(allocation.slot.0 as usize) {
            Some(used) => *used = false,
            None => debug!("Revoke of out-of-range slot {}", allocation.slot),
        }
    }

    fn in_use(&self) -> usize {
        self.used.iter().filter(|used| **used).count()
    }
}

#[cfg(unix)]
pub use devfs::DevfsNaming;

#[cfg(unix)]
mod devfs {
    use super::{Allocation, MinorTable, NamingService};
    use crate::class::ClassDriver;
    use crate::error::NamingError;
    use common::PeripheralHandle;
    use std::fs;
    use std::io;
    use std::path::{Component, Path, PathBuf};
    use tracing::{debug, warn};

    /// Only plain relative components keep a node below the root
    fn stays_below_root(node: &Path) -> bool {
        node.components().next().is_some()
            && node.components().all(|c| matches!(c, Component::Normal(_)))
    }

    /// Exposes each node as a symlink `<root>/<devnode>` to the device's usbfs node
    #[derive(Debug)]
    pub struct DevfsNaming {
        root: PathBuf,
        minors: MinorTable,
    }

    impl DevfsNaming {
        pub fn new(root: impl Into<PathBuf>, class: &ClassDriver) -> Self {
            Self::with_minors(root, MinorTable::for_class(class))
        }

        pub fn with_minors(root: impl Into<PathBuf>, minors: MinorTable) -> Self {
            Self {
                root: root.into(),
                minors,
            }
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        /// Absolute location of a node path returned in an [`Allocation`]
        pub fn resolve(&self, node: &Path) -> PathBuf {
            self.root.join(node)
        }

        fn expose(&self, path: &Path, target: &Path) -> io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            // A link left behind by an unclean shutdown would make symlink() fail
            match fs::symlink_metadata(path) {
                Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path)?,
                Ok(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "node path is occupied by something other than a link",
                    ));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }

            std::os::unix::fs::symlink(target, path)
        }
    }

    impl NamingService for DevfsNaming {
        fn allocate(
            &mut self,
            class: &ClassDriver,
            handle: &PeripheralHandle,
        ) -> Result<Allocation, NamingError> {
            let allocation = self.minors.allocate(class, handle)?;
            let path = self.resolve(&allocation.node);
            let target = handle.usbfs_path();

            if !stays_below_root(&allocation.node) {
                self.minors.revoke(&allocation);
                return Err(NamingError::Node {
                    path,
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "node path leaves the node root",
                    ),
                });
            }

            if let Err(source) = self.expose(&path, &target) {
                self.minors.revoke(&allocation);
                return Err(NamingError::Node { path, source });
            }

            debug!("Exposed {} -> {}", path.display(), target.display());
            Ok(allocation)
        }

        fn revoke(&mut self, allocation: &Allocation) {
            let path = self.resolve(&allocation.node);
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Node {} already gone", path.display())
                }
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
            self.minors.revoke(allocation);
        }

        fn in_use(&self) -> usize {
            self.minors.in_use()
        }
    }
}
