//! Registration guard
//!
//! Serializes registration and deregistration of device nodes for every
//! peripheral handled by the driver. One coarse lock covers both the naming
//! service and the per-peripheral context storage; attach/detach events are
//! rare, so there is no per-peripheral locking.
//!
//! Per-peripheral lifecycle:
//!
//! ```text
//! Unclaimed -> Registering -> Registered -> Deregistering -> Unclaimed
//!                   |
//!                   +--(allocation failed)--> Unclaimed
//! ```

use crate::class::ClassDriver;
use crate::error::{RegistrationError, Result};
use crate::naming::{Allocation, NamingService};
use common::{AttachedPeripheral, DeviceIdentity, PeripheralHandle, Slot};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralState {
    Unclaimed,
    Registering,
    Registered,
    Deregistering,
}

impl PeripheralState {
    pub fn can_transition_to(self, next: PeripheralState) -> bool {
        use PeripheralState::*;

        matches!(
            (self, next),
            (Unclaimed, Registering)
                | (Registering, Registered)
                | (Registering, Unclaimed)
                | (Registered, Deregistering)
                | (Deregistering, Unclaimed)
        )
    }
}

/// Device-context storage for one handle
#[derive(Debug)]
struct PeripheralContext {
    identity: DeviceIdentity,
    state: PeripheralState,
    allocation: Option<Allocation>,
}

impl PeripheralContext {
    fn transition(&mut self, next: PeripheralState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    fn to_attached(&self, handle: PeripheralHandle) -> Option<AttachedPeripheral> {
        let allocation = self.allocation.as_ref()?;
        Some(attached_record(handle, self.identity, allocation))
    }
}

fn attached_record(
    handle: PeripheralHandle,
    identity: DeviceIdentity,
    allocation: &Allocation,
) -> AttachedPeripheral {
    AttachedPeripheral {
        handle,
        identity,
        slot: allocation.slot,
        minor: allocation.minor,
        name: allocation.name.clone(),
        node: allocation.node.clone(),
    }
}

struct Inner<N> {
    naming: N,
    contexts: HashMap<PeripheralHandle, PeripheralContext>,
}

pub struct RegistrationGuard<N> {
    class: ClassDriver,
    inner: Mutex<Inner<N>>,
}

impl<N: NamingService> RegistrationGuard<N> {
    pub fn new(class: ClassDriver, naming: N) -> Self {
        Self {
            class,
            inner: Mutex::new(Inner {
                naming,
                contexts: HashMap::new(),
            }),
        }
    }

    pub fn class(&self) -> &ClassDriver {
        &self.class
    }

    // Every critical section leaves the context map and the naming service
    // consistent before it can panic, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Inner<N>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a device node for `handle` and return its slot
    ///
    /// Registering an already registered handle returns the existing slot.
    pub fn register(&self, handle: PeripheralHandle, identity: DeviceIdentity) -> Result<Slot> {
        self.register_peripheral(handle, identity)
            .map(|peripheral| peripheral.slot)
    }

    /// Like [`register`](Self::register), returning the full attachment record
    pub fn register_peripheral(
        &self,
        handle: PeripheralHandle,
        identity: DeviceIdentity,
    ) -> Result<AttachedPeripheral> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if let Some(ctx) = inner.contexts.get(&handle)
            && ctx.state == PeripheralState::Registered
            && let Some(attached) = ctx.to_attached(handle)
        {
            debug!("{} already registered as {}", handle, attached.name);
            return Ok(attached);
        }

        let mut ctx = PeripheralContext {
            identity,
            state: PeripheralState::Unclaimed,
            allocation: None,
        };
        ctx.transition(PeripheralState::Registering);
        inner.contexts.insert(handle, ctx);

        match inner.naming.allocate(&self.class, &handle) {
            Ok(allocation) => {
                let attached = attached_record(handle, identity, &allocation);
                if let Some(ctx) = inner.contexts.get_mut(&handle) {
                    ctx.allocation = Some(allocation);
                    ctx.transition(PeripheralState::Registered);
                }
                info!(
                    "{} ({}) registered as {} (minor {})",
                    handle, identity, attached.name, attached.minor
                );
                Ok(attached)
            }
            Err(e) => {
                if let Some(mut ctx) = inner.contexts.remove(&handle) {
                    ctx.transition(PeripheralState::Unclaimed);
                }
                error!("{}: Not able to get a minor for this device: {}", handle, e);
                Err(RegistrationError::from(e))
            }
        }
    }

    /// Revoke the device node of `handle`
    ///
    /// Safe to call for handles that never registered.
    pub fn deregister(&self, handle: PeripheralHandle) {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let Some(mut ctx) = inner.contexts.remove(&handle) else {
            debug!("{} has no registration, nothing to release", handle);
            return;
        };

        if let Some(allocation) = ctx.allocation.take() {
            ctx.transition(PeripheralState::Deregistering);
            inner.naming.revoke(&allocation);
            info!("{} released {} (minor {})", handle, allocation.name, allocation.minor);
        }
        ctx.transition(PeripheralState::Unclaimed);
    }

    pub fn state(&self, handle: &PeripheralHandle) -> PeripheralState {
        self.lock()
            .contexts
            .get(handle)
            .map(|ctx| ctx.state)
            .unwrap_or(PeripheralState::Unclaimed)
    }

    pub fn attached(&self, handle: &PeripheralHandle) -> Option<AttachedPeripheral> {
        self.lock().contexts.get(handle)?.to_attached(*handle)
    }

    /// All registered peripherals ordered by slot
    pub fn list(&self) -> Vec<AttachedPeripheral> {
        let mut attached: Vec<AttachedPeripheral> = self
            .lock()
            .contexts
            .iter()
            .filter_map(|(handle, ctx)| ctx.to_attached(*handle))
            .collect();
        attached.sort_by_key(|p| p.slot);
        attached
    }

    /// Slots held in the naming service
    pub fn in_use(&self) -> usize {
        self.lock().naming.in_use()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::MinorTable;
    use std::path::PathBuf;

    const SERVO_V2: DeviceIdentity = DeviceIdentity::new(0x18d1, 0x5002);

    fn guard(capacity: u32) -> RegistrationGuard<MinorTable> {
        RegistrationGuard::new(ClassDriver::default(), MinorTable::new(capacity))
    }

    #[test]
    fn test_valid_transitions() {
        use PeripheralState::*;

        assert!(Unclaimed.can_transition_to(Registering));
        assert!(Registering.can_transition_to(Registered));
        assert!(Registering.can_transition_to(Unclaimed));
        assert!(Registered.can_transition_to(Deregistering));
        assert!(Deregistering.can_transition_to(Unclaimed));

        assert!(!Unclaimed.can_transition_to(Registered));
        assert!(!Registered.can_transition_to(Unclaimed));
        assert!(!Registered.can_transition_to(Registering));
        assert!(!Deregistering.can_transition_to(Registered));
    }

    #[test]
    fn test_register_first_servo() {
        let guard = guard(96);
        let handle = PeripheralHandle::new(1, 5, 0);

        let attached = guard.register_peripheral(handle, SERVO_V2).unwrap();
        assert_eq!(attached.slot, Slot(0));
        assert_eq!(attached.minor, 160);
        assert_eq!(attached.name, "google-servo0");
        assert_eq!(attached.node, PathBuf::from("usb/google-servo0"));
        assert_eq!(guard.state(&handle), PeripheralState::Registered);
    }

    #[test]
    fn test_register_twice_is_benign() {
        let guard = guard(96);
        let handle = PeripheralHandle::new(1, 5, 0);

        let first = guard.register(handle, SERVO_V2).unwrap();
        let second = guard.register(handle, SERVO_V2).unwrap();
        assert_eq!(first, second);
        assert_eq!(guard.in_use(), 1);
    }

    #[test]
    fn test_exhausted_clears_context() {
        let guard = guard(0);
        let handle = PeripheralHandle::new(1, 5, 0);

        let err = guard.register(handle, SERVO_V2).unwrap_err();
        assert!(matches!(err, RegistrationError::NoMinorAvailable));
        assert_eq!(guard.state(&handle), PeripheralState::Unclaimed);
        assert!(guard.attached(&handle).is_none());
        // Lock was released on the error path
        assert_eq!(guard.in_use(), 0);
    }

    #[test]
    fn test_deregister_unknown_handle() {
        let guard = guard(96);
        let registered = PeripheralHandle::new(1, 5, 0);
        guard.register(registered, SERVO_V2).unwrap();

        guard.deregister(PeripheralHandle::new(2, 9, 0));
        assert_eq!(guard.in_use(), 1);
        assert_eq!(guard.state(&registered), PeripheralState::Registered);
    }

    #[test]
    fn test_list_orders_by_slot() {
        let guard = guard(96);
        let handles = [
            PeripheralHandle::new(3, 1, 0),
            PeripheralHandle::new(1, 9, 0),
            PeripheralHandle::new(2, 4, 0),
        ];
        for handle in handles {
            guard.register(handle, SERVO_V2).unwrap();
        }

        let listed: Vec<PeripheralHandle> = guard.list().into_iter().map(|p| p.handle).collect();
        assert_eq!(listed, handles.to_vec());
    }
}
