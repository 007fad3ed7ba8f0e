//! Physical device ownership

use core::fmt;
use std::collections::HashMap;

use crate::handle::PhysicalDeviceHandle;
use crate::loader::LoaderError;

/// Index of an enabled driver within its instance, in enumeration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverId(pub(crate) usize);

impl DriverId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "driver {}", self.0)
    }
}

/// Where a physical device lives on the driver side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalDeviceEntry {
    pub driver: DriverId,
    /// Index into the driver's own physical device list
    pub index: usize,
}

/// Maps every enumerated physical device to the one driver that owns it
#[derive(Debug, Default)]
pub struct DriverRouter {
    owners: HashMap<PhysicalDeviceHandle, PhysicalDeviceEntry>,
    order: Vec<PhysicalDeviceHandle>,
}

impl DriverRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle` as owned by `entry.driver`. A handle can only ever
    /// have one owner.
    pub fn register(&mut self, handle: PhysicalDeviceHandle, entry: PhysicalDeviceEntry) -> Result<(), LoaderError> {
        if self.owners.contains_key(&handle) {
            return Err(LoaderError::DuplicatePhysicalDevice(handle.as_raw()));
        }
        self.owners.insert(handle, entry);
        self.order.push(handle);
        Ok(())
    }

    pub fn owner_of(&self, handle: PhysicalDeviceHandle) -> Option<DriverId> {
        self.owners.get(&handle).map(|entry| entry.driver)
    }

    pub fn entry(&self, handle: PhysicalDeviceHandle) -> Option<PhysicalDeviceEntry> {
        self.owners.get(&handle).copied()
    }

    /// All physical devices, in driver order
    pub fn physical_devices(&self) -> &[PhysicalDeviceHandle] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: u64) -> PhysicalDeviceHandle {
        PhysicalDeviceHandle::from_raw(raw).unwrap()
    }

    #[test]
    fn test_owner_of() {
        let mut router = DriverRouter::new();
        router
            .register(handle(1), PhysicalDeviceEntry { driver: DriverId(0), index: 0 })
            .unwrap();
        router
            .register(handle(2), PhysicalDeviceEntry { driver: DriverId(1), index: 0 })
            .unwrap();

        assert_eq!(router.owner_of(handle(1)), Some(DriverId(0)));
        assert_eq!(router.owner_of(handle(2)), Some(DriverId(1)));
        assert_eq!(router.owner_of(handle(3)), None);
        assert_eq!(router.physical_devices(), &[handle(1), handle(2)]);
    }

    #[test]
    fn test_physical_devices_are_disjoint() {
        let mut router = DriverRouter::new();
        router
            .register(handle(5), PhysicalDeviceEntry { driver: DriverId(0), index: 0 })
            .unwrap();
        assert_eq!(
            router.register(handle(5), PhysicalDeviceEntry { driver: DriverId(1), index: 0 }),
            Err(LoaderError::DuplicatePhysicalDevice(5))
        );
        assert_eq!(router.owner_of(handle(5)), Some(DriverId(0)));
        assert_eq!(router.len(), 1);
    }
}
