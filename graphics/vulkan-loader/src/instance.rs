//! Instance: the frozen result of loader setup
//!
//! Everything the instance owns (drivers, their registries, the router and
//! both layer chains) is immutable once [`Instance`] exists. The only
//! mutable state is the table mapping device-level handles back to their
//! device, which devices update as they create and free objects.

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::chain::{LayerChain, ResolvedFunction, Terminator};
use crate::device::{Device, DeviceCreateInfo, DeviceDispatch};
use crate::function::RawFunction;
use crate::handle::{Dispatchable, FunctionKind, HandleAllocator, PhysicalDeviceHandle};
use crate::icd::{IcdDriver, IcdManifest, PhysicalDeviceDesc, PhysicalDeviceProperties, QueueFamilyProperties};
use crate::layer::{Layer, LayerScope};
use crate::loader::{LoaderConfig, Result};
use crate::router::{DriverId, DriverRouter, PhysicalDeviceEntry};
use crate::trampoline::{Misuse, NextLink, Trampoline};

/// Which drivers a physical-device query may be answered by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryScope {
    /// Whichever driver owns the physical device
    Instance,
    /// Only the given driver
    Driver(DriverId),
}

/// Driver-side lookup for physical-device functions
pub(crate) struct PhysicalDeviceTerminator<'a> {
    pub(crate) driver: &'a IcdDriver,
    pub(crate) entry: PhysicalDeviceEntry,
}

impl Terminator for PhysicalDeviceTerminator<'_> {
    fn terminate(&self, kind: FunctionKind, name: &str) -> Option<ResolvedFunction> {
        if kind != FunctionKind::PhysicalDevice {
            return None;
        }
        self.driver
            .get_physical_device_function(self.entry.index, name)
            .map(|f| ResolvedFunction::driver(f, self.entry.driver))
    }
}

/// Driver-side lookup for device functions
pub(crate) struct DeviceTerminator<'a> {
    pub(crate) driver: &'a IcdDriver,
    pub(crate) entry: PhysicalDeviceEntry,
}

impl Terminator for DeviceTerminator<'_> {
    fn terminate(&self, kind: FunctionKind, name: &str) -> Option<ResolvedFunction> {
        if kind != FunctionKind::Device {
            return None;
        }
        self.driver
            .get_device_function(self.entry.index, name)
            .map(|f| ResolvedFunction::driver(f, self.entry.driver))
    }
}

pub(crate) struct InstanceShared {
    pub(crate) config: LoaderConfig,
    pub(crate) drivers: Vec<IcdDriver>,
    pub(crate) router: DriverRouter,
    /// All layers; resolves physical-device functions
    pub(crate) instance_chain: LayerChain,
    /// Device-scoped layers; resolves device functions
    pub(crate) device_chain: LayerChain,
    pub(crate) handles: HandleAllocator,
    /// Device, queue and command-buffer handles to their device
    pub(crate) device_objects: RwLock<HashMap<u64, Arc<DeviceDispatch>>>,
}

impl InstanceShared {
    pub(crate) fn driver(&self, id: DriverId) -> Option<&IcdDriver> {
        self.drivers.get(id.0)
    }

    pub(crate) fn physical_device_desc(&self, handle: PhysicalDeviceHandle) -> Option<&PhysicalDeviceDesc> {
        let entry = self.router.entry(handle)?;
        self.driver(entry.driver)?.physical_devices().get(entry.index)
    }

    pub(crate) fn device_dispatch(&self, raw: u64) -> Option<Arc<DeviceDispatch>> {
        self.device_objects.read().get(&raw).cloned()
    }

    pub(crate) fn resolve_device(
        &self,
        dispatch: &DeviceDispatch,
        position: usize,
        name: &str,
    ) -> Option<ResolvedFunction> {
        let driver = self.driver(dispatch.entry.driver)?;
        let terminator = DeviceTerminator {
            driver,
            entry: dispatch.entry,
        };
        self.device_chain
            .resolve_from(position, FunctionKind::Device, name, &terminator)
    }

    /// Walk the chain `handle` belongs to from `position` down to its
    /// driver.
    pub(crate) fn resolve_for<H: Dispatchable>(
        &self,
        handle: H,
        name: &str,
        position: usize,
    ) -> core::result::Result<Option<ResolvedFunction>, Misuse> {
        let unknown = || Misuse::UnknownHandle {
            function: name.to_string(),
            handle: handle.raw(),
        };

        let resolved = match H::KIND {
            FunctionKind::PhysicalDevice => {
                let entry = PhysicalDeviceHandle::from_raw(handle.raw())
                    .and_then(|pd| self.router.entry(pd))
                    .ok_or_else(unknown)?;
                let driver = self.driver(entry.driver).ok_or_else(unknown)?;
                let terminator = PhysicalDeviceTerminator { driver, entry };
                self.instance_chain
                    .resolve_from(position, FunctionKind::PhysicalDevice, name, &terminator)
            }
            FunctionKind::Device => {
                let dispatch = self.device_dispatch(handle.raw()).ok_or_else(unknown)?;
                self.resolve_device(&dispatch, position, name)
            }
        };

        if resolved.is_none() {
            log::trace!("{} not found for {:?}", name, handle);
        }
        Ok(resolved)
    }

    /// Whether any layer, driver or the known-function list has `name`
    fn knows(&self, name: &str) -> bool {
        self.instance_chain.knows(name)
            || self.drivers.iter().any(|driver| driver.knows(name))
            || self.config.known_device_functions.iter().any(|known| known == name)
    }
}

/// A created instance
pub struct Instance {
    shared: Arc<InstanceShared>,
}

impl Instance {
    pub(crate) fn new(config: LoaderConfig, drivers: Vec<IcdDriver>, layers: &[Layer]) -> Result<Self> {
        // Layers outside both chains are still rejected when malformed.
        for layer in layers {
            layer.validate()?;
        }
        let instance_chain = LayerChain::build(layers, LayerScope::INSTANCE)?;
        let device_chain = LayerChain::build(layers, LayerScope::DEVICE)?;

        let handles = HandleAllocator::new();
        let mut router = DriverRouter::new();
        for (driver_index, driver) in drivers.iter().enumerate() {
            for index in 0..driver.physical_devices().len() {
                router.register(
                    handles.physical_device(),
                    PhysicalDeviceEntry {
                        driver: DriverId(driver_index),
                        index,
                    },
                )?;
            }
        }

        log::info!(
            "Created instance: {} driver(s), {} physical device(s), {} layer(s)",
            drivers.len(),
            router.len(),
            instance_chain.len()
        );

        Ok(Self {
            shared: Arc::new(InstanceShared {
                config,
                drivers,
                router,
                instance_chain,
                device_chain,
                handles,
                device_objects: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.shared.config
    }

    pub fn driver_count(&self) -> usize {
        self.shared.drivers.len()
    }

    pub fn driver_manifest(&self, id: DriverId) -> Option<&IcdManifest> {
        self.shared.driver(id).map(|driver| &driver.manifest)
    }

    pub fn router(&self) -> &DriverRouter {
        &self.shared.router
    }

    /// `vkEnumeratePhysicalDevices`
    pub fn enumerate_physical_devices(&self) -> &[PhysicalDeviceHandle] {
        self.shared.router.physical_devices()
    }

    /// `vkGetPhysicalDeviceProperties`
    pub fn physical_device_properties(&self, physical_device: PhysicalDeviceHandle) -> Option<&PhysicalDeviceProperties> {
        self.shared
            .physical_device_desc(physical_device)
            .map(|desc| &desc.properties)
    }

    /// `vkGetPhysicalDeviceQueueFamilyProperties`
    pub fn queue_family_properties(&self, physical_device: PhysicalDeviceHandle) -> Option<&[QueueFamilyProperties]> {
        self.shared
            .physical_device_desc(physical_device)
            .map(|desc| desc.queue_families.as_slice())
    }

    pub fn driver_of(&self, physical_device: PhysicalDeviceHandle) -> Option<DriverId> {
        self.shared.router.owner_of(physical_device)
    }

    /// Enabled layers, outermost first
    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.shared.instance_chain.layer_names()
    }

    /// `vkGetInstanceProcAddr` for an unknown function.
    ///
    /// Returns a trampoline when any layer or driver knows `name`; the
    /// trampoline is bound to a concrete handle before it is called.
    pub fn get_instance_function(&self, name: &str) -> Option<Trampoline> {
        if !self.shared.knows(name) {
            log::trace!("{} unknown to every layer and driver", name);
            return None;
        }
        Some(Trampoline::new(name, Arc::clone(&self.shared)))
    }

    /// `vkGetPhysicalDeviceProcAddr`
    ///
    /// A physical device the instance does not know, or one outside the
    /// driver `scope` names, is fatal according to the misuse policy.
    pub fn get_physical_device_function(
        &self,
        scope: QueryScope,
        physical_device: PhysicalDeviceHandle,
        name: &str,
    ) -> Option<RawFunction> {
        match self.try_get_physical_device_function(scope, physical_device, name) {
            Ok(f) => f,
            Err(misuse) => self.shared.config.misuse_policy.enforce(&misuse),
        }
    }

    pub fn try_get_physical_device_function(
        &self,
        scope: QueryScope,
        physical_device: PhysicalDeviceHandle,
        name: &str,
    ) -> core::result::Result<Option<RawFunction>, Misuse> {
        let owner = self
            .shared
            .router
            .owner_of(physical_device)
            .ok_or_else(|| Misuse::UnknownHandle {
                function: name.to_string(),
                handle: physical_device.as_raw(),
            })?;

        if let QueryScope::Driver(expected) = scope {
            if expected != owner {
                return Err(Misuse::CrossDriver {
                    function: name.to_string(),
                    expected,
                    actual: owner,
                });
            }
        }

        Ok(self
            .shared
            .resolve_for(physical_device, name, 0)?
            .map(|resolved| resolved.pointer))
    }

    /// The chain below `layer_name`, for the layer's own forwarding
    pub fn next_link(&self, layer_name: &str) -> Option<NextLink> {
        let instance_position = self.shared.instance_chain.position_of(layer_name)?;
        let device_position = self.shared.device_chain.position_of(layer_name);
        Some(NextLink::new(
            layer_name,
            instance_position,
            device_position,
            Arc::clone(&self.shared),
        ))
    }

    /// `vkCreateDevice`
    pub fn create_device(&self, physical_device: PhysicalDeviceHandle, info: &DeviceCreateInfo) -> Result<Device> {
        Device::create(Arc::clone(&self.shared), physical_device, info)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("drivers", &self.shared.drivers)
            .field("physical_devices", &self.shared.router.len())
            .field("layers", &self.shared.instance_chain.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icd::PhysicalDeviceDesc;
    use crate::loader::VulkanLoader;
    use crate::VulkanVersion;

    extern "system" fn times_three(_pd: PhysicalDeviceHandle, x: u32) -> u32 {
        x * 3
    }

    type Pfn = extern "system" fn(PhysicalDeviceHandle, u32) -> u32;

    fn two_driver_instance() -> Instance {
        let mut loader = VulkanLoader::new();
        let mut driver_0 = IcdDriver::new(IcdManifest::new("driver_0", VulkanVersion::VK_1_2));
        driver_0
            .add_physical_device(PhysicalDeviceDesc::new("physical_device_0"))
            .add_physical_device_function("ext_fn_7", RawFunction::new(times_three as Pfn));
        let driver_1 = IcdDriver::new(IcdManifest::new("driver_1", VulkanVersion::VK_1_2))
            .with_physical_device(PhysicalDeviceDesc::new("physical_device_1"));
        loader.add_driver(driver_0).add_driver(driver_1);
        loader.create_instance().unwrap()
    }

    #[test]
    fn test_enumeration_order_and_ownership() {
        let instance = two_driver_instance();
        let pds = instance.enumerate_physical_devices();
        assert_eq!(pds.len(), 2);
        assert_eq!(instance.driver_of(pds[0]), Some(DriverId(0)));
        assert_eq!(instance.driver_of(pds[1]), Some(DriverId(1)));
        assert_eq!(
            instance.physical_device_properties(pds[1]).map(|p| p.device_name.as_str()),
            Some("physical_device_1")
        );
        assert_eq!(
            instance.driver_manifest(DriverId(1)).map(|m| m.name.as_str()),
            Some("driver_1")
        );
    }

    #[test]
    fn test_physical_device_query_routes_to_owner() {
        let instance = two_driver_instance();
        let pds = instance.enumerate_physical_devices().to_vec();

        assert!(instance
            .get_physical_device_function(QueryScope::Instance, pds[1], "ext_fn_7")
            .is_none());

        let f = instance
            .get_physical_device_function(QueryScope::Instance, pds[0], "ext_fn_7")
            .unwrap();
        let f: Pfn = unsafe { f.cast() };
        assert_eq!(f(pds[0], 10), 30);
    }

    #[test]
    fn test_driver_scope_mismatch_is_misuse() {
        let instance = two_driver_instance();
        let pds = instance.enumerate_physical_devices().to_vec();

        let err = instance
            .try_get_physical_device_function(QueryScope::Driver(DriverId(0)), pds[1], "ext_fn_7")
            .unwrap_err();
        assert_eq!(
            err,
            Misuse::CrossDriver {
                function: "ext_fn_7".into(),
                expected: DriverId(0),
                actual: DriverId(1),
            }
        );
        assert!(instance
            .try_get_physical_device_function(QueryScope::Driver(DriverId(0)), pds[0], "ext_fn_7")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_unknown_name() {
        let instance = two_driver_instance();
        assert!(instance.get_instance_function("vkNotRealFuncTEST").is_none());
        assert!(instance.get_instance_function("ext_fn_7").is_some());
    }

    #[test]
    fn test_next_link_for_missing_layer() {
        let instance = two_driver_instance();
        assert!(instance.next_link("VK_LAYER_absent").is_none());
    }

    #[test]
    fn test_malformed_layer_outside_every_chain() {
        extern "system" fn stub() {}
        let f = RawFunction::new(stub as extern "system" fn());

        let mut layer = Layer::with_scope("VK_LAYER_nowhere", LayerScope::empty());
        layer
            .implement(FunctionKind::Device, "vkFoo", f)
            .intercept(FunctionKind::Device, "vkFoo", f);

        let mut loader = VulkanLoader::new();
        loader
            .add_driver(IcdDriver::new(IcdManifest::new("driver_0", VulkanVersion::VK_1_2)))
            .enable_layer(layer);
        assert_eq!(
            loader.create_instance().unwrap_err(),
            crate::loader::LoaderError::MalformedLayer {
                layer: "VK_LAYER_nowhere".into(),
                function: "vkFoo".into(),
            }
        );
    }
}
