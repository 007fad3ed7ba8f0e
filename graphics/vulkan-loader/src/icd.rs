//! ICD (Installable Client Driver) description and driver-side lookup

use core::fmt;

use crate::function::RawFunction;
use crate::loader::{LoaderConfig, LoaderError};
use crate::registry::{FunctionRegistry, SymbolSource};
use crate::VulkanVersion;

/// First ICD interface version that exports
/// `vk_icdGetPhysicalDeviceProcAddr`
pub const MIN_PHYS_DEV_PROC_ADDR_INTERFACE_VERSION: u32 = 4;

/// Interface version assumed for drivers that do not state one
pub const CURRENT_INTERFACE_VERSION: u32 = 7;

/// ICD manifest describing a Vulkan driver
#[derive(Debug, Clone)]
pub struct IcdManifest {
    /// Driver name
    pub name: String,
    /// API version supported
    pub api_version: VulkanVersion,
    /// Path to driver library
    pub library_path: String,
    /// Supported extensions
    pub extensions: Vec<String>,
    /// Loader/ICD interface version the driver negotiated
    pub interface_version: u32,
}

impl IcdManifest {
    /// Create a new ICD manifest
    pub fn new(name: impl ToString, api_version: VulkanVersion) -> Self {
        Self {
            name: name.to_string(),
            api_version,
            library_path: String::new(),
            extensions: Vec::new(),
            interface_version: CURRENT_INTERFACE_VERSION,
        }
    }

    /// Check if extension is supported
    pub fn supports_extension(&self, ext_name: &str) -> bool {
        self.extensions.iter().any(|e| e == ext_name)
    }

    /// Whether the driver exports the physical-device proc-addr entry point
    pub fn exports_physical_device_proc_addr(&self) -> bool {
        self.interface_version >= MIN_PHYS_DEV_PROC_ADDR_INTERFACE_VERSION
    }
}

/// `VkPhysicalDeviceType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhysicalDeviceType {
    #[default]
    Other,
    IntegratedGpu,
    DiscreteGpu,
    VirtualGpu,
    Cpu,
}

/// Subset of `VkPhysicalDeviceProperties` the loader reports
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PhysicalDeviceProperties {
    pub device_name: String,
    pub device_type: PhysicalDeviceType,
}

/// `VkQueueFamilyProperties`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyProperties {
    pub queue_count: u32,
}

impl Default for QueueFamilyProperties {
    fn default() -> Self {
        Self { queue_count: 1 }
    }
}

/// A physical device as exposed by its driver
#[derive(Debug, Clone, Default)]
pub struct PhysicalDeviceDesc {
    pub properties: PhysicalDeviceProperties,
    pub queue_families: Vec<QueueFamilyProperties>,
    /// Unknown physical-device functions, answered by
    /// `vk_icdGetPhysicalDeviceProcAddr`
    pub physical_device_functions: FunctionRegistry,
    /// Device-level functions for devices created from this physical
    /// device, answered by the driver's `vkGetDeviceProcAddr`
    pub device_functions: FunctionRegistry,
}

impl PhysicalDeviceDesc {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            properties: PhysicalDeviceProperties {
                device_name: device_name.into(),
                device_type: PhysicalDeviceType::Other,
            },
            queue_families: vec![QueueFamilyProperties::default()],
            ..Default::default()
        }
    }

    pub fn with_device_type(mut self, device_type: PhysicalDeviceType) -> Self {
        self.properties.device_type = device_type;
        self
    }

    /// Replace the queue families; a new description has one family with a
    /// single queue
    pub fn set_queue_families(&mut self, families: Vec<QueueFamilyProperties>) -> &mut Self {
        self.queue_families = families;
        self
    }

    pub fn add_queue_family(&mut self, properties: QueueFamilyProperties) -> &mut Self {
        self.queue_families.push(properties);
        self
    }

    /// Register an unknown physical-device function
    pub fn add_physical_device_function(&mut self, name: impl Into<String>, function: RawFunction) -> &mut Self {
        self.physical_device_functions.register(name, function);
        self
    }

    /// Register a device-level function
    pub fn add_device_function(&mut self, name: impl Into<String>, function: RawFunction) -> &mut Self {
        self.device_functions.register(name, function);
        self
    }
}

/// Loaded ICD driver instance
pub struct IcdDriver {
    /// Manifest
    pub manifest: IcdManifest,
    physical_devices: Vec<PhysicalDeviceDesc>,
}

impl IcdDriver {
    pub fn new(manifest: IcdManifest) -> Self {
        Self {
            manifest,
            physical_devices: Vec::new(),
        }
    }

    /// Check that the driver can serve an instance configured with `config`
    pub fn load(self, config: &LoaderConfig) -> Result<Self, LoaderError> {
        log::info!("Loading ICD: {}", self.manifest.name);

        if self.manifest.api_version.to_u32() < config.api_version.to_u32() {
            return Err(LoaderError::DriverLoadFailed(format!(
                "{} supports Vulkan {}.{}, instance requires {}.{}",
                self.manifest.name,
                self.manifest.api_version.major,
                self.manifest.api_version.minor,
                config.api_version.major,
                config.api_version.minor,
            )));
        }

        if !self.manifest.exports_physical_device_proc_addr() {
            log::debug!(
                "{} uses interface version {}, unknown physical device functions disabled",
                self.manifest.name,
                self.manifest.interface_version
            );
        }

        Ok(self)
    }

    /// Add a physical device; returns it for further setup
    pub fn add_physical_device(&mut self, desc: PhysicalDeviceDesc) -> &mut PhysicalDeviceDesc {
        self.physical_devices.push(desc);
        let last = self.physical_devices.len() - 1;
        &mut self.physical_devices[last]
    }

    pub fn with_physical_device(mut self, desc: PhysicalDeviceDesc) -> Self {
        self.physical_devices.push(desc);
        self
    }

    pub fn physical_devices(&self) -> &[PhysicalDeviceDesc] {
        &self.physical_devices
    }

    pub fn physical_device_mut(&mut self, index: usize) -> Option<&mut PhysicalDeviceDesc> {
        self.physical_devices.get_mut(index)
    }

    /// Eagerly import physical-device functions for physical device `index`
    /// from the driver library.
    pub fn import_physical_device_functions(
        &mut self,
        index: usize,
        library: &dyn SymbolSource,
        names: &[&str],
    ) -> Result<usize, LoaderError> {
        let desc = self
            .physical_devices
            .get_mut(index)
            .ok_or(LoaderError::UnknownPhysicalDevice(index as u64))?;
        Ok(desc.physical_device_functions.import(library, names))
    }

    /// `vk_icdGetPhysicalDeviceProcAddr`
    pub fn get_physical_device_function(&self, index: usize, name: &str) -> Option<RawFunction> {
        if !self.manifest.exports_physical_device_proc_addr() {
            return None;
        }
        self.physical_devices
            .get(index)?
            .physical_device_functions
            .lookup(name)
    }

    /// `vkGetDeviceProcAddr` for a device created from physical device
    /// `index`
    pub fn get_device_function(&self, index: usize, name: &str) -> Option<RawFunction> {
        self.physical_devices.get(index)?.device_functions.lookup(name)
    }

    /// Whether any physical device of this driver knows `name`
    pub(crate) fn knows(&self, name: &str) -> bool {
        self.physical_devices.iter().any(|desc| {
            (self.manifest.exports_physical_device_proc_addr() && desc.physical_device_functions.contains(name))
                || desc.device_functions.contains(name)
        })
    }
}

impl fmt::Debug for IcdDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcdDriver")
            .field("manifest", &self.manifest)
            .field("physical_devices", &self.physical_devices.len())
            .finish()
    }
}
