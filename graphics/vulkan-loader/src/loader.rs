//! Vulkan loader implementation

use core::fmt;

use crate::dispatch::KNOWN_DEVICE_FUNCTIONS;
use crate::icd::IcdDriver;
use crate::instance::Instance;
use crate::layer::Layer;
use crate::trampoline::MisusePolicy;
use crate::VulkanVersion;

/// Loader error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// No drivers found
    NoDriversFound,
    /// Driver load failed
    DriverLoadFailed(String),
    /// Unsupported API version
    UnsupportedVersion,
    /// A layer both implements and intercepts the same function
    MalformedLayer { layer: String, function: String },
    /// The same layer was enabled twice
    DuplicateLayer(String),
    /// A physical device was claimed by a second driver
    DuplicatePhysicalDevice(u64),
    /// Handle or index does not name a physical device
    UnknownPhysicalDevice(u64),
    /// Queue family missing or too few queues in it
    InvalidQueueRequest { family: u32, count: u32 },
    /// Command pool handle not owned by the device
    UnknownCommandPool(u64),
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::NoDriversFound => write!(f, "No Vulkan drivers found"),
            LoaderError::DriverLoadFailed(msg) => write!(f, "Driver load failed: {}", msg),
            LoaderError::UnsupportedVersion => write!(f, "Unsupported API version"),
            LoaderError::MalformedLayer { layer, function } => write!(
                f,
                "Layer {} both implements and intercepts {}",
                layer, function
            ),
            LoaderError::DuplicateLayer(name) => write!(f, "Layer {} enabled twice", name),
            LoaderError::DuplicatePhysicalDevice(handle) => {
                write!(f, "Physical device {:#x} already owned by a driver", handle)
            }
            LoaderError::UnknownPhysicalDevice(handle) => {
                write!(f, "Unknown physical device {:#x}", handle)
            }
            LoaderError::InvalidQueueRequest { family, count } => {
                write!(f, "Cannot create {} queue(s) in family {}", count, family)
            }
            LoaderError::UnknownCommandPool(handle) => {
                write!(f, "Unknown command pool {:#x}", handle)
            }
        }
    }
}

impl std::error::Error for LoaderError {}

/// Result type for loader operations
pub type Result<T> = core::result::Result<T, LoaderError>;

/// Instance-wide loader settings
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Lowest API version a driver must support to be enabled
    pub api_version: VulkanVersion,
    /// What happens when a function is used against a handle that cannot
    /// serve it
    pub misuse_policy: MisusePolicy,
    /// Names placed in each device's dispatch table at creation
    pub known_device_functions: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            api_version: VulkanVersion::VK_1_0,
            misuse_policy: MisusePolicy::default(),
            known_device_functions: KNOWN_DEVICE_FUNCTIONS.iter().map(|name| name.to_string()).collect(),
        }
    }
}

/// Main Vulkan loader
///
/// Collects drivers and layers, then freezes them into an [`Instance`].
#[derive(Debug, Default)]
pub struct VulkanLoader {
    config: LoaderConfig,
    /// Candidate ICDs
    drivers: Vec<IcdDriver>,
    /// Enabled layers, outermost first
    layers: Vec<Layer>,
}

impl VulkanLoader {
    /// Create a new loader
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        log::info!("Creating Vulkan loader");
        Self {
            config,
            drivers: Vec::new(),
            layers: Vec::new(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Add a driver; drivers are enumerated in the order they are added
    pub fn add_driver(&mut self, driver: IcdDriver) -> &mut Self {
        self.drivers.push(driver);
        self
    }

    /// Get available drivers
    pub fn drivers(&self) -> &[IcdDriver] {
        &self.drivers
    }

    /// Enable a layer. The first enabled layer is the outermost.
    pub fn enable_layer(&mut self, layer: Layer) -> &mut Self {
        self.layers.push(layer);
        self
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Load the drivers, build the layer chains and create the instance
    pub fn create_instance(self) -> Result<Instance> {
        let VulkanLoader {
            config,
            drivers,
            layers,
        } = self;

        if config.api_version.major != 1 {
            return Err(LoaderError::UnsupportedVersion);
        }

        let loaded_drivers: Vec<IcdDriver> = drivers
            .into_iter()
            .filter_map(|driver| match driver.load(&config) {
                Ok(driver) => Some(driver),
                Err(e) => {
                    log::warn!("Failed to load driver: {}", e);
                    None
                }
            })
            .collect();

        if loaded_drivers.is_empty() {
            return Err(LoaderError::NoDriversFound);
        }

        log::info!("Loaded {} Vulkan driver(s)", loaded_drivers.len());

        Instance::new(config, loaded_drivers, &layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icd::{IcdManifest, PhysicalDeviceDesc};

    fn driver(name: &str, version: VulkanVersion) -> IcdDriver {
        IcdDriver::new(IcdManifest::new(name, version)).with_physical_device(PhysicalDeviceDesc::new("gpu"))
    }

    #[test]
    fn test_no_drivers() {
        assert_eq!(
            VulkanLoader::new().create_instance().unwrap_err(),
            LoaderError::NoDriversFound
        );
    }

    #[test]
    fn test_old_drivers_skipped() {
        let mut loader = VulkanLoader::with_config(LoaderConfig {
            api_version: VulkanVersion::VK_1_2,
            ..LoaderConfig::default()
        });
        loader
            .add_driver(driver("old", VulkanVersion::VK_1_0))
            .add_driver(driver("new", VulkanVersion::VK_1_3));

        let instance = loader.create_instance().unwrap();
        assert_eq!(instance.driver_count(), 1);
        assert_eq!(instance.enumerate_physical_devices().len(), 1);
    }

    #[test]
    fn test_all_drivers_too_old() {
        let mut loader = VulkanLoader::with_config(LoaderConfig {
            api_version: VulkanVersion::VK_1_3,
            ..LoaderConfig::default()
        });
        loader.add_driver(driver("old", VulkanVersion::VK_1_1));
        assert_eq!(loader.create_instance().unwrap_err(), LoaderError::NoDriversFound);
    }

    #[test]
    fn test_unsupported_api_version() {
        let mut loader = VulkanLoader::with_config(LoaderConfig {
            api_version: VulkanVersion {
                major: 2,
                minor: 0,
                patch: 0,
            },
            ..LoaderConfig::default()
        });
        loader.add_driver(driver("any", VulkanVersion::VK_1_3));
        assert_eq!(loader.create_instance().unwrap_err(), LoaderError::UnsupportedVersion);
    }

    #[test]
    fn test_error_display() {
        let err = LoaderError::MalformedLayer {
            layer: "VK_LAYER_x".into(),
            function: "vkFoo".into(),
        };
        assert_eq!(err.to_string(), "Layer VK_LAYER_x both implements and intercepts vkFoo");
    }
}
