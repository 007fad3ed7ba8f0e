//! Vulkan loader dispatch for unknown functions
//!
//! Applications ask the loader for functions by name. Functions the loader
//! has never heard of are still answered: the loader hands out a trampoline
//! that is bound to a physical device, device, queue or command buffer, and
//! the call lands on the first enabled layer or driver that provides the
//! function for that handle.
//!
//! Setup goes through [`VulkanLoader`]: add drivers, enable layers, then
//! create an [`Instance`]. Everything registered before that point is
//! frozen, so queries never take a write lock.

pub mod chain;
pub mod device;
pub mod dispatch;
pub mod function;
pub mod handle;
pub mod icd;
pub mod instance;
pub mod layer;
pub mod loader;
pub mod registry;
pub mod router;
pub mod trampoline;

pub use chain::{LayerChain, NullTerminator, Owner, ResolvedFunction, Terminator};
pub use device::{Device, DeviceCreateInfo, DeviceQueueCreateInfo};
pub use dispatch::{DispatchTable, KNOWN_DEVICE_FUNCTIONS};
pub use function::{FunctionPointer, RawFunction, VoidFunction};
pub use handle::{
    CommandBufferHandle, CommandPoolHandle, DeviceHandle, Dispatchable, FunctionKind, PhysicalDeviceHandle,
    QueueHandle,
};
pub use icd::{IcdDriver, IcdManifest, PhysicalDeviceDesc, PhysicalDeviceProperties, PhysicalDeviceType, QueueFamilyProperties};
pub use instance::{Instance, QueryScope};
pub use layer::{Layer, LayerRole, LayerScope};
pub use loader::{LoaderConfig, LoaderError, VulkanLoader};
pub use registry::{FunctionRegistry, SymbolSource};
pub use router::{DriverId, DriverRouter, PhysicalDeviceEntry};
pub use trampoline::{Misuse, MisusePolicy, NextLink, Trampoline};

/// Vulkan API version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VulkanVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VulkanVersion {
    pub const VK_1_0: Self = Self {
        major: 1,
        minor: 0,
        patch: 0,
    };
    pub const VK_1_1: Self = Self {
        major: 1,
        minor: 1,
        patch: 0,
    };
    pub const VK_1_2: Self = Self {
        major: 1,
        minor: 2,
        patch: 0,
    };
    pub const VK_1_3: Self = Self {
        major: 1,
        minor: 3,
        patch: 0,
    };

    pub fn to_u32(self) -> u32 {
        (self.major << 22) | (self.minor << 12) | self.patch
    }

    pub fn from_u32(version: u32) -> Self {
        Self {
            major: version >> 22,
            minor: (version >> 12) & 0x3FF,
            patch: version & 0xFFF,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_packing() {
        let packed = VulkanVersion::VK_1_3.to_u32();
        assert_eq!(packed, (1 << 22) | (3 << 12));
        assert_eq!(VulkanVersion::from_u32(packed), VulkanVersion::VK_1_3);
        assert!(VulkanVersion::VK_1_1.to_u32() < VulkanVersion::VK_1_2.to_u32());
    }

    #[test]
    fn test_shared_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Instance>();
        assert_send_sync::<Device>();
        assert_send_sync::<Trampoline>();
        assert_send_sync::<NextLink>();
    }
}
