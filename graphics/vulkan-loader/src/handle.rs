//! Opaque object handles
//!
//! Every handle the loader hands out is a non-zero 64-bit value allocated
//! by the owning instance. Handles are `#[repr(transparent)]` so they can
//! be passed straight through to driver and layer functions.

use core::fmt;
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU64, Ordering};

/// Family of functions a dispatchable handle resolves against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// Functions whose first parameter is a physical device
    PhysicalDevice,
    /// Functions whose first parameter is a device, queue or command buffer
    Device,
}

impl FunctionKind {
    pub const ALL: [FunctionKind; 2] = [FunctionKind::PhysicalDevice, FunctionKind::Device];

    pub(crate) fn index(self) -> usize {
        match self {
            FunctionKind::PhysicalDevice => 0,
            FunctionKind::Device => 1,
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::PhysicalDevice => write!(f, "physical device"),
            FunctionKind::Device => write!(f, "device"),
        }
    }
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Raw handle value
            pub fn as_raw(self) -> u64 {
                self.0.get()
            }

            /// Rebuild a handle from its raw value; `None` for the null handle
            pub fn from_raw(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0.get())
            }
        }
    };
}

define_handle!(
    /// `VkPhysicalDevice`
    PhysicalDeviceHandle
);
define_handle!(
    /// `VkDevice`
    DeviceHandle
);
define_handle!(
    /// `VkQueue`
    QueueHandle
);
define_handle!(
    /// `VkCommandBuffer`
    CommandBufferHandle
);
define_handle!(
    /// `VkCommandPool` (non-dispatchable)
    CommandPoolHandle
);

/// A handle that carries a dispatch chain
pub trait Dispatchable: Copy + fmt::Debug {
    /// Function family resolved through this handle
    const KIND: FunctionKind;

    fn raw(self) -> u64;
}

impl Dispatchable for PhysicalDeviceHandle {
    const KIND: FunctionKind = FunctionKind::PhysicalDevice;

    fn raw(self) -> u64 {
        self.as_raw()
    }
}

impl Dispatchable for DeviceHandle {
    const KIND: FunctionKind = FunctionKind::Device;

    fn raw(self) -> u64 {
        self.as_raw()
    }
}

impl Dispatchable for QueueHandle {
    const KIND: FunctionKind = FunctionKind::Device;

    fn raw(self) -> u64 {
        self.as_raw()
    }
}

impl Dispatchable for CommandBufferHandle {
    const KIND: FunctionKind = FunctionKind::Device;

    fn raw(self) -> u64 {
        self.as_raw()
    }
}

/// Per-instance handle allocator
#[derive(Debug)]
pub(crate) struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    fn next_raw(&self) -> NonZeroU64 {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        // Starts at 1 and would need 2^64 allocations to wrap.
        NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN)
    }

    pub(crate) fn physical_device(&self) -> PhysicalDeviceHandle {
        PhysicalDeviceHandle(self.next_raw())
    }

    pub(crate) fn device(&self) -> DeviceHandle {
        DeviceHandle(self.next_raw())
    }

    pub(crate) fn queue(&self) -> QueueHandle {
        QueueHandle(self.next_raw())
    }

    pub(crate) fn command_buffer(&self) -> CommandBufferHandle {
        CommandBufferHandle(self.next_raw())
    }

    pub(crate) fn command_pool(&self) -> CommandPoolHandle {
        CommandPoolHandle(self.next_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let alloc = HandleAllocator::new();
        let a = alloc.physical_device();
        let b = alloc.device();
        let c = alloc.queue();
        assert_ne!(a.as_raw(), b.as_raw());
        assert_ne!(b.as_raw(), c.as_raw());
        assert_ne!(a.as_raw(), 0);
    }

    #[test]
    fn test_null_handle() {
        assert!(DeviceHandle::from_raw(0).is_none());
        assert_eq!(DeviceHandle::from_raw(7).map(|h| h.as_raw()), Some(7));
    }

    #[test]
    fn test_dispatch_kind() {
        assert_eq!(PhysicalDeviceHandle::KIND, FunctionKind::PhysicalDevice);
        assert_eq!(QueueHandle::KIND, FunctionKind::Device);
        assert_eq!(CommandBufferHandle::KIND, FunctionKind::Device);
    }
}
