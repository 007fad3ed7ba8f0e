//! Logical devices and their child objects
//!
//! A device records, at creation, which driver and physical device it came
//! from. Queues and command buffers point back at the same record, so
//! resolving a function through any of them never goes back to physical
//! device enumeration.

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dispatch::DispatchTable;
use crate::function::RawFunction;
use crate::handle::{CommandBufferHandle, CommandPoolHandle, DeviceHandle, FunctionKind, PhysicalDeviceHandle, QueueHandle};
use crate::instance::{DeviceTerminator, InstanceShared};
use crate::loader::{LoaderError, Result};
use crate::router::{DriverId, PhysicalDeviceEntry};

/// `VkDeviceQueueCreateInfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceQueueCreateInfo {
    pub queue_family_index: u32,
    pub queue_count: u32,
}

impl Default for DeviceQueueCreateInfo {
    fn default() -> Self {
        Self {
            queue_family_index: 0,
            queue_count: 1,
        }
    }
}

/// `VkDeviceCreateInfo`
#[derive(Debug, Clone, Default)]
pub struct DeviceCreateInfo {
    pub queue_create_infos: Vec<DeviceQueueCreateInfo>,
}

impl DeviceCreateInfo {
    pub fn add_device_queue(mut self, info: DeviceQueueCreateInfo) -> Self {
        self.queue_create_infos.push(info);
        self
    }
}

/// Per-device routing record shared by the device and its children
#[derive(Debug)]
pub(crate) struct DeviceDispatch {
    pub(crate) handle: DeviceHandle,
    pub(crate) physical_device: PhysicalDeviceHandle,
    pub(crate) entry: PhysicalDeviceEntry,
    pub(crate) table: DispatchTable,
}

#[derive(Debug)]
struct CommandPool {
    queue_family_index: u32,
    buffers: Vec<CommandBufferHandle>,
}

/// A created device
pub struct Device {
    shared: Arc<InstanceShared>,
    dispatch: Arc<DeviceDispatch>,
    queues: HashMap<(u32, u32), QueueHandle>,
    command_pools: Mutex<HashMap<CommandPoolHandle, CommandPool>>,
}

impl Device {
    pub(crate) fn create(
        shared: Arc<InstanceShared>,
        physical_device: PhysicalDeviceHandle,
        info: &DeviceCreateInfo,
    ) -> Result<Self> {
        let entry = shared
            .router
            .entry(physical_device)
            .ok_or(LoaderError::UnknownPhysicalDevice(physical_device.as_raw()))?;
        let driver = shared
            .driver(entry.driver)
            .ok_or(LoaderError::UnknownPhysicalDevice(physical_device.as_raw()))?;
        let desc = driver
            .physical_devices()
            .get(entry.index)
            .ok_or(LoaderError::UnknownPhysicalDevice(physical_device.as_raw()))?;

        for request in &info.queue_create_infos {
            let available = desc
                .queue_families
                .get(request.queue_family_index as usize)
                .map_or(0, |family| family.queue_count);
            if request.queue_count == 0 || request.queue_count > available {
                return Err(LoaderError::InvalidQueueRequest {
                    family: request.queue_family_index,
                    count: request.queue_count,
                });
            }
        }

        let terminator = DeviceTerminator { driver, entry };
        let table = DispatchTable::build(
            shared.config.known_device_functions.iter().map(String::as_str),
            |name| {
                shared
                    .device_chain
                    .resolve(FunctionKind::Device, name, &terminator)
                    .map(|resolved| resolved.pointer)
            },
        );

        let dispatch = Arc::new(DeviceDispatch {
            handle: shared.handles.device(),
            physical_device,
            entry,
            table,
        });

        let mut queues = HashMap::new();
        for request in &info.queue_create_infos {
            for index in 0..request.queue_count {
                queues
                    .entry((request.queue_family_index, index))
                    .or_insert_with(|| shared.handles.queue());
            }
        }

        {
            let mut objects = shared.device_objects.write();
            objects.insert(dispatch.handle.as_raw(), Arc::clone(&dispatch));
            for queue in queues.values() {
                objects.insert(queue.as_raw(), Arc::clone(&dispatch));
            }
        }

        log::info!(
            "Created device {:?} on {:?} ({}), {} queue(s), {} known function(s)",
            dispatch.handle,
            physical_device,
            driver.manifest.name,
            queues.len(),
            dispatch.table.len()
        );

        Ok(Self {
            shared,
            dispatch,
            queues,
            command_pools: Mutex::new(HashMap::new()),
        })
    }

    pub fn handle(&self) -> DeviceHandle {
        self.dispatch.handle
    }

    pub fn physical_device(&self) -> PhysicalDeviceHandle {
        self.dispatch.physical_device
    }

    pub fn driver(&self) -> DriverId {
        self.dispatch.entry.driver
    }

    /// `vkGetDeviceProcAddr`
    ///
    /// The returned pointer may be called with this device, its queues and
    /// its command buffers.
    pub fn get_device_function(&self, name: &str) -> Option<RawFunction> {
        if let Some(f) = self.dispatch.table.get(name) {
            return Some(f);
        }
        let resolved = self.shared.resolve_device(&self.dispatch, 0, name);
        if resolved.is_none() {
            log::trace!("{} not found for {:?}", name, self.dispatch.handle);
        }
        resolved.map(|r| r.pointer)
    }

    /// `vkGetDeviceQueue`
    pub fn get_queue(&self, queue_family_index: u32, queue_index: u32) -> Option<QueueHandle> {
        self.queues.get(&(queue_family_index, queue_index)).copied()
    }

    /// `vkCreateCommandPool`
    pub fn create_command_pool(&self, queue_family_index: u32) -> Result<CommandPoolHandle> {
        if !self.queues.keys().any(|(family, _)| *family == queue_family_index) {
            return Err(LoaderError::InvalidQueueRequest {
                family: queue_family_index,
                count: 0,
            });
        }

        let pool = self.shared.handles.command_pool();
        self.command_pools.lock().insert(
            pool,
            CommandPool {
                queue_family_index,
                buffers: Vec::new(),
            },
        );
        Ok(pool)
    }

    /// `vkAllocateCommandBuffers`
    pub fn allocate_command_buffers(&self, pool: CommandPoolHandle, count: u32) -> Result<Vec<CommandBufferHandle>> {
        let mut pools = self.command_pools.lock();
        let state = pools
            .get_mut(&pool)
            .ok_or(LoaderError::UnknownCommandPool(pool.as_raw()))?;

        let buffers: Vec<CommandBufferHandle> = (0..count).map(|_| self.shared.handles.command_buffer()).collect();
        {
            let mut objects = self.shared.device_objects.write();
            for buffer in &buffers {
                objects.insert(buffer.as_raw(), Arc::clone(&self.dispatch));
            }
        }
        state.buffers.extend_from_slice(&buffers);

        log::debug!(
            "Allocated {} command buffer(s) from pool {:?} (family {})",
            count,
            pool,
            state.queue_family_index
        );
        Ok(buffers)
    }

    /// `vkFreeCommandBuffers`
    pub fn free_command_buffers(&self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) -> Result<()> {
        let mut pools = self.command_pools.lock();
        let state = pools
            .get_mut(&pool)
            .ok_or(LoaderError::UnknownCommandPool(pool.as_raw()))?;

        let mut freed = Vec::with_capacity(buffers.len());
        state.buffers.retain(|buffer| {
            if buffers.contains(buffer) {
                freed.push(*buffer);
                false
            } else {
                true
            }
        });
        if freed.len() < buffers.len() {
            log::warn!(
                "Ignoring {} command buffer(s) not allocated from pool {:?}",
                buffers.len() - freed.len(),
                pool
            );
        }

        let mut objects = self.shared.device_objects.write();
        for buffer in &freed {
            objects.remove(&buffer.as_raw());
        }
        Ok(())
    }

    /// `vkDestroyCommandPool`; frees every buffer allocated from it
    pub fn destroy_command_pool(&self, pool: CommandPoolHandle) -> Result<()> {
        let state = self
            .command_pools
            .lock()
            .remove(&pool)
            .ok_or(LoaderError::UnknownCommandPool(pool.as_raw()))?;

        let mut objects = self.shared.device_objects.write();
        for buffer in &state.buffers {
            objects.remove(&buffer.as_raw());
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let pools = core::mem::take(self.command_pools.get_mut());
        let mut objects = self.shared.device_objects.write();
        objects.remove(&self.dispatch.handle.as_raw());
        for queue in self.queues.values() {
            objects.remove(&queue.as_raw());
        }
        for pool in pools.values() {
            for buffer in &pool.buffers {
                objects.remove(&buffer.as_raw());
            }
        }
        log::info!("Destroyed device {:?}", self.dispatch.handle);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.dispatch.handle)
            .field("physical_device", &self.dispatch.physical_device)
            .field("driver", &self.dispatch.entry.driver)
            .field("queues", &self.queues.len())
            .finish()
    }
}
