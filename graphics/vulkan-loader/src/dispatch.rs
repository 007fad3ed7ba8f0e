//! Dispatch table for statically known functions
//!
//! Built once when the owning object is created and never modified.
//! Unknown functions are not cached here; they are resolved through the
//! layer chain on every query.

use std::collections::HashMap;

use crate::function::RawFunction;

/// Device functions the loader knows by name
pub const KNOWN_DEVICE_FUNCTIONS: &[&str] = &[
    "vkDestroyDevice",
    "vkGetDeviceQueue",
    "vkQueueSubmit",
    "vkQueueWaitIdle",
    "vkDeviceWaitIdle",
    "vkCreateCommandPool",
    "vkDestroyCommandPool",
    "vkAllocateCommandBuffers",
    "vkFreeCommandBuffers",
    "vkBeginCommandBuffer",
    "vkEndCommandBuffer",
];

#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<String, RawFunction>,
}

impl DispatchTable {
    /// Resolve each of `names` once. Names `resolve` cannot find are left
    /// out of the table.
    pub fn build<'a, I, F>(names: I, mut resolve: F) -> Self
    where
        I: IntoIterator<Item = &'a str>,
        F: FnMut(&str) -> Option<RawFunction>,
    {
        let entries = names
            .into_iter()
            .filter_map(|name| resolve(name).map(|f| (name.to_string(), f)))
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<RawFunction> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "system" fn queue_submit() -> i32 {
        0
    }

    #[test]
    fn test_build_skips_unresolved() {
        let submit = RawFunction::new(queue_submit as extern "system" fn() -> i32);
        let table = DispatchTable::build(KNOWN_DEVICE_FUNCTIONS.iter().copied(), |name| {
            (name == "vkQueueSubmit").then_some(submit)
        });

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("vkQueueSubmit"), Some(submit));
        assert!(table.get("vkGetDeviceQueue").is_none());
    }

    #[test]
    fn test_resolves_each_name_once() {
        let mut calls = 0;
        let table = DispatchTable::build(["vkA", "vkB"], |_| {
            calls += 1;
            None
        });
        assert!(table.is_empty());
        assert_eq!(calls, 2);
    }
}
