//! Unknown-function registry
//!
//! Maps a function name to the pointer the owner (a driver's physical
//! device, or a layer) provides for it. Registries are filled while the
//! loader is being set up and are only reachable through shared references
//! once an instance exists.

use std::collections::HashMap;

use crate::function::RawFunction;

/// `resolve_symbol(library, name)`: the symbol lookup primitive of a loaded
/// library.
pub trait SymbolSource {
    fn resolve_symbol(&self, name: &str) -> Option<RawFunction>;
}

/// Name to pointer map
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, RawFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`. A later registration of the same name replaces the
    /// earlier one; the replaced pointer is returned.
    pub fn register(&mut self, name: impl Into<String>, function: RawFunction) -> Option<RawFunction> {
        let name = name.into();
        let previous = self.entries.insert(name.clone(), function);
        if let Some(previous) = previous {
            log::debug!("Redefining {} ({:?} -> {:?})", name, previous, function);
        }
        previous
    }

    pub fn lookup(&self, name: &str) -> Option<RawFunction> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Resolve each of `names` through `source` and register the hits.
    /// Returns how many were found.
    pub fn import(&mut self, source: &dyn SymbolSource, names: &[&str]) -> usize {
        let mut found = 0;
        for &name in names {
            match source.resolve_symbol(name) {
                Some(function) => {
                    self.register(name, function);
                    found += 1;
                }
                None => log::trace!("Symbol {} not exported", name),
            }
        }
        found
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, RawFunction)> {
        self.entries.iter().map(|(name, f)| (name.as_str(), *f))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SymbolSource for FunctionRegistry {
    fn resolve_symbol(&self, name: &str) -> Option<RawFunction> {
        self.lookup(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "system" fn one() -> u32 {
        1
    }

    extern "system" fn two() -> u32 {
        2
    }

    fn raw(f: extern "system" fn() -> u32) -> RawFunction {
        RawFunction::new(f)
    }

    #[test]
    fn test_lookup_missing() {
        let registry = FunctionRegistry::new();
        assert!(registry.lookup("vkNotReal").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = FunctionRegistry::new();
        assert!(registry.register("vkFoo", raw(one)).is_none());
        assert_eq!(registry.register("vkFoo", raw(two)), Some(raw(one)));

        let f: extern "system" fn() -> u32 = unsafe { registry.lookup("vkFoo").unwrap().cast() };
        assert_eq!(f(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_import_from_symbol_source() {
        let mut library = FunctionRegistry::new();
        library.register("vkA", raw(one));
        library.register("vkB", raw(two));

        let mut registry = FunctionRegistry::new();
        let found = registry.import(&library, &["vkA", "vkMissing"]);
        assert_eq!(found, 1);
        assert!(registry.contains("vkA"));
        assert!(!registry.contains("vkB"));
        assert!(!registry.contains("vkMissing"));
    }
}
