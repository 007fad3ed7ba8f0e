//! Layer definitions
//!
//! A layer supplies, per function kind, two tables: functions it fully
//! implements and functions it intercepts before forwarding to the next
//! link of the chain.

use bitflags::bitflags;

use crate::function::RawFunction;
use crate::handle::FunctionKind;
use crate::loader::LoaderError;
use crate::registry::FunctionRegistry;

bitflags! {
    /// Chains a layer takes part in
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LayerScope: u32 {
        /// Instance chain (physical-device functions)
        const INSTANCE = 1 << 0;
        /// Device chain (device, queue and command-buffer functions)
        const DEVICE = 1 << 1;
    }
}

/// How a layer handles a name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRole {
    /// The layer services the call itself; nothing below is consulted.
    Implementation,
    /// The layer wraps the call and forwards it through its next link.
    Interception,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct LayerFunctions {
    pub(crate) implementations: FunctionRegistry,
    pub(crate) interceptions: FunctionRegistry,
}

/// An enabled layer, as handed to the loader at setup
#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    scope: LayerScope,
    functions: [LayerFunctions; 2],
}

impl Layer {
    /// A layer taking part in both the instance and the device chain
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_scope(name, LayerScope::all())
    }

    /// A layer that only takes part in the instance chain
    pub fn instance_only(name: impl Into<String>) -> Self {
        Self::with_scope(name, LayerScope::INSTANCE)
    }

    pub fn with_scope(name: impl Into<String>, scope: LayerScope) -> Self {
        Self {
            name: name.into(),
            scope,
            functions: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> LayerScope {
        self.scope
    }

    /// Register a function this layer fully implements
    pub fn implement(&mut self, kind: FunctionKind, name: impl Into<String>, function: RawFunction) -> &mut Self {
        self.functions[kind.index()].implementations.register(name, function);
        self
    }

    /// Register a function this layer intercepts and forwards
    pub fn intercept(&mut self, kind: FunctionKind, name: impl Into<String>, function: RawFunction) -> &mut Self {
        self.functions[kind.index()].interceptions.register(name, function);
        self
    }

    pub fn implementations(&self, kind: FunctionKind) -> &FunctionRegistry {
        &self.functions[kind.index()].implementations
    }

    pub fn interceptions(&self, kind: FunctionKind) -> &FunctionRegistry {
        &self.functions[kind.index()].interceptions
    }

    /// Role and pointer this layer registered for `name`
    pub fn lookup(&self, kind: FunctionKind, name: &str) -> Option<(LayerRole, RawFunction)> {
        let functions = &self.functions[kind.index()];
        if let Some(f) = functions.implementations.lookup(name) {
            return Some((LayerRole::Implementation, f));
        }
        functions
            .interceptions
            .lookup(name)
            .map(|f| (LayerRole::Interception, f))
    }

    /// A name may be implemented or intercepted, never both.
    pub fn validate(&self) -> Result<(), LoaderError> {
        for functions in &self.functions {
            if let Some(name) = functions
                .implementations
                .names()
                .find(|name| functions.interceptions.contains(name))
            {
                return Err(LoaderError::MalformedLayer {
                    layer: self.name.clone(),
                    function: name.into(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn functions(&self, kind: FunctionKind) -> &LayerFunctions {
        &self.functions[kind.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "system" fn stub() {}

    fn raw() -> RawFunction {
        RawFunction::new(stub as extern "system" fn())
    }

    #[test]
    fn test_lookup_roles() {
        let mut layer = Layer::new("VK_LAYER_test");
        layer
            .implement(FunctionKind::Device, "vkImplemented", raw())
            .intercept(FunctionKind::PhysicalDevice, "vkIntercepted", raw());

        assert_eq!(
            layer.lookup(FunctionKind::Device, "vkImplemented").map(|(role, _)| role),
            Some(LayerRole::Implementation)
        );
        assert_eq!(
            layer
                .lookup(FunctionKind::PhysicalDevice, "vkIntercepted")
                .map(|(role, _)| role),
            Some(LayerRole::Interception)
        );
        // Kinds are separate tables
        assert!(layer.lookup(FunctionKind::PhysicalDevice, "vkImplemented").is_none());
        assert!(layer.validate().is_ok());
    }

    #[test]
    fn test_implement_and_intercept_same_name_rejected() {
        let mut layer = Layer::new("VK_LAYER_bad");
        layer
            .implement(FunctionKind::Device, "vkBoth", raw())
            .intercept(FunctionKind::Device, "vkBoth", raw());

        assert_eq!(
            layer.validate(),
            Err(LoaderError::MalformedLayer {
                layer: "VK_LAYER_bad".into(),
                function: "vkBoth".into(),
            })
        );
    }

    #[test]
    fn test_same_name_different_kinds_allowed() {
        let mut layer = Layer::new("VK_LAYER_split");
        layer
            .implement(FunctionKind::Device, "vkName", raw())
            .intercept(FunctionKind::PhysicalDevice, "vkName", raw());
        assert!(layer.validate().is_ok());
    }

    #[test]
    fn test_scope() {
        assert_eq!(Layer::new("a").scope(), LayerScope::INSTANCE | LayerScope::DEVICE);
        assert!(!Layer::instance_only("b").scope().contains(LayerScope::DEVICE));
    }
}
