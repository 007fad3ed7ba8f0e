//! Layer chain construction and resolution
//!
//! A chain is built once per instance (and once for the device path) from
//! the enabled layers in order. Link 0 is the outermost, application
//! facing layer; the terminator supplied at query time is always
//! innermost.
//!
//! Resolution walks the links from a starting position and stops at the
//! first link that registered the name, whatever its role: an
//! implementation answers the call by itself, an interception answers it
//! and forwards through its [`NextLink`](crate::NextLink). Only when no
//! link knows the name is the terminator consulted.

use std::collections::HashMap;

use crate::function::RawFunction;
use crate::handle::FunctionKind;
use crate::layer::{Layer, LayerRole, LayerScope};
use crate::loader::LoaderError;
use crate::router::DriverId;

/// Who provided a resolved pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Layer { position: usize, role: LayerRole },
    Driver(DriverId),
}

/// A resolved function entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedFunction {
    pub pointer: RawFunction,
    pub owner: Owner,
}

impl ResolvedFunction {
    pub fn driver(pointer: RawFunction, driver: DriverId) -> Self {
        Self {
            pointer,
            owner: Owner::Driver(driver),
        }
    }
}

/// Innermost link of a chain: the driver-level lookup
pub trait Terminator {
    fn terminate(&self, kind: FunctionKind, name: &str) -> Option<ResolvedFunction>;
}

impl<F> Terminator for F
where
    F: Fn(FunctionKind, &str) -> Option<ResolvedFunction>,
{
    fn terminate(&self, kind: FunctionKind, name: &str) -> Option<ResolvedFunction> {
        self(kind, name)
    }
}

/// Terminator that never finds anything
pub struct NullTerminator;

impl Terminator for NullTerminator {
    fn terminate(&self, _kind: FunctionKind, _name: &str) -> Option<ResolvedFunction> {
        None
    }
}

#[derive(Debug)]
struct LayerLink {
    name: String,
    entries: [HashMap<String, (LayerRole, RawFunction)>; 2],
}

impl LayerLink {
    fn new(layer: &Layer) -> Self {
        let mut entries: [HashMap<String, (LayerRole, RawFunction)>; 2] = Default::default();
        for kind in FunctionKind::ALL {
            let functions = layer.functions(kind);
            let table = &mut entries[kind.index()];
            for (name, f) in functions.implementations.iter() {
                table.insert(name.into(), (LayerRole::Implementation, f));
            }
            for (name, f) in functions.interceptions.iter() {
                table.insert(name.into(), (LayerRole::Interception, f));
            }
        }
        Self {
            name: layer.name().into(),
            entries,
        }
    }

    fn lookup(&self, kind: FunctionKind, name: &str) -> Option<(LayerRole, RawFunction)> {
        self.entries[kind.index()].get(name).copied()
    }
}

/// Ordered, immutable sequence of layer links
#[derive(Debug, Default)]
pub struct LayerChain {
    links: Vec<LayerLink>,
}

impl LayerChain {
    /// Build the chain made of the `layers` whose scope intersects `scope`.
    pub fn build(layers: &[Layer], scope: LayerScope) -> Result<Self, LoaderError> {
        let mut links: Vec<LayerLink> = Vec::new();

        for layer in layers.iter().filter(|l| l.scope().intersects(scope)) {
            layer.validate()?;
            if links.iter().any(|link| link.name == layer.name()) {
                return Err(LoaderError::DuplicateLayer(layer.name().into()));
            }

            log::debug!(
                "Chain link {}: {} ({} device, {} physical device functions)",
                links.len(),
                layer.name(),
                layer.implementations(FunctionKind::Device).len()
                    + layer.interceptions(FunctionKind::Device).len(),
                layer.implementations(FunctionKind::PhysicalDevice).len()
                    + layer.interceptions(FunctionKind::PhysicalDevice).len(),
            );
            links.push(LayerLink::new(layer));
        }

        Ok(Self { links })
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Layer names, outermost first
    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|link| link.name.as_str())
    }

    pub fn position_of(&self, layer_name: &str) -> Option<usize> {
        self.links.iter().position(|link| link.name == layer_name)
    }

    /// Whether any link registered `name` for any kind
    pub fn knows(&self, name: &str) -> bool {
        self.links
            .iter()
            .any(|link| link.entries.iter().any(|table| table.contains_key(name)))
    }

    /// Resolve `name` through the whole chain
    pub fn resolve(&self, kind: FunctionKind, name: &str, terminator: &dyn Terminator) -> Option<ResolvedFunction> {
        self.resolve_from(0, kind, name, terminator)
    }

    /// Resolve `name` starting at link `position`. Positions past the end
    /// go straight to the terminator.
    pub fn resolve_from(
        &self,
        position: usize,
        kind: FunctionKind,
        name: &str,
        terminator: &dyn Terminator,
    ) -> Option<ResolvedFunction> {
        for (offset, link) in self.links.iter().skip(position).enumerate() {
            if let Some((role, pointer)) = link.lookup(kind, name) {
                log::trace!("{} resolved by layer {} as {:?}", name, link.name, role);
                return Some(ResolvedFunction {
                    pointer,
                    owner: Owner::Layer {
                        position: position + offset,
                        role,
                    },
                });
            }
        }
        terminator.terminate(kind, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "system" fn outer(x: u32) -> u32 {
        x + 1
    }

    extern "system" fn inner(x: u32) -> u32 {
        x + 2
    }

    extern "system" fn base(x: u32) -> u32 {
        x + 3
    }

    type Pfn = extern "system" fn(u32) -> u32;

    fn raw(f: Pfn) -> RawFunction {
        RawFunction::new(f)
    }

    fn driver_terminator(kind: FunctionKind, name: &str) -> Option<ResolvedFunction> {
        (kind == FunctionKind::Device && name == "vkBase").then(|| ResolvedFunction::driver(raw(base), DriverId(0)))
    }

    fn call(resolved: Option<ResolvedFunction>, x: u32) -> Option<u32> {
        resolved.map(|r| {
            let f: Pfn = unsafe { r.pointer.cast() };
            f(x)
        })
    }

    #[test]
    fn test_outermost_implementation_wins() {
        let mut layer_0 = Layer::new("VK_LAYER_0");
        layer_0.implement(FunctionKind::Device, "vkBase", raw(outer));
        let mut layer_1 = Layer::new("VK_LAYER_1");
        layer_1.implement(FunctionKind::Device, "vkBase", raw(inner));

        let chain = LayerChain::build(&[layer_0, layer_1], LayerScope::DEVICE).unwrap();
        let resolved = chain.resolve(FunctionKind::Device, "vkBase", &driver_terminator);
        assert_eq!(
            resolved.map(|r| r.owner),
            Some(Owner::Layer {
                position: 0,
                role: LayerRole::Implementation
            })
        );
        assert_eq!(call(resolved, 10), Some(11));
    }

    #[test]
    fn test_resolve_from_skips_outer_links() {
        let mut layer_0 = Layer::new("VK_LAYER_0");
        layer_0.intercept(FunctionKind::Device, "vkBase", raw(outer));
        let mut layer_1 = Layer::new("VK_LAYER_1");
        layer_1.intercept(FunctionKind::Device, "vkBase", raw(inner));

        let chain = LayerChain::build(&[layer_0, layer_1], LayerScope::DEVICE).unwrap();
        assert_eq!(call(chain.resolve_from(1, FunctionKind::Device, "vkBase", &driver_terminator), 0), Some(2));
        assert_eq!(call(chain.resolve_from(2, FunctionKind::Device, "vkBase", &driver_terminator), 0), Some(3));
        assert_eq!(call(chain.resolve_from(9, FunctionKind::Device, "vkBase", &driver_terminator), 0), Some(3));
    }

    #[test]
    fn test_falls_through_to_terminator() {
        let chain = LayerChain::build(&[Layer::new("VK_LAYER_empty")], LayerScope::all()).unwrap();
        let resolved = chain.resolve(FunctionKind::Device, "vkBase", &driver_terminator);
        assert_eq!(resolved.map(|r| r.owner), Some(Owner::Driver(DriverId(0))));
        assert!(chain
            .resolve(FunctionKind::PhysicalDevice, "vkBase", &driver_terminator)
            .is_none());
        assert!(chain.resolve(FunctionKind::Device, "vkBase", &NullTerminator).is_none());
    }

    #[test]
    fn test_scope_filters_layers() {
        let layers = [Layer::instance_only("VK_LAYER_instance"), Layer::new("VK_LAYER_both")];
        let instance_chain = LayerChain::build(&layers, LayerScope::INSTANCE).unwrap();
        let device_chain = LayerChain::build(&layers, LayerScope::DEVICE).unwrap();

        assert_eq!(instance_chain.len(), 2);
        assert_eq!(device_chain.len(), 1);
        assert_eq!(device_chain.position_of("VK_LAYER_both"), Some(0));
        assert_eq!(device_chain.position_of("VK_LAYER_instance"), None);
    }

    #[test]
    fn test_malformed_layer_rejected() {
        let mut layer = Layer::new("VK_LAYER_bad");
        layer
            .implement(FunctionKind::PhysicalDevice, "vkBoth", raw(outer))
            .intercept(FunctionKind::PhysicalDevice, "vkBoth", raw(inner));
        assert!(matches!(
            LayerChain::build(&[layer], LayerScope::all()),
            Err(LoaderError::MalformedLayer { .. })
        ));
    }

    #[test]
    fn test_duplicate_layer_rejected() {
        let layers = [Layer::new("VK_LAYER_twice"), Layer::new("VK_LAYER_twice")];
        assert_eq!(
            LayerChain::build(&layers, LayerScope::all()).unwrap_err(),
            LoaderError::DuplicateLayer("VK_LAYER_twice".into())
        );
    }
}
