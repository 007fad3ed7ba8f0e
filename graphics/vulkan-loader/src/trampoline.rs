//! Trampolines, next links and misuse diagnostics
//!
//! A [`Trampoline`] is what an instance-level query hands back for an
//! unknown function: it is not yet tied to a driver. Binding it to a
//! dispatchable handle walks the chain that handle belongs to and yields
//! the pointer to call. Binding a name the handle's driver does not
//! support is a misuse of the API and is enforced by [`MisusePolicy`].

use core::fmt;
use std::sync::Arc;

use crate::function::RawFunction;
use crate::handle::{Dispatchable, FunctionKind};
use crate::instance::InstanceShared;
use crate::router::DriverId;

/// Use of a function against a handle that cannot serve it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Misuse {
    /// The handle's driver (and every layer) lacks the function
    Unsupported { function: String, kind: FunctionKind },
    /// A query scoped to one driver named another driver's physical device
    CrossDriver {
        function: String,
        expected: DriverId,
        actual: DriverId,
    },
    /// The handle was never created by this instance or is already gone
    UnknownHandle { function: String, handle: u64 },
}

impl Misuse {
    /// Name of the offending function
    pub fn function(&self) -> &str {
        match self {
            Misuse::Unsupported { function, .. }
            | Misuse::CrossDriver { function, .. }
            | Misuse::UnknownHandle { function, .. } => function,
        }
    }
}

impl fmt::Display for Misuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Misuse::Unsupported { function, kind } => {
                write!(f, "Extension {} not supported for this {}", function, kind)
            }
            Misuse::CrossDriver {
                function,
                expected,
                actual,
            } => write!(
                f,
                "{} queried through {} with a physical device owned by {}",
                function, expected, actual
            ),
            Misuse::UnknownHandle { function, handle } => {
                write!(f, "{} called with unknown handle {:#x}", function, handle)
            }
        }
    }
}

impl std::error::Error for Misuse {}

/// How a [`Misuse`] terminates the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisusePolicy {
    /// Log the diagnostic and abort the process
    Abort,
    /// Panic with the diagnostic as message
    Panic,
}

impl Default for MisusePolicy {
    fn default() -> Self {
        if cfg!(feature = "panic-on-misuse") {
            MisusePolicy::Panic
        } else {
            MisusePolicy::Abort
        }
    }
}

impl MisusePolicy {
    pub fn enforce(self, misuse: &Misuse) -> ! {
        log::error!("{}", misuse);
        match self {
            MisusePolicy::Abort => std::process::abort(),
            MisusePolicy::Panic => panic!("{}", misuse),
        }
    }
}

/// Instance-level result of an unknown-function query
#[derive(Clone)]
pub struct Trampoline {
    name: Arc<str>,
    shared: Arc<InstanceShared>,
}

impl Trampoline {
    pub(crate) fn new(name: &str, shared: Arc<InstanceShared>) -> Self {
        Self {
            name: name.into(),
            shared,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve the function for `handle` without enforcing the misuse
    /// policy.
    pub fn try_bind<H: Dispatchable>(&self, handle: H) -> Result<RawFunction, Misuse> {
        if H::KIND == FunctionKind::Device {
            let dispatch = self.shared.device_dispatch(handle.raw()).ok_or_else(|| Misuse::UnknownHandle {
                function: self.name.to_string(),
                handle: handle.raw(),
            })?;
            if let Some(f) = dispatch.table.get(&self.name) {
                return Ok(f);
            }
        }

        self.shared
            .resolve_for(handle, &self.name, 0)?
            .map(|resolved| resolved.pointer)
            .ok_or_else(|| Misuse::Unsupported {
                function: self.name.to_string(),
                kind: H::KIND,
            })
    }

    /// Resolve the function for `handle`. A handle whose driver cannot
    /// serve the function is fatal.
    pub fn bind<H: Dispatchable>(&self, handle: H) -> RawFunction {
        match self.try_bind(handle) {
            Ok(f) => f,
            Err(misuse) => self.shared.config.misuse_policy.enforce(&misuse),
        }
    }
}

impl fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trampoline").field("name", &self.name).finish()
    }
}

/// A layer's view of the chain below itself
///
/// `next` never returns the layer's own entries, so an interceptor can
/// forward a call without recursing into itself.
#[derive(Clone)]
pub struct NextLink {
    layer: Arc<str>,
    instance_position: usize,
    device_position: Option<usize>,
    shared: Arc<InstanceShared>,
}

impl NextLink {
    pub(crate) fn new(
        layer: &str,
        instance_position: usize,
        device_position: Option<usize>,
        shared: Arc<InstanceShared>,
    ) -> Self {
        Self {
            layer: layer.into(),
            instance_position,
            device_position,
            shared,
        }
    }

    pub fn layer_name(&self) -> &str {
        &self.layer
    }

    /// The next function in the chain for `name` as seen from `handle`,
    /// or `None` when nothing below this layer provides it. A handle this
    /// instance does not know is fatal.
    pub fn next<H: Dispatchable>(&self, handle: H, name: &str) -> Option<RawFunction> {
        match self.try_next(handle, name) {
            Ok(f) => f,
            Err(misuse) => {
                log::error!("{} forwarded {}", self.layer, name);
                self.shared.config.misuse_policy.enforce(&misuse)
            }
        }
    }

    pub fn try_next<H: Dispatchable>(&self, handle: H, name: &str) -> Result<Option<RawFunction>, Misuse> {
        let position = match H::KIND {
            FunctionKind::PhysicalDevice => self.instance_position + 1,
            // Layers outside the device chain see all of it.
            FunctionKind::Device => self.device_position.map_or(0, |p| p + 1),
        };

        Ok(self
            .shared
            .resolve_for(handle, name, position)?
            .map(|r| r.pointer))
    }
}

impl fmt::Debug for NextLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextLink")
            .field("layer", &self.layer)
            .field("instance_position", &self.instance_position)
            .field("device_position", &self.device_position)
            .finish()
    }
}
