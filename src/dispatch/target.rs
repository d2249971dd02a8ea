//! Executable call targets

use super::convention::{CallArgs, CallingConvention};
use super::native::NativeFunction;
use crate::context::BridgeContext;
use crate::error::PyResult;
use crate::object::Object;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a cached call target
pub type Executable = Arc<CallTarget>;

pub enum TargetKind {
    /// Native callable; arguments and results go through the bridge
    Native(NativeFunction),
    /// Managed callable reached through a native slot; called as is
    Managed(Object),
}

pub struct CallTarget {
    name: String,
    convention: CallingConvention,
    kind: TargetKind,
}

impl CallTarget {
    pub(crate) fn native(name: &str, convention: CallingConvention, function: NativeFunction) -> Self {
        Self {
            name: name.to_string(),
            convention,
            kind: TargetKind::Native(function),
        }
    }

    pub(crate) fn managed(name: &str, convention: CallingConvention, callable: Object) -> Self {
        Self {
            name: name.to_string(),
            convention,
            kind: TargetKind::Managed(callable),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    pub fn kind(&self) -> &TargetKind {
        &self.kind
    }

    pub fn needs_conversion(&self) -> bool {
        matches!(self.kind, TargetKind::Native(_))
    }

    /// Invoke with `receiver` as the native `self`
    pub fn invoke(
        &self,
        ctx: &BridgeContext,
        receiver: Option<&Object>,
        args: &[Object],
        kwargs: &[(String, Object)],
    ) -> PyResult<Object> {
        match &self.kind {
            TargetKind::Native(function) => {
                let call = CallArgs {
                    name: &self.name,
                    receiver,
                    args,
                    kwargs,
                };
                self.convention.wrapper().call(ctx, function, &call)
            }
            TargetKind::Managed(callable) => {
                let full: SmallVec<[Object; 8]> = receiver.cloned().into_iter().chain(args.iter().cloned()).collect();
                ctx.call(callable, &full, kwargs)
            }
        }
    }
}

impl fmt::Debug for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            TargetKind::Native(function) => format!("{:?}", function),
            TargetKind::Managed(callable) => callable.repr(),
        };
        f.debug_struct("CallTarget")
            .field("name", &self.name)
            .field("convention", &self.convention.name())
            .field("kind", &kind)
            .finish()
    }
}
