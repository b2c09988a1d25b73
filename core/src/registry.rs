//! Process-wide registry of named evaluation callbacks.
//!
//! Operation nodes reference host work by name; the name is resolved to a
//! function pointer once, when the operation is added to a graph, never per
//! dispatch.

use failure::Fail;
use fnv::FnvHashMap;
use parking_lot::RwLock;

use crate::{context::EvaluationContext, id::OpContext};

/// Error reported by an operation callback.
#[derive(Clone, Debug, Fail)]
#[fail(display = "operation callback failed: {}", message)]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    /// Create a new callback error with the given diagnostic message.
    pub fn new(message: impl Into<String>) -> Self {
        CallbackError {
            message: message.into(),
        }
    }

    /// Diagnostic message the host reported.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Signature of an evaluation callback.
///
/// Callbacks must not re-enter the scheduler and must only touch state
/// reachable from their [`OpContext`].
pub type EvalFn = fn(&EvaluationContext, &OpContext) -> Result<(), CallbackError>;

lazy_static::lazy_static! {
    static ref EVAL_FUNCTIONS: RwLock<FnvHashMap<String, EvalFn>> =
        RwLock::new(FnvHashMap::default());
}

/// Register a named evaluation callback.
///
/// Re-registering a name replaces the previous entry; operations added
/// before the replacement keep the pointer they resolved.
pub fn register_eval_function(name: impl Into<String>, func: EvalFn) {
    let name = name.into();
    log::trace!("Register eval function `{}`", name);
    EVAL_FUNCTIONS.write().insert(name, func);
}

/// Resolve a callback name to the registered function pointer.
pub fn resolve_eval_function(name: &str) -> Option<EvalFn> {
    EVAL_FUNCTIONS.read().get(name).copied()
}

/// Drop every registered callback. Process teardown only.
pub fn clear_eval_functions() {
    EVAL_FUNCTIONS.write().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_: &EvaluationContext, _: &OpContext) -> Result<(), CallbackError> {
        Ok(())
    }

    #[test]
    fn register_and_resolve() {
        register_eval_function("tests::nop", nop);
        let resolved = resolve_eval_function("tests::nop").expect("registered");
        assert_eq!(resolved as usize, nop as usize);
        assert!(resolve_eval_function("tests::missing").is_none());
    }
}
