//! Shared handles, evaluation contexts and process lifecycle used by other
//! sceneflow crates.

#![warn(
    missing_debug_implementations,
    missing_copy_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

mod context;
mod id;
mod lock;
mod registry;

pub use crate::{
    context::{CancelToken, ContextKind, EvaluationContext, MAX_EVALUATION_CONTEXTS},
    id::{EntityId, OpContext, PropertyRef},
    lock::{script_lock, threaded_exit, threaded_init},
    registry::{
        clear_eval_functions, register_eval_function, resolve_eval_function, CallbackError,
        EvalFn,
    },
};
