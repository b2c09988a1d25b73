//! Sceneflow's top level crate.
//! Reexports all others.

#![warn(
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

#[doc(inline)]
pub use sceneflow_core as core;

#[cfg(feature = "graph")]
#[doc(inline)]
pub use sceneflow_graph as graph;

#[cfg(feature = "builder")]
#[doc(inline)]
pub use sceneflow_builder as builder;

#[cfg(feature = "eval")]
#[doc(inline)]
pub use sceneflow_eval as eval;

pub use sceneflow_core::{
    clear_eval_functions, register_eval_function, threaded_exit, threaded_init, ContextKind,
    EntityId,
};

#[cfg(feature = "graph")]
pub use sceneflow_graph::{
    registry::{free_node_types, register_node_types},
    validate_links, Depsgraph,
};

#[cfg(feature = "builder")]
pub use sceneflow_builder::{scene_relations_rebuild, scene_relations_update};

#[cfg(feature = "eval")]
pub use sceneflow_eval::{
    evaluate_on_framechange, evaluate_on_refresh, evaluation_context_init,
    evaluation_contexts_free, graph_clear_tags, graph_flush_updates, id_tag_update,
};
