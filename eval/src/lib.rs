//! Evaluation engine: update tagging, dirty flushing and threaded
//! dispatch of operation callbacks.
//!
//! The graph itself stays immutable during a run; the engine resolves the
//! tagged operations into an indexed task set and drains it with a worker
//! pool, honoring execution-class ordering, per-component `Sim` exclusion
//! and the process-wide script lock for Python-flagged drivers.

#![warn(
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

pub mod tag;

mod collect;
mod dispatch;

use failure::Fail;

use sceneflow_core::ContextKind;
use sceneflow_graph::Depsgraph;

pub use crate::dispatch::{evaluate_on_framechange, evaluate_on_refresh};
pub use crate::tag::{
    data_tag_update, graph_clear_tags, graph_flush_updates, id_tag_update, node_tag_update,
    on_visible_update, property_tag_update, scene_update_flags,
};

/// Counters of one completed evaluation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EvalStats {
    /// Operations whose callback ran and succeeded.
    pub executed: usize,
    /// Operations whose callback reported an error.
    pub failed: usize,
    /// Operations downgraded because something upstream failed.
    pub skipped: usize,
}

/// How an evaluation ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EvalOutcome {
    /// The dirty set was drained. Failures, if any, are counted in the
    /// stats; failed and skipped operations stay tagged.
    Completed(EvalStats),
    /// Cancellation stopped dispatch; the dirty set is untouched.
    Aborted,
}

/// Evaluation refused to start.
#[derive(Copy, Clone, Debug, Fail, PartialEq, Eq)]
pub enum EvalError {
    /// The graph changed structurally since the last validation pass.
    #[fail(display = "graph has not been validated since the last structural change")]
    Unvalidated,

    /// The requested context slot was never initialized.
    #[fail(display = "evaluation context {:?} is not initialized", _0)]
    NoSuchContext(ContextKind),
}

/// Allocate the per-graph state of one evaluation context (or of all of
/// them for [`ContextKind::All`]).
pub fn evaluation_context_init(graph: &mut Depsgraph, context: ContextKind) {
    graph.init_context(context);
}

/// Tear down every evaluation context of the graph.
pub fn evaluation_contexts_free(graph: &mut Depsgraph) {
    graph.free_contexts();
}
