//! Evaluation contexts.
//!
//! A context pins the *purpose* of an evaluation run (viewport display,
//! render database conversion, background baking) and owns the per-purpose
//! scratch storage handed to every operation callback. Contexts share the
//! graph they evaluate but never each other's scratch.

use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use derivative::Derivative;
use relevant::Relevant;

/// Maximum number of evaluation contexts a graph allocates slots for.
pub const MAX_EVALUATION_CONTEXTS: usize = 3;

/// Purpose of an evaluation context.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum ContextKind {
    /// Viewport display.
    Viewport,
    /// Render engine database conversion.
    Render,
    /// Background baking.
    Bake,
    /// All contexts. Only valid as an argument to broadcast calls.
    All,
}

impl ContextKind {
    /// Per-graph slot index for this kind, `None` for the broadcast sentinel.
    pub fn slot(self) -> Option<usize> {
        match self {
            ContextKind::Viewport => Some(0),
            ContextKind::Render => Some(1),
            ContextKind::Bake => Some(2),
            ContextKind::All => None,
        }
    }

    /// Inverse of [`slot`](ContextKind::slot).
    pub fn from_slot(slot: usize) -> Option<Self> {
        match slot {
            0 => Some(ContextKind::Viewport),
            1 => Some(ContextKind::Render),
            2 => Some(ContextKind::Bake),
            _ => None,
        }
    }
}

/// Handle used to abort an evaluation in flight.
///
/// The flag is re-armed at the start of every evaluation on the owning
/// context; cancelling stops further dispatch while in-flight operations
/// run to completion.
#[derive(Clone, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-purpose evaluation state.
///
/// Must be torn down through the owning graph's context teardown; dropping
/// an un-disposed context is reported by the `Relevant` marker.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct EvaluationContext {
    kind: ContextKind,
    ctime: f64,
    #[derivative(Debug = "ignore")]
    scratch: Option<Box<dyn Any + Send + Sync>>,
    cancel: Arc<AtomicBool>,
    relevant: Relevant,
}

impl EvaluationContext {
    /// Allocate a fresh context of the given kind.
    ///
    /// # Panics
    ///
    /// Panics if `kind` is the broadcast sentinel [`ContextKind::All`].
    pub fn new(kind: ContextKind) -> Self {
        assert!(
            kind.slot().is_some(),
            "Cannot allocate a context for the broadcast sentinel."
        );
        EvaluationContext {
            kind,
            ctime: 0.0,
            scratch: None,
            cancel: Arc::new(AtomicBool::new(false)),
            relevant: Relevant,
        }
    }

    /// Purpose of this context.
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Frame time of the evaluation currently running (or last run).
    pub fn ctime(&self) -> f64 {
        self.ctime
    }

    /// Set the frame time. Called by the evaluator on frame-change entry.
    pub fn set_ctime(&mut self, ctime: f64) {
        self.ctime = ctime;
    }

    /// Install the host's scratch storage.
    pub fn set_scratch(&mut self, scratch: Box<dyn Any + Send + Sync>) {
        self.scratch = Some(scratch);
    }

    /// Borrow the scratch storage, downcast to the host's type.
    pub fn scratch<T: Any>(&self) -> Option<&T> {
        self.scratch.as_ref().and_then(|s| s.downcast_ref::<T>())
    }

    /// Token that aborts an evaluation running under this context.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken(self.cancel.clone())
    }

    /// Whether the current evaluation was asked to abort.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Re-arm the cancel flag. Called by the evaluator before dispatch.
    pub fn reset_cancel(&mut self) {
        self.cancel.store(false, Ordering::Relaxed);
    }

    /// Tear the context down, releasing its scratch.
    pub fn dispose(mut self) {
        log::trace!("Dispose evaluation context {:?}", self.kind);
        self.scratch = None;
        self.relevant.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_stable() {
        for slot in 0..MAX_EVALUATION_CONTEXTS {
            let kind = ContextKind::from_slot(slot).expect("valid slot");
            assert_eq!(kind.slot(), Some(slot));
        }
        assert_eq!(ContextKind::All.slot(), None);
        assert_eq!(ContextKind::from_slot(MAX_EVALUATION_CONTEXTS), None);
    }

    #[test]
    fn scratch_downcast() {
        let mut ctx = EvaluationContext::new(ContextKind::Viewport);
        assert!(ctx.scratch::<u32>().is_none());
        ctx.set_scratch(Box::new(17u32));
        assert_eq!(ctx.scratch::<u32>(), Some(&17));
        assert!(ctx.scratch::<String>().is_none());
        ctx.dispose();
    }

    #[test]
    fn cancel_token() {
        let mut ctx = EvaluationContext::new(ContextKind::Bake);
        let token = ctx.cancel_token();
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        ctx.reset_cancel();
        assert!(!ctx.is_cancelled());
        ctx.dispose();
    }
}
