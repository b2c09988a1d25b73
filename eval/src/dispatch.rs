//! Threaded dispatch of the dirty operation set.
//!
//! A coordinator (the calling thread) releases ready tasks in
//! deterministic tie-break order to a fixed worker pool and handles
//! completions: decrementing successor valencies, enforcing per-component
//! `Sim` exclusion, downgrading everything downstream of a failure and
//! honoring cancellation. Workers only ever run callbacks; they never
//! touch the graph.

use std::{cmp::Reverse, collections::BinaryHeap, thread};

use crossbeam_channel as channel;
use fnv::FnvHashSet;

use sceneflow_core::{script_lock, CallbackError, ContextKind, EvaluationContext};
use sceneflow_graph::{node::OpClass, Depsgraph, NodeFlags, NodeId};

use crate::{
    collect::{collect_tasks, Task, TaskSet},
    tag, EvalError, EvalOutcome, EvalStats,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Pending,
    Done,
    Failed,
    Skipped,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    class: OpClass,
    name: String,
    index: usize,
}

impl ReadyKey {
    fn new(task: &Task, index: usize) -> Self {
        ReadyKey {
            class: task.class,
            name: task.name.clone(),
            index,
        }
    }
}

/// Evaluate after a frame change: the time source is tagged, tags are
/// flushed along time-open edges, then the dirty set runs under `context`
/// with `ctime` visible to every callback.
pub fn evaluate_on_framechange(
    graph: &mut Depsgraph,
    context: ContextKind,
    ctime: f64,
) -> Result<EvalOutcome, EvalError> {
    precheck(graph, context)?;
    if let Some(ctx) = graph.context_mut(context) {
        ctx.set_ctime(ctime);
    }
    tag::tag_time_sources(graph);
    tag::flush_updates(graph, true);
    evaluate(graph, context)
}

/// Evaluate the pre-existing dirty set (data changes, no time change).
pub fn evaluate_on_refresh(
    graph: &mut Depsgraph,
    context: ContextKind,
) -> Result<EvalOutcome, EvalError> {
    precheck(graph, context)?;
    tag::flush_updates(graph, false);
    evaluate(graph, context)
}

fn precheck(graph: &Depsgraph, context: ContextKind) -> Result<(), EvalError> {
    if !graph.is_validated() {
        return Err(EvalError::Unvalidated);
    }
    if graph.context(context).is_none() {
        return Err(EvalError::NoSuchContext(context));
    }
    Ok(())
}

fn evaluate(graph: &mut Depsgraph, context: ContextKind) -> Result<EvalOutcome, EvalError> {
    graph
        .context_mut(context)
        .expect("prechecked")
        .reset_cancel();

    let set = collect_tasks(graph);
    if set.tasks.is_empty() {
        tag::graph_clear_tags(graph);
        return Ok(EvalOutcome::Completed(EvalStats::default()));
    }

    let (states, aborted) = {
        let ctx = graph.context(context).expect("prechecked");
        run_tasks(&set, ctx)
    };

    if aborted {
        // Every tag stays; the next run resumes the full dirty set.
        log::info!("Evaluation aborted; update tags kept");
        return Ok(EvalOutcome::Aborted);
    }

    let mut stats = EvalStats::default();
    for (task, state) in set.tasks.iter().zip(&states) {
        match state {
            State::Done => {
                stats.executed += 1;
                clear_task_tag(graph, task);
            }
            State::Failed => stats.failed += 1,
            State::Skipped => stats.skipped += 1,
            State::Pending => {}
        }
    }
    if stats.failed == 0 && stats.skipped == 0 {
        tag::graph_clear_tags(graph);
    } else {
        // Structural seeds (time source, wrappers, components) must not
        // re-trigger; failed and skipped operations keep their tags.
        tag::clear_tags_where(graph, |node| !node.kind().is_operation());
        log::warn!(
            "Evaluation finished with {} failed, {} skipped operation(s)",
            stats.failed,
            stats.skipped
        );
    }
    Ok(EvalOutcome::Completed(stats))
}

fn clear_task_tag(graph: &mut Depsgraph, task: &Task) {
    let tags = NodeFlags::DIRECTLY_MODIFIED | NodeFlags::NEEDS_UPDATE;
    match task.sub {
        None => graph.node_mut(task.node).remove_flags(tags),
        Some(wrapper) => {
            if let Some(data) = graph.node_mut(wrapper).as_subgraph_mut() {
                data.graph_mut().node_mut(task.node).remove_flags(tags);
            }
        }
    }
}

fn run_tasks(set: &TaskSet, ctx: &EvaluationContext) -> (Vec<State>, bool) {
    let total = set.tasks.len();
    let workers = num_cpus::get().max(1).min(total);
    log::debug!("Dispatch {} operations on {} workers", total, workers);

    let (work_tx, work_rx) = channel::unbounded::<usize>();
    let (done_tx, done_rx) = channel::unbounded::<(usize, Result<(), CallbackError>)>();

    let mut states = vec![State::Pending; total];
    let mut valency: Vec<usize> = set.tasks.iter().map(|task| task.valency).collect();
    let mut ready: BinaryHeap<Reverse<ReadyKey>> = BinaryHeap::new();
    for (index, task) in set.tasks.iter().enumerate() {
        if task.valency == 0 {
            ready.push(Reverse(ReadyKey::new(task, index)));
        }
    }

    let mut aborted = false;

    thread::scope(|scope| {
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            scope.spawn(move || worker(set, ctx, work_rx, done_tx));
        }
        drop(work_rx);
        drop(done_tx);

        let mut in_flight = 0usize;
        let mut settled = 0usize;
        let mut sim_busy: FnvHashSet<(Option<NodeId>, NodeId)> = FnvHashSet::default();
        let mut deferred: Vec<usize> = Vec::new();

        while settled < total {
            if !aborted && ctx.is_cancelled() {
                aborted = true;
                log::debug!("Cancellation requested; draining in-flight operations");
            }

            if !aborted {
                let mut blocked = Vec::new();
                while let Some(Reverse(key)) = ready.pop() {
                    let index = key.index;
                    let task = &set.tasks[index];
                    if task.class == OpClass::Sim {
                        // No two Sim steps of one component in flight.
                        if sim_busy.contains(&task.component) {
                            blocked.push(index);
                            continue;
                        }
                        sim_busy.insert(task.component);
                    }
                    work_tx.send(index).expect("worker pool is alive");
                    in_flight += 1;
                }
                deferred.extend(blocked);
            }

            if in_flight == 0 {
                if aborted {
                    break;
                }
                if !deferred.is_empty() {
                    for blocked in deferred.drain(..) {
                        ready.push(Reverse(ReadyKey::new(&set.tasks[blocked], blocked)));
                    }
                    continue;
                }
                // Validated graphs cannot stall; bail out rather than
                // block forever if one did.
                if settled < total {
                    log::error!(
                        "Dispatch stalled with {} unfinished operation(s)",
                        total - settled
                    );
                }
                break;
            }

            let (index, result) = done_rx.recv().expect("a worker is in flight");
            in_flight -= 1;
            settled += 1;
            let task = &set.tasks[index];
            if task.class == OpClass::Sim {
                sim_busy.remove(&task.component);
                for blocked in deferred.drain(..) {
                    ready.push(Reverse(ReadyKey::new(&set.tasks[blocked], blocked)));
                }
            }

            match result {
                Ok(()) => {
                    states[index] = State::Done;
                    for &succ in &task.rev_deps {
                        valency[succ] -= 1;
                        if valency[succ] == 0 && states[succ] == State::Pending {
                            ready.push(Reverse(ReadyKey::new(&set.tasks[succ], succ)));
                        }
                    }
                }
                Err(error) => {
                    log::error!("Operation `{}` failed: {}", task.name, error);
                    states[index] = State::Failed;
                    // Downgrade everything transitively downstream. Those
                    // operations never dispatch and stay dirty.
                    let mut stack: Vec<usize> = task.rev_deps.clone();
                    while let Some(succ) = stack.pop() {
                        if states[succ] == State::Pending {
                            states[succ] = State::Skipped;
                            settled += 1;
                            stack.extend(set.tasks[succ].rev_deps.iter().copied());
                        }
                    }
                }
            }
        }

        drop(work_tx);
    });

    (states, aborted)
}

fn worker(
    set: &TaskSet,
    ctx: &EvaluationContext,
    work: channel::Receiver<usize>,
    done: channel::Sender<(usize, Result<(), CallbackError>)>,
) {
    while let Ok(index) = work.recv() {
        let task = &set.tasks[index];
        log::trace!("Run operation `{}`", task.name);
        let result = match task.func {
            Some(func) => {
                if task.python {
                    // Scripted expressions share one interpreter.
                    let _lock = script_lock();
                    func(ctx, &task.ctx)
                } else {
                    func(ctx, &task.ctx)
                }
            }
            None => Err(CallbackError::new(format!(
                "no eval function registered for `{}`",
                task.name
            ))),
        };
        if done.send((index, result)).is_err() {
            break;
        }
    }
}
