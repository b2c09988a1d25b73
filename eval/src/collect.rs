//! Resolve the dirty subgraph into a flat task set.
//!
//! The dispatcher works on indexed tasks, not on graph nodes: every tagged
//! operation becomes one task carrying its callback, a reverse-dependency
//! list and an unresolved-predecessor count. Tagged subgraph wrappers are
//! spliced inline: their inner operations join the set, inherit the
//! wrapper's predecessors and hand their results to the wrapper's
//! successors.

use fnv::FnvHashMap;

use sceneflow_core::{EvalFn, OpContext};
use sceneflow_graph::{node::NodeKind, node::OpClass, Depsgraph, NodeFlags, NodeId};

/// One schedulable unit.
#[derive(Debug)]
pub(crate) struct Task {
    /// Operation node (in the outer graph, or in `sub`'s inner graph).
    pub node: NodeId,
    /// Subgraph wrapper the operation lives under, if nested.
    pub sub: Option<NodeId>,
    /// Diagnostic name.
    pub name: String,
    /// Execution class; also the first dispatch tie-break key.
    pub class: OpClass,
    /// Callback resolved at registration.
    pub func: Option<EvalFn>,
    /// Callback context.
    pub ctx: OpContext,
    /// Serialize under the script lock.
    pub python: bool,
    /// Owning component, scoped by subgraph; `Sim` exclusion key.
    pub component: (Option<NodeId>, NodeId),
    /// Tasks waiting on this one.
    pub rev_deps: Vec<usize>,
    /// Number of tasks this one waits on.
    pub valency: usize,
}

/// The dirty operations of one evaluation, in dependency form.
#[derive(Debug, Default)]
pub(crate) struct TaskSet {
    pub tasks: Vec<Task>,
}

impl TaskSet {
    fn push(&mut self, graph: &Depsgraph, sub: Option<NodeId>, node: NodeId) -> usize {
        let data = graph.node(node);
        let op = data.as_operation().expect("tasks come from operations");
        let index = self.tasks.len();
        self.tasks.push(Task {
            node,
            sub,
            name: data.name().to_owned(),
            class: op.class(),
            func: op.func(),
            ctx: op.ctx().clone(),
            python: data.flags().contains(NodeFlags::USES_PYTHON),
            component: (sub, data.owner().expect("operations have owners")),
            rev_deps: Vec::new(),
            valency: 0,
        });
        index
    }

    fn wire(&mut self, from: usize, to: usize) {
        self.tasks[from].rev_deps.push(to);
        self.tasks[to].valency += 1;
    }
}

/// Collect every tagged operation of `graph` (and its tagged subgraphs)
/// into a task set. The graph must be validated; the cached topological
/// order drives task numbering so dispatch tie-breaks stay deterministic.
pub(crate) fn collect_tasks(graph: &Depsgraph) -> TaskSet {
    let mut set = TaskSet::default();
    let mut outer_index: FnvHashMap<NodeId, usize> = FnvHashMap::default();

    let order = graph.cached_order().expect("graph is validated");
    for &id in order {
        if graph.node(id).is_tagged() {
            let index = set.push(graph, None, id);
            outer_index.insert(id, index);
        }
    }

    // Operation-level dependencies among the tagged outer operations.
    for (_, rel) in graph.relations() {
        if let (Some(&from), Some(&to)) = (
            outer_index.get(&rel.from()),
            outer_index.get(&rel.to()),
        ) {
            set.wire(from, to);
        }
    }

    // Splice tagged subgraphs.
    let subgraphs: Vec<NodeId> = graph
        .nodes()
        .filter(|(_, node)| node.kind() == NodeKind::Subgraph)
        .map(|(id, _)| id)
        .collect();
    for wrapper in subgraphs {
        let inner = match graph.node(wrapper).as_subgraph() {
            Some(data) => data.graph(),
            None => continue,
        };
        let inner_order = match inner.cached_order() {
            Some(order) => order,
            None => {
                log::warn!("Subgraph {:?} skipped: inner graph not validated", wrapper);
                continue;
            }
        };

        let mut inner_index: FnvHashMap<NodeId, usize> = FnvHashMap::default();
        for &id in inner_order {
            if inner.node(id).is_tagged() {
                let index = set.push(inner, Some(wrapper), id);
                inner_index.insert(id, index);
            }
        }
        if inner_index.is_empty() {
            continue;
        }

        for (_, rel) in inner.relations() {
            if let (Some(&from), Some(&to)) = (
                inner_index.get(&rel.from()),
                inner_index.get(&rel.to()),
            ) {
                set.wire(from, to);
            }
        }

        // Boundary: the wrapper's predecessors gate the inner sources; the
        // wrapper's successors wait for the inner sinks.
        let sources: Vec<usize> = inner_index
            .values()
            .copied()
            .filter(|&index| set.tasks[index].valency == 0)
            .collect();
        let sinks: Vec<usize> = inner_index
            .values()
            .copied()
            .filter(|&index| set.tasks[index].rev_deps.is_empty())
            .collect();

        let node = graph.node(wrapper);
        let preds: Vec<usize> = node
            .inlinks()
            .iter()
            .filter_map(|rel| outer_index.get(&graph.relation(*rel).from()).copied())
            .collect();
        let succs: Vec<usize> = node
            .outlinks()
            .iter()
            .filter_map(|rel| outer_index.get(&graph.relation(*rel).to()).copied())
            .collect();

        for &pred in &preds {
            for &source in &sources {
                set.wire(pred, source);
            }
        }
        for &succ in &succs {
            for &sink in &sinks {
                set.wire(sink, succ);
            }
        }
    }

    log::debug!("Collected {} operations for evaluation", set.tasks.len());
    set
}
