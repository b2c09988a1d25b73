//! Structural sanity pass.
//!
//! Runs after every build or structural mutation, before evaluation is
//! allowed: checks edge-list agreement, coalesces duplicate relations,
//! dispatches kind-specific validators (which insert implicit ordering
//! edges), redirects component-endpoint edges onto the component's
//! entry/exit operations, and computes the cached topological order,
//! reporting any cycle among operation nodes.

use std::fmt;

use failure::Fail;
use fnv::FnvHashMap;

use crate::{
    node::NodeKind,
    registry::node_typeinfo,
    relation::RelationKind,
    sort, Depsgraph, NodeId, RelationId,
};

/// Validation failure. Evaluation refuses to run until validation passes.
#[derive(Clone, Debug, Fail)]
pub enum ValidateError {
    /// Cycle among operation nodes of the graph.
    Cycle {
        /// Relations forming the cycle.
        relations: Vec<RelationId>,
        /// Diagnostic rendering of the offending relations.
        descriptions: Vec<String>,
    },
    /// A relation and its endpoint edge lists disagree.
    EdgeListMismatch {
        /// The inconsistent relation.
        relation: RelationId,
    },
}

impl fmt::Display for ValidateError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidateError::Cycle { descriptions, .. } => {
                write!(fmt, "dependency cycle through {} relation(s)", descriptions.len())?;
                for desc in descriptions {
                    write!(fmt, "\n  {}", desc)?;
                }
                Ok(())
            }
            ValidateError::EdgeListMismatch { relation } => write!(
                fmt,
                "edge lists disagree about relation {:?}",
                relation
            ),
        }
    }
}

/// Run the full validation pass on `graph` (and nested subgraphs).
///
/// On success the graph's topological order is cached and evaluation is
/// unlocked; any structural mutation invalidates both again.
pub fn validate_links(graph: &mut Depsgraph) -> Result<(), ValidateError> {
    // Nested graphs first; the outer pass relies on them being runnable.
    let subgraphs: Vec<NodeId> = graph
        .nodes()
        .filter(|(_, node)| node.kind() == NodeKind::Subgraph)
        .map(|(id, _)| id)
        .collect();
    for id in subgraphs {
        if let Some(data) = graph.node_mut(id).as_subgraph_mut() {
            validate_links(data.graph_mut())?;
        }
    }

    check_edge_lists(graph)?;
    coalesce_duplicates(graph);

    // Kind-specific implicit constraints.
    let node_ids: Vec<NodeId> = graph.nodes().map(|(id, _)| id).collect();
    for id in node_ids {
        let kind = graph.node(id).kind();
        if let Some(validate) = node_typeinfo(kind).and_then(|info| info.validate_links) {
            validate(graph, id)?;
        }
    }

    redirect_component_endpoints(graph);
    coalesce_duplicates(graph);

    let order = sort::compute_order(graph).map_err(|cycle| {
        let descriptions = cycle
            .relations
            .iter()
            .map(|id| {
                let rel = graph.relation(*id);
                format!(
                    "{} -> {} [{:?}] {}",
                    graph.node(rel.from()).name(),
                    graph.node(rel.to()).name(),
                    rel.kind(),
                    rel.description()
                )
            })
            .collect();
        log::error!("Dependency cycle detected ({} relations)", cycle.relations.len());
        ValidateError::Cycle {
            relations: cycle.relations,
            descriptions,
        }
    })?;

    log::debug!(
        "Validated graph: {} nodes, {} relations, {} schedulable operations",
        graph.node_count(),
        graph.relation_count(),
        order.len()
    );
    graph.sorted = Some(order);
    graph.validated = true;
    Ok(())
}

/// Invariant: a relation is listed in `from.outlinks` iff in `to.inlinks`,
/// and both endpoints are live.
fn check_edge_lists(graph: &Depsgraph) -> Result<(), ValidateError> {
    for (id, rel) in graph.relations() {
        let from_ok = graph
            .try_node(rel.from())
            .map_or(false, |node| node.outlinks().contains(&id));
        let to_ok = graph
            .try_node(rel.to())
            .map_or(false, |node| node.inlinks().contains(&id));
        if !from_ok || !to_ok {
            return Err(ValidateError::EdgeListMismatch { relation: id });
        }
    }
    for (id, node) in graph.nodes() {
        for link in node.outlinks() {
            let live = graph.relations[link.index()]
                .as_ref()
                .map_or(false, |rel| rel.from() == id);
            if !live {
                return Err(ValidateError::EdgeListMismatch { relation: *link });
            }
        }
        for link in node.inlinks() {
            let live = graph.relations[link.index()]
                .as_ref()
                .map_or(false, |rel| rel.to() == id);
            if !live {
                return Err(ValidateError::EdgeListMismatch { relation: *link });
            }
        }
    }
    Ok(())
}

/// Duplicate `(from, to, kind)` relations are legal at insert time; the
/// first one (and its description) wins here.
fn coalesce_duplicates(graph: &mut Depsgraph) {
    let mut seen: FnvHashMap<(NodeId, NodeId, RelationKind), RelationId> = FnvHashMap::default();
    let mut drop: Vec<RelationId> = Vec::new();
    for (id, rel) in graph.relations() {
        let key = (rel.from(), rel.to(), rel.kind());
        if seen.contains_key(&key) {
            drop.push(id);
        } else {
            seen.insert(key, id);
        }
    }
    for id in drop {
        log::trace!("Coalesce duplicate relation {:?}", id);
        graph.remove_relation(id);
    }
}

/// Edges into a component mean "into its start"; edges out of a component
/// mean "out of its end". Rewrite them onto the actual operations so the
/// scheduler only ever sees operation-level dependencies.
fn redirect_component_endpoints(graph: &mut Depsgraph) {
    let rel_ids: Vec<RelationId> = graph.relations().map(|(id, _)| id).collect();
    for id in rel_ids {
        let (from, to, kind, description) = {
            let rel = graph.relation(id);
            (rel.from(), rel.to(), rel.kind(), rel.description().to_owned())
        };

        if graph.node(to).kind().is_component() {
            let entries = component_entries(graph, to);
            if let Some((&first, rest)) = entries.split_first() {
                redirect_target(graph, id, from, first);
                for &extra in rest {
                    graph.add_relation(from, extra, kind, &description);
                }
            }
        }

        let from = graph.relation(id).from();
        if graph.node(from).kind().is_component() {
            let exits = component_exits(graph, from);
            let to = graph.relation(id).to();
            if let Some((&first, rest)) = exits.split_first() {
                redirect_source(graph, id, first);
                for &extra in rest {
                    graph.add_relation(extra, to, kind, &description);
                }
            }
        }
    }
}

/// First operation(s) of a component. Pose components fan into their own
/// first operation plus the first operation of every bone.
fn component_entries(graph: &Depsgraph, component: NodeId) -> Vec<NodeId> {
    let node = graph.node(component);
    let data = match node.as_component() {
        Some(data) => data,
        None => return Vec::new(),
    };
    let mut entries = Vec::new();
    if let Some(first) = pick_op(graph, data.operations(), true) {
        entries.push(first);
    }
    if node.kind() == NodeKind::EvalPose {
        let mut bones: Vec<NodeId> = data.bones().collect();
        bones.sort();
        for bone in bones {
            if let Some(data) = graph.node(bone).as_component() {
                if let Some(first) = pick_op(graph, data.operations(), true) {
                    entries.push(first);
                }
            }
        }
    }
    entries
}

/// Last operation(s) of a component; the counterpart of
/// [`component_entries`].
fn component_exits(graph: &Depsgraph, component: NodeId) -> Vec<NodeId> {
    let node = graph.node(component);
    let data = match node.as_component() {
        Some(data) => data,
        None => return Vec::new(),
    };
    if let Some(last) = pick_op(graph, data.operations(), false) {
        return vec![last];
    }
    if node.kind() == NodeKind::EvalPose {
        let mut exits = Vec::new();
        let mut bones: Vec<NodeId> = data.bones().collect();
        bones.sort();
        for bone in bones {
            if let Some(data) = graph.node(bone).as_component() {
                if let Some(last) = pick_op(graph, data.operations(), false) {
                    exits.push(last);
                }
            }
        }
        return exits;
    }
    Vec::new()
}

/// Select the first (or last) operation by (class, insertion order).
fn pick_op(graph: &Depsgraph, ops: &[NodeId], first: bool) -> Option<NodeId> {
    let key = |position: usize, id: NodeId| {
        let class = graph
            .node(id)
            .as_operation()
            .map(|op| op.class())
            .expect("component op map holds operations");
        (class, position)
    };
    let iter = ops.iter().enumerate().map(|(position, &id)| (key(position, id), id));
    if first {
        iter.min_by_key(|(key, _)| key.clone()).map(|(_, id)| id)
    } else {
        iter.max_by_key(|(key, _)| key.clone()).map(|(_, id)| id)
    }
}

fn redirect_target(graph: &mut Depsgraph, id: RelationId, from: NodeId, new_to: NodeId) {
    if from == new_to {
        return;
    }
    let old_to = graph.relation(id).to();
    if old_to == new_to {
        return;
    }
    graph.node_mut(old_to).inlinks.retain(|l| *l != id);
    graph.relations[id.index()]
        .as_mut()
        .expect("live relation")
        .to = new_to;
    graph.node_mut(new_to).inlinks.push(id);
    graph.invalidate_structure();
}

fn redirect_source(graph: &mut Depsgraph, id: RelationId, new_from: NodeId) {
    let (old_from, to) = {
        let rel = graph.relation(id);
        (rel.from(), rel.to())
    };
    if old_from == new_from || to == new_from {
        return;
    }
    graph.node_mut(old_from).outlinks.retain(|l| *l != id);
    graph.relations[id.index()]
        .as_mut()
        .expect("live relation")
        .from = new_from;
    graph.node_mut(new_from).outlinks.push(id);
    graph.invalidate_structure();
}
