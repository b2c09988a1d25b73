//! Topological ordering of operation nodes.
//!
//! Kahn's algorithm over the operation stratum. `valency` on each node is
//! the unresolved-predecessor count; nodes whose valency reaches zero enter
//! a priority queue ordered by (execution class, name, insertion order), so
//! the produced order is deterministic for a given graph.

use std::{cmp::Reverse, collections::BinaryHeap};

use fnv::{FnvHashMap, FnvHashSet};

use crate::{node::OpClass, Depsgraph, NodeId, RelationId};

#[derive(Debug)]
pub(crate) struct CycleInfo {
    pub relations: Vec<RelationId>,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    class: OpClass,
    name: String,
    id: NodeId,
}

fn ready_key(graph: &Depsgraph, id: NodeId) -> ReadyKey {
    let node = graph.node(id);
    ReadyKey {
        class: node
            .as_operation()
            .map(|op| op.class())
            .unwrap_or(OpClass::Exec),
        name: node.name().to_owned(),
        id,
    }
}

pub(crate) fn compute_order(graph: &mut Depsgraph) -> Result<Vec<NodeId>, CycleInfo> {
    let op_ids: Vec<NodeId> = graph.operations().map(|(id, _)| id).collect();

    let mut edges: Vec<(NodeId, NodeId)> = Vec::new();
    for (_, rel) in graph.relations() {
        if graph.node(rel.from()).kind().is_operation()
            && graph.node(rel.to()).kind().is_operation()
        {
            edges.push((rel.from(), rel.to()));
        }
    }

    for &id in &op_ids {
        graph.node_mut(id).valency = 0;
    }
    let mut successors: FnvHashMap<NodeId, Vec<NodeId>> = FnvHashMap::default();
    for &(from, to) in &edges {
        graph.node_mut(to).valency += 1;
        successors.entry(from).or_insert_with(Vec::new).push(to);
    }

    let mut ready = BinaryHeap::new();
    for &id in &op_ids {
        if graph.node(id).valency == 0 {
            ready.push(Reverse(ready_key(graph, id)));
        }
    }

    let mut order = Vec::with_capacity(op_ids.len());
    while let Some(Reverse(key)) = ready.pop() {
        let id = key.id;
        order.push(id);
        let succs = successors.get(&id).cloned().unwrap_or_default();
        for succ in succs {
            let node = graph.node_mut(succ);
            node.valency -= 1;
            if node.valency == 0 {
                ready.push(Reverse(ready_key(graph, succ)));
            }
        }
    }

    if order.len() != op_ids.len() {
        let leftover: FnvHashSet<NodeId> = op_ids
            .iter()
            .copied()
            .filter(|id| graph.node(*id).valency > 0)
            .collect();
        let relations = graph
            .relations()
            .filter(|(_, rel)| leftover.contains(&rel.from()) && leftover.contains(&rel.to()))
            .map(|(id, _)| id)
            .collect();
        return Err(CycleInfo { relations });
    }
    Ok(order)
}
