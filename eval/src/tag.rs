//! Update tagging and dirty-flushing.
//!
//! Tags live on operation nodes (plus the time source and subgraph
//! wrappers); tagging a component or an entity cascades onto the
//! operations underneath. Flushing walks outgoing relations and marks
//! every downstream operation, using `lasttime` stamps so a flush visits
//! each node once and repeated flushes are no-ops.

use sceneflow_core::EntityId;
use sceneflow_graph::{
    node::{Node, NodeKind},
    node_from_path,
    relation::RelationKind,
    Depsgraph, NodeFlags, NodeId, PropertyResolver,
};

const TAG: NodeFlags = NodeFlags::NEEDS_UPDATE;

/// Tag one node for re-evaluation.
///
/// Components cascade onto their operations (and bones); id-refs cascade
/// onto all their components.
pub fn node_tag_update(graph: &mut Depsgraph, node: NodeId) {
    let kind = graph.node(node).kind();
    if kind.is_operation() || kind == NodeKind::TimeSource || kind == NodeKind::Subgraph {
        graph
            .node_mut(node)
            .insert_flags(NodeFlags::DIRECTLY_MODIFIED | TAG);
        return;
    }
    if kind.is_component() {
        let mut ops: Vec<NodeId> = Vec::new();
        let mut bones: Vec<NodeId> = Vec::new();
        if let Some(data) = graph.node(node).as_component() {
            ops.extend_from_slice(data.operations());
            bones.extend(data.bones());
        }
        for op in ops {
            graph
                .node_mut(op)
                .insert_flags(NodeFlags::DIRECTLY_MODIFIED | TAG);
        }
        for bone in bones {
            node_tag_update(graph, bone);
        }
        return;
    }
    if kind == NodeKind::IdRef {
        let components: Vec<NodeId> = graph
            .node(node)
            .as_id_ref()
            .map(|data| data.components().map(|(_, id)| id).collect())
            .unwrap_or_default();
        for component in components {
            node_tag_update(graph, component);
        }
    }
}

/// Tag every operation belonging to `entity`, descending into subgraphs
/// whose inner graph knows the entity.
pub fn id_tag_update(graph: &mut Depsgraph, entity: EntityId) {
    if let Some(node) = graph.id_ref(entity) {
        node_tag_update(graph, node);
        return;
    }
    let subgraphs: Vec<NodeId> = subgraph_nodes(graph);
    let mut found = false;
    for id in subgraphs {
        if let Some(data) = graph.node_mut(id).as_subgraph_mut() {
            let inner = data.graph_mut();
            if inner.id_ref(entity).is_some() {
                id_tag_update(inner, entity);
                found = true;
            }
        }
    }
    if !found {
        log::debug!("id_tag_update: entity {:?} is not in the graph", entity);
    }
}

/// Tag one component of an entity.
pub fn data_tag_update(graph: &mut Depsgraph, entity: EntityId, component: NodeKind) {
    match graph.component(entity, component) {
        Some(node) => node_tag_update(graph, node),
        None => log::debug!(
            "data_tag_update: {:?} has no {:?} component",
            entity,
            component
        ),
    }
}

/// Resolve a property path and tag whatever it lands on.
pub fn property_tag_update(
    graph: &mut Depsgraph,
    resolver: &dyn PropertyResolver,
    entity: EntityId,
    path: &str,
) {
    match node_from_path(graph, resolver, entity, path) {
        Some(node) => node_tag_update(graph, node),
        None => log::debug!(
            "property_tag_update: `{}` on {:?} does not resolve",
            path,
            entity
        ),
    }
}

/// Tag scene-state nodes: the time source(s) on a time change.
pub fn scene_update_flags(graph: &mut Depsgraph, do_time: bool) {
    if do_time {
        tag_time_sources(graph);
    }
}

/// Everything visible needs re-evaluation (layer switches, file load).
/// Prior tags stay; flushing unions them.
pub fn on_visible_update(graph: &mut Depsgraph, do_time: bool) {
    let id_refs: Vec<NodeId> = graph.entities().map(|(_, id)| id).collect();
    for id in id_refs {
        node_tag_update(graph, id);
    }
    if do_time {
        tag_time_sources(graph);
    }
}

/// Tag the graph's time source and, through the subgraph wrappers, every
/// inner time source. Frame changes reach nested graphs this way.
pub fn tag_time_sources(graph: &mut Depsgraph) {
    if let Some(time) = graph.time_source() {
        graph
            .node_mut(time)
            .insert_flags(NodeFlags::DIRECTLY_MODIFIED | TAG);
    }
    for id in subgraph_nodes(graph) {
        if let Some(data) = graph.node_mut(id).as_subgraph_mut() {
            tag_time_sources(data.graph_mut());
        }
    }
}

/// Flush tags downstream (data-change flush; `Time` edges stay closed).
pub fn graph_flush_updates(graph: &mut Depsgraph) {
    flush_updates(graph, false);
}

/// Flush tags along outgoing relations.
///
/// `Time` relations are only open during time-change flushes. A tagged
/// subgraph wrapper floods its whole inner graph: an outer dependency
/// changed, so every instanced result is stale.
pub(crate) fn flush_updates(graph: &mut Depsgraph, time: bool) {
    for id in subgraph_nodes(graph) {
        let tagged = graph.node(id).is_tagged();
        if let Some(data) = graph.node_mut(id).as_subgraph_mut() {
            if tagged {
                flood_all_operations(data.graph_mut());
            } else {
                flush_updates(data.graph_mut(), time);
            }
        }
    }

    let stamp = graph.next_visit_stamp();
    let mut queue: Vec<NodeId> = graph
        .nodes()
        .filter(|(_, node)| node.is_tagged())
        .map(|(id, _)| id)
        .collect();
    for &id in &queue {
        graph.node_mut(id).set_lasttime(stamp);
    }

    while let Some(id) = queue.pop() {
        let links: Vec<(RelationKind, NodeId)> = graph
            .node(id)
            .outlinks()
            .iter()
            .map(|rel| {
                let rel = graph.relation(*rel);
                (rel.kind(), rel.to())
            })
            .collect();
        for (kind, to) in links {
            if kind == RelationKind::Time && !time {
                continue;
            }
            if graph.node(to).lasttime() == stamp {
                continue;
            }
            graph.node_mut(to).set_lasttime(stamp);
            let to_kind = graph.node(to).kind();
            if to_kind.is_operation() {
                graph.node_mut(to).insert_flags(TAG);
            } else if to_kind == NodeKind::Subgraph {
                graph.node_mut(to).insert_flags(TAG);
                if let Some(data) = graph.node_mut(to).as_subgraph_mut() {
                    flood_all_operations(data.graph_mut());
                }
            }
            queue.push(to);
        }
    }
}

/// Clear every update tag. Used after a successful evaluation and on
/// aborted-evaluation cleanup by the caller's choice.
pub fn graph_clear_tags(graph: &mut Depsgraph) {
    clear_tags_where(graph, |_| true);
}

/// Clear tags on nodes matching the predicate, recursing into subgraphs.
pub(crate) fn clear_tags_where<F>(graph: &mut Depsgraph, clear: F)
where
    F: Fn(&Node) -> bool + Copy,
{
    let ids: Vec<NodeId> = graph.nodes().map(|(id, _)| id).collect();
    for id in ids {
        if clear(graph.node(id)) {
            graph
                .node_mut(id)
                .remove_flags(NodeFlags::DIRECTLY_MODIFIED | TAG);
        }
        if graph.node(id).kind() == NodeKind::Subgraph {
            if let Some(data) = graph.node_mut(id).as_subgraph_mut() {
                clear_tags_where(data.graph_mut(), clear);
            }
        }
    }
}

fn flood_all_operations(graph: &mut Depsgraph) {
    let ops: Vec<NodeId> = graph.operations().map(|(id, _)| id).collect();
    for op in ops {
        graph.node_mut(op).insert_flags(TAG);
    }
}

fn subgraph_nodes(graph: &Depsgraph) -> Vec<NodeId> {
    graph
        .nodes()
        .filter(|(_, node)| node.kind() == NodeKind::Subgraph)
        .map(|(id, _)| id)
        .collect()
}
