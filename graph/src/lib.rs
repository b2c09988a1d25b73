//! Dependency graph model and storage.
//!
//! The graph owns every node and every relation. Nodes live in a
//! tombstoned arena addressed by [`NodeId`]; relations likewise by
//! [`RelationId`]; node edge lists are non-owning views into the relation
//! arena. Lookup goes through the primary entity index and the per-node
//! child maps, all O(1) expected.
//!
//! Node kinds, their payloads and the per-kind behavior table live in
//! [`node`] and [`registry`]; the structural sanity pass in [`validate`].

#![warn(
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

#[macro_use]
extern crate bitflags;

pub mod copy;
pub mod node;
pub mod path;
pub mod registry;
pub mod relation;
pub mod validate;

mod sort;

use failure::Fail;
use fnv::FnvHashMap;

use sceneflow_core::{
    resolve_eval_function, ContextKind, EntityId, EvaluationContext, OpContext,
    MAX_EVALUATION_CONTEXTS,
};

use crate::{
    node::{Node, NodeData, NodeKind, OpClass, OperationData},
    registry::node_typeinfo,
    relation::{Relation, RelationKind},
};

pub use crate::{
    node::{NodeFlags, MAX_NODE_NAME},
    path::{node_from_path, PropertyResolver, PropertyTarget},
    validate::{validate_links, ValidateError},
};

/// Unique node id within one graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Index into the graph's node arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Unique relation id within one graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationId(pub(crate) usize);

impl RelationId {
    /// Index into the graph's relation arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Storage-level error.
#[derive(Clone, Debug, Fail)]
pub enum GraphError {
    /// No type info registered for the kind; `register_node_types` missing.
    #[fail(display = "no node type info registered for {:?}", _0)]
    UnregisteredKind(NodeKind),

    /// Node of the given kind requires an entity to attach to.
    #[fail(display = "node kind {:?} requires an entity", _0)]
    MissingEntity(NodeKind),

    /// Find-only kind was asked to create.
    #[fail(display = "{:?} node `{}` not found", kind, name)]
    NotFound {
        /// Kind looked up.
        kind: NodeKind,
        /// Name looked up.
        name: String,
    },

    /// Operation was added through the wrong entry point.
    #[fail(display = "{:?} is not an operation kind", _0)]
    NotAnOperation(NodeKind),

    /// A second root node was requested.
    #[fail(display = "graph already has a root node")]
    DuplicateRoot,
}

/// The dependency graph.
///
/// Owns all nodes, all relations, the per-graph evaluation-context slots
/// and the cached topological order.
#[derive(Debug)]
pub struct Depsgraph {
    pub(crate) nodes: Vec<Option<Node>>,
    pub(crate) relations: Vec<Option<Relation>>,
    pub(crate) root: Option<NodeId>,
    pub(crate) id_index: FnvHashMap<EntityId, NodeId>,
    pub(crate) sorted: Option<Vec<NodeId>>,
    pub(crate) validated: bool,
    visit_stamp: u32,
    contexts: [Option<EvaluationContext>; MAX_EVALUATION_CONTEXTS],
}

impl Depsgraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Depsgraph {
            nodes: Vec::new(),
            relations: Vec::new(),
            root: None,
            id_index: FnvHashMap::default(),
            sorted: None,
            validated: false,
            visit_stamp: 0,
            contexts: [None, None, None],
        }
    }

    /// Discard all nodes and relations, keeping context slots.
    pub fn clear(&mut self) {
        log::debug!("Clear graph ({} nodes)", self.node_count());
        self.nodes.clear();
        self.relations.clear();
        self.root = None;
        self.id_index.clear();
        self.invalidate_structure();
    }

    /// Whether any entity has been built into the graph.
    pub fn is_built(&self) -> bool {
        !self.id_index.is_empty()
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Number of live relations.
    pub fn relation_count(&self) -> usize {
        self.relations.iter().filter(|slot| slot.is_some()).count()
    }

    /// Borrow a node.
    ///
    /// # Panics
    ///
    /// Panics if the id is stale (node was removed).
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0].as_ref().expect("stale node id")
    }

    /// Borrow a node mutably.
    ///
    /// # Panics
    ///
    /// Panics if the id is stale (node was removed).
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0].as_mut().expect("stale node id")
    }

    /// Borrow a node if it is still live.
    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// Borrow a relation.
    ///
    /// # Panics
    ///
    /// Panics if the id is stale (relation was removed).
    pub fn relation(&self, id: RelationId) -> &Relation {
        self.relations[id.0].as_ref().expect("stale relation id")
    }

    /// Iterate over live nodes.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|node| (NodeId(index), node)))
    }

    /// Iterate over live relations.
    pub fn relations(&self) -> impl Iterator<Item = (RelationId, &Relation)> + '_ {
        self.relations
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|rel| (RelationId(index), rel)))
    }

    /// Iterate over live operation nodes.
    pub fn operations(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes().filter(|(_, node)| node.kind().is_operation())
    }

    /// The root node, if the graph has been started.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// The graph's anonymous time source, if created.
    pub fn time_source(&self) -> Option<NodeId> {
        let root = self.root?;
        self.node(root).as_root().and_then(|data| data.time_source())
    }

    /// Id-ref (or subgraph) node of an entity.
    pub fn id_ref(&self, entity: EntityId) -> Option<NodeId> {
        self.id_index.get(&entity).copied()
    }

    /// Iterate over indexed entities.
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, NodeId)> + '_ {
        self.id_index.iter().map(|(entity, id)| (*entity, *id))
    }

    /// Component node of `(entity, kind)`.
    pub fn component(&self, entity: EntityId, kind: NodeKind) -> Option<NodeId> {
        let id_ref = self.id_ref(entity)?;
        self.node(id_ref).as_id_ref()?.component(kind)
    }

    /// Find a node without creating it. See the per-kind lookup rules.
    pub fn find_node(
        &self,
        kind: NodeKind,
        entity: Option<EntityId>,
        name: Option<&str>,
    ) -> Option<NodeId> {
        match kind {
            NodeKind::Root => self.root,
            NodeKind::TimeSource => match entity {
                None => self.time_source(),
                Some(entity) => self.component(entity, NodeKind::TimeSource),
            },
            NodeKind::IdRef | NodeKind::Subgraph => entity.and_then(|entity| self.id_ref(entity)),
            NodeKind::Bone => {
                let pose = self.component(entity?, NodeKind::EvalPose)?;
                self.node(pose).as_component()?.bone(name?)
            }
            kind if kind.is_component() => self.component(entity?, kind),
            kind => {
                // Operation kinds resolve through the owning component first.
                let component = kind.owning_component()?;
                let component = self.component(entity?, component)?;
                self.node(component).as_component()?.operation(name?)
            }
        }
    }

    /// Find an operation, optionally inside a bone sub-map.
    pub fn find_operation(
        &self,
        entity: EntityId,
        subdata: Option<&str>,
        kind: NodeKind,
        name: &str,
    ) -> Option<NodeId> {
        match subdata {
            None => self.find_node(kind, Some(entity), Some(name)),
            Some(bone) => {
                let bone = self.find_node(NodeKind::Bone, Some(entity), Some(bone))?;
                self.node(bone).as_component()?.operation(name)
            }
        }
    }

    /// Get a matching node, creating it (and missing ancestors) on demand.
    ///
    /// Operation kinds are find-only here; they are created through
    /// [`add_operation`](Depsgraph::add_operation) which carries the extra
    /// state an operation needs.
    pub fn get_node(
        &mut self,
        kind: NodeKind,
        entity: Option<EntityId>,
        name: Option<&str>,
    ) -> Result<NodeId, GraphError> {
        if let Some(found) = self.find_node(kind, entity, name) {
            return Ok(found);
        }
        if kind.is_operation() || kind == NodeKind::Subgraph {
            return Err(GraphError::NotFound {
                kind,
                name: name.unwrap_or_default().to_owned(),
            });
        }
        self.add_new_node(kind, entity, name)
    }

    /// Create a node of the given kind and stitch it into the hierarchy
    /// through the kind registry.
    pub(crate) fn add_new_node(
        &mut self,
        kind: NodeKind,
        entity: Option<EntityId>,
        name: Option<&str>,
    ) -> Result<NodeId, GraphError> {
        let typeinfo = node_typeinfo(kind).ok_or(GraphError::UnregisteredKind(kind))?;
        let name = name.unwrap_or(typeinfo.name);
        let node = Node::new(kind, name, (typeinfo.init_data)(kind, entity)?);
        let id = self.push_node(node);
        (typeinfo.add_to_graph)(self, id, entity)?;
        log::trace!("Add node {:?} `{}` as {:?}", kind, name, id);
        self.invalidate_structure();
        Ok(id)
    }

    /// Add an operation node under `(entity, subdata)`.
    ///
    /// The owning component (and its ancestors) are materialized on demand;
    /// `subdata` names a bone for bone-level operations. A second add with
    /// the same `(component, name)` returns the existing node unchanged.
    /// The callback name is resolved against the process registry now, not
    /// at dispatch.
    pub fn add_operation(
        &mut self,
        entity: EntityId,
        subdata: Option<&str>,
        kind: NodeKind,
        class: OpClass,
        eval_name: &str,
        name: &str,
        ctx: OpContext,
    ) -> Result<NodeId, GraphError> {
        if !kind.is_operation() {
            return Err(GraphError::NotAnOperation(kind));
        }
        let typeinfo = node_typeinfo(kind).ok_or(GraphError::UnregisteredKind(kind))?;
        let container = self.op_container(entity, subdata, kind)?;
        if let Some(existing) = self
            .node(container)
            .as_component()
            .and_then(|data| data.operation(name))
        {
            log::trace!("Operation `{}` already present as {:?}", name, existing);
            return Ok(existing);
        }

        let func = resolve_eval_function(eval_name);
        if func.is_none() {
            log::warn!("No eval function registered under `{}`", eval_name);
        }
        let node = Node::new(
            kind,
            name,
            NodeData::Operation(OperationData {
                class,
                eval_name: eval_name.to_owned(),
                func,
                ctx,
            }),
        );
        let id = self.push_node(node);
        (typeinfo.add_to_graph)(self, id, Some(entity))?;
        log::trace!("Add operation {:?} `{}` as {:?}", kind, name, id);
        self.invalidate_structure();
        Ok(id)
    }

    /// Wrap an already built inner graph into a subgraph node for `entity`.
    pub fn add_subgraph(
        &mut self,
        entity: EntityId,
        inner: Depsgraph,
        name: &str,
    ) -> Result<NodeId, GraphError> {
        if let Some(existing) = self.id_ref(entity) {
            return Ok(existing);
        }
        let typeinfo =
            node_typeinfo(NodeKind::Subgraph).ok_or(GraphError::UnregisteredKind(NodeKind::Subgraph))?;
        let node = Node::new(
            NodeKind::Subgraph,
            name,
            NodeData::Subgraph(node::SubgraphData {
                entity,
                graph: Box::new(inner),
            }),
        );
        let id = self.push_node(node);
        (typeinfo.add_to_graph)(self, id, Some(entity))?;
        self.invalidate_structure();
        Ok(id)
    }

    /// Remove a node and everything it owns.
    pub fn remove_node(&mut self, id: NodeId) {
        // Leaves first so parent maps are unregistered in order.
        let mut subtree = Vec::new();
        collect_subtree(self, id, &mut subtree);
        for node in subtree.into_iter().rev() {
            let links: Vec<RelationId> = {
                let n = self.node(node);
                n.inlinks.iter().chain(n.outlinks.iter()).copied().collect()
            };
            for rel in links {
                self.remove_relation(rel);
            }
            let kind = self.node(node).kind();
            if let Some(typeinfo) = node_typeinfo(kind) {
                (typeinfo.remove_from_graph)(self, node);
                (typeinfo.free_data)(self.node_mut(node));
            }
            log::trace!("Remove node {:?} ({:?})", node, kind);
            self.nodes[node.0] = None;
        }
        self.invalidate_structure();
    }

    /// Add a relation `from -> to`.
    ///
    /// Duplicates are allowed here and coalesced by the validation pass.
    pub fn add_relation(
        &mut self,
        from: NodeId,
        to: NodeId,
        kind: RelationKind,
        description: &str,
    ) -> RelationId {
        let id = RelationId(self.relations.len());
        self.relations.push(Some(Relation {
            from,
            to,
            kind,
            description: description.to_owned(),
        }));
        self.node_mut(from).outlinks.push(id);
        self.node_mut(to).inlinks.push(id);
        self.invalidate_structure();
        id
    }

    /// Remove a relation from the graph and both endpoint lists.
    pub fn remove_relation(&mut self, id: RelationId) {
        if let Some(rel) = self.relations[id.0].take() {
            if let Some(node) = self.nodes[rel.from.0].as_mut() {
                node.outlinks.retain(|l| *l != id);
            }
            if let Some(node) = self.nodes[rel.to.0].as_mut() {
                node.inlinks.retain(|l| *l != id);
            }
            self.invalidate_structure();
        }
    }

    /// Whether the validation pass has succeeded since the last structural
    /// mutation.
    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Cached topological order of operation nodes, if still valid.
    pub fn cached_order(&self) -> Option<&[NodeId]> {
        self.sorted.as_ref().map(Vec::as_slice)
    }

    /// Initialize evaluation context slots.
    ///
    /// [`ContextKind::All`] initializes every slot; initializing an already
    /// initialized slot is a no-op.
    pub fn init_context(&mut self, kind: ContextKind) {
        match kind.slot() {
            Some(slot) => {
                if self.contexts[slot].is_none() {
                    self.contexts[slot] = Some(EvaluationContext::new(kind));
                }
            }
            None => {
                for slot in 0..MAX_EVALUATION_CONTEXTS {
                    if self.contexts[slot].is_none() {
                        let kind = ContextKind::from_slot(slot).unwrap();
                        self.contexts[slot] = Some(EvaluationContext::new(kind));
                    }
                }
            }
        }
    }

    /// Borrow an initialized context.
    pub fn context(&self, kind: ContextKind) -> Option<&EvaluationContext> {
        self.contexts[kind.slot()?].as_ref()
    }

    /// Borrow an initialized context mutably.
    pub fn context_mut(&mut self, kind: ContextKind) -> Option<&mut EvaluationContext> {
        self.contexts[kind.slot()?].as_mut()
    }

    /// Dispose every initialized context.
    ///
    /// Inner subgraphs never allocate contexts of their own; they run under
    /// the outer context, so there is nothing to free below this graph.
    pub fn free_contexts(&mut self) {
        for slot in self.contexts.iter_mut() {
            if let Some(ctx) = slot.take() {
                ctx.dispose();
            }
        }
    }

    /// Next visit stamp for `lasttime`-based traversals.
    pub fn next_visit_stamp(&mut self) -> u32 {
        self.visit_stamp = self.visit_stamp.wrapping_add(1);
        if self.visit_stamp == 0 {
            self.visit_stamp = 1;
        }
        self.visit_stamp
    }

    pub(crate) fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(node));
        id
    }

    pub(crate) fn invalidate_structure(&mut self) {
        self.sorted = None;
        self.validated = false;
    }
}

impl Default for Depsgraph {
    fn default() -> Self {
        Depsgraph::new()
    }
}

fn collect_subtree(graph: &Depsgraph, id: NodeId, out: &mut Vec<NodeId>) {
    out.push(id);
    let node = graph.node(id);
    if let Some(data) = node.as_id_ref() {
        let children: Vec<NodeId> = data.components.values().copied().collect();
        for child in children {
            collect_subtree(graph, child, out);
        }
    } else if let Some(data) = node.as_component() {
        for child in data.order.clone() {
            collect_subtree(graph, child, out);
        }
        let bones: Vec<NodeId> = data.bones.values().copied().collect();
        for child in bones {
            collect_subtree(graph, child, out);
        }
    } else if let Some(data) = node.as_root() {
        if let Some(time) = data.time_source() {
            collect_subtree(graph, time, out);
        }
    }
}
