//! Filtered graph copies.
//!
//! Query and filter tooling works on partial clones of a graph. Cloned
//! nodes keep their header and payload but carry empty edge lists, no
//! owner and zeroed traversal scratch; relations are copied only when both
//! endpoints made it into the copy.

use fnv::{FnvHashMap, FnvHashSet};

use sceneflow_core::EntityId;

use crate::{
    node::{Node, NodeKind},
    registry::node_typeinfo,
    Depsgraph, NodeId, RelationId,
};

/// What a filtered copy keeps.
#[derive(Clone, Debug, Default)]
pub struct FilterCriteria {
    /// Restrict to these entities. `None` keeps all.
    pub entities: Option<FnvHashSet<EntityId>>,
    /// Restrict to these node kinds. `None` keeps all.
    pub kinds: Option<FnvHashSet<NodeKind>>,
}

impl FilterCriteria {
    fn matches(&self, node: &Node) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&node.kind()) {
                return false;
            }
        }
        if let Some(entities) = &self.entities {
            match node.entity() {
                Some(entity) if entities.contains(&entity) => {}
                Some(_) => return false,
                // Structural nodes without an entity always pass.
                None => {}
            }
        }
        true
    }
}

/// Copy context: source-to-copy mapping plus the partial graph being built.
#[derive(Debug)]
pub struct CopyContext {
    criteria: FilterCriteria,
    map: FnvHashMap<NodeId, NodeId>,
    dest: Depsgraph,
}

impl CopyContext {
    /// Start a copy with the given filter criteria.
    pub fn new(criteria: FilterCriteria) -> Self {
        CopyContext {
            criteria,
            map: FnvHashMap::default(),
            dest: Depsgraph::new(),
        }
    }

    /// Copy of `src`, if one was made already.
    pub fn mapped(&self, src: NodeId) -> Option<NodeId> {
        self.map.get(&src).copied()
    }

    /// Clone one node into the copy.
    ///
    /// The clone is not re-parented and carries no edges; child maps only
    /// reference children that were copied before the parent (copy
    /// hierarchies leaves-first, or use
    /// [`copy_hierarchy`](CopyContext::copy_hierarchy)).
    pub fn copy_node(&mut self, source: &Depsgraph, id: NodeId) -> Option<NodeId> {
        if let Some(done) = self.mapped(id) {
            return Some(done);
        }
        let src = source.node(id);
        if !self.criteria.matches(src) {
            return None;
        }
        let typeinfo = node_typeinfo(src.kind())?;
        let data = (typeinfo.copy_data)(self, src);
        let mut node = Node::new(src.kind(), src.name(), data);
        node.flags = src.flags();
        let copied = self.dest.push_node(node);
        self.map.insert(id, copied);
        Some(copied)
    }

    /// Clone a node and everything it owns, leaves first.
    pub fn copy_hierarchy(&mut self, source: &Depsgraph, id: NodeId) -> Option<NodeId> {
        let node = source.node(id);
        if !self.criteria.matches(node) {
            return None;
        }
        let children: Vec<NodeId> = if let Some(data) = node.as_id_ref() {
            data.components().map(|(_, child)| child).collect()
        } else if let Some(data) = node.as_component() {
            data.operations()
                .iter()
                .copied()
                .chain(data.bones())
                .collect()
        } else {
            Vec::new()
        };
        for child in children {
            self.copy_hierarchy(source, child);
        }
        self.copy_node(source, id)
    }

    /// Clone a relation when both endpoints were copied.
    pub fn copy_relation(&mut self, source: &Depsgraph, id: RelationId) -> Option<RelationId> {
        let rel = source.relation(id);
        let from = self.mapped(rel.from())?;
        let to = self.mapped(rel.to())?;
        Some(
            self.dest
                .add_relation(from, to, rel.kind(), rel.description()),
        )
    }

    /// Finish and take the partial graph.
    pub fn into_graph(self) -> Depsgraph {
        self.dest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::{NodeKind, OpClass},
        registry::register_node_types,
    };
    use sceneflow_core::{
        register_eval_function, CallbackError, EvaluationContext, OpContext,
    };

    fn nop(_: &EvaluationContext, _: &OpContext) -> Result<(), CallbackError> {
        Ok(())
    }

    #[test]
    fn copied_nodes_have_no_edges_and_translated_children() {
        register_node_types();
        register_eval_function("tests::nop", nop);
        let mut graph = Depsgraph::new();
        let a = EntityId::new(20);
        let b = EntityId::new(21);
        let op_a = graph
            .add_operation(
                a,
                None,
                NodeKind::OpTransform,
                OpClass::Exec,
                "tests::nop",
                "Local Transform",
                OpContext::Entity(a),
            )
            .unwrap();
        let op_b = graph
            .add_operation(
                b,
                None,
                NodeKind::OpTransform,
                OpClass::Exec,
                "tests::nop",
                "Local Transform",
                OpContext::Entity(b),
            )
            .unwrap();
        let rel = graph.add_relation(op_a, op_b, crate::relation::RelationKind::Transform, "t");

        // Filter down to entity `a` only.
        let mut entities = FnvHashSet::default();
        entities.insert(a);
        let mut ctx = CopyContext::new(FilterCriteria {
            entities: Some(entities),
            kinds: None,
        });
        let id_ref = graph.id_ref(a).unwrap();
        let copied_ref = ctx.copy_hierarchy(&graph, id_ref).expect("copied");
        // Cross-entity relation has an uncopied endpoint.
        assert!(ctx.copy_relation(&graph, rel).is_none());

        let copy = ctx.into_graph();
        let copied_ref = copy.node(copied_ref);
        assert_eq!(copied_ref.owner(), None);
        assert!(copied_ref.inlinks().is_empty());
        assert!(copied_ref.outlinks().is_empty());

        let transform = copied_ref
            .as_id_ref()
            .unwrap()
            .component(NodeKind::Transform)
            .expect("translated component map");
        let ops = copy.node(transform).as_component().unwrap();
        assert_eq!(ops.operations().len(), 1);
        let op = copy.node(ops.operations()[0]);
        assert_eq!(op.name(), "Local Transform");
        assert_eq!(op.valency(), 0);
        assert_eq!(op.lasttime(), 0);
    }
}
