//! Property-path resolution seam.
//!
//! The host owns the syntax and semantics of property paths; the graph only
//! needs to map a resolved path onto one of its nodes (driver targets,
//! property tagging).

use sceneflow_core::EntityId;

use crate::{node::NodeKind, Depsgraph, NodeId};

/// Result of resolving a textual property path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyTarget {
    /// Entity the resolved data lives on.
    pub entity: EntityId,
    /// Component kind the data belongs to.
    pub component: NodeKind,
    /// Bone the data belongs to, for pose-channel paths.
    pub bone: Option<String>,
    /// Specific operation, when the path names one step exactly.
    pub operation: Option<String>,
}

/// Host-provided resolver mapping `(entity, path)` to a concrete target.
pub trait PropertyResolver {
    /// Resolve `path` rooted at `entity`. `None` when the path does not
    /// name anything the host knows about.
    fn resolve(&self, entity: EntityId, path: &str) -> Option<PropertyTarget>;
}

/// Map a textual property path to the graph node standing for it.
///
/// Resolution failures and dangling targets are reported by the caller;
/// this returns `None` for both.
pub fn node_from_path(
    graph: &Depsgraph,
    resolver: &dyn PropertyResolver,
    entity: EntityId,
    path: &str,
) -> Option<NodeId> {
    let target = resolver.resolve(entity, path)?;
    match (&target.bone, &target.operation) {
        (Some(bone), Some(op)) => {
            let bone = graph.find_node(NodeKind::Bone, Some(target.entity), Some(bone))?;
            graph.node(bone).as_component()?.operation(op)
        }
        (Some(bone), None) => graph.find_node(NodeKind::Bone, Some(target.entity), Some(bone)),
        (None, Some(op)) => {
            let component = graph.component(target.entity, target.component)?;
            graph.node(component).as_component()?.operation(op)
        }
        (None, None) => graph.component(target.entity, target.component),
    }
}
