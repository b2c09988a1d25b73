//! Node model.
//!
//! Every vertex of the graph shares one header (kind, name, owner, edge
//! lists, traversal scratch, flags); kind-specific state lives in the
//! tagged [`NodeData`] payload and is manipulated through the kind registry.

use fnv::FnvHashMap;
use smallvec::SmallVec;

use sceneflow_core::{EntityId, EvalFn, OpContext};

use crate::{Depsgraph, NodeId, RelationId};

/// Longest node name kept verbatim; longer names are truncated.
pub const MAX_NODE_NAME: usize = 64;

/// Kind of a graph node.
///
/// Kinds form three strata: structural nodes at the top, components under
/// an id-ref, operations as leaves. `Bone` is the one sub-component level,
/// owned by an `EvalPose` component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    /// Graph entry point. Singleton.
    Root,
    /// Broadcasts frame changes.
    TimeSource,
    /// One per entity present in the graph.
    IdRef,
    /// Wraps a nested graph for group instancing.
    Subgraph,

    /// Settings and miscellaneous datablock parameters.
    Parameters,
    /// Proxy redirection.
    Proxy,
    /// Animation playback for the entity.
    Animation,
    /// Object transform stack.
    Transform,
    /// Evaluated geometry.
    Geometry,
    /// Pose evaluation context of an armature object.
    EvalPose,
    /// Particle systems of an object.
    EvalParticles,
    /// One bone within an `EvalPose`; owns its own operation map.
    Bone,

    /// Parameter evaluation.
    OpParameter,
    /// Proxy synchronisation.
    OpProxy,
    /// One step of the transform stack.
    OpTransform,
    /// Animation system evaluation.
    OpAnimation,
    /// Geometry evaluation.
    OpGeometry,
    /// Property update callback.
    OpUpdate,
    /// Driver evaluation.
    OpDriver,
    /// Pose-level solver (IK and friends).
    OpPose,
    /// Per-bone evaluation step.
    OpBone,
    /// Particle system step.
    OpParticle,
    /// Rigid-body world step.
    OpRigidbody,
}

impl NodeKind {
    /// Whether this kind is one of the structural (top-stratum) kinds.
    pub fn is_structural(self) -> bool {
        match self {
            NodeKind::Root | NodeKind::TimeSource | NodeKind::IdRef | NodeKind::Subgraph => true,
            _ => false,
        }
    }

    /// Whether this kind groups operations (components and bones).
    pub fn is_component(self) -> bool {
        match self {
            NodeKind::Parameters
            | NodeKind::Proxy
            | NodeKind::Animation
            | NodeKind::Transform
            | NodeKind::Geometry
            | NodeKind::EvalPose
            | NodeKind::EvalParticles
            | NodeKind::Bone => true,
            _ => false,
        }
    }

    /// Whether this kind is an operation (leaf) kind.
    pub fn is_operation(self) -> bool {
        !self.is_structural() && !self.is_component()
    }

    /// Component kind that owns operations of this kind.
    ///
    /// `OpBone` resolves through the bone sub-map of `EvalPose`; the
    /// returned kind is the component consulted when no bone is named.
    pub fn owning_component(self) -> Option<NodeKind> {
        match self {
            NodeKind::OpParameter | NodeKind::OpUpdate | NodeKind::OpDriver => {
                Some(NodeKind::Parameters)
            }
            NodeKind::OpProxy => Some(NodeKind::Proxy),
            NodeKind::OpTransform | NodeKind::OpRigidbody => Some(NodeKind::Transform),
            NodeKind::OpAnimation => Some(NodeKind::Animation),
            NodeKind::OpGeometry => Some(NodeKind::Geometry),
            NodeKind::OpPose | NodeKind::OpBone => Some(NodeKind::EvalPose),
            _ => None,
        }
    }

    /// Whether `owner` is a legal owner kind for a node of this kind.
    ///
    /// Encodes the mandatory hierarchy: root owns structural refs, id-refs
    /// own components, components own operations, `EvalPose` additionally
    /// owns bones which own their own operations.
    pub fn valid_owner(self, owner: NodeKind) -> bool {
        match self {
            NodeKind::Root => false,
            NodeKind::TimeSource => owner == NodeKind::Root || owner == NodeKind::IdRef,
            NodeKind::IdRef | NodeKind::Subgraph => owner == NodeKind::Root,
            NodeKind::Bone => owner == NodeKind::EvalPose,
            NodeKind::OpBone => owner == NodeKind::Bone || owner == NodeKind::EvalPose,
            kind if kind.is_component() => owner == NodeKind::IdRef,
            kind => kind.owning_component() == Some(owner),
        }
    }
}

/// Execution class of an operation.
///
/// Declaration order is the scheduler's tie-break order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum OpClass {
    /// First steps of a component (base values).
    Init,
    /// Occasional full rebuild of simulation state.
    Rebuild,
    /// Ordinary evaluation step.
    Exec,
    /// Simulation step; never runs beside a sibling `Sim` of the same component.
    Sim,
    /// Cleanup / result flushing.
    Post,
}

bitflags! {
    /// Per-node flag word.
    pub struct NodeFlags: u32 {
        /// Node was tagged directly (as opposed to reached by a flush).
        const DIRECTLY_MODIFIED = 0x1;
        /// Node must be re-evaluated.
        const NEEDS_UPDATE = 0x2;
        /// Operation runs scripted expressions; serialized under the script lock.
        const USES_PYTHON = 0x4;
    }
}

/// Kind-specific payload of the root node.
#[derive(Debug, Default)]
pub struct RootData {
    pub(crate) time_source: Option<NodeId>,
}

impl RootData {
    /// The graph's anonymous time source, if created.
    pub fn time_source(&self) -> Option<NodeId> {
        self.time_source
    }
}

/// Kind-specific payload of an id-ref node.
#[derive(Debug)]
pub struct IdRefData {
    pub(crate) entity: EntityId,
    pub(crate) components: FnvHashMap<NodeKind, NodeId>,
}

impl IdRefData {
    /// Entity this node stands for.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Component node of the given kind, if present.
    pub fn component(&self, kind: NodeKind) -> Option<NodeId> {
        self.components.get(&kind).copied()
    }

    /// Iterate over `(kind, node)` pairs of this entity's components.
    pub fn components(&self) -> impl Iterator<Item = (NodeKind, NodeId)> + '_ {
        self.components.iter().map(|(k, n)| (*k, *n))
    }
}

/// Kind-specific payload of a subgraph node.
#[derive(Debug)]
pub struct SubgraphData {
    pub(crate) entity: EntityId,
    pub(crate) graph: Box<Depsgraph>,
}

impl SubgraphData {
    /// Group entity the nested graph was built from.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// The nested graph.
    pub fn graph(&self) -> &Depsgraph {
        &self.graph
    }

    /// The nested graph, mutably.
    pub fn graph_mut(&mut self) -> &mut Depsgraph {
        &mut self.graph
    }
}

/// Kind-specific payload of a component (or bone) node.
#[derive(Debug)]
pub struct ComponentData {
    pub(crate) entity: EntityId,
    pub(crate) ops: FnvHashMap<String, NodeId>,
    pub(crate) order: Vec<NodeId>,
    pub(crate) bones: FnvHashMap<String, NodeId>,
}

impl ComponentData {
    /// Entity this component belongs to.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Operation node registered under `name`.
    pub fn operation(&self, name: &str) -> Option<NodeId> {
        self.ops.get(name).copied()
    }

    /// Operations in insertion order.
    pub fn operations(&self) -> &[NodeId] {
        &self.order
    }

    /// Bone component registered under `name`. Pose components only.
    pub fn bone(&self, name: &str) -> Option<NodeId> {
        self.bones.get(name).copied()
    }

    /// Iterate over bone component nodes. Pose components only.
    pub fn bones(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.bones.values().copied()
    }
}

/// Kind-specific payload of an operation node.
#[derive(Debug)]
pub struct OperationData {
    pub(crate) class: OpClass,
    pub(crate) eval_name: String,
    pub(crate) func: Option<EvalFn>,
    pub(crate) ctx: OpContext,
}

impl OperationData {
    /// Execution class.
    pub fn class(&self) -> OpClass {
        self.class
    }

    /// Name of the host callback this operation runs.
    pub fn eval_name(&self) -> &str {
        &self.eval_name
    }

    /// Callback resolved at registration time. `None` if the host never
    /// registered the name.
    pub fn func(&self) -> Option<EvalFn> {
        self.func
    }

    /// Context handed to the callback.
    pub fn ctx(&self) -> &OpContext {
        &self.ctx
    }
}

/// Kind-specific node payload.
#[derive(Debug)]
pub enum NodeData {
    /// Payload of [`NodeKind::Root`].
    Root(RootData),
    /// [`NodeKind::TimeSource`] carries no extra state.
    TimeSource,
    /// Payload of [`NodeKind::IdRef`].
    IdRef(IdRefData),
    /// Payload of [`NodeKind::Subgraph`].
    Subgraph(SubgraphData),
    /// Payload of component and bone kinds.
    Component(ComponentData),
    /// Payload of operation kinds.
    Operation(OperationData),
}

/// Universal graph vertex.
#[derive(Debug)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) name: String,
    pub(crate) owner: Option<NodeId>,
    pub(crate) inlinks: SmallVec<[RelationId; 4]>,
    pub(crate) outlinks: SmallVec<[RelationId; 4]>,
    pub(crate) valency: u32,
    pub(crate) lasttime: u32,
    pub(crate) flags: NodeFlags,
    pub(crate) data: NodeData,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, name: &str, data: NodeData) -> Self {
        Node {
            kind,
            name: clamp_name(name),
            owner: None,
            inlinks: SmallVec::new(),
            outlinks: SmallVec::new(),
            valency: 0,
            lasttime: 0,
            flags: NodeFlags::empty(),
            data,
        }
    }

    /// Kind tag.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning node, one stratum up. `None` only for the root.
    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// Incoming relations.
    pub fn inlinks(&self) -> &[RelationId] {
        &self.inlinks
    }

    /// Outgoing relations.
    pub fn outlinks(&self) -> &[RelationId] {
        &self.outlinks
    }

    /// Flag word.
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// Set the given flags.
    pub fn insert_flags(&mut self, flags: NodeFlags) {
        self.flags.insert(flags);
    }

    /// Clear the given flags.
    pub fn remove_flags(&mut self, flags: NodeFlags) {
        self.flags.remove(flags);
    }

    /// Whether the node is tagged for re-evaluation.
    pub fn is_tagged(&self) -> bool {
        self.flags.contains(NodeFlags::NEEDS_UPDATE)
    }

    /// Traversal scratch: unresolved-predecessor count.
    pub fn valency(&self) -> u32 {
        self.valency
    }

    /// Traversal scratch: last visit stamp.
    pub fn lasttime(&self) -> u32 {
        self.lasttime
    }

    /// Stamp the node as visited by the current traversal.
    pub fn set_lasttime(&mut self, stamp: u32) {
        self.lasttime = stamp;
    }

    /// Root payload, if this is the root node.
    pub fn as_root(&self) -> Option<&RootData> {
        match &self.data {
            NodeData::Root(data) => Some(data),
            _ => None,
        }
    }

    /// Id-ref payload, if any.
    pub fn as_id_ref(&self) -> Option<&IdRefData> {
        match &self.data {
            NodeData::IdRef(data) => Some(data),
            _ => None,
        }
    }

    /// Subgraph payload, if any.
    pub fn as_subgraph(&self) -> Option<&SubgraphData> {
        match &self.data {
            NodeData::Subgraph(data) => Some(data),
            _ => None,
        }
    }

    /// Subgraph payload, mutably.
    pub fn as_subgraph_mut(&mut self) -> Option<&mut SubgraphData> {
        match &mut self.data {
            NodeData::Subgraph(data) => Some(data),
            _ => None,
        }
    }

    /// Component payload, if any.
    pub fn as_component(&self) -> Option<&ComponentData> {
        match &self.data {
            NodeData::Component(data) => Some(data),
            _ => None,
        }
    }

    /// Operation payload, if any.
    pub fn as_operation(&self) -> Option<&OperationData> {
        match &self.data {
            NodeData::Operation(data) => Some(data),
            _ => None,
        }
    }

    /// Entity this node belongs to, if it belongs to one.
    pub fn entity(&self) -> Option<EntityId> {
        match &self.data {
            NodeData::Root(_) | NodeData::TimeSource => None,
            NodeData::IdRef(data) => Some(data.entity),
            NodeData::Subgraph(data) => Some(data.entity),
            NodeData::Component(data) => Some(data.entity),
            NodeData::Operation(data) => data.ctx.entity(),
        }
    }
}

pub(crate) fn clamp_name(name: &str) -> String {
    if name.len() <= MAX_NODE_NAME {
        return name.to_owned();
    }
    let mut end = MAX_NODE_NAME;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_component_table() {
        assert_eq!(
            NodeKind::OpTransform.owning_component(),
            Some(NodeKind::Transform)
        );
        assert_eq!(
            NodeKind::OpDriver.owning_component(),
            Some(NodeKind::Parameters)
        );
        assert_eq!(
            NodeKind::OpBone.owning_component(),
            Some(NodeKind::EvalPose)
        );
        assert_eq!(
            NodeKind::OpRigidbody.owning_component(),
            Some(NodeKind::Transform)
        );
        assert_eq!(NodeKind::Transform.owning_component(), None);
    }

    #[test]
    fn class_ordering() {
        assert!(OpClass::Init < OpClass::Rebuild);
        assert!(OpClass::Rebuild < OpClass::Exec);
        assert!(OpClass::Exec < OpClass::Sim);
        assert!(OpClass::Sim < OpClass::Post);
    }

    #[test]
    fn name_clamped_on_char_boundary() {
        let long = "x".repeat(80);
        assert_eq!(clamp_name(&long).len(), MAX_NODE_NAME);
        let multibyte = "é".repeat(40);
        let clamped = clamp_name(&multibyte);
        assert!(clamped.len() <= MAX_NODE_NAME);
        assert!(multibyte.starts_with(&clamped));
    }

    #[test]
    fn ownership_table() {
        assert!(NodeKind::IdRef.valid_owner(NodeKind::Root));
        assert!(NodeKind::Transform.valid_owner(NodeKind::IdRef));
        assert!(NodeKind::OpTransform.valid_owner(NodeKind::Transform));
        assert!(NodeKind::Bone.valid_owner(NodeKind::EvalPose));
        assert!(NodeKind::OpBone.valid_owner(NodeKind::Bone));
        assert!(!NodeKind::OpBone.valid_owner(NodeKind::Transform));
        assert!(!NodeKind::Root.valid_owner(NodeKind::Root));
        assert!(!NodeKind::OpGeometry.valid_owner(NodeKind::Transform));
    }
}
