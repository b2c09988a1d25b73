//! Per-kind node behavior table.
//!
//! Every node kind registers one [`NodeTypeInfo`] entry describing how
//! nodes of that kind are initialized, stitched into the hierarchy,
//! removed, copied and validated. The table is populated once at process
//! start and read-only afterwards; storage dispatches through it instead
//! of switching on kinds ad hoc.

use std::mem;

use fnv::FnvHashMap;
use parking_lot::RwLock;

use sceneflow_core::{EntityId, OpContext};

use crate::{
    copy::CopyContext,
    node::{
        ComponentData, IdRefData, Node, NodeData, NodeKind, OperationData, RootData,
        SubgraphData,
    },
    relation::RelationKind,
    validate::ValidateError,
    Depsgraph, GraphError, NodeId,
};

/// Behavior table entry for one node kind.
#[derive(Copy, Clone, Debug)]
pub struct NodeTypeInfo {
    /// Kind this entry describes.
    pub kind: NodeKind,
    /// Default node name.
    pub name: &'static str,
    /// Bytes of kind-specific payload.
    pub size: usize,
    /// Build the kind-specific payload for a fresh node.
    pub init_data: fn(NodeKind, Option<EntityId>) -> Result<NodeData, GraphError>,
    /// Stitch a freshly created node into the hierarchy and indices.
    pub add_to_graph: fn(&mut Depsgraph, NodeId, Option<EntityId>) -> Result<(), GraphError>,
    /// Inverse of `add_to_graph`.
    pub remove_from_graph: fn(&mut Depsgraph, NodeId),
    /// Build the payload of a clone, translating child maps through the
    /// copy context.
    pub copy_data: fn(&mut CopyContext, &Node) -> NodeData,
    /// Release kind-specific extensions. Edge lists stay with the graph.
    pub free_data: fn(&mut Node),
    /// Kind-specific implicit-constraint pass, if the kind has one.
    pub validate_links: Option<fn(&mut Depsgraph, NodeId) -> Result<(), ValidateError>>,
}

lazy_static::lazy_static! {
    static ref NODE_TYPES: RwLock<FnvHashMap<NodeKind, NodeTypeInfo>> =
        RwLock::new(FnvHashMap::default());
}

/// Look up the behavior entry for a kind.
pub fn node_typeinfo(kind: NodeKind) -> Option<NodeTypeInfo> {
    NODE_TYPES.read().get(&kind).copied()
}

/// Populate the kind table. Idempotent; called once at process start.
pub fn register_node_types() {
    let mut types = NODE_TYPES.write();
    if !types.is_empty() {
        return;
    }
    log::debug!("Register node types");

    let entries = [
        NodeTypeInfo {
            kind: NodeKind::Root,
            name: "Root",
            size: mem::size_of::<RootData>(),
            init_data: root_init,
            add_to_graph: root_add_to_graph,
            remove_from_graph: root_remove_from_graph,
            copy_data: root_copy,
            free_data: noop_free,
            validate_links: None,
        },
        NodeTypeInfo {
            kind: NodeKind::TimeSource,
            name: "Time Source",
            size: 0,
            init_data: time_source_init,
            add_to_graph: time_source_add_to_graph,
            remove_from_graph: time_source_remove_from_graph,
            copy_data: time_source_copy,
            free_data: noop_free,
            validate_links: None,
        },
        NodeTypeInfo {
            kind: NodeKind::IdRef,
            name: "ID Reference",
            size: mem::size_of::<IdRefData>(),
            init_data: id_ref_init,
            add_to_graph: id_ref_add_to_graph,
            remove_from_graph: id_ref_remove_from_graph,
            copy_data: id_ref_copy,
            free_data: id_ref_free,
            validate_links: Some(id_ref_validate_links),
        },
        NodeTypeInfo {
            kind: NodeKind::Subgraph,
            name: "Subgraph",
            size: mem::size_of::<SubgraphData>(),
            init_data: dedicated_init,
            add_to_graph: subgraph_add_to_graph,
            remove_from_graph: subgraph_remove_from_graph,
            copy_data: subgraph_copy,
            free_data: subgraph_free,
            validate_links: None,
        },
        component_typeinfo(NodeKind::Parameters, "Parameters"),
        component_typeinfo(NodeKind::Proxy, "Proxy"),
        component_typeinfo(NodeKind::Animation, "Animation"),
        component_typeinfo(NodeKind::Transform, "Transform"),
        component_typeinfo(NodeKind::Geometry, "Geometry"),
        component_typeinfo(NodeKind::EvalPose, "Pose Eval"),
        component_typeinfo(NodeKind::EvalParticles, "Particle Systems"),
        bone_typeinfo(),
        operation_typeinfo(NodeKind::OpParameter, "Parameters Op"),
        operation_typeinfo(NodeKind::OpProxy, "Proxy Op"),
        operation_typeinfo(NodeKind::OpTransform, "Transform Op"),
        operation_typeinfo(NodeKind::OpAnimation, "Animation Op"),
        operation_typeinfo(NodeKind::OpGeometry, "Geometry Op"),
        operation_typeinfo(NodeKind::OpUpdate, "Update Op"),
        operation_typeinfo(NodeKind::OpDriver, "Driver Op"),
        operation_typeinfo(NodeKind::OpPose, "Pose Op"),
        operation_typeinfo(NodeKind::OpBone, "Bone Op"),
        operation_typeinfo(NodeKind::OpParticle, "Particle Op"),
        operation_typeinfo(NodeKind::OpRigidbody, "Rigidbody Op"),
    ];
    for entry in entries.iter() {
        types.insert(entry.kind, *entry);
    }
}

/// Clear the kind table. Process teardown only.
pub fn free_node_types() {
    NODE_TYPES.write().clear();
}

fn component_typeinfo(kind: NodeKind, name: &'static str) -> NodeTypeInfo {
    NodeTypeInfo {
        kind,
        name,
        size: mem::size_of::<ComponentData>(),
        init_data: component_init,
        add_to_graph: component_add_to_graph,
        remove_from_graph: component_remove_from_graph,
        copy_data: component_copy,
        free_data: component_free,
        validate_links: match kind {
            NodeKind::EvalPose => Some(pose_validate_links),
            _ => None,
        },
    }
}

fn bone_typeinfo() -> NodeTypeInfo {
    NodeTypeInfo {
        kind: NodeKind::Bone,
        name: "Bone",
        size: mem::size_of::<ComponentData>(),
        init_data: component_init,
        add_to_graph: bone_add_to_graph,
        remove_from_graph: bone_remove_from_graph,
        copy_data: component_copy,
        free_data: component_free,
        validate_links: None,
    }
}

fn operation_typeinfo(kind: NodeKind, name: &'static str) -> NodeTypeInfo {
    NodeTypeInfo {
        kind,
        name,
        size: mem::size_of::<OperationData>(),
        init_data: dedicated_init,
        add_to_graph: operation_add_to_graph,
        remove_from_graph: operation_remove_from_graph,
        copy_data: operation_copy,
        free_data: noop_free,
        validate_links: None,
    }
}

impl Depsgraph {
    /// Container node an operation of `kind` on `(entity, subdata)` lives in.
    pub(crate) fn op_container(
        &mut self,
        entity: EntityId,
        subdata: Option<&str>,
        kind: NodeKind,
    ) -> Result<NodeId, GraphError> {
        match subdata {
            Some(bone) => self.get_node(NodeKind::Bone, Some(entity), Some(bone)),
            None => {
                let component = kind
                    .owning_component()
                    .ok_or(GraphError::NotAnOperation(kind))?;
                self.get_node(component, Some(entity), None)
            }
        }
    }
}

/* Root ========================================================= */

fn root_init(_kind: NodeKind, _entity: Option<EntityId>) -> Result<NodeData, GraphError> {
    Ok(NodeData::Root(RootData::default()))
}

fn root_add_to_graph(
    graph: &mut Depsgraph,
    id: NodeId,
    _entity: Option<EntityId>,
) -> Result<(), GraphError> {
    if graph.root.is_some() {
        return Err(GraphError::DuplicateRoot);
    }
    graph.root = Some(id);
    Ok(())
}

fn root_remove_from_graph(graph: &mut Depsgraph, id: NodeId) {
    if graph.root == Some(id) {
        graph.root = None;
    }
}

fn root_copy(ctx: &mut CopyContext, src: &Node) -> NodeData {
    let time_source = src
        .as_root()
        .and_then(|data| data.time_source())
        .and_then(|id| ctx.mapped(id));
    NodeData::Root(RootData { time_source })
}

/* Time source ================================================== */

fn time_source_init(_kind: NodeKind, _entity: Option<EntityId>) -> Result<NodeData, GraphError> {
    Ok(NodeData::TimeSource)
}

fn time_source_add_to_graph(
    graph: &mut Depsgraph,
    id: NodeId,
    entity: Option<EntityId>,
) -> Result<(), GraphError> {
    match entity {
        None => {
            let root = graph.get_node(NodeKind::Root, None, None)?;
            graph.node_mut(id).owner = Some(root);
            match &mut graph.node_mut(root).data {
                NodeData::Root(data) => data.time_source = Some(id),
                _ => unreachable!("root node carries root data"),
            }
        }
        Some(entity) => {
            let id_ref = graph.get_node(NodeKind::IdRef, Some(entity), None)?;
            graph.node_mut(id).owner = Some(id_ref);
            match &mut graph.node_mut(id_ref).data {
                NodeData::IdRef(data) => {
                    data.components.insert(NodeKind::TimeSource, id);
                }
                _ => unreachable!("id-ref node carries id-ref data"),
            }
        }
    }
    Ok(())
}

fn time_source_remove_from_graph(graph: &mut Depsgraph, id: NodeId) {
    let owner = graph.node(id).owner;
    if let Some(owner) = owner {
        match &mut graph.node_mut(owner).data {
            NodeData::Root(data) => {
                if data.time_source == Some(id) {
                    data.time_source = None;
                }
            }
            NodeData::IdRef(data) => {
                data.components.remove(&NodeKind::TimeSource);
            }
            _ => {}
        }
    }
}

fn time_source_copy(_ctx: &mut CopyContext, _src: &Node) -> NodeData {
    NodeData::TimeSource
}

/* ID reference ================================================= */

fn id_ref_init(kind: NodeKind, entity: Option<EntityId>) -> Result<NodeData, GraphError> {
    let entity = entity.ok_or(GraphError::MissingEntity(kind))?;
    Ok(NodeData::IdRef(IdRefData {
        entity,
        components: FnvHashMap::default(),
    }))
}

fn id_ref_add_to_graph(
    graph: &mut Depsgraph,
    id: NodeId,
    entity: Option<EntityId>,
) -> Result<(), GraphError> {
    let entity = entity.ok_or(GraphError::MissingEntity(NodeKind::IdRef))?;
    let root = graph.get_node(NodeKind::Root, None, None)?;
    graph.node_mut(id).owner = Some(root);
    graph.id_index.insert(entity, id);
    Ok(())
}

fn id_ref_remove_from_graph(graph: &mut Depsgraph, id: NodeId) {
    let entity = graph.node(id).as_id_ref().map(|data| data.entity());
    if let Some(entity) = entity {
        graph.id_index.remove(&entity);
    }
}

fn id_ref_copy(ctx: &mut CopyContext, src: &Node) -> NodeData {
    let data = src.as_id_ref().expect("id-ref node carries id-ref data");
    let components = data
        .components
        .iter()
        .filter_map(|(kind, child)| ctx.mapped(*child).map(|mapped| (*kind, mapped)))
        .collect();
    NodeData::IdRef(IdRefData {
        entity: data.entity,
        components,
    })
}

fn id_ref_free(node: &mut Node) {
    if let NodeData::IdRef(data) = &mut node.data {
        data.components.clear();
    }
}

/// Implicit inter-component ordering within one entity: animation results
/// land before parameters are read, transforms land before geometry.
fn id_ref_validate_links(graph: &mut Depsgraph, id: NodeId) -> Result<(), ValidateError> {
    let (animation, parameters, transform, geometry) = {
        let data = graph.node(id).as_id_ref().expect("id-ref data");
        (
            data.component(NodeKind::Animation),
            data.component(NodeKind::Parameters),
            data.component(NodeKind::Transform),
            data.component(NodeKind::Geometry),
        )
    };
    if let (Some(animation), Some(parameters)) = (animation, parameters) {
        ensure_relation(
            graph,
            animation,
            parameters,
            RelationKind::ComponentOrder,
            "Animation -> Parameters",
        );
    }
    if let (Some(transform), Some(geometry)) = (transform, geometry) {
        ensure_relation(
            graph,
            transform,
            geometry,
            RelationKind::ComponentOrder,
            "Transform -> Geometry",
        );
    }
    Ok(())
}

/* Subgraph ===================================================== */

fn dedicated_init(kind: NodeKind, _entity: Option<EntityId>) -> Result<NodeData, GraphError> {
    // Subgraph and operation nodes carry state `get` cannot invent; they
    // are created through their dedicated entry points.
    Err(GraphError::NotFound {
        kind,
        name: String::new(),
    })
}

fn subgraph_add_to_graph(
    graph: &mut Depsgraph,
    id: NodeId,
    entity: Option<EntityId>,
) -> Result<(), GraphError> {
    let entity = entity.ok_or(GraphError::MissingEntity(NodeKind::Subgraph))?;
    let root = graph.get_node(NodeKind::Root, None, None)?;
    graph.node_mut(id).owner = Some(root);
    graph.id_index.insert(entity, id);
    Ok(())
}

fn subgraph_remove_from_graph(graph: &mut Depsgraph, id: NodeId) {
    let entity = graph.node(id).as_subgraph().map(|data| data.entity());
    if let Some(entity) = entity {
        graph.id_index.remove(&entity);
    }
}

fn subgraph_copy(_ctx: &mut CopyContext, src: &Node) -> NodeData {
    // Filter copies keep the reference but not the nested contents.
    let entity = src.as_subgraph().expect("subgraph data").entity();
    log::debug!("Subgraph `{}` copied without nested graph contents", src.name());
    NodeData::Subgraph(SubgraphData {
        entity,
        graph: Box::new(Depsgraph::new()),
    })
}

fn subgraph_free(node: &mut Node) {
    if let NodeData::Subgraph(data) = &mut node.data {
        data.graph.clear();
    }
}

/* Components =================================================== */

fn component_init(kind: NodeKind, entity: Option<EntityId>) -> Result<NodeData, GraphError> {
    let entity = entity.ok_or(GraphError::MissingEntity(kind))?;
    Ok(NodeData::Component(ComponentData {
        entity,
        ops: FnvHashMap::default(),
        order: Vec::new(),
        bones: FnvHashMap::default(),
    }))
}

fn component_add_to_graph(
    graph: &mut Depsgraph,
    id: NodeId,
    entity: Option<EntityId>,
) -> Result<(), GraphError> {
    let kind = graph.node(id).kind();
    let entity = entity.ok_or(GraphError::MissingEntity(kind))?;
    let id_ref = graph.get_node(NodeKind::IdRef, Some(entity), None)?;
    graph.node_mut(id).owner = Some(id_ref);
    match &mut graph.node_mut(id_ref).data {
        NodeData::IdRef(data) => {
            data.components.insert(kind, id);
        }
        _ => unreachable!("id-ref node carries id-ref data"),
    }
    Ok(())
}

fn component_remove_from_graph(graph: &mut Depsgraph, id: NodeId) {
    let (kind, owner) = {
        let node = graph.node(id);
        (node.kind(), node.owner)
    };
    if let Some(owner) = owner {
        if let NodeData::IdRef(data) = &mut graph.node_mut(owner).data {
            data.components.remove(&kind);
        }
    }
}

fn component_copy(ctx: &mut CopyContext, src: &Node) -> NodeData {
    let data = src.as_component().expect("component data");
    let ops: FnvHashMap<String, NodeId> = data
        .ops
        .iter()
        .filter_map(|(name, child)| ctx.mapped(*child).map(|mapped| (name.clone(), mapped)))
        .collect();
    let order = data
        .order
        .iter()
        .filter_map(|child| ctx.mapped(*child))
        .collect();
    let bones = data
        .bones
        .iter()
        .filter_map(|(name, child)| ctx.mapped(*child).map(|mapped| (name.clone(), mapped)))
        .collect();
    NodeData::Component(ComponentData {
        entity: data.entity,
        ops,
        order,
        bones,
    })
}

fn component_free(node: &mut Node) {
    if let NodeData::Component(data) = &mut node.data {
        data.ops.clear();
        data.order.clear();
        data.bones.clear();
    }
}

/// A pose can only be evaluated on top of the owning object's transform.
fn pose_validate_links(graph: &mut Depsgraph, id: NodeId) -> Result<(), ValidateError> {
    let entity = graph
        .node(id)
        .as_component()
        .expect("component data")
        .entity();
    let transform = graph
        .get_node(NodeKind::Transform, Some(entity), None)
        .expect("transform component is creatable");
    ensure_relation(
        graph,
        transform,
        id,
        RelationKind::ComponentOrder,
        "Transform -> Pose Eval",
    );
    Ok(())
}

/* Bones ======================================================== */

fn bone_add_to_graph(
    graph: &mut Depsgraph,
    id: NodeId,
    entity: Option<EntityId>,
) -> Result<(), GraphError> {
    let entity = entity.ok_or(GraphError::MissingEntity(NodeKind::Bone))?;
    let pose = graph.get_node(NodeKind::EvalPose, Some(entity), None)?;
    let name = graph.node(id).name().to_owned();
    graph.node_mut(id).owner = Some(pose);
    match &mut graph.node_mut(pose).data {
        NodeData::Component(data) => {
            data.bones.insert(name, id);
        }
        _ => unreachable!("pose node carries component data"),
    }
    Ok(())
}

fn bone_remove_from_graph(graph: &mut Depsgraph, id: NodeId) {
    let (name, owner) = {
        let node = graph.node(id);
        (node.name().to_owned(), node.owner)
    };
    if let Some(owner) = owner {
        if let NodeData::Component(data) = &mut graph.node_mut(owner).data {
            data.bones.remove(&name);
        }
    }
}

/* Operations =================================================== */

fn operation_add_to_graph(
    graph: &mut Depsgraph,
    id: NodeId,
    entity: Option<EntityId>,
) -> Result<(), GraphError> {
    let (kind, name, subdata) = {
        let node = graph.node(id);
        let subdata = match node.as_operation().map(OperationData::ctx) {
            Some(OpContext::Bone { bone, .. }) if node.kind() == NodeKind::OpBone => {
                Some(bone.clone())
            }
            _ => None,
        };
        (node.kind(), node.name().to_owned(), subdata)
    };
    let entity = entity.ok_or(GraphError::MissingEntity(kind))?;
    let container = graph.op_container(entity, subdata.as_deref(), kind)?;
    graph.node_mut(id).owner = Some(container);
    match &mut graph.node_mut(container).data {
        NodeData::Component(data) => {
            data.ops.insert(name, id);
            data.order.push(id);
        }
        _ => unreachable!("operation container carries component data"),
    }
    Ok(())
}

fn operation_remove_from_graph(graph: &mut Depsgraph, id: NodeId) {
    let (name, owner) = {
        let node = graph.node(id);
        (node.name().to_owned(), node.owner)
    };
    if let Some(owner) = owner {
        if let NodeData::Component(data) = &mut graph.node_mut(owner).data {
            data.ops.remove(&name);
            data.order.retain(|op| *op != id);
        }
    }
}

fn operation_copy(_ctx: &mut CopyContext, src: &Node) -> NodeData {
    let data = src.as_operation().expect("operation data");
    NodeData::Operation(OperationData {
        class: data.class,
        eval_name: data.eval_name.clone(),
        func: data.func,
        ctx: data.ctx.clone(),
    })
}

/* Shared ======================================================= */

fn noop_free(_node: &mut Node) {}

fn ensure_relation(
    graph: &mut Depsgraph,
    from: NodeId,
    to: NodeId,
    kind: RelationKind,
    description: &str,
) {
    let exists = graph
        .node(from)
        .outlinks()
        .iter()
        .any(|rel| {
            let rel = graph.relation(*rel);
            rel.to() == to && rel.kind() == kind
        });
    if !exists {
        graph.add_relation(from, to, kind, description);
    }
}
