//! Scene walk: materializes the dependency graph from scene data.
//!
//! The walk is rooted at a scene and side-effect-only on the graph; scene
//! data is read through the typed accessors in [`source`]. Nodes are never
//! inserted by hand: everything goes through the graph's get-or-create and
//! `add_operation` entry points, so the hierarchy and indices stay
//! consistent by construction.

#![warn(
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

pub mod source;

mod anim;
mod geometry;
mod object;
mod physics;
mod rig;
mod shading;

use failure::Fail;
use fnv::FnvHashSet;

use sceneflow_core::EntityId;
use sceneflow_graph::{
    node::NodeKind, relation::RelationKind, validate_links, Depsgraph, GraphError, NodeId,
    ValidateError,
};

use crate::source::{AnimationInfo, EntityInfo, ObjectDataKind, SceneSource};

/// Operation node names the builder emits. Shared with hosts that need to
/// look individual steps up.
pub mod ops {
    /// Object base transform.
    pub const LOCAL_TRANSFORM: &str = "Local Transform";
    /// Object parent evaluation.
    pub const PARENT: &str = "Parent";
    /// Constraint stack of an object or bone.
    pub const CONSTRAINT_STACK: &str = "Constraint Stack";
    /// Entity parameter evaluation.
    pub const PARAMETERS_EVAL: &str = "Parameters Eval";
    /// Animation playback.
    pub const ANIMATION: &str = "Animation";
    /// Geometry evaluation of an object.
    pub const GEOMETRY_EVAL: &str = "Geometry Eval";
    /// Curve path evaluation on the curve datablock.
    pub const PATH: &str = "Path";
    /// Base matrix + parenting of one bone.
    pub const BONE_TRANSFORMS: &str = "Bone Transforms";
    /// Proxy synchronisation.
    pub const PROXY_SYNC: &str = "Proxy Sync";
    /// Rigid-body world rebuild.
    pub const RIGIDBODY_REBUILD: &str = "World Rebuild";
    /// Rigid-body world simulation step.
    pub const RIGIDBODY_SIM: &str = "World Do Simulation";
    /// Flush of simulated transforms onto one object.
    pub const RIGIDBODY_SYNC: &str = "RigidBodyObject Sync";
}

/// Callback names the builder resolves against the process registry. The
/// host registers its evaluator functions under these names.
pub mod funcs {
    /// Object base transform.
    pub const LOCAL_TRANSFORM: &str = "object_eval_local_transform";
    /// Object parent evaluation.
    pub const PARENT: &str = "object_eval_parent";
    /// Constraint stack evaluation (objects and bones).
    pub const CONSTRAINTS: &str = "constraints_evaluate";
    /// Entity parameter evaluation.
    pub const PARAMETERS: &str = "parameters_eval";
    /// Animation playback.
    pub const ANIMATION: &str = "animsys_eval_animation";
    /// Driver evaluation.
    pub const DRIVER: &str = "animsys_eval_driver";
    /// Mesh geometry.
    pub const MESH_GEOMETRY: &str = "mesh_eval_geometry";
    /// Curve/surface geometry.
    pub const CURVE_GEOMETRY: &str = "curve_eval_geometry";
    /// Curve path.
    pub const CURVE_PATH: &str = "curve_eval_path";
    /// Metaball geometry (motherball only).
    pub const METABALL_GEOMETRY: &str = "mball_eval_geometry";
    /// Lattice geometry.
    pub const LATTICE_GEOMETRY: &str = "lattice_eval_geometry";
    /// One bone's transforms.
    pub const BONE: &str = "pose_eval_bone";
    /// IK solver.
    pub const IK_SOLVER: &str = "pose_iktree_evaluate";
    /// Spline IK solver.
    pub const SPLINE_IK_SOLVER: &str = "pose_splineik_evaluate";
    /// Proxy synchronisation.
    pub const PROXY: &str = "object_eval_proxy";
    /// One particle system step.
    pub const PARTICLE_SYSTEM: &str = "particle_system_eval";
    /// Rigid-body world rebuild.
    pub const RIGIDBODY_REBUILD: &str = "rigidbody_world_rebuild";
    /// Rigid-body world simulation step.
    pub const RIGIDBODY_SIM: &str = "rigidbody_world_simulate";
    /// Rigid-body transform flush onto one object.
    pub const RIGIDBODY_SYNC: &str = "rigidbody_object_sync";
}

/// Build failure.
#[derive(Debug, Fail)]
pub enum BuildError {
    /// The scene handed to the builder is unknown to the scene source.
    #[fail(display = "scene entity {:?} is unknown to the scene source", _0)]
    UnknownScene(EntityId),

    /// Storage-level failure while building.
    #[fail(display = "graph error during build: {}", _0)]
    Graph(#[fail(cause)] GraphError),

    /// The built graph did not validate.
    #[fail(display = "validation failed after build: {}", _0)]
    Validate(#[fail(cause)] ValidateError),
}

impl From<GraphError> for BuildError {
    fn from(error: GraphError) -> Self {
        BuildError::Graph(error)
    }
}

impl From<ValidateError> for BuildError {
    fn from(error: ValidateError) -> Self {
        BuildError::Validate(error)
    }
}

/// Discard the graph's contents and rebuild it from `scene`.
pub fn scene_relations_rebuild<S>(
    graph: &mut Depsgraph,
    source: &S,
    scene: EntityId,
) -> Result<(), BuildError>
where
    S: SceneSource + ?Sized,
{
    graph.clear();
    graph_build_from_scene(graph, source, scene)
}

/// Build the graph from `scene` if it has not been built yet.
pub fn scene_relations_update<S>(
    graph: &mut Depsgraph,
    source: &S,
    scene: EntityId,
) -> Result<(), BuildError>
where
    S: SceneSource + ?Sized,
{
    if graph.is_built() {
        return Ok(());
    }
    graph_build_from_scene(graph, source, scene)
}

/// Build the dependency graph for `scene` into `graph`, then validate and
/// prime the evaluation order.
pub fn graph_build_from_scene<S>(
    graph: &mut Depsgraph,
    source: &S,
    scene: EntityId,
) -> Result<(), BuildError>
where
    S: SceneSource + ?Sized,
{
    // Root and time source go in first; every animated thing fans out from
    // the time source.
    let root = graph.get_node(NodeKind::Root, None, None)?;
    graph.get_node(NodeKind::TimeSource, None, None)?;

    let mut builder = DepsgraphBuilder::new(graph, source);
    let scene_node = builder.build_scene(scene)?;
    graph.add_relation(
        root,
        scene_node,
        RelationKind::RootToActive,
        "Root to Active Scene",
    );

    validate_links(graph)?;
    Ok(())
}

/// One build pass over a scene.
///
/// Owns the per-build recursion guards; shared assets (materials, textures,
/// worlds, node trees) stay immutable during the build.
#[derive(Debug)]
pub struct DepsgraphBuilder<'a, S: SceneSource + ?Sized> {
    pub(crate) graph: &'a mut Depsgraph,
    pub(crate) source: &'a S,
    /// Shared-asset cycle guard; set and unset around each descent.
    pub(crate) visited: FnvHashSet<EntityId>,
    /// Objects already walked this build.
    pub(crate) built_objects: FnvHashSet<EntityId>,
    /// Active camera of the scene currently being walked.
    pub(crate) camera: Option<EntityId>,
}

impl<'a, S: SceneSource + ?Sized> DepsgraphBuilder<'a, S> {
    /// Start a build pass writing into `graph`.
    pub fn new(graph: &'a mut Depsgraph, source: &'a S) -> Self {
        DepsgraphBuilder {
            graph,
            source,
            visited: FnvHashSet::default(),
            built_objects: FnvHashSet::default(),
            camera: None,
        }
    }

    /// Build a scene and everything reachable from it. Called recursively
    /// for background sets.
    pub fn build_scene(&mut self, scene: EntityId) -> Result<NodeId, BuildError> {
        let info = match self.source.entity(scene) {
            Some(EntityInfo::Scene(info)) => info,
            _ => return Err(BuildError::UnknownScene(scene)),
        };
        log::debug!("Build scene {:?} ({} objects)", scene, info.objects.len());
        let scene_node = self.graph.get_node(NodeKind::IdRef, Some(scene), None)?;

        if let Some(set) = info.set {
            self.build_scene(set)?;
        }

        let prev_camera = std::mem::replace(&mut self.camera, info.camera);
        for object in &info.objects {
            self.build_object(*object)?;
        }

        if let Some(world) = info.rigidbody.as_ref() {
            self.build_rigidbody(scene, world)?;
        }
        if let Some(animation) = info.animation.as_ref() {
            self.build_animdata(scene, animation)?;
        }
        if let Some(world) = info.world {
            self.build_world(world)?;
        }
        if let Some(tree) = info.compositor {
            let owner = self.graph.get_node(NodeKind::Parameters, Some(scene), None)?;
            self.build_node_tree(owner, tree)?;
        }
        self.camera = prev_camera;

        Ok(scene_node)
    }

    /// Build the nested graph for an instanced group, once, and wrap it in
    /// a subgraph node. Later instances reuse the same node.
    pub(crate) fn build_group_subgraph(
        &mut self,
        group: EntityId,
    ) -> Result<Option<NodeId>, BuildError> {
        if let Some(existing) = self.graph.id_ref(group) {
            return Ok(Some(existing));
        }
        let info = match self.source.entity(group) {
            Some(EntityInfo::Group(info)) => info,
            _ => {
                log::warn!("Instanced group {:?} is unknown to the scene source", group);
                return Ok(None);
            }
        };
        log::debug!("Build subgraph for group {:?}", group);

        let mut inner = Depsgraph::new();
        inner.get_node(NodeKind::Root, None, None)?;
        inner.get_node(NodeKind::TimeSource, None, None)?;
        {
            let mut builder = DepsgraphBuilder::new(&mut inner, self.source);
            for object in &info.objects {
                builder.build_object(*object)?;
            }
        }
        let node = self.graph.add_subgraph(group, inner, "Group")?;
        Ok(Some(node))
    }

    /// Animation block of any entity kind, if it has one.
    pub(crate) fn build_entity_animation(&mut self, id: EntityId) -> Result<(), BuildError> {
        let animation: Option<AnimationInfo> = self.source.entity(id).and_then(|info| {
            match info {
                EntityInfo::Scene(info) => info.animation,
                EntityInfo::Object(info) => info.animation,
                EntityInfo::ObjectData(info) => info.animation,
                EntityInfo::Material(info) => info.animation,
                EntityInfo::Texture(info) => info.animation,
                EntityInfo::World(info) => info.animation,
                EntityInfo::NodeTree(info) => info.animation,
                EntityInfo::Group(_) => None,
            }
        });
        if let Some(animation) = animation {
            self.build_animdata(id, &animation)?;
        }
        Ok(())
    }

    /// Whether `object`'s datablock is an armature.
    pub(crate) fn object_is_armature(&self, object: EntityId) -> bool {
        match self.object_data_kind(object) {
            Some(ObjectDataKind::Armature { .. }) => true,
            _ => false,
        }
    }

    /// Whether `object`'s datablock carries deformable geometry.
    pub(crate) fn object_has_geometry(&self, object: EntityId) -> bool {
        match self.object_data_kind(object) {
            Some(ObjectDataKind::Mesh)
            | Some(ObjectDataKind::Curve { .. })
            | Some(ObjectDataKind::Surface)
            | Some(ObjectDataKind::Metaball { .. })
            | Some(ObjectDataKind::Lattice) => true,
            _ => false,
        }
    }

    pub(crate) fn object_data_kind(&self, object: EntityId) -> Option<ObjectDataKind> {
        let data = match self.source.entity(object) {
            Some(EntityInfo::Object(info)) => info.data?,
            _ => return None,
        };
        match self.source.entity(data) {
            Some(EntityInfo::ObjectData(info)) => Some(info.kind),
            _ => None,
        }
    }

    /// Time source of the graph being built.
    pub(crate) fn time_source(&mut self) -> Result<NodeId, GraphError> {
        self.graph.get_node(NodeKind::TimeSource, None, None)
    }
}
