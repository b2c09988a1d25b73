//! Read-only scene accessors.
//!
//! The builder never touches scene data directly; the host hands it typed
//! descriptions through [`SceneSource`]. Everything here is a plain
//! description struct so hosts can assemble them from whatever their scene
//! model looks like.

use sceneflow_core::EntityId;
use sceneflow_graph::PropertyResolver;

/// Read-only access to the host's scene database.
///
/// The builder resolves driver and tagging paths through the same source,
/// hence the [`PropertyResolver`] supertrait.
pub trait SceneSource: PropertyResolver {
    /// Describe one entity. `None` when the id is unknown.
    fn entity(&self, id: EntityId) -> Option<EntityInfo>;
}

/// Description of one entity, by kind.
#[derive(Clone, Debug)]
pub enum EntityInfo {
    /// A scene.
    Scene(SceneInfo),
    /// An object placed in a scene.
    Object(ObjectInfo),
    /// An object's datablock (mesh, curve, armature, camera, lamp, ...).
    ObjectData(ObjectDataInfo),
    /// A material.
    Material(MaterialInfo),
    /// A texture.
    Texture(TextureInfo),
    /// A world.
    World(WorldInfo),
    /// A shading/compositing node tree.
    NodeTree(NodeTreeInfo),
    /// An instancing group.
    Group(GroupInfo),
}

/// Scene contents.
#[derive(Clone, Debug, Default)]
pub struct SceneInfo {
    /// Background set scene, built recursively.
    pub set: Option<EntityId>,
    /// Objects based in the scene.
    pub objects: Vec<EntityId>,
    /// Active camera, used by track-to style constraints.
    pub camera: Option<EntityId>,
    /// World shading.
    pub world: Option<EntityId>,
    /// Compositing node tree.
    pub compositor: Option<EntityId>,
    /// Rigid-body world, if the scene simulates one.
    pub rigidbody: Option<RigidBodyWorldInfo>,
    /// Scene-level animation and drivers.
    pub animation: Option<AnimationInfo>,
}

/// Object contents.
#[derive(Clone, Debug, Default)]
pub struct ObjectInfo {
    /// Datablock the object instances.
    pub data: Option<EntityId>,
    /// Parent link, if parented.
    pub parent: Option<ParentInfo>,
    /// Object this one is a proxy for.
    pub proxy: Option<EntityId>,
    /// Constraint stack.
    pub constraints: Vec<ConstraintInfo>,
    /// Particle systems on the object.
    pub particles: Vec<ParticleSystemInfo>,
    /// Materials in the object's slots.
    pub materials: Vec<EntityId>,
    /// Group instanced by the object.
    pub dup_group: Option<EntityId>,
    /// Object-level animation and drivers.
    pub animation: Option<AnimationInfo>,
}

/// How an object follows its parent.
#[derive(Clone, Debug)]
pub struct ParentInfo {
    /// The parent object.
    pub parent: EntityId,
    /// Parenting mode.
    pub kind: ParentKind,
}

/// Parenting mode; decides which parent component the child follows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParentKind {
    /// Plain object parenting.
    Object,
    /// Armature deform.
    Armature,
    /// One or three vertices of the parent's geometry.
    Vertex,
    /// A named bone of the parent armature.
    Bone(String),
    /// Lattice deform.
    Lattice,
    /// Follow-path along the parent curve.
    CurveFollowPath,
}

/// Object datablock contents.
#[derive(Clone, Debug)]
pub struct ObjectDataInfo {
    /// Kind-specific payload.
    pub kind: ObjectDataKind,
    /// Shape-key datablock attached to the geometry.
    pub shape_key: Option<EntityId>,
    /// Datablock-level animation and drivers.
    pub animation: Option<AnimationInfo>,
}

/// Object datablock kinds the builder distinguishes.
#[derive(Clone, Debug)]
pub enum ObjectDataKind {
    /// Polygon mesh.
    Mesh,
    /// Curve (and text) geometry.
    Curve {
        /// Bevel object shaping the curve.
        bevel: Option<EntityId>,
        /// Taper object shaping the curve.
        taper: Option<EntityId>,
        /// Curve the text flows along (font curves only).
        text_on_curve: Option<EntityId>,
    },
    /// Nurbs surface.
    Surface,
    /// Metaball. `motherball` names the dispatching object when this
    /// object is not itself the motherball.
    Metaball {
        /// Dispatching motherball object, `None` when self dispatches.
        motherball: Option<EntityId>,
    },
    /// Lattice.
    Lattice,
    /// Armature; bones carry the rig description.
    Armature {
        /// Rig bones in rest order.
        bones: Vec<BoneInfo>,
    },
    /// Camera.
    Camera {
        /// Depth-of-field target object.
        dof_object: Option<EntityId>,
    },
    /// Lamp.
    Lamp {
        /// Texture stack of the lamp.
        textures: Vec<EntityId>,
        /// Lamp shading node tree.
        node_tree: Option<EntityId>,
    },
}

/// One bone of a rig.
#[derive(Clone, Debug, Default)]
pub struct BoneInfo {
    /// Bone name, unique within the rig.
    pub name: String,
    /// Parent bone name, if not a root bone.
    pub parent: Option<String>,
    /// Bone constraint stack.
    pub constraints: Vec<ConstraintInfo>,
}

/// One constraint in a stack.
#[derive(Clone, Debug)]
pub struct ConstraintInfo {
    /// Constraint name, used in relation diagnostics.
    pub name: String,
    /// Kind-specific payload.
    pub kind: ConstraintKind,
    /// Targets the constraint reads.
    pub targets: Vec<ConstraintTargetInfo>,
}

/// Constraint kinds the builder treats specially.
#[derive(Clone, Debug)]
pub enum ConstraintKind {
    /// Anything that just reads its targets.
    Standard,
    /// Follows the target curve's path geometry.
    FollowPath,
    /// Clamps onto the target curve's path geometry.
    ClampTo,
    /// Inverse kinematics; handled at pose level.
    Kinematic {
        /// Chain length up from the owning bone. Zero walks to the root.
        root_bone: usize,
    },
    /// Spline IK along a curve; handled at pose level.
    SplineIk {
        /// The spline the chain follows.
        curve: EntityId,
        /// Chain length up from the owning bone. Zero walks to the root.
        chain_len: usize,
    },
    /// Follows a motion-tracking track; depends on the scene camera.
    FollowTrack {
        /// Optional depth object.
        depth_object: Option<EntityId>,
        /// Whether the track is tied to the active camera.
        uses_camera: bool,
    },
    /// Camera-solver constraint; depends on the scene camera.
    CameraSolver,
    /// Object-solver constraint; depends on the scene camera.
    ObjectSolver,
}

/// One target slot of a constraint.
#[derive(Clone, Debug)]
pub struct ConstraintTargetInfo {
    /// Target object.
    pub entity: EntityId,
    /// Bone name (armature targets) or vertex-group name (geometry
    /// targets).
    pub subtarget: Option<String>,
}

/// One particle system on an object.
#[derive(Clone, Debug, Default)]
pub struct ParticleSystemInfo {
    /// System name, unique on the object.
    pub name: String,
    /// Particle settings datablock (carries the animation).
    pub settings: Option<EntityId>,
    /// Disabled systems keep their node but gain no dependencies.
    pub enabled: bool,
    /// Objects whose geometry acts as an effector field.
    pub effectors: Vec<EntityId>,
    /// Objects referenced by boid rules.
    pub boid_objects: Vec<EntityId>,
}

/// Scene-level rigid-body world.
#[derive(Clone, Debug, Default)]
pub struct RigidBodyWorldInfo {
    /// Simulated objects.
    pub objects: Vec<EntityId>,
    /// Rigid-body constraints between simulated objects.
    pub constraints: Vec<RigidBodyConstraintInfo>,
}

/// One rigid-body constraint.
#[derive(Clone, Debug)]
pub struct RigidBodyConstraintInfo {
    /// Object holding the constraint.
    pub object: EntityId,
    /// First constrained object.
    pub first: EntityId,
    /// Second constrained object.
    pub second: EntityId,
}

/// Animation and drivers attached to an entity.
#[derive(Clone, Debug, Default)]
pub struct AnimationInfo {
    /// Whether the entity has playback animation (action or NLA).
    pub animated: bool,
    /// Drivers on the entity's properties.
    pub drivers: Vec<DriverInfo>,
}

/// One driver.
#[derive(Clone, Debug)]
pub struct DriverInfo {
    /// Path of the driven property, rooted at the owning entity.
    pub path: String,
    /// Scripted-expression drivers serialize under the script lock.
    pub uses_python: bool,
    /// Variable targets the driver reads.
    pub targets: Vec<DriverTargetInfo>,
}

/// One driver variable target.
#[derive(Clone, Debug)]
pub struct DriverTargetInfo {
    /// Entity the variable reads from.
    pub entity: EntityId,
    /// Directly named bone, when the variable addresses a pose channel.
    pub bone: Option<String>,
    /// Property path on the entity otherwise.
    pub path: Option<String>,
}

/// Material contents.
#[derive(Clone, Debug, Default)]
pub struct MaterialInfo {
    /// Texture stack.
    pub textures: Vec<EntityId>,
    /// Shading node tree.
    pub node_tree: Option<EntityId>,
    /// Material animation and drivers.
    pub animation: Option<AnimationInfo>,
}

/// Texture contents.
#[derive(Clone, Debug, Default)]
pub struct TextureInfo {
    /// Texture node tree.
    pub node_tree: Option<EntityId>,
    /// Texture animation and drivers.
    pub animation: Option<AnimationInfo>,
}

/// World contents.
#[derive(Clone, Debug, Default)]
pub struct WorldInfo {
    /// Texture stack.
    pub textures: Vec<EntityId>,
    /// World node tree.
    pub node_tree: Option<EntityId>,
    /// World animation and drivers.
    pub animation: Option<AnimationInfo>,
}

/// Node tree contents. Trees reference shared assets and may recurse
/// through group nodes; the builder guards the recursion.
#[derive(Clone, Debug, Default)]
pub struct NodeTreeInfo {
    /// Materials referenced by tree nodes.
    pub materials: Vec<EntityId>,
    /// Textures referenced by tree nodes.
    pub textures: Vec<EntityId>,
    /// Nested (group) trees.
    pub groups: Vec<EntityId>,
    /// Tree animation and drivers.
    pub animation: Option<AnimationInfo>,
}

/// Instancing group contents.
#[derive(Clone, Debug, Default)]
pub struct GroupInfo {
    /// Objects the group instances.
    pub objects: Vec<EntityId>,
}
