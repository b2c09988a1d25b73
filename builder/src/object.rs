//! Object-level build rules: components, transform stack, parenting,
//! constraint stacks, proxies and group instancing.

use sceneflow_core::{EntityId, OpContext};
use sceneflow_graph::{
    node::{NodeKind, OpClass},
    relation::RelationKind,
    NodeId,
};

use crate::{
    funcs, ops,
    source::{ConstraintInfo, ConstraintKind, EntityInfo, ObjectDataKind, ParentInfo, ParentKind,
             SceneSource},
    BuildError, DepsgraphBuilder,
};

impl<'a, S: SceneSource + ?Sized> DepsgraphBuilder<'a, S> {
    /// Build one object: id-ref, parameters, transform stack, data,
    /// particles, animation, proxy and instanced group.
    pub(crate) fn build_object(&mut self, object: EntityId) -> Result<(), BuildError> {
        if !self.built_objects.insert(object) {
            return Ok(());
        }
        let info = match self.source.entity(object) {
            Some(EntityInfo::Object(info)) => info,
            _ => {
                log::warn!("Object {:?} is unknown to the scene source", object);
                return Ok(());
            }
        };
        log::trace!("Build object {:?}", object);

        // Standard components every object carries.
        self.graph
            .get_node(NodeKind::Parameters, Some(object), None)?;
        self.graph.add_operation(
            object,
            None,
            NodeKind::OpParameter,
            OpClass::Exec,
            funcs::PARAMETERS,
            ops::PARAMETERS_EVAL,
            OpContext::Entity(object),
        )?;
        self.graph
            .get_node(NodeKind::Transform, Some(object), None)?;
        let local = self.graph.add_operation(
            object,
            None,
            NodeKind::OpTransform,
            OpClass::Init,
            funcs::LOCAL_TRANSFORM,
            ops::LOCAL_TRANSFORM,
            OpContext::Entity(object),
        )?;

        let mut last = local;
        if let Some(parent) = info.parent.as_ref() {
            last = self.build_object_parent(object, parent, local)?;
        }
        if !info.constraints.is_empty() {
            self.build_constraints(object, None, &info.constraints, last)?;
        }

        if let Some(data) = info.data {
            if let Some(EntityInfo::ObjectData(data_info)) = self.source.entity(data) {
                if let Some(animation) = data_info.animation.as_ref() {
                    self.build_animdata(data, animation)?;
                }
                match &data_info.kind {
                    ObjectDataKind::Mesh
                    | ObjectDataKind::Curve { .. }
                    | ObjectDataKind::Surface
                    | ObjectDataKind::Metaball { .. }
                    | ObjectDataKind::Lattice => {
                        self.build_obdata_geometry(object, data, &data_info)?;
                        for material in &info.materials {
                            let owner =
                                self.graph.get_node(NodeKind::Geometry, Some(object), None)?;
                            self.build_material(owner, *material)?;
                        }
                    }
                    ObjectDataKind::Armature { bones } => {
                        self.build_rig(object, bones)?;
                    }
                    ObjectDataKind::Camera { dof_object } => {
                        self.build_camera(data, *dof_object)?;
                    }
                    ObjectDataKind::Lamp {
                        textures,
                        node_tree,
                    } => {
                        self.build_lamp(data, textures, *node_tree)?;
                    }
                }
            }
        }

        if !info.particles.is_empty() {
            self.build_particles(object, &info.particles)?;
        }
        if let Some(animation) = info.animation.as_ref() {
            self.build_animdata(object, animation)?;
        }
        if let Some(proxy) = info.proxy {
            self.build_proxy(object, proxy)?;
        }
        if let Some(group) = info.dup_group {
            if let Some(subgraph) = self.build_group_subgraph(group)? {
                let transform = self.graph.get_node(NodeKind::Transform, Some(object), None)?;
                self.graph
                    .add_relation(transform, subgraph, RelationKind::Standard, "Dupligroup");
            }
        }
        Ok(())
    }

    /// Parent evaluation step. The incoming dependency lands on the parent
    /// operation itself; which parent node feeds it depends on the
    /// parenting mode.
    fn build_object_parent(
        &mut self,
        object: EntityId,
        parent: &ParentInfo,
        local: NodeId,
    ) -> Result<NodeId, BuildError> {
        let op = self.graph.add_operation(
            object,
            None,
            NodeKind::OpTransform,
            OpClass::Exec,
            funcs::PARENT,
            ops::PARENT,
            OpContext::Entity(object),
        )?;
        self.graph
            .add_relation(local, op, RelationKind::Operation, "Local -> Parent");

        let target = parent.parent;
        match &parent.kind {
            ParentKind::Armature => {
                let node = self.graph.get_node(NodeKind::Transform, Some(target), None)?;
                self.graph
                    .add_relation(node, op, RelationKind::Standard, "Armature Deform Parent");
            }
            ParentKind::Vertex => {
                let node = self.graph.get_node(NodeKind::Geometry, Some(target), None)?;
                self.graph
                    .add_relation(node, op, RelationKind::GeometryEval, "Vertex Parent");
            }
            ParentKind::Bone(bone) => {
                let node = self
                    .graph
                    .get_node(NodeKind::Bone, Some(target), Some(bone))?;
                self.graph
                    .add_relation(node, op, RelationKind::Transform, "Bone Parent");
            }
            ParentKind::Lattice => {
                let node = self.graph.get_node(NodeKind::Geometry, Some(target), None)?;
                self.graph
                    .add_relation(node, op, RelationKind::Standard, "Lattice Deform Parent");
            }
            ParentKind::CurveFollowPath => {
                let node = self
                    .graph
                    .get_node(NodeKind::Geometry, Some(target), Some("Curve Path"))?;
                self.graph
                    .add_relation(node, op, RelationKind::Transform, "Curve Follow Parent");
            }
            ParentKind::Object => {
                let node = self.graph.get_node(NodeKind::Transform, Some(target), None)?;
                self.graph
                    .add_relation(node, op, RelationKind::Transform, "Parent");
            }
        }
        Ok(op)
    }

    /// Constraint stack of an object (`bone` = `None`) or a bone. One
    /// monolithic operation per stack; every constraint contributes its
    /// target dependencies to it.
    pub(crate) fn build_constraints(
        &mut self,
        entity: EntityId,
        bone: Option<&str>,
        constraints: &[ConstraintInfo],
        previous: NodeId,
    ) -> Result<NodeId, BuildError> {
        let (kind, ctx) = match bone {
            Some(bone) => (
                NodeKind::OpBone,
                OpContext::Bone {
                    entity,
                    bone: bone.to_owned(),
                },
            ),
            None => (NodeKind::OpTransform, OpContext::Entity(entity)),
        };
        let stack = self.graph.add_operation(
            entity,
            bone,
            kind,
            OpClass::Exec,
            funcs::CONSTRAINTS,
            ops::CONSTRAINT_STACK,
            ctx,
        )?;
        self.graph.add_relation(
            previous,
            stack,
            RelationKind::Operation,
            "Transform -> Constraint Stack",
        );

        for constraint in constraints {
            self.build_constraint_targets(stack, constraint)?;
        }
        Ok(stack)
    }

    fn build_constraint_targets(
        &mut self,
        stack: NodeId,
        constraint: &ConstraintInfo,
    ) -> Result<(), BuildError> {
        match &constraint.kind {
            // IK is resolved at pose level, not in the stack loop.
            ConstraintKind::Kinematic { .. } | ConstraintKind::SplineIk { .. } => {}

            ConstraintKind::FollowTrack {
                depth_object,
                uses_camera,
            } => {
                if let Some(depth) = depth_object {
                    let node = self.graph.get_node(NodeKind::Transform, Some(*depth), None)?;
                    self.graph
                        .add_relation(node, stack, RelationKind::Transform, &constraint.name);
                }
                if *uses_camera {
                    self.camera_dependency(stack, &constraint.name)?;
                }
            }
            ConstraintKind::CameraSolver | ConstraintKind::ObjectSolver => {
                self.camera_dependency(stack, &constraint.name)?;
            }

            ConstraintKind::FollowPath | ConstraintKind::ClampTo => {
                for target in &constraint.targets {
                    let node = self.graph.get_node(
                        NodeKind::Geometry,
                        Some(target.entity),
                        Some("Path"),
                    )?;
                    self.graph.add_relation(
                        node,
                        stack,
                        RelationKind::GeometryEval,
                        &constraint.name,
                    );
                }
            }

            ConstraintKind::Standard => {
                for target in &constraint.targets {
                    match &target.subtarget {
                        Some(subtarget) if self.object_is_armature(target.entity) => {
                            let node = self.graph.get_node(
                                NodeKind::Bone,
                                Some(target.entity),
                                Some(subtarget),
                            )?;
                            self.graph.add_relation(
                                node,
                                stack,
                                RelationKind::Transform,
                                &constraint.name,
                            );
                        }
                        Some(_) if self.object_has_geometry(target.entity) => {
                            // Vertex-group target reads deformed geometry.
                            let node = self.graph.get_node(
                                NodeKind::Geometry,
                                Some(target.entity),
                                None,
                            )?;
                            self.graph.add_relation(
                                node,
                                stack,
                                RelationKind::GeometryEval,
                                &constraint.name,
                            );
                        }
                        _ => {
                            let node = self.graph.get_node(
                                NodeKind::Transform,
                                Some(target.entity),
                                None,
                            )?;
                            self.graph.add_relation(
                                node,
                                stack,
                                RelationKind::Transform,
                                &constraint.name,
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn camera_dependency(&mut self, stack: NodeId, name: &str) -> Result<(), BuildError> {
        match self.camera {
            Some(camera) => {
                let node = self.graph.get_node(NodeKind::Transform, Some(camera), None)?;
                self.graph
                    .add_relation(node, stack, RelationKind::Transform, name);
            }
            None => log::warn!("Constraint `{}` needs a camera but the scene has none", name),
        }
        Ok(())
    }

    fn build_proxy(&mut self, object: EntityId, proxy: EntityId) -> Result<(), BuildError> {
        self.build_object(proxy)?;
        self.graph.get_node(NodeKind::Proxy, Some(object), None)?;
        let op = self.graph.add_operation(
            object,
            None,
            NodeKind::OpProxy,
            OpClass::Exec,
            funcs::PROXY,
            ops::PROXY_SYNC,
            OpContext::Entity(object),
        )?;
        let source = self.graph.get_node(NodeKind::Transform, Some(proxy), None)?;
        self.graph
            .add_relation(source, op, RelationKind::Transform, "Proxy Source");
        Ok(())
    }
}
