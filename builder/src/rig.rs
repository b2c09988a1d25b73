//! Rig build rules: bone components, bone transforms, constraint stacks
//! and the pose-level IK solvers.

use fnv::FnvHashMap;

use sceneflow_core::{EntityId, OpContext};
use sceneflow_graph::{
    node::{NodeKind, OpClass},
    relation::RelationKind,
};

use crate::{
    funcs, ops,
    source::{BoneInfo, ConstraintKind, SceneSource},
    BuildError, DepsgraphBuilder,
};

/// Chain walks stop here no matter what the constraint says.
const MAX_CHAIN_LENGTH: usize = 255;

impl<'a, S: SceneSource + ?Sized> DepsgraphBuilder<'a, S> {
    /// Build the pose of an armature object.
    ///
    /// Bones first, so every bone component and its operations exist; IK
    /// and spline-IK solvers afterwards, since their chains reference
    /// arbitrary bones.
    pub(crate) fn build_rig(
        &mut self,
        object: EntityId,
        bones: &[BoneInfo],
    ) -> Result<(), BuildError> {
        log::trace!("Build rig for {:?} ({} bones)", object, bones.len());
        self.graph.get_node(NodeKind::EvalPose, Some(object), None)?;

        for bone in bones {
            let component = self
                .graph
                .get_node(NodeKind::Bone, Some(object), Some(&bone.name))?;
            let op = self.graph.add_operation(
                object,
                Some(&bone.name),
                NodeKind::OpBone,
                OpClass::Exec,
                funcs::BONE,
                ops::BONE_TRANSFORMS,
                OpContext::Bone {
                    entity: object,
                    bone: bone.name.clone(),
                },
            )?;

            if let Some(parent) = &bone.parent {
                let parent = self
                    .graph
                    .get_node(NodeKind::Bone, Some(object), Some(parent))?;
                self.graph.add_relation(
                    parent,
                    component,
                    RelationKind::Transform,
                    "[Parent Bone -> Child Bone]",
                );
            }

            if !bone.constraints.is_empty() {
                self.build_constraints(object, Some(&bone.name), &bone.constraints, op)?;
            }
        }

        for bone in bones {
            for constraint in &bone.constraints {
                match &constraint.kind {
                    ConstraintKind::Kinematic { root_bone } => {
                        self.build_ik_solver(object, bones, bone, *root_bone)?;
                    }
                    ConstraintKind::SplineIk { curve, chain_len } => {
                        self.build_splineik_solver(object, bones, bone, *curve, *chain_len)?;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Walk the parent chain of `owner`, collecting the bones the solver
    /// depends on and the chain's root. `limit` of zero walks to the rig
    /// root.
    fn walk_chain(
        bones: &[BoneInfo],
        owner: &BoneInfo,
        limit: usize,
    ) -> (Vec<String>, String) {
        let by_name: FnvHashMap<&str, &BoneInfo> =
            bones.iter().map(|bone| (bone.name.as_str(), bone)).collect();

        let mut chain = Vec::new();
        let mut root = owner.name.clone();
        let mut segments = 0;
        let mut parent = owner.parent.clone();
        while let Some(name) = parent {
            chain.push(name.clone());
            root = name.clone();
            segments += 1;
            if segments == limit || segments > MAX_CHAIN_LENGTH {
                break;
            }
            parent = by_name.get(name.as_str()).and_then(|bone| bone.parent.clone());
        }
        (chain, root)
    }

    fn build_ik_solver(
        &mut self,
        object: EntityId,
        bones: &[BoneInfo],
        owner: &BoneInfo,
        root_bone: usize,
    ) -> Result<(), BuildError> {
        let (chain, root) = Self::walk_chain(bones, owner, root_bone);

        // The solver knows its chain through the stored root bone.
        let name = format!("IK Solver ({})", owner.name);
        let solver = self.graph.add_operation(
            object,
            None,
            NodeKind::OpPose,
            OpClass::Sim,
            funcs::IK_SOLVER,
            &name,
            OpContext::Bone {
                entity: object,
                bone: root,
            },
        )?;

        // The owner is part of the chain too.
        let owner_component = self
            .graph
            .get_node(NodeKind::Bone, Some(object), Some(&owner.name))?;
        self.graph.add_relation(
            owner_component,
            solver,
            RelationKind::Transform,
            "IK Solver Owner",
        );

        // The solver can only run once the plain results of every chain
        // bone are known.
        for bone in &chain {
            let component = self
                .graph
                .get_node(NodeKind::Bone, Some(object), Some(bone))?;
            self.graph.add_relation(
                component,
                solver,
                RelationKind::Transform,
                "IK Solver Update",
            );
        }
        Ok(())
    }

    fn build_splineik_solver(
        &mut self,
        object: EntityId,
        bones: &[BoneInfo],
        owner: &BoneInfo,
        curve: EntityId,
        chain_len: usize,
    ) -> Result<(), BuildError> {
        let (chain, root) = Self::walk_chain(bones, owner, chain_len);

        let name = format!("Spline IK Solver ({})", owner.name);
        let solver = self.graph.add_operation(
            object,
            None,
            NodeKind::OpPose,
            OpClass::Sim,
            funcs::SPLINE_IK_SOLVER,
            &name,
            OpContext::Bone {
                entity: object,
                bone: root,
            },
        )?;

        let owner_component = self
            .graph
            .get_node(NodeKind::Bone, Some(object), Some(&owner.name))?;
        self.graph.add_relation(
            owner_component,
            solver,
            RelationKind::Transform,
            "Spline IK Solver Owner",
        );

        let path = self
            .graph
            .get_node(NodeKind::Geometry, Some(curve), Some("Path"))?;
        self.graph.add_relation(
            path,
            solver,
            RelationKind::GeometryEval,
            "[Curve.Path -> Spline IK]",
        );

        for bone in &chain {
            let component = self
                .graph
                .get_node(NodeKind::Bone, Some(object), Some(bone))?;
            self.graph.add_relation(
                component,
                solver,
                RelationKind::Transform,
                "Spline IK Solver Update",
            );
        }
        Ok(())
    }
}
