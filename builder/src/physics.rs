//! Physics build rules: particle systems and the rigid-body world.

use sceneflow_core::{EntityId, OpContext};
use sceneflow_graph::{
    node::{NodeKind, OpClass},
    relation::RelationKind,
};

use crate::{
    funcs, ops,
    source::{ParticleSystemInfo, RigidBodyWorldInfo, SceneSource},
    BuildError, DepsgraphBuilder,
};

impl<'a, S: SceneSource + ?Sized> DepsgraphBuilder<'a, S> {
    /// Particle systems of one object: a component plus one blackbox
    /// evaluation step per system.
    pub(crate) fn build_particles(
        &mut self,
        object: EntityId,
        systems: &[ParticleSystemInfo],
    ) -> Result<(), BuildError> {
        self.graph
            .get_node(NodeKind::EvalParticles, Some(object), None)?;

        for system in systems {
            let op = self.graph.add_operation(
                object,
                None,
                NodeKind::OpParticle,
                OpClass::Exec,
                funcs::PARTICLE_SYSTEM,
                &system.name,
                OpContext::Entity(object),
            )?;
            let time = self.time_source()?;
            self.graph
                .add_relation(time, op, RelationKind::Time, "[TimeSrc -> PSys]");

            if let Some(settings) = system.settings {
                self.build_entity_animation(settings)?;
            }

            // Disabled systems keep their node; re-enabling triggers a
            // relations rebuild anyway.
            if !system.enabled {
                continue;
            }

            for effector in &system.effectors {
                let node = self
                    .graph
                    .get_node(NodeKind::Geometry, Some(*effector), None)?;
                self.graph
                    .add_relation(node, op, RelationKind::Standard, "Particle Field");
            }
            for boid in &system.boid_objects {
                let node = self.graph.get_node(NodeKind::Transform, Some(*boid), None)?;
                self.graph
                    .add_relation(node, op, RelationKind::Transform, "Boid Rule");
            }
        }
        Ok(())
    }

    /// Scene-level rigid-body world.
    ///
    /// Runs after the scene's objects are built, so the transform stacks
    /// the sync operations splice into already exist.
    pub(crate) fn build_rigidbody(
        &mut self,
        scene: EntityId,
        world: &RigidBodyWorldInfo,
    ) -> Result<(), BuildError> {
        log::trace!(
            "Build rigid-body world ({} objects, {} constraints)",
            world.objects.len(),
            world.constraints.len()
        );
        let rebuild = self.graph.add_operation(
            scene,
            None,
            NodeKind::OpRigidbody,
            OpClass::Rebuild,
            funcs::RIGIDBODY_REBUILD,
            ops::RIGIDBODY_REBUILD,
            OpContext::Entity(scene),
        )?;
        let sim = self.graph.add_operation(
            scene,
            None,
            NodeKind::OpRigidbody,
            OpClass::Sim,
            funcs::RIGIDBODY_SIM,
            ops::RIGIDBODY_SIM,
            OpContext::Entity(scene),
        )?;
        self.graph.add_relation(
            rebuild,
            sim,
            RelationKind::Operation,
            "Rigidbody [Rebuild -> SimStep]",
        );

        // The rebuild only fires on certain frames, but the link must be
        // there for when it does; the step itself runs every frame.
        let time = self.time_source()?;
        self.graph.add_relation(
            time,
            rebuild,
            RelationKind::Time,
            "TimeSrc -> Rigidbody Rebuild",
        );
        self.graph
            .add_relation(time, sim, RelationKind::Time, "TimeSrc -> Rigidbody Sim");

        for object in &world.objects {
            let base = self
                .graph
                .find_operation(*object, None, NodeKind::OpTransform, ops::PARENT)
                .or_else(|| {
                    self.graph.find_operation(
                        *object,
                        None,
                        NodeKind::OpTransform,
                        ops::LOCAL_TRANSFORM,
                    )
                });
            let base = match base {
                Some(base) => base,
                None => {
                    log::warn!(
                        "Rigid-body object {:?} has no transform stack; skipped",
                        object
                    );
                    continue;
                }
            };
            let constraints = self.graph.find_operation(
                *object,
                None,
                NodeKind::OpTransform,
                ops::CONSTRAINT_STACK,
            );

            let sync = self.graph.add_operation(
                *object,
                None,
                NodeKind::OpTransform,
                OpClass::Exec,
                funcs::RIGIDBODY_SYNC,
                ops::RIGIDBODY_SYNC,
                OpContext::Entity(*object),
            )?;

            // Sync follows the base transform and the simulation step, and
            // lands before the object's own constraints.
            self.graph.add_relation(
                base,
                sync,
                RelationKind::Operation,
                "Base Ob Transform -> RBO Sync",
            );
            self.graph.add_relation(
                sim,
                sync,
                RelationKind::ComponentOrder,
                "Rigidbody Sim Eval -> RBO Sync",
            );
            if let Some(constraints) = constraints {
                self.graph.add_relation(
                    sync,
                    constraints,
                    RelationKind::ComponentOrder,
                    "RBO Sync -> Ob Constraints",
                );
            }
            // The sim reads base transforms to know what it works on.
            self.graph.add_relation(
                base,
                sim,
                RelationKind::Operation,
                "Base Ob Transform -> Rigidbody Sim Eval",
            );
        }

        for constraint in &world.constraints {
            let first = self.graph.find_operation(
                constraint.first,
                None,
                NodeKind::OpTransform,
                ops::RIGIDBODY_SYNC,
            );
            let second = self.graph.find_operation(
                constraint.second,
                None,
                NodeKind::OpTransform,
                ops::RIGIDBODY_SYNC,
            );
            let (first, second) = match (first, second) {
                (Some(first), Some(second)) => (first, second),
                _ => {
                    log::warn!(
                        "Rigid-body constraint on {:?} references objects outside the sim group",
                        constraint.object
                    );
                    continue;
                }
            };
            let holder = self
                .graph
                .get_node(NodeKind::Transform, Some(constraint.object), None)?;

            self.graph.add_relation(
                holder,
                first,
                RelationKind::Transform,
                "RigidBodyConstraint -> RBC.Object_1",
            );
            self.graph.add_relation(
                holder,
                second,
                RelationKind::Transform,
                "RigidBodyConstraint -> RBC.Object_2",
            );
            self.graph.add_relation(
                holder,
                sim,
                RelationKind::Transform,
                "RigidBodyConstraint Transform -> RB Simulation",
            );
        }
        Ok(())
    }
}
