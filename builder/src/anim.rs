//! Animation and driver build rules.

use sceneflow_core::{EntityId, OpContext, PropertyRef};
use sceneflow_graph::{
    node::{NodeFlags, NodeKind, OpClass},
    relation::RelationKind,
    NodeId,
};

use crate::{
    funcs, ops,
    source::{AnimationInfo, DriverInfo, SceneSource},
    BuildError, DepsgraphBuilder,
};

impl<'a, S: SceneSource + ?Sized> DepsgraphBuilder<'a, S> {
    /// Animation block of one entity: playback component plus drivers.
    pub(crate) fn build_animdata(
        &mut self,
        entity: EntityId,
        animation: &AnimationInfo,
    ) -> Result<(), BuildError> {
        let mut component = None;
        if animation.animated {
            let node = self.graph.get_node(NodeKind::Animation, Some(entity), None)?;
            self.graph.add_operation(
                entity,
                None,
                NodeKind::OpAnimation,
                OpClass::Exec,
                funcs::ANIMATION,
                ops::ANIMATION,
                OpContext::Entity(entity),
            )?;
            let time = self.time_source()?;
            self.graph.add_relation(
                time,
                node,
                RelationKind::Time,
                "[TimeSrc -> Animation]",
            );
            component = Some(node);
        }

        for driver in &animation.drivers {
            self.build_driver(entity, driver, component)?;
        }
        Ok(())
    }

    /// One driver: an operation writing the driven property, reading its
    /// variable targets.
    fn build_driver(
        &mut self,
        entity: EntityId,
        driver: &DriverInfo,
        animation: Option<NodeId>,
    ) -> Result<(), BuildError> {
        let name = format!("Driver @ {}", driver.path);
        let op = self.graph.add_operation(
            entity,
            None,
            NodeKind::OpDriver,
            OpClass::Exec,
            funcs::DRIVER,
            &name,
            OpContext::Property(PropertyRef::new(entity, driver.path.as_str())),
        )?;
        if driver.uses_python {
            self.graph.node_mut(op).insert_flags(NodeFlags::USES_PYTHON);
        }
        let time = self.time_source()?;
        self.graph
            .add_relation(time, op, RelationKind::Time, "[TimeSrc -> Driver]");

        // The driven data depends on the driver.
        match self.target_node(entity, &driver.path)? {
            Some(affected) => {
                self.graph
                    .add_relation(op, affected, RelationKind::Driver, "[Driver -> Data]");
            }
            None => {
                log::warn!(
                    "Dropping driver `{}`: property path does not resolve",
                    driver.path
                );
                self.graph.remove_node(op);
                return Ok(());
            }
        }

        // The driver depends on each of its variable targets.
        for target in &driver.targets {
            let node = match (&target.bone, &target.path) {
                (Some(bone), _) => Some(self.graph.get_node(
                    NodeKind::Bone,
                    Some(target.entity),
                    Some(bone),
                )?),
                (None, Some(path)) => self.target_node(target.entity, path)?,
                (None, None) => {
                    Some(self.graph.get_node(NodeKind::Parameters, Some(target.entity), None)?)
                }
            };
            match node {
                Some(node) => {
                    self.graph.add_relation(
                        node,
                        op,
                        RelationKind::DriverTarget,
                        "[Target -> Driver]",
                    );
                }
                None => log::warn!(
                    "Driver `{}` variable target on {:?} does not resolve",
                    driver.path,
                    target.entity
                ),
            }
        }

        // Playback lands its values before drivers read them.
        if let Some(animation) = animation {
            self.graph.add_relation(
                animation,
                op,
                RelationKind::Operation,
                "[AnimData Before Drivers]",
            );
        }
        Ok(())
    }

    /// Graph node standing for `(entity, path)`, materializing the target
    /// component when the path resolves to something not built yet.
    fn target_node(
        &mut self,
        entity: EntityId,
        path: &str,
    ) -> Result<Option<NodeId>, BuildError> {
        let target = match self.source.resolve(entity, path) {
            Some(target) => target,
            None => return Ok(None),
        };
        let node = match &target.bone {
            Some(bone) => self
                .graph
                .get_node(NodeKind::Bone, Some(target.entity), Some(bone))?,
            None => self
                .graph
                .get_node(target.component, Some(target.entity), None)?,
        };
        // A path naming one operation exactly attaches there when the
        // operation exists; the component stands in otherwise.
        if let Some(operation) = &target.operation {
            if let Some(data) = self.graph.node(node).as_component() {
                if let Some(op) = data.operation(operation) {
                    return Ok(Some(op));
                }
            }
        }
        Ok(Some(node))
    }
}
