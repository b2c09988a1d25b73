//! Geometry, camera and lamp datablock rules.

use sceneflow_core::{EntityId, OpContext};
use sceneflow_graph::{
    node::{NodeKind, OpClass},
    relation::RelationKind,
};

use crate::{
    funcs, ops,
    source::{ObjectDataInfo, ObjectDataKind, SceneSource},
    BuildError, DepsgraphBuilder,
};

impl<'a, S: SceneSource + ?Sized> DepsgraphBuilder<'a, S> {
    /// Geometry evaluation of an object and its datablock.
    ///
    /// The datablock's geometry component feeds the object's; evaluation
    /// itself dispatches on the object (shared datablocks evaluate once
    /// per instancing object).
    pub(crate) fn build_obdata_geometry(
        &mut self,
        object: EntityId,
        data: EntityId,
        info: &ObjectDataInfo,
    ) -> Result<(), BuildError> {
        let geometry = self.graph.get_node(NodeKind::Geometry, Some(object), None)?;
        let obdata_geometry = self.graph.get_node(NodeKind::Geometry, Some(data), None)?;
        self.graph.add_relation(
            obdata_geometry,
            geometry,
            RelationKind::Datablock,
            "Object Geometry Base Data",
        );

        match &info.kind {
            ObjectDataKind::Mesh => {
                self.add_geometry_eval(object, data, funcs::MESH_GEOMETRY)?;
            }

            ObjectDataKind::Metaball { motherball } => match motherball {
                Some(motherball) => {
                    // Non-motherball metas cannot be evaluated directly.
                    let mother = self
                        .graph
                        .get_node(NodeKind::Geometry, Some(*motherball), None)?;
                    self.graph.add_relation(
                        geometry,
                        mother,
                        RelationKind::GeometryEval,
                        "Metaball Motherball",
                    );
                }
                None => {
                    self.add_geometry_eval(object, data, funcs::METABALL_GEOMETRY)?;
                }
            },

            ObjectDataKind::Curve {
                bevel,
                taper,
                text_on_curve,
            } => {
                if let Some(bevel) = bevel {
                    let node = self.graph.get_node(NodeKind::Geometry, Some(*bevel), None)?;
                    self.graph
                        .add_relation(node, geometry, RelationKind::GeometryEval, "Curve Bevel");
                }
                if let Some(taper) = taper {
                    let node = self.graph.get_node(NodeKind::Geometry, Some(*taper), None)?;
                    self.graph
                        .add_relation(node, geometry, RelationKind::GeometryEval, "Curve Taper");
                }
                if let Some(text_on_curve) = text_on_curve {
                    let node = self
                        .graph
                        .get_node(NodeKind::Geometry, Some(*text_on_curve), None)?;
                    self.graph.add_relation(
                        node,
                        geometry,
                        RelationKind::GeometryEval,
                        "Text on Curve",
                    );
                }

                self.add_geometry_eval(object, data, funcs::CURVE_GEOMETRY)?;
                // The path lives on the datablock; constraints and
                // follow-path parents read it from there.
                self.graph.add_operation(
                    data,
                    None,
                    NodeKind::OpGeometry,
                    OpClass::Exec,
                    funcs::CURVE_PATH,
                    ops::PATH,
                    OpContext::Entity(data),
                )?;
            }

            ObjectDataKind::Surface => {
                self.add_geometry_eval(object, data, funcs::CURVE_GEOMETRY)?;
            }

            ObjectDataKind::Lattice => {
                self.add_geometry_eval(object, data, funcs::LATTICE_GEOMETRY)?;
            }

            ObjectDataKind::Armature { .. }
            | ObjectDataKind::Camera { .. }
            | ObjectDataKind::Lamp { .. } => {
                unreachable!("non-geometry data dispatched elsewhere")
            }
        }

        if let Some(key) = info.shape_key {
            let key_geometry = self.graph.get_node(NodeKind::Geometry, Some(key), None)?;
            self.graph.add_relation(
                key_geometry,
                obdata_geometry,
                RelationKind::GeometryEval,
                "Shapekeys",
            );
            self.build_entity_animation(key)?;
        }
        Ok(())
    }

    fn add_geometry_eval(
        &mut self,
        object: EntityId,
        data: EntityId,
        eval: &str,
    ) -> Result<(), BuildError> {
        self.graph.add_operation(
            object,
            None,
            NodeKind::OpGeometry,
            OpClass::Exec,
            eval,
            ops::GEOMETRY_EVAL,
            OpContext::Entity(data),
        )?;
        Ok(())
    }

    /// Camera datablock parameters and the depth-of-field target.
    pub(crate) fn build_camera(
        &mut self,
        data: EntityId,
        dof_object: Option<EntityId>,
    ) -> Result<(), BuildError> {
        let parameters = self.graph.get_node(NodeKind::Parameters, Some(data), None)?;
        if let Some(dof) = dof_object {
            let node = self.graph.get_node(NodeKind::Transform, Some(dof), None)?;
            self.graph
                .add_relation(node, parameters, RelationKind::Transform, "Camera DOF");
        }
        Ok(())
    }

    /// Lamp datablock parameters, textures and node tree.
    pub(crate) fn build_lamp(
        &mut self,
        lamp: EntityId,
        textures: &[EntityId],
        node_tree: Option<EntityId>,
    ) -> Result<(), BuildError> {
        // Lamps sit in shading graphs and may be reached through cycles.
        if !self.visited.insert(lamp) {
            return Ok(());
        }
        let parameters = self.graph.get_node(NodeKind::Parameters, Some(lamp), None)?;
        for texture in textures {
            self.build_texture(parameters, *texture)?;
        }
        if let Some(tree) = node_tree {
            self.build_node_tree(parameters, tree)?;
        }
        self.visited.remove(&lamp);
        Ok(())
    }
}
