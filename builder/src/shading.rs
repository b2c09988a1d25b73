//! Shading build rules: materials, textures, worlds and node trees.
//!
//! Shared shading assets can form reference cycles
//! (material -> node tree -> group -> material); every descent is bracketed
//! by the builder's visited set, so a build terminates and assets stay
//! unmarked afterwards.

use sceneflow_core::EntityId;
use sceneflow_graph::{node::NodeKind, NodeId};

use crate::{source::{EntityInfo, SceneSource}, BuildError, DepsgraphBuilder};

impl<'a, S: SceneSource + ?Sized> DepsgraphBuilder<'a, S> {
    pub(crate) fn build_material(
        &mut self,
        owner: NodeId,
        material: EntityId,
    ) -> Result<(), BuildError> {
        if !self.visited.insert(material) {
            return Ok(());
        }
        if let Some(EntityInfo::Material(info)) = self.source.entity(material) {
            log::trace!("Build material {:?}", material);
            if let Some(animation) = info.animation.as_ref() {
                self.build_animdata(material, animation)?;
            }
            for texture in &info.textures {
                self.build_texture(owner, *texture)?;
            }
            if let Some(tree) = info.node_tree {
                self.build_node_tree(owner, tree)?;
            }
        } else {
            log::warn!("Material {:?} is unknown to the scene source", material);
        }
        self.visited.remove(&material);
        Ok(())
    }

    pub(crate) fn build_texture(
        &mut self,
        owner: NodeId,
        texture: EntityId,
    ) -> Result<(), BuildError> {
        if !self.visited.insert(texture) {
            return Ok(());
        }
        if let Some(EntityInfo::Texture(info)) = self.source.entity(texture) {
            if let Some(animation) = info.animation.as_ref() {
                self.build_animdata(texture, animation)?;
            }
            if let Some(tree) = info.node_tree {
                self.build_node_tree(owner, tree)?;
            }
        } else {
            log::warn!("Texture {:?} is unknown to the scene source", texture);
        }
        self.visited.remove(&texture);
        Ok(())
    }

    pub(crate) fn build_world(&mut self, world: EntityId) -> Result<(), BuildError> {
        if !self.visited.insert(world) {
            return Ok(());
        }
        if let Some(EntityInfo::World(info)) = self.source.entity(world) {
            log::trace!("Build world {:?}", world);
            let owner = self.graph.get_node(NodeKind::Parameters, Some(world), None)?;
            if let Some(animation) = info.animation.as_ref() {
                self.build_animdata(world, animation)?;
            }
            for texture in &info.textures {
                self.build_texture(owner, *texture)?;
            }
            if let Some(tree) = info.node_tree {
                self.build_node_tree(owner, tree)?;
            }
        } else {
            log::warn!("World {:?} is unknown to the scene source", world);
        }
        self.visited.remove(&world);
        Ok(())
    }

    /// Node trees recurse through group nodes into materials, textures and
    /// nested trees.
    pub(crate) fn build_node_tree(
        &mut self,
        owner: NodeId,
        tree: EntityId,
    ) -> Result<(), BuildError> {
        if !self.visited.insert(tree) {
            return Ok(());
        }
        if let Some(EntityInfo::NodeTree(info)) = self.source.entity(tree) {
            if let Some(animation) = info.animation.as_ref() {
                self.build_animdata(tree, animation)?;
            }
            for material in &info.materials {
                self.build_material(owner, *material)?;
            }
            for texture in &info.textures {
                self.build_texture(owner, *texture)?;
            }
            for group in &info.groups {
                self.build_node_tree(owner, *group)?;
            }
        } else {
            log::warn!("Node tree {:?} is unknown to the scene source", tree);
        }
        self.visited.remove(&tree);
        Ok(())
    }
}
