/// Unique entity handle.
///
/// Stable identifier for a scene entity (object, mesh, material, armature).
/// The graph treats it as an equality/hash key only; it carries no scene
/// semantics of its own.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityId(u64);

impl EntityId {
    /// Wrap a raw host identifier.
    pub fn new(raw: u64) -> Self {
        EntityId(raw)
    }

    /// Get the raw host identifier back.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Textual property path rooted at an entity.
///
/// Resolution to a concrete graph node is performed by the host's
/// property-path resolver; the graph only carries the reference around
/// (driver contexts, property tagging).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PropertyRef {
    /// Entity the path is rooted at.
    pub entity: EntityId,
    /// Path relative to the entity, in the host's own syntax.
    pub path: String,
}

impl PropertyRef {
    /// Create a new property reference.
    pub fn new(entity: EntityId, path: impl Into<String>) -> Self {
        PropertyRef {
            entity,
            path: path.into(),
        }
    }
}

/// Context carried by an operation node and handed to its callback.
///
/// This is the second argument of every evaluation callback; it tells the
/// host *which* piece of data the operation is about.
#[derive(Clone, Debug, PartialEq)]
pub enum OpContext {
    /// Operation has no data context.
    None,
    /// Operation evaluates the entity as a whole.
    Entity(EntityId),
    /// Operation evaluates a resolved property (drivers).
    Property(PropertyRef),
    /// Operation evaluates a single bone of an armature entity.
    Bone {
        /// Armature object the bone belongs to.
        entity: EntityId,
        /// Name of the bone.
        bone: String,
    },
}

impl OpContext {
    /// Entity this context refers to, if any.
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            OpContext::None => None,
            OpContext::Entity(id) => Some(*id),
            OpContext::Property(prop) => Some(prop.entity),
            OpContext::Bone { entity, .. } => Some(*entity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_roundtrip() {
        let id = EntityId::new(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(id, EntityId::new(42));
        assert_ne!(id, EntityId::new(43));
    }

    #[test]
    fn op_context_entity() {
        let id = EntityId::new(7);
        assert_eq!(OpContext::None.entity(), None);
        assert_eq!(OpContext::Entity(id).entity(), Some(id));
        assert_eq!(
            OpContext::Property(PropertyRef::new(id, "location")).entity(),
            Some(id)
        );
        assert_eq!(
            OpContext::Bone {
                entity: id,
                bone: "spine".to_owned()
            }
            .entity(),
            Some(id)
        );
    }
}
