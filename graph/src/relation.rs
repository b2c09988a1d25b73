//! Typed dependency relations.

use crate::NodeId;

/// Kind of a dependency relation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum RelationKind {
    /// Plain dependency.
    Standard,
    /// Fans out from a time source; traversed only by time-change flushes.
    Time,
    /// Datablock feeds an instance of it.
    Datablock,
    /// Data-level dependency.
    Data,
    /// Intra-component operation ordering.
    Operation,
    /// Inter-component ordering within one entity.
    ComponentOrder,
    /// Evaluated geometry feeds the target.
    GeometryEval,
    /// Transform result feeds the target.
    Transform,
    /// Driver writes the driven property.
    Driver,
    /// Driver variable target feeds the driver.
    DriverTarget,
    /// Root to the active scene.
    RootToActive,
}

/// Directed edge `from -> to` with a kind tag and a diagnostic description.
#[derive(Debug)]
pub struct Relation {
    pub(crate) from: NodeId,
    pub(crate) to: NodeId,
    pub(crate) kind: RelationKind,
    pub(crate) description: String,
}

impl Relation {
    /// Source node.
    pub fn from(&self) -> NodeId {
        self.from
    }

    /// Target node.
    pub fn to(&self) -> NodeId {
        self.to
    }

    /// Relation kind.
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// Human-readable description. Diagnostics only.
    pub fn description(&self) -> &str {
        &self.description
    }
}
