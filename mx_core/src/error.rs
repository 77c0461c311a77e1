//! Error types for graph construction and evaluation.

use thiserror::Error;

use crate::node::NodeId;

pub type Result<T> = std::result::Result<T, MxError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MxError {
    #[error("shape mismatch in {op}: {detail}")]
    ShapeMismatch { op: &'static str, detail: String },

    #[error("invalid evaluation order at node {node}: {violation}")]
    InvalidEvaluationOrder {
        node: NodeId,
        violation: OrderViolation,
    },

    #[error("buffer for node {node} has length {expected}, got {got} values")]
    BufferLength {
        node: NodeId,
        expected: usize,
        got: usize,
    },

    #[error("node {0} is not a symbol")]
    NotASymbol(NodeId),

    #[error("node {0} is not part of the evaluation plan")]
    NotInPlan(NodeId),

    #[error("handle belongs to a different graph")]
    ForeignHandle,

    #[error("unknown node {0}")]
    UnknownNode(NodeId),
}

/// The ways an `evaluate` call can violate the evaluation contract.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderViolation {
    #[error("forward order {forward} and adjoint order {adjoint} requested in one call")]
    MixedModes { forward: u32, adjoint: u32 },

    #[error("sensitivity order {0} is not supported")]
    UnsupportedOrder(u32),

    #[error("dependency {dependency} has no fresh order-{order} buffer")]
    StaleDependency { dependency: NodeId, order: usize },

    #[error("own order-{order} buffer is not fresh")]
    StaleBuffer { order: usize },
}

impl MxError {
    pub fn shape_mismatch(op: &'static str, detail: impl Into<String>) -> Self {
        MxError::ShapeMismatch {
            op,
            detail: detail.into(),
        }
    }

    pub fn order(node: NodeId, violation: OrderViolation) -> Self {
        MxError::InvalidEvaluationOrder { node, violation }
    }
}
