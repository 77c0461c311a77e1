//! Core data structures for the expression graph.
//!
//! Nodes live in an arena owned by [`crate::Graph`]. The user-facing handle
//! [`Mx`] is a copyable `(graph, index)` pair; copying a handle shares the
//! node, and two handles are equal exactly when they name the same node.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::shape::Shape;

/// Global counter for generating unique graph IDs.
static GRAPH_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_graph_id() -> GraphId {
    GraphId(GRAPH_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Identifies the arena a handle was issued by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u64);

/// Position of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An expression handle.
///
/// `Mx` is `Copy`; handing the same `Mx` to several builders makes the node a
/// shared dependency (the graph is a DAG, not a tree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mx {
    pub(crate) graph: GraphId,
    pub(crate) id: NodeId,
}

impl Mx {
    /// The arena position of the node this handle names.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

/// Elementwise functions of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
}

impl UnaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
        }
    }
}

/// Elementwise functions of two equally shaped arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }
}

/// The composition rule of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Named input (leaf). Its value is set from outside the graph.
    Symbol { name: String },
    /// Fixed dense data (leaf, zero sensitivity).
    Constant { data: Vec<f64> },
    /// Horizontal join of operands with equal row counts.
    Horzcat,
    /// Vertical join of operands with equal column counts.
    Vertcat,
    /// `deps[1]` if `deps[0] > tol`, else `deps[2]` (or zero when
    /// `has_false` is unset).
    IfElse { tol: f64, has_false: bool },
    Unary(UnaryOp),
    Binary(BinaryOp),
    Transpose,
    /// Matrix product `deps[0] * deps[1]`.
    MatMul,
    /// Sum of all entries of `deps[0]`.
    Sum,
}

impl Op {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Op::Symbol { .. } | Op::Constant { .. })
    }

    /// Short name of the variant, used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Op::Symbol { .. } => "symbol",
            Op::Constant { .. } => "constant",
            Op::Horzcat => "horzcat",
            Op::Vertcat => "vertcat",
            Op::IfElse {
                has_false: false, ..
            } => "if_else_zero",
            Op::IfElse { .. } => "if_else",
            Op::Unary(u) => u.name(),
            Op::Binary(b) => b.name(),
            Op::Transpose => "transpose",
            Op::MatMul => "mtimes",
            Op::Sum => "sum",
        }
    }
}

/// Which kind of work last wrote a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Primal,
    Forward,
    Adjoint,
}

/// Records the pass and mode that produced a buffer's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stamp {
    pub pass: u64,
    pub mode: Mode,
}

/// Internal node structure: rule, ordered dependencies, shape and the
/// per-order value buffers.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub op: Op,
    pub deps: Vec<Mx>,
    pub shape: Shape,
    /// `values[0]` is the primal value, `values[1]` the tangent or cotangent.
    pub values: [Vec<f64>; 2],
    pub stamps: [Option<Stamp>; 2],
}

impl Node {
    pub fn new(op: Op, deps: Vec<Mx>, shape: Shape) -> Self {
        let n = shape.numel();
        let primal = match &op {
            Op::Constant { data } => data.clone(),
            _ => vec![0.0; n],
        };
        Node {
            op,
            deps,
            shape,
            values: [primal, vec![0.0; n]],
            stamps: [None, None],
        }
    }

    /// Structural copy: same rule, same dependency handles, fresh buffers.
    pub fn duplicate(&self) -> Self {
        Node::new(self.op.clone(), self.deps.clone(), self.shape)
    }

    pub fn is_fresh(&self, order: usize, pass: u64, mode: Mode) -> bool {
        if order == 0 && self.op.is_leaf() {
            return true;
        }
        self.stamps[order] == Some(Stamp { pass, mode })
    }

    pub fn stamp(&mut self, order: usize, pass: u64, mode: Mode) {
        self.stamps[order] = Some(Stamp { pass, mode });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_ids_are_unique() {
        let a = next_graph_id();
        let b = next_graph_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_constant_node_holds_data() {
        let node = Node::new(
            Op::Constant {
                data: vec![1.0, 2.0],
            },
            vec![],
            Shape::column(2),
        );
        assert_eq!(node.values[0], vec![1.0, 2.0]);
        assert_eq!(node.values[1], vec![0.0, 0.0]);
        assert!(node.is_fresh(0, 7, Mode::Primal));
        assert!(!node.is_fresh(1, 7, Mode::Forward));
    }

    #[test]
    fn test_duplicate_has_fresh_buffers() {
        let mut node = Node::new(Op::Sum, vec![], Shape::scalar());
        node.values[0][0] = 5.0;
        node.stamp(0, 3, Mode::Primal);

        let copy = node.duplicate();
        assert_eq!(copy.op, Op::Sum);
        assert_eq!(copy.values[0], vec![0.0]);
        assert_eq!(copy.stamps, [None, None]);
    }

    #[test]
    fn test_stamp_matches_pass_and_mode() {
        let mut node = Node::new(Op::Horzcat, vec![], Shape::new(1, 2));
        node.stamp(1, 4, Mode::Forward);
        assert!(node.is_fresh(1, 4, Mode::Forward));
        assert!(!node.is_fresh(1, 4, Mode::Adjoint));
        assert!(!node.is_fresh(1, 5, Mode::Forward));
    }
}
