//! The node arena: construction, introspection and buffer access.
//!
//! Nodes are appended in construction order and never removed, so every
//! dependency has a smaller arena index than the node using it and the graph
//! cannot contain a cycle.

use std::fmt;

use log::debug;

use crate::error::{MxError, OrderViolation, Result};
use crate::node::{next_graph_id, BinaryOp, GraphId, Mode, Mx, Node, NodeId, Op, UnaryOp};
use crate::shape::Shape;

/// Tolerance used by conditional nodes built without an explicit one.
pub const DEFAULT_IF_TOLERANCE: f64 = 1e-6;

/// Graph-wide settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphOptions {
    /// Guard threshold for `if_else_zero` / `if_else`.
    pub if_tolerance: f64,
    /// When unset, stale-buffer violations are logged instead of returned.
    pub strict: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        GraphOptions {
            if_tolerance: DEFAULT_IF_TOLERANCE,
            strict: true,
        }
    }
}

impl GraphOptions {
    pub fn with_if_tolerance(mut self, tol: f64) -> Self {
        self.if_tolerance = tol;
        self
    }

    pub fn permissive(mut self) -> Self {
        self.strict = false;
        self
    }
}

/// An arena of expression nodes together with their value buffers.
#[derive(Debug)]
pub struct Graph {
    pub(crate) id: GraphId,
    pub(crate) nodes: Vec<Node>,
    pub(crate) pass: u64,
    pub(crate) options: GraphOptions,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph::with_options(GraphOptions::default())
    }

    pub fn with_options(options: GraphOptions) -> Self {
        Graph {
            id: next_graph_id(),
            nodes: Vec::new(),
            pass: 0,
            options,
        }
    }

    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The current pass number.
    pub fn pass(&self) -> u64 {
        self.pass
    }

    /// Start a new pass. Every computed buffer becomes stale.
    pub fn begin_pass(&mut self) -> u64 {
        self.pass += 1;
        self.pass
    }

    // === Handle validation ===

    pub(crate) fn index(&self, mx: Mx) -> Result<usize> {
        if mx.graph != self.id {
            return Err(MxError::ForeignHandle);
        }
        if mx.id.0 >= self.nodes.len() {
            return Err(MxError::UnknownNode(mx.id));
        }
        Ok(mx.id.0)
    }

    pub(crate) fn node(&self, mx: Mx) -> Result<&Node> {
        let i = self.index(mx)?;
        Ok(&self.nodes[i])
    }

    pub(crate) fn node_mut(&mut self, mx: Mx) -> Result<&mut Node> {
        let i = self.index(mx)?;
        Ok(&mut self.nodes[i])
    }

    fn push(&mut self, op: Op, deps: Vec<Mx>, shape: Shape) -> Mx {
        let id = NodeId(self.nodes.len());
        debug!("{} = {} of {} deps ({})", id, op.kind(), deps.len(), shape);
        self.nodes.push(Node::new(op, deps, shape));
        Mx { graph: self.id, id }
    }

    fn shapes_of(&self, args: &[Mx]) -> Result<Vec<Shape>> {
        args.iter().map(|&a| self.shape(a)).collect()
    }

    // === Leaves ===

    /// Create a named input. Its value starts as zeros.
    ///
    /// Each call creates a distinct node, even if the name is reused.
    pub fn symbol(&mut self, name: &str, shape: impl Into<Shape>) -> Mx {
        self.push(
            Op::Symbol {
                name: name.to_string(),
            },
            vec![],
            shape.into(),
        )
    }

    pub fn scalar_symbol(&mut self, name: &str) -> Mx {
        self.symbol(name, Shape::scalar())
    }

    /// Create a constant from column-major data.
    pub fn constant(&mut self, data: Vec<f64>, shape: impl Into<Shape>) -> Result<Mx> {
        let shape = shape.into();
        if data.len() != shape.numel() {
            return Err(MxError::shape_mismatch(
                "constant",
                format!("{} values for shape {}", data.len(), shape),
            ));
        }
        Ok(self.push(Op::Constant { data }, vec![], shape))
    }

    pub fn scalar(&mut self, value: f64) -> Mx {
        self.push(Op::Constant { data: vec![value] }, vec![], Shape::scalar())
    }

    // === Concatenation ===

    /// Join operands left to right. All operands must have the same row count.
    pub fn horzcat(&mut self, args: &[Mx]) -> Result<Mx> {
        let shapes = self.shapes_of(args)?;
        let first = shapes
            .first()
            .ok_or_else(|| MxError::shape_mismatch("horzcat", "no operands"))?;
        let mut cols = 0;
        for (k, s) in shapes.iter().enumerate() {
            if s.rows() != first.rows() {
                return Err(MxError::shape_mismatch(
                    "horzcat",
                    format!("operand {} is {}, expected {} rows", k, s, first.rows()),
                ));
            }
            cols += s.cols();
        }
        Ok(self.push(Op::Horzcat, args.to_vec(), Shape::new(first.rows(), cols)))
    }

    /// Stack operands top to bottom. All operands must have the same column count.
    pub fn vertcat(&mut self, args: &[Mx]) -> Result<Mx> {
        let shapes = self.shapes_of(args)?;
        let first = shapes
            .first()
            .ok_or_else(|| MxError::shape_mismatch("vertcat", "no operands"))?;
        let mut rows = 0;
        for (k, s) in shapes.iter().enumerate() {
            if s.cols() != first.cols() {
                return Err(MxError::shape_mismatch(
                    "vertcat",
                    format!("operand {} is {}, expected {} columns", k, s, first.cols()),
                ));
            }
            rows += s.rows();
        }
        Ok(self.push(Op::Vertcat, args.to_vec(), Shape::new(rows, first.cols())))
    }

    // === Conditionals ===

    /// `if_true` when `guard` exceeds the graph's tolerance, zero otherwise.
    pub fn if_else_zero(&mut self, guard: Mx, if_true: Mx) -> Result<Mx> {
        let tol = self.options.if_tolerance;
        self.if_else_zero_with_tol(guard, if_true, tol)
    }

    pub fn if_else_zero_with_tol(&mut self, guard: Mx, if_true: Mx, tol: f64) -> Result<Mx> {
        self.check_guard("if_else_zero", guard)?;
        let shape = self.shape(if_true)?;
        Ok(self.push(
            Op::IfElse {
                tol,
                has_false: false,
            },
            vec![guard, if_true],
            shape,
        ))
    }

    /// `if_true` when `guard` exceeds the graph's tolerance, `if_false` otherwise.
    pub fn if_else(&mut self, guard: Mx, if_true: Mx, if_false: Mx) -> Result<Mx> {
        let tol = self.options.if_tolerance;
        self.if_else_with_tol(guard, if_true, if_false, tol)
    }

    pub fn if_else_with_tol(&mut self, guard: Mx, if_true: Mx, if_false: Mx, tol: f64) -> Result<Mx> {
        self.check_guard("if_else", guard)?;
        let (st, sf) = (self.shape(if_true)?, self.shape(if_false)?);
        if st != sf {
            return Err(MxError::shape_mismatch(
                "if_else",
                format!("branches are {} and {}", st, sf),
            ));
        }
        Ok(self.push(
            Op::IfElse {
                tol,
                has_false: true,
            },
            vec![guard, if_true, if_false],
            st,
        ))
    }

    fn check_guard(&self, op: &'static str, guard: Mx) -> Result<()> {
        let s = self.shape(guard)?;
        if !s.is_scalar() {
            return Err(MxError::shape_mismatch(op, format!("guard must be 1x1, got {}", s)));
        }
        Ok(())
    }

    // === Elementwise ===

    fn unary(&mut self, op: UnaryOp, x: Mx) -> Result<Mx> {
        let shape = self.shape(x)?;
        Ok(self.push(Op::Unary(op), vec![x], shape))
    }

    pub fn neg(&mut self, x: Mx) -> Result<Mx> {
        self.unary(UnaryOp::Neg, x)
    }

    pub fn sqrt(&mut self, x: Mx) -> Result<Mx> {
        self.unary(UnaryOp::Sqrt, x)
    }

    pub fn exp(&mut self, x: Mx) -> Result<Mx> {
        self.unary(UnaryOp::Exp, x)
    }

    pub fn log(&mut self, x: Mx) -> Result<Mx> {
        self.unary(UnaryOp::Log, x)
    }

    pub fn sin(&mut self, x: Mx) -> Result<Mx> {
        self.unary(UnaryOp::Sin, x)
    }

    pub fn cos(&mut self, x: Mx) -> Result<Mx> {
        self.unary(UnaryOp::Cos, x)
    }

    /// Elementwise binary node. Shapes must match exactly; there is no broadcasting.
    fn binary(&mut self, op: BinaryOp, a: Mx, b: Mx) -> Result<Mx> {
        let (sa, sb) = (self.shape(a)?, self.shape(b)?);
        if sa != sb {
            return Err(MxError::shape_mismatch(
                op.name(),
                format!("operands are {} and {}", sa, sb),
            ));
        }
        Ok(self.push(Op::Binary(op), vec![a, b], sa))
    }

    pub fn add(&mut self, a: Mx, b: Mx) -> Result<Mx> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: Mx, b: Mx) -> Result<Mx> {
        self.binary(BinaryOp::Sub, a, b)
    }

    /// Elementwise (Hadamard) product.
    pub fn mul(&mut self, a: Mx, b: Mx) -> Result<Mx> {
        self.binary(BinaryOp::Mul, a, b)
    }

    pub fn div(&mut self, a: Mx, b: Mx) -> Result<Mx> {
        self.binary(BinaryOp::Div, a, b)
    }

    // === Algebra ===

    pub fn transpose(&mut self, x: Mx) -> Result<Mx> {
        let shape = self.shape(x)?.transposed();
        Ok(self.push(Op::Transpose, vec![x], shape))
    }

    /// Matrix product `a * b`.
    pub fn matmul(&mut self, a: Mx, b: Mx) -> Result<Mx> {
        let (sa, sb) = (self.shape(a)?, self.shape(b)?);
        if sa.cols() != sb.rows() {
            return Err(MxError::shape_mismatch(
                "mtimes",
                format!("inner dimensions of {} and {} differ", sa, sb),
            ));
        }
        Ok(self.push(Op::MatMul, vec![a, b], Shape::new(sa.rows(), sb.cols())))
    }

    /// Sum of all entries, as a 1x1 node.
    pub fn sum(&mut self, x: Mx) -> Result<Mx> {
        self.index(x)?;
        Ok(self.push(Op::Sum, vec![x], Shape::scalar()))
    }

    /// Structural copy: a new node with the same rule and the same dependency
    /// handles, but its own never-evaluated buffers.
    pub fn duplicate(&mut self, mx: Mx) -> Result<Mx> {
        let node = self.node(mx)?.duplicate();
        let id = NodeId(self.nodes.len());
        debug!("{} = duplicate of {}", id, mx.id);
        self.nodes.push(node);
        Ok(Mx { graph: self.id, id })
    }

    // === Introspection ===

    pub fn shape(&self, mx: Mx) -> Result<Shape> {
        Ok(self.node(mx)?.shape)
    }

    pub fn deps(&self, mx: Mx) -> Result<&[Mx]> {
        Ok(&self.node(mx)?.deps)
    }

    pub fn dep_count(&self, mx: Mx) -> Result<usize> {
        Ok(self.node(mx)?.deps.len())
    }

    pub fn op(&self, mx: Mx) -> Result<&Op> {
        Ok(&self.node(mx)?.op)
    }

    pub fn is_symbol(&self, mx: Mx) -> Result<bool> {
        Ok(matches!(self.node(mx)?.op, Op::Symbol { .. }))
    }

    /// Symbol name, or `None` for every other node.
    pub fn name(&self, mx: Mx) -> Result<Option<&str>> {
        match &self.node(mx)?.op {
            Op::Symbol { name } => Ok(Some(name)),
            _ => Ok(None),
        }
    }

    /// Textual form of an expression, for diagnostics.
    pub fn render(&self, mx: Mx) -> Result<Rendered<'_>> {
        self.index(mx)?;
        Ok(Rendered { graph: self, mx })
    }

    // === Buffers ===

    /// Raw view of a buffer, whether or not it is fresh.
    pub fn value_at(&self, mx: Mx, order: usize) -> Result<&[f64]> {
        let node = self.node(mx)?;
        check_order(mx, order)?;
        Ok(&node.values[order])
    }

    /// Raw mutable view of a buffer (`rows * cols` entries). Writing through it
    /// does not change the buffer's freshness.
    pub fn value_at_mut(&mut self, mx: Mx, order: usize) -> Result<&mut [f64]> {
        check_order(mx, order)?;
        let node = self.node_mut(mx)?;
        Ok(&mut node.values[order])
    }

    /// The primal value computed in the current pass.
    pub fn value(&self, mx: Mx) -> Result<&[f64]> {
        self.fresh(mx, 0, Mode::Primal)
    }

    /// The forward tangent computed in the current pass.
    pub fn tangent(&self, mx: Mx) -> Result<&[f64]> {
        self.fresh(mx, 1, Mode::Forward)
    }

    /// The adjoint accumulated in the current pass.
    pub fn adjoint(&self, mx: Mx) -> Result<&[f64]> {
        self.fresh(mx, 1, Mode::Adjoint)
    }

    fn fresh(&self, mx: Mx, order: usize, mode: Mode) -> Result<&[f64]> {
        let node = self.node(mx)?;
        if !node.is_fresh(order, self.pass, mode) {
            return Err(MxError::order(mx.id, OrderViolation::StaleBuffer { order }));
        }
        Ok(&node.values[order])
    }

    /// Set a symbol's value. Starts a new pass, since every value computed
    /// from the old input is now outdated.
    pub fn set_value(&mut self, symbol: Mx, data: &[f64]) -> Result<()> {
        self.write_symbol(symbol, 0, data)?;
        self.begin_pass();
        Ok(())
    }

    /// Set a symbol's forward tangent for the current pass.
    pub fn seed_forward(&mut self, symbol: Mx, data: &[f64]) -> Result<()> {
        self.write_symbol(symbol, 1, data)?;
        let pass = self.pass;
        self.node_mut(symbol)?.stamp(1, pass, Mode::Forward);
        Ok(())
    }

    /// Add `data` to a node's adjoint buffer for the current pass.
    ///
    /// A buffer that does not yet hold this pass's adjoint is zeroed first.
    pub fn seed_adjoint(&mut self, mx: Mx, data: &[f64]) -> Result<()> {
        let expected = self.shape(mx)?.numel();
        if data.len() != expected {
            return Err(MxError::BufferLength {
                node: mx.id,
                expected,
                got: data.len(),
            });
        }
        self.accumulate_adjoint(mx.id.0, data);
        Ok(())
    }

    fn write_symbol(&mut self, symbol: Mx, order: usize, data: &[f64]) -> Result<()> {
        let node = self.node_mut(symbol)?;
        if !matches!(node.op, Op::Symbol { .. }) {
            return Err(MxError::NotASymbol(symbol.id));
        }
        if data.len() != node.shape.numel() {
            return Err(MxError::BufferLength {
                node: symbol.id,
                expected: node.shape.numel(),
                got: data.len(),
            });
        }
        node.values[order].copy_from_slice(data);
        Ok(())
    }

    /// Zero a node's adjoint buffer for the current pass, discarding any
    /// contributions it already received.
    pub fn reset_adjoint(&mut self, mx: Mx) -> Result<()> {
        let pass = self.pass;
        let node = self.node_mut(mx)?;
        node.values[1].fill(0.0);
        node.stamp(1, pass, Mode::Adjoint);
        Ok(())
    }

    /// Reset the node's order-1 buffer to a zero adjoint of this pass, unless
    /// it already is one.
    pub(crate) fn claim_adjoint(&mut self, i: usize) {
        let pass = self.pass;
        let node = &mut self.nodes[i];
        if !node.is_fresh(1, pass, Mode::Adjoint) {
            node.values[1].fill(0.0);
            node.stamp(1, pass, Mode::Adjoint);
        }
    }

    pub(crate) fn accumulate_adjoint(&mut self, i: usize, contribution: &[f64]) {
        self.claim_adjoint(i);
        for (acc, v) in self.nodes[i].values[1].iter_mut().zip(contribution) {
            *acc += v;
        }
    }
}

fn check_order(mx: Mx, order: usize) -> Result<()> {
    if order > 1 {
        return Err(MxError::order(
            mx.id,
            OrderViolation::UnsupportedOrder(order as u32),
        ));
    }
    Ok(())
}

/// Display adapter returned by [`Graph::render`].
pub struct Rendered<'g> {
    graph: &'g Graph,
    mx: Mx,
}

/// Pending output of the renderer: a node still to expand, or literal text.
enum Piece {
    Node(usize),
    Text(&'static str),
    Owned(String),
}

impl Rendered<'_> {
    /// The pieces a node renders to, in output order.
    fn expand(&self, i: usize) -> Vec<Piece> {
        let node = &self.graph.nodes[i];
        let deps = || node.deps.iter().map(|d| d.id.0);
        let joined = |open: &'static str, sep: &'static str, close: &'static str| {
            let mut pieces = vec![Piece::Text(open)];
            for (k, d) in deps().enumerate() {
                if k > 0 {
                    pieces.push(Piece::Text(sep));
                }
                pieces.push(Piece::Node(d));
            }
            pieces.push(Piece::Text(close));
            pieces
        };
        match &node.op {
            Op::Symbol { name } => vec![Piece::Owned(name.clone())],
            Op::Constant { data } if node.shape.is_scalar() => {
                vec![Piece::Owned(data[0].to_string())]
            }
            Op::Constant { .. } => vec![Piece::Owned(format!("const({})", node.shape))],
            Op::Horzcat => joined("[", ", ", "]"),
            Op::Vertcat => joined("[", "; ", "]"),
            Op::Unary(UnaryOp::Neg) => vec![
                Piece::Text("(-"),
                Piece::Node(node.deps[0].id.0),
                Piece::Text(")"),
            ],
            Op::Binary(b) => vec![
                Piece::Text("("),
                Piece::Node(node.deps[0].id.0),
                Piece::Owned(b.symbol().to_string()),
                Piece::Node(node.deps[1].id.0),
                Piece::Text(")"),
            ],
            Op::Transpose => vec![Piece::Node(node.deps[0].id.0), Piece::Text("'")],
            op => {
                let mut pieces = joined("(", ", ", ")");
                pieces.insert(0, Piece::Text(op.kind()));
                pieces
            }
        }
    }
}

impl fmt::Display for Rendered<'_> {
    /// Expands nodes from an explicit stack, so graph depth never reaches the
    /// call stack.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Handles reachable from a validated root are always valid.
        let mut stack = vec![Piece::Node(self.mx.id.0)];
        while let Some(piece) = stack.pop() {
            match piece {
                Piece::Text(s) => f.write_str(s)?,
                Piece::Owned(s) => f.write_str(&s)?,
                Piece::Node(i) => stack.extend(self.expand(i).into_iter().rev()),
            }
        }
        Ok(())
    }
}
