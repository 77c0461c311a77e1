//! # mx_core - Matrix Expression Graphs with Forward and Adjoint Sensitivities
//!
//! This crate represents matrix-valued computations as directed acyclic
//! graphs of nodes and computes, through the same graph, the value of an
//! expression, its forward (tangent) sensitivities and its adjoint (reverse
//! mode) sensitivities.
//!
//! ## Quick Start
//!
//! ```
//! use mx_core::{EvalPlan, Graph, Shape};
//!
//! let mut g = Graph::new();
//! let a = g.symbol("a", Shape::new(2, 1));
//! let b = g.symbol("b", Shape::new(2, 2));
//! let h = g.horzcat(&[a, b]).unwrap();
//! assert_eq!(g.shape(h).unwrap(), Shape::new(2, 3));
//!
//! // Buffers are column-major: b = [[3, 5], [4, 6]].
//! g.set_value(a, &[1.0, 2.0]).unwrap();
//! g.set_value(b, &[3.0, 4.0, 5.0, 6.0]).unwrap();
//!
//! let plan = EvalPlan::new(&g, &[h]).unwrap();
//! let values = plan.primal(&mut g).unwrap();
//! assert_eq!(values[0], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//!
//! // Reverse mode: pull the cotangent [[1, 1, 1], [0, 0, 0]] back.
//! let sens = plan.adjoint(&mut g, &[(h, &[1.0, 0.0, 1.0, 0.0, 1.0, 0.0])]).unwrap();
//! assert_eq!(sens.wrt(&a).unwrap(), &[1.0, 0.0]);
//! assert_eq!(sens.wrt(&b).unwrap(), &[1.0, 0.0, 1.0, 0.0]);
//! ```
//!
//! ## Supported Nodes
//!
//! | Category | Builders |
//! |----------|----------|
//! | Leaves | [`Graph::symbol`], [`Graph::constant`], [`Graph::scalar`] |
//! | Concatenation | [`Graph::horzcat`], [`Graph::vertcat`] |
//! | Conditional | [`Graph::if_else_zero`], [`Graph::if_else`] |
//! | Elementwise | `neg`, `sqrt`, `exp`, `log`, `sin`, `cos`, `add`, `sub`, `mul`, `div` |
//! | Algebra | [`Graph::transpose`], [`Graph::matmul`], [`Graph::sum`] |
//!
//! ## Architecture
//!
//! - **[`Graph`]**: arena owning every node and its value buffers.
//! - **[`Mx`]**: copyable handle to a node. Passing the same handle to two
//!   builders shares the node.
//! - **[`Graph::evaluate`]**: the per-node evaluation contract.
//! - **[`EvalPlan`]**: runs primal, forward and adjoint sweeps in dependency
//!   order and returns [`Sensitivities`].
//! - **[`finite_diff_grad`]**, **[`finite_diff_jacobian`]** and
//!   **[`finite_diff_jvp`]**: numerical checks.
//!
//! Adjoint contributions are always added into dependency buffers, so a node
//! shared by several parents receives the sum of their contributions.

mod error;
mod eval;
mod finite_diff;
mod graph;
mod node;
mod ops;
mod shape;
mod sweep;

pub use error::{MxError, OrderViolation, Result};
pub use finite_diff::{dot, finite_diff_grad, finite_diff_jacobian, finite_diff_jvp, max_grad_error};
pub use graph::{Graph, GraphOptions, Rendered, DEFAULT_IF_TOLERANCE};
pub use node::{BinaryOp, Mode, Mx, NodeId, Op, UnaryOp};
pub use shape::Shape;
pub use sweep::{EvalPlan, Sensitivities};
