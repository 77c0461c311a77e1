//! Composition rules for each node variant.
//!
//! Every rule comes as three kernels over flat column-major slices:
//! - `primal`: output value from the operand values,
//! - `forward`: output tangent (Jacobian-vector product) from operand values
//!   and tangents,
//! - `adjoint`: the transpose of `forward`, *adding* the contribution of an
//!   output cotangent into one zero-initialised buffer per operand.
//!
//! Kernels never check shapes; the graph validates them at construction.

mod concat;
mod elementwise;
mod if_else;
mod linalg;

use crate::node::{BinaryOp, Op, UnaryOp};
use crate::shape::Shape;

/// A view of one dependency during evaluation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Operand<'a> {
    pub shape: Shape,
    pub value: &'a [f64],
    /// Forward tangent. Empty outside the forward pass.
    pub tangent: &'a [f64],
}

/// The rule of a non-leaf node. Leaves have no kernel: their values come
/// from outside the graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Kernel {
    Horzcat,
    Vertcat,
    /// Selects `args[1]`, else `args[2]` when present, else zero.
    IfElse { tol: f64 },
    Unary(UnaryOp),
    Binary(BinaryOp),
    Transpose,
    MatMul,
    Sum,
}

impl Kernel {
    /// `None` for symbols and constants.
    pub fn of(op: &Op) -> Option<Kernel> {
        Some(match op {
            Op::Symbol { .. } | Op::Constant { .. } => return None,
            Op::Horzcat => Kernel::Horzcat,
            Op::Vertcat => Kernel::Vertcat,
            Op::IfElse { tol, .. } => Kernel::IfElse { tol: *tol },
            Op::Unary(u) => Kernel::Unary(*u),
            Op::Binary(b) => Kernel::Binary(*b),
            Op::Transpose => Kernel::Transpose,
            Op::MatMul => Kernel::MatMul,
            Op::Sum => Kernel::Sum,
        })
    }
}

/// Compute the output value of a node.
pub(crate) fn primal(kernel: Kernel, args: &[Operand<'_>], out: &mut [f64]) {
    match kernel {
        Kernel::Horzcat => concat::horzcat(args.iter().map(|a| a.value), out),
        Kernel::Vertcat => concat::vertcat(args.iter().map(|a| (a.shape, a.value)), out),
        Kernel::IfElse { tol } => if_else::select(tol, args, |a| a.value, out),
        Kernel::Unary(u) => elementwise::unary(u, args[0].value, out),
        Kernel::Binary(b) => elementwise::binary(b, args[0].value, args[1].value, out),
        Kernel::Transpose => linalg::transpose(args[0].shape, args[0].value, out),
        Kernel::MatMul => {
            out.fill(0.0);
            linalg::matmul_acc(args[0].shape, args[0].value, args[1].shape, args[1].value, out);
        }
        Kernel::Sum => out[0] = args[0].value.iter().sum(),
    }
}

/// Compute the output tangent of a node from operand values and tangents.
///
/// `value` is the node's own primal value from the same pass.
pub(crate) fn forward(kernel: Kernel, args: &[Operand<'_>], value: &[f64], out: &mut [f64]) {
    match kernel {
        Kernel::Horzcat => concat::horzcat(args.iter().map(|a| a.tangent), out),
        Kernel::Vertcat => concat::vertcat(args.iter().map(|a| (a.shape, a.tangent)), out),
        Kernel::IfElse { tol } => if_else::select(tol, args, |a| a.tangent, out),
        Kernel::Unary(u) => elementwise::unary_forward(u, args[0].value, value, args[0].tangent, out),
        Kernel::Binary(b) => elementwise::binary_forward(b, &args[0], &args[1], value, out),
        Kernel::Transpose => linalg::transpose(args[0].shape, args[0].tangent, out),
        Kernel::MatMul => {
            let (a, b) = (&args[0], &args[1]);
            out.fill(0.0);
            linalg::matmul_acc(a.shape, a.tangent, b.shape, b.value, out);
            linalg::matmul_acc(a.shape, a.value, b.shape, b.tangent, out);
        }
        Kernel::Sum => out[0] = args[0].tangent.iter().sum(),
    }
}

/// Add the contributions of the output cotangent `seed` into `sens`, one
/// buffer per operand (same order as `args`).
pub(crate) fn adjoint(
    kernel: Kernel,
    args: &[Operand<'_>],
    value: &[f64],
    seed: &[f64],
    sens: &mut [Vec<f64>],
) {
    match kernel {
        Kernel::Horzcat => concat::horzcat_adjoint(seed, sens),
        Kernel::Vertcat => {
            let shapes: Vec<Shape> = args.iter().map(|a| a.shape).collect();
            concat::vertcat_adjoint(&shapes, seed, sens);
        }
        Kernel::IfElse { tol } => if_else::select_adjoint(tol, args, seed, sens),
        Kernel::Unary(u) => elementwise::unary_adjoint(u, args[0].value, value, seed, &mut sens[0]),
        Kernel::Binary(b) => elementwise::binary_adjoint(b, &args[0], &args[1], value, seed, sens),
        Kernel::Transpose => linalg::transpose_adjoint(args[0].shape, seed, &mut sens[0]),
        Kernel::MatMul => linalg::matmul_adjoint(&args[0], &args[1], seed, sens),
        Kernel::Sum => sens[0].iter_mut().for_each(|s| *s += seed[0]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaves_have_no_kernel() {
        assert_eq!(Kernel::of(&Op::Symbol { name: "x".into() }), None);
        assert_eq!(Kernel::of(&Op::Constant { data: vec![1.0] }), None);
        assert_eq!(
            Kernel::of(&Op::IfElse {
                tol: 0.5,
                has_false: false
            }),
            Some(Kernel::IfElse { tol: 0.5 })
        );
        assert_eq!(Kernel::of(&Op::MatMul), Some(Kernel::MatMul));
    }

    #[test]
    fn test_sum_adjoint_broadcasts_seed() {
        let x = [1.0, 2.0, 3.0];
        let args = [Operand {
            shape: Shape::column(3),
            value: &x,
            tangent: &[],
        }];
        let mut sens = vec![vec![0.0; 3]];
        adjoint(Kernel::Sum, &args, &[6.0], &[2.5], &mut sens);
        assert_eq!(sens[0], vec![2.5, 2.5, 2.5]);
    }
}
