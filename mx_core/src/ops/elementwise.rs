//! Elementwise rules.
//!
//! Each entry of the output depends only on the same entry of the operands,
//! so the Jacobian is diagonal and the adjoint uses the same local
//! derivative as the forward rule.

use super::Operand;
use crate::node::{BinaryOp, UnaryOp};

fn apply(op: UnaryOp, x: f64) -> f64 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Log => x.ln(),
        UnaryOp::Sin => x.sin(),
        UnaryOp::Cos => x.cos(),
    }
}

/// dy/dx for `y = op(x)`, given both the argument and the result.
fn local_derivative(op: UnaryOp, x: f64, y: f64) -> f64 {
    match op {
        // y = -x, dy/dx = -1
        UnaryOp::Neg => -1.0,
        // y = sqrt(x), dy/dx = 1 / (2 sqrt(x))
        UnaryOp::Sqrt => 0.5 / y,
        // y = exp(x), dy/dx = exp(x)
        UnaryOp::Exp => y,
        // y = ln(x), dy/dx = 1/x
        UnaryOp::Log => 1.0 / x,
        UnaryOp::Sin => x.cos(),
        UnaryOp::Cos => -x.sin(),
    }
}

pub(crate) fn unary(op: UnaryOp, x: &[f64], out: &mut [f64]) {
    for (o, &xi) in out.iter_mut().zip(x) {
        *o = apply(op, xi);
    }
}

pub(crate) fn unary_forward(op: UnaryOp, x: &[f64], y: &[f64], dx: &[f64], out: &mut [f64]) {
    for (i, o) in out.iter_mut().enumerate() {
        *o = local_derivative(op, x[i], y[i]) * dx[i];
    }
}

pub(crate) fn unary_adjoint(op: UnaryOp, x: &[f64], y: &[f64], seed: &[f64], sens: &mut [f64]) {
    for (i, s) in sens.iter_mut().enumerate() {
        *s += local_derivative(op, x[i], y[i]) * seed[i];
    }
}

pub(crate) fn binary(op: BinaryOp, a: &[f64], b: &[f64], out: &mut [f64]) {
    for (i, o) in out.iter_mut().enumerate() {
        *o = match op {
            BinaryOp::Add => a[i] + b[i],
            BinaryOp::Sub => a[i] - b[i],
            BinaryOp::Mul => a[i] * b[i],
            BinaryOp::Div => a[i] / b[i],
        };
    }
}

/// Partial derivatives `(dz/da, dz/db)` of one entry.
fn partials(op: BinaryOp, a: f64, b: f64, z: f64) -> (f64, f64) {
    match op {
        BinaryOp::Add => (1.0, 1.0),
        BinaryOp::Sub => (1.0, -1.0),
        BinaryOp::Mul => (b, a),
        // z = a / b, dz/da = 1/b, dz/db = -a/b^2 = -z/b
        BinaryOp::Div => (1.0 / b, -z / b),
    }
}

pub(crate) fn binary_forward(
    op: BinaryOp,
    a: &Operand<'_>,
    b: &Operand<'_>,
    z: &[f64],
    out: &mut [f64],
) {
    for (i, o) in out.iter_mut().enumerate() {
        let (da, db) = partials(op, a.value[i], b.value[i], z[i]);
        *o = da * a.tangent[i] + db * b.tangent[i];
    }
}

pub(crate) fn binary_adjoint(
    op: BinaryOp,
    a: &Operand<'_>,
    b: &Operand<'_>,
    z: &[f64],
    seed: &[f64],
    sens: &mut [Vec<f64>],
) {
    let (sens_a, sens_b) = sens.split_at_mut(1);
    let (sens_a, sens_b) = (&mut sens_a[0], &mut sens_b[0]);
    for i in 0..seed.len() {
        let (da, db) = partials(op, a.value[i], b.value[i], z[i]);
        sens_a[i] += da * seed[i];
        sens_b[i] += db * seed[i];
    }
}
