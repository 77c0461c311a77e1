//! Transposition and matrix products over column-major buffers.

use super::Operand;
use crate::shape::Shape;

/// `out = x^T` where `x` has shape `shape`.
pub(crate) fn transpose(shape: Shape, x: &[f64], out: &mut [f64]) {
    let (r, c) = (shape.rows(), shape.cols());
    for j in 0..c {
        for i in 0..r {
            out[j + i * c] = x[i + j * r];
        }
    }
}

/// `sens += seed^T`; `shape` is the operand's (untransposed) shape.
pub(crate) fn transpose_adjoint(shape: Shape, seed: &[f64], sens: &mut [f64]) {
    let (r, c) = (shape.rows(), shape.cols());
    for j in 0..c {
        for i in 0..r {
            sens[i + j * r] += seed[j + i * c];
        }
    }
}

/// `out += a * b` for `a: (m, k)`, `b: (k, n)`.
pub(crate) fn matmul_acc(sa: Shape, a: &[f64], sb: Shape, b: &[f64], out: &mut [f64]) {
    let (m, k, n) = (sa.rows(), sa.cols(), sb.cols());
    debug_assert_eq!(k, sb.rows());
    for j in 0..n {
        for l in 0..k {
            let blj = b[l + j * k];
            for i in 0..m {
                out[i + j * m] += a[i + l * m] * blj;
            }
        }
    }
}

/// For `c = a * b`: `sens_a += seed * b^T` and `sens_b += a^T * seed`.
pub(crate) fn matmul_adjoint(a: &Operand<'_>, b: &Operand<'_>, seed: &[f64], sens: &mut [Vec<f64>]) {
    let (m, k, n) = (a.shape.rows(), a.shape.cols(), b.shape.cols());
    let (sens_a, sens_b) = sens.split_at_mut(1);
    let (sens_a, sens_b) = (&mut sens_a[0], &mut sens_b[0]);
    for j in 0..n {
        for l in 0..k {
            let blj = b.value[l + j * k];
            let mut acc = 0.0;
            for i in 0..m {
                let s = seed[i + j * m];
                sens_a[i + l * m] += s * blj;
                acc += a.value[i + l * m] * s;
            }
            sens_b[l + j * k] += acc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpose() {
        // [[1, 2, 3], [4, 5, 6]] -> [[1, 4], [2, 5], [3, 6]]
        let x = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
        let mut out = [0.0; 6];
        transpose(Shape::new(2, 3), &x, &mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_transpose_adjoint_roundtrip() {
        let seed = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut sens = [0.0; 6];
        transpose_adjoint(Shape::new(2, 3), &seed, &mut sens);
        assert_eq!(sens, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_matmul() {
        // [[1, 2], [3, 4]] * [[5], [6]] = [[17], [39]]
        let a = [1.0, 3.0, 2.0, 4.0];
        let b = [5.0, 6.0];
        let mut out = [0.0; 2];
        matmul_acc(Shape::new(2, 2), &a, Shape::column(2), &b, &mut out);
        assert_eq!(out, [17.0, 39.0]);
    }

    #[test]
    fn test_matmul_adjoint() {
        let a_val = [1.0, 3.0, 2.0, 4.0];
        let b_val = [5.0, 6.0];
        let a = Operand {
            shape: Shape::new(2, 2),
            value: &a_val,
            tangent: &[],
        };
        let b = Operand {
            shape: Shape::column(2),
            value: &b_val,
            tangent: &[],
        };
        let mut sens = vec![vec![0.0; 4], vec![0.0; 2]];
        matmul_adjoint(&a, &b, &[1.0, 0.0], &mut sens);
        // seed * b^T = [[5, 6], [0, 0]]
        assert_eq!(sens[0], vec![5.0, 0.0, 6.0, 0.0]);
        // a^T * seed = [[1], [2]]
        assert_eq!(sens[1], vec![1.0, 2.0]);
    }
}
