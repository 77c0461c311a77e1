//! Finite difference utilities for sensitivity verification.
//!
//! Provides numerical derivatives for testing the forward and adjoint rules.

/// Jacobian of a vector function by central finite differences.
///
/// Entry `j` of the result is the column `d f / d point[j]`, one value per
/// output of `f`.
///
/// ```
/// use mx_core::finite_diff_jacobian;
///
/// // f(x, y) = [x * y, x + y]
/// let f = |v: &[f64]| vec![v[0] * v[1], v[0] + v[1]];
/// let jac = finite_diff_jacobian(f, &[2.0, 3.0], 1e-7);
/// assert!((jac[0][0] - 3.0).abs() < 1e-5);
/// assert!((jac[1][0] - 2.0).abs() < 1e-5);
/// assert!((jac[1][1] - 1.0).abs() < 1e-5);
/// ```
pub fn finite_diff_jacobian<F>(f: F, point: &[f64], eps: f64) -> Vec<Vec<f64>>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let mut unit = vec![0.0; point.len()];
    (0..point.len())
        .map(|j| {
            unit[j] = 1.0;
            let column = finite_diff_jvp(&f, point, &unit, eps);
            unit[j] = 0.0;
            column
        })
        .collect()
}

/// Gradient of a scalar function by central finite differences.
///
/// # Arguments
/// * `f` - Function that takes a slice of input values and returns a scalar
/// * `point` - The point at which to compute the gradient
/// * `eps` - Step size (typically 1e-7 to 1e-5)
///
/// # Example
/// ```
/// use mx_core::finite_diff_grad;
///
/// // f(x, y) = x^2 + y^2
/// let f = |v: &[f64]| v[0] * v[0] + v[1] * v[1];
/// let grads = finite_diff_grad(f, &[3.0, 4.0], 1e-7);
///
/// assert!((grads[0] - 6.0).abs() < 1e-5);
/// assert!((grads[1] - 8.0).abs() < 1e-5);
/// ```
pub fn finite_diff_grad<F>(f: F, point: &[f64], eps: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    finite_diff_jacobian(|p| vec![f(p)], point, eps)
        .into_iter()
        .map(|column| column[0])
        .collect()
}

/// Directional derivative `J(point) * direction` of a vector function by
/// central finite differences. This is what a forward sweep computes.
///
/// ```
/// use mx_core::finite_diff_jvp;
///
/// // f(x, y) = [x * y, x + y]
/// let f = |v: &[f64]| vec![v[0] * v[1], v[0] + v[1]];
/// let jvp = finite_diff_jvp(f, &[2.0, 3.0], &[1.0, 0.0], 1e-7);
/// assert!((jvp[0] - 3.0).abs() < 1e-5);
/// assert!((jvp[1] - 1.0).abs() < 1e-5);
/// ```
pub fn finite_diff_jvp<F>(f: F, point: &[f64], direction: &[f64], eps: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    assert_eq!(point.len(), direction.len());
    let step = |sign: f64| -> Vec<f64> {
        point
            .iter()
            .zip(direction)
            .map(|(p, d)| p + sign * eps * d)
            .collect()
    };
    let plus = f(&step(1.0));
    let minus = f(&step(-1.0));
    plus.iter()
        .zip(&minus)
        .map(|(p, m)| (p - m) / (2.0 * eps))
        .collect()
}

/// Inner product of two equally long vectors.
///
/// The adjoint-consistency check compares `dot(adjoint, tangent_in)` with
/// `dot(cotangent_in, tangent_out)`.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Largest entrywise `|a - b|`. Vectors of different lengths are infinitely
/// far apart.
pub fn max_grad_error(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_diff_quadratic() {
        // f(x, y) = x^2 + 2*x*y + y^2
        // df/dx = df/dy = 2x + 2y
        let f = |v: &[f64]| v[0] * v[0] + 2.0 * v[0] * v[1] + v[1] * v[1];
        let grads = finite_diff_grad(f, &[1.0, 2.0], 1e-7);

        assert!((grads[0] - 6.0).abs() < 1e-5);
        assert!((grads[1] - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_finite_diff_jvp_matches_jacobian() {
        // f(x, y) = [sin(x), x * y, y^2]
        let f = |v: &[f64]| vec![v[0].sin(), v[0] * v[1], v[1] * v[1]];
        let jvp = finite_diff_jvp(f, &[0.7, 1.5], &[2.0, -1.0], 1e-6);

        let expected = [0.7_f64.cos() * 2.0, 1.5 * 2.0 - 0.7, -2.0 * 1.5];
        assert!(max_grad_error(&jvp, &expected) < 1e-6);
    }

    #[test]
    fn test_dot() {
        assert_eq!(dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
        assert_eq!(dot(&[], &[]), 0.0);
    }

    #[test]
    fn test_max_grad_error() {
        let g1 = vec![1.0, 2.0, 3.0];
        let g2 = vec![1.1, 2.0, 2.8];

        let err = max_grad_error(&g1, &g2);
        assert!((err - 0.2).abs() < 1e-10);
    }

    #[test]
    fn test_finite_diff_jacobian_columns() {
        // f(x, y) = [sin(x), x * y, y^2]
        let f = |v: &[f64]| vec![v[0].sin(), v[0] * v[1], v[1] * v[1]];
        let jac = finite_diff_jacobian(f, &[0.7, 1.5], 1e-6);
        assert_eq!(jac.len(), 2);
        assert!(max_grad_error(&jac[0], &[0.7_f64.cos(), 1.5, 0.0]) < 1e-6);
        assert!(max_grad_error(&jac[1], &[0.0, 0.7, 3.0]) < 1e-6);
    }

    #[test]
    fn test_max_grad_error_length_mismatch() {
        assert_eq!(max_grad_error(&[1.0], &[1.0, 2.0]), f64::INFINITY);
    }
}
