//! Horizontal and vertical concatenation.
//!
//! Offsets are derived from the operand lengths/shapes on every call.

use crate::shape::Shape;

/// Place each part contiguously at increasing offsets.
///
/// In column-major storage a horizontal join is exactly this copy, so the
/// same kernel serves the primal (values) and forward (tangents) passes.
pub(crate) fn horzcat<'a>(parts: impl Iterator<Item = &'a [f64]>, out: &mut [f64]) {
    let mut offset = 0;
    for part in parts {
        out[offset..offset + part.len()].copy_from_slice(part);
        offset += part.len();
    }
}

/// Transpose of [`horzcat`]: operand `k` receives the slice at its offset.
///
/// The slices partition the seed, so each entry goes to exactly one operand.
pub(crate) fn horzcat_adjoint(seed: &[f64], sens: &mut [Vec<f64>]) {
    let mut offset = 0;
    for s in sens.iter_mut() {
        let n = s.len();
        for (acc, v) in s.iter_mut().zip(&seed[offset..offset + n]) {
            *acc += v;
        }
        offset += n;
    }
}

/// Stack the parts on top of each other.
///
/// Column `j` of the result is column `j` of every part, one after the other.
pub(crate) fn vertcat<'a>(parts: impl Iterator<Item = (Shape, &'a [f64])>, out: &mut [f64]) {
    let parts: Vec<(Shape, &[f64])> = parts.collect();
    let total_rows: usize = parts.iter().map(|(s, _)| s.rows()).sum();
    let mut row_offset = 0;
    for (shape, data) in parts {
        let r = shape.rows();
        for j in 0..shape.cols() {
            let dst = j * total_rows + row_offset;
            out[dst..dst + r].copy_from_slice(&data[j * r..(j + 1) * r]);
        }
        row_offset += r;
    }
}

/// Transpose of [`vertcat`].
pub(crate) fn vertcat_adjoint(shapes: &[Shape], seed: &[f64], sens: &mut [Vec<f64>]) {
    let total_rows: usize = shapes.iter().map(|s| s.rows()).sum();
    let mut row_offset = 0;
    for (shape, s) in shapes.iter().zip(sens.iter_mut()) {
        let r = shape.rows();
        for j in 0..shape.cols() {
            let src = j * total_rows + row_offset;
            for i in 0..r {
                s[j * r + i] += seed[src + i];
            }
        }
        row_offset += r;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horzcat_places_parts_in_order() {
        let a = [1.0, 2.0];
        let b = [3.0, 4.0, 5.0, 6.0];
        let mut out = [0.0; 6];
        horzcat([&a[..], &b[..]].into_iter(), &mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_horzcat_adjoint_accumulates() {
        let seed = [1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let mut sens = vec![vec![10.0, 10.0], vec![0.0; 4]];
        horzcat_adjoint(&seed, &mut sens);
        assert_eq!(sens[0], vec![11.0, 10.0]);
        assert_eq!(sens[1], vec![1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_vertcat_interleaves_columns() {
        // a = [[1, 2]], b = [[3, 4], [5, 6]]  ->  [[1, 2], [3, 4], [5, 6]]
        let a = [1.0, 2.0];
        let b = [3.0, 5.0, 4.0, 6.0];
        let mut out = [0.0; 6];
        vertcat(
            [(Shape::new(1, 2), &a[..]), (Shape::new(2, 2), &b[..])].into_iter(),
            &mut out,
        );
        assert_eq!(out, [1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_vertcat_adjoint_is_inverse_gather() {
        let shapes = [Shape::new(1, 2), Shape::new(2, 2)];
        let seed = [1.0, 3.0, 5.0, 2.0, 4.0, 6.0];
        let mut sens = vec![vec![0.0; 2], vec![0.0; 4]];
        vertcat_adjoint(&shapes, &seed, &mut sens);
        assert_eq!(sens[0], vec![1.0, 2.0]);
        assert_eq!(sens[1], vec![3.0, 5.0, 4.0, 6.0]);
    }
}
