//! Conditional selection.
//!
//! The guard is always read from its primal value, so the tangent and the
//! cotangent follow whichever branch the primal pass picked. At `guard == tol`
//! the derivative jumps.

use super::Operand;

/// Branch selection predicate. A NaN guard is never selected.
pub(crate) fn takes_true_branch(tol: f64, guard: f64) -> bool {
    guard > tol
}

/// Copy the selected branch (`args[1]` or `args[2]`, or zeros when there is
/// no false branch) into `out`. `pick` chooses the value or the tangent.
pub(crate) fn select<'a>(
    tol: f64,
    args: &[Operand<'a>],
    pick: impl Fn(&Operand<'a>) -> &'a [f64],
    out: &mut [f64],
) {
    if takes_true_branch(tol, args[0].value[0]) {
        out.copy_from_slice(pick(&args[1]));
    } else if let Some(if_false) = args.get(2) {
        out.copy_from_slice(pick(if_false));
    } else {
        out.fill(0.0);
    }
}

/// The guard never receives sensitivity; only the selected branch does.
pub(crate) fn select_adjoint(tol: f64, args: &[Operand<'_>], seed: &[f64], sens: &mut [Vec<f64>]) {
    let branch = if takes_true_branch(tol, args[0].value[0]) {
        1
    } else if args.len() > 2 {
        2
    } else {
        return;
    };
    for (acc, v) in sens[branch].iter_mut().zip(seed) {
        *acc += v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    fn operand(value: &[f64]) -> Operand<'_> {
        Operand {
            shape: Shape::column(value.len()),
            value,
            tangent: &[],
        }
    }

    #[test]
    fn test_predicate() {
        assert!(takes_true_branch(0.0, 1e-3));
        assert!(!takes_true_branch(0.0, 0.0));
        assert!(!takes_true_branch(0.5, 0.5));
        assert!(!takes_true_branch(0.0, f64::NAN));
    }

    #[test]
    fn test_select_zero_branch() {
        let guard = [-1.0];
        let t = [4.0, 5.0];
        let args = [operand(&guard), operand(&t)];
        let mut out = [9.0, 9.0];
        select(0.0, &args, |a| a.value, &mut out);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_select_false_branch() {
        let guard = [0.0];
        let t = [4.0, 5.0];
        let f = [6.0, 7.0];
        let args = [operand(&guard), operand(&t), operand(&f)];
        let mut out = [0.0; 2];
        select(0.0, &args, |a| a.value, &mut out);
        assert_eq!(out, [6.0, 7.0]);
    }

    #[test]
    fn test_adjoint_only_reaches_selected_branch() {
        let guard = [2.0];
        let t = [4.0, 5.0];
        let f = [6.0, 7.0];
        let args = [operand(&guard), operand(&t), operand(&f)];
        let mut sens = vec![vec![0.0], vec![0.0; 2], vec![0.0; 2]];
        select_adjoint(1.0, &args, &[1.0, -1.0], &mut sens);
        assert_eq!(sens[0], vec![0.0]);
        assert_eq!(sens[1], vec![1.0, -1.0]);
        assert_eq!(sens[2], vec![0.0, 0.0]);
    }
}
