//! Linear algebra and root-finding primitives shared by the gas solver.
//!
//! LU decomposition with partial pivoting solves the NLTE rate matrix;
//! Brent's method is used twice over (electron-density charge
//! conservation, radiative-equilibrium temperature). Both are needed by
//! more than one caller, so they live here rather than duplicated in
//! `gas.rs` and `transport/equilibrium.rs`.
//!
//! The LU solve is implemented directly over `ndarray::Array2<f64>`.
//! Brent's method is a Numerical-Recipes-style zbrent, generalized to any
//! bracketed scalar function rather than hard-coded to the temperature
//! solve.

use ndarray::Array2;

/// Failure modes for the linear/root-finding primitives below. Both are
/// recoverable — callers fall back to the last-good value rather than
/// propagating a fatal `Error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumericalError {
    /// The matrix was singular (or too close to it) to factor.
    SingularMatrix,
    /// `f(lo)` and `f(hi)` share the same sign; no root is bracketed.
    NotBracketed,
    /// Brent's method did not converge within the iteration budget.
    MaxIterationsExceeded,
}

/// Solve `M x = b` via LU decomposition with partial pivoting, in place.
///
/// `m` is consumed (overwritten with its LU factors); returns the solution
/// vector. Grounded on the assembly convention of
/// `nlte_atom.cpp::solve_nlte` (diagonal = negative row sum, last row
/// replaced by a conservation constraint) but implemented here as a
/// general-purpose dense solve, independent of that convention.
pub fn lu_solve(mut m: Array2<f64>, b: &[f64]) -> Result<Vec<f64>, NumericalError> {
    let n = b.len();
    assert_eq!(m.nrows(), n);
    assert_eq!(m.ncols(), n);

    let mut perm: Vec<usize> = (0..n).collect();

    for k in 0..n {
        // partial pivot: largest magnitude in column k, at or below row k.
        let mut p = k;
        let mut best = m[[k, k]].abs();
        for i in (k + 1)..n {
            let v = m[[i, k]].abs();
            if v > best {
                best = v;
                p = i;
            }
        }
        if best < 1e-300 {
            return Err(NumericalError::SingularMatrix);
        }
        if p != k {
            for j in 0..n {
                m.swap([k, j], [p, j]);
            }
            perm.swap(k, p);
        }
        for i in (k + 1)..n {
            let factor = m[[i, k]] / m[[k, k]];
            m[[i, k]] = factor;
            for j in (k + 1)..n {
                let sub = factor * m[[k, j]];
                m[[i, j]] -= sub;
            }
        }
    }

    // forward substitution on the permuted b, then back substitution.
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[perm[i]];
        for j in 0..i {
            sum -= m[[i, j]] * y[j];
        }
        y[i] = sum;
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= m[[i, j]] * x[j];
        }
        x[i] = sum / m[[i, i]];
    }
    Ok(x)
}

/// Brent's method (Numerical Recipes `zbrent`), bracketed on `[lo, hi]`,
/// with absolute tolerance `tol` and an iteration cap. Direct port of
/// `solve_equilibrium.cpp::temp_brent_method`, generalized over `f`.
pub fn brent<F: FnMut(f64) -> f64>(mut f: F, lo: f64, hi: f64, tol: f64, max_iter: usize) -> Result<f64, NumericalError> {
    const EPS: f64 = 3.0e-8;

    let mut a = lo;
    let mut b = hi;
    let mut c = b;
    let mut fa = f(a);
    let mut fb = f(b);
    if (fa > 0.0 && fb > 0.0) || (fa < 0.0 && fb < 0.0) {
        return Err(NumericalError::NotBracketed);
    }
    let mut fc = fb;
    let mut d = b - a;
    let mut e = d;

    for _ in 0..max_iter {
        if (fb > 0.0 && fc > 0.0) || (fb < 0.0 && fc < 0.0) {
            c = a;
            fc = fa;
            e = b - a;
            d = e;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }
        let tol1 = 2.0 * EPS * b.abs() + 0.5 * tol;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol1 || fb == 0.0 {
            return Ok(b);
        }
        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            let s = fb / fa;
            let (mut p, mut q);
            if a == c {
                p = 2.0 * xm * s;
                q = 1.0 - s;
            } else {
                let qq = fa / fc;
                let r = fb / fc;
                p = s * (2.0 * xm * qq * (qq - r) - (b - a) * (r - 1.0));
                q = (qq - 1.0) * (r - 1.0) * (s - 1.0);
            }
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }
        a = b;
        fa = fb;
        if d.abs() > tol1 {
            b += d;
        } else {
            b += tol1.copysign(xm);
        }
        fb = f(b);
    }
    Err(NumericalError::MaxIterationsExceeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn lu_solve_identity() {
        let m = Array2::eye(3);
        let b = vec![1.0, 2.0, 3.0];
        let x = lu_solve(m, &b).unwrap();
        assert_eq!(x, b);
    }

    #[test]
    fn lu_solve_known_system() {
        // 2x + y = 5, x + 3y = 10 -> x = 1, y = 3
        let m = Array2::from_shape_vec((2, 2), vec![2.0, 1.0, 1.0, 3.0]).unwrap();
        let b = vec![5.0, 10.0];
        let x = lu_solve(m, &b).unwrap();
        assert!(approx_eq!(f64, x[0], 1.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, x[1], 3.0, epsilon = 1e-9));
    }

    #[test]
    fn lu_solve_requires_pivoting() {
        // zero in the (0,0) position forces a row swap.
        let m = Array2::from_shape_vec((2, 2), vec![0.0, 1.0, 1.0, 1.0]).unwrap();
        let b = vec![2.0, 3.0];
        let x = lu_solve(m, &b).unwrap();
        assert!(approx_eq!(f64, x[0], 1.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, x[1], 2.0, epsilon = 1e-9));
    }

    #[test]
    fn lu_solve_singular_matrix_errs() {
        let m = Array2::from_shape_vec((2, 2), vec![1.0, 1.0, 1.0, 1.0]).unwrap();
        let b = vec![1.0, 2.0];
        assert_eq!(lu_solve(m, &b), Err(NumericalError::SingularMatrix));
    }

    #[test]
    fn brent_finds_known_root() {
        // f(x) = x^2 - 2, root at sqrt(2)
        let root = brent(|x| x * x - 2.0, 0.0, 2.0, 1e-10, 100).unwrap();
        assert!(approx_eq!(f64, root, 2.0_f64.sqrt(), epsilon = 1e-6));
    }

    #[test]
    fn brent_rejects_unbracketed_root() {
        let result = brent(|x| x * x + 1.0, -1.0, 1.0, 1e-6, 100);
        assert_eq!(result, Err(NumericalError::NotBracketed));
    }

    #[test]
    fn brent_linear_function_exact() {
        // f(x) = x - 5
        let root = brent(|x| x - 5.0, 0.0, 10.0, 1e-10, 100).unwrap();
        assert!(approx_eq!(f64, root, 5.0, epsilon = 1e-8));
    }
}
