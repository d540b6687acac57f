//! Dense factorizations for `solve`.
//!
//! Both routines work in place on column-major raw tiles: `A` is overwritten
//! by its factors and `B` by the solution. Failures carry the LAPACK routine
//! that would have reported them and its 1-based `info` value, so that every
//! backend surfaces the same code for the same singular system.

use super::kernels::RawTile;
use crate::domain::Real;
use crate::error::Error;

/// A factorization step hit an exactly singular pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Failure {
    pub operation: &'static str,
    pub code: i32,
}

impl Failure {
    pub(crate) fn into_error(self, backend: &'static str) -> Error {
        Error::Backend {
            backend,
            operation: self.operation,
            code: self.code,
        }
    }
}

/// LU with partial pivoting, then forward/back substitution.
///
/// `a` must be square with as many rows as `b`.
pub(crate) fn lu_solve<T: Real>(a: RawTile<T>, b: RawTile<T>) -> Result<(), Failure> {
    let n = a.rows;
    debug_assert_eq!(a.cols, n);
    debug_assert_eq!(b.rows, n);

    let mut pivots = vec![0usize; n];
    for k in 0..n {
        let mut p = k;
        let mut best = a.get(k, k).abs();
        for i in k + 1..n {
            let v = a.get(i, k).abs();
            if v > best {
                best = v;
                p = i;
            }
        }
        pivots[k] = p;
        if best == T::ZERO {
            return Err(Failure {
                operation: "getrf",
                code: k as i32 + 1,
            });
        }
        if p != k {
            for j in 0..n {
                let t = a.get(k, j);
                a.set(k, j, a.get(p, j));
                a.set(p, j, t);
            }
        }
        let pivot = a.get(k, k);
        for i in k + 1..n {
            a.set(i, k, a.get(i, k) / pivot);
        }
        for j in k + 1..n {
            let akj = a.get(k, j);
            for i in k + 1..n {
                a.set(i, j, a.get(i, j) - a.get(i, k) * akj);
            }
        }
    }

    for col in 0..b.cols {
        for (k, &p) in pivots.iter().enumerate() {
            if p != k {
                let t = b.get(k, col);
                b.set(k, col, b.get(p, col));
                b.set(p, col, t);
            }
        }
        // L is unit lower triangular
        for k in 0..n {
            let bk = b.get(k, col);
            for i in k + 1..n {
                b.set(i, col, b.get(i, col) - a.get(i, k) * bk);
            }
        }
        back_substitute(a, b, n, col);
    }
    Ok(())
}

/// Householder QR, then `R x = Qᵀ b`.
///
/// `a` is `m × n` with `m >= n`; for a tall system the least-squares solution
/// lands in the leading `n` rows of `b`.
pub(crate) fn qr_solve<T: Real>(a: RawTile<T>, b: RawTile<T>) -> Result<(), Failure> {
    let (m, n) = (a.rows, a.cols);
    debug_assert!(m >= n);
    debug_assert_eq!(b.rows, m);

    let mut v = vec![T::ZERO; m];
    for k in 0..n {
        let mut norm2 = T::ZERO;
        for i in k..m {
            let x = a.get(i, k);
            norm2 = norm2 + x * x;
        }
        let norm = norm2.sqrt();
        if norm == T::ZERO {
            continue;
        }
        let x0 = a.get(k, k);
        let alpha = if x0 < T::ZERO { norm } else { T::ZERO - norm };
        v[k] = x0 - alpha;
        for i in k + 1..m {
            v[i] = a.get(i, k);
        }
        let mut vv = T::ZERO;
        for &vi in &v[k..m] {
            vv = vv + vi * vi;
        }
        let two = T::ONE + T::ONE;

        let reflect = |t: RawTile<T>, j: usize| {
            let mut s = T::ZERO;
            for i in k..m {
                s = s + v[i] * t.get(i, j);
            }
            let f = two * s / vv;
            for i in k..m {
                t.set(i, j, t.get(i, j) - f * v[i]);
            }
        };
        for j in k + 1..n {
            reflect(a, j);
        }
        for j in 0..b.cols {
            reflect(b, j);
        }

        a.set(k, k, alpha);
        let v0 = v[k];
        for i in k + 1..m {
            a.set(i, k, v[i] / v0);
        }
    }

    for col in 0..b.cols {
        for k in 0..n {
            if a.get(k, k) == T::ZERO {
                return Err(Failure {
                    operation: "trtrs",
                    code: k as i32 + 1,
                });
            }
        }
        back_substitute(a, b, n, col);
    }
    Ok(())
}

/// Solves the leading `n × n` upper triangle of `a` against column `col` of `b`.
fn back_substitute<T: Real>(a: RawTile<T>, b: RawTile<T>, n: usize, col: usize) {
    for k in (0..n).rev() {
        let mut s = b.get(k, col);
        for j in k + 1..n {
            s = s - a.get(k, j) * b.get(j, col);
        }
        b.set(k, col, s / a.get(k, k));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(data: &mut [f64], rows: usize, cols: usize) -> RawTile<f64> {
        unsafe { RawTile::from_vec(data, rows, cols) }
    }

    #[test]
    fn lu_solves_a_pivoting_system() {
        // [[0, 1], [2, 3]] needs a row swap
        let mut a = [0.0, 2.0, 1.0, 3.0];
        let mut b = [1.0, 5.0];
        lu_solve(tile(&mut a, 2, 2), tile(&mut b, 2, 1)).unwrap();
        assert!((b[0] - 1.0).abs() < 1e-12);
        assert!((b[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn lu_reports_singular_pivot() {
        let mut a = [1.0, 2.0, 2.0, 4.0];
        let mut b = [1.0, 1.0];
        let err = lu_solve(tile(&mut a, 2, 2), tile(&mut b, 2, 1)).unwrap_err();
        assert_eq!(err, Failure { operation: "getrf", code: 2 });
    }

    #[test]
    fn qr_solves_least_squares() {
        // fit y = c0 + c1 t through (0, 1), (1, 3), (2, 5)
        let mut a = [1.0, 1.0, 1.0, 0.0, 1.0, 2.0];
        let mut b = [1.0, 3.0, 5.0];
        qr_solve(tile(&mut a, 3, 2), tile(&mut b, 3, 1)).unwrap();
        assert!((b[0] - 1.0).abs() < 1e-12);
        assert!((b[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn qr_reports_rank_deficiency() {
        let mut a = [1.0, 1.0, 0.0, 0.0];
        let mut b = [1.0, 1.0];
        let err = qr_solve(tile(&mut a, 2, 2), tile(&mut b, 2, 1)).unwrap_err();
        assert_eq!(err.operation, "trtrs");
        assert_eq!(err.code, 2);
    }
}
