//! Parallel CPU backend
//!
//! # CPU Backend
//!
//! Serves [`MemorySpace::Cpu`](crate::space::MemorySpace::Cpu). Memory comes
//! from the generic aligned allocator, so buffers are plain host memory and
//! kernels can work on them directly.
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon)
//! - Transposed operands honoured everywhere, `solve` included
//! - Operations without a parallel kernel fall through to the scalar
//!   [`REFERENCE`] loops, which are valid on the same host memory
//!
//! ## Parallel Ops
//!
//! - elementwise: `initialize`, `add`, `subtract`, `add_equal`, `scale`,
//!   `elementwise_product`, `elementwise_division`
//! - column-parallel: `scale_columns`, `add_broadcast`, `multiply`,
//!   `kronecker_product`
//! - row-parallel: `dot`, `cumulative_row_sum`
//! - reductions: `sum`, `euclidean_norm`
//!
//! ## Safety
//!
//! Work is partitioned so that each output element (or column) is written
//! by exactly one task. Inputs may alias the output only elementwise, as in
//! `z = alpha * x + z`.

use super::kernels::{self, Raw, RawTile};
use super::linalg;
use super::reference::REFERENCE;
use super::{LinearSystemSolverType, MatrixOperation};
use crate::alloc::{generic_alloc, generic_free, host_copy, host_download, host_upload};
use crate::backend::Backend;
use crate::descriptor::{MemoryBuffer, MemoryCube, MemoryTile, SparseMemoryBuffer, SparseMemoryTile};
use crate::domain::Element;
use crate::error::Result;
use rayon::prelude::*;

/// Elements handled per task below which splitting further does not pay off.
const MIN_CHUNK: usize = 4096;

/// Multi-threaded host backend.
#[derive(Debug, Default)]
pub struct CpuBackend;

/// The instance serving `MemorySpace::Cpu`.
pub static CPU: CpuBackend = CpuBackend;

/// `z[i] = f(i)` for every `i`, in parallel.
fn par_map<T: Element>(z: Raw<T>, f: impl Fn(usize) -> T + Sync + Send) {
    (0..z.len())
        .into_par_iter()
        .with_min_len(MIN_CHUNK)
        .for_each(|i| z.set(i, f(i)));
}

/// `f(j)` for every column `j` of `a`, in parallel.
fn par_columns<T: Element>(a: &RawTile<T>, f: impl Fn(usize) + Sync + Send) {
    let min = (MIN_CHUNK / a.rows.max(1)).max(1);
    (0..a.cols).into_par_iter().with_min_len(min).for_each(f);
}

/// Copies `op(a)` into a fresh compact column-major vector.
fn materialize<T: Element>(a: RawTile<T>, op: MatrixOperation) -> (Vec<T>, usize, usize) {
    let (rows, cols) = a.shape_op(op);
    let mut data = Vec::with_capacity(rows * cols);
    for j in 0..cols {
        for i in 0..rows {
            data.push(a.get_op(op, i, j));
        }
    }
    (data, rows, cols)
}

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    unsafe fn alloc(&self, buffer: &mut MemoryBuffer) -> Result<()> {
        generic_alloc(buffer);
        Ok(())
    }

    unsafe fn free(&self, buffer: &mut MemoryBuffer) -> Result<()> {
        generic_free(buffer);
        Ok(())
    }

    unsafe fn copy(&self, dest: &MemoryBuffer, source: &MemoryBuffer) -> Result<()> {
        unsafe { host_copy(dest, source) };
        Ok(())
    }

    unsafe fn upload(&self, dest: &MemoryBuffer, host: &[u8]) -> Result<()> {
        unsafe { host_upload(dest, host) };
        Ok(())
    }

    unsafe fn download(&self, source: &MemoryBuffer, host: &mut [u8]) -> Result<()> {
        unsafe { host_download(source, host) };
        Ok(())
    }

    unsafe fn initialize(&self, z: &MemoryBuffer, value: f64) -> Result<()> {
        with_element!(z, "initialize", |T| {
            let value = T::from_f64(value);
            par_map::<T>(unsafe { Raw::new(z) }, |_| value);
            Ok(())
        })
    }

    unsafe fn lin_space(&self, z: &MemoryBuffer, x0: f64, x1: f64) -> Result<()> {
        unsafe { REFERENCE.lin_space(z, x0, x1) }
    }

    unsafe fn random_uniform(&self, z: &MemoryBuffer, seed: u64) -> Result<()> {
        unsafe { REFERENCE.random_uniform(z, seed) }
    }

    unsafe fn random_gaussian(&self, z: &MemoryBuffer, seed: u64) -> Result<()> {
        unsafe { REFERENCE.random_gaussian(z, seed) }
    }

    unsafe fn eye(&self, a: &MemoryTile) -> Result<()> {
        unsafe { REFERENCE.eye(a) }
    }

    unsafe fn add(&self, z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(z, "add", |T| {
            let (zr, xr, yr) = unsafe { (Raw::<T>::new(z), Raw::<T>::new(x), Raw::<T>::new(y)) };
            let alpha = T::from_f64(alpha);
            par_map(zr, |i| alpha.mul_plus(xr.get(i), yr.get(i)));
            Ok(())
        })
    }

    unsafe fn subtract(&self, z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer) -> Result<()> {
        with_element!(z, "subtract", |T| {
            let (zr, xr, yr) = unsafe { (Raw::<T>::new(z), Raw::<T>::new(x), Raw::<T>::new(y)) };
            par_map(zr, |i| xr.get(i).wrapping_sub(yr.get(i)));
            Ok(())
        })
    }

    unsafe fn add_equal(&self, z: &MemoryBuffer, x: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(z, "add_equal", |T| {
            let (zr, xr) = unsafe { (Raw::<T>::new(z), Raw::<T>::new(x)) };
            let alpha = T::from_f64(alpha);
            par_map(zr, |i| alpha.mul_plus(xr.get(i), zr.get(i)));
            Ok(())
        })
    }

    unsafe fn add_equal_matrix(
        &self,
        a: &MemoryTile,
        b: &MemoryTile,
        a_op: MatrixOperation,
        b_op: MatrixOperation,
        alpha: f64,
        beta: f64,
    ) -> Result<()> {
        unsafe { REFERENCE.add_equal_matrix(a, b, a_op, b_op, alpha, beta) }
    }

    unsafe fn add_broadcast(&self, a: &MemoryTile, x: &MemoryBuffer, row_wise: bool, alpha: f64) -> Result<()> {
        with_element!(a, "add_broadcast", |T| {
            let (at, xr) = unsafe { (RawTile::<T>::new(a), Raw::<T>::new(x)) };
            let alpha = T::from_f64(alpha);
            par_columns(&at, |j| {
                for i in 0..at.rows {
                    let v = if row_wise { xr.get(j) } else { xr.get(i) };
                    at.set(i, j, alpha.mul_plus(v, at.get(i, j)));
                }
            });
            Ok(())
        })
    }

    unsafe fn scale(&self, z: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(z, "scale", |T| {
            let zr = unsafe { Raw::<T>::new(z) };
            let alpha = T::from_f64(alpha);
            par_map(zr, |i| alpha.wrapping_mul(zr.get(i)));
            Ok(())
        })
    }

    unsafe fn scale_columns(&self, a: &MemoryTile, alpha: &MemoryBuffer) -> Result<()> {
        with_element!(a, "scale_columns", |T| {
            let (at, scales) = unsafe { (RawTile::<T>::new(a), Raw::<T>::new(alpha)) };
            par_columns(&at, |j| {
                let s = scales.get(j);
                for i in 0..at.rows {
                    at.set(i, j, s.wrapping_mul(at.get(i, j)));
                }
            });
            Ok(())
        })
    }

    unsafe fn elementwise_product(&self, z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(z, "elementwise_product", |T| {
            let (zr, xr, yr) = unsafe { (Raw::<T>::new(z), Raw::<T>::new(x), Raw::<T>::new(y)) };
            let alpha = T::from_f64(alpha);
            par_map(zr, |i| alpha.wrapping_mul(xr.get(i)).wrapping_mul(yr.get(i)));
            Ok(())
        })
    }

    unsafe fn elementwise_division(&self, z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(z, "elementwise_division", |T| {
            let (zr, xr, yr) = unsafe { (Raw::<T>::new(z), Raw::<T>::new(x), Raw::<T>::new(y)) };
            let alpha = T::from_f64(alpha);
            par_map(zr, |i| alpha.wrapping_mul(xr.get(i)).wrapping_div(yr.get(i)));
            Ok(())
        })
    }

    unsafe fn multiply(
        &self,
        a: &MemoryTile,
        b: &MemoryTile,
        c: &MemoryTile,
        b_op: MatrixOperation,
        c_op: MatrixOperation,
        alpha: f64,
        beta: f64,
    ) -> Result<()> {
        with_element!(a, "multiply", |T| {
            let (at, bt, ct) = unsafe { (RawTile::<T>::new(a), RawTile::<T>::new(b), RawTile::<T>::new(c)) };
            let (alpha, beta) = (T::from_f64(alpha), T::from_f64(beta));
            par_columns(&at, |j| kernels::gemm_column(at, bt, ct, b_op, c_op, alpha, beta, j));
            Ok(())
        })
    }

    unsafe fn sub_multiply(
        &self,
        a: &MemoryTile,
        b: &MemoryTile,
        c: &MemoryTile,
        n_rows_b: usize,
        n_cols_b: usize,
        n_cols_c: usize,
        b_op: MatrixOperation,
        c_op: MatrixOperation,
        alpha: f64,
        beta: f64,
    ) -> Result<()> {
        // blocks of the stored operands whose op() is the requested block
        let (br, bc) = b_op.apply(n_rows_b, n_cols_b);
        let (cr, cc) = c_op.apply(n_cols_b, n_cols_c);
        let a = a.sub_tile(0, n_rows_b, 0, n_cols_c);
        let b = b.sub_tile(0, br, 0, bc);
        let c = c.sub_tile(0, cr, 0, cc);
        unsafe { self.multiply(&a, &b, &c, b_op, c_op, alpha, beta) }
    }

    unsafe fn dot(
        &self,
        y: &MemoryBuffer,
        a: &MemoryTile,
        x: &MemoryBuffer,
        a_op: MatrixOperation,
        alpha: f64,
        beta: f64,
    ) -> Result<()> {
        with_element!(y, "dot", |T| {
            let (yr, at, xr) = unsafe { (Raw::<T>::new(y), RawTile::<T>::new(a), Raw::<T>::new(x)) };
            let (alpha, beta) = (T::from_f64(alpha), T::from_f64(beta));
            (0..yr.len())
                .into_par_iter()
                .with_min_len((MIN_CHUNK / xr.len().max(1)).max(1))
                .for_each(|i| kernels::gemv_row(yr, at, xr, a_op, alpha, beta, i));
            Ok(())
        })
    }

    unsafe fn kronecker_product(&self, a: &MemoryTile, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(a, "kronecker_product", |T| {
            let (at, xr, yr) = unsafe { (RawTile::<T>::new(a), Raw::<T>::new(x), Raw::<T>::new(y)) };
            let alpha = T::from_f64(alpha);
            par_columns(&at, |j| {
                let yj = alpha.wrapping_mul(yr.get(j));
                for i in 0..at.rows {
                    at.set(i, j, xr.get(i).mul_plus(yj, at.get(i, j)));
                }
            });
            Ok(())
        })
    }

    unsafe fn batched_transposed_kronecker_product(
        &self,
        t: &MemoryCube,
        x: &MemoryTile,
        y: &MemoryTile,
        alpha: f64,
    ) -> Result<()> {
        for k in 0..t.n_cubes {
            unsafe { self.kronecker_product(&t.slice(k), &x.column(k), &y.column(k), alpha)? };
        }
        Ok(())
    }

    unsafe fn cumulative_row_sum(&self, a: &MemoryTile) -> Result<()> {
        with_element!(a, "cumulative_row_sum", |T| {
            let at = unsafe { RawTile::<T>::new(a) };
            // rows are independent; each task walks one row across all columns
            (0..at.rows).into_par_iter().for_each(|i| {
                for j in 1..at.cols {
                    at.set(i, j, at.get(i, j - 1).wrapping_add(at.get(i, j)));
                }
            });
            Ok(())
        })
    }

    unsafe fn solve(
        &self,
        a: &MemoryTile,
        b: &MemoryTile,
        a_op: MatrixOperation,
        solver: LinearSystemSolverType,
    ) -> Result<()> {
        with_real!(a, "solve", |T| {
            let (at, bt) = unsafe { (RawTile::<T>::new(a), RawTile::<T>::new(b)) };
            let mut staged;
            let factor = if a_op.is_transposed() {
                let (data, rows, cols) = materialize(at, a_op);
                staged = data;
                unsafe { RawTile::from_vec(&mut staged, rows, cols) }
            } else {
                at
            };
            match solver {
                LinearSystemSolverType::Lu => linalg::lu_solve(factor, bt),
                LinearSystemSolverType::Qr => linalg::qr_solve(factor, bt),
            }
            .map_err(|failure| failure.into_error(self.name()))
        })
    }

    unsafe fn arg_abs_min(&self, x: &MemoryBuffer) -> Result<usize> {
        unsafe { REFERENCE.arg_abs_min(x) }
    }

    unsafe fn arg_abs_max(&self, x: &MemoryBuffer) -> Result<usize> {
        unsafe { REFERENCE.arg_abs_max(x) }
    }

    unsafe fn column_wise_arg_abs_min(&self, out: &MemoryBuffer, a: &MemoryTile) -> Result<()> {
        unsafe { REFERENCE.column_wise_arg_abs_min(out, a) }
    }

    unsafe fn column_wise_arg_abs_max(&self, out: &MemoryBuffer, a: &MemoryTile) -> Result<()> {
        unsafe { REFERENCE.column_wise_arg_abs_max(out, a) }
    }

    unsafe fn euclidean_norm(&self, x: &MemoryBuffer) -> Result<f64> {
        with_real!(x, "euclidean_norm", |T| {
            let xr = unsafe { Raw::<T>::new(x) };
            let squares: f64 = (0..xr.len())
                .into_par_iter()
                .with_min_len(MIN_CHUNK)
                .map(|i| {
                    let v = xr.get(i).to_f64();
                    v * v
                })
                .sum();
            Ok(squares.sqrt())
        })
    }

    unsafe fn sum(&self, x: &MemoryBuffer) -> Result<f64> {
        with_element!(x, "sum", |T| {
            let xr = unsafe { Raw::<T>::new(x) };
            Ok((0..xr.len())
                .into_par_iter()
                .with_min_len(MIN_CHUNK)
                .map(|i| xr.get(i).to_f64())
                .sum())
        })
    }

    unsafe fn min(&self, x: &MemoryBuffer) -> Result<f64> {
        unsafe { REFERENCE.min(x) }
    }

    unsafe fn max(&self, x: &MemoryBuffer) -> Result<f64> {
        unsafe { REFERENCE.max(x) }
    }

    unsafe fn abs_min(&self, x: &MemoryBuffer) -> Result<f64> {
        unsafe { REFERENCE.abs_min(x) }
    }

    unsafe fn abs_max(&self, x: &MemoryBuffer) -> Result<f64> {
        unsafe { REFERENCE.abs_max(x) }
    }

    unsafe fn sparse_add(&self, z: &MemoryBuffer, x: &SparseMemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
        unsafe { REFERENCE.sparse_add(z, x, y, alpha) }
    }

    unsafe fn sparse_dot(
        &self,
        y: &MemoryBuffer,
        a: &SparseMemoryTile,
        x: &MemoryBuffer,
        a_op: MatrixOperation,
        alpha: f64,
        beta: f64,
    ) -> Result<()> {
        unsafe { REFERENCE.sparse_dot(y, a, x, a_op, alpha, beta) }
    }

    unsafe fn sparse_multiply(
        &self,
        a: &MemoryTile,
        b: &SparseMemoryTile,
        c: &MemoryTile,
        b_op: MatrixOperation,
        alpha: f64,
        beta: f64,
    ) -> Result<()> {
        unsafe { REFERENCE.sparse_multiply(a, b, c, b_op, alpha, beta) }
    }
}
