//! Scalar reference backend.
//!
//! Serves [`MemorySpace::Test`](crate::space::MemorySpace::Test). Every
//! operation is a plain loop from [`super::kernels`], which makes this the
//! ground truth the other backends are compared against.
//!
//! Transposed operands are not handled by `sub_multiply`, `batched_multiply`
//! or `solve`; those combinations report [`Error::Unsupported`].

use super::kernels::{self, Extreme, Raw, RawCsr, RawTile};
use super::linalg;
use super::{LinearSystemSolverType, MatrixOperation};
use crate::alloc::{generic_alloc, generic_free, host_copy, host_download, host_upload};
use crate::backend::Backend;
use crate::descriptor::{MemoryBuffer, MemoryCube, MemoryTile, SparseMemoryBuffer, SparseMemoryTile};
use crate::domain::Element;
use crate::error::{Error, Result};

/// Single-threaded scalar backend.
#[derive(Debug, Default)]
pub struct ReferenceBackend;

/// The instance serving `MemorySpace::Test`.
pub static REFERENCE: ReferenceBackend = ReferenceBackend;

fn transposed(ops: &[MatrixOperation]) -> bool {
    ops.iter().any(|op| op.is_transposed())
}

impl Backend for ReferenceBackend {
    fn name(&self) -> &'static str {
        "reference"
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
            kernels::fill::<T>(unsafe { Raw::new(z) }, T::from_f64(value));
            Ok(())
        })
    }

    unsafe fn lin_space(&self, z: &MemoryBuffer, x0: f64, x1: f64) -> Result<()> {
        with_element!(z, "lin_space", |T| {
            kernels::lin_space::<T>(unsafe { Raw::new(z) }, x0, x1);
            Ok(())
        })
    }

    unsafe fn random_uniform(&self, z: &MemoryBuffer, seed: u64) -> Result<()> {
        with_real!(z, "random_uniform", |T| {
            kernels::random_uniform::<T>(unsafe { Raw::new(z) }, seed);
            Ok(())
        })
    }

    unsafe fn random_gaussian(&self, z: &MemoryBuffer, seed: u64) -> Result<()> {
        with_real!(z, "random_gaussian", |T| {
            kernels::random_gaussian::<T>(unsafe { Raw::new(z) }, seed);
            Ok(())
        })
    }

    unsafe fn eye(&self, a: &MemoryTile) -> Result<()> {
        with_element!(a, "eye", |T| {
            kernels::eye::<T>(unsafe { RawTile::new(a) });
            Ok(())
        })
    }

    unsafe fn add(&self, z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(z, "add", |T| {
            unsafe { kernels::add::<T>(Raw::new(z), Raw::new(x), Raw::new(y), T::from_f64(alpha)) };
            Ok(())
        })
    }

    unsafe fn subtract(&self, z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer) -> Result<()> {
        with_element!(z, "subtract", |T| {
            unsafe { kernels::subtract::<T>(Raw::new(z), Raw::new(x), Raw::new(y)) };
            Ok(())
        })
    }

    unsafe fn add_equal(&self, z: &MemoryBuffer, x: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(z, "add_equal", |T| {
            unsafe { kernels::add_equal::<T>(Raw::new(z), Raw::new(x), T::from_f64(alpha)) };
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
        with_element!(a, "add_equal_matrix", |T| {
            unsafe {
                kernels::add_equal_matrix::<T>(
                    RawTile::new(a),
                    RawTile::new(b),
                    a_op,
                    b_op,
                    T::from_f64(alpha),
                    T::from_f64(beta),
                )
            };
            Ok(())
        })
    }

    unsafe fn add_broadcast(&self, a: &MemoryTile, x: &MemoryBuffer, row_wise: bool, alpha: f64) -> Result<()> {
        with_element!(a, "add_broadcast", |T| {
            unsafe { kernels::add_broadcast::<T>(RawTile::new(a), Raw::new(x), row_wise, T::from_f64(alpha)) };
            Ok(())
        })
    }

    unsafe fn scale(&self, z: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(z, "scale", |T| {
            kernels::scale::<T>(unsafe { Raw::new(z) }, T::from_f64(alpha));
            Ok(())
        })
    }

    unsafe fn scale_columns(&self, a: &MemoryTile, alpha: &MemoryBuffer) -> Result<()> {
        with_element!(a, "scale_columns", |T| {
            unsafe { kernels::scale_columns::<T>(RawTile::new(a), Raw::new(alpha)) };
            Ok(())
        })
    }

    unsafe fn elementwise_product(&self, z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(z, "elementwise_product", |T| {
            unsafe {
                kernels::elementwise_product::<T>(Raw::new(z), Raw::new(x), Raw::new(y), T::from_f64(alpha))
            };
            Ok(())
        })
    }

    unsafe fn elementwise_division(&self, z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(z, "elementwise_division", |T| {
            unsafe {
                kernels::elementwise_division::<T>(Raw::new(z), Raw::new(x), Raw::new(y), T::from_f64(alpha))
            };
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
            unsafe {
                kernels::gemm::<T>(
                    RawTile::new(a),
                    RawTile::new(b),
                    RawTile::new(c),
                    b_op,
                    c_op,
                    T::from_f64(alpha),
                    T::from_f64(beta),
                )
            };
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
        if transposed(&[b_op, c_op]) {
            return Err(Error::unsupported("sub_multiply", a.memory_space, a.math_domain));
        }
        let a = a.sub_tile(0, n_rows_b, 0, n_cols_c);
        let b = b.sub_tile(0, n_rows_b, 0, n_cols_b);
        let c = c.sub_tile(0, n_cols_b, 0, n_cols_c);
        unsafe { self.multiply(&a, &b, &c, b_op, c_op, alpha, beta) }
    }

    unsafe fn batched_multiply(
        &self,
        a: &MemoryCube,
        b: &MemoryCube,
        c: &MemoryCube,
        b_op: MatrixOperation,
        c_op: MatrixOperation,
        alpha: f64,
        beta: f64,
    ) -> Result<()> {
        if transposed(&[b_op, c_op]) {
            return Err(Error::unsupported("batched_multiply", a.memory_space, a.math_domain));
        }
        for k in 0..a.n_cubes {
            unsafe { self.multiply(&a.slice(k), &b.slice(k), &c.slice(k), b_op, c_op, alpha, beta)? };
        }
        Ok(())
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
            unsafe {
                kernels::gemv::<T>(
                    Raw::new(y),
                    RawTile::new(a),
                    Raw::new(x),
                    a_op,
                    T::from_f64(alpha),
                    T::from_f64(beta),
                )
            };
            Ok(())
        })
    }

    unsafe fn kronecker_product(&self, a: &MemoryTile, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(a, "kronecker_product", |T| {
            unsafe { kernels::ger::<T>(RawTile::new(a), Raw::new(x), Raw::new(y), T::from_f64(alpha)) };
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
            kernels::cumulative_row_sum::<T>(unsafe { RawTile::new(a) });
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
        if a_op.is_transposed() {
            return Err(Error::unsupported("solve", a.memory_space, a.math_domain));
        }
        with_real!(a, "solve", |T| {
            let (a, b) = unsafe { (RawTile::<T>::new(a), RawTile::<T>::new(b)) };
            match solver {
                LinearSystemSolverType::Lu => linalg::lu_solve(a, b),
                LinearSystemSolverType::Qr => linalg::qr_solve(a, b),
            }
            .map_err(|failure| failure.into_error(self.name()))
        })
    }

    unsafe fn arg_abs_min(&self, x: &MemoryBuffer) -> Result<usize> {
        with_element!(x, "arg_abs_min", |T| Ok(kernels::arg_abs::<T>(
            unsafe { Raw::new(x) },
            Extreme::Min
        )))
    }

    unsafe fn arg_abs_max(&self, x: &MemoryBuffer) -> Result<usize> {
        with_element!(x, "arg_abs_max", |T| Ok(kernels::arg_abs::<T>(
            unsafe { Raw::new(x) },
            Extreme::Max
        )))
    }

    unsafe fn column_wise_arg_abs_min(&self, out: &MemoryBuffer, a: &MemoryTile) -> Result<()> {
        with_element!(a, "column_wise_arg_abs_min", |T| {
            unsafe { kernels::column_wise_arg_abs::<T>(Raw::new(out), RawTile::new(a), Extreme::Min) };
            Ok(())
        })
    }

    unsafe fn column_wise_arg_abs_max(&self, out: &MemoryBuffer, a: &MemoryTile) -> Result<()> {
        with_element!(a, "column_wise_arg_abs_max", |T| {
            unsafe { kernels::column_wise_arg_abs::<T>(Raw::new(out), RawTile::new(a), Extreme::Max) };
            Ok(())
        })
    }

    unsafe fn euclidean_norm(&self, x: &MemoryBuffer) -> Result<f64> {
        with_real!(x, "euclidean_norm", |T| Ok(kernels::euclidean_norm::<T>(unsafe { Raw::new(x) })))
    }

    unsafe fn sum(&self, x: &MemoryBuffer) -> Result<f64> {
        with_element!(x, "sum", |T| Ok(kernels::sum::<T>(unsafe { Raw::new(x) })))
    }

    unsafe fn min(&self, x: &MemoryBuffer) -> Result<f64> {
        with_element!(x, "min", |T| Ok(kernels::extreme::<T>(unsafe { Raw::new(x) }, Extreme::Min, false)))
    }

    unsafe fn max(&self, x: &MemoryBuffer) -> Result<f64> {
        with_element!(x, "max", |T| Ok(kernels::extreme::<T>(unsafe { Raw::new(x) }, Extreme::Max, false)))
    }

    unsafe fn abs_min(&self, x: &MemoryBuffer) -> Result<f64> {
        with_element!(x, "abs_min", |T| Ok(kernels::extreme::<T>(unsafe { Raw::new(x) }, Extreme::Min, true)))
    }

    unsafe fn abs_max(&self, x: &MemoryBuffer) -> Result<f64> {
        with_element!(x, "abs_max", |T| Ok(kernels::extreme::<T>(unsafe { Raw::new(x) }, Extreme::Max, true)))
    }

    unsafe fn sparse_add(&self, z: &MemoryBuffer, x: &SparseMemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
        with_element!(x, "sparse_add", |T| {
            unsafe {
                kernels::sparse_add::<T>(
                    Raw::new(z),
                    Raw::new(&x.values()),
                    Raw::new(&x.indices()),
                    Raw::new(y),
                    T::from_f64(alpha),
                )
            };
            Ok(())
        })
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
        with_element!(a, "sparse_dot", |T| {
            unsafe {
                kernels::csrmv::<T>(
                    Raw::new(y),
                    RawCsr::new(a),
                    Raw::new(x),
                    a_op,
                    T::from_f64(alpha),
                    T::from_f64(beta),
                )
            };
            Ok(())
        })
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
        with_element!(b, "sparse_multiply", |T| {
            unsafe {
                kernels::csrmm::<T>(
                    RawTile::new(a),
                    RawCsr::new(b),
                    RawTile::new(c),
                    b_op,
                    T::from_f64(alpha),
                    T::from_f64(beta),
                )
            };
            Ok(())
        })
    }
}
