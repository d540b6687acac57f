//! Operation Dispatch Layer
//!
//! Every primitive is exposed here as a function over descriptors. Each one:
//!
//! 1. Asserts operand compatibility: one memory space, one math domain, and
//!    the sizes / leading dimensions the operation requires.
//! 2. Selects the backend serving that memory space.
//! 3. Forwards, returning [`Error::Unsupported`](crate::Error::Unsupported)
//!    when the backend has no implementation for the domain.
//!
//! Mismatched operands are programmer errors and panic. Nothing here
//! silently does nothing.
//!
//! A few operations are composed here from simpler ones plus scratch memory
//! that is freed before returning: [`row_wise_sum`] (a vector of ones and a
//! GEMV), [`solve`] (a copy of the left-hand side, which the factorization
//! destroys) and [`invert`] (an identity right-hand side).
//!
//! # Safety
//! All operand descriptors must describe live memory of their declared shape
//! for the duration of the call. The typed [`crate::buffer`] layer is the safe
//! front end.
//!
//! # Example
//! ```rust
//! use memtile::{MemorySpace, Vector};
//!
//! let x = Vector::from_host(&[1.0f64, 2.0, 3.0], MemorySpace::Test).unwrap();
//! let y = Vector::from_host(&[10.0f64, 20.0, 30.0], MemorySpace::Test).unwrap();
//! let mut z = Vector::<f64>::zeros(3, MemorySpace::Test).unwrap();
//! z.add(&x, &y, 2.0).unwrap(); // forwards to ops::dispatch::add
//! assert_eq!(z.get().unwrap(), vec![12.0, 24.0, 36.0]);
//! ```

use crate::alloc;
use crate::backend::{Backend, backend_for};
use crate::descriptor::{
    Descriptor, MemoryBuffer, MemoryCube, MemoryTile, SparseMemoryBuffer, SparseMemoryTile,
};
use crate::domain::MathDomain;
use crate::error::Result;
use crate::ops::{LinearSystemSolverType, MatrixOperation};
use crate::space::MemorySpace;
use tracing::error;

/// Asserts that every operand shares the first one's space and domain.
#[track_caller]
fn compatible(operation: &str, first: &MemoryBuffer, rest: &[MemoryBuffer]) {
    for other in rest {
        assert_eq!(
            first.memory_space, other.memory_space,
            "{operation}: operands live in different memory spaces"
        );
        assert_eq!(
            first.math_domain, other.math_domain,
            "{operation}: operands have different math domains"
        );
    }
}

#[track_caller]
fn same_size(operation: &str, expected: usize, actual: usize) {
    assert_eq!(expected, actual, "{operation}: size mismatch");
}

fn backend(operation: &'static str, probe: &MemoryBuffer) -> Result<&'static dyn Backend> {
    backend_for(probe.memory_space, operation, probe.math_domain)
}

/// Transient buffer freed on drop.
struct Scratch(MemoryBuffer);

impl Scratch {
    fn new(size: usize, memory_space: MemorySpace, math_domain: MathDomain) -> Result<Self> {
        let mut buffer = MemoryBuffer::unbound(size, memory_space, math_domain);
        alloc::alloc(&mut buffer)?;
        Ok(Self(buffer))
    }

    fn tile(&self, rows: usize, cols: usize) -> MemoryTile {
        self.0.as_tile(rows, cols)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if let Err(e) = alloc::free(&mut self.0) {
            error!(error = %e, "failed to release scratch buffer");
        }
    }
}

/// Copies `source` into `dest` column by column; both must have the same shape.
unsafe fn copy_tile(dest: &MemoryTile, source: &MemoryTile) -> Result<()> {
    if dest.is_contiguous() && source.is_contiguous() {
        return unsafe { alloc::copy(&dest.header(), &source.header()) };
    }
    for j in 0..source.n_cols {
        unsafe { alloc::copy(&dest.column(j), &source.column(j))? };
    }
    Ok(())
}

/// Blocks until every queued operation on `space` has finished.
///
/// Backends that run asynchronously report deferred faults here.
pub fn synchronize(space: MemorySpace) -> Result<()> {
    backend_for(space, "synchronize", MathDomain::Null)?.synchronize()
}

// ---------------------------------------------------------------------------
// fills

/// `z[i] = value`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn initialize(z: &MemoryBuffer, value: f64) -> Result<()> {
    unsafe { backend("initialize", z)?.initialize(z, value) }
}

/// `n` evenly spaced values from `x0` to `x1` inclusive.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn lin_space(z: &MemoryBuffer, x0: f64, x1: f64) -> Result<()> {
    unsafe { backend("lin_space", z)?.lin_space(z, x0, x1) }
}

/// Uniform samples in `[0, 1)`, reproducible for a given `seed`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn random_uniform(z: &MemoryBuffer, seed: u64) -> Result<()> {
    unsafe { backend("random_uniform", z)?.random_uniform(z, seed) }
}

/// Standard normal samples, reproducible for a given `seed`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn random_gaussian(z: &MemoryBuffer, seed: u64) -> Result<()> {
    unsafe { backend("random_gaussian", z)?.random_gaussian(z, seed) }
}

/// Ones on the diagonal, zeros elsewhere.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn eye(a: &MemoryTile) -> Result<()> {
    unsafe { backend("eye", &a.header())?.eye(a) }
}

// ---------------------------------------------------------------------------
// elementwise

/// `z = alpha * x + y`.
///
/// # Panics
/// If the operands differ in space, domain or size.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn add(z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
    compatible("add", z, &[*x, *y]);
    same_size("add", z.size, x.size);
    same_size("add", z.size, y.size);
    unsafe { backend("add", z)?.add(z, x, y, alpha) }
}

/// `z = x - y`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn subtract(z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer) -> Result<()> {
    compatible("subtract", z, &[*x, *y]);
    same_size("subtract", z.size, x.size);
    same_size("subtract", z.size, y.size);
    unsafe { backend("subtract", z)?.subtract(z, x, y) }
}

/// `z += alpha * x`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn add_equal(z: &MemoryBuffer, x: &MemoryBuffer, alpha: f64) -> Result<()> {
    compatible("add_equal", z, &[*x]);
    same_size("add_equal", z.size, x.size);
    unsafe { backend("add_equal", z)?.add_equal(z, x, alpha) }
}

/// `A = alpha * op(A) + beta * op(B)`.
///
/// # Panics
/// If `op(A)` or `op(B)` does not have the shape of `A`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn add_equal_matrix(
    a: &MemoryTile,
    b: &MemoryTile,
    a_op: MatrixOperation,
    b_op: MatrixOperation,
    alpha: f64,
    beta: f64,
) -> Result<()> {
    compatible("add_equal_matrix", &a.header(), &[b.header()]);
    let shape = (a.n_rows, a.n_cols);
    assert_eq!(a_op.apply(a.n_rows, a.n_cols), shape, "add_equal_matrix: op(A) must keep the shape of A");
    assert_eq!(b_op.apply(b.n_rows, b.n_cols), shape, "add_equal_matrix: op(B) must have the shape of A");
    unsafe { backend("add_equal_matrix", &a.header())?.add_equal_matrix(a, b, a_op, b_op, alpha, beta) }
}

/// Adds `alpha * x` to every row of `A` when `row_wise` (`x` has one entry
/// per column), otherwise to every column (`x` has one entry per row).
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn add_broadcast(a: &MemoryTile, x: &MemoryBuffer, row_wise: bool, alpha: f64) -> Result<()> {
    compatible("add_broadcast", &a.header(), &[*x]);
    let expected = if row_wise { a.n_cols } else { a.n_rows };
    same_size("add_broadcast", expected, x.size);
    unsafe { backend("add_broadcast", &a.header())?.add_broadcast(a, x, row_wise, alpha) }
}

/// `z *= alpha`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn scale(z: &MemoryBuffer, alpha: f64) -> Result<()> {
    unsafe { backend("scale", z)?.scale(z, alpha) }
}

/// Scales column `j` of `A` by `alpha[j]`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn scale_columns(a: &MemoryTile, alpha: &MemoryBuffer) -> Result<()> {
    compatible("scale_columns", &a.header(), &[*alpha]);
    same_size("scale_columns", a.n_cols, alpha.size);
    unsafe { backend("scale_columns", &a.header())?.scale_columns(a, alpha) }
}

/// `z = alpha * x ∘ y`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn elementwise_product(z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
    compatible("elementwise_product", z, &[*x, *y]);
    same_size("elementwise_product", z.size, x.size);
    same_size("elementwise_product", z.size, y.size);
    unsafe { backend("elementwise_product", z)?.elementwise_product(z, x, y, alpha) }
}

/// `z = alpha * x / y`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn elementwise_division(z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
    compatible("elementwise_division", z, &[*x, *y]);
    same_size("elementwise_division", z.size, x.size);
    same_size("elementwise_division", z.size, y.size);
    unsafe { backend("elementwise_division", z)?.elementwise_division(z, x, y, alpha) }
}

// ---------------------------------------------------------------------------
// matrix

#[track_caller]
fn check_product(operation: &str, a: (usize, usize), b: (usize, usize), c: (usize, usize)) {
    assert_eq!(b.1, c.0, "{operation}: inner dimensions differ ({}x{} * {}x{})", b.0, b.1, c.0, c.1);
    assert_eq!(a, (b.0, c.1), "{operation}: output is {}x{}, product is {}x{}", a.0, a.1, b.0, c.1);
}

/// `A = alpha * op(B) * op(C) + beta * A`.
///
/// With `beta == 0` the previous contents of `A` are never read.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn multiply(
    a: &MemoryTile,
    b: &MemoryTile,
    c: &MemoryTile,
    b_op: MatrixOperation,
    c_op: MatrixOperation,
    alpha: f64,
    beta: f64,
) -> Result<()> {
    compatible("multiply", &a.header(), &[b.header(), c.header()]);
    check_product(
        "multiply",
        (a.n_rows, a.n_cols),
        b_op.apply(b.n_rows, b.n_cols),
        c_op.apply(c.n_rows, c.n_cols),
    );
    unsafe { backend("multiply", &a.header())?.multiply(a, b, c, b_op, c_op, alpha, beta) }
}

/// [`multiply`] on leading blocks: the `n_rows_b × n_cols_b` block of `op(B)`
/// times the `n_cols_b × n_cols_c` block of `op(C)` into the
/// `n_rows_b × n_cols_c` block of `A`.
///
/// # Safety
/// See the [module documentation](self).
#[allow(clippy::too_many_arguments)]
pub unsafe fn sub_multiply(
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
    compatible("sub_multiply", &a.header(), &[b.header(), c.header()]);
    let (b_rows, b_cols) = b_op.apply(b.n_rows, b.n_cols);
    let (c_rows, c_cols) = c_op.apply(c.n_rows, c.n_cols);
    assert!(
        n_rows_b <= b_rows && n_cols_b <= b_cols && n_cols_b <= c_rows && n_cols_c <= c_cols,
        "sub_multiply: block exceeds its operand"
    );
    assert!(
        n_rows_b <= a.n_rows && n_cols_c <= a.n_cols,
        "sub_multiply: block exceeds the output"
    );
    unsafe {
        backend("sub_multiply", &a.header())?
            .sub_multiply(a, b, c, n_rows_b, n_cols_b, n_cols_c, b_op, c_op, alpha, beta)
    }
}

/// [`multiply`] on every slice of three cubes.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn batched_multiply(
    a: &MemoryCube,
    b: &MemoryCube,
    c: &MemoryCube,
    b_op: MatrixOperation,
    c_op: MatrixOperation,
    alpha: f64,
    beta: f64,
) -> Result<()> {
    compatible("batched_multiply", &a.header(), &[b.header(), c.header()]);
    assert!(
        a.n_cubes == b.n_cubes && a.n_cubes == c.n_cubes,
        "batched_multiply: cubes hold different numbers of slices"
    );
    check_product(
        "batched_multiply",
        (a.n_rows, a.n_cols),
        b_op.apply(b.n_rows, b.n_cols),
        c_op.apply(c.n_rows, c.n_cols),
    );
    unsafe { backend("batched_multiply", &a.header())?.batched_multiply(a, b, c, b_op, c_op, alpha, beta) }
}

/// `y = alpha * op(A) * x + beta * y`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn dot(
    y: &MemoryBuffer,
    a: &MemoryTile,
    x: &MemoryBuffer,
    a_op: MatrixOperation,
    alpha: f64,
    beta: f64,
) -> Result<()> {
    compatible("dot", y, &[a.header(), *x]);
    let (rows, cols) = a_op.apply(a.n_rows, a.n_cols);
    same_size("dot", cols, x.size);
    same_size("dot", rows, y.size);
    unsafe { backend("dot", y)?.dot(y, a, x, a_op, alpha, beta) }
}

/// `A += alpha * x * yᵀ`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn kronecker_product(a: &MemoryTile, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
    compatible("kronecker_product", &a.header(), &[*x, *y]);
    same_size("kronecker_product", a.n_rows, x.size);
    same_size("kronecker_product", a.n_cols, y.size);
    unsafe { backend("kronecker_product", &a.header())?.kronecker_product(a, x, y, alpha) }
}

/// `T_k += alpha * x[:, k] * y[:, k]ᵀ` for every slice `k` of `t`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn batched_transposed_kronecker_product(
    t: &MemoryCube,
    x: &MemoryTile,
    y: &MemoryTile,
    alpha: f64,
) -> Result<()> {
    compatible("batched_transposed_kronecker_product", &t.header(), &[x.header(), y.header()]);
    assert_eq!(
        (x.n_rows, x.n_cols),
        (t.n_rows, t.n_cubes),
        "batched_transposed_kronecker_product: x must be rows x slices"
    );
    assert_eq!(
        (y.n_rows, y.n_cols),
        (t.n_cols, t.n_cubes),
        "batched_transposed_kronecker_product: y must be cols x slices"
    );
    unsafe {
        backend("batched_transposed_kronecker_product", &t.header())?
            .batched_transposed_kronecker_product(t, x, y, alpha)
    }
}

/// Running sum along each row, in place.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn cumulative_row_sum(a: &MemoryTile) -> Result<()> {
    unsafe { backend("cumulative_row_sum", &a.header())?.cumulative_row_sum(a) }
}

/// `out[i] = sum_j A(i, j)`, as `A * ones`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn row_wise_sum(out: &MemoryBuffer, a: &MemoryTile) -> Result<()> {
    compatible("row_wise_sum", out, &[a.header()]);
    same_size("row_wise_sum", a.n_rows, out.size);
    let backend = backend("row_wise_sum", out)?;
    let ones = Scratch::new(a.n_cols, a.memory_space, a.math_domain)?;
    unsafe {
        backend.initialize(&ones.0, 1.0)?;
        backend.dot(out, a, &ones.0, MatrixOperation::None, 1.0, 0.0)
    }
}

/// `B = op(A)⁻¹ B`, or the least-squares solution for a tall `op(A)` with QR.
///
/// `A` is left untouched: the factorization runs on a scratch copy.
///
/// # Panics
/// If `op(A)` is not square (LU) or wider than tall (QR), or if `B` does not
/// have as many rows as `op(A)`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn solve(
    a: &MemoryTile,
    b: &MemoryTile,
    a_op: MatrixOperation,
    solver: LinearSystemSolverType,
) -> Result<()> {
    compatible("solve", &a.header(), &[b.header()]);
    let (rows, cols) = a_op.apply(a.n_rows, a.n_cols);
    match solver {
        LinearSystemSolverType::Lu => assert_eq!(rows, cols, "solve: LU needs a square matrix"),
        LinearSystemSolverType::Qr => assert!(rows >= cols, "solve: QR needs at least as many rows as columns"),
    }
    same_size("solve", rows, b.n_rows);

    let backend = backend("solve", &a.header())?;
    let scratch = Scratch::new(a.size, a.memory_space, a.math_domain)?;
    let copy = scratch.tile(a.n_rows, a.n_cols);
    unsafe {
        copy_tile(&copy, a)?;
        backend.solve(&copy, b, a_op, solver)
    }
}

/// `A = op(A)⁻¹`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn invert(a: &MemoryTile, a_op: MatrixOperation, solver: LinearSystemSolverType) -> Result<()> {
    assert!(a.is_square(), "invert: matrix must be square");
    let n = a.n_rows;
    let identity = Scratch::new(a.size, a.memory_space, a.math_domain)?;
    let inverse = identity.tile(n, n);
    unsafe {
        backend("invert", &a.header())?.eye(&inverse)?;
        solve(a, &inverse, a_op, solver)?;
        copy_tile(a, &inverse)
    }
}

// ---------------------------------------------------------------------------
// reductions

#[track_caller]
fn non_empty(operation: &str, x: &MemoryBuffer) {
    assert!(x.size > 0, "{operation}: empty buffer");
}

/// 0-based position of the smallest `|x[i]|`; the first one on ties.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn arg_abs_min(x: &MemoryBuffer) -> Result<usize> {
    non_empty("arg_abs_min", x);
    unsafe { backend("arg_abs_min", x)?.arg_abs_min(x) }
}

/// 0-based position of the largest `|x[i]|`; the first one on ties.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn arg_abs_max(x: &MemoryBuffer) -> Result<usize> {
    non_empty("arg_abs_max", x);
    unsafe { backend("arg_abs_max", x)?.arg_abs_max(x) }
}

#[track_caller]
fn check_column_wise(operation: &str, out: &MemoryBuffer, a: &MemoryTile) {
    assert_eq!(out.memory_space, a.memory_space, "{operation}: operands live in different memory spaces");
    assert_eq!(out.math_domain, MathDomain::Int32, "{operation}: indices are written as Int32");
    same_size(operation, a.n_cols, out.size);
    assert!(a.n_rows > 0, "{operation}: empty columns");
}

/// 1-based [`arg_abs_min`] of every column of `A`, written to an `Int32` buffer.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn column_wise_arg_abs_min(out: &MemoryBuffer, a: &MemoryTile) -> Result<()> {
    check_column_wise("column_wise_arg_abs_min", out, a);
    unsafe { backend("column_wise_arg_abs_min", &a.header())?.column_wise_arg_abs_min(out, a) }
}

/// 1-based [`arg_abs_max`] of every column of `A`, written to an `Int32` buffer.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn column_wise_arg_abs_max(out: &MemoryBuffer, a: &MemoryTile) -> Result<()> {
    check_column_wise("column_wise_arg_abs_max", out, a);
    unsafe { backend("column_wise_arg_abs_max", &a.header())?.column_wise_arg_abs_max(out, a) }
}

/// # Safety
/// See the [module documentation](self).
pub unsafe fn euclidean_norm(x: &MemoryBuffer) -> Result<f64> {
    unsafe { backend("euclidean_norm", x)?.euclidean_norm(x) }
}

/// # Safety
/// See the [module documentation](self).
pub unsafe fn sum(x: &MemoryBuffer) -> Result<f64> {
    unsafe { backend("sum", x)?.sum(x) }
}

/// # Safety
/// See the [module documentation](self).
pub unsafe fn min(x: &MemoryBuffer) -> Result<f64> {
    non_empty("min", x);
    unsafe { backend("min", x)?.min(x) }
}

/// # Safety
/// See the [module documentation](self).
pub unsafe fn max(x: &MemoryBuffer) -> Result<f64> {
    non_empty("max", x);
    unsafe { backend("max", x)?.max(x) }
}

/// Smallest `|x[i]|`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn abs_min(x: &MemoryBuffer) -> Result<f64> {
    non_empty("abs_min", x);
    unsafe { backend("abs_min", x)?.abs_min(x) }
}

/// Largest `|x[i]|`.
///
/// # Safety
/// See the [module documentation](self).
pub unsafe fn abs_max(x: &MemoryBuffer) -> Result<f64> {
    non_empty("abs_max", x);
    unsafe { backend("abs_max", x)?.abs_max(x) }
}

// ---------------------------------------------------------------------------
// sparse

/// `z = alpha * x + y` for a sparse `x`.
///
/// # Safety
/// See the [module documentation](self); the index array of `x` must hold
/// positions below `x.dense_size`.
pub unsafe fn sparse_add(z: &MemoryBuffer, x: &SparseMemoryBuffer, y: &MemoryBuffer, alpha: f64) -> Result<()> {
    compatible("sparse_add", z, &[x.values(), *y]);
    same_size("sparse_add", x.dense_size, z.size);
    same_size("sparse_add", x.dense_size, y.size);
    unsafe { backend("sparse_add", z)?.sparse_add(z, x, y, alpha) }
}

/// `y = alpha * op(A) * x + beta * y` for a CSR `A`.
///
/// # Safety
/// See the [module documentation](self); the CSR arrays of `A` must be
/// well formed.
pub unsafe fn sparse_dot(
    y: &MemoryBuffer,
    a: &SparseMemoryTile,
    x: &MemoryBuffer,
    a_op: MatrixOperation,
    alpha: f64,
    beta: f64,
) -> Result<()> {
    compatible("sparse_dot", y, &[a.values(), *x]);
    let (rows, cols) = a_op.apply(a.n_rows, a.n_cols);
    same_size("sparse_dot", cols, x.size);
    same_size("sparse_dot", rows, y.size);
    unsafe { backend("sparse_dot", y)?.sparse_dot(y, a, x, a_op, alpha, beta) }
}

/// `A = alpha * op(B) * C + beta * A` for a CSR `B`.
///
/// # Safety
/// See the [module documentation](self); the CSR arrays of `B` must be
/// well formed.
pub unsafe fn sparse_multiply(
    a: &MemoryTile,
    b: &SparseMemoryTile,
    c: &MemoryTile,
    b_op: MatrixOperation,
    alpha: f64,
    beta: f64,
) -> Result<()> {
    compatible("sparse_multiply", &a.header(), &[b.values(), c.header()]);
    check_product(
        "sparse_multiply",
        (a.n_rows, a.n_cols),
        b_op.apply(b.n_rows, b.n_cols),
        (c.n_rows, c.n_cols),
    );
    unsafe { backend("sparse_multiply", &a.header())?.sparse_multiply(a, b, c, b_op, alpha, beta) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(size: usize, space: MemorySpace, domain: MathDomain) -> MemoryBuffer {
        let mut buf = MemoryBuffer::unbound(size, space, domain);
        alloc::alloc(&mut buf).unwrap();
        buf
    }

    #[test]
    fn unbacked_space_is_unsupported() {
        let z = MemoryBuffer::new(0x1000, 4, MemorySpace::Mkl, MathDomain::Float64);
        let err = unsafe { scale(&z, 2.0) }.unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    #[should_panic(expected = "different memory spaces")]
    fn mixing_spaces_panics() {
        let z = MemoryBuffer::new(0x1000, 4, MemorySpace::Test, MathDomain::Float64);
        let x = MemoryBuffer::new(0x2000, 4, MemorySpace::Cpu, MathDomain::Float64);
        let _ = unsafe { add_equal(&z, &x, 1.0) };
    }

    #[test]
    fn scratch_is_released() {
        let before = alloc::stats().outstanding();
        let mut a = owned(6, MemorySpace::Test, MathDomain::Float32);
        let mut out = owned(2, MemorySpace::Test, MathDomain::Float32);
        unsafe {
            initialize(&a, 1.5).unwrap();
            row_wise_sum(&out, &a.as_tile(2, 3)).unwrap();
        }
        let mut host = [0.0f32; 2];
        unsafe { alloc::download(&out, crate::domain::as_bytes_mut(&mut host)).unwrap() };
        assert_eq!(host, [4.5, 4.5]);
        alloc::free(&mut a).unwrap();
        alloc::free(&mut out).unwrap();
        assert_eq!(alloc::stats().outstanding(), before);
    }

    #[test]
    fn solve_keeps_the_left_hand_side() {
        let mut a = owned(4, MemorySpace::Cpu, MathDomain::Float64);
        let mut b = owned(2, MemorySpace::Cpu, MathDomain::Float64);
        let lhs = [4.0f64, 0.0, 0.0, 2.0];
        unsafe {
            alloc::upload(&a, crate::domain::as_bytes(&lhs)).unwrap();
            initialize(&b, 8.0).unwrap();
            solve(&a.as_tile(2, 2), &b.as_tile(2, 1), MatrixOperation::None, LinearSystemSolverType::Lu).unwrap();
        }
        let mut after = [0.0f64; 4];
        let mut x = [0.0f64; 2];
        unsafe {
            alloc::download(&a, crate::domain::as_bytes_mut(&mut after)).unwrap();
            alloc::download(&b, crate::domain::as_bytes_mut(&mut x)).unwrap();
        }
        assert_eq!(after, lhs);
        assert_eq!(x, [2.0, 4.0]);
        alloc::free(&mut a).unwrap();
        alloc::free(&mut b).unwrap();
    }
}
