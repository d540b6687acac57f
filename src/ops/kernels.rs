//! Scalar kernels over raw views.
//!
//! These loops are the ground truth every backend is tested against. They
//! read and write through raw pointers element by element, so operands may
//! alias each other (e.g. `z` and `y` in `add`) without creating overlapping
//! Rust references.

use crate::descriptor::{MemoryBuffer, MemoryTile, SparseMemoryTile};
use crate::domain::{Element, Real};
use crate::ops::MatrixOperation;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Raw view of a contiguous run of elements.
#[derive(Debug)]
pub(crate) struct Raw<T> {
    ptr: *mut T,
    len: usize,
}

impl<T> Clone for Raw<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Raw<T> {}

// SAFETY: `Raw` is an address plus a length; the backends partition writes
// across threads so that no element is written by two of them.
unsafe impl<T: Send> Send for Raw<T> {}
unsafe impl<T: Sync> Sync for Raw<T> {}

impl<T: Element> Raw<T> {
    /// # Safety
    /// `buffer` must describe live host memory holding `buffer.size` elements of `T`.
    pub(crate) unsafe fn new(buffer: &MemoryBuffer) -> Self {
        debug_assert_eq!(buffer.math_domain, T::DOMAIN);
        unsafe { Self::from_parts(buffer.pointer as *mut T, buffer.size) }
    }

    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` elements.
    pub(crate) unsafe fn from_parts(ptr: *mut T, len: usize) -> Self {
        Self { ptr, len }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn get(&self, i: usize) -> T {
        debug_assert!(i < self.len, "index {i} out of range for {} elements", self.len);
        // SAFETY: dispatch validated the shapes, validity promised at construction.
        unsafe { self.ptr.add(i).read() }
    }

    #[inline]
    pub(crate) fn set(&self, i: usize, value: T) {
        debug_assert!(i < self.len, "index {i} out of range for {} elements", self.len);
        // SAFETY: dispatch validated the shapes, validity promised at construction.
        unsafe { self.ptr.add(i).write(value) }
    }
}

/// Raw view of a column-major tile.
#[derive(Debug)]
pub(crate) struct RawTile<T> {
    raw: Raw<T>,
    pub rows: usize,
    pub cols: usize,
    pub ld: usize,
}

impl<T> Clone for RawTile<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RawTile<T> {}

impl<T: Element> RawTile<T> {
    /// # Safety
    /// `tile` must describe live host memory of its declared shape.
    pub(crate) unsafe fn new(tile: &MemoryTile) -> Self {
        use crate::descriptor::Descriptor;
        debug_assert_eq!(tile.math_domain, T::DOMAIN);
        let raw = unsafe { Raw::from_parts(tile.pointer as *mut T, tile.footprint()) };
        Self {
            raw,
            rows: tile.n_rows,
            cols: tile.n_cols,
            ld: tile.leading_dimension,
        }
    }

    /// # Safety
    /// `ptr` must be valid for a `rows × cols` tile with leading dimension `rows`.
    pub(crate) unsafe fn from_vec(data: &mut [T], rows: usize, cols: usize) -> Self {
        assert_eq!(data.len(), rows * cols);
        let raw = unsafe { Raw::from_parts(data.as_mut_ptr(), data.len()) };
        Self { raw, rows, cols, ld: rows }
    }

    #[inline]
    pub(crate) fn get(&self, i: usize, j: usize) -> T {
        debug_assert!(i < self.rows && j < self.cols);
        self.raw.get(i + j * self.ld)
    }

    #[inline]
    pub(crate) fn set(&self, i: usize, j: usize, value: T) {
        debug_assert!(i < self.rows && j < self.cols);
        self.raw.set(i + j * self.ld, value);
    }

    /// Element `(i, j)` of `op(self)`.
    #[inline]
    pub(crate) fn get_op(&self, op: MatrixOperation, i: usize, j: usize) -> T {
        match op {
            MatrixOperation::None => self.get(i, j),
            MatrixOperation::Transpose => self.get(j, i),
        }
    }

    /// Shape of `op(self)`.
    pub(crate) fn shape_op(&self, op: MatrixOperation) -> (usize, usize) {
        op.apply(self.rows, self.cols)
    }

    /// Column `j` as a raw run of `rows` elements.
    pub(crate) fn column(&self, j: usize) -> Raw<T> {
        assert!(j < self.cols);
        // SAFETY: the column lies within the tile's footprint.
        unsafe { Raw::from_parts(self.raw.ptr.add(j * self.ld), self.rows) }
    }
}

/// Which extreme an arg-reduction looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Extreme {
    Min,
    Max,
}

impl Extreme {
    /// Whether `candidate` strictly beats `best`; ties keep the earlier index.
    #[inline]
    pub(crate) fn beats(self, candidate: f64, best: f64) -> bool {
        match self {
            Self::Min => candidate < best,
            Self::Max => candidate > best,
        }
    }
}

pub(crate) fn fill<T: Element>(z: Raw<T>, value: T) {
    for i in 0..z.len() {
        z.set(i, value);
    }
}

pub(crate) fn lin_space<T: Element>(z: Raw<T>, x0: f64, x1: f64) {
    let n = z.len();
    let step = if n > 1 { (x1 - x0) / (n - 1) as f64 } else { 0.0 };
    for i in 0..n {
        z.set(i, T::from_f64(x0 + step * i as f64));
    }
}

pub(crate) fn random_uniform<T: Real>(z: Raw<T>, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for i in 0..z.len() {
        z.set(i, T::from_f64(rng.random::<f64>()));
    }
}

pub(crate) fn random_gaussian<T: Real>(z: Raw<T>, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for i in 0..z.len() {
        // Box-Muller; `1 - u` keeps the logarithm finite
        let u1 = 1.0 - rng.random::<f64>();
        let u2 = rng.random::<f64>();
        let sample = (-2.0 * u1.ln()).sqrt() * (2.0 * core::f64::consts::PI * u2).cos();
        z.set(i, T::from_f64(sample));
    }
}

pub(crate) fn eye<T: Element>(a: RawTile<T>) {
    for j in 0..a.cols {
        for i in 0..a.rows {
            a.set(i, j, if i == j { T::ONE } else { T::ZERO });
        }
    }
}

pub(crate) fn add<T: Element>(z: Raw<T>, x: Raw<T>, y: Raw<T>, alpha: T) {
    for i in 0..z.len() {
        z.set(i, alpha.mul_plus(x.get(i), y.get(i)));
    }
}

pub(crate) fn subtract<T: Element>(z: Raw<T>, x: Raw<T>, y: Raw<T>) {
    for i in 0..z.len() {
        z.set(i, x.get(i).wrapping_sub(y.get(i)));
    }
}

pub(crate) fn add_equal<T: Element>(z: Raw<T>, x: Raw<T>, alpha: T) {
    for i in 0..z.len() {
        z.set(i, alpha.mul_plus(x.get(i), z.get(i)));
    }
}

pub(crate) fn scale<T: Element>(z: Raw<T>, alpha: T) {
    for i in 0..z.len() {
        z.set(i, alpha.wrapping_mul(z.get(i)));
    }
}

pub(crate) fn elementwise_product<T: Element>(z: Raw<T>, x: Raw<T>, y: Raw<T>, alpha: T) {
    for i in 0..z.len() {
        z.set(i, alpha.wrapping_mul(x.get(i)).wrapping_mul(y.get(i)));
    }
}

pub(crate) fn elementwise_division<T: Element>(z: Raw<T>, x: Raw<T>, y: Raw<T>, alpha: T) {
    for i in 0..z.len() {
        z.set(i, alpha.wrapping_mul(x.get(i)).wrapping_div(y.get(i)));
    }
}

pub(crate) fn add_equal_matrix<T: Element>(
    a: RawTile<T>,
    b: RawTile<T>,
    a_op: MatrixOperation,
    b_op: MatrixOperation,
    alpha: T,
    beta: T,
) {
    // op(A) may read what an earlier iteration wrote, so stage the result
    let mut staged = Vec::with_capacity(a.rows * a.cols);
    for j in 0..a.cols {
        for i in 0..a.rows {
            staged.push(alpha.mul_plus(a.get_op(a_op, i, j), beta.wrapping_mul(b.get_op(b_op, i, j))));
        }
    }
    for j in 0..a.cols {
        for i in 0..a.rows {
            a.set(i, j, staged[i + j * a.rows]);
        }
    }
}

pub(crate) fn add_broadcast<T: Element>(a: RawTile<T>, x: Raw<T>, row_wise: bool, alpha: T) {
    for j in 0..a.cols {
        for i in 0..a.rows {
            let v = if row_wise { x.get(j) } else { x.get(i) };
            a.set(i, j, alpha.mul_plus(v, a.get(i, j)));
        }
    }
}

pub(crate) fn scale_columns<T: Element>(a: RawTile<T>, alpha: Raw<T>) {
    for j in 0..a.cols {
        let s = alpha.get(j);
        for i in 0..a.rows {
            a.set(i, j, s.wrapping_mul(a.get(i, j)));
        }
    }
}

/// One output column of `A = alpha * op(B) * op(C) + beta * A`.
#[inline]
pub(crate) fn gemm_column<T: Element>(
    a: RawTile<T>,
    b: RawTile<T>,
    c: RawTile<T>,
    b_op: MatrixOperation,
    c_op: MatrixOperation,
    alpha: T,
    beta: T,
    j: usize,
) {
    let inner = b.shape_op(b_op).1;
    for i in 0..a.rows {
        let mut acc = T::ZERO;
        for l in 0..inner {
            acc = b.get_op(b_op, i, l).mul_plus(c.get_op(c_op, l, j), acc);
        }
        let value = if beta == T::ZERO {
            alpha.wrapping_mul(acc)
        } else {
            alpha.mul_plus(acc, beta.wrapping_mul(a.get(i, j)))
        };
        a.set(i, j, value);
    }
}

pub(crate) fn gemm<T: Element>(
    a: RawTile<T>,
    b: RawTile<T>,
    c: RawTile<T>,
    b_op: MatrixOperation,
    c_op: MatrixOperation,
    alpha: T,
    beta: T,
) {
    for j in 0..a.cols {
        gemm_column(a, b, c, b_op, c_op, alpha, beta, j);
    }
}

/// Row `i` of `y = alpha * op(A) * x + beta * y`.
#[inline]
pub(crate) fn gemv_row<T: Element>(
    y: Raw<T>,
    a: RawTile<T>,
    x: Raw<T>,
    a_op: MatrixOperation,
    alpha: T,
    beta: T,
    i: usize,
) {
    let inner = a.shape_op(a_op).1;
    let mut acc = T::ZERO;
    for l in 0..inner {
        acc = a.get_op(a_op, i, l).mul_plus(x.get(l), acc);
    }
    let value = if beta == T::ZERO {
        alpha.wrapping_mul(acc)
    } else {
        alpha.mul_plus(acc, beta.wrapping_mul(y.get(i)))
    };
    y.set(i, value);
}

pub(crate) fn gemv<T: Element>(
    y: Raw<T>,
    a: RawTile<T>,
    x: Raw<T>,
    a_op: MatrixOperation,
    alpha: T,
    beta: T,
) {
    for i in 0..y.len() {
        gemv_row(y, a, x, a_op, alpha, beta, i);
    }
}

pub(crate) fn ger<T: Element>(a: RawTile<T>, x: Raw<T>, y: Raw<T>, alpha: T) {
    for j in 0..a.cols {
        let yj = alpha.wrapping_mul(y.get(j));
        for i in 0..a.rows {
            a.set(i, j, x.get(i).mul_plus(yj, a.get(i, j)));
        }
    }
}

pub(crate) fn cumulative_row_sum<T: Element>(a: RawTile<T>) {
    for j in 1..a.cols {
        for i in 0..a.rows {
            a.set(i, j, a.get(i, j - 1).wrapping_add(a.get(i, j)));
        }
    }
}

/// 0-based position of the extreme `|x[i]|`; 0 for an empty run.
pub(crate) fn arg_abs<T: Element>(x: Raw<T>, extreme: Extreme) -> usize {
    let mut best = 0;
    for i in 1..x.len() {
        if extreme.beats(x.get(i).abs().to_f64(), x.get(best).abs().to_f64()) {
            best = i;
        }
    }
    best
}

pub(crate) fn column_wise_arg_abs<T: Element>(out: Raw<i32>, a: RawTile<T>, extreme: Extreme) {
    for j in 0..a.cols {
        // one-based, matching the BLAS i?amax convention
        out.set(j, arg_abs(a.column(j), extreme) as i32 + 1);
    }
}

pub(crate) fn sum<T: Element>(x: Raw<T>) -> f64 {
    (0..x.len()).map(|i| x.get(i).to_f64()).sum()
}

pub(crate) fn euclidean_norm<T: Element>(x: Raw<T>) -> f64 {
    (0..x.len())
        .map(|i| {
            let v = x.get(i).to_f64();
            v * v
        })
        .sum::<f64>()
        .sqrt()
}

/// Extreme value (or extreme absolute value) of `x`; NaN when `x` is empty.
pub(crate) fn extreme<T: Element>(x: Raw<T>, extreme: Extreme, absolute: bool) -> f64 {
    let mut best = f64::NAN;
    for i in 0..x.len() {
        let v = x.get(i);
        let v = if absolute { v.abs() } else { v }.to_f64();
        if best.is_nan() || extreme.beats(v, best) {
            best = v;
        }
    }
    best
}

pub(crate) fn sparse_add<T: Element>(
    z: Raw<T>,
    values: Raw<T>,
    indices: Raw<i32>,
    y: Raw<T>,
    alpha: T,
) {
    for i in 0..z.len() {
        z.set(i, y.get(i));
    }
    for k in 0..values.len() {
        let i = indices.get(k) as usize;
        z.set(i, alpha.mul_plus(values.get(k), z.get(i)));
    }
}

/// CSR arrays of a sparse matrix.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawCsr<T> {
    pub values: Raw<T>,
    pub columns: Raw<i32>,
    pub offsets: Raw<i32>,
    pub rows: usize,
    pub cols: usize,
}

impl<T: Element> RawCsr<T> {
    /// # Safety
    /// `a` must describe live host CSR arrays of its declared shape.
    pub(crate) unsafe fn new(a: &SparseMemoryTile) -> Self {
        unsafe {
            Self {
                values: Raw::new(&a.values()),
                columns: Raw::new(&a.column_indices()),
                offsets: Raw::new(&a.row_offsets()),
                rows: a.n_rows,
                cols: a.n_cols,
            }
        }
    }

    /// `(row, column, value)` for every stored entry.
    pub(crate) fn entries(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        (0..self.rows).flat_map(move |r| {
            let start = self.offsets.get(r) as usize;
            let end = self.offsets.get(r + 1) as usize;
            (start..end).map(move |k| (r, self.columns.get(k) as usize, self.values.get(k)))
        })
    }
}

pub(crate) fn csrmv<T: Element>(
    y: Raw<T>,
    a: RawCsr<T>,
    x: Raw<T>,
    a_op: MatrixOperation,
    alpha: T,
    beta: T,
) {
    for i in 0..y.len() {
        let v = if beta == T::ZERO { T::ZERO } else { beta.wrapping_mul(y.get(i)) };
        y.set(i, v);
    }
    for (r, c, v) in a.entries() {
        let (out, input) = match a_op {
            MatrixOperation::None => (r, c),
            MatrixOperation::Transpose => (c, r),
        };
        y.set(out, alpha.wrapping_mul(v).mul_plus(x.get(input), y.get(out)));
    }
}

pub(crate) fn csrmm<T: Element>(
    a: RawTile<T>,
    b: RawCsr<T>,
    c: RawTile<T>,
    b_op: MatrixOperation,
    alpha: T,
    beta: T,
) {
    for j in 0..a.cols {
        for i in 0..a.rows {
            let v = if beta == T::ZERO { T::ZERO } else { beta.wrapping_mul(a.get(i, j)) };
            a.set(i, j, v);
        }
    }
    for (r, k, v) in b.entries() {
        let (out, input) = match b_op {
            MatrixOperation::None => (r, k),
            MatrixOperation::Transpose => (k, r),
        };
        let scaled = alpha.wrapping_mul(v);
        for j in 0..a.cols {
            a.set(out, j, scaled.mul_plus(c.get(input, j), a.get(out, j)));
        }
    }
}
