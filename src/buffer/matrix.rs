use super::{Matrix, Vector};
use crate::descriptor::{MemoryBuffer, MemoryTile};
use crate::domain::{Element, Real};
use crate::error::Result;
use crate::ops::{LinearSystemSolverType, MatrixOperation, dispatch};
use crate::sparse::CompressedSparseRowMatrix;
use crate::space::MemorySpace;

impl<T: Element> Matrix<T> {
    /// Allocates a packed `rows × cols` matrix in `space`.
    pub fn new(rows: usize, cols: usize, space: MemorySpace) -> Result<Self> {
        Self::allocate(MemoryTile::unbound(rows, cols, space, T::DOMAIN))
    }

    pub fn zeros(rows: usize, cols: usize, space: MemorySpace) -> Result<Self> {
        Self::filled(rows, cols, T::ZERO, space)
    }

    pub fn filled(rows: usize, cols: usize, value: T, space: MemorySpace) -> Result<Self> {
        let mut m = Self::new(rows, cols, space)?;
        m.initialize(value)?;
        Ok(m)
    }

    /// Uploads column-major `values` into a new matrix.
    pub fn from_host(rows: usize, cols: usize, values: &[T], space: MemorySpace) -> Result<Self> {
        let mut m = Self::new(rows, cols, space)?;
        m.set(values)?;
        Ok(m)
    }

    /// The `n × n` identity.
    pub fn eye(n: usize, space: MemorySpace) -> Result<Self> {
        let m = Self::new(n, n, space)?;
        // SAFETY: `m` owns the memory its descriptor names.
        unsafe { dispatch::eye(&m.descriptor)? };
        Ok(m)
    }

    pub fn n_rows(&self) -> usize {
        self.descriptor.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.descriptor.n_cols
    }

    pub fn leading_dimension(&self) -> usize {
        self.descriptor.leading_dimension
    }

    /// Column `j` as a vector view.
    pub fn column(&self, j: usize) -> Vector<T> {
        self.view_of(self.descriptor.column(j))
    }

    /// Columns `[start, start + count)` as a matrix view.
    pub fn columns(&self, start: usize, count: usize) -> Matrix<T> {
        self.view_of(self.descriptor.columns(start, count))
    }

    /// The `rows × cols` block at `(row, col)` as a strided view.
    pub fn sub_matrix(&self, row: usize, rows: usize, col: usize, cols: usize) -> Matrix<T> {
        self.view_of(self.descriptor.sub_tile(row, rows, col, cols))
    }

    /// The matrix as a flat vector view.
    ///
    /// # Panics
    /// Panics if the matrix is strided.
    pub fn as_vector(&self) -> Vector<T> {
        self.view_of::<MemoryBuffer>(self.descriptor.as_buffer())
    }

    /// `self = alpha * op(self) + beta * op(B)`.
    pub fn add_equal_matrix(
        &mut self,
        b: &Matrix<T>,
        a_op: MatrixOperation,
        b_op: MatrixOperation,
        alpha: T,
        beta: T,
    ) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe {
            dispatch::add_equal_matrix(
                &self.descriptor,
                &b.descriptor,
                a_op,
                b_op,
                alpha.to_f64(),
                beta.to_f64(),
            )
        }
    }

    /// Adds `alpha * x` to every row (`row_wise`, `x` of length `n_cols`) or
    /// to every column (`x` of length `n_rows`).
    pub fn add_broadcast(&mut self, x: &Vector<T>, row_wise: bool, alpha: T) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe { dispatch::add_broadcast(&self.descriptor, &x.descriptor, row_wise, alpha.to_f64()) }
    }

    /// Scales column `j` by `alpha[j]`.
    pub fn scale_columns(&mut self, alpha: &Vector<T>) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe { dispatch::scale_columns(&self.descriptor, &alpha.descriptor) }
    }

    /// `self = alpha * op(B) * op(C) + beta * self`.
    pub fn multiply(
        &mut self,
        b: &Matrix<T>,
        c: &Matrix<T>,
        b_op: MatrixOperation,
        c_op: MatrixOperation,
        alpha: T,
        beta: T,
    ) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe {
            dispatch::multiply(
                &self.descriptor,
                &b.descriptor,
                &c.descriptor,
                b_op,
                c_op,
                alpha.to_f64(),
                beta.to_f64(),
            )
        }
    }

    /// [`Matrix::multiply`] restricted to leading blocks of the operands.
    #[allow(clippy::too_many_arguments)]
    pub fn sub_multiply(
        &mut self,
        b: &Matrix<T>,
        c: &Matrix<T>,
        n_rows_b: usize,
        n_cols_b: usize,
        n_cols_c: usize,
        b_op: MatrixOperation,
        c_op: MatrixOperation,
        alpha: T,
        beta: T,
    ) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe {
            dispatch::sub_multiply(
                &self.descriptor,
                &b.descriptor,
                &c.descriptor,
                n_rows_b,
                n_cols_b,
                n_cols_c,
                b_op,
                c_op,
                alpha.to_f64(),
                beta.to_f64(),
            )
        }
    }

    /// `self += alpha * x * yᵀ`.
    pub fn kronecker_product(&mut self, x: &Vector<T>, y: &Vector<T>, alpha: T) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe { dispatch::kronecker_product(&self.descriptor, &x.descriptor, &y.descriptor, alpha.to_f64()) }
    }

    /// Running sum along each row, in place.
    pub fn cumulative_row_sum(&mut self) -> Result<()> {
        // SAFETY: `self` keeps its memory alive.
        unsafe { dispatch::cumulative_row_sum(&self.descriptor) }
    }

    /// Sums of every row.
    pub fn row_wise_sum(&self) -> Result<Vector<T>> {
        let mut out = Vector::new(self.n_rows(), self.memory_space())?;
        out.row_wise_sum(self)?;
        Ok(out)
    }

    /// `self = alpha * op(B) * C + beta * self` for a CSR `B`.
    pub fn sparse_multiply(
        &mut self,
        b: &CompressedSparseRowMatrix<T>,
        c: &Matrix<T>,
        b_op: MatrixOperation,
        alpha: T,
        beta: T,
    ) -> Result<()> {
        // SAFETY: the sparse descriptor names memory owned by `b`.
        unsafe {
            dispatch::sparse_multiply(
                &self.descriptor,
                &b.descriptor(),
                &c.descriptor,
                b_op,
                alpha.to_f64(),
                beta.to_f64(),
            )
        }
    }

    /// 1-based row of the smallest `|A(i, j)|` in every column.
    pub fn column_wise_arg_abs_min(&self) -> Result<Vector<i32>> {
        let out = Vector::new(self.n_cols(), self.memory_space())?;
        // SAFETY: both operands keep their memory alive.
        unsafe { dispatch::column_wise_arg_abs_min(&out.descriptor, &self.descriptor)? };
        Ok(out)
    }

    /// 1-based row of the largest `|A(i, j)|` in every column.
    pub fn column_wise_arg_abs_max(&self) -> Result<Vector<i32>> {
        let out = Vector::new(self.n_cols(), self.memory_space())?;
        // SAFETY: both operands keep their memory alive.
        unsafe { dispatch::column_wise_arg_abs_max(&out.descriptor, &self.descriptor)? };
        Ok(out)
    }
}

impl<T: Real> Matrix<T> {
    /// Uniform samples in `[0, 1)`.
    pub fn random_uniform(rows: usize, cols: usize, seed: u64, space: MemorySpace) -> Result<Self> {
        let m = Self::new(rows, cols, space)?;
        // SAFETY: `m` owns the packed memory its descriptor names.
        unsafe { dispatch::random_uniform(&m.descriptor.as_buffer(), seed)? };
        Ok(m)
    }

    /// Standard normal samples.
    pub fn random_gaussian(rows: usize, cols: usize, seed: u64, space: MemorySpace) -> Result<Self> {
        let m = Self::new(rows, cols, space)?;
        // SAFETY: `m` owns the packed memory its descriptor names.
        unsafe { dispatch::random_gaussian(&m.descriptor.as_buffer(), seed)? };
        Ok(m)
    }

    /// Overwrites `b` with `op(self)⁻¹ b`; `self` is left unchanged.
    ///
    /// With [`LinearSystemSolverType::Qr`] and a tall `op(self)` of shape
    /// `m × n`, `m > n`, the least-squares solution lands in the leading `n`
    /// rows of `b`; the trailing `m - n` rows hold residual data. Read the
    /// solution through `b.sub_matrix(0, n, 0, b.n_cols())`.
    pub fn solve(&self, b: &mut Matrix<T>, a_op: MatrixOperation, solver: LinearSystemSolverType) -> Result<()> {
        // SAFETY: both operands keep their memory alive.
        unsafe { dispatch::solve(&self.descriptor, &b.descriptor, a_op, solver) }
    }

    /// `self = op(self)⁻¹`.
    pub fn invert(&mut self, a_op: MatrixOperation, solver: LinearSystemSolverType) -> Result<()> {
        // SAFETY: `self` keeps its memory alive.
        unsafe { dispatch::invert(&self.descriptor, a_op, solver) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_matrix_is_strided_view() {
        let m = Matrix::from_host(3, 3, &[1, 2, 3, 4, 5, 6, 7, 8, 9], MemorySpace::Test).unwrap();
        let block = m.sub_matrix(1, 2, 1, 2);
        assert_eq!(block.leading_dimension(), 3);
        assert_eq!(block.get().unwrap(), vec![5, 6, 8, 9]);
    }

    #[test]
    fn strided_view_operations_stay_inside_the_block() {
        let m = Matrix::<f64>::zeros(3, 3, MemorySpace::Cpu).unwrap();
        let mut block = m.sub_matrix(0, 2, 1, 2);
        block.initialize(1.0).unwrap();
        block.scale(3.0).unwrap();
        assert_eq!(m.get().unwrap(), vec![0.0, 0.0, 0.0, 3.0, 3.0, 0.0, 3.0, 3.0, 0.0]);
    }

    #[test]
    fn tall_qr_solution_sits_in_leading_rows() {
        // fit y = 1 + x through (0, 1), (1, 2), (2, 3)
        let a = Matrix::from_host(3, 2, &[1.0f64, 1.0, 1.0, 0.0, 1.0, 2.0], MemorySpace::Test).unwrap();
        let mut b = Matrix::from_host(3, 1, &[1.0, 2.0, 3.0], MemorySpace::Test).unwrap();
        a.solve(&mut b, MatrixOperation::None, LinearSystemSolverType::Qr).unwrap();
        let x = b.sub_matrix(0, 2, 0, 1).get().unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn invert_round_trips_to_identity() {
        let a = Matrix::from_host(2, 2, &[4.0f64, 2.0, 7.0, 6.0], MemorySpace::Cpu).unwrap();
        let mut inverse = a.clone();
        inverse.invert(MatrixOperation::None, LinearSystemSolverType::Lu).unwrap();
        let mut product = Matrix::zeros(2, 2, MemorySpace::Cpu).unwrap();
        product
            .multiply(&a, &inverse, MatrixOperation::None, MatrixOperation::None, 1.0, 0.0)
            .unwrap();
        let got = product.get().unwrap();
        for (g, e) in got.iter().zip([1.0, 0.0, 0.0, 1.0]) {
            assert!((g - e).abs() < 1e-12);
        }
    }
}
