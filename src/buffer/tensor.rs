use super::{Matrix, Tensor};
use crate::descriptor::MemoryCube;
use crate::domain::Element;
use crate::error::Result;
use crate::ops::{MatrixOperation, dispatch};
use crate::space::MemorySpace;

impl<T: Element> Tensor<T> {
    /// Allocates `cubes` packed `rows × cols` slices in `space`.
    pub fn new(rows: usize, cols: usize, cubes: usize, space: MemorySpace) -> Result<Self> {
        Self::allocate(MemoryCube::unbound(rows, cols, cubes, space, T::DOMAIN))
    }

    pub fn zeros(rows: usize, cols: usize, cubes: usize, space: MemorySpace) -> Result<Self> {
        let mut t = Self::new(rows, cols, cubes, space)?;
        t.initialize(T::ZERO)?;
        Ok(t)
    }

    /// Uploads slice-major, column-major `values` into a new tensor.
    pub fn from_host(rows: usize, cols: usize, cubes: usize, values: &[T], space: MemorySpace) -> Result<Self> {
        let mut t = Self::new(rows, cols, cubes, space)?;
        t.set(values)?;
        Ok(t)
    }

    pub fn n_rows(&self) -> usize {
        self.descriptor.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.descriptor.n_cols
    }

    pub fn n_cubes(&self) -> usize {
        self.descriptor.n_cubes
    }

    /// Slice `k` as a matrix view.
    pub fn slice(&self, k: usize) -> Matrix<T> {
        self.view_of(self.descriptor.slice(k))
    }

    /// The tensor as a `(rows * cols) × cubes` matrix view, one column per slice.
    pub fn as_matrix(&self) -> Matrix<T> {
        self.view_of(self.descriptor.as_tile())
    }

    /// `self_k = alpha * op(B_k) * op(C_k) + beta * self_k` for every slice.
    pub fn batched_multiply(
        &mut self,
        b: &Tensor<T>,
        c: &Tensor<T>,
        b_op: MatrixOperation,
        c_op: MatrixOperation,
        alpha: T,
        beta: T,
    ) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe {
            dispatch::batched_multiply(
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

    /// `self_k += alpha * x[:, k] * y[:, k]ᵀ` for every slice `k`.
    pub fn batched_transposed_kronecker_product(&mut self, x: &Matrix<T>, y: &Matrix<T>, alpha: T) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe {
            dispatch::batched_transposed_kronecker_product(&self.descriptor, &x.descriptor, &y.descriptor, alpha.to_f64())
        }
    }
}
