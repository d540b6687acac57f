//! Cube-wise reduction.
//!
//! Summing the slices of a tensor is a single GEMV once the tensor is laid
//! out as a `(rows * cols) × cubes` matrix: multiply it by a vector of ones.
//! The reshaped copy and the ones vector are kept in a caller-owned
//! [`CubeWiseSumCache`] so repeated reductions of same-shaped tensors
//! allocate nothing.

use super::{Matrix, Tensor, Vector};
use crate::alloc;
use crate::domain::Element;
use crate::error::Result;
use crate::ops::MatrixOperation;
use tracing::debug;

/// Scratch buffers reused across [`Tensor::cube_wise_sum`] calls.
#[derive(Debug)]
pub struct CubeWiseSumCache<T: Element> {
    reshape: Option<Matrix<T>>,
    ones: Option<Vector<T>>,
}

impl<T: Element> Default for CubeWiseSumCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> CubeWiseSumCache<T> {
    pub const fn new() -> Self {
        Self {
            reshape: None,
            ones: None,
        }
    }

    /// Whether buffers for a tensor of this shape are already held.
    pub fn fits(&self, tensor: &Tensor<T>) -> bool {
        match (&self.reshape, &self.ones) {
            (Some(reshape), Some(ones)) => Self::matches(reshape, ones, tensor),
            _ => false,
        }
    }

    /// Drops the held buffers.
    pub fn clear(&mut self) {
        self.reshape = None;
        self.ones = None;
    }

    /// (Re)allocates for `tensor` unless the held buffers already fit.
    fn prepare(&mut self, tensor: &Tensor<T>) -> Result<(&Matrix<T>, &Vector<T>)> {
        let held = match (self.reshape.take(), self.ones.take()) {
            (Some(reshape), Some(ones)) if Self::matches(&reshape, &ones, tensor) => (reshape, ones),
            _ => {
                let [rows, cols, cubes] = tensor.dims();
                debug!(rows, cols, cubes, "resizing cube-wise sum cache");
                let space = tensor.memory_space();
                (Matrix::new(rows * cols, cubes, space)?, Vector::filled(cubes, T::ONE, space)?)
            }
        };
        Ok((&*self.reshape.insert(held.0), &*self.ones.insert(held.1)))
    }

    fn matches(reshape: &Matrix<T>, ones: &Vector<T>, tensor: &Tensor<T>) -> bool {
        let [rows, cols, cubes] = tensor.dims();
        let space = tensor.memory_space();
        reshape.dims() == [rows * cols, cubes, 1]
            && reshape.memory_space() == space
            && ones.len() == cubes
            && ones.memory_space() == space
    }
}

impl<T: Element> Tensor<T> {
    /// `out(i, j) = sum_k self_k(i, j)`.
    ///
    /// # Panics
    /// Panics if `out` is not a packed `rows × cols` matrix in the same space.
    pub fn cube_wise_sum(&self, out: &mut Matrix<T>, cache: &mut CubeWiseSumCache<T>) -> Result<()> {
        assert_eq!(
            out.dims(),
            [self.n_rows(), self.n_cols(), 1],
            "cube_wise_sum: output must have the shape of one slice"
        );
        let (reshape, ones) = cache.prepare(self)?;
        for k in 0..self.n_cubes() {
            let source = self.descriptor.slice(k);
            let target = reshape.descriptor.column(k).as_tile(self.n_rows(), self.n_cols());
            for j in 0..self.n_cols() {
                // SAFETY: `self` and the cache keep both columns alive.
                unsafe { alloc::copy(&target.column(j), &source.column(j))? };
            }
        }
        out.as_vector()
            .dot(reshape, ones, MatrixOperation::None, T::ONE, T::ZERO)
    }
}
