use super::{Matrix, Vector};
use crate::descriptor::MemoryBuffer;
use crate::domain::{Element, Real};
use crate::error::Result;
use crate::ops::{MatrixOperation, dispatch};
use crate::sparse::{CompressedSparseRowMatrix, SparseVector};
use crate::space::MemorySpace;

impl<T: Element> Vector<T> {
    /// Allocates `size` elements in `space`. Contents are whatever the
    /// backend's allocator provides.
    pub fn new(size: usize, space: MemorySpace) -> Result<Self> {
        Self::allocate(MemoryBuffer::unbound(size, space, T::DOMAIN))
    }

    pub fn zeros(size: usize, space: MemorySpace) -> Result<Self> {
        Self::filled(size, T::ZERO, space)
    }

    pub fn filled(size: usize, value: T, space: MemorySpace) -> Result<Self> {
        let mut v = Self::new(size, space)?;
        v.initialize(value)?;
        Ok(v)
    }

    /// Uploads `values` into a new buffer.
    pub fn from_host(values: &[T], space: MemorySpace) -> Result<Self> {
        let mut v = Self::new(values.len(), space)?;
        v.set(values)?;
        Ok(v)
    }

    /// `size` evenly spaced values from `x0` to `x1` inclusive.
    pub fn lin_space(size: usize, x0: T, x1: T, space: MemorySpace) -> Result<Self> {
        let v = Self::new(size, space)?;
        // SAFETY: `v` owns the memory its descriptor names.
        unsafe { dispatch::lin_space(&v.descriptor, x0.to_f64(), x1.to_f64())? };
        Ok(v)
    }

    /// Elements `[offset, offset + len)` as a view.
    ///
    /// # Panics
    /// Panics if the range is out of bounds.
    pub fn view(&self, offset: usize, len: usize) -> Vector<T> {
        self.view_of(self.descriptor.range(offset, len))
    }

    /// The vector as a `rows × cols` column-major matrix view.
    ///
    /// # Panics
    /// Panics if `rows * cols != len`.
    pub fn as_matrix(&self, rows: usize, cols: usize) -> Matrix<T> {
        self.view_of(self.descriptor.as_tile(rows, cols))
    }

    /// `self = alpha * x + y`.
    pub fn add(&mut self, x: &Vector<T>, y: &Vector<T>, alpha: T) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe { dispatch::add(&self.descriptor, &x.descriptor, &y.descriptor, alpha.to_f64()) }
    }

    /// `self = x - y`.
    pub fn subtract(&mut self, x: &Vector<T>, y: &Vector<T>) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe { dispatch::subtract(&self.descriptor, &x.descriptor, &y.descriptor) }
    }

    /// `self += alpha * x`.
    pub fn add_equal(&mut self, x: &Vector<T>, alpha: T) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe { dispatch::add_equal(&self.descriptor, &x.descriptor, alpha.to_f64()) }
    }

    /// `self = alpha * x ∘ y`.
    pub fn elementwise_product(&mut self, x: &Vector<T>, y: &Vector<T>, alpha: T) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe { dispatch::elementwise_product(&self.descriptor, &x.descriptor, &y.descriptor, alpha.to_f64()) }
    }

    /// `self = alpha * x / y`.
    pub fn elementwise_division(&mut self, x: &Vector<T>, y: &Vector<T>, alpha: T) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe { dispatch::elementwise_division(&self.descriptor, &x.descriptor, &y.descriptor, alpha.to_f64()) }
    }

    /// `self = alpha * op(A) * x + beta * self`.
    pub fn dot(&mut self, a: &Matrix<T>, x: &Vector<T>, a_op: MatrixOperation, alpha: T, beta: T) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe {
            dispatch::dot(
                &self.descriptor,
                &a.descriptor,
                &x.descriptor,
                a_op,
                alpha.to_f64(),
                beta.to_f64(),
            )
        }
    }

    /// `self[i] = sum_j A(i, j)`.
    pub fn row_wise_sum(&mut self, a: &Matrix<T>) -> Result<()> {
        // SAFETY: every operand's memory is kept alive by its storage.
        unsafe { dispatch::row_wise_sum(&self.descriptor, &a.descriptor) }
    }

    /// `self = alpha * x + y` for a sparse `x`.
    pub fn sparse_add(&mut self, x: &SparseVector<T>, y: &Vector<T>, alpha: T) -> Result<()> {
        // SAFETY: the sparse descriptor names memory owned by `x`.
        unsafe { dispatch::sparse_add(&self.descriptor, &x.descriptor(), &y.descriptor, alpha.to_f64()) }
    }

    /// `self = alpha * op(A) * x + beta * self` for a CSR `A`.
    pub fn sparse_dot(
        &mut self,
        a: &CompressedSparseRowMatrix<T>,
        x: &Vector<T>,
        a_op: MatrixOperation,
        alpha: T,
        beta: T,
    ) -> Result<()> {
        // SAFETY: the sparse descriptor names memory owned by `a`.
        unsafe {
            dispatch::sparse_dot(
                &self.descriptor,
                &a.descriptor(),
                &x.descriptor,
                a_op,
                alpha.to_f64(),
                beta.to_f64(),
            )
        }
    }

    /// 0-based position of the smallest `|x[i]|`.
    pub fn arg_abs_min(&self) -> Result<usize> {
        // SAFETY: `self` keeps its memory alive.
        unsafe { dispatch::arg_abs_min(&self.descriptor) }
    }

    /// 0-based position of the largest `|x[i]|`.
    pub fn arg_abs_max(&self) -> Result<usize> {
        // SAFETY: `self` keeps its memory alive.
        unsafe { dispatch::arg_abs_max(&self.descriptor) }
    }

    pub fn sum(&self) -> Result<T> {
        // SAFETY: `self` keeps its memory alive.
        unsafe { dispatch::sum(&self.descriptor) }.map(T::from_f64)
    }

    pub fn min(&self) -> Result<T> {
        // SAFETY: `self` keeps its memory alive.
        unsafe { dispatch::min(&self.descriptor) }.map(T::from_f64)
    }

    pub fn max(&self) -> Result<T> {
        // SAFETY: `self` keeps its memory alive.
        unsafe { dispatch::max(&self.descriptor) }.map(T::from_f64)
    }

    /// Smallest absolute value.
    pub fn abs_min(&self) -> Result<T> {
        // SAFETY: `self` keeps its memory alive.
        unsafe { dispatch::abs_min(&self.descriptor) }.map(T::from_f64)
    }

    /// Largest absolute value.
    pub fn abs_max(&self) -> Result<T> {
        // SAFETY: `self` keeps its memory alive.
        unsafe { dispatch::abs_max(&self.descriptor) }.map(T::from_f64)
    }
}

impl<T: Real> Vector<T> {
    /// Uniform samples in `[0, 1)`.
    pub fn random_uniform(size: usize, seed: u64, space: MemorySpace) -> Result<Self> {
        let v = Self::new(size, space)?;
        // SAFETY: `v` owns the memory its descriptor names.
        unsafe { dispatch::random_uniform(&v.descriptor, seed)? };
        Ok(v)
    }

    /// Standard normal samples.
    pub fn random_gaussian(size: usize, seed: u64, space: MemorySpace) -> Result<Self> {
        let v = Self::new(size, space)?;
        // SAFETY: `v` owns the memory its descriptor names.
        unsafe { dispatch::random_gaussian(&v.descriptor, seed)? };
        Ok(v)
    }

    /// `sqrt(sum(x[i]^2))`.
    pub fn euclidean_norm(&self) -> Result<T> {
        // SAFETY: `self` keeps its memory alive.
        unsafe { dispatch::euclidean_norm(&self.descriptor) }.map(T::from_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_matrix_aliases_the_vector() {
        let v = Vector::from_host(&[1, 2, 3, 4, 5, 6], MemorySpace::Test).unwrap();
        let m = v.as_matrix(2, 3);
        assert_eq!(m.column(1).get().unwrap(), vec![3, 4]);
    }

    #[test]
    fn reductions_convert_back_to_element_type() {
        let v = Vector::from_host(&[-4, 2, 3], MemorySpace::Cpu).unwrap();
        assert_eq!(v.sum().unwrap(), 1);
        assert_eq!(v.min().unwrap(), -4);
        assert_eq!(v.abs_min().unwrap(), 2);
        assert_eq!(v.abs_max().unwrap(), 4);
        assert_eq!(v.arg_abs_max().unwrap(), 0);
    }

    #[test]
    fn lin_space_spans_both_ends() {
        let v = Vector::lin_space(3, 1.0f64, 2.0, MemorySpace::Test).unwrap();
        assert_eq!(v.get().unwrap(), vec![1.0, 1.5, 2.0]);
    }
}
