//! Groups of views sharing one allocation.
//!
//! A [`ColumnVectors`] is a matrix whose columns are handed out as vectors,
//! a [`MatrixSlices`] a tensor whose slices are handed out as matrices. The
//! backing buffer is allocated once; every element of the group is a view
//! into it, so writing through an element is visible through the backing
//! buffer and vice versa.

use super::{Matrix, Tensor, Vector};
use crate::domain::Element;
use crate::error::Result;
use crate::space::MemorySpace;
use core::ops::Index;

/// `cols` vectors of length `rows`, stored as the columns of one matrix.
#[derive(Debug)]
pub struct ColumnVectors<T: Element> {
    matrix: Matrix<T>,
    columns: Vec<Vector<T>>,
}

impl<T: Element> ColumnVectors<T> {
    pub fn new(rows: usize, cols: usize, space: MemorySpace) -> Result<Self> {
        Ok(Self::from_matrix(Matrix::new(rows, cols, space)?))
    }

    pub fn zeros(rows: usize, cols: usize, space: MemorySpace) -> Result<Self> {
        Ok(Self::from_matrix(Matrix::zeros(rows, cols, space)?))
    }

    /// Splits an existing matrix into its columns.
    pub fn from_matrix(matrix: Matrix<T>) -> Self {
        let columns = (0..matrix.n_cols()).map(|j| matrix.column(j)).collect();
        Self { matrix, columns }
    }

    /// The backing matrix.
    pub fn matrix(&self) -> &Matrix<T> {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut Matrix<T> {
        &mut self.matrix
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, j: usize) -> Option<&Vector<T>> {
        self.columns.get(j)
    }

    pub fn get_mut(&mut self, j: usize) -> Option<&mut Vector<T>> {
        self.columns.get_mut(j)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Vector<T>> {
        self.columns.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, Vector<T>> {
        self.columns.iter_mut()
    }
}

impl<T: Element> Index<usize> for ColumnVectors<T> {
    type Output = Vector<T>;

    fn index(&self, j: usize) -> &Vector<T> {
        &self.columns[j]
    }
}

impl<'a, T: Element> IntoIterator for &'a ColumnVectors<T> {
    type Item = &'a Vector<T>;
    type IntoIter = core::slice::Iter<'a, Vector<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// `cubes` matrices of shape `rows × cols`, stored as the slices of one tensor.
#[derive(Debug)]
pub struct MatrixSlices<T: Element> {
    tensor: Tensor<T>,
    slices: Vec<Matrix<T>>,
}

impl<T: Element> MatrixSlices<T> {
    pub fn new(rows: usize, cols: usize, cubes: usize, space: MemorySpace) -> Result<Self> {
        Ok(Self::from_tensor(Tensor::new(rows, cols, cubes, space)?))
    }

    pub fn zeros(rows: usize, cols: usize, cubes: usize, space: MemorySpace) -> Result<Self> {
        Ok(Self::from_tensor(Tensor::zeros(rows, cols, cubes, space)?))
    }

    /// Splits an existing tensor into its slices.
    pub fn from_tensor(tensor: Tensor<T>) -> Self {
        let slices = (0..tensor.n_cubes()).map(|k| tensor.slice(k)).collect();
        Self { tensor, slices }
    }

    /// The backing tensor.
    pub fn tensor(&self) -> &Tensor<T> {
        &self.tensor
    }

    pub fn tensor_mut(&mut self) -> &mut Tensor<T> {
        &mut self.tensor
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn get(&self, k: usize) -> Option<&Matrix<T>> {
        self.slices.get(k)
    }

    pub fn get_mut(&mut self, k: usize) -> Option<&mut Matrix<T>> {
        self.slices.get_mut(k)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Matrix<T>> {
        self.slices.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, Matrix<T>> {
        self.slices.iter_mut()
    }
}

impl<T: Element> Index<usize> for MatrixSlices<T> {
    type Output = Matrix<T>;

    fn index(&self, k: usize) -> &Matrix<T> {
        &self.slices[k]
    }
}

impl<'a, T: Element> IntoIterator for &'a MatrixSlices<T> {
    type Item = &'a Matrix<T>;
    type IntoIter = core::slice::Iter<'a, Matrix<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc;

    #[test]
    fn columns_share_the_matrix() {
        let before = alloc::stats().allocations;
        let mut vectors = ColumnVectors::<f32>::zeros(3, 2, MemorySpace::Test).unwrap();
        assert_eq!(alloc::stats().allocations, before + 1);
        assert_eq!(vectors.len(), 2);

        vectors.get_mut(1).unwrap().set(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(vectors.matrix().get().unwrap(), vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        assert!(vectors.iter().all(|v| !v.is_owner() && v.len() == 3));
    }

    #[test]
    fn slices_share_the_tensor() {
        let mut slices = MatrixSlices::<i32>::zeros(2, 2, 3, MemorySpace::Cpu).unwrap();
        slices.tensor_mut().set(&(0..12).collect::<Vec<_>>()).unwrap();
        assert_eq!(slices[2].get().unwrap(), vec![8, 9, 10, 11]);
        assert_eq!(slices.iter().map(|m| m.n_rows()).sum::<usize>(), 6);
    }

    #[test]
    fn dropping_the_group_releases_its_allocation() {
        let before = alloc::stats().outstanding();
        let slices = MatrixSlices::<f64>::new(4, 4, 2, MemorySpace::Test).unwrap();
        let first = slices[0].clone();
        drop(slices);
        drop(first);
        assert_eq!(alloc::stats().outstanding(), before);
    }
}
