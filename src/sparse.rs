//! Sparse vectors and compressed sparse row matrices.
//!
//! Both types own their arrays as ordinary dense buffers (values plus
//! `Int32` index arrays) in one memory space, and keep a sparse descriptor
//! whose addresses mirror those buffers. The descriptor is what the
//! dispatch layer sees; [`SparseVector::sync_pointers`] and
//! [`CompressedSparseRowMatrix::sync_pointers`] rebuild it whenever one of
//! the arrays is replaced.
//!
//! Assembly from dense data happens on the host: the dense buffer is
//! downloaded, every element with `|x| > 1e-7` is kept, and the resulting
//! arrays are uploaded to the source's memory space. The threshold is the
//! same for every domain.

use crate::buffer::{Matrix, Vector};
use crate::descriptor::{SparseMemoryBuffer, SparseMemoryTile};
use crate::domain::Element;
use crate::error::Result;
use crate::space::MemorySpace;
use tracing::debug;

/// Magnitude above which a dense element is stored.
pub const NON_ZERO_THRESHOLD: f64 = 1e-7;

fn is_non_zero<T: Element>(x: T) -> bool {
    x.to_f64().abs() > NON_ZERO_THRESHOLD
}

fn to_index(i: usize) -> i32 {
    i32::try_from(i).unwrap_or_else(|_| panic!("index {i} does not fit an Int32 index array"))
}

/// Sparse vector: non-zero values and their 0-based positions.
#[derive(Debug)]
pub struct SparseVector<T: Element> {
    values: Vector<T>,
    indices: Vector<i32>,
    descriptor: SparseMemoryBuffer,
}

impl<T: Element> SparseVector<T> {
    /// Keeps the non-zero elements of `dense`.
    pub fn from_dense(dense: &Vector<T>) -> Result<Self> {
        let host = dense.get()?;
        let (values, indices): (Vec<T>, Vec<i32>) = host
            .iter()
            .enumerate()
            .filter(|(_, x)| is_non_zero(**x))
            .map(|(i, x)| (*x, to_index(i)))
            .unzip();
        debug!(size = host.len(), nnz = values.len(), "assembled sparse vector");
        Self::upload(&values, &indices, host.len(), dense.memory_space())
    }

    /// Builds a sparse vector from explicit arrays without scanning them.
    ///
    /// # Panics
    /// Panics if the arrays differ in length or an index is not below
    /// `dense_size`.
    pub fn from_parts(values: &[T], indices: &[i32], dense_size: usize, space: MemorySpace) -> Result<Self> {
        assert_eq!(values.len(), indices.len(), "one index per non-zero value");
        assert!(
            indices.iter().all(|&i| i >= 0 && (i as usize) < dense_size),
            "sparse index out of bounds for dense size {dense_size}"
        );
        Self::upload(values, indices, dense_size, space)
    }

    fn upload(values: &[T], indices: &[i32], dense_size: usize, space: MemorySpace) -> Result<Self> {
        let mut sparse = Self {
            values: Vector::from_host(values, space)?,
            indices: Vector::from_host(indices, space)?,
            descriptor: SparseMemoryBuffer::default(),
        };
        sparse.descriptor.dense_size = dense_size;
        sparse.sync_pointers();
        Ok(sparse)
    }

    /// Points the sparse descriptor at the current value and index buffers.
    pub fn sync_pointers(&mut self) {
        let values = self.values.descriptor();
        self.descriptor = SparseMemoryBuffer {
            pointer: values.pointer,
            size: values.size,
            memory_space: values.memory_space,
            math_domain: values.math_domain,
            indices: self.indices.descriptor().pointer,
            dense_size: self.descriptor.dense_size,
        };
    }

    pub fn descriptor(&self) -> SparseMemoryBuffer {
        self.descriptor
    }

    pub fn memory_space(&self) -> MemorySpace {
        self.descriptor.memory_space
    }

    /// Number of stored values.
    pub fn nnz(&self) -> usize {
        self.descriptor.size
    }

    /// Length of the dense vector this one represents.
    pub fn dense_size(&self) -> usize {
        self.descriptor.dense_size
    }

    pub fn values(&self) -> &Vector<T> {
        &self.values
    }

    pub fn indices(&self) -> &Vector<i32> {
        &self.indices
    }

    /// Replaces the stored values, keeping the positions.
    ///
    /// # Panics
    /// Panics if `values` does not hold one element per stored position.
    pub fn set_values(&mut self, values: Vector<T>) {
        assert_eq!(values.len(), self.indices.len(), "one value per stored position");
        assert_eq!(values.memory_space(), self.memory_space(), "values live in another memory space");
        self.values = values;
        self.sync_pointers();
    }

    /// Dense contents, zero where nothing is stored.
    pub fn get(&self) -> Result<Vec<T>> {
        let mut dense = vec![T::ZERO; self.dense_size()];
        let values = self.values.get()?;
        for (x, i) in values.into_iter().zip(self.indices.get()?) {
            dense[i as usize] = x;
        }
        Ok(dense)
    }

    /// Dense copy in the same memory space.
    pub fn to_dense(&self) -> Result<Vector<T>> {
        Vector::from_host(&self.get()?, self.memory_space())
    }
}

impl<T: Element> Clone for SparseVector<T> {
    /// Deep copy, with the descriptor pointing at the copied arrays.
    fn clone(&self) -> Self {
        let mut copy = Self {
            values: self.values.clone(),
            indices: self.indices.clone(),
            descriptor: self.descriptor,
        };
        copy.sync_pointers();
        copy
    }
}

/// CSR matrix: values, their column indices, and `n_rows + 1` row offsets.
#[derive(Debug)]
pub struct CompressedSparseRowMatrix<T: Element> {
    values: Vector<T>,
    column_indices: Vector<i32>,
    row_offsets: Vector<i32>,
    descriptor: SparseMemoryTile,
}

impl<T: Element> CompressedSparseRowMatrix<T> {
    /// Keeps the non-zero elements of `dense`.
    pub fn from_dense(dense: &Matrix<T>) -> Result<Self> {
        let (rows, cols) = (dense.n_rows(), dense.n_cols());
        let host = dense.get()?;
        let mut values = Vec::new();
        let mut column_indices = Vec::new();
        let mut row_offsets = Vec::with_capacity(rows + 1);
        row_offsets.push(0);
        for i in 0..rows {
            for j in 0..cols {
                let x = host[i + j * rows];
                if is_non_zero(x) {
                    values.push(x);
                    column_indices.push(to_index(j));
                }
            }
            row_offsets.push(to_index(values.len()));
        }
        debug!(rows, cols, nnz = values.len(), "assembled CSR matrix");
        Self::upload(&values, &column_indices, &row_offsets, rows, cols, dense.memory_space())
    }

    /// Builds a CSR matrix from explicit arrays without scanning them.
    ///
    /// # Panics
    /// Panics if the arrays do not form a valid `rows × cols` CSR layout.
    pub fn from_parts(
        values: &[T],
        column_indices: &[i32],
        row_offsets: &[i32],
        rows: usize,
        cols: usize,
        space: MemorySpace,
    ) -> Result<Self> {
        assert_eq!(values.len(), column_indices.len(), "one column index per non-zero value");
        assert_eq!(row_offsets.len(), rows + 1, "CSR needs n_rows + 1 row offsets");
        assert_eq!(row_offsets[0], 0, "row offsets must start at zero");
        assert!(
            row_offsets.windows(2).all(|w| w[0] <= w[1]),
            "row offsets must be non-decreasing"
        );
        assert_eq!(
            row_offsets[rows] as usize,
            values.len(),
            "last row offset must equal the number of non-zeros"
        );
        assert!(
            column_indices.iter().all(|&j| j >= 0 && (j as usize) < cols),
            "column index out of bounds for {cols} columns"
        );
        Self::upload(values, column_indices, row_offsets, rows, cols, space)
    }

    fn upload(
        values: &[T],
        column_indices: &[i32],
        row_offsets: &[i32],
        rows: usize,
        cols: usize,
        space: MemorySpace,
    ) -> Result<Self> {
        let mut csr = Self {
            values: Vector::from_host(values, space)?,
            column_indices: Vector::from_host(column_indices, space)?,
            row_offsets: Vector::from_host(row_offsets, space)?,
            descriptor: SparseMemoryTile {
                n_rows: rows,
                n_cols: cols,
                ..SparseMemoryTile::default()
            },
        };
        csr.sync_pointers();
        Ok(csr)
    }

    /// Points the sparse descriptor at the current three buffers.
    pub fn sync_pointers(&mut self) {
        let values = self.values.descriptor();
        self.descriptor = SparseMemoryTile {
            pointer: values.pointer,
            size: values.size,
            memory_space: values.memory_space,
            math_domain: values.math_domain,
            non_zero_column_indices: self.column_indices.descriptor().pointer,
            n_non_zero_rows: self.row_offsets.descriptor().pointer,
            n_rows: self.descriptor.n_rows,
            n_cols: self.descriptor.n_cols,
        };
    }

    pub fn descriptor(&self) -> SparseMemoryTile {
        self.descriptor
    }

    pub fn memory_space(&self) -> MemorySpace {
        self.descriptor.memory_space
    }

    pub fn n_rows(&self) -> usize {
        self.descriptor.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.descriptor.n_cols
    }

    /// Number of stored values.
    pub fn nnz(&self) -> usize {
        self.descriptor.size
    }

    pub fn values(&self) -> &Vector<T> {
        &self.values
    }

    pub fn column_indices(&self) -> &Vector<i32> {
        &self.column_indices
    }

    pub fn row_offsets(&self) -> &Vector<i32> {
        &self.row_offsets
    }

    /// Replaces the stored values, keeping the sparsity pattern.
    ///
    /// # Panics
    /// Panics if `values` does not hold one element per stored position.
    pub fn set_values(&mut self, values: Vector<T>) {
        assert_eq!(values.len(), self.column_indices.len(), "one value per stored position");
        assert_eq!(values.memory_space(), self.memory_space(), "values live in another memory space");
        self.values = values;
        self.sync_pointers();
    }

    /// Dense contents in column-major order, zero where nothing is stored.
    pub fn get(&self) -> Result<Vec<T>> {
        let rows = self.n_rows();
        let mut dense = vec![T::ZERO; rows * self.n_cols()];
        let values = self.values.get()?;
        let columns = self.column_indices.get()?;
        let offsets = self.row_offsets.get()?;
        for (i, row) in offsets.windows(2).enumerate() {
            for k in row[0] as usize..row[1] as usize {
                dense[i + columns[k] as usize * rows] = values[k];
            }
        }
        Ok(dense)
    }

    /// Dense copy in the same memory space.
    pub fn to_dense(&self) -> Result<Matrix<T>> {
        Matrix::from_host(self.n_rows(), self.n_cols(), &self.get()?, self.memory_space())
    }
}

impl<T: Element> Clone for CompressedSparseRowMatrix<T> {
    /// Deep copy, with the descriptor pointing at the copied arrays.
    fn clone(&self) -> Self {
        let mut copy = Self {
            values: self.values.clone(),
            column_indices: self.column_indices.clone(),
            row_offsets: self.row_offsets.clone(),
            descriptor: self.descriptor,
        };
        copy.sync_pointers();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::MatrixOperation;

    fn pattern<T: Element>() -> Vec<T> {
        // 4 × 6, non-zeros at (0, 1), (2, 3) and (3, 5)
        let mut dense = vec![T::ZERO; 24];
        dense[4] = T::from_f64(1.5);
        dense[2 + 3 * 4] = T::from_f64(-2.0);
        dense[3 + 5 * 4] = T::from_f64(3.25);
        dense
    }

    #[test]
    fn csr_layout_of_known_pattern() {
        let dense = Matrix::from_host(4, 6, &pattern::<f64>(), MemorySpace::Test).unwrap();
        let csr = CompressedSparseRowMatrix::from_dense(&dense).unwrap();
        assert_eq!(csr.nnz(), 3);
        assert_eq!(csr.values().get().unwrap(), vec![1.5, -2.0, 3.25]);
        assert_eq!(csr.column_indices().get().unwrap(), vec![1, 3, 5]);
        assert_eq!(csr.row_offsets().get().unwrap(), vec![0, 1, 1, 2, 3]);
        assert_eq!(csr.get().unwrap(), pattern::<f64>());
    }

    #[test]
    fn descriptor_follows_the_buffers() {
        let dense = Matrix::from_host(4, 6, &pattern::<f32>(), MemorySpace::Cpu).unwrap();
        let mut csr = CompressedSparseRowMatrix::from_dense(&dense).unwrap();
        let d = csr.descriptor();
        assert_eq!(d.pointer, csr.values().descriptor().pointer);
        assert_eq!(d.non_zero_column_indices, csr.column_indices().descriptor().pointer);
        assert_eq!(d.n_non_zero_rows, csr.row_offsets().descriptor().pointer);

        csr.set_values(Vector::from_host(&[1.0, 1.0, 1.0], MemorySpace::Cpu).unwrap());
        assert_eq!(csr.descriptor().pointer, csr.values().descriptor().pointer);
        assert_ne!(csr.descriptor().pointer, d.pointer);

        let copy = csr.clone();
        assert_ne!(copy.descriptor().pointer, csr.descriptor().pointer);
        assert_eq!(copy.descriptor().row_offsets(), copy.row_offsets().descriptor());
    }

    #[test]
    fn set_values_replaces_the_stored_entries() {
        let dense = Matrix::from_host(4, 6, &pattern::<f64>(), MemorySpace::Test).unwrap();
        let mut csr = CompressedSparseRowMatrix::from_dense(&dense).unwrap();
        csr.set_values(Vector::from_host(&[10.0, 20.0, 30.0], MemorySpace::Test).unwrap());

        let mut expected = vec![0.0; 24];
        expected[4] = 10.0;
        expected[2 + 3 * 4] = 20.0;
        expected[3 + 5 * 4] = 30.0;
        assert_eq!(csr.get().unwrap(), expected);
        assert_eq!(csr.to_dense().unwrap().get().unwrap(), expected);

        // kernels read through the resynced descriptor
        let x = Vector::from_host(&[1.0; 6], MemorySpace::Test).unwrap();
        let mut y = Vector::zeros(4, MemorySpace::Test).unwrap();
        y.sparse_dot(&csr, &x, MatrixOperation::None, 1.0, 0.0).unwrap();
        assert_eq!(y.get().unwrap(), vec![10.0, 0.0, 20.0, 30.0]);
    }

    #[test]
    #[should_panic(expected = "one value per stored position")]
    fn set_values_rejects_wrong_length() {
        let dense = Matrix::from_host(4, 6, &pattern::<f32>(), MemorySpace::Test).unwrap();
        let mut csr = CompressedSparseRowMatrix::from_dense(&dense).unwrap();
        csr.set_values(Vector::zeros(2, MemorySpace::Test).unwrap());
    }

    #[test]
    fn threshold_drops_tiny_values() {
        let dense = Vector::from_host(&[0.0, 5e-8, -1e-6, 2.0], MemorySpace::Test).unwrap();
        let sparse = SparseVector::from_dense(&dense).unwrap();
        assert_eq!(sparse.indices().get().unwrap(), vec![2, 3]);
        assert_eq!(sparse.get().unwrap(), vec![0.0, 0.0, -1e-6, 2.0]);
    }

    #[test]
    fn empty_pattern_is_valid() {
        let dense = Matrix::<i32>::zeros(3, 2, MemorySpace::Test).unwrap();
        let csr = CompressedSparseRowMatrix::from_dense(&dense).unwrap();
        assert_eq!(csr.nnz(), 0);
        assert_eq!(csr.row_offsets().get().unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(csr.to_dense().unwrap().get().unwrap(), vec![0; 6]);
    }

    #[test]
    fn sparse_dot_matches_dense_product() {
        let csr = CompressedSparseRowMatrix::from_parts(
            &[2.0f64, 1.0, 3.0],
            &[0, 2, 1],
            &[0, 2, 3],
            2,
            3,
            MemorySpace::Test,
        )
        .unwrap();
        let x = Vector::from_host(&[1.0, 2.0, 3.0], MemorySpace::Test).unwrap();
        let mut y = Vector::zeros(2, MemorySpace::Test).unwrap();
        y.sparse_dot(&csr, &x, MatrixOperation::None, 1.0, 0.0).unwrap();
        assert_eq!(y.get().unwrap(), vec![5.0, 6.0]);
    }

    #[test]
    fn sparse_add_scatters_into_dense() {
        let x = SparseVector::from_parts(&[1, 2], &[0, 3], 4, MemorySpace::Cpu).unwrap();
        let y = Vector::filled(4, 10, MemorySpace::Cpu).unwrap();
        let mut z = Vector::zeros(4, MemorySpace::Cpu).unwrap();
        z.sparse_add(&x, &y, 3).unwrap();
        assert_eq!(z.get().unwrap(), vec![13, 10, 10, 16]);
    }

    #[test]
    #[should_panic(expected = "non-decreasing")]
    fn malformed_offsets_panic() {
        let _ = CompressedSparseRowMatrix::from_parts(&[1.0f32], &[0], &[0, 1, 0, 1], 3, 1, MemorySpace::Test);
    }
}
