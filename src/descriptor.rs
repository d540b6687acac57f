//! Memory descriptors.
//!
//! A descriptor names a region of memory: where it starts, how many elements
//! it holds, which [`MemorySpace`] it lives in and which [`MathDomain`] its
//! elements belong to. Descriptors never own what they point at; ownership is
//! tracked one level up, by [`crate::buffer::Buffer`].
//!
//! Tiles and cubes are column-major: element `(i, j)` of a tile sits at
//! `pointer + (i + j * leading_dimension) * elementary_size`.
//!
//! The aliasing helpers ([`MemoryBuffer::range`], [`MemoryTile::columns`],
//! [`MemoryTile::sub_tile`], [`MemoryCube::slice`], ...) build descriptors for
//! sub-regions of an existing one. They are pure offset arithmetic and are the
//! only way views are ever formed.

use crate::domain::MathDomain;
use crate::space::MemorySpace;

/// Common behaviour of the dense descriptors.
pub trait Descriptor: Copy + core::fmt::Debug + PartialEq {
    /// The `(pointer, size, space, domain)` prefix shared by every descriptor.
    fn header(&self) -> MemoryBuffer;

    /// Rebinds the descriptor to another address.
    fn set_pointer(&mut self, pointer: usize);

    /// Logical shape as `[rows, cols, cubes]`.
    fn dims(&self) -> [usize; 3];

    /// Number of elements spanned from `pointer` to the last addressable element.
    fn footprint(&self) -> usize;

    /// Contiguous runs making up the region, in column-major order.
    fn segments(&self) -> Vec<MemoryBuffer>;

    /// An unbound descriptor of the same shape with no padding between columns.
    fn packed(&self) -> Self;

    /// The descriptor rebound to `pointer`, everything else unchanged.
    #[must_use]
    fn with_pointer(mut self, pointer: usize) -> Self {
        self.set_pointer(pointer);
        self
    }
}

/// One-dimensional region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct MemoryBuffer {
    /// Address of the first element; `0` when unbound.
    pub pointer: usize,
    /// Number of elements.
    pub size: usize,
    pub memory_space: MemorySpace,
    pub math_domain: MathDomain,
}

impl MemoryBuffer {
    pub const fn new(
        pointer: usize,
        size: usize,
        memory_space: MemorySpace,
        math_domain: MathDomain,
    ) -> Self {
        Self {
            pointer,
            size,
            memory_space,
            math_domain,
        }
    }

    /// An unbound descriptor, ready for [`crate::alloc::alloc`].
    pub const fn unbound(size: usize, memory_space: MemorySpace, math_domain: MathDomain) -> Self {
        Self::new(0, size, memory_space, math_domain)
    }

    pub const fn elementary_size(&self) -> usize {
        self.math_domain.elementary_size()
    }

    /// Size of the region in bytes.
    pub const fn total_size(&self) -> usize {
        self.size * self.elementary_size()
    }

    pub const fn is_bound(&self) -> bool {
        self.pointer != 0
    }

    /// Address of element `index`.
    pub const fn address_of(&self, index: usize) -> usize {
        self.pointer + index * self.elementary_size()
    }

    /// Elements `[offset, offset + len)` of this buffer.
    ///
    /// # Panics
    /// Panics if the range is not contained in the buffer.
    pub fn range(&self, offset: usize, len: usize) -> Self {
        assert!(
            offset + len <= self.size,
            "range {offset}..{} out of bounds for buffer of {} elements",
            offset + len,
            self.size
        );
        Self::new(self.address_of(offset), len, self.memory_space, self.math_domain)
    }

    /// Reinterprets the buffer as a contiguous `rows × cols` tile.
    ///
    /// # Panics
    /// Panics if `rows * cols != size`.
    pub fn as_tile(&self, rows: usize, cols: usize) -> MemoryTile {
        assert_eq!(rows * cols, self.size, "cannot reshape {} elements as {rows}x{cols}", self.size);
        MemoryTile::new(self.pointer, rows, cols, rows, self.memory_space, self.math_domain)
    }
}

impl Descriptor for MemoryBuffer {
    fn header(&self) -> MemoryBuffer {
        *self
    }

    fn set_pointer(&mut self, pointer: usize) {
        self.pointer = pointer;
    }

    fn dims(&self) -> [usize; 3] {
        [self.size, 1, 1]
    }

    fn footprint(&self) -> usize {
        self.size
    }

    fn segments(&self) -> Vec<MemoryBuffer> {
        vec![*self]
    }

    fn packed(&self) -> Self {
        Self::unbound(self.size, self.memory_space, self.math_domain)
    }
}

/// Column-major two-dimensional region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct MemoryTile {
    pub pointer: usize,
    /// `n_rows * n_cols`.
    pub size: usize,
    pub memory_space: MemorySpace,
    pub math_domain: MathDomain,
    pub n_rows: usize,
    pub n_cols: usize,
    /// Distance in elements between the starts of consecutive columns.
    pub leading_dimension: usize,
}

impl MemoryTile {
    /// # Panics
    /// Panics if `leading_dimension < n_rows`.
    pub fn new(
        pointer: usize,
        n_rows: usize,
        n_cols: usize,
        leading_dimension: usize,
        memory_space: MemorySpace,
        math_domain: MathDomain,
    ) -> Self {
        assert!(
            leading_dimension >= n_rows,
            "leading dimension {leading_dimension} is smaller than {n_rows} rows"
        );
        Self {
            pointer,
            size: n_rows * n_cols,
            memory_space,
            math_domain,
            n_rows,
            n_cols,
            leading_dimension,
        }
    }

    pub fn unbound(
        n_rows: usize,
        n_cols: usize,
        memory_space: MemorySpace,
        math_domain: MathDomain,
    ) -> Self {
        Self::new(0, n_rows, n_cols, n_rows, memory_space, math_domain)
    }

    pub const fn elementary_size(&self) -> usize {
        self.math_domain.elementary_size()
    }

    pub const fn total_size(&self) -> usize {
        self.size * self.elementary_size()
    }

    /// Whether columns follow each other without gaps.
    pub const fn is_contiguous(&self) -> bool {
        self.leading_dimension == self.n_rows || self.n_cols <= 1
    }

    pub const fn is_square(&self) -> bool {
        self.n_rows == self.n_cols
    }

    /// Address of element `(row, col)`.
    pub const fn address_of(&self, row: usize, col: usize) -> usize {
        self.pointer + (row + col * self.leading_dimension) * self.elementary_size()
    }

    /// Column `col` as a one-dimensional buffer.
    ///
    /// # Panics
    /// Panics if `col` is out of range.
    pub fn column(&self, col: usize) -> MemoryBuffer {
        assert!(col < self.n_cols, "column {col} out of range for {} columns", self.n_cols);
        MemoryBuffer::new(self.address_of(0, col), self.n_rows, self.memory_space, self.math_domain)
    }

    /// Columns `[start, start + count)`, sharing this tile's leading dimension.
    ///
    /// # Panics
    /// Panics if the range is out of bounds.
    pub fn columns(&self, start: usize, count: usize) -> Self {
        self.sub_tile(0, self.n_rows, start, count)
    }

    /// Block of `rows × cols` elements whose top-left corner is `(row, col)`.
    ///
    /// # Panics
    /// Panics if the block is not contained in the tile.
    pub fn sub_tile(&self, row: usize, rows: usize, col: usize, cols: usize) -> Self {
        assert!(
            row + rows <= self.n_rows && col + cols <= self.n_cols,
            "block ({row}+{rows}, {col}+{cols}) out of bounds for {}x{} tile",
            self.n_rows,
            self.n_cols
        );
        Self::new(
            self.address_of(row, col),
            rows,
            cols,
            self.leading_dimension,
            self.memory_space,
            self.math_domain,
        )
    }

    /// The tile as a flat buffer of `size` elements.
    ///
    /// # Panics
    /// Panics if the tile is not contiguous.
    pub fn as_buffer(&self) -> MemoryBuffer {
        assert!(self.is_contiguous(), "a strided tile cannot be flattened");
        self.header()
    }
}

impl Descriptor for MemoryTile {
    fn header(&self) -> MemoryBuffer {
        MemoryBuffer::new(self.pointer, self.size, self.memory_space, self.math_domain)
    }

    fn set_pointer(&mut self, pointer: usize) {
        self.pointer = pointer;
    }

    fn dims(&self) -> [usize; 3] {
        [self.n_rows, self.n_cols, 1]
    }

    fn footprint(&self) -> usize {
        match self.n_cols {
            0 => 0,
            n => self.leading_dimension * (n - 1) + self.n_rows,
        }
    }

    fn segments(&self) -> Vec<MemoryBuffer> {
        if self.is_contiguous() {
            vec![self.header()]
        } else {
            (0..self.n_cols).map(|j| self.column(j)).collect()
        }
    }

    fn packed(&self) -> Self {
        Self::unbound(self.n_rows, self.n_cols, self.memory_space, self.math_domain)
    }
}

/// A stack of equally shaped tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct MemoryCube {
    pub pointer: usize,
    /// `n_rows * n_cols * n_cubes`.
    pub size: usize,
    pub memory_space: MemorySpace,
    pub math_domain: MathDomain,
    pub n_rows: usize,
    pub n_cols: usize,
    pub leading_dimension: usize,
    pub n_cubes: usize,
}

impl MemoryCube {
    /// # Panics
    /// Panics if `leading_dimension < n_rows`.
    pub fn new(
        pointer: usize,
        n_rows: usize,
        n_cols: usize,
        n_cubes: usize,
        leading_dimension: usize,
        memory_space: MemorySpace,
        math_domain: MathDomain,
    ) -> Self {
        assert!(
            leading_dimension >= n_rows,
            "leading dimension {leading_dimension} is smaller than {n_rows} rows"
        );
        Self {
            pointer,
            size: n_rows * n_cols * n_cubes,
            memory_space,
            math_domain,
            n_rows,
            n_cols,
            leading_dimension,
            n_cubes,
        }
    }

    pub fn unbound(
        n_rows: usize,
        n_cols: usize,
        n_cubes: usize,
        memory_space: MemorySpace,
        math_domain: MathDomain,
    ) -> Self {
        Self::new(0, n_rows, n_cols, n_cubes, n_rows, memory_space, math_domain)
    }

    pub const fn elementary_size(&self) -> usize {
        self.math_domain.elementary_size()
    }

    pub const fn total_size(&self) -> usize {
        self.size * self.elementary_size()
    }

    /// Distance in elements between the starts of consecutive slices.
    pub const fn slice_stride(&self) -> usize {
        self.leading_dimension * self.n_cols
    }

    /// Slice `k` as a tile.
    ///
    /// # Panics
    /// Panics if `k` is out of range.
    pub fn slice(&self, k: usize) -> MemoryTile {
        assert!(k < self.n_cubes, "slice {k} out of range for {} slices", self.n_cubes);
        MemoryTile::new(
            self.pointer + k * self.slice_stride() * self.elementary_size(),
            self.n_rows,
            self.n_cols,
            self.leading_dimension,
            self.memory_space,
            self.math_domain,
        )
    }

    /// The cube as a `(n_rows * n_cols) × n_cubes` tile, one column per slice.
    ///
    /// # Panics
    /// Panics if the slices are strided.
    pub fn as_tile(&self) -> MemoryTile {
        assert_eq!(self.leading_dimension, self.n_rows, "a strided cube cannot be flattened");
        MemoryTile::new(
            self.pointer,
            self.n_rows * self.n_cols,
            self.n_cubes,
            self.n_rows * self.n_cols,
            self.memory_space,
            self.math_domain,
        )
    }
}

impl Descriptor for MemoryCube {
    fn header(&self) -> MemoryBuffer {
        MemoryBuffer::new(self.pointer, self.size, self.memory_space, self.math_domain)
    }

    fn set_pointer(&mut self, pointer: usize) {
        self.pointer = pointer;
    }

    fn dims(&self) -> [usize; 3] {
        [self.n_rows, self.n_cols, self.n_cubes]
    }

    fn footprint(&self) -> usize {
        match self.n_cubes {
            0 => 0,
            n => self.slice_stride() * (n - 1) + self.slice(n - 1).footprint(),
        }
    }

    fn segments(&self) -> Vec<MemoryBuffer> {
        if self.leading_dimension == self.n_rows {
            vec![self.header()]
        } else {
            (0..self.n_cubes).flat_map(|k| self.slice(k).segments()).collect()
        }
    }

    fn packed(&self) -> Self {
        Self::unbound(self.n_rows, self.n_cols, self.n_cubes, self.memory_space, self.math_domain)
    }
}

/// Sparse vector: `size` non-zero values plus their positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct SparseMemoryBuffer {
    /// Address of the non-zero values.
    pub pointer: usize,
    /// Number of non-zero values.
    pub size: usize,
    pub memory_space: MemorySpace,
    pub math_domain: MathDomain,
    /// Address of `size` `Int32` positions.
    pub indices: usize,
    /// Length of the dense vector this one represents.
    pub dense_size: usize,
}

impl SparseMemoryBuffer {
    pub const fn values(&self) -> MemoryBuffer {
        MemoryBuffer::new(self.pointer, self.size, self.memory_space, self.math_domain)
    }

    pub const fn indices(&self) -> MemoryBuffer {
        MemoryBuffer::new(self.indices, self.size, self.memory_space, MathDomain::Int32)
    }
}

/// Compressed sparse row matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct SparseMemoryTile {
    /// Address of the non-zero values.
    pub pointer: usize,
    /// Number of non-zero values.
    pub size: usize,
    pub memory_space: MemorySpace,
    pub math_domain: MathDomain,
    /// Address of `size` `Int32` column indices.
    pub non_zero_column_indices: usize,
    /// Address of `n_rows + 1` `Int32` row offsets.
    pub n_non_zero_rows: usize,
    pub n_rows: usize,
    pub n_cols: usize,
}

impl SparseMemoryTile {
    pub const fn values(&self) -> MemoryBuffer {
        MemoryBuffer::new(self.pointer, self.size, self.memory_space, self.math_domain)
    }

    pub const fn column_indices(&self) -> MemoryBuffer {
        MemoryBuffer::new(
            self.non_zero_column_indices,
            self.size,
            self.memory_space,
            MathDomain::Int32,
        )
    }

    pub const fn row_offsets(&self) -> MemoryBuffer {
        MemoryBuffer::new(
            self.n_non_zero_rows,
            self.n_rows + 1,
            self.memory_space,
            MathDomain::Int32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F64: MathDomain = MathDomain::Float64;

    #[test]
    fn total_size_is_bytes() {
        let buf = MemoryBuffer::unbound(10, MemorySpace::Test, MathDomain::Float32);
        assert_eq!(buf.total_size(), 40);
        assert!(!buf.is_bound());
    }

    #[test]
    fn range_offsets_pointer() {
        let buf = MemoryBuffer::new(0x1000, 10, MemorySpace::Test, F64);
        let view = buf.range(3, 4);
        assert_eq!(view.pointer, 0x1000 + 24);
        assert_eq!(view.size, 4);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn range_past_end_panics() {
        MemoryBuffer::new(0x1000, 10, MemorySpace::Test, F64).range(8, 3);
    }

    #[test]
    fn sub_tile_keeps_leading_dimension() {
        let tile = MemoryTile::new(0x1000, 4, 5, 4, MemorySpace::Test, F64);
        let block = tile.sub_tile(1, 2, 2, 3);
        assert_eq!(block.leading_dimension, 4);
        assert_eq!(block.pointer, 0x1000 + (1 + 2 * 4) * 8);
        assert!(!block.is_contiguous());
        assert_eq!(block.footprint(), 4 * 2 + 2);
        assert_eq!(block.segments().len(), 3);
        let packed = block.packed();
        assert_eq!(packed.pointer, 0);
        assert_eq!(packed.leading_dimension, 2);
    }

    #[test]
    fn column_range_of_full_tile_is_contiguous() {
        let tile = MemoryTile::new(0x1000, 4, 5, 4, MemorySpace::Test, F64);
        let cols = tile.columns(1, 2);
        assert!(cols.is_contiguous());
        assert_eq!(cols.pointer, 0x1000 + 32);
        assert_eq!(cols.segments(), vec![cols.header()]);
    }

    #[test]
    fn cube_slices_are_evenly_spaced() {
        let cube = MemoryCube::new(0x2000, 2, 3, 4, 2, MemorySpace::Test, MathDomain::Float32);
        assert_eq!(cube.slice(2).pointer, 0x2000 + 2 * 6 * 4);
        assert_eq!(cube.as_tile().n_rows, 6);
        assert_eq!(cube.footprint(), cube.size);
    }

    #[test]
    #[should_panic(expected = "leading dimension")]
    fn leading_dimension_below_rows_panics() {
        MemoryTile::new(0, 4, 1, 3, MemorySpace::Test, F64);
    }
}
