//! memtile: numeric buffers across memory spaces with pluggable backends.
//!
//! Vectors, matrices, tensors and sparse matrices live in a [`MemorySpace`]
//! and carry their element domain in the type. Every operation on them is
//! routed to the backend serving their space, so the same code runs against
//! the scalar reference implementation, the multi-threaded host backend, or
//! any backend installed at runtime.
//!
//! # Features
//!
//! - Plain, copyable descriptors for 1-D, 2-D, 3-D and CSR memory regions.
//! - Ownership-aware buffers with aliasing views (ranges, columns, blocks,
//!   reshapes, tensor slices) over a single reference-counted allocation.
//! - Validating dispatch for elementwise, BLAS-style, factorization,
//!   reduction, batched and sparse operations.
//! - A typed [`Error::Unsupported`] for every combination nobody implements.
//!
//! # Modules
//!
//! - [`descriptor`]: the plain region descriptors.
//! - [`alloc`]: allocation, copy and host transfer, plus the generic allocator.
//! - [`backend`]: the [`backend::Backend`] trait and the per-space backend table.
//! - [`ops`]: validated dispatch and the built-in backends.
//! - [`buffer`]: [`Vector`], [`Matrix`], [`Tensor`] and their view collections.
//! - [`sparse`]: sparse vectors and CSR matrices.
//!
//! # Example
//!
//! ```rust
//! use memtile::{Matrix, MatrixOperation, MemorySpace, Vector};
//!
//! let a = Matrix::from_host(2, 2, &[1.0f64, 3.0, 2.0, 4.0], MemorySpace::Cpu)?;
//! let x = Vector::from_host(&[1.0, 1.0], MemorySpace::Cpu)?;
//! let mut y = Vector::zeros(2, MemorySpace::Cpu)?;
//! y.dot(&a, &x, MatrixOperation::None, 1.0, 0.0)?;
//! assert_eq!(y.get()?, vec![3.0, 7.0]);
//! # Ok::<(), memtile::Error>(())
//! ```

pub mod alloc;
pub mod approx;
pub mod backend;
pub mod buffer;
pub mod descriptor;
pub mod domain;
pub mod error;
pub mod ops;
pub mod space;
pub mod sparse;

pub use approx::{ApproxEq, ApproxEquality};
pub use buffer::{Buffer, ColumnVectors, CubeWiseSumCache, Matrix, MatrixSlices, Tensor, Vector};
pub use domain::{Element, MathDomain, Real};
pub use error::{Error, Result};
pub use ops::{LinearSystemSolverType, MatrixOperation};
pub use space::MemorySpace;
pub use sparse::{CompressedSparseRowMatrix, SparseVector};
