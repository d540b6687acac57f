//! Backend table.
//!
//! A backend executes operations for one memory space. Every operation is
//! declared exactly once, in the [`backend_table!`] invocation below, which
//! generates the [`Backend`] trait: each method's default body reports
//! [`Error::Unsupported`] for the combination it was called with, so a
//! backend only spells out what it actually implements and anything else
//! fails loudly instead of silently doing nothing.
//!
//! # Selection
//!
//! There is no "current backend". The backend used for a call is the one
//! serving the operands' [`MemorySpace`]:
//!
//! - `Test`: [`crate::ops::reference::ReferenceBackend`], built in.
//! - `Cpu`: [`crate::ops::cpu::CpuBackend`], built in.
//! - `Host`, `Device`, `Mkl`, `OpenBlas`: whatever was registered with
//!   [`install`]; until then every call on them is unsupported.
//!
//! # Safety
//!
//! Every operation method is `unsafe`: descriptors carry raw addresses, and a
//! backend trusts that each one describes live memory of its declared shape.
//! [`crate::ops::dispatch`] checks shapes before calling in; the typed
//! [`crate::buffer::Buffer`] layer guarantees liveness.

use crate::descriptor::{MemoryBuffer, MemoryCube, MemoryTile, SparseMemoryBuffer, SparseMemoryTile};
use crate::domain::MathDomain;
use crate::error::{Error, Result};
use crate::ops::{LinearSystemSolverType, MatrixOperation};
use crate::ops::{cpu::CPU, reference::REFERENCE};
use crate::space::MemorySpace;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use tracing::trace;

macro_rules! backend_table {
    (
        $(
            $(#[$meta:meta])*
            fn $name:ident($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty => $probe:ident;
        )*
    ) => {
        /// Executes operations on buffers of one memory space.
        ///
        /// Scalars arrive as `f64` whatever the domain and are narrowed by the
        /// backend. Methods not overridden return [`Error::Unsupported`].
        pub trait Backend: Sync {
            /// Name reported in [`Error::Backend`] and log records.
            fn name(&self) -> &'static str;

            /// Blocks until all queued work has completed, surfacing deferred faults.
            fn synchronize(&self) -> Result<()> {
                Ok(())
            }

            $(
                $(#[$meta])*
                ///
                /// # Safety
                /// Every descriptor must describe live memory of its declared shape.
                #[allow(unused_variables)]
                unsafe fn $name(&self, $($arg: $ty),*) -> Result<$ret> {
                    Err(Error::unsupported(
                        stringify!($name),
                        $probe.memory_space,
                        $probe.math_domain,
                    ))
                }
            )*

            /// `A_k = alpha * op(B_k) * op(C_k) + beta * A_k` for every slice `k`.
            ///
            /// The default issues one [`Backend::multiply`] per slice on
            /// transient tile views; backends with a true batched primitive
            /// override it.
            ///
            /// # Safety
            /// Every descriptor must describe live memory of its declared shape.
            unsafe fn batched_multiply(
                &self,
                a: &MemoryCube,
                b: &MemoryCube,
                c: &MemoryCube,
                b_op: MatrixOperation,
                c_op: MatrixOperation,
                alpha: f64,
                beta: f64,
            ) -> Result<()> {
                for k in 0..a.n_cubes {
                    unsafe {
                        self.multiply(&a.slice(k), &b.slice(k), &c.slice(k), b_op, c_op, alpha, beta)?;
                    }
                }
                Ok(())
            }
        }

        /// Every operation declared in the backend table.
        pub const OPERATIONS: &[&str] = &[$(stringify!($name)),*];
    };
}

backend_table! {
    /// Binds `buffer` to `buffer.total_size()` fresh bytes.
    fn alloc(buffer: &mut MemoryBuffer) -> () => buffer;
    /// Releases the memory behind `buffer` and unbinds it.
    fn free(buffer: &mut MemoryBuffer) -> () => buffer;
    /// `dest = source`.
    fn copy(dest: &MemoryBuffer, source: &MemoryBuffer) -> () => dest;
    /// Host bytes into `dest`.
    fn upload(dest: &MemoryBuffer, host: &[u8]) -> () => dest;
    /// `source` into host bytes.
    fn download(source: &MemoryBuffer, host: &mut [u8]) -> () => source;

    /// `z[i] = value`.
    fn initialize(z: &MemoryBuffer, value: f64) -> () => z;
    /// Evenly spaced values from `x0` to `x1` inclusive.
    fn lin_space(z: &MemoryBuffer, x0: f64, x1: f64) -> () => z;
    /// Uniform samples in `[0, 1)`.
    fn random_uniform(z: &MemoryBuffer, seed: u64) -> () => z;
    /// Standard normal samples.
    fn random_gaussian(z: &MemoryBuffer, seed: u64) -> () => z;
    /// Identity matrix.
    fn eye(a: &MemoryTile) -> () => a;

    /// `z = alpha * x + y`.
    fn add(z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> () => z;
    /// `z = x - y`.
    fn subtract(z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer) -> () => z;
    /// `z += alpha * x`.
    fn add_equal(z: &MemoryBuffer, x: &MemoryBuffer, alpha: f64) -> () => z;
    /// `A = alpha * op(A) + beta * op(B)`.
    fn add_equal_matrix(
        a: &MemoryTile,
        b: &MemoryTile,
        a_op: MatrixOperation,
        b_op: MatrixOperation,
        alpha: f64,
        beta: f64,
    ) -> () => a;
    /// Adds `alpha * x` to every row (`row_wise`) or every column of `A`.
    fn add_broadcast(a: &MemoryTile, x: &MemoryBuffer, row_wise: bool, alpha: f64) -> () => a;
    /// `z *= alpha`.
    fn scale(z: &MemoryBuffer, alpha: f64) -> () => z;
    /// Column `j` of `A` scaled by `alpha[j]`.
    fn scale_columns(a: &MemoryTile, alpha: &MemoryBuffer) -> () => a;
    /// `z = alpha * x ∘ y`.
    fn elementwise_product(z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> () => z;
    /// `z = alpha * x / y`.
    fn elementwise_division(z: &MemoryBuffer, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> () => z;

    /// `A = alpha * op(B) * op(C) + beta * A`.
    fn multiply(
        a: &MemoryTile,
        b: &MemoryTile,
        c: &MemoryTile,
        b_op: MatrixOperation,
        c_op: MatrixOperation,
        alpha: f64,
        beta: f64,
    ) -> () => a;
    /// [`Backend::multiply`] restricted to the leading `n_rows_b × n_cols_b` block
    /// of `op(B)` and `n_cols_b × n_cols_c` block of `op(C)`.
    fn sub_multiply(
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
    ) -> () => a;
    /// `y = alpha * op(A) * x + beta * y`.
    fn dot(
        y: &MemoryBuffer,
        a: &MemoryTile,
        x: &MemoryBuffer,
        a_op: MatrixOperation,
        alpha: f64,
        beta: f64,
    ) -> () => y;
    /// `A += alpha * x * yᵀ`.
    fn kronecker_product(a: &MemoryTile, x: &MemoryBuffer, y: &MemoryBuffer, alpha: f64) -> () => a;
    /// `T_k += alpha * x[:, k] * y[:, k]ᵀ` for every slice `k`.
    fn batched_transposed_kronecker_product(
        t: &MemoryCube,
        x: &MemoryTile,
        y: &MemoryTile,
        alpha: f64,
    ) -> () => t;
    /// Running sum along each row, in place.
    fn cumulative_row_sum(a: &MemoryTile) -> () => a;
    /// `B = op(A)⁻¹ B`; `A` serves as workspace and is left unspecified.
    fn solve(
        a: &MemoryTile,
        b: &MemoryTile,
        a_op: MatrixOperation,
        solver: LinearSystemSolverType,
    ) -> () => a;

    /// Position of the smallest `|x[i]|`, first on ties.
    fn arg_abs_min(x: &MemoryBuffer) -> usize => x;
    /// Position of the largest `|x[i]|`, first on ties.
    fn arg_abs_max(x: &MemoryBuffer) -> usize => x;
    /// One-based [`Backend::arg_abs_min`] of each column, written to an `Int32` buffer.
    fn column_wise_arg_abs_min(out: &MemoryBuffer, a: &MemoryTile) -> () => a;
    /// One-based [`Backend::arg_abs_max`] of each column, written to an `Int32` buffer.
    fn column_wise_arg_abs_max(out: &MemoryBuffer, a: &MemoryTile) -> () => a;
    /// `sqrt(sum(x[i]^2))`.
    fn euclidean_norm(x: &MemoryBuffer) -> f64 => x;
    fn sum(x: &MemoryBuffer) -> f64 => x;
    fn min(x: &MemoryBuffer) -> f64 => x;
    fn max(x: &MemoryBuffer) -> f64 => x;
    /// Smallest `|x[i]|`.
    fn abs_min(x: &MemoryBuffer) -> f64 => x;
    /// Largest `|x[i]|`.
    fn abs_max(x: &MemoryBuffer) -> f64 => x;

    /// `z = alpha * x + y` with sparse `x`.
    fn sparse_add(z: &MemoryBuffer, x: &SparseMemoryBuffer, y: &MemoryBuffer, alpha: f64) -> () => x;
    /// `y = alpha * op(A) * x + beta * y` with CSR `A`.
    fn sparse_dot(
        y: &MemoryBuffer,
        a: &SparseMemoryTile,
        x: &MemoryBuffer,
        a_op: MatrixOperation,
        alpha: f64,
        beta: f64,
    ) -> () => a;
    /// `A = alpha * op(B) * C + beta * A` with CSR `B`.
    fn sparse_multiply(
        a: &MemoryTile,
        b: &SparseMemoryTile,
        c: &MemoryTile,
        b_op: MatrixOperation,
        alpha: f64,
        beta: f64,
    ) -> () => b;
}

lazy_static! {
    static ref INSTALLED: RwLock<[Option<&'static dyn Backend>; MemorySpace::COUNT]> =
        RwLock::new([None; MemorySpace::COUNT]);
}

/// Registers the backend serving `space`, returning the one it replaces.
///
/// # Panics
/// Panics for `Null` and for the built-in `Test` and `Cpu` spaces.
pub fn install(space: MemorySpace, backend: &'static dyn Backend) -> Option<&'static dyn Backend> {
    assert!(
        !matches!(space, MemorySpace::Null | MemorySpace::Test | MemorySpace::Cpu),
        "{space} memory is served by a built-in backend"
    );
    tracing::info!(%space, backend = backend.name(), "installing backend");
    INSTALLED.write()[space.index()].replace(backend)
}

/// Removes the backend registered for `space`.
pub fn uninstall(space: MemorySpace) -> Option<&'static dyn Backend> {
    INSTALLED.write()[space.index()].take()
}

/// Whether calls on `space` currently reach a backend.
pub fn is_available(space: MemorySpace) -> bool {
    lookup(space).is_some()
}

fn lookup(space: MemorySpace) -> Option<&'static dyn Backend> {
    match space {
        MemorySpace::Null => None,
        MemorySpace::Test => Some(&REFERENCE as &'static dyn Backend),
        MemorySpace::Cpu => Some(&CPU as &'static dyn Backend),
        _ => INSTALLED.read()[space.index()],
    }
}

/// The backend serving `space`, or [`Error::Unsupported`] naming `operation`.
pub fn backend_for(
    space: MemorySpace,
    operation: &'static str,
    domain: MathDomain,
) -> Result<&'static dyn Backend> {
    match lookup(space) {
        Some(backend) => {
            trace!(operation, %space, ?domain, backend = backend.name(), "dispatch");
            Ok(backend)
        }
        None => Err(Error::unsupported(operation, space, domain)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;

    impl Backend for Empty {
        fn name(&self) -> &'static str {
            "empty"
        }
    }

    #[test]
    fn defaults_report_unsupported() {
        let z = MemoryBuffer::new(0x40, 4, MemorySpace::Host, MathDomain::Float32);
        let err = unsafe { Empty.scale(&z, 2.0) }.unwrap_err();
        assert_eq!(
            err,
            Error::Unsupported {
                operation: "scale",
                space: MemorySpace::Host,
                domain: MathDomain::Float32
            }
        );
    }

    #[test]
    fn built_in_spaces_are_always_available() {
        assert!(is_available(MemorySpace::Test));
        assert!(is_available(MemorySpace::Cpu));
        assert!(!is_available(MemorySpace::Null));
    }

    #[test]
    fn table_lists_each_operation_once() {
        let mut names = OPERATIONS.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), OPERATIONS.len());
        assert!(OPERATIONS.contains(&"sparse_multiply"));
    }

    #[test]
    #[should_panic(expected = "built-in backend")]
    fn built_in_spaces_cannot_be_replaced() {
        static EMPTY: Empty = Empty;
        install(MemorySpace::Test, &EMPTY);
    }
}
