//! # Operation Dispatch Layer
//!
//! This module validates operations on descriptors and routes them to the
//! backend serving the operands' memory space.
//!
//! ## Submodules
//!
//! - [`dispatch`]: shape/space/domain checks and forwarding for every primitive
//! - [`reference`]: scalar reference backend (`MemorySpace::Test`), the ground truth
//! - [`cpu`]: multi-threaded host backend (`MemorySpace::Cpu`) built on `rayon`
//!
//! The scalar kernels shared by both in-crate backends live in private
//! `kernels` and `linalg` modules.
//!
//! ## Extending the Backend
//!
//! To add a new operation:
//!
//! 1. Declare it once in the table in [`crate::backend`]
//! 2. Implement it in one or more backends
//! 3. Add shape/consistency checks to [`dispatch`]
//!
//! ## Notes
//!
//! - Operations block until complete; asynchronous backends synchronize
//!   through [`dispatch::synchronize`]
//! - Domains or spaces nobody implements yield [`crate::Error::Unsupported`]

/// Runs `$body` with `$t` bound to the Rust type of `$probe.math_domain`.
macro_rules! with_element {
    ($probe:expr, $op:literal, |$t:ident| $body:expr) => {{
        let probe = $probe;
        match probe.math_domain {
            $crate::domain::MathDomain::Int32 => {
                type $t = i32;
                $body
            }
            $crate::domain::MathDomain::Float32 => {
                type $t = f32;
                $body
            }
            $crate::domain::MathDomain::Float64 => {
                type $t = f64;
                $body
            }
            $crate::domain::MathDomain::Null => Err($crate::error::Error::unsupported(
                $op,
                probe.memory_space,
                probe.math_domain,
            )),
        }
    }};
}

/// [`with_element!`] for operations only defined on floating domains.
macro_rules! with_real {
    ($probe:expr, $op:literal, |$t:ident| $body:expr) => {{
        let probe = $probe;
        match probe.math_domain {
            $crate::domain::MathDomain::Float32 => {
                type $t = f32;
                $body
            }
            $crate::domain::MathDomain::Float64 => {
                type $t = f64;
                $body
            }
            domain => Err($crate::error::Error::unsupported($op, probe.memory_space, domain)),
        }
    }};
}

pub mod cpu;
pub mod dispatch;
pub(crate) mod kernels;
pub(crate) mod linalg;
pub mod reference;

/// Transposition applied to a matrix operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum MatrixOperation {
    #[default]
    None = 0,
    Transpose = 1,
}

impl MatrixOperation {
    /// `(rows, cols)` of `op(A)` for an `rows × cols` matrix `A`.
    pub const fn apply(self, rows: usize, cols: usize) -> (usize, usize) {
        match self {
            Self::None => (rows, cols),
            Self::Transpose => (cols, rows),
        }
    }

    pub const fn is_transposed(self) -> bool {
        matches!(self, Self::Transpose)
    }
}

/// Factorization used by [`dispatch::solve`] and [`dispatch::invert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum LinearSystemSolverType {
    /// LU with partial pivoting; square systems only.
    #[default]
    Lu = 0,
    /// Householder QR; least squares when the system is tall.
    Qr = 1,
}
