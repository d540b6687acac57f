//! Error types.
//!
//! Only two failures are recoverable at this layer: a combination nobody
//! implements, and a status code reported by a backend. Shape, space and
//! domain mismatches are programmer errors and panic at the call site.

use crate::domain::MathDomain;
use crate::space::MemorySpace;

/// Errors surfaced by allocation, copy and dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No backend implements `operation` for this space and domain.
    #[error("`{operation}` is not supported for {domain:?} buffers in {space} memory")]
    Unsupported {
        operation: &'static str,
        space: MemorySpace,
        domain: MathDomain,
    },

    /// A backend call returned a non-zero status.
    #[error("{backend} backend failed in `{operation}` with status {code}")]
    Backend {
        backend: &'static str,
        operation: &'static str,
        code: i32,
    },
}

impl Error {
    pub(crate) const fn unsupported(
        operation: &'static str,
        space: MemorySpace,
        domain: MathDomain,
    ) -> Self {
        Self::Unsupported {
            operation,
            space,
            domain,
        }
    }

    /// Status code reported by the backend, if any.
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Backend { code, .. } => Some(*code),
            Self::Unsupported { .. } => None,
        }
    }

    /// Whether this is an [`Error::Unsupported`].
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
