//! Memory space tags.
//!
//! Every descriptor carries a [`MemorySpace`] naming the allocator and the
//! backend its bytes belong to. Operations only ever combine operands that
//! live in the same space, and the space of the operands is what selects the
//! backend a call is routed to.
//!
//! # Spaces
//!
//! - `Test`: scalar reference backend, the ground truth for correctness tests.
//! - `Cpu`: parallel host backend built on `rayon`.
//! - `Host`: pinned host memory owned by an accelerator runtime.
//! - `Device`: accelerator memory.
//! - `Mkl` / `OpenBlas`: host BLAS libraries.
//!
//! The last four are served by externally supplied backends; see
//! [`crate::backend::install`].

use briny::prelude::{Raw, Validate, ValidationError};
use core::convert::TryFrom;
use core::fmt;

/// Identifies which physical memory (and therefore which backend) a buffer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum MemorySpace {
    /// Unbound descriptor.
    #[default]
    Null = 0,
    /// Scalar reference backend.
    Test = 1,
    /// Parallel host backend.
    Cpu = 2,
    /// Pinned host memory.
    Host = 3,
    /// Accelerator memory.
    Device = 4,
    /// Intel MKL.
    Mkl = 5,
    /// OpenBLAS.
    OpenBlas = 6,
}

impl MemorySpace {
    /// Number of distinct spaces, `Null` included.
    pub const COUNT: usize = 7;

    /// All spaces in discriminant order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Null,
        Self::Test,
        Self::Cpu,
        Self::Host,
        Self::Device,
        Self::Mkl,
        Self::OpenBlas,
    ];

    /// Short lowercase name, used in log records and error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Test => "test",
            Self::Cpu => "cpu",
            Self::Host => "host",
            Self::Device => "device",
            Self::Mkl => "mkl",
            Self::OpenBlas => "openblas",
        }
    }

    /// Whether the process can dereference pointers of this space directly.
    pub const fn is_host_accessible(self) -> bool {
        !matches!(self, Self::Null | Self::Device)
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for MemorySpace {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(value as usize).copied().ok_or(())
    }
}

impl Raw<1> for MemorySpace {
    fn from_bytes(bytes: [u8; 1]) -> Result<Self, ValidationError> {
        Self::try_from(bytes[0]).map_err(|()| ValidationError)
    }

    fn to_bytes(&self) -> [u8; 1] {
        [*self as u8]
    }
}

/// A space is valid once it names real memory; `Null` tags an unbound descriptor.
impl Validate for MemorySpace {
    fn validate(&self) -> Result<(), ValidationError> {
        if *self == Self::Null {
            Err(ValidationError)
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
