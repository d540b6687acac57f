//! Numeric domains.
//!
//! [`MathDomain`] is the runtime tag stored in descriptors; [`Element`] binds a
//! Rust scalar type to its tag at compile time so typed buffers never disagree
//! with the descriptors they carry.

use briny::prelude::{Raw, Validate, ValidationError};
use crate::approx::ApproxEq;
use core::fmt::Debug;
use core::ops::{Add, Div, Mul, Sub};

/// Element type of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum MathDomain {
    /// Unbound descriptor.
    #[default]
    Null = 0,
    /// 32-bit signed integers.
    Int32 = 1,
    /// IEEE-754 single precision.
    Float32 = 2,
    /// IEEE-754 double precision.
    Float64 = 3,
}

impl MathDomain {
    /// Width of one element in bytes.
    pub const fn elementary_size(self) -> usize {
        match self {
            Self::Null => 0,
            Self::Int32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Absolute tolerance used when comparing two buffers of this domain.
    pub const fn tolerance(self) -> f64 {
        match self {
            Self::Null | Self::Int32 => 0.0,
            Self::Float32 => 1e-7,
            Self::Float64 => 1e-15,
        }
    }

    /// Whether the domain holds floating point values.
    pub const fn is_real(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

impl TryFrom<u8> for MathDomain {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Null),
            1 => Ok(Self::Int32),
            2 => Ok(Self::Float32),
            3 => Ok(Self::Float64),
            _ => Err(()),
        }
    }
}

impl Raw<1> for MathDomain {
    fn from_bytes(bytes: [u8; 1]) -> Result<Self, ValidationError> {
        Self::try_from(bytes[0]).map_err(|()| ValidationError)
    }

    fn to_bytes(&self) -> [u8; 1] {
        [*self as u8]
    }
}

impl Validate for MathDomain {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.elementary_size() == 0 {
            Err(ValidationError)
        } else {
            Ok(())
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// A scalar type that can be stored in a buffer.
///
/// Implemented for `i32`, `f32` and `f64` only. Scalars crossing the backend
/// boundary travel as `f64` and are narrowed with [`Element::from_f64`].
pub trait Element:
    sealed::Sealed
    + Copy
    + Default
    + PartialEq
    + PartialOrd
    + Debug
    + Send
    + Sync
    + 'static
    + ApproxEq
{
    /// Runtime tag of this type.
    const DOMAIN: MathDomain;
    /// Additive identity.
    const ZERO: Self;
    /// Multiplicative identity.
    const ONE: Self;

    /// Narrowing conversion from a backend scalar.
    fn from_f64(value: f64) -> Self;
    /// Widening conversion to a backend scalar.
    fn to_f64(self) -> f64;
    /// Absolute value.
    fn abs(self) -> Self;

    /// `self + rhs`, wrapping around on integer overflow.
    fn wrapping_add(self, rhs: Self) -> Self;
    /// `self - rhs`, wrapping around on integer overflow.
    fn wrapping_sub(self, rhs: Self) -> Self;
    /// `self * rhs`, wrapping around on integer overflow.
    fn wrapping_mul(self, rhs: Self) -> Self;
    /// `self / rhs`. Integer division by zero panics.
    fn wrapping_div(self, rhs: Self) -> Self;

    /// `self * a + b` with the wrapping operations above.
    #[inline]
    fn mul_plus(self, a: Self, b: Self) -> Self {
        self.wrapping_mul(a).wrapping_add(b)
    }
}

/// Floating point elements.
pub trait Real: Element + Add<Output = Self> + Sub<Output = Self> + Mul<Output = Self> + Div<Output = Self> {
    /// Square root.
    fn sqrt(self) -> Self;
}

macro_rules! impl_element {
    ($t:ty, $domain:ident, $zero:expr, $one:expr, |$v:ident| $abs:expr, |$a:ident, $b:ident| [$add:expr, $sub:expr, $mul:expr, $div:expr]) => {
        impl Element for $t {
            const DOMAIN: MathDomain = MathDomain::$domain;
            const ZERO: Self = $zero;
            const ONE: Self = $one;

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $t
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn abs(self) -> Self {
                let $v = self;
                $abs
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                let ($a, $b) = (self, rhs);
                $add
            }

            #[inline]
            fn wrapping_sub(self, rhs: Self) -> Self {
                let ($a, $b) = (self, rhs);
                $sub
            }

            #[inline]
            fn wrapping_mul(self, rhs: Self) -> Self {
                let ($a, $b) = (self, rhs);
                $mul
            }

            #[inline]
            fn wrapping_div(self, rhs: Self) -> Self {
                let ($a, $b) = (self, rhs);
                $div
            }
        }
    };
}

impl_element!(i32, Int32, 0, 1, |v| v.wrapping_abs(), |a, b| [
    i32::wrapping_add(a, b),
    i32::wrapping_sub(a, b),
    i32::wrapping_mul(a, b),
    i32::wrapping_div(a, b)
]);
impl_element!(f32, Float32, 0.0, 1.0, |v| v.abs(), |a, b| [a + b, a - b, a * b, a / b]);
impl_element!(f64, Float64, 0.0, 1.0, |v| v.abs(), |a, b| [a + b, a - b, a * b, a / b]);

impl Real for f32 {
    #[inline]
    fn sqrt(self) -> Self {
        f32::sqrt(self)
    }
}

impl Real for f64 {
    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
}

/// Reinterprets a slice of elements as bytes.
pub(crate) fn as_bytes<T: Element>(values: &[T]) -> &[u8] {
    // SAFETY: `Element` is sealed to plain numeric types without padding.
    unsafe { core::slice::from_raw_parts(values.as_ptr().cast::<u8>(), size_of_val(values)) }
}

/// Reinterprets a mutable slice of elements as bytes.
pub(crate) fn as_bytes_mut<T: Element>(values: &mut [T]) -> &mut [u8] {
    let len = size_of_val(values);
    // SAFETY: every bit pattern is a valid `i32`, `f32` or `f64`.
    unsafe { core::slice::from_raw_parts_mut(values.as_mut_ptr().cast::<u8>(), len) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_rust_types() {
        assert_eq!(MathDomain::Int32.elementary_size(), size_of::<i32>());
        assert_eq!(MathDomain::Float32.elementary_size(), size_of::<f32>());
        assert_eq!(MathDomain::Float64.elementary_size(), size_of::<f64>());
        assert_eq!(MathDomain::Null.elementary_size(), 0);
    }

    #[test]
    fn tolerances() {
        assert_eq!(MathDomain::Int32.tolerance(), 0.0);
        assert_eq!(MathDomain::Float32.tolerance(), 1e-7);
        assert_eq!(MathDomain::Float64.tolerance(), 1e-15);
    }

    #[test]
    fn element_tags() {
        assert_eq!(<i32 as Element>::DOMAIN, MathDomain::Int32);
        assert_eq!(<f32 as Element>::DOMAIN, MathDomain::Float32);
        assert_eq!(<f64 as Element>::DOMAIN, MathDomain::Float64);
        assert_eq!(<i32 as Element>::abs(-3), 3);
        assert_eq!(i32::from_f64(2.9), 2);
    }

    #[test]
    fn integer_arithmetic_wraps() {
        assert_eq!(Element::wrapping_add(i32::MAX, 1), i32::MIN);
        assert_eq!(Element::wrapping_mul(i32::MAX, 2), -2);
        assert_eq!(Element::wrapping_div(i32::MIN, -1), i32::MIN);
        assert_eq!(1i32.mul_plus(1, i32::MAX), i32::MAX);
        assert_eq!(2.0f64.mul_plus(3.0, 1.0), 7.0);
    }

    #[test]
    fn decodes_tags_from_bytes() {
        assert_eq!(MathDomain::from_bytes([3]).ok(), Some(MathDomain::Float64));
        assert!(MathDomain::from_bytes([4]).is_err());
        assert!(MathDomain::Null.validate().is_err());
        assert!(MathDomain::Int32.validate().is_ok());
        assert_eq!(MathDomain::Float32.to_bytes(), [2]);
    }

    #[test]
    fn byte_views_cover_whole_slice() {
        let mut v = [1.0f64, 2.0];
        assert_eq!(as_bytes(&v).len(), 16);
        as_bytes_mut(&mut v)[..8].copy_from_slice(&3.0f64.to_ne_bytes());
        assert_eq!(v[0], 3.0);
    }
}
