//! Utilities to approximate equality of buffer elements.
//!
//! Two elements are considered equal when their absolute difference does not
//! exceed the [tolerance](crate::MathDomain::tolerance) of their domain:
//! exact for `Int32`, `1e-7` for `Float32`, `1e-15` for `Float64`.

use crate::domain::Element;

/// Checks the distance between two values against the domain tolerance.
pub trait ApproxEq<Rhs: ?Sized = Self> {
    /// Grades how close `self` is to `rhs`.
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

/// The approximated equality enumerated.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Bit-for-bit equal values.
    Exact = 0,

    /// Different, but within tolerance.
    Close = 1,

    /// Further apart than the tolerance, or of different lengths.
    Distinct = 2,
}

impl ApproxEquality {
    pub const fn is_equal(self) -> bool {
        !matches!(self, Self::Distinct)
    }
}

/// Grades two elements of the same domain.
pub fn grade<T: Element>(a: T, b: T) -> ApproxEquality {
    if a == b {
        return ApproxEquality::Exact;
    }
    let diff = (a.to_f64() - b.to_f64()).abs();
    if diff <= T::DOMAIN.tolerance() {
        ApproxEquality::Close
    } else {
        ApproxEquality::Distinct
    }
}

macro_rules! impl_approx_eq {
    ($($t:ty),*) => {
        $(
            impl ApproxEq for $t {
                fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
                    grade(*self, *rhs)
                }
            }
        )*
    };
}

impl_approx_eq!(i32, f32, f64);

impl<T: ApproxEq> ApproxEq for [T] {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Distinct;
        }
        let mut eq = ApproxEquality::Exact;
        for (a, b) in self.iter().zip(rhs) {
            eq = eq.max(a.approx_eq(b));
            if eq == ApproxEquality::Distinct {
                break; // can't get worse
            }
        }
        eq
    }
}

impl<T: ApproxEq> ApproxEq for Vec<T> {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        self.as_slice().approx_eq(rhs.as_slice())
    }
}

/// Whether `a` and `b` are equal within the domain tolerance.
pub fn approx_eq<A: ApproxEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b).is_equal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_compare_exactly() {
        assert_eq!(3i32.approx_eq(&3), ApproxEquality::Exact);
        assert_eq!(3i32.approx_eq(&4), ApproxEquality::Distinct);
    }

    #[test]
    fn floats_use_domain_tolerance() {
        assert_eq!(1.0f64.approx_eq(&(1.0 + 1e-16)), ApproxEquality::Exact);
        assert_eq!(0.3f64.approx_eq(&(0.1 + 0.2)), ApproxEquality::Close);
        assert_eq!(1.0f64.approx_eq(&(1.0 + 1e-12)), ApproxEquality::Distinct);
        assert!(approx_eq(&0.5f32, &(0.5 + 5e-8)));
    }

    #[test]
    fn slices_take_the_worst_grade() {
        let a = [1.0f64, 2.0, 3.0];
        assert!(approx_eq(&a[..], &[1.0, 2.0, 3.0][..]));
        assert!(!approx_eq(&a[..], &[1.0, 2.0][..]));
        assert!(!approx_eq(&a[..], &[1.0, 2.5, 3.0][..]));
    }
}
