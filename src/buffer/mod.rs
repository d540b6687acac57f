//! Ownership-aware buffers.
//!
//! A [`Buffer`] pairs a descriptor with the knowledge of who owns the memory
//! behind it. Ownership is a tagged variant rather than a flag:
//!
//! - `Owned`: the buffer allocated the memory;
//! - `Borrowed`: the buffer is a view at some offset into another buffer's
//!   allocation.
//!
//! Both hold a counted handle to the underlying [`Allocation`], which frees
//! the memory exactly once, when the last buffer referring to it is dropped.
//! A view therefore never dangles, even if it outlives the buffer it was
//! carved from, and nothing but the allocation itself ever frees memory.
//!
//! Buffers are `!Send`: aliasing views mutate shared memory without locking.
//!
//! # Copies
//!
//! [`Clone`] (and the fallible [`Buffer::try_clone`]) always deep-copies into
//! fresh owned memory, whether the source owns its memory or is a view.

mod batched;
mod collection;
mod matrix;
mod tensor;
mod vector;

pub use batched::CubeWiseSumCache;
pub use collection::{ColumnVectors, MatrixSlices};

use crate::alloc;
use crate::approx;
use crate::descriptor::{Descriptor, MemoryBuffer, MemoryCube, MemoryTile};
use crate::domain::{self, Element, MathDomain};
use crate::error::Result;
use crate::ops::dispatch;
use crate::space::MemorySpace;
use core::fmt;
use core::marker::PhantomData;
use std::rc::Rc;
use tracing::error;

/// One-dimensional buffer.
pub type Vector<T> = Buffer<MemoryBuffer, T>;
/// Column-major matrix.
pub type Matrix<T> = Buffer<MemoryTile, T>;
/// Stack of equally shaped matrices.
pub type Tensor<T> = Buffer<MemoryCube, T>;

/// A live allocation, released when dropped.
#[derive(Debug)]
pub struct Allocation {
    memory: MemoryBuffer,
}

impl Allocation {
    /// The whole allocated region.
    pub fn memory(&self) -> MemoryBuffer {
        self.memory
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if let Err(e) = alloc::free(&mut self.memory) {
            error!(error = %e, space = %self.memory.memory_space, "failed to release allocation");
        }
    }
}

#[derive(Debug, Clone)]
enum Storage {
    Owned(Rc<Allocation>),
    Borrowed {
        base: Rc<Allocation>,
        /// Elements from the start of `base` to the start of the view.
        offset: usize,
        /// Elements spanned by the view.
        len: usize,
    },
}

impl Storage {
    fn base(&self) -> &Rc<Allocation> {
        match self {
            Self::Owned(base) | Self::Borrowed { base, .. } => base,
        }
    }
}

/// A descriptor together with the ownership of the memory it names.
pub struct Buffer<D: Descriptor, T: Element> {
    descriptor: D,
    storage: Storage,
    _element: PhantomData<T>,
}

impl<D: Descriptor, T: Element> Buffer<D, T> {
    /// Allocates memory for an unbound descriptor and takes ownership of it.
    ///
    /// # Panics
    /// Panics if `descriptor` is bound or not of domain `T`.
    pub fn allocate(mut descriptor: D) -> Result<Self> {
        assert_eq!(
            descriptor.header().math_domain,
            T::DOMAIN,
            "descriptor domain does not match the element type"
        );
        alloc::alloc(&mut descriptor)?;
        let allocation = Rc::new(Allocation {
            memory: descriptor.header(),
        });
        Ok(Self {
            descriptor,
            storage: Storage::Owned(allocation),
            _element: PhantomData,
        })
    }

    /// A non-owning buffer over `descriptor`, which must lie inside this
    /// buffer's allocation.
    ///
    /// # Panics
    /// Panics if `descriptor` reaches outside the allocation.
    pub(crate) fn view_of<E: Descriptor>(&self, descriptor: E) -> Buffer<E, T> {
        let base = Rc::clone(self.storage.base());
        let memory = base.memory;
        let header = descriptor.header();
        let element = memory.elementary_size().max(1);
        assert!(header.pointer >= memory.pointer, "view starts before its allocation");
        let offset = (header.pointer - memory.pointer) / element;
        let len = descriptor.footprint();
        assert!(
            offset + len <= memory.size,
            "view {offset}..{} out of bounds for allocation of {} elements",
            offset + len,
            memory.size
        );
        Buffer {
            descriptor,
            storage: Storage::Borrowed { base, offset, len },
            _element: PhantomData,
        }
    }

    /// The descriptor naming this buffer's memory.
    pub fn descriptor(&self) -> D {
        self.descriptor
    }

    pub fn memory_space(&self) -> MemorySpace {
        self.descriptor.header().memory_space
    }

    pub fn math_domain(&self) -> MathDomain {
        T::DOMAIN
    }

    /// `[rows, cols, cubes]`.
    pub fn dims(&self) -> [usize; 3] {
        self.descriptor.dims()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.descriptor.header().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this buffer allocated its memory (as opposed to being a view).
    pub fn is_owner(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    /// Offset and extent of a view inside its allocation; `None` for an owner.
    pub fn view_range(&self) -> Option<(usize, usize)> {
        match self.storage {
            Storage::Owned(_) => None,
            Storage::Borrowed { offset, len, .. } => Some((offset, len)),
        }
    }

    /// The allocation this buffer's memory belongs to.
    pub fn allocation(&self) -> &Allocation {
        self.storage.base()
    }

    /// Copies the contents to the host, packed column-major.
    pub fn get(&self) -> Result<Vec<T>> {
        let mut host = vec![T::ZERO; self.len()];
        let mut at = 0;
        for segment in self.descriptor.segments() {
            let part = &mut host[at..at + segment.size];
            // SAFETY: the segment lies in memory kept alive by `self.storage`.
            unsafe { alloc::download(&segment, domain::as_bytes_mut(part))? };
            at += segment.size;
        }
        Ok(host)
    }

    /// Overwrites the contents from packed column-major host data.
    ///
    /// # Panics
    /// Panics if `values` does not hold exactly [`Buffer::len`] elements.
    pub fn set(&mut self, values: &[T]) -> Result<()> {
        assert_eq!(values.len(), self.len(), "host data does not match buffer size");
        let mut at = 0;
        for segment in self.descriptor.segments() {
            let part = &values[at..at + segment.size];
            // SAFETY: the segment lies in memory kept alive by `self.storage`.
            unsafe { alloc::upload(&segment, domain::as_bytes(part))? };
            at += segment.size;
        }
        Ok(())
    }

    /// Deep copy into freshly allocated, owned memory.
    pub fn try_clone(&self) -> Result<Self> {
        let copy = Self::allocate(self.descriptor.packed())?;
        let dest = copy.descriptor.header();
        let mut at = 0;
        for segment in self.descriptor.segments() {
            // SAFETY: both regions are kept alive by their storages.
            unsafe { alloc::copy(&dest.range(at, segment.size), &segment)? };
            at += segment.size;
        }
        Ok(copy)
    }

    /// `x = value` for every element.
    pub fn initialize(&mut self, value: T) -> Result<()> {
        for segment in self.descriptor.segments() {
            // SAFETY: the segment lies in memory kept alive by `self.storage`.
            unsafe { dispatch::initialize(&segment, value.to_f64())? };
        }
        Ok(())
    }

    /// `x *= alpha` for every element.
    pub fn scale(&mut self, alpha: T) -> Result<()> {
        for segment in self.descriptor.segments() {
            // SAFETY: the segment lies in memory kept alive by `self.storage`.
            unsafe { dispatch::scale(&segment, alpha.to_f64())? };
        }
        Ok(())
    }
}

impl<D: Descriptor, T: Element> Clone for Buffer<D, T> {
    /// Deep copy.
    ///
    /// # Panics
    /// Panics if the copy cannot be allocated or filled; use
    /// [`Buffer::try_clone`] to handle that.
    fn clone(&self) -> Self {
        self.try_clone()
            .unwrap_or_else(|e| panic!("deep copy of {:?} failed: {e}", self.descriptor))
    }
}

impl<D: Descriptor, T: Element> PartialEq for Buffer<D, T> {
    /// Same shape, and every element within the domain tolerance.
    ///
    /// # Panics
    /// Panics when the buffers live in different memory spaces, or when either
    /// cannot be read back.
    fn eq(&self, other: &Self) -> bool {
        assert_eq!(
            self.memory_space(),
            other.memory_space(),
            "buffers in different memory spaces cannot be compared"
        );
        if self.dims() != other.dims() {
            return false;
        }
        let read = |b: &Self| b.get().unwrap_or_else(|e| panic!("cannot read buffer for comparison: {e}"));
        approx::approx_eq(read(self).as_slice(), read(other).as_slice())
    }
}

impl<D: Descriptor, T: Element> fmt::Debug for Buffer<D, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("descriptor", &self.descriptor)
            .field("owner", &self.is_owner())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_writes_reach_the_parent() {
        let parent = Vector::<f64>::zeros(8, MemorySpace::Test).unwrap();
        let mut view = parent.view(2, 4);
        assert!(!view.is_owner());
        assert_eq!(view.view_range(), Some((2, 4)));
        view.set(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(parent.get().unwrap(), vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn view_keeps_allocation_alive() {
        let before = alloc::stats().outstanding();
        let parent = Vector::from_host(&[1, 2, 3, 4], MemorySpace::Test).unwrap();
        let view = parent.view(1, 2);
        drop(parent);
        assert_eq!(view.get().unwrap(), vec![2, 3]);
        drop(view);
        assert_eq!(alloc::stats().outstanding(), before);
    }

    #[test]
    fn clone_of_view_owns_its_memory() {
        let parent = Vector::from_host(&[1.0f32, 2.0, 3.0], MemorySpace::Cpu).unwrap();
        let copy = parent.view(1, 2).clone();
        assert!(copy.is_owner());
        assert_eq!(copy.get().unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    #[should_panic(expected = "different memory spaces")]
    fn comparing_across_spaces_panics() {
        let a = Vector::<i32>::zeros(2, MemorySpace::Test).unwrap();
        let b = Vector::<i32>::zeros(2, MemorySpace::Cpu).unwrap();
        let _ = a == b;
    }

    fn equal_in_every_domain<T: Element>() {
        let values = [1.0, -2.0, 3.0].map(T::from_f64);
        let a = Matrix::from_host(3, 1, &values, MemorySpace::Cpu).unwrap();
        let b = Matrix::from_host(3, 1, &values, MemorySpace::Cpu).unwrap();
        assert!(a == b);
        assert!(a != Matrix::from_host(1, 3, &values, MemorySpace::Cpu).unwrap());
    }

    #[test]
    fn equality_is_defined_for_every_element_type() {
        equal_in_every_domain::<i32>();
        equal_in_every_domain::<f32>();
        equal_in_every_domain::<f64>();
    }

    #[test]
    fn equality_uses_tolerance() {
        let a = Vector::from_host(&[1.0f64, 2.0], MemorySpace::Test).unwrap();
        let b = Vector::from_host(&[1.0f64, 2.0 + 4e-16], MemorySpace::Test).unwrap();
        let c = Vector::from_host(&[1.0f64, 2.1], MemorySpace::Test).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
