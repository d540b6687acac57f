//! Allocation and copy dispatch.
//!
//! [`alloc`], [`free`] and [`copy`] route to the backend serving the
//! descriptor's memory space. Backends without a dedicated allocator (the
//! reference backend, the parallel host backend, host BLAS libraries) use the
//! generic allocator in this module: 64-byte aligned, zero-filled, and tracked
//! in a process-wide registry so that a double free or the free of a view is
//! caught instead of corrupting the heap.
//!
//! # Accounting
//!
//! Every generic allocation is counted in [`AllocationStats`]. Counters are
//! kept per thread, which keeps them exact under a parallel test harness.

use crate::backend::backend_for;
use crate::descriptor::{Descriptor, MemoryBuffer};
use crate::domain::MathDomain;
use crate::error::Result;
use core::cell::Cell;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::alloc::Layout;
use std::collections::HashMap;
use tracing::debug;

/// Alignment of every generic allocation, in bytes.
pub const ALIGNMENT: usize = 64;

lazy_static! {
    /// Live generic allocations: address → layout.
    static ref LIVE: Mutex<HashMap<usize, Layout>> = Mutex::new(HashMap::new());
}

thread_local! {
    static STATS: Cell<AllocationStats> = const { Cell::new(AllocationStats::new()) };
}

/// Counters for the generic allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    /// Number of successful allocations.
    pub allocations: u64,
    /// Number of frees.
    pub deallocations: u64,
    /// Bytes currently allocated.
    pub live_bytes: usize,
    /// Highest value `live_bytes` has reached.
    pub peak_bytes: usize,
    /// Bytes ever allocated.
    pub cumulative_bytes: u64,
}

impl AllocationStats {
    const fn new() -> Self {
        Self {
            allocations: 0,
            deallocations: 0,
            live_bytes: 0,
            peak_bytes: 0,
            cumulative_bytes: 0,
        }
    }

    /// Allocations not yet freed.
    pub const fn outstanding(&self) -> u64 {
        self.allocations - self.deallocations
    }

    fn record_allocation(&mut self, bytes: usize) {
        self.allocations += 1;
        self.live_bytes += bytes;
        self.peak_bytes = self.peak_bytes.max(self.live_bytes);
        self.cumulative_bytes += bytes as u64;
    }

    fn record_deallocation(&mut self, bytes: usize) {
        self.deallocations += 1;
        self.live_bytes = self.live_bytes.saturating_sub(bytes);
    }
}

/// Generic allocator counters of the calling thread.
pub fn stats() -> AllocationStats {
    STATS.with(Cell::get)
}

/// Number of generic allocations alive in the whole process.
pub fn live_allocations() -> usize {
    LIVE.lock().len()
}

/// Whether `pointer` is the start of a live generic allocation.
pub fn is_live(pointer: usize) -> bool {
    LIVE.lock().contains_key(&pointer)
}

fn layout_for(bytes: usize) -> Layout {
    // zero-sized requests still get their own address
    match Layout::from_size_align(bytes.max(1), ALIGNMENT) {
        Ok(layout) => layout,
        Err(_) => panic!("allocation of {bytes} bytes exceeds the address space"),
    }
}

/// Allocates `buffer.total_size()` zeroed bytes and binds `buffer` to them.
///
/// Allocation failure aborts through [`std::alloc::handle_alloc_error`].
///
/// # Panics
/// Panics if `buffer` is already bound.
pub fn generic_alloc(buffer: &mut MemoryBuffer) {
    assert!(!buffer.is_bound(), "buffer at {:#x} is already bound", buffer.pointer);
    let bytes = buffer.total_size();
    let layout = layout_for(bytes);
    // SAFETY: `layout` has a non-zero size.
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        std::alloc::handle_alloc_error(layout);
    }
    let address = ptr as usize;
    LIVE.lock().insert(address, layout);
    STATS.with(|s| {
        let mut stats = s.get();
        stats.record_allocation(bytes);
        s.set(stats);
    });
    buffer.pointer = address;
    debug!(address, bytes, space = %buffer.memory_space, "allocated");
}

/// Releases memory obtained from [`generic_alloc`] and unbinds `buffer`.
///
/// # Panics
/// Panics if `buffer.pointer` is not the start of a live generic allocation:
/// a second free of the same memory, or a free through a view.
pub fn generic_free(buffer: &mut MemoryBuffer) {
    let Some(layout) = LIVE.lock().remove(&buffer.pointer) else {
        panic!(
            "free of {:#x}, which is not a live allocation (double free or view)",
            buffer.pointer
        );
    };
    // SAFETY: the registry only holds addresses returned by `alloc_zeroed` with this layout.
    unsafe { std::alloc::dealloc(buffer.pointer as *mut u8, layout) };
    STATS.with(|s| {
        let mut stats = s.get();
        stats.record_deallocation(buffer.total_size());
        s.set(stats);
    });
    debug!(address = buffer.pointer, space = %buffer.memory_space, "freed");
    buffer.pointer = 0;
}

/// Binds an unbound descriptor to fresh memory from its space's backend.
///
/// # Panics
/// Panics if the descriptor is already bound or has no domain.
pub fn alloc<D: Descriptor>(descriptor: &mut D) -> Result<()> {
    let mut header = descriptor.header();
    assert!(!header.is_bound(), "descriptor at {:#x} is already bound", header.pointer);
    assert_ne!(header.math_domain, MathDomain::Null, "cannot allocate a buffer without a domain");
    let backend = backend_for(header.memory_space, "alloc", header.math_domain)?;
    // SAFETY: `header` is unbound, the backend owns what it binds it to.
    unsafe { backend.alloc(&mut header)? };
    descriptor.set_pointer(header.pointer);
    Ok(())
}

/// Returns a descriptor's memory to its space's backend and unbinds it.
///
/// Must be called exactly once per allocation, by its owner.
pub fn free<D: Descriptor>(descriptor: &mut D) -> Result<()> {
    let mut header = descriptor.header();
    let backend = backend_for(header.memory_space, "free", header.math_domain)?;
    // SAFETY: the backend checks the address against its own allocations.
    unsafe { backend.free(&mut header)? };
    descriptor.set_pointer(0);
    Ok(())
}

/// Deep copy of `source` into `dest`.
///
/// # Safety
/// Both descriptors must describe live memory of their declared size.
///
/// # Panics
/// Panics if space, domain or size differ.
pub unsafe fn copy(dest: &MemoryBuffer, source: &MemoryBuffer) -> Result<()> {
    assert_eq!(dest.memory_space, source.memory_space, "copy across memory spaces");
    assert_eq!(dest.math_domain, source.math_domain, "copy across math domains");
    assert_eq!(dest.size, source.size, "copy between buffers of different size");
    let backend = backend_for(dest.memory_space, "copy", dest.math_domain)?;
    unsafe { backend.copy(dest, source) }
}

/// Copies host bytes into `dest`.
///
/// # Safety
/// `dest` must describe live memory of its declared size.
///
/// # Panics
/// Panics if `host` is not exactly `dest.total_size()` bytes.
pub unsafe fn upload(dest: &MemoryBuffer, host: &[u8]) -> Result<()> {
    assert_eq!(host.len(), dest.total_size(), "host slice does not match buffer size");
    let backend = backend_for(dest.memory_space, "upload", dest.math_domain)?;
    unsafe { backend.upload(dest, host) }
}

/// Copies `source` into host bytes.
///
/// # Safety
/// `source` must describe live memory of its declared size.
///
/// # Panics
/// Panics if `host` is not exactly `source.total_size()` bytes.
pub unsafe fn download(source: &MemoryBuffer, host: &mut [u8]) -> Result<()> {
    assert_eq!(host.len(), source.total_size(), "host slice does not match buffer size");
    let backend = backend_for(source.memory_space, "download", source.math_domain)?;
    unsafe { backend.download(source, host) }
}

/// `memcpy` between two host-addressable buffers of equal size.
///
/// # Safety
/// Both descriptors must describe live host memory.
pub(crate) unsafe fn host_copy(dest: &MemoryBuffer, source: &MemoryBuffer) {
    if dest.pointer == source.pointer {
        return;
    }
    // SAFETY: guaranteed by the caller; `copy` handles overlapping views.
    unsafe {
        core::ptr::copy(
            source.pointer as *const u8,
            dest.pointer as *mut u8,
            source.total_size(),
        );
    }
}

/// # Safety
/// `dest` must describe live host memory of `host.len()` bytes.
pub(crate) unsafe fn host_upload(dest: &MemoryBuffer, host: &[u8]) {
    unsafe { core::ptr::copy_nonoverlapping(host.as_ptr(), dest.pointer as *mut u8, host.len()) };
}

/// # Safety
/// `source` must describe live host memory of `host.len()` bytes.
pub(crate) unsafe fn host_download(source: &MemoryBuffer, host: &mut [u8]) {
    unsafe {
        core::ptr::copy_nonoverlapping(source.pointer as *const u8, host.as_mut_ptr(), host.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::MemorySpace;
    use core::ptr::NonNull;

    #[test]
    fn generic_alloc_is_aligned_and_zeroed() {
        let mut buf = MemoryBuffer::unbound(17, MemorySpace::Test, MathDomain::Float64);
        generic_alloc(&mut buf);
        assert_eq!(buf.pointer % ALIGNMENT, 0);
        assert!(is_live(buf.pointer));
        let mut host = vec![0xffu8; buf.total_size()];
        unsafe { host_download(&buf, &mut host) };
        assert!(host.iter().all(|&b| b == 0));
        let address = buf.pointer;
        generic_free(&mut buf);
        assert_eq!(buf.pointer, 0);
        assert!(!is_live(address));
    }

    #[test]
    fn zero_sized_allocations_are_distinct() {
        let mut a = MemoryBuffer::unbound(0, MemorySpace::Test, MathDomain::Int32);
        let mut b = a;
        generic_alloc(&mut a);
        generic_alloc(&mut b);
        assert_ne!(a.pointer, b.pointer);
        generic_free(&mut a);
        generic_free(&mut b);
    }

    #[test]
    fn stats_track_live_bytes() {
        let before = stats();
        let mut buf = MemoryBuffer::unbound(8, MemorySpace::Cpu, MathDomain::Float32);
        generic_alloc(&mut buf);
        assert_eq!(stats().live_bytes, before.live_bytes + 32);
        assert_eq!(stats().outstanding(), before.outstanding() + 1);
        generic_free(&mut buf);
        assert_eq!(stats().live_bytes, before.live_bytes);
        assert_eq!(stats().outstanding(), before.outstanding());
    }

    #[test]
    #[should_panic(expected = "not a live allocation")]
    fn freeing_an_unknown_address_panics() {
        // never handed out: generic allocations are 64-byte aligned
        let mut stale = MemoryBuffer::unbound(4, MemorySpace::Test, MathDomain::Float32);
        stale.pointer = NonNull::<f32>::dangling().as_ptr() as usize;
        generic_free(&mut stale);
    }

    #[test]
    #[should_panic(expected = "double free or view")]
    fn freeing_a_view_panics() {
        let mut buf = MemoryBuffer::unbound(4, MemorySpace::Test, MathDomain::Float32);
        generic_alloc(&mut buf);
        let mut view = buf.range(1, 2);
        generic_free(&mut view);
    }
}
