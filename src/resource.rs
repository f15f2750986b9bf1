//! Memory resources backing heap-resident values.

use core::alloc::Layout;
use core::any::Any;
use core::mem;
use core::ptr::{self, NonNull};

#[cfg(not(feature = "std"))]
use alloc::alloc::{alloc, dealloc};
#[cfg(feature = "std")]
use std::alloc::{alloc, dealloc};

use crate::AllocError;

/// A source of raw memory blocks.
///
/// Containers in this crate borrow a resource for as long as they hold memory
/// obtained from it. They never call it with a zero-sized layout.
///
/// # Example
///
/// ```
/// use core::alloc::Layout;
/// use smallany::{default_resource, MemoryResource};
///
/// let layout = Layout::new::<[u64; 4]>();
/// let block = default_resource().allocate(layout).unwrap();
/// unsafe { default_resource().deallocate(block, layout) };
/// ```
pub trait MemoryResource {
    /// Allocates a block that fits `layout`.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Releases a block previously returned by [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this resource, or on one that
    /// [`is_equal`](Self::is_equal) to it, called with exactly `layout`, and
    /// must not have been released already.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Whether memory allocated from `self` can be released through `other`
    /// and vice versa.
    ///
    /// Defaults to identity of the two objects. Zero-sized resources have no
    /// address of their own, so they are never equal to anything by default;
    /// stateless resources override this, usually by downcasting `other`
    /// through [`as_any`](Self::as_any).
    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        mem::size_of_val(self) != 0 && ptr::addr_eq(self, other)
    }

    /// The resource as [`Any`], for `'static` resources that compare by type
    /// or state in [`is_equal`](Self::is_equal).
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

/// The process-wide resource backed by the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct Global;

static GLOBAL: Global = Global;

/// Returns the resource used when the caller does not supply one.
pub fn default_resource() -> &'static dyn MemoryResource {
    &GLOBAL
}

impl MemoryResource for Global {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            return Err(AllocError::new(layout));
        }
        // SAFETY: the layout has a non-zero size.
        NonNull::new(unsafe { alloc(layout) }).ok_or(AllocError::new(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: guaranteed by the caller.
        unsafe { dealloc(ptr.as_ptr(), layout) }
    }

    /// Every `Global` hands out blocks of the same global allocator.
    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        other.as_any().is_some_and(|other| other.is::<Global>())
    }

    fn as_any(&self) -> Option<&dyn Any> {
        let any: &dyn Any = self;
        Some(any)
    }
}

/// Two bindings are interchangeable when they are the same sized object or
/// the resources report each other as equal.
pub(crate) fn same_resource(a: &dyn MemoryResource, b: &dyn MemoryResource) -> bool {
    (mem::size_of_val(a) != 0 && ptr::addr_eq(a, b)) || a.is_equal(b)
}
