use core::alloc::Layout;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{self, Hash};
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops;
use core::ptr::{self, NonNull};

#[cfg(not(feature = "std"))]
use alloc::alloc::handle_alloc_error;
#[cfg(feature = "std")]
use std::alloc::handle_alloc_error;

use log::trace;

use crate::resource::{default_resource, MemoryResource};
use crate::AllocError;

/// An owning pointer to a value placed in a block of a [`MemoryResource`].
///
/// The block is returned to the same resource when the holder is dropped.
/// Zero-sized values never touch the resource.
///
/// # Example
///
/// ```
/// use core::mem::MaybeUninit;
/// use smallany::{Holder, MonotonicBuffer};
///
/// let mut buffer = [MaybeUninit::uninit(); 64];
/// let arena = MonotonicBuffer::new(&mut buffer);
///
/// let mut position = Holder::new_in((1.0f64, 2.0f64), &arena);
/// position.0 += 1.0;
/// assert_eq!(*position, (2.0, 2.0));
/// assert!(arena.used() >= 16);
/// ```
pub struct Holder<'r, T> {
    ptr: NonNull<T>,
    resource: &'r dyn MemoryResource,
    _phantom: PhantomData<T>,
}

impl<T> Holder<'static, T> {
    /// Places `value` in a block of the default resource.
    pub fn new(value: T) -> Self {
        Holder::new_in(value, default_resource())
    }
}

impl<'r, T> Holder<'r, T> {
    /// Places `value` in a block of `resource`.
    pub fn new_in(value: T, resource: &'r dyn MemoryResource) -> Self {
        Self::try_new_in(value, resource).unwrap_or_else(|err| handle_alloc_error(err.layout()))
    }

    /// Places `value` in a block of `resource`, dropping it if the resource
    /// cannot provide one.
    pub fn try_new_in(value: T, resource: &'r dyn MemoryResource) -> Result<Self, AllocError> {
        let layout = Layout::new::<T>();
        let ptr = if layout.size() == 0 {
            NonNull::<T>::dangling()
        } else {
            let block = resource.allocate(layout)?;
            trace!("allocated {} bytes for a holder", layout.size());
            block.cast()
        };
        // SAFETY: `ptr` is valid for writes of `T` and suitably aligned.
        unsafe { ptr.as_ptr().write(value) };
        Ok(Holder {
            ptr,
            resource,
            _phantom: PhantomData,
        })
    }

    /// The resource the value was placed in.
    pub fn resource(this: &Self) -> &'r dyn MemoryResource {
        this.resource
    }

    /// Moves the value out and returns its block to the resource.
    pub fn into_inner(this: Self) -> T {
        let this = ManuallyDrop::new(this);
        // SAFETY: the value is live and read exactly once, then its block is
        // released without dropping it.
        unsafe {
            let value = this.ptr.as_ptr().read();
            release(this.ptr, this.resource);
            value
        }
    }
}

/// Returns the block of a dead `T` to `resource`.
unsafe fn release<T>(ptr: NonNull<T>, resource: &dyn MemoryResource) {
    let layout = Layout::new::<T>();
    if layout.size() != 0 {
        trace!("releasing {} bytes of a holder", layout.size());
        // SAFETY: the block was allocated from `resource` with `layout`.
        unsafe { resource.deallocate(ptr.cast(), layout) }
    }
}

impl<T> ops::Deref for Holder<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the holder owns a live `T`.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> ops::DerefMut for Holder<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the holder owns a live `T` exclusively.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> ops::Drop for Holder<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the value is live and dropped once, then its block released.
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            release(self.ptr, self.resource);
        }
    }
}

impl<T: Clone> Clone for Holder<'_, T> {
    fn clone(&self) -> Self {
        Holder::new_in((**self).clone(), self.resource)
    }
}

impl<T: fmt::Display> fmt::Display for Holder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T: fmt::Debug> fmt::Debug for Holder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T> fmt::Pointer for Holder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ptr: *const T = &**self;
        fmt::Pointer::fmt(&ptr, f)
    }
}

impl<T: PartialEq> PartialEq for Holder<'_, T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        PartialEq::eq(&**self, &**other)
    }
}

impl<T: PartialOrd> PartialOrd for Holder<'_, T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        PartialOrd::partial_cmp(&**self, &**other)
    }
}

impl<T: Ord> Ord for Holder<'_, T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        Ord::cmp(&**self, &**other)
    }
}

impl<T: Eq> Eq for Holder<'_, T> {}

impl<T: Hash> Hash for Holder<'_, T> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        (**self).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::Holder;
    use std::cell::Cell;

    #[test]
    fn test_drop() {
        #[derive(Debug)]
        struct Struct<'a>(&'a Cell<bool>);
        impl Drop for Struct<'_> {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let flag = Cell::new(false);
        let val = Holder::new(Struct(&flag));
        assert!(!flag.get());
        drop(val);
        assert!(flag.get());
    }

    #[test]
    fn test_into_inner_does_not_drop() {
        let val = Holder::new(String::from("hello"));
        assert_eq!(Holder::into_inner(val), "hello");
    }

    #[test]
    fn test_zst() {
        drop(Holder::new(()));
        let empty = Holder::new([0usize; 0]);
        assert_eq!(*empty, [0usize; 0]);
    }

    #[test]
    fn test_clone() {
        let original = Holder::new(vec![1, 2, 3]);
        let mut copy = original.clone();
        copy.push(4);
        assert_eq!(*original, [1, 2, 3]);
        assert_eq!(*copy, [1, 2, 3, 4]);
        assert!(original < copy);
    }
}
