use core::alloc::Layout;
use core::cell::Cell;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use log::trace;

use crate::resource::MemoryResource;
use crate::AllocError;

/// A bump resource carving blocks out of a caller-provided buffer.
///
/// Released blocks are not reused; the whole buffer is reclaimed at once by
/// [`release`](Self::release). Requests that no longer fit fail with
/// [`AllocError`].
///
/// # Example
///
/// ```
/// use core::mem::MaybeUninit;
/// use smallany::space::S1;
/// use smallany::{AnyValue, MonotonicBuffer};
///
/// let mut buffer = [MaybeUninit::uninit(); 256];
/// let arena = MonotonicBuffer::new(&mut buffer);
///
/// let value: AnyValue<S1> = AnyValue::new_in([7u64; 4], &arena);
/// assert!(value.is_heap());
/// assert!(arena.used() >= 32);
/// ```
pub struct MonotonicBuffer<'b> {
    start: NonNull<u8>,
    capacity: usize,
    offset: Cell<usize>,
    _buffer: PhantomData<&'b mut [MaybeUninit<u8>]>,
}

impl<'b> MonotonicBuffer<'b> {
    /// Creates a resource handing out blocks of `buffer`.
    pub fn new(buffer: &'b mut [MaybeUninit<u8>]) -> Self {
        let capacity = buffer.len();
        MonotonicBuffer {
            start: NonNull::from(buffer).cast(),
            capacity,
            offset: Cell::new(0),
            _buffer: PhantomData,
        }
    }

    /// Total size of the buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far, alignment padding included.
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    /// Bytes left at the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.capacity - self.offset.get()
    }

    /// Makes the whole buffer available again.
    ///
    /// Needs exclusive access, so no block handed out earlier can still be in
    /// use.
    pub fn release(&mut self) {
        self.offset.set(0);
    }
}

impl MemoryResource for MonotonicBuffer<'_> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let offset = self.offset.get();
        // SAFETY: `offset` never exceeds `capacity`.
        let cursor = unsafe { self.start.as_ptr().add(offset) };
        let begin = offset
            .checked_add(cursor.align_offset(layout.align()))
            .ok_or(AllocError::new(layout))?;
        let end = begin
            .checked_add(layout.size())
            .filter(|&end| end <= self.capacity)
            .ok_or(AllocError::new(layout))?;

        self.offset.set(end);
        trace!("carved {} bytes at offset {}", layout.size(), begin);
        // SAFETY: `begin <= end <= capacity`, so the block lies in the buffer.
        Ok(unsafe { NonNull::new_unchecked(self.start.as_ptr().add(begin)) })
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}
}

#[cfg(test)]
mod tests {
    use super::MonotonicBuffer;
    use crate::{AllocError, MemoryResource};
    use core::alloc::Layout;
    use core::mem::MaybeUninit;

    #[test]
    fn test_alignment_padding() {
        let mut buffer = [MaybeUninit::uninit(); 64];
        let arena = MonotonicBuffer::new(&mut buffer);

        let byte = arena.allocate(Layout::new::<u8>()).unwrap();
        let word = arena.allocate(Layout::new::<u64>()).unwrap();
        assert_eq!(word.as_ptr().align_offset(8), 0);
        assert!(word > byte);
        assert!(arena.used() >= 9);
        assert_eq!(arena.remaining(), arena.capacity() - arena.used());
    }

    #[test]
    fn test_exhaustion() {
        let mut buffer = [MaybeUninit::uninit(); 16];
        let mut arena = MonotonicBuffer::new(&mut buffer);
        let layout = Layout::new::<[u8; 12]>();

        assert!(arena.allocate(layout).is_ok());
        assert_eq!(arena.allocate(layout), Err(AllocError::new(layout)));

        arena.release();
        assert_eq!(arena.used(), 0);
        assert!(arena.allocate(layout).is_ok());
    }
}
