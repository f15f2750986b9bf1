use std::alloc::Layout;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::Rc;

use smallany::{AllocError, Global, MemoryResource};

/// Forwards to the global allocator and records every call.
///
/// Panics if a block is released with a different layout than it was
/// allocated with, or released twice.
#[derive(Default)]
pub struct CountingResource {
    allocations: Cell<usize>,
    deallocations: Cell<usize>,
    live: RefCell<Vec<(usize, Layout)>>,
}

#[allow(dead_code)]
impl CountingResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocations(&self) -> usize {
        self.allocations.get()
    }

    pub fn deallocations(&self) -> usize {
        self.deallocations.get()
    }

    pub fn live(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn counts(&self) -> (usize, usize) {
        (self.allocations(), self.deallocations())
    }
}

impl MemoryResource for CountingResource {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let block = Global.allocate(layout)?;
        self.allocations.set(self.allocations.get() + 1);
        self.live.borrow_mut().push((block.as_ptr() as usize, layout));
        Ok(block)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let mut live = self.live.borrow_mut();
        let index = live
            .iter()
            .position(|&(addr, _)| addr == ptr.as_ptr() as usize)
            .expect("released a block this resource does not own");
        let (_, allocated) = live.swap_remove(index);
        assert_eq!(allocated, layout, "released with a different layout");
        self.deallocations.set(self.deallocations.get() + 1);
        unsafe { Global.deallocate(ptr, layout) }
    }
}

/// A resource that refuses every request.
#[allow(dead_code)]
pub struct Exhausted;

impl MemoryResource for Exhausted {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        Err(AllocError::new(layout))
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        unreachable!("nothing was allocated");
    }
}

thread_local! {
    static STATELESS_COUNTS: RefCell<[(usize, usize); 4]> = const { RefCell::new([(0, 0); 4]) };
}

/// A zero-sized resource forwarding to the global allocator. Each `ID` is a
/// distinct resource with its own per-thread call counts.
#[allow(dead_code)]
pub struct Stateless<const ID: usize>;

#[allow(dead_code)]
impl<const ID: usize> Stateless<ID> {
    pub fn counts() -> (usize, usize) {
        STATELESS_COUNTS.with(|counts| counts.borrow()[ID])
    }
}

impl<const ID: usize> MemoryResource for Stateless<ID> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let block = Global.allocate(layout)?;
        STATELESS_COUNTS.with(|counts| counts.borrow_mut()[ID].0 += 1);
        Ok(block)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        STATELESS_COUNTS.with(|counts| counts.borrow_mut()[ID].1 += 1);
        unsafe { Global.deallocate(ptr, layout) }
    }
}

/// A handle to a shared [`CountingResource`]. Handles to the same pool are
/// distinct objects that compare equal.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct Pooled {
    pool: Rc<CountingResource>,
}

#[allow(dead_code)]
impl Pooled {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> (usize, usize) {
        self.pool.counts()
    }
}

impl MemoryResource for Pooled {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.pool.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.pool.deallocate(ptr, layout) }
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        other
            .as_any()
            .and_then(|other| other.downcast_ref::<Pooled>())
            .is_some_and(|other| Rc::ptr_eq(&self.pool, &other.pool))
    }

    fn as_any(&self) -> Option<&dyn Any> {
        let any: &dyn Any = self;
        Some(any)
    }
}
