use core::alloc::Layout;

use thiserror::Error;

/// A memory resource could not satisfy an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error(
    "memory resource failed to allocate {} bytes aligned to {}",
    .layout.size(),
    .layout.align()
)]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    /// Creates an error for the rejected `layout`.
    pub const fn new(layout: Layout) -> Self {
        AllocError { layout }
    }

    /// The layout that could not be allocated.
    pub const fn layout(&self) -> Layout {
        self.layout
    }
}
