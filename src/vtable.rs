//! Per-type descriptors for values stored in an [`AnyValue`].
//!
//! A [`Vtable`] pairs function pointers with one concrete type `T`. The
//! container keeps a `&'static Vtable<Space>` next to its storage and calls
//! through it once the type has been erased.
//!
//! # Safety Invariant
//!
//! Every function pointer of a descriptor obtained from [`Vtable::of::<T>`]
//! is instantiated with that `T`. They may only be invoked on a container
//! whose type discriminant is `TypeId::of::<T>()`.

use core::alloc::Layout;
use core::mem;
use core::ptr::{self, NonNull};

use crate::any::{AnyValue, SboPolicy};
use crate::resource::default_resource;
use crate::AllocError;

type DestroyFn<Space> = unsafe fn(&mut AnyValue<'_, Space>);
type DeallocateFn<Space> = unsafe fn(&mut AnyValue<'_, Space>);
type ConstructFn<Space> = unsafe fn(&mut AnyValue<'_, Space>, NonNull<u8>) -> Result<(), AllocError>;

/// Type-erased operations on a stored value.
pub(crate) struct Vtable<Space: 'static> {
    /// Layout of the stored type.
    pub(crate) layout: Layout,
    /// Storage policy every value of the stored type gets in `Space`.
    pub(crate) policy: SboPolicy,
    type_name: fn() -> &'static str,
    /// `None` when the type has no drop glue.
    destroy: Option<DestroyFn<Space>>,
    deallocate: DeallocateFn<Space>,
    copy: ConstructFn<Space>,
    move_: ConstructFn<Space>,
}

impl<Space: 'static> Vtable<Space> {
    /// Returns the descriptor of `T`.
    ///
    /// The descriptor is promoted to a static, so repeated calls for the same
    /// `T` hand out the same table.
    pub(crate) const fn of<T: Clone + 'static>() -> &'static Self {
        const {
            &Vtable {
                layout: Layout::new::<T>(),
                policy: SboPolicy::of::<T, Space>(),
                type_name: core::any::type_name::<T>,
                destroy: if mem::needs_drop::<T>() {
                    Some(destroy::<T, Space>)
                } else {
                    None
                },
                deallocate: deallocate::<T, Space>,
                copy: copy::<T, Space>,
                move_: move_::<T, Space>,
            }
        }
    }

    #[inline]
    pub(crate) fn type_name(&self) -> &'static str {
        (self.type_name)()
    }

    /// Drops the stored value in place, leaving its storage allocated.
    ///
    /// # Safety
    ///
    /// `what` must hold a live value of this descriptor's type.
    #[inline]
    pub(crate) unsafe fn destroy(&self, what: &mut AnyValue<'_, Space>) {
        if let Some(destroy) = self.destroy {
            // SAFETY: guaranteed by the caller.
            unsafe { destroy(what) }
        }
    }

    /// Releases heap storage of this descriptor's type. The value must already
    /// be destroyed or moved out.
    ///
    /// # Safety
    ///
    /// `what` must be positioned for this descriptor's type and bound to the
    /// resource its storage came from.
    #[inline]
    pub(crate) unsafe fn deallocate(&self, what: &mut AnyValue<'_, Space>) {
        // SAFETY: guaranteed by the caller.
        unsafe { (self.deallocate)(what) }
    }

    /// Clones the value at `src` into `dst`.
    ///
    /// # Safety
    ///
    /// `src` must point to a live value of this descriptor's type that does
    /// not live inside `dst`.
    #[inline]
    pub(crate) unsafe fn copy(
        &self,
        dst: &mut AnyValue<'_, Space>,
        src: NonNull<u8>,
    ) -> Result<(), AllocError> {
        // SAFETY: guaranteed by the caller.
        unsafe { (self.copy)(dst, src) }
    }

    /// Relocates the value at `src` into `dst`.
    ///
    /// # Safety
    ///
    /// As for [`copy`](Self::copy). On `Ok` the value at `src` has been moved
    /// out and must not be dropped again; on `Err` it is untouched.
    #[inline]
    pub(crate) unsafe fn move_(
        &self,
        dst: &mut AnyValue<'_, Space>,
        src: NonNull<u8>,
    ) -> Result<(), AllocError> {
        // SAFETY: guaranteed by the caller.
        unsafe { (self.move_)(dst, src) }
    }
}

unsafe fn destroy<T, Space: 'static>(what: &mut AnyValue<'_, Space>) {
    debug_assert!(
        what.policy() == SboPolicy::of::<T, Space>(),
        "invalid state for operation destroy"
    );
    // SAFETY: the container holds a live `T`.
    unsafe { ptr::drop_in_place(what.data_as::<T>().as_ptr()) }
}

unsafe fn deallocate<T, Space: 'static>(what: &mut AnyValue<'_, Space>) {
    if SboPolicy::of::<T, Space>() == SboPolicy::Embedded {
        return;
    }
    debug_assert!(
        what.policy() == SboPolicy::Dynamic,
        "invalid state for operation deallocate"
    );
    // SAFETY: the container is positioned for `T` on the heap.
    unsafe { what.release_block(Layout::new::<T>()) }
}

unsafe fn copy<T: Clone + 'static, Space: 'static>(
    dst: &mut AnyValue<'_, Space>,
    src: NonNull<u8>,
) -> Result<(), AllocError> {
    // SAFETY: `src` points to a live `T` outside of `dst`.
    let src = unsafe { src.cast::<T>().as_ref() };
    let resource = dst.resource().unwrap_or_else(|| default_resource());
    dst.try_emplace_in_with(resource, || src.clone()).map(drop)
}

unsafe fn move_<T: Clone + 'static, Space: 'static>(
    dst: &mut AnyValue<'_, Space>,
    src: NonNull<u8>,
) -> Result<(), AllocError> {
    let resource = dst.resource().unwrap_or_else(|| default_resource());
    // SAFETY: the value is only read once its new storage is in place.
    dst.try_emplace_in_with(resource, || unsafe { src.cast::<T>().as_ptr().read() })
        .map(drop)
}
