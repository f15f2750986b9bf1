use core::alloc::Layout;
use core::any::TypeId;
use core::fmt;
use core::mem::{self, ManuallyDrop, MaybeUninit};
use core::ptr::{self, NonNull};

#[cfg(not(feature = "std"))]
use alloc::alloc::handle_alloc_error;
#[cfg(feature = "std")]
use std::alloc::handle_alloc_error;

use log::{debug, trace};

use crate::resource::{default_resource, same_resource, MemoryResource};
use crate::space::Max16;
use crate::vtable::Vtable;
use crate::AllocError;

/// Where the value held by an [`AnyValue`] lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SboPolicy {
    /// No value is held.
    Empty,
    /// The value lives in a block obtained from the bound memory resource.
    Dynamic,
    /// The value lives in the inline buffer.
    Embedded,
}

impl SboPolicy {
    /// The policy every value of type `T` gets in a container with inline
    /// space `Space`.
    ///
    /// `T` is embedded when the buffer is non-empty, `T` fits into it and the
    /// buffer is aligned at least as strictly as `T`. Moves never panic, so
    /// relocating an embedded value is always safe.
    pub(crate) const fn of<T, Space>() -> SboPolicy {
        let fits = mem::size_of::<Space>() != 0
            && mem::size_of::<T>() <= mem::size_of::<Space>()
            && mem::align_of::<T>() <= mem::align_of::<Space>();
        if fits {
            SboPolicy::Embedded
        } else {
            SboPolicy::Dynamic
        }
    }
}

/// Inline buffer sharing its bytes with the heap pointer. The active member is
/// selected by the owner's [`SboPolicy`].
union Storage<Space> {
    heap: NonNull<u8>,
    #[allow(dead_code)]
    buffer: ManuallyDrop<MaybeUninit<Space>>,
}

/// A type-erased value that is stored inline when small enough and in a block
/// of a [`MemoryResource`] otherwise.
///
/// `Space` sets the inline capacity and alignment, see [`space`](crate::space).
/// The container borrows the memory resource for `'r`; values are always
/// owned.
///
/// # Example
///
/// ```
/// use smallany::{AnyValue, SboPolicy};
///
/// let mut value: AnyValue = AnyValue::new();
/// assert!(!value.has_value());
///
/// value.emplace(5i32);
/// assert_eq!(value.get::<i32>(), Some(&5));
/// assert_eq!(value.policy(), SboPolicy::Embedded);
///
/// value.emplace(String::from("hello"));
/// assert_eq!(value.get::<String>().map(String::as_str), Some("hello"));
/// assert!(value.get::<i32>().is_none());
/// ```
pub struct AnyValue<'r, Space: 'static = Max16> {
    resource: Option<&'r dyn MemoryResource>,
    vtable: Option<&'static Vtable<Space>>,
    type_id: Option<TypeId>,
    policy: SboPolicy,
    storage: Storage<Space>,
}

/// Releases the storage of a value that is no longer live unless disarmed.
///
/// Covers the window between positioning storage and finishing construction,
/// so that a panic there leaves the container empty instead of half-built.
struct DiscardOnUnwind<'a, 'r, Space: 'static> {
    value: &'a mut AnyValue<'r, Space>,
    armed: bool,
}

impl<Space: 'static> Drop for DiscardOnUnwind<'_, '_, Space> {
    fn drop(&mut self) {
        if self.armed {
            // SAFETY: the guard is only armed while the held value is dead.
            unsafe { self.value.discard() }
        }
    }
}

impl<'r, Space: 'static> AnyValue<'r, Space> {
    /// Creates an empty container.
    pub const fn new() -> Self {
        AnyValue {
            resource: None,
            vtable: None,
            type_id: None,
            policy: SboPolicy::Empty,
            storage: Storage {
                heap: NonNull::dangling(),
            },
        }
    }

    /// Creates a container holding `value`, using the default resource if the
    /// value does not fit inline.
    pub fn from_value<T: Clone + 'static>(value: T) -> Self {
        Self::new_in(value, default_resource())
    }

    /// Creates a container holding `value`, bound to `resource`.
    pub fn new_in<T: Clone + 'static>(value: T, resource: &'r dyn MemoryResource) -> Self {
        let mut this = Self::new();
        this.emplace_in(value, resource);
        this
    }

    /// Returns true if a value is held.
    #[inline]
    pub fn has_value(&self) -> bool {
        self.policy != SboPolicy::Empty
    }

    /// Where the held value lives.
    #[inline]
    pub fn policy(&self) -> SboPolicy {
        self.policy
    }

    /// Returns true if the held value lives in a block of the memory resource.
    #[inline]
    pub fn is_heap(&self) -> bool {
        self.policy == SboPolicy::Dynamic
    }

    /// Returns true if the held value is a `T`.
    #[inline]
    pub fn same_as<T: 'static>(&self) -> bool {
        self.type_id == Some(TypeId::of::<T>())
    }

    /// The [`TypeId`] of the held value.
    #[inline]
    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    /// The type name of the held value, for diagnostics.
    pub fn type_name(&self) -> Option<&'static str> {
        self.vtable.map(Vtable::type_name)
    }

    /// The memory resource the container is bound to.
    #[inline]
    pub fn resource(&self) -> Option<&'r dyn MemoryResource> {
        self.resource
    }

    /// Returns a reference to the held value if it is a `T`.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        if self.same_as::<T>() {
            // SAFETY: the discriminant was checked above.
            Some(unsafe { self.get_unchecked() })
        } else {
            None
        }
    }

    /// Returns a mutable reference to the held value if it is a `T`.
    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        if self.same_as::<T>() {
            // SAFETY: the discriminant was checked above.
            Some(unsafe { self.get_unchecked_mut() })
        } else {
            None
        }
    }

    /// Returns a reference to the held value without checking its type.
    ///
    /// # Safety
    ///
    /// The container must hold a `T`, i.e. [`same_as::<T>`](Self::same_as)
    /// returns true.
    #[inline]
    pub unsafe fn get_unchecked<T: 'static>(&self) -> &T {
        debug_assert!(self.same_as::<T>(), "invalid state for operation get");
        // SAFETY: guaranteed by the caller.
        unsafe { self.data_ptr().cast::<T>().as_ref() }
    }

    /// Returns a mutable reference to the held value without checking its
    /// type.
    ///
    /// # Safety
    ///
    /// The container must hold a `T`.
    #[inline]
    pub unsafe fn get_unchecked_mut<T: 'static>(&mut self) -> &mut T {
        debug_assert!(self.same_as::<T>(), "invalid state for operation get_mut");
        // SAFETY: guaranteed by the caller.
        unsafe { self.data_ptr_mut().cast::<T>().as_mut() }
    }

    /// Replaces the held value with `value`.
    ///
    /// When a `T` is already held the old value is dropped in place and its
    /// storage is reused. Otherwise the old value is dropped and released and
    /// storage for `T` is set up from the bound resource, or the default one.
    pub fn emplace<T: Clone + 'static>(&mut self, value: T) -> &mut T {
        self.emplace_with(move || value)
    }

    /// Like [`emplace`](Self::emplace), constructing the value with `f` once
    /// storage is in place.
    ///
    /// If `f` panics the container is left empty.
    pub fn emplace_with<T, F>(&mut self, f: F) -> &mut T
    where
        T: Clone + 'static,
        F: FnOnce() -> T,
    {
        let resource = self.resource.unwrap_or_else(|| default_resource());
        self.try_emplace_in_with(resource, f)
            .unwrap_or_else(|err| handle_alloc_error(err.layout()))
    }

    /// Replaces the held value with `value`, binding the container to
    /// `resource`.
    ///
    /// Storage is reused only if a `T` is held and the bound resource
    /// compares equal to `resource`.
    pub fn emplace_in<T: Clone + 'static>(
        &mut self,
        value: T,
        resource: &'r dyn MemoryResource,
    ) -> &mut T {
        self.try_emplace_in_with(resource, move || value)
            .unwrap_or_else(|err| handle_alloc_error(err.layout()))
    }

    /// Fallible version of [`emplace`](Self::emplace).
    ///
    /// On error the container is left empty.
    pub fn try_emplace<T: Clone + 'static>(&mut self, value: T) -> Result<&mut T, AllocError> {
        let resource = self.resource.unwrap_or_else(|| default_resource());
        self.try_emplace_in_with(resource, move || value)
    }

    /// Replaces the held value with the result of `f`, binding the container
    /// to `resource`.
    ///
    /// On error, or if `f` panics, the container is left empty.
    pub fn try_emplace_in_with<T, F>(
        &mut self,
        resource: &'r dyn MemoryResource,
        f: F,
    ) -> Result<&mut T, AllocError>
    where
        T: Clone + 'static,
        F: FnOnce() -> T,
    {
        let reuse = self.same_as::<T>() && self.bound_to(resource);
        if reuse {
            self.resource = Some(resource);
        } else {
            self.reset();
            self.position::<T>(resource)?;
        }

        let mut guard = DiscardOnUnwind {
            value: self,
            armed: true,
        };
        if reuse {
            // SAFETY: a live `T` is held.
            unsafe { Vtable::<Space>::of::<T>().destroy(guard.value) }
        }
        let value = f();
        guard.armed = false;

        // SAFETY: the container is positioned for `T` and its old value is gone.
        unsafe {
            let slot = guard.value.data_as::<T>();
            slot.as_ptr().write(value);
            Ok(&mut *slot.as_ptr())
        }
    }

    /// Moves the held value out if it is a `T`, leaving the container empty.
    pub fn take<T: 'static>(&mut self) -> Option<T> {
        if !self.same_as::<T>() {
            return None;
        }
        // SAFETY: a live `T` is held; it is moved out before its storage is
        // released.
        unsafe {
            let value = self.data_ptr_mut().cast::<T>().as_ptr().read();
            self.discard();
            Some(value)
        }
    }

    /// Drops and releases the held value, leaving the container empty and
    /// unbound.
    pub fn reset(&mut self) {
        if let Some(vtable) = self.vtable {
            let guard = DiscardOnUnwind {
                value: &mut *self,
                armed: true,
            };
            // SAFETY: the held value is live and matches `vtable`. The guard
            // releases its storage afterwards, even if dropping panics.
            unsafe { vtable.destroy(guard.value) }
        }
        self.resource = None;
    }

    /// Binds the container to `resource`, moving a heap-resident value into a
    /// block of the new resource if it does not compare equal to the current
    /// one.
    ///
    /// Inline values stay where they are. The policy and the held type never
    /// change.
    pub fn change_resource(&mut self, resource: &'r dyn MemoryResource) {
        if let Err(err) = self.try_change_resource(resource) {
            handle_alloc_error(err.layout())
        }
    }

    /// Fallible version of [`change_resource`](Self::change_resource).
    ///
    /// On error the value stays with the old resource.
    pub fn try_change_resource(
        &mut self,
        resource: &'r dyn MemoryResource,
    ) -> Result<(), AllocError> {
        if let (SboPolicy::Dynamic, Some(current), Some(vtable)) =
            (self.policy, self.resource, self.vtable)
        {
            let layout = vtable.layout;
            if layout.size() != 0 && !same_resource(current, resource) {
                let block = resource.allocate(layout)?;
                // SAFETY: a `Dynamic` container owns a live block of `layout`
                // from `current`, and the new block is distinct from it.
                unsafe {
                    let old = self.storage.heap;
                    ptr::copy_nonoverlapping(old.as_ptr(), block.as_ptr(), layout.size());
                    self.storage.heap = block;
                    self.resource = Some(resource);
                    current.deallocate(old, layout);
                }
                debug!(
                    "moved `{}` ({} bytes) to another memory resource",
                    vtable.type_name(),
                    layout.size()
                );
            }
        }
        self.resource = Some(resource);
        Ok(())
    }

    /// Copies the held value into a new container bound to `resource`.
    pub fn clone_in(&self, resource: &'r dyn MemoryResource) -> Self {
        let mut copy = Self::new();
        if let Some(vtable) = self.vtable {
            copy.resource = Some(resource);
            // SAFETY: `self` holds a live value described by `vtable`.
            if let Err(err) = unsafe { vtable.copy(&mut copy, self.data_ptr()) } {
                handle_alloc_error(err.layout())
            }
        }
        copy
    }

    /// Fallible version of [`Clone::clone`].
    pub fn try_clone(&self) -> Result<Self, AllocError> {
        let mut copy = Self::new();
        copy.try_clone_from(self)?;
        Ok(copy)
    }

    /// Fallible version of [`Clone::clone_from`].
    ///
    /// The container ends up bound to the resource of `source`. Storage is
    /// reused if both hold the same type and their resources compare equal.
    pub fn try_clone_from(&mut self, source: &Self) -> Result<(), AllocError> {
        let Some(vtable) = source.vtable else {
            self.reset();
            return Ok(());
        };
        if !source.resource.is_some_and(|resource| self.bound_to(resource)) {
            self.reset();
        }
        self.resource = source.resource;
        // SAFETY: `source` holds a live value described by `vtable` and is a
        // different container than `self`.
        unsafe { vtable.copy(self, source.data_ptr()) }
    }

    /// Moves the value of `source` into this container, leaving `source`
    /// empty.
    ///
    /// If both hold the same type with equal resources the value is relocated
    /// into the existing storage. Otherwise the container drops its own value
    /// and takes over `source` as a whole.
    pub fn move_from(&mut self, source: &mut Self) {
        let reuse = self.has_value()
            && self.type_id == source.type_id
            && source.resource.is_some_and(|resource| self.bound_to(resource));
        match source.vtable {
            Some(vtable) if reuse => {
                let src = source.data_ptr_mut();
                // SAFETY: `source` holds a live value of the held type. Reusing
                // storage never allocates, and on success the value at `src`
                // has been moved out, so `source` only releases its block.
                unsafe {
                    if let Err(err) = vtable.move_(self, src) {
                        handle_alloc_error(err.layout())
                    }
                    source.discard();
                }
            }
            _ => {
                self.reset();
                mem::swap(self, source);
            }
        }
    }

    /// Returns true if the container is bound to a resource that compares
    /// equal to `resource`.
    fn bound_to(&self, resource: &dyn MemoryResource) -> bool {
        self.resource
            .is_some_and(|current| same_resource(current, resource))
    }

    /// Sets up empty storage for a `T` bound to `resource`.
    fn position<T: Clone + 'static>(
        &mut self,
        resource: &'r dyn MemoryResource,
    ) -> Result<(), AllocError> {
        debug_assert!(!self.has_value(), "invalid state for operation position");

        let vtable = Vtable::<Space>::of::<T>();
        if vtable.policy == SboPolicy::Dynamic {
            self.storage.heap = if vtable.layout.size() == 0 {
                NonNull::<T>::dangling().cast()
            } else {
                let block = resource.allocate(vtable.layout)?;
                trace!(
                    "allocated {} bytes for `{}`",
                    vtable.layout.size(),
                    vtable.type_name()
                );
                block
            };
        }

        self.resource = Some(resource);
        self.vtable = Some(vtable);
        self.type_id = Some(TypeId::of::<T>());
        self.policy = vtable.policy;
        Ok(())
    }

    /// Releases the storage of the held value without dropping it and clears
    /// the container.
    ///
    /// # Safety
    ///
    /// The held value must already be dropped or moved out.
    unsafe fn discard(&mut self) {
        if let Some(vtable) = self.vtable.take() {
            // SAFETY: the container is still positioned for the type of `vtable`.
            unsafe { vtable.deallocate(self) }
        }
        self.resource = None;
        self.type_id = None;
        self.policy = SboPolicy::Empty;
    }

    /// Returns the heap block to the bound resource.
    ///
    /// # Safety
    ///
    /// The container must be `Dynamic` with a block of `layout` taken from the
    /// bound resource, and the value in it must be dead.
    pub(crate) unsafe fn release_block(&mut self, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        match self.resource {
            Some(resource) => {
                trace!("releasing {} bytes", layout.size());
                // SAFETY: guaranteed by the caller.
                unsafe { resource.deallocate(self.storage.heap, layout) }
            }
            None => debug_assert!(false, "invalid state for operation deallocate"),
        }
    }

    /// Address of the value as positioned for `T`.
    ///
    /// # Safety
    ///
    /// The container must be positioned for `T`.
    #[inline]
    pub(crate) unsafe fn data_as<T>(&mut self) -> NonNull<T> {
        match SboPolicy::of::<T, Space>() {
            SboPolicy::Embedded => NonNull::from(&mut self.storage).cast(),
            // SAFETY: guaranteed by the caller.
            _ => unsafe { self.storage.heap.cast() },
        }
    }

    #[inline]
    fn data_ptr(&self) -> NonNull<u8> {
        match self.policy {
            // SAFETY: `heap` is the active member of a `Dynamic` container.
            SboPolicy::Dynamic => unsafe { self.storage.heap },
            _ => NonNull::from(&self.storage).cast(),
        }
    }

    #[inline]
    fn data_ptr_mut(&mut self) -> NonNull<u8> {
        match self.policy {
            // SAFETY: `heap` is the active member of a `Dynamic` container.
            SboPolicy::Dynamic => unsafe { self.storage.heap },
            _ => NonNull::from(&mut self.storage).cast(),
        }
    }
}

impl<Space: 'static> Default for AnyValue<'_, Space> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Space: 'static> Drop for AnyValue<'_, Space> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<Space: 'static> Clone for AnyValue<'_, Space> {
    fn clone(&self) -> Self {
        self.try_clone()
            .unwrap_or_else(|err| handle_alloc_error(err.layout()))
    }

    fn clone_from(&mut self, source: &Self) {
        if let Err(err) = self.try_clone_from(source) {
            handle_alloc_error(err.layout())
        }
    }
}

impl<Space: 'static> fmt::Debug for AnyValue<'_, Space> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AnyValue")
            .field("policy", &self.policy)
            .field("type", &self.type_name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{AnyValue, SboPolicy, Storage};
    use crate::space::*;
    use crate::vtable::Vtable;
    use core::alloc::Layout;
    use std::cell::Cell;
    use std::mem;
    use std::ptr;
    use std::rc::Rc;

    static_assertions::assert_eq_size!(Storage<S0>, usize);
    static_assertions::assert_eq_size!(Storage<S4>, [usize; 4]);
    static_assertions::const_assert_eq!(mem::align_of::<Storage<Max16>>(), 16);
    static_assertions::assert_not_impl_any!(AnyValue<'static, S1>: Send, Sync);

    #[derive(Clone)]
    #[repr(align(32))]
    struct Wide(u8);

    #[derive(Clone)]
    struct Tracked(Rc<Cell<usize>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_policy_selection() {
        assert_eq!(SboPolicy::of::<usize, S1>(), SboPolicy::Embedded);
        assert_eq!(SboPolicy::of::<[usize; 2], S1>(), SboPolicy::Dynamic);
        assert_eq!(SboPolicy::of::<[usize; 2], S2>(), SboPolicy::Embedded);
        assert_eq!(SboPolicy::of::<Wide, S64>(), SboPolicy::Dynamic);
        assert_eq!(SboPolicy::of::<(), S1>(), SboPolicy::Embedded);
        assert_eq!(SboPolicy::of::<u8, S0>(), SboPolicy::Dynamic);
        assert_eq!(SboPolicy::of::<(), S0>(), SboPolicy::Dynamic);
    }

    #[test]
    fn test_vtable_describes_type() {
        let vtable = Vtable::<S2>::of::<String>();
        assert_eq!(vtable.layout, Layout::new::<String>());
        assert_eq!(vtable.policy, SboPolicy::Dynamic);
        assert!(vtable.type_name().ends_with("String"));
    }

    #[test]
    fn test_basic() {
        let stacked: AnyValue<S1> = AnyValue::from_value(1234usize);
        assert_eq!(stacked.get::<usize>(), Some(&1234));
        assert!(!stacked.is_heap());

        let heaped: AnyValue<S1> = AnyValue::from_value((0usize, 1usize));
        assert_eq!(heaped.get::<(usize, usize)>(), Some(&(0, 1)));
        assert!(heaped.is_heap());
    }

    #[test]
    fn test_drop() {
        let drops = Rc::new(Cell::new(0));

        let val: AnyValue<S2> = AnyValue::from_value(Tracked(drops.clone()));
        assert_eq!(drops.get(), 0);
        drop(val);
        assert_eq!(drops.get(), 1);

        let mut val: AnyValue<S0> = AnyValue::from_value(Tracked(drops.clone()));
        val.reset();
        assert_eq!(drops.get(), 2);
        val.reset();
        drop(val);
        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn test_dont_drop_space() {
        struct NoDrop(#[allow(dead_code)] S1);
        impl Drop for NoDrop {
            fn drop(&mut self) {
                unreachable!();
            }
        }

        drop(AnyValue::<NoDrop>::from_value([true]));
    }

    #[test]
    fn test_zst() {
        let value: AnyValue<S0> = AnyValue::from_value(());
        assert!(value.is_heap());
        assert_eq!(value.get::<()>(), Some(&()));

        let value: AnyValue<S1> = AnyValue::from_value([0usize; 0]);
        assert_eq!(value.policy(), SboPolicy::Embedded);
        assert_eq!(value.get::<[usize; 0]>(), Some(&[]));
    }

    #[test]
    fn test_overaligned() {
        let value: AnyValue<S8> = AnyValue::from_value(Wide(7));
        assert!(value.is_heap());
        let wide = value.get::<Wide>().unwrap();
        assert_eq!(wide.0, 7);
        assert_eq!(ptr::from_ref(wide).align_offset(32), 0);
    }

    #[test]
    fn test_take() {
        let drops = Rc::new(Cell::new(0));
        let mut value: AnyValue<S1> = AnyValue::from_value(Tracked(drops.clone()));

        assert!(value.take::<u32>().is_none());
        assert!(value.has_value());

        let tracked = value.take::<Tracked>().unwrap();
        assert!(!value.has_value());
        assert_eq!(drops.get(), 0);
        drop(tracked);
        drop(value);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_debug() {
        let value: AnyValue<S1> = AnyValue::from_value(1u8);
        assert_eq!(
            format!("{:?}", value),
            "AnyValue { policy: Embedded, type: Some(\"u8\"), .. }"
        );
    }
}
