//! # SmallAny: Type-Erased Values with Inline Storage
//!
//! [`AnyValue`] holds one value of any `Clone + 'static` type without naming
//! that type at the use site. Small values are stored in an inline buffer;
//! larger or over-aligned values are placed in a block of a pluggable
//! [`MemoryResource`]. Every stored type gets a statically allocated table of
//! type-erased operations, so the container stays the same size whatever it
//! holds.
//!
//! ## Quick Start
//!
//! ```rust
//! use smallany::{AnyValue, SboPolicy};
//! use smallany::space::S2;
//!
//! // Small values are stored inline
//! let mut value: AnyValue<S2> = AnyValue::from_value(42u32);
//! assert_eq!(value.policy(), SboPolicy::Embedded);
//! assert_eq!(value.get::<u32>(), Some(&42));
//!
//! // Large values go to the memory resource
//! value.emplace([0u64; 8]);
//! assert!(value.is_heap());
//!
//! // The type is checked on access
//! assert!(value.get::<u32>().is_none());
//! ```
//!
//! ## Configuration
//!
//! ### Inline Capacity
//!
//! The second type parameter of [`AnyValue`] is a space type whose size and
//! alignment bound what is stored inline. See the [`space`] module for the
//! provided ones. [`space::Max16`] is the default; [`space::S0`] disables the
//! inline buffer altogether.
//!
//! ```rust
//! use smallany::AnyValue;
//!
//! // Custom 128-byte capacity
//! type MySpace = [u8; 128];
//!
//! let value: AnyValue<MySpace> = AnyValue::from_value([0u8; 100]);
//! assert!(!value.is_heap());
//! ```
//!
//! **Important**: Space alignment matters! If the space alignment is smaller than the value's
//! required alignment, the value will be heap-allocated regardless of size.
//!
//! ### Feature Flags
//!
//! - **`std`** (enabled by default)
//!   - Links to the standard library
//!   - Disable for `#![no_std]` environments: `default-features = false`
//!
//! ## Memory Resources
//!
//! Heap-resident values are placed through a borrowed [`MemoryResource`].
//! Without one, [`default_resource`] is used, which is backed by the global
//! allocator. [`MonotonicBuffer`] carves blocks out of a caller buffer.
//!
//! A value can be moved between resources, and storage is reused when a value
//! of the same type is placed again:
//!
//! ```rust
//! use core::mem::MaybeUninit;
//! use smallany::space::S1;
//! use smallany::{default_resource, AnyValue, MonotonicBuffer};
//!
//! let mut buffer = [MaybeUninit::uninit(); 128];
//! let arena = MonotonicBuffer::new(&mut buffer);
//!
//! let mut value: AnyValue<S1> = AnyValue::new_in(String::from("hello"), &arena);
//! let used = arena.used();
//!
//! value.emplace(String::from("world"));
//! assert_eq!(arena.used(), used);
//!
//! value.change_resource(default_resource());
//! assert_eq!(value.get::<String>().map(String::as_str), Some("world"));
//! ```
//!
//! [`Holder`] is the single-type counterpart: an owning pointer whose value
//! lives in a block of a memory resource.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![deny(clippy::as_conversions)]

extern crate alloc;

mod any;
mod error;
mod holder;
mod monotonic;
mod resource;
pub mod space;
mod vtable;

pub use crate::any::{AnyValue, SboPolicy};
pub use crate::error::AllocError;
pub use crate::holder::Holder;
pub use crate::monotonic::MonotonicBuffer;
pub use crate::resource::{default_resource, Global, MemoryResource};
