//! Inline capacities for [`AnyValue`](crate::AnyValue).
//!
//! A space type is never instantiated. Only its size and alignment matter: a
//! value is stored inline when it is no larger than the space and its
//! alignment does not exceed the space's alignment.

/// No inline buffer at all. Every value is stored through the memory resource.
pub struct S0;

/// Represents 1 * usize space.
pub struct S1 {
    _inner: [usize; 1],
}

/// Represents 2 * usize space.
pub struct S2 {
    _inner: [usize; 2],
}

/// Represents 4 * usize space.
pub struct S4 {
    _inner: [usize; 4],
}

/// Represents 8 * usize space.
pub struct S8 {
    _inner: [usize; 8],
}

/// Represents 16 * usize space.
pub struct S16 {
    _inner: [usize; 16],
}

/// Represents 32 * usize space.
pub struct S32 {
    _inner: [usize; 32],
}

/// Represents 64 * usize space.
pub struct S64 {
    _inner: [usize; 64],
}

/// 16 bytes aligned to 16, enough for any scalar type. This is the default
/// space of [`AnyValue`](crate::AnyValue).
#[repr(C, align(16))]
pub struct Max16 {
    _inner: [u8; 16],
}
