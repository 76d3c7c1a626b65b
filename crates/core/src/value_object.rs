//! Value object marker: equality by value, not identity.

/// Marker trait for value objects.
///
/// Implemented by immutable domain values (money totals, postal addresses,
/// rendered documents) that are compared by their attributes. Two value
/// objects with the same attributes are interchangeable.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
