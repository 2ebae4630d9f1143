//! Strongly-typed identifiers for buffers, buffer types, and generations.

use std::fmt;

/// Identifies a buffer slot within a data store.
///
/// Buffer ids are small integers bounded by the [`RefType`](crate::RefType)
/// layout in use. An id is stable for the lifetime of the buffer and is
/// only handed out again after the buffer has been fully reclaimed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl BufferId {
    /// The id as a `usize` index into per-buffer tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for BufferId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a registered buffer type (one element type and size class).
///
/// Types are registered on the data store in order and assigned
/// sequential ids. `TypeId(n)` corresponds to the n-th registered type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    /// The id as a `usize` index into per-type tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TypeId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Monotonically increasing generation counter.
///
/// Readers observe the store at some generation; memory retired at
/// generation `G` may only be reused once every reader has moved past `G`.
/// Ordering between generations uses the signed wrapping difference, so a
/// counter that wraps around `u64::MAX` still compares correctly as long as
/// the live window is smaller than `i64::MAX`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation following this one.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Whether `self` is strictly older than `other`.
    pub fn is_before(self, other: Generation) -> bool {
        (self.0.wrapping_sub(other.0) as i64) < 0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Generation {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_ordering() {
        assert!(Generation(3).is_before(Generation(4)));
        assert!(!Generation(4).is_before(Generation(4)));
        assert!(!Generation(5).is_before(Generation(4)));
    }

    #[test]
    fn generation_ordering_survives_wraparound() {
        let last = Generation(u64::MAX);
        let first = last.next();
        assert_eq!(first, Generation(0));
        assert!(last.is_before(first));
        assert!(!first.is_before(last));
    }

    #[test]
    fn ids_display_as_plain_numbers() {
        assert_eq!(BufferId(7).to_string(), "7");
        assert_eq!(TypeId(2).to_string(), "2");
        assert_eq!(Generation(42).to_string(), "42");
    }
}
