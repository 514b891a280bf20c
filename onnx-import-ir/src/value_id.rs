use std::cell::Cell;
use std::num::NonZero;

/// ID of a value defined by a block argument or operation result.
///
/// IDs are unique within a [`Module`](crate::Module), including values
/// defined inside nested regions.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ValueId(NonZero<u32>);

impl ValueId {
    /// Return the underlying u32 value of the ID.
    pub fn as_u32(self) -> u32 {
        self.0.get() - 1
    }

    /// Return the underlying ID value as a usize, for slice indexing.
    pub fn as_usize(self) -> usize {
        self.as_u32() as usize
    }

    /// Construct a value ID from a u32 value.
    ///
    /// Panics if the value is `u32::MAX`.
    pub fn from_u32(value: u32) -> ValueId {
        assert!(value < u32::MAX);

        // IDs are stored as `value + 1` to reserve 0 as a niche, making
        // `Option<ValueId>` the same size as `ValueId`.
        ValueId(NonZero::<u32>::MIN.saturating_add(value))
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.as_u32())
    }
}

impl std::fmt::Debug for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValueId({})", self.as_u32())
    }
}

/// Allocates sequential [`ValueId`]s.
///
/// A single generator is shared by all scopes that contribute to a module, so
/// that IDs in nested regions never collide with those in enclosing blocks.
#[derive(Debug, Default)]
pub struct ValueIdGen {
    next: Cell<u32>,
}

impl ValueIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new ID.
    pub fn next_id(&self) -> ValueId {
        let id = self.next.get();
        self.next.set(id + 1);
        ValueId::from_u32(id)
    }

    /// Return the number of IDs allocated so far.
    pub fn count(&self) -> u32 {
        self.next.get()
    }
}

#[cfg(test)]
mod tests {
    use super::{ValueId, ValueIdGen};

    #[test]
    fn test_value_id() {
        let id = ValueId::from_u32(5);
        assert_eq!(id.as_u32(), 5);
        assert_eq!(id.as_usize(), 5);
        assert_eq!(id.to_string(), "%5");
        assert_eq!(format!("{:?}", id), "ValueId(5)");

        assert_eq!(
            std::mem::size_of::<Option<ValueId>>(),
            std::mem::size_of::<ValueId>()
        );
    }

    #[test]
    fn test_value_id_gen() {
        let ids = ValueIdGen::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_eq!(a.as_u32(), 0);
        assert_eq!(b.as_u32(), 1);
        assert_eq!(ids.count(), 2);
    }
}
