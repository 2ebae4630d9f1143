//! Typed, fixed-capacity buffer storage shared between writer and readers.
//!
//! A [`TypedBuffer`] is the memory behind one buffer id: a `Vec<T>` whose
//! capacity is reserved up front and never exceeded, so element addresses
//! stay put for the buffer's whole lifetime. Elements are initialised
//! lazily as the bump pointer in [`BufferState`](crate::BufferState)
//! advances.
//!
//! Buffers are held as `Arc<dyn BufferStorage>` by the store and by every
//! [`StoreReader`](crate::StoreReader). The elements sit behind a
//! `parking_lot::RwLock`: the writer write-locks a buffer only while it
//! initialises or rewrites slots, and the generation protocol guarantees
//! those slots are never the ones a pinned reader is looking at.

use std::any::Any;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

/// Element types that can live in a data store buffer.
///
/// Elements are fixed-size records. `Default` supplies the value written
/// into fresh slots and, by default, into slots released by a trim.
pub trait Element: Clone + Default + Send + Sync + 'static {}

impl<T: Clone + Default + Send + Sync + 'static> Element for T {}

/// Type-erased view of a buffer's memory.
pub trait BufferStorage: Any + Send + Sync {
    /// Upcast for downcasting to the concrete [`TypedBuffer`].
    fn as_any(&self) -> &dyn Any;

    /// Reserved capacity in elements.
    fn capacity(&self) -> usize;

    /// Number of initialised elements.
    fn len(&self) -> usize;

    /// Whether no element has been initialised yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Initialise elements up to `len` with their default value.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the reserved capacity.
    fn grow_to(&self, len: usize);

    /// Memory reserved by the backing storage in bytes.
    fn memory_bytes(&self) -> usize;
}

/// Contiguous storage for elements of type `T`.
pub struct TypedBuffer<T> {
    /// Backing storage. Capacity reserved at creation and never grown.
    data: RwLock<Vec<T>>,
    capacity: usize,
}

impl<T: Element> TypedBuffer<T> {
    /// Create a buffer able to hold `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: RwLock::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Shared view of `len` elements starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range reaches past the initialised region.
    pub fn read(&self, offset: usize, len: usize) -> MappedRwLockReadGuard<'_, [T]> {
        let guard = self.data.read();
        check_range(offset, len, guard.len());
        RwLockReadGuard::map(guard, |data| &data[offset..offset + len])
    }

    /// Exclusive view of `len` elements starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range reaches past the initialised region.
    pub fn write(&self, offset: usize, len: usize) -> MappedRwLockWriteGuard<'_, [T]> {
        let guard = self.data.write();
        check_range(offset, len, guard.len());
        RwLockWriteGuard::map(guard, |data| &mut data[offset..offset + len])
    }
}

fn check_range(offset: usize, len: usize, initialised: usize) {
    assert!(
        offset + len <= initialised,
        "elements {offset}..{} reach past the {initialised} initialised elements",
        offset + len
    );
}

impl<T: Element> BufferStorage for TypedBuffer<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.data.read().len()
    }

    fn grow_to(&self, len: usize) {
        assert!(
            len <= self.capacity,
            "buffer grow to {len} elements exceeds reserved capacity {}",
            self.capacity
        );
        let mut data = self.data.write();
        if len > data.len() {
            // Stays within the reserved capacity, so no reallocation.
            data.resize(len, T::default());
        }
    }

    fn memory_bytes(&self) -> usize {
        self.capacity * std::mem::size_of::<T>()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn new_buffer_is_empty_with_reserved_capacity() {
        let buf = TypedBuffer::<u32>::new(16);
        assert_eq!(buf.capacity(), 16);
        assert!(buf.is_empty());
    }

    #[test]
    fn grow_initialises_defaults() {
        let buf = TypedBuffer::<u32>::new(16);
        buf.grow_to(4);
        assert_eq!(buf.len(), 4);
        assert_eq!(&*buf.read(0, 4), &[0, 0, 0, 0]);
    }

    #[test]
    fn grow_never_moves_elements() {
        let buf = TypedBuffer::<u64>::new(1024);
        buf.grow_to(1);
        let before = buf.read(0, 1).as_ptr();
        buf.grow_to(1024);
        assert_eq!(before, buf.read(0, 1).as_ptr());
    }

    #[test]
    fn grow_to_smaller_len_is_noop() {
        let buf = TypedBuffer::<u32>::new(8);
        buf.grow_to(6);
        buf.write(0, 6)[5] = 9;
        buf.grow_to(2);
        assert_eq!(buf.len(), 6);
        assert_eq!(&*buf.read(5, 1), &[9]);
    }

    #[test]
    #[should_panic(expected = "exceeds reserved capacity")]
    fn grow_past_capacity_panics() {
        let buf = TypedBuffer::<u8>::new(4);
        buf.grow_to(5);
    }

    #[test]
    #[should_panic(expected = "reach past the 2 initialised elements")]
    fn read_past_initialised_panics() {
        let buf = TypedBuffer::<u8>::new(4);
        buf.grow_to(2);
        let _ = buf.read(1, 2);
    }

    #[test]
    fn downcast_through_shared_handle() {
        let storage: Arc<dyn BufferStorage> = Arc::new(TypedBuffer::<u16>::new(8));
        storage.grow_to(2);
        storage
            .as_any()
            .downcast_ref::<TypedBuffer<u16>>()
            .unwrap()
            .write(0, 2)
            .copy_from_slice(&[7, 8]);
        assert!(storage.as_any().downcast_ref::<TypedBuffer<u32>>().is_none());

        let shared = Arc::clone(&storage);
        let typed = shared.as_any().downcast_ref::<TypedBuffer<u16>>().unwrap();
        assert_eq!(&*typed.read(0, 2), &[7, 8]);
        assert_eq!(storage.len(), 2);
    }
}
