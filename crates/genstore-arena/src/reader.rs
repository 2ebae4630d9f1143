//! Shared read access to a store's buffers from reader threads.
//!
//! The writer owns the [`DataStoreBase`](crate::DataStoreBase) and publishes
//! each buffer it activates into a buffer table shared with every
//! [`StoreReader`]. A reader pins a generation, resolves refs that were
//! still live when it pinned, and reads the elements under the buffer's
//! read lock while the writer keeps allocating, retiring, and reclaiming.
//!
//! A held buffer stays published until its hold generation is trimmed, so
//! a pinned reader never finds the buffer behind one of its refs missing.

use std::any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

use genstore_core::{BufferId, EntryRef, EntryRefT, RefType};

use crate::storage::{BufferStorage, Element, TypedBuffer};

#[derive(Clone)]
struct PublishedBuffer {
    storage: Arc<dyn BufferStorage>,
    array_size: usize,
}

/// Buffer slots visible to readers, indexed by buffer id.
pub(crate) struct BufferTable {
    slots: Box<[RwLock<Option<PublishedBuffer>>]>,
}

impl BufferTable {
    pub(crate) fn new(num_buffers: usize) -> Self {
        Self {
            slots: (0..num_buffers).map(|_| RwLock::new(None)).collect(),
        }
    }

    /// Make an activated buffer visible to readers.
    pub(crate) fn publish(
        &self,
        buffer_id: BufferId,
        storage: Arc<dyn BufferStorage>,
        array_size: usize,
    ) {
        *self.slots[buffer_id.index()].write() = Some(PublishedBuffer {
            storage,
            array_size,
        });
    }

    /// Withdraw a freed buffer. Readers already inside it keep their `Arc`.
    pub(crate) fn retract(&self, buffer_id: BufferId) {
        self.slots[buffer_id.index()].write().take();
    }

    fn get(&self, buffer_id: BufferId) -> Option<PublishedBuffer> {
        self.slots.get(buffer_id.index())?.read().clone()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Read-only view of a data store, shareable across threads.
///
/// Obtained from [`DataStoreBase::reader`](crate::DataStoreBase::reader).
/// Reads are only meaningful for refs the writer published before the
/// reader pinned its generation; the store never reuses such an entry while
/// the pin is held.
pub struct StoreReader<R: RefType = EntryRefT<22>> {
    table: Arc<BufferTable>,
    _ref: PhantomData<fn() -> R>,
}

impl<R: RefType> StoreReader<R> {
    pub(crate) fn new(table: Arc<BufferTable>) -> Self {
        Self {
            table,
            _ref: PhantomData,
        }
    }

    /// Run `f` over `len` elements starting at `entry_ref`.
    ///
    /// The buffer's read lock is held while `f` runs.
    ///
    /// # Panics
    ///
    /// Panics if the ref is invalid, its buffer is not published, the buffer
    /// does not hold `T` elements, or the span reaches past the buffer's
    /// initialised elements.
    pub fn with_array<T: Element, U>(
        &self,
        entry_ref: EntryRef,
        len: usize,
        f: impl FnOnce(&[T]) -> U,
    ) -> U {
        assert!(entry_ref.valid(), "read through the invalid entry ref");
        let r = R::from(entry_ref);
        let buffer_id = r.buffer_id();
        let buffer = self.table.get(buffer_id).unwrap_or_else(|| {
            panic!("{entry_ref}: buffer {buffer_id} is not published to readers")
        });
        let offset = r.offset() * R::unit_size(buffer.array_size);
        let typed = buffer
            .storage
            .as_any()
            .downcast_ref::<TypedBuffer<T>>()
            .unwrap_or_else(|| {
                panic!(
                    "buffer {buffer_id} does not hold elements of type {}",
                    any::type_name::<T>()
                )
            });
        let elems = typed.read(offset, len);
        f(&elems)
    }

    /// Run `f` over the element at `entry_ref`.
    pub fn with_entry<T: Element, U>(&self, entry_ref: EntryRef, f: impl FnOnce(&T) -> U) -> U {
        self.with_array(entry_ref, 1, |elems: &[T]| f(&elems[0]))
    }

    /// A copy of the element at `entry_ref`.
    pub fn entry<T: Element>(&self, entry_ref: EntryRef) -> T {
        self.with_entry(entry_ref, T::clone)
    }

    /// A copy of `len` elements starting at `entry_ref`.
    pub fn array<T: Element>(&self, entry_ref: EntryRef, len: usize) -> Vec<T> {
        self.with_array(entry_ref, len, <[T]>::to_vec)
    }

    /// Number of buffer slots.
    pub fn num_buffers(&self) -> usize {
        self.table.len()
    }
}

impl<R: RefType> Clone for StoreReader<R> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.table))
    }
}

impl<R: RefType> fmt::Debug for StoreReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreReader")
            .field("num_buffers", &self.table.len())
            .finish()
    }
}
