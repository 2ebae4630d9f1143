//! Single-type convenience wrapper over [`DataStoreBase`].

use std::marker::PhantomData;

use genstore_core::{EntryRef, EntryRefT, Generation, RefType, TypeId};
use genstore_generation::GenerationHandler;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};

use crate::buffer_type::{BufferType, BufferTypeConfig};
use crate::config::ArenaConfig;
use crate::datastore::DataStoreBase;
use crate::error::ArenaError;
use crate::reader::StoreReader;
use crate::stats::MemoryUsage;
use crate::storage::Element;

/// A data store holding single elements of one type.
///
/// Entries are added with [`add_entry`](Self::add_entry), which reuses
/// trimmed slots before bump allocating, and retired with
/// [`hold_elem`](Self::hold_elem). The underlying [`DataStoreBase`] is
/// reachable through [`base`](Self::base) for stats and compaction.
pub struct DataStore<T: Element, R: RefType = EntryRefT<22>> {
    base: DataStoreBase<R>,
    type_id: TypeId,
    _elem: PhantomData<fn() -> T>,
}

impl<T: Element, R: RefType> DataStore<T, R> {
    /// Minimum arrays reserved for each new buffer by [`new`](Self::new).
    pub const DEFAULT_MIN_ARRAYS: usize = 1024;

    /// Create a store with default configuration.
    pub fn new() -> Self {
        Self::with_min_arrays(Self::DEFAULT_MIN_ARRAYS)
    }

    /// Create a store whose buffers start with at least `min_arrays`
    /// elements, clamped to what one buffer can address.
    pub fn with_min_arrays(min_arrays: usize) -> Self {
        let max_arrays = R::offset_size() * R::unit_size(1);
        let config = BufferTypeConfig::new(1, min_arrays.min(max_arrays), max_arrays);
        Self::with_buffer_type(BufferType::new(config), ArenaConfig::default())
            .expect("default single-element buffer type fits every ref layout")
    }

    /// Create a store from an explicit buffer type and arena configuration.
    pub fn with_buffer_type(
        buffer_type: BufferType<T>,
        config: ArenaConfig,
    ) -> Result<Self, ArenaError> {
        let mut base = DataStoreBase::new(config)?;
        let type_id = base.add_type(Box::new(buffer_type))?;
        base.init_primary_buffers();
        Ok(Self {
            base,
            type_id,
            _elem: PhantomData,
        })
    }

    /// Store `value` and return its ref.
    pub fn add_entry(&mut self, value: T) -> EntryRef {
        if self.base.array_size(self.type_id) == 1 {
            return self
                .base
                .free_list_allocator::<T>(self.type_id)
                .alloc(value)
                .entry_ref;
        }
        let mut values = vec![T::default(); self.base.array_size(self.type_id)];
        values[0] = value;
        self.base
            .free_list_allocator::<T>(self.type_id)
            .alloc_array(&values)
            .entry_ref
    }

    /// The entry at `entry_ref`.
    pub fn get_entry(&self, entry_ref: EntryRef) -> MappedRwLockReadGuard<'_, T> {
        self.base.entry(entry_ref)
    }

    /// Mutable entry at `entry_ref`. Only for entries not yet published to
    /// readers.
    pub fn get_entry_mut(&mut self, entry_ref: EntryRef) -> MappedRwLockWriteGuard<'_, T> {
        self.base.entry_mut(entry_ref)
    }

    /// A read view for reader threads. See [`DataStoreBase::reader`].
    pub fn reader(&self) -> StoreReader<R> {
        self.base.reader()
    }

    /// Retire the entry at `entry_ref`.
    pub fn hold_elem(&mut self, entry_ref: EntryRef) {
        let array_size = self.base.array_size(self.type_id);
        self.base.hold_elem(entry_ref, array_size, 0);
    }

    /// Free an entry that was never published, immediately.
    pub fn free_elem(&mut self, entry_ref: EntryRef) {
        let array_size = self.base.array_size(self.type_id);
        self.base.free_elem(entry_ref, array_size);
    }

    /// See [`DataStoreBase::transfer_hold_lists`].
    pub fn transfer_hold_lists(&mut self, generation: Generation) {
        self.base.transfer_hold_lists(generation);
    }

    /// See [`DataStoreBase::trim_hold_lists`].
    pub fn trim_hold_lists(&mut self, oldest_used: Generation) {
        self.base.trim_hold_lists(oldest_used);
    }

    /// See [`DataStoreBase::clear_hold_lists`].
    pub fn clear_hold_lists(&mut self) {
        self.base.clear_hold_lists();
    }

    /// See [`DataStoreBase::reclaim`].
    pub fn reclaim(&mut self, handler: &GenerationHandler) -> Generation {
        self.base.reclaim(handler)
    }

    /// See [`DataStoreBase::memory_usage`].
    pub fn memory_usage(&self) -> MemoryUsage {
        self.base.memory_usage()
    }

    /// The type id of the store's single buffer type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The underlying arena.
    pub fn base(&self) -> &DataStoreBase<R> {
        &self.base
    }

    /// The underlying arena, mutably.
    pub fn base_mut(&mut self) -> &mut DataStoreBase<R> {
        &mut self.base
    }
}

impl<T: Element, R: RefType> Default for DataStore<T, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element, R: RefType> std::fmt::Debug for DataStore<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("element", &std::any::type_name::<T>())
            .field("base", &self.base)
            .finish()
    }
}
