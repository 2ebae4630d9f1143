//! The arena: buffer slots, per-type active buffers, and hold lists.
//!
//! [`DataStoreBase`] owns a fixed table of buffer slots addressed by
//! [`BufferId`]. Each registered buffer type has one active buffer that
//! serves bump allocations; when it cannot fit a request the type switches
//! to a fresh slot. Retired elements travel through the two-stage hold
//! list and only become reusable once the oldest generation any reader
//! still uses has moved past the generation they were retired in.
//!
//! ```text
//! DataStoreBase<R>
//! ├── buffers: [Option<Arc<dyn BufferStorage>>; num_buffers]
//! ├── table:   Arc<BufferTable>  (same buffers, shared with StoreReaders)
//! ├── states:  [BufferState; num_buffers]
//! ├── types:   [TypeEntry]  (handler, active buffer, free-list index)
//! ├── elem_holds:   HoldList<ElemHold>
//! └── buffer_holds: HoldList<BufferHold>
//! ```

use std::any::{self, TypeId as RustTypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};

use genstore_core::{BufferId, EntryRef, EntryRefT, Generation, RefType, TypeId};
use genstore_generation::GenerationHandler;

use crate::allocator::{Allocator, DefaultReclaimer, FreeListAllocator, Reclaimer};
use crate::buffer_state::{BufferState, BufferStatus};
use crate::buffer_type::BufferTypeHandler;
use crate::compaction::{CompactionBuffers, CompactionStrategy};
use crate::config::ArenaConfig;
use crate::error::ArenaError;
use crate::hold::{BufferHold, ElemHold, HoldList};
use crate::raw_allocator::{FreeListRawAllocator, RawAllocator};
use crate::reader::{BufferTable, StoreReader};
use crate::stats::{AddressSpace, BufferStats, MemStats, MemoryUsage};
use crate::storage::{BufferStorage, Element, TypedBuffer};

/// Per-type bookkeeping.
struct TypeEntry {
    handler: Box<dyn BufferTypeHandler>,
    /// Buffer serving bump allocations, if any.
    active: Option<BufferId>,
    /// Active buffers of this type with a non-empty free list.
    free_buffers: IndexSet<BufferId>,
}

/// Generation-tracked arena of typed buffers.
///
/// `R` is the [`RefType`] layout used to pack buffer ids and offsets into
/// [`EntryRef`]s. Mutation takes `&mut self`. Readers on other threads
/// read through a [`StoreReader`] while the writer keeps going; they pin a
/// generation on a [`GenerationHandler`] and only read entries whose refs
/// were published to them before they pinned.
pub struct DataStoreBase<R: RefType = EntryRefT<22>> {
    buffers: Vec<Option<Arc<dyn BufferStorage>>>,
    table: Arc<BufferTable>,
    states: Vec<BufferState>,
    types: Vec<TypeEntry>,
    elem_holds: HoldList<ElemHold>,
    buffer_holds: HoldList<BufferHold>,
    free_lists_enabled: bool,
    elem_hold_list_disabled: bool,
    _ref: PhantomData<fn() -> R>,
}

// Compile-time assertion: the store can move to (and be shared with) other
// threads.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<DataStoreBase>();
};

impl<R: RefType> DataStoreBase<R> {
    /// Create an empty store with no registered types.
    pub fn new(config: ArenaConfig) -> Result<Self, ArenaError> {
        config.validate(R::num_buffers())?;
        let num_buffers = config.effective_max_buffers(R::num_buffers());
        Ok(Self {
            buffers: (0..num_buffers).map(|_| None).collect(),
            table: Arc::new(BufferTable::new(num_buffers as usize)),
            states: (0..num_buffers).map(|id| BufferState::new(BufferId(id))).collect(),
            types: Vec::new(),
            elem_holds: HoldList::with_capacity(config.hold_list_capacity),
            buffer_holds: HoldList::default(),
            free_lists_enabled: config.enable_free_lists,
            elem_hold_list_disabled: false,
            _ref: PhantomData,
        })
    }

    /// Register a buffer type. Ids are assigned sequentially from zero.
    pub fn add_type(&mut self, handler: Box<dyn BufferTypeHandler>) -> Result<TypeId, ArenaError> {
        let max = self.states.len() as u32;
        if self.types.len() as u32 >= max {
            return Err(ArenaError::TooManyTypes { max });
        }
        let array_size = handler.array_size();
        if array_size == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "array_size must be >= 1".into(),
            });
        }
        let arrays_limit = R::offset_size() * R::unit_size(array_size) / array_size;
        handler.config().validate(arrays_limit)?;
        let type_id = TypeId(self.types.len() as u32);
        self.types.push(TypeEntry {
            handler,
            active: None,
            free_buffers: IndexSet::new(),
        });
        Ok(type_id)
    }

    /// Activate one buffer for every registered type that has none.
    pub fn init_primary_buffers(&mut self) {
        for index in 0..self.types.len() {
            let type_id = TypeId(index as u32);
            if self.types[index].active.is_none() {
                self.switch_active_buffer(type_id, 0);
            }
        }
    }

    // ── Buffers ────────────────────────────────────────────────

    /// Make sure the type's active buffer can fit `elems_needed` more
    /// elements, switching to a fresh buffer if not. Returns the active
    /// buffer.
    pub fn ensure_buffer_capacity(&mut self, type_id: TypeId, elems_needed: usize) -> BufferId {
        let active = self.type_entry(type_id).active;
        match active {
            Some(id) if self.fits(id, elems_needed) => id,
            _ => self.switch_active_buffer(type_id, elems_needed),
        }
    }

    fn fits(&self, buffer_id: BufferId, elems_needed: usize) -> bool {
        let state = &self.states[buffer_id.index()];
        state.is_active() && state.remaining() >= elems_needed
    }

    /// Activate the lowest free buffer slot for `type_id` and make it the
    /// type's active buffer. The previous active buffer stays active.
    ///
    /// # Panics
    ///
    /// Panics if every buffer slot is in use.
    pub fn switch_active_buffer(&mut self, type_id: TypeId, elems_needed: usize) -> BufferId {
        let previous = self.type_entry(type_id).active;
        let slot = self
            .states
            .iter()
            .position(BufferState::is_free)
            .unwrap_or_else(|| {
                panic!(
                    "type {type_id}: no free buffer slot, all {} buffer ids are in use",
                    self.states.len()
                )
            });
        let buffer_id = BufferId(slot as u32);
        self.activate_buffer(type_id, buffer_id, elems_needed);
        self.types[type_id.index()].active = Some(buffer_id);
        tracing::debug!(
            type_id = type_id.0,
            from = previous.map(|id| id.0),
            to = buffer_id.0,
            "switched active buffer"
        );
        buffer_id
    }

    fn activate_buffer(&mut self, type_id: TypeId, buffer_id: BufferId, elems_needed: usize) {
        let active_used = self.active_used_elems(type_id);
        let handler = &self.types[type_id.index()].handler;
        let array_size = handler.array_size();
        let reserved = match handler.reserved_elements(buffer_id) {
            0 => 0,
            n => R::pad(n, array_size),
        };
        let arrays = handler
            .config()
            .arrays_for_new_buffer(active_used, elems_needed, reserved);
        let capacity = arrays * array_size;
        let storage = handler.create_storage(capacity);
        storage.grow_to(reserved);
        self.table.publish(buffer_id, Arc::clone(&storage), array_size);
        self.buffers[buffer_id.index()] = Some(storage);

        let state = &mut self.states[buffer_id.index()];
        state.on_active(type_id, array_size, capacity, reserved);
        state.set_free_list_enabled(self.free_lists_enabled);
        if self.elem_hold_list_disabled {
            state.disable_elem_hold_list();
        }
        tracing::debug!(
            buffer_id = buffer_id.0,
            type_id = type_id.0,
            capacity,
            reserved,
            "activated buffer"
        );
    }

    fn active_used_elems(&self, type_id: TypeId) -> usize {
        self.states
            .iter()
            .filter(|s| s.is_active() && s.type_id() == Some(type_id))
            .map(BufferState::used_elems)
            .sum()
    }

    /// Retire a whole buffer. It stops serving allocations and frees, and
    /// its memory is released once its hold generation is trimmed.
    pub fn hold_buffer(&mut self, buffer_id: BufferId) {
        let state = &mut self.states[buffer_id.index()];
        state.on_hold();
        let type_id = state
            .type_id()
            .unwrap_or_else(|| panic!("active buffer {buffer_id} has no type"));
        let entry = &mut self.types[type_id.index()];
        entry.free_buffers.shift_remove(&buffer_id);
        if entry.active == Some(buffer_id) {
            entry.active = None;
        }
        self.buffer_holds.push(BufferHold { buffer_id });
        tracing::debug!(buffer_id = buffer_id.0, type_id = type_id.0, "buffer on hold");
    }

    fn free_buffer(&mut self, buffer_id: BufferId) {
        self.states[buffer_id.index()].on_free();
        self.table.retract(buffer_id);
        self.buffers[buffer_id.index()] = None;
        tracing::debug!(buffer_id = buffer_id.0, "freed buffer");
    }

    /// Release every buffer and forget all holds. For teardown.
    pub fn drop_buffers(&mut self) {
        for (state, buffer) in self.states.iter_mut().zip(self.buffers.iter_mut()) {
            state.drop_buffer();
            self.table.retract(state.buffer_id());
            *buffer = None;
        }
        for entry in &mut self.types {
            entry.active = None;
            entry.free_buffers.clear();
        }
        self.elem_holds = HoldList::default();
        self.buffer_holds = HoldList::default();
        tracing::debug!(buffers = self.states.len(), "dropped all buffers");
    }

    // ── Allocation plumbing ────────────────────────────────────

    /// Bump-allocate `num_elems` elements (padded to the layout's unit) in
    /// the type's active buffer. Returns the ref and the element offset.
    pub(crate) fn bump_alloc(&mut self, type_id: TypeId, num_elems: usize) -> (EntryRef, usize) {
        let array_size = self.type_entry(type_id).handler.array_size();
        let padded = R::pad(num_elems, array_size);
        let buffer_id = self.ensure_buffer_capacity(type_id, padded);
        let offset = self.states[buffer_id.index()]
            .allocate(padded)
            .unwrap_or_else(|| {
                panic!("buffer {buffer_id} cannot fit {padded} elements after capacity check")
            });
        self.storage(buffer_id).grow_to(offset + padded);
        let entry_ref = R::new(offset / R::unit_size(array_size), buffer_id).into();
        (entry_ref, offset)
    }

    /// Pop a freed array of the given type for reuse, most recent first.
    /// Returns the ref and the element offset.
    pub(crate) fn pop_free(&mut self, type_id: TypeId) -> Option<(EntryRef, usize)> {
        let entry = self.types.get_mut(type_id.index())?;
        let buffer_id = *entry.free_buffers.last()?;
        let state = &mut self.states[buffer_id.index()];
        let array_size = state.array_size();
        let entry_ref = state.pop_free(R::pad(array_size, array_size))?;
        if state.is_free_list_empty() {
            entry.free_buffers.shift_remove(&buffer_id);
        }
        let offset = R::from(entry_ref).offset() * R::unit_size(array_size);
        state.mark_live(offset);
        Some((entry_ref, offset))
    }

    /// Panic unless elements of type `T` live in buffers of `type_id`.
    pub(crate) fn check_element_type<T: Element>(&self, type_id: TypeId) {
        let handler = &self.type_entry(type_id).handler;
        assert!(
            handler.element_type() == RustTypeId::of::<T>(),
            "type {type_id} holds {} elements, not {}",
            handler.element_type_name(),
            any::type_name::<T>()
        );
    }

    /// Mutable elements `offset..offset + len` of a buffer.
    pub(crate) fn elems_mut<T: Element>(
        &mut self,
        buffer_id: BufferId,
        offset: usize,
        len: usize,
    ) -> MappedRwLockWriteGuard<'_, [T]> {
        self.typed::<T>(buffer_id).write(offset, len)
    }

    fn storage(&self, buffer_id: BufferId) -> &dyn BufferStorage {
        self.buffers[buffer_id.index()]
            .as_deref()
            .unwrap_or_else(|| panic!("buffer {buffer_id} has no memory"))
    }

    fn typed<T: Element>(&self, buffer_id: BufferId) -> &TypedBuffer<T> {
        self.storage(buffer_id)
            .as_any()
            .downcast_ref::<TypedBuffer<T>>()
            .unwrap_or_else(|| {
                panic!(
                    "buffer {buffer_id} does not hold elements of type {}",
                    any::type_name::<T>()
                )
            })
    }

    /// A read view of this store for reader threads.
    ///
    /// The view follows buffer activations and frees made after it was
    /// taken.
    pub fn reader(&self) -> StoreReader<R> {
        StoreReader::new(Arc::clone(&self.table))
    }

    /// Array size of the buffer type.
    pub fn array_size(&self, type_id: TypeId) -> usize {
        self.type_entry(type_id).handler.array_size()
    }

    // ── Allocators ─────────────────────────────────────────────

    /// Bump allocator for elements of type `T` in buffers of `type_id`.
    ///
    /// # Panics
    ///
    /// Panics if `type_id` does not hold `T` elements.
    pub fn allocator<T: Element>(&mut self, type_id: TypeId) -> Allocator<'_, T, R> {
        Allocator::new(self, type_id)
    }

    /// Allocator that reuses freed arrays before bump allocating.
    pub fn free_list_allocator<T: Element>(
        &mut self,
        type_id: TypeId,
    ) -> FreeListAllocator<'_, T, R, DefaultReclaimer> {
        FreeListAllocator::new(self, type_id)
    }

    /// Free-list allocator that passes reused slots through `Rc` first.
    pub fn free_list_allocator_with<T: Element, Rc: Reclaimer<T>>(
        &mut self,
        type_id: TypeId,
    ) -> FreeListAllocator<'_, T, R, Rc> {
        FreeListAllocator::new(self, type_id)
    }

    /// Bump allocator for spans of any length.
    pub fn raw_allocator<T: Element>(&mut self, type_id: TypeId) -> RawAllocator<'_, T, R> {
        RawAllocator::new(self, type_id)
    }

    /// Raw allocator that reuses freed arrays for array-sized requests.
    pub fn free_list_raw_allocator<T: Element>(
        &mut self,
        type_id: TypeId,
    ) -> FreeListRawAllocator<'_, T, R> {
        FreeListRawAllocator::new(self, type_id)
    }

    // ── Typed access ───────────────────────────────────────────

    /// The element at `entry_ref`, read-locked.
    pub fn entry<T: Element>(&self, entry_ref: EntryRef) -> MappedRwLockReadGuard<'_, T> {
        MappedRwLockReadGuard::map(self.array::<T>(entry_ref, 1), |elems| &elems[0])
    }

    /// Mutable element at `entry_ref`.
    pub fn entry_mut<T: Element>(&mut self, entry_ref: EntryRef) -> MappedRwLockWriteGuard<'_, T> {
        MappedRwLockWriteGuard::map(self.array_mut::<T>(entry_ref, 1), |elems| &mut elems[0])
    }

    /// `len` elements starting at `entry_ref`, read-locked.
    ///
    /// Drop the guard before mutating the same buffer.
    ///
    /// # Panics
    ///
    /// Panics if the ref is invalid, the span lies outside the elements
    /// handed out by its buffer, or the buffer does not hold `T` elements.
    pub fn array<T: Element>(
        &self,
        entry_ref: EntryRef,
        len: usize,
    ) -> MappedRwLockReadGuard<'_, [T]> {
        let (buffer_id, offset) = self.locate(entry_ref, len);
        self.typed::<T>(buffer_id).read(offset, len)
    }

    /// Mutable `len` elements starting at `entry_ref`.
    pub fn array_mut<T: Element>(
        &mut self,
        entry_ref: EntryRef,
        len: usize,
    ) -> MappedRwLockWriteGuard<'_, [T]> {
        let (buffer_id, offset) = self.locate(entry_ref, len);
        self.elems_mut::<T>(buffer_id, offset, len)
    }

    /// Buffer id and element offset of a span of `len` elements.
    ///
    /// # Panics
    ///
    /// Panics if the ref is invalid or the span is not within the elements
    /// its buffer has handed out.
    fn locate(&self, entry_ref: EntryRef, len: usize) -> (BufferId, usize) {
        assert!(entry_ref.valid(), "access through the invalid entry ref");
        let r = R::from(entry_ref);
        let buffer_id = r.buffer_id();
        let state = self.states.get(buffer_id.index()).unwrap_or_else(|| {
            panic!(
                "{entry_ref} names buffer {buffer_id} beyond the store's {} buffers",
                self.states.len()
            )
        });
        let offset = r.offset() * R::unit_size(state.array_size());
        assert!(
            !state.is_free() && offset + len <= state.used_elems(),
            "{entry_ref}: {len} elements at offset {offset} lie outside buffer {buffer_id}, \
             which is {:?} with {} elements handed out",
            state.status(),
            state.used_elems()
        );
        (buffer_id, offset)
    }

    // ── Hold and free ──────────────────────────────────────────

    /// Retire `num_elems` elements at `entry_ref`.
    ///
    /// Readers may still observe them, so they are only released once the
    /// hold lists are transferred and trimmed past the current generation.
    /// `extra_bytes` is indirect memory owned by the elements, accounted as
    /// held until then.
    ///
    /// # Panics
    ///
    /// Panics if the span is outside its buffer, the buffer is not active,
    /// or the span is already held or freed.
    pub fn hold_elem(&mut self, entry_ref: EntryRef, num_elems: usize, extra_bytes: usize) {
        let (buffer_id, offset) = self.locate(entry_ref, num_elems);
        let state = &mut self.states[buffer_id.index()];
        assert!(
            state.is_active(),
            "hold_elem of {entry_ref} in buffer {buffer_id} which is {:?}",
            state.status()
        );
        state.mark_released(offset, "hold_elem");
        let padded = R::pad(num_elems, state.array_size());
        if state.has_disabled_elem_hold_list() {
            state.inc_dead_elems(padded);
            state.dec_extra_used_bytes(extra_bytes);
            return;
        }
        state.inc_hold_elems(padded);
        state.inc_extra_hold_bytes(extra_bytes);
        self.elem_holds.push(ElemHold {
            entry_ref,
            num_elems,
            extra_bytes,
        });
    }

    /// Account `bytes` of indirect memory owned by the entry at `entry_ref`.
    ///
    /// Pass the same amount as `extra_bytes` to [`hold_elem`](Self::hold_elem)
    /// when the entry is retired.
    pub fn inc_extra_used_bytes(&mut self, entry_ref: EntryRef, bytes: usize) {
        let (buffer_id, _) = self.locate(entry_ref, 1);
        self.states[buffer_id.index()].inc_extra_used_bytes(bytes);
    }

    /// Free elements that were never visible to readers, immediately.
    ///
    /// # Panics
    ///
    /// Panics if the span is outside its buffer or is already held or
    /// freed.
    pub fn free_elem(&mut self, entry_ref: EntryRef, num_elems: usize) {
        self.free_elem_internal(entry_ref, num_elems, false);
    }

    fn free_elem_internal(&mut self, entry_ref: EntryRef, num_elems: usize, was_held: bool) {
        let (buffer_id, offset) = self.locate(entry_ref, num_elems);
        let state = &mut self.states[buffer_id.index()];
        let array_size = state.array_size();
        let padded = R::pad(num_elems, array_size);
        if was_held {
            assert!(
                state.is_released(offset),
                "release of held span at offset {offset} in buffer {buffer_id} that was never held"
            );
            state.dec_hold_elems(padded);
        } else {
            state.mark_released(offset, "free_elem");
        }
        if state.is_active() {
            if state.free_list_enabled() && num_elems == array_size {
                let type_id = state
                    .type_id()
                    .unwrap_or_else(|| panic!("active buffer {buffer_id} has no type"));
                if state.free_array(entry_ref, padded) {
                    self.types[type_id.index()].free_buffers.insert(buffer_id);
                }
            } else {
                state.inc_dead_elems(padded);
            }
        } else {
            assert!(
                state.is_on_hold() && was_held,
                "free of {num_elems} elements at {entry_ref} (offset {offset}) in buffer {buffer_id} \
                 which is {:?} (was_held: {was_held})",
                state.status()
            );
            state.inc_dead_elems(padded);
        }
        let type_id = self.states[buffer_id.index()]
            .type_id()
            .unwrap_or_else(|| panic!("buffer {buffer_id} has no type"));
        self.types[type_id.index()]
            .handler
            .clean_hold(self.storage(buffer_id), offset, padded);
    }

    // ── Hold lists ─────────────────────────────────────────────

    /// Stamp everything retired since the last transfer with `generation`.
    ///
    /// Called at the generation boundary, before the generation handler
    /// advances past `generation`.
    pub fn transfer_hold_lists(&mut self, generation: Generation) {
        self.elem_holds.transfer(generation);
        self.buffer_holds.transfer(generation);
    }

    /// Release every held element retired before `oldest_used`.
    pub fn trim_elem_hold_list(&mut self, oldest_used: Generation) {
        let batch = self.elem_holds.take_before(oldest_used);
        if batch.is_empty() {
            return;
        }
        for hold in &batch {
            self.release_held(hold);
        }
        tracing::trace!(
            generation = oldest_used.0,
            freed = batch.len(),
            "trimmed elem hold list"
        );
    }

    /// Release every transferred held element regardless of generation.
    pub fn clear_elem_hold_list(&mut self) {
        for hold in self.elem_holds.take_all() {
            self.release_held(&hold);
        }
    }

    fn release_held(&mut self, hold: &ElemHold) {
        self.free_elem_internal(hold.entry_ref, hold.num_elems, true);
        if hold.extra_bytes > 0 {
            let (buffer_id, _) = self.locate(hold.entry_ref, hold.num_elems);
            let state = &mut self.states[buffer_id.index()];
            state.dec_extra_hold_bytes(hold.extra_bytes);
            state.dec_extra_used_bytes(hold.extra_bytes);
        }
    }

    fn trim_buffer_hold_list(&mut self, oldest_used: Generation) {
        let batch = self.buffer_holds.take_before(oldest_used);
        for hold in &batch {
            self.free_buffer(hold.buffer_id);
        }
        if !batch.is_empty() {
            tracing::trace!(
                generation = oldest_used.0,
                freed = batch.len(),
                "trimmed buffer hold list"
            );
        }
    }

    /// Release held elements, then held buffers, retired before
    /// `oldest_used`.
    pub fn trim_hold_lists(&mut self, oldest_used: Generation) {
        self.trim_elem_hold_list(oldest_used);
        self.trim_buffer_hold_list(oldest_used);
    }

    /// Release everything on hold, transferred or not. Only safe when no
    /// reader can observe the store.
    pub fn clear_hold_lists(&mut self) {
        let mut elems = self.elem_holds.take_all();
        elems.extend(self.elem_holds.take_pending());
        for hold in &elems {
            self.release_held(hold);
        }
        let mut buffers = self.buffer_holds.take_all();
        buffers.extend(self.buffer_holds.take_pending());
        for hold in &buffers {
            self.free_buffer(hold.buffer_id);
        }
    }

    /// One maintenance cycle against `handler`: transfer at the current
    /// generation, advance it, and trim everything no reader can see.
    /// Returns the oldest used generation the trim ran against.
    pub fn reclaim(&mut self, handler: &GenerationHandler) -> Generation {
        self.transfer_hold_lists(handler.current_generation());
        handler.inc_generation();
        let oldest = handler.update_oldest_used_generation();
        self.trim_hold_lists(oldest);
        oldest
    }

    // ── Toggles ────────────────────────────────────────────────

    /// Let active buffers keep freed arrays for reuse.
    pub fn enable_free_lists(&mut self) {
        self.free_lists_enabled = true;
        for state in &mut self.states {
            if state.is_active() && !state.is_compacting() {
                state.set_free_list_enabled(true);
            }
        }
    }

    /// Stop free-list reuse and discard pending free-list entries.
    pub fn disable_free_lists(&mut self) {
        self.free_lists_enabled = false;
        for state in &mut self.states {
            if state.is_active() {
                state.set_free_list_enabled(false);
            }
        }
        for entry in &mut self.types {
            entry.free_buffers.clear();
        }
    }

    /// Apply holds immediately from now on, for stores that have no
    /// concurrent readers.
    pub fn disable_elem_hold_list(&mut self) {
        self.elem_hold_list_disabled = true;
        for state in &mut self.states {
            if !state.is_free() {
                state.disable_elem_hold_list();
            }
        }
    }

    // ── Introspection ──────────────────────────────────────────

    fn type_entry(&self, type_id: TypeId) -> &TypeEntry {
        self.types
            .get(type_id.index())
            .unwrap_or_else(|| panic!("unknown type id {type_id} ({} registered)", self.types.len()))
    }

    /// State of a buffer slot.
    pub fn buffer_state(&self, buffer_id: BufferId) -> &BufferState {
        &self.states[buffer_id.index()]
    }

    /// The type's current active buffer.
    pub fn active_buffer(&self, type_id: TypeId) -> Option<BufferId> {
        self.type_entry(type_id).active
    }

    /// Descriptor of a registered type.
    pub fn type_handler(&self, type_id: TypeId) -> &dyn BufferTypeHandler {
        self.type_entry(type_id).handler.as_ref()
    }

    /// Number of buffer slots.
    pub fn num_buffers(&self) -> usize {
        self.states.len()
    }

    /// Number of registered types.
    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    /// Whether new active buffers participate in free-list reuse.
    pub fn free_lists_enabled(&self) -> bool {
        self.free_lists_enabled
    }

    /// Held element spans: `(pending, transferred)`.
    pub fn elem_hold_list_len(&self) -> (usize, usize) {
        (self.elem_holds.stage1_len(), self.elem_holds.stage2_len())
    }

    /// Held buffers: `(pending, transferred)`.
    pub fn buffer_hold_list_len(&self) -> (usize, usize) {
        (self.buffer_holds.stage1_len(), self.buffer_holds.stage2_len())
    }

    // ── Stats ──────────────────────────────────────────────────

    fn elem_size(&self, state: &BufferState) -> usize {
        state
            .type_id()
            .map_or(0, |t| self.types[t.index()].handler.elem_size())
    }

    /// Byte-level memory usage across all buffers.
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::default();
        for state in self.states.iter().filter(|s| !s.is_free()) {
            let elem_size = self.elem_size(state);
            usage.inc_allocated_bytes(state.capacity() * elem_size);
            usage.inc_used_bytes(state.used_elems() * elem_size + state.extra_used_bytes());
            usage.inc_dead_bytes(state.dead_elems() * elem_size);
            usage.inc_allocated_bytes_on_hold(
                state.hold_elems() * elem_size + state.extra_hold_bytes(),
            );
        }
        usage
    }

    /// Address-space consumption in ref offset units.
    pub fn address_space_usage(&self) -> AddressSpace {
        let mut space = AddressSpace {
            used: 0,
            dead: 0,
            limit: R::offset_size() * self.states.len(),
        };
        for state in &self.states {
            if state.is_active() {
                let unit = R::unit_size(state.array_size());
                space.used += state.used_elems() / unit;
                space.dead += state.dead_elems() / unit;
            } else if state.is_on_hold() {
                space.used += R::offset_size();
                space.dead += R::offset_size();
            }
        }
        space
    }

    /// Element and buffer totals.
    pub fn mem_stats(&self) -> MemStats {
        let mut stats = MemStats::default();
        for state in &self.states {
            if state.is_free() {
                stats.free_buffers += 1;
                continue;
            }
            if state.is_active() {
                stats.active_buffers += 1;
            } else {
                stats.hold_buffers += 1;
            }
            let elem_size = self.elem_size(state);
            stats.alloc_elems += state.capacity();
            stats.used_elems += state.used_elems();
            stats.dead_elems += state.dead_elems();
            stats.hold_elems += state.hold_elems();
            stats.alloc_bytes += state.capacity() * elem_size;
            stats.used_bytes += state.used_elems() * elem_size + state.extra_used_bytes();
            stats.dead_bytes += state.dead_elems() * elem_size;
            stats.hold_bytes += state.hold_elems() * elem_size + state.extra_hold_bytes();
        }
        stats
    }

    /// Snapshots of every non-free buffer, in id order.
    pub fn buffers(&self) -> impl Iterator<Item = BufferStats> + '_ {
        self.states.iter().filter(|s| !s.is_free()).map(|state| {
            let reserved = state.reserved_elems();
            BufferStats {
                buffer_id: state.buffer_id(),
                type_id: state.type_id().unwrap_or(TypeId(u32::MAX)),
                status: state.status(),
                capacity: state.capacity(),
                used_elems: state.used_elems() - reserved,
                dead_elems: state.dead_elems() - reserved,
                hold_elems: state.hold_elems(),
                elem_size: self.elem_size(state),
                compacting: state.is_compacting(),
            }
        })
    }

    // ── Compaction ─────────────────────────────────────────────

    /// Select every active buffer of `type_id` for compaction and move the
    /// type to a fresh active buffer.
    ///
    /// Selected buffers stay readable and freeable but no longer take part
    /// in free-list reuse.
    pub fn start_compact(&mut self, type_id: TypeId) -> CompactionBuffers {
        let ids: CompactionBuffers = self
            .states
            .iter()
            .filter(|s| s.is_active() && s.type_id() == Some(type_id) && !s.is_compacting())
            .map(BufferState::buffer_id)
            .collect();
        for &id in &ids {
            self.mark_compacting(id);
        }
        self.switch_active_buffer(type_id, 0);
        tracing::debug!(type_id = type_id.0, buffers = ids.len(), "started compaction");
        ids
    }

    /// Select the buffers with the highest dead ratio above the strategy's
    /// threshold, across all types, worst first.
    pub fn start_compact_worst_buffers(&mut self, strategy: &CompactionStrategy) -> CompactionBuffers {
        let candidates: Vec<BufferStats> = self
            .buffers()
            .filter(|s| s.status == BufferStatus::Active)
            .collect();
        let ids = strategy.select(candidates);
        for &id in &ids {
            self.mark_compacting(id);
            let type_id = self.states[id.index()]
                .type_id()
                .unwrap_or_else(|| panic!("active buffer {id} has no type"));
            if self.types[type_id.index()].active == Some(id) {
                self.switch_active_buffer(type_id, 0);
            }
        }
        if !ids.is_empty() {
            tracing::debug!(buffers = ?ids.as_slice(), "started compaction of worst buffers");
        }
        ids
    }

    fn mark_compacting(&mut self, buffer_id: BufferId) {
        let state = &mut self.states[buffer_id.index()];
        state.set_compacting();
        state.set_free_list_enabled(false);
        if let Some(type_id) = state.type_id() {
            self.types[type_id.index()].free_buffers.shift_remove(&buffer_id);
        }
    }

    /// Retire compacted buffers once their live entries have been moved.
    pub fn finish_compact(&mut self, buffer_ids: &[BufferId]) {
        for &id in buffer_ids {
            self.hold_buffer(id);
        }
    }
}

impl<R: RefType> fmt::Debug for DataStoreBase<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStoreBase")
            .field("num_buffers", &self.states.len())
            .field("num_types", &self.types.len())
            .field("elem_holds", &self.elem_hold_list_len())
            .field("buffer_holds", &self.buffer_hold_list_len())
            .field("free_lists_enabled", &self.free_lists_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_type::{BufferType, BufferTypeConfig};

    type Store = DataStoreBase<EntryRefT<22>>;

    fn store_with(array_size: usize, min_arrays: usize, max_arrays: usize) -> (Store, TypeId) {
        let mut store = Store::new(ArenaConfig::default()).unwrap();
        let type_id = store
            .add_type(Box::new(BufferType::<u32>::new(BufferTypeConfig::new(
                array_size, min_arrays, max_arrays,
            ))))
            .unwrap();
        store.init_primary_buffers();
        (store, type_id)
    }

    fn alloc(store: &mut Store, type_id: TypeId, value: u32) -> EntryRef {
        store.free_list_allocator::<u32>(type_id).alloc(value).entry_ref
    }

    #[test]
    fn primary_buffer_reserves_ref_zero() {
        let (store, type_id) = store_with(1, 16, 1024);
        assert_eq!(store.active_buffer(type_id), Some(BufferId(0)));
        let state = store.buffer_state(BufferId(0));
        assert_eq!(state.used_elems(), 1);
        assert_eq!(state.dead_elems(), 1);
        assert_eq!(state.capacity(), 16);
    }

    #[test]
    fn first_allocation_is_never_invalid() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 7);
        assert!(r.valid());
        assert_eq!(*store.entry::<u32>(r), 7);
    }

    #[test]
    fn add_type_rejects_too_many_types() {
        let mut store = Store::new(ArenaConfig {
            max_buffers: Some(1),
            ..ArenaConfig::default()
        })
        .unwrap();
        let bt = || Box::new(BufferType::<u8>::new(BufferTypeConfig::new(1, 1, 16)));
        assert_eq!(store.add_type(bt()).unwrap(), TypeId(0));
        assert_eq!(
            store.add_type(bt()).unwrap_err(),
            ArenaError::TooManyTypes { max: 1 }
        );
    }

    #[test]
    fn add_type_rejects_policy_beyond_layout() {
        let mut store = DataStoreBase::<EntryRefT<4>>::new(ArenaConfig {
            max_buffers: Some(4),
            ..ArenaConfig::default()
        })
        .unwrap();
        let err = store
            .add_type(Box::new(BufferType::<u8>::new(BufferTypeConfig::new(1, 1, 17))))
            .unwrap_err();
        assert!(matches!(err, ArenaError::InvalidConfig { .. }));
    }

    #[test]
    fn hold_then_trim_releases_after_generation() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let _e0 = alloc(&mut store, type_id, 10);
        let e1 = alloc(&mut store, type_id, 11);
        let _e2 = alloc(&mut store, type_id, 12);

        store.hold_elem(e1, 1, 0);
        assert_eq!(store.buffer_state(BufferId(0)).hold_elems(), 1);
        store.transfer_hold_lists(Generation(5));

        store.trim_hold_lists(Generation(5));
        assert_eq!(store.buffer_state(BufferId(0)).hold_elems(), 1);
        assert_eq!(*store.entry::<u32>(e1), 11);

        store.trim_hold_lists(Generation(6));
        let state = store.buffer_state(BufferId(0));
        assert_eq!(state.hold_elems(), 0);
        assert_eq!(state.free_list(), &[e1]);
        // Released slot was cleaned.
        assert_eq!(*store.entry::<u32>(e1), 0);

        assert_eq!(alloc(&mut store, type_id, 99), e1);
        assert_eq!(*store.entry::<u32>(e1), 99);
    }

    #[test]
    fn free_elem_skips_the_hold_list() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        store.free_elem(r, 1);
        assert_eq!(store.elem_hold_list_len(), (0, 0));
        assert_eq!(store.buffer_state(BufferId(0)).free_list(), &[r]);
    }

    #[test]
    fn exhausting_active_buffer_switches() {
        let (mut store, type_id) = store_with(1, 4, 4);
        let refs: Vec<EntryRef> = (0..3).map(|v| alloc(&mut store, type_id, v)).collect();
        let next = alloc(&mut store, type_id, 3);
        let first = EntryRefT::<22>::from(refs[0]).buffer_id();
        let second = EntryRefT::<22>::from(next).buffer_id();
        assert_ne!(first, second);
        assert_eq!(store.active_buffer(type_id), Some(second));
        // The switched-out buffer stays active and readable.
        assert!(store.buffer_state(first).is_active());
        assert_eq!(*store.entry::<u32>(refs[2]), 2);
    }

    #[test]
    #[should_panic(expected = "no free buffer slot")]
    fn exhausting_buffer_ids_panics() {
        let mut store = Store::new(ArenaConfig {
            max_buffers: Some(2),
            ..ArenaConfig::default()
        })
        .unwrap();
        let type_id = store
            .add_type(Box::new(BufferType::<u32>::new(BufferTypeConfig::new(1, 2, 2))))
            .unwrap();
        store.init_primary_buffers();
        for v in 0..4 {
            let _ = alloc(&mut store, type_id, v);
        }
    }

    #[test]
    fn array_types_use_array_offsets() {
        let (mut store, type_id) = store_with(3, 4, 64);
        let h = store
            .allocator::<u32>(type_id)
            .alloc_array(&[1, 2, 3])
            .entry_ref;
        let r = EntryRefT::<22>::from(h);
        // Array 0 of buffer 0 is reserved.
        assert_eq!(r.offset(), 1);
        assert_eq!(&*store.array::<u32>(h, 3), &[1, 2, 3]);
    }

    #[test]
    fn disabled_elem_hold_list_frees_immediately() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        store.disable_elem_hold_list();
        let r = alloc(&mut store, type_id, 5);
        store.hold_elem(r, 1, 0);
        assert_eq!(store.elem_hold_list_len(), (0, 0));
        let state = store.buffer_state(BufferId(0));
        assert_eq!(state.dead_elems(), 2);
        assert_eq!(state.hold_elems(), 0);
    }

    #[test]
    fn extra_bytes_follow_the_hold() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 5);
        store.inc_extra_used_bytes(r, 100);
        store.hold_elem(r, 1, 100);
        assert_eq!(store.memory_usage().allocated_bytes_on_hold, 4 + 100);
        store.transfer_hold_lists(Generation(1));
        store.trim_hold_lists(Generation(2));
        let usage = store.memory_usage();
        assert_eq!(usage.allocated_bytes_on_hold, 0);
        assert_eq!(store.buffer_state(BufferId(0)).extra_used_bytes(), 0);
    }

    #[test]
    fn disabling_free_lists_stops_reuse() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        store.free_elem(r, 1);
        store.disable_free_lists();
        assert!(store.buffer_state(BufferId(0)).is_free_list_empty());
        assert_ne!(alloc(&mut store, type_id, 2), r);

        store.enable_free_lists();
        let s = alloc(&mut store, type_id, 3);
        store.free_elem(s, 1);
        assert_eq!(alloc(&mut store, type_id, 4), s);
    }

    #[test]
    fn compaction_holds_then_frees_buffer() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        store.hold_elem(r, 1, 0);
        let ids = store.start_compact(type_id);
        assert_eq!(ids.as_slice(), &[BufferId(0)]);
        assert_ne!(store.active_buffer(type_id), Some(BufferId(0)));
        assert!(store.buffer_state(BufferId(0)).is_compacting());

        store.finish_compact(&ids);
        assert_eq!(store.buffer_state(BufferId(0)).status(), BufferStatus::Hold);
        store.transfer_hold_lists(Generation(1));
        store.trim_hold_lists(Generation(2));
        assert!(store.buffer_state(BufferId(0)).is_free());
        assert_eq!(store.mem_stats().hold_buffers, 0);
    }

    #[test]
    fn worst_buffers_selected_by_dead_ratio() {
        let (mut store, type_id) = store_with(1, 8, 8);
        let refs: Vec<EntryRef> = (0..10).map(|v| alloc(&mut store, type_id, v)).collect();
        // Buffer 0 holds refs[0..7]; kill most of it.
        for &r in &refs[..6] {
            store.free_elem(r, 1);
        }
        let strategy = CompactionStrategy::new(0.5, 1).unwrap();
        let ids = store.start_compact_worst_buffers(&strategy);
        assert_eq!(ids.as_slice(), &[BufferId(0)]);
        assert!(store.buffer_state(BufferId(0)).is_free_list_empty());
        assert!(store.buffer_state(BufferId(0)).is_compacting());
    }

    #[test]
    fn stats_track_buffer_lifecycle() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let _ = alloc(&mut store, type_id, 1);
        let stats = store.mem_stats();
        assert_eq!(stats.active_buffers, 1);
        assert_eq!(stats.free_buffers as usize, store.num_buffers() - 1);
        assert_eq!(stats.used_elems, 2);
        assert_eq!(stats.alloc_bytes, 16 * 4);

        let space = store.address_space_usage();
        assert_eq!(space.used, 2);
        assert_eq!(space.dead, 1);
        assert_eq!(space.limit, (1 << 22) * 1024);
    }

    #[test]
    fn drop_buffers_resets_everything() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        store.hold_elem(r, 1, 0);
        store.drop_buffers();
        assert_eq!(store.mem_stats().free_buffers as usize, store.num_buffers());
        assert_eq!(store.elem_hold_list_len(), (0, 0));
        assert_eq!(store.active_buffer(type_id), None);
    }

    #[test]
    #[should_panic(expected = "was_held: false")]
    fn freeing_unheld_elem_in_held_buffer_panics() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        store.hold_buffer(BufferId(0));
        store.free_elem(r, 1);
    }

    #[test]
    #[should_panic(expected = "hold_elem of")]
    fn holding_in_held_buffer_panics() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        store.hold_buffer(BufferId(0));
        store.hold_elem(r, 1, 0);
    }

    #[test]
    #[should_panic(expected = "free_elem of span at offset 1 in buffer 0 (Active) which is already held or freed")]
    fn double_free_elem_panics() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        store.free_elem(r, 1);
        store.free_elem(r, 1);
    }

    #[test]
    fn double_free_elem_leaves_free_list_untouched() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        store.free_elem(r, 1);
        let again = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| store.free_elem(r, 1)));
        assert!(again.is_err());
        assert_eq!(store.buffer_state(BufferId(0)).free_list(), &[r]);
        assert_eq!(store.buffer_state(BufferId(0)).dead_elems(), 2);
    }

    #[test]
    #[should_panic(expected = "hold_elem of span at offset 1 in buffer 0 (Active) which is already held or freed")]
    fn double_hold_elem_panics() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        store.hold_elem(r, 1, 0);
        store.transfer_hold_lists(Generation(0));
        store.trim_hold_lists(Generation(1));
        store.hold_elem(r, 1, 0);
    }

    #[test]
    #[should_panic(expected = "hold_elem of span at offset 1 in buffer 0 (Active) which is already held or freed")]
    fn holding_an_already_held_elem_panics() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        store.hold_elem(r, 1, 0);
        store.hold_elem(r, 1, 0);
    }

    #[test]
    #[should_panic(expected = "already held or freed")]
    fn freeing_a_held_elem_panics() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        store.hold_elem(r, 1, 0);
        store.free_elem(r, 1);
    }

    #[test]
    fn reused_slot_can_be_released_again() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        store.free_elem(r, 1);
        assert_eq!(alloc(&mut store, type_id, 2), r);
        assert!(!store.buffer_state(BufferId(0)).is_released(1));
        store.hold_elem(r, 1, 0);
        store.transfer_hold_lists(Generation(0));
        store.trim_hold_lists(Generation(1));
        assert_eq!(store.buffer_state(BufferId(0)).free_list(), &[r]);
        let a = alloc(&mut store, type_id, 3);
        let b = alloc(&mut store, type_id, 4);
        assert_eq!(a, r);
        assert_ne!(a, b);
    }

    #[test]
    #[should_panic(expected = "1 elements at offset 500 lie outside buffer 0, which is Active with 2 elements handed out")]
    fn free_elem_beyond_handed_out_elements_panics() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let _ = alloc(&mut store, type_id, 1);
        store.free_elem(EntryRefT::<22>::new(500, BufferId(0)).into(), 1);
    }

    #[test]
    fn out_of_range_free_leaves_state_untouched() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let _ = alloc(&mut store, type_id, 1);
        let bogus: EntryRef = EntryRefT::<22>::new(500, BufferId(0)).into();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| store.free_elem(bogus, 1)));
        assert!(result.is_err());
        let state = store.buffer_state(BufferId(0));
        assert_eq!(state.dead_elems(), 1);
        assert!(state.is_free_list_empty());
    }

    #[test]
    #[should_panic(expected = "lie outside buffer 3, which is Free")]
    fn reading_from_free_buffer_panics() {
        let (store, _) = store_with(1, 16, 1024);
        let _ = store.entry::<u32>(EntryRefT::<22>::new(1, BufferId(3)).into());
    }

    #[test]
    #[should_panic(expected = "does not hold elements of type")]
    fn reading_with_wrong_type_panics() {
        let (mut store, type_id) = store_with(1, 16, 1024);
        let r = alloc(&mut store, type_id, 1);
        let _ = store.entry::<u64>(r);
    }

    #[test]
    #[should_panic(expected = "invalid entry ref")]
    fn reading_invalid_ref_panics() {
        let (store, _) = store_with(1, 16, 1024);
        let _ = store.entry::<u32>(EntryRef::invalid());
    }
}
