//! Per-buffer lifecycle and element accounting.
//!
//! A [`BufferState`] tracks one buffer slot through
//! `Free → Active → Hold → Free`. While active the buffer hands out
//! elements from a bump pointer and recycles whole arrays through a LIFO
//! free list; once on hold it only drains. Counts are in elements and
//! always satisfy `used >= dead + hold`.

use genstore_core::{BufferId, EntryRef, TypeId};

/// Lifecycle status of a buffer slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferStatus {
    /// No memory; the id is available for a new buffer.
    Free,
    /// Accepting allocations, frees, and holds.
    Active,
    /// Retired; waiting for readers to move past before release.
    Hold,
}

/// Accounting and free list for one buffer slot.
#[derive(Clone, Debug)]
pub struct BufferState {
    buffer_id: BufferId,
    status: BufferStatus,
    type_id: Option<TypeId>,
    array_size: usize,
    /// Reserved capacity in elements.
    capacity: usize,
    /// Leading elements never handed out.
    reserved: usize,
    /// Bump pointer: elements handed out so far (including reserved).
    used: usize,
    dead: usize,
    hold: usize,
    extra_used_bytes: usize,
    extra_hold_bytes: usize,
    /// Refs to whole dead arrays, reused LIFO.
    free_list: Vec<EntryRef>,
    /// One bit per element offset: set while the span starting there is
    /// held or freed and not yet handed out again.
    released: Vec<u64>,
    free_list_enabled: bool,
    elem_hold_list_disabled: bool,
    compacting: bool,
}

impl BufferState {
    /// A free slot for `buffer_id`.
    pub fn new(buffer_id: BufferId) -> Self {
        Self {
            buffer_id,
            status: BufferStatus::Free,
            type_id: None,
            array_size: 0,
            capacity: 0,
            reserved: 0,
            used: 0,
            dead: 0,
            hold: 0,
            extra_used_bytes: 0,
            extra_hold_bytes: 0,
            free_list: Vec::new(),
            released: Vec::new(),
            free_list_enabled: false,
            elem_hold_list_disabled: false,
            compacting: false,
        }
    }

    /// Activate this slot for `type_id`.
    ///
    /// The first `reserved` elements are counted as used and dead so that
    /// they are never handed out.
    pub fn on_active(&mut self, type_id: TypeId, array_size: usize, capacity: usize, reserved: usize) {
        assert_eq!(
            self.status,
            BufferStatus::Free,
            "buffer {} activated while {:?}",
            self.buffer_id,
            self.status
        );
        assert!(
            reserved <= capacity,
            "buffer {}: {reserved} reserved elements exceed capacity {capacity}",
            self.buffer_id
        );
        self.status = BufferStatus::Active;
        self.type_id = Some(type_id);
        self.array_size = array_size;
        self.capacity = capacity;
        self.reserved = reserved;
        self.used = reserved;
        self.dead = reserved;
    }

    /// Retire this buffer. Every element not already dead becomes held.
    pub fn on_hold(&mut self) {
        assert_eq!(
            self.status,
            BufferStatus::Active,
            "buffer {} put on hold while {:?}",
            self.buffer_id,
            self.status
        );
        self.check_counts();
        self.status = BufferStatus::Hold;
        self.compacting = false;
        self.hold = self.used - self.dead;
        self.free_list = Vec::new();
        self.free_list_enabled = false;
    }

    /// Release this buffer after its hold generation has passed.
    pub fn on_free(&mut self) {
        assert_eq!(
            self.status,
            BufferStatus::Hold,
            "buffer {} freed while {:?}",
            self.buffer_id,
            self.status
        );
        assert_eq!(
            self.used,
            self.dead + self.hold,
            "buffer {} freed with live elements (used {}, dead {}, hold {})",
            self.buffer_id,
            self.used,
            self.dead,
            self.hold
        );
        *self = Self::new(self.buffer_id);
    }

    /// Reset unconditionally, for store teardown.
    pub fn drop_buffer(&mut self) {
        *self = Self::new(self.buffer_id);
    }

    /// Bump-allocate `num_elems` elements.
    ///
    /// Returns the element offset, or `None` when the remaining capacity is
    /// too small and the store must switch to another buffer.
    pub fn allocate(&mut self, num_elems: usize) -> Option<usize> {
        self.require_active("allocate");
        if self.remaining() < num_elems {
            return None;
        }
        let offset = self.used;
        self.used += num_elems;
        Some(offset)
    }

    /// Record a whole dead array and push it on the free list.
    ///
    /// Returns `true` if the free list was empty before, meaning the store
    /// must register this buffer on its per-type free-list index.
    pub fn free_array(&mut self, entry_ref: EntryRef, num_elems: usize) -> bool {
        self.require_active("free_array");
        assert!(
            self.free_list_enabled,
            "buffer {} does not participate in free-list reuse",
            self.buffer_id
        );
        let was_empty = self.free_list.is_empty();
        self.free_list.push(entry_ref);
        self.inc_dead_elems(num_elems);
        was_empty
    }

    /// Pop the most recently freed array for reuse.
    ///
    /// The array's `num_elems` elements (the padded span recorded by
    /// [`free_array`](Self::free_array)) move from dead back to live.
    pub fn pop_free(&mut self, num_elems: usize) -> Option<EntryRef> {
        self.require_active("pop_free");
        let entry_ref = self.free_list.pop()?;
        self.dec_dead_elems(num_elems);
        Some(entry_ref)
    }

    /// Record that the span starting at element `offset` has been retired
    /// or freed by `op`.
    ///
    /// # Panics
    ///
    /// Panics if the span is already released and has not been handed out
    /// again since: a double hold or double free.
    pub fn mark_released(&mut self, offset: usize, op: &str) {
        let (word, bit) = (offset / 64, 1u64 << (offset % 64));
        if word >= self.released.len() {
            self.released.resize(word + 1, 0);
        }
        assert!(
            self.released[word] & bit == 0,
            "{op} of span at offset {offset} in buffer {} ({:?}) which is already held or freed",
            self.buffer_id,
            self.status
        );
        self.released[word] |= bit;
    }

    /// Record that the span at element `offset` was handed out again.
    pub fn mark_live(&mut self, offset: usize) {
        if let Some(word) = self.released.get_mut(offset / 64) {
            *word &= !(1u64 << (offset % 64));
        }
    }

    /// Whether the span at element `offset` is held or freed.
    pub fn is_released(&self, offset: usize) -> bool {
        self.released
            .get(offset / 64)
            .is_some_and(|word| word & (1u64 << (offset % 64)) != 0)
    }

    /// Count elements as held.
    pub fn inc_hold_elems(&mut self, num_elems: usize) {
        self.require_active("inc_hold_elems");
        self.hold += num_elems;
        self.check_counts();
    }

    /// Release held elements (they are counted dead separately).
    pub fn dec_hold_elems(&mut self, num_elems: usize) {
        self.require_not_free("dec_hold_elems");
        assert!(
            self.hold >= num_elems,
            "buffer {}: releasing {num_elems} held elements but only {} held",
            self.buffer_id,
            self.hold
        );
        self.hold -= num_elems;
    }

    /// Count elements as dead.
    pub fn inc_dead_elems(&mut self, num_elems: usize) {
        self.require_not_free("inc_dead_elems");
        self.dead += num_elems;
        self.check_counts();
    }

    fn dec_dead_elems(&mut self, num_elems: usize) {
        assert!(
            self.dead >= num_elems,
            "buffer {}: reviving {num_elems} dead elements but only {} dead",
            self.buffer_id,
            self.dead
        );
        self.dead -= num_elems;
    }

    /// Account bytes owned indirectly by live elements.
    pub fn inc_extra_used_bytes(&mut self, bytes: usize) {
        self.require_not_free("inc_extra_used_bytes");
        self.extra_used_bytes += bytes;
    }

    /// Drop indirect bytes of released elements.
    pub fn dec_extra_used_bytes(&mut self, bytes: usize) {
        self.require_not_free("dec_extra_used_bytes");
        self.extra_used_bytes = self.extra_used_bytes.saturating_sub(bytes);
    }

    /// Account bytes owned indirectly by held elements.
    pub fn inc_extra_hold_bytes(&mut self, bytes: usize) {
        self.require_active("inc_extra_hold_bytes");
        self.extra_hold_bytes += bytes;
    }

    /// Drop indirect bytes once their held elements are released.
    pub fn dec_extra_hold_bytes(&mut self, bytes: usize) {
        self.require_not_free("dec_extra_hold_bytes");
        self.extra_hold_bytes = self.extra_hold_bytes.saturating_sub(bytes);
    }

    /// Turn free-list participation on or off.
    ///
    /// Disabling discards pending free-list entries; returns `true` if any
    /// were discarded so the store can update its index.
    pub fn set_free_list_enabled(&mut self, enabled: bool) -> bool {
        self.require_active("set_free_list_enabled");
        self.free_list_enabled = enabled;
        if enabled || self.free_list.is_empty() {
            return false;
        }
        self.free_list.clear();
        true
    }

    /// Stop deferring frees for this buffer: held elements die immediately.
    pub fn disable_elem_hold_list(&mut self) {
        self.elem_hold_list_disabled = true;
    }

    /// Mark the buffer as selected for compaction.
    pub fn set_compacting(&mut self) {
        self.require_active("set_compacting");
        self.compacting = true;
    }

    fn require_active(&self, op: &str) {
        assert_eq!(
            self.status,
            BufferStatus::Active,
            "{op} on buffer {} which is {:?}",
            self.buffer_id,
            self.status
        );
    }

    fn require_not_free(&self, op: &str) {
        assert_ne!(
            self.status,
            BufferStatus::Free,
            "{op} on buffer {} which is Free",
            self.buffer_id
        );
    }

    fn check_counts(&self) {
        assert!(
            self.dead + self.hold <= self.used,
            "buffer {}: dead ({}) + hold ({}) exceeds used ({})",
            self.buffer_id,
            self.dead,
            self.hold,
            self.used
        );
    }

    /// The slot's buffer id.
    pub fn buffer_id(&self) -> BufferId {
        self.buffer_id
    }

    /// Lifecycle status.
    pub fn status(&self) -> BufferStatus {
        self.status
    }

    /// Whether the buffer accepts allocations.
    pub fn is_active(&self) -> bool {
        self.status == BufferStatus::Active
    }

    /// Whether the buffer is retired and draining.
    pub fn is_on_hold(&self) -> bool {
        self.status == BufferStatus::Hold
    }

    /// Whether the slot has no buffer.
    pub fn is_free(&self) -> bool {
        self.status == BufferStatus::Free
    }

    /// Registered type, if the slot holds a buffer.
    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    /// Elements per array.
    pub fn array_size(&self) -> usize {
        self.array_size
    }

    /// Reserved capacity in elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Leading elements reserved at activation.
    pub fn reserved_elems(&self) -> usize {
        self.reserved
    }

    /// Elements handed out so far, including reserved ones.
    pub fn used_elems(&self) -> usize {
        self.used
    }

    /// Elements freed and no longer observable.
    pub fn dead_elems(&self) -> usize {
        self.dead
    }

    /// Elements retired but possibly still observed by readers.
    pub fn hold_elems(&self) -> usize {
        self.hold
    }

    /// Elements neither dead nor held.
    pub fn live_elems(&self) -> usize {
        self.used - self.dead - self.hold
    }

    /// Capacity left for bump allocation.
    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    /// Indirect bytes owned by live elements.
    pub fn extra_used_bytes(&self) -> usize {
        self.extra_used_bytes
    }

    /// Indirect bytes owned by held elements.
    pub fn extra_hold_bytes(&self) -> usize {
        self.extra_hold_bytes
    }

    /// Pending reusable arrays, oldest first.
    pub fn free_list(&self) -> &[EntryRef] {
        &self.free_list
    }

    /// Whether no array is waiting for reuse.
    pub fn is_free_list_empty(&self) -> bool {
        self.free_list.is_empty()
    }

    /// Whether freed arrays are kept for reuse.
    pub fn free_list_enabled(&self) -> bool {
        self.free_list_enabled
    }

    /// Whether holds on this buffer are applied immediately.
    pub fn has_disabled_elem_hold_list(&self) -> bool {
        self.elem_hold_list_disabled
    }

    /// Whether the buffer is selected for compaction.
    pub fn is_compacting(&self) -> bool {
        self.compacting
    }
}
