//! Memory and address-space statistics.
//!
//! Snapshots are computed on demand from the buffer states; nothing here is
//! updated on the allocation path.

use genstore_core::{BufferId, TypeId};

use crate::buffer_state::BufferStatus;

/// Byte-level memory usage of a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes reserved by buffer storage.
    pub allocated_bytes: usize,
    /// Bytes handed out, plus indirect bytes owned by live elements.
    pub used_bytes: usize,
    /// Bytes of dead elements.
    pub dead_bytes: usize,
    /// Bytes of held elements, plus indirect bytes they own.
    pub allocated_bytes_on_hold: usize,
}

impl MemoryUsage {
    /// Account reserved bytes.
    pub fn inc_allocated_bytes(&mut self, bytes: usize) {
        self.allocated_bytes += bytes;
    }

    /// Account used bytes.
    pub fn inc_used_bytes(&mut self, bytes: usize) {
        self.used_bytes += bytes;
    }

    /// Account dead bytes.
    pub fn inc_dead_bytes(&mut self, bytes: usize) {
        self.dead_bytes += bytes;
    }

    /// Account held bytes.
    pub fn inc_allocated_bytes_on_hold(&mut self, bytes: usize) {
        self.allocated_bytes_on_hold += bytes;
    }

    /// Add another usage into this one.
    pub fn merge(&mut self, other: &MemoryUsage) {
        self.allocated_bytes += other.allocated_bytes;
        self.used_bytes += other.used_bytes;
        self.dead_bytes += other.dead_bytes;
        self.allocated_bytes_on_hold += other.allocated_bytes_on_hold;
    }
}

/// Address-space consumption in offset units of the ref layout.
///
/// A held buffer counts as fully used and fully dead until it is freed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddressSpace {
    /// Units handed out.
    pub used: usize,
    /// Units no longer reachable.
    pub dead: usize,
    /// Units the layout can address across all buffer slots.
    pub limit: usize,
}

impl AddressSpace {
    /// Fraction of the limit in use, excluding dead units.
    pub fn usage(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        (self.used - self.dead) as f64 / self.limit as f64
    }
}

/// Element and buffer totals across all buffer slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemStats {
    /// Reserved capacity in elements.
    pub alloc_elems: usize,
    /// Elements handed out.
    pub used_elems: usize,
    /// Dead elements.
    pub dead_elems: usize,
    /// Held elements.
    pub hold_elems: usize,
    /// Reserved capacity in bytes.
    pub alloc_bytes: usize,
    /// Used bytes.
    pub used_bytes: usize,
    /// Dead bytes.
    pub dead_bytes: usize,
    /// Held bytes.
    pub hold_bytes: usize,
    /// Slots with no buffer.
    pub free_buffers: u32,
    /// Buffers accepting allocations.
    pub active_buffers: u32,
    /// Buffers waiting to be freed.
    pub hold_buffers: u32,
}

/// Snapshot of one non-free buffer, for compaction planning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferStats {
    /// Buffer id.
    pub buffer_id: BufferId,
    /// Registered type.
    pub type_id: TypeId,
    /// Lifecycle status.
    pub status: BufferStatus,
    /// Reserved capacity in elements.
    pub capacity: usize,
    /// Elements handed out, excluding reserved ones.
    pub used_elems: usize,
    /// Dead elements, excluding reserved ones.
    pub dead_elems: usize,
    /// Held elements.
    pub hold_elems: usize,
    /// Size of one element in bytes.
    pub elem_size: usize,
    /// Whether the buffer is selected for compaction.
    pub compacting: bool,
}

impl BufferStats {
    /// Dead elements as a fraction of used elements (0 when unused).
    pub fn dead_ratio(&self) -> f64 {
        if self.used_elems == 0 {
            return 0.0;
        }
        self.dead_elems as f64 / self.used_elems as f64
    }

    /// Dead bytes.
    pub fn dead_bytes(&self) -> usize {
        self.dead_elems * self.elem_size
    }
}
