//! Buffer type descriptors: element size, array size, and growth policy.
//!
//! Every type registered on a data store describes one logical kind of
//! buffer. The store consults it when activating a buffer (how many arrays
//! to reserve), when releasing held elements (the clean-hold hook), and
//! when checking that an allocator's element type matches the buffer.

use std::any::{self, TypeId as RustTypeId};
use std::fmt;
use std::sync::Arc;

use genstore_core::BufferId;

use crate::error::ArenaError;
use crate::storage::{BufferStorage, Element, TypedBuffer};

/// Sizing and growth policy for one buffer type.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferTypeConfig {
    /// Elements per array (the size class).
    pub array_size: usize,
    /// Minimum number of arrays reserved for a new buffer.
    pub min_arrays: usize,
    /// Maximum number of arrays in one buffer.
    pub max_arrays: usize,
    /// Preferred arrays for a new buffer once growth would exceed it.
    /// Zero disables the cap.
    pub num_arrays_for_new_buffer: usize,
    /// Fraction of the type's currently used elements to reserve when a
    /// new buffer is activated.
    pub alloc_grow_factor: f32,
}

impl BufferTypeConfig {
    /// Default growth factor for new buffers.
    pub const DEFAULT_GROW_FACTOR: f32 = 0.2;

    /// Create a policy with the default growth factor and no new-buffer cap.
    pub fn new(array_size: usize, min_arrays: usize, max_arrays: usize) -> Self {
        Self {
            array_size,
            min_arrays,
            max_arrays,
            num_arrays_for_new_buffer: 0,
            alloc_grow_factor: Self::DEFAULT_GROW_FACTOR,
        }
    }

    /// Check the policy against the number of arrays a ref layout can
    /// address in one buffer.
    pub fn validate(&self, arrays_limit: usize) -> Result<(), ArenaError> {
        let invalid = |reason: String| Err(ArenaError::InvalidConfig { reason });
        if self.array_size == 0 {
            return invalid("array_size must be >= 1".into());
        }
        if self.max_arrays == 0 {
            return invalid("max_arrays must be >= 1".into());
        }
        if self.min_arrays > self.max_arrays {
            return invalid(format!(
                "min_arrays ({}) exceeds max_arrays ({})",
                self.min_arrays, self.max_arrays
            ));
        }
        if self.max_arrays > arrays_limit {
            return invalid(format!(
                "max_arrays ({}) exceeds the {arrays_limit} arrays the ref layout can address per buffer",
                self.max_arrays
            ));
        }
        if self.num_arrays_for_new_buffer > self.max_arrays {
            return invalid(format!(
                "num_arrays_for_new_buffer ({}) exceeds max_arrays ({})",
                self.num_arrays_for_new_buffer, self.max_arrays
            ));
        }
        if !self.alloc_grow_factor.is_finite() || self.alloc_grow_factor < 0.0 {
            return invalid(format!(
                "alloc_grow_factor must be finite and >= 0 (got {})",
                self.alloc_grow_factor
            ));
        }
        Ok(())
    }

    /// Number of arrays to reserve for a newly activated buffer.
    ///
    /// `active_used_elems` is the number of elements used across the type's
    /// active buffers; the new buffer grows in proportion to it, bounded
    /// below by `min_arrays` and what the pending request needs and above by
    /// `max_arrays`.
    ///
    /// # Panics
    ///
    /// Panics if the pending request cannot fit in a single buffer.
    pub fn arrays_for_new_buffer(
        &self,
        active_used_elems: usize,
        elems_needed: usize,
        reserved_elems: usize,
    ) -> usize {
        let needed = (elems_needed + reserved_elems).div_ceil(self.array_size);
        let grow =
            (active_used_elems as f64 * f64::from(self.alloc_grow_factor)) as usize / self.array_size;
        let mut want = grow.max(self.min_arrays).max(needed);
        if self.num_arrays_for_new_buffer > 0 && want > self.num_arrays_for_new_buffer {
            want = self.num_arrays_for_new_buffer.max(needed);
        }
        let arrays = want.min(self.max_arrays);
        assert!(
            arrays >= needed,
            "allocation of {elems_needed} elements needs {needed} arrays but buffers hold at most {}",
            self.max_arrays
        );
        arrays
    }
}

/// Type-erased descriptor for one registered buffer type.
///
/// Implemented by [`BufferType`]; a custom implementation can change the
/// reserved-element or clean-hold behaviour for special element kinds.
pub trait BufferTypeHandler: Send + Sync {
    /// Sizing and growth policy.
    fn config(&self) -> &BufferTypeConfig;

    /// Elements per array.
    fn array_size(&self) -> usize {
        self.config().array_size
    }

    /// Size of one element in bytes.
    fn elem_size(&self) -> usize;

    /// Rust type id of the element type, checked by typed access.
    fn element_type(&self) -> RustTypeId;

    /// Rust type name of the element type, for diagnostics.
    fn element_type_name(&self) -> &'static str;

    /// Allocate storage for `capacity` elements.
    fn create_storage(&self, capacity: usize) -> Arc<dyn BufferStorage>;

    /// Elements at the start of the buffer that are never handed out.
    ///
    /// Buffer 0 reserves its first array so that no allocation can return
    /// the invalid reference.
    fn reserved_elements(&self, buffer_id: BufferId) -> usize {
        if buffer_id.0 == 0 {
            self.array_size()
        } else {
            0
        }
    }

    /// Reset `len` released elements starting at `offset`.
    fn clean_hold(&self, storage: &dyn BufferStorage, offset: usize, len: usize);
}

/// Buffer type for elements of type `T`.
///
/// Released elements are reset to `T::default()` unless a custom hook is
/// installed with [`BufferType::with_clean_hold`]. Poisoning hooks are
/// useful in tests to catch use-after-reclaim.
pub struct BufferType<T: Element> {
    config: BufferTypeConfig,
    clean: fn(&mut [T]),
}

impl<T: Element> BufferType<T> {
    /// Create a buffer type with the given policy.
    pub fn new(config: BufferTypeConfig) -> Self {
        Self {
            config,
            clean: reset_to_default::<T>,
        }
    }

    /// Replace the clean-hold hook run on released elements.
    pub fn with_clean_hold(mut self, clean: fn(&mut [T])) -> Self {
        self.clean = clean;
        self
    }
}

impl<T: Element> fmt::Debug for BufferType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferType")
            .field("element", &any::type_name::<T>())
            .field("config", &self.config)
            .finish()
    }
}

impl<T: Element> BufferTypeHandler for BufferType<T> {
    fn config(&self) -> &BufferTypeConfig {
        &self.config
    }

    fn elem_size(&self) -> usize {
        std::mem::size_of::<T>()
    }

    fn element_type(&self) -> RustTypeId {
        RustTypeId::of::<T>()
    }

    fn element_type_name(&self) -> &'static str {
        any::type_name::<T>()
    }

    fn create_storage(&self, capacity: usize) -> Arc<dyn BufferStorage> {
        Arc::new(TypedBuffer::<T>::new(capacity))
    }

    fn clean_hold(&self, storage: &dyn BufferStorage, offset: usize, len: usize) {
        let typed = storage
            .as_any()
            .downcast_ref::<TypedBuffer<T>>()
            .unwrap_or_else(|| {
                panic!(
                    "clean_hold: buffer does not hold elements of type {}",
                    any::type_name::<T>()
                )
            });
        (self.clean)(&mut typed.write(offset, len));
    }
}

fn reset_to_default<T: Element>(elems: &mut [T]) {
    elems.fill(T::default());
}
