//! Allocators for spans of caller-chosen length.
//!
//! Raw spans are padded to the ref layout's offset unit so that every span
//! starts on an addressable offset. Only spans of exactly one array can be
//! recycled through the free lists.

use std::marker::PhantomData;

use genstore_core::{RefType, TypeId};

use crate::allocator::HandleSlice;
use crate::datastore::DataStoreBase;
use crate::storage::Element;

/// Bump allocator for spans of any length.
pub struct RawAllocator<'a, T: Element, R: RefType> {
    store: &'a mut DataStoreBase<R>,
    type_id: TypeId,
    _elem: PhantomData<T>,
}

impl<'a, T: Element, R: RefType> RawAllocator<'a, T, R> {
    pub(crate) fn new(store: &'a mut DataStoreBase<R>, type_id: TypeId) -> Self {
        store.check_element_type::<T>(type_id);
        Self {
            store,
            type_id,
            _elem: PhantomData,
        }
    }

    /// Allocate `num_elems` default elements.
    ///
    /// # Panics
    ///
    /// Panics if `num_elems` is zero or larger than one buffer can hold.
    pub fn alloc(&mut self, num_elems: usize) -> HandleSlice<'_, T> {
        assert!(num_elems > 0, "raw alloc of zero elements in type {}", self.type_id);
        let (entry_ref, offset) = self.store.bump_alloc(self.type_id, num_elems);
        let buffer_id = R::from(entry_ref).buffer_id();
        HandleSlice {
            entry_ref,
            data: self.store.elems_mut::<T>(buffer_id, offset, num_elems),
        }
    }
}

/// Raw allocator that reuses a freed array when asked for exactly one.
pub struct FreeListRawAllocator<'a, T: Element, R: RefType> {
    inner: RawAllocator<'a, T, R>,
    array_size: usize,
}

impl<'a, T: Element, R: RefType> FreeListRawAllocator<'a, T, R> {
    pub(crate) fn new(store: &'a mut DataStoreBase<R>, type_id: TypeId) -> Self {
        let array_size = store.array_size(type_id);
        Self {
            inner: RawAllocator::new(store, type_id),
            array_size,
        }
    }

    /// Allocate `num_elems` elements, reusing a freed span when `num_elems`
    /// equals the type's array size.
    ///
    /// Reused spans hold whatever the clean-hold hook left in them.
    pub fn alloc(&mut self, num_elems: usize) -> HandleSlice<'_, T> {
        let reused = if num_elems == self.array_size {
            self.inner.store.pop_free(self.inner.type_id)
        } else {
            None
        };
        match reused {
            Some((entry_ref, offset)) => {
                let buffer_id = R::from(entry_ref).buffer_id();
                HandleSlice {
                    entry_ref,
                    data: self.inner.store.elems_mut::<T>(buffer_id, offset, num_elems),
                }
            }
            None => self.inner.alloc(num_elems),
        }
    }
}
