//! Typed allocators over a [`DataStoreBase`].
//!
//! An allocator borrows the store mutably for its lifetime and serves one
//! registered type. [`Allocator`] only bump allocates. [`FreeListAllocator`]
//! first reuses arrays released by a trim (or by `free_elem`), most
//! recently freed first, and falls back to bump allocation.

use std::marker::PhantomData;

use genstore_core::{EntryRef, RefType, TypeId};
use parking_lot::MappedRwLockWriteGuard;

use crate::datastore::DataStoreBase;
use crate::storage::Element;

/// A freshly allocated single element.
///
/// `data` write-locks the element's buffer; drop the handle before
/// publishing `entry_ref` to readers.
#[derive(Debug)]
pub struct Handle<'a, T> {
    /// Ref to the element.
    pub entry_ref: EntryRef,
    /// The element, already holding the allocated value.
    pub data: MappedRwLockWriteGuard<'a, T>,
}

/// A freshly allocated array or span.
#[derive(Debug)]
pub struct HandleSlice<'a, T> {
    /// Ref to the first element.
    pub entry_ref: EntryRef,
    /// The elements.
    pub data: MappedRwLockWriteGuard<'a, [T]>,
}

impl<'a, T> HandleSlice<'a, T> {
    /// Narrow to the first element after storing `value` in it.
    fn into_single(self, value: T) -> Handle<'a, T> {
        let Self { entry_ref, mut data } = self;
        data[0] = value;
        Handle {
            entry_ref,
            data: MappedRwLockWriteGuard::map(data, |elems| &mut elems[0]),
        }
    }
}

/// Hook run on a reused slot before the new value is written.
pub trait Reclaimer<T> {
    /// Prepare reused elements for their next owner.
    fn reclaim(elems: &mut [T]);
}

/// Leaves reused slots as the clean-hold hook left them.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultReclaimer;

impl<T> Reclaimer<T> for DefaultReclaimer {
    fn reclaim(_elems: &mut [T]) {}
}

/// Bump allocator for elements of type `T`.
pub struct Allocator<'a, T: Element, R: RefType> {
    store: &'a mut DataStoreBase<R>,
    type_id: TypeId,
    array_size: usize,
    _elem: PhantomData<T>,
}

impl<'a, T: Element, R: RefType> Allocator<'a, T, R> {
    /// # Panics
    ///
    /// Panics if `type_id` does not hold `T` elements.
    pub(crate) fn new(store: &'a mut DataStoreBase<R>, type_id: TypeId) -> Self {
        store.check_element_type::<T>(type_id);
        let array_size = store.array_size(type_id);
        Self {
            store,
            type_id,
            array_size,
            _elem: PhantomData,
        }
    }

    /// Allocate one element holding `value`.
    ///
    /// # Panics
    ///
    /// Panics unless the type's array size is 1.
    pub fn alloc(&mut self, value: T) -> Handle<'_, T> {
        assert_eq!(
            self.array_size, 1,
            "alloc of a single element in type {} with array size {}",
            self.type_id, self.array_size
        );
        self.bump(1).into_single(value)
    }

    /// Allocate one array holding a copy of `values`.
    ///
    /// # Panics
    ///
    /// Panics unless `values` is exactly one array long.
    pub fn alloc_array(&mut self, values: &[T]) -> HandleSlice<'_, T> {
        self.check_array_len(values.len());
        let mut handle = self.bump(values.len());
        handle.data.clone_from_slice(values);
        handle
    }

    /// Allocate one array of default elements.
    pub fn alloc_array_default(&mut self) -> HandleSlice<'_, T> {
        self.bump(self.array_size)
    }

    fn check_array_len(&self, len: usize) {
        assert_eq!(
            len, self.array_size,
            "alloc_array of {len} elements in type {} with array size {}",
            self.type_id, self.array_size
        );
    }

    fn bump(&mut self, num_elems: usize) -> HandleSlice<'_, T> {
        let (entry_ref, offset) = self.store.bump_alloc(self.type_id, num_elems);
        let buffer_id = R::from(entry_ref).buffer_id();
        HandleSlice {
            entry_ref,
            data: self.store.elems_mut::<T>(buffer_id, offset, num_elems),
        }
    }
}

/// Allocator that reuses freed arrays before bump allocating.
///
/// Reused slots pass through `Rc` before the new value is written.
pub struct FreeListAllocator<'a, T: Element, R: RefType, Rc: Reclaimer<T> = DefaultReclaimer> {
    inner: Allocator<'a, T, R>,
    _reclaimer: PhantomData<Rc>,
}

impl<'a, T: Element, R: RefType, Rc: Reclaimer<T>> FreeListAllocator<'a, T, R, Rc> {
    pub(crate) fn new(store: &'a mut DataStoreBase<R>, type_id: TypeId) -> Self {
        Self {
            inner: Allocator::new(store, type_id),
            _reclaimer: PhantomData,
        }
    }

    /// Allocate one element holding `value`, reusing a freed slot if any.
    pub fn alloc(&mut self, value: T) -> Handle<'_, T> {
        match self.pop_free() {
            Some(slot) => self.reuse(slot).into_single(value),
            None => self.inner.alloc(value),
        }
    }

    /// Allocate one array holding a copy of `values`.
    pub fn alloc_array(&mut self, values: &[T]) -> HandleSlice<'_, T> {
        self.inner.check_array_len(values.len());
        match self.pop_free() {
            Some(slot) => {
                let mut handle = self.reuse(slot);
                handle.data.clone_from_slice(values);
                handle
            }
            None => self.inner.alloc_array(values),
        }
    }

    /// Allocate one array of default elements.
    pub fn alloc_array_default(&mut self) -> HandleSlice<'_, T> {
        match self.pop_free() {
            Some(slot) => {
                let mut handle = self.reuse(slot);
                handle.data.fill(T::default());
                handle
            }
            None => self.inner.alloc_array_default(),
        }
    }

    fn pop_free(&mut self) -> Option<(EntryRef, usize)> {
        self.inner.store.pop_free(self.inner.type_id)
    }

    fn reuse(&mut self, (entry_ref, offset): (EntryRef, usize)) -> HandleSlice<'_, T> {
        let buffer_id = R::from(entry_ref).buffer_id();
        let mut data = self
            .inner
            .store
            .elems_mut::<T>(buffer_id, offset, self.inner.array_size);
        Rc::reclaim(&mut data);
        HandleSlice { entry_ref, data }
    }
}

#[cfg(test)]
mod tests {
    use genstore_core::{EntryRefT, Generation};

    use super::*;
    use crate::buffer_type::{BufferType, BufferTypeConfig};
    use crate::config::ArenaConfig;

    type Store = DataStoreBase<EntryRefT<22>>;

    fn store(array_size: usize) -> (Store, TypeId) {
        let mut store = Store::new(ArenaConfig::default()).unwrap();
        let type_id = store
            .add_type(Box::new(BufferType::<u64>::new(BufferTypeConfig::new(
                array_size, 8, 1024,
            ))))
            .unwrap();
        store.init_primary_buffers();
        (store, type_id)
    }

    struct Zeroing;

    impl Reclaimer<u64> for Zeroing {
        fn reclaim(elems: &mut [u64]) {
            assert!(elems.iter().all(|&e| e == 0xdead), "reused slot was not poisoned");
            elems.fill(0);
        }
    }

    #[test]
    fn alloc_writes_value_and_returns_distinct_refs() {
        let (mut store, type_id) = store(1);
        let mut alloc = store.allocator::<u64>(type_id);
        let a = alloc.alloc(1).entry_ref;
        let b = alloc.alloc(2).entry_ref;
        assert_ne!(a, b);
        assert_eq!(*store.entry::<u64>(a), 1);
        assert_eq!(*store.entry::<u64>(b), 2);
    }

    #[test]
    fn handle_data_is_the_stored_slot() {
        let (mut store, type_id) = store(1);
        let r = {
            let mut alloc = store.allocator::<u64>(type_id);
            let mut handle = alloc.alloc(1);
            *handle.data = 42;
            handle.entry_ref
        };
        assert_eq!(*store.entry::<u64>(r), 42);
    }

    #[test]
    fn alloc_array_default_yields_defaults() {
        let (mut store, type_id) = store(4);
        let r = store.allocator::<u64>(type_id).alloc_array_default().entry_ref;
        assert_eq!(&*store.array::<u64>(r, 4), &[0, 0, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "with array size 4")]
    fn alloc_single_in_array_type_panics() {
        let (mut store, type_id) = store(4);
        store.allocator::<u64>(type_id).alloc(1);
    }

    #[test]
    #[should_panic(expected = "alloc_array of 3 elements")]
    fn alloc_array_wrong_len_panics() {
        let (mut store, type_id) = store(4);
        store.allocator::<u64>(type_id).alloc_array(&[1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "holds u64 elements, not u32")]
    fn allocator_for_wrong_element_type_panics() {
        let (mut store, type_id) = store(1);
        store.allocator::<u32>(type_id);
    }

    #[test]
    fn free_list_reuse_is_lifo() {
        let (mut store, type_id) = store(1);
        let refs: Vec<EntryRef> = {
            let mut alloc = store.free_list_allocator::<u64>(type_id);
            (0..3).map(|v| alloc.alloc(v).entry_ref).collect()
        };
        store.free_elem(refs[0], 1);
        store.free_elem(refs[2], 1);
        let mut alloc = store.free_list_allocator::<u64>(type_id);
        assert_eq!(alloc.alloc(10).entry_ref, refs[2]);
        assert_eq!(alloc.alloc(11).entry_ref, refs[0]);
        let fresh = alloc.alloc(12).entry_ref;
        assert!(!refs.contains(&fresh));
    }

    #[test]
    fn free_list_array_reuse_overwrites_values() {
        let (mut store, type_id) = store(2);
        let r = store
            .free_list_allocator::<u64>(type_id)
            .alloc_array(&[1, 2])
            .entry_ref;
        store.hold_elem(r, 2, 0);
        store.transfer_hold_lists(Generation(0));
        store.trim_hold_lists(Generation(1));

        let mut alloc = store.free_list_allocator::<u64>(type_id);
        assert_eq!(alloc.alloc_array(&[3, 4]).entry_ref, r);
        assert_eq!(&*store.array::<u64>(r, 2), &[3, 4]);
    }

    #[test]
    fn reclaimer_sees_poisoned_slot_before_write() {
        let mut store = Store::new(ArenaConfig::default()).unwrap();
        let type_id = store
            .add_type(Box::new(
                BufferType::<u64>::new(BufferTypeConfig::new(1, 8, 1024))
                    .with_clean_hold(|elems| elems.fill(0xdead)),
            ))
            .unwrap();
        store.init_primary_buffers();
        let r = store.free_list_allocator::<u64>(type_id).alloc(5).entry_ref;
        store.free_elem(r, 1);
        assert_eq!(*store.entry::<u64>(r), 0xdead);

        let mut alloc = store.free_list_allocator_with::<u64, Zeroing>(type_id);
        let handle = alloc.alloc(6);
        assert_eq!(handle.entry_ref, r);
        assert_eq!(*handle.data, 6);
    }
}
