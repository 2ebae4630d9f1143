//! A store plus generation handler plus a model of what must still be
//! observable.
//!
//! [`ReclaimHarness`] mirrors every operation in a simple model: which refs
//! are live (and their values), which are retired but possibly still
//! visible to a pinned reader, and the oldest used generation after each
//! reclaim. Every allocation asserts that the returned ref is in neither
//! set, which is exactly the "no reuse before trim" guarantee.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use genstore_arena::{ArenaConfig, BufferType, BufferTypeConfig, DataStore};
use genstore_core::{EntryRef, Generation};
use genstore_generation::{GenerationHandler, PinnedReader};

use crate::fixtures::{poison_u64, POISON};

pub struct ReclaimHarness {
    store: DataStore<u64>,
    handler: Arc<GenerationHandler>,
    /// Live refs in allocation order, with the value written.
    live: Vec<(EntryRef, u64)>,
    /// Retired refs not yet reclaimed, with their retirement generation.
    retired: HashMap<EntryRef, Generation>,
    /// Pinned readers, oldest pin first.
    readers: VecDeque<PinnedReader>,
    oldest: Generation,
    next_value: u64,
    reclaims: usize,
}

impl ReclaimHarness {
    /// A harness whose buffers hold `arrays_per_buffer` entries, so tests
    /// cross buffer boundaries quickly.
    pub fn new(arrays_per_buffer: usize) -> Self {
        let buffer_type = BufferType::new(BufferTypeConfig::new(
            1,
            arrays_per_buffer,
            arrays_per_buffer,
        ))
        .with_clean_hold(poison_u64);
        let config = ArenaConfig {
            max_buffers: Some(256),
            ..ArenaConfig::default()
        };
        Self {
            store: DataStore::with_buffer_type(buffer_type, config)
                .expect("harness store config is valid"),
            handler: GenerationHandler::new(),
            live: Vec::new(),
            retired: HashMap::new(),
            readers: VecDeque::new(),
            oldest: Generation(0),
            next_value: 1,
            reclaims: 0,
        }
    }

    /// Allocate a new entry and check it does not alias anything
    /// observable.
    pub fn add(&mut self) -> EntryRef {
        let value = self.next_value;
        self.next_value += 1;
        let entry_ref = self.store.add_entry(value);
        assert!(entry_ref.valid(), "allocation returned the invalid ref");
        assert!(
            !self.retired.contains_key(&entry_ref),
            "{entry_ref} reused while retired at {:?} with oldest used {}",
            self.retired.get(&entry_ref),
            self.oldest
        );
        assert!(
            self.live.iter().all(|(r, _)| *r != entry_ref),
            "{entry_ref} handed out twice"
        );
        self.live.push((entry_ref, value));
        entry_ref
    }

    /// Retire the live entry at `index` (modulo the live count).
    pub fn retire(&mut self, index: usize) -> Option<EntryRef> {
        if self.live.is_empty() {
            return None;
        }
        let (entry_ref, _) = self.live.swap_remove(index % self.live.len());
        self.store.hold_elem(entry_ref);
        self.retired
            .insert(entry_ref, self.handler.current_generation());
        Some(entry_ref)
    }

    /// Allocate an entry and free it at once, as an aborted insert would.
    pub fn add_and_free(&mut self) {
        let entry_ref = self.add();
        self.live.pop();
        self.store.free_elem(entry_ref);
    }

    /// Run one maintenance cycle and update the model.
    pub fn reclaim(&mut self) -> Generation {
        let oldest = self.store.reclaim(&self.handler);
        assert!(
            !oldest.is_before(self.oldest),
            "oldest used generation moved backwards: {} -> {oldest}",
            self.oldest
        );
        if let Some(reader) = self.readers.front() {
            assert!(
                !reader.generation().is_before(oldest),
                "oldest used {oldest} passed a reader pinned at {}",
                reader.generation()
            );
        }
        self.oldest = oldest;
        self.retired.retain(|_, retired_at| !retired_at.is_before(oldest));
        self.reclaims += 1;
        oldest
    }

    /// Pin a new reader at the current generation.
    pub fn pin(&mut self) -> Generation {
        let reader = self.handler.register_reader().into_pinned();
        let generation = reader.generation();
        self.readers.push_back(reader);
        generation
    }

    /// Unpin the oldest reader, if any.
    pub fn unpin_oldest(&mut self) {
        self.readers.pop_front();
    }

    /// Check every live entry and every still-visible retired entry.
    ///
    /// Retired entries that a reader may observe must keep their value;
    /// the clean-hold hook poisons slots only once they are reclaimed.
    pub fn check(&self) {
        for &(entry_ref, value) in &self.live {
            assert_eq!(*self.store.get_entry(entry_ref), value, "live entry {entry_ref}");
        }
        for entry_ref in self.retired.keys() {
            assert_ne!(
                *self.store.get_entry(*entry_ref),
                POISON,
                "retired entry {entry_ref} released while still observable"
            );
        }
        let mut live_elems = 0;
        let mut hold_elems = 0;
        for stats in self.store.base().buffers() {
            assert!(stats.dead_elems + stats.hold_elems <= stats.used_elems);
            live_elems += stats.used_elems - stats.dead_elems - stats.hold_elems;
            hold_elems += stats.hold_elems;
        }
        assert_eq!(live_elems, self.live.len(), "live element accounting");
        assert_eq!(hold_elems, self.retired.len(), "held element accounting");
    }

    pub fn store(&self) -> &DataStore<u64> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DataStore<u64> {
        &mut self.store
    }

    pub fn handler(&self) -> &Arc<GenerationHandler> {
        &self.handler
    }

    pub fn live(&self) -> &[(EntryRef, u64)] {
        &self.live
    }

    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    pub fn oldest(&self) -> Generation {
        self.oldest
    }

    pub fn reclaims(&self) -> usize {
        self.reclaims
    }
}
