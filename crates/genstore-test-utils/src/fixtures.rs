//! Element fixtures and store builders.

use genstore_arena::{ArenaConfig, BufferType, BufferTypeConfig, DataStore};

/// Value written into released slots by [`poison_u64`].
pub const POISON: u64 = 0xdead_beef_dead_beef;

/// Clean-hold hook that makes use-after-reclaim visible.
pub fn poison_u64(elems: &mut [u64]) {
    elems.fill(POISON);
}

/// A small multi-field record, as found in posting lists.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Posting {
    pub doc_id: u32,
    pub weight: i32,
}

impl Posting {
    pub fn new(doc_id: u32, weight: i32) -> Self {
        Self { doc_id, weight }
    }
}

/// A posting store with small buffers so tests cross buffer boundaries
/// quickly.
pub fn posting_store(min_arrays: usize, max_arrays: usize) -> DataStore<Posting> {
    DataStore::with_buffer_type(
        BufferType::new(BufferTypeConfig::new(1, min_arrays, max_arrays)),
        ArenaConfig {
            max_buffers: Some(64),
            ..ArenaConfig::default()
        },
    )
    .expect("posting store config is valid")
}
