//! genstore: a generation-tracked arena data store.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all genstore sub-crates. For most users, adding `genstore` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use genstore::prelude::*;
//!
//! let handler = GenerationHandler::new();
//! let mut store = DataStore::<u64>::new();
//!
//! let first = store.add_entry(1);
//! let second = store.add_entry(2);
//! assert_eq!(*store.get_entry(second), 2);
//!
//! // A reader pins the current generation before looking at `first`,
//! // reading through a view that can move to another thread.
//! let mut reader = handler.register_reader();
//! let view = store.reader();
//! let guard = reader.pin();
//!
//! // The writer retires `first`. The pinned reader keeps its slot alive.
//! store.hold_elem(first);
//! store.reclaim(&handler);
//! assert_eq!(view.entry::<u64>(first), 1);
//! assert_ne!(store.add_entry(3), first);
//!
//! // Once the reader unpins, the next reclaim releases the slot for reuse.
//! drop(guard);
//! store.reclaim(&handler);
//! assert_eq!(store.add_entry(4), first);
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the
//! prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `genstore-core` | `EntryRef`, ref layouts, ids, generations |
//! | [`generation`] | `genstore-generation` | Generation handler and reader pins |
//! | [`arena`] | `genstore-arena` | Buffers, hold lists, allocators, stats, compaction |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Entry refs, ref layouts, and ids (`genstore-core`).
///
/// [`types::EntryRef`] is the 32-bit handle; [`types::EntryRefT`] and
/// [`types::AlignedEntryRefT`] decide how it splits into buffer id and
/// offset.
pub use genstore_core as types;

/// Generation tracking (`genstore-generation`).
///
/// The writer owns a [`generation::GenerationHandler`]; readers pin
/// generations through [`generation::ReaderHandle`]s.
pub use genstore_generation as generation;

/// The arena data store (`genstore-arena`).
///
/// [`arena::DataStoreBase`] is the multi-type arena;
/// [`arena::DataStore`] wraps it for a single element type.
pub use genstore_arena as arena;

/// Common imports for typical genstore usage.
///
/// ```rust
/// use genstore::prelude::*;
/// ```
///
/// This imports the stores, buffer type configuration, allocator handles,
/// the generation handler, and the core ref and id types.
pub mod prelude {
    // Core types
    pub use genstore_core::{
        AlignedEntryRefT, BufferId, EntryRef, EntryRefT, Generation, RefType, TypeId,
    };

    // Generation tracking
    pub use genstore_generation::{GenerationGuard, GenerationHandler, PinnedReader, ReaderHandle};

    // Stores and buffer types
    pub use genstore_arena::{
        ArenaConfig, ArenaError, BufferType, BufferTypeConfig, DataStore, DataStoreBase,
        StoreReader,
    };

    // Allocation
    pub use genstore_arena::{Handle, HandleSlice};

    // Stats and compaction
    pub use genstore_arena::{CompactionStrategy, MemStats, MemoryUsage};
}
