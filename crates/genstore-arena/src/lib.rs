//! Generation-tracked arena data store.
//!
//! Entries live in typed buffers and are addressed by compact 32-bit
//! [`EntryRef`](genstore_core::EntryRef)s. A single writer allocates,
//! retires, and reclaims entries; readers on other threads pin a
//! generation through a
//! [`GenerationHandler`](genstore_generation::GenerationHandler) and the
//! store never reuses memory retired at a generation a reader may still
//! observe.
//!
//! # Architecture
//!
//! ```text
//! DataStore<T> (single-type convenience)
//! └── DataStoreBase<R> (arena)                 StoreReader<R> × readers
//!     ├── BufferState × num_buffers   (Free → Active → Hold → Free)
//!     ├── Arc<dyn BufferStorage> × num_buffers ◄── BufferTable (shared)
//!     │     (TypedBuffer<T>: RwLock<Vec<T>>, fixed capacity)
//!     ├── BufferTypeHandler per type  (array size, growth, clean-hold hook)
//!     ├── HoldList<ElemHold>          (retired spans, two-stage)
//!     └── HoldList<BufferHold>        (retired buffers, two-stage)
//! ```
//!
//! # Reclamation cycle
//!
//! 1. `hold_elem` retires a span into the first-stage hold list.
//! 2. `transfer_hold_lists(current)` stamps it with the current generation.
//! 3. The generation handler advances and reports the oldest generation
//!    any reader still uses.
//! 4. `trim_hold_lists(oldest)` releases everything stamped before it:
//!    whole arrays go to their buffer's free list, held buffers are freed.
//!
//! [`DataStoreBase::reclaim`] runs steps 2 to 4 in one call.
//!
//! # Concurrent readers
//!
//! [`DataStoreBase::reader`] hands out a [`StoreReader`] that reader threads
//! use while the writer keeps mutating. Each buffer's elements sit behind a
//! `parking_lot::RwLock`; readers take the read lock per access and the
//! writer takes the write lock only while it initialises, rewrites, or
//! cleans slots. The generation protocol keeps those slots disjoint from
//! anything a pinned reader can still resolve.
//!
//! # Safety
//!
//! This crate forbids `unsafe`. Buffers are `Vec`s whose capacity is
//! reserved at activation and never exceeded, so element addresses are
//! stable for the lifetime of a buffer.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod allocator;
pub mod buffer_state;
pub mod buffer_type;
pub mod compaction;
pub mod config;
pub mod datastore;
pub mod error;
pub mod hold;
pub mod raw_allocator;
pub mod reader;
pub mod stats;
pub mod storage;
pub mod store;

// Public re-exports for the primary API surface.
pub use allocator::{Allocator, DefaultReclaimer, FreeListAllocator, Handle, HandleSlice, Reclaimer};
pub use buffer_state::{BufferState, BufferStatus};
pub use buffer_type::{BufferType, BufferTypeConfig, BufferTypeHandler};
pub use compaction::{CompactionBuffers, CompactionStrategy};
pub use config::ArenaConfig;
pub use datastore::DataStoreBase;
pub use error::ArenaError;
pub use hold::{BufferHold, ElemHold, HoldList};
pub use raw_allocator::{FreeListRawAllocator, RawAllocator};
pub use reader::StoreReader;
pub use stats::{AddressSpace, BufferStats, MemStats, MemoryUsage};
pub use storage::{BufferStorage, Element, TypedBuffer};
pub use store::DataStore;
