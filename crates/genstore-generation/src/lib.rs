//! Generation tracking for deferred memory reclamation.
//!
//! The writer advances a global [`Generation`](genstore_core::Generation)
//! each time it publishes a batch of structural changes. Readers pin the
//! generation they started at for as long as they hold references into
//! the store. The oldest pinned generation tells the data store which held
//! memory can no longer be observed and is safe to reuse.
//!
//! Pinning is lock-free; only reader registration takes a short lock.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod handler;

pub use handler::{
    min_pinned_generation, GenerationGuard, GenerationHandler, PinnedReader, ReaderHandle,
    ReaderSlot,
};
