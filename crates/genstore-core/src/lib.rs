//! Core types for the genstore generation-tracked data store.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the compact [`EntryRef`] handle, the [`RefType`] bit layouts that
//! pack a buffer id and offset into it, and the strongly-typed ids
//! shared by the arena and the generation handler.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod entry_ref;
pub mod id;

pub use entry_ref::{AlignedEntryRefT, EntryRef, EntryRefT, RefType};
pub use id::{BufferId, Generation, TypeId};
