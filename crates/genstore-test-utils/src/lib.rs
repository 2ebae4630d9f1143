//! Test utilities for genstore development.
//!
//! Provides element fixtures ([`Posting`], poisoning clean-hold hooks), a
//! [`ReclaimHarness`] that drives a store and a generation handler while
//! checking that no ref is reused before its retirement generation has
//! been passed, and proptest strategies for random operation sequences.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;
pub mod harness;
pub mod strategies;

pub use fixtures::{poison_u64, posting_store, Posting, POISON};
pub use harness::ReclaimHarness;
pub use strategies::{op_sequence, op_strategy, Op};
