//! Benchmark profiles and utilities for the genstore arena data store.
//!
//! Provides seeded workload profiles shared by the benchmarks:
//!
//! - [`WorkloadProfile::churn`]: steady add/retire traffic with a bounded
//!   live set, the shape of a posting-list updater
//! - [`WorkloadProfile::bulk_load`]: append-only fill followed by a single
//!   mass retire
//! - [`run_workload`]: drives a [`DataStore`] through a profile and
//!   reclaims every `reclaim_every` operations

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use genstore_arena::DataStore;
use genstore_core::EntryRef;
use genstore_generation::GenerationHandler;
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Shape of a benchmark workload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorkloadProfile {
    /// Total operations issued.
    pub ops: usize,
    /// Entries added before the timed loop starts.
    pub initial_live: usize,
    /// Probability that an operation retires an entry instead of adding.
    pub retire_ratio: f64,
    /// Operations between reclaim calls. Zero disables reclaim.
    pub reclaim_every: usize,
    /// RNG seed for operation selection.
    pub seed: u64,
}

impl WorkloadProfile {
    /// Balanced add/retire traffic over 10K live entries.
    pub fn churn(seed: u64) -> Self {
        Self {
            ops: 100_000,
            initial_live: 10_000,
            retire_ratio: 0.5,
            reclaim_every: 64,
            seed,
        }
    }

    /// 100K appends, no retires until the end.
    pub fn bulk_load(seed: u64) -> Self {
        Self {
            ops: 100_000,
            initial_live: 0,
            retire_ratio: 0.0,
            reclaim_every: 0,
            seed,
        }
    }
}

/// Counters reported by [`run_workload`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkloadReport {
    /// Entries added.
    pub added: usize,
    /// Entries retired.
    pub retired: usize,
    /// Reclaim calls issued.
    pub reclaims: usize,
    /// Entries live at the end.
    pub live: usize,
}

/// Drive `store` through `profile`, retiring uniformly random live entries.
pub fn run_workload(
    store: &mut DataStore<u64>,
    handler: &GenerationHandler,
    profile: &WorkloadProfile,
) -> WorkloadReport {
    let mut rng = ChaCha8Rng::seed_from_u64(profile.seed);
    let mut live: Vec<EntryRef> = (0..profile.initial_live as u64)
        .map(|v| store.add_entry(v))
        .collect();
    let mut report = WorkloadReport::default();
    let threshold = (profile.retire_ratio * u32::MAX as f64) as u32;

    for op in 0..profile.ops {
        if !live.is_empty() && rng.next_u32() < threshold {
            let idx = (rng.next_u64() % live.len() as u64) as usize;
            store.hold_elem(live.swap_remove(idx));
            report.retired += 1;
        } else {
            live.push(store.add_entry(op as u64));
            report.added += 1;
        }
        if profile.reclaim_every > 0 && (op + 1) % profile.reclaim_every == 0 {
            store.reclaim(handler);
            report.reclaims += 1;
        }
    }
    report.live = live.len();
    report
}

/// Shuffle `refs` deterministically from `seed`.
pub fn shuffled(mut refs: Vec<EntryRef>, seed: u64) -> Vec<EntryRef> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for i in (1..refs.len()).rev() {
        let j = (rng.next_u64() % (i as u64 + 1)) as usize;
        refs.swap(i, j);
    }
    refs
}
