//! Generation counter and per-reader pin slots.
//!
//! Provides [`GenerationHandler`] (global monotonic generation plus the
//! registry of readers) and [`ReaderHandle`] (one reader's pin slot, padded
//! to a cache line). The writer calls
//! [`GenerationHandler::update_oldest_used_generation`] once per
//! maintenance cycle and feeds the result to the data store's trim.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use genstore_core::Generation;
use parking_lot::Mutex;

/// Sentinel value meaning "this reader is not pinned to any generation."
const UNPINNED: u64 = u64::MAX;

/// Per-reader pin state, padded to avoid false sharing.
///
/// The writer scans every slot when computing the oldest used generation;
/// without padding, adjacent readers' pin stores would invalidate each
/// other's cache lines.
#[repr(align(128))]
#[derive(Debug)]
pub struct ReaderSlot {
    /// Generation this reader is pinned to, or `UNPINNED`.
    pinned: AtomicU64,
    /// Monotonic timestamp (nanos) of the last pin.
    pin_start_ns: AtomicU64,
    /// Reader index, for diagnostics.
    reader_id: u32,
}

// Compile-time assertion: ReaderSlot must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<ReaderSlot>();
    assert::<GenerationHandler>();
};

impl ReaderSlot {
    fn new(reader_id: u32) -> Self {
        Self {
            pinned: AtomicU64::new(UNPINNED),
            pin_start_ns: AtomicU64::new(monotonic_nanos()),
            reader_id,
        }
    }

    /// The generation this reader is pinned to, if any.
    pub fn pinned_generation(&self) -> Option<Generation> {
        match self.pinned.load(Ordering::SeqCst) {
            UNPINNED => None,
            g => Some(Generation(g)),
        }
    }

    /// Reader index assigned at registration.
    pub fn reader_id(&self) -> u32 {
        self.reader_id
    }
}

/// Global generation counter and reader registry.
///
/// Shared between the single writer and all readers via `Arc`. The writer
/// owns [`inc_generation`](Self::inc_generation) and
/// [`update_oldest_used_generation`](Self::update_oldest_used_generation);
/// readers only ever pin and unpin their own slot.
///
/// `u64::MAX` is reserved as the unpinned sentinel, so the counter must not
/// reach it while readers are pinned (at one generation per microsecond
/// that is over half a million years).
#[derive(Debug)]
pub struct GenerationHandler {
    current: AtomicU64,
    oldest_used: AtomicU64,
    readers: Mutex<Vec<Arc<ReaderSlot>>>,
    next_reader_id: AtomicU32,
}

impl GenerationHandler {
    /// Create a handler starting at generation 0.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: AtomicU64::new(0),
            oldest_used: AtomicU64::new(0),
            readers: Mutex::new(Vec::new()),
            next_reader_id: AtomicU32::new(0),
        })
    }

    /// The generation the writer is currently building.
    pub fn current_generation(&self) -> Generation {
        Generation(self.current.load(Ordering::SeqCst))
    }

    /// Advance the generation. Writer only.
    ///
    /// Returns the new generation.
    pub fn inc_generation(&self) -> Generation {
        let next = self.current.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        tracing::trace!(generation = next, "generation advanced");
        Generation(next)
    }

    /// Register a new reader slot.
    ///
    /// The slot is removed from the registry when the returned handle is
    /// dropped.
    pub fn register_reader(self: &Arc<Self>) -> ReaderHandle {
        let reader_id = self.next_reader_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(ReaderSlot::new(reader_id));
        self.readers.lock().push(Arc::clone(&slot));
        ReaderHandle {
            handler: Arc::clone(self),
            slot,
        }
    }

    /// Number of registered readers.
    pub fn reader_count(&self) -> usize {
        self.readers.lock().len()
    }

    /// Recompute the oldest generation any reader may still observe.
    ///
    /// Returns the current generation when no reader is pinned. The result
    /// never moves backwards. The value is cached and also available through
    /// [`oldest_used_generation`](Self::oldest_used_generation).
    pub fn update_oldest_used_generation(&self) -> Generation {
        let current = self.current_generation();
        let pinned = {
            let readers = self.readers.lock();
            min_pinned_generation(&readers).unwrap_or(current)
        };
        // A reader that lost the race in `pin()` may briefly publish a stale
        // generation before retrying; it never reads under that pin.
        let previous = self.oldest_used_generation();
        let oldest = if pinned.is_before(previous) { previous } else { pinned };
        self.oldest_used.store(oldest.0, Ordering::SeqCst);
        oldest
    }

    /// The value computed by the last
    /// [`update_oldest_used_generation`](Self::update_oldest_used_generation).
    pub fn oldest_used_generation(&self) -> Generation {
        Generation(self.oldest_used.load(Ordering::SeqCst))
    }

    /// Number of readers currently pinned to exactly `generation`.
    pub fn generation_ref_count(&self, generation: Generation) -> usize {
        self.readers
            .lock()
            .iter()
            .filter(|slot| slot.pinned_generation() == Some(generation))
            .count()
    }

    /// Readers that have been pinned for longer than `threshold`.
    ///
    /// A stalled reader holds back reclamation for every generation after
    /// the one it pinned.
    pub fn stalled_readers(&self, threshold: Duration) -> Vec<u32> {
        let now = monotonic_nanos();
        let threshold_ns = threshold.as_nanos() as u64;
        self.readers
            .lock()
            .iter()
            .filter(|slot| slot.pinned_generation().is_some())
            .filter(|slot| {
                now.saturating_sub(slot.pin_start_ns.load(Ordering::Acquire)) > threshold_ns
            })
            .map(|slot| slot.reader_id)
            .collect()
    }

    fn unregister(&self, slot: &Arc<ReaderSlot>) {
        self.readers.lock().retain(|s| !Arc::ptr_eq(s, slot));
    }
}

/// One reader's registration with a [`GenerationHandler`].
///
/// Cheap to keep around for the lifetime of a reader thread. Pinning goes
/// through [`pin`](Self::pin), which takes `&mut self` so a reader cannot
/// nest pins on the same slot.
#[derive(Debug)]
pub struct ReaderHandle {
    handler: Arc<GenerationHandler>,
    slot: Arc<ReaderSlot>,
}

impl ReaderHandle {
    /// Pin this reader to the current generation.
    ///
    /// The pin is published before the generation is re-checked, so a
    /// writer that advanced concurrently either sees this pin or causes a
    /// retry at the newer generation.
    pub fn pin(&mut self) -> GenerationGuard<'_> {
        let generation = self.pin_slot();
        GenerationGuard {
            slot: &self.slot,
            generation,
        }
    }

    /// Pin this reader and keep the pin alive in an owned value.
    ///
    /// For readers whose pin must live in a struct rather than a scope.
    /// [`PinnedReader::unpin`] hands the registration back.
    pub fn into_pinned(self) -> PinnedReader {
        let generation = self.pin_slot();
        PinnedReader {
            handle: Some(self),
            generation,
        }
    }

    fn pin_slot(&self) -> Generation {
        self.slot.pin_start_ns.store(monotonic_nanos(), Ordering::Release);
        loop {
            let observed = self.handler.current.load(Ordering::SeqCst);
            self.slot.pinned.store(observed, Ordering::SeqCst);
            if self.handler.current.load(Ordering::SeqCst) == observed {
                return Generation(observed);
            }
        }
    }

    /// Reader index assigned at registration.
    pub fn reader_id(&self) -> u32 {
        self.slot.reader_id
    }

    /// Whether this reader currently holds a pin.
    pub fn is_pinned(&self) -> bool {
        self.slot.pinned_generation().is_some()
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.handler.unregister(&self.slot);
    }
}

/// RAII pin on a generation. Dropping the guard unpins the reader.
#[derive(Debug)]
#[must_use = "dropping the guard immediately unpins the reader"]
pub struct GenerationGuard<'a> {
    slot: &'a ReaderSlot,
    generation: Generation,
}

impl GenerationGuard<'_> {
    /// The generation this guard pins.
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.slot.pinned.store(UNPINNED, Ordering::SeqCst);
    }
}

/// A registered reader holding a pin it owns.
///
/// Dropping it unpins and unregisters the reader.
#[derive(Debug)]
pub struct PinnedReader {
    handle: Option<ReaderHandle>,
    generation: Generation,
}

impl PinnedReader {
    /// The pinned generation.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Release the pin and return the registration.
    pub fn unpin(mut self) -> ReaderHandle {
        let handle = self
            .handle
            .take()
            .expect("pinned reader holds its handle until unpinned");
        handle.slot.pinned.store(UNPINNED, Ordering::SeqCst);
        handle
    }
}

impl Drop for PinnedReader {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.slot.pinned.store(UNPINNED, Ordering::SeqCst);
        }
    }
}

/// Compute the oldest pinned generation across reader slots.
///
/// Returns `None` if no reader is pinned.
pub fn min_pinned_generation(slots: &[Arc<ReaderSlot>]) -> Option<Generation> {
    slots
        .iter()
        .filter_map(|slot| slot.pinned_generation())
        .reduce(|oldest, g| if g.is_before(oldest) { g } else { oldest })
}

/// Returns monotonic nanoseconds since an arbitrary process-local epoch.
///
/// Only for relative duration comparisons (stall detection).
fn monotonic_nanos() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    Instant::now().duration_since(*epoch).as_nanos() as u64
}
