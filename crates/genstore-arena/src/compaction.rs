//! Buffer selection for compaction.
//!
//! Compaction moves live entries out of fragmented buffers so the buffers
//! can be retired whole. The store only selects and retires buffers; moving
//! entries and rewriting the refs that point at them is the caller's job.

use smallvec::SmallVec;

use genstore_core::BufferId;

use crate::error::ArenaError;
use crate::stats::BufferStats;

/// Buffer ids selected for compaction. Usually only a handful.
pub type CompactionBuffers = SmallVec<[BufferId; 4]>;

/// Thresholds for choosing buffers to compact.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompactionStrategy {
    max_dead_ratio: f64,
    max_buffers: usize,
}

impl CompactionStrategy {
    /// Default dead-ratio threshold.
    pub const DEFAULT_MAX_DEAD_RATIO: f64 = 0.2;

    /// Default number of buffers compacted per round.
    pub const DEFAULT_MAX_BUFFERS: usize = 1;

    /// Buffers whose dead ratio exceeds `max_dead_ratio` are candidates; at
    /// most `max_buffers` of them are selected per round.
    pub fn new(max_dead_ratio: f64, max_buffers: usize) -> Result<Self, ArenaError> {
        if !(0.0..=1.0).contains(&max_dead_ratio) {
            return Err(ArenaError::InvalidConfig {
                reason: format!("max_dead_ratio must be in [0, 1] (got {max_dead_ratio})"),
            });
        }
        if max_buffers == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "max_buffers must be >= 1".into(),
            });
        }
        Ok(Self {
            max_dead_ratio,
            max_buffers,
        })
    }

    /// Dead-ratio threshold.
    pub fn max_dead_ratio(&self) -> f64 {
        self.max_dead_ratio
    }

    /// Maximum buffers selected per round.
    pub fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    /// Pick the worst candidates among `stats`, highest dead ratio first.
    ///
    /// Ties break on dead bytes, then on buffer id.
    pub fn select(&self, stats: impl IntoIterator<Item = BufferStats>) -> CompactionBuffers {
        let mut candidates: Vec<BufferStats> = stats
            .into_iter()
            .filter(|s| !s.compacting && s.dead_ratio() > self.max_dead_ratio)
            .collect();
        candidates.sort_by(|a, b| {
            b.dead_ratio()
                .total_cmp(&a.dead_ratio())
                .then(b.dead_bytes().cmp(&a.dead_bytes()))
                .then(a.buffer_id.cmp(&b.buffer_id))
        });
        candidates
            .into_iter()
            .take(self.max_buffers)
            .map(|s| s.buffer_id)
            .collect()
    }
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        Self {
            max_dead_ratio: Self::DEFAULT_MAX_DEAD_RATIO,
            max_buffers: Self::DEFAULT_MAX_BUFFERS,
        }
    }
}

#[cfg(test)]
mod tests {
    use genstore_core::TypeId;

    use super::*;
    use crate::buffer_state::BufferStatus;

    fn stats(id: u32, used: usize, dead: usize) -> BufferStats {
        BufferStats {
            buffer_id: BufferId(id),
            type_id: TypeId(0),
            status: BufferStatus::Active,
            capacity: 1024,
            used_elems: used,
            dead_elems: dead,
            hold_elems: 0,
            elem_size: 8,
            compacting: false,
        }
    }

    #[test]
    fn new_validates_thresholds() {
        assert!(CompactionStrategy::new(0.5, 2).is_ok());
        assert!(matches!(
            CompactionStrategy::new(1.5, 2),
            Err(ArenaError::InvalidConfig { .. })
        ));
        assert!(CompactionStrategy::new(f64::NAN, 2).is_err());
        assert!(CompactionStrategy::new(0.5, 0).is_err());
    }

    #[test]
    fn selects_worst_first_up_to_limit() {
        let strategy = CompactionStrategy::new(0.2, 2).unwrap();
        let picked = strategy.select([
            stats(1, 100, 10),
            stats(2, 100, 90),
            stats(3, 100, 50),
            stats(4, 100, 60),
        ]);
        assert_eq!(picked.as_slice(), &[BufferId(2), BufferId(4)]);
    }

    #[test]
    fn skips_buffers_at_or_below_threshold_and_compacting() {
        let strategy = CompactionStrategy::new(0.5, 4).unwrap();
        let mut busy = stats(3, 10, 9);
        busy.compacting = true;
        let picked = strategy.select([stats(1, 10, 5), stats(2, 0, 0), busy]);
        assert!(picked.is_empty());
    }

    #[test]
    fn ties_break_on_dead_bytes() {
        let strategy = CompactionStrategy::default();
        let picked = CompactionStrategy::new(0.1, 2)
            .unwrap()
            .select([stats(1, 10, 5), stats(2, 100, 50)]);
        assert_eq!(picked.as_slice(), &[BufferId(2), BufferId(1)]);
        assert_eq!(strategy.max_buffers(), 1);
    }
}
