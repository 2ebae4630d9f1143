//! Two-stage hold lists for deferred reclamation.
//!
//! Retirements land in the first stage during a generation. At the
//! generation boundary [`HoldList::transfer`] stamps them with the
//! generation they were retired in and appends them to the second stage,
//! which therefore stays ordered by non-decreasing generation. Trimming
//! pops the prefix whose generation every reader has moved past.

use std::collections::VecDeque;

use genstore_core::{BufferId, EntryRef, Generation};

/// An element span retired by `hold_elem`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElemHold {
    /// First element of the span.
    pub entry_ref: EntryRef,
    /// Number of elements in the span.
    pub num_elems: usize,
    /// Indirect bytes released together with the span.
    pub extra_bytes: usize,
}

/// A whole buffer retired by `hold_buffer`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferHold {
    /// The retired buffer.
    pub buffer_id: BufferId,
}

/// Two-stage list of retired items.
#[derive(Clone, Debug)]
pub struct HoldList<E> {
    /// Retired during the current generation, not yet stamped.
    stage1: Vec<E>,
    /// Stamped with their retirement generation, oldest first.
    stage2: VecDeque<(E, Generation)>,
}

impl<E> HoldList<E> {
    /// Create an empty hold list with room for `capacity` pending items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stage1: Vec::with_capacity(capacity),
            stage2: VecDeque::new(),
        }
    }

    /// Retire an item during the current generation.
    pub fn push(&mut self, item: E) {
        self.stage1.push(item);
    }

    /// Stamp all pending items with `generation` and move them to the
    /// second stage.
    pub fn transfer(&mut self, generation: Generation) {
        debug_assert!(
            self.stage2
                .back()
                .is_none_or(|(_, last)| !generation.is_before(*last)),
            "hold list transfer at {generation} precedes an earlier transfer"
        );
        self.stage2
            .extend(self.stage1.drain(..).map(|item| (item, generation)));
    }

    /// Remove and return every item retired strictly before `oldest_used`.
    ///
    /// Returns an empty batch without touching the list when the oldest
    /// entry is still in use.
    pub fn take_before(&mut self, oldest_used: Generation) -> Vec<E> {
        let count = self
            .stage2
            .iter()
            .take_while(|(_, generation)| generation.is_before(oldest_used))
            .count();
        self.stage2.drain(..count).map(|(item, _)| item).collect()
    }

    /// Remove and return every stamped item regardless of generation.
    pub fn take_all(&mut self) -> Vec<E> {
        self.stage2.drain(..).map(|(item, _)| item).collect()
    }

    /// Remove and return every unstamped item.
    pub fn take_pending(&mut self) -> Vec<E> {
        std::mem::take(&mut self.stage1)
    }

    /// Items retired in the current generation.
    pub fn pending(&self) -> &[E] {
        &self.stage1
    }

    /// Number of unstamped items.
    pub fn stage1_len(&self) -> usize {
        self.stage1.len()
    }

    /// Number of stamped items awaiting trim.
    pub fn stage2_len(&self) -> usize {
        self.stage2.len()
    }

    /// Whether both stages are empty.
    pub fn is_empty(&self) -> bool {
        self.stage1.is_empty() && self.stage2.is_empty()
    }

    /// Generation of the oldest stamped item.
    pub fn oldest_generation(&self) -> Option<Generation> {
        self.stage2.front().map(|(_, generation)| *generation)
    }
}

impl<E> Default for HoldList<E> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_stays_in_stage1_until_transfer() {
        let mut list = HoldList::default();
        list.push(1u32);
        list.push(2);
        assert_eq!(list.stage1_len(), 2);
        assert_eq!(list.stage2_len(), 0);
        assert!(list.take_before(Generation(100)).is_empty());

        list.transfer(Generation(3));
        assert_eq!(list.stage1_len(), 0);
        assert_eq!(list.stage2_len(), 2);
        assert_eq!(list.oldest_generation(), Some(Generation(3)));
    }

    #[test]
    fn take_before_is_strict() {
        let mut list = HoldList::default();
        list.push('a');
        list.transfer(Generation(5));
        assert!(list.take_before(Generation(5)).is_empty());
        assert_eq!(list.take_before(Generation(6)), vec!['a']);
        assert!(list.is_empty());
    }

    #[test]
    fn take_before_pops_only_the_prefix() {
        let mut list = HoldList::default();
        list.push(1);
        list.transfer(Generation(1));
        list.push(2);
        list.push(3);
        list.transfer(Generation(2));
        list.push(4);
        list.transfer(Generation(4));

        assert_eq!(list.take_before(Generation(3)), vec![1, 2, 3]);
        assert_eq!(list.stage2_len(), 1);
        // Idempotent at the same bound.
        assert!(list.take_before(Generation(3)).is_empty());
        assert_eq!(list.take_before(Generation(5)), vec![4]);
    }

    #[test]
    fn take_all_ignores_generation_but_keeps_stage1() {
        let mut list = HoldList::default();
        list.push(1);
        list.transfer(Generation(9));
        list.push(2);
        assert_eq!(list.take_all(), vec![1]);
        assert_eq!(list.pending(), &[2]);
        assert_eq!(list.take_pending(), vec![2]);
        assert!(list.is_empty());
    }

    #[test]
    fn ordering_survives_generation_wraparound() {
        let mut list = HoldList::default();
        list.push(1);
        list.transfer(Generation(u64::MAX));
        list.push(2);
        list.transfer(Generation(0));
        assert_eq!(list.take_before(Generation(0)), vec![1]);
        assert_eq!(list.take_before(Generation(1)), vec![2]);
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn take_before_returns_exactly_the_older_prefix(
                steps in proptest::collection::vec(0u64..4, 1..30),
                bound in 0u64..120,
            ) {
                let mut list = HoldList::default();
                let mut generation = 0u64;
                let mut stamped = Vec::new();
                for (item, step) in steps.iter().enumerate() {
                    generation += step;
                    list.push(item);
                    list.transfer(Generation(generation));
                    stamped.push((item, generation));
                }
                let expected: Vec<usize> = stamped
                    .iter()
                    .filter(|(_, g)| *g < bound)
                    .map(|(item, _)| *item)
                    .collect();
                prop_assert_eq!(list.take_before(Generation(bound)), expected.clone());
                prop_assert_eq!(list.stage2_len(), stamped.len() - expected.len());
                prop_assert!(list.take_before(Generation(bound)).is_empty());
            }
        }
    }
}
