//! Proptest strategies for random store workloads.

use proptest::prelude::*;

use crate::harness::ReclaimHarness;

/// One step of a randomized workload.
#[derive(Clone, Debug)]
pub enum Op {
    Add,
    Retire(usize),
    AddAndFree,
    Reclaim,
    Pin,
    Unpin,
}

/// Weighted random operations; adds dominate so the store grows across
/// several buffers.
pub fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => Just(Op::Add),
        3 => any::<usize>().prop_map(Op::Retire),
        1 => Just(Op::AddAndFree),
        2 => Just(Op::Reclaim),
        1 => Just(Op::Pin),
        1 => Just(Op::Unpin),
    ]
}

/// A sequence of up to `max_len` operations.
pub fn op_sequence(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op_strategy(), 1..max_len)
}

impl Op {
    /// Apply this operation to a harness.
    pub fn apply(&self, harness: &mut ReclaimHarness) {
        match *self {
            Op::Add => {
                let _ = harness.add();
            }
            Op::Retire(index) => {
                harness.retire(index);
            }
            Op::AddAndFree => harness.add_and_free(),
            Op::Reclaim => {
                harness.reclaim();
            }
            Op::Pin => {
                harness.pin();
            }
            Op::Unpin => harness.unpin_oldest(),
        }
    }
}
