//! Copy plan generation
//!
//! Walks every block group of a [`RangeModel`] and turns its free-range
//! list into an ordered run of copy and zero-fill operations. The output
//! is written sequentially, so the order of operations is the order of
//! bytes in the snapshot.

use crate::layout::{BlockRange, Group, RangeModel};
use std::borrow::Cow;
use tracing::trace;

/// A single step of the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOperation {
    /// Read these blocks from the source and write them verbatim
    Copy {
        /// First block
        from_block: u64,
        /// Last block (inclusive)
        to_block: u64,
    },
    /// Write zeros in place of these blocks
    Zero {
        /// First block
        from_block: u64,
        /// Last block (inclusive)
        to_block: u64,
    },
}

impl CopyOperation {
    /// Copy operation over an inclusive range
    pub fn copy(from_block: u64, to_block: u64) -> Self {
        Self::Copy { from_block, to_block }
    }

    /// Zero-fill operation over an inclusive range
    pub fn zero(from_block: u64, to_block: u64) -> Self {
        Self::Zero { from_block, to_block }
    }

    /// Blocks covered by this operation
    pub fn range(&self) -> BlockRange {
        match *self {
            Self::Copy { from_block, to_block } | Self::Zero { from_block, to_block } => {
                BlockRange::new(from_block, to_block)
            }
        }
    }

    /// Number of blocks covered
    pub fn block_count(&self) -> u64 {
        self.range().len()
    }

    /// Bytes this operation writes to the output
    pub fn byte_len(&self, block_size: u64) -> u64 {
        self.block_count() * block_size
    }

    /// Whether this operation writes zeros instead of source data
    pub fn is_zero(&self) -> bool {
        matches!(self, Self::Zero { .. })
    }

    /// Short label for log lines
    pub fn label(&self) -> &'static str {
        match self {
            Self::Copy { .. } => "copy",
            Self::Zero { .. } => "zero",
        }
    }
}

/// Ordered operations for a whole filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlan {
    /// Bytes per block
    pub block_size: u64,
    /// Operations in output order
    pub operations: Vec<CopyOperation>,
}

impl CopyPlan {
    /// Total bytes the plan writes
    pub fn total_bytes(&self) -> u64 {
        self.operations.iter().map(|op| op.byte_len(self.block_size)).sum()
    }

    /// Bytes read from the source
    pub fn copy_bytes(&self) -> u64 {
        self.operations
            .iter()
            .filter(|op| !op.is_zero())
            .map(|op| op.byte_len(self.block_size))
            .sum()
    }

    /// Bytes written as zero fill
    pub fn zero_bytes(&self) -> u64 {
        self.total_bytes() - self.copy_bytes()
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the plan writes nothing
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Print a short summary to stdout
    pub fn print_summary(&self) {
        let zero_ops = self.operations.iter().filter(|op| op.is_zero()).count();
        println!("=== Copy Plan ===");
        println!("Operations:  {} ({} copy, {} zero)", self.len(), self.len() - zero_ops, zero_ops);
        println!("Copy bytes:  {}", humansize::format_size(self.copy_bytes(), humansize::BINARY));
        println!("Zero bytes:  {}", humansize::format_size(self.zero_bytes(), humansize::BINARY));
        println!("Total:       {}", humansize::format_size(self.total_bytes(), humansize::BINARY));
    }
}

/// Turns a layout into a [`CopyPlan`]
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanGenerator;

impl PlanGenerator {
    /// Create a plan generator
    pub fn new() -> Self {
        Self
    }

    /// Plan the whole filesystem
    ///
    /// Blocks ahead of the first group (the boot block on 1 KiB-block
    /// ext2) are copied first so the output always spans every block.
    pub fn generate(&self, model: &RangeModel) -> CopyPlan {
        let mut operations = Vec::new();

        if model.total_blocks > 0 && model.first_data_block > 0 {
            operations.push(CopyOperation::copy(0, model.first_data_block - 1));
        }

        for group in &model.groups {
            let before = operations.len();
            self.plan_group_into(group, &mut operations);
            trace!(group = group.index, ops = operations.len() - before, "Planned group");
        }

        CopyPlan {
            block_size: model.block_size,
            operations,
        }
    }

    /// Plan a single group
    pub fn plan_group(&self, group: &Group) -> Vec<CopyOperation> {
        let mut operations = Vec::new();
        self.plan_group_into(group, &mut operations);
        operations
    }

    fn plan_group_into(&self, group: &Group, out: &mut Vec<CopyOperation>) {
        if group.free_ranges.is_empty() {
            out.push(CopyOperation::copy(group.start(), group.end()));
            return;
        }

        let free: Cow<'_, [BlockRange]> = if group.free_ranges.windows(2).all(|w| w[0].start <= w[1].start) {
            Cow::Borrowed(&group.free_ranges)
        } else {
            let mut sorted = group.free_ranges.clone();
            sorted.sort_unstable();
            Cow::Owned(sorted)
        };

        let mut cursor = group.start();
        for range in free.iter() {
            if cursor < range.start {
                out.push(CopyOperation::copy(cursor, range.start - 1));
            }
            out.push(CopyOperation::zero(range.start, range.end));
            cursor = range.end + 1;
        }

        if cursor <= group.end() {
            out.push(CopyOperation::copy(cursor, group.end()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn group(free: Vec<(u64, u64)>) -> Group {
        Group::new(0, 0, 99).with_free(free.into_iter().map(|(s, e)| BlockRange::new(s, e)).collect())
    }

    #[test]
    fn test_fully_used_group() {
        let ops = PlanGenerator::new().plan_group(&group(vec![]));
        assert_eq!(ops, vec![CopyOperation::copy(0, 99)]);
    }

    #[test]
    fn test_free_range_in_middle() {
        let ops = PlanGenerator::new().plan_group(&group(vec![(10, 19)]));
        assert_eq!(
            ops,
            vec![CopyOperation::copy(0, 9), CopyOperation::zero(10, 19), CopyOperation::copy(20, 99)]
        );
    }

    #[test]
    fn test_leading_free_range() {
        let ops = PlanGenerator::new().plan_group(&group(vec![(0, 9)]));
        assert_eq!(ops, vec![CopyOperation::zero(0, 9), CopyOperation::copy(10, 99)]);
    }

    #[test]
    fn test_trailing_free_range() {
        let ops = PlanGenerator::new().plan_group(&group(vec![(90, 99)]));
        assert_eq!(ops, vec![CopyOperation::copy(0, 89), CopyOperation::zero(90, 99)]);
    }

    #[test]
    fn test_adjacent_free_ranges() {
        let ops = PlanGenerator::new().plan_group(&group(vec![(10, 19), (20, 29)]));
        assert_eq!(
            ops,
            vec![
                CopyOperation::copy(0, 9),
                CopyOperation::zero(10, 19),
                CopyOperation::zero(20, 29),
                CopyOperation::copy(30, 99),
            ]
        );
    }

    #[test]
    fn test_unsorted_free_ranges() {
        let ops = PlanGenerator::new().plan_group(&group(vec![(50, 59), (10, 19)]));
        assert_eq!(ops[1], CopyOperation::zero(10, 19));
        assert_eq!(ops[3], CopyOperation::zero(50, 59));
    }

    #[test]
    fn test_whole_group_free() {
        let ops = PlanGenerator::new().plan_group(&group(vec![(0, 99)]));
        assert_eq!(ops, vec![CopyOperation::zero(0, 99)]);
    }

    #[test]
    fn test_plan_with_boot_block() {
        let model = RangeModel::new(1024, 201, 10, vec![
            Group::new(0, 1, 100).with_free(vec![BlockRange::new(50, 59)]),
            Group::new(1, 101, 200),
        ])
        .unwrap();
        let plan = PlanGenerator::new().generate(&model);

        assert_eq!(plan.operations[0], CopyOperation::copy(0, 0));
        assert_eq!(plan.total_bytes(), model.total_bytes());
        assert_eq!(plan.zero_bytes(), 10 * 1024);
        assert_eq!(plan.operations.last(), Some(&CopyOperation::copy(101, 200)));
    }

    fn arb_group() -> impl Strategy<Value = Group> {
        (0u64..1000, 1u64..500, proptest::collection::vec((0u64..500, 0u64..20), 0..12)).prop_map(
            |(start, len, raw)| {
                let end = start + len - 1;
                let mut free: Vec<BlockRange> = Vec::new();
                let mut floor = start;
                let mut points: Vec<(u64, u64)> = raw;
                points.sort_unstable();
                for (offset, extent) in points {
                    let s = (start + offset).max(floor);
                    if s > end {
                        break;
                    }
                    let e = (s + extent).min(end);
                    free.push(BlockRange::new(s, e));
                    floor = e + 1;
                    if floor > end {
                        break;
                    }
                }
                Group::new(0, start, end).with_free(free)
            },
        )
    }

    proptest! {
        #[test]
        fn prop_group_is_partitioned(g in arb_group()) {
            let ops = PlanGenerator::new().plan_group(&g);
            let mut next = g.start();
            for op in &ops {
                let r = op.range();
                prop_assert_eq!(r.start, next);
                prop_assert!(r.end >= r.start);
                next = r.end + 1;
            }
            prop_assert_eq!(next, g.end() + 1);

            let zeroed: u64 = ops.iter().filter(|o| o.is_zero()).map(|o| o.block_count()).sum();
            prop_assert_eq!(zeroed, g.free_block_count());
        }
    }
}
