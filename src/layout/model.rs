//! Block-range model of an ext2/ext3 filesystem
//!
//! A [`RangeModel`] is the validated result of parsing filesystem
//! metadata: block geometry plus the free-block ranges of every block
//! group. It carries no behaviour beyond consistency checks.

use crate::error::{Result, SnapError};
use std::collections::BTreeMap;

/// Inclusive range of block numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockRange {
    /// First block in the range
    pub start: u64,
    /// Last block in the range (inclusive)
    pub end: u64,
}

impl BlockRange {
    /// Create a new inclusive range
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// A range covering exactly one block
    pub fn single(block: u64) -> Self {
        Self::new(block, block)
    }

    /// Number of blocks in the range
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Ranges are inclusive, so a well-formed range is never empty
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Whether `other` lies entirely within this range
    pub fn contains_range(&self, other: &BlockRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// One block group and its free-block bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Group number as reported by the metadata tool
    pub index: u64,
    /// Blocks owned by this group
    pub blocks: BlockRange,
    /// Free ranges, sorted by start and non-overlapping
    pub free_ranges: Vec<BlockRange>,
}

impl Group {
    /// Create a group with no free ranges
    pub fn new(index: u64, start: u64, end: u64) -> Self {
        Self {
            index,
            blocks: BlockRange::new(start, end),
            free_ranges: Vec::new(),
        }
    }

    /// Attach free ranges
    pub fn with_free(mut self, free_ranges: Vec<BlockRange>) -> Self {
        self.free_ranges = free_ranges;
        self
    }

    /// First block of the group
    pub fn start(&self) -> u64 {
        self.blocks.start
    }

    /// Last block of the group (inclusive)
    pub fn end(&self) -> u64 {
        self.blocks.end
    }

    /// Total free blocks listed for this group
    pub fn free_block_count(&self) -> u64 {
        self.free_ranges.iter().map(BlockRange::len).sum()
    }

    /// Group has no free blocks at all
    pub fn is_fully_used(&self) -> bool {
        self.free_ranges.is_empty()
    }

    fn validate(&self) -> Result<()> {
        if self.blocks.end < self.blocks.start {
            return Err(SnapError::invalid_layout(format!(
                "group {} ends at block {} before it starts at {}",
                self.index, self.blocks.end, self.blocks.start
            )));
        }

        let mut previous: Option<BlockRange> = None;
        for range in &self.free_ranges {
            if range.end < range.start {
                return Err(SnapError::invalid_layout(format!(
                    "group {}: free range {}-{} is reversed",
                    self.index, range.start, range.end
                )));
            }
            if !self.blocks.contains_range(range) {
                return Err(SnapError::invalid_layout(format!(
                    "group {}: free range {} lies outside blocks {}",
                    self.index, range, self.blocks
                )));
            }
            if let Some(prev) = previous {
                if range.start <= prev.end {
                    return Err(SnapError::invalid_layout(format!(
                        "group {}: free range {} overlaps or precedes {}",
                        self.index, range, prev
                    )));
                }
            }
            previous = Some(*range);
        }

        Ok(())
    }
}

/// Validated filesystem layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeModel {
    /// Bytes per block
    pub block_size: u64,
    /// Blocks in the filesystem
    pub total_blocks: u64,
    /// Free blocks according to the superblock
    pub free_blocks: u64,
    /// First block owned by group 0 (1 on 1 KiB-block ext2, else 0)
    pub first_data_block: u64,
    /// Groups in ascending index order
    pub groups: Vec<Group>,
    /// Every header field, keyed by normalized label
    pub header: BTreeMap<String, String>,
}

impl RangeModel {
    /// Build a model with no header fields and validate it
    pub fn new(block_size: u64, total_blocks: u64, free_blocks: u64, groups: Vec<Group>) -> Result<Self> {
        let first_data_block = groups.first().map(Group::start).unwrap_or(0);
        let model = Self {
            block_size,
            total_blocks,
            free_blocks,
            first_data_block,
            groups,
            header: BTreeMap::new(),
        };
        model.validate()?;
        Ok(model)
    }

    /// Logical size of the filesystem and of any complete snapshot
    pub fn total_bytes(&self) -> u64 {
        self.total_blocks * self.block_size
    }

    /// Blocks in use according to the superblock
    pub fn used_blocks(&self) -> u64 {
        self.total_blocks - self.free_blocks
    }

    /// Look up a retained header field by normalized label
    pub fn header_field(&self, label: &str) -> Option<&str> {
        self.header.get(label).map(String::as_str)
    }

    /// Check every structural invariant of the layout
    ///
    /// Groups must be in ascending index order, contiguous and
    /// non-overlapping, starting at `first_data_block` and ending at the
    /// last block of the filesystem. Free ranges must be sorted and
    /// contained in their group.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(SnapError::invalid_layout("block size is zero"));
        }
        if self.total_blocks.checked_mul(self.block_size).is_none() {
            return Err(SnapError::invalid_layout(format!(
                "{} blocks of {} bytes exceed the addressable size",
                self.total_blocks, self.block_size
            )));
        }
        if self.free_blocks > self.total_blocks {
            return Err(SnapError::invalid_layout(format!(
                "free block count {} exceeds block count {}",
                self.free_blocks, self.total_blocks
            )));
        }
        if self.total_blocks == 0 {
            if self.groups.is_empty() {
                return Ok(());
            }
            return Err(SnapError::invalid_layout("groups listed for an empty filesystem"));
        }
        if self.groups.is_empty() {
            return Err(SnapError::invalid_layout("no block groups listed"));
        }
        if self.first_data_block >= self.total_blocks {
            return Err(SnapError::invalid_layout(format!(
                "first data block {} is beyond block count {}",
                self.first_data_block, self.total_blocks
            )));
        }

        let mut expected_start = self.first_data_block;
        let mut previous_index: Option<u64> = None;

        for group in &self.groups {
            group.validate()?;

            if let Some(prev) = previous_index {
                if group.index <= prev {
                    return Err(SnapError::invalid_layout(format!(
                        "group {} listed after group {}",
                        group.index, prev
                    )));
                }
            }
            if group.start() != expected_start {
                return Err(SnapError::invalid_layout(format!(
                    "group {} starts at block {}, expected {}",
                    group.index,
                    group.start(),
                    expected_start
                )));
            }

            previous_index = Some(group.index);
            expected_start = group.end().checked_add(1).ok_or_else(|| {
                SnapError::invalid_layout(format!("group {} ends past the last addressable block", group.index))
            })?;
        }

        if expected_start != self.total_blocks {
            return Err(SnapError::invalid_layout(format!(
                "groups cover blocks up to {}, filesystem has {} blocks",
                expected_start, self.total_blocks
            )));
        }

        Ok(())
    }
}
