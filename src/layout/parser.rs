//! Two-state parser for `dumpe2fs` style metadata listings
//!
//! The listing starts with `Label: value` header lines, ends the header
//! with a blank line, then lists block groups:
//!
//! ```text
//! Block count:              16384
//! Free blocks:              5000
//! Block size:               1024
//!
//! Group 0: (Blocks 1-8192)
//!   Free blocks: 3000-7999
//! Group 1: (Blocks 8193-16383)
//!   Free blocks:
//! ```
//!
//! Only the block geometry and the per-group `Free blocks` lists are
//! consumed. Any inconsistency is fatal.

use crate::error::{Result, SnapError};
use crate::layout::model::{BlockRange, Group, RangeModel};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};

/// Header label carrying the block size
pub const FIELD_BLOCK_SIZE: &str = "block_size";
/// Header label carrying the total block count
pub const FIELD_BLOCK_COUNT: &str = "block_count";
/// Header label carrying the free block count
pub const FIELD_FREE_BLOCKS: &str = "free_blocks";
/// Header label carrying the first data block
pub const FIELD_FIRST_BLOCK: &str = "first_block";

const FREE_BLOCKS_ATTR: &str = "Free blocks";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Header,
    Groups,
}

/// Incremental line parser producing a [`RangeModel`]
#[derive(Debug)]
pub struct LayoutParser {
    state: ParseState,
    line_no: usize,
    header: BTreeMap<String, String>,
    header_lines: HashMap<String, usize>,
    groups: Vec<Group>,
}

impl LayoutParser {
    /// Create a parser positioned at the start of the header
    pub fn new() -> Self {
        Self {
            state: ParseState::Header,
            line_no: 0,
            header: BTreeMap::new(),
            header_lines: HashMap::new(),
            groups: Vec::new(),
        }
    }

    /// Feed the next line of the listing
    pub fn feed_line(&mut self, line: &str) -> Result<()> {
        self.line_no += 1;
        let line = line.trim_end_matches(['\r', '\n']);

        match self.state {
            ParseState::Header => self.header_line(line),
            ParseState::Groups => self.group_line(line),
        }
    }

    fn header_line(&mut self, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            debug!(fields = self.header.len(), "Header complete at line {}", self.line_no);
            self.state = ParseState::Groups;
            return Ok(());
        }

        match line.split_once(':') {
            Some((label, value)) => {
                let key = normalize_label(label);
                self.header_lines.insert(key.clone(), self.line_no);
                self.header.insert(key, value.trim().to_string());
            }
            None => trace!("Ignoring header line without label: {:?}", line),
        }
        Ok(())
    }

    fn group_line(&mut self, line: &str) -> Result<()> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(());
        }

        if trimmed.starts_with("Group ") {
            let group = parse_group_header(trimmed).map_err(|m| SnapError::layout(self.line_no, m))?;
            trace!(index = group.index, range = %group.blocks, "Group header");
            self.groups.push(group);
            return Ok(());
        }

        let Some((name, value)) = trimmed.split_once(':') else {
            return Ok(());
        };
        if name.trim() != FREE_BLOCKS_ATTR {
            return Ok(());
        }

        let line_no = self.line_no;
        let group = self
            .groups
            .last_mut()
            .ok_or_else(|| SnapError::layout(line_no, "free block list before any group header"))?;

        for range in parse_free_list(value).map_err(|m| SnapError::layout(line_no, m))? {
            if !group.blocks.contains_range(&range) {
                return Err(SnapError::layout(
                    line_no,
                    format!("free range {} outside group {} blocks {}", range, group.index, group.blocks),
                ));
            }
            group.free_ranges.push(range);
        }
        Ok(())
    }

    /// Finish parsing and validate the collected layout
    pub fn finish(self) -> Result<RangeModel> {
        let block_size = self.required_field(FIELD_BLOCK_SIZE)?;
        let total_blocks = self.required_field(FIELD_BLOCK_COUNT)?;
        let free_blocks = self.required_field(FIELD_FREE_BLOCKS)?;

        let first_data_block = match self.header.get(FIELD_FIRST_BLOCK) {
            Some(_) => self.required_field(FIELD_FIRST_BLOCK)?,
            None => self.groups.first().map(Group::start).unwrap_or(0),
        };

        if block_size == 0 {
            return Err(SnapError::layout(self.field_line(FIELD_BLOCK_SIZE), "block size is zero"));
        }
        if total_blocks.checked_mul(block_size).is_none() {
            return Err(SnapError::layout(
                self.field_line(FIELD_BLOCK_COUNT),
                format!("block count {} at {} bytes per block overflows", total_blocks, block_size),
            ));
        }

        let mut groups = self.groups;
        for group in &mut groups {
            group.free_ranges.sort_unstable();
        }

        let model = RangeModel {
            block_size,
            total_blocks,
            free_blocks,
            first_data_block,
            groups,
            header: self.header,
        };
        model.validate()?;

        debug!(
            block_size = model.block_size,
            total_blocks = model.total_blocks,
            free_blocks = model.free_blocks,
            groups = model.groups.len(),
            "Parsed filesystem layout"
        );
        Ok(model)
    }

    fn field_line(&self, key: &str) -> usize {
        self.header_lines.get(key).copied().unwrap_or(self.line_no)
    }

    fn required_field(&self, key: &str) -> Result<u64> {
        let value = self
            .header
            .get(key)
            .ok_or_else(|| SnapError::layout(self.line_no, format!("missing header field '{}'", key)))?;
        parse_block_number(value)
            .ok_or_else(|| SnapError::layout(self.field_line(key), format!("malformed {} value {:?}", key, value)))
    }
}

impl Default for LayoutParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a complete listing into a validated [`RangeModel`]
pub fn parse_layout<I, S>(lines: I) -> Result<RangeModel>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parser = LayoutParser::new();
    for line in lines {
        parser.feed_line(line.as_ref())?;
    }
    parser.finish()
}

/// Lowercase a header label and join its words with underscores
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

fn parse_block_number(s: &str) -> Option<u64> {
    s.trim().parse().ok()
}

fn parse_range(s: &str) -> std::result::Result<BlockRange, String> {
    let s = s.trim();
    match s.split_once('-') {
        Some((a, b)) => {
            let start = parse_block_number(a).ok_or_else(|| format!("bad range start in {:?}", s))?;
            let end = parse_block_number(b).ok_or_else(|| format!("bad range end in {:?}", s))?;
            if end < start {
                return Err(format!("range {:?} ends before it starts", s));
            }
            Ok(BlockRange::new(start, end))
        }
        None => parse_block_number(s)
            .map(BlockRange::single)
            .ok_or_else(|| format!("bad block number {:?}", s)),
    }
}

/// Parse `Group <N>: (Blocks <start>-<end>) ...`
fn parse_group_header(line: &str) -> std::result::Result<Group, String> {
    let mut tokens = line.split_whitespace();
    tokens.next();

    let index = tokens
        .next()
        .map(|t| t.trim_end_matches(':'))
        .and_then(parse_block_number)
        .ok_or_else(|| format!("bad group number in {:?}", line))?;

    let mut range_token = None;
    while let Some(token) = tokens.next() {
        if token.trim_start_matches('(').eq_ignore_ascii_case("blocks") {
            range_token = tokens.next();
            break;
        }
    }

    let token = range_token.ok_or_else(|| format!("group {} has no block range", index))?;
    let range = parse_range(token.trim_end_matches([')', ',']))
        .map_err(|m| format!("group {}: {}", index, m))?;

    Ok(Group::new(index, range.start, range.end))
}

/// Parse a comma-separated list of `start-end` or single-block entries
fn parse_free_list(value: &str) -> std::result::Result<Vec<BlockRange>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_range)
        .collect()
}
