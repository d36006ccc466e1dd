//! Block stack and block-matching over flat action lists.
//!
//! Conditionals and loops are encoded as marker actions, so the interpreter needs two
//! things: a LIFO stack of currently-open blocks, and forward scans that find the marker
//! closing (or continuing) a block. Scans count only markers of the block's own kind, so a
//! loop nested inside a conditional (or the reverse) never shifts the nesting counter.
//! `ELIF` and `ELSE` are siblings of their `IF_BEGIN`, never blocks of their own.

use std::fmt;

use serde::{Deserialize, Serialize};
use stepwise_types::{Action, ActionKind};

use crate::errors::EngineError;

/// Kind of an open control block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Conditional,
    Loop,
}

impl BlockKind {
    /// Begin and end marker kinds for this block kind.
    pub fn markers(self) -> (ActionKind, ActionKind) {
        match self {
            Self::Conditional => (ActionKind::BlockIfBegin, ActionKind::BlockIfEnd),
            Self::Loop => (ActionKind::BlockWhileBegin, ActionKind::BlockWhileEnd),
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conditional => f.write_str("conditional"),
            Self::Loop => f.write_str("loop"),
        }
    }
}

/// One currently-open control block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockInfo {
    pub kind: BlockKind,
    /// Index of the `IF_BEGIN` / `WHILE_BEGIN` marker.
    pub start_index: usize,
    /// Index of the matching end marker, once resolved.
    pub end_index: Option<usize>,
    /// Raw condition text; substituted each time it is evaluated.
    pub condition: Option<String>,
    /// Whether the most recently evaluated condition of this block was true.
    pub condition_met: bool,
    /// Conditional chains: whether some branch has already run.
    pub has_executed: bool,
    /// Conditional chains: whether the `ELSE` branch marker has been reached.
    pub else_seen: bool,
    /// Loops: number of times the body has been entered.
    pub iteration_count: u64,
}

impl BlockInfo {
    fn new(kind: BlockKind, start_index: usize, condition: Option<String>) -> Self {
        Self {
            kind,
            start_index,
            end_index: None,
            condition,
            condition_met: false,
            has_executed: false,
            else_seen: false,
            iteration_count: 0,
        }
    }
}

/// LIFO stack of open blocks, innermost last.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockStack {
    blocks: Vec<BlockInfo>,
}

impl BlockStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new innermost block and returns it for further initialization.
    pub fn push(&mut self, kind: BlockKind, start_index: usize, condition: Option<String>) -> &mut BlockInfo {
        self.blocks.push(BlockInfo::new(kind, start_index, condition));
        let last = self.blocks.len() - 1;
        &mut self.blocks[last]
    }

    /// Closes the innermost block. `index` is the action that attempted the pop and is
    /// only used for the error report.
    pub fn pop(&mut self, index: usize) -> Result<BlockInfo, EngineError> {
        self.blocks
            .pop()
            .ok_or_else(|| EngineError::unbalanced(index, "block end without an open block"))
    }

    pub fn current(&self) -> Option<&BlockInfo> {
        self.blocks.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut BlockInfo> {
        self.blocks.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockInfo> {
        self.blocks.iter()
    }

    /// Position (0 = outermost) of the innermost open loop.
    pub fn innermost_loop_depth(&self) -> Option<usize> {
        self.blocks.iter().rposition(|block| block.kind == BlockKind::Loop)
    }

    /// Removes every block above `position`, leaving the block at `position` innermost.
    pub fn truncate_above(&mut self, position: usize) {
        self.blocks.truncate(position + 1);
    }
}

/// Finds the end marker closing the block of `kind` that `start_index` belongs to.
///
/// `start_index` is normally the block's begin marker, but any index inside the block at
/// the same nesting level (such as an `ELIF`) works: the scan starts just after it with a
/// nesting counter of one, counts only `kind`'s own begin/end markers, and returns the
/// index where the counter drops back to zero.
pub fn find_block_end(actions: &[Action], start_index: usize, kind: BlockKind) -> Result<usize, EngineError> {
    let (begin, end) = kind.markers();
    let mut depth = 1usize;
    for (index, action) in actions.iter().enumerate().skip(start_index + 1) {
        if action.kind == begin {
            depth += 1;
        } else if action.kind == end {
            depth -= 1;
            if depth == 0 {
                return Ok(index);
            }
        }
    }
    Err(EngineError::UnterminatedBlock { kind, start_index })
}

/// Finds the next `ELIF`, `ELSE`, or `IF_END` belonging to the same conditional chain as
/// the marker at `from_index`.
pub fn find_next_branch(actions: &[Action], from_index: usize, chain_start: usize) -> Result<usize, EngineError> {
    let mut nested = 0usize;
    for (index, action) in actions.iter().enumerate().skip(from_index + 1) {
        match action.kind {
            ActionKind::BlockIfBegin => nested += 1,
            ActionKind::BlockIfEnd if nested > 0 => nested -= 1,
            ActionKind::BlockIfEnd => return Ok(index),
            ActionKind::BlockElif | ActionKind::BlockElse if nested == 0 => return Ok(index),
            _ => {}
        }
    }
    Err(EngineError::UnterminatedBlock {
        kind: BlockKind::Conditional,
        start_index: chain_start,
    })
}
