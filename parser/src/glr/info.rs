use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use super::syntax::{ProdId, RuleId};

/// Accumulated parse-quality penalty: the number of shifts that were forced
/// or skipped, and the number of source characters covered by recovered
/// regions. A clean parse is exactly zero. The failure value is absorbing
/// and compares greater than everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoErrors {
    shifts: u32,
    chars: u32,
}

impl InfoErrors {
    pub fn success() -> Self {
        InfoErrors { shifts: 0, chars: 0 }
    }

    pub fn failure() -> Self {
        InfoErrors {
            shifts: u32::MAX,
            chars: u32::MAX,
        }
    }

    pub fn shifts(count: u32) -> Self {
        InfoErrors {
            shifts: count,
            chars: 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.shifts == u32::MAX
    }

    pub fn any(&self) -> bool {
        self.shifts != 0 || self.chars != 0
    }

    pub fn shift_count(&self) -> u32 {
        self.shifts
    }

    pub fn char_count(&self) -> u32 {
        self.chars
    }

    /// Replace the character tally. Used when a reduction accounts for a
    /// recovered span as a whole, so characters already counted by inner
    /// nodes are not counted twice.
    pub fn set_chars(&mut self, chars: u32) {
        if !self.is_failure() {
            self.chars = chars;
        }
    }
}

impl Add for InfoErrors {
    type Output = InfoErrors;

    fn add(self, rhs: InfoErrors) -> InfoErrors {
        if self.is_failure() || rhs.is_failure() {
            return InfoErrors::failure();
        }
        InfoErrors {
            shifts: self.shifts.saturating_add(rhs.shifts),
            chars: self.chars.saturating_add(rhs.chars),
        }
    }
}

impl AddAssign for InfoErrors {
    fn add_assign(&mut self, rhs: InfoErrors) {
        *self = *self + rhs;
    }
}

impl PartialOrd for InfoErrors {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InfoErrors {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.shifts, self.chars).cmp(&(other.shifts, other.chars))
    }
}

impl fmt::Display for InfoErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_failure() {
            write!(f, "failure")
        } else {
            write!(f, "{} shifts, {} chars", self.shifts, self.chars)
        }
    }
}

/// Token classification for syntax highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenColor {
    Comment,
    Delimiter,
    String,
    Literal,
    Keyword,
    FnName,
    VarName,
    TypeName,
    SymbolName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndentType {
    Increase,
    Decrease,
}

/// Indentation hint on an interior info node: children in `start..end` are
/// indented relative to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoIndent {
    pub start: usize,
    pub end: usize,
    pub kind: IndentType,
}

/// A position in some named source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcPos {
    pub file: String,
    pub start: usize,
    pub end: usize,
}

impl fmt::Display for SrcPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() {
            write!(f, "{}-{}", self.start, self.end)
        } else {
            write!(f, "{}:{}-{}", self.file, self.start, self.end)
        }
    }
}

/// Token-preserving tree for editor use: every token of every matched
/// production is present, including skipped and whitespace regions, so the
/// concatenation of the leaves reproduces the covered input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoNode {
    Internal(InfoInternal),
    Leaf(InfoLeaf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoInternal {
    pub production: ProdId,
    pub rule: RuleId,
    pub children: Vec<InfoNode>,
    pub indent: Option<InfoIndent>,
    /// Set when this node's stored error tally cannot be explained by its
    /// children, i.e. the errors happened here.
    pub error: bool,
    /// Set when the token this node matched is a delimiter in its parent
    /// production.
    pub delimiter: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoLeaf {
    pub text: String,
    pub color: Option<TokenColor>,
    pub delimiter: bool,
}

impl InfoNode {
    /// Total number of source characters below this node.
    pub fn length(&self) -> usize {
        match self {
            InfoNode::Leaf(l) => l.text.chars().count(),
            InfoNode::Internal(i) => i.children.iter().map(|c| c.length()).sum(),
        }
    }

    /// Concatenated leaf text.
    pub fn format(&self) -> String {
        match self {
            InfoNode::Leaf(l) => l.text.clone(),
            InfoNode::Internal(i) => i.children.iter().map(|c| c.format()).collect(),
        }
    }

    pub fn has_error(&self) -> bool {
        match self {
            InfoNode::Leaf(_) => false,
            InfoNode::Internal(i) => i.error || i.children.iter().any(|c| c.has_error()),
        }
    }
}
