use super::info::SrcPos;
use super::syntax::{ProdId, RuleId};

/// Generic concrete syntax tree produced from the accepted forest root.
/// Interpreting it as a typed AST is the consumer's concern; this shape only
/// records which production matched where, and the terminal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxNode {
    pub rule: RuleId,
    pub production: ProdId,
    pub pos: SrcPos,
    pub children: Vec<SyntaxChild>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxChild {
    Node(SyntaxNode),
    Token(SyntaxToken),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxToken {
    pub text: String,
    pub pos: SrcPos,
}

impl SyntaxNode {
    /// Child subtrees, skipping terminal tokens.
    pub fn nodes(&self) -> impl Iterator<Item = &SyntaxNode> {
        self.children.iter().filter_map(|c| match c {
            SyntaxChild::Node(n) => Some(n),
            SyntaxChild::Token(_) => None,
        })
    }

    /// Child tokens, skipping subtrees.
    pub fn tokens(&self) -> impl Iterator<Item = &SyntaxToken> {
        self.children.iter().filter_map(|c| match c {
            SyntaxChild::Token(t) => Some(t),
            SyntaxChild::Node(_) => None,
        })
    }
}
