mod item;
mod node;
mod parser;
mod stack;
mod syntax;
mod table;
mod tree;

pub mod info;

pub use info::{
    IndentType, InfoErrors, InfoIndent, InfoInternal, InfoLeaf, InfoNode, SrcPos, TokenColor,
};
pub use node::{SyntaxChild, SyntaxNode, SyntaxToken};
pub use parser::{Parser, ParserStats};
pub use syntax::{
    ParentReq, ProdId, ProductionSpec, RepType, RuleId, RuleKind, SpecialProd, Syntax, TermId,
    Token, TokenKind,
};
