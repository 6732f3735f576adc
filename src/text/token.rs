//! Tokens and source spans for the WAT tokenizer.

use std::fmt;

/// A region of source text, with the line and column of its start.
///
/// Lines and columns are 1-indexed; `start`/`end` are byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The lexical class of a token.
///
/// Numeric interpretation is deferred: a `Number` token keeps its raw
/// text and is parsed in context (an index, an `i64` constant, a hex
/// float) by the module builder. `Str` carries the decoded bytes, with
/// escape sequences already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    /// Keywords (`func`, `i32.add`) and identifiers (`$name`).
    Atom,
    /// Integer or float literal, text kept raw.
    Number,
    /// Quoted string, decoded to bytes.
    Str(Vec<u8>),
}

/// One lexical token: kind, raw source text, and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    /// The keyword text, if this is a non-identifier atom.
    pub fn keyword(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Atom if !self.text.starts_with('$') => Some(&self.text),
            _ => None,
        }
    }

    /// The identifier name without its `$` sigil, if this is one.
    pub fn id(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Atom => self.text.strip_prefix('$'),
            _ => None,
        }
    }
}
