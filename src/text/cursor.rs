//! Character cursor over WAT source text.
//!
//! Tracks byte offset, line, and column so every token and error can
//! carry an accurate source position. Columns count characters, not
//! bytes.

use super::token::Span;

/// A saved position in the source, marking the start of a token.
#[derive(Debug, Clone, Copy)]
pub struct Position {
    /// Byte offset from the start of the source.
    pub offset: usize,
    /// 1-indexed line number.
    pub line: u32,
    /// 1-indexed column number.
    pub column: u32,
}

impl Position {
    /// A span from this position up to (but not including) `end`.
    pub fn span_to(self, end: Position) -> Span {
        Span::new(self.offset, end.offset, self.line, self.column)
    }

    /// A zero-length span at this position.
    pub fn span_here(self) -> Span {
        Span::new(self.offset, self.offset, self.line, self.column)
    }
}

/// Forward-only cursor over source characters.
pub struct Cursor<'a> {
    source: &'a str,
    rest: &'a str,
    offset: usize,
    line: u32,
    column: u32,
}

impl<'a> Cursor<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            rest: source,
            offset: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn position(&self) -> Position {
        Position {
            offset: self.offset,
            line: self.line,
            column: self.column,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.rest.is_empty()
    }

    /// The next character, without consuming it.
    pub fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    /// The character after the next one.
    pub fn peek_next(&self) -> Option<char> {
        let mut chars = self.rest.chars();
        chars.next();
        chars.next()
    }

    /// Consumes and returns the next character, updating line/column.
    pub fn advance(&mut self) -> Option<char> {
        let c = self.rest.chars().next()?;
        let len = c.len_utf8();
        self.rest = &self.rest[len..];
        self.offset += len;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consumes the next character if it equals `expected`.
    pub fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consumes characters while `predicate` holds.
    pub fn skip_while(&mut self, predicate: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if !predicate(c) {
                break;
            }
            self.advance();
        }
    }

    /// The source text from `start` up to the current position.
    pub fn slice_from(&self, start: Position) -> &'a str {
        &self.source[start.offset..self.offset]
    }
}
