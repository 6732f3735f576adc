//! Tokenizer for the WebAssembly text format.
//!
//! Grammar summary:
//!
//! ```text
//! token   ::= '(' | ')' | atom | number | string
//! atom    ::= idchar+                    (keywords, '$'-prefixed ids)
//! number  ::= [+-]? digit idchar*        (raw text, parsed later)
//! string  ::= '"' (char | escape)* '"'
//! escape  ::= '\t' '\n' '\r' '\"' '\'' '\\' | '\' hex hex | '\u{' hex+ '}'
//! space   ::= ' ' '\t' '\r' '\n'
//! comment ::= ';;' … eol | '(;' … ';)'   (block comments nest)
//! ```
//!
//! Tokens must be separated: a string or word followed directly by a
//! non-separator character is malformed.

use super::cursor::{Cursor, Position};
use super::token::{Span, Token, TokenKind};
use thiserror::Error;

/// A tokenization failure, positioned at the offending input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} at {span}")]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl LexError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Tokenizes an entire WAT document, failing on the first bad input.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

struct Lexer<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        self.skip_trivia()?;
        if self.cursor.is_eof() {
            return Ok(None);
        }

        let start = self.cursor.position();
        let c = match self.cursor.peek() {
            Some(c) => c,
            None => return Ok(None),
        };

        let token = match c {
            '(' => {
                self.cursor.advance();
                self.token(TokenKind::LeftParen, start)
            }
            ')' => {
                self.cursor.advance();
                self.token(TokenKind::RightParen, start)
            }
            '"' => self.lex_string(start)?,
            c if is_idchar(c) => self.lex_word(start)?,
            c => {
                return Err(LexError::new(
                    format!("unexpected character '{c}'"),
                    start.span_here(),
                ))
            }
        };
        Ok(Some(token))
    }

    fn token(&self, kind: TokenKind, start: Position) -> Token {
        Token {
            kind,
            text: self.cursor.slice_from(start).to_string(),
            span: start.span_to(self.cursor.position()),
        }
    }

    /// Skips whitespace, `;;` line comments, and nesting `(;` block
    /// comments.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.cursor.peek() {
                Some(c) if is_space(c) => {
                    self.cursor.advance();
                }
                Some(';') if self.cursor.peek_next() == Some(';') => {
                    self.cursor.skip_while(|c| c != '\n');
                }
                Some('(') if self.cursor.peek_next() == Some(';') => {
                    self.skip_block_comment()?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        let start = self.cursor.position();
        self.cursor.advance(); // '('
        self.cursor.advance(); // ';'
        let mut depth = 1usize;
        while depth > 0 {
            match self.cursor.peek() {
                Some('(') if self.cursor.peek_next() == Some(';') => {
                    self.cursor.advance();
                    self.cursor.advance();
                    depth += 1;
                }
                Some(';') if self.cursor.peek_next() == Some(')') => {
                    self.cursor.advance();
                    self.cursor.advance();
                    depth -= 1;
                }
                Some(_) => {
                    self.cursor.advance();
                }
                None => {
                    return Err(LexError::new(
                        "unterminated block comment",
                        start.span_here(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn lex_string(&mut self, start: Position) -> Result<Token, LexError> {
        self.cursor.advance(); // opening '"'
        let mut bytes = Vec::new();
        loop {
            let char_pos = self.cursor.position();
            match self.cursor.advance() {
                None => {
                    return Err(LexError::new("unterminated string", start.span_here()));
                }
                Some('"') => break,
                Some('\\') => self.lex_escape(&mut bytes, char_pos)?,
                Some(c) => {
                    let mut utf8 = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
                }
            }
        }
        self.check_boundary()?;
        Ok(self.token(TokenKind::Str(bytes), start))
    }

    fn lex_escape(&mut self, bytes: &mut Vec<u8>, pos: Position) -> Result<(), LexError> {
        let c = self.cursor.advance().ok_or_else(|| {
            LexError::new("unterminated string", pos.span_here())
        })?;
        match c {
            't' => bytes.push(b'\t'),
            'n' => bytes.push(b'\n'),
            'r' => bytes.push(b'\r'),
            '"' => bytes.push(b'"'),
            '\'' => bytes.push(b'\''),
            '\\' => bytes.push(b'\\'),
            'u' => {
                if !self.cursor.eat('{') {
                    return Err(LexError::new(
                        "expected '{' after \\u",
                        pos.span_here(),
                    ));
                }
                let digit_start = self.cursor.position();
                self.cursor.skip_while(|c| c.is_ascii_hexdigit());
                let digits = self.cursor.slice_from(digit_start);
                if digits.is_empty() || !self.cursor.eat('}') {
                    return Err(LexError::new("malformed \\u escape", pos.span_here()));
                }
                let scalar = u32::from_str_radix(digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| {
                        LexError::new("invalid unicode escape", pos.span_here())
                    })?;
                let mut utf8 = [0u8; 4];
                bytes.extend_from_slice(scalar.encode_utf8(&mut utf8).as_bytes());
            }
            c if c.is_ascii_hexdigit() => {
                let second = self.cursor.advance().filter(|c| c.is_ascii_hexdigit());
                match second {
                    Some(s) => {
                        let hi = c.to_digit(16).unwrap() as u8;
                        let lo = s.to_digit(16).unwrap() as u8;
                        bytes.push(hi << 4 | lo);
                    }
                    None => {
                        return Err(LexError::new(
                            "hex escape needs two digits",
                            pos.span_here(),
                        ));
                    }
                }
            }
            c => {
                return Err(LexError::new(
                    format!("unknown escape '\\{c}'"),
                    pos.span_here(),
                ));
            }
        }
        Ok(())
    }

    fn lex_word(&mut self, start: Position) -> Result<Token, LexError> {
        self.cursor.skip_while(is_idchar);
        self.check_boundary()?;
        let text = self.cursor.slice_from(start);

        let mut chars = text.chars();
        let first = chars.next().unwrap_or(' ');
        let kind = match first {
            '$' => {
                if text.len() == 1 {
                    return Err(LexError::new("empty identifier", start.span_here()));
                }
                TokenKind::Atom
            }
            c if c.is_ascii_digit() => TokenKind::Number,
            '+' | '-' if chars.next().is_some_and(|c| c.is_ascii_digit()) => TokenKind::Number,
            _ => TokenKind::Atom,
        };
        Ok(self.token(kind, start))
    }

    /// A token must be followed by a separator. Catches forms like
    /// `"a"b` that would otherwise silently fuse.
    fn check_boundary(&self) -> Result<(), LexError> {
        match self.cursor.peek() {
            None => Ok(()),
            Some(c) if is_space(c) || matches!(c, '(' | ')' | ';' | '"') => Ok(()),
            Some(c) => Err(LexError::new(
                format!("unexpected character '{c}' after token"),
                self.cursor.position().span_here(),
            )),
        }
    }
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Characters permitted in atoms and numbers, per the text format's
/// `idchar` set.
fn is_idchar(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '.'
                | '/'
                | ':'
                | '<'
                | '='
                | '>'
                | '?'
                | '@'
                | '\\'
                | '^'
                | '_'
                | '`'
                | '|'
                | '~'
        )
}
