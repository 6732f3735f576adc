//! Text-format front end: source text to S-expression trees.

pub mod cursor;
pub mod lexer;
pub mod sexpr;
pub mod token;

pub use lexer::{tokenize, LexError};
pub use sexpr::{read, ParseError, SExpr};
pub use token::{Span, Token, TokenKind};
