//! The single error type the compiler surface returns.

use thiserror::Error;

use crate::build::BuildError;
use crate::instruction::EncodeError;
use crate::symbols::SymbolError;
use crate::text::lexer::LexError;
use crate::text::sexpr::ParseError;

/// Any failure on the way from text to binary.
///
/// Each stage keeps its own error type; this wraps them so callers
/// handle one. Lex, parse, and build errors carry a source position.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Symbol(#[from] SymbolError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}
