//! A compiler from the WebAssembly text format to the binary format.
//!
//! The pipeline runs in four stages: [`text::lexer::tokenize`] turns
//! source into tokens, [`text::sexpr::read`] shapes them into
//! S-expressions, [`build::build`] walks the `(module …)` form into a
//! typed [`module::Module`], and [`emit::emit`] serializes that to
//! bytes. [`compile`] wires the stages together:
//!
//! ```
//! let wasm = watc::compile(
//!     r#"(module
//!          (func (export "add") (param i32 i32) (result i32)
//!            (i32.add (local.get 0) (local.get 1))))"#,
//! )
//! .unwrap();
//! assert_eq!(&wasm[0..4], b"\0asm");
//! ```
//!
//! Output is deterministic: a given source always produces identical
//! bytes, with sections in id order and empty sections omitted.
//!
//! Names (`$f`, `$loop`) may be used before they are declared; module
//! fields resolve them during building, instruction operands during
//! encoding. The MVP instruction set is supported, including the
//! pre-standard mnemonics (`get_local`, `i32.wrap/i64`, …) older
//! toolchains emit. Type checking and validation are out of scope;
//! feed the output to a validating runtime.

pub mod build;
pub mod emit;
pub mod encoding;
pub mod error;
pub mod instruction;
pub mod module;
pub mod opcodes;
pub mod symbols;
pub mod text;

pub use crate::build::BuildError;
pub use crate::error::CompileError;
pub use crate::instruction::EncodeError;
pub use crate::module::Module;
pub use crate::symbols::SymbolError;
pub use crate::text::lexer::LexError;
pub use crate::text::sexpr::ParseError;

/// Compiles WebAssembly text into a binary module.
pub fn compile(source: &str) -> Result<Vec<u8>, CompileError> {
    let tokens = text::lexer::tokenize(source)?;
    let forms = text::sexpr::read(tokens)?;
    let module = build::build(&forms)?;
    emit::emit(&module)
}
