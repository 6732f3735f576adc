//! Instructions and their binary encoding.
//!
//! An instruction is either `Plain` (a mnemonic plus immediates,
//! encoded through the opcode table) or one of the structured control
//! forms, which carry nested instruction sequences and encode
//! recursively with an explicit `end`.
//!
//! Operands referring to module items by `$name` stay symbolic until
//! encoding, so a body may call a function declared later in the
//! source. Branch labels resolve against the label stack maintained
//! while encoding, innermost frame at depth 0.

use crate::encoding;
use crate::module::ValueType;
use crate::opcodes::{self, Imm, BLOCK_TYPE_EMPTY, OP_BLOCK, OP_ELSE, OP_END, OP_IF, OP_LOOP};
use crate::symbols::{Space, SymbolError, SymbolSpaces, SymbolTable};
use thiserror::Error;

/// The result arity of a structured control form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValueType),
}

/// A branch destination: a raw relative depth or a label name.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchTarget {
    Depth(u32),
    Label(String),
}

/// One instruction immediate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// A numeric index into some index space.
    Index(u32),
    /// A `$name` reference, resolved at encode time.
    Name(Space, String),
    Target(BranchTarget),
    Mem { align: u32, offset: u32 },
    BrTable { targets: Vec<BranchTarget>, default: BranchTarget },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Plain {
        name: String,
        operands: Vec<Operand>,
    },
    Block {
        label: Option<String>,
        block_type: BlockType,
        body: Vec<Instruction>,
    },
    Loop {
        label: Option<String>,
        block_type: BlockType,
        body: Vec<Instruction>,
    },
    If {
        label: Option<String>,
        block_type: BlockType,
        then_body: Vec<Instruction>,
        else_body: Option<Vec<Instruction>>,
    },
}

/// An instruction that failed to encode.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EncodeError {
    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),
    #[error("{mnemonic}: expected {expected} operand")]
    Operand {
        mnemonic: String,
        expected: &'static str,
    },
    #[error(transparent)]
    Symbol(#[from] SymbolError),
}

/// Resolution context for symbolic operands: the module's index
/// spaces, the current function's locals, and the live label stack.
pub struct SymbolContext<'a> {
    module: &'a SymbolSpaces,
    locals: Option<&'a SymbolTable>,
    labels: Vec<Option<String>>,
}

impl<'a> SymbolContext<'a> {
    /// A context with no function scope, for constant expressions.
    pub fn new(module: &'a SymbolSpaces) -> Self {
        Self {
            module,
            locals: None,
            labels: Vec::new(),
        }
    }

    /// A context inside a function body.
    pub fn with_locals(module: &'a SymbolSpaces, locals: &'a SymbolTable) -> Self {
        Self {
            module,
            locals: Some(locals),
            labels: Vec::new(),
        }
    }

    fn resolve(&self, space: Space, name: &str) -> Result<u32, SymbolError> {
        match space {
            Space::Type => self.module.types.resolve(name),
            Space::Func => self.module.funcs.resolve(name),
            Space::Table => self.module.tables.resolve(name),
            Space::Memory => self.module.memories.resolve(name),
            Space::Global => self.module.globals.resolve(name),
            Space::Local => match self.locals {
                Some(table) => table.resolve(name),
                None => Err(SymbolError::Undefined {
                    space: Space::Local,
                    name: name.to_string(),
                }),
            },
            Space::Label => self.resolve_label(name),
        }
    }

    /// Relative depth of the innermost enclosing label named `name`.
    fn resolve_label(&self, name: &str) -> Result<u32, SymbolError> {
        for (depth, label) in self.labels.iter().rev().enumerate() {
            if label.as_deref() == Some(name) {
                return Ok(depth as u32);
            }
        }
        Err(SymbolError::Undefined {
            space: Space::Label,
            name: name.to_string(),
        })
    }

    fn target_depth(&self, target: &BranchTarget) -> Result<u32, SymbolError> {
        match target {
            BranchTarget::Depth(depth) => Ok(*depth),
            BranchTarget::Label(name) => self.resolve_label(name),
        }
    }
}

/// Encodes one instruction (and, for control forms, its nested body)
/// into `buf`.
pub fn encode(
    instr: &Instruction,
    ctx: &mut SymbolContext<'_>,
    buf: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    match instr {
        Instruction::Plain { name, operands } => {
            let op = opcodes::lookup(name)
                .ok_or_else(|| EncodeError::UnknownOpcode(name.clone()))?;
            buf.push(op.code);
            encode_immediates(name, op.imm, operands, ctx, buf)
        }
        Instruction::Block {
            label,
            block_type,
            body,
        } => encode_structured(OP_BLOCK, label, *block_type, body, ctx, buf),
        Instruction::Loop {
            label,
            block_type,
            body,
        } => encode_structured(OP_LOOP, label, *block_type, body, ctx, buf),
        Instruction::If {
            label,
            block_type,
            then_body,
            else_body,
        } => {
            buf.push(OP_IF);
            encode_block_type(*block_type, buf);
            ctx.labels.push(label.clone());
            let result: Result<(), EncodeError> = (|| {
                for instr in then_body {
                    encode(instr, ctx, buf)?;
                }
                if let Some(else_body) = else_body {
                    buf.push(OP_ELSE);
                    for instr in else_body {
                        encode(instr, ctx, buf)?;
                    }
                }
                Ok(())
            })();
            ctx.labels.pop();
            result?;
            buf.push(OP_END);
            Ok(())
        }
    }
}

/// Encodes an instruction sequence followed by the `end` terminator:
/// a function body or a constant expression.
pub fn encode_expression(
    instrs: &[Instruction],
    ctx: &mut SymbolContext<'_>,
    buf: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    for instr in instrs {
        encode(instr, ctx, buf)?;
    }
    buf.push(OP_END);
    Ok(())
}

fn encode_structured(
    opcode: u8,
    label: &Option<String>,
    block_type: BlockType,
    body: &[Instruction],
    ctx: &mut SymbolContext<'_>,
    buf: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    buf.push(opcode);
    encode_block_type(block_type, buf);
    ctx.labels.push(label.clone());
    let result: Result<(), EncodeError> = (|| {
        for instr in body {
            encode(instr, ctx, buf)?;
        }
        Ok(())
    })();
    ctx.labels.pop();
    result?;
    buf.push(OP_END);
    Ok(())
}

fn encode_block_type(block_type: BlockType, buf: &mut Vec<u8>) {
    match block_type {
        BlockType::Empty => buf.push(BLOCK_TYPE_EMPTY),
        BlockType::Value(ty) => buf.push(ty.wire()),
    }
}

fn encode_immediates(
    mnemonic: &str,
    imm: Imm,
    operands: &[Operand],
    ctx: &SymbolContext<'_>,
    buf: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    match imm {
        Imm::None => Ok(()),
        Imm::Branch => {
            let depth = match single(mnemonic, operands, "branch target")? {
                Operand::Target(target) => ctx.target_depth(target)?,
                _ => return Err(mismatch(mnemonic, "branch target")),
            };
            encoding::write_vu32(buf, depth);
            Ok(())
        }
        Imm::BranchTable => {
            let (targets, default) = match single(mnemonic, operands, "branch table")? {
                Operand::BrTable { targets, default } => (targets, default),
                _ => return Err(mismatch(mnemonic, "branch table")),
            };
            encoding::write_vu32(buf, targets.len() as u32);
            for target in targets {
                encoding::write_vu32(buf, ctx.target_depth(target)?);
            }
            encoding::write_vu32(buf, ctx.target_depth(default)?);
            Ok(())
        }
        Imm::FuncIndex | Imm::LocalIndex | Imm::GlobalIndex => {
            let index = index_operand(mnemonic, operands, ctx, "index")?;
            encoding::write_vu32(buf, index);
            Ok(())
        }
        Imm::CallIndirect => {
            let index = index_operand(mnemonic, operands, ctx, "type index")?;
            encoding::write_vu32(buf, index);
            buf.push(0x00); // reserved table index
            Ok(())
        }
        Imm::Mem { .. } => {
            let (align, offset) = match single(mnemonic, operands, "memory argument")? {
                Operand::Mem { align, offset } => (*align, *offset),
                _ => return Err(mismatch(mnemonic, "memory argument")),
            };
            encoding::write_vu32(buf, align);
            encoding::write_vu32(buf, offset);
            Ok(())
        }
        Imm::MemoryReserved => {
            buf.push(0x00); // reserved memory index
            Ok(())
        }
        Imm::I32 => match single(mnemonic, operands, "i32 constant")? {
            Operand::I32(v) => {
                encoding::write_vs32(buf, *v);
                Ok(())
            }
            _ => Err(mismatch(mnemonic, "i32 constant")),
        },
        Imm::I64 => match single(mnemonic, operands, "i64 constant")? {
            Operand::I64(v) => {
                encoding::write_vs64(buf, *v);
                Ok(())
            }
            _ => Err(mismatch(mnemonic, "i64 constant")),
        },
        Imm::F32 => match single(mnemonic, operands, "f32 constant")? {
            Operand::F32(v) => {
                encoding::write_f32(buf, *v);
                Ok(())
            }
            _ => Err(mismatch(mnemonic, "f32 constant")),
        },
        Imm::F64 => match single(mnemonic, operands, "f64 constant")? {
            Operand::F64(v) => {
                encoding::write_f64(buf, *v);
                Ok(())
            }
            _ => Err(mismatch(mnemonic, "f64 constant")),
        },
    }
}

fn single<'o>(
    mnemonic: &str,
    operands: &'o [Operand],
    expected: &'static str,
) -> Result<&'o Operand, EncodeError> {
    match operands {
        [operand] => Ok(operand),
        _ => Err(mismatch(mnemonic, expected)),
    }
}

fn index_operand(
    mnemonic: &str,
    operands: &[Operand],
    ctx: &SymbolContext<'_>,
    expected: &'static str,
) -> Result<u32, EncodeError> {
    match single(mnemonic, operands, expected)? {
        Operand::Index(index) => Ok(*index),
        Operand::Name(space, name) => Ok(ctx.resolve(*space, name)?),
        _ => Err(mismatch(mnemonic, expected)),
    }
}

fn mismatch(mnemonic: &str, expected: &'static str) -> EncodeError {
    EncodeError::Operand {
        mnemonic: mnemonic.to_string(),
        expected,
    }
}
