//! The in-memory module: typed declarations mirroring the binary
//! format's sections.
//!
//! Declarations hold resolved indices wherever the builder can resolve
//! them (exports, start, element segments); instruction operands may
//! stay symbolic until encoding.

use crate::instruction::Instruction;
use crate::symbols::{SymbolSpaces, SymbolTable};

/// A WebAssembly value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    /// The binary-format type byte.
    pub fn wire(self) -> u8 {
        match self {
            ValueType::I32 => 0x7f,
            ValueType::I64 => 0x7e,
            ValueType::F32 => 0x7d,
            ValueType::F64 => 0x7c,
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "i32" => Some(ValueType::I32),
            "i64" => Some(ValueType::I64),
            "f32" => Some(ValueType::F32),
            "f64" => Some(ValueType::F64),
            _ => None,
        }
    }
}

/// A function signature. Structural equality is the dedup key for
/// inline type uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

/// Table and memory size bounds, in elements/pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutable: bool,
}

#[derive(Debug, Clone)]
pub enum ImportKind {
    Func { type_index: u32 },
    Table(Limits),
    Memory(Limits),
    Global(GlobalType),
}

#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub kind: ImportKind,
}

/// A function defined in this module. `symbols` covers the combined
/// param-then-local index space for `$name` operands in the body.
#[derive(Debug, Clone)]
pub struct Function {
    pub type_index: u32,
    pub locals: Vec<ValueType>,
    pub body: Vec<Instruction>,
    pub symbols: SymbolTable,
}

#[derive(Debug, Clone)]
pub struct Global {
    pub ty: GlobalType,
    pub init: Vec<Instruction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

impl ExportKind {
    /// The binary-format descriptor tag.
    pub fn wire(self) -> u8 {
        match self {
            ExportKind::Func => 0x00,
            ExportKind::Table => 0x01,
            ExportKind::Memory => 0x02,
            ExportKind::Global => 0x03,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

/// An active element segment: function indices placed into a table at
/// a computed offset.
#[derive(Debug, Clone)]
pub struct Element {
    pub table_index: u32,
    pub offset: Vec<Instruction>,
    pub funcs: Vec<u32>,
}

/// An active data segment: bytes placed into a memory at a computed
/// offset.
#[derive(Debug, Clone)]
pub struct Data {
    pub memory_index: u32,
    pub offset: Vec<Instruction>,
    pub bytes: Vec<u8>,
}

/// A complete module, ready for binary emission.
#[derive(Debug, Clone)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    pub functions: Vec<Function>,
    pub tables: Vec<Limits>,
    pub memories: Vec<Limits>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<Element>,
    pub data: Vec<Data>,
    pub symbols: SymbolSpaces,
}

impl Module {
    pub fn new() -> Self {
        Self {
            types: Vec::new(),
            imports: Vec::new(),
            functions: Vec::new(),
            tables: Vec::new(),
            memories: Vec::new(),
            globals: Vec::new(),
            exports: Vec::new(),
            start: None,
            elements: Vec::new(),
            data: Vec::new(),
            symbols: SymbolSpaces::new(),
        }
    }

    /// Returns the index of a structurally equal type, appending a new
    /// entry when none exists. Inline signatures dedup through here.
    pub fn find_or_add_type(&mut self, ty: FuncType) -> u32 {
        match self.types.iter().position(|t| *t == ty) {
            Some(index) => index as u32,
            None => {
                self.types.push(ty);
                (self.types.len() - 1) as u32
            }
        }
    }

    /// Appends a type unconditionally. Explicit `(type …)` definitions
    /// always occupy their own index, even when equal to an earlier
    /// one.
    pub fn add_type(&mut self, ty: FuncType) -> u32 {
        self.types.push(ty);
        (self.types.len() - 1) as u32
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}
