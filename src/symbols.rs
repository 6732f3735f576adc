//! Name-to-index symbol tables.
//!
//! WebAssembly has separate index spaces for types, functions, tables,
//! memories, globals, locals, and labels. Each space hands out
//! positional indices in declaration order; `$name`s are an overlay on
//! those indices. Imports occupy the leading indices of their space.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The index space a symbol lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Type,
    Func,
    Table,
    Memory,
    Global,
    Local,
    Label,
}

impl Space {
    pub fn as_str(self) -> &'static str {
        match self {
            Space::Type => "type",
            Space::Func => "function",
            Space::Table => "table",
            Space::Memory => "memory",
            Space::Global => "global",
            Space::Local => "local",
            Space::Label => "label",
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed symbol operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("undefined {space} ${name}")]
    Undefined { space: Space, name: String },
    #[error("duplicate {space} ${name}")]
    Duplicate { space: Space, name: String },
}

/// One index space: a positional counter with a name overlay.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    space: Space,
    names: HashMap<String, u32>,
    next: u32,
}

impl SymbolTable {
    pub fn new(space: Space) -> Self {
        Self {
            space,
            names: HashMap::new(),
            next: 0,
        }
    }

    /// Assigns the next positional index, optionally binding a name to
    /// it. Rebinding a name already in this space is an error.
    pub fn declare(&mut self, name: Option<&str>) -> Result<u32, SymbolError> {
        let index = self.next;
        if let Some(name) = name {
            if self.names.contains_key(name) {
                return Err(SymbolError::Duplicate {
                    space: self.space,
                    name: name.to_string(),
                });
            }
            self.names.insert(name.to_string(), index);
        }
        self.next += 1;
        Ok(index)
    }

    /// Assigns the next positional index with no name bound. Unlike
    /// [`declare`](Self::declare) this cannot fail.
    pub fn reserve(&mut self) -> u32 {
        let index = self.next;
        self.next += 1;
        index
    }

    /// The index bound to `name`.
    pub fn resolve(&self, name: &str) -> Result<u32, SymbolError> {
        self.names.get(name).copied().ok_or_else(|| SymbolError::Undefined {
            space: self.space,
            name: name.to_string(),
        })
    }

    /// Number of indices assigned so far.
    pub fn len(&self) -> u32 {
        self.next
    }

    pub fn is_empty(&self) -> bool {
        self.next == 0
    }
}

/// The module-level symbol tables, one per index space.
#[derive(Debug, Clone)]
pub struct SymbolSpaces {
    pub types: SymbolTable,
    pub funcs: SymbolTable,
    pub tables: SymbolTable,
    pub memories: SymbolTable,
    pub globals: SymbolTable,
}

impl SymbolSpaces {
    pub fn new() -> Self {
        Self {
            types: SymbolTable::new(Space::Type),
            funcs: SymbolTable::new(Space::Func),
            tables: SymbolTable::new(Space::Table),
            memories: SymbolTable::new(Space::Memory),
            globals: SymbolTable::new(Space::Global),
        }
    }
}

impl Default for SymbolSpaces {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_positional() {
        let mut table = SymbolTable::new(Space::Func);
        assert_eq!(table.declare(None).unwrap(), 0);
        assert_eq!(table.declare(Some("f")).unwrap(), 1);
        assert_eq!(table.declare(None).unwrap(), 2);
        assert_eq!(table.len(), 3);
        assert_eq!(table.resolve("f").unwrap(), 1);
    }

    #[test]
    fn reserve_interleaves_with_declare() {
        let mut table = SymbolTable::new(Space::Type);
        assert_eq!(table.reserve(), 0);
        assert_eq!(table.declare(Some("t")).unwrap(), 1);
        assert_eq!(table.reserve(), 2);
        assert_eq!(table.resolve("t").unwrap(), 1);
    }

    #[test]
    fn undefined_name() {
        let table = SymbolTable::new(Space::Global);
        let err = table.resolve("g").unwrap_err();
        assert_eq!(
            err,
            SymbolError::Undefined {
                space: Space::Global,
                name: "g".to_string()
            }
        );
        assert_eq!(err.to_string(), "undefined global $g");
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut table = SymbolTable::new(Space::Local);
        table.declare(Some("x")).unwrap();
        let err = table.declare(Some("x")).unwrap_err();
        assert_eq!(err.to_string(), "duplicate local $x");
        // the failed declaration does not consume an index
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn spaces_are_independent() {
        let mut spaces = SymbolSpaces::new();
        spaces.funcs.declare(Some("thing")).unwrap();
        spaces.globals.declare(Some("thing")).unwrap();
        assert_eq!(spaces.funcs.resolve("thing").unwrap(), 0);
        assert_eq!(spaces.globals.resolve("thing").unwrap(), 0);
        assert!(spaces.tables.resolve("thing").is_err());
    }
}
