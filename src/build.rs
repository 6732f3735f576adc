//! Module builder: walks the S-expression tree of a `(module …)` form
//! and produces the typed [`Module`].
//!
//! Field grammar (MVP):
//!
//! ```text
//! module  ::= '(' 'module' id? field* ')'
//! field   ::= type | import | func | table | memory | global
//!           | export | start | elem | data
//! typeuse ::= '(' 'type' idx ')'? '(' 'param' … ')'* '(' 'result' … ')'*
//! ```
//!
//! Two passes precede field processing. Pre-registration walks every
//! field once and assigns positional indices (imports leading) so
//! exports, `start`, and element segments may reference items declared
//! later. A type pass then materializes all explicit `(type …)`
//! definitions so `(type $t)` uses resolve regardless of field order.
//! Inline signatures dedup against the type list by structural
//! equality; explicit definitions always append.
//!
//! Instruction operands that name module items (`call $f`) are kept
//! symbolic here and resolve during encoding.

use crate::error::CompileError;
use crate::instruction::{BlockType, BranchTarget, Instruction, Operand};
use crate::module::{
    Data, Element, Export, ExportKind, FuncType, Function, Global, GlobalType, Import, ImportKind,
    Limits, Module, ValueType,
};
use crate::opcodes::{self, Imm};
use crate::symbols::{Space, SymbolTable};
use crate::text::sexpr::SExpr;
use crate::text::token::{Span, Token, TokenKind};
use fhex::FromHex;
use thiserror::Error;

/// A malformed module field or instruction, positioned at the
/// offending form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} at {span}")]
pub struct BuildError {
    pub message: String,
    pub span: Span,
}

impl BuildError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Builds a module from the top-level forms of a source document.
///
/// Exactly one `(module …)` form is expected.
pub fn build(forms: &[SExpr]) -> Result<Module, CompileError> {
    let first = match forms.first() {
        Some(form) => form,
        None => {
            return Err(BuildError::new("expected a (module …) form", Span::new(0, 0, 1, 1)).into())
        }
    };
    if !first.is_list_headed_by("module") {
        return Err(BuildError::new("expected a (module …) form", first.span()).into());
    }
    if let Some(extra) = forms.get(1) {
        return Err(BuildError::new("unexpected form after (module …)", extra.span()).into());
    }

    let mut fields: &[SExpr] = match first.as_list() {
        Some(items) => &items[1..],
        None => &[],
    };
    if fields.first().and_then(SExpr::id).is_some() {
        fields = &fields[1..];
    }

    let mut builder = Builder::new();
    builder.pre_register(fields)?;
    builder.register_types(fields)?;
    for field in fields {
        builder.field(field)?;
    }
    Ok(builder.module)
}

struct Builder {
    module: Module,
    // Running positional indices, advanced by imports and definitions
    // alike. Inline exports bind against these.
    func_index: u32,
    table_index: u32,
    memory_index: u32,
    global_index: u32,
}

impl Builder {
    fn new() -> Self {
        Self {
            module: Module::new(),
            func_index: 0,
            table_index: 0,
            memory_index: 0,
            global_index: 0,
        }
    }

    // -----------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------

    /// Assigns every `$name` its positional index before any field is
    /// processed, so forward references resolve.
    fn pre_register(&mut self, fields: &[SExpr]) -> Result<(), CompileError> {
        for field in fields {
            let items = match field.as_list() {
                Some(items) => items,
                None => continue,
            };
            let name = items.get(1).and_then(SExpr::id);
            let spaces = &mut self.module.symbols;
            let declared = match field.head_keyword() {
                Some("func") => spaces.funcs.declare(name),
                Some("table") => spaces.tables.declare(name),
                Some("memory") => spaces.memories.declare(name),
                Some("global") => spaces.globals.declare(name),
                Some("import") => {
                    let desc = items.get(3);
                    let desc_name = desc
                        .and_then(SExpr::as_list)
                        .and_then(|d| d.get(1))
                        .and_then(SExpr::id);
                    match desc.and_then(SExpr::head_keyword) {
                        Some("func") => spaces.funcs.declare(desc_name),
                        Some("table") => spaces.tables.declare(desc_name),
                        Some("memory") => spaces.memories.declare(desc_name),
                        Some("global") => spaces.globals.declare(desc_name),
                        // malformed imports are reported in the main pass
                        _ => Ok(0),
                    }
                }
                _ => Ok(0),
            };
            declared?;
        }
        Ok(())
    }

    /// Materializes every explicit `(type …)` definition.
    fn register_types(&mut self, fields: &[SExpr]) -> Result<(), CompileError> {
        for field in fields {
            if !field.is_list_headed_by("type") {
                continue;
            }
            let items = match field.as_list() {
                Some(items) => items,
                None => continue,
            };
            let span = field.span();
            let mut rest = &items[1..];
            let name = rest.first().and_then(SExpr::id);
            self.module.symbols.types.declare(name)?;
            if name.is_some() {
                rest = &rest[1..];
            }
            let func_form = match rest.first() {
                Some(form) if form.is_list_headed_by("func") => form,
                _ => return Err(BuildError::new("type needs a (func …) signature", span).into()),
            };
            if rest.len() > 1 {
                return Err(BuildError::new("unexpected tokens in (type …)", span).into());
            }
            let sig_forms = match func_form.as_list() {
                Some(items) => &items[1..],
                None => &[],
            };
            let ty = self.signature(sig_forms, None, span)?;
            self.module.add_type(ty);
        }
        Ok(())
    }

    fn field(&mut self, form: &SExpr) -> Result<(), CompileError> {
        let span = form.span();
        let items = match form.as_list() {
            Some(items) => items,
            None => return Err(BuildError::new("expected a (…) module field", span).into()),
        };
        match form.head_keyword() {
            Some("type") => Ok(()), // handled by register_types
            Some("import") => self.field_import(items, span),
            Some("func") => self.field_func(items, span),
            Some("table") => self.field_table(items, span),
            Some("memory") => self.field_memory(items, span),
            Some("global") => self.field_global(items, span),
            Some("export") => self.field_export(items, span),
            Some("start") => self.field_start(items, span),
            Some("elem") => self.field_elem(items, span),
            Some("data") => self.field_data(items, span),
            Some(other) => {
                Err(BuildError::new(format!("unknown module field '{other}'"), span).into())
            }
            None => Err(BuildError::new("module field must start with a keyword", span).into()),
        }
    }

    // -----------------------------------------------------------------
    // Fields
    // -----------------------------------------------------------------

    fn field_import(&mut self, items: &[SExpr], span: Span) -> Result<(), CompileError> {
        let module_name = self.string(items.get(1), span)?;
        let field_name = self.string(items.get(2), span)?;
        let desc = match items.get(3) {
            Some(desc) => desc,
            None => return Err(BuildError::new("import needs a descriptor", span).into()),
        };
        if items.len() > 4 {
            return Err(BuildError::new("unexpected tokens in (import …)", span).into());
        }
        let desc_span = desc.span();
        let mut rest: &[SExpr] = match desc.as_list() {
            Some(items) if !items.is_empty() => &items[1..],
            _ => return Err(BuildError::new("import needs a descriptor", span).into()),
        };
        if rest.first().and_then(SExpr::id).is_some() {
            rest = &rest[1..]; // name handled by pre-registration
        }

        let kind = match desc.head_keyword() {
            Some("func") => {
                if !self.module.functions.is_empty() {
                    return Err(
                        BuildError::new("imports must precede function definitions", span).into(),
                    );
                }
                let (type_index, consumed) = self.type_use(rest, 0, None, desc_span)?;
                if consumed < rest.len() {
                    return Err(BuildError::new(
                        "unexpected tokens in imported function",
                        desc_span,
                    )
                    .into());
                }
                self.func_index += 1;
                ImportKind::Func { type_index }
            }
            Some("table") => {
                if self.table_index > 0 {
                    return Err(
                        BuildError::new("multiple tables are not supported", span).into()
                    );
                }
                let (limits, consumed) = self.limits(rest, 0, desc_span)?;
                let consumed = self.element_type(rest, consumed, desc_span)?;
                if consumed < rest.len() {
                    return Err(
                        BuildError::new("unexpected tokens in imported table", desc_span).into(),
                    );
                }
                self.table_index += 1;
                ImportKind::Table(limits)
            }
            Some("memory") => {
                if self.memory_index > 0 {
                    return Err(
                        BuildError::new("multiple memories are not supported", span).into()
                    );
                }
                let (limits, consumed) = self.limits(rest, 0, desc_span)?;
                if consumed < rest.len() {
                    return Err(
                        BuildError::new("unexpected tokens in imported memory", desc_span).into(),
                    );
                }
                self.memory_index += 1;
                ImportKind::Memory(limits)
            }
            Some("global") => {
                if !self.module.globals.is_empty() {
                    return Err(
                        BuildError::new("imports must precede global definitions", span).into()
                    );
                }
                let (ty, consumed) = self.global_type(rest, 0, desc_span)?;
                if consumed < rest.len() {
                    return Err(
                        BuildError::new("unexpected tokens in imported global", desc_span).into(),
                    );
                }
                self.global_index += 1;
                ImportKind::Global(ty)
            }
            _ => return Err(BuildError::new("unknown import descriptor", desc_span).into()),
        };

        self.module.imports.push(Import {
            module: module_name,
            name: field_name,
            kind,
        });
        Ok(())
    }

    fn field_func(&mut self, items: &[SExpr], span: Span) -> Result<(), CompileError> {
        let mut rest = &items[1..];
        if rest.first().and_then(SExpr::id).is_some() {
            rest = &rest[1..]; // pre-registered
        }
        let index = self.func_index;
        self.inline_exports(&mut rest, ExportKind::Func, index)?;

        if let Some((module_name, field_name)) = self.take_inline_import(&mut rest)? {
            if !self.module.functions.is_empty() {
                return Err(
                    BuildError::new("imports must precede function definitions", span).into(),
                );
            }
            let (type_index, consumed) = self.type_use(rest, 0, None, span)?;
            if consumed < rest.len() {
                return Err(
                    BuildError::new("imported function cannot have a body", span).into(),
                );
            }
            self.module.imports.push(Import {
                module: module_name,
                name: field_name,
                kind: ImportKind::Func { type_index },
            });
            self.func_index += 1;
            return Ok(());
        }

        let mut symbols = SymbolTable::new(Space::Local);
        let (type_index, consumed) = self.type_use(rest, 0, Some(&mut symbols), span)?;
        rest = &rest[consumed..];

        let mut locals = Vec::new();
        while let Some(form) = rest.first() {
            if !form.is_list_headed_by("local") {
                break;
            }
            self.locals_into(form, &mut locals, &mut symbols)?;
            rest = &rest[1..];
        }

        let body = self.parse_instrs(rest)?;
        self.module.functions.push(Function {
            type_index,
            locals,
            body,
            symbols,
        });
        self.func_index += 1;
        Ok(())
    }

    fn field_table(&mut self, items: &[SExpr], span: Span) -> Result<(), CompileError> {
        // the MVP binary format admits at most one table
        if self.table_index > 0 {
            return Err(BuildError::new("multiple tables are not supported", span).into());
        }
        let mut rest = &items[1..];
        if rest.first().and_then(SExpr::id).is_some() {
            rest = &rest[1..];
        }
        let index = self.table_index;
        self.inline_exports(&mut rest, ExportKind::Table, index)?;

        if let Some((module_name, field_name)) = self.take_inline_import(&mut rest)? {
            let (limits, consumed) = self.limits(rest, 0, span)?;
            let consumed = self.element_type(rest, consumed, span)?;
            if consumed < rest.len() {
                return Err(BuildError::new("unexpected tokens in (table …)", span).into());
            }
            self.module.imports.push(Import {
                module: module_name,
                name: field_name,
                kind: ImportKind::Table(limits),
            });
            self.table_index += 1;
            return Ok(());
        }

        let (limits, consumed) = self.limits(rest, 0, span)?;
        let consumed = self.element_type(rest, consumed, span)?;
        if consumed < rest.len() {
            return Err(BuildError::new("unexpected tokens in (table …)", span).into());
        }
        self.module.tables.push(limits);
        self.table_index += 1;
        Ok(())
    }

    fn field_memory(&mut self, items: &[SExpr], span: Span) -> Result<(), CompileError> {
        // the MVP binary format admits at most one memory
        if self.memory_index > 0 {
            return Err(BuildError::new("multiple memories are not supported", span).into());
        }
        let mut rest = &items[1..];
        if rest.first().and_then(SExpr::id).is_some() {
            rest = &rest[1..];
        }
        let index = self.memory_index;
        self.inline_exports(&mut rest, ExportKind::Memory, index)?;

        if let Some((module_name, field_name)) = self.take_inline_import(&mut rest)? {
            let (limits, consumed) = self.limits(rest, 0, span)?;
            if consumed < rest.len() {
                return Err(BuildError::new("unexpected tokens in (memory …)", span).into());
            }
            self.module.imports.push(Import {
                module: module_name,
                name: field_name,
                kind: ImportKind::Memory(limits),
            });
            self.memory_index += 1;
            return Ok(());
        }

        let (limits, consumed) = self.limits(rest, 0, span)?;
        if consumed < rest.len() {
            return Err(BuildError::new("unexpected tokens in (memory …)", span).into());
        }
        self.module.memories.push(limits);
        self.memory_index += 1;
        Ok(())
    }

    fn field_global(&mut self, items: &[SExpr], span: Span) -> Result<(), CompileError> {
        let mut rest = &items[1..];
        if rest.first().and_then(SExpr::id).is_some() {
            rest = &rest[1..];
        }
        let index = self.global_index;
        self.inline_exports(&mut rest, ExportKind::Global, index)?;

        if let Some((module_name, field_name)) = self.take_inline_import(&mut rest)? {
            if !self.module.globals.is_empty() {
                return Err(
                    BuildError::new("imports must precede global definitions", span).into(),
                );
            }
            let (ty, consumed) = self.global_type(rest, 0, span)?;
            if consumed < rest.len() {
                return Err(BuildError::new("unexpected tokens in (global …)", span).into());
            }
            self.module.imports.push(Import {
                module: module_name,
                name: field_name,
                kind: ImportKind::Global(ty),
            });
            self.global_index += 1;
            return Ok(());
        }

        let (ty, consumed) = self.global_type(rest, 0, span)?;
        rest = &rest[consumed..];
        let init = self.parse_instrs(rest)?;
        if init.is_empty() {
            return Err(BuildError::new("global needs an init expression", span).into());
        }
        self.module.globals.push(Global { ty, init });
        self.global_index += 1;
        Ok(())
    }

    fn field_export(&mut self, items: &[SExpr], span: Span) -> Result<(), CompileError> {
        let name = self.string(items.get(1), span)?;
        let desc = match items.get(2) {
            Some(desc) => desc,
            None => return Err(BuildError::new("export needs a descriptor", span).into()),
        };
        if items.len() > 3 {
            return Err(BuildError::new("unexpected tokens in (export …)", span).into());
        }
        let desc_items = match desc.as_list() {
            Some(items) if items.len() == 2 => items,
            _ => return Err(BuildError::new("malformed export descriptor", desc.span()).into()),
        };
        let spaces = &self.module.symbols;
        let (kind, table) = match desc.head_keyword() {
            Some("func") => (ExportKind::Func, &spaces.funcs),
            Some("table") => (ExportKind::Table, &spaces.tables),
            Some("memory") => (ExportKind::Memory, &spaces.memories),
            Some("global") => (ExportKind::Global, &spaces.globals),
            _ => return Err(BuildError::new("unknown export descriptor", desc.span()).into()),
        };
        let index = resolve_ref(&desc_items[1], table)?;
        self.module.exports.push(Export { name, kind, index });
        Ok(())
    }

    fn field_start(&mut self, items: &[SExpr], span: Span) -> Result<(), CompileError> {
        if self.module.start.is_some() {
            return Err(BuildError::new("multiple start sections", span).into());
        }
        let target = match items.get(1) {
            Some(target) => target,
            None => return Err(BuildError::new("start needs a function reference", span).into()),
        };
        if items.len() > 2 {
            return Err(BuildError::new("unexpected tokens in (start …)", span).into());
        }
        let index = resolve_ref(target, &self.module.symbols.funcs)?;
        if index >= self.module.symbols.funcs.len() {
            return Err(BuildError::new(
                format!("start function index {index} out of range"),
                target.span(),
            )
            .into());
        }
        self.module.start = Some(index);
        Ok(())
    }

    fn field_elem(&mut self, items: &[SExpr], span: Span) -> Result<(), CompileError> {
        let mut rest = &items[1..];
        let table_index = match rest.first().and_then(SExpr::as_atom) {
            Some(_) => {
                let index = resolve_ref(&rest[0], &self.module.symbols.tables)?;
                rest = &rest[1..];
                index
            }
            None => 0,
        };
        let offset_form = match rest.first() {
            Some(form) => form,
            None => return Err(BuildError::new("elem needs an offset expression", span).into()),
        };
        let offset = self.offset_expr(offset_form)?;
        rest = &rest[1..];

        let mut funcs = Vec::new();
        for form in rest {
            funcs.push(resolve_ref(form, &self.module.symbols.funcs)?);
        }
        self.module.elements.push(Element {
            table_index,
            offset,
            funcs,
        });
        Ok(())
    }

    fn field_data(&mut self, items: &[SExpr], span: Span) -> Result<(), CompileError> {
        let mut rest = &items[1..];
        let memory_index = match rest.first().and_then(SExpr::as_atom) {
            Some(_) => {
                let index = resolve_ref(&rest[0], &self.module.symbols.memories)?;
                rest = &rest[1..];
                index
            }
            None => 0,
        };
        let offset_form = match rest.first() {
            Some(form) => form,
            None => return Err(BuildError::new("data needs an offset expression", span).into()),
        };
        let offset = self.offset_expr(offset_form)?;
        rest = &rest[1..];

        let mut bytes = Vec::new();
        for form in rest {
            match form.as_atom() {
                Some(Token {
                    kind: TokenKind::Str(chunk),
                    ..
                }) => bytes.extend_from_slice(chunk),
                _ => {
                    return Err(
                        BuildError::new("expected a string in (data …)", form.span()).into()
                    )
                }
            }
        }
        self.module.data.push(Data {
            memory_index,
            offset,
            bytes,
        });
        Ok(())
    }

    // -----------------------------------------------------------------
    // Shared pieces
    // -----------------------------------------------------------------

    /// Consumes leading `(export "name")` abbreviations, binding them
    /// to `index` in `kind`'s space.
    fn inline_exports(
        &mut self,
        rest: &mut &[SExpr],
        kind: ExportKind,
        index: u32,
    ) -> Result<(), CompileError> {
        while let Some(form) = rest.first() {
            if !form.is_list_headed_by("export") {
                break;
            }
            let items = match form.as_list() {
                Some(items) if items.len() == 2 => items,
                _ => return Err(BuildError::new("malformed inline export", form.span()).into()),
            };
            let name = self.string(items.get(1), form.span())?;
            self.module.exports.push(Export { name, kind, index });
            *rest = &rest[1..];
        }
        Ok(())
    }

    /// Consumes an `(import "module" "name")` abbreviation, if present.
    fn take_inline_import(
        &mut self,
        rest: &mut &[SExpr],
    ) -> Result<Option<(String, String)>, CompileError> {
        let form = match rest.first() {
            Some(form) if form.is_list_headed_by("import") => form,
            _ => return Ok(None),
        };
        let items = match form.as_list() {
            Some(items) if items.len() == 3 => items,
            _ => return Err(BuildError::new("malformed inline import", form.span()).into()),
        };
        let module_name = self.string(items.get(1), form.span())?;
        let field_name = self.string(items.get(2), form.span())?;
        *rest = &rest[1..];
        Ok(Some((module_name, field_name)))
    }

    /// Parses a type use: optional `(type idx)`, then inline
    /// `(param …)* (result …)*`. Named params register into `locals`
    /// when given. Returns the type index and forms consumed.
    fn type_use(
        &mut self,
        forms: &[SExpr],
        mut i: usize,
        mut locals: Option<&mut SymbolTable>,
        span: Span,
    ) -> Result<(u32, usize), CompileError> {
        let mut explicit = None;
        if let Some(form) = forms.get(i) {
            if form.is_list_headed_by("type") {
                let items = match form.as_list() {
                    Some(items) if items.len() == 2 => items,
                    _ => {
                        return Err(
                            BuildError::new("(type …) takes exactly one index", form.span()).into()
                        )
                    }
                };
                let index = resolve_ref(&items[1], &self.module.symbols.types)?;
                if index as usize >= self.module.types.len() {
                    return Err(BuildError::new(
                        format!("type index {index} out of range"),
                        form.span(),
                    )
                    .into());
                }
                explicit = Some(index);
                i += 1;
            }
        }

        let sig_start = i;
        while let Some(form) = forms.get(i) {
            if form.is_list_headed_by("param") || form.is_list_headed_by("result") {
                i += 1;
            } else {
                break;
            }
        }
        let sig_forms = &forms[sig_start..i];

        match explicit {
            Some(index) => {
                if sig_forms.is_empty() {
                    // locals index space still starts after the params
                    if let Some(locals) = locals.as_deref_mut() {
                        let params = self.module.types[index as usize].params.len();
                        for _ in 0..params {
                            locals.reserve();
                        }
                    }
                } else {
                    let inline = self.signature(sig_forms, locals, span)?;
                    if inline != self.module.types[index as usize] {
                        return Err(BuildError::new(
                            "inline signature does not match referenced type",
                            span,
                        )
                        .into());
                    }
                }
                Ok((index, i))
            }
            None => {
                let ty = self.signature(sig_forms, locals, span)?;
                Ok((self.intern_type(ty), i))
            }
        }
    }

    /// Parses `(param …)* (result …)*` forms into a signature.
    fn signature(
        &mut self,
        forms: &[SExpr],
        mut locals: Option<&mut SymbolTable>,
        span: Span,
    ) -> Result<FuncType, CompileError> {
        let mut params = Vec::new();
        let mut results = Vec::new();
        let mut seen_result = false;
        for form in forms {
            if form.is_list_headed_by("param") {
                if seen_result {
                    return Err(
                        BuildError::new("params must come before results", form.span()).into(),
                    );
                }
                self.params_into(form, &mut params, locals.as_deref_mut())?;
            } else if form.is_list_headed_by("result") {
                seen_result = true;
                let items = match form.as_list() {
                    Some(items) => &items[1..],
                    None => &[],
                };
                for item in items {
                    results.push(value_type(item)?);
                }
            } else {
                return Err(BuildError::new("expected (param …) or (result …)", span).into());
            }
        }
        if results.len() > 1 {
            return Err(BuildError::new("multi-value results are not supported", span).into());
        }
        Ok(FuncType { params, results })
    }

    fn params_into(
        &mut self,
        form: &SExpr,
        params: &mut Vec<ValueType>,
        locals: Option<&mut SymbolTable>,
    ) -> Result<(), CompileError> {
        let items = match form.as_list() {
            Some(items) => &items[1..],
            None => &[],
        };
        if let Some(name) = items.first().and_then(SExpr::id) {
            // named form binds exactly one type: (param $x i32)
            if items.len() != 2 {
                return Err(BuildError::new(
                    "a named param takes exactly one type",
                    form.span(),
                )
                .into());
            }
            params.push(value_type(&items[1])?);
            if let Some(locals) = locals {
                locals.declare(Some(name))?;
            }
        } else {
            for item in items {
                params.push(value_type(item)?);
            }
            if let Some(locals) = locals {
                for _ in 0..items.len() {
                    locals.reserve();
                }
            }
        }
        Ok(())
    }

    fn locals_into(
        &mut self,
        form: &SExpr,
        locals: &mut Vec<ValueType>,
        symbols: &mut SymbolTable,
    ) -> Result<(), CompileError> {
        let items = match form.as_list() {
            Some(items) => &items[1..],
            None => &[],
        };
        if let Some(name) = items.first().and_then(SExpr::id) {
            if items.len() != 2 {
                return Err(BuildError::new(
                    "a named local takes exactly one type",
                    form.span(),
                )
                .into());
            }
            locals.push(value_type(&items[1])?);
            symbols.declare(Some(name))?;
        } else {
            for item in items {
                locals.push(value_type(item)?);
                symbols.reserve();
            }
        }
        Ok(())
    }

    /// Dedups an inline signature against the type list, appending when
    /// new. The type symbol space advances in step.
    fn intern_type(&mut self, ty: FuncType) -> u32 {
        let before = self.module.types.len();
        let index = self.module.find_or_add_type(ty);
        if self.module.types.len() > before {
            self.module.symbols.types.reserve();
        }
        index
    }

    fn limits(
        &self,
        forms: &[SExpr],
        mut i: usize,
        span: Span,
    ) -> Result<(Limits, usize), CompileError> {
        let min = match forms.get(i).and_then(SExpr::as_atom) {
            Some(token) if token.kind == TokenKind::Number => parse_u32_text(&token.text, token.span)?,
            _ => return Err(BuildError::new("expected a minimum size", span).into()),
        };
        i += 1;
        let max = match forms.get(i).and_then(SExpr::as_atom) {
            Some(token) if token.kind == TokenKind::Number => {
                i += 1;
                Some(parse_u32_text(&token.text, token.span)?)
            }
            _ => None,
        };
        Ok((Limits { min, max }, i))
    }

    /// Consumes the table element type keyword; only function
    /// references exist in the MVP.
    fn element_type(&self, forms: &[SExpr], i: usize, span: Span) -> Result<usize, CompileError> {
        match forms.get(i).and_then(SExpr::keyword) {
            Some("funcref") | Some("anyfunc") => Ok(i + 1),
            _ => Err(BuildError::new("expected element type 'funcref'", span).into()),
        }
    }

    fn global_type(
        &self,
        forms: &[SExpr],
        i: usize,
        span: Span,
    ) -> Result<(GlobalType, usize), CompileError> {
        let form = match forms.get(i) {
            Some(form) => form,
            None => return Err(BuildError::new("global needs a type", span).into()),
        };
        if form.is_list_headed_by("mut") {
            let items = match form.as_list() {
                Some(items) if items.len() == 2 => items,
                _ => {
                    return Err(
                        BuildError::new("(mut …) takes exactly one type", form.span()).into()
                    )
                }
            };
            Ok((
                GlobalType {
                    value_type: value_type(&items[1])?,
                    mutable: true,
                },
                i + 1,
            ))
        } else {
            Ok((
                GlobalType {
                    value_type: value_type(form)?,
                    mutable: false,
                },
                i + 1,
            ))
        }
    }

    /// An element/data offset: `(offset instr*)` or a single folded
    /// instruction.
    fn offset_expr(&mut self, form: &SExpr) -> Result<Vec<Instruction>, CompileError> {
        if form.is_list_headed_by("offset") {
            let items = match form.as_list() {
                Some(items) => &items[1..],
                None => &[],
            };
            return self.parse_instrs(items);
        }
        match form {
            SExpr::List { items, span } => {
                let mut out = Vec::new();
                self.parse_folded(items, *span, &mut out)?;
                Ok(out)
            }
            SExpr::Atom(token) => {
                Err(BuildError::new("expected an offset expression", token.span).into())
            }
        }
    }

    fn string(&self, form: Option<&SExpr>, span: Span) -> Result<String, CompileError> {
        match form.and_then(SExpr::as_atom) {
            Some(Token {
                kind: TokenKind::Str(bytes),
                span: token_span,
                ..
            }) => String::from_utf8(bytes.clone()).map_err(|_| {
                BuildError::new("name must be valid UTF-8", *token_span).into()
            }),
            _ => Err(BuildError::new("expected a quoted name", span).into()),
        }
    }

    // -----------------------------------------------------------------
    // Instructions
    // -----------------------------------------------------------------

    /// Parses a sequence mixing flat and folded instruction forms.
    fn parse_instrs(&mut self, forms: &[SExpr]) -> Result<Vec<Instruction>, CompileError> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < forms.len() {
            i = self.parse_instr(forms, i, &mut out)?;
        }
        Ok(out)
    }

    /// Parses one instruction starting at `forms[i]`, returning the
    /// index after it.
    fn parse_instr(
        &mut self,
        forms: &[SExpr],
        i: usize,
        out: &mut Vec<Instruction>,
    ) -> Result<usize, CompileError> {
        match &forms[i] {
            SExpr::Atom(token) => {
                let keyword = match token.keyword() {
                    Some(keyword) => keyword.to_string(),
                    None => {
                        return Err(
                            BuildError::new("expected an instruction", token.span).into()
                        )
                    }
                };
                let span = token.span;
                match keyword.as_str() {
                    "block" | "loop" => self.parse_flat_block(&keyword, forms, i + 1, span, out),
                    "if" => self.parse_flat_if(forms, i + 1, span, out),
                    "else" | "end" => {
                        Err(BuildError::new(format!("misplaced '{keyword}'"), span).into())
                    }
                    _ => {
                        let op = match opcodes::lookup(&keyword) {
                            Some(op) => op,
                            None => {
                                return Err(BuildError::new(
                                    format!("unknown instruction '{keyword}'"),
                                    span,
                                )
                                .into())
                            }
                        };
                        let (operands, next) =
                            self.parse_immediates(&keyword, op.imm, forms, i + 1, span)?;
                        out.push(Instruction::Plain {
                            name: keyword,
                            operands,
                        });
                        Ok(next)
                    }
                }
            }
            SExpr::List { items, span } => {
                self.parse_folded(items, *span, out)?;
                Ok(i + 1)
            }
        }
    }

    /// Flat `block`/`loop`: label, block type, body, `end`, optional
    /// trailing label that must match.
    fn parse_flat_block(
        &mut self,
        keyword: &str,
        forms: &[SExpr],
        mut i: usize,
        span: Span,
        out: &mut Vec<Instruction>,
    ) -> Result<usize, CompileError> {
        let label = forms.get(i).and_then(SExpr::id).map(String::from);
        if label.is_some() {
            i += 1;
        }
        let (block_type, ni) = self.block_type(forms, i)?;
        i = ni;

        let mut body = Vec::new();
        loop {
            let form = match forms.get(i) {
                Some(form) => form,
                None => return Err(BuildError::new("missing 'end'", span).into()),
            };
            if form.keyword() == Some("end") {
                i = self.check_trailing_label(forms, i + 1, &label)?;
                break;
            }
            i = self.parse_instr(forms, i, &mut body)?;
        }

        out.push(if keyword == "loop" {
            Instruction::Loop {
                label,
                block_type,
                body,
            }
        } else {
            Instruction::Block {
                label,
                block_type,
                body,
            }
        });
        Ok(i)
    }

    /// Flat `if`: then-arm instructions, optional `else` arm, `end`.
    fn parse_flat_if(
        &mut self,
        forms: &[SExpr],
        mut i: usize,
        span: Span,
        out: &mut Vec<Instruction>,
    ) -> Result<usize, CompileError> {
        let label = forms.get(i).and_then(SExpr::id).map(String::from);
        if label.is_some() {
            i += 1;
        }
        let (block_type, ni) = self.block_type(forms, i)?;
        i = ni;

        let mut then_body = Vec::new();
        let mut else_body: Option<Vec<Instruction>> = None;
        loop {
            let form = match forms.get(i) {
                Some(form) => form,
                None => return Err(BuildError::new("missing 'end'", span).into()),
            };
            match form.keyword() {
                Some("end") => {
                    i = self.check_trailing_label(forms, i + 1, &label)?;
                    break;
                }
                Some("else") => {
                    if else_body.is_some() {
                        return Err(BuildError::new("duplicate 'else'", form.span()).into());
                    }
                    i = self.check_trailing_label(forms, i + 1, &label)?;
                    else_body = Some(Vec::new());
                }
                _ => {
                    let target = else_body.as_mut().unwrap_or(&mut then_body);
                    i = self.parse_instr(forms, i, target)?;
                }
            }
        }

        out.push(Instruction::If {
            label,
            block_type,
            then_body,
            else_body,
        });
        Ok(i)
    }

    /// Folded instruction list: control forms, or a plain op whose
    /// trailing sub-lists are nested operand expressions emitted first.
    fn parse_folded(
        &mut self,
        items: &[SExpr],
        span: Span,
        out: &mut Vec<Instruction>,
    ) -> Result<(), CompileError> {
        let head = match items.first() {
            Some(head) => head,
            None => return Err(BuildError::new("empty instruction", span).into()),
        };
        let keyword = match head.keyword() {
            Some(keyword) => keyword.to_string(),
            None => return Err(BuildError::new("expected an instruction", head.span()).into()),
        };

        match keyword.as_str() {
            "block" | "loop" => {
                let mut i = 1;
                let label = items.get(i).and_then(SExpr::id).map(String::from);
                if label.is_some() {
                    i += 1;
                }
                let (block_type, ni) = self.block_type(items, i)?;
                let body = self.parse_instrs(&items[ni..])?;
                out.push(if keyword == "loop" {
                    Instruction::Loop {
                        label,
                        block_type,
                        body,
                    }
                } else {
                    Instruction::Block {
                        label,
                        block_type,
                        body,
                    }
                });
                Ok(())
            }
            "if" => self.parse_folded_if(items, span, out),
            "then" | "else" => {
                Err(BuildError::new(format!("misplaced '({keyword} …)'"), span).into())
            }
            _ => {
                let op = match opcodes::lookup(&keyword) {
                    Some(op) => op,
                    None => {
                        return Err(BuildError::new(
                            format!("unknown instruction '{keyword}'"),
                            head.span(),
                        )
                        .into())
                    }
                };
                let (operands, next) = self.parse_immediates(&keyword, op.imm, items, 1, span)?;
                // nested operand expressions push their results first
                for form in &items[next..] {
                    match form {
                        SExpr::List { items, span } => self.parse_folded(items, *span, out)?,
                        SExpr::Atom(token) => {
                            return Err(BuildError::new(
                                "unexpected token in folded instruction",
                                token.span,
                            )
                            .into())
                        }
                    }
                }
                out.push(Instruction::Plain {
                    name: keyword,
                    operands,
                });
                Ok(())
            }
        }
    }

    /// Folded `if`: condition expressions, then `(then …)`, optional
    /// `(else …)`. The condition encodes ahead of the `if` opcode.
    fn parse_folded_if(
        &mut self,
        items: &[SExpr],
        span: Span,
        out: &mut Vec<Instruction>,
    ) -> Result<(), CompileError> {
        let mut i = 1;
        let label = items.get(i).and_then(SExpr::id).map(String::from);
        if label.is_some() {
            i += 1;
        }
        let (block_type, ni) = self.block_type(items, i)?;
        i = ni;

        while let Some(form) = items.get(i) {
            if form.is_list_headed_by("then") || form.is_list_headed_by("else") {
                break;
            }
            match form {
                SExpr::List {
                    items: sub,
                    span: sub_span,
                } => self.parse_folded(sub, *sub_span, out)?,
                SExpr::Atom(token) => {
                    return Err(BuildError::new("expected (then …)", token.span).into())
                }
            }
            i += 1;
        }

        let then_body = match items.get(i) {
            Some(form) if form.is_list_headed_by("then") => {
                let sub = match form.as_list() {
                    Some(sub) => &sub[1..],
                    None => &[],
                };
                i += 1;
                self.parse_instrs(sub)?
            }
            _ => return Err(BuildError::new("folded if needs a (then …) arm", span).into()),
        };
        let else_body = match items.get(i) {
            Some(form) if form.is_list_headed_by("else") => {
                let sub = match form.as_list() {
                    Some(sub) => &sub[1..],
                    None => &[],
                };
                i += 1;
                Some(self.parse_instrs(sub)?)
            }
            _ => None,
        };
        if i < items.len() {
            return Err(BuildError::new("unexpected tokens after (else …)", span).into());
        }

        out.push(Instruction::If {
            label,
            block_type,
            then_body,
            else_body,
        });
        Ok(())
    }

    /// Optional `(result t)` marker of a structured instruction.
    fn block_type(
        &self,
        forms: &[SExpr],
        i: usize,
    ) -> Result<(BlockType, usize), CompileError> {
        let form = match forms.get(i) {
            Some(form) if form.is_list_headed_by("result") => form,
            _ => return Ok((BlockType::Empty, i)),
        };
        let items = match form.as_list() {
            Some(items) => items,
            None => return Ok((BlockType::Empty, i)),
        };
        match items.len() {
            1 => Ok((BlockType::Empty, i + 1)),
            2 => Ok((BlockType::Value(value_type(&items[1])?), i + 1)),
            _ => Err(BuildError::new(
                "multi-value block results are not supported",
                form.span(),
            )
            .into()),
        }
    }

    /// Parses the immediates the opcode table declares for `keyword`,
    /// starting at `forms[i]`; returns operands and the index after
    /// them.
    fn parse_immediates(
        &mut self,
        keyword: &str,
        imm: Imm,
        forms: &[SExpr],
        mut i: usize,
        span: Span,
    ) -> Result<(Vec<Operand>, usize), CompileError> {
        let operands = match imm {
            Imm::None | Imm::MemoryReserved => Vec::new(),
            Imm::Branch => {
                let target = match forms.get(i).and_then(branch_target) {
                    Some(target) => target,
                    None => {
                        return Err(
                            BuildError::new(format!("{keyword} needs a label"), span).into()
                        )
                    }
                };
                i += 1;
                vec![Operand::Target(target)]
            }
            Imm::BranchTable => {
                let mut targets = Vec::new();
                while let Some(target) = forms.get(i).and_then(branch_target) {
                    targets.push(target);
                    i += 1;
                }
                let default = match targets.pop() {
                    Some(default) => default,
                    None => {
                        return Err(BuildError::new(
                            "br_table needs at least one label",
                            span,
                        )
                        .into())
                    }
                };
                vec![Operand::BrTable { targets, default }]
            }
            Imm::FuncIndex => {
                let operand = index_ref(forms.get(i), Space::Func, keyword, span)?;
                i += 1;
                vec![operand]
            }
            Imm::LocalIndex => {
                let operand = index_ref(forms.get(i), Space::Local, keyword, span)?;
                i += 1;
                vec![operand]
            }
            Imm::GlobalIndex => {
                let operand = index_ref(forms.get(i), Space::Global, keyword, span)?;
                i += 1;
                vec![operand]
            }
            Imm::CallIndirect => {
                let (type_index, ni) = self.type_use(forms, i, None, span)?;
                i = ni;
                vec![Operand::Index(type_index)]
            }
            Imm::Mem { align: natural } => {
                let mut offset = 0;
                let mut align = natural;
                if let Some(value) = memarg_field(forms.get(i), "offset")? {
                    offset = value;
                    i += 1;
                }
                if let Some(value) = memarg_field(forms.get(i), "align")? {
                    if !value.is_power_of_two() {
                        return Err(BuildError::new(
                            format!("alignment must be a power of two, got {value}"),
                            span,
                        )
                        .into());
                    }
                    align = value.trailing_zeros();
                    i += 1;
                }
                vec![Operand::Mem { align, offset }]
            }
            Imm::I32 => {
                let token = number_token(forms.get(i), keyword, span)?;
                i += 1;
                vec![Operand::I32(parse_i32_text(&token.text, token.span)?)]
            }
            Imm::I64 => {
                let token = number_token(forms.get(i), keyword, span)?;
                i += 1;
                vec![Operand::I64(parse_i64_text(&token.text, token.span)?)]
            }
            Imm::F32 => {
                let token = float_token(forms.get(i), keyword, span)?;
                i += 1;
                vec![Operand::F32(parse_f32_text(&token.text, token.span)?)]
            }
            Imm::F64 => {
                let token = float_token(forms.get(i), keyword, span)?;
                i += 1;
                vec![Operand::F64(parse_f64_text(&token.text, token.span)?)]
            }
        };
        Ok((operands, i))
    }

    /// Consumes an optional trailing label id after `end`/`else`,
    /// which must repeat the construct's label.
    fn check_trailing_label(
        &self,
        forms: &[SExpr],
        i: usize,
        label: &Option<String>,
    ) -> Result<usize, CompileError> {
        match forms.get(i).and_then(SExpr::id) {
            Some(id) => {
                if label.as_deref() != Some(id) {
                    return Err(BuildError::new(
                        format!("label ${id} does not match the enclosing block"),
                        forms[i].span(),
                    )
                    .into());
                }
                Ok(i + 1)
            }
            None => Ok(i),
        }
    }
}

// ---------------------------------------------------------------------------
// Reference and literal parsing
// ---------------------------------------------------------------------------

/// Resolves a `$name` or numeric reference against a symbol table,
/// at build time.
fn resolve_ref(form: &SExpr, table: &SymbolTable) -> Result<u32, CompileError> {
    if let Some(id) = form.id() {
        return Ok(table.resolve(id)?);
    }
    match form.as_atom() {
        Some(token) if token.kind == TokenKind::Number => {
            Ok(parse_u32_text(&token.text, token.span)?)
        }
        _ => Err(BuildError::new("expected an index or $name", form.span()).into()),
    }
}

/// A `$name` or numeric index operand, left symbolic for encode-time
/// resolution.
fn index_ref(
    form: Option<&SExpr>,
    space: Space,
    keyword: &str,
    span: Span,
) -> Result<Operand, CompileError> {
    let form = match form {
        Some(form) => form,
        None => return Err(BuildError::new(format!("{keyword} needs an index"), span).into()),
    };
    if let Some(id) = form.id() {
        return Ok(Operand::Name(space, id.to_string()));
    }
    match form.as_atom() {
        Some(token) if token.kind == TokenKind::Number => {
            Ok(Operand::Index(parse_u32_text(&token.text, token.span)?))
        }
        _ => Err(BuildError::new(format!("{keyword} needs an index"), form.span()).into()),
    }
}

fn branch_target(form: &SExpr) -> Option<BranchTarget> {
    if let Some(id) = form.id() {
        return Some(BranchTarget::Label(id.to_string()));
    }
    match form.as_atom() {
        Some(token) if token.kind == TokenKind::Number => {
            parse_u32_text(&token.text, token.span)
                .ok()
                .map(BranchTarget::Depth)
        }
        _ => None,
    }
}

/// Matches a `key=value` memarg atom, returning its value.
fn memarg_field(form: Option<&SExpr>, key: &str) -> Result<Option<u32>, CompileError> {
    let token = match form.and_then(SExpr::as_atom) {
        Some(token) => token,
        None => return Ok(None),
    };
    let value = match token.text.strip_prefix(key).and_then(|r| r.strip_prefix('=')) {
        Some(value) => value,
        None => return Ok(None),
    };
    Ok(Some(parse_u32_text(value, token.span)?))
}

fn number_token<'f>(
    form: Option<&'f SExpr>,
    keyword: &str,
    span: Span,
) -> Result<&'f Token, CompileError> {
    match form.and_then(SExpr::as_atom) {
        Some(token) if token.kind == TokenKind::Number => Ok(token),
        _ => Err(BuildError::new(format!("{keyword} needs an integer constant"), span).into()),
    }
}

/// Float constants also admit `inf`/`nan` atoms.
fn float_token<'f>(
    form: Option<&'f SExpr>,
    keyword: &str,
    span: Span,
) -> Result<&'f Token, CompileError> {
    match form.and_then(SExpr::as_atom) {
        Some(token)
            if token.kind == TokenKind::Number
                || (token.kind == TokenKind::Atom && !token.text.starts_with('$')) =>
        {
            Ok(token)
        }
        _ => Err(BuildError::new(format!("{keyword} needs a float constant"), span).into()),
    }
}

fn value_type(form: &SExpr) -> Result<ValueType, CompileError> {
    form.keyword()
        .and_then(ValueType::from_keyword)
        .ok_or_else(|| BuildError::new("expected a value type", form.span()).into())
}

fn parse_u32_text(text: &str, span: Span) -> Result<u32, BuildError> {
    let cleaned = text.replace('_', "");
    let parsed = match cleaned.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|_| BuildError::new(format!("invalid integer '{text}'"), span))
}

/// Splits the sign and parses the magnitude, honoring hex and digit
/// separators.
fn parse_int_magnitude(text: &str, span: Span) -> Result<(bool, u64), BuildError> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let cleaned = body.replace('_', "");
    let parsed = match cleaned.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed
        .map(|magnitude| (negative, magnitude))
        .map_err(|_| BuildError::new(format!("invalid integer '{text}'"), span))
}

/// An `i32.const` literal admits the union of the i32 and u32 ranges;
/// values above `i32::MAX` wrap to their two's-complement reading.
fn parse_i32_text(text: &str, span: Span) -> Result<i32, BuildError> {
    match parse_int_magnitude(text, span)? {
        (false, magnitude) if magnitude <= u64::from(u32::MAX) => Ok(magnitude as u32 as i32),
        (true, magnitude) if magnitude <= 1 << 31 => Ok((magnitude as i64).wrapping_neg() as i32),
        _ => Err(BuildError::new(
            format!("i32 constant out of range '{text}'"),
            span,
        )),
    }
}

fn parse_i64_text(text: &str, span: Span) -> Result<i64, BuildError> {
    match parse_int_magnitude(text, span)? {
        (false, magnitude) => Ok(magnitude as i64),
        (true, magnitude) if magnitude <= 1 << 63 => {
            Ok((magnitude as i128).wrapping_neg() as i64)
        }
        _ => Err(BuildError::new(
            format!("i64 constant out of range '{text}'"),
            span,
        )),
    }
}

fn parse_f32_text(text: &str, span: Span) -> Result<f32, BuildError> {
    let (negative, body) = split_float_sign(text);
    let value = if body == "inf" {
        f32::INFINITY
    } else if body == "nan" {
        f32::NAN
    } else if let Some(payload) = body.strip_prefix("nan:0x") {
        let bits = u32::from_str_radix(&payload.replace('_', ""), 16)
            .map_err(|_| BuildError::new(format!("invalid NaN payload '{text}'"), span))?;
        if bits == 0 || bits >> 23 != 0 {
            return Err(BuildError::new(format!("invalid NaN payload '{text}'"), span));
        }
        f32::from_bits(0x7f80_0000 | bits)
    } else if body.starts_with("0x") {
        f32::from_hex(&body)
            .ok_or_else(|| BuildError::new(format!("invalid float '{text}'"), span))?
    } else {
        body.parse::<f32>()
            .map_err(|_| BuildError::new(format!("invalid float '{text}'"), span))?
    };
    Ok(if negative { -value } else { value })
}

fn parse_f64_text(text: &str, span: Span) -> Result<f64, BuildError> {
    let (negative, body) = split_float_sign(text);
    let value = if body == "inf" {
        f64::INFINITY
    } else if body == "nan" {
        f64::NAN
    } else if let Some(payload) = body.strip_prefix("nan:0x") {
        let bits = u64::from_str_radix(&payload.replace('_', ""), 16)
            .map_err(|_| BuildError::new(format!("invalid NaN payload '{text}'"), span))?;
        if bits == 0 || bits >> 52 != 0 {
            return Err(BuildError::new(format!("invalid NaN payload '{text}'"), span));
        }
        f64::from_bits(0x7ff0_0000_0000_0000 | bits)
    } else if body.starts_with("0x") {
        f64::from_hex(&body)
            .ok_or_else(|| BuildError::new(format!("invalid float '{text}'"), span))?
    } else {
        body.parse::<f64>()
            .map_err(|_| BuildError::new(format!("invalid float '{text}'"), span))?
    };
    Ok(if negative { -value } else { value })
}

fn split_float_sign(text: &str) -> (bool, String) {
    let (negative, body) = match text.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    (negative, body.replace('_', ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{lexer::tokenize, sexpr::read};

    fn build_source(source: &str) -> Result<Module, CompileError> {
        build(&read(tokenize(source).unwrap()).unwrap())
    }

    fn expect_build_error(source: &str, substring: &str) {
        match build_source(source) {
            Err(CompileError::Build(err)) => assert!(
                err.to_string().contains(substring),
                "error {:?} should contain {:?}",
                err.to_string(),
                substring
            ),
            other => panic!("expected build error containing {substring:?}, got {other:?}"),
        }
    }

    #[test]
    fn empty_module() {
        let module = build_source("(module)").unwrap();
        assert!(module.types.is_empty());
        assert!(module.functions.is_empty());
        assert!(module.start.is_none());
    }

    #[test]
    fn module_name_is_accepted() {
        assert!(build_source("(module $m)").is_ok());
    }

    #[test]
    fn top_level_shape_enforced() {
        expect_build_error("", "expected a (module");
        expect_build_error("(func)", "expected a (module");
        expect_build_error("(module) (module)", "unexpected form after");
    }

    #[test]
    fn positional_indices_in_declaration_order() {
        let module = build_source(
            "(module
               (func $a)
               (func $b)
               (func $c))",
        )
        .unwrap();
        assert_eq!(module.symbols.funcs.resolve("a").unwrap(), 0);
        assert_eq!(module.symbols.funcs.resolve("b").unwrap(), 1);
        assert_eq!(module.symbols.funcs.resolve("c").unwrap(), 2);
    }

    #[test]
    fn imports_lead_their_index_space() {
        let module = build_source(
            "(module
               (import \"env\" \"log\" (func $log (param i32)))
               (func $main (call $log (i32.const 1))))",
        )
        .unwrap();
        assert_eq!(module.symbols.funcs.resolve("log").unwrap(), 0);
        assert_eq!(module.symbols.funcs.resolve("main").unwrap(), 1);
        assert_eq!(module.imports.len(), 1);
        assert_eq!(module.functions.len(), 1);
    }

    #[test]
    fn import_after_definition_rejected() {
        expect_build_error(
            "(module (func) (import \"a\" \"b\" (func)))",
            "imports must precede",
        );
    }

    #[test]
    fn inline_signatures_dedup_structurally() {
        let module = build_source(
            "(module
               (func $a (param i32) (result i32) local.get 0)
               (func $b (param i32) (result i32) local.get 0)
               (func $c (param f64)))",
        )
        .unwrap();
        assert_eq!(module.types.len(), 2);
        assert_eq!(module.functions[0].type_index, 0);
        assert_eq!(module.functions[1].type_index, 0);
        assert_eq!(module.functions[2].type_index, 1);
    }

    #[test]
    fn explicit_types_always_append() {
        let module = build_source(
            "(module
               (type (func (param i32)))
               (type (func (param i32))))",
        )
        .unwrap();
        assert_eq!(module.types.len(), 2);
    }

    #[test]
    fn type_use_by_name_resolves_forward() {
        let module = build_source(
            "(module
               (func $f (type $sig) local.get 0)
               (type $sig (func (param i32) (result i32))))",
        )
        .unwrap();
        assert_eq!(module.functions[0].type_index, 0);
    }

    #[test]
    fn inline_signature_must_match_referenced_type() {
        expect_build_error(
            "(module
               (type $sig (func (param i32)))
               (func (type $sig) (param f64)))",
            "does not match",
        );
    }

    #[test]
    fn named_params_and_locals_share_an_index_space() {
        let module = build_source(
            "(module
               (func $f (param $x i32) (param i64) (local $y f32)
                 local.get $y))",
        )
        .unwrap();
        let symbols = &module.functions[0].symbols;
        assert_eq!(symbols.resolve("x").unwrap(), 0);
        assert_eq!(symbols.resolve("y").unwrap(), 2);
        assert_eq!(module.functions[0].locals, vec![ValueType::F32]);
    }

    #[test]
    fn duplicate_param_name_rejected() {
        match build_source("(module (func (param $x i32) (param $x i32)))") {
            Err(CompileError::Symbol(err)) => {
                assert_eq!(err.to_string(), "duplicate local $x");
            }
            other => panic!("expected symbol error, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_function_name_rejected() {
        match build_source("(module (func $f) (func $f))") {
            Err(CompileError::Symbol(err)) => {
                assert_eq!(err.to_string(), "duplicate function $f");
            }
            other => panic!("expected symbol error, got {other:?}"),
        }
    }

    #[test]
    fn flat_body_parses() {
        let module = build_source(
            "(module (func (param i32) (result i32)
               local.get 0
               i32.const 1
               i32.add))",
        )
        .unwrap();
        let body = &module.functions[0].body;
        assert_eq!(body.len(), 3);
        assert_eq!(
            body[0],
            Instruction::Plain {
                name: "local.get".to_string(),
                operands: vec![Operand::Index(0)],
            }
        );
    }

    #[test]
    fn folded_body_emits_operands_first() {
        let module = build_source(
            "(module (func (result i32)
               (i32.add (i32.const 1) (i32.const 2))))",
        )
        .unwrap();
        let body = &module.functions[0].body;
        assert_eq!(body.len(), 3);
        assert!(matches!(&body[0], Instruction::Plain { name, .. } if name == "i32.const"));
        assert!(matches!(&body[2], Instruction::Plain { name, .. } if name == "i32.add"));
    }

    #[test]
    fn legacy_mnemonics_accepted() {
        let module = build_source(
            "(module (func (param i32) (result i32)
               get_local 0
               i32.wrap/i64 drop
               local.get 0))",
        );
        // i32.wrap/i64 is a known mnemonic even if ill-typed here;
        // typing is not checked
        assert!(module.is_ok());
    }

    #[test]
    fn unknown_instruction_rejected() {
        expect_build_error("(module (func i32.frobnicate))", "unknown instruction");
    }

    #[test]
    fn flat_block_requires_end() {
        expect_build_error("(module (func block nop))", "missing 'end'");
    }

    #[test]
    fn flat_if_with_else() {
        let module = build_source(
            "(module (func (param i32) (result i32)
               local.get 0
               if (result i32)
                 i32.const 1
               else
                 i32.const 2
               end))",
        )
        .unwrap();
        let body = &module.functions[0].body;
        match &body[1] {
            Instruction::If {
                block_type,
                then_body,
                else_body,
                ..
            } => {
                assert_eq!(*block_type, BlockType::Value(ValueType::I32));
                assert_eq!(then_body.len(), 1);
                assert_eq!(else_body.as_ref().unwrap().len(), 1);
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn trailing_end_label_must_match() {
        expect_build_error(
            "(module (func block $a nop end $b))",
            "does not match",
        );
        assert!(build_source("(module (func block $a nop end $a))").is_ok());
    }

    #[test]
    fn folded_if_condition_precedes() {
        let module = build_source(
            "(module (func (param i32)
               (if (local.get 0) (then nop) (else unreachable))))",
        )
        .unwrap();
        let body = &module.functions[0].body;
        assert!(matches!(&body[0], Instruction::Plain { name, .. } if name == "local.get"));
        assert!(matches!(&body[1], Instruction::If { .. }));
    }

    #[test]
    fn memarg_defaults_and_overrides() {
        let module = build_source(
            "(module (func (param i32)
               (i32.load (local.get 0))
               drop
               (i32.load offset=4 align=1 (local.get 0))
               drop))",
        )
        .unwrap();
        let body = &module.functions[0].body;
        match &body[1] {
            Instruction::Plain { operands, .. } => {
                assert_eq!(operands[0], Operand::Mem { align: 2, offset: 0 });
            }
            other => panic!("{other:?}"),
        }
        match &body[4] {
            Instruction::Plain { operands, .. } => {
                assert_eq!(operands[0], Operand::Mem { align: 0, offset: 4 });
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn alignment_must_be_power_of_two() {
        expect_build_error(
            "(module (func (i32.load align=3 (i32.const 0)) drop))",
            "power of two",
        );
    }

    #[test]
    fn br_table_last_target_is_default() {
        let module = build_source(
            "(module (func (param i32)
               block block
               local.get 0
               br_table 0 1 0
               end end))",
        )
        .unwrap();
        fn find_br_table(instrs: &[Instruction]) -> Option<&Operand> {
            for instr in instrs {
                match instr {
                    Instruction::Plain { name, operands } if name == "br_table" => {
                        return operands.first()
                    }
                    Instruction::Block { body, .. } | Instruction::Loop { body, .. } => {
                        if let Some(found) = find_br_table(body) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        match find_br_table(&module.functions[0].body).unwrap() {
            Operand::BrTable { targets, default } => {
                assert_eq!(
                    targets,
                    &[BranchTarget::Depth(0), BranchTarget::Depth(1)]
                );
                assert_eq!(*default, BranchTarget::Depth(0));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn constants_parse_signs_hex_and_underscores() {
        let module = build_source(
            "(module (func
               i32.const -1 drop
               i32.const 0xFFFFFFFF drop
               i32.const 1_000_000 drop
               i64.const -0x8000000000000000 drop
               f32.const -inf drop
               f64.const nan:0x8000000000000 drop
               f64.const 0x1.8p3 drop))",
        )
        .unwrap();
        let body = &module.functions[0].body;
        let operand = |i: usize| match &body[i] {
            Instruction::Plain { operands, .. } => operands[0].clone(),
            other => panic!("{other:?}"),
        };
        assert_eq!(operand(0), Operand::I32(-1));
        assert_eq!(operand(2), Operand::I32(-1)); // 0xFFFFFFFF wraps
        assert_eq!(operand(4), Operand::I32(1_000_000));
        assert_eq!(operand(6), Operand::I64(i64::MIN));
        assert_eq!(operand(8), Operand::F32(f32::NEG_INFINITY));
        match operand(10) {
            Operand::F64(v) => assert!(v.is_nan()),
            other => panic!("{other:?}"),
        }
        assert_eq!(operand(12), Operand::F64(12.0));
    }

    #[test]
    fn integer_out_of_range() {
        expect_build_error("(module (func i32.const 4294967296))", "out of range");
        expect_build_error("(module (func i32.const -2147483649))", "out of range");
    }

    #[test]
    fn exports_resolve_forward_references() {
        let module = build_source(
            "(module
               (export \"run\" (func $later))
               (func $later))",
        )
        .unwrap();
        assert_eq!(module.exports[0].index, 0);
        assert_eq!(module.exports[0].kind, ExportKind::Func);
        assert_eq!(module.exports[0].name, "run");
    }

    #[test]
    fn inline_exports_bind_the_current_index() {
        let module = build_source(
            "(module
               (func $a)
               (func (export \"b\") (export \"b2\"))
               (memory (export \"mem\") 1)
               (global (export \"g\") i32 (i32.const 0)))",
        )
        .unwrap();
        assert_eq!(module.exports.len(), 4);
        assert_eq!(module.exports[0].index, 1);
        assert_eq!(module.exports[1].index, 1);
        assert_eq!(module.exports[2].kind, ExportKind::Memory);
        assert_eq!(module.exports[3].kind, ExportKind::Global);
    }

    #[test]
    fn undefined_export_target() {
        match build_source("(module (export \"x\" (func $nope)))") {
            Err(CompileError::Symbol(err)) => {
                assert_eq!(err.to_string(), "undefined function $nope");
            }
            other => panic!("expected symbol error, got {other:?}"),
        }
    }

    #[test]
    fn start_forward_reference_and_duplication() {
        let module = build_source("(module (start $main) (func $main))").unwrap();
        assert_eq!(module.start, Some(0));
        expect_build_error(
            "(module (func) (start 0) (start 0))",
            "multiple start sections",
        );
        expect_build_error("(module (func) (start 7))", "out of range");
    }

    #[test]
    fn tables_memories_globals() {
        let module = build_source(
            "(module
               (table 1 10 funcref)
               (memory 2)
               (global $g (mut i32) (i32.const 42)))",
        )
        .unwrap();
        assert_eq!(
            module.tables[0],
            Limits {
                min: 1,
                max: Some(10)
            }
        );
        assert_eq!(module.memories[0], Limits { min: 2, max: None });
        assert!(module.globals[0].ty.mutable);
        assert_eq!(module.globals[0].ty.value_type, ValueType::I32);
        assert_eq!(module.globals[0].init.len(), 1);
    }

    #[test]
    fn at_most_one_table_and_memory() {
        expect_build_error("(module (memory 1) (memory 1))", "multiple memories");
        expect_build_error(
            "(module (table 1 funcref) (table 1 funcref))",
            "multiple tables",
        );
        expect_build_error(
            "(module (import \"env\" \"mem\" (memory 1)) (memory 1))",
            "multiple memories",
        );
        expect_build_error(
            "(module (table 1 funcref) (import \"env\" \"tbl\" (table 1 funcref)))",
            "multiple tables",
        );
    }

    #[test]
    fn legacy_anyfunc_accepted() {
        assert!(build_source("(module (table 1 anyfunc))").is_ok());
    }

    #[test]
    fn elem_and_data_segments() {
        let module = build_source(
            "(module
               (table 2 funcref)
               (memory 1)
               (func $f)
               (elem (i32.const 0) $f 0)
               (data (i32.const 8) \"ab\" \"cd\"))",
        )
        .unwrap();
        assert_eq!(module.elements[0].table_index, 0);
        assert_eq!(module.elements[0].funcs, vec![0, 0]);
        assert_eq!(module.data[0].bytes, b"abcd");
        assert_eq!(module.data[0].memory_index, 0);
    }

    #[test]
    fn call_indirect_type_use() {
        let module = build_source(
            "(module
               (type $sig (func (param i32) (result i32)))
               (table 1 funcref)
               (func (param i32) (result i32)
                 (call_indirect (type $sig) (local.get 0) (i32.const 0))))",
        )
        .unwrap();
        let body = &module.functions[0].body;
        match body.last().unwrap() {
            Instruction::Plain { name, operands } => {
                assert_eq!(name, "call_indirect");
                assert_eq!(operands[0], Operand::Index(0));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn unknown_field_rejected() {
        expect_build_error("(module (widget))", "unknown module field 'widget'");
    }

    #[test]
    fn inline_import_and_body_conflict() {
        expect_build_error(
            "(module (func $f (import \"a\" \"b\") nop))",
            "cannot have a body",
        );
    }
}
