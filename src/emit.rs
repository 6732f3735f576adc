//! Binary emission: serializes a [`Module`] into the WebAssembly
//! binary format.
//!
//! Sections are emitted in ascending id order and omitted entirely
//! when empty, so an empty module is exactly the eight-byte preamble.
//! Every section body is a count-prefixed vector wrapped in a
//! length-prefixed envelope.

use crate::encoding::{write_u8vec, write_vu32};
use crate::error::CompileError;
use crate::instruction::{encode_expression, SymbolContext};
use crate::module::{ImportKind, Module, ValueType};

const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

const SECTION_TYPE: u8 = 1;
const SECTION_IMPORT: u8 = 2;
const SECTION_FUNCTION: u8 = 3;
const SECTION_TABLE: u8 = 4;
const SECTION_MEMORY: u8 = 5;
const SECTION_GLOBAL: u8 = 6;
const SECTION_EXPORT: u8 = 7;
const SECTION_START: u8 = 8;
const SECTION_ELEMENT: u8 = 9;
const SECTION_CODE: u8 = 10;
const SECTION_DATA: u8 = 11;

const TYPE_FUNC: u8 = 0x60;
const ELEM_TYPE_FUNCREF: u8 = 0x70;

const IMPORT_DESC_FUNC: u8 = 0x00;
const IMPORT_DESC_TABLE: u8 = 0x01;
const IMPORT_DESC_MEMORY: u8 = 0x02;
const IMPORT_DESC_GLOBAL: u8 = 0x03;

/// Serializes the module. Symbolic instruction operands resolve here;
/// an unresolved name surfaces as an error.
pub fn emit(module: &Module) -> Result<Vec<u8>, CompileError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION);

    emit_type_section(module, &mut buf);
    emit_import_section(module, &mut buf);
    emit_function_section(module, &mut buf);
    emit_table_section(module, &mut buf);
    emit_memory_section(module, &mut buf);
    emit_global_section(module, &mut buf)?;
    emit_export_section(module, &mut buf);
    emit_start_section(module, &mut buf);
    emit_element_section(module, &mut buf)?;
    emit_code_section(module, &mut buf)?;
    emit_data_section(module, &mut buf)?;

    Ok(buf)
}

/// Wraps section contents in the id byte and a length prefix.
fn emit_section(buf: &mut Vec<u8>, id: u8, contents: &[u8]) {
    buf.push(id);
    write_vu32(buf, contents.len() as u32);
    buf.extend_from_slice(contents);
}

// ---------------------------------------------------------------------------
// Sections, in id order
// ---------------------------------------------------------------------------

fn emit_type_section(module: &Module, buf: &mut Vec<u8>) {
    if module.types.is_empty() {
        return;
    }
    let mut contents = Vec::new();
    write_vu32(&mut contents, module.types.len() as u32);
    for ty in &module.types {
        contents.push(TYPE_FUNC);
        write_value_types(&mut contents, &ty.params);
        write_value_types(&mut contents, &ty.results);
    }
    emit_section(buf, SECTION_TYPE, &contents);
}

fn emit_import_section(module: &Module, buf: &mut Vec<u8>) {
    if module.imports.is_empty() {
        return;
    }
    let mut contents = Vec::new();
    write_vu32(&mut contents, module.imports.len() as u32);
    for import in &module.imports {
        write_u8vec(&mut contents, import.module.as_bytes());
        write_u8vec(&mut contents, import.name.as_bytes());
        match &import.kind {
            ImportKind::Func { type_index } => {
                contents.push(IMPORT_DESC_FUNC);
                write_vu32(&mut contents, *type_index);
            }
            ImportKind::Table(limits) => {
                contents.push(IMPORT_DESC_TABLE);
                contents.push(ELEM_TYPE_FUNCREF);
                write_limits(&mut contents, limits.min, limits.max);
            }
            ImportKind::Memory(limits) => {
                contents.push(IMPORT_DESC_MEMORY);
                write_limits(&mut contents, limits.min, limits.max);
            }
            ImportKind::Global(ty) => {
                contents.push(IMPORT_DESC_GLOBAL);
                contents.push(ty.value_type.wire());
                contents.push(ty.mutable as u8);
            }
        }
    }
    emit_section(buf, SECTION_IMPORT, &contents);
}

fn emit_function_section(module: &Module, buf: &mut Vec<u8>) {
    if module.functions.is_empty() {
        return;
    }
    let mut contents = Vec::new();
    write_vu32(&mut contents, module.functions.len() as u32);
    for function in &module.functions {
        write_vu32(&mut contents, function.type_index);
    }
    emit_section(buf, SECTION_FUNCTION, &contents);
}

fn emit_table_section(module: &Module, buf: &mut Vec<u8>) {
    if module.tables.is_empty() {
        return;
    }
    let mut contents = Vec::new();
    write_vu32(&mut contents, module.tables.len() as u32);
    for limits in &module.tables {
        contents.push(ELEM_TYPE_FUNCREF);
        write_limits(&mut contents, limits.min, limits.max);
    }
    emit_section(buf, SECTION_TABLE, &contents);
}

fn emit_memory_section(module: &Module, buf: &mut Vec<u8>) {
    if module.memories.is_empty() {
        return;
    }
    let mut contents = Vec::new();
    write_vu32(&mut contents, module.memories.len() as u32);
    for limits in &module.memories {
        write_limits(&mut contents, limits.min, limits.max);
    }
    emit_section(buf, SECTION_MEMORY, &contents);
}

fn emit_global_section(module: &Module, buf: &mut Vec<u8>) -> Result<(), CompileError> {
    if module.globals.is_empty() {
        return Ok(());
    }
    let mut contents = Vec::new();
    write_vu32(&mut contents, module.globals.len() as u32);
    for global in &module.globals {
        contents.push(global.ty.value_type.wire());
        contents.push(global.ty.mutable as u8);
        let mut ctx = SymbolContext::new(&module.symbols);
        encode_expression(&global.init, &mut ctx, &mut contents)?;
    }
    emit_section(buf, SECTION_GLOBAL, &contents);
    Ok(())
}

fn emit_export_section(module: &Module, buf: &mut Vec<u8>) {
    if module.exports.is_empty() {
        return;
    }
    let mut contents = Vec::new();
    write_vu32(&mut contents, module.exports.len() as u32);
    for export in &module.exports {
        write_u8vec(&mut contents, export.name.as_bytes());
        contents.push(export.kind.wire());
        write_vu32(&mut contents, export.index);
    }
    emit_section(buf, SECTION_EXPORT, &contents);
}

fn emit_start_section(module: &Module, buf: &mut Vec<u8>) {
    let index = match module.start {
        Some(index) => index,
        None => return,
    };
    let mut contents = Vec::new();
    write_vu32(&mut contents, index);
    emit_section(buf, SECTION_START, &contents);
}

fn emit_element_section(module: &Module, buf: &mut Vec<u8>) -> Result<(), CompileError> {
    if module.elements.is_empty() {
        return Ok(());
    }
    let mut contents = Vec::new();
    write_vu32(&mut contents, module.elements.len() as u32);
    for element in &module.elements {
        write_vu32(&mut contents, element.table_index);
        let mut ctx = SymbolContext::new(&module.symbols);
        encode_expression(&element.offset, &mut ctx, &mut contents)?;
        write_vu32(&mut contents, element.funcs.len() as u32);
        for func in &element.funcs {
            write_vu32(&mut contents, *func);
        }
    }
    emit_section(buf, SECTION_ELEMENT, &contents);
    Ok(())
}

fn emit_code_section(module: &Module, buf: &mut Vec<u8>) -> Result<(), CompileError> {
    if module.functions.is_empty() {
        return Ok(());
    }
    let mut contents = Vec::new();
    write_vu32(&mut contents, module.functions.len() as u32);
    for function in &module.functions {
        let mut body = Vec::new();
        write_local_decls(&mut body, &function.locals);
        let mut ctx = SymbolContext::with_locals(&module.symbols, &function.symbols);
        encode_expression(&function.body, &mut ctx, &mut body)?;
        write_vu32(&mut contents, body.len() as u32);
        contents.extend_from_slice(&body);
    }
    emit_section(buf, SECTION_CODE, &contents);
    Ok(())
}

fn emit_data_section(module: &Module, buf: &mut Vec<u8>) -> Result<(), CompileError> {
    if module.data.is_empty() {
        return Ok(());
    }
    let mut contents = Vec::new();
    write_vu32(&mut contents, module.data.len() as u32);
    for data in &module.data {
        write_vu32(&mut contents, data.memory_index);
        let mut ctx = SymbolContext::new(&module.symbols);
        encode_expression(&data.offset, &mut ctx, &mut contents)?;
        write_u8vec(&mut contents, &data.bytes);
    }
    emit_section(buf, SECTION_DATA, &contents);
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared pieces
// ---------------------------------------------------------------------------

fn write_value_types(buf: &mut Vec<u8>, types: &[ValueType]) {
    write_vu32(buf, types.len() as u32);
    for ty in types {
        buf.push(ty.wire());
    }
}

fn write_limits(buf: &mut Vec<u8>, min: u32, max: Option<u32>) {
    match max {
        Some(max) => {
            buf.push(0x01);
            write_vu32(buf, min);
            write_vu32(buf, max);
        }
        None => {
            buf.push(0x00);
            write_vu32(buf, min);
        }
    }
}

/// Local declarations use run-length pairs: consecutive locals of one
/// type collapse to a single (count, type) entry.
fn write_local_decls(buf: &mut Vec<u8>, locals: &[ValueType]) {
    let mut runs: Vec<(u32, ValueType)> = Vec::new();
    for ty in locals {
        match runs.last_mut() {
            Some((count, last)) if last == ty => *count += 1,
            _ => runs.push((1, *ty)),
        }
    }
    write_vu32(buf, runs.len() as u32);
    for (count, ty) in runs {
        write_vu32(buf, count);
        buf.push(ty.wire());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Export, ExportKind, FuncType, Function, Limits};
    use crate::symbols::{Space, SymbolTable};

    fn wire(module: &Module) -> String {
        hex::encode(emit(module).unwrap())
    }

    #[test]
    fn empty_module_is_the_preamble() {
        assert_eq!(wire(&Module::new()), "0061736d01000000");
    }

    #[test]
    fn empty_sections_are_omitted() {
        let mut module = Module::new();
        module.memories.push(Limits { min: 1, max: None });
        // preamble, then only the memory section (id 5)
        assert_eq!(wire(&module), "0061736d010000000503010001");
    }

    #[test]
    fn sections_appear_in_id_order() {
        let mut module = Module::new();
        module.add_type(FuncType {
            params: vec![],
            results: vec![],
        });
        module.functions.push(Function {
            type_index: 0,
            locals: vec![],
            body: vec![],
            symbols: SymbolTable::new(Space::Local),
        });
        module.memories.push(Limits { min: 1, max: None });
        module.exports.push(Export {
            name: "f".to_string(),
            kind: ExportKind::Func,
            index: 0,
        });
        let bytes = emit(&module).unwrap();
        let ids: Vec<u8> = {
            let mut ids = Vec::new();
            let mut i = 8;
            while i < bytes.len() {
                ids.push(bytes[i]);
                let mut length = 0u32;
                let mut shift = 0;
                let mut j = i + 1;
                loop {
                    let byte = bytes[j];
                    j += 1;
                    length |= u32::from(byte & 0x7f) << shift;
                    shift += 7;
                    if byte & 0x80 == 0 {
                        break;
                    }
                }
                i = j + length as usize;
            }
            ids
        };
        assert_eq!(
            ids,
            vec![
                SECTION_TYPE,
                SECTION_FUNCTION,
                SECTION_MEMORY,
                SECTION_EXPORT,
                SECTION_CODE
            ]
        );
    }

    #[test]
    fn limits_flag_reflects_the_maximum() {
        let mut buf = Vec::new();
        write_limits(&mut buf, 1, None);
        assert_eq!(buf, vec![0x00, 0x01]);
        buf.clear();
        write_limits(&mut buf, 1, Some(0x100));
        assert_eq!(buf, vec![0x01, 0x01, 0x80, 0x02]);
    }

    #[test]
    fn local_declarations_run_length_compress() {
        let mut buf = Vec::new();
        write_local_decls(
            &mut buf,
            &[
                ValueType::I32,
                ValueType::I32,
                ValueType::F64,
                ValueType::I32,
            ],
        );
        assert_eq!(buf, vec![0x03, 0x02, 0x7f, 0x01, 0x7c, 0x01, 0x7f]);
    }

    #[test]
    fn minimal_function_body() {
        let mut module = Module::new();
        module.add_type(FuncType {
            params: vec![],
            results: vec![],
        });
        module.functions.push(Function {
            type_index: 0,
            locals: vec![],
            body: vec![],
            symbols: SymbolTable::new(Space::Local),
        });
        // code section: 1 entry, 2 bytes: no locals, end
        assert_eq!(
            wire(&module),
            "0061736d01000000010401600000030201000a040102000b"
        );
    }
}
