//! Static mnemonic table for the WebAssembly MVP instruction set.
//!
//! One entry per mnemonic: the opcode byte and the shape of its
//! immediates. The same table drives both operand parsing in the
//! builder and immediate encoding in the instruction encoder, so a new
//! mnemonic is a single added line.
//!
//! Structured control (`block`, `loop`, `if`, `else`, `end`) is not
//! listed here; those keywords delimit nested instruction sequences
//! and are handled structurally.

use once_cell::sync::Lazy;
use std::collections::HashMap;

// Structured control opcodes.
pub const OP_BLOCK: u8 = 0x02;
pub const OP_LOOP: u8 = 0x03;
pub const OP_IF: u8 = 0x04;
pub const OP_ELSE: u8 = 0x05;
pub const OP_END: u8 = 0x0b;

/// Block type marker for a block producing no value.
pub const BLOCK_TYPE_EMPTY: u8 = 0x40;

/// The immediate shape of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imm {
    /// No immediates.
    None,
    /// One branch target, a relative label depth.
    Branch,
    /// `br_table`: one-or-more targets, the last being the default.
    BranchTable,
    /// One function index.
    FuncIndex,
    /// One local index (params first, then locals).
    LocalIndex,
    /// One global index.
    GlobalIndex,
    /// `call_indirect`: a type use, then the reserved table byte.
    CallIndirect,
    /// Memory access: align (log2, with the natural default) then
    /// offset.
    Mem { align: u32 },
    /// `memory.size` / `memory.grow`: one reserved zero byte.
    MemoryReserved,
    /// One signed 32-bit constant.
    I32,
    /// One signed 64-bit constant.
    I64,
    /// One 32-bit float constant.
    F32,
    /// One 64-bit float constant.
    F64,
}

/// A table entry: opcode byte plus immediate shape.
#[derive(Debug, Clone, Copy)]
pub struct Op {
    pub code: u8,
    pub imm: Imm,
}

/// Looks up a mnemonic, canonical or legacy.
pub fn lookup(name: &str) -> Option<&'static Op> {
    OPS.get(name)
}

static OPS: Lazy<HashMap<&'static str, Op>> = Lazy::new(|| {
    use Imm as I;

    #[rustfmt::skip]
    let entries: &[(&str, u8, Imm)] = &[
        // Control
        ("unreachable",         0x00, I::None),
        ("nop",                 0x01, I::None),
        ("br",                  0x0c, I::Branch),
        ("br_if",               0x0d, I::Branch),
        ("br_table",            0x0e, I::BranchTable),
        ("return",              0x0f, I::None),
        ("call",                0x10, I::FuncIndex),
        ("call_indirect",       0x11, I::CallIndirect),
        // Parametric
        ("drop",                0x1a, I::None),
        ("select",              0x1b, I::None),
        // Variable
        ("local.get",           0x20, I::LocalIndex),
        ("local.set",           0x21, I::LocalIndex),
        ("local.tee",           0x22, I::LocalIndex),
        ("global.get",          0x23, I::GlobalIndex),
        ("global.set",          0x24, I::GlobalIndex),
        // Memory
        ("i32.load",            0x28, I::Mem { align: 2 }),
        ("i64.load",            0x29, I::Mem { align: 3 }),
        ("f32.load",            0x2a, I::Mem { align: 2 }),
        ("f64.load",            0x2b, I::Mem { align: 3 }),
        ("i32.load8_s",         0x2c, I::Mem { align: 0 }),
        ("i32.load8_u",         0x2d, I::Mem { align: 0 }),
        ("i32.load16_s",        0x2e, I::Mem { align: 1 }),
        ("i32.load16_u",        0x2f, I::Mem { align: 1 }),
        ("i64.load8_s",         0x30, I::Mem { align: 0 }),
        ("i64.load8_u",         0x31, I::Mem { align: 0 }),
        ("i64.load16_s",        0x32, I::Mem { align: 1 }),
        ("i64.load16_u",        0x33, I::Mem { align: 1 }),
        ("i64.load32_s",        0x34, I::Mem { align: 2 }),
        ("i64.load32_u",        0x35, I::Mem { align: 2 }),
        ("i32.store",           0x36, I::Mem { align: 2 }),
        ("i64.store",           0x37, I::Mem { align: 3 }),
        ("f32.store",           0x38, I::Mem { align: 2 }),
        ("f64.store",           0x39, I::Mem { align: 3 }),
        ("i32.store8",          0x3a, I::Mem { align: 0 }),
        ("i32.store16",         0x3b, I::Mem { align: 1 }),
        ("i64.store8",          0x3c, I::Mem { align: 0 }),
        ("i64.store16",         0x3d, I::Mem { align: 1 }),
        ("i64.store32",         0x3e, I::Mem { align: 2 }),
        ("memory.size",         0x3f, I::MemoryReserved),
        ("memory.grow",         0x40, I::MemoryReserved),
        // Constants
        ("i32.const",           0x41, I::I32),
        ("i64.const",           0x42, I::I64),
        ("f32.const",           0x43, I::F32),
        ("f64.const",           0x44, I::F64),
        // i32 comparison
        ("i32.eqz",             0x45, I::None),
        ("i32.eq",              0x46, I::None),
        ("i32.ne",              0x47, I::None),
        ("i32.lt_s",            0x48, I::None),
        ("i32.lt_u",            0x49, I::None),
        ("i32.gt_s",            0x4a, I::None),
        ("i32.gt_u",            0x4b, I::None),
        ("i32.le_s",            0x4c, I::None),
        ("i32.le_u",            0x4d, I::None),
        ("i32.ge_s",            0x4e, I::None),
        ("i32.ge_u",            0x4f, I::None),
        // i64 comparison
        ("i64.eqz",             0x50, I::None),
        ("i64.eq",              0x51, I::None),
        ("i64.ne",              0x52, I::None),
        ("i64.lt_s",            0x53, I::None),
        ("i64.lt_u",            0x54, I::None),
        ("i64.gt_s",            0x55, I::None),
        ("i64.gt_u",            0x56, I::None),
        ("i64.le_s",            0x57, I::None),
        ("i64.le_u",            0x58, I::None),
        ("i64.ge_s",            0x59, I::None),
        ("i64.ge_u",            0x5a, I::None),
        // f32 comparison
        ("f32.eq",              0x5b, I::None),
        ("f32.ne",              0x5c, I::None),
        ("f32.lt",              0x5d, I::None),
        ("f32.gt",              0x5e, I::None),
        ("f32.le",              0x5f, I::None),
        ("f32.ge",              0x60, I::None),
        // f64 comparison
        ("f64.eq",              0x61, I::None),
        ("f64.ne",              0x62, I::None),
        ("f64.lt",              0x63, I::None),
        ("f64.gt",              0x64, I::None),
        ("f64.le",              0x65, I::None),
        ("f64.ge",              0x66, I::None),
        // i32 arithmetic
        ("i32.clz",             0x67, I::None),
        ("i32.ctz",             0x68, I::None),
        ("i32.popcnt",          0x69, I::None),
        ("i32.add",             0x6a, I::None),
        ("i32.sub",             0x6b, I::None),
        ("i32.mul",             0x6c, I::None),
        ("i32.div_s",           0x6d, I::None),
        ("i32.div_u",           0x6e, I::None),
        ("i32.rem_s",           0x6f, I::None),
        ("i32.rem_u",           0x70, I::None),
        ("i32.and",             0x71, I::None),
        ("i32.or",              0x72, I::None),
        ("i32.xor",             0x73, I::None),
        ("i32.shl",             0x74, I::None),
        ("i32.shr_s",           0x75, I::None),
        ("i32.shr_u",           0x76, I::None),
        ("i32.rotl",            0x77, I::None),
        ("i32.rotr",            0x78, I::None),
        // i64 arithmetic
        ("i64.clz",             0x79, I::None),
        ("i64.ctz",             0x7a, I::None),
        ("i64.popcnt",          0x7b, I::None),
        ("i64.add",             0x7c, I::None),
        ("i64.sub",             0x7d, I::None),
        ("i64.mul",             0x7e, I::None),
        ("i64.div_s",           0x7f, I::None),
        ("i64.div_u",           0x80, I::None),
        ("i64.rem_s",           0x81, I::None),
        ("i64.rem_u",           0x82, I::None),
        ("i64.and",             0x83, I::None),
        ("i64.or",              0x84, I::None),
        ("i64.xor",             0x85, I::None),
        ("i64.shl",             0x86, I::None),
        ("i64.shr_s",           0x87, I::None),
        ("i64.shr_u",           0x88, I::None),
        ("i64.rotl",            0x89, I::None),
        ("i64.rotr",            0x8a, I::None),
        // f32 arithmetic
        ("f32.abs",             0x8b, I::None),
        ("f32.neg",             0x8c, I::None),
        ("f32.ceil",            0x8d, I::None),
        ("f32.floor",           0x8e, I::None),
        ("f32.trunc",           0x8f, I::None),
        ("f32.nearest",         0x90, I::None),
        ("f32.sqrt",            0x91, I::None),
        ("f32.add",             0x92, I::None),
        ("f32.sub",             0x93, I::None),
        ("f32.mul",             0x94, I::None),
        ("f32.div",             0x95, I::None),
        ("f32.min",             0x96, I::None),
        ("f32.max",             0x97, I::None),
        ("f32.copysign",        0x98, I::None),
        // f64 arithmetic
        ("f64.abs",             0x99, I::None),
        ("f64.neg",             0x9a, I::None),
        ("f64.ceil",            0x9b, I::None),
        ("f64.floor",           0x9c, I::None),
        ("f64.trunc",           0x9d, I::None),
        ("f64.nearest",         0x9e, I::None),
        ("f64.sqrt",            0x9f, I::None),
        ("f64.add",             0xa0, I::None),
        ("f64.sub",             0xa1, I::None),
        ("f64.mul",             0xa2, I::None),
        ("f64.div",             0xa3, I::None),
        ("f64.min",             0xa4, I::None),
        ("f64.max",             0xa5, I::None),
        ("f64.copysign",        0xa6, I::None),
        // Conversions
        ("i32.wrap_i64",        0xa7, I::None),
        ("i32.trunc_f32_s",     0xa8, I::None),
        ("i32.trunc_f32_u",     0xa9, I::None),
        ("i32.trunc_f64_s",     0xaa, I::None),
        ("i32.trunc_f64_u",     0xab, I::None),
        ("i64.extend_i32_s",    0xac, I::None),
        ("i64.extend_i32_u",    0xad, I::None),
        ("i64.trunc_f32_s",     0xae, I::None),
        ("i64.trunc_f32_u",     0xaf, I::None),
        ("i64.trunc_f64_s",     0xb0, I::None),
        ("i64.trunc_f64_u",     0xb1, I::None),
        ("f32.convert_i32_s",   0xb2, I::None),
        ("f32.convert_i32_u",   0xb3, I::None),
        ("f32.convert_i64_s",   0xb4, I::None),
        ("f32.convert_i64_u",   0xb5, I::None),
        ("f32.demote_f64",      0xb6, I::None),
        ("f64.convert_i32_s",   0xb7, I::None),
        ("f64.convert_i32_u",   0xb8, I::None),
        ("f64.convert_i64_s",   0xb9, I::None),
        ("f64.convert_i64_u",   0xba, I::None),
        ("f64.promote_f32",     0xbb, I::None),
        ("i32.reinterpret_f32", 0xbc, I::None),
        ("i64.reinterpret_f64", 0xbd, I::None),
        ("f32.reinterpret_i32", 0xbe, I::None),
        ("f64.reinterpret_i64", 0xbf, I::None),
    ];

    // Pre-standardization mnemonics still common in older sources.
    #[rustfmt::skip]
    let aliases: &[(&str, &str)] = &[
        ("get_local",           "local.get"),
        ("set_local",           "local.set"),
        ("tee_local",           "local.tee"),
        ("get_global",          "global.get"),
        ("set_global",          "global.set"),
        ("current_memory",      "memory.size"),
        ("grow_memory",         "memory.grow"),
        ("i32.wrap/i64",        "i32.wrap_i64"),
        ("i32.trunc_s/f32",     "i32.trunc_f32_s"),
        ("i32.trunc_u/f32",     "i32.trunc_f32_u"),
        ("i32.trunc_s/f64",     "i32.trunc_f64_s"),
        ("i32.trunc_u/f64",     "i32.trunc_f64_u"),
        ("i64.extend_s/i32",    "i64.extend_i32_s"),
        ("i64.extend_u/i32",    "i64.extend_i32_u"),
        ("i64.trunc_s/f32",     "i64.trunc_f32_s"),
        ("i64.trunc_u/f32",     "i64.trunc_f32_u"),
        ("i64.trunc_s/f64",     "i64.trunc_f64_s"),
        ("i64.trunc_u/f64",     "i64.trunc_f64_u"),
        ("f32.convert_s/i32",   "f32.convert_i32_s"),
        ("f32.convert_u/i32",   "f32.convert_i32_u"),
        ("f32.convert_s/i64",   "f32.convert_i64_s"),
        ("f32.convert_u/i64",   "f32.convert_i64_u"),
        ("f32.demote/f64",      "f32.demote_f64"),
        ("f64.convert_s/i32",   "f64.convert_i32_s"),
        ("f64.convert_u/i32",   "f64.convert_i32_u"),
        ("f64.convert_s/i64",   "f64.convert_i64_s"),
        ("f64.convert_u/i64",   "f64.convert_i64_u"),
        ("f64.promote/f32",     "f64.promote_f32"),
        ("i32.reinterpret/f32", "i32.reinterpret_f32"),
        ("i64.reinterpret/f64", "i64.reinterpret_f64"),
        ("f32.reinterpret/i32", "f32.reinterpret_i32"),
        ("f64.reinterpret/i64", "f64.reinterpret_i64"),
    ];

    let mut map: HashMap<&'static str, Op> = entries
        .iter()
        .map(|&(name, code, imm)| (name, Op { code, imm }))
        .collect();
    for &(alias, canonical) in aliases {
        let op = map[canonical];
        map.insert(alias, op);
    }
    map
});
