//! Binary encoding primitives for WebAssembly values.
//!
//! LEB128 variable-length integers (unsigned for indices and counts,
//! signed for integer constants), IEEE 754 little-endian floats, and
//! length-prefixed byte vectors. All encodings are minimal-length: the
//! shortest LEB128 form is always produced.
//!
//! Every function appends to a caller-provided `&mut Vec<u8>`.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io;

// ---------------------------------------------------------------------------
// Unsigned LEB128
// ---------------------------------------------------------------------------

/// Appends the unsigned LEB128 encoding of a u64 value to `buf`.
fn write_vu(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        byte |= 0x80;
        buf.push(byte);
    }
}

/// Appends the unsigned LEB128 encoding of a u32 value to `buf`.
pub fn write_vu32(buf: &mut Vec<u8>, v: u32) {
    write_vu(buf, u64::from(v));
}

/// Appends the unsigned LEB128 encoding of a u64 value to `buf`.
pub fn write_vu64(buf: &mut Vec<u8>, v: u64) {
    write_vu(buf, v);
}

// ---------------------------------------------------------------------------
// Signed LEB128
// ---------------------------------------------------------------------------

/// Appends the signed LEB128 encoding of an i64 value to `buf`.
///
/// Termination follows the two's-complement rule: stop once the
/// remaining value is all sign bits and the sign bit of the emitted
/// byte agrees with it.
fn write_vs(buf: &mut Vec<u8>, mut value: i64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if (value == 0 && (byte & 0x40) == 0) || (value == -1 && (byte & 0x40) != 0) {
            buf.push(byte);
            break;
        }
        byte |= 0x80;
        buf.push(byte);
    }
}

/// Appends the signed LEB128 encoding of an i32 value to `buf`.
pub fn write_vs32(buf: &mut Vec<u8>, v: i32) {
    write_vs(buf, i64::from(v));
}

/// Appends the signed LEB128 encoding of an i64 value to `buf`.
pub fn write_vs64(buf: &mut Vec<u8>, v: i64) {
    write_vs(buf, v);
}

// ---------------------------------------------------------------------------
// IEEE 754 floats (little-endian)
// ---------------------------------------------------------------------------

/// Appends the 4-byte little-endian IEEE 754 encoding of an f32 to `buf`.
pub fn write_f32(buf: &mut Vec<u8>, v: f32) {
    let mut bytes = [0u8; 4];
    let mut wtr = io::Cursor::new(&mut bytes[..]);
    wtr.write_f32::<LittleEndian>(v).unwrap();
    buf.extend_from_slice(&bytes);
}

/// Appends the 8-byte little-endian IEEE 754 encoding of an f64 to `buf`.
pub fn write_f64(buf: &mut Vec<u8>, v: f64) {
    let mut bytes = [0u8; 8];
    let mut wtr = io::Cursor::new(&mut bytes[..]);
    wtr.write_f64::<LittleEndian>(v).unwrap();
    buf.extend_from_slice(&bytes);
}

// ---------------------------------------------------------------------------
// Length-prefixed byte vector
// ---------------------------------------------------------------------------

/// Appends a length-prefixed byte vector (vu32 length + raw bytes) to `buf`.
pub fn write_u8vec(buf: &mut Vec<u8>, v: &[u8]) {
    write_vu32(buf, v.len() as u32);
    buf.extend_from_slice(v);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
