//! End-to-end compilation tests: full source in, exact bytes out.
//!
//! Expected binaries were checked against the reference toolchain
//! (wat2wasm) output for the same source.

#[cfg(test)]
mod tests {
    use watc::{compile, CompileError, EncodeError};

    // =======================================================================
    // Helpers
    // =======================================================================

    /// Compiles and asserts the exact output bytes, given as hex.
    fn assert_compiles_to(source: &str, expected_hex: &str) {
        let bytes = compile(source).unwrap_or_else(|e| panic!("compile failed: {e}"));
        assert_eq!(
            hex::encode(&bytes),
            expected_hex,
            "unexpected binary for {source:?}"
        );
    }

    // =======================================================================
    // Structural edge cases
    // =======================================================================

    #[test]
    fn empty_module_is_eight_bytes() {
        let bytes = compile("(module)").unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..4], b"\0asm");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
    }

    #[test]
    fn comments_and_whitespace_are_insignificant() {
        let plain = compile("(module (func))").unwrap();
        let noisy = compile(
            ";; leading line comment
             (module
               (; block (; nested ;) comment ;)
               (func)
             )",
        )
        .unwrap();
        assert_eq!(plain, noisy);
    }

    #[test]
    fn output_is_deterministic() {
        let source = r#"(module
            (memory (export "mem") 1)
            (func (export "get") (param i32) (result i32)
              (i32.load (local.get 0)))
            (data (i32.const 0) "\00\01\02"))"#;
        assert_eq!(compile(source).unwrap(), compile(source).unwrap());
    }

    // =======================================================================
    // Known-good binaries
    // =======================================================================

    #[test]
    fn identity_function() {
        assert_compiles_to(
            "(module (func (param i32) (result i32) local.get 0))",
            "0061736d0100000001060160017f017f030201000a0601040020000b",
        );
    }

    #[test]
    fn legacy_mnemonics_share_the_encoding() {
        let modern = compile("(module (func (param i32) (result i32) local.get 0))").unwrap();
        let legacy = compile("(module (func (param i32) (result i32) get_local 0))").unwrap();
        assert_eq!(modern, legacy);
    }

    #[test]
    fn folded_and_flat_bodies_agree() {
        let flat = compile(
            "(module (func (param i32 i32) (result i32)
               local.get 0
               local.get 1
               i32.add))",
        )
        .unwrap();
        let folded = compile(
            "(module (func (param i32 i32) (result i32)
               (i32.add (local.get 0) (local.get 1))))",
        )
        .unwrap();
        assert_eq!(flat, folded);
    }

    #[test]
    fn import_and_call_by_name() {
        assert_compiles_to(
            r#"(module
                 (import "env" "log" (func $log))
                 (func (export "run") (call $log)))"#,
            "0061736d01000000010401600000020b0103656e76036c6f67000003020100\
             0707010372756e00010a0601040010000b",
        );
    }

    #[test]
    fn block_label_branch() {
        assert_compiles_to(
            "(module (func (block $out (br $out))))",
            "0061736d01000000010401600000030201000a0901070002400c000b0b",
        );
    }

    #[test]
    fn memory_and_data_segment() {
        assert_compiles_to(
            r#"(module (memory 1) (data (i32.const 8) "hi"))"#,
            "0061736d0100000005030100010b08010041080b026869",
        );
    }

    #[test]
    fn table_elem_and_call_indirect() {
        assert_compiles_to(
            "(module
               (table 1 funcref)
               (func $f)
               (elem (i32.const 0) $f)
               (func (call_indirect (type 0) (i32.const 0))))",
            "0061736d010000000104016000000303020000040401700001\
             0907010041000b01000a0c0202000b070041001100000b",
        );
    }

    #[test]
    fn integer_and_float_constants() {
        assert_compiles_to(
            "(module (func i64.const -1 drop f64.const 1 drop))",
            "0061736d01000000010401600000030201000a11010f00427f1a44000000000000f03f1a0b",
        );
    }

    #[test]
    fn start_and_global_sections() {
        assert_compiles_to(
            "(module
               (global $g i32 (i32.const 7))
               (func $main (drop (global.get $g)))
               (start $main))",
            "0061736d0100000001040160000003020100\
             0606017f0041070b080100\
             0a0701050023001a0b",
        );
    }

    // =======================================================================
    // Errors
    // =======================================================================

    #[test]
    fn unbalanced_parens_fail_to_parse() {
        match compile("(module (func (") {
            Err(CompileError::Parse(err)) => {
                assert!(err.to_string().contains("unclosed"), "{err}");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn unresolved_call_target_fails_at_encode() {
        match compile("(module (func (call $missing)))") {
            Err(CompileError::Encode(EncodeError::Symbol(err))) => {
                assert_eq!(err.to_string(), "undefined function $missing");
            }
            other => panic!("expected symbol error, got {other:?}"),
        }
    }

    #[test]
    fn build_errors_carry_a_position() {
        match compile("(module\n  (widget))") {
            Err(CompileError::Build(err)) => {
                assert_eq!(err.to_string(), "unknown module field 'widget' at 2:3");
            }
            other => panic!("expected build error, got {other:?}"),
        }
    }

    #[test]
    fn lex_errors_surface() {
        match compile("(module \"unterminated") {
            Err(CompileError::Lex(_)) => {}
            other => panic!("expected lex error, got {other:?}"),
        }
    }
}
