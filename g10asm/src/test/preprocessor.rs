use crate::lexer::{Lexer, TokenCache};
use crate::preprocessor::{Preprocessor, PreprocessorConfig};
use crate::preprocess_source;
use matches::assert_matches;

fn preprocess(source: &str) -> String {
    preprocess_source(source).unwrap()
}

fn preprocess_err(source: &str) -> String {
    preprocess_source(source).unwrap_err().message
}

fn preprocess_with_config(source: &str, config: PreprocessorConfig) -> Result<String, String> {
    let mut cache = TokenCache::new();
    let mut lexer = Lexer::new();
    lexer.load_from_string(source).unwrap();
    let mut preprocessor = Preprocessor::new(config, lexer, None, &mut cache);
    match preprocessor.run() {
        Ok(()) => {
            assert!(preprocessor.is_good());
            Ok(preprocessor.output().to_owned())
        }
        Err(error) => {
            assert!(!preprocessor.is_good());
            Err(error.message)
        }
    }
}

#[test]
fn plain_lines_pass_through() {
    let output = preprocess(".org 0x2000\nmain:\nLD L0, 0x42\n");
    assert_eq!(output, ".org 0x2000\nmain:\nLD L0,0x42\n");
}

#[test]
fn define_and_interpolation() {
    // Scenario: `.define SZ 4` and `.byte {SZ*2}` assembles a single 8.
    let output = preprocess(".define SZ 4\n.byte {SZ*2}\n");
    assert_eq!(output.trim(), ".byte 8");
}

#[test]
fn text_sub_macro_expands_in_stream() {
    let output = preprocess(".define COUNT 3\nLD L0, COUNT\n");
    assert_eq!(output.trim(), "LD L0,3");
}

#[test]
fn undef_removes_a_macro() {
    let error = preprocess_err(".define X 1\n.undef X\n.byte {X}\n");
    assert!(error.contains("unknown identifier"));
}

#[test]
fn undef_unknown_macro_is_an_error() {
    assert!(preprocess_err(".undef NOPE\n").contains("not defined"));
}

#[test]
fn purge_is_an_alias_of_undef() {
    let error = preprocess_err(".define X 1\n.purge X\n.byte {X}\n");
    assert!(error.contains("unknown identifier"));
}

#[test]
fn conditional_taken_branch_only() {
    // Scenario C: only the first branch's tokens survive.
    let output = preprocess(".if 1+1==2\nNOP\n.else\nHALT\n.endif\n");
    assert!(output.contains("NOP"));
    assert!(!output.contains("HALT"));
}

#[test]
fn conditional_else_branch() {
    let output = preprocess(".if 0\nNOP\n.else\nHALT\n.endif\n");
    assert!(!output.contains("NOP"));
    assert!(output.contains("HALT"));
}

#[test]
fn elif_chains_take_first_true_branch() {
    let output = preprocess(".if 0\nA:\n.elif 1\nB:\n.elif 1\nC:\n.else\nD:\n.endif\n");
    assert!(!output.contains("A:"));
    assert!(output.contains("B:"));
    assert!(!output.contains("C:"));
    assert!(!output.contains("D:"));
}

#[test]
fn nested_conditionals_respect_outer_inactive() {
    let output = preprocess(".if 0\n.if 1\nNOP\n.endif\n.else\nHALT\n.endif\n");
    assert!(!output.contains("NOP"));
    assert!(output.contains("HALT"));
}

#[test]
fn ifdef_and_ifndef() {
    let output = preprocess(".define X 1\n.ifdef X\nNOP\n.endif\n.ifndef X\nHALT\n.endif\n");
    assert!(output.contains("NOP"));
    assert!(!output.contains("HALT"));
}

#[test]
fn unterminated_conditional_is_an_error() {
    assert!(preprocess_err(".if 1\nNOP\n").contains("unterminated"));
}

#[test]
fn endif_without_if_is_an_error() {
    assert!(preprocess_err(".endif\n").contains("without a matching"));
}

#[test]
fn repeat_zero_emits_nothing() {
    let output = preprocess(".repeat 0\nNOP\n.endrepeat\n");
    assert!(!output.contains("NOP"));
}

#[test]
fn repeat_one_emits_once() {
    let output = preprocess(".repeat 1\nNOP\n.endrepeat\n");
    assert_eq!(output.matches("NOP").count(), 1);
}

#[test]
fn repeat_unrolls_body() {
    let output = preprocess(".rept 3\nNOP\n.endr\n");
    assert_eq!(output.matches("NOP").count(), 3);
}

#[test]
fn for_loop_rebinds_variable() {
    let output = preprocess(".for I = 0, 3\n.byte {I}\n.endfor\n");
    assert_eq!(output.trim(), ".byte 0\n.byte 1\n.byte 2");
}

#[test]
fn for_loop_with_step() {
    let output = preprocess(".for I = 0, 10, 4\n.byte {I}\n.endf\n");
    assert_eq!(output.trim(), ".byte 0\n.byte 4\n.byte 8");
}

#[test]
fn while_loop_reevaluates_condition() {
    let source = "\
.define LIMIT 3
.for I = 0, 1
.endfor
.while 0
NOP
.endwhile
";
    let output = preprocess(source);
    assert!(!output.contains("NOP"));
}

#[test]
fn while_loop_with_macro_condition() {
    // The loop variable macro changes each pass via .for; use a .repeat
    // inside .while driven by a redefinition instead.
    let output = preprocess(".while defined(GO) == 0\n.define GO 1\nNOP\n.endwhile\n");
    assert_eq!(output.matches("NOP").count(), 1);
}

#[test]
fn break_stops_innermost_loop() {
    let output = preprocess(".repeat 5\nNOP\n.break\n.endrepeat\n");
    assert_eq!(output.matches("NOP").count(), 1);
}

#[test]
fn continue_skips_rest_of_pass() {
    let output = preprocess(".for I = 0, 3\n.continue\n.byte {I}\n.endfor\n");
    assert!(!output.contains(".byte"));
}

#[test]
fn break_outside_loop_is_an_error() {
    assert!(preprocess_err(".break\n").contains("outside of a loop"));
}

#[test]
fn nested_loops_unroll_multiplicatively() {
    let output = preprocess(".repeat 2\n.repeat 3\nNOP\n.endrepeat\n.endrepeat\n");
    assert_eq!(output.matches("NOP").count(), 6);
}

#[test]
fn function_macro_with_parameters() {
    let source = "\
.macro LOAD(reg, value)
LD @reg, @value
.endm
LOAD(L0, 5)
";
    let output = preprocess(source);
    assert!(output.contains("LD L0,5"));
}

#[test]
fn function_macro_arity_is_checked() {
    let source = ".macro M(a)\n.byte @a\n.endm\nM(1, 2)\n";
    assert!(preprocess_err(source).contains("expects 1 argument"));
}

#[test]
fn variadic_macro_folds_surplus_arguments() {
    let source = "\
.macro BYTES(first, ...)
.byte @first
.endm
BYTES(1, 2, 3)
";
    // The surplus arguments fold into the last named parameter.
    let output = preprocess(&source.replace("@first", "@..."));
    // `@...` is not a named parameter; the body keeps it verbatim. The
    // meaningful check is on the named-parameter fold below.
    let _ = output;

    let folded = preprocess("\
.macro BYTES(list, ...)
.byte @list
.endm
BYTES(1, 2, 3)
");
    assert!(folded.contains(".byte 1,2,3"));
}

#[test]
fn recursive_macro_hits_depth_limit() {
    // Scenario E: a self-recursive macro dies at the recursion cap.
    let config = PreprocessorConfig {
        max_recursion_depth: 8,
        ..PreprocessorConfig::default()
    };
    let error =
        preprocess_with_config(".macro R()\nR()\n.endm\nR()\n", config).unwrap_err();
    assert!(error.contains("recursion depth"));
    assert!(error.contains("8"));
}

#[test]
fn pragma_adjusts_recursion_depth() {
    let source = ".pragma max_recursion_depth 4\n.macro R()\nR()\n.endm\nR()\n";
    let error = preprocess_err(source);
    assert!(error.contains("(4)"));
}

#[test]
fn string_interpolation() {
    let output = preprocess(".define NAME 7\n.byte strlen(\"value {NAME}\")\n");
    // "value 7" has 7 characters.
    assert!(output.contains("7"));
}

#[test]
fn identifier_adjacent_interpolation_concatenates() {
    let output = preprocess(".define N 2\nlabel_{N}_end:\n");
    assert!(output.contains("label_2_end:"));
}

#[test]
fn line_continuation_joins_lines() {
    let output = preprocess(".byte 1, \\\n2\n");
    assert_eq!(output.trim(), ".byte 1,2");
}

#[test]
fn info_and_warning_do_not_fail() {
    let output = preprocess(".info \"hello\"\n.warning \"careful\"\nNOP\n");
    assert!(output.contains("NOP"));
}

#[test]
fn error_directive_poisons_the_run() {
    let result = preprocess_source(".error \"bad\"\nNOP\n");
    assert_matches!(result, Err(_));
}

#[test]
fn fatal_aborts_immediately() {
    let error = preprocess_err(".fatal \"stop\"\n");
    assert!(error.contains("fatal"));
}

#[test]
fn assert_failure_aborts() {
    let error = preprocess_err(".assert 1 == 2\n");
    assert!(error.contains("assertion failed"));
}

#[test]
fn assert_success_continues() {
    let output = preprocess(".assert 2 == 2\nNOP\n");
    assert!(output.contains("NOP"));
}

#[test]
fn braces_in_directive_arguments_are_rejected() {
    assert!(preprocess_err(".if {1}\n.endif\n").contains("braces"));
}

#[test]
fn include_of_missing_file_is_an_error() {
    assert!(preprocess_err(".include \"no_such_file.g10s\"\n").contains("resolve"));
}

#[test]
fn include_splices_file_tokens() {
    let dir = std::env::temp_dir().join("g10asm_pp_include_test");
    std::fs::create_dir_all(&dir).unwrap();
    let included = dir.join("lib.g10s");
    std::fs::write(&included, ".define FROM_LIB 9\n").unwrap();
    let main = dir.join("main.g10s");
    std::fs::write(&main, ".include \"lib.g10s\"\n.byte {FROM_LIB}\n").unwrap();

    let mut cache = TokenCache::new();
    let mut lexer = Lexer::new();
    lexer.load_from_file(&main, &mut cache).unwrap();
    let mut preprocessor = Preprocessor::new(
        PreprocessorConfig::default(),
        lexer,
        Some(main.as_path()),
        &mut cache,
    );
    preprocessor.run().unwrap();
    assert!(preprocessor.output().contains(".byte 9"));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn pragma_once_includes_only_once() {
    let dir = std::env::temp_dir().join("g10asm_pp_once_test");
    std::fs::create_dir_all(&dir).unwrap();
    let included = dir.join("once.g10s");
    std::fs::write(&included, ".pragma once\nNOP\n").unwrap();
    let main = dir.join("main.g10s");
    std::fs::write(
        &main,
        ".include \"once.g10s\"\n.include \"once.g10s\"\n",
    )
    .unwrap();

    let mut cache = TokenCache::new();
    let mut lexer = Lexer::new();
    lexer.load_from_file(&main, &mut cache).unwrap();
    let mut preprocessor = Preprocessor::new(
        PreprocessorConfig::default(),
        lexer,
        Some(main.as_path()),
        &mut cache,
    );
    preprocessor.run().unwrap();
    assert_eq!(preprocessor.output().matches("NOP").count(), 1);

    std::fs::remove_dir_all(&dir).unwrap();
}
