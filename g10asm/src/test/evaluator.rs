use crate::lexer::Lexer;
use crate::preprocessor::evaluator::{Evaluator, PpNumber, PpValue};
use crate::preprocessor::macros::{MacroTable, TextSubMacro};
use crate::token::{Token, TokenKind};
use matches::assert_matches;

fn expr_tokens(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new();
    lexer.load_from_string(source).unwrap();
    lexer
        .tokens()
        .iter()
        .filter(|t| t.kind != TokenKind::NewLine && t.kind != TokenKind::EndOfFile)
        .cloned()
        .collect()
}

fn eval(source: &str) -> PpValue {
    let macros = MacroTable::new();
    eval_with(source, &macros)
}

fn eval_with(source: &str, macros: &MacroTable) -> PpValue {
    let tokens = expr_tokens(source);
    Evaluator::new(&tokens, macros).evaluate().unwrap()
}

fn eval_err(source: &str) -> String {
    let macros = MacroTable::new();
    let tokens = expr_tokens(source);
    Evaluator::new(&tokens, &macros)
        .evaluate()
        .unwrap_err()
        .message
}

fn as_int(value: PpValue) -> i64 {
    match value {
        PpValue::Integer(value) => value,
        other => panic!("expected integer, got {:?}", other),
    }
}

fn as_float(value: PpValue) -> f64 {
    match value {
        PpValue::Number(number) => number.float(),
        other => panic!("expected fixed-point, got {:?}", other),
    }
}

#[test]
fn precedence_and_associativity() {
    assert_eq!(as_int(eval("1 + 2 * 3")), 7);
    assert_eq!(as_int(eval("(1 + 2) * 3")), 9);
    assert_eq!(as_int(eval("2 ** 3 ** 2")), 512); // right-associative
    assert_eq!(as_int(eval("1 | 2 ^ 3 & 2")), 1 | (2 ^ (3 & 2)));
    assert_eq!(as_int(eval("1 << 4 >> 2")), 4);
    assert_eq!(as_int(eval("10 - 4 - 3")), 3); // left-associative
}

#[test]
fn comparison_and_logic_yield_integers() {
    assert_eq!(as_int(eval("1 + 1 == 2")), 1);
    assert_eq!(as_int(eval("3 < 2")), 0);
    assert_eq!(as_int(eval("1 && 0")), 0);
    assert_eq!(as_int(eval("0 || 7")), 1);
    assert_eq!(as_int(eval("!0")), 1);
    assert_eq!(as_int(eval("~0")), -1);
}

#[test]
fn unary_minus_preserves_fixed_point() {
    let value = eval("-1.5");
    assert_eq!(as_float(value), -1.5);
}

#[test]
fn division_and_modulo_by_zero_are_errors() {
    assert!(eval_err("1 / 0").contains("division by zero"));
    assert!(eval_err("1 % 0").contains("modulo by zero"));
}

#[test]
fn unknown_identifier_is_an_error() {
    assert!(eval_err("nope + 1").contains("unknown identifier"));
}

#[test]
fn macro_identifiers_resolve() {
    let mut macros = MacroTable::new();
    macros.define_text_sub(TextSubMacro {
        name: "WIDTH".to_owned(),
        replacement: expr_tokens("32"),
    });
    assert_eq!(as_int(eval_with("WIDTH * 2", &macros)), 64);
}

#[test]
fn number_to_integer_uses_signed_high_part() {
    // Integer arithmetic on fixed-point operands truncates.
    assert_eq!(as_int(eval("2.75 + 1")), 3);
    assert_eq!(as_int(eval("-2.75 + 1")), -1);
}

#[test]
fn integer_builtins() {
    assert_eq!(as_int(eval("high(0x1234)")), 0x12);
    assert_eq!(as_int(eval("low(0x1234)")), 0x34);
    assert_eq!(as_int(eval("bitwidth(0)")), 0);
    assert_eq!(as_int(eval("bitwidth(255)")), 8);
    assert_eq!(as_int(eval("bitwidth(256)")), 9);
    assert_eq!(as_int(eval("abs(-5)")), 5);
    assert_eq!(as_int(eval("min(3, 9)")), 3);
    assert_eq!(as_int(eval("max(3, 9)")), 9);
    assert_eq!(as_int(eval("clamp(12, 0, 10)")), 10);
}

#[test]
fn fixed_point_builtins() {
    assert_eq!(as_float(eval("fmul(1.5, 2.0)")), 3.0);
    assert_eq!(as_float(eval("fdiv(3.0, 2.0)")), 1.5);
    assert_eq!(as_int(eval("fint(2.75)")), 2);
    assert_eq!(as_int(eval("fint(-2.75)")), -2);
    assert!((as_float(eval("ffrac(2.75)")) - 0.75).abs() < 1e-9);
    assert_eq!(as_int(eval("round(2.5)")), 3);
    assert_eq!(as_int(eval("ceil(2.1)")), 3);
    assert_eq!(as_int(eval("floor(2.9)")), 2);
    assert_eq!(as_int(eval("trunc(-2.9)")), -2);
}

#[test]
fn math_builtins_and_domain_errors() {
    assert!((as_float(eval("pow(2.0, 10.0)")) - 1024.0).abs() < 1e-9);
    assert_eq!(as_float(eval("sqrt(9.0)")), 3.0);
    assert!(eval_err("sqrt(-1.0)").contains("sqrt"));
    assert!(eval_err("ln(0)").contains("non-positive"));
    assert!(eval_err("log(8, 1)").contains("base"));
    assert!((as_float(eval("log2(8.0)")) - 3.0).abs() < 1e-9);
    assert!((as_float(eval("log(8.0, 2.0)")) - 3.0).abs() < 1e-9);
}

#[test]
fn trigonometry_works_in_turns() {
    // One quarter turn is 90 degrees.
    assert!((as_float(eval("sin(0.25)")) - 1.0).abs() < 1e-9);
    assert!((as_float(eval("cos(0.5)")) + 1.0).abs() < 1e-9);
    assert!((as_float(eval("asin(1.0)")) - 0.25).abs() < 1e-9);
    assert!(eval_err("asin(2.0)").contains("[-1, 1]"));
    assert!((as_float(eval("atan2(1.0, 0.0)")) - 0.25).abs() < 1e-9);
}

#[test]
fn string_builtins() {
    assert_eq!(as_int(eval("strlen(\"hello\")")), 5);
    assert_eq!(as_int(eval("strcmp(\"a\", \"b\")")), -1);
    assert_eq!(as_int(eval("strcmp(\"b\", \"a\")")), 1);
    assert_eq!(as_int(eval("strcmp(\"a\", \"a\")")), 0);
    assert_eq!(eval("substr(\"hello\", 1, 3)"), PpValue::Str("ell".to_owned()));
    assert_eq!(eval("substr(\"hello\", 3)"), PpValue::Str("lo".to_owned()));
    assert_eq!(eval("substr(\"hi\", 9)"), PpValue::Str(String::new()));
    assert_eq!(as_int(eval("indexof(\"hello\", \"ll\")")), 2);
    assert_eq!(as_int(eval("indexof(\"hello\", \"xyz\")")), -1);
    assert_eq!(eval("toupper(\"abc\")"), PpValue::Str("ABC".to_owned()));
    assert_eq!(eval("tolower(\"ABC\")"), PpValue::Str("abc".to_owned()));
    assert_eq!(
        eval("concat(\"a\", \"b\", \"c\")"),
        PpValue::Str("abc".to_owned())
    );
}

#[test]
fn reflection_builtins() {
    let mut macros = MacroTable::new();
    macros.define_text_sub(TextSubMacro {
        name: "KNOWN".to_owned(),
        replacement: expr_tokens("1"),
    });
    assert_eq!(as_int(eval_with("defined(KNOWN)", &macros)), 1);
    assert_eq!(as_int(eval_with("defined(UNKNOWN)", &macros)), 0);
    assert_eq!(eval("typeof(1)"), PpValue::Str("integer".to_owned()));
    assert_eq!(eval("typeof(1.5)"), PpValue::Str("fixed-point".to_owned()));
    assert_eq!(eval("typeof(\"s\")"), PpValue::Str("string".to_owned()));
}

#[test]
fn wrong_arity_is_an_error() {
    assert!(eval_err("min(1)").contains("2 arguments"));
    assert!(eval_err("strlen(1, 2)").contains("1 argument"));
}

#[test]
fn string_operand_in_arithmetic_is_an_error() {
    assert!(eval_err("\"x\" + 1").contains("string"));
}

#[test]
fn character_literals_are_integers() {
    assert_eq!(as_int(eval("'A' + 1")), 66);
}

#[test]
fn empty_expression_is_an_error() {
    let macros = MacroTable::new();
    let tokens: Vec<Token> = Vec::new();
    let result = Evaluator::new(&tokens, &macros).evaluate();
    assert_matches!(result, Err(_));
}

#[test]
fn trailing_tokens_are_an_error() {
    assert!(eval_err("1 2").contains("after expression"));
}

#[test]
fn fixed_point_number_keeps_raw_and_float() {
    let number = PpNumber::new(2.5);
    assert_eq!(number.signed_integer(), 2);
    assert_eq!(number.fractional_part(), 0x8000_0000);
    assert_eq!(number.float(), 2.5);

    let negative = PpNumber::new(-2.0);
    assert_eq!(negative.signed_integer(), -2);
}

#[test]
fn truthiness_rules() {
    assert!(!PpValue::Void.is_truthy());
    assert!(!PpValue::Integer(0).is_truthy());
    assert!(PpValue::Integer(-1).is_truthy());
    assert!(!PpValue::Number(PpNumber::new(0.0)).is_truthy());
    assert!(PpValue::Number(PpNumber::new(0.5)).is_truthy());
    assert!(!PpValue::Str(String::new()).is_truthy());
    assert!(PpValue::Str("x".to_owned()).is_truthy());
}
