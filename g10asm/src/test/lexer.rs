use crate::keyword::{self, KeywordKind};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};
use matches::assert_matches;

fn lex(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new();
    lexer.load_from_string(source).unwrap();
    assert!(lexer.is_good());
    lexer.tokens().to_vec()
}

fn kinds(source: &str) -> Vec<TokenKind> {
    lex(source).iter().map(|t| t.kind).collect()
}

#[test]
fn keywords_are_case_insensitive() {
    for source in &["ld", "LD", "Ld"] {
        let tokens = lex(source);
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        let entry = keyword::get(tokens[0].keyword.unwrap());
        assert_eq!(entry.kind, KeywordKind::InstructionMnemonic);
    }
}

#[test]
fn identifiers_and_lexemes_survive() {
    let tokens = lex("my_label: LD L0, other.field");
    assert_eq!(tokens[0].kind, TokenKind::Identifier);
    assert_eq!(tokens[0].lexeme, "my_label");
    assert_eq!(tokens[1].kind, TokenKind::Colon);
    // Dots are identifier characters.
    assert_eq!(tokens[5].lexeme, "other.field");
    assert_eq!(tokens[5].kind, TokenKind::Identifier);
}

#[test]
fn variables_and_placeholders() {
    let tokens = lex("$count @param @ld");
    assert_eq!(tokens[0].kind, TokenKind::Variable);
    assert_eq!(tokens[0].lexeme, "$count");
    assert_eq!(tokens[1].kind, TokenKind::Placeholder);
    assert_eq!(tokens[1].lexeme, "@param");
    // A placeholder naming a keyword is its own kind and keeps the keyword.
    assert_eq!(tokens[2].kind, TokenKind::PlaceholderKeyword);
    assert!(tokens[2].keyword.is_some());
}

#[test]
fn integer_literal_radixes() {
    let tokens = lex("123 0b1111011 0o173 0x7B 0X7b");
    for token in &tokens[..5] {
        assert_eq!(token.kind, TokenKind::IntegerLiteral);
        assert_eq!(token.int_value, Some(123));
        assert_eq!(token.number_value, Some(123.0));
    }
}

#[test]
fn large_hexadecimal_literal() {
    let tokens = lex("0xFFFFFFFF");
    assert_eq!(tokens[0].int_value, Some(4_294_967_295));
}

#[test]
fn number_literal_with_decimal_point() {
    let tokens = lex("3.25");
    assert_eq!(tokens[0].kind, TokenKind::NumberLiteral);
    assert_eq!(tokens[0].number_value, Some(3.25));
    assert_eq!(tokens[0].int_value, Some(3));
}

#[test]
fn character_literals_and_escapes() {
    let cases: &[(&str, i64)] = &[
        ("'A'", 65),
        ("'\\n'", 10),
        ("'\\t'", 9),
        ("'\\0'", 0),
        ("'\\x41'", 0x41),
        ("'\\u0041'", 0x41),
    ];
    for (source, expected) in cases {
        let tokens = lex(source);
        assert_eq!(tokens[0].kind, TokenKind::CharacterLiteral);
        assert_eq!(tokens[0].int_value, Some(*expected), "for {}", source);
    }
}

#[test]
fn invalid_escape_is_an_error() {
    let mut lexer = Lexer::new();
    assert!(lexer.load_from_string("'\\q'").is_err());
    assert!(!lexer.is_good());
}

#[test]
fn unterminated_string_is_an_error() {
    let mut lexer = Lexer::new();
    assert!(lexer.load_from_string("\"oops").is_err());
    assert!(!lexer.is_good());
}

#[test]
fn string_literal_content() {
    let tokens = lex("\"hello world\"");
    assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
    assert_eq!(tokens[0].lexeme, "hello world");
}

#[test]
fn maximal_munch_symbols() {
    assert_eq!(
        kinds("** **= << <<= <= < == = != !"),
        vec![
            TokenKind::Exponent,
            TokenKind::AssignExponent,
            TokenKind::ShiftLeft,
            TokenKind::AssignShiftLeft,
            TokenKind::CompareLessEqual,
            TokenKind::CompareLess,
            TokenKind::CompareEqual,
            TokenKind::AssignEqual,
            TokenKind::CompareNotEqual,
            TokenKind::LogicalNot,
            TokenKind::EndOfFile,
        ]
    );
}

#[test]
fn comments_run_to_end_of_line() {
    let tokens = lex("NOP ; this is a comment\nHALT");
    let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::Keyword,
            TokenKind::NewLine,
            TokenKind::Keyword,
            TokenKind::EndOfFile,
        ]
    );
}

#[test]
fn newlines_are_tokens_with_locations() {
    let tokens = lex("NOP\nHALT");
    assert_eq!(tokens[1].kind, TokenKind::NewLine);
    assert_eq!(tokens[2].location.line, 2);
    assert_eq!(tokens[2].location.column, 1);
}

#[test]
fn lexing_twice_yields_identical_tokens() {
    let first = lex(".org 0x2000\nmain: LD L0, 'x' ; trailing\n");
    let second = lex(".org 0x2000\nmain: LD L0, 'x' ; trailing\n");
    assert_eq!(first, second);
}

#[test]
fn stream_navigation_and_injection() {
    let mut lexer = Lexer::new();
    lexer.load_from_string("NOP HALT").unwrap();

    assert_eq!(lexer.peek_token(0).unwrap().lexeme, "NOP");
    assert_eq!(lexer.peek_token(1).unwrap().lexeme, "HALT");
    assert!(lexer.peek_token(-1).is_err());

    let nop = lexer.consume_token().unwrap();
    assert_eq!(nop.lexeme, "NOP");
    assert_eq!(lexer.peek_token(-1).unwrap().lexeme, "NOP");

    // Inject without advancing: the injected tokens are consumed next.
    let injected = vec![Token::new(
        TokenKind::Identifier,
        "spliced",
        Default::default(),
    )];
    lexer.inject_tokens(injected, false);
    assert_eq!(lexer.peek_token(0).unwrap().lexeme, "spliced");

    let erased = lexer.erase_token().unwrap();
    assert_eq!(erased.lexeme, "spliced");
    assert_eq!(lexer.peek_token(0).unwrap().lexeme, "HALT");
}

#[test]
fn skip_tokens_of_kind() {
    let mut lexer = Lexer::new();
    lexer.load_from_string("\n\n\nNOP").unwrap();
    lexer.skip_tokens_of(TokenKind::NewLine);
    assert_eq!(lexer.peek_token(0).unwrap().lexeme, "NOP");
}

#[test]
fn unrecognized_character_is_an_error() {
    let mut lexer = Lexer::new();
    let result = lexer.load_from_string("NOP \u{7f}");
    assert_matches!(result, Err(_));
}
