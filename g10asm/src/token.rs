//! Token types produced by the assembler's lexer.

use crate::error::SourceLoc;
use crate::keyword::{self, KeywordId, KeywordKind};

/// The kind of a token.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Unknown,

    // Keywords and identifiers.
    Keyword,
    Identifier,
    Variable,
    Placeholder,
    PlaceholderKeyword,

    // Literals.
    IntegerLiteral,
    NumberLiteral,
    CharacterLiteral,
    StringLiteral,

    // Arithmetic and bitwise operators.
    Plus,
    Minus,
    Times,
    Exponent,
    Divide,
    Modulo,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    BitwiseNot,
    ShiftLeft,
    ShiftRight,

    // Assignment operators.
    AssignEqual,
    AssignPlus,
    AssignMinus,
    AssignTimes,
    AssignExponent,
    AssignDivide,
    AssignModulo,
    AssignAnd,
    AssignOr,
    AssignXor,
    AssignShiftLeft,
    AssignShiftRight,

    // Comparison operators.
    CompareEqual,
    CompareNotEqual,
    CompareLess,
    CompareLessEqual,
    CompareGreater,
    CompareGreaterEqual,

    // Logical operators.
    LogicalAnd,
    LogicalOr,
    LogicalNot,

    // Grouping operators.
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,

    // Punctuation.
    Comma,
    Colon,
    QuestionMark,
    Backtick,
    Backslash,
    Hash,
    DoubleHash,

    // Control tokens.
    NewLine,
    EndOfFile,

    // Internal stream markers, never produced by scanning and never emitted
    // to preprocessor output.
    ExpansionEnd,
    LoopEnd,
}

impl TokenKind {
    /// `true` for the token kinds that carry an assignment operator, as used
    /// by variable-assignment statements.
    pub fn is_assignment(self) -> bool {
        match self {
            TokenKind::AssignEqual
            | TokenKind::AssignPlus
            | TokenKind::AssignMinus
            | TokenKind::AssignTimes
            | TokenKind::AssignExponent
            | TokenKind::AssignDivide
            | TokenKind::AssignModulo
            | TokenKind::AssignAnd
            | TokenKind::AssignOr
            | TokenKind::AssignXor
            | TokenKind::AssignShiftLeft
            | TokenKind::AssignShiftRight => true,
            _ => false,
        }
    }
}

/// A token produced by the lexer.
///
/// Integer-bearing kinds populate both `int_value` and `number_value`;
/// keyword kinds carry a valid id into the keyword table.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub location: SourceLoc,
    pub int_value: Option<i64>,
    pub number_value: Option<f64>,
    pub keyword: Option<KeywordId>,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: &str, location: SourceLoc) -> Token {
        Token {
            kind,
            lexeme: lexeme.to_owned(),
            location,
            int_value: None,
            number_value: None,
            keyword: None,
        }
    }

    /// The keyword category of this token, if it is a keyword.
    pub fn keyword_kind(&self) -> Option<KeywordKind> {
        self.keyword.map(|id| keyword::get(id).kind)
    }

    /// A human-readable description of the token's kind, for diagnostics.
    pub fn describe(&self) -> &'static str {
        match self.kind {
            TokenKind::Keyword | TokenKind::PlaceholderKeyword => match self.keyword_kind() {
                Some(kind) => kind.describe(),
                None => "keyword",
            },
            TokenKind::Identifier => "identifier",
            TokenKind::Variable => "variable",
            TokenKind::Placeholder => "placeholder",
            TokenKind::IntegerLiteral => "integer literal",
            TokenKind::NumberLiteral => "number literal",
            TokenKind::CharacterLiteral => "character literal",
            TokenKind::StringLiteral => "string literal",
            TokenKind::NewLine => "end of line",
            TokenKind::EndOfFile => "end of file",
            _ => "symbol",
        }
    }
}
