//! Lexical analysis for G10 assembly source.
//!
//! The lexer turns source text into a token vector and then acts as a token
//! *stream*: the preprocessor splices tokens from included files and macro
//! expansions into it with [`inject_tokens`](struct.Lexer.html#method.inject_tokens),
//! and the parser walks it with `peek_token`/`consume_token`.
//!
//! Files are tokenized at most once per invocation: the [`TokenCache`]
//! memoizes token vectors by absolute, normalized path and is threaded
//! through the preprocessor explicitly.

use crate::error::{AsmError, AsmResult, SourceLoc};
use crate::keyword;
use crate::token::{Token, TokenKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Memoizes tokenized files by absolute normalized path.
pub struct TokenCache {
    files: HashMap<PathBuf, Vec<Token>>,
}

impl TokenCache {
    pub fn new() -> TokenCache {
        TokenCache {
            files: HashMap::new(),
        }
    }

    /// Resolves `path` to its canonical form.
    pub fn canonicalize(path: &Path) -> AsmResult<PathBuf> {
        path.canonicalize().map_err(|e| {
            AsmError::without_location(format!(
                "cannot resolve source file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Returns the tokens of `path`, tokenizing it on first use.
    pub fn tokens_for(&mut self, path: &Path) -> AsmResult<Vec<Token>> {
        let canonical = TokenCache::canonicalize(path)?;
        if let Some(tokens) = self.files.get(&canonical) {
            return Ok(tokens.clone());
        }

        let source = std::fs::read_to_string(&canonical).map_err(|e| {
            AsmError::without_location(format!(
                "cannot read source file '{}': {}",
                canonical.display(),
                e
            ))
        })?;

        let mut lexer = Lexer::new();
        lexer.load_from_named_string(&source, &canonical.to_string_lossy())?;
        self.files.insert(canonical, lexer.tokens.clone());
        Ok(lexer.tokens)
    }
}

/// The lexer: scanner state plus the resulting token stream.
pub struct Lexer {
    file: Rc<str>,
    source: String,
    tokens: Vec<Token>,
    cursor: usize,
    good: bool,

    // Scanner position.
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new() -> Lexer {
        Lexer {
            file: Rc::from(""),
            source: String::new(),
            tokens: Vec::new(),
            cursor: 0,
            good: false,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenizes a source file through the cache.
    pub fn load_from_file(&mut self, path: &Path, cache: &mut TokenCache) -> AsmResult<()> {
        let tokens = cache.tokens_for(path)?;
        self.file = match tokens.first() {
            Some(token) => token.location.file.clone(),
            None => Rc::from(path.to_string_lossy().as_ref()),
        };
        self.source.clear();
        self.tokens = tokens;
        self.cursor = 0;
        self.good = true;
        Ok(())
    }

    /// Tokenizes source text that did not come from a file.
    pub fn load_from_string(&mut self, source: &str) -> AsmResult<()> {
        self.load_from_named_string(source, "<string>")
    }

    /// Tokenizes source text, attributing tokens to the given file name.
    pub fn load_from_named_string(&mut self, source: &str, file: &str) -> AsmResult<()> {
        self.file = Rc::from(file);
        self.source = source.to_owned();
        self.tokenize()
    }

    pub fn is_good(&self) -> bool {
        self.good
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn reset_position(&mut self) {
        self.cursor = 0;
    }

    pub fn is_at_end(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    /// Peeks at the token `offset` positions from the cursor. Negative
    /// offsets look behind.
    pub fn peek_token(&self, offset: i64) -> AsmResult<&Token> {
        let target = self.cursor as i64 + offset;
        if target < 0 || target as usize >= self.tokens.len() {
            return Err(AsmError::without_location(format!(
                "token peek offset {} from position {} is out of range",
                offset, self.cursor
            )));
        }
        Ok(&self.tokens[target as usize])
    }

    /// Returns the current token and advances past it.
    pub fn consume_token(&mut self) -> AsmResult<Token> {
        if self.cursor >= self.tokens.len() {
            return Err(AsmError::without_location(format!(
                "no more tokens to consume at position {}",
                self.cursor
            )));
        }
        let token = self.tokens[self.cursor].clone();
        self.cursor += 1;
        Ok(token)
    }

    /// Advances the cursor by `count`, clamping at the end of the stream.
    pub fn skip_tokens(&mut self, count: usize) {
        self.cursor = (self.cursor + count).min(self.tokens.len());
    }

    /// Advances the cursor past every consecutive token of `kind`.
    pub fn skip_tokens_of(&mut self, kind: TokenKind) {
        while self.cursor < self.tokens.len() && self.tokens[self.cursor].kind == kind {
            self.cursor += 1;
        }
    }

    /// Splices tokens into the stream at the cursor. With `advance` the
    /// cursor moves past the injected tokens; without it they are consumed
    /// next.
    pub fn inject_tokens(&mut self, tokens: Vec<Token>, advance: bool) {
        if tokens.is_empty() {
            return;
        }
        let count = tokens.len();
        self.tokens.splice(self.cursor..self.cursor, tokens);
        if advance {
            self.cursor += count;
        }
    }

    /// Removes and returns the token at the cursor.
    pub fn erase_token(&mut self) -> AsmResult<Token> {
        if self.cursor >= self.tokens.len() {
            return Err(AsmError::without_location(format!(
                "no more tokens to erase at position {}",
                self.cursor
            )));
        }
        Ok(self.tokens.remove(self.cursor))
    }

    /// Removes and returns `count` tokens starting at the cursor.
    pub fn erase_tokens(&mut self, count: usize) -> AsmResult<Vec<Token>> {
        if self.cursor + count > self.tokens.len() {
            return Err(AsmError::without_location(format!(
                "not enough tokens to erase; requested {} from position {}, {} available",
                count,
                self.cursor,
                self.tokens.len() - self.cursor
            )));
        }
        Ok(self.tokens.drain(self.cursor..self.cursor + count).collect())
    }

    fn location(&self) -> SourceLoc {
        SourceLoc::new(self.file.clone(), self.line, self.column)
    }

    fn location_at(&self, column: usize) -> SourceLoc {
        SourceLoc::new(self.file.clone(), self.line, column)
    }

    fn byte(&self, offset: usize) -> u8 {
        *self.source.as_bytes().get(self.pos + offset).unwrap_or(&0)
    }

    fn tokenize(&mut self) -> AsmResult<()> {
        self.tokens.clear();
        self.cursor = 0;
        self.good = false;
        self.pos = 0;
        self.line = 1;
        self.column = 1;

        while self.pos < self.source.len() {
            self.skip_whitespace();
            if self.pos < self.source.len() && self.byte(0) == b';' {
                self.skip_comment();
                continue;
            }
            if self.pos >= self.source.len() {
                break;
            }

            let ch = self.byte(0);
            let scan = if ch.is_ascii_alphabetic() || ch == b'_' || ch == b'.' {
                self.scan_identifier_or_keyword()
            } else if ch == b'$' {
                self.scan_variable()
            } else if ch == b'@' {
                self.scan_placeholder()
            } else if ch.is_ascii_digit() {
                self.scan_integer_or_number_literal()
            } else if ch == b'\'' {
                self.scan_character_literal()
            } else if ch == b'"' {
                self.scan_string_literal()
            } else {
                self.scan_symbol()
            };

            if let Err(error) = scan {
                eprintln!("{}", error);
                self.good = false;
                return Err(error);
            }
        }

        self.tokens
            .push(Token::new(TokenKind::EndOfFile, "", self.location()));
        self.good = true;
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.source.len() {
            let ch = self.byte(0);
            if !ch.is_ascii_whitespace() {
                break;
            }
            if ch == b'\n' {
                self.tokens
                    .push(Token::new(TokenKind::NewLine, "\n", self.location()));
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.pos += 1;
        }
    }

    fn skip_comment(&mut self) {
        while self.pos < self.source.len() && self.byte(0) != b'\n' {
            self.pos += 1;
            self.column += 1;
        }
        if self.pos < self.source.len() {
            self.tokens
                .push(Token::new(TokenKind::NewLine, "\n", self.location()));
            self.line += 1;
            self.column = 1;
            self.pos += 1;
        }
    }

    fn scan_identifier_or_keyword(&mut self) -> AsmResult<()> {
        let start = self.pos;
        let start_column = self.column;
        while self.pos < self.source.len() {
            let ch = self.byte(0);
            if ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'.' {
                self.pos += 1;
                self.column += 1;
            } else {
                break;
            }
        }

        let lexeme = &self.source[start..self.pos];
        let location = self.location_at(start_column);
        let token = match keyword::lookup(lexeme) {
            Some(id) => {
                let mut token = Token::new(TokenKind::Keyword, lexeme, location);
                token.keyword = Some(id);
                token
            }
            None => Token::new(TokenKind::Identifier, lexeme, location),
        };
        self.tokens.push(token);
        Ok(())
    }

    fn scan_variable(&mut self) -> AsmResult<()> {
        let start = self.pos;
        let start_column = self.column;
        self.pos += 1;
        self.column += 1;
        while self.pos < self.source.len() {
            let ch = self.byte(0);
            if ch.is_ascii_alphanumeric() || ch == b'_' {
                self.pos += 1;
                self.column += 1;
            } else {
                break;
            }
        }
        let lexeme = &self.source[start..self.pos];
        self.tokens.push(Token::new(
            TokenKind::Variable,
            lexeme,
            self.location_at(start_column),
        ));
        Ok(())
    }

    fn scan_placeholder(&mut self) -> AsmResult<()> {
        let start = self.pos;
        let start_column = self.column;
        self.pos += 1;
        self.column += 1;
        while self.pos < self.source.len() {
            let ch = self.byte(0);
            if ch.is_ascii_alphanumeric() || ch == b'_' {
                self.pos += 1;
                self.column += 1;
            } else {
                break;
            }
        }

        let lexeme = &self.source[start..self.pos];
        let location = self.location_at(start_column);

        // A placeholder whose name is also a keyword keeps the keyword
        // reference around under a distinct kind.
        let token = match keyword::lookup(&lexeme[1..]) {
            Some(id) => {
                let mut token = Token::new(TokenKind::PlaceholderKeyword, lexeme, location);
                token.keyword = Some(id);
                token
            }
            None => Token::new(TokenKind::Placeholder, lexeme, location),
        };
        self.tokens.push(token);
        Ok(())
    }

    fn scan_radix_integer_literal(&mut self, radix: u32, digits: fn(u8) -> bool) -> AsmResult<()> {
        let start = self.pos;
        let start_column = self.column;

        // Advance past the two-character base prefix.
        self.pos += 2;
        self.column += 2;

        while self.pos < self.source.len() && digits(self.byte(0)) {
            self.pos += 1;
            self.column += 1;
        }

        let lexeme = &self.source[start..self.pos];
        let location = self.location_at(start_column);
        if lexeme.len() <= 2 {
            return err!(
                location,
                "expected base-{} digits after '{}' prefix",
                radix,
                lexeme
            );
        }

        let value = i64::from_str_radix(&lexeme[2..], radix)
            .map_err(|e| AsmError {
                location: Some(location.clone()),
                message: format!("invalid integer literal '{}': {}", lexeme, e),
            })?;

        let mut token = Token::new(TokenKind::IntegerLiteral, lexeme, location);
        token.int_value = Some(value);
        token.number_value = Some(value as f64);
        self.tokens.push(token);
        Ok(())
    }

    fn scan_integer_or_number_literal(&mut self) -> AsmResult<()> {
        if self.byte(0) == b'0' {
            match self.byte(1) {
                b'b' | b'B' => {
                    return self.scan_radix_integer_literal(2, |c| c == b'0' || c == b'1')
                }
                b'o' | b'O' => {
                    return self.scan_radix_integer_literal(8, |c| (b'0'..=b'7').contains(&c))
                }
                b'x' | b'X' => {
                    return self.scan_radix_integer_literal(16, |c| c.is_ascii_hexdigit())
                }
                _ => {}
            }
        }

        let start = self.pos;
        let start_column = self.column;
        let mut seen_decimal_point = false;
        while self.pos < self.source.len() {
            let ch = self.byte(0);
            if ch.is_ascii_digit() {
                self.pos += 1;
                self.column += 1;
            } else if ch == b'.' && !seen_decimal_point {
                seen_decimal_point = true;
                self.pos += 1;
                self.column += 1;
            } else {
                break;
            }
        }

        let lexeme = &self.source[start..self.pos];
        let location = self.location_at(start_column);

        let integer_part = match lexeme.find('.') {
            Some(dot) => &lexeme[..dot],
            None => lexeme,
        };
        let int_value = integer_part.parse::<i64>().map_err(|e| AsmError {
            location: Some(location.clone()),
            message: format!("invalid integer literal '{}': {}", lexeme, e),
        })?;
        let number_value = lexeme.parse::<f64>().map_err(|e| AsmError {
            location: Some(location.clone()),
            message: format!("invalid number literal '{}': {}", lexeme, e),
        })?;

        let kind = if seen_decimal_point {
            TokenKind::NumberLiteral
        } else {
            TokenKind::IntegerLiteral
        };
        let mut token = Token::new(kind, lexeme, location);
        token.int_value = Some(int_value);
        token.number_value = Some(number_value);
        self.tokens.push(token);
        Ok(())
    }

    fn scan_character_literal(&mut self) -> AsmResult<()> {
        let start_column = self.column;
        self.pos += 1;
        self.column += 1;
        let content_start = self.pos;

        while self.pos < self.source.len() && self.byte(0) != b'\'' {
            self.pos += 1;
            self.column += 1;
        }
        let location = self.location_at(start_column);
        if self.pos >= self.source.len() {
            return err!(location, "unterminated character literal");
        }

        let lexeme = self.source[content_start..self.pos].to_owned();
        self.pos += 1;
        self.column += 1;

        let bytes = lexeme.as_bytes();
        let value: i64 = if bytes.is_empty() {
            0
        } else if bytes.len() == 1 {
            i64::from(bytes[0])
        } else if bytes[0] == b'\\' {
            match bytes[1] {
                b'n' => 10,
                b't' => 9,
                b'r' => 13,
                b'\\' => 92,
                b'\'' => 39,
                b'"' => 34,
                b'0' => 0,
                b'x' => {
                    if bytes.len() != 4
                        || !bytes[2].is_ascii_hexdigit()
                        || !bytes[3].is_ascii_hexdigit()
                    {
                        return err!(
                            location,
                            "invalid hexadecimal escape sequence '\\x{}' in character literal",
                            &lexeme[2..]
                        );
                    }
                    i64::from_str_radix(&lexeme[2..4], 16).unwrap()
                }
                b'u' => {
                    if bytes.len() != 6 || !bytes[2..6].iter().all(|b| b.is_ascii_hexdigit()) {
                        return err!(
                            location,
                            "invalid Unicode escape sequence '\\u{}' in character literal",
                            &lexeme[2..]
                        );
                    }
                    i64::from_str_radix(&lexeme[2..6], 16).unwrap()
                }
                other => {
                    return err!(
                        location,
                        "invalid escape sequence '\\{}' in character literal",
                        other as char
                    );
                }
            }
        } else {
            return err!(
                location,
                "invalid character literal '{}'; expected a single character or escape sequence",
                lexeme
            );
        };

        let mut token = Token::new(TokenKind::CharacterLiteral, &lexeme, location);
        token.int_value = Some(value);
        token.number_value = Some(value as f64);
        self.tokens.push(token);
        Ok(())
    }

    fn scan_string_literal(&mut self) -> AsmResult<()> {
        let start_column = self.column;
        self.pos += 1;
        self.column += 1;
        let content_start = self.pos;

        while self.pos < self.source.len() && self.byte(0) != b'"' {
            self.pos += 1;
            self.column += 1;
        }
        let location = self.location_at(start_column);
        if self.pos >= self.source.len() {
            return err!(location, "unterminated string literal");
        }

        let lexeme = self.source[content_start..self.pos].to_owned();
        self.pos += 1;
        self.column += 1;

        self.tokens
            .push(Token::new(TokenKind::StringLiteral, &lexeme, location));
        Ok(())
    }

    fn scan_symbol(&mut self) -> AsmResult<()> {
        let ch1 = self.byte(0);
        let ch2 = self.byte(1);
        let ch3 = self.byte(2);

        let mut emit = |kind: TokenKind, lexeme: &str, skip: usize| -> AsmResult<()> {
            self.tokens.push(Token::new(kind, lexeme, self.location()));
            self.pos += skip;
            self.column += skip;
            Ok(())
        };

        match ch1 {
            b'+' => {
                if ch2 == b'=' {
                    emit(TokenKind::AssignPlus, "+=", 2)
                } else {
                    emit(TokenKind::Plus, "+", 1)
                }
            }
            b'-' => {
                if ch2 == b'=' {
                    emit(TokenKind::AssignMinus, "-=", 2)
                } else {
                    emit(TokenKind::Minus, "-", 1)
                }
            }
            b'*' => {
                if ch2 == b'*' && ch3 == b'=' {
                    emit(TokenKind::AssignExponent, "**=", 3)
                } else if ch2 == b'*' {
                    emit(TokenKind::Exponent, "**", 2)
                } else if ch2 == b'=' {
                    emit(TokenKind::AssignTimes, "*=", 2)
                } else {
                    emit(TokenKind::Times, "*", 1)
                }
            }
            b'/' => {
                if ch2 == b'=' {
                    emit(TokenKind::AssignDivide, "/=", 2)
                } else {
                    emit(TokenKind::Divide, "/", 1)
                }
            }
            b'%' => {
                if ch2 == b'=' {
                    emit(TokenKind::AssignModulo, "%=", 2)
                } else {
                    emit(TokenKind::Modulo, "%", 1)
                }
            }
            b'&' => {
                if ch2 == b'&' {
                    emit(TokenKind::LogicalAnd, "&&", 2)
                } else if ch2 == b'=' {
                    emit(TokenKind::AssignAnd, "&=", 2)
                } else {
                    emit(TokenKind::BitwiseAnd, "&", 1)
                }
            }
            b'|' => {
                if ch2 == b'|' {
                    emit(TokenKind::LogicalOr, "||", 2)
                } else if ch2 == b'=' {
                    emit(TokenKind::AssignOr, "|=", 2)
                } else {
                    emit(TokenKind::BitwiseOr, "|", 1)
                }
            }
            b'^' => {
                if ch2 == b'=' {
                    emit(TokenKind::AssignXor, "^=", 2)
                } else {
                    emit(TokenKind::BitwiseXor, "^", 1)
                }
            }
            b'<' => {
                if ch2 == b'<' && ch3 == b'=' {
                    emit(TokenKind::AssignShiftLeft, "<<=", 3)
                } else if ch2 == b'<' {
                    emit(TokenKind::ShiftLeft, "<<", 2)
                } else if ch2 == b'=' {
                    emit(TokenKind::CompareLessEqual, "<=", 2)
                } else {
                    emit(TokenKind::CompareLess, "<", 1)
                }
            }
            b'>' => {
                if ch2 == b'>' && ch3 == b'=' {
                    emit(TokenKind::AssignShiftRight, ">>=", 3)
                } else if ch2 == b'>' {
                    emit(TokenKind::ShiftRight, ">>", 2)
                } else if ch2 == b'=' {
                    emit(TokenKind::CompareGreaterEqual, ">=", 2)
                } else {
                    emit(TokenKind::CompareGreater, ">", 1)
                }
            }
            b'=' => {
                if ch2 == b'=' {
                    emit(TokenKind::CompareEqual, "==", 2)
                } else {
                    emit(TokenKind::AssignEqual, "=", 1)
                }
            }
            b'!' => {
                if ch2 == b'=' {
                    emit(TokenKind::CompareNotEqual, "!=", 2)
                } else {
                    emit(TokenKind::LogicalNot, "!", 1)
                }
            }
            b'~' => emit(TokenKind::BitwiseNot, "~", 1),
            b'(' => emit(TokenKind::LeftParen, "(", 1),
            b')' => emit(TokenKind::RightParen, ")", 1),
            b'[' => emit(TokenKind::LeftBracket, "[", 1),
            b']' => emit(TokenKind::RightBracket, "]", 1),
            b'{' => emit(TokenKind::LeftBrace, "{", 1),
            b'}' => emit(TokenKind::RightBrace, "}", 1),
            b',' => emit(TokenKind::Comma, ",", 1),
            b':' => emit(TokenKind::Colon, ":", 1),
            b'?' => emit(TokenKind::QuestionMark, "?", 1),
            b'`' => emit(TokenKind::Backtick, "`", 1),
            b'\\' => emit(TokenKind::Backslash, "\\", 1),
            b'#' => {
                if ch2 == b'#' {
                    emit(TokenKind::DoubleHash, "##", 2)
                } else {
                    emit(TokenKind::Hash, "#", 1)
                }
            }
            other => {
                let location = self.location();
                err!(location, "unrecognized character '{}'", other as char)
            }
        }
    }
}
