//! The preprocessor's expression evaluator.
//!
//! Given a token subsequence, this module parses and evaluates it to a
//! [`PpValue`] with operator-precedence parsing. Macro identifiers resolve
//! through the macro table, and a library of built-in functions is
//! dispatched by name at call sites.

use crate::error::{AsmError, AsmResult, SourceLoc};
use crate::keyword::KeywordKind;
use crate::preprocessor::macros::MacroTable;
use crate::token::{Token, TokenKind};

/// One turn, in radians. The trigonometric built-ins work in turns.
const TWO_PI: f64 = 6.283_185_307_179_586_476_93;

/// A `32.32` fixed-point number.
///
/// Both the raw bit pattern and the originating floating-point value are
/// stored: integer operators use the signed high 32 bits of `raw`, while
/// fractional operators compute on `float` so repeated arithmetic does not
/// accumulate round-trip loss.
#[derive(Clone, Copy, Debug)]
pub struct PpNumber {
    raw: u64,
    float: f64,
}

impl PpNumber {
    pub fn new(value: f64) -> PpNumber {
        let int_part = value.trunc();
        let frac_part = value - int_part;
        let raw = ((int_part as i32 as u64) << 32)
            | ((frac_part.abs() * (1u64 << 32) as f64) as u64 & 0xFFFF_FFFF);
        PpNumber { raw, float: value }
    }

    /// The signed integer portion (high 32 bits, sign preserved).
    pub fn signed_integer(&self) -> i64 {
        i64::from((self.raw >> 32) as u32 as i32)
    }

    /// The raw 64-bit fixed-point bit pattern.
    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// The originating floating-point value.
    pub fn float(&self) -> f64 {
        self.float
    }

    /// The fractional portion (low 32 bits).
    pub fn fractional_part(&self) -> u32 {
        (self.raw & 0xFFFF_FFFF) as u32
    }
}

impl PartialEq for PpNumber {
    fn eq(&self, other: &PpNumber) -> bool {
        self.raw == other.raw
    }
}

/// A value produced by evaluating a preprocessor expression.
#[derive(Clone, Debug, PartialEq)]
pub enum PpValue {
    Void,
    Integer(i64),
    Number(PpNumber),
    Boolean(bool),
    Str(String),
}

impl PpValue {
    /// The type name reported by `typeof()`.
    pub fn type_of(&self) -> &'static str {
        match self {
            PpValue::Void => "void",
            PpValue::Integer(_) => "integer",
            PpValue::Number(_) => "fixed-point",
            PpValue::Boolean(_) => "boolean",
            PpValue::Str(_) => "string",
        }
    }

    /// Truthiness: void is false; zero integers/numbers are false; empty
    /// strings are false; everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            PpValue::Void => false,
            PpValue::Integer(value) => *value != 0,
            PpValue::Number(number) => number.raw() != 0,
            PpValue::Boolean(value) => *value,
            PpValue::Str(value) => !value.is_empty(),
        }
    }

    /// Renders the value the way interpolation emits it. Booleans become
    /// `1`/`0`; numbers without a fractional part print as integers.
    pub fn render(&self) -> String {
        match self {
            PpValue::Void => String::new(),
            PpValue::Integer(value) => value.to_string(),
            PpValue::Number(number) => {
                if number.fractional_part() == 0 {
                    number.signed_integer().to_string()
                } else {
                    format!("{}", number.float())
                }
            }
            PpValue::Boolean(value) => if *value { "1" } else { "0" }.to_owned(),
            PpValue::Str(value) => value.clone(),
        }
    }
}

/// Evaluates a token subsequence against a macro table.
pub struct Evaluator<'a> {
    tokens: &'a [Token],
    macros: &'a MacroTable,
    current: usize,
    location: SourceLoc,
}

impl<'a> Evaluator<'a> {
    pub fn new(tokens: &'a [Token], macros: &'a MacroTable) -> Evaluator<'a> {
        let location = tokens
            .first()
            .map(|t| t.location.clone())
            .unwrap_or_default();
        Evaluator {
            tokens,
            macros,
            current: 0,
            location,
        }
    }

    /// Parses and evaluates the whole token sequence. Trailing tokens after
    /// the expression are an error.
    pub fn evaluate(&mut self) -> AsmResult<PpValue> {
        self.current = 0;
        if self.tokens.is_empty() {
            return err!(self.location, "empty expression");
        }

        let value = self.parse_expression()?;
        if !self.is_at_end() {
            let token = &self.tokens[self.current];
            return err!(
                token.location,
                "unexpected token '{}' after expression",
                token.lexeme
            );
        }
        Ok(value)
    }

    fn error(&self, message: String) -> AsmError {
        let location = self
            .tokens
            .get(self.current.min(self.tokens.len().saturating_sub(1)))
            .map(|t| t.location.clone())
            .unwrap_or_else(|| self.location.clone());
        AsmError {
            location: Some(location),
            message,
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.tokens.len()
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.tokens
            .get(self.current)
            .map_or(false, |t| t.kind == kind)
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    // Conversions.

    fn to_integer(&self, value: &PpValue) -> AsmResult<i64> {
        match value {
            PpValue::Void => Ok(0),
            PpValue::Integer(v) => Ok(*v),
            PpValue::Number(n) => Ok(n.signed_integer()),
            PpValue::Boolean(b) => Ok(if *b { 1 } else { 0 }),
            PpValue::Str(_) => Err(self.error("cannot convert string to integer".to_owned())),
        }
    }

    fn to_number(&self, value: &PpValue) -> AsmResult<PpNumber> {
        match value {
            PpValue::Void => Ok(PpNumber::new(0.0)),
            PpValue::Integer(v) => Ok(PpNumber::new(*v as f64)),
            PpValue::Number(n) => Ok(*n),
            PpValue::Boolean(b) => Ok(PpNumber::new(if *b { 1.0 } else { 0.0 })),
            PpValue::Str(_) => Err(self.error("cannot convert string to number".to_owned())),
        }
    }

    fn to_string_value(&self, value: &PpValue) -> AsmResult<String> {
        match value {
            PpValue::Str(s) => Ok(s.clone()),
            other => Err(self.error(format!(
                "expected string argument, found {}",
                other.type_of()
            ))),
        }
    }

    // Precedence cascade, lowest first.

    fn parse_expression(&mut self) -> AsmResult<PpValue> {
        self.parse_logical_or()
    }

    fn parse_logical_or(&mut self) -> AsmResult<PpValue> {
        let mut left = self.parse_logical_and()?;
        while self.matches(TokenKind::LogicalOr) {
            let right = self.parse_logical_and()?;
            let result = left.is_truthy() || right.is_truthy();
            left = PpValue::Integer(if result { 1 } else { 0 });
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> AsmResult<PpValue> {
        let mut left = self.parse_bitwise_or()?;
        while self.matches(TokenKind::LogicalAnd) {
            let right = self.parse_bitwise_or()?;
            let result = left.is_truthy() && right.is_truthy();
            left = PpValue::Integer(if result { 1 } else { 0 });
        }
        Ok(left)
    }

    fn parse_bitwise_or(&mut self) -> AsmResult<PpValue> {
        let mut left = self.parse_bitwise_xor()?;
        while self.matches(TokenKind::BitwiseOr) {
            let right = self.parse_bitwise_xor()?;
            left = PpValue::Integer(self.to_integer(&left)? | self.to_integer(&right)?);
        }
        Ok(left)
    }

    fn parse_bitwise_xor(&mut self) -> AsmResult<PpValue> {
        let mut left = self.parse_bitwise_and()?;
        while self.matches(TokenKind::BitwiseXor) {
            let right = self.parse_bitwise_and()?;
            left = PpValue::Integer(self.to_integer(&left)? ^ self.to_integer(&right)?);
        }
        Ok(left)
    }

    fn parse_bitwise_and(&mut self) -> AsmResult<PpValue> {
        let mut left = self.parse_equality()?;
        while self.matches(TokenKind::BitwiseAnd) {
            let right = self.parse_equality()?;
            left = PpValue::Integer(self.to_integer(&left)? & self.to_integer(&right)?);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> AsmResult<PpValue> {
        let mut left = self.parse_comparison()?;
        loop {
            if self.matches(TokenKind::CompareEqual) {
                let right = self.parse_comparison()?;
                let equal = self.values_equal(&left, &right)?;
                left = PpValue::Integer(if equal { 1 } else { 0 });
            } else if self.matches(TokenKind::CompareNotEqual) {
                let right = self.parse_comparison()?;
                let equal = self.values_equal(&left, &right)?;
                left = PpValue::Integer(if equal { 0 } else { 1 });
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn values_equal(&self, left: &PpValue, right: &PpValue) -> AsmResult<bool> {
        if let (PpValue::Str(a), PpValue::Str(b)) = (left, right) {
            return Ok(a == b);
        }
        Ok(self.to_integer(left)? == self.to_integer(right)?)
    }

    fn parse_comparison(&mut self) -> AsmResult<PpValue> {
        let mut left = self.parse_shift()?;
        loop {
            let op = if self.matches(TokenKind::CompareLess) {
                TokenKind::CompareLess
            } else if self.matches(TokenKind::CompareLessEqual) {
                TokenKind::CompareLessEqual
            } else if self.matches(TokenKind::CompareGreater) {
                TokenKind::CompareGreater
            } else if self.matches(TokenKind::CompareGreaterEqual) {
                TokenKind::CompareGreaterEqual
            } else {
                break;
            };
            let right = self.parse_shift()?;
            let a = self.to_integer(&left)?;
            let b = self.to_integer(&right)?;
            let result = match op {
                TokenKind::CompareLess => a < b,
                TokenKind::CompareLessEqual => a <= b,
                TokenKind::CompareGreater => a > b,
                _ => a >= b,
            };
            left = PpValue::Integer(if result { 1 } else { 0 });
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> AsmResult<PpValue> {
        let mut left = self.parse_additive()?;
        loop {
            if self.matches(TokenKind::ShiftLeft) {
                let right = self.parse_additive()?;
                let amount = self.to_integer(&right)? as u32 & 63;
                left = PpValue::Integer(self.to_integer(&left)? << amount);
            } else if self.matches(TokenKind::ShiftRight) {
                let right = self.parse_additive()?;
                let amount = self.to_integer(&right)? as u32 & 63;
                left = PpValue::Integer(self.to_integer(&left)? >> amount);
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> AsmResult<PpValue> {
        let mut left = self.parse_multiplicative()?;
        loop {
            if self.matches(TokenKind::Plus) {
                let right = self.parse_multiplicative()?;
                left = PpValue::Integer(
                    self.to_integer(&left)?.wrapping_add(self.to_integer(&right)?),
                );
            } else if self.matches(TokenKind::Minus) {
                let right = self.parse_multiplicative()?;
                left = PpValue::Integer(
                    self.to_integer(&left)?.wrapping_sub(self.to_integer(&right)?),
                );
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> AsmResult<PpValue> {
        let mut left = self.parse_exponent()?;
        loop {
            if self.matches(TokenKind::Times) {
                let right = self.parse_exponent()?;
                left = PpValue::Integer(
                    self.to_integer(&left)?.wrapping_mul(self.to_integer(&right)?),
                );
            } else if self.matches(TokenKind::Divide) {
                let right = self.parse_exponent()?;
                let divisor = self.to_integer(&right)?;
                if divisor == 0 {
                    return Err(self.error("division by zero".to_owned()));
                }
                left = PpValue::Integer(self.to_integer(&left)?.wrapping_div(divisor));
            } else if self.matches(TokenKind::Modulo) {
                let right = self.parse_exponent()?;
                let divisor = self.to_integer(&right)?;
                if divisor == 0 {
                    return Err(self.error("modulo by zero".to_owned()));
                }
                left = PpValue::Integer(self.to_integer(&left)?.wrapping_rem(divisor));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_exponent(&mut self) -> AsmResult<PpValue> {
        let left = self.parse_unary()?;
        if self.matches(TokenKind::Exponent) {
            // Right-associative.
            let right = self.parse_exponent()?;
            let base = self.to_integer(&left)?;
            let exponent = self.to_integer(&right)?;
            if exponent < 0 {
                return Err(self.error("negative exponent".to_owned()));
            }
            let result = base
                .checked_pow(exponent.min(i64::from(u32::max_value())) as u32)
                .ok_or_else(|| self.error("exponentiation overflow".to_owned()))?;
            return Ok(PpValue::Integer(result));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> AsmResult<PpValue> {
        if self.matches(TokenKind::LogicalNot) {
            let operand = self.parse_unary()?;
            return Ok(PpValue::Integer(if operand.is_truthy() { 0 } else { 1 }));
        }
        if self.matches(TokenKind::BitwiseNot) {
            let operand = self.parse_unary()?;
            return Ok(PpValue::Integer(!self.to_integer(&operand)?));
        }
        if self.matches(TokenKind::Minus) {
            let operand = self.parse_unary()?;
            // Negating a fixed-point number keeps its fractional part.
            if let PpValue::Number(number) = operand {
                return Ok(PpValue::Number(PpNumber::new(-number.float())));
            }
            return Ok(PpValue::Integer(-self.to_integer(&operand)?));
        }
        if self.matches(TokenKind::Plus) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> AsmResult<PpValue> {
        if self.check(TokenKind::IntegerLiteral) || self.check(TokenKind::CharacterLiteral) {
            let token = &self.tokens[self.current];
            let value = token.int_value.unwrap_or(0);
            self.current += 1;
            return Ok(PpValue::Integer(value));
        }

        if self.check(TokenKind::NumberLiteral) {
            let token = &self.tokens[self.current];
            let value = token.number_value.unwrap_or(0.0);
            self.current += 1;
            return Ok(PpValue::Number(PpNumber::new(value)));
        }

        if self.check(TokenKind::StringLiteral) {
            let token = &self.tokens[self.current];
            let value = token.lexeme.clone();
            self.current += 1;
            return Ok(PpValue::Str(value));
        }

        // Identifiers may be macro names or built-in function calls; keyword
        // tokens classified as preprocessor functions behave the same way.
        let is_identifier = self.check(TokenKind::Identifier);
        let is_pp_function = self
            .tokens
            .get(self.current)
            .and_then(|t| t.keyword_kind())
            .map_or(false, |kind| kind == KeywordKind::PreprocessorFunction);

        if is_identifier || is_pp_function {
            let name = self.tokens[self.current].lexeme.clone();
            self.current += 1;

            if self.check(TokenKind::LeftParen) {
                return self.parse_function_call(&name);
            }

            if let Some(entry) = self.macros.lookup_text_sub(&name) {
                if entry.replacement.is_empty() {
                    return Ok(PpValue::Integer(0));
                }
                let mut sub = Evaluator::new(&entry.replacement, self.macros);
                return sub.evaluate();
            }

            return Err(self.error(format!("unknown identifier '{}' in expression", name)));
        }

        if self.matches(TokenKind::LeftParen) {
            let value = self.parse_expression()?;
            if !self.matches(TokenKind::RightParen) {
                return Err(self.error("expected ')' after expression".to_owned()));
            }
            return Ok(value);
        }

        match self.tokens.get(self.current) {
            Some(token) => err!(
                token.location,
                "unexpected token '{}' in expression",
                token.lexeme
            ),
            None => err!(self.location, "unexpected end of expression"),
        }
    }

    fn parse_function_call(&mut self, name: &str) -> AsmResult<PpValue> {
        if !self.matches(TokenKind::LeftParen) {
            return Err(self.error(format!("expected '(' after function name '{}'", name)));
        }

        let mut args = Vec::new();

        if name == "defined" {
            // `defined` takes a bare identifier, not an expression.
            if self.check(TokenKind::Identifier) {
                let identifier = self.tokens[self.current].lexeme.clone();
                self.current += 1;
                args.push(PpValue::Str(identifier));
            } else {
                return Err(self.error("'defined' expects an identifier".to_owned()));
            }
        } else if !self.check(TokenKind::RightParen) {
            loop {
                let value = self.parse_expression().map_err(|e| AsmError {
                    location: e.location.clone(),
                    message: format!("error parsing argument for '{}': {}", name, e.message),
                })?;
                args.push(value);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }

        if !self.matches(TokenKind::RightParen) {
            return Err(self.error(format!("expected ')' after arguments to '{}'", name)));
        }

        self.dispatch_function(name, &args)
    }

    fn expect_arity(&self, name: &str, args: &[PpValue], count: usize) -> AsmResult<()> {
        if args.len() != count {
            return Err(self.error(format!(
                "{}() requires {} argument{}",
                name,
                count,
                if count == 1 { "" } else { "s" }
            )));
        }
        Ok(())
    }

    fn dispatch_function(&self, name: &str, args: &[PpValue]) -> AsmResult<PpValue> {
        match name {
            // Integer functions.
            "high" => {
                self.expect_arity(name, args, 1)?;
                Ok(PpValue::Integer((self.to_integer(&args[0])? >> 8) & 0xFF))
            }
            "low" => {
                self.expect_arity(name, args, 1)?;
                Ok(PpValue::Integer(self.to_integer(&args[0])? & 0xFF))
            }
            "bitwidth" => {
                self.expect_arity(name, args, 1)?;
                let value = self.to_integer(&args[0])?;
                let bits = 64 - value.wrapping_abs().leading_zeros() as i64;
                Ok(PpValue::Integer(if value == 0 { 0 } else { bits }))
            }
            "abs" => {
                self.expect_arity(name, args, 1)?;
                if let PpValue::Number(number) = &args[0] {
                    return Ok(PpValue::Number(PpNumber::new(number.float().abs())));
                }
                Ok(PpValue::Integer(self.to_integer(&args[0])?.wrapping_abs()))
            }
            "min" | "max" => {
                self.expect_arity(name, args, 2)?;
                if args.iter().any(|a| matches!(a, PpValue::Number(_))) {
                    let a = self.to_number(&args[0])?.float();
                    let b = self.to_number(&args[1])?.float();
                    let result = if name == "min" { a.min(b) } else { a.max(b) };
                    return Ok(PpValue::Number(PpNumber::new(result)));
                }
                let a = self.to_integer(&args[0])?;
                let b = self.to_integer(&args[1])?;
                Ok(PpValue::Integer(if name == "min" {
                    a.min(b)
                } else {
                    a.max(b)
                }))
            }
            "clamp" => {
                self.expect_arity(name, args, 3)?;
                if args.iter().any(|a| matches!(a, PpValue::Number(_))) {
                    let v = self.to_number(&args[0])?.float();
                    let lo = self.to_number(&args[1])?.float();
                    let hi = self.to_number(&args[2])?.float();
                    return Ok(PpValue::Number(PpNumber::new(v.max(lo).min(hi))));
                }
                let v = self.to_integer(&args[0])?;
                let lo = self.to_integer(&args[1])?;
                let hi = self.to_integer(&args[2])?;
                Ok(PpValue::Integer(v.max(lo).min(hi)))
            }
            // Fixed-point arithmetic.
            "fmul" => {
                self.expect_arity(name, args, 2)?;
                let a = self.to_number(&args[0])?.float();
                let b = self.to_number(&args[1])?.float();
                Ok(PpValue::Number(PpNumber::new(a * b)))
            }
            "fdiv" => {
                self.expect_arity(name, args, 2)?;
                let a = self.to_number(&args[0])?.float();
                let b = self.to_number(&args[1])?.float();
                if b == 0.0 {
                    return Err(self.error("division by zero in fdiv()".to_owned()));
                }
                Ok(PpValue::Number(PpNumber::new(a / b)))
            }
            "fmod" => {
                self.expect_arity(name, args, 2)?;
                let a = self.to_number(&args[0])?.float();
                let b = self.to_number(&args[1])?.float();
                if b == 0.0 {
                    return Err(self.error("division by zero in fmod()".to_owned()));
                }
                Ok(PpValue::Number(PpNumber::new(a % b)))
            }
            // Fixed-point conversion.
            "fint" => {
                self.expect_arity(name, args, 1)?;
                let value = self.to_number(&args[0])?.float();
                Ok(PpValue::Integer(value.trunc() as i64))
            }
            "ffrac" => {
                self.expect_arity(name, args, 1)?;
                let value = self.to_number(&args[0])?.float();
                Ok(PpValue::Number(PpNumber::new(value - value.trunc())))
            }
            "round" => {
                self.expect_arity(name, args, 1)?;
                Ok(PpValue::Integer(self.to_number(&args[0])?.float().round() as i64))
            }
            "ceil" => {
                self.expect_arity(name, args, 1)?;
                Ok(PpValue::Integer(self.to_number(&args[0])?.float().ceil() as i64))
            }
            "floor" => {
                self.expect_arity(name, args, 1)?;
                Ok(PpValue::Integer(self.to_number(&args[0])?.float().floor() as i64))
            }
            "trunc" => {
                self.expect_arity(name, args, 1)?;
                Ok(PpValue::Integer(self.to_number(&args[0])?.float().trunc() as i64))
            }
            // Math functions.
            "pow" => {
                self.expect_arity(name, args, 2)?;
                let base = self.to_number(&args[0])?.float();
                let exponent = self.to_number(&args[1])?.float();
                Ok(PpValue::Number(PpNumber::new(base.powf(exponent))))
            }
            "sqrt" => {
                self.expect_arity(name, args, 1)?;
                let value = self.to_number(&args[0])?.float();
                if value < 0.0 {
                    return Err(self.error("sqrt() of negative number".to_owned()));
                }
                Ok(PpValue::Number(PpNumber::new(value.sqrt())))
            }
            "exp" => {
                self.expect_arity(name, args, 1)?;
                Ok(PpValue::Number(PpNumber::new(
                    self.to_number(&args[0])?.float().exp(),
                )))
            }
            "ln" => {
                self.expect_arity(name, args, 1)?;
                let value = self.to_number(&args[0])?.float();
                if value <= 0.0 {
                    return Err(self.error("ln() of non-positive number".to_owned()));
                }
                Ok(PpValue::Number(PpNumber::new(value.ln())))
            }
            "log2" => {
                self.expect_arity(name, args, 1)?;
                let value = self.to_number(&args[0])?.float();
                if value <= 0.0 {
                    return Err(self.error("log2() of non-positive number".to_owned()));
                }
                Ok(PpValue::Number(PpNumber::new(value.log2())))
            }
            "log10" => {
                self.expect_arity(name, args, 1)?;
                let value = self.to_number(&args[0])?.float();
                if value <= 0.0 {
                    return Err(self.error("log10() of non-positive number".to_owned()));
                }
                Ok(PpValue::Number(PpNumber::new(value.log10())))
            }
            "log" => {
                self.expect_arity(name, args, 2)?;
                let value = self.to_number(&args[0])?.float();
                let base = self.to_number(&args[1])?.float();
                if value <= 0.0 {
                    return Err(self.error("log() of non-positive number".to_owned()));
                }
                if base <= 0.0 || base == 1.0 {
                    return Err(self.error("log() base must be positive and not 1".to_owned()));
                }
                Ok(PpValue::Number(PpNumber::new(value.ln() / base.ln())))
            }
            // Trigonometric functions, in turns.
            "sin" => {
                self.expect_arity(name, args, 1)?;
                let turns = self.to_number(&args[0])?.float();
                Ok(PpValue::Number(PpNumber::new((turns * TWO_PI).sin())))
            }
            "cos" => {
                self.expect_arity(name, args, 1)?;
                let turns = self.to_number(&args[0])?.float();
                Ok(PpValue::Number(PpNumber::new((turns * TWO_PI).cos())))
            }
            "tan" => {
                self.expect_arity(name, args, 1)?;
                let turns = self.to_number(&args[0])?.float();
                Ok(PpValue::Number(PpNumber::new((turns * TWO_PI).tan())))
            }
            "asin" => {
                self.expect_arity(name, args, 1)?;
                let value = self.to_number(&args[0])?.float();
                if value < -1.0 || value > 1.0 {
                    return Err(self.error("asin() argument must be in [-1, 1]".to_owned()));
                }
                Ok(PpValue::Number(PpNumber::new(value.asin() / TWO_PI)))
            }
            "acos" => {
                self.expect_arity(name, args, 1)?;
                let value = self.to_number(&args[0])?.float();
                if value < -1.0 || value > 1.0 {
                    return Err(self.error("acos() argument must be in [-1, 1]".to_owned()));
                }
                Ok(PpValue::Number(PpNumber::new(value.acos() / TWO_PI)))
            }
            "atan" => {
                self.expect_arity(name, args, 1)?;
                let value = self.to_number(&args[0])?.float();
                Ok(PpValue::Number(PpNumber::new(value.atan() / TWO_PI)))
            }
            "atan2" => {
                self.expect_arity(name, args, 2)?;
                let y = self.to_number(&args[0])?.float();
                let x = self.to_number(&args[1])?.float();
                Ok(PpValue::Number(PpNumber::new(y.atan2(x) / TWO_PI)))
            }
            // String functions.
            "strlen" => {
                self.expect_arity(name, args, 1)?;
                Ok(PpValue::Integer(self.to_string_value(&args[0])?.len() as i64))
            }
            "strcmp" => {
                self.expect_arity(name, args, 2)?;
                let a = self.to_string_value(&args[0])?;
                let b = self.to_string_value(&args[1])?;
                Ok(PpValue::Integer(match a.cmp(&b) {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                }))
            }
            "substr" => {
                if args.len() < 2 || args.len() > 3 {
                    return Err(self.error("substr() requires 2 or 3 arguments".to_owned()));
                }
                let string = self.to_string_value(&args[0])?;
                let start = self.to_integer(&args[1])?;
                if start < 0 || start as usize >= string.len() {
                    return Ok(PpValue::Str(String::new()));
                }
                let start = start as usize;
                let end = if args.len() == 3 {
                    let length = self.to_integer(&args[2])?.max(0) as usize;
                    (start + length).min(string.len())
                } else {
                    string.len()
                };
                Ok(PpValue::Str(string[start..end].to_owned()))
            }
            "indexof" => {
                self.expect_arity(name, args, 2)?;
                let string = self.to_string_value(&args[0])?;
                let needle = self.to_string_value(&args[1])?;
                Ok(PpValue::Integer(match string.find(&needle) {
                    Some(position) => position as i64,
                    None => -1,
                }))
            }
            "toupper" => {
                self.expect_arity(name, args, 1)?;
                Ok(PpValue::Str(self.to_string_value(&args[0])?.to_uppercase()))
            }
            "tolower" => {
                self.expect_arity(name, args, 1)?;
                Ok(PpValue::Str(self.to_string_value(&args[0])?.to_lowercase()))
            }
            "concat" => {
                if args.len() < 2 {
                    return Err(self.error("concat() requires at least 2 arguments".to_owned()));
                }
                let mut result = String::new();
                for arg in args {
                    result.push_str(&self.to_string_value(arg)?);
                }
                Ok(PpValue::Str(result))
            }
            // Reflection.
            "defined" => {
                self.expect_arity(name, args, 1)?;
                let identifier = self.to_string_value(&args[0])?;
                Ok(PpValue::Integer(if self.macros.is_defined(&identifier) {
                    1
                } else {
                    0
                }))
            }
            "typeof" => {
                self.expect_arity(name, args, 1)?;
                Ok(PpValue::Str(args[0].type_of().to_owned()))
            }
            _ => Err(self.error(format!("unknown function '{}'", name))),
        }
    }
}
