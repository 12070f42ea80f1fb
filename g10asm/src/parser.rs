//! The parser: post-preprocessor tokens to an AST module.
//!
//! Statement errors do not abort the whole parse. Each one is reported to
//! stderr with its location, the parser synchronizes to the next newline or
//! statement-start keyword, and parsing continues so a single invocation
//! surfaces as many diagnostics as possible.

use crate::ast::*;
use crate::error::{AsmError, AsmResult};
use crate::keyword::{self, DirectiveType, KeywordKind};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// Parses the lexer's token stream into a module.
///
/// On failure every statement diagnostic has already been printed to stderr
/// and the returned error carries only a summary.
pub fn parse(lexer: &mut Lexer) -> AsmResult<Module> {
    lexer.reset_position();

    let mut module = Module::default();
    let mut error_count = 0usize;

    while !lexer.is_at_end() {
        lexer.skip_tokens_of(TokenKind::NewLine);
        match lexer.peek_token(0) {
            Ok(token) if token.kind == TokenKind::EndOfFile => break,
            Ok(_) => {}
            Err(_) => break,
        }

        match parse_statement(lexer) {
            Ok(statement) => module.statements.push(statement),
            Err(error) => {
                eprintln!("{}", error);
                error_count += 1;
                synchronize(lexer);
            }
        }
    }

    if error_count > 0 {
        return Err(AsmError::without_location(format!(
            "parsing failed with {} error{}",
            error_count,
            if error_count == 1 { "" } else { "s" }
        )));
    }
    Ok(module)
}

/// Skips tokens until the next statement boundary: just past a newline, or
/// at a statement-start keyword (instruction mnemonic or assembler
/// directive), or at end of input.
fn synchronize(lexer: &mut Lexer) {
    while let Ok(token) = lexer.peek_token(0) {
        match token.kind {
            TokenKind::EndOfFile => return,
            TokenKind::NewLine => {
                let _ = lexer.consume_token();
                return;
            }
            TokenKind::Keyword => match token.keyword_kind() {
                Some(KeywordKind::InstructionMnemonic)
                | Some(KeywordKind::AssemblerDirective) => return,
                _ => {
                    let _ = lexer.consume_token();
                }
            },
            _ => {
                let _ = lexer.consume_token();
            }
        }
    }
}

fn expect(lexer: &mut Lexer, kind: TokenKind, what: &str) -> AsmResult<Token> {
    let token = lexer.peek_token(0)?.clone();
    if token.kind != kind {
        return err!(
            token.location,
            "expected {}, found {} '{}'",
            what,
            token.describe(),
            token.lexeme
        );
    }
    lexer.consume_token()
}

fn parse_statement(lexer: &mut Lexer) -> AsmResult<Statement> {
    let token = lexer.peek_token(0)?.clone();

    if token.kind == TokenKind::Keyword {
        match token.keyword_kind() {
            Some(KeywordKind::AssemblerDirective) => return parse_directive(lexer),
            Some(KeywordKind::InstructionMnemonic) => return parse_instruction(lexer),
            Some(KeywordKind::PreprocessorDirective) => {
                return err!(
                    token.location,
                    "preprocessor directive '{}' survived preprocessing",
                    token.lexeme
                );
            }
            _ => {}
        }
    }

    if token.kind == TokenKind::Identifier {
        if let Ok(next) = lexer.peek_token(1) {
            if next.kind == TokenKind::Colon {
                let name_token = lexer.consume_token()?;
                lexer.consume_token()?;
                return Ok(Statement {
                    location: name_token.location.clone(),
                    kind: StatementKind::LabelDefinition {
                        name: name_token.lexeme,
                    },
                });
            }
        }
    }

    if token.kind == TokenKind::Variable {
        return parse_var_assignment(lexer);
    }

    err!(
        token.location,
        "unsupported statement starting with {} '{}'",
        token.describe(),
        token.lexeme
    )
}

fn parse_instruction(lexer: &mut Lexer) -> AsmResult<Statement> {
    let mnemonic = lexer.consume_token()?;
    let instruction = mnemonic
        .keyword
        .and_then(|id| keyword::get(id).instruction())
        .ok_or_else(|| AsmError {
            location: Some(mnemonic.location.clone()),
            message: format!("'{}' is not an instruction mnemonic", mnemonic.lexeme),
        })?;

    let mut operands = Vec::new();
    loop {
        let next = lexer.peek_token(0)?;
        if next.kind == TokenKind::NewLine || next.kind == TokenKind::EndOfFile {
            break;
        }

        operands.push(parse_operand(lexer)?);

        let next = lexer.peek_token(0)?;
        if next.kind == TokenKind::Comma {
            lexer.consume_token()?;
            continue;
        }
        break;
    }

    if operands.len() > 2 {
        return err!(
            mnemonic.location,
            "instruction '{}' has too many operands ({})",
            mnemonic.lexeme,
            operands.len()
        );
    }

    Ok(Statement {
        location: mnemonic.location,
        kind: StatementKind::Instruction {
            instruction,
            operands,
        },
    })
}

fn parse_operand(lexer: &mut Lexer) -> AsmResult<Operand> {
    let token = lexer.peek_token(0)?.clone();

    if let Some(id) = token.keyword {
        let entry = keyword::get(id);
        match entry.kind {
            KeywordKind::RegisterName => {
                lexer.consume_token()?;
                return Ok(Operand {
                    location: token.location,
                    kind: OperandKind::Register(entry.register().unwrap()),
                });
            }
            KeywordKind::BranchingCondition => {
                lexer.consume_token()?;
                return Ok(Operand {
                    location: token.location,
                    kind: OperandKind::Condition(entry.condition().unwrap()),
                });
            }
            _ => {
                return err!(
                    token.location,
                    "{} '{}' cannot be used as an operand",
                    entry.kind.describe(),
                    token.lexeme
                );
            }
        }
    }

    if token.kind == TokenKind::LeftBracket {
        return parse_memory_operand(lexer);
    }

    let expression = parse_expression(lexer)?;
    Ok(Operand {
        location: token.location,
        kind: OperandKind::Immediate(expression),
    })
}

fn parse_memory_operand(lexer: &mut Lexer) -> AsmResult<Operand> {
    let bracket = expect(lexer, TokenKind::LeftBracket, "'['")?;

    // A register directly inside the brackets makes the operand indirect.
    let next = lexer.peek_token(0)?.clone();
    if next.keyword_kind() == Some(KeywordKind::RegisterName) {
        let register = keyword::get(next.keyword.unwrap()).register().unwrap();
        lexer.consume_token()?;
        expect(lexer, TokenKind::RightBracket, "']'")?;
        return Ok(Operand {
            location: next.location,
            kind: OperandKind::IndirectMemory(register),
        });
    }

    let address = parse_expression(lexer)?;
    expect(lexer, TokenKind::RightBracket, "']'")?;
    Ok(Operand {
        location: bracket.location,
        kind: OperandKind::DirectMemory(address),
    })
}

fn parse_directive(lexer: &mut Lexer) -> AsmResult<Statement> {
    let token = lexer.consume_token()?;
    let directive = token
        .keyword
        .and_then(|id| keyword::get(id).directive())
        .ok_or_else(|| AsmError {
            location: Some(token.location.clone()),
            message: format!("'{}' is not an assembler directive", token.lexeme),
        })?;

    let kind = match directive {
        DirectiveType::Org => Directive::Org {
            address: parse_expression(lexer)?,
        },
        DirectiveType::Rom => Directive::Rom,
        DirectiveType::Ram => Directive::Ram,
        DirectiveType::Int => Directive::Int {
            vector: parse_expression(lexer)?,
        },
        DirectiveType::Byte => Directive::Byte {
            values: parse_expression_list(lexer)?,
        },
        DirectiveType::Word => Directive::Word {
            values: parse_expression_list(lexer)?,
        },
        DirectiveType::Dword => Directive::Dword {
            values: parse_expression_list(lexer)?,
        },
        DirectiveType::Space => Directive::Space {
            size: parse_expression(lexer)?,
        },
        DirectiveType::Global => Directive::Global {
            names: parse_name_list(lexer)?,
        },
        DirectiveType::Extern => Directive::Extern {
            names: parse_name_list(lexer)?,
        },
        DirectiveType::Let => {
            let (name, value) = parse_variable_binding(lexer, "`.let`")?;
            Directive::Let { name, value }
        }
        DirectiveType::Const => {
            let (name, value) = parse_variable_binding(lexer, "`.const`")?;
            Directive::Const { name, value }
        }
        other => {
            return err!(
                token.location,
                "directive '{}' ({:?}) is not valid here",
                token.lexeme,
                other
            );
        }
    };

    Ok(Statement {
        location: token.location,
        kind: StatementKind::Directive(kind),
    })
}

fn parse_expression_list(lexer: &mut Lexer) -> AsmResult<Vec<Expression>> {
    let mut values = vec![parse_expression(lexer)?];
    while lexer.peek_token(0)?.kind == TokenKind::Comma {
        lexer.consume_token()?;
        values.push(parse_expression(lexer)?);
    }
    Ok(values)
}

fn parse_name_list(lexer: &mut Lexer) -> AsmResult<Vec<String>> {
    let first = expect(lexer, TokenKind::Identifier, "symbol name")?;
    let mut names = vec![first.lexeme];
    while lexer.peek_token(0)?.kind == TokenKind::Comma {
        lexer.consume_token()?;
        let name = expect(lexer, TokenKind::Identifier, "symbol name")?;
        names.push(name.lexeme);
    }
    Ok(names)
}

fn parse_variable_binding(lexer: &mut Lexer, directive: &str) -> AsmResult<(String, Expression)> {
    let variable = lexer.peek_token(0)?.clone();
    if variable.kind != TokenKind::Variable {
        return err!(
            variable.location,
            "expected variable name (starting with '$') after {}",
            directive
        );
    }
    lexer.consume_token()?;
    expect(lexer, TokenKind::AssignEqual, "'='")?;
    let value = parse_expression(lexer)?;
    Ok((variable.lexeme[1..].to_owned(), value))
}

fn parse_var_assignment(lexer: &mut Lexer) -> AsmResult<Statement> {
    let variable = lexer.consume_token()?;
    let op_token = lexer.peek_token(0)?.clone();
    if !op_token.kind.is_assignment() {
        return err!(
            op_token.location,
            "expected assignment operator after variable '{}'",
            variable.lexeme
        );
    }
    lexer.consume_token()?;
    let value = parse_expression(lexer)?;

    Ok(Statement {
        location: variable.location,
        kind: StatementKind::VarAssignment {
            name: variable.lexeme[1..].to_owned(),
            op: op_token.kind,
            value,
        },
    })
}

// Expression parsing: a precedence cascade from logical OR down to primary,
// mirroring the preprocessor evaluator's operator table. All levels are
// left-associative except exponentiation.

pub fn parse_expression(lexer: &mut Lexer) -> AsmResult<Expression> {
    parse_logical_or(lexer)
}

macro_rules! binary_level {
    ( $name:ident, $next:ident, $( $kind:ident => $op:ident ),+ ) => {
        fn $name(lexer: &mut Lexer) -> AsmResult<Expression> {
            let mut left = $next(lexer)?;
            loop {
                let op = match lexer.peek_token(0) {
                    $( Ok(token) if token.kind == TokenKind::$kind => BinaryOp::$op, )+
                    _ => break,
                };
                lexer.consume_token()?;
                let right = $next(lexer)?;
                let location = left.location.clone();
                left = Expression {
                    location,
                    kind: ExprKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                };
            }
            Ok(left)
        }
    };
}

binary_level!(parse_logical_or, parse_logical_and, LogicalOr => LogicalOr);
binary_level!(parse_logical_and, parse_bitwise_or, LogicalAnd => LogicalAnd);
binary_level!(parse_bitwise_or, parse_bitwise_xor, BitwiseOr => BitwiseOr);
binary_level!(parse_bitwise_xor, parse_bitwise_and, BitwiseXor => BitwiseXor);
binary_level!(parse_bitwise_and, parse_equality, BitwiseAnd => BitwiseAnd);
binary_level!(
    parse_equality, parse_relational,
    CompareEqual => CompareEqual, CompareNotEqual => CompareNotEqual
);
binary_level!(
    parse_relational, parse_shift,
    CompareLess => CompareLess, CompareLessEqual => CompareLessEqual,
    CompareGreater => CompareGreater, CompareGreaterEqual => CompareGreaterEqual
);
binary_level!(
    parse_shift, parse_additive,
    ShiftLeft => ShiftLeft, ShiftRight => ShiftRight
);
binary_level!(
    parse_additive, parse_multiplicative,
    Plus => Add, Minus => Subtract
);
binary_level!(
    parse_multiplicative, parse_exponent,
    Times => Multiply, Divide => Divide, Modulo => Modulo
);

fn parse_exponent(lexer: &mut Lexer) -> AsmResult<Expression> {
    let left = parse_unary(lexer)?;
    if let Ok(token) = lexer.peek_token(0) {
        if token.kind == TokenKind::Exponent {
            lexer.consume_token()?;
            // Right-associative.
            let right = parse_exponent(lexer)?;
            let location = left.location.clone();
            return Ok(Expression {
                location,
                kind: ExprKind::Binary {
                    op: BinaryOp::Exponent,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            });
        }
    }
    Ok(left)
}

fn parse_unary(lexer: &mut Lexer) -> AsmResult<Expression> {
    let token = lexer.peek_token(0)?.clone();
    let op = match token.kind {
        TokenKind::Minus => Some(UnaryOp::Negate),
        TokenKind::BitwiseNot => Some(UnaryOp::BitwiseNot),
        TokenKind::LogicalNot => Some(UnaryOp::LogicalNot),
        TokenKind::Plus => {
            lexer.consume_token()?;
            return parse_unary(lexer);
        }
        _ => None,
    };

    if let Some(op) = op {
        lexer.consume_token()?;
        let operand = parse_unary(lexer)?;
        return Ok(Expression {
            location: token.location,
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
        });
    }

    parse_primary(lexer)
}

fn parse_primary(lexer: &mut Lexer) -> AsmResult<Expression> {
    let token = lexer.peek_token(0)?.clone();

    let kind = match token.kind {
        TokenKind::IntegerLiteral | TokenKind::CharacterLiteral => {
            ExprKind::IntegerLiteral(token.int_value.unwrap_or(0))
        }
        TokenKind::NumberLiteral => ExprKind::NumberLiteral(token.number_value.unwrap_or(0.0)),
        TokenKind::StringLiteral => ExprKind::StringLiteral(token.lexeme.clone()),
        TokenKind::Identifier => ExprKind::Identifier(token.lexeme.clone()),
        TokenKind::Variable => ExprKind::Variable(token.lexeme[1..].to_owned()),
        TokenKind::Placeholder => ExprKind::Placeholder(token.lexeme[1..].to_owned()),
        TokenKind::LeftParen => {
            lexer.consume_token()?;
            let inner = parse_expression(lexer)?;
            expect(lexer, TokenKind::RightParen, "')'")?;
            return Ok(Expression {
                location: token.location,
                kind: ExprKind::Grouping(Box::new(inner)),
            });
        }
        _ => {
            return err!(
                token.location,
                "unexpected {} '{}' in expression",
                token.describe(),
                token.lexeme
            );
        }
    };

    lexer.consume_token()?;
    Ok(Expression {
        location: token.location,
        kind,
    })
}
