use crate::ast::*;
use crate::lexer::Lexer;
use crate::parser;
use g10::{ConditionCode, Instruction, RegisterKind};
use matches::assert_matches;

fn parse(source: &str) -> Module {
    let mut lexer = Lexer::new();
    lexer.load_from_string(source).unwrap();
    parser::parse(&mut lexer).unwrap()
}

fn parse_err(source: &str) -> String {
    let mut lexer = Lexer::new();
    lexer.load_from_string(source).unwrap();
    parser::parse(&mut lexer).unwrap_err().message
}

fn single_instruction(source: &str) -> (Instruction, Vec<Operand>) {
    let mut module = parse(source);
    assert_eq!(module.statements.len(), 1);
    match module.statements.remove(0).kind {
        StatementKind::Instruction {
            instruction,
            operands,
        } => (instruction, operands),
        other => panic!("expected instruction, got {:?}", other),
    }
}

#[test]
fn label_definition() {
    let module = parse("main:\n");
    assert_matches!(
        &module.statements[0].kind,
        StatementKind::LabelDefinition { name } if name == "main"
    );
}

#[test]
fn instruction_with_no_operands() {
    let (instruction, operands) = single_instruction("HALT\n");
    assert_eq!(instruction, Instruction::Halt);
    assert!(operands.is_empty());
}

#[test]
fn instruction_with_register_and_immediate() {
    let (instruction, operands) = single_instruction("LD L0, 0x42\n");
    assert_eq!(instruction, Instruction::Ld);
    assert_eq!(operands.len(), 2);
    assert_matches!(operands[0].kind, OperandKind::Register(RegisterKind::L0));
    assert_matches!(
        &operands[1].kind,
        OperandKind::Immediate(Expression {
            kind: ExprKind::IntegerLiteral(0x42),
            ..
        })
    );
}

#[test]
fn mnemonic_aliases_map_to_canonical_instructions() {
    assert_eq!(single_instruction("JP 0x2000\n").0, Instruction::Jmp);
    assert_eq!(single_instruction("JR 4\n").0, Instruction::Jpb);
    assert_eq!(single_instruction("CPL L1\n").0, Instruction::Not);
    assert_eq!(single_instruction("CP L0, L1\n").0, Instruction::Cmp);
    assert_eq!(single_instruction("TCF\n").0, Instruction::Ccf);
}

#[test]
fn condition_operands() {
    let (_, operands) = single_instruction("JMP ZS, 0x2000\n");
    assert_matches!(operands[0].kind, OperandKind::Condition(ConditionCode::Zs));
}

#[test]
fn direct_memory_operand() {
    let (_, operands) = single_instruction("LD D0, [0x8000]\n");
    assert_matches!(&operands[1].kind, OperandKind::DirectMemory(_));
}

#[test]
fn indirect_memory_operand() {
    let (_, operands) = single_instruction("LD L0, [D1]\n");
    assert_matches!(
        operands[1].kind,
        OperandKind::IndirectMemory(RegisterKind::D1)
    );
}

#[test]
fn too_many_operands_is_an_error() {
    assert!(parse_err("LD L0, L1, L2\n").contains("failed"));
}

#[test]
fn directives_parse() {
    let module = parse(
        ".org 0x2000\n.rom\n.ram\n.int 3\n.byte 1, 2\n.word 3\n.dword 4\n\
         .space 16\n.global a, b\n.extern c\n",
    );
    let directives: Vec<&Directive> = module
        .statements
        .iter()
        .filter_map(|s| match &s.kind {
            StatementKind::Directive(d) => Some(d),
            _ => None,
        })
        .collect();
    assert_eq!(directives.len(), 10);
    assert_matches!(directives[0], Directive::Org { .. });
    assert_matches!(directives[1], Directive::Rom);
    assert_matches!(directives[2], Directive::Ram);
    assert_matches!(directives[3], Directive::Int { .. });
    assert_matches!(directives[4], Directive::Byte { values } if values.len() == 2);
    assert_matches!(directives[5], Directive::Word { values } if values.len() == 1);
    assert_matches!(directives[6], Directive::Dword { .. });
    assert_matches!(directives[7], Directive::Space { .. });
    assert_matches!(directives[8], Directive::Global { names } if names.len() == 2);
    assert_matches!(directives[9], Directive::Extern { names } if names == &["c"]);
}

#[test]
fn directive_aliases() {
    let module = parse(".db 1\n.dw 2\n.dd 3\n.ds 4\n");
    let kinds: Vec<&Directive> = module
        .statements
        .iter()
        .filter_map(|s| match &s.kind {
            StatementKind::Directive(d) => Some(d),
            _ => None,
        })
        .collect();
    assert_matches!(kinds[0], Directive::Byte { .. });
    assert_matches!(kinds[1], Directive::Word { .. });
    assert_matches!(kinds[2], Directive::Dword { .. });
    assert_matches!(kinds[3], Directive::Space { .. });
}

#[test]
fn let_const_and_assignment() {
    let module = parse(".let $x = 1\n.const $y = 2\n$x += 3\n");
    assert_matches!(
        &module.statements[0].kind,
        StatementKind::Directive(Directive::Let { name, .. }) if name == "x"
    );
    assert_matches!(
        &module.statements[1].kind,
        StatementKind::Directive(Directive::Const { name, .. }) if name == "y"
    );
    assert_matches!(
        &module.statements[2].kind,
        StatementKind::VarAssignment { name, .. } if name == "x"
    );
}

#[test]
fn expression_precedence_shape() {
    let module = parse(".org 1 + 2 * 3\n");
    let address = match &module.statements[0].kind {
        StatementKind::Directive(Directive::Org { address }) => address,
        other => panic!("expected .org, got {:?}", other),
    };
    // The tree must be Add(1, Multiply(2, 3)).
    match &address.kind {
        ExprKind::Binary { op, left, right } => {
            assert_eq!(*op, BinaryOp::Add);
            assert_matches!(left.kind, ExprKind::IntegerLiteral(1));
            assert_matches!(
                &right.kind,
                ExprKind::Binary {
                    op: BinaryOp::Multiply,
                    ..
                }
            );
        }
        other => panic!("expected binary expression, got {:?}", other),
    }
}

#[test]
fn exponent_is_right_associative() {
    let module = parse(".org 2 ** 3 ** 2\n");
    let address = match &module.statements[0].kind {
        StatementKind::Directive(Directive::Org { address }) => address,
        _ => unreachable!(),
    };
    match &address.kind {
        ExprKind::Binary { op, left, right } => {
            assert_eq!(*op, BinaryOp::Exponent);
            assert_matches!(left.kind, ExprKind::IntegerLiteral(2));
            assert_matches!(
                &right.kind,
                ExprKind::Binary {
                    op: BinaryOp::Exponent,
                    ..
                }
            );
        }
        other => panic!("expected binary expression, got {:?}", other),
    }
}

#[test]
fn grouping_nodes_are_kept() {
    let module = parse(".org (1 + 2) * 3\n");
    let address = match &module.statements[0].kind {
        StatementKind::Directive(Directive::Org { address }) => address,
        _ => unreachable!(),
    };
    match &address.kind {
        ExprKind::Binary { left, .. } => {
            assert_matches!(left.kind, ExprKind::Grouping(_));
        }
        other => panic!("expected binary expression, got {:?}", other),
    }
}

#[test]
fn recovery_reports_multiple_errors() {
    // Two bad statements and one good one; the parse fails with a count of
    // two, having recovered at each newline.
    let error = parse_err("??\nNOP\n)(\n");
    assert!(error.contains("2 errors"));
}

#[test]
fn statement_locations_are_attached() {
    let module = parse("\n\nNOP\n");
    assert_eq!(module.statements[0].location.line, 3);
}

#[test]
fn missing_bracket_is_an_error() {
    assert!(parse_err("LD L0, [0x8000\n").contains("failed"));
}
