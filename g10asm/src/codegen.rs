//! Code generation: one parsed module in, one relocatable object out.
//!
//! Three passes run over the AST:
//!
//! 1. **Variable pass** interprets `.let`, `.const` and variable assignments
//!    in source order, so the address passes see a complete environment.
//! 2. **Address pass** walks statements with the location counters, creating
//!    sections and binding labels to `(section, offset)`.
//! 3. **Emission pass** re-walks the statements producing bytes, choosing
//!    opcode selectors per operand form and recording relocations for every
//!    reference whose final address the linker must supply.

use crate::ast::*;
use crate::error::{AsmError, AsmResult, SourceLoc};
use crate::token::TokenKind;
use byteorder::ByteOrder;
use g10::{ConditionCode, Endian, Instruction, RegisterKind, RegisterWidth};
use g10file::object::{
    self, section_flags, symbol_flags, Object, Relocation, RelocationType, Section, SectionType,
    Symbol, SymbolBinding, SymbolType,
};
use std::collections::HashMap;

/// Symbol names recognized as program entry points, in priority order.
const ENTRY_NAMES: [&str; 3] = ["main", "_start", "start"];

/// Generates an object file from a parsed module.
pub fn generate(module: &Module) -> AsmResult<Object> {
    let mut state = CodegenState::new();
    variable_pass(&mut state, module)?;
    address_pass(&mut state, module)?;
    emission_pass(&mut state, module)?;
    finalize(state)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Region {
    Rom,
    Ram,
}

struct SectionPlan {
    base: u32,
    region: Region,
    /// Total size planned by the address pass.
    size: u32,
    /// Append position within the section for the running pass.
    cursor: u32,
    /// Bytes, filled by the emission pass (ROM sections only).
    data: Vec<u8>,
}

struct VariableSlot {
    value: i64,
    constant: bool,
}

struct LabelDef {
    name: String,
    section: usize,
    offset: u32,
    kind: SymbolType,
}

struct PendingReloc {
    section: usize,
    offset: u32,
    symbol: String,
    kind: RelocationType,
    addend: i64,
    location: SourceLoc,
}

struct CodegenState {
    sections: Vec<SectionPlan>,
    rom_section: Option<usize>,
    ram_section: Option<usize>,
    in_rom: bool,

    variables: HashMap<String, VariableSlot>,
    labels: Vec<LabelDef>,
    label_index: HashMap<String, usize>,
    globals: Vec<String>,
    externs: Vec<String>,
    relocations: Vec<PendingReloc>,
}

impl CodegenState {
    fn new() -> CodegenState {
        CodegenState {
            sections: Vec::new(),
            rom_section: None,
            ram_section: None,
            in_rom: true,
            variables: HashMap::new(),
            labels: Vec::new(),
            label_index: HashMap::new(),
            globals: Vec::new(),
            externs: Vec::new(),
            relocations: Vec::new(),
        }
    }

    fn is_extern(&self, name: &str) -> bool {
        self.externs.iter().any(|n| n == name)
    }

    fn find_label(&self, name: &str) -> Option<&LabelDef> {
        self.label_index.get(name).map(|&index| &self.labels[index])
    }

    /// Finds or creates the section based at `address` and makes it the
    /// current section of its region. Returns the section index.
    fn switch_to_address(&mut self, address: u32, location: &SourceLoc) -> AsmResult<usize> {
        let region = if address < g10::RAM_START {
            Region::Rom
        } else {
            Region::Ram
        };
        self.in_rom = region == Region::Rom;

        let index = match self.sections.iter().position(|s| s.base == address) {
            Some(index) => index,
            None => {
                if region == Region::Rom && address < g10::IVT_START {
                    return err!(
                        location,
                        "address 0x{:08X} falls inside the program metadata region",
                        address
                    );
                }
                self.sections.push(SectionPlan {
                    base: address,
                    region,
                    size: 0,
                    cursor: 0,
                    data: Vec::new(),
                });
                self.sections.len() - 1
            }
        };

        match region {
            Region::Rom => self.rom_section = Some(index),
            Region::Ram => self.ram_section = Some(index),
        }
        Ok(index)
    }

    /// The current region's section, created lazily at the region's initial
    /// counter when nothing has selected one yet.
    fn current_section(&mut self, location: &SourceLoc) -> AsmResult<usize> {
        let existing = if self.in_rom {
            self.rom_section
        } else {
            self.ram_section
        };
        match existing {
            Some(index) => Ok(index),
            None => {
                let default = if self.in_rom {
                    g10::CODE_START
                } else {
                    g10::RAM_START
                };
                self.switch_to_address(default, location)
            }
        }
    }

    /// The absolute address the location counter currently points at.
    fn counter(&mut self, location: &SourceLoc) -> AsmResult<u32> {
        let index = self.current_section(location)?;
        let section = &self.sections[index];
        Ok(section.base + section.cursor)
    }

    /// Advances the current section's cursor without emitting bytes.
    fn advance(&mut self, amount: u32, location: &SourceLoc) -> AsmResult<()> {
        let index = self.current_section(location)?;
        let section = &mut self.sections[index];
        let end = u64::from(section.base) + u64::from(section.cursor) + u64::from(amount);
        let limit = match section.region {
            Region::Rom => u64::from(g10::ROM_END) + 1,
            Region::Ram => u64::from(g10::RAM_END) + 1,
        };
        if end > limit {
            return err!(
                location,
                "emission at 0x{:08X} runs past the end of the region",
                section.base + section.cursor
            );
        }
        section.cursor += amount;
        Ok(())
    }

    /// Appends bytes to the current section (emission pass, ROM only).
    fn emit_bytes(&mut self, bytes: &[u8], location: &SourceLoc) -> AsmResult<()> {
        let index = self.current_section(location)?;
        if self.sections[index].region == Region::Ram {
            return err!(location, "cannot emit initialized data in the RAM region");
        }
        self.advance(bytes.len() as u32, location)?;
        self.sections[index].data.extend_from_slice(bytes);
        Ok(())
    }

    fn emit_byte(&mut self, byte: u8, location: &SourceLoc) -> AsmResult<()> {
        self.emit_bytes(&[byte], location)
    }

    fn emit_word(&mut self, word: u16, location: &SourceLoc) -> AsmResult<()> {
        let mut buffer = [0u8; 2];
        Endian::write_u16(&mut buffer, word);
        self.emit_bytes(&buffer, location)
    }

    fn emit_dword(&mut self, dword: u32, location: &SourceLoc) -> AsmResult<()> {
        let mut buffer = [0u8; 4];
        Endian::write_u32(&mut buffer, dword);
        self.emit_bytes(&buffer, location)
    }

    fn add_reloc(
        &mut self,
        kind: RelocationType,
        symbol: &str,
        addend: i64,
        location: &SourceLoc,
    ) -> AsmResult<()> {
        if addend < i64::from(i16::min_value()) || addend > i64::from(i16::max_value()) {
            return err!(
                location,
                "relocation addend {} does not fit in 16 bits",
                addend
            );
        }
        let section = self.current_section(location)?;
        let offset = self.sections[section].cursor;
        self.relocations.push(PendingReloc {
            section,
            offset,
            symbol: symbol.to_owned(),
            kind,
            addend,
            location: location.clone(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Variable pass.

fn variable_pass(state: &mut CodegenState, module: &Module) -> AsmResult<()> {
    for statement in &module.statements {
        match &statement.kind {
            StatementKind::Directive(Directive::Let { name, value }) => {
                if let Some(slot) = state.variables.get(name) {
                    if slot.constant {
                        return err!(
                            statement.location,
                            "'${}' is a constant and cannot be redeclared",
                            name
                        );
                    }
                }
                let value = eval_int(state, value, false)?;
                state.variables.insert(
                    name.clone(),
                    VariableSlot {
                        value,
                        constant: false,
                    },
                );
            }
            StatementKind::Directive(Directive::Const { name, value }) => {
                if state.variables.contains_key(name) {
                    return err!(statement.location, "'${}' is already defined", name);
                }
                let value = eval_int(state, value, false)?;
                state.variables.insert(
                    name.clone(),
                    VariableSlot {
                        value,
                        constant: true,
                    },
                );
            }
            StatementKind::VarAssignment { name, op, value } => {
                let new_value = eval_int(state, value, false)?;
                let slot = state.variables.get(name).ok_or_else(|| AsmError {
                    location: Some(statement.location.clone()),
                    message: format!("'${}' has not been declared with `.let`", name),
                })?;
                if slot.constant {
                    return err!(statement.location, "cannot assign to constant '${}'", name);
                }
                let current = slot.value;
                let combined = apply_assignment(current, *op, new_value, &statement.location)?;
                state.variables.get_mut(name).unwrap().value = combined;
            }
            _ => {}
        }
    }
    Ok(())
}

fn apply_assignment(
    current: i64,
    op: TokenKind,
    value: i64,
    location: &SourceLoc,
) -> AsmResult<i64> {
    let result = match op {
        TokenKind::AssignEqual => value,
        TokenKind::AssignPlus => current.wrapping_add(value),
        TokenKind::AssignMinus => current.wrapping_sub(value),
        TokenKind::AssignTimes => current.wrapping_mul(value),
        TokenKind::AssignExponent => {
            if value < 0 {
                return err!(location, "negative exponent in assignment");
            }
            current
                .checked_pow(value.min(i64::from(u32::max_value())) as u32)
                .ok_or_else(|| AsmError {
                    location: Some(location.clone()),
                    message: "exponentiation overflow in assignment".to_owned(),
                })?
        }
        TokenKind::AssignDivide => {
            if value == 0 {
                return err!(location, "division by zero in assignment");
            }
            current.wrapping_div(value)
        }
        TokenKind::AssignModulo => {
            if value == 0 {
                return err!(location, "modulo by zero in assignment");
            }
            current.wrapping_rem(value)
        }
        TokenKind::AssignAnd => current & value,
        TokenKind::AssignOr => current | value,
        TokenKind::AssignXor => current ^ value,
        TokenKind::AssignShiftLeft => current << (value as u32 & 63),
        TokenKind::AssignShiftRight => current >> (value as u32 & 63),
        _ => return err!(location, "unsupported assignment operator"),
    };
    Ok(result)
}

// ---------------------------------------------------------------------------
// Restricted expression evaluation (integers and addresses only).

fn eval_int(state: &CodegenState, expr: &Expression, labels_bound: bool) -> AsmResult<i64> {
    match &expr.kind {
        ExprKind::IntegerLiteral(value) => Ok(*value),
        ExprKind::NumberLiteral(value) => Ok(value.trunc() as i64),
        ExprKind::StringLiteral(_) => {
            err!(expr.location, "string values are not allowed here")
        }
        ExprKind::Identifier(name) => {
            if let Some(label) = state.find_label(name) {
                if !labels_bound {
                    return err!(
                        expr.location,
                        "label '{}' cannot be used before addresses are assigned",
                        name
                    );
                }
                let section = &state.sections[label.section];
                return Ok(i64::from(section.base) + i64::from(label.offset));
            }
            if state.is_extern(name) {
                return err!(
                    expr.location,
                    "external symbol '{}' has no value at assembly time",
                    name
                );
            }
            err!(expr.location, "unknown identifier '{}'", name)
        }
        ExprKind::Variable(name) => match state.variables.get(name) {
            Some(slot) => Ok(slot.value),
            None => err!(expr.location, "unknown variable '${}'", name),
        },
        ExprKind::Placeholder(name) => {
            err!(expr.location, "placeholder '@{}' outside of a macro body", name)
        }
        ExprKind::Grouping(inner) => eval_int(state, inner, labels_bound),
        ExprKind::Unary { op, operand } => {
            let value = eval_int(state, operand, labels_bound)?;
            Ok(match op {
                UnaryOp::Negate => value.wrapping_neg(),
                UnaryOp::BitwiseNot => !value,
                UnaryOp::LogicalNot => {
                    if value == 0 {
                        1
                    } else {
                        0
                    }
                }
            })
        }
        ExprKind::Binary { op, left, right } => {
            let a = eval_int(state, left, labels_bound)?;
            let b = eval_int(state, right, labels_bound)?;
            let value = match op {
                BinaryOp::LogicalOr => ((a != 0) || (b != 0)) as i64,
                BinaryOp::LogicalAnd => ((a != 0) && (b != 0)) as i64,
                BinaryOp::BitwiseOr => a | b,
                BinaryOp::BitwiseXor => a ^ b,
                BinaryOp::BitwiseAnd => a & b,
                BinaryOp::CompareEqual => (a == b) as i64,
                BinaryOp::CompareNotEqual => (a != b) as i64,
                BinaryOp::CompareLess => (a < b) as i64,
                BinaryOp::CompareLessEqual => (a <= b) as i64,
                BinaryOp::CompareGreater => (a > b) as i64,
                BinaryOp::CompareGreaterEqual => (a >= b) as i64,
                BinaryOp::ShiftLeft => a << (b as u32 & 63),
                BinaryOp::ShiftRight => a >> (b as u32 & 63),
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Subtract => a.wrapping_sub(b),
                BinaryOp::Multiply => a.wrapping_mul(b),
                BinaryOp::Divide => {
                    if b == 0 {
                        return err!(expr.location, "division by zero");
                    }
                    a.wrapping_div(b)
                }
                BinaryOp::Modulo => {
                    if b == 0 {
                        return err!(expr.location, "modulo by zero");
                    }
                    a.wrapping_rem(b)
                }
                BinaryOp::Exponent => {
                    if b < 0 {
                        return err!(expr.location, "negative exponent");
                    }
                    a.checked_pow(b.min(i64::from(u32::max_value())) as u32)
                        .ok_or_else(|| AsmError {
                            location: Some(expr.location.clone()),
                            message: "exponentiation overflow".to_owned(),
                        })?
                }
            };
            Ok(value)
        }
    }
}

/// How a relocatable expression refers to its symbol.
enum RefShape {
    Plain,
    /// `sym >> 16`
    Hi16,
    /// `sym & 0xFFFF`
    Lo16,
}

struct SymbolRef {
    name: String,
    addend: i64,
    shape: RefShape,
}

/// Detects whether an expression references a relocatable symbol (a label
/// or an extern), and if so reduces it to one of the supported shapes:
/// `sym`, `sym ± k`, `sym >> 16`, `sym & 0xFFFF`.
fn symbol_ref(state: &CodegenState, expr: &Expression) -> AsmResult<Option<SymbolRef>> {
    if !references_symbol(state, expr) {
        return Ok(None);
    }

    match &expr.kind {
        ExprKind::Identifier(name) => Ok(Some(SymbolRef {
            name: name.clone(),
            addend: 0,
            shape: RefShape::Plain,
        })),
        ExprKind::Grouping(inner) => symbol_ref(state, inner),
        ExprKind::Binary { op, left, right } => {
            let symbolic_left = references_symbol(state, left);
            let symbolic_right = references_symbol(state, right);
            if symbolic_left && symbolic_right {
                return err!(
                    expr.location,
                    "expression references more than one relocatable symbol"
                );
            }

            match op {
                BinaryOp::Add | BinaryOp::Subtract => {
                    let (symbolic, constant, negate_symbol) = if symbolic_left {
                        (left, right, false)
                    } else {
                        (right, left, *op == BinaryOp::Subtract)
                    };
                    if negate_symbol {
                        return err!(
                            expr.location,
                            "a relocatable symbol cannot be subtracted from a value"
                        );
                    }
                    let inner = symbol_ref(state, symbolic)?.ok_or_else(|| AsmError {
                        location: Some(expr.location.clone()),
                        message: "expression is too complex for a relocation".to_owned(),
                    })?;
                    if !matches!(inner.shape, RefShape::Plain) {
                        return err!(
                            expr.location,
                            "expression is too complex for a relocation"
                        );
                    }
                    let constant = eval_int(state, constant, true)?;
                    let addend = if *op == BinaryOp::Add {
                        inner.addend.wrapping_add(constant)
                    } else {
                        inner.addend.wrapping_sub(constant)
                    };
                    Ok(Some(SymbolRef {
                        name: inner.name,
                        addend,
                        shape: RefShape::Plain,
                    }))
                }
                BinaryOp::ShiftRight => {
                    let inner = require_plain_ref(state, left, expr)?;
                    let amount = eval_int(state, right, true)?;
                    if amount != 16 {
                        return err!(
                            expr.location,
                            "only a 16-bit shift of a relocatable symbol is supported"
                        );
                    }
                    Ok(Some(SymbolRef {
                        name: inner.name,
                        addend: inner.addend,
                        shape: RefShape::Hi16,
                    }))
                }
                BinaryOp::BitwiseAnd => {
                    let inner = require_plain_ref(state, left, expr)?;
                    let mask = eval_int(state, right, true)?;
                    if mask != 0xFFFF {
                        return err!(
                            expr.location,
                            "only a 0xFFFF mask of a relocatable symbol is supported"
                        );
                    }
                    Ok(Some(SymbolRef {
                        name: inner.name,
                        addend: inner.addend,
                        shape: RefShape::Lo16,
                    }))
                }
                _ => err!(expr.location, "expression is too complex for a relocation"),
            }
        }
        _ => err!(expr.location, "expression is too complex for a relocation"),
    }
}

fn require_plain_ref(
    state: &CodegenState,
    symbolic: &Expression,
    whole: &Expression,
) -> AsmResult<SymbolRef> {
    match symbol_ref(state, symbolic)? {
        Some(inner) => {
            if matches!(inner.shape, RefShape::Plain) {
                Ok(inner)
            } else {
                err!(
                    whole.location,
                    "expression is too complex for a relocation"
                )
            }
        }
        None => err!(whole.location, "expression is too complex for a relocation"),
    }
}

fn references_symbol(state: &CodegenState, expr: &Expression) -> bool {
    match &expr.kind {
        ExprKind::Identifier(name) => {
            state.find_label(name).is_some() || state.is_extern(name)
        }
        ExprKind::Grouping(inner) => references_symbol(state, inner),
        ExprKind::Unary { operand, .. } => references_symbol(state, operand),
        ExprKind::Binary { left, right, .. } => {
            references_symbol(state, left) || references_symbol(state, right)
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Instruction selection.

#[derive(Clone, Copy, PartialEq, Eq)]
enum ImmKind {
    Imm8,
    Imm16,
    Imm32,
    Addr32,
    Addr16,
    Addr8,
    Rel16,
}

impl ImmKind {
    fn width(self) -> u32 {
        match self {
            ImmKind::Imm8 | ImmKind::Addr8 => 1,
            ImmKind::Imm16 | ImmKind::Addr16 | ImmKind::Rel16 => 2,
            ImmKind::Imm32 | ImmKind::Addr32 => 4,
        }
    }
}

enum Nibble<'a> {
    Zero,
    Slot(RegisterKind),
    Cond(ConditionCode),
    /// A bit index 0-7, evaluated at emission.
    BitIndex(&'a Expression),
}

enum OperandByte<'a> {
    Nibbles(Nibble<'a>, Nibble<'a>),
    /// An interrupt vector number 0-31 occupying the whole byte.
    Vector(&'a Expression),
}

struct Plan<'a> {
    selector: u8,
    operand: OperandByte<'a>,
    imm: Option<(ImmKind, &'a Expression)>,
}

impl<'a> Plan<'a> {
    fn plain(selector: u8) -> Plan<'a> {
        Plan {
            selector,
            operand: OperandByte::Nibbles(Nibble::Zero, Nibble::Zero),
            imm: None,
        }
    }

    fn regs(selector: u8, x: RegisterKind, y: RegisterKind) -> Plan<'a> {
        Plan {
            selector,
            operand: OperandByte::Nibbles(Nibble::Slot(x), Nibble::Slot(y)),
            imm: None,
        }
    }

    fn x_reg(selector: u8, x: RegisterKind) -> Plan<'a> {
        Plan {
            selector,
            operand: OperandByte::Nibbles(Nibble::Slot(x), Nibble::Zero),
            imm: None,
        }
    }

    fn y_reg(selector: u8, y: RegisterKind) -> Plan<'a> {
        Plan {
            selector,
            operand: OperandByte::Nibbles(Nibble::Zero, Nibble::Slot(y)),
            imm: None,
        }
    }

    fn with_imm(mut self, kind: ImmKind, expr: &'a Expression) -> Plan<'a> {
        self.imm = Some((kind, expr));
        self
    }

    fn size(&self) -> u32 {
        g10::OPCODE_BYTES + self.imm.map_or(0, |(kind, _)| kind.width())
    }
}

fn operand_error<T>(location: &SourceLoc, instruction: Instruction) -> AsmResult<T> {
    err!(
        location,
        "invalid operand combination for {:?}",
        instruction
    )
}

fn as_register(operand: &Operand) -> Option<RegisterKind> {
    match operand.kind {
        OperandKind::Register(register) => Some(register),
        _ => None,
    }
}

fn as_condition(operand: &Operand) -> Option<ConditionCode> {
    match operand.kind {
        OperandKind::Condition(condition) => Some(condition),
        _ => None,
    }
}

fn as_immediate(operand: &Operand) -> Option<&Expression> {
    match &operand.kind {
        OperandKind::Immediate(expression) => Some(expression),
        _ => None,
    }
}

fn as_direct(operand: &Operand) -> Option<&Expression> {
    match &operand.kind {
        OperandKind::DirectMemory(expression) => Some(expression),
        _ => None,
    }
}

fn as_indirect(operand: &Operand) -> Option<RegisterKind> {
    match operand.kind {
        OperandKind::IndirectMemory(register) => Some(register),
        _ => None,
    }
}

/// An immediate or direct-memory target expression; jump targets accept
/// both spellings for absolute destinations.
fn as_target(operand: &Operand) -> Option<&Expression> {
    as_immediate(operand).or_else(|| as_direct(operand))
}

fn expect_operands<'a>(
    location: &SourceLoc,
    operands: &'a [Operand],
    count: usize,
    instruction: Instruction,
) -> AsmResult<&'a [Operand]> {
    if operands.len() != count {
        return err!(
            location,
            "{:?} expects {} operand{}, got {}",
            instruction,
            count,
            if count == 1 { "" } else { "s" },
            operands.len()
        );
    }
    Ok(operands)
}

/// Width-indexed selector triples for the load/store/ALU ladders: the
/// selector for the L, W and D forms. `None` marks a form the CPU does not
/// provide.
type WidthRow = [Option<u8>; 3];

fn row_pick(row: WidthRow, width: RegisterWidth, location: &SourceLoc) -> AsmResult<u8> {
    let slot = match width {
        RegisterWidth::Byte => row[0],
        RegisterWidth::Word => row[1],
        RegisterWidth::Dword => row[2],
    };
    slot.ok_or_else(|| AsmError {
        location: Some(location.clone()),
        message: "this operand width is not encodable for the instruction".to_owned(),
    })
}

fn imm_kind_for_width(width: RegisterWidth) -> ImmKind {
    match width {
        RegisterWidth::Byte => ImmKind::Imm8,
        RegisterWidth::Word => ImmKind::Imm16,
        RegisterWidth::Dword => ImmKind::Imm32,
    }
}

/// Checks that a data register used as a value operand is a legal view:
/// `Dn`, `Wn` or `Ln`. The high-byte views only take part in `MV`.
fn check_value_register(register: RegisterKind, location: &SourceLoc) -> AsmResult<()> {
    if register.is_high_byte() {
        return err!(location, "high-byte registers are only valid with MV");
    }
    Ok(())
}

fn check_pointer(register: RegisterKind, want: RegisterWidth, location: &SourceLoc) -> AsmResult<()> {
    let ok = register.width() == want && !register.is_high_byte();
    if !ok {
        return err!(location, "invalid pointer register for this addressing mode");
    }
    Ok(())
}

/// Selects the encoding for one instruction. The plan is enough to size the
/// instruction in the address pass and to emit it in the emission pass.
fn select_plan<'a>(
    location: &SourceLoc,
    instruction: Instruction,
    operands: &'a [Operand],
) -> AsmResult<Plan<'a>> {
    use Instruction::*;

    match instruction {
        // Zero-operand control instructions.
        Nop | Stop | Halt | Di | Ei | Eii | Daa | Scf | Ccf | Clv | Sev | Reti | Rla | Rlca
        | Rra | Rrca => {
            expect_operands(location, operands, 0, instruction)?;
            let selector = match instruction {
                Nop => 0x00,
                Stop => 0x01,
                Halt => 0x02,
                Di => 0x03,
                Ei => 0x04,
                Eii => 0x05,
                Daa => 0x06,
                Scf => 0x07,
                Ccf => 0x08,
                Clv => 0x09,
                Sev => 0x0A,
                Reti => 0x46,
                Rla => 0x90,
                Rlca => 0x93,
                Rra => 0x96,
                _ => 0x99,
            };
            Ok(Plan::plain(selector))
        }

        Ld => {
            let ops = expect_operands(location, operands, 2, instruction)?;
            let dest = match as_register(&ops[0]) {
                Some(register) => register,
                None => return operand_error(location, instruction),
            };
            check_value_register(dest, &ops[0].location)?;
            let width = dest.width();

            if let Some(expr) = as_immediate(&ops[1]) {
                let selector = row_pick([Some(0x10), Some(0x20), Some(0x30)], width, location)?;
                return Ok(Plan::x_reg(selector, dest).with_imm(imm_kind_for_width(width), expr));
            }
            if let Some(expr) = as_direct(&ops[1]) {
                let selector = row_pick([Some(0x11), Some(0x21), Some(0x31)], width, location)?;
                return Ok(Plan::x_reg(selector, dest).with_imm(ImmKind::Addr32, expr));
            }
            if let Some(pointer) = as_indirect(&ops[1]) {
                check_pointer(pointer, RegisterWidth::Dword, &ops[1].location)?;
                let selector = row_pick([Some(0x12), Some(0x22), Some(0x32)], width, location)?;
                return Ok(Plan::regs(selector, dest, pointer));
            }
            operand_error(location, instruction)
        }

        Ldq => {
            let ops = expect_operands(location, operands, 2, instruction)?;
            let dest = match as_register(&ops[0]) {
                Some(register) => register,
                None => return operand_error(location, instruction),
            };
            check_value_register(dest, &ops[0].location)?;
            let width = dest.width();

            if let Some(expr) = as_direct(&ops[1]) {
                let selector = row_pick([Some(0x13), Some(0x23), Some(0x33)], width, location)?;
                return Ok(Plan::x_reg(selector, dest).with_imm(ImmKind::Addr16, expr));
            }
            if let Some(pointer) = as_indirect(&ops[1]) {
                check_pointer(pointer, RegisterWidth::Word, &ops[1].location)?;
                let selector = row_pick([Some(0x14), Some(0x24), Some(0x34)], width, location)?;
                return Ok(Plan::regs(selector, dest, pointer));
            }
            operand_error(location, instruction)
        }

        Ldp => {
            let ops = expect_operands(location, operands, 2, instruction)?;
            let dest = match as_register(&ops[0]) {
                Some(register) if register.is_low_byte() => register,
                _ => return operand_error(location, instruction),
            };
            if let Some(expr) = as_direct(&ops[1]) {
                return Ok(Plan::x_reg(0x15, dest).with_imm(ImmKind::Addr8, expr));
            }
            if let Some(pointer) = as_indirect(&ops[1]) {
                check_pointer(pointer, RegisterWidth::Byte, &ops[1].location)?;
                if !pointer.is_low_byte() {
                    return err!(ops[1].location, "invalid pointer register for this addressing mode");
                }
                return Ok(Plan::regs(0x16, dest, pointer));
            }
            operand_error(location, instruction)
        }

        St => {
            let ops = expect_operands(location, operands, 2, instruction)?;
            let source = match as_register(&ops[1]) {
                Some(register) => register,
                None => return operand_error(location, instruction),
            };
            check_value_register(source, &ops[1].location)?;
            let width = source.width();

            if let Some(expr) = as_direct(&ops[0]) {
                let selector = row_pick([Some(0x17), Some(0x27), Some(0x37)], width, location)?;
                return Ok(Plan::y_reg(selector, source).with_imm(ImmKind::Addr32, expr));
            }
            if let Some(pointer) = as_indirect(&ops[0]) {
                check_pointer(pointer, RegisterWidth::Dword, &ops[0].location)?;
                let selector = row_pick([Some(0x18), Some(0x28), Some(0x38)], width, location)?;
                return Ok(Plan::regs(selector, pointer, source));
            }
            operand_error(location, instruction)
        }

        Stq => {
            let ops = expect_operands(location, operands, 2, instruction)?;
            let source = match as_register(&ops[1]) {
                Some(register) => register,
                None => return operand_error(location, instruction),
            };
            check_value_register(source, &ops[1].location)?;
            let width = source.width();

            if let Some(expr) = as_direct(&ops[0]) {
                let selector = row_pick([Some(0x19), Some(0x29), Some(0x39)], width, location)?;
                return Ok(Plan::y_reg(selector, source).with_imm(ImmKind::Addr16, expr));
            }
            if let Some(pointer) = as_indirect(&ops[0]) {
                check_pointer(pointer, RegisterWidth::Word, &ops[0].location)?;
                let selector = row_pick([Some(0x1A), Some(0x2A), Some(0x3A)], width, location)?;
                return Ok(Plan::regs(selector, pointer, source));
            }
            operand_error(location, instruction)
        }

        Stp => {
            let ops = expect_operands(location, operands, 2, instruction)?;
            let source = match as_register(&ops[1]) {
                Some(register) if register.is_low_byte() => register,
                _ => return operand_error(location, instruction),
            };
            if let Some(expr) = as_direct(&ops[0]) {
                return Ok(Plan::y_reg(0x1B, source).with_imm(ImmKind::Addr8, expr));
            }
            if let Some(pointer) = as_indirect(&ops[0]) {
                if !pointer.is_low_byte() {
                    return err!(ops[0].location, "invalid pointer register for this addressing mode");
                }
                return Ok(Plan::regs(0x1C, pointer, source));
            }
            operand_error(location, instruction)
        }

        Mv => {
            let ops = expect_operands(location, operands, 2, instruction)?;
            let dest = as_register(&ops[0]);
            let source = as_register(&ops[1]);
            let (dest, source) = match (dest, source) {
                (Some(d), Some(s)) => (d, s),
                _ => return operand_error(location, instruction),
            };
            let selector = match (dest.selector(), source.selector()) {
                (4, 4) => 0x1D,
                (2, 4) => 0x1E,
                (4, 2) => 0x1F,
                (1, 1) => 0x2D,
                (0, 0) => 0x3D,
                _ => return operand_error(location, instruction),
            };
            Ok(Plan::regs(selector, dest, source))
        }

        Mwh => {
            let ops = expect_operands(location, operands, 2, instruction)?;
            match (as_register(&ops[0]), as_register(&ops[1])) {
                (Some(dest), Some(source))
                    if dest.width() == RegisterWidth::Dword
                        && source.width() == RegisterWidth::Word =>
                {
                    Ok(Plan::regs(0x2E, dest, source))
                }
                _ => operand_error(location, instruction),
            }
        }

        Mwl => {
            let ops = expect_operands(location, operands, 2, instruction)?;
            match (as_register(&ops[0]), as_register(&ops[1])) {
                (Some(dest), Some(source))
                    if dest.width() == RegisterWidth::Word
                        && source.width() == RegisterWidth::Dword =>
                {
                    Ok(Plan::regs(0x2F, dest, source))
                }
                _ => operand_error(location, instruction),
            }
        }

        Lsp => {
            let ops = expect_operands(location, operands, 1, instruction)?;
            match as_immediate(&ops[0]) {
                Some(expr) => Ok(Plan::plain(0x35).with_imm(ImmKind::Imm32, expr)),
                None => operand_error(location, instruction),
            }
        }

        Pop => {
            let ops = expect_operands(location, operands, 1, instruction)?;
            match as_register(&ops[0]) {
                Some(register) if register.width() == RegisterWidth::Dword => {
                    Ok(Plan::x_reg(0x36, register))
                }
                _ => operand_error(location, instruction),
            }
        }

        Ssp => {
            let ops = expect_operands(location, operands, 1, instruction)?;
            match as_direct(&ops[0]) {
                Some(expr) => Ok(Plan::plain(0x3B).with_imm(ImmKind::Addr32, expr)),
                None => operand_error(location, instruction),
            }
        }

        Push => {
            let ops = expect_operands(location, operands, 1, instruction)?;
            match as_register(&ops[0]) {
                Some(register) if register.width() == RegisterWidth::Dword => {
                    Ok(Plan::y_reg(0x3C, register))
                }
                _ => operand_error(location, instruction),
            }
        }

        Spo => {
            let ops = expect_operands(location, operands, 1, instruction)?;
            match as_register(&ops[0]) {
                Some(register) if register.width() == RegisterWidth::Dword => {
                    Ok(Plan::x_reg(0x3E, register))
                }
                _ => operand_error(location, instruction),
            }
        }

        Spi => {
            let ops = expect_operands(location, operands, 1, instruction)?;
            match as_register(&ops[0]) {
                Some(register) if register.width() == RegisterWidth::Dword => {
                    Ok(Plan::y_reg(0x3F, register))
                }
                _ => operand_error(location, instruction),
            }
        }

        Jmp | Jpb | Call => {
            // One operand: the target, condition defaulting to NC. Two
            // operands: condition then target.
            let (condition, target) = match operands.len() {
                1 => (ConditionCode::Nc, &operands[0]),
                2 => match as_condition(&operands[0]) {
                    Some(condition) => (condition, &operands[1]),
                    None => return operand_error(location, instruction),
                },
                _ => {
                    return err!(
                        location,
                        "{:?} expects 1 or 2 operands, got {}",
                        instruction,
                        operands.len()
                    );
                }
            };

            if instruction == Jmp {
                if let Some(register) = as_register(target) {
                    if register.width() != RegisterWidth::Dword {
                        return err!(
                            target.location,
                            "indirect jumps require a 32-bit register"
                        );
                    }
                    return Ok(Plan {
                        selector: 0x41,
                        operand: OperandByte::Nibbles(
                            Nibble::Cond(condition),
                            Nibble::Slot(register),
                        ),
                        imm: None,
                    });
                }
            }

            let expr = match as_target(target) {
                Some(expr) => expr,
                None => return operand_error(location, instruction),
            };
            let (selector, imm) = match instruction {
                Jmp => (0x40, ImmKind::Imm32),
                Jpb => (0x42, ImmKind::Rel16),
                _ => (0x43, ImmKind::Imm32),
            };
            Ok(Plan {
                selector,
                operand: OperandByte::Nibbles(Nibble::Cond(condition), Nibble::Zero),
                imm: Some((imm, expr)),
            })
        }

        Int => {
            let ops = expect_operands(location, operands, 1, instruction)?;
            match as_immediate(&ops[0]) {
                Some(expr) => Ok(Plan {
                    selector: 0x44,
                    operand: OperandByte::Vector(expr),
                    imm: None,
                }),
                None => operand_error(location, instruction),
            }
        }

        Ret => {
            let condition = match operands.len() {
                0 => ConditionCode::Nc,
                1 => match as_condition(&operands[0]) {
                    Some(condition) => condition,
                    None => return operand_error(location, instruction),
                },
                _ => {
                    return err!(
                        location,
                        "RET expects at most 1 operand, got {}",
                        operands.len()
                    );
                }
            };
            Ok(Plan {
                selector: 0x45,
                operand: OperandByte::Nibbles(Nibble::Cond(condition), Nibble::Zero),
                imm: None,
            })
        }

        Add | Adc | Sub | Sbc | And | Or | Xor | Cmp => {
            let ops = expect_operands(location, operands, 2, instruction)?;
            let accumulator = match as_register(&ops[0]) {
                Some(register) => register,
                None => return operand_error(location, instruction),
            };
            check_value_register(accumulator, &ops[0].location)?;
            if accumulator.slot() != 0 {
                return err!(
                    ops[0].location,
                    "{:?} requires the accumulator (L0, W0 or D0) as its first operand",
                    instruction
                );
            }
            let width = accumulator.width();

            // Selector rows per source form: immediate, register, pointer.
            let (imm_row, reg_row, ptr_row): (WidthRow, WidthRow, WidthRow) = match instruction {
                Add => (
                    [Some(0x50), Some(0x60), Some(0x62)],
                    [Some(0x51), Some(0x61), Some(0x63)],
                    [Some(0x52), None, None],
                ),
                Adc => ([Some(0x53), None, None], [Some(0x54), None, None], [Some(0x55), None, None]),
                Sub => (
                    [Some(0x56), Some(0x64), Some(0x66)],
                    [Some(0x57), Some(0x65), Some(0x67)],
                    [Some(0x58), None, None],
                ),
                Sbc => ([Some(0x59), None, None], [Some(0x5A), None, None], [Some(0x5B), None, None]),
                And => ([Some(0x70), None, None], [Some(0x71), None, None], [Some(0x72), None, None]),
                Or => ([Some(0x73), None, None], [Some(0x74), None, None], [Some(0x75), None, None]),
                Xor => ([Some(0x76), None, None], [Some(0x77), None, None], [Some(0x78), None, None]),
                _ => ([Some(0x7D), None, None], [Some(0x7E), None, None], [Some(0x7F), None, None]),
            };

            if let Some(expr) = as_immediate(&ops[1]) {
                let selector = row_pick(imm_row, width, location)?;
                return Ok(Plan::plain(selector).with_imm(imm_kind_for_width(width), expr));
            }
            if let Some(source) = as_register(&ops[1]) {
                check_value_register(source, &ops[1].location)?;
                if source.width() != width {
                    return err!(
                        ops[1].location,
                        "operand width must match the accumulator"
                    );
                }
                let selector = row_pick(reg_row, width, location)?;
                return Ok(Plan::y_reg(selector, source));
            }
            if let Some(pointer) = as_indirect(&ops[1]) {
                check_pointer(pointer, RegisterWidth::Dword, &ops[1].location)?;
                let selector = row_pick(ptr_row, width, location)?;
                return Ok(Plan::y_reg(selector, pointer));
            }
            operand_error(location, instruction)
        }

        Inc | Dec => {
            let ops = expect_operands(location, operands, 1, instruction)?;
            let rows: (WidthRow, u8) = match instruction {
                Inc => ([Some(0x5C), Some(0x6C), Some(0x6D)], 0x5D),
                _ => ([Some(0x5E), Some(0x6E), Some(0x6F)], 0x5F),
            };
            if let Some(register) = as_register(&ops[0]) {
                check_value_register(register, &ops[0].location)?;
                let selector = row_pick(rows.0, register.width(), location)?;
                return Ok(Plan::x_reg(selector, register));
            }
            if let Some(pointer) = as_indirect(&ops[0]) {
                check_pointer(pointer, RegisterWidth::Dword, &ops[0].location)?;
                return Ok(Plan::x_reg(rows.1, pointer));
            }
            operand_error(location, instruction)
        }

        Not => {
            let ops = expect_operands(location, operands, 1, instruction)?;
            if let Some(register) = as_register(&ops[0]) {
                if register.is_low_byte() {
                    return Ok(Plan::x_reg(0x79, register));
                }
                return operand_error(location, instruction);
            }
            if let Some(pointer) = as_indirect(&ops[0]) {
                check_pointer(pointer, RegisterWidth::Dword, &ops[0].location)?;
                return Ok(Plan::x_reg(0x7A, pointer));
            }
            operand_error(location, instruction)
        }

        Sla | Sra | Srl | Rl | Rlc | Rr | Rrc => {
            let ops = expect_operands(location, operands, 1, instruction)?;
            let (reg_selector, ptr_selector) = match instruction {
                Sla => (0x80, 0x81),
                Sra => (0x82, 0x83),
                Srl => (0x84, 0x85),
                Rl => (0x91, 0x92),
                Rlc => (0x94, 0x95),
                Rr => (0x97, 0x98),
                _ => (0x9A, 0x9B),
            };
            if let Some(register) = as_register(&ops[0]) {
                if register.is_low_byte() {
                    return Ok(Plan::x_reg(reg_selector, register));
                }
                return operand_error(location, instruction);
            }
            if let Some(pointer) = as_indirect(&ops[0]) {
                check_pointer(pointer, RegisterWidth::Dword, &ops[0].location)?;
                return Ok(Plan::x_reg(ptr_selector, pointer));
            }
            operand_error(location, instruction)
        }

        Swap => {
            let ops = expect_operands(location, operands, 1, instruction)?;
            if let Some(register) = as_register(&ops[0]) {
                check_value_register(register, &ops[0].location)?;
                let selector = row_pick(
                    [Some(0x86), Some(0x88), Some(0x89)],
                    register.width(),
                    location,
                )?;
                return Ok(Plan::x_reg(selector, register));
            }
            if let Some(pointer) = as_indirect(&ops[0]) {
                check_pointer(pointer, RegisterWidth::Dword, &ops[0].location)?;
                return Ok(Plan::x_reg(0x87, pointer));
            }
            operand_error(location, instruction)
        }

        Bit | Set | Res | Tog => {
            let ops = expect_operands(location, operands, 2, instruction)?;
            let bit = match as_immediate(&ops[0]) {
                Some(expr) => expr,
                None => return operand_error(location, instruction),
            };
            let (reg_selector, ptr_selector) = match instruction {
                Bit => (0xA0, 0xA1),
                Set => (0xA2, 0xA3),
                Res => (0xA4, 0xA5),
                _ => (0xA6, 0xA7),
            };
            if let Some(register) = as_register(&ops[1]) {
                if register.is_low_byte() {
                    return Ok(Plan {
                        selector: reg_selector,
                        operand: OperandByte::Nibbles(
                            Nibble::Slot(register),
                            Nibble::BitIndex(bit),
                        ),
                        imm: None,
                    });
                }
                return operand_error(location, instruction);
            }
            if let Some(pointer) = as_indirect(&ops[1]) {
                check_pointer(pointer, RegisterWidth::Dword, &ops[1].location)?;
                return Ok(Plan {
                    selector: ptr_selector,
                    operand: OperandByte::Nibbles(Nibble::Slot(pointer), Nibble::BitIndex(bit)),
                    imm: None,
                });
            }
            operand_error(location, instruction)
        }
    }
}

// ---------------------------------------------------------------------------
// Address pass.

fn address_pass(state: &mut CodegenState, module: &Module) -> AsmResult<()> {
    for (index, statement) in module.statements.iter().enumerate() {
        match &statement.kind {
            StatementKind::LabelDefinition { name } => {
                define_label(state, module, index, name, &statement.location)?;
            }
            StatementKind::Instruction {
                instruction,
                operands,
            } => {
                let plan = select_plan(&statement.location, *instruction, operands)?;
                let section = state.current_section(&statement.location)?;
                if state.sections[section].region == Region::Ram {
                    return err!(
                        statement.location,
                        "instructions cannot be placed in the RAM region"
                    );
                }
                state.advance(plan.size(), &statement.location)?;
            }
            StatementKind::Directive(directive) => {
                address_pass_directive(state, directive, &statement.location)?;
            }
            StatementKind::VarAssignment { .. } => {}
        }
    }

    // Freeze planned sizes and rewind cursors for the emission pass.
    for section in &mut state.sections {
        section.size = section.cursor;
        section.cursor = 0;
    }
    state.rom_section = None;
    state.ram_section = None;
    state.in_rom = true;
    Ok(())
}

fn define_label(
    state: &mut CodegenState,
    module: &Module,
    index: usize,
    name: &str,
    location: &SourceLoc,
) -> AsmResult<()> {
    if state.label_index.contains_key(name) {
        return err!(location, "duplicate label '{}'", name);
    }
    if state.is_extern(name) {
        return err!(location, "'{}' is declared extern and cannot be defined", name);
    }

    let section = state.current_section(location)?;
    let offset = state.sections[section].cursor;

    // A label naming data (the next statement is a data directive) gets the
    // data symbol type; every other label is a code label.
    let kind = match next_meaningful(module, index + 1) {
        Some(StatementKind::Directive(Directive::Byte { .. }))
        | Some(StatementKind::Directive(Directive::Word { .. }))
        | Some(StatementKind::Directive(Directive::Dword { .. }))
        | Some(StatementKind::Directive(Directive::Space { .. })) => SymbolType::Data,
        _ => SymbolType::Label,
    };

    state.labels.push(LabelDef {
        name: name.to_owned(),
        section,
        offset,
        kind,
    });
    state
        .label_index
        .insert(name.to_owned(), state.labels.len() - 1);
    Ok(())
}

/// The next statement that is not another label definition.
fn next_meaningful(module: &Module, from: usize) -> Option<&StatementKind> {
    module.statements[from..]
        .iter()
        .map(|s| &s.kind)
        .find(|kind| !matches!(kind, StatementKind::LabelDefinition { .. }))
}

fn address_pass_directive(
    state: &mut CodegenState,
    directive: &Directive,
    location: &SourceLoc,
) -> AsmResult<()> {
    match directive {
        Directive::Org { address } => {
            let address = eval_address(state, address, location)?;
            state.switch_to_address(address, location)?;
            Ok(())
        }
        Directive::Rom => {
            state.in_rom = true;
            Ok(())
        }
        Directive::Ram => {
            state.in_rom = false;
            Ok(())
        }
        Directive::Int { vector } => {
            let vector = eval_int(state, vector, false)?;
            if vector < 0 || vector >= i64::from(g10::IVT_ENTRY_COUNT) {
                return err!(location, "interrupt vector {} is out of range", vector);
            }
            let address = g10::IVT_START + vector as u32 * g10::IVT_ENTRY_SIZE;
            state.switch_to_address(address, location)?;
            Ok(())
        }
        Directive::Byte { values } => data_advance(state, values.len() as u32, 1, location),
        Directive::Word { values } => data_advance(state, values.len() as u32, 2, location),
        Directive::Dword { values } => data_advance(state, values.len() as u32, 4, location),
        Directive::Space { size } => {
            let size = eval_int(state, size, false)?;
            if size < 0 || size > i64::from(u32::max_value()) {
                return err!(location, ".space size {} is out of range", size);
            }
            state.advance(size as u32, location)
        }
        Directive::Global { names } => {
            for name in names {
                if state.is_extern(name) {
                    return err!(
                        location,
                        "'{}' cannot be both global and extern",
                        name
                    );
                }
                if !state.globals.iter().any(|n| n == name) {
                    state.globals.push(name.clone());
                }
            }
            Ok(())
        }
        Directive::Extern { names } => {
            for name in names {
                if state.globals.iter().any(|n| n == name) {
                    return err!(
                        location,
                        "'{}' cannot be both global and extern",
                        name
                    );
                }
                if state.label_index.contains_key(name) {
                    return err!(
                        location,
                        "'{}' is defined locally and cannot be extern",
                        name
                    );
                }
                if !state.is_extern(name) {
                    state.externs.push(name.clone());
                }
            }
            Ok(())
        }
        Directive::Let { .. } | Directive::Const { .. } => Ok(()),
    }
}

fn data_advance(
    state: &mut CodegenState,
    count: u32,
    width: u32,
    location: &SourceLoc,
) -> AsmResult<()> {
    let section = state.current_section(location)?;
    if state.sections[section].region == Region::Ram {
        return err!(location, "cannot emit initialized data in the RAM region");
    }
    state.advance(count * width, location)
}

fn eval_address(
    state: &CodegenState,
    expr: &Expression,
    location: &SourceLoc,
) -> AsmResult<u32> {
    let value = eval_int(state, expr, false)?;
    if value < 0 || value > i64::from(u32::max_value()) {
        return err!(location, "address 0x{:X} is out of range", value);
    }
    Ok(value as u32)
}

// ---------------------------------------------------------------------------
// Emission pass.

fn emission_pass(state: &mut CodegenState, module: &Module) -> AsmResult<()> {
    for statement in &module.statements {
        match &statement.kind {
            StatementKind::LabelDefinition { .. } | StatementKind::VarAssignment { .. } => {}
            StatementKind::Instruction {
                instruction,
                operands,
            } => {
                emit_instruction(state, *instruction, operands, &statement.location)?;
            }
            StatementKind::Directive(directive) => {
                emission_pass_directive(state, directive, &statement.location)?;
            }
        }
    }

    for (index, section) in state.sections.iter().enumerate() {
        debug_assert_eq!(
            section.cursor, section.size,
            "section {} diverged between passes",
            index
        );
    }
    Ok(())
}

fn emission_pass_directive(
    state: &mut CodegenState,
    directive: &Directive,
    location: &SourceLoc,
) -> AsmResult<()> {
    match directive {
        Directive::Org { address } => {
            let address = eval_address(state, address, location)?;
            state.switch_to_address(address, location)?;
            Ok(())
        }
        Directive::Rom => {
            state.in_rom = true;
            Ok(())
        }
        Directive::Ram => {
            state.in_rom = false;
            Ok(())
        }
        Directive::Int { vector } => {
            let vector = eval_int(state, vector, false)?;
            let address = g10::IVT_START + vector as u32 * g10::IVT_ENTRY_SIZE;
            state.switch_to_address(address, location)?;
            Ok(())
        }
        Directive::Byte { values } => emit_data(state, values, 1, location),
        Directive::Word { values } => emit_data(state, values, 2, location),
        Directive::Dword { values } => emit_data(state, values, 4, location),
        Directive::Space { size } => {
            let size = eval_int(state, size, false)? as u32;
            let section = state.current_section(location)?;
            if state.sections[section].region == Region::Rom {
                let zeros = vec![0u8; size as usize];
                state.emit_bytes(&zeros, location)
            } else {
                state.advance(size, location)
            }
        }
        Directive::Global { .. }
        | Directive::Extern { .. }
        | Directive::Let { .. }
        | Directive::Const { .. } => Ok(()),
    }
}

fn emit_data(
    state: &mut CodegenState,
    values: &[Expression],
    width: u32,
    location: &SourceLoc,
) -> AsmResult<()> {
    for value in values {
        if let Some(reference) = symbol_ref(state, value)? {
            let kind = match (width, &reference.shape) {
                (1, RefShape::Plain) => RelocationType::Abs8,
                (2, RefShape::Plain) => RelocationType::Abs16,
                (2, RefShape::Hi16) => RelocationType::Hi16,
                (2, RefShape::Lo16) => RelocationType::Lo16,
                (4, RefShape::Plain) => RelocationType::Abs32,
                _ => {
                    return err!(
                        value.location,
                        "unsupported symbol reference shape for this data width"
                    );
                }
            };
            state.add_reloc(kind, &reference.name, reference.addend, &value.location)?;
            let zeros = vec![0u8; width as usize];
            state.emit_bytes(&zeros, location)?;
            continue;
        }

        let evaluated = eval_int(state, value, true)?;
        match width {
            1 => {
                check_range(evaluated, -0x80, 0xFF, &value.location)?;
                state.emit_byte(evaluated as u8, location)?;
            }
            2 => {
                check_range(evaluated, -0x8000, 0xFFFF, &value.location)?;
                state.emit_word(evaluated as u16, location)?;
            }
            _ => {
                check_range(
                    evaluated,
                    -0x8000_0000,
                    0xFFFF_FFFF,
                    &value.location,
                )?;
                state.emit_dword(evaluated as u32, location)?;
            }
        }
    }
    Ok(())
}

fn check_range(value: i64, min: i64, max: i64, location: &SourceLoc) -> AsmResult<()> {
    if value < min || value > max {
        return err!(
            location,
            "value {} does not fit in the destination width",
            value
        );
    }
    Ok(())
}

fn emit_instruction(
    state: &mut CodegenState,
    instruction: Instruction,
    operands: &[Operand],
    location: &SourceLoc,
) -> AsmResult<()> {
    let plan = select_plan(location, instruction, operands)?;

    let operand_byte = match &plan.operand {
        OperandByte::Nibbles(x, y) => {
            let x = nibble_value(state, x, location)?;
            let y = nibble_value(state, y, location)?;
            (x << 4) | y
        }
        OperandByte::Vector(expr) => {
            let vector = eval_int(state, expr, true)?;
            if vector < 0 || vector >= i64::from(g10::IVT_ENTRY_COUNT) {
                return err!(location, "interrupt vector {} is out of range", vector);
            }
            vector as u8
        }
    };

    state.emit_byte(plan.selector, location)?;
    state.emit_byte(operand_byte, location)?;

    if let Some((kind, expr)) = plan.imm {
        emit_immediate(state, kind, expr, location)?;
    }
    Ok(())
}

fn nibble_value(
    state: &CodegenState,
    nibble: &Nibble,
    location: &SourceLoc,
) -> AsmResult<u8> {
    Ok(match nibble {
        Nibble::Zero => 0,
        Nibble::Slot(register) => register.slot(),
        Nibble::Cond(condition) => condition.encode(),
        Nibble::BitIndex(expr) => {
            let bit = eval_int(state, expr, true)?;
            if bit < 0 || bit > 7 {
                return err!(location, "bit index {} is out of range", bit);
            }
            bit as u8
        }
    })
}

fn emit_immediate(
    state: &mut CodegenState,
    kind: ImmKind,
    expr: &Expression,
    location: &SourceLoc,
) -> AsmResult<()> {
    let reference = symbol_ref(state, expr)?;

    match kind {
        ImmKind::Imm32 | ImmKind::Addr32 => {
            if let Some(reference) = reference {
                require_plain(&reference, &expr.location)?;
                state.add_reloc(
                    RelocationType::Abs32,
                    &reference.name,
                    reference.addend,
                    &expr.location,
                )?;
                return state.emit_dword(0, location);
            }
            let value = eval_int(state, expr, true)?;
            check_range(value, -0x8000_0000, 0xFFFF_FFFF, &expr.location)?;
            state.emit_dword(value as u32, location)
        }

        ImmKind::Imm16 => {
            if let Some(reference) = reference {
                let kind = match reference.shape {
                    RefShape::Hi16 => RelocationType::Hi16,
                    RefShape::Plain | RefShape::Lo16 => RelocationType::Lo16,
                };
                state.add_reloc(kind, &reference.name, reference.addend, &expr.location)?;
                return state.emit_word(0, location);
            }
            let value = eval_int(state, expr, true)?;
            check_range(value, -0x8000, 0xFFFF, &expr.location)?;
            state.emit_word(value as u16, location)
        }

        ImmKind::Imm8 => {
            if let Some(reference) = reference {
                require_plain(&reference, &expr.location)?;
                state.add_reloc(
                    RelocationType::Abs8,
                    &reference.name,
                    reference.addend,
                    &expr.location,
                )?;
                return state.emit_byte(0, location);
            }
            let value = eval_int(state, expr, true)?;
            check_range(value, -0x80, 0xFF, &expr.location)?;
            state.emit_byte(value as u8, location)
        }

        ImmKind::Addr16 => {
            if let Some(reference) = reference {
                require_plain(&reference, &expr.location)?;
                state.add_reloc(
                    RelocationType::Quick16,
                    &reference.name,
                    reference.addend,
                    &expr.location,
                )?;
                return state.emit_word(0, location);
            }
            let value = eval_int(state, expr, true)?;
            let encoded = quick_offset(value, &expr.location)?;
            state.emit_word(encoded, location)
        }

        ImmKind::Addr8 => {
            if let Some(reference) = reference {
                require_plain(&reference, &expr.location)?;
                state.add_reloc(
                    RelocationType::Port8,
                    &reference.name,
                    reference.addend,
                    &expr.location,
                )?;
                return state.emit_byte(0, location);
            }
            let value = eval_int(state, expr, true)?;
            let encoded = port_offset(value, &expr.location)?;
            state.emit_byte(encoded, location)
        }

        ImmKind::Rel16 => emit_branch_target(state, expr, location),
    }
}

fn require_plain(reference: &SymbolRef, location: &SourceLoc) -> AsmResult<()> {
    if matches!(reference.shape, RefShape::Plain) {
        Ok(())
    } else {
        err!(
            location,
            "a shifted or masked symbol reference is not valid here"
        )
    }
}

/// Encodes a quick-page address: either an absolute address at or above
/// `$FFFF0000`, or a bare 16-bit offset.
fn quick_offset(value: i64, location: &SourceLoc) -> AsmResult<u16> {
    if value >= i64::from(g10::QUICK_BASE) && value <= i64::from(u32::max_value()) {
        return Ok((value as u32 - g10::QUICK_BASE) as u16);
    }
    if value >= 0 && value <= 0xFFFF {
        return Ok(value as u16);
    }
    err!(
        location,
        "address 0x{:X} is not reachable with quick addressing",
        value
    )
}

/// Encodes a port-page address: either an absolute address at or above
/// `$FFFFFF00`, or a bare 8-bit offset.
fn port_offset(value: i64, location: &SourceLoc) -> AsmResult<u8> {
    if value >= i64::from(g10::PORT_BASE) && value <= i64::from(u32::max_value()) {
        return Ok((value as u32 - g10::PORT_BASE) as u8);
    }
    if value >= 0 && value <= 0xFF {
        return Ok(value as u8);
    }
    err!(
        location,
        "address 0x{:X} is not reachable with port addressing",
        value
    )
}

/// Emits a `JPB` displacement. Targets inside the same section resolve at
/// assembly time; everything else records a `rel16` relocation whose addend
/// backs the site up to the displacement base (the byte after the operand).
fn emit_branch_target(
    state: &mut CodegenState,
    expr: &Expression,
    location: &SourceLoc,
) -> AsmResult<()> {
    let section = state.current_section(location)?;

    if let Some(reference) = symbol_ref(state, expr)? {
        require_plain(&reference, &expr.location)?;

        if let Some(label) = state.find_label(&reference.name) {
            if label.section == section {
                // Same section: the displacement survives linking unchanged.
                let site = i64::from(state.sections[section].cursor);
                let displacement =
                    i64::from(label.offset) + reference.addend - (site + 2);
                check_range(displacement, -0x8000, 0x7FFF, &expr.location)?;
                return state.emit_word(displacement as u16, location);
            }
        }

        let addend = reference.addend - 2;
        state.add_reloc(RelocationType::Rel16, &reference.name, addend, &expr.location)?;
        return state.emit_word(0, location);
    }

    // A constant target is an absolute address; turn it into a displacement
    // from the counter past this instruction.
    let target = eval_int(state, expr, true)?;
    let site = i64::from(state.counter(location)?);
    let displacement = target - (site + 2);
    check_range(displacement, -0x8000, 0x7FFF, &expr.location)?;
    state.emit_word(displacement as u16, location)
}

// ---------------------------------------------------------------------------
// Finalization.

fn finalize(state: CodegenState) -> AsmResult<Object> {
    let mut object = Object::new();
    object.flags = object::object_flags::RELOCATABLE;

    // Verify that every exported symbol is actually defined here.
    for name in &state.globals {
        if !state.label_index.contains_key(name) {
            return Err(AsmError::without_location(format!(
                "global symbol '{}' has no local definition",
                name
            )));
        }
    }

    for plan in &state.sections {
        let (kind, flags, data, size) = match plan.region {
            Region::Rom => (
                SectionType::Code,
                section_flags::ALLOC | section_flags::LOAD | section_flags::EXEC,
                plan.data.clone(),
                plan.size,
            ),
            Region::Ram => (
                SectionType::Bss,
                section_flags::ALLOC | section_flags::WRITE,
                Vec::new(),
                plan.size,
            ),
        };
        let prefix = match plan.region {
            Region::Rom => "code",
            Region::Ram => "bss",
        };
        object.add_section(Section {
            name: format!("{}@{:08x}", prefix, plan.base),
            virtual_address: plan.base,
            size,
            kind,
            flags,
            data,
        });
    }

    let mut entry_found = false;
    for label in &state.labels {
        let binding = if state.globals.iter().any(|n| n == &label.name) {
            SymbolBinding::Global
        } else {
            SymbolBinding::Local
        };
        let mut flags = 0u16;
        if !entry_found && ENTRY_NAMES.contains(&label.name.as_str()) {
            flags |= symbol_flags::ENTRY;
            entry_found = true;
        }
        object
            .add_symbol(Symbol {
                name: label.name.clone(),
                value: label.offset,
                section_index: label.section as u32,
                kind: label.kind,
                binding,
                flags,
            })
            .map_err(|e| AsmError::without_location(e.to_string()))?;
    }

    for name in &state.externs {
        object
            .add_symbol(Symbol {
                name: name.clone(),
                value: 0,
                section_index: object::SECTION_INDEX_UNDEF,
                kind: SymbolType::None,
                binding: SymbolBinding::Extern,
                flags: 0,
            })
            .map_err(|e| AsmError::without_location(e.to_string()))?;
    }

    if entry_found {
        object.flags |= object::object_flags::HAS_ENTRY;
    }

    for pending in &state.relocations {
        let symbol_index = object.find_symbol(&pending.symbol).ok_or_else(|| AsmError {
            location: Some(pending.location.clone()),
            message: format!(
                "relocation references unknown symbol '{}'",
                pending.symbol
            ),
        })? as u32;
        object
            .add_relocation(Relocation {
                offset: pending.offset,
                symbol_index,
                section_index: pending.section as u32,
                kind: pending.kind,
                addend: pending.addend as i32,
            })
            .map_err(|e| AsmError {
                location: Some(pending.location.clone()),
                message: e.to_string(),
            })?;
    }

    object
        .validate()
        .map_err(|e| AsmError::without_location(e.to_string()))?;
    Ok(object)
}
