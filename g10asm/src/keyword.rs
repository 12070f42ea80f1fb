//! The assembler's static keyword lookup table.
//!
//! Every reserved word the lexer can recognize lives in one compile-time
//! table: instruction mnemonics (with their aliases), preprocessor functions,
//! preprocessor and assembler directives, pragmas, register names and
//! branching conditions. Tokens refer to table entries by index, so nothing
//! downstream has to keep references alive.

use g10::{ConditionCode, Instruction, RegisterKind};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// Index of an entry in the keyword table.
pub type KeywordId = usize;

/// The category of a keyword.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeywordKind {
    InstructionMnemonic,
    PreprocessorFunction,
    PreprocessorDirective,
    AssemblerDirective,
    Pragma,
    RegisterName,
    BranchingCondition,
}

impl KeywordKind {
    pub fn describe(self) -> &'static str {
        match self {
            KeywordKind::InstructionMnemonic => "instruction mnemonic",
            KeywordKind::PreprocessorFunction => "preprocessor function",
            KeywordKind::PreprocessorDirective => "preprocessor directive",
            KeywordKind::AssemblerDirective => "assembler directive",
            KeywordKind::Pragma => "pragma",
            KeywordKind::RegisterName => "register name",
            KeywordKind::BranchingCondition => "branching condition",
        }
    }
}

/// Discriminants for directive keywords, both preprocessor and assembler.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum DirectiveType {
    // Preprocessor directives.
    Pragma,
    Include,
    Define,
    Macro,
    EndMacro,
    Undef,
    IfDef,
    IfNdef,
    If,
    ElseIf,
    Else,
    EndIf,
    Repeat,
    EndRepeat,
    For,
    EndFor,
    While,
    EndWhile,
    Continue,
    Break,
    Info,
    Warning,
    Error,
    Fatal,
    Assert,
    // Assembler directives.
    Org,
    Rom,
    Ram,
    Int,
    Byte,
    Word,
    Dword,
    Space,
    Global,
    Extern,
    Let,
    Const,
}

/// Discriminants for pragma keywords.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum PragmaType {
    Once,
    MaxRecursionDepth,
    MaxIncludeDepth,
    // Inserted automatically around included files; not written by hand.
    PushFile,
    PopFile,
}

/// One entry of the keyword table.
#[derive(Debug)]
pub struct Keyword {
    pub lexeme: &'static str,
    pub kind: KeywordKind,
    pub param: u16,
}

impl Keyword {
    pub fn instruction(&self) -> Option<Instruction> {
        match self.kind {
            KeywordKind::InstructionMnemonic => Instruction::from_u16(self.param),
            _ => None,
        }
    }

    pub fn directive(&self) -> Option<DirectiveType> {
        match self.kind {
            KeywordKind::PreprocessorDirective | KeywordKind::AssemblerDirective => {
                DirectiveType::from_u16(self.param)
            }
            _ => None,
        }
    }

    pub fn pragma(&self) -> Option<PragmaType> {
        match self.kind {
            KeywordKind::Pragma => PragmaType::from_u16(self.param),
            _ => None,
        }
    }

    pub fn register(&self) -> Option<RegisterKind> {
        match self.kind {
            KeywordKind::RegisterName => RegisterKind::from_u16(self.param),
            _ => None,
        }
    }

    pub fn condition(&self) -> Option<ConditionCode> {
        match self.kind {
            KeywordKind::BranchingCondition => ConditionCode::from_u16(self.param),
            _ => None,
        }
    }
}

macro_rules! kw {
    ( $lexeme:expr, $kind:ident, $param:expr ) => {
        Keyword {
            lexeme: $lexeme,
            kind: KeywordKind::$kind,
            param: $param,
        }
    };
}

macro_rules! instr {
    ( $lexeme:expr, $variant:ident ) => {
        kw!($lexeme, InstructionMnemonic, Instruction::$variant as u16)
    };
}

macro_rules! directive {
    ( $lexeme:expr, $kind:ident, $variant:ident ) => {
        kw!($lexeme, $kind, DirectiveType::$variant as u16)
    };
}

macro_rules! register {
    ( $lexeme:expr, $variant:ident ) => {
        kw!($lexeme, RegisterName, RegisterKind::$variant as u16)
    };
}

/// The keyword table. Lookup is case-insensitive; entries are stored in
/// lowercase.
pub static KEYWORDS: &[Keyword] = &[
    // Instruction mnemonics.
    instr!("nop", Nop),
    instr!("stop", Stop),
    instr!("halt", Halt),
    instr!("di", Di),
    instr!("ei", Ei),
    instr!("eii", Eii),
    instr!("daa", Daa),
    instr!("scf", Scf),
    instr!("ccf", Ccf),
    instr!("clv", Clv),
    instr!("sev", Sev),
    instr!("ld", Ld),
    instr!("ldq", Ldq),
    instr!("ldp", Ldp),
    instr!("st", St),
    instr!("stq", Stq),
    instr!("stp", Stp),
    instr!("mv", Mv),
    instr!("mwh", Mwh),
    instr!("mwl", Mwl),
    instr!("lsp", Lsp),
    instr!("pop", Pop),
    instr!("ssp", Ssp),
    instr!("push", Push),
    instr!("spo", Spo),
    instr!("spi", Spi),
    instr!("jmp", Jmp),
    instr!("jpb", Jpb),
    instr!("call", Call),
    instr!("int", Int),
    instr!("ret", Ret),
    instr!("reti", Reti),
    instr!("add", Add),
    instr!("adc", Adc),
    instr!("sub", Sub),
    instr!("sbc", Sbc),
    instr!("inc", Inc),
    instr!("dec", Dec),
    instr!("and", And),
    instr!("or", Or),
    instr!("xor", Xor),
    instr!("not", Not),
    instr!("cmp", Cmp),
    instr!("sla", Sla),
    instr!("sra", Sra),
    instr!("srl", Srl),
    instr!("swap", Swap),
    instr!("rla", Rla),
    instr!("rl", Rl),
    instr!("rlca", Rlca),
    instr!("rlc", Rlc),
    instr!("rra", Rra),
    instr!("rr", Rr),
    instr!("rrca", Rrca),
    instr!("rrc", Rrc),
    instr!("bit", Bit),
    instr!("set", Set),
    instr!("res", Res),
    instr!("tog", Tog),
    // Instruction mnemonic aliases.
    instr!("tcf", Ccf),
    instr!("jp", Jmp),
    instr!("jr", Jpb),
    instr!("cpl", Not),
    instr!("cp", Cmp),
    // Preprocessor functions. The remaining built-ins are dispatched by
    // identifier name inside the evaluator.
    kw!("fint", PreprocessorFunction, 0),
    kw!("ffrac", PreprocessorFunction, 0),
    kw!("strlen", PreprocessorFunction, 0),
    kw!("strcmp", PreprocessorFunction, 0),
    kw!("substr", PreprocessorFunction, 0),
    kw!("indexof", PreprocessorFunction, 0),
    kw!("toupper", PreprocessorFunction, 0),
    kw!("tolower", PreprocessorFunction, 0),
    kw!("concat", PreprocessorFunction, 0),
    kw!("defined", PreprocessorFunction, 0),
    kw!("typeof", PreprocessorFunction, 0),
    // Preprocessor directives.
    directive!(".pragma", PreprocessorDirective, Pragma),
    directive!(".include", PreprocessorDirective, Include),
    directive!(".define", PreprocessorDirective, Define),
    directive!(".macro", PreprocessorDirective, Macro),
    directive!(".endm", PreprocessorDirective, EndMacro),
    directive!(".undef", PreprocessorDirective, Undef),
    directive!(".purge", PreprocessorDirective, Undef),
    directive!(".ifdef", PreprocessorDirective, IfDef),
    directive!(".ifndef", PreprocessorDirective, IfNdef),
    directive!(".if", PreprocessorDirective, If),
    directive!(".elseif", PreprocessorDirective, ElseIf),
    directive!(".elif", PreprocessorDirective, ElseIf),
    directive!(".else", PreprocessorDirective, Else),
    directive!(".endif", PreprocessorDirective, EndIf),
    directive!(".endc", PreprocessorDirective, EndIf),
    directive!(".repeat", PreprocessorDirective, Repeat),
    directive!(".rept", PreprocessorDirective, Repeat),
    directive!(".endrepeat", PreprocessorDirective, EndRepeat),
    directive!(".endr", PreprocessorDirective, EndRepeat),
    directive!(".for", PreprocessorDirective, For),
    directive!(".endfor", PreprocessorDirective, EndFor),
    directive!(".endf", PreprocessorDirective, EndFor),
    directive!(".while", PreprocessorDirective, While),
    directive!(".endwhile", PreprocessorDirective, EndWhile),
    directive!(".endw", PreprocessorDirective, EndWhile),
    directive!(".continue", PreprocessorDirective, Continue),
    directive!(".break", PreprocessorDirective, Break),
    directive!(".info", PreprocessorDirective, Info),
    directive!(".warning", PreprocessorDirective, Warning),
    directive!(".warn", PreprocessorDirective, Warning),
    directive!(".error", PreprocessorDirective, Error),
    directive!(".err", PreprocessorDirective, Error),
    directive!(".fatal", PreprocessorDirective, Fatal),
    directive!(".fail", PreprocessorDirective, Fatal),
    directive!(".critical", PreprocessorDirective, Fatal),
    directive!(".assert", PreprocessorDirective, Assert),
    // Assembler directives.
    directive!(".org", AssemblerDirective, Org),
    directive!(".rom", AssemblerDirective, Rom),
    directive!(".ram", AssemblerDirective, Ram),
    directive!(".interrupt", AssemblerDirective, Int),
    directive!(".int", AssemblerDirective, Int),
    directive!(".byte", AssemblerDirective, Byte),
    directive!(".db", AssemblerDirective, Byte),
    directive!(".word", AssemblerDirective, Word),
    directive!(".dw", AssemblerDirective, Word),
    directive!(".dword", AssemblerDirective, Dword),
    directive!(".dd", AssemblerDirective, Dword),
    directive!(".space", AssemblerDirective, Space),
    directive!(".ds", AssemblerDirective, Space),
    directive!(".global", AssemblerDirective, Global),
    directive!(".extern", AssemblerDirective, Extern),
    directive!(".let", AssemblerDirective, Let),
    directive!(".const", AssemblerDirective, Const),
    // Pragmas.
    kw!("once", Pragma, PragmaType::Once as u16),
    kw!("max_recursion_depth", Pragma, PragmaType::MaxRecursionDepth as u16),
    kw!("max_include_depth", Pragma, PragmaType::MaxIncludeDepth as u16),
    // Inserted (automatic) pragmas.
    kw!("push_file", Pragma, PragmaType::PushFile as u16),
    kw!("pop_file", Pragma, PragmaType::PopFile as u16),
    // CPU registers.
    register!("d0", D0), register!("d1", D1), register!("d2", D2), register!("d3", D3),
    register!("d4", D4), register!("d5", D5), register!("d6", D6), register!("d7", D7),
    register!("d8", D8), register!("d9", D9), register!("d10", D10), register!("d11", D11),
    register!("d12", D12), register!("d13", D13), register!("d14", D14), register!("d15", D15),
    register!("w0", W0), register!("w1", W1), register!("w2", W2), register!("w3", W3),
    register!("w4", W4), register!("w5", W5), register!("w6", W6), register!("w7", W7),
    register!("w8", W8), register!("w9", W9), register!("w10", W10), register!("w11", W11),
    register!("w12", W12), register!("w13", W13), register!("w14", W14), register!("w15", W15),
    register!("h0", H0), register!("h1", H1), register!("h2", H2), register!("h3", H3),
    register!("h4", H4), register!("h5", H5), register!("h6", H6), register!("h7", H7),
    register!("h8", H8), register!("h9", H9), register!("h10", H10), register!("h11", H11),
    register!("h12", H12), register!("h13", H13), register!("h14", H14), register!("h15", H15),
    register!("l0", L0), register!("l1", L1), register!("l2", L2), register!("l3", L3),
    register!("l4", L4), register!("l5", L5), register!("l6", L6), register!("l7", L7),
    register!("l8", L8), register!("l9", L9), register!("l10", L10), register!("l11", L11),
    register!("l12", L12), register!("l13", L13), register!("l14", L14), register!("l15", L15),
    // Branching conditions.
    kw!("nc", BranchingCondition, ConditionCode::Nc as u16),
    kw!("zs", BranchingCondition, ConditionCode::Zs as u16),
    kw!("zc", BranchingCondition, ConditionCode::Zc as u16),
    kw!("cs", BranchingCondition, ConditionCode::Cs as u16),
    kw!("cc", BranchingCondition, ConditionCode::Cc as u16),
    kw!("vs", BranchingCondition, ConditionCode::Vs as u16),
    kw!("vc", BranchingCondition, ConditionCode::Vc as u16),
];

/// Looks up a lexeme in the keyword table, case-insensitively.
pub fn lookup(lexeme: &str) -> Option<KeywordId> {
    if lexeme.is_empty() {
        return None;
    }
    let lower = lexeme.to_ascii_lowercase();
    KEYWORDS.iter().position(|entry| entry.lexeme == lower)
}

/// Retrieves a keyword entry by id.
pub fn get(id: KeywordId) -> &'static Keyword {
    &KEYWORDS[id]
}
