use num_derive::{FromPrimitive, ToPrimitive};

// Instruction encoding
//
//          +----------+-----------+------------------------+
//          | byte 0   | byte 1    | bytes 2..              |
//          +----------+-----------+------------------------+
//          | selector | x | y     | immediate (0/1/2/4 LE) |
//          +----------+-----------+------------------------+
//
// The operand byte packs the `x` operand in the high nibble and the `y`
// operand in the low nibble. Which of the two carries a register slot, a
// condition code or a bit index depends on the selector; `INT` uses the
// whole byte as its vector number. Read as a little-endian u16, the unit
// equals `(operand_byte << 8) | selector`.

/// The G10 instruction mnemonics.
///
/// A mnemonic does not map to a single selector byte; the code generator
/// picks the selector from the mnemonic plus the operand forms (register
/// width, immediate vs. memory, quick/port addressing).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, FromPrimitive, ToPrimitive)]
pub enum Instruction {
    //  Mnemonic | Effect
    //-----------+---------------------------------------------------------
    // Control   |
    Nop,  // | Does nothing
    Stop, // | Stops the CPU until woken externally
    Halt, // | Halts until an enabled interrupt is pending
    Di,   // | Disables interrupts
    Ei,   // | Enables interrupts after the next instruction
    Eii,  // | Enables interrupts immediately
    Daa,  // | Decimal-adjusts L0
    Scf,  // | Sets the carry flag
    Ccf,  // | Complements the carry flag (alias: TCF)
    Clv,  // | Clears the overflow flag
    Sev,  // | Sets the overflow flag
    //-----------+---------------------------------------------------------
    // Load/Store|
    Ld,   // | Rx = imm / MEM[addr32] / MEM[Dy]
    Ldq,  // | Rx = MEM[$FFFF0000 + addr16] / MEM[Wy]
    Ldp,  // | Lx = MEM[$FFFFFF00 + addr8] / MEM[Ly]
    St,   // | MEM[addr32] / MEM[Dx] = Ry
    Stq,  // | MEM[$FFFF0000 + addr16] / MEM[Wx] = Ry
    Stp,  // | MEM[$FFFFFF00 + addr8] / MEM[Lx] = Ly
    Mv,   // | Rx = Ry (same width; also Hx<->Ly forms)
    Mwh,  // | Dx[16..31] = Wy
    Mwl,  // | Wx = Dy[16..31]
    //-----------+---------------------------------------------------------
    // Stack     |
    Lsp,  // | SP = imm32
    Pop,  // | Dx = MEM[SP]; SP += 4
    Ssp,  // | MEM[addr32] = SP
    Push, // | SP -= 4; MEM[SP] = Dy
    Spo,  // | Dx = SP
    Spi,  // | SP = Dy
    //-----------+---------------------------------------------------------
    // Branching |
    Jmp,  // | PC = imm32 / Dy, if condition holds (alias: JP)
    Jpb,  // | PC += simm16, if condition holds (alias: JR)
    Call, // | Pushes PC; PC = imm32, if condition holds
    Int,  // | Calls interrupt vector 0-31
    Ret,  // | Pops PC, if condition holds
    Reti, // | Pops PC and enables interrupts
    //-----------+---------------------------------------------------------
    // ALU       |
    Add,  // | A0 += operand
    Adc,  // | L0 += operand + carry
    Sub,  // | A0 -= operand
    Sbc,  // | L0 -= operand + carry
    Inc,  // | Rx += 1 / MEM[Dx] += 1
    Dec,  // | Rx -= 1 / MEM[Dx] -= 1
    And,  // | L0 &= operand
    Or,   // | L0 |= operand
    Xor,  // | L0 ^= operand
    Not,  // | Lx = ~Lx / MEM[Dx] = ~MEM[Dx] (alias: CPL)
    Cmp,  // | Sets flags from L0 - operand (alias: CP)
    //-----------+---------------------------------------------------------
    // Shifts    |
    Sla,  // | Shift left arithmetic
    Sra,  // | Shift right arithmetic
    Srl,  // | Shift right logical
    Swap, // | Swaps the halves of Lx/Wx/Dx
    Rla,  // | Rotates L0 left through carry
    Rl,   // | Rotates left through carry
    Rlca, // | Rotates L0 left circular
    Rlc,  // | Rotates left circular
    Rra,  // | Rotates L0 right through carry
    Rr,   // | Rotates right through carry
    Rrca, // | Rotates L0 right circular
    Rrc,  // | Rotates right circular
    //-----------+---------------------------------------------------------
    // Bit ops   |
    Bit,  // | Tests bit y of Lx / MEM[Dx]
    Set,  // | Sets bit y
    Res,  // | Resets bit y
    Tog,  // | Toggles bit y
}

/// The width of a register view.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegisterWidth {
    Byte,
    Word,
    Dword,
}

impl RegisterWidth {
    /// Number of bytes an immediate of this width occupies.
    pub fn immediate_bytes(self) -> u32 {
        match self {
            RegisterWidth::Byte => 1,
            RegisterWidth::Word => 2,
            RegisterWidth::Dword => 4,
        }
    }
}

/// A register operand, encoded as `SSSS RRRR`.
///
/// `SSSS` is the size/view selector (`0` = 32-bit `Dn`, `1` = 16-bit `Wn`,
/// `2` = high byte `Hn`, `4` = low byte `Ln`; `3` is reserved) and `RRRR`
/// the slot index. The 2-to-4 jump in the selector values is part of the
/// platform contract; do not renumber.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum RegisterKind {
    D0 = 0x00, D1 = 0x01, D2 = 0x02, D3 = 0x03,
    D4 = 0x04, D5 = 0x05, D6 = 0x06, D7 = 0x07,
    D8 = 0x08, D9 = 0x09, D10 = 0x0A, D11 = 0x0B,
    D12 = 0x0C, D13 = 0x0D, D14 = 0x0E, D15 = 0x0F,

    W0 = 0x10, W1 = 0x11, W2 = 0x12, W3 = 0x13,
    W4 = 0x14, W5 = 0x15, W6 = 0x16, W7 = 0x17,
    W8 = 0x18, W9 = 0x19, W10 = 0x1A, W11 = 0x1B,
    W12 = 0x1C, W13 = 0x1D, W14 = 0x1E, W15 = 0x1F,

    H0 = 0x20, H1 = 0x21, H2 = 0x22, H3 = 0x23,
    H4 = 0x24, H5 = 0x25, H6 = 0x26, H7 = 0x27,
    H8 = 0x28, H9 = 0x29, H10 = 0x2A, H11 = 0x2B,
    H12 = 0x2C, H13 = 0x2D, H14 = 0x2E, H15 = 0x2F,

    L0 = 0x40, L1 = 0x41, L2 = 0x42, L3 = 0x43,
    L4 = 0x44, L5 = 0x45, L6 = 0x46, L7 = 0x47,
    L8 = 0x48, L9 = 0x49, L10 = 0x4A, L11 = 0x4B,
    L12 = 0x4C, L13 = 0x4D, L14 = 0x4E, L15 = 0x4F,
}

impl RegisterKind {
    /// The `SSSS RRRR` encoding of this register.
    pub fn encode(self) -> u8 {
        self as u8
    }

    /// The size/view selector (high nibble of the encoding).
    pub fn selector(self) -> u8 {
        (self as u8) >> 4
    }

    /// The register slot index (low nibble of the encoding, 0-15).
    pub fn slot(self) -> u8 {
        (self as u8) & 0x0F
    }

    /// The width of this register view.
    pub fn width(self) -> RegisterWidth {
        match self.selector() {
            0 => RegisterWidth::Dword,
            1 => RegisterWidth::Word,
            _ => RegisterWidth::Byte,
        }
    }

    /// `true` for the high-byte `Hn` views.
    pub fn is_high_byte(self) -> bool {
        self.selector() == 2
    }

    /// `true` for the low-byte `Ln` views.
    pub fn is_low_byte(self) -> bool {
        self.selector() == 4
    }
}

/// A branching condition code, encoded in an operand nibble.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum ConditionCode {
    Nc = 0, // No condition (always taken)
    Zs = 1, // Zero flag set
    Zc = 2, // Zero flag clear
    Cs = 3, // Carry flag set
    Cc = 4, // Carry flag clear
    Vs = 5, // Overflow flag set
    Vc = 6, // Overflow flag clear
}

impl ConditionCode {
    /// The nibble value this condition encodes as.
    pub fn encode(self) -> u8 {
        self as u8
    }
}
