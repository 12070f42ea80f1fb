//! Fixed platform constants: the G10 memory map and instruction-encoding
//! widths. These are part of the platform contract and must not change
//! between the assembler, linker and any program consumer.

/// Start of the ROM region.
pub const ROM_START         : u32 = 0x0000_0000;

/// Last address of the ROM region (inclusive).
pub const ROM_END           : u32 = 0x7FFF_FFFF;

/// Start of the RAM region.
pub const RAM_START         : u32 = 0x8000_0000;

/// Last address of the RAM region (inclusive).
pub const RAM_END           : u32 = 0xFFFF_FFFF;

/// Start of the program metadata region within ROM.
pub const METADATA_START    : u32 = 0x0000_0000;

/// Start of the interrupt vector table within ROM.
pub const IVT_START         : u32 = 0x0000_1000;

/// Number of interrupt vectors.
pub const IVT_ENTRY_COUNT   : u32 = 32;

/// Size of a single interrupt vector subroutine slot, in bytes.
pub const IVT_ENTRY_SIZE    : u32 = 0x80;

/// Start of general code/data within ROM. Also the CPU's power-on program
/// counter and therefore the default program entry point.
pub const CODE_START        : u32 = 0x0000_2000;

/// Default initial stack pointer for linked programs.
pub const DEFAULT_STACK_POINTER : u32 = 0xFFFF_FFFC;

/// Size of the opcode unit (selector byte + operand byte).
pub const OPCODE_BYTES      : u32 = 2;

/// Number of general-purpose register slots.
pub const REGISTER_SLOTS    : usize = 16;

/// Base address that `quick16` relocations are encoded relative to.
pub const QUICK_BASE        : u32 = 0xFFFF_0000;

/// Base address that `port8` relocations are encoded relative to.
pub const PORT_BASE         : u32 = 0xFFFF_FF00;
