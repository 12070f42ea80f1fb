//! Architecture definitions for the G10, a 32-bit CPU with sixteen
//! general-purpose register slots, a flat 4 GiB address space split into ROM
//! and RAM halves, and a 32-entry interrupt vector table.
//!
//! This crate holds everything the assembler ([g10asm](../g10asm/index.html))
//! and linker ([g10link](../g10link/index.html)) need to agree on: the
//! instruction set with its selector bytes, the register model and its
//! one-byte encoding, branching condition codes, and the fixed memory map.
//! The binary file formats built on top of these definitions live in the
//! [g10file](../g10file/index.html) crate.

pub mod constants;
pub mod enums;

pub use constants::*;
pub use enums::*;

/// Byte order used by every multi-byte value the toolchain emits or reads.
pub type Endian = byteorder::LittleEndian;

/// A full-width machine word.
pub type Word = u32;

/// A flat memory address.
pub type Address = u32;

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn register_encodings_follow_the_selector_scheme() {
        assert_eq!(RegisterKind::D0.encode(), 0x00);
        assert_eq!(RegisterKind::D15.encode(), 0x0F);
        assert_eq!(RegisterKind::W0.encode(), 0x10);
        assert_eq!(RegisterKind::H7.encode(), 0x27);
        // Selector 3 is reserved; the low-byte views jump to 4.
        assert_eq!(RegisterKind::L0.encode(), 0x40);
        assert_eq!(RegisterKind::L15.encode(), 0x4F);
    }

    #[test]
    fn register_slots_and_widths() {
        assert_eq!(RegisterKind::D9.slot(), 9);
        assert_eq!(RegisterKind::L9.slot(), 9);
        assert_eq!(RegisterKind::D1.width(), RegisterWidth::Dword);
        assert_eq!(RegisterKind::W1.width(), RegisterWidth::Word);
        assert_eq!(RegisterKind::H1.width(), RegisterWidth::Byte);
        assert_eq!(RegisterKind::L1.width(), RegisterWidth::Byte);
        assert!(RegisterKind::H1.is_high_byte());
        assert!(RegisterKind::L1.is_low_byte());
        assert!(!RegisterKind::W1.is_high_byte());
    }

    #[test]
    fn reserved_selector_values_do_not_decode() {
        assert_eq!(RegisterKind::from_u16(0x30), None);
        assert_eq!(RegisterKind::from_u16(0x50), None);
        assert_eq!(RegisterKind::from_u16(0x4F), Some(RegisterKind::L15));
    }

    #[test]
    fn condition_codes_are_stable() {
        assert_eq!(ConditionCode::Nc.encode(), 0);
        assert_eq!(ConditionCode::Zs.encode(), 1);
        assert_eq!(ConditionCode::Zc.encode(), 2);
        assert_eq!(ConditionCode::Cs.encode(), 3);
        assert_eq!(ConditionCode::Cc.encode(), 4);
        assert_eq!(ConditionCode::Vs.encode(), 5);
        assert_eq!(ConditionCode::Vc.encode(), 6);
    }

    #[test]
    fn memory_map_regions_abut() {
        assert_eq!(ROM_END + 1, RAM_START);
        assert_eq!(IVT_START + IVT_ENTRY_COUNT * IVT_ENTRY_SIZE, CODE_START);
        assert_eq!(RegisterWidth::Word.immediate_bytes(), 2);
    }
}
