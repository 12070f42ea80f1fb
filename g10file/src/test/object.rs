use crate::object::*;
use byteorder::{ByteOrder, WriteBytesExt};
use g10::Endian;

fn sample_object() -> Object {
    let mut object = Object::new();
    object.flags = object_flags::RELOCATABLE | object_flags::HAS_ENTRY;

    object.add_section(Section {
        name: "code@00002000".to_owned(),
        virtual_address: 0x2000,
        size: 7,
        kind: SectionType::Code,
        flags: section_flags::ALLOC | section_flags::LOAD | section_flags::EXEC,
        data: vec![0x10, 0x00, 0x42, 0x02, 0x00, 0x00, 0x00],
    });
    object.add_section(Section {
        name: "bss@80001000".to_owned(),
        virtual_address: 0x8000_1000,
        size: 64,
        kind: SectionType::Bss,
        flags: section_flags::ALLOC | section_flags::WRITE,
        data: Vec::new(),
    });

    object
        .add_symbol(Symbol {
            name: "main".to_owned(),
            value: 0,
            section_index: 0,
            kind: SymbolType::Label,
            binding: SymbolBinding::Global,
            flags: symbol_flags::ENTRY,
        })
        .unwrap();
    object
        .add_symbol(Symbol {
            name: "helper".to_owned(),
            value: 0,
            section_index: SECTION_INDEX_UNDEF,
            kind: SymbolType::None,
            binding: SymbolBinding::Extern,
            flags: 0,
        })
        .unwrap();

    object
        .add_relocation(Relocation {
            offset: 3,
            symbol_index: 1,
            section_index: 0,
            kind: RelocationType::Abs32,
            addend: -2,
        })
        .unwrap();

    object
}

#[test]
fn write_read_round_trip() {
    let original = sample_object();
    let mut buffer = Vec::new();
    write(&mut buffer, &original).unwrap();

    let parsed = read(&mut &buffer[..]).unwrap();
    assert_eq!(original, parsed);
}

#[test]
fn write_read_file_round_trip() {
    let path = std::env::temp_dir().join("g10file_test.g10o");
    let original = sample_object();

    write_file(&path, &original).unwrap();
    let parsed = read_file(&path).unwrap();
    assert_eq!(original, parsed);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn magic_is_g10o_on_disk() {
    let mut buffer = Vec::new();
    write(&mut buffer, &sample_object()).unwrap();
    assert_eq!(&buffer[0..4], &[0x4F, 0x30, 0x31, 0x47]);
}

#[test]
fn header_is_64_bytes_and_sections_follow() {
    let object = sample_object();
    let mut buffer = Vec::new();
    write(&mut buffer, &object).unwrap();

    // Section count lives at offset 12.
    assert_eq!(Endian::read_u32(&buffer[12..16]), 2);

    // First section header starts right after the 64-byte header.
    assert_eq!(
        Endian::read_u32(&buffer[HEADER_SIZE + 4..HEADER_SIZE + 8]),
        0x2000
    );
}

#[test]
fn bss_section_data_is_not_written() {
    let object = sample_object();
    let mut buffer = Vec::new();
    write(&mut buffer, &object).unwrap();

    // Total section data is only the code section's 7 bytes.
    let symbol_table_offset = Endian::read_u32(&buffer[16..20]) as usize;
    assert_eq!(symbol_table_offset, HEADER_SIZE + 2 * ENTRY_SIZE + 7);

    let parsed = read(&mut &buffer[..]).unwrap();
    assert_eq!(parsed.sections[1].size, 64);
    assert!(parsed.sections[1].data.is_empty());
}

#[test]
fn addend_is_sign_extended_from_disk() {
    let object = sample_object();
    let mut buffer = Vec::new();
    write(&mut buffer, &object).unwrap();

    let parsed = read(&mut &buffer[..]).unwrap();
    assert_eq!(parsed.relocations[0].addend, -2);
}

#[test]
fn addend_outside_i16_is_rejected() {
    let mut object = sample_object();
    let result = object.add_relocation(Relocation {
        offset: 0,
        symbol_index: 0,
        section_index: 0,
        kind: RelocationType::Abs32,
        addend: 0x1_0000,
    });
    assert!(result.is_err());
}

#[test]
fn bad_magic_is_rejected() {
    let mut buffer = Vec::new();
    write(&mut buffer, &sample_object()).unwrap();
    buffer[0] = 0x00;
    assert!(read(&mut &buffer[..]).is_err());
}

#[test]
fn truncated_file_is_rejected() {
    let mut buffer = Vec::new();
    write(&mut buffer, &sample_object()).unwrap();
    buffer.truncate(HEADER_SIZE + ENTRY_SIZE);
    assert!(read(&mut &buffer[..]).is_err());
}

#[test]
fn relocation_overrunning_section_is_rejected() {
    let mut object = sample_object();
    object.relocations[0].offset = 5;
    let mut buffer = Vec::new();
    assert!(write(&mut buffer, &object).is_err());
}

#[test]
fn duplicate_symbol_is_rejected() {
    let mut object = sample_object();
    let result = object.add_symbol(Symbol {
        name: "main".to_owned(),
        value: 4,
        section_index: 0,
        kind: SymbolType::Label,
        binding: SymbolBinding::Local,
        flags: 0,
    });
    assert!(result.is_err());
}

#[test]
fn string_table_offset_zero_is_empty() {
    let mut buffer = Vec::new();
    let mut object = sample_object();
    object.symbols[1].name = String::new();
    write(&mut buffer, &object).unwrap();

    let parsed = read(&mut &buffer[..]).unwrap();
    assert_eq!(parsed.symbols[1].name, "");

    // Check the on-disk name offset really is zero.
    let symbol_table_offset = Endian::read_u32(&buffer[16..20]) as usize;
    let second = symbol_table_offset + ENTRY_SIZE;
    assert_eq!(Endian::read_u32(&buffer[second..second + 4]), 0);
}

#[test]
fn reserved_header_bytes_are_zero() {
    let mut buffer = Vec::new();
    write(&mut buffer, &sample_object()).unwrap();
    assert!(buffer[40..64].iter().all(|&b| b == 0));
}

#[test]
fn unknown_relocation_type_is_rejected() {
    let mut buffer = Vec::new();
    write(&mut buffer, &sample_object()).unwrap();

    // Patch the relocation type field of the single relocation entry.
    let reloc_table_offset = Endian::read_u32(&buffer[32..36]) as usize;
    let type_field = reloc_table_offset + 12;
    (&mut buffer[type_field..type_field + 2])
        .write_u16::<Endian>(0x7FFF)
        .unwrap();
    assert!(read(&mut &buffer[..]).is_err());
}
