use crate::program::*;
use byteorder::ByteOrder;
use g10::Endian;

fn sample_program() -> Program {
    let mut program = Program::new();
    program.flags = program_flags::HAS_ENTRY | program_flags::HAS_STACK_INIT;
    program.entry_point = 0x2000;
    program.stack_pointer = 0xFFFF_FFFC;

    program.segments.push(Segment {
        load_address: 0x2000,
        memory_size: 5,
        kind: SegmentType::Code,
        flags: segment_flags::LOAD | segment_flags::EXEC,
        data: vec![0x10, 0x00, 0x42, 0x02, 0x00],
    });
    program.segments.push(Segment {
        load_address: 0x8000_1000,
        memory_size: 64,
        kind: SegmentType::Bss,
        flags: segment_flags::ZERO_FILL | segment_flags::WRITE,
        data: Vec::new(),
    });

    program
}

#[test]
fn write_read_round_trip() {
    let original = sample_program();
    let mut buffer = Vec::new();
    write(&mut buffer, &original).unwrap();

    let parsed = read(&mut &buffer[..]).unwrap();
    assert_eq!(original, parsed);
}

#[test]
fn write_read_round_trip_with_info() {
    let mut original = sample_program();
    original.flags |= program_flags::HAS_INFO;
    let checksum = original.compute_checksum();
    original.info = Some(ProgramInfo {
        name: "demo".to_owned(),
        version: "1.0".to_owned(),
        author: String::new(),
        description: "round trip fixture".to_owned(),
        build_date: 1_700_000_000,
        checksum,
    });

    let mut buffer = Vec::new();
    write(&mut buffer, &original).unwrap();

    let parsed = read(&mut &buffer[..]).unwrap();
    assert_eq!(original, parsed);
}

#[test]
fn magic_is_g10p_on_disk() {
    let mut buffer = Vec::new();
    write(&mut buffer, &sample_program()).unwrap();
    assert_eq!(&buffer[0..4], &[0x50, 0x30, 0x31, 0x47]);
}

#[test]
fn bss_segment_has_zero_file_size() {
    let mut buffer = Vec::new();
    write(&mut buffer, &sample_program()).unwrap();

    // Second segment header: file_size at offset +8.
    let second = HEADER_SIZE + SEGMENT_HEADER_SIZE;
    assert_eq!(Endian::read_u32(&buffer[second + 4..second + 8]), 64);
    assert_eq!(Endian::read_u32(&buffer[second + 8..second + 12]), 0);
}

#[test]
fn read_byte_maps_rom_and_open_bus() {
    let program = sample_program();

    assert_eq!(program.read_byte(0x2000), 0x10);
    assert_eq!(program.read_byte(0x2002), 0x42);

    // Past the segment's file data.
    assert_eq!(program.read_byte(0x2005), 0xFF);

    // Unmapped ROM hole.
    assert_eq!(program.read_byte(0x0000), 0xFF);

    // RAM always reads open-bus, even where a bss segment lives.
    assert_eq!(program.read_byte(0x8000_0000), 0xFF);
    assert_eq!(program.read_byte(0x8000_1000), 0xFF);
}

#[test]
fn checksum_covers_segment_data() {
    let program = sample_program();
    let checksum = program.compute_checksum();

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[0x10, 0x00, 0x42, 0x02, 0x00]);
    assert_eq!(checksum, hasher.finalize());
}

#[test]
fn bad_magic_is_rejected() {
    let mut buffer = Vec::new();
    write(&mut buffer, &sample_program()).unwrap();
    buffer[3] = 0x00;
    assert!(read(&mut &buffer[..]).is_err());
}

#[test]
fn default_program_uses_platform_defaults() {
    let program = Program::new();
    assert_eq!(program.entry_point, 0x2000);
    assert_eq!(program.stack_pointer, 0xFFFF_FFFC);
}

#[test]
fn reserved_header_bytes_are_zero() {
    let mut buffer = Vec::new();
    write(&mut buffer, &sample_program()).unwrap();
    assert!(buffer[32..64].iter().all(|&b| b == 0));
}
