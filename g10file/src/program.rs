//! The G10 executable program file format.

use crate::format_error;
use byteorder::{ReadBytesExt, WriteBytesExt};
use g10::Endian;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Magic number identifying a G10 program file ("G10P" read little-endian).
pub const PROGRAM_MAGIC: u32 = 0x4731_3050;

/// Current program format version, `0xMMmmPPPP`.
pub const PROGRAM_VERSION: u32 = 0x0100_0000;

/// Size of the program file header in bytes.
pub const HEADER_SIZE: usize = 0x40;

/// Size of a segment header in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Size of the program info header in bytes, excluding string data.
pub const INFO_HEADER_SIZE: usize = 0x30;

/// File-level flag bits.
pub mod program_flags {
    pub const HAS_ENTRY: u32 = 0x0000_0001;
    pub const HAS_STACK_INIT: u32 = 0x0000_0002;
    pub const HAS_INFO: u32 = 0x0000_0004;
    pub const DEBUG_BUILD: u32 = 0x0000_0008;
    pub const DOUBLE_SPEED: u32 = 0x0000_0010;
}

/// Segment attribute flag bits.
pub mod segment_flags {
    pub const LOAD: u16 = 0x0001;
    pub const ZERO_FILL: u16 = 0x0002;
    pub const EXEC: u16 = 0x0004;
    pub const WRITE: u16 = 0x0008;
}

/// Info-block flag bits.
pub mod info_flags {
    pub const HAS_NAME: u16 = 0x0001;
    pub const HAS_VERSION: u16 = 0x0002;
    pub const HAS_AUTHOR: u16 = 0x0004;
    pub const HAS_DESC: u16 = 0x0008;
    pub const HAS_CHECKSUM: u16 = 0x0010;
}

/// The type of a program segment.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum SegmentType {
    Null = 0,
    Code = 1,
    Data = 2,
    Bss = 3,
    Metadata = 4,
    Interrupt = 5,
}

/// A loadable region of the program.
///
/// `data` holds the segment's file bytes; bss segments carry none and are
/// zero-filled to `memory_size` by the loader.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub load_address: u32,
    pub memory_size: u32,
    pub kind: SegmentType,
    pub flags: u16,
    pub data: Vec<u8>,
}

/// Optional program metadata.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ProgramInfo {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub build_date: u32,
    pub checksum: u32,
}

/// An in-memory G10 program file.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub flags: u32,
    pub entry_point: u32,
    pub stack_pointer: u32,
    pub segments: Vec<Segment>,
    pub info: Option<ProgramInfo>,
}

impl Default for Program {
    fn default() -> Program {
        Program {
            flags: 0,
            entry_point: g10::CODE_START,
            stack_pointer: g10::DEFAULT_STACK_POINTER,
            segments: Vec::new(),
            info: None,
        }
    }
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    /// CRC-32 over the concatenated file data of all segments, in segment
    /// order. This is the value recorded in the info block.
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for segment in &self.segments {
            hasher.update(&segment.data);
        }
        hasher.finalize()
    }

    /// Reads one byte from the program's flat ROM mapping.
    ///
    /// Addresses inside a segment's file data return that byte. Everything
    /// else, including all of RAM and unmapped ROM holes, reads as the
    /// open-bus value `0xFF`.
    pub fn read_byte(&self, address: u32) -> u8 {
        if address > g10::ROM_END {
            return 0xFF;
        }
        for segment in &self.segments {
            if address >= segment.load_address {
                let offset = (address - segment.load_address) as usize;
                if offset < segment.data.len() {
                    return segment.data[offset];
                }
            }
        }
        0xFF
    }

    pub fn has_entry(&self) -> bool {
        self.flags & program_flags::HAS_ENTRY != 0
    }

    pub fn has_stack_init(&self) -> bool {
        self.flags & program_flags::HAS_STACK_INIT != 0
    }

    pub fn has_info(&self) -> bool {
        self.flags & program_flags::HAS_INFO != 0
    }
}

pub fn read<R: Read>(reader: &mut R) -> io::Result<Program> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;
    read_buffer(&buffer)
}

fn read_buffer(buffer: &[u8]) -> io::Result<Program> {
    if buffer.len() < HEADER_SIZE {
        return Err(format_error(format!(
            "program file is truncated ({} bytes)",
            buffer.len()
        )));
    }

    let mut header = &buffer[..HEADER_SIZE];
    let magic = header.read_u32::<Endian>()?;
    if magic != PROGRAM_MAGIC {
        return Err(format_error(format!("bad program magic 0x{:08X}", magic)));
    }
    let version = header.read_u32::<Endian>()?;
    if version != PROGRAM_VERSION {
        return Err(format_error(format!(
            "unsupported program version 0x{:08X}",
            version
        )));
    }
    let flags = header.read_u32::<Endian>()?;
    let entry_point = header.read_u32::<Endian>()?;
    let stack_pointer = header.read_u32::<Endian>()?;
    let segment_count = header.read_u32::<Endian>()? as usize;
    let info_offset = header.read_u32::<Endian>()? as usize;
    let info_size = header.read_u32::<Endian>()? as usize;

    let headers_end = HEADER_SIZE + segment_count * SEGMENT_HEADER_SIZE;
    if headers_end > buffer.len() {
        return Err(format_error("segment headers are out of range".to_owned()));
    }

    let mut segments = Vec::with_capacity(segment_count);
    let mut data_cursor = headers_end;
    for index in 0..segment_count {
        let mut entry = &buffer[HEADER_SIZE + index * SEGMENT_HEADER_SIZE..];
        let load_address = entry.read_u32::<Endian>()?;
        let memory_size = entry.read_u32::<Endian>()?;
        let file_size = entry.read_u32::<Endian>()? as usize;
        let type_raw = entry.read_u16::<Endian>()?;
        let seg_flags = entry.read_u16::<Endian>()?;

        let end = data_cursor
            .checked_add(file_size)
            .filter(|&end| end <= buffer.len())
            .ok_or_else(|| {
                format_error(format!("segment {} data is out of range", index))
            })?;
        let data = buffer[data_cursor..end].to_vec();
        data_cursor = end;

        segments.push(Segment {
            load_address,
            memory_size,
            kind: SegmentType::from_u16(type_raw).ok_or_else(|| {
                format_error(format!("unknown segment type {}", type_raw))
            })?,
            flags: seg_flags,
            data,
        });
    }

    let info = if flags & program_flags::HAS_INFO != 0 {
        Some(read_info(buffer, info_offset, info_size)?)
    } else {
        None
    };

    Ok(Program {
        flags,
        entry_point,
        stack_pointer,
        segments,
        info,
    })
}

fn read_info(buffer: &[u8], offset: usize, size: usize) -> io::Result<ProgramInfo> {
    let end = offset
        .checked_add(size)
        .filter(|&end| end <= buffer.len())
        .ok_or_else(|| format_error("info block is out of range".to_owned()))?;
    if size < INFO_HEADER_SIZE {
        return Err(format_error(format!("info block is truncated ({} bytes)", size)));
    }
    let block = &buffer[offset..end];

    let mut header = &block[..INFO_HEADER_SIZE];
    let _info_version = header.read_u16::<Endian>()?;
    let flags = header.read_u16::<Endian>()?;
    let mut read_string = |header: &mut &[u8], present: bool| -> io::Result<String> {
        let string_offset = header.read_u32::<Endian>()? as usize;
        let length = header.read_u32::<Endian>()? as usize;
        if !present {
            return Ok(String::new());
        }
        let string_end = string_offset
            .checked_add(length)
            .filter(|&end| end <= block.len())
            .ok_or_else(|| format_error("info string is out of range".to_owned()))?;
        String::from_utf8(block[string_offset..string_end].to_vec())
            .map_err(|_| format_error("info string is not UTF-8".to_owned()))
    };

    let name = read_string(&mut header, flags & info_flags::HAS_NAME != 0)?;
    let version = read_string(&mut header, flags & info_flags::HAS_VERSION != 0)?;
    let author = read_string(&mut header, flags & info_flags::HAS_AUTHOR != 0)?;
    let description = read_string(&mut header, flags & info_flags::HAS_DESC != 0)?;
    let build_date = header.read_u32::<Endian>()?;
    let checksum = header.read_u32::<Endian>()?;

    Ok(ProgramInfo {
        name,
        version,
        author,
        description,
        build_date,
        checksum,
    })
}

pub fn write<W: Write>(writer: &mut W, program: &Program) -> io::Result<()> {
    let headers_end = HEADER_SIZE + program.segments.len() * SEGMENT_HEADER_SIZE;
    let data_size: usize = program.segments.iter().map(|s| s.data.len()).sum();

    let (info_offset, info_size, info_block) = match &program.info {
        Some(info) => {
            let block = build_info_block(info);
            (headers_end + data_size, block.len(), block)
        }
        None => (0, 0, Vec::new()),
    };

    let mut flags = program.flags;
    if program.info.is_some() {
        flags |= program_flags::HAS_INFO;
    }

    writer.write_u32::<Endian>(PROGRAM_MAGIC)?;
    writer.write_u32::<Endian>(PROGRAM_VERSION)?;
    writer.write_u32::<Endian>(flags)?;
    writer.write_u32::<Endian>(program.entry_point)?;
    writer.write_u32::<Endian>(program.stack_pointer)?;
    writer.write_u32::<Endian>(program.segments.len() as u32)?;
    writer.write_u32::<Endian>(info_offset as u32)?;
    writer.write_u32::<Endian>(info_size as u32)?;
    writer.write_all(&[0u8; 32])?;

    for segment in &program.segments {
        writer.write_u32::<Endian>(segment.load_address)?;
        writer.write_u32::<Endian>(segment.memory_size)?;
        writer.write_u32::<Endian>(segment.data.len() as u32)?;
        writer.write_u16::<Endian>(segment.kind as u16)?;
        writer.write_u16::<Endian>(segment.flags)?;
    }

    for segment in &program.segments {
        writer.write_all(&segment.data)?;
    }

    writer.write_all(&info_block)?;

    Ok(())
}

fn build_info_block(info: &ProgramInfo) -> Vec<u8> {
    let mut flags = info_flags::HAS_CHECKSUM;
    let mut strings = Vec::new();
    let mut place = |s: &str, flag: u16, flags: &mut u16| -> (u32, u32) {
        if s.is_empty() {
            return (0, 0);
        }
        *flags |= flag;
        let offset = (INFO_HEADER_SIZE + strings.len()) as u32;
        strings.extend_from_slice(s.as_bytes());
        (offset, s.len() as u32)
    };

    let name = place(&info.name, info_flags::HAS_NAME, &mut flags);
    let version = place(&info.version, info_flags::HAS_VERSION, &mut flags);
    let author = place(&info.author, info_flags::HAS_AUTHOR, &mut flags);
    let desc = place(&info.description, info_flags::HAS_DESC, &mut flags);

    let mut block = Vec::with_capacity(INFO_HEADER_SIZE + strings.len());
    block.write_u16::<Endian>(1).unwrap();
    block.write_u16::<Endian>(flags).unwrap();
    for &(offset, length) in &[name, version, author, desc] {
        block.write_u32::<Endian>(offset).unwrap();
        block.write_u32::<Endian>(length).unwrap();
    }
    block.write_u32::<Endian>(info.build_date).unwrap();
    block.write_u32::<Endian>(info.checksum).unwrap();
    block.write_u32::<Endian>(0).unwrap();
    block.extend_from_slice(&strings);
    block
}

pub trait ReadProgramExt: Read + Sized {
    fn read_program(&mut self) -> io::Result<Program> {
        read(self)
    }
}

impl<R: Read + Sized> ReadProgramExt for R {}

pub trait WriteProgramExt: Write + Sized {
    fn write_program(&mut self, program: &Program) -> io::Result<()> {
        write(self, program)
    }
}

impl<W: Write + Sized> WriteProgramExt for W {}

pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<Program> {
    BufReader::new(File::open(path)?).read_program()
}

pub fn write_file<P: AsRef<Path>>(path: P, program: &Program) -> io::Result<()> {
    BufWriter::new(File::create(path)?).write_program(program)
}
