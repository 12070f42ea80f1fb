//! The G10 relocatable object file format.

use crate::{format_error, StringTable};
use byteorder::{ReadBytesExt, WriteBytesExt};
use g10::Endian;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Magic number identifying a G10 object file ("G10O" read little-endian).
pub const OBJECT_MAGIC: u32 = 0x4731_304F;

/// Current object format version, `0xMMmmPPPP`.
pub const OBJECT_VERSION: u32 = 0x0100_0000;

/// Size of the object file header in bytes.
pub const HEADER_SIZE: usize = 0x40;

/// Size of a section header, symbol entry and relocation entry in bytes.
pub const ENTRY_SIZE: usize = 16;

/// Special section index: the symbol is undefined (e.g. extern).
pub const SECTION_INDEX_UNDEF: u32 = 0xFFFF_FFFF;

/// Special section index: the symbol's value is absolute.
pub const SECTION_INDEX_ABS: u32 = 0xFFFF_FFFE;

/// Special section index: the symbol is a common block.
pub const SECTION_INDEX_COMMON: u32 = 0xFFFF_FFFD;

/// File-level flag bits.
pub mod object_flags {
    pub const HAS_ENTRY: u32 = 0x0000_0001;
    pub const DEBUG_INFO: u32 = 0x0000_0002;
    pub const RELOCATABLE: u32 = 0x0000_0004;
}

/// Section attribute flag bits.
pub mod section_flags {
    pub const ALLOC: u16 = 0x0001;
    pub const LOAD: u16 = 0x0002;
    pub const EXEC: u16 = 0x0004;
    pub const WRITE: u16 = 0x0008;
    pub const MERGE: u16 = 0x0010;
    pub const STRINGS: u16 = 0x0020;
}

/// Symbol flag bits.
pub mod symbol_flags {
    pub const ENTRY: u16 = 0x0001;
    pub const ABSOLUTE: u16 = 0x0002;
    pub const COMMON: u16 = 0x0004;
}

/// The type of a section.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum SectionType {
    Null = 0,
    Code = 1,
    Data = 2,
    Bss = 3,
}

/// The type of a symbol.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum SymbolType {
    None = 0,
    Label = 1,
    Data = 2,
    Section = 3,
    File = 4,
}

/// The binding (visibility class) of a symbol.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum SymbolBinding {
    Local = 0,
    Global = 1,
    Extern = 2,
    Weak = 3,
}

/// The type of a relocation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, FromPrimitive, ToPrimitive)]
pub enum RelocationType {
    None = 0,
    Abs32 = 1,
    Abs16 = 2,
    Abs8 = 3,
    Rel32 = 4,
    Rel16 = 5,
    Rel8 = 6,
    Quick16 = 7,
    Port8 = 8,
    Hi16 = 9,
    Lo16 = 10,
}

impl RelocationType {
    /// Number of bytes this relocation type patches.
    pub fn width(self) -> u32 {
        match self {
            RelocationType::None => 0,
            RelocationType::Abs32 | RelocationType::Rel32 => 4,
            RelocationType::Abs16
            | RelocationType::Rel16
            | RelocationType::Quick16
            | RelocationType::Hi16
            | RelocationType::Lo16 => 2,
            RelocationType::Abs8 | RelocationType::Rel8 | RelocationType::Port8 => 1,
        }
    }
}

/// A section of the object file.
///
/// `size` is the section's occupied size in target memory. For bss sections
/// `data` is empty and `size` is the reservation; for all other sections the
/// producer keeps `size == data.len()`.
#[derive(Clone, Debug, PartialEq)]
pub struct Section {
    pub name: String,
    pub virtual_address: u32,
    pub size: u32,
    pub kind: SectionType,
    pub flags: u16,
    pub data: Vec<u8>,
}

/// A symbol table entry.
///
/// For defined symbols `value` is the offset within the section named by
/// `section_index`; for absolute symbols it is the value itself.
#[derive(Clone, Debug, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub value: u32,
    pub section_index: u32,
    pub kind: SymbolType,
    pub binding: SymbolBinding,
    pub flags: u16,
}

/// A relocation table entry.
///
/// The on-disk addend field is 16 bits wide; readers sign-extend it and
/// writers reject addends outside the `i16` range.
#[derive(Clone, Debug, PartialEq)]
pub struct Relocation {
    pub offset: u32,
    pub symbol_index: u32,
    pub section_index: u32,
    pub kind: RelocationType,
    pub addend: i32,
}

/// An in-memory G10 object file.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Object {
    pub flags: u32,
    pub sections: Vec<Section>,
    pub symbols: Vec<Symbol>,
    pub relocations: Vec<Relocation>,
}

impl Object {
    pub fn new() -> Object {
        Object::default()
    }

    /// Adds a section, returning its index.
    pub fn add_section(&mut self, section: Section) -> usize {
        self.sections.push(section);
        self.sections.len() - 1
    }

    /// Adds a symbol, returning its index. Duplicate names are rejected.
    pub fn add_symbol(&mut self, symbol: Symbol) -> io::Result<usize> {
        if self.find_symbol(&symbol.name).is_some() {
            return Err(format_error(format!(
                "duplicate symbol '{}'",
                symbol.name
            )));
        }
        self.symbols.push(symbol);
        Ok(self.symbols.len() - 1)
    }

    /// Adds a relocation, returning its index.
    pub fn add_relocation(&mut self, reloc: Relocation) -> io::Result<usize> {
        if reloc.symbol_index as usize >= self.symbols.len() {
            return Err(format_error(format!(
                "relocation references unknown symbol index {}",
                reloc.symbol_index
            )));
        }
        if reloc.addend < i32::from(i16::min_value())
            || reloc.addend > i32::from(i16::max_value())
        {
            return Err(format_error(format!(
                "relocation addend {} does not fit in 16 bits",
                reloc.addend
            )));
        }
        self.relocations.push(reloc);
        Ok(self.relocations.len() - 1)
    }

    /// Finds a symbol by name.
    pub fn find_symbol(&self, name: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s.name == name)
    }

    /// Finds a section by name.
    pub fn find_section(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }

    /// Checks the structural invariants of the object.
    pub fn validate(&self) -> io::Result<()> {
        for section in &self.sections {
            if section.kind == SectionType::Bss {
                if !section.data.is_empty() {
                    return Err(format_error(format!(
                        "bss section '{}' carries data bytes",
                        section.name
                    )));
                }
            } else if section.size as usize != section.data.len() {
                return Err(format_error(format!(
                    "section '{}' size {} does not match its {} data bytes",
                    section.name,
                    section.size,
                    section.data.len()
                )));
            }
        }
        for symbol in &self.symbols {
            match symbol.section_index {
                SECTION_INDEX_UNDEF | SECTION_INDEX_ABS | SECTION_INDEX_COMMON => {}
                index if (index as usize) < self.sections.len() => {}
                index => {
                    return Err(format_error(format!(
                        "symbol '{}' references unknown section index {}",
                        symbol.name, index
                    )));
                }
            }
        }
        for reloc in &self.relocations {
            let section = self
                .sections
                .get(reloc.section_index as usize)
                .ok_or_else(|| {
                    format_error(format!(
                        "relocation references unknown section index {}",
                        reloc.section_index
                    ))
                })?;
            if reloc.symbol_index as usize >= self.symbols.len() {
                return Err(format_error(format!(
                    "relocation references unknown symbol index {}",
                    reloc.symbol_index
                )));
            }
            let end = u64::from(reloc.offset) + u64::from(reloc.kind.width());
            if end > u64::from(section.size) {
                return Err(format_error(format!(
                    "relocation at offset {} overruns section '{}'",
                    reloc.offset, section.name
                )));
            }
        }
        Ok(())
    }
}

pub fn read<R: Read>(reader: &mut R) -> io::Result<Object> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;
    read_buffer(&buffer)
}

fn read_buffer(buffer: &[u8]) -> io::Result<Object> {
    if buffer.len() < HEADER_SIZE {
        return Err(format_error(format!(
            "object file is truncated ({} bytes)",
            buffer.len()
        )));
    }

    let mut header = &buffer[..HEADER_SIZE];
    let magic = header.read_u32::<Endian>()?;
    if magic != OBJECT_MAGIC {
        return Err(format_error(format!(
            "bad object magic 0x{:08X}",
            magic
        )));
    }
    let version = header.read_u32::<Endian>()?;
    if version != OBJECT_VERSION {
        return Err(format_error(format!(
            "unsupported object version 0x{:08X}",
            version
        )));
    }
    let flags = header.read_u32::<Endian>()?;
    let section_count = header.read_u32::<Endian>()? as usize;
    let symbol_table_offset = header.read_u32::<Endian>()? as usize;
    let symbol_count = header.read_u32::<Endian>()? as usize;
    let string_table_offset = header.read_u32::<Endian>()? as usize;
    let string_table_size = header.read_u32::<Endian>()? as usize;
    let reloc_table_offset = header.read_u32::<Endian>()? as usize;
    let reloc_count = header.read_u32::<Endian>()? as usize;

    let string_end = string_table_offset
        .checked_add(string_table_size)
        .filter(|&end| end <= buffer.len())
        .ok_or_else(|| format_error("string table is out of range".to_owned()))?;
    let strings = &buffer[string_table_offset..string_end];

    // Section headers directly follow the file header; the data blobs of
    // non-bss sections follow the headers, concatenated in section order.
    let headers_end = HEADER_SIZE + section_count * ENTRY_SIZE;
    if headers_end > buffer.len() {
        return Err(format_error("section headers are out of range".to_owned()));
    }

    let mut sections = Vec::with_capacity(section_count);
    let mut data_cursor = headers_end;
    for index in 0..section_count {
        let mut entry = &buffer[HEADER_SIZE + index * ENTRY_SIZE..];
        let name_offset = entry.read_u32::<Endian>()?;
        let virtual_address = entry.read_u32::<Endian>()?;
        let size = entry.read_u32::<Endian>()?;
        let type_raw = entry.read_u16::<Endian>()?;
        let flags = entry.read_u16::<Endian>()?;

        let kind = SectionType::from_u16(type_raw).ok_or_else(|| {
            format_error(format!("unknown section type {}", type_raw))
        })?;

        let data = if kind == SectionType::Bss {
            Vec::new()
        } else {
            let end = data_cursor
                .checked_add(size as usize)
                .filter(|&end| end <= buffer.len())
                .ok_or_else(|| {
                    format_error(format!("section {} data is out of range", index))
                })?;
            let data = buffer[data_cursor..end].to_vec();
            data_cursor = end;
            data
        };

        sections.push(Section {
            name: StringTable::get(strings, name_offset)?,
            virtual_address,
            size,
            kind,
            flags,
            data,
        });
    }

    let mut symbols = Vec::with_capacity(symbol_count);
    for index in 0..symbol_count {
        let start = symbol_table_offset + index * ENTRY_SIZE;
        if start + ENTRY_SIZE > buffer.len() {
            return Err(format_error("symbol table is out of range".to_owned()));
        }
        let mut entry = &buffer[start..];
        let name_offset = entry.read_u32::<Endian>()?;
        let value = entry.read_u32::<Endian>()?;
        let section_index = entry.read_u32::<Endian>()?;
        let type_raw = entry.read_u8()?;
        let binding_raw = entry.read_u8()?;
        let flags = entry.read_u16::<Endian>()?;

        symbols.push(Symbol {
            name: StringTable::get(strings, name_offset)?,
            value,
            section_index,
            kind: SymbolType::from_u8(type_raw).ok_or_else(|| {
                format_error(format!("unknown symbol type {}", type_raw))
            })?,
            binding: SymbolBinding::from_u8(binding_raw).ok_or_else(|| {
                format_error(format!("unknown symbol binding {}", binding_raw))
            })?,
            flags,
        });
    }

    let mut relocations = Vec::with_capacity(reloc_count);
    for index in 0..reloc_count {
        let start = reloc_table_offset + index * ENTRY_SIZE;
        if start + ENTRY_SIZE > buffer.len() {
            return Err(format_error("relocation table is out of range".to_owned()));
        }
        let mut entry = &buffer[start..];
        let offset = entry.read_u32::<Endian>()?;
        let symbol_index = entry.read_u32::<Endian>()?;
        let section_index = entry.read_u32::<Endian>()?;
        let type_raw = entry.read_u16::<Endian>()?;
        let addend = i32::from(entry.read_i16::<Endian>()?);

        relocations.push(Relocation {
            offset,
            symbol_index,
            section_index,
            kind: RelocationType::from_u16(type_raw).ok_or_else(|| {
                format_error(format!("unknown relocation type {}", type_raw))
            })?,
            addend,
        });
    }

    let object = Object {
        flags,
        sections,
        symbols,
        relocations,
    };
    object.validate()?;
    Ok(object)
}

pub fn write<W: Write>(writer: &mut W, object: &Object) -> io::Result<()> {
    object.validate()?;

    let mut strings = StringTable::new();
    let section_names: Vec<u32> = object
        .sections
        .iter()
        .map(|s| strings.intern(&s.name))
        .collect();
    let symbol_names: Vec<u32> = object
        .symbols
        .iter()
        .map(|s| strings.intern(&s.name))
        .collect();

    let headers_end = HEADER_SIZE + object.sections.len() * ENTRY_SIZE;
    let data_size: usize = object
        .sections
        .iter()
        .filter(|s| s.kind != SectionType::Bss)
        .map(|s| s.data.len())
        .sum();
    let symbol_table_offset = headers_end + data_size;
    let string_table_offset = symbol_table_offset + object.symbols.len() * ENTRY_SIZE;
    let reloc_table_offset = string_table_offset + strings.data.len();

    writer.write_u32::<Endian>(OBJECT_MAGIC)?;
    writer.write_u32::<Endian>(OBJECT_VERSION)?;
    writer.write_u32::<Endian>(object.flags)?;
    writer.write_u32::<Endian>(object.sections.len() as u32)?;
    writer.write_u32::<Endian>(symbol_table_offset as u32)?;
    writer.write_u32::<Endian>(object.symbols.len() as u32)?;
    writer.write_u32::<Endian>(string_table_offset as u32)?;
    writer.write_u32::<Endian>(strings.data.len() as u32)?;
    writer.write_u32::<Endian>(reloc_table_offset as u32)?;
    writer.write_u32::<Endian>(object.relocations.len() as u32)?;
    writer.write_all(&[0u8; 24])?;

    for (section, &name_offset) in object.sections.iter().zip(&section_names) {
        writer.write_u32::<Endian>(name_offset)?;
        writer.write_u32::<Endian>(section.virtual_address)?;
        writer.write_u32::<Endian>(section.size)?;
        writer.write_u16::<Endian>(section.kind as u16)?;
        writer.write_u16::<Endian>(section.flags)?;
    }

    for section in &object.sections {
        if section.kind != SectionType::Bss {
            writer.write_all(&section.data)?;
        }
    }

    for (symbol, &name_offset) in object.symbols.iter().zip(&symbol_names) {
        writer.write_u32::<Endian>(name_offset)?;
        writer.write_u32::<Endian>(symbol.value)?;
        writer.write_u32::<Endian>(symbol.section_index)?;
        writer.write_u8(symbol.kind as u8)?;
        writer.write_u8(symbol.binding as u8)?;
        writer.write_u16::<Endian>(symbol.flags)?;
    }

    writer.write_all(&strings.data)?;

    for reloc in &object.relocations {
        if reloc.addend < i32::from(i16::min_value())
            || reloc.addend > i32::from(i16::max_value())
        {
            return Err(format_error(format!(
                "relocation addend {} does not fit in 16 bits",
                reloc.addend
            )));
        }
        writer.write_u32::<Endian>(reloc.offset)?;
        writer.write_u32::<Endian>(reloc.symbol_index)?;
        writer.write_u32::<Endian>(reloc.section_index)?;
        writer.write_u16::<Endian>(reloc.kind as u16)?;
        writer.write_i16::<Endian>(reloc.addend as i16)?;
    }

    Ok(())
}

pub trait ReadObjectExt: Read + Sized {
    fn read_object(&mut self) -> io::Result<Object> {
        read(self)
    }
}

impl<R: Read + Sized> ReadObjectExt for R {}

pub trait WriteObjectExt: Write + Sized {
    fn write_object(&mut self, object: &Object) -> io::Result<()> {
        write(self, object)
    }
}

impl<W: Write + Sized> WriteObjectExt for W {}

pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<Object> {
    BufReader::new(File::open(path)?).read_object()
}

pub fn write_file<P: AsRef<Path>>(path: P, object: &Object) -> io::Result<()> {
    BufWriter::new(File::create(path)?).write_object(object)
}
