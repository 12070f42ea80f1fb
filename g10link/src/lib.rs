//! Linker for the G10 toolchain.
//!
//! The linker consumes validated relocatable objects (the
//! [`g10file::Object`](../g10file/object/index.html) format) and produces one
//! executable [`g10file::Program`](../g10file/program/index.html). Linking
//! runs in six phases, in order:
//!
//! 1. Build the global symbol table (duplicate globals are errors, every
//!    extern must resolve).
//! 2. Merge input sections that share a base address, recording where every
//!    byte came from.
//! 3. Assign final addresses to global symbols from their position inside
//!    the merged sections.
//! 4. Apply relocations, patching the merged bytes.
//! 5. Turn merged sections into program segments.
//! 6. Select the entry point.

use byteorder::ByteOrder;
use g10::Endian;
use g10file::object::{Object, RelocationType, SectionType, SymbolBinding, SymbolType};
use g10file::program::{program_flags, segment_flags, Program, Segment, SegmentType};
use g10file::object::section_flags;
use std::collections::HashMap;
use std::fmt;

#[cfg(test)]
mod test;

/// Symbol names recognized as program entry points, in priority order.
const ENTRY_NAMES: [&str; 3] = ["main", "_start", "start"];

/// A linker failure.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkError {
    pub message: String,
}

impl LinkError {
    fn new(message: String) -> LinkError {
        LinkError { message }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LinkError {}

pub type LinkResult<T> = Result<T, LinkError>;

macro_rules! link_err {
    ( $fmt:expr $(, $arg:expr )* ) => {
        Err(LinkError::new(format!($fmt $(, $arg )*)))
    };
}

/// A symbol in the global (cross-object) symbol table.
struct GlobalSymbol {
    address: u32,
    kind: SymbolType,
    object_index: usize,
    section_index: u32,
    value: u32,
}

/// Where a run of merged bytes came from.
struct MergedPart {
    object_index: usize,
    section_index: usize,
    /// Start offset of this part within the merged section.
    start: u32,
    len: u32,
}

/// Input sections sharing one base address, concatenated.
struct MergedSection {
    base: u32,
    kind: SectionType,
    flags: u16,
    size: u32,
    data: Vec<u8>,
    parts: Vec<MergedPart>,
}

impl MergedSection {
    /// The run of merged bytes a given input section became.
    fn part(&self, object_index: usize, section_index: usize) -> Option<&MergedPart> {
        self.parts
            .iter()
            .find(|p| p.object_index == object_index && p.section_index == section_index)
    }
}

/// The linker. Feed it objects, then call [`link`](#method.link).
#[derive(Default)]
pub struct Linker {
    objects: Vec<(String, Object)>,
}

impl Linker {
    pub fn new() -> Linker {
        Linker::default()
    }

    /// Adds an input object. `name` is used in diagnostics only.
    pub fn add_object(&mut self, name: &str, object: Object) {
        self.objects.push((name.to_owned(), object));
    }

    /// Runs all six phases and produces the program.
    pub fn link(&self) -> LinkResult<Program> {
        if self.objects.is_empty() {
            return link_err!("no object files to link");
        }

        let mut symbols = self.build_symbol_table()?;
        let mut merged = self.merge_sections()?;
        self.assign_addresses(&mut symbols, &merged)?;
        self.process_relocations(&symbols, &mut merged)?;
        let segments = self.create_segments(&merged)?;
        let entry_point = self.select_entry_point(&symbols, &merged, &segments)?;

        Ok(Program {
            flags: program_flags::HAS_ENTRY | program_flags::HAS_STACK_INIT,
            entry_point,
            stack_pointer: g10::DEFAULT_STACK_POINTER,
            segments,
            info: None,
        })
    }

    // Phase 1.

    fn build_symbol_table(&self) -> LinkResult<HashMap<String, GlobalSymbol>> {
        let mut table = HashMap::new();

        // First pass: every global-binding symbol, rejecting duplicates.
        for (object_index, (name, object)) in self.objects.iter().enumerate() {
            for symbol in &object.symbols {
                if symbol.binding != SymbolBinding::Global {
                    continue;
                }
                if table.contains_key(&symbol.name) {
                    return link_err!(
                        "duplicate symbol definition: '{}' in {}",
                        symbol.name,
                        name
                    );
                }
                table.insert(
                    symbol.name.clone(),
                    GlobalSymbol {
                        address: symbol.value,
                        kind: symbol.kind,
                        object_index,
                        section_index: symbol.section_index,
                        value: symbol.value,
                    },
                );
            }
        }

        // Second pass: every extern must have a definition somewhere.
        for (name, object) in &self.objects {
            for symbol in &object.symbols {
                if symbol.binding == SymbolBinding::Extern
                    && !table.contains_key(&symbol.name)
                {
                    return link_err!(
                        "undefined external symbol: '{}' referenced in {}",
                        symbol.name,
                        name
                    );
                }
            }
        }

        Ok(table)
    }

    // Phase 2.

    fn merge_sections(&self) -> LinkResult<Vec<MergedSection>> {
        let mut merged: Vec<MergedSection> = Vec::new();

        for (object_index, (name, object)) in self.objects.iter().enumerate() {
            for (section_index, section) in object.sections.iter().enumerate() {
                let entry = match merged
                    .iter_mut()
                    .find(|m| m.base == section.virtual_address)
                {
                    Some(entry) => entry,
                    None => {
                        merged.push(MergedSection {
                            base: section.virtual_address,
                            kind: section.kind,
                            flags: 0,
                            size: 0,
                            data: Vec::new(),
                            parts: Vec::new(),
                        });
                        merged.last_mut().unwrap()
                    }
                };

                let is_bss = section.kind == SectionType::Bss;
                if (entry.kind == SectionType::Bss) != is_bss {
                    return link_err!(
                        "section '{}' in {} mixes bss and initialized data at 0x{:08X}",
                        section.name,
                        name,
                        section.virtual_address
                    );
                }

                entry.flags |= section.flags;
                entry.parts.push(MergedPart {
                    object_index,
                    section_index,
                    start: entry.size,
                    len: section.size,
                });
                entry.size = entry.size.checked_add(section.size).ok_or_else(|| {
                    LinkError::new(format!(
                        "merged section at 0x{:08X} exceeds the address space",
                        section.virtual_address
                    ))
                })?;
                if !is_bss {
                    entry.data.extend_from_slice(&section.data);
                }
            }
        }

        merged.sort_by_key(|m| m.base);
        Ok(merged)
    }

    // Phase 3.

    fn assign_addresses(
        &self,
        symbols: &mut HashMap<String, GlobalSymbol>,
        merged: &[MergedSection],
    ) -> LinkResult<()> {
        let mut names: Vec<String> = symbols.keys().cloned().collect();
        names.sort();

        for name in names {
            let (object_index, section_index, value) = {
                let symbol = &symbols[&name];
                (symbol.object_index, symbol.section_index, symbol.value)
            };

            let object = &self.objects[object_index].1;
            let section = match object.sections.get(section_index as usize) {
                Some(section) => section,
                // Absolute and other sentinel-indexed symbols keep their
                // value as their address.
                None => continue,
            };

            let base = section.virtual_address;
            let entry = merged.iter().find(|m| m.base == base).ok_or_else(|| {
                LinkError::new(format!(
                    "cannot find merged section for symbol '{}'",
                    name
                ))
            })?;
            let start = entry
                .part(object_index, section_index as usize)
                .map(|part| part.start)
                .ok_or_else(|| {
                    LinkError::new(format!(
                        "cannot locate section of symbol '{}' in the merge",
                        name
                    ))
                })?;

            symbols.get_mut(&name).unwrap().address = base + start + value;
        }
        Ok(())
    }

    // Phase 4.

    fn resolve_symbol_address(
        &self,
        symbols: &HashMap<String, GlobalSymbol>,
        merged: &[MergedSection],
        object_index: usize,
        symbol_index: u32,
    ) -> LinkResult<u32> {
        let (object_name, object) = &self.objects[object_index];
        let symbol = object
            .symbols
            .get(symbol_index as usize)
            .ok_or_else(|| {
                LinkError::new(format!(
                    "relocation in {} references unknown symbol index {}",
                    object_name, symbol_index
                ))
            })?;

        // Prefer the global table; fall back to the object's own symbols.
        if let Some(global) = symbols.get(&symbol.name) {
            return Ok(global.address);
        }

        let section = object
            .sections
            .get(symbol.section_index as usize)
            .ok_or_else(|| {
                LinkError::new(format!(
                    "relocation references undefined symbol: '{}'",
                    symbol.name
                ))
            })?;

        let entry = merged
            .iter()
            .find(|m| m.base == section.virtual_address)
            .ok_or_else(|| {
                LinkError::new(format!(
                    "cannot find merged section for symbol '{}'",
                    symbol.name
                ))
            })?;
        let start = entry
            .part(object_index, symbol.section_index as usize)
            .map(|part| part.start)
            .ok_or_else(|| {
                LinkError::new(format!(
                    "cannot locate section of symbol '{}' in the merge",
                    symbol.name
                ))
            })?;
        Ok(entry.base + start + symbol.value)
    }

    fn process_relocations(
        &self,
        symbols: &HashMap<String, GlobalSymbol>,
        merged: &mut [MergedSection],
    ) -> LinkResult<()> {
        for (object_index, (object_name, object)) in self.objects.iter().enumerate() {
            for reloc in &object.relocations {
                let symbol_addr =
                    self.resolve_symbol_address(symbols, merged, object_index, reloc.symbol_index)?;

                let section = object
                    .sections
                    .get(reloc.section_index as usize)
                    .ok_or_else(|| {
                        LinkError::new(format!(
                            "invalid section index {} in relocation in {}",
                            reloc.section_index, object_name
                        ))
                    })?;

                let entry_index = merged
                    .iter()
                    .position(|m| m.base == section.virtual_address)
                    .ok_or_else(|| {
                        LinkError::new(
                            "cannot find merged section for relocation".to_owned(),
                        )
                    })?;
                let entry = &mut merged[entry_index];
                let (start, part_len) = entry
                    .part(object_index, reloc.section_index as usize)
                    .map(|part| (part.start, part.len))
                    .ok_or_else(|| {
                        LinkError::new(
                            "cannot locate relocated section in the merge".to_owned(),
                        )
                    })?;

                // The patched field must lie inside the bytes this input
                // section contributed.
                let position = reloc
                    .offset
                    .checked_add(reloc.kind.width())
                    .filter(|&end| end <= part_len)
                    .map(|_| (start + reloc.offset) as usize)
                    .filter(|&p| p + reloc.kind.width() as usize <= entry.data.len())
                    .ok_or_else(|| {
                        LinkError::new(format!(
                            "relocation offset {} is out of bounds in {}",
                            reloc.offset, object_name
                        ))
                    })?;

                let reloc_site = entry.base + start + reloc.offset;
                apply_relocation(
                    reloc.kind,
                    &mut entry.data[position..],
                    reloc_site,
                    symbol_addr,
                    reloc.addend,
                )?;
            }
        }
        Ok(())
    }

    // Phase 5.

    fn create_segments(&self, merged: &[MergedSection]) -> LinkResult<Vec<Segment>> {
        let mut segments = Vec::with_capacity(merged.len());
        for entry in merged {
            let (kind, flags, data) = if entry.kind == SectionType::Bss {
                (
                    SegmentType::Bss,
                    segment_flags::ZERO_FILL | section_to_segment_flags(entry.flags),
                    Vec::new(),
                )
            } else {
                let kind = if entry.base < g10::IVT_START {
                    SegmentType::Metadata
                } else if entry.base < g10::CODE_START {
                    SegmentType::Interrupt
                } else if entry.flags & section_flags::EXEC != 0 {
                    SegmentType::Code
                } else {
                    SegmentType::Data
                };
                (
                    kind,
                    segment_flags::LOAD | section_to_segment_flags(entry.flags),
                    entry.data.clone(),
                )
            };
            segments.push(Segment {
                load_address: entry.base,
                memory_size: entry.size,
                kind,
                flags,
                data,
            });
        }
        Ok(segments)
    }

    // Phase 6.

    fn select_entry_point(
        &self,
        symbols: &HashMap<String, GlobalSymbol>,
        merged: &[MergedSection],
        segments: &[Segment],
    ) -> LinkResult<u32> {
        // Global symbols first.
        for name in &ENTRY_NAMES {
            if let Some(symbol) = symbols.get(*name) {
                return Ok(symbol.address);
            }
        }

        // Then label symbols of any binding, in any object.
        for (object_index, (_, object)) in self.objects.iter().enumerate() {
            for (symbol_index, symbol) in object.symbols.iter().enumerate() {
                if symbol.kind != SymbolType::Label {
                    continue;
                }
                if !ENTRY_NAMES.contains(&symbol.name.as_str()) {
                    continue;
                }
                return self.resolve_symbol_address(
                    symbols,
                    merged,
                    object_index,
                    symbol_index as u32,
                );
            }
        }

        // Finally the lowest-addressed read-only segment in ROM.
        for segment in segments {
            if segment.flags & segment_flags::WRITE == 0
                && segment.load_address < g10::RAM_START
            {
                return Ok(segment.load_address);
            }
        }

        link_err!("no entry point found")
    }
}

fn section_to_segment_flags(flags: u16) -> u16 {
    let mut result = 0;
    if flags & section_flags::EXEC != 0 {
        result |= segment_flags::EXEC;
    }
    if flags & section_flags::WRITE != 0 {
        result |= segment_flags::WRITE;
    }
    result
}

/// Patches one relocation into `data` (which starts at the relocated
/// field). All multi-byte writes are little-endian.
fn apply_relocation(
    kind: RelocationType,
    data: &mut [u8],
    reloc_site: u32,
    symbol_addr: u32,
    addend: i32,
) -> LinkResult<()> {
    let absolute = symbol_addr.wrapping_add(addend as u32);
    let relative = symbol_addr
        .wrapping_sub(reloc_site)
        .wrapping_add(addend as u32);

    match kind {
        RelocationType::Abs32 => Endian::write_u32(data, absolute),
        RelocationType::Abs16 => Endian::write_u16(data, absolute as u16),
        RelocationType::Abs8 => data[0] = absolute as u8,
        RelocationType::Rel32 => Endian::write_u32(data, relative),
        RelocationType::Rel16 => Endian::write_u16(data, relative as u16),
        RelocationType::Rel8 => data[0] = relative as u8,
        RelocationType::Hi16 => Endian::write_u16(data, (absolute >> 16) as u16),
        RelocationType::Lo16 => Endian::write_u16(data, absolute as u16),
        RelocationType::Quick16 => {
            Endian::write_u16(data, absolute.wrapping_sub(g10::QUICK_BASE) as u16)
        }
        RelocationType::Port8 => {
            data[0] = absolute.wrapping_sub(g10::PORT_BASE) as u8;
        }
        RelocationType::None => {
            return link_err!("unknown relocation type: {:?}", kind);
        }
    }
    Ok(())
}
