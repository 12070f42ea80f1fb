//! Binary file formats for the G10 toolchain.
//!
//! Two formats are defined here:
//!
//! - The relocatable **object** format (`"G10O"`), produced by the assembler
//!   and consumed by the linker. It carries sections, a symbol table, a
//!   relocation table and a string table. See [`object`](object/index.html).
//!
//! - The **program** format (`"G10P"`), produced by the linker and consumed
//!   by a virtual machine. It carries loadable segments, an entry point, an
//!   initial stack pointer and an optional info block. See
//!   [`program`](program/index.html).
//!
//! All multi-byte fields are little-endian. Reading and writing follow the
//! same shape as the rest of the toolchain's I/O: free `read`/`write`
//! functions generic over `std::io` traits, plus `read_file`/`write_file`
//! conveniences and extension traits.

pub mod object;
pub mod program;

#[cfg(test)]
mod test;

pub use object::Object;
pub use program::Program;

use std::io;

/// Builds an `InvalidData` I/O error from a format-violation message.
fn format_error(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// A deduplicating NUL-terminated string table under construction.
///
/// Offset 0 always refers to an empty string.
struct StringTable {
    data: Vec<u8>,
    offsets: std::collections::HashMap<String, u32>,
}

impl StringTable {
    fn new() -> StringTable {
        let mut table = StringTable {
            data: vec![0u8],
            offsets: std::collections::HashMap::new(),
        };
        table.offsets.insert(String::new(), 0);
        table
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&offset) = self.offsets.get(s) {
            return offset;
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        self.offsets.insert(s.to_owned(), offset);
        offset
    }

    /// Reads the NUL-terminated string at `offset` out of a finished table.
    fn get(data: &[u8], offset: u32) -> io::Result<String> {
        let start = offset as usize;
        if start > data.len() {
            return Err(format_error(format!(
                "string table offset {} is out of range",
                offset
            )));
        }
        let end = data[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .ok_or_else(|| {
                format_error(format!(
                    "string at offset {} is not NUL-terminated",
                    offset
                ))
            })?;
        String::from_utf8(data[start..end].to_vec())
            .map_err(|_| format_error(format!("string at offset {} is not UTF-8", offset)))
    }
}
