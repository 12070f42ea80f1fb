//! Define the `SourceLoc`, `AsmError`, and `AsmResult` types.

#![macro_use]

use std::fmt;
use std::rc::Rc;

/// The source position of a token, AST node or diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    /// Source file path, or an empty string for string inputs.
    pub file: Rc<str>,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column number.
    pub column: usize,
}

impl SourceLoc {
    pub fn new(file: Rc<str>, line: usize, column: usize) -> SourceLoc {
        SourceLoc { file, line, column }
    }
}

impl Default for SourceLoc {
    fn default() -> SourceLoc {
        SourceLoc {
            file: Rc::from(""),
            line: 1,
            column: 1,
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// An assembler error, with the source location where it occurred when one
/// is available.
#[derive(Debug, Clone, PartialEq)]
pub struct AsmError {
    /// Location of the error, if the failing phase had one.
    pub location: Option<SourceLoc>,
    /// Error message.
    pub message: String,
}

impl AsmError {
    pub fn without_location(message: String) -> AsmError {
        AsmError {
            location: None,
            message,
        }
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}", location, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for AsmError {}

/// Result of an assembler operation.
pub type AsmResult<T> = Result<T, AsmError>;

// Create an `Err` variant of `AsmResult<X>` from a location and `format!` args.
macro_rules! err {
    ( $loc:expr, $msg:expr ) => {
        Err($crate::AsmError {
            location: Some($loc.clone()),
            message: $msg.to_string(),
        })
    };

    ( $loc:expr, $fmt:expr, $( $arg:expr ),+ ) => {
        Err($crate::AsmError {
            location: Some($loc.clone()),
            message: format!( $fmt, $( $arg ),+ ),
        })
    };
}
