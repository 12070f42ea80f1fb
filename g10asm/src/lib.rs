//! Assembler for the G10 32-bit CPU.
//!
//! The assembler turns G10 assembly source into a relocatable object file
//! (the [`g10file::Object`](../g10file/object/index.html) format consumed by
//! the linker). The pipeline runs in fixed stages:
//!
//! 1. The [`lexer`](lexer/index.html) tokenizes the source file, memoizing
//!    per-file token vectors in a path-keyed cache.
//! 2. The [`preprocessor`](preprocessor/index.html) interprets directives
//!    (macros, conditionals, loops, includes, `{expr}` interpolation) and
//!    serializes the surviving tokens back to text.
//! 3. That text is re-lexed and handed to the [`parser`](parser/index.html),
//!    which builds a typed AST with statement-level error recovery.
//! 4. The [`codegen`](codegen/index.html) pass resolves addresses over the
//!    fixed G10 memory map, encodes instructions and emits the object file
//!    with its symbol and relocation tables.
//!
//! The [`assemble`] function drives all four stages from an
//! [`AssemblerConfig`]; [`assemble_source`] is the string-in/object-out
//! convenience used heavily by the test suites.

#[macro_use]
mod error;

pub mod ast;
pub mod codegen;
pub mod keyword;
pub mod lexer;
pub mod parser;
pub mod preprocessor;
pub mod token;

#[cfg(test)]
mod test;

pub use error::{AsmError, AsmResult, SourceLoc};

use crate::ast::Module;
use crate::lexer::{Lexer, TokenCache};
use crate::preprocessor::{Preprocessor, PreprocessorConfig};
use crate::token::Token;
use g10file::Object;
use std::path::PathBuf;

/// How far the pipeline should run.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StopAfter {
    /// Tokenize the input and stop.
    Lex,
    /// Preprocess and stop, yielding the expanded source text.
    Preprocess,
    /// Parse and stop, yielding the AST.
    Parse,
    /// Run the whole pipeline, yielding an object file.
    Full,
}

/// Configuration for one assembler invocation.
#[derive(Clone, Debug)]
pub struct AssemblerConfig {
    pub source_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    pub stop_after: StopAfter,
    pub max_recursion_depth: usize,
    pub max_include_depth: usize,
}

/// What the pipeline produced, depending on [`StopAfter`].
pub enum AssembleOutput {
    Tokens(Vec<Token>),
    Preprocessed(String),
    Ast(Module),
    Object(Object),
}

/// Runs the assembler pipeline over a source file.
pub fn assemble(config: &AssemblerConfig) -> AsmResult<AssembleOutput> {
    let mut cache = TokenCache::new();

    let mut lexer = Lexer::new();
    lexer.load_from_file(&config.source_path, &mut cache)?;
    if config.stop_after == StopAfter::Lex {
        return Ok(AssembleOutput::Tokens(lexer.tokens().to_vec()));
    }

    let pp_config = PreprocessorConfig {
        max_recursion_depth: config.max_recursion_depth,
        max_include_depth: config.max_include_depth,
        include_dirs: config.include_dirs.clone(),
    };
    let mut preprocessor =
        Preprocessor::new(pp_config, lexer, Some(config.source_path.as_path()), &mut cache);
    preprocessor.run()?;
    let expanded = preprocessor.output().to_owned();
    if config.stop_after == StopAfter::Preprocess {
        return Ok(AssembleOutput::Preprocessed(expanded));
    }

    let mut lexer = Lexer::new();
    lexer.load_from_named_string(&expanded, &config.source_path.to_string_lossy())?;

    let module = parser::parse(&mut lexer)?;
    if config.stop_after == StopAfter::Parse {
        return Ok(AssembleOutput::Ast(module));
    }

    let object = codegen::generate(&module)?;
    Ok(AssembleOutput::Object(object))
}

/// Assembles source text straight to an object file, with default
/// preprocessor settings. Includes resolve against the working directory.
pub fn assemble_source(source: &str) -> AsmResult<Object> {
    let mut cache = TokenCache::new();

    let mut lexer = Lexer::new();
    lexer.load_from_string(source)?;

    let mut preprocessor =
        Preprocessor::new(PreprocessorConfig::default(), lexer, None, &mut cache);
    preprocessor.run()?;
    let expanded = preprocessor.output().to_owned();

    let mut lexer = Lexer::new();
    lexer.load_from_string(&expanded)?;

    let module = parser::parse(&mut lexer)?;
    codegen::generate(&module)
}

/// Preprocesses source text and returns the expanded text, with default
/// settings. Used by tests and by `--preprocess`.
pub fn preprocess_source(source: &str) -> AsmResult<String> {
    let mut cache = TokenCache::new();

    let mut lexer = Lexer::new();
    lexer.load_from_string(source)?;

    let mut preprocessor =
        Preprocessor::new(PreprocessorConfig::default(), lexer, None, &mut cache);
    preprocessor.run()?;
    Ok(preprocessor.output().to_owned())
}
