#[macro_use]
extern crate clap;

use clap::Arg;
use g10asm::{assemble, AssembleOutput, AssemblerConfig, StopAfter};
use std::path::PathBuf;
use std::process;

#[derive(Debug)]
enum Error {
    Asm(g10asm::AsmError),
    Io(std::io::Error, PathBuf),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Asm(err) => write!(f, "{}", err),
            Error::Io(err, path) => {
                write!(f, "writing output file \"{}\" failed: {}", path.display(), err)
            }
        }
    }
}

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the source file to assemble")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUTPUT")
                .help("Sets the object file to write to"),
        )
        .arg(
            Arg::with_name("include")
                .short("i")
                .long("include")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .value_name("DIR")
                .help("Adds a directory to the include search path"),
        )
        .arg(
            Arg::with_name("lex")
                .long("lex")
                .help("Stop after lexical analysis and dump the tokens"),
        )
        .arg(
            Arg::with_name("preprocess")
                .long("preprocess")
                .help("Stop after preprocessing and dump the expanded source"),
        )
        .arg(
            Arg::with_name("parse")
                .long("parse")
                .help("Stop after parsing and dump the syntax tree"),
        )
        .arg(
            Arg::with_name("max_recursion_depth")
                .long("max-recursion-depth")
                .takes_value(true)
                .value_name("N")
                .help("Sets the maximum macro recursion depth"),
        )
        .arg(
            Arg::with_name("max_include_depth")
                .long("max-include-depth")
                .takes_value(true)
                .value_name("N")
                .help("Sets the maximum include depth"),
        )
        .get_matches();

    let stop_after = if matches.is_present("lex") {
        StopAfter::Lex
    } else if matches.is_present("preprocess") {
        StopAfter::Preprocess
    } else if matches.is_present("parse") {
        StopAfter::Parse
    } else {
        StopAfter::Full
    };

    let source_path = PathBuf::from(matches.value_of("INPUT").unwrap());
    let output_path = match matches.value_of("output") {
        Some(path) => Some(PathBuf::from(path)),
        None if stop_after == StopAfter::Full => {
            Some(source_path.with_extension("g10o"))
        }
        None => None,
    };

    let parse_depth = |name: &str, default: usize| -> usize {
        match matches.value_of(name) {
            Some(value) => value.parse().unwrap_or_else(|_| {
                eprintln!("invalid value for --{}: '{}'", name.replace('_', "-"), value);
                process::exit(2);
            }),
            None => default,
        }
    };

    let config = AssemblerConfig {
        source_path,
        output_path,
        include_dirs: matches
            .values_of("include")
            .map(|values| values.map(PathBuf::from).collect())
            .unwrap_or_default(),
        stop_after,
        max_recursion_depth: parse_depth(
            "max_recursion_depth",
            g10asm::preprocessor::DEFAULT_MAX_RECURSION_DEPTH,
        ),
        max_include_depth: parse_depth(
            "max_include_depth",
            g10asm::preprocessor::DEFAULT_MAX_INCLUDE_DEPTH,
        ),
    };

    if let Err(err) = run(&config) {
        eprintln!("{}", err);
        process::exit(1);
    }
}

fn run(config: &AssemblerConfig) -> Result<(), Error> {
    match assemble(config).map_err(Error::Asm)? {
        AssembleOutput::Tokens(tokens) => {
            for token in &tokens {
                println!("{}: {:?} '{}'", token.location, token.kind, token.lexeme);
            }
        }
        AssembleOutput::Preprocessed(text) => {
            print!("{}", text);
        }
        AssembleOutput::Ast(module) => {
            for statement in &module.statements {
                println!("{:#?}", statement);
            }
        }
        AssembleOutput::Object(object) => {
            let output = config
                .output_path
                .clone()
                .unwrap_or_else(|| config.source_path.with_extension("g10o"));
            g10file::object::write_file(&output, &object)
                .map_err(|err| Error::Io(err, output))?;
        }
    }
    Ok(())
}
