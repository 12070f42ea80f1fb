#[macro_use]
extern crate clap;

use clap::Arg;
use g10link::Linker;
use std::path::PathBuf;
use std::process;

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("OBJECTS")
                .help("The object files to link")
                .required(true)
                .multiple(true),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUTPUT")
                .required(true)
                .help("Sets the program file to write to"),
        )
        .get_matches();

    let object_paths: Vec<PathBuf> = matches
        .values_of("OBJECTS")
        .unwrap()
        .map(PathBuf::from)
        .collect();
    let output_path = PathBuf::from(matches.value_of("output").unwrap());

    if let Err(message) = run(&object_paths, &output_path) {
        eprintln!("{}", message);
        process::exit(1);
    }
}

fn run(object_paths: &[PathBuf], output_path: &PathBuf) -> Result<(), String> {
    let mut linker = Linker::new();
    for path in object_paths {
        let object = g10file::object::read_file(path)
            .map_err(|err| format!("reading object file \"{}\" failed: {}", path.display(), err))?;
        linker.add_object(&path.to_string_lossy(), object);
    }

    let program = linker.link().map_err(|err| err.to_string())?;

    g10file::program::write_file(output_path, &program).map_err(|err| {
        format!(
            "writing program file \"{}\" failed: {}",
            output_path.display(),
            err
        )
    })?;
    Ok(())
}
