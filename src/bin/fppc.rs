//! Compile a `.fpp` parser description to C.
//!
//! Usage:
//!   fppc [OPTIONS] FILE.fpp
//!
//! Options:
//!   -o, --output PATH   Output path; `.h` and `.c` are derived from it (default: FILE)
//!   --target NAME       Target language (only `c`)
//!   --function NAME     Name of the generated entry point (default: fpp_parse_packet)
//!   -v, --verbose       More logging; repeat for trace output. `RUST_LOG` overrides.
//!
//! Nothing is written unless generation succeeds.

use anyhow::Context;
use fppc::{output_paths, target_for, write_units, Options, Program};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn take_value(args: &mut Vec<String>, names: &[&str]) -> anyhow::Result<Option<String>> {
    match args.iter().position(|a| names.contains(&a.as_str())) {
        Some(pos) => {
            if pos + 1 >= args.len() {
                anyhow::bail!("{} requires a value", args[pos]);
            }
            let value = args.remove(pos + 1);
            args.remove(pos);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn init_tracing(verbosity: usize) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let verbosity = args.iter().filter(|a| *a == "-v" || *a == "--verbose").count();
    args.retain(|a| a != "-v" && a != "--verbose");
    init_tracing(verbosity);

    let output = take_value(&mut args, &["-o", "--output"])?;
    let target = take_value(&mut args, &["--target"])?;
    let function = take_value(&mut args, &["--function"])?;
    if let Some(unknown) = args.iter().find(|a| a.starts_with('-')) {
        anyhow::bail!("unknown option {}", unknown);
    }
    let input = match args.as_slice() {
        [input] => PathBuf::from(input),
        _ => anyhow::bail!("Usage: fppc [-o PATH] [--target c] [--function NAME] [-v] FILE.fpp"),
    };

    let source = std::fs::read_to_string(&input)
        .with_context(|| format!("reading {}", input.display()))?;
    let description = fppc::parse(&source).map_err(anyhow::Error::msg)?;
    let ir = fppc::resolve(&description).map_err(anyhow::Error::msg)?;

    let backend = target_for(target.as_deref())?;
    let out_path = output.map(PathBuf::from).unwrap_or_else(|| input.clone());
    let paths = output_paths(&out_path, backend.as_ref());
    let mut options = Options::default().with_header_file(paths.header_file_name());
    if let Some(t) = target {
        options = options.with_target(t);
    }
    if let Some(f) = function {
        options = options.with_function_name(f);
    }
    if let Some(name) = input.file_name() {
        options = options.with_source_name(name.to_string_lossy());
    }

    // Each diagnostic was already logged when it was reported.
    let program = Program::build(&ir, options).map_err(|diagnostics| {
        anyhow::anyhow!("{} error(s); no output written", diagnostics.len())
    })?;
    write_units(&paths, &program.generate())?;
    println!("{}", paths.body.display());
    println!("{}", paths.header.display());
    Ok(())
}
