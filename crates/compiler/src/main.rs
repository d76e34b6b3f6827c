//! Cassette CLI
//!
//! Compiles a project (an entry file plus any extra modules and the
//! stdlib) and runs it, or with `-c` writes the compiled chunk to a
//! `.tape` file next to the entry. A `.tape` entry file is loaded
//! directly, identified by its magic header.

use cassettec::config::{BuildConfig, time_seed};
use cassettec::report;
use cassette_core::chunk::{CHUNK_EXT, Chunk};
use cassette_runtime::vm::{Status, Vm};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cassette")]
#[command(version = env!("CARGO_PKG_VERSION"), disable_version_flag = true)]
#[command(about = "Cassette language compiler and virtual machine", long_about = None)]
struct Cli {
    /// Print version and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Enable tracing (disassembly and VM step trace)
    #[arg(short = 'd')]
    debug: bool,

    /// Compile only; write a .tape chunk next to the entry file
    #[arg(short = 'c')]
    compile: bool,

    /// Seed the random generator (defaults to a time-derived seed)
    #[arg(short = 's', value_name = "SEED")]
    seed: Option<u64>,

    /// Entry source file, or a previously compiled .tape chunk
    entry: PathBuf,

    /// Additional source modules for the project
    extra: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let color = std::io::stderr().is_terminal();

    let mut config = BuildConfig::from_env();
    config.debug = cli.debug;
    config.compile_only = cli.compile;
    config.seed = cli.seed.unwrap_or_else(time_seed);

    let chunk = match load_or_build(&cli, &config, color) {
        Ok(chunk) => chunk,
        Err(code) => return code,
    };

    if cli.debug {
        print!("{}", chunk.disassemble());
    }

    if cli.compile {
        let out = cli.entry.with_extension(CHUNK_EXT);
        if let Err(e) = std::fs::write(&out, chunk.serialize()) {
            eprintln!("Error: cannot write {}: {e}", out.display());
            return ExitCode::FAILURE;
        }
        println!("Wrote {}", out.display());
        return ExitCode::SUCCESS;
    }

    run(&chunk, &config, color)
}

fn load_or_build(cli: &Cli, config: &BuildConfig, color: bool) -> Result<Chunk, ExitCode> {
    let bytes = std::fs::read(&cli.entry).map_err(|e| {
        eprintln!("Error: cannot read {}: {e}", cli.entry.display());
        ExitCode::FAILURE
    })?;

    if Chunk::is_chunk(&bytes) {
        return Chunk::deserialize(&bytes).map_err(|e| {
            eprintln!("Error: {}: {e}", cli.entry.display());
            ExitCode::FAILURE
        });
    }

    cassettec::build_project(&cli.entry, &cli.extra, config).map_err(|e| {
        eprint!("{}", report::render_build_error(&e, color));
        ExitCode::FAILURE
    })
}

fn run(chunk: &Chunk, config: &BuildConfig, color: bool) -> ExitCode {
    let mut vm = Vm::new(config.seed);
    vm.trace = config.debug;
    vm.load(chunk);

    // budgeted steps keep the VM interruptible from a host loop
    loop {
        match vm.run_budget(chunk, 100_000) {
            Ok(Status::Running) => {}
            Ok(Status::Halted(value)) => {
                println!("{}", vm.heap.inspect(value));
                return ExitCode::SUCCESS;
            }
            Ok(Status::Interrupted) => {
                eprintln!("Interrupted");
                return ExitCode::FAILURE;
            }
            Err(e) => {
                eprint!("{}", report::render_runtime_error(&vm, chunk, &e, color));
                return ExitCode::FAILURE;
            }
        }
    }
}
