//! Strudel command-line tool.

use anyhow::{bail, Result};
use log::debug;
use std::path::PathBuf;
use structopt::StructOpt;

use strudel::{binary, Module, PassRunner};

#[derive(Debug, StructOpt)]
#[structopt(name = "strudel-util", about = "Strudel utility.")]
struct Options {
    #[structopt(short, long)]
    debug: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    #[structopt(name = "round-trip", about = "Decode and re-encode a module")]
    RoundTrip {
        #[structopt(help = "Wasm file to parse")]
        wasm: PathBuf,
        #[structopt(short = "o", long = "output", help = "Output file")]
        output: Option<PathBuf>,
    },

    #[structopt(name = "opt", about = "Run passes and re-encode")]
    Opt {
        #[structopt(help = "Wasm file to parse")]
        wasm: PathBuf,
        #[structopt(short = "o", long = "output", help = "Output file")]
        output: Option<PathBuf>,
        #[structopt(
            short = "O",
            long = "optimize",
            help = "Compress the output with an opcode table"
        )]
        optimize: bool,
        #[structopt(long = "pass", help = "Add a named pass to the pipeline")]
        passes: Vec<String>,
        #[structopt(
            long = "default-passes",
            help = "Run the default optimization pipeline"
        )]
        default_passes: bool,
        #[structopt(
            long = "learn",
            help = "Search function order and chunking for this many generations"
        )]
        learn: Option<usize>,
        #[structopt(long = "seed", default_value = "1", help = "Search seed")]
        seed: u64,
    },

    #[structopt(name = "metrics", about = "Parse Wasm and report node counts")]
    Metrics {
        #[structopt(help = "Wasm file to parse")]
        wasm: PathBuf,
    },
}

fn main() -> Result<()> {
    let opts = Options::from_args();

    let mut logger = env_logger::Builder::from_default_env();
    if opts.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    let _ = logger.try_init();

    match opts.command {
        Command::RoundTrip { wasm, output } => {
            let bytes = std::fs::read(wasm)?;
            debug!("loaded {} bytes", bytes.len());
            let mut module = Module::from_binary(&bytes)?;
            let out = module.to_binary()?;
            let reparsed = Module::from_binary(&out)?;
            if !module.structurally_equal(&reparsed) {
                bail!("round-trip produced a structurally different module");
            }
            emit(output, &out)?;
        }
        Command::Opt {
            wasm,
            output,
            optimize,
            passes,
            default_passes,
            learn,
            seed,
        } => {
            let bytes = std::fs::read(wasm)?;
            let mut module = Module::from_binary(&bytes)?;
            let mut runner = PassRunner::new();
            if default_passes {
                runner.add_default_optimization_passes();
            }
            for name in &passes {
                runner.add(name)?;
            }
            runner.run(&mut module);
            let out = if let Some(generations) = learn {
                binary::learn::write_learned(&mut module, generations, 100, seed)?
            } else if optimize {
                module.to_binary_compressed(&[])?
            } else {
                module.to_binary()?
            };
            debug!("emitted {} bytes", out.len());
            emit(output, &out)?;
        }
        Command::Metrics { wasm } => {
            let bytes = std::fs::read(wasm)?;
            let mut module = Module::from_binary(&bytes)?;
            let mut runner = PassRunner::new();
            runner.add("metrics")?;
            runner.run(&mut module);
        }
    }
    Ok(())
}

fn emit(output: Option<PathBuf>, bytes: &[u8]) -> Result<()> {
    use std::io::Write;
    match output {
        Some(path) => std::fs::write(path, bytes)?,
        None => std::io::stdout().write_all(bytes)?,
    }
    Ok(())
}
