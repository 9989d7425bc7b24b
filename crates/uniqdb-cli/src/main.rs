//! uniqdb Command-Line Client
//!
//! Manage an embedded uniqdb store directory: declare unique field sets,
//! write entities and repair unique markers.

mod commands;
mod formatter;

use clap::Parser;
use commands::Command;
use formatter::OutputFormat;
use std::path::PathBuf;
use uniqdb_core::{Store, StoreConfig, DEFAULT_MAX_FIX_ATTEMPTS};

/// uniqdb Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "uniqdb")]
#[command(version, about = "Entity store with emulated unique constraints")]
pub struct Args {
    /// Store directory
    #[arg(long, env = "UNIQDB_PATH", default_value = "./uniqdb_data")]
    pub path: PathBuf,

    /// Maximum fixer attempts per unique set before a put fails
    #[arg(long, default_value_t = DEFAULT_MAX_FIX_ATTEMPTS)]
    pub max_fix_attempts: usize,

    /// Output format
    #[arg(long, default_value = "json", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("uniqdb=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = StoreConfig::new(&args.path).with_max_fix_attempts(args.max_fix_attempts);
    let store = Store::open(config)?;
    let formatter = formatter::create_formatter(args.format);

    let output = commands::execute(&store, args.command)?;
    println!("{}", formatter.format(&output));

    store.flush()?;
    Ok(())
}
