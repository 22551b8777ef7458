pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use mitsumori_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "mitsumori",
    about = "Mitsumori operator CLI",
    long_about = "Apply migrations, load demo data, inspect configuration and check runtime readiness.",
    after_help = "Examples:\n  mitsumori migrate\n  mitsumori seed\n  mitsumori doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Read configuration from this TOML file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo dataset (catalog, estimates, maintenance fees)")]
    Seed {
        #[arg(long, help = "Only remove previously seeded demo rows")]
        clean: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Validate config, integration readiness, DB connectivity and migrations")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config.clone(),
            ..LoadOptions::default()
        }
    }
}

pub fn run() -> ExitCode {
    execute(Cli::parse())
}

pub fn execute(cli: Cli) -> ExitCode {
    let options = cli.load_options();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(&options),
        Command::Seed { clean } => commands::seed::run(&options, clean),
        Command::Config { json } => commands::config::run(&options, json),
        Command::Doctor { json } => commands::doctor::run(&options, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
