//! proxygen CLI
//!
//! Inspects target selection, generated code and mapping tables for the
//! templates of a built-in demo host, and runs the demo scenarios.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod demo;

#[derive(Parser)]
#[command(name = "proxygen")]
#[command(about = "Runtime proxy generator toolbox", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Target override: auto, v<N> or v<N>:<level>
    #[arg(short, long, global = true)]
    target: Option<String>,

    /// Newest format the demo host accepts
    #[arg(long, global = true, default_value_t = 3)]
    host_max: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the selected format version and feature level
    Targets,

    /// List the demo templates
    Templates,

    /// Disassemble the generated type of a template
    Dump {
        /// Template name
        template: String,
    },

    /// Print how each template method maps onto the target
    Mappings {
        /// Template name
        template: String,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run the demo scenarios
    Demo {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        log::debug!("command failed: {:?}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let options = commands::Options {
        config: cli.config,
        target: cli.target,
        host_max: cli.host_max,
    };
    match cli.command {
        Commands::Targets => commands::targets::execute(&options),
        Commands::Templates => commands::templates::execute(&options),
        Commands::Dump { template } => commands::dump::execute(&options, &template),
        Commands::Mappings { template, json } => commands::mappings::execute(&options, &template, json),
        Commands::Demo { json } => commands::demo::execute(&options, json),
    }
}
