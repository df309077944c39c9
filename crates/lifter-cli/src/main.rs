#![doc = include_str!("../README.md")]

mod cli;
mod commands;
mod types;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::emit::EmitArgs;
use crate::commands::helpers::{parse_emit_format, parse_output_format};
use crate::types::exit_code_for;

fn run(cli: Cli) -> miette::Result<i32> {
    let format = parse_output_format(&cli.format);
    match cli.command {
        Commands::Classify { file } => commands::classify::run_classify_command(file, format),
        Commands::Decompose { file, workload } => {
            commands::decompose::run_decompose_command(file, workload, format)
        }
        Commands::Synthesize { file, synthesis } => {
            commands::synthesize::run_synthesize_command(file, synthesis, format)
        }
        Commands::Emit {
            file,
            synthesis,
            emit_format,
            primitive,
            binding,
            out,
        } => commands::emit::run_emit_command(
            file,
            synthesis,
            EmitArgs {
                format: parse_emit_format(&emit_format),
                primitive,
                binding,
                out,
            },
        ),
        Commands::Catalog => commands::catalog::run_catalog_command(format),
    }
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            exit_code_for(&report)
        }
    };
    std::process::exit(code);
}
