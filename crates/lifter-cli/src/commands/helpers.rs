// Shared helper functions used across CLI command handlers.
//
// These parse CLI string arguments into typed values, load specification
// and JSON inputs, and assemble requirements and synthesis options.

use std::fs;
use std::path::Path;
use std::time::Duration;

use miette::{IntoDiagnostic, WrapErr};
use serde::Serialize;
use tracing::warn;

use lifter_codegen::AgreementKind;
use lifter_engine::catalog::Catalog;
use lifter_engine::decompose::WorkloadTrace;
use lifter_engine::requirements::{Consistency, Requirements};
use lifter_engine::synthesis::{synthesize, Synthesis, SynthesisOptions};
use lifter_ir::Operation;

use crate::cli::SynthesisArgs;
use crate::types::{EmitFormat, OutputFormat, Unsupported, EXIT_FAILURE};

pub(crate) fn parse_output_format(raw: &str) -> OutputFormat {
    match raw {
        "text" => OutputFormat::Text,
        "json" => OutputFormat::Json,
        other => {
            eprintln!("Unknown output format: {other}. Use 'text' or 'json'.");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

pub(crate) fn parse_emit_format(raw: &str) -> EmitFormat {
    match raw {
        "json" => EmitFormat::Json,
        "rust" | "rs" => EmitFormat::Rust,
        other => {
            eprintln!("Unknown emit format: {other}. Use 'json' or 'rust'.");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

pub(crate) fn parse_agreement_kind(raw: &str) -> AgreementKind {
    match raw {
        "consensus" => AgreementKind::Consensus,
        "atomic-broadcast" => AgreementKind::AtomicBroadcast,
        other => {
            eprintln!("Unknown agreement primitive: {other}. Use 'consensus' or 'atomic-broadcast'.");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

pub(crate) fn parse_consistency(raw: &str) -> Consistency {
    match Consistency::parse(raw) {
        Some(level) => level,
        None => {
            eprintln!(
                "Unknown consistency level: {raw}. Use 'eventual', 'causal', 'sequential', or 'linearizable'."
            );
            std::process::exit(EXIT_FAILURE);
        }
    }
}

pub(crate) fn read_file(path: &Path) -> miette::Result<String> {
    fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", path.display()))
}

/// Parse and lower a `.lift` file. Rejections carry source spans and map to
/// the unsupported-specification exit code.
pub(crate) fn load_operation(path: &Path) -> miette::Result<(String, Operation)> {
    let source = read_file(path)?;
    let filename = path.display().to_string();
    let program = lifter_dsl::parse(&source, &filename)
        .map_err(|e| miette::Report::new(Unsupported::from(e)))?;
    let op = lifter_engine::pipeline::lower_with_source(&program, &source, &filename)
        .map_err(|e| miette::Report::new(Unsupported::from(e)))?;
    Ok((source, op))
}

pub(crate) fn load_workload(path: &Path) -> miette::Result<WorkloadTrace> {
    WorkloadTrace::from_json(&read_file(path)?)
        .map_err(|e| miette::miette!("Invalid workload {}: {e}", path.display()))
}

/// Requirements from `--requirements`, then flags on top.
pub(crate) fn requirements_from_args(args: &SynthesisArgs) -> miette::Result<Requirements> {
    let mut requirements = match &args.requirements {
        Some(path) => Requirements::from_json(&read_file(path)?)
            .map_err(|e| miette::miette!("Invalid requirements {}: {e}", path.display()))?,
        None => Requirements::default(),
    };
    requirements.forbidden.extend(args.forbid.iter().cloned());
    if let Some(raw) = &args.min_consistency {
        requirements.min_consistency = parse_consistency(raw);
    }
    if args.max_cost.is_some() {
        requirements.max_semantic_cost = args.max_cost;
    }
    if args.budget.is_some() {
        requirements.budget = args.budget;
    }
    requirements
        .validate()
        .map_err(|e| miette::miette!("Invalid requirements: {e}"))?;

    let catalog = Catalog::standard();
    for id in &requirements.forbidden {
        if catalog.get(id).is_none() {
            warn!(operator = %id, "forbidden operator is not in the catalog");
        }
    }
    Ok(requirements)
}

pub(crate) fn synthesis_options_from_args(args: &SynthesisArgs) -> SynthesisOptions {
    let mut options = SynthesisOptions::default();
    if let Some(floor) = args.floor {
        options.inherent_floor = floor;
    }
    options.deadline = args.timeout_ms.map(Duration::from_millis);
    options
}

pub(crate) fn run_synthesis(
    op: &Operation,
    requirements: &Requirements,
    args: &SynthesisArgs,
) -> miette::Result<Synthesis> {
    synthesize(
        op,
        &Catalog::standard(),
        requirements,
        args.target,
        &synthesis_options_from_args(args),
    )
    .map_err(|e| miette::miette!("Synthesis failed: {e}"))
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> miette::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

pub(crate) fn fmt_fraction(value: f64) -> String {
    format!("{value:.3}")
}
