// Command handler for: Synthesize
//
// Runs the orchestrator and maps its outcome to the exit code.

use std::path::PathBuf;

use lifter_engine::result::SynthesisReport;
use lifter_engine::synthesis::Synthesis;

use super::decompose::print_decomposition;
use super::helpers::{fmt_fraction, load_operation, print_json, requirements_from_args, run_synthesis};
use crate::cli::SynthesisArgs;
use crate::types::OutputFormat;

pub(crate) fn run_synthesize_command(
    file: PathBuf,
    args: SynthesisArgs,
    format: OutputFormat,
) -> miette::Result<i32> {
    let (_, op) = load_operation(&file)?;
    let requirements = requirements_from_args(&args)?;
    let synthesis = run_synthesis(&op, &requirements, &args)?;
    let report = SynthesisReport::new(&synthesis);
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_synthesis(&synthesis, &report),
    }
    Ok(synthesis.exit_code())
}

pub(crate) fn print_synthesis(synthesis: &Synthesis, report: &SynthesisReport) {
    println!(
        "Outcome: {} (target {}, lifting {} -> {})",
        synthesis.outcome,
        fmt_fraction(report.target),
        fmt_fraction(report.initial_lifting),
        fmt_fraction(report.final_lifting)
    );
    if synthesis.trace.is_empty() {
        println!("Trace: (empty)");
    } else {
        println!("Trace:");
        for (i, step) in synthesis.trace.steps().iter().enumerate() {
            println!(
                "  {}. {:<28} {} -> {}  cost {}",
                i + 1,
                step.operator,
                fmt_fraction(step.lifting_before),
                fmt_fraction(step.lifting_after),
                step.cost
            );
        }
        println!("Total cost: {}", report.total_cost);
    }
    for blocker in &report.blocked {
        println!("Blocked: {blocker}");
    }
    for note in &report.diagnostics {
        println!("Note: {note}");
    }
    print_decomposition(&report.decomposition);
}
