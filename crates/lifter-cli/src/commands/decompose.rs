// Command handler for: Decompose

use std::path::PathBuf;

use lifter_engine::classify::Classifier;
use lifter_engine::decompose::{decompose_with, DecomposeOptions};
use lifter_engine::result::DecompositionReport;

use super::helpers::{fmt_fraction, load_operation, load_workload, print_json};
use crate::types::{OutputFormat, EXIT_OK};

pub(crate) fn run_decompose_command(
    file: PathBuf,
    workload: Option<PathBuf>,
    format: OutputFormat,
) -> miette::Result<i32> {
    let (_, op) = load_operation(&file)?;
    let mut decomposition = decompose_with(&op, &mut Classifier::new(), &DecomposeOptions::default())
        .map_err(|e| miette::miette!("Decomposition failed: {e}"))?;
    if let Some(path) = workload {
        let trace = load_workload(&path)?;
        decomposition = decomposition
            .with_workload(&trace)
            .map_err(|e| miette::miette!("Invalid workload {}: {e}", path.display()))?;
    }
    let report = DecompositionReport::new(&decomposition);
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_decomposition(&report),
    }
    Ok(EXIT_OK)
}

pub(crate) fn print_decomposition(report: &DecompositionReport) {
    println!("Operation: {} ({})", report.operation, &report.spec_hash[..12]);
    println!(
        "Lifting fraction: {} ({} existential / {} universal)",
        fmt_fraction(report.lifting),
        report.existential_size,
        report.universal_size
    );
    if let Some(w) = report.workload_lifting {
        println!("Workload lifting fraction: {}", fmt_fraction(w));
    }
    println!("O_E: {}", report.existential);
    println!("O_U: {}", report.universal);
    println!("Liftable states: {}", list_or_none(&report.liftable_states));
    println!("Handoff states: {}", list_or_none(&report.handoff_states));
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}
