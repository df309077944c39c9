// Command handler for: Classify

use std::path::PathBuf;

use lifter_engine::result::ClassifyReport;

use super::helpers::{load_operation, print_json};
use crate::types::{OutputFormat, EXIT_OK};

pub(crate) fn run_classify_command(file: PathBuf, format: OutputFormat) -> miette::Result<i32> {
    let (_, op) = load_operation(&file)?;
    let report = ClassifyReport::new(&op.name, &op.formula);
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("Operation: {}", report.operation);
            println!("Verification: {}", report.verification);
            if let Some(binders) = &report.witness_binders {
                let rendered: Vec<String> = binders.iter().map(|(v, d)| format!("{v} in {d}")).collect();
                println!("Witness: {}", rendered.join(", "));
            }
            println!("Conjuncts:");
            for c in &report.conjuncts {
                println!("  [{}] {}", c.verification, c.formula);
            }
        }
    }
    Ok(EXIT_OK)
}
