// Command handler for: Catalog

use lifter_engine::catalog::Catalog;
use lifter_engine::result::CatalogReport;

use super::helpers::print_json;
use crate::types::{OutputFormat, EXIT_OK};

pub(crate) fn run_catalog_command(format: OutputFormat) -> miette::Result<i32> {
    let report = CatalogReport::new(&Catalog::standard());
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("Catalog version {} (canonical order)", report.version);
            for op in &report.operators {
                let refines = if op.refines.is_empty() {
                    String::new()
                } else {
                    format!(" refines {}", op.refines.join(", "))
                };
                println!(
                    "  {:<26} {:<10} cost {:<5} {:<12}{refines}",
                    op.id,
                    op.category.as_str(),
                    op.semantic_cost,
                    op.consistency.as_str()
                );
                println!("      {}", op.description);
            }
        }
    }
    Ok(EXIT_OK)
}
