// Command handler for: Emit
//
// Synthesizes toward the target, then emits the hybrid protocol for the
// restructured operation as JSON or as a Rust scaffold. The exit code
// follows the synthesis outcome; the protocol is written either way.

use std::fs;
use std::path::PathBuf;

use miette::{IntoDiagnostic, WrapErr};
use tracing::info;

use lifter_codegen::common::sha256_hex;
use lifter_codegen::rust_gen::{render_rust, ProvenanceInfo};
use lifter_codegen::{emit, EmitOptions};

use super::helpers::{load_operation, parse_agreement_kind, requirements_from_args, run_synthesis};
use crate::cli::SynthesisArgs;
use crate::types::EmitFormat;

pub(crate) struct EmitArgs {
    pub(crate) format: EmitFormat,
    pub(crate) primitive: String,
    pub(crate) binding: Option<String>,
    pub(crate) out: Option<PathBuf>,
}

pub(crate) fn run_emit_command(
    file: PathBuf,
    synthesis_args: SynthesisArgs,
    args: EmitArgs,
) -> miette::Result<i32> {
    let (source, op) = load_operation(&file)?;
    let requirements = requirements_from_args(&synthesis_args)?;
    let synthesis = run_synthesis(&op, &requirements, &synthesis_args)?;
    if !synthesis.is_success() {
        eprintln!("Warning: {}; emitting the best decomposition found.", synthesis.outcome);
    }

    let options = EmitOptions {
        primitive: parse_agreement_kind(&args.primitive),
        binding_name: args.binding,
    };
    let protocol = emit(&synthesis.decomposition, &options)
        .map_err(|e| miette::miette!("Emission failed: {e}"))?;

    let rendered = match args.format {
        EmitFormat::Json => protocol.to_json().into_diagnostic()?,
        EmitFormat::Rust => {
            let provenance = ProvenanceInfo {
                source_sha256: sha256_hex(source.as_bytes()),
                requirements_sha256: Some(requirements.structural_hash().to_hex()),
                target: Some(synthesis_args.target),
            };
            render_rust(&protocol, &provenance).map_err(|e| miette::miette!("Rendering failed: {e}"))?
        }
    };

    match &args.out {
        Some(path) => {
            fs::write(path, &rendered)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "wrote protocol");
            println!("Wrote {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(synthesis.exit_code())
}
