//! Shared types used across CLI commands and tests.

use miette::Diagnostic;
use thiserror::Error;

use lifter_dsl::errors::ParseError;
use lifter_ir::lowering::SpannedLoweringError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EmitFormat {
    Json,
    Rust,
}

pub(crate) const EXIT_OK: i32 = 0;
pub(crate) const EXIT_UNSUPPORTED: i32 = 2;
pub(crate) const EXIT_FAILURE: i32 = 4;

/// The specification is outside the supported fragment (exit code 2).
#[derive(Debug, Error, Diagnostic)]
pub(crate) enum Unsupported {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lowering(#[from] SpannedLoweringError),
}

/// Exit code for a failed command.
pub(crate) fn exit_code_for(report: &miette::Report) -> i32 {
    if report.downcast_ref::<Unsupported>().is_some() {
        EXIT_UNSUPPORTED
    } else {
        EXIT_FAILURE
    }
}
