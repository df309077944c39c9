#![allow(clippy::result_large_err)]

//! End-to-end entry points: source text to decomposition or synthesis.

use std::time::Instant;
use thiserror::Error;
use tracing::info;

use lifter_dsl::ast;
use lifter_dsl::errors::ParseError;
use lifter_ir::lowering::{self, LoweringError, SpannedLoweringError};
use lifter_ir::Operation;

use crate::catalog::Catalog;
use crate::classify::Classifier;
use crate::decompose::{
    decompose_with, DecomposeOptions, Decomposition, DecompositionError, WorkloadError,
    WorkloadTrace,
};
use crate::requirements::{Requirements, RequirementsError};
use crate::synthesis::{synthesize, Synthesis, SynthesisError, SynthesisOptions};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Lowering error: {0}")]
    Lowering(#[from] LoweringError),
    #[error("Decomposition error: {0}")]
    Decomposition(#[from] DecompositionError),
    #[error("Requirements error: {0}")]
    Requirements(#[from] RequirementsError),
    #[error("Workload error: {0}")]
    Workload(#[from] WorkloadError),
    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),
}

impl EngineError {
    /// Input outside the supported fragment. Never worth retrying unchanged.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, EngineError::Parse(_) | EngineError::Lowering(_))
    }

    /// Internal consistency failures: these indicate a bug, not bad input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            EngineError::Decomposition(DecompositionError::InvariantViolation(_))
                | EngineError::Synthesis(SynthesisError::Decomposition(
                    DecompositionError::InvariantViolation(_)
                ))
                | EngineError::Synthesis(SynthesisError::Unsound(_))
        )
    }
}

/// Parse a `.lift` source file into an AST.
pub fn parse(source: &str, filename: &str) -> Result<ast::Program, EngineError> {
    let started = Instant::now();
    let program = lifter_dsl::parse(source, filename)?;
    info!(filename, elapsed_ms = started.elapsed().as_millis() as u64, "parsed");
    Ok(program)
}

/// Lower an AST into an operation.
pub fn lower(program: &ast::Program) -> Result<Operation, EngineError> {
    let op = lowering::lower(program)?;
    info!(operation = %op.name, conjuncts = op.formula.conjuncts().len(), "lowered");
    Ok(op)
}

/// Lower with source spans attached, for miette rendering.
pub fn lower_with_source(
    program: &ast::Program,
    source: &str,
    filename: &str,
) -> Result<Operation, SpannedLoweringError> {
    lowering::lower_with_source(program, source, filename)
}

/// Parse and lower in one step.
pub fn load_operation(source: &str, filename: &str) -> Result<Operation, EngineError> {
    info!("Parsing {filename}...");
    let program = parse(source, filename)?;
    info!("Lowering {}...", program.operation.node.name);
    lower(&program)
}

pub fn decompose_source(
    source: &str,
    filename: &str,
    options: &DecomposeOptions,
    workload: Option<&WorkloadTrace>,
) -> Result<Decomposition, EngineError> {
    let op = load_operation(source, filename)?;
    let decomposition = decompose_with(&op, &mut Classifier::new(), options)?;
    Ok(match workload {
        Some(trace) => decomposition.with_workload(trace)?,
        None => decomposition,
    })
}

pub fn synthesize_source(
    source: &str,
    filename: &str,
    requirements: &Requirements,
    target: f64,
    options: &SynthesisOptions,
) -> Result<Synthesis, EngineError> {
    let op = load_operation(source, filename)?;
    Ok(synthesize(&op, &Catalog::standard(), requirements, target, options)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTER: &str = r#"
(operation counter
  (domain replica (r1 r2))
  (state value counter)
  (update increment value increment)
  (exists (n replica) (value-eq-sum value n)))
"#;

    #[test]
    fn loads_and_decomposes() {
        let dec = decompose_source(COUNTER, "counter.lift", &DecomposeOptions::default(), None).unwrap();
        assert_eq!(dec.lifting, 1.0);
        assert!(dec.handoff_states.is_empty());
    }

    #[test]
    fn parse_errors_are_unsupported() {
        let err = load_operation("(operation", "bad.lift").unwrap_err();
        assert!(err.is_unsupported());
        assert!(!err.is_invariant_violation());
    }

    #[test]
    fn infinite_domains_are_unsupported() {
        let src = "(operation o (domain n nat) (forall (i n) (p i)))";
        let err = load_operation(src, "nat.lift").unwrap_err();
        assert!(matches!(err, EngineError::Lowering(LoweringError::InfiniteDomain(_))));
        assert!(err.is_unsupported());
    }

    #[test]
    fn bad_target_is_not_unsupported() {
        let err = synthesize_source(
            COUNTER,
            "counter.lift",
            &Requirements::default(),
            -0.5,
            &SynthesisOptions::default(),
        )
        .unwrap_err();
        assert!(!err.is_unsupported());
    }
}
