//! Synthesis toward a target lifting fraction.
//!
//! Operators are only ever applied in canonical order. Synthesis first
//! selects the cheapest canonical subsequence of admitted operators that
//! reaches the target, then applies it step by step. When no subsequence
//! reaches the target, every admitted operator that raises the lifting
//! fraction is applied instead, so the result is the best reachable state
//! and the blocked operators explain the failure.
//!
//! Each step applies one operator to the current operation and
//! re-decomposes the result; a step is kept only when it raises the
//! lifting fraction. Every step is atomic, so cancellation between steps
//! always leaves a fully formed result.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use lifter_ir::{Operation, StructuralHash};

use crate::catalog::{Catalog, RestructuringOperator};
use crate::classify::{Classifier, Verification};
use crate::decompose::{decompose_with, DecomposeOptions, Decomposition, DecompositionError};
use crate::requirements::{Blocker, Requirements, RequirementsError};
use crate::sequencer::{canonical_order, is_canonical};

/// Lifting fraction below which a strictly universal residual is treated
/// as inherently coordination-requiring.
pub const DEFAULT_INHERENT_FLOOR: f64 = 0.5;

/// Cooperative cancellation flag shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub inherent_floor: f64,
    pub decompose: DecomposeOptions,
    /// Polled between steps.
    pub cancel: CancelToken,
    /// Wall-clock limit, checked between steps like cancellation.
    pub deadline: Option<Duration>,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            inherent_floor: DEFAULT_INHERENT_FLOOR,
            decompose: DecomposeOptions::default(),
            cancel: CancelToken::new(),
            deadline: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Invalid target lifting fraction {0} (must be within [0, 1])")]
    InvalidTarget(f64),
    #[error(transparent)]
    Requirements(#[from] RequirementsError),
    #[error(transparent)]
    Decomposition(#[from] DecompositionError),
    #[error("Restructuring trace failed soundness check: {0}")]
    Unsound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreachableReason {
    /// The residual is universal and nothing admitted applies to it.
    InherentlyUniversal,
    BudgetExhausted,
    NoApplicableOperator,
}

impl UnreachableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnreachableReason::InherentlyUniversal => "inherently_universal",
            UnreachableReason::BudgetExhausted => "budget_exhausted",
            UnreachableReason::NoApplicableOperator => "no_applicable_operator",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    AlreadySatisfied,
    Reached,
    TargetUnreachable { reason: UnreachableReason },
    /// Progress was blocked by something the caller asked to keep.
    RequirementConflict { blocked: Vec<Blocker> },
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::AlreadySatisfied => f.write_str("already satisfied"),
            Outcome::Reached => f.write_str("target reached"),
            Outcome::TargetUnreachable { reason } => {
                write!(f, "target unreachable ({})", reason.as_str())
            }
            Outcome::RequirementConflict { blocked } => {
                let reasons: Vec<String> = blocked.iter().map(ToString::to_string).collect();
                write!(f, "requirement conflict: {}", reasons.join("; "))
            }
            Outcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStep {
    pub operator: String,
    pub lifting_before: f64,
    pub lifting_after: f64,
    pub cost: f64,
}

/// Applied steps in order. Steps can only be appended during synthesis.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RestructuringTrace {
    steps: Vec<TraceStep>,
}

impl RestructuringTrace {
    fn record(&mut self, step: TraceStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn operators(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.operator.as_str()).collect()
    }

    pub fn total_cost(&self) -> f64 {
        self.steps.iter().map(|s| s.cost).sum()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Result of one synthesis run. `operation` is the best state reached,
/// even when the target was not.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub outcome: Outcome,
    pub target: f64,
    pub initial: Decomposition,
    pub operation: Operation,
    pub decomposition: Decomposition,
    pub trace: RestructuringTrace,
    pub total_cost: f64,
    /// Every admission failure seen during the walk.
    pub blocked: Vec<Blocker>,
    pub diagnostics: Vec<String>,
}

impl Synthesis {
    pub fn verdict_class(&self) -> &'static str {
        match self.outcome {
            Outcome::AlreadySatisfied => "already_satisfied",
            Outcome::Reached => "reached",
            Outcome::TargetUnreachable { .. } => "target_unreachable",
            Outcome::RequirementConflict { .. } => "requirement_conflict",
            Outcome::Cancelled => "cancelled",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            Outcome::AlreadySatisfied | Outcome::Reached => 0,
            Outcome::TargetUnreachable { .. } => 1,
            Outcome::RequirementConflict { .. } => 3,
            Outcome::Cancelled => 4,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}

fn check_target(target: f64) -> Result<(), SynthesisError> {
    if target.is_finite() && (0.0..=1.0).contains(&target) {
        Ok(())
    } else {
        Err(SynthesisError::InvalidTarget(target))
    }
}

pub fn synthesize(
    op: &Operation,
    catalog: &Catalog,
    requirements: &Requirements,
    target: f64,
    options: &SynthesisOptions,
) -> Result<Synthesis, SynthesisError> {
    check_target(target)?;
    requirements.validate()?;
    let started = Instant::now();
    let mut classifier = Classifier::new();
    let initial = decompose_with(op, &mut classifier, &options.decompose)?;
    info!(
        operation = %op.name,
        lifting = initial.lifting,
        target,
        "starting synthesis"
    );

    let mut synthesis = Synthesis {
        outcome: Outcome::AlreadySatisfied,
        target,
        initial: initial.clone(),
        operation: op.clone(),
        decomposition: initial.clone(),
        trace: RestructuringTrace::default(),
        total_cost: 0.0,
        blocked: Vec::new(),
        diagnostics: Vec::new(),
    };
    if initial.lifting >= target {
        return Ok(synthesis);
    }

    let ordered = canonical_order(catalog);
    if initial.residual_verification(&mut classifier) == Some(Verification::Universal)
        && initial.lifting < options.inherent_floor
        && !ordered
            .iter()
            .any(|o| o.is_applicable(op) && o.preserves(requirements, 0.0).is_ok())
    {
        info!(operation = %op.name, "residual is inherently universal");
        synthesis.outcome = Outcome::TargetUnreachable {
            reason: UnreachableReason::InherentlyUniversal,
        };
        return Ok(synthesis);
    }

    let mut search = CanonicalSearch {
        ordered: &ordered,
        requirements,
        target,
        options,
        started,
        classifier: &mut classifier,
        best: None,
    };
    search.visit(0, op, initial.lifting, 0.0, &mut Vec::new())?;
    let steps: Vec<Arc<dyn RestructuringOperator>> = match search.best {
        Some((cost, chosen)) => {
            debug!(operation = %op.name, cost, steps = chosen.len(), "selected plan");
            chosen.into_iter().map(|i| ordered[i].clone()).collect()
        }
        None => {
            debug!(operation = %op.name, "no admitted plan reaches the target");
            ordered.clone()
        }
    };

    let mut current = op.clone();
    let mut current_dec = initial;
    let mut reached = false;
    let mut cancelled = false;
    for operator in &steps {
        if interrupted(options, started) {
            warn!(operation = %op.name, steps = synthesis.trace.len(), "synthesis cancelled");
            cancelled = true;
            break;
        }
        if !operator.is_applicable(&current) {
            continue;
        }
        if let Err(blocker) = operator.preserves(requirements, synthesis.total_cost) {
            debug!(operator = operator.id(), %blocker, "operator blocked");
            synthesis.blocked.push(blocker);
            continue;
        }
        let next = operator.apply(&current);
        if next == current {
            synthesis
                .diagnostics
                .push(format!("{} made no change; skipped", operator.id()));
            continue;
        }
        let next_dec = decompose_with(&next, &mut classifier, &options.decompose)?;
        if next_dec.lifting <= current_dec.lifting {
            synthesis.diagnostics.push(format!(
                "{} would not raise L ({:.3} -> {:.3}); skipped",
                operator.id(),
                current_dec.lifting,
                next_dec.lifting
            ));
            continue;
        }
        info!(
            operator = operator.id(),
            before = current_dec.lifting,
            after = next_dec.lifting,
            "applied restructuring"
        );
        synthesis.trace.record(TraceStep {
            operator: operator.id().to_string(),
            lifting_before: current_dec.lifting,
            lifting_after: next_dec.lifting,
            cost: operator.semantic_cost(),
        });
        synthesis.total_cost += operator.semantic_cost();
        current = next;
        current_dec = next_dec;
        if current_dec.lifting >= target {
            reached = true;
            break;
        }
    }

    synthesis.outcome = if reached {
        Outcome::Reached
    } else if cancelled {
        Outcome::Cancelled
    } else {
        classify_failure(&synthesis.blocked)
    };
    synthesis.operation = current;
    synthesis.decomposition = current_dec;

    verify_trace(op, &synthesis, catalog, requirements, options)?;
    info!(
        operation = %op.name,
        verdict = synthesis.verdict_class(),
        lifting = synthesis.decomposition.lifting,
        cost = synthesis.total_cost,
        "synthesis finished"
    );
    Ok(synthesis)
}

fn interrupted(options: &SynthesisOptions, started: Instant) -> bool {
    options.cancel.is_cancelled() || options.deadline.is_some_and(|d| started.elapsed() >= d)
}

/// Branch and bound over canonical subsequences of the catalog. The
/// catalog is fixed, so the search is bounded by its size, not by the
/// operation.
struct CanonicalSearch<'a> {
    ordered: &'a [Arc<dyn RestructuringOperator>],
    requirements: &'a Requirements,
    target: f64,
    options: &'a SynthesisOptions,
    started: Instant,
    classifier: &'a mut Classifier,
    /// Cheapest plan so far, as indices into `ordered`.
    best: Option<(f64, Vec<usize>)>,
}

impl CanonicalSearch<'_> {
    fn visit(
        &mut self,
        from: usize,
        op: &Operation,
        lifting: f64,
        cost: f64,
        chosen: &mut Vec<usize>,
    ) -> Result<(), SynthesisError> {
        // Equal cost keeps the earlier plan, so ties resolve canonically.
        if self.best.as_ref().is_some_and(|(best, _)| *best <= cost) {
            return Ok(());
        }
        if lifting >= self.target {
            self.best = Some((cost, chosen.clone()));
            return Ok(());
        }
        if interrupted(self.options, self.started) {
            return Ok(());
        }
        for index in from..self.ordered.len() {
            let operator = self.ordered[index].clone();
            if !operator.is_applicable(op) || operator.preserves(self.requirements, cost).is_err() {
                continue;
            }
            let next = operator.apply(op);
            if next == *op {
                continue;
            }
            let next_lifting = decompose_with(&next, self.classifier, &self.options.decompose)?.lifting;
            if next_lifting <= lifting {
                continue;
            }
            chosen.push(index);
            self.visit(index + 1, &next, next_lifting, cost + operator.semantic_cost(), chosen)?;
            chosen.pop();
        }
        Ok(())
    }
}

fn classify_failure(blocked: &[Blocker]) -> Outcome {
    let conflicts: Vec<Blocker> = blocked.iter().filter(|b| !b.is_budget()).cloned().collect();
    if !conflicts.is_empty() {
        Outcome::RequirementConflict { blocked: conflicts }
    } else if blocked.iter().any(Blocker::is_budget) {
        Outcome::TargetUnreachable {
            reason: UnreachableReason::BudgetExhausted,
        }
    } else {
        Outcome::TargetUnreachable {
            reason: UnreachableReason::NoApplicableOperator,
        }
    }
}

/// Replay the trace from `original` and confirm it reproduces the result:
/// canonical order, every step admitted and strictly raising `L`, and the
/// final operation and cost matching what synthesis reported.
pub fn verify_trace(
    original: &Operation,
    synthesis: &Synthesis,
    catalog: &Catalog,
    requirements: &Requirements,
    options: &SynthesisOptions,
) -> Result<(), SynthesisError> {
    let unsound = |msg: String| Err(SynthesisError::Unsound(msg));
    if !is_canonical(catalog, &synthesis.trace.operators()) {
        return unsound("operators are not in canonical order".into());
    }
    let mut classifier = Classifier::new();
    let mut current = original.clone();
    let mut lifting = synthesis.initial.lifting;
    let mut spent = 0.0;
    for step in synthesis.trace.steps() {
        let Some(operator) = catalog.get(&step.operator) else {
            return unsound(format!("unknown operator {}", step.operator));
        };
        if let Err(blocker) = operator.preserves(requirements, spent) {
            return unsound(format!("step violates requirements: {blocker}"));
        }
        if step.lifting_before != lifting {
            return unsound(format!("{} starts from L={} not {}", step.operator, step.lifting_before, lifting));
        }
        current = operator.apply(&current);
        let after = decompose_with(&current, &mut classifier, &options.decompose)?;
        if after.lifting != step.lifting_after || after.lifting <= lifting {
            return unsound(format!("{} does not raise L as recorded", step.operator));
        }
        lifting = after.lifting;
        spent += operator.semantic_cost();
    }
    if current != synthesis.operation {
        return unsound("replayed operation differs from the result".into());
    }
    if spent != synthesis.total_cost {
        return unsound(format!("recorded cost {} but replay spent {spent}", synthesis.total_cost));
    }
    Ok(())
}

/// Cheapest operator sequence reaching a target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub operators: Vec<String>,
    pub cost: f64,
    pub lifting: f64,
}

/// Exhaustive search over sequences of distinct admitted operators, in any
/// order, for the cheapest one reaching `target`. Exponential in the number
/// of applicable operators; used to check synthesis, not to replace it.
pub fn optimal_plan(
    op: &Operation,
    catalog: &Catalog,
    requirements: &Requirements,
    target: f64,
    options: &SynthesisOptions,
) -> Result<Option<Plan>, SynthesisError> {
    check_target(target)?;
    let mut search = PlanSearch {
        catalog,
        requirements,
        target,
        options,
        classifier: Classifier::new(),
        best: None,
        seen: HashMap::new(),
    };
    let lifting = decompose_with(op, &mut search.classifier, &options.decompose)?.lifting;
    let mut used = Vec::new();
    search.visit(op, lifting, 0.0, &mut used)?;
    Ok(search.best)
}

struct PlanSearch<'a> {
    catalog: &'a Catalog,
    requirements: &'a Requirements,
    target: f64,
    options: &'a SynthesisOptions,
    classifier: Classifier,
    best: Option<Plan>,
    /// Cheapest cost at which each operation has been reached.
    seen: HashMap<StructuralHash, f64>,
}

impl PlanSearch<'_> {
    fn visit(
        &mut self,
        op: &Operation,
        lifting: f64,
        cost: f64,
        used: &mut Vec<String>,
    ) -> Result<(), SynthesisError> {
        if self.best.as_ref().is_some_and(|b| b.cost <= cost) {
            return Ok(());
        }
        if lifting >= self.target {
            self.best = Some(Plan {
                operators: used.clone(),
                cost,
                lifting,
            });
            return Ok(());
        }
        let key = op.structural_hash();
        if self.seen.get(&key).is_some_and(|&c| c <= cost) {
            return Ok(());
        }
        self.seen.insert(key, cost);

        for operator in self.catalog.operators.clone() {
            if used.iter().any(|u| u == operator.id())
                || !operator.is_applicable(op)
                || operator.preserves(self.requirements, cost).is_err()
            {
                continue;
            }
            let next = operator.apply(op);
            if next == *op {
                continue;
            }
            let next_lifting = decompose_with(&next, &mut self.classifier, &self.options.decompose)?.lifting;
            used.push(operator.id().to_string());
            self.visit(&next, next_lifting, cost + operator.semantic_cost(), used)?;
            used.pop();
        }
        Ok(())
    }
}
