//! Decomposition of an operation into a liftable part and a residual.
//!
//! The formula is put in negation normal form and split into conjuncts
//! (`forall` distributes over `and`; vacuous quantifiers are dropped because
//! every domain is non-empty). Existential conjuncts form `O_E`, everything
//! else forms `O_U`. The lifting fraction is the node-count share of `O_E`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, warn};

use lifter_ir::eval::{check_equivalence, EvalError, Equivalence};
use lifter_ir::{Formula, Operation};

use crate::classify::{Classifier, Verification};
use crate::commutativity::{state_profile, AlgebraicProfile};

/// Workload trace JSON schema version.
pub const WORKLOAD_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct DecomposeOptions {
    /// Exhaustive soundness check runs when the formula has at most this
    /// many ground atoms.
    pub max_equivalence_atoms: usize,
}

impl Default for DecomposeOptions {
    fn default() -> Self {
        Self {
            max_equivalence_atoms: 12,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecompositionError {
    #[error("Decomposition invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),
}

/// Immutable result of decomposing one operation.
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// The operation that was decomposed.
    pub operation: Operation,
    /// `O_E`: conjunction of existential conjuncts.
    pub existential: Formula,
    /// `O_U`: conjunction of the residual conjuncts.
    pub universal: Formula,
    pub existential_conjuncts: Vec<Formula>,
    pub universal_conjuncts: Vec<Formula>,
    pub existential_size: usize,
    pub universal_size: usize,
    /// Structural lifting fraction `L`.
    pub lifting: f64,
    /// Workload-weighted lifting, only when a trace was supplied.
    pub workload_lifting: Option<f64>,
    /// States not referenced by `O_U`.
    pub liftable_states: Vec<String>,
    /// States the residual reads, handed to the agreement round.
    pub handoff_states: Vec<String>,
    pub state_profiles: IndexMap<String, AlgebraicProfile>,
}

impl Decomposition {
    pub fn is_fully_liftable(&self) -> bool {
        self.universal_conjuncts.is_empty()
    }

    /// Verification class of the residual as a whole, `None` when empty.
    pub fn residual_verification(&self, classifier: &mut Classifier) -> Option<Verification> {
        (!self.universal_conjuncts.is_empty()).then(|| classifier.verification(&self.universal))
    }
}

/// `|O_E| / (|O_E| + |O_U|)`, or 1 when both are empty.
pub fn lifting_fraction(existential_size: usize, universal_size: usize) -> f64 {
    let total = existential_size + universal_size;
    if total == 0 {
        1.0
    } else {
        existential_size as f64 / total as f64
    }
}

/// Negation normal form split into top-level conjuncts.
pub fn normalize_conjuncts(formula: &Formula) -> Vec<Formula> {
    let mut out = Vec::new();
    split(formula.to_nnf(), &mut out);
    out
}

fn split(formula: Formula, out: &mut Vec<Formula>) {
    match formula {
        Formula::And(items) => {
            for item in items {
                split(item, out);
            }
        }
        Formula::Forall { var, domain, body } => {
            let mut inner = Vec::new();
            split(*body, &mut inner);
            for conjunct in inner {
                if conjunct.occurs_free(&var) {
                    out.push(Formula::forall(var.clone(), domain.clone(), conjunct));
                } else {
                    out.push(conjunct);
                }
            }
        }
        Formula::Exists { var, body, .. } if !body.occurs_free(&var) => split(*body, out),
        other => out.push(other),
    }
}

pub fn decompose(op: &Operation) -> Result<Decomposition, DecompositionError> {
    decompose_with(op, &mut Classifier::new(), &DecomposeOptions::default())
}

pub fn decompose_with(
    op: &Operation,
    classifier: &mut Classifier,
    options: &DecomposeOptions,
) -> Result<Decomposition, DecompositionError> {
    let conjuncts = normalize_conjuncts(&op.formula);

    let mut existential_conjuncts = Vec::new();
    let mut universal_conjuncts = Vec::new();
    for conjunct in &conjuncts {
        if classifier.verification(conjunct) == Verification::Existential {
            existential_conjuncts.push(conjunct.clone());
        } else {
            universal_conjuncts.push(conjunct.clone());
        }
    }

    let existential_size: usize = existential_conjuncts.iter().map(Formula::size).sum();
    let universal_size: usize = universal_conjuncts.iter().map(Formula::size).sum();
    let lifting = lifting_fraction(existential_size, universal_size);

    let existential = Formula::And(existential_conjuncts.clone());
    let universal = Formula::And(universal_conjuncts.clone());

    check_postconditions(
        op,
        &conjuncts,
        &existential_conjuncts,
        &universal_conjuncts,
        classifier,
        options,
    )?;

    let handoff: BTreeSet<String> = op.states_referenced_by(&universal);
    let liftable_states = op
        .states
        .keys()
        .filter(|s| !handoff.contains(*s))
        .cloned()
        .collect();
    let handoff_states = op
        .states
        .keys()
        .filter(|s| handoff.contains(*s))
        .cloned()
        .collect();
    let state_profiles = op
        .states
        .keys()
        .map(|s| (s.clone(), state_profile(op, s)))
        .collect();

    debug!(
        operation = %op.name,
        existential = existential_conjuncts.len(),
        universal = universal_conjuncts.len(),
        lifting,
        "decomposed operation"
    );

    Ok(Decomposition {
        operation: op.clone(),
        existential,
        universal,
        existential_conjuncts,
        universal_conjuncts,
        existential_size,
        universal_size,
        lifting,
        workload_lifting: None,
        liftable_states,
        handoff_states,
        state_profiles,
    })
}

fn check_postconditions(
    op: &Operation,
    conjuncts: &[Formula],
    existential: &[Formula],
    universal: &[Formula],
    classifier: &mut Classifier,
    options: &DecomposeOptions,
) -> Result<(), DecompositionError> {
    let mut expected: Vec<&Formula> = conjuncts.iter().collect();
    let mut actual: Vec<&Formula> = existential.iter().chain(universal).collect();
    expected.sort();
    actual.sort();
    if expected != actual {
        return Err(DecompositionError::InvariantViolation(
            "partition does not preserve the conjunct multiset".into(),
        ));
    }

    for conjunct in existential {
        if let Some(bad) = universal_subformula(conjunct, classifier) {
            return Err(DecompositionError::InvariantViolation(format!(
                "liftable part contains universal subformula {bad}"
            )));
        }
    }

    let recombined = Formula::And(existential.iter().chain(universal).cloned().collect());
    match check_equivalence(&recombined, &op.formula, &op.domains, options.max_equivalence_atoms)? {
        Equivalence::Equivalent => {}
        Equivalence::TooLarge { atoms } => {
            debug!(atoms, "skipping exhaustive equivalence check");
        }
        Equivalence::Counterexample(interpretation) => {
            let shown: Vec<String> = interpretation.iter().map(ToString::to_string).collect();
            return Err(DecompositionError::InvariantViolation(format!(
                "O_E and O_U together differ from the operation under {{{}}}",
                shown.join(", ")
            )));
        }
    }
    Ok(())
}

fn universal_subformula<'f>(formula: &'f Formula, classifier: &mut Classifier) -> Option<&'f Formula> {
    if classifier.verification(formula) == Verification::Universal {
        return Some(formula);
    }
    match formula {
        Formula::And(items) | Formula::Or(items) => {
            items.iter().find_map(|i| universal_subformula(i, classifier))
        }
        Formula::Not(inner) => universal_subformula(inner, classifier),
        Formula::Exists { body, .. } | Formula::Forall { body, .. } => {
            universal_subformula(body, classifier)
        }
        Formula::Atom(_) => None,
    }
}

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("Invalid workload JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported workload schema_version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },
    #[error("Workload names unknown update '{0}'")]
    UnknownUpdate(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadEntry {
    pub update: String,
    pub count: u64,
}

/// Observed update frequencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadTrace {
    pub schema_version: u32,
    pub entries: Vec<WorkloadEntry>,
}

impl WorkloadTrace {
    pub fn from_json(json: &str) -> Result<Self, WorkloadError> {
        let trace: WorkloadTrace = serde_json::from_str(json)?;
        if trace.schema_version != WORKLOAD_SCHEMA_VERSION {
            return Err(WorkloadError::SchemaVersion {
                found: trace.schema_version,
                expected: WORKLOAD_SCHEMA_VERSION,
            });
        }
        Ok(trace)
    }
}

/// Share of observed updates whose state is untouched by the residual.
///
/// Returns `None` when the trace records no updates at all.
pub fn workload_lifting(
    decomposition: &Decomposition,
    trace: &WorkloadTrace,
) -> Result<Option<f64>, WorkloadError> {
    let op = &decomposition.operation;
    // Counts are summed as u128 so no trace of u64 entries can overflow.
    let mut totals: BTreeMap<&str, u128> = BTreeMap::new();
    for entry in &trace.entries {
        if !op.updates.contains_key(&entry.update) {
            return Err(WorkloadError::UnknownUpdate(entry.update.clone()));
        }
        *totals.entry(entry.update.as_str()).or_default() += u128::from(entry.count);
    }
    let total: u128 = totals.values().sum();
    if total == 0 {
        warn!(operation = %op.name, "workload trace has no updates; L_workload undefined");
        return Ok(None);
    }
    let liftable: u128 = totals
        .iter()
        .filter(|(update, _)| {
            op.updates
                .get(**update)
                .is_some_and(|u| decomposition.liftable_states.contains(&u.state))
        })
        .map(|(_, count)| count)
        .sum();
    Ok(Some(liftable as f64 / total as f64))
}

impl Decomposition {
    /// Attach the workload-weighted fraction for `trace`.
    pub fn with_workload(mut self, trace: &WorkloadTrace) -> Result<Self, WorkloadError> {
        self.workload_lifting = workload_lifting(&self, trace)?;
        Ok(self)
    }
}
