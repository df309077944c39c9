use indexmap::IndexMap;
use serde::Serialize;

use lifter_ir::Formula;

use crate::catalog::{Catalog, OperatorInfo};
use crate::classify::{Classifier, Verification};
use crate::commutativity::AlgebraicProfile;
use crate::decompose::{normalize_conjuncts, Decomposition};
use crate::requirements::Blocker;
use crate::synthesis::{Outcome, RestructuringTrace, Synthesis};

/// JSON schema version for every report below.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct ConjunctReport {
    pub formula: String,
    pub verification: Verification,
}

/// Classification of an operation's formula and of each normalized conjunct.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyReport {
    pub schema_version: u32,
    pub operation: String,
    pub verification: Verification,
    /// Binders a witness assigns, when the formula is existential.
    pub witness_binders: Option<Vec<(String, String)>>,
    pub conjuncts: Vec<ConjunctReport>,
}

impl ClassifyReport {
    pub fn new(operation: &str, formula: &Formula) -> Self {
        let mut classifier = Classifier::new();
        let certificate = classifier.classify(formula);
        let conjuncts = normalize_conjuncts(formula)
            .into_iter()
            .map(|c| ConjunctReport {
                verification: classifier.verification(&c),
                formula: c.to_string(),
            })
            .collect();
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            operation: operation.to_string(),
            verification: certificate.verification,
            witness_binders: certificate.witness.map(|w| w.binders().to_vec()),
            conjuncts,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecompositionReport {
    pub schema_version: u32,
    pub operation: String,
    pub spec_hash: String,
    pub lifting: f64,
    pub workload_lifting: Option<f64>,
    pub existential: String,
    pub universal: String,
    pub existential_conjuncts: Vec<String>,
    pub universal_conjuncts: Vec<String>,
    pub existential_size: usize,
    pub universal_size: usize,
    pub liftable_states: Vec<String>,
    pub handoff_states: Vec<String>,
    pub state_profiles: IndexMap<String, AlgebraicProfile>,
}

impl DecompositionReport {
    pub fn new(d: &Decomposition) -> Self {
        let render = |fs: &[Formula]| fs.iter().map(ToString::to_string).collect();
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            operation: d.operation.name.clone(),
            spec_hash: d.operation.structural_hash().to_hex(),
            lifting: d.lifting,
            workload_lifting: d.workload_lifting,
            existential: d.existential.to_string(),
            universal: d.universal.to_string(),
            existential_conjuncts: render(&d.existential_conjuncts),
            universal_conjuncts: render(&d.universal_conjuncts),
            existential_size: d.existential_size,
            universal_size: d.universal_size,
            liftable_states: d.liftable_states.clone(),
            handoff_states: d.handoff_states.clone(),
            state_profiles: d.state_profiles.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisReport {
    pub schema_version: u32,
    pub operation: String,
    pub verdict: &'static str,
    pub outcome: Outcome,
    pub target: f64,
    pub initial_lifting: f64,
    pub final_lifting: f64,
    pub trace: RestructuringTrace,
    pub total_cost: f64,
    pub blocked: Vec<Blocker>,
    pub diagnostics: Vec<String>,
    pub decomposition: DecompositionReport,
}

impl SynthesisReport {
    pub fn new(s: &Synthesis) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            operation: s.operation.name.clone(),
            verdict: s.verdict_class(),
            outcome: s.outcome.clone(),
            target: s.target,
            initial_lifting: s.initial.lifting,
            final_lifting: s.decomposition.lifting,
            trace: s.trace.clone(),
            total_cost: s.total_cost,
            blocked: s.blocked.clone(),
            diagnostics: s.diagnostics.clone(),
            decomposition: DecompositionReport::new(&s.decomposition),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogReport {
    pub schema_version: u32,
    pub version: u32,
    pub operators: Vec<OperatorInfo>,
}

impl CatalogReport {
    pub fn new(catalog: &Catalog) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            version: catalog.version,
            operators: crate::sequencer::canonical_order(catalog)
                .iter()
                .map(|op| OperatorInfo::of(op.as_ref()))
                .collect(),
        }
    }
}
