//! Restructuring catalog.
//!
//! Operators are pure rewrites of an [`Operation`]. Each one recognizes
//! atoms of a given predicate kind over states of given kinds, and rewrites
//! every residual conjunct containing such an atom into an existential
//! form, converting the touched states to a kind whose merge commutes.
//! A conjunct is left alone when a flipped binder would also scope over an
//! atom the operator does not match, unless that atom is local.
//! The catalog is an immutable, versioned value passed into each call.

mod crdt;
mod structural;
mod weakening;

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use lifter_ir::operation::StateVar;
use lifter_ir::{Atom, Formula, Operation, PredicateKind, StateKind};

use crate::classify::{Classifier, Verification};
use crate::decompose::normalize_conjuncts;
use crate::requirements::{Blocker, Consistency, Requirements};

pub use crdt::{crdt_lww_register, crdt_max_register, crdt_or_set, crdt_pn_counter};
pub use structural::{escrow_bound, SplitCompoundCounter};
pub use weakening::{weaken_to_causal_snapshot, weaken_to_eventual, FencingToken, TOKEN_MONOTONIC};

/// Version of [`Catalog::standard`].
pub const STANDARD_CATALOG_VERSION: u32 = 1;

/// Operator families, in canonical application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Weakening,
    Structural,
    Crdt,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Weakening => "weakening",
            Category::Structural => "structural",
            Category::Crdt => "crdt",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A semantics-reducing rewrite of an operation.
pub trait RestructuringOperator: Send + Sync + fmt::Debug {
    fn id(&self) -> &'static str;

    /// Ids of the more general operators this one is a special case of.
    /// Forbidding any of them forbids this operator too.
    fn refines(&self) -> &'static [&'static str] {
        &[]
    }

    fn category(&self) -> Category;

    /// Loss of guarantee strength. Documented per operator, never derived.
    fn semantic_cost(&self) -> f64;

    /// Strongest consistency the rewritten operation still provides.
    fn consistency(&self) -> Consistency;

    fn description(&self) -> &'static str;

    /// Whether `atom`, appearing in a residual conjunct of `op`, is rewritten.
    fn matches(&self, op: &Operation, atom: &Atom) -> bool;

    fn is_applicable(&self, op: &Operation) -> bool {
        let matches = |a: &Atom| self.matches(op, a);
        residual_conjuncts(op).iter().any(|c| rewrites(op, c, &matches))
    }

    /// Rewrite every residual conjunct `rewrites` accepts.
    fn apply(&self, op: &Operation) -> Operation;

    /// First requirement this operator would violate after `spent` has
    /// already been incurred.
    fn preserves(&self, requirements: &Requirements, spent: f64) -> Result<(), Blocker> {
        requirements.admit(self, spent)
    }
}

/// Immutable, versioned operator list.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub version: u32,
    pub operators: Vec<Arc<dyn RestructuringOperator>>,
}

impl Catalog {
    pub fn standard() -> Self {
        let operators: Vec<Arc<dyn RestructuringOperator>> = vec![
            Arc::new(FencingToken),
            Arc::new(weaken_to_causal_snapshot()),
            Arc::new(weaken_to_eventual()),
            Arc::new(SplitCompoundCounter),
            Arc::new(escrow_bound()),
            Arc::new(crdt_pn_counter()),
            Arc::new(crdt_max_register()),
            Arc::new(crdt_or_set()),
            Arc::new(crdt_lww_register()),
        ];
        Self {
            version: STANDARD_CATALOG_VERSION,
            operators,
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn RestructuringOperator>> {
        self.operators.iter().find(|op| op.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn describe(&self) -> Vec<OperatorInfo> {
        self.operators.iter().map(|op| OperatorInfo::of(op.as_ref())).collect()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Serializable summary of one operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorInfo {
    pub id: &'static str,
    pub refines: &'static [&'static str],
    pub category: Category,
    pub semantic_cost: f64,
    pub consistency: Consistency,
    pub description: &'static str,
}

impl OperatorInfo {
    pub fn of<O: RestructuringOperator + ?Sized>(op: &O) -> Self {
        Self {
            id: op.id(),
            refines: op.refines(),
            category: op.category(),
            semantic_cost: op.semantic_cost(),
            consistency: op.consistency(),
            description: op.description(),
        }
    }
}

/// An operator that renames matched atoms, existentializes the conjuncts
/// containing them and converts the states they mention.
#[derive(Debug)]
pub struct Conversion {
    pub(crate) id: &'static str,
    pub(crate) refines: &'static [&'static str],
    pub(crate) category: Category,
    pub(crate) cost: f64,
    pub(crate) consistency: Consistency,
    pub(crate) description: &'static str,
    pub(crate) kinds: &'static [PredicateKind],
    /// Prefix for the renamed predicate, joined with `-`.
    pub(crate) prefix: &'static str,
    /// Whether an atom over a state of this kind (or over no state) matches.
    pub(crate) accepts: fn(Option<&StateKind>) -> bool,
    pub(crate) convert: fn(&StateKind) -> StateKind,
    /// Converted kind whose update pattern must be known to commute.
    pub(crate) requires_commutative: bool,
}

impl RestructuringOperator for Conversion {
    fn id(&self) -> &'static str {
        self.id
    }

    fn refines(&self) -> &'static [&'static str] {
        self.refines
    }

    fn category(&self) -> Category {
        self.category
    }

    fn semantic_cost(&self) -> f64 {
        self.cost
    }

    fn consistency(&self) -> Consistency {
        self.consistency
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn matches(&self, op: &Operation, atom: &Atom) -> bool {
        if !self.kinds.contains(&op.predicate_kind(&atom.predicate)) {
            return false;
        }
        let state = state_of(op, atom);
        if !(self.accepts)(state.map(|s| &s.kind)) {
            return false;
        }
        match state {
            Some(state) if self.requires_commutative => {
                let target = (self.convert)(&state.kind);
                crate::commutativity::pattern_profile(&target, &op.effects_on(&state.name))
                    .commutative
                    .is_true()
            }
            _ => true,
        }
    }

    fn apply(&self, op: &Operation) -> Operation {
        let matches = |a: &Atom| self.matches(op, a);
        let rename = |a: &Atom| {
            Formula::Atom(Atom::new(
                format!("{}-{}", self.prefix, a.predicate),
                a.args.clone(),
            ))
        };
        let rewritten = rewrite_residual(op, &matches, &mut |c: &Formula| {
            vec![existentialize(c, &matches, &rename)]
        });
        rewritten.finish(op, self.convert, |_| PredicateKind::Local)
    }
}

/// The declared state an atom is about: its first argument naming a state.
pub(crate) fn state_of<'a>(op: &'a Operation, atom: &Atom) -> Option<&'a StateVar> {
    atom.args.iter().find_map(|arg| op.state(arg))
}

pub(crate) fn counter_like(kind: Option<&StateKind>) -> bool {
    kind.is_some_and(StateKind::is_counter_like)
}

pub(crate) fn to_pn_counter(kind: &StateKind) -> StateKind {
    match kind {
        StateKind::Counter => StateKind::PnCounter,
        other => other.clone(),
    }
}

/// Normalized conjuncts of `op` that are not existential.
pub(crate) fn residual_conjuncts(op: &Operation) -> Vec<Formula> {
    let mut classifier = Classifier::new();
    normalize_conjuncts(&op.formula)
        .into_iter()
        .filter(|c| classifier.verification(c) != Verification::Existential)
        .collect()
}

/// Whether an operator matching `matches` may rewrite `conjunct`: it holds
/// a matched atom, and every `forall` scoping over a matched atom scopes
/// only over matched or local atoms. Flipping such a binder to `exists`
/// must not weaken an obligation the operator does not own.
pub(crate) fn rewrites(op: &Operation, conjunct: &Formula, matches: &dyn Fn(&Atom) -> bool) -> bool {
    conjunct.atoms().into_iter().any(matches) && binders_owned(op, conjunct, matches)
}

fn binders_owned(op: &Operation, formula: &Formula, matches: &dyn Fn(&Atom) -> bool) -> bool {
    match formula {
        Formula::Atom(_) => true,
        Formula::Not(inner) => binders_owned(op, inner, matches),
        Formula::And(items) | Formula::Or(items) => {
            items.iter().all(|f| binders_owned(op, f, matches))
        }
        Formula::Exists { body, .. } => binders_owned(op, body, matches),
        Formula::Forall { body, .. } => {
            let atoms = body.atoms();
            // Nested binders only see a subset of these atoms.
            !atoms.iter().any(|&a| matches(a))
                || atoms
                    .into_iter()
                    .all(|a| matches(a) || op.predicate_kind(&a.predicate) == PredicateKind::Local)
        }
    }
}

/// Rewrite a conjunct in negation normal form: matched atoms go through
/// `transform`, and every `forall` scoping over a matched atom becomes an
/// `exists`.
pub(crate) fn existentialize(
    formula: &Formula,
    matches: &dyn Fn(&Atom) -> bool,
    transform: &dyn Fn(&Atom) -> Formula,
) -> Formula {
    let recur = |f: &Formula| existentialize(f, matches, transform);
    match formula {
        Formula::Atom(atom) if matches(atom) => transform(atom),
        Formula::Atom(_) => formula.clone(),
        Formula::Not(inner) => Formula::negate(recur(inner)),
        Formula::And(items) => Formula::And(items.iter().map(recur).collect()),
        Formula::Or(items) => Formula::Or(items.iter().map(recur).collect()),
        Formula::Exists { var, domain, body } => {
            Formula::exists(var.clone(), domain.clone(), recur(body))
        }
        Formula::Forall { var, domain, body } => {
            if body.atoms().into_iter().any(matches) {
                Formula::exists(var.clone(), domain.clone(), recur(body))
            } else {
                Formula::forall(var.clone(), domain.clone(), recur(body))
            }
        }
    }
}

pub(crate) struct Rewritten {
    conjuncts: Vec<Formula>,
    touched_states: BTreeSet<String>,
}

/// Replace each residual conjunct `rewrites` accepts by `emit(c)`. Other
/// conjuncts are kept in place.
pub(crate) fn rewrite_residual(
    op: &Operation,
    matches: &dyn Fn(&Atom) -> bool,
    emit: &mut dyn FnMut(&Formula) -> Vec<Formula>,
) -> Rewritten {
    let mut classifier = Classifier::new();
    let mut conjuncts = Vec::new();
    let mut touched_states = BTreeSet::new();
    for conjunct in normalize_conjuncts(&op.formula) {
        let touched: Vec<String> = conjunct
            .atoms()
            .into_iter()
            .filter(|&a| matches(a))
            .filter_map(|a| state_of(op, a).map(|s| s.name.clone()))
            .collect();
        if !rewrites(op, &conjunct, matches)
            || classifier.verification(&conjunct) == Verification::Existential
        {
            conjuncts.push(conjunct);
            continue;
        }
        touched_states.extend(touched);
        conjuncts.extend(emit(&conjunct));
    }
    Rewritten {
        conjuncts,
        touched_states,
    }
}

impl Rewritten {
    /// Build the rewritten operation: convert touched states and declare
    /// every predicate the rewrite introduced.
    pub(crate) fn finish(
        self,
        before: &Operation,
        convert: fn(&StateKind) -> StateKind,
        kind_of: impl Fn(&str) -> PredicateKind,
    ) -> Operation {
        let mut after = before.with_formula(Formula::And(self.conjuncts));
        for name in &self.touched_states {
            if let Some(state) = after.states.get_mut(name) {
                state.kind = convert(&state.kind);
            }
        }
        let known = before.formula.predicates();
        let introduced: Vec<String> = after
            .formula
            .predicates()
            .into_iter()
            .filter(|p| !known.contains(p) && !before.predicates.contains_key(*p))
            .map(String::from)
            .collect();
        for name in introduced {
            let kind = kind_of(&name);
            after.predicates.insert(name, kind);
        }
        after
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lifter_ir::operation::{Effect, Update};

    pub(crate) fn with_state(mut op: Operation, name: &str, kind: StateKind, effects: &[Effect]) -> Operation {
        op.states.insert(
            name.into(),
            StateVar {
                name: name.into(),
                kind,
                fields: Vec::new(),
            },
        );
        for (i, effect) in effects.iter().enumerate() {
            let update = format!("{name}-u{i}");
            op.updates.insert(
                update.clone(),
                Update {
                    name: update,
                    state: name.into(),
                    effect: effect.clone(),
                },
            );
        }
        op
    }

    fn snapshot_op() -> Operation {
        let formula = Formula::And(vec![
            Formula::exists("r", "replica", Formula::atom("seen", &["log", "r"])),
            Formula::forall("r", "replica", Formula::atom("fresh", &["log", "r"])),
        ]);
        let mut op = Operation::new("snap", formula);
        op.domains.insert("replica".into(), vec!["r1".into(), "r2".into()]);
        op.predicates.insert("fresh".into(), PredicateKind::Snapshot);
        with_state(op, "log", StateKind::Register, &[Effect::Assign])
    }

    #[test]
    fn standard_catalog_has_unique_ids() {
        let catalog = Catalog::standard();
        let ids: BTreeSet<&str> = catalog.operators.iter().map(|o| o.id()).collect();
        assert_eq!(ids.len(), catalog.len());
        assert_eq!(catalog.version, STANDARD_CATALOG_VERSION);
        assert!(catalog.get("crdt_or_set").is_some());
        assert!(catalog.get("crdt_g_counter").is_none());
    }

    #[test]
    fn existentialize_only_flips_quantifiers_over_matches() {
        let f = Formula::And(vec![
            Formula::forall("x", "d", Formula::atom("hit", &["x"])),
            Formula::forall("y", "d", Formula::atom("miss", &["y"])),
        ]);
        let matches = |a: &Atom| a.predicate == "hit";
        let rename = |a: &Atom| Formula::Atom(Atom::new("renamed", a.args.clone()));
        let out = existentialize(&f, &matches, &rename);
        assert_eq!(
            out,
            Formula::And(vec![
                Formula::exists("x", "d", Formula::atom("renamed", &["x"])),
                Formula::forall("y", "d", Formula::atom("miss", &["y"])),
            ])
        );
    }

    #[test]
    fn conversion_rewrites_only_residual_conjuncts() {
        let op = snapshot_op();
        let causal = weaken_to_causal_snapshot();
        assert!(causal.is_applicable(&op));
        let out = causal.apply(&op);
        assert_eq!(
            out.formula,
            Formula::And(vec![
                Formula::exists("r", "replica", Formula::atom("seen", &["log", "r"])),
                Formula::exists("r", "replica", Formula::atom("causal-fresh", &["log", "r"])),
            ])
        );
        assert_eq!(out.predicate_kind("causal-fresh"), PredicateKind::Local);
        assert!(!causal.is_applicable(&out));
    }

    fn mixed_exclusion(other: &str, other_kind: PredicateKind) -> Operation {
        let formula = Formula::forall(
            "t",
            "time",
            Formula::Or(vec![
                Formula::atom("one-holder", &["holder", "t"]),
                Formula::atom(other, &["leader", "t"]),
            ]),
        );
        let mut op = Operation::new("mixed", formula);
        op.domains.insert("time".into(), vec!["t0".into(), "t1".into()]);
        op.predicates.insert("one-holder".into(), PredicateKind::Exclusion);
        op.predicates.insert(other.into(), other_kind);
        let op = with_state(op, "holder", StateKind::Lock, &[Effect::Acquire]);
        with_state(op, "leader", StateKind::Register, &[Effect::Assign])
    }

    #[test]
    fn agreement_atoms_keep_their_binder_universal() {
        let op = mixed_exclusion("same-leader", PredicateKind::Agreement);
        assert!(!FencingToken.is_applicable(&op));
        let out = FencingToken.apply(&op);
        assert_eq!(out.states["holder"].kind, StateKind::Lock);
        assert_eq!(crate::decompose::decompose(&out).unwrap().lifting, 0.0);
        assert!(Catalog::standard()
            .operators
            .iter()
            .all(|o| !o.is_applicable(&op)));
    }

    #[test]
    fn local_atoms_may_share_a_flipped_binder() {
        let op = mixed_exclusion("observed", PredicateKind::Local);
        assert!(FencingToken.is_applicable(&op));
        let out = FencingToken.apply(&op);
        assert_eq!(out.states["holder"].kind, StateKind::FencedLock);
        assert_eq!(
            out.formula,
            Formula::And(vec![
                Formula::exists(
                    "t",
                    "time",
                    Formula::Or(vec![
                        Formula::atom("fenced-one-holder", &["holder", "t"]),
                        Formula::atom("observed", &["leader", "t"]),
                    ])
                ),
                Formula::forall(
                    "t",
                    "time",
                    Formula::Or(vec![
                        Formula::atom(TOKEN_MONOTONIC, &["holder", "t"]),
                        Formula::atom("observed", &["leader", "t"]),
                    ])
                ),
            ])
        );
    }

    #[test]
    fn existential_occurrences_are_left_alone() {
        let formula = Formula::exists("r", "replica", Formula::atom("fresh", &["log", "r"]));
        let mut op = snapshot_op();
        op.formula = formula;
        assert!(!weaken_to_causal_snapshot().is_applicable(&op));
    }

    #[test]
    fn describe_lists_every_operator() {
        let info = Catalog::standard().describe();
        let fencing = info
            .iter()
            .find(|i| i.id == "weaken_to_fencing_token")
            .unwrap();
        assert_eq!(fencing.refines, &["weaken_to_eventual"]);
        assert_eq!(fencing.category, Category::Weakening);
        assert_eq!(info.len(), 9);
    }
}
