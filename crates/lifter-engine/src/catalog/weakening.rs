//! Consistency weakenings: trade a strict guarantee for one a replica can
//! witness locally.

use lifter_ir::{Atom, Formula, Operation, PredicateKind, StateKind};

use super::{
    existentialize, rewrite_residual, state_of, Category, Conversion, RestructuringOperator,
};
use crate::requirements::Consistency;

/// Predicate introduced by [`FencingToken`] for the monotone token order.
pub const TOKEN_MONOTONIC: &str = "token-monotonic";

/// Strict exclusion on a lock becomes exclusion among holders of the
/// highest fencing token. Each holder can show its own token; that tokens
/// only grow remains a residual obligation.
#[derive(Debug, Clone, Copy)]
pub struct FencingToken;

impl RestructuringOperator for FencingToken {
    fn id(&self) -> &'static str {
        "weaken_to_fencing_token"
    }

    fn refines(&self) -> &'static [&'static str] {
        &["weaken_to_eventual"]
    }

    fn category(&self) -> Category {
        Category::Weakening
    }

    fn semantic_cost(&self) -> f64 {
        1.0
    }

    fn consistency(&self) -> Consistency {
        Consistency::Causal
    }

    fn description(&self) -> &'static str {
        "strict exclusion on a lock becomes fencing-token exclusion"
    }

    fn matches(&self, op: &Operation, atom: &Atom) -> bool {
        op.predicate_kind(&atom.predicate) == PredicateKind::Exclusion
            && state_of(op, atom).is_some_and(|s| s.kind == StateKind::Lock)
    }

    fn apply(&self, op: &Operation) -> Operation {
        let matches = |a: &Atom| self.matches(op, a);
        let fenced = |a: &Atom| Formula::Atom(Atom::new(format!("fenced-{}", a.predicate), a.args.clone()));
        let rewritten = rewrite_residual(op, &matches, &mut |c: &Formula| {
            let token = c.map_atoms(&mut |a| {
                if matches(a) {
                    Formula::Atom(Atom::new(TOKEN_MONOTONIC, a.args.clone()))
                } else {
                    Formula::Atom(a.clone())
                }
            });
            vec![existentialize(c, &matches, &fenced), token]
        });
        rewritten.finish(op, to_fenced_lock, |p| {
            if p == TOKEN_MONOTONIC {
                PredicateKind::Monotonic
            } else {
                PredicateKind::Local
            }
        })
    }
}

fn to_fenced_lock(kind: &StateKind) -> StateKind {
    match kind {
        StateKind::Lock => StateKind::FencedLock,
        other => other.clone(),
    }
}

fn any_state(_: Option<&StateKind>) -> bool {
    true
}

fn unchanged(kind: &StateKind) -> StateKind {
    kind.clone()
}

/// Reads observe a causally consistent snapshot instead of every write.
pub fn weaken_to_causal_snapshot() -> Conversion {
    Conversion {
        id: "weaken_to_causal_snapshot",
        refines: &["weaken_to_eventual"],
        category: Category::Weakening,
        cost: 1.5,
        consistency: Consistency::Causal,
        description: "snapshot reads become causal-snapshot reads",
        kinds: &[PredicateKind::Snapshot],
        prefix: "causal",
        accepts: any_state,
        convert: unchanged,
        requires_commutative: false,
    }
}

/// Locks belong to the fencing-token refinement and counters to escrow.
fn eventual_accepts(kind: Option<&StateKind>) -> bool {
    !matches!(kind, Some(k) if *k == StateKind::Lock || k.is_counter_like())
}

/// The most general weakening: the guarantee holds once updates stop.
///
/// Only fires for obligations no cheaper operator covers.
pub fn weaken_to_eventual() -> Conversion {
    Conversion {
        id: "weaken_to_eventual",
        refines: &[],
        category: Category::Weakening,
        cost: 4.0,
        consistency: Consistency::Eventual,
        description: "exclusion, snapshot and bound obligations hold eventually",
        kinds: &[PredicateKind::Exclusion, PredicateKind::Snapshot, PredicateKind::Bound],
        prefix: "eventually",
        accepts: eventual_accepts,
        convert: unchanged,
        requires_commutative: false,
    }
}
