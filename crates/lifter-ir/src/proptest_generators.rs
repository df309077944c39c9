//! Proptest strategies for generating well-formed formulas and operations.

use indexmap::IndexMap;
use proptest::prelude::*;

use crate::formula::{Atom, Formula};
use crate::operation::*;

/// Domains used by every generated formula: `d2` with two elements and
/// `d3` with three.
pub fn test_domains() -> Domains {
    let mut domains = Domains::new();
    domains.insert("d2".into(), vec!["a".into(), "b".into()]);
    domains.insert("d3".into(), vec!["a".into(), "b".into(), "c".into()]);
    domains
}

fn arb_leaf(predicates: Vec<&'static str>, args: Vec<&'static str>) -> impl Strategy<Value = Formula> {
    (
        prop::sample::select(predicates),
        prop::collection::vec(prop::sample::select(args), 0..=1),
        any::<bool>(),
    )
        .prop_map(|(p, args, negated)| {
            let atom = Formula::Atom(Atom::new(p, args.into_iter().map(String::from).collect()));
            if negated {
                Formula::negate(atom)
            } else {
                atom
            }
        })
}

fn arb_tree(leaf: BoxedStrategy<Formula>) -> impl Strategy<Value = Formula> {
    leaf.prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(Formula::And),
            prop::collection::vec(inner.clone(), 1..3).prop_map(Formula::Or),
            inner.clone().prop_map(Formula::negate),
            (
                prop::sample::select(vec!["x", "y"]),
                prop::sample::select(vec!["d2", "d3"]),
                inner.clone()
            )
                .prop_map(|(v, d, body)| Formula::exists(v, d, body)),
            (
                prop::sample::select(vec!["x", "y"]),
                prop::sample::select(vec!["d2", "d3"]),
                inner
            )
                .prop_map(|(v, d, body)| Formula::forall(v, d, body)),
        ]
    })
}

/// Small formulas over predicates `p`, `q` with at most one argument.
///
/// Arguments are `x`, `y` (usually bound) or the constant `k`; ground atom
/// counts stay low enough for exhaustive equivalence checks most of the time.
pub fn arb_formula() -> impl Strategy<Value = Formula> {
    arb_tree(arb_leaf(vec!["p", "q"], vec!["x", "y", "k"]).boxed())
}

/// Names of the replicated states declared by `arb_operation`.
pub const TEST_STATES: [&str; 4] = ["ctr", "items", "reg", "mtx"];

fn test_states() -> IndexMap<String, StateVar> {
    let decls = [
        ("ctr", StateKind::Counter, vec!["f1", "f2"]),
        ("items", StateKind::Set, vec![]),
        ("reg", StateKind::Register, vec![]),
        ("mtx", StateKind::Lock, vec![]),
    ];
    decls
        .into_iter()
        .map(|(name, kind, fields)| {
            (
                name.to_string(),
                StateVar {
                    name: name.to_string(),
                    kind,
                    fields: fields.into_iter().map(String::from).collect(),
                },
            )
        })
        .collect()
}

fn test_updates() -> IndexMap<String, Update> {
    let decls = [
        ("bump", "ctr", Effect::Increment),
        ("add", "items", Effect::Insert),
        ("drop", "items", Effect::Remove),
        ("put", "reg", Effect::Assign),
        ("take", "mtx", Effect::Acquire),
        ("give", "mtx", Effect::Release),
    ];
    decls
        .into_iter()
        .map(|(name, state, effect)| {
            (
                name.to_string(),
                Update {
                    name: name.to_string(),
                    state: state.to_string(),
                    effect,
                },
            )
        })
        .collect()
}

fn arb_state_atom() -> impl Strategy<Value = Formula> {
    (
        prop::sample::select(vec!["p0", "p1", "p2", "p3"]),
        prop::sample::select(TEST_STATES.to_vec()),
        prop::sample::select(vec!["x", "y", "k"]),
    )
        .prop_map(|(p, state, arg)| Formula::atom(p, &[state, arg]))
}

/// A well-formed operation with one state of each common kind, predicates
/// `p0..p3` of arbitrary kinds and a conjunction of 1 to 4 conjuncts whose
/// atoms mention those states.
pub fn arb_operation() -> impl Strategy<Value = Operation> {
    let conjunct = arb_tree(arb_state_atom().boxed());
    (
        prop::collection::vec(conjunct, 1..=4),
        prop::collection::vec(prop::sample::select(PredicateKind::ALL.to_vec()), 4),
    )
        .prop_map(|(conjuncts, kinds)| {
            let mut op = Operation::new("generated", Formula::And(conjuncts));
            op.domains = test_domains();
            op.states = test_states();
            op.updates = test_updates();
            for (i, kind) in kinds.into_iter().enumerate() {
                op.predicates.insert(format!("p{i}"), kind);
            }
            op
        })
}
