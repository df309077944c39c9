use lifter_engine::catalog::Catalog;
use lifter_engine::requirements::{Consistency, Requirements};
use lifter_engine::synthesis::{
    optimal_plan, synthesize, verify_trace, Outcome, SynthesisOptions,
};
use lifter_ir::proptest_generators::{arb_operation, TEST_STATES};
use lifter_ir::{Formula, Operation};
use proptest::prelude::*;

/// One conjunct whose atoms all share a single predicate and state.
fn arb_single_pair_conjunct() -> impl Strategy<Value = Formula> {
    (
        prop::sample::select(vec!["p0", "p1", "p2", "p3"]),
        prop::sample::select(TEST_STATES.to_vec()),
    )
        .prop_flat_map(|(p, state)| {
            let leaf = (prop::sample::select(vec!["x", "y", "k"]), any::<bool>()).prop_map(
                move |(arg, negated)| {
                    let atom = Formula::atom(p, &[state, arg]);
                    if negated {
                        Formula::negate(atom)
                    } else {
                        atom
                    }
                },
            );
            leaf.prop_recursive(3, 12, 2, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 1..3).prop_map(Formula::And),
                    prop::collection::vec(inner.clone(), 1..3).prop_map(Formula::Or),
                    (prop::sample::select(vec!["x", "y"]), inner.clone())
                        .prop_map(|(v, body)| Formula::exists(v, "d2", body)),
                    (prop::sample::select(vec!["x", "y"]), inner)
                        .prop_map(|(v, body)| Formula::forall(v, "d2", body)),
                ]
            })
        })
}

/// `arb_operation` with its formula replaced by single-pair conjuncts.
fn arb_single_pair_operation() -> impl Strategy<Value = Operation> {
    (
        arb_operation(),
        prop::collection::vec(arb_single_pair_conjunct(), 1..=3),
    )
        .prop_map(|(mut op, conjuncts)| {
            op.formula = Formula::And(conjuncts);
            op
        })
}

/// Requirements over the standard catalog: a few forbidden ids, any
/// consistency floor and optional cost limits around typical plan costs.
fn arb_requirements() -> impl Strategy<Value = Requirements> {
    let ids: Vec<&'static str> = Catalog::standard().operators.iter().map(|o| o.id()).collect();
    (
        prop::collection::btree_set(prop::sample::select(ids), 0..3),
        prop::sample::select(Consistency::ALL.to_vec()),
        prop::option::of(0.0f64..6.0),
        prop::option::of(0.0f64..6.0),
    )
        .prop_map(|(forbidden, min_consistency, max_semantic_cost, budget)| Requirements {
            forbidden: forbidden.into_iter().map(String::from).collect(),
            min_consistency,
            max_semantic_cost,
            budget,
        })
}

fn options() -> SynthesisOptions {
    SynthesisOptions::default()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lifting_rises_along_every_trace(
        op in arb_operation(),
        requirements in arb_requirements(),
        target in 0.0f64..=1.0,
    ) {
        let s = synthesize(&op, &Catalog::standard(), &requirements, target, &options()).unwrap();
        let mut previous = s.initial.lifting;
        for step in s.trace.steps() {
            prop_assert_eq!(step.lifting_before, previous);
            prop_assert!(step.lifting_after > step.lifting_before);
            previous = step.lifting_after;
        }
        prop_assert_eq!(previous, s.decomposition.lifting);
        if s.outcome == Outcome::Reached || s.outcome == Outcome::AlreadySatisfied {
            prop_assert!(s.decomposition.lifting >= target);
        }
    }

    #[test]
    fn every_trace_replays(op in arb_operation(), target in 0.0f64..=1.0) {
        let catalog = Catalog::standard();
        let requirements = Requirements::default();
        let s = synthesize(&op, &catalog, &requirements, target, &options()).unwrap();
        prop_assert!(verify_trace(&op, &s, &catalog, &requirements, &options()).is_ok());
        prop_assert!((s.total_cost - s.trace.total_cost()).abs() < 1e-9);
    }

    #[test]
    fn every_step_respects_the_requirements(
        op in arb_operation(),
        requirements in arb_requirements(),
        target in 0.0f64..=1.0,
    ) {
        let catalog = Catalog::standard();
        let s = synthesize(&op, &catalog, &requirements, target, &options()).unwrap();
        prop_assert!(verify_trace(&op, &s, &catalog, &requirements, &options()).is_ok());
        let mut spent = 0.0;
        for step in s.trace.steps() {
            let operator = catalog.get(&step.operator).unwrap();
            prop_assert!(!requirements.forbidden.contains(operator.id()));
            prop_assert!(operator.refines().iter().all(|r| !requirements.forbidden.contains(*r)));
            prop_assert!(operator.consistency() >= requirements.min_consistency);
            spent += step.cost;
            if let Some(limit) = requirements.max_semantic_cost {
                prop_assert!(spent <= limit, "spent {} over ceiling {}", spent, limit);
            }
            if let Some(limit) = requirements.budget {
                prop_assert!(spent <= limit, "spent {} over budget {}", spent, limit);
            }
        }
        prop_assert!((s.total_cost - spent).abs() < 1e-9);
    }

    #[test]
    fn synthesis_finds_a_plan_whenever_one_exists(
        op in arb_single_pair_operation(),
        requirements in arb_requirements(),
        target in 0.0f64..=1.0,
    ) {
        let catalog = Catalog::standard();
        let optimal = optimal_plan(&op, &catalog, &requirements, target, &options()).unwrap();
        let s = synthesize(&op, &catalog, &requirements, target, &options()).unwrap();
        if let Some(plan) = optimal {
            prop_assert!(
                s.is_success(),
                "synthesis failed with {} on {} while {:?} reaches {}",
                s.outcome,
                op.formula,
                plan.operators,
                target
            );
        }
    }

    #[test]
    fn synthesis_cost_is_within_twice_optimal(
        op in arb_single_pair_operation(),
        requirements in arb_requirements(),
        target in 0.0f64..=1.0,
    ) {
        let catalog = Catalog::standard();
        let s = synthesize(&op, &catalog, &requirements, target, &options()).unwrap();
        if let Some(plan) = optimal_plan(&op, &catalog, &requirements, target, &options()).unwrap() {
            prop_assert!(
                s.total_cost <= 2.0 * plan.cost + 1e-9,
                "synthesis {:?} cost {} vs optimal {:?} cost {}",
                s.trace.operators(),
                s.total_cost,
                plan.operators,
                plan.cost
            );
        }
    }
}
