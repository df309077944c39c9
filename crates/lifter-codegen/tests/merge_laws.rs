//! Every merge lattice is a join-semilattice over the values its updates
//! can reach from bottom.

mod common;

use proptest::prelude::*;

use lifter_codegen::lattice::LatticeValue;
use lifter_codegen::merge::{merge_fn_for, Delta, MergeFn};
use lifter_ir::operation::Effect;

const REPLICAS: [&str; 3] = ["r1", "r2", "r3"];

type Move = (Effect, Option<&'static str>);

fn lattices() -> Vec<(MergeFn, Vec<Move>)> {
    let phase = merge_fn_for(&common::load_operation("session.lift"), "phase")
        .unwrap_or_else(|e| panic!("session phase: {e}"));
    let each = |effects: &[Effect], args: &[&'static str]| -> Vec<Move> {
        effects
            .iter()
            .flat_map(|e| args.iter().map(move |a| (e.clone(), Some(*a))))
            .collect()
    };
    let elements = ["a", "b", "c"];
    vec![
        (MergeFn::VectorSum, vec![(Effect::Increment, None)]),
        (
            MergeFn::PnVectorSum,
            vec![(Effect::Increment, None), (Effect::Decrement, None)],
        ),
        (
            MergeFn::FieldVectorSum {
                fields: vec!["lines".into(), "units".into()],
            },
            each(&[Effect::Increment, Effect::Decrement], &["lines", "units"]),
        ),
        (MergeFn::SetUnion, each(&[Effect::Insert], &elements)),
        (
            MergeFn::ObservedRemoveSet,
            each(&[Effect::Insert, Effect::Remove], &elements),
        ),
        (MergeFn::LwwRegister, each(&[Effect::Assign], &elements)),
        (MergeFn::MaxRegister, each(&[Effect::Assign], &["1", "5", "9"])),
        (
            MergeFn::TokenMax,
            vec![(Effect::Acquire, None), (Effect::Release, None)],
        ),
        (MergeFn::GraphUnion, {
            let mut moves = each(&[Effect::AddVertex], &elements);
            moves.extend(each(&[Effect::AddEdge], &["a->b", "b->c", "c->a"]));
            moves
        }),
        (MergeFn::FlagOr, vec![(Effect::Enable, None)]),
        (
            phase,
            vec![
                (Effect::Input("start".into()), None),
                (Effect::Input("stop".into()), None),
            ],
        ),
        (
            MergeFn::GeneratorSet {
                algebra: "flags".into(),
                generators: vec!["g1".into(), "g2".into()],
            },
            vec![
                (Effect::Input("g1".into()), None),
                (Effect::Input("g2".into()), None),
            ],
        ),
    ]
}

fn arb_steps() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..REPLICAS.len(), 0..16usize), 0..8)
}

/// Apply `steps` from bottom. Each step picks a replica and a move.
fn reach(f: &MergeFn, moves: &[Move], steps: &[(usize, usize)]) -> LatticeValue {
    let mut value = f.bottom();
    for (i, (replica, pick)) in steps.iter().enumerate() {
        let (effect, argument) = &moves[pick % moves.len()];
        let delta = Delta {
            replica: REPLICAS[*replica],
            clock: i as u64 + 1,
            effect,
            argument: *argument,
        };
        value = f
            .apply(&value, delta)
            .unwrap_or_else(|e| panic!("{} rejected {effect}: {e}", f.lattice()));
    }
    value
}

fn pick(k: usize) -> (MergeFn, Vec<Move>) {
    let mut all = lattices();
    let n = all.len();
    all.swap_remove(k % n)
}

proptest! {
    #[test]
    fn join_is_commutative(k in 0..12usize, a in arb_steps(), b in arb_steps()) {
        let (f, moves) = pick(k);
        let (x, y) = (reach(&f, &moves, &a), reach(&f, &moves, &b));
        prop_assert_eq!(f.join(&x, &y).unwrap(), f.join(&y, &x).unwrap());
    }

    #[test]
    fn join_is_associative(
        k in 0..12usize,
        a in arb_steps(),
        b in arb_steps(),
        c in arb_steps(),
    ) {
        let (f, moves) = pick(k);
        let (x, y, z) = (reach(&f, &moves, &a), reach(&f, &moves, &b), reach(&f, &moves, &c));
        let left = f.join(&f.join(&x, &y).unwrap(), &z).unwrap();
        let right = f.join(&x, &f.join(&y, &z).unwrap()).unwrap();
        prop_assert_eq!(left, right);
    }

    #[test]
    fn join_is_idempotent_with_bottom_as_identity(k in 0..12usize, a in arb_steps()) {
        let (f, moves) = pick(k);
        let x = reach(&f, &moves, &a);
        prop_assert_eq!(f.join(&x, &x).unwrap(), x.clone());
        prop_assert_eq!(f.join(&f.bottom(), &x).unwrap(), x);
    }

    #[test]
    fn updates_only_move_up(k in 0..12usize, a in arb_steps(), step in (0..3usize, 0..16usize)) {
        let (f, moves) = pick(k);
        let before = reach(&f, &moves, &a);
        let mut longer = a.clone();
        longer.push(step);
        let after = reach(&f, &moves, &longer);
        prop_assert_eq!(f.join(&before, &after).unwrap(), after);
    }
}

#[test]
fn every_lattice_is_covered() {
    let names: std::collections::BTreeSet<&str> = lattices().iter().map(|(f, _)| f.lattice()).collect();
    assert_eq!(names.len(), 12);
}
