//! CRDT conversions: embed enough metadata in the state that merging
//! replicas commutes, so the obligation can be witnessed on any replica.
//!
//! A conversion only fires when the converted state's update pattern is
//! known to commute.

use lifter_ir::{PredicateKind, StateKind};

use super::{counter_like, to_pn_counter, Category, Conversion};
use crate::requirements::Consistency;

pub fn crdt_pn_counter() -> Conversion {
    Conversion {
        id: "crdt_pn_counter",
        refines: &[],
        category: Category::Crdt,
        cost: 0.25,
        consistency: Consistency::Causal,
        description: "counter reads merge per-replica increment and decrement vectors",
        kinds: &[PredicateKind::Counter],
        prefix: "merged",
        accepts: counter_like,
        convert: to_pn_counter,
        requires_commutative: true,
    }
}

fn max_register_source(kind: Option<&StateKind>) -> bool {
    match kind {
        Some(k) => {
            k.is_counter_like()
                || matches!(
                    k,
                    StateKind::Register
                        | StateKind::LwwRegister
                        | StateKind::MaxRegister
                        | StateKind::FencedLock
                )
        }
        None => false,
    }
}

fn to_max_register(kind: &StateKind) -> StateKind {
    match kind {
        StateKind::Register | StateKind::LwwRegister => StateKind::MaxRegister,
        other => other.clone(),
    }
}

pub fn crdt_max_register() -> Conversion {
    Conversion {
        id: "crdt_max_register",
        refines: &[],
        category: Category::Crdt,
        cost: 0.5,
        consistency: Consistency::Causal,
        description: "monotone values merge by taking the maximum",
        kinds: &[PredicateKind::Monotonic],
        prefix: "max",
        accepts: max_register_source,
        convert: to_max_register,
        requires_commutative: true,
    }
}

fn set_like(kind: Option<&StateKind>) -> bool {
    matches!(kind, Some(StateKind::Set | StateKind::OrSet))
}

fn to_or_set(kind: &StateKind) -> StateKind {
    match kind {
        StateKind::Set => StateKind::OrSet,
        other => other.clone(),
    }
}

pub fn crdt_or_set() -> Conversion {
    Conversion {
        id: "crdt_or_set",
        refines: &[],
        category: Category::Crdt,
        cost: 0.75,
        consistency: Consistency::Causal,
        description: "set membership tags each insert so removes only cancel observed inserts",
        kinds: &[PredicateKind::Membership],
        prefix: "observed-remove",
        accepts: set_like,
        convert: to_or_set,
        requires_commutative: true,
    }
}

fn register_like(kind: Option<&StateKind>) -> bool {
    matches!(
        kind,
        Some(StateKind::Register | StateKind::LwwRegister | StateKind::MaxRegister)
    )
}

fn to_lww_register(kind: &StateKind) -> StateKind {
    match kind {
        StateKind::Register => StateKind::LwwRegister,
        other => other.clone(),
    }
}

pub fn crdt_lww_register() -> Conversion {
    Conversion {
        id: "crdt_lww_register",
        refines: &[],
        category: Category::Crdt,
        cost: 1.0,
        consistency: Consistency::Causal,
        description: "register reads return the write with the highest timestamp",
        kinds: &[PredicateKind::Register],
        prefix: "lww",
        accepts: register_like,
        convert: to_lww_register,
        requires_commutative: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::with_state;
    use crate::catalog::RestructuringOperator;
    use lifter_ir::operation::Effect;
    use lifter_ir::{Formula, Operation};

    fn membership(kind: StateKind, effects: &[Effect]) -> Operation {
        let mut op = Operation::new(
            "cart",
            Formula::forall("i", "item", Formula::atom("consistent", &["items", "i"])),
        );
        op.domains.insert("item".into(), vec!["apple".into(), "pear".into()]);
        op.predicates.insert("consistent".into(), PredicateKind::Membership);
        with_state(op, "items", kind, effects)
    }

    #[test]
    fn or_set_conversion_makes_membership_local() {
        let op = membership(StateKind::Set, &[Effect::Insert, Effect::Remove]);
        let or_set = crdt_or_set();
        assert!(or_set.is_applicable(&op));
        let out = or_set.apply(&op);
        assert_eq!(out.states["items"].kind, StateKind::OrSet);
        assert_eq!(
            out.formula,
            Formula::And(vec![Formula::exists(
                "i",
                "item",
                Formula::atom("observed-remove-consistent", &["items", "i"])
            )])
        );
    }

    #[test]
    fn conversion_needs_a_commuting_pattern() {
        // Graph effects are meaningless on a set, so the pattern is unsupported.
        let op = membership(StateKind::Set, &[Effect::AddEdge]);
        assert!(!crdt_or_set().is_applicable(&op));
    }

    #[test]
    fn max_register_requires_fenced_lock_not_plain_lock() {
        let mut op = Operation::new(
            "tokens",
            Formula::forall("t", "time", Formula::atom("grows", &["holder", "t"])),
        );
        op.domains.insert("time".into(), vec!["t0".into()]);
        op.predicates.insert("grows".into(), PredicateKind::Monotonic);
        let locked = with_state(op.clone(), "holder", StateKind::Lock, &[Effect::Acquire]);
        assert!(!crdt_max_register().is_applicable(&locked));
        let fenced = with_state(op, "holder", StateKind::FencedLock, &[Effect::Acquire]);
        assert!(crdt_max_register().is_applicable(&fenced));
    }

    #[test]
    fn lww_converts_plain_register() {
        let mut op = Operation::new(
            "reg",
            Formula::forall("r", "replica", Formula::atom("latest", &["val", "r"])),
        );
        op.domains.insert("replica".into(), vec!["r1".into()]);
        op.predicates.insert("latest".into(), PredicateKind::Register);
        let op = with_state(op, "val", StateKind::Register, &[Effect::Assign]);
        let out = crdt_lww_register().apply(&op);
        assert_eq!(out.states["val"].kind, StateKind::LwwRegister);
    }
}
