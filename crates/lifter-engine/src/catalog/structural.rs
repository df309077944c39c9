//! Structural rewrites: change how state is laid out so obligations on it
//! become local.

use lifter_ir::{Atom, Formula, Operation, PredicateKind, StateKind};

use super::{
    counter_like, existentialize, rewrite_residual, state_of, to_pn_counter, Category, Conversion,
    RestructuringOperator,
};
use crate::requirements::Consistency;

/// A total over several counter fields becomes one independent counter per
/// field, each witnessed on its own.
#[derive(Debug, Clone, Copy)]
pub struct SplitCompoundCounter;

impl RestructuringOperator for SplitCompoundCounter {
    fn id(&self) -> &'static str {
        "split_compound_counter"
    }

    fn category(&self) -> Category {
        Category::Structural
    }

    fn semantic_cost(&self) -> f64 {
        0.25
    }

    fn consistency(&self) -> Consistency {
        Consistency::Linearizable
    }

    fn description(&self) -> &'static str {
        "compound counter totals become independent per-field counters"
    }

    fn matches(&self, op: &Operation, atom: &Atom) -> bool {
        op.predicate_kind(&atom.predicate) == PredicateKind::CompoundCounter
            && state_of(op, atom).is_some_and(|s| s.kind.is_counter_like() && !s.fields.is_empty())
    }

    fn apply(&self, op: &Operation) -> Operation {
        let matches = |a: &Atom| self.matches(op, a);
        let rewritten = rewrite_residual(op, &matches, &mut |c: &Formula| {
            let mut fields: Vec<&str> = Vec::new();
            for atom in c.atoms() {
                if let Some(state) = state_of(op, atom).filter(|_| matches(atom)) {
                    for field in &state.fields {
                        if !fields.contains(&field.as_str()) {
                            fields.push(field);
                        }
                    }
                }
            }
            fields
                .into_iter()
                .map(|field| existentialize(c, &matches, &|a: &Atom| per_field(op, a, field)))
                .collect()
        });
        rewritten.finish(op, to_field_counters, |_| PredicateKind::Local)
    }
}

/// `(P state x..)` becomes `(field-P state field x..)`. A state without the
/// field contributes nothing to it.
fn per_field(op: &Operation, atom: &Atom, field: &str) -> Formula {
    let Some(state) = state_of(op, atom).filter(|s| s.fields.iter().any(|f| f == field)) else {
        return Formula::truth();
    };
    let mut args = Vec::with_capacity(atom.args.len() + 1);
    let mut inserted = false;
    for arg in &atom.args {
        args.push(arg.clone());
        if !inserted && *arg == state.name {
            args.push(field.to_string());
            inserted = true;
        }
    }
    Formula::Atom(Atom::new(format!("{field}-{}", atom.predicate), args))
}

fn to_field_counters(kind: &StateKind) -> StateKind {
    if kind.is_counter_like() {
        StateKind::FieldCounters
    } else {
        kind.clone()
    }
}

/// A global bound on a counter becomes a per-replica escrow share that each
/// replica checks against its own allotment.
pub fn escrow_bound() -> Conversion {
    Conversion {
        id: "escrow_bound",
        refines: &[],
        category: Category::Structural,
        cost: 0.5,
        consistency: Consistency::Linearizable,
        description: "a bound on a counter becomes per-replica escrow shares",
        kinds: &[PredicateKind::Bound],
        prefix: "escrow-share",
        accepts: counter_like,
        convert: to_pn_counter,
        requires_commutative: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::with_state;
    use crate::decompose::decompose;
    use lifter_ir::operation::Effect;

    fn cart_totals() -> Operation {
        let mut op = Operation::new(
            "totals",
            Formula::forall("r", "replica", Formula::atom("total", &["qty", "r"])),
        );
        op.domains.insert("replica".into(), vec!["r1".into(), "r2".into()]);
        op.predicates.insert("total".into(), PredicateKind::CompoundCounter);
        let mut op = with_state(op, "qty", StateKind::Counter, &[Effect::Increment]);
        op.states["qty"].fields = vec!["lines".into(), "units".into()];
        op
    }

    #[test]
    fn split_emits_one_witness_per_field() {
        let op = cart_totals();
        assert!(SplitCompoundCounter.is_applicable(&op));
        let out = SplitCompoundCounter.apply(&op);
        assert_eq!(
            out.formula,
            Formula::And(vec![
                Formula::exists("r", "replica", Formula::atom("lines-total", &["qty", "lines", "r"])),
                Formula::exists("r", "replica", Formula::atom("units-total", &["qty", "units", "r"])),
            ])
        );
        assert_eq!(out.states["qty"].kind, StateKind::FieldCounters);
        assert_eq!(decompose(&out).unwrap().lifting, 1.0);
    }

    #[test]
    fn counters_without_fields_are_not_split() {
        let mut op = cart_totals();
        op.states["qty"].fields.clear();
        assert!(!SplitCompoundCounter.is_applicable(&op));
    }

    #[test]
    fn escrow_converts_bounded_counter() {
        let mut op = Operation::new(
            "stock",
            Formula::forall("r", "replica", Formula::atom("non-negative", &["stock", "r"])),
        );
        op.domains.insert("replica".into(), vec!["r1".into()]);
        op.predicates.insert("non-negative".into(), PredicateKind::Bound);
        let op = with_state(op, "stock", StateKind::Counter, &[Effect::Increment]);
        let escrow = escrow_bound();
        assert!(escrow.is_applicable(&op));
        let out = escrow.apply(&op);
        assert_eq!(out.states["stock"].kind, StateKind::PnCounter);
        assert_eq!(out.predicate_kind("escrow-share-non-negative"), PredicateKind::Local);
    }
}
