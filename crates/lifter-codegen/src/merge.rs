//! Choosing a join-semilattice for each replicated state.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use lifter_engine::commutativity::state_profile;
use lifter_ir::operation::{Effect, Machine, Transition};
use lifter_ir::{Operation, StateKind};

use crate::lattice::{LatticeValue, MergeError, PnVector, Stamp, Tag};
use crate::EmitError;

/// One replica's CRDT state, keyed by state name.
pub type ReplicaState = BTreeMap<String, LatticeValue>;

/// Reachability order of a machine, checked to be a join-semilattice with
/// a least element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineOrder {
    pub bottom: String,
    /// Every state reachable from each state, itself included.
    pub up: BTreeMap<String, BTreeSet<String>>,
}

impl MachineOrder {
    pub fn of(machine: &Machine) -> Result<Self, String> {
        let mut up: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for start in &machine.states {
            let mut seen = BTreeSet::from([start.clone()]);
            let mut frontier = vec![start.as_str()];
            while let Some(state) = frontier.pop() {
                for t in machine.transitions.iter().filter(|t| t.from == state) {
                    if seen.insert(t.to.clone()) {
                        frontier.push(t.to.as_str());
                    }
                }
            }
            up.insert(start.clone(), seen);
        }

        for (a, above) in &up {
            for b in above {
                if b != a && up.get(b).is_some_and(|s| s.contains(a)) {
                    return Err(format!("states '{a}' and '{b}' reach each other"));
                }
            }
        }
        let bottom = machine
            .states
            .iter()
            .find(|s| up.get(*s).is_some_and(|above| above.len() == machine.states.len()))
            .cloned()
            .ok_or_else(|| "no state reaches every other state".to_string())?;

        let order = MachineOrder { bottom, up };
        for (i, a) in machine.states.iter().enumerate() {
            for b in &machine.states[i + 1..] {
                if order.join(a, b).is_none() {
                    return Err(format!("states '{a}' and '{b}' have no least upper bound"));
                }
            }
        }
        Ok(order)
    }

    pub fn leq(&self, a: &str, b: &str) -> bool {
        self.up.get(a).is_some_and(|above| above.contains(b))
    }

    /// Least state above both `a` and `b`.
    pub fn join(&self, a: &str, b: &str) -> Option<String> {
        let common: Vec<&String> = self.up.get(a)?.intersection(self.up.get(b)?).collect();
        common
            .iter()
            .find(|c| common.iter().all(|d| self.leq(c, d)))
            .map(|c| (*c).clone())
    }
}

/// Merge lattice for one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "lattice", rename_all = "snake_case")]
pub enum MergeFn {
    VectorSum,
    PnVectorSum,
    FieldVectorSum {
        fields: Vec<String>,
    },
    SetUnion,
    ObservedRemoveSet,
    LwwRegister,
    MaxRegister,
    TokenMax,
    GraphUnion,
    FlagOr,
    StateJoin {
        machine: String,
        order: MachineOrder,
        transitions: Vec<Transition>,
    },
    GeneratorSet {
        algebra: String,
        generators: Vec<String>,
    },
}

/// A local update to apply to one lattice value.
#[derive(Debug, Clone, Copy)]
pub struct Delta<'a> {
    pub replica: &'a str,
    /// Replica-local logical clock, used for tags and stamps.
    pub clock: u64,
    pub effect: &'a Effect,
    pub argument: Option<&'a str>,
}

impl MergeFn {
    pub fn lattice(&self) -> &'static str {
        self.bottom().lattice()
    }

    pub fn bottom(&self) -> LatticeValue {
        match self {
            MergeFn::VectorSum => LatticeValue::VectorSum {
                counts: BTreeMap::new(),
            },
            MergeFn::PnVectorSum => LatticeValue::PnVectorSum {
                counts: PnVector::default(),
            },
            MergeFn::FieldVectorSum { .. } => LatticeValue::FieldVectorSum {
                fields: BTreeMap::new(),
            },
            MergeFn::SetUnion => LatticeValue::SetUnion {
                elements: BTreeSet::new(),
            },
            MergeFn::ObservedRemoveSet => LatticeValue::ObservedRemoveSet {
                adds: BTreeSet::new(),
                removed: BTreeSet::new(),
            },
            MergeFn::LwwRegister => LatticeValue::LwwRegister { stamp: None },
            MergeFn::MaxRegister => LatticeValue::MaxRegister { value: 0 },
            MergeFn::TokenMax => LatticeValue::TokenMax {
                token: 0,
                holder: None,
            },
            MergeFn::GraphUnion => LatticeValue::GraphUnion {
                vertices: BTreeSet::new(),
                edges: BTreeSet::new(),
            },
            MergeFn::FlagOr => LatticeValue::FlagOr { enabled: false },
            MergeFn::StateJoin { order, .. } => LatticeValue::StateJoin {
                state: order.bottom.clone(),
            },
            MergeFn::GeneratorSet { .. } => LatticeValue::GeneratorSet {
                applied: BTreeSet::new(),
            },
        }
    }

    pub fn join(&self, a: &LatticeValue, b: &LatticeValue) -> Result<LatticeValue, MergeError> {
        self.check(a)?;
        self.check(b)?;
        match (self, a, b) {
            (
                MergeFn::StateJoin { order, .. },
                LatticeValue::StateJoin { state: x },
                LatticeValue::StateJoin { state: y },
            ) => {
                let state = order.join(x, y).ok_or_else(|| {
                    let missing = if order.up.contains_key(x) { y } else { x };
                    MergeError::NotInOrder(missing.clone())
                })?;
                Ok(LatticeValue::StateJoin { state })
            }
            _ => a.join(b),
        }
    }

    fn check(&self, value: &LatticeValue) -> Result<(), MergeError> {
        let expected = self.lattice();
        if value.lattice() != expected {
            return Err(MergeError::Mismatch {
                expected,
                found: value.lattice(),
            });
        }
        Ok(())
    }

    /// Apply a local update. The result is always above `value`.
    pub fn apply(&self, value: &LatticeValue, delta: Delta<'_>) -> Result<LatticeValue, MergeError> {
        self.check(value)?;
        let lattice = self.lattice();
        let unsupported = || MergeError::UnsupportedEffect {
            lattice,
            effect: delta.effect.to_string(),
        };
        let argument = || {
            delta.argument.ok_or_else(|| MergeError::MissingArgument {
                lattice,
                effect: delta.effect.to_string(),
            })
        };
        let replica = delta.replica.to_string();
        let mut next = value.clone();
        match (self, &mut next, delta.effect) {
            (MergeFn::VectorSum, LatticeValue::VectorSum { counts }, Effect::Increment) => {
                bump(counts, replica);
            }
            (MergeFn::PnVectorSum, LatticeValue::PnVectorSum { counts }, effect) => match effect {
                Effect::Increment => bump(&mut counts.inc, replica),
                Effect::Decrement => bump(&mut counts.dec, replica),
                _ => return Err(unsupported()),
            },
            (MergeFn::FieldVectorSum { fields: declared }, LatticeValue::FieldVectorSum { fields }, effect) => {
                let field = argument()?;
                if !declared.is_empty() && !declared.iter().any(|f| f == field) {
                    return Err(MergeError::UnknownField(field.to_string()));
                }
                let vector = fields.entry(field.to_string()).or_default();
                match effect {
                    Effect::Increment => bump(&mut vector.inc, replica),
                    Effect::Decrement => bump(&mut vector.dec, replica),
                    _ => return Err(unsupported()),
                }
            }
            (MergeFn::SetUnion, LatticeValue::SetUnion { elements }, Effect::Insert) => {
                elements.insert(argument()?.to_string());
            }
            (MergeFn::ObservedRemoveSet, LatticeValue::ObservedRemoveSet { adds, removed }, effect) => {
                let element = argument()?;
                match effect {
                    Effect::Insert => {
                        adds.insert((
                            element.to_string(),
                            Tag {
                                replica,
                                seq: delta.clock,
                            },
                        ));
                    }
                    Effect::Remove => {
                        let observed: Vec<Tag> = adds
                            .iter()
                            .filter(|(e, _)| e == element)
                            .map(|(_, tag)| tag.clone())
                            .collect();
                        removed.extend(observed);
                    }
                    _ => return Err(unsupported()),
                }
            }
            (MergeFn::LwwRegister, LatticeValue::LwwRegister { stamp }, Effect::Assign) => {
                let candidate = Stamp {
                    clock: delta.clock,
                    replica,
                    value: argument()?.to_string(),
                };
                if stamp.as_ref().map_or(true, |s| candidate > *s) {
                    *stamp = Some(candidate);
                }
            }
            (MergeFn::MaxRegister, LatticeValue::MaxRegister { value }, Effect::Assign) => {
                let raw = argument()?;
                let parsed: u64 = raw.parse().map_err(|_| MergeError::BadArgument {
                    lattice,
                    argument: raw.to_string(),
                })?;
                *value = (*value).max(parsed);
            }
            (MergeFn::TokenMax, LatticeValue::TokenMax { token, holder }, effect) => {
                *holder = match effect {
                    Effect::Acquire => Some(replica),
                    Effect::Release => None,
                    _ => return Err(unsupported()),
                };
                *token = token.saturating_add(1);
            }
            (MergeFn::GraphUnion, LatticeValue::GraphUnion { vertices, edges }, effect) => {
                let raw = argument()?;
                match effect {
                    Effect::AddVertex => {
                        vertices.insert(raw.to_string());
                    }
                    Effect::AddEdge => {
                        let (from, to) = raw.split_once("->").ok_or_else(|| MergeError::BadArgument {
                            lattice,
                            argument: raw.to_string(),
                        })?;
                        vertices.insert(from.to_string());
                        vertices.insert(to.to_string());
                        edges.insert((from.to_string(), to.to_string()));
                    }
                    _ => return Err(unsupported()),
                }
            }
            (MergeFn::FlagOr, LatticeValue::FlagOr { enabled }, Effect::Enable) => {
                *enabled = true;
            }
            (MergeFn::StateJoin { transitions, .. }, LatticeValue::StateJoin { state }, Effect::Input(input)) => {
                let to = transitions
                    .iter()
                    .find(|t| t.from == *state && t.input == *input)
                    .ok_or_else(|| MergeError::UndefinedTransition {
                        state: state.clone(),
                        input: input.clone(),
                    })?;
                *state = to.to.clone();
            }
            (MergeFn::GeneratorSet { generators, .. }, LatticeValue::GeneratorSet { applied }, Effect::Input(g)) => {
                if !generators.contains(g) {
                    return Err(MergeError::UnknownGenerator(g.clone()));
                }
                applied.insert(g.clone());
            }
            _ => return Err(unsupported()),
        }
        Ok(next)
    }
}

fn bump(counts: &mut BTreeMap<String, u64>, replica: String) {
    let entry = counts.entry(replica).or_insert(0);
    *entry = entry.saturating_add(1);
}

/// Pick the merge lattice for `state`.
pub fn merge_fn_for(op: &Operation, state: &str) -> Result<MergeFn, EmitError> {
    let var = op
        .state(state)
        .ok_or_else(|| EmitError::UnknownState(state.to_string()))?;
    let effects = op.effects_on(state);
    let no_lattice = |reason: &str| EmitError::NoLattice {
        state: state.to_string(),
        kind: var.kind.to_string(),
        reason: reason.to_string(),
    };
    Ok(match &var.kind {
        StateKind::Counter => MergeFn::VectorSum,
        StateKind::PnCounter => MergeFn::PnVectorSum,
        StateKind::FieldCounters => MergeFn::FieldVectorSum {
            fields: var.fields.clone(),
        },
        StateKind::Set if effects.contains(&Effect::Remove) => {
            return Err(no_lattice("removes on a plain set do not commute with inserts"))
        }
        StateKind::Set => MergeFn::SetUnion,
        StateKind::OrSet => MergeFn::ObservedRemoveSet,
        StateKind::Register => {
            return Err(no_lattice(
                "concurrent assigns do not commute; declare lww-register or convert it with crdt_lww_register",
            ))
        }
        StateKind::LwwRegister => MergeFn::LwwRegister,
        StateKind::MaxRegister => MergeFn::MaxRegister,
        StateKind::FencedLock => MergeFn::TokenMax,
        StateKind::Graph => MergeFn::GraphUnion,
        StateKind::Flag if effects.contains(&Effect::Disable) => {
            return Err(no_lattice("disabling a flag does not commute with enabling it"))
        }
        StateKind::Flag => MergeFn::FlagOr,
        StateKind::Lock => return Err(no_lattice("a lock has no merge; it needs agreement")),
        StateKind::Machine(name) => {
            let machine = op
                .machines
                .get(name)
                .ok_or_else(|| no_lattice("undeclared machine"))?;
            let order = MachineOrder::of(machine).map_err(|reason| EmitError::NotASemilattice {
                state: state.to_string(),
                machine: name.clone(),
                reason,
            })?;
            MergeFn::StateJoin {
                machine: name.clone(),
                order,
                transitions: machine.transitions.clone(),
            }
        }
        StateKind::Algebra(name) => {
            let algebra = op
                .algebras
                .get(name)
                .ok_or_else(|| no_lattice("undeclared algebra"))?;
            let profile = state_profile(op, state);
            if !(profile.commutative.is_true() && profile.idempotent.is_true()) {
                return Err(no_lattice(
                    "generators must be commutative and idempotent to merge as a set",
                ));
            }
            MergeFn::GeneratorSet {
                algebra: name.clone(),
                generators: algebra.generators.clone(),
            }
        }
    })
}

/// Product of per-state lattices: merging joins component-wise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeFunction {
    pub components: IndexMap<String, MergeFn>,
}

impl MergeFunction {
    pub fn bottom(&self) -> ReplicaState {
        self.components
            .iter()
            .map(|(name, f)| (name.clone(), f.bottom()))
            .collect()
    }

    pub fn merge(&self, a: &ReplicaState, b: &ReplicaState) -> Result<ReplicaState, MergeError> {
        for name in a.keys().chain(b.keys()) {
            if !self.components.contains_key(name) {
                return Err(MergeError::UnknownComponent(name.clone()));
            }
        }
        let mut out = ReplicaState::new();
        for (name, f) in &self.components {
            let bottom = f.bottom();
            let x = a.get(name).unwrap_or(&bottom);
            let y = b.get(name).unwrap_or(&bottom);
            out.insert(name.clone(), f.join(x, y)?);
        }
        Ok(out)
    }

    pub fn apply(
        &self,
        state: &mut ReplicaState,
        component: &str,
        delta: Delta<'_>,
    ) -> Result<(), MergeError> {
        let f = self
            .components
            .get(component)
            .ok_or_else(|| MergeError::UnknownComponent(component.to_string()))?;
        let current = state.get(component).cloned().unwrap_or_else(|| f.bottom());
        state.insert(component.to_string(), f.apply(&current, delta)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifter_ir::operation::{StateVar, Update};
    use lifter_ir::Formula;

    fn lifecycle() -> Machine {
        let t = |input: &str, from: &str, to: &str| Transition {
            input: input.into(),
            from: from.into(),
            to: to.into(),
        };
        Machine {
            name: "lifecycle".into(),
            states: vec!["idle".into(), "started".into(), "stopped".into()],
            transitions: vec![
                t("start", "idle", "started"),
                t("stop", "idle", "stopped"),
                t("stop", "started", "stopped"),
            ],
        }
    }

    fn delta<'a>(replica: &'a str, clock: u64, effect: &'a Effect, argument: Option<&'a str>) -> Delta<'a> {
        Delta {
            replica,
            clock,
            effect,
            argument,
        }
    }

    #[test]
    fn chain_machine_is_a_semilattice() {
        let order = MachineOrder::of(&lifecycle()).unwrap();
        assert_eq!(order.bottom, "idle");
        assert_eq!(order.join("started", "stopped").as_deref(), Some("stopped"));
        assert_eq!(order.join("idle", "started").as_deref(), Some("started"));
    }

    #[test]
    fn diverging_machine_has_no_join() {
        let mut m = lifecycle();
        m.transitions.retain(|t| t.from == "idle");
        let err = MachineOrder::of(&m).unwrap_err();
        assert!(err.contains("least upper bound"), "{err}");
    }

    #[test]
    fn cyclic_machine_is_not_an_order() {
        let mut m = lifecycle();
        m.transitions.push(Transition {
            input: "reset".into(),
            from: "stopped".into(),
            to: "idle".into(),
        });
        assert!(MachineOrder::of(&m).unwrap_err().contains("reach each other"));
    }

    #[test]
    fn machine_states_join_by_reachability() {
        let f = MergeFn::StateJoin {
            machine: "lifecycle".into(),
            order: MachineOrder::of(&lifecycle()).unwrap(),
            transitions: lifecycle().transitions,
        };
        let start = Effect::Input("start".into());
        let stop = Effect::Input("stop".into());
        let a = f.apply(&f.bottom(), delta("r1", 1, &start, None)).unwrap();
        let b = f.apply(&f.bottom(), delta("r2", 1, &stop, None)).unwrap();
        assert_eq!(f.join(&a, &b).unwrap(), LatticeValue::StateJoin { state: "stopped".into() });
        let err = f.apply(&b, delta("r2", 2, &start, None)).unwrap_err();
        assert!(matches!(err, MergeError::UndefinedTransition { .. }));
    }

    #[test]
    fn lww_keeps_the_latest_stamp() {
        let f = MergeFn::LwwRegister;
        let assign = Effect::Assign;
        let early = f.apply(&f.bottom(), delta("r1", 1, &assign, Some("a"))).unwrap();
        let late = f.apply(&f.bottom(), delta("r2", 5, &assign, Some("b"))).unwrap();
        assert_eq!(f.join(&early, &late).unwrap().observe(), serde_json::json!("b"));
    }

    #[test]
    fn observed_remove_only_cancels_seen_inserts() {
        let f = MergeFn::ObservedRemoveSet;
        let (insert, remove) = (Effect::Insert, Effect::Remove);
        let a = f.apply(&f.bottom(), delta("r1", 1, &insert, Some("apple"))).unwrap();
        let a = f.apply(&a, delta("r1", 2, &remove, Some("apple"))).unwrap();
        let b = f.apply(&f.bottom(), delta("r2", 1, &insert, Some("apple"))).unwrap();
        assert_eq!(f.join(&a, &b).unwrap().observe(), serde_json::json!(["apple"]));
    }

    #[test]
    fn unsupported_effects_are_rejected() {
        let err = MergeFn::VectorSum
            .apply(&MergeFn::VectorSum.bottom(), delta("r1", 1, &Effect::Decrement, None))
            .unwrap_err();
        assert!(matches!(err, MergeError::UnsupportedEffect { .. }));
        let err = MergeFn::MaxRegister
            .apply(&MergeFn::MaxRegister.bottom(), delta("r1", 1, &Effect::Assign, Some("x")))
            .unwrap_err();
        assert!(matches!(err, MergeError::BadArgument { .. }));
    }

    fn op_with_state(kind: StateKind, effect: Effect) -> Operation {
        let mut op = Operation::new("o", Formula::And(vec![]));
        op.states.insert(
            "s".into(),
            StateVar {
                name: "s".into(),
                kind,
                fields: Vec::new(),
            },
        );
        op.updates.insert(
            "u".into(),
            Update {
                name: "u".into(),
                state: "s".into(),
                effect,
            },
        );
        op
    }

    #[test]
    fn lattice_selection_by_kind() {
        assert_eq!(
            merge_fn_for(&op_with_state(StateKind::Counter, Effect::Increment), "s").unwrap(),
            MergeFn::VectorSum
        );
        assert_eq!(
            merge_fn_for(&op_with_state(StateKind::LwwRegister, Effect::Assign), "s").unwrap(),
            MergeFn::LwwRegister
        );
        assert_eq!(
            merge_fn_for(&op_with_state(StateKind::FencedLock, Effect::Acquire), "s").unwrap(),
            MergeFn::TokenMax
        );
        assert!(matches!(
            merge_fn_for(&op_with_state(StateKind::Lock, Effect::Acquire), "s"),
            Err(EmitError::NoLattice { .. })
        ));
        assert!(matches!(
            merge_fn_for(&op_with_state(StateKind::Set, Effect::Remove), "s"),
            Err(EmitError::NoLattice { .. })
        ));
    }

    #[test]
    fn plain_register_is_never_merged_implicitly() {
        let err = merge_fn_for(&op_with_state(StateKind::Register, Effect::Assign), "s").unwrap_err();
        let EmitError::NoLattice { kind, reason, .. } = &err else {
            panic!("expected NoLattice, got {err}");
        };
        assert_eq!(kind, "register");
        assert!(reason.contains("crdt_lww_register"));
    }

    #[test]
    fn product_merge_fills_missing_components_with_bottom() {
        let mut f = MergeFunction::default();
        f.components.insert("hits".into(), MergeFn::VectorSum);
        f.components.insert("seen".into(), MergeFn::FlagOr);
        let mut a = f.bottom();
        f.apply(&mut a, "hits", delta("r1", 1, &Effect::Increment, None)).unwrap();
        let b = ReplicaState::from([("seen".to_string(), LatticeValue::FlagOr { enabled: true })]);
        let merged = f.merge(&a, &b).unwrap();
        assert_eq!(merged["hits"].observe(), serde_json::json!(1));
        assert_eq!(merged["seen"].observe(), serde_json::json!(true));

        let stray = ReplicaState::from([("other".to_string(), LatticeValue::FlagOr { enabled: true })]);
        assert_eq!(
            f.merge(&a, &stray).unwrap_err(),
            MergeError::UnknownComponent("other".into())
        );
    }
}
