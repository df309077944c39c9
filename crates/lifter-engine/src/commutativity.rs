//! Commutativity detection for decidable operation fragments.
//!
//! Three fragments are decided: finite-state machines (by enumerating every
//! state and input pair), finitely presented monoids (by bounded rewriting)
//! and a fixed table of known replicated-data patterns. Everything else is
//! `Unsupported`, which callers must never read as "not commutative".

use serde::{Serialize, Serializer};
use std::collections::{BTreeSet, HashSet, VecDeque};

use lifter_ir::operation::{Algebra, Effect, Machine};
use lifter_ir::{Operation, StateKind};

/// Largest rewriting closure explored for one word.
pub const MAX_CLOSURE_WORDS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Decided(bool),
    Unsupported,
}

impl Decision {
    pub fn is_true(self) -> bool {
        self == Decision::Decided(true)
    }

    /// Conjunction that stays decided when any operand is decided false.
    fn all(decisions: impl IntoIterator<Item = Decision>) -> Decision {
        let mut unsupported = false;
        for d in decisions {
            match d {
                Decision::Decided(false) => return Decision::Decided(false),
                Decision::Unsupported => unsupported = true,
                Decision::Decided(true) => {}
            }
        }
        if unsupported {
            Decision::Unsupported
        } else {
            Decision::Decided(true)
        }
    }
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Decision::Decided(b) => serializer.serialize_bool(*b),
            Decision::Unsupported => serializer.serialize_str("unsupported"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlgebraicProfile {
    pub commutative: Decision,
    pub associative: Decision,
    pub idempotent: Decision,
}

impl AlgebraicProfile {
    pub const UNSUPPORTED: AlgebraicProfile = AlgebraicProfile {
        commutative: Decision::Unsupported,
        associative: Decision::Unsupported,
        idempotent: Decision::Unsupported,
    };

    const fn decided(commutative: bool, associative: bool, idempotent: bool) -> Self {
        Self {
            commutative: Decision::Decided(commutative),
            associative: Decision::Decided(associative),
            idempotent: Decision::Decided(idempotent),
        }
    }
}

/// A piece of an operation whose algebraic properties can be asked about.
#[derive(Debug, Clone, Copy)]
pub enum Fragment<'a> {
    Machine(&'a Machine),
    Algebra(&'a Algebra),
    Pattern {
        kind: &'a StateKind,
        effects: &'a BTreeSet<Effect>,
    },
}

pub fn is_commutative(fragment: Fragment<'_>) -> Decision {
    profile(fragment).commutative
}

pub fn profile(fragment: Fragment<'_>) -> AlgebraicProfile {
    match fragment {
        Fragment::Machine(machine) => machine_profile(machine),
        Fragment::Algebra(algebra) => algebra_profile(algebra),
        Fragment::Pattern { kind, effects } => pattern_profile(kind, effects),
    }
}

/// Profile of the updates on `state`, dispatching on its kind.
pub fn state_profile(op: &Operation, state: &str) -> AlgebraicProfile {
    let Some(var) = op.state(state) else {
        return AlgebraicProfile::UNSUPPORTED;
    };
    match &var.kind {
        StateKind::Machine(name) => op
            .machines
            .get(name)
            .map(machine_profile)
            .unwrap_or(AlgebraicProfile::UNSUPPORTED),
        StateKind::Algebra(name) => op
            .algebras
            .get(name)
            .map(algebra_profile)
            .unwrap_or(AlgebraicProfile::UNSUPPORTED),
        kind => pattern_profile(kind, &op.effects_on(state)),
    }
}

fn machine_profile(machine: &Machine) -> AlgebraicProfile {
    // `None` is the sink reached by an undefined transition.
    let step = |s: Option<&str>, input: &str| s.and_then(|s| machine.next(s, input));
    let inputs = machine.inputs();
    let mut commutative = true;
    let mut idempotent = true;
    for state in &machine.states {
        let s = Some(state.as_str());
        for a in &inputs {
            let once = step(s, a);
            if step(once, a) != once {
                idempotent = false;
            }
            for b in &inputs {
                if step(step(s, a), b) != step(step(s, b), a) {
                    commutative = false;
                }
            }
        }
    }
    AlgebraicProfile::decided(commutative, true, idempotent)
}

struct Rewriter<'a> {
    rules: Vec<(&'a [String], &'a [String])>,
    length_preserving: bool,
}

impl<'a> Rewriter<'a> {
    fn new(algebra: &'a Algebra) -> Self {
        let mut rules = Vec::new();
        let mut length_preserving = true;
        for rel in &algebra.relations {
            let (l, r) = (rel.lhs.as_slice(), rel.rhs.as_slice());
            if l.len() == r.len() {
                rules.push((l, r));
                rules.push((r, l));
            } else {
                length_preserving = false;
                if l.len() > r.len() {
                    rules.push((l, r));
                } else {
                    rules.push((r, l));
                }
            }
        }
        Self {
            rules,
            length_preserving,
        }
    }

    fn closure(&self, word: Vec<String>) -> Option<HashSet<Vec<String>>> {
        let mut seen = HashSet::from([word.clone()]);
        let mut queue = VecDeque::from([word]);
        while let Some(w) = queue.pop_front() {
            for (from, to) in &self.rules {
                if from.is_empty() || from.len() > w.len() {
                    continue;
                }
                for at in 0..=(w.len() - from.len()) {
                    if w[at..at + from.len()] != **from {
                        continue;
                    }
                    let mut next = w[..at].to_vec();
                    next.extend(to.iter().cloned());
                    next.extend_from_slice(&w[at + from.len()..]);
                    if seen.insert(next.clone()) {
                        if seen.len() > MAX_CLOSURE_WORDS {
                            return None;
                        }
                        queue.push_back(next);
                    }
                }
            }
        }
        Some(seen)
    }

    fn equal(&self, u: Vec<String>, v: Vec<String>) -> Decision {
        let (Some(cu), Some(cv)) = (self.closure(u), self.closure(v)) else {
            return Decision::Unsupported;
        };
        if cu.iter().any(|w| cv.contains(w)) {
            Decision::Decided(true)
        } else if self.length_preserving {
            Decision::Decided(false)
        } else {
            Decision::Unsupported
        }
    }
}

fn algebra_profile(algebra: &Algebra) -> AlgebraicProfile {
    let rw = Rewriter::new(algebra);
    let gens = &algebra.generators;
    let commutative = Decision::all(gens.iter().enumerate().flat_map(|(i, a)| {
        let rw = &rw;
        gens[i + 1..]
            .iter()
            .map(move |b| rw.equal(vec![a.clone(), b.clone()], vec![b.clone(), a.clone()]))
    }));
    let idempotent = Decision::all(
        gens.iter()
            .map(|g| rw.equal(vec![g.clone(), g.clone()], vec![g.clone()])),
    );
    AlgebraicProfile {
        commutative,
        associative: Decision::Decided(true),
        idempotent,
    }
}

/// The known-pattern table, keyed by state kind and the set of effects used.
pub fn pattern_profile(kind: &StateKind, effects: &BTreeSet<Effect>) -> AlgebraicProfile {
    if effects.iter().any(|e| !kind.accepts(e)) {
        return AlgebraicProfile::UNSUPPORTED;
    }
    match kind {
        StateKind::Counter | StateKind::PnCounter | StateKind::FieldCounters => {
            AlgebraicProfile::decided(true, true, false)
        }
        StateKind::Set => {
            AlgebraicProfile::decided(!effects.contains(&Effect::Remove), true, true)
        }
        StateKind::OrSet => AlgebraicProfile::decided(true, true, true),
        StateKind::Register => AlgebraicProfile::decided(false, true, true),
        StateKind::LwwRegister | StateKind::MaxRegister => AlgebraicProfile::decided(true, true, true),
        StateKind::Graph => AlgebraicProfile::decided(true, true, true),
        StateKind::Lock => AlgebraicProfile::decided(false, true, false),
        StateKind::FencedLock => AlgebraicProfile::decided(true, true, true),
        StateKind::Flag => {
            AlgebraicProfile::decided(!effects.contains(&Effect::Disable), true, true)
        }
        StateKind::Machine(_) | StateKind::Algebra(_) => AlgebraicProfile::UNSUPPORTED,
    }
}
