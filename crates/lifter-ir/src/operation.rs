use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fmt;

use crate::formula::Formula;
use crate::hash::{StructuralHash, StructuralHasher};

/// Finite domains by name, elements in declaration order.
pub type Domains = IndexMap<String, Vec<String>>;

/// Coordination-relevant meaning of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum PredicateKind {
    /// Decidable from one replica's state.
    #[default]
    Local,
    /// At most one party holds a resource at a time.
    Exclusion,
    /// All parties decide the same value.
    Agreement,
    /// A read observes every completed write.
    Snapshot,
    /// Membership consistent with add/remove history.
    Membership,
    /// A value never decreases.
    Monotonic,
    /// A register read returns the latest write.
    Register,
    /// A shared quantity stays within a bound.
    Bound,
    /// A total over several counter fields.
    CompoundCounter,
    /// A counter read reflects every increment.
    Counter,
}

impl PredicateKind {
    pub const ALL: [PredicateKind; 10] = [
        PredicateKind::Local,
        PredicateKind::Exclusion,
        PredicateKind::Agreement,
        PredicateKind::Snapshot,
        PredicateKind::Membership,
        PredicateKind::Monotonic,
        PredicateKind::Register,
        PredicateKind::Bound,
        PredicateKind::CompoundCounter,
        PredicateKind::Counter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PredicateKind::Local => "local",
            PredicateKind::Exclusion => "exclusion",
            PredicateKind::Agreement => "agreement",
            PredicateKind::Snapshot => "snapshot",
            PredicateKind::Membership => "membership",
            PredicateKind::Monotonic => "monotonic",
            PredicateKind::Register => "register",
            PredicateKind::Bound => "bound",
            PredicateKind::CompoundCounter => "compound-counter",
            PredicateKind::Counter => "counter",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replicated state kinds. `Machine` and `Algebra` name a declared fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum StateKind {
    Counter,
    PnCounter,
    FieldCounters,
    Set,
    OrSet,
    Register,
    LwwRegister,
    MaxRegister,
    Graph,
    Lock,
    FencedLock,
    Flag,
    Machine(String),
    Algebra(String),
}

impl StateKind {
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(name) = s.strip_prefix("machine:") {
            return (!name.is_empty()).then(|| StateKind::Machine(name.to_string()));
        }
        if let Some(name) = s.strip_prefix("algebra:") {
            return (!name.is_empty()).then(|| StateKind::Algebra(name.to_string()));
        }
        Some(match s {
            "counter" => StateKind::Counter,
            "pn-counter" => StateKind::PnCounter,
            "field-counters" => StateKind::FieldCounters,
            "set" => StateKind::Set,
            "or-set" => StateKind::OrSet,
            "register" => StateKind::Register,
            "lww-register" => StateKind::LwwRegister,
            "max-register" => StateKind::MaxRegister,
            "graph" => StateKind::Graph,
            "lock" => StateKind::Lock,
            "fenced-lock" => StateKind::FencedLock,
            "flag" => StateKind::Flag,
            _ => return None,
        })
    }

    /// Whether an update with `effect` is meaningful on this kind.
    pub fn accepts(&self, effect: &Effect) -> bool {
        use Effect::*;
        match self {
            StateKind::Counter => matches!(effect, Increment),
            StateKind::PnCounter | StateKind::FieldCounters => matches!(effect, Increment | Decrement),
            StateKind::Set | StateKind::OrSet => matches!(effect, Insert | Remove),
            StateKind::Register | StateKind::LwwRegister | StateKind::MaxRegister => {
                matches!(effect, Assign)
            }
            StateKind::Graph => matches!(effect, AddVertex | AddEdge),
            StateKind::Lock | StateKind::FencedLock => matches!(effect, Acquire | Release),
            StateKind::Flag => matches!(effect, Enable | Disable),
            StateKind::Machine(_) | StateKind::Algebra(_) => matches!(effect, Input(_)),
        }
    }

    pub fn is_counter_like(&self) -> bool {
        matches!(
            self,
            StateKind::Counter | StateKind::PnCounter | StateKind::FieldCounters
        )
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Counter => f.write_str("counter"),
            StateKind::PnCounter => f.write_str("pn-counter"),
            StateKind::FieldCounters => f.write_str("field-counters"),
            StateKind::Set => f.write_str("set"),
            StateKind::OrSet => f.write_str("or-set"),
            StateKind::Register => f.write_str("register"),
            StateKind::LwwRegister => f.write_str("lww-register"),
            StateKind::MaxRegister => f.write_str("max-register"),
            StateKind::Graph => f.write_str("graph"),
            StateKind::Lock => f.write_str("lock"),
            StateKind::FencedLock => f.write_str("fenced-lock"),
            StateKind::Flag => f.write_str("flag"),
            StateKind::Machine(name) => write!(f, "machine:{name}"),
            StateKind::Algebra(name) => write!(f, "algebra:{name}"),
        }
    }
}

/// What an update does to its state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum Effect {
    Increment,
    Decrement,
    Insert,
    Remove,
    Assign,
    AddVertex,
    AddEdge,
    Acquire,
    Release,
    Enable,
    Disable,
    /// A machine input or algebra generator.
    Input(String),
}

impl Effect {
    /// Parse a built-in effect name. Anything else is treated as an input symbol.
    pub fn parse(s: &str) -> Self {
        match s {
            "increment" => Effect::Increment,
            "decrement" => Effect::Decrement,
            "insert" => Effect::Insert,
            "remove" => Effect::Remove,
            "assign" => Effect::Assign,
            "add-vertex" => Effect::AddVertex,
            "add-edge" => Effect::AddEdge,
            "acquire" => Effect::Acquire,
            "release" => Effect::Release,
            "enable" => Effect::Enable,
            "disable" => Effect::Disable,
            other => Effect::Input(other.to_string()),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Effect::Increment => "increment",
            Effect::Decrement => "decrement",
            Effect::Insert => "insert",
            Effect::Remove => "remove",
            Effect::Assign => "assign",
            Effect::AddVertex => "add-vertex",
            Effect::AddEdge => "add-edge",
            Effect::Acquire => "acquire",
            Effect::Release => "release",
            Effect::Enable => "enable",
            Effect::Disable => "disable",
            Effect::Input(sym) => sym,
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct StateVar {
    pub name: String,
    pub kind: StateKind,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Update {
    pub name: String,
    pub state: String,
    pub effect: Effect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Transition {
    pub input: String,
    pub from: String,
    pub to: String,
}

/// Deterministic finite-state operation. Missing transitions are undefined.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Machine {
    pub name: String,
    pub states: Vec<String>,
    pub transitions: Vec<Transition>,
}

impl Machine {
    pub fn next(&self, state: &str, input: &str) -> Option<&str> {
        self.transitions
            .iter()
            .find(|t| t.from == state && t.input == input)
            .map(|t| t.to.as_str())
    }

    /// Input alphabet in first-use order.
    pub fn inputs(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for t in &self.transitions {
            if !seen.contains(&t.input.as_str()) {
                seen.push(t.input.as_str());
            }
        }
        seen
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Relation {
    pub lhs: Vec<String>,
    pub rhs: Vec<String>,
}

/// Finitely presented monoid: generators and defining relations.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Algebra {
    pub name: String,
    pub generators: Vec<String>,
    pub relations: Vec<Relation>,
}

/// A lowered operation: declarations plus its correctness formula.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Operation {
    pub name: String,
    pub domains: Domains,
    pub states: IndexMap<String, StateVar>,
    pub updates: IndexMap<String, Update>,
    pub predicates: IndexMap<String, PredicateKind>,
    pub machines: IndexMap<String, Machine>,
    pub algebras: IndexMap<String, Algebra>,
    pub formula: Formula,
}

impl Operation {
    /// An operation with no declarations, mostly useful in tests.
    pub fn new(name: impl Into<String>, formula: Formula) -> Self {
        Self {
            name: name.into(),
            domains: Domains::new(),
            states: IndexMap::new(),
            updates: IndexMap::new(),
            predicates: IndexMap::new(),
            machines: IndexMap::new(),
            algebras: IndexMap::new(),
            formula,
        }
    }

    /// Kind of `predicate`; unannotated predicates are local.
    pub fn predicate_kind(&self, predicate: &str) -> PredicateKind {
        self.predicates.get(predicate).copied().unwrap_or_default()
    }

    pub fn state(&self, name: &str) -> Option<&StateVar> {
        self.states.get(name)
    }

    pub fn updates_for<'a>(&'a self, state: &'a str) -> impl Iterator<Item = &'a Update> + 'a {
        self.updates.values().filter(move |u| u.state == state)
    }

    pub fn effects_on(&self, state: &str) -> BTreeSet<Effect> {
        self.updates_for(state).map(|u| u.effect.clone()).collect()
    }

    /// A copy of this operation with a different formula.
    pub fn with_formula(&self, formula: Formula) -> Operation {
        Operation {
            formula,
            ..self.clone()
        }
    }

    /// State names referenced as atom arguments in `formula`.
    pub fn states_referenced_by(&self, formula: &Formula) -> BTreeSet<String> {
        formula
            .atoms()
            .into_iter()
            .flat_map(|a| a.args.iter())
            .filter(|arg| self.states.contains_key(arg.as_str()))
            .cloned()
            .collect()
    }

    /// Hash over every declaration and the formula.
    pub fn structural_hash(&self) -> StructuralHash {
        let mut hasher = StructuralHasher::new("operation").field(self.name.as_bytes());
        for (name, elements) in &self.domains {
            hasher = hasher
                .field(b"domain")
                .field(name.as_bytes())
                .field(elements.join(" ").as_bytes());
        }
        for state in self.states.values() {
            hasher = hasher
                .field(b"state")
                .field(state.name.as_bytes())
                .field(state.kind.to_string().as_bytes())
                .field(state.fields.join(" ").as_bytes());
        }
        for update in self.updates.values() {
            hasher = hasher
                .field(b"update")
                .field(update.name.as_bytes())
                .field(update.state.as_bytes())
                .field(update.effect.to_string().as_bytes());
        }
        for (name, kind) in &self.predicates {
            hasher = hasher
                .field(b"predicate")
                .field(name.as_bytes())
                .field(kind.as_str().as_bytes());
        }
        for machine in self.machines.values() {
            hasher = hasher
                .field(b"machine")
                .field(machine.name.as_bytes())
                .field(machine.states.join(" ").as_bytes());
            for t in &machine.transitions {
                hasher = hasher
                    .field(t.input.as_bytes())
                    .field(t.from.as_bytes())
                    .field(t.to.as_bytes());
            }
        }
        for algebra in self.algebras.values() {
            hasher = hasher
                .field(b"algebra")
                .field(algebra.name.as_bytes())
                .field(algebra.generators.join(" ").as_bytes());
            for rel in &algebra.relations {
                hasher = hasher
                    .field(rel.lhs.join(" ").as_bytes())
                    .field(rel.rhs.join(" ").as_bytes());
            }
        }
        hasher
            .field(b"formula")
            .field(self.formula.to_string().as_bytes())
            .finish()
    }
}
