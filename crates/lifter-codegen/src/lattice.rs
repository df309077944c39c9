//! Runtime values of the emitted merge lattices.
//!
//! Every value here is an element of a join-semilattice. `join` is
//! commutative, associative and idempotent, and the bottom of each lattice
//! (see `MergeFn::bottom`) is its identity. Local updates only ever move a
//! value up, so replicas converge however merges are ordered or repeated.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("cannot merge a {found} value into a {expected} lattice")]
    Mismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("{lattice} lattice has no update for effect '{effect}'")]
    UnsupportedEffect { lattice: &'static str, effect: String },
    #[error("effect '{effect}' on a {lattice} lattice needs an argument")]
    MissingArgument { lattice: &'static str, effect: String },
    #[error("invalid argument '{argument}' for a {lattice} lattice")]
    BadArgument {
        lattice: &'static str,
        argument: String,
    },
    #[error("unknown counter field '{0}'")]
    UnknownField(String),
    #[error("machine state '{0}' is not in the join order")]
    NotInOrder(String),
    #[error("no transition on '{input}' from machine state '{state}'")]
    UndefinedTransition { state: String, input: String },
    #[error("generator '{0}' is not part of the algebra")]
    UnknownGenerator(String),
    #[error("state '{0}' has no merge component")]
    UnknownComponent(String),
}

/// Per-replica increment and decrement totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnVector {
    pub inc: BTreeMap<String, u64>,
    pub dec: BTreeMap<String, u64>,
}

impl PnVector {
    pub fn value(&self) -> i64 {
        let inc: i128 = self.inc.values().map(|&v| i128::from(v)).sum();
        let dec: i128 = self.dec.values().map(|&v| i128::from(v)).sum();
        (inc - dec).clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    fn join(&self, other: &PnVector) -> PnVector {
        PnVector {
            inc: join_counts(&self.inc, &other.inc),
            dec: join_counts(&self.dec, &other.dec),
        }
    }
}

/// Unique tag of one observed-remove insert.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub replica: String,
    pub seq: u64,
}

/// Last-writer-wins stamp. Ordered by clock, then replica, then value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stamp {
    pub clock: u64,
    pub replica: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "lattice", rename_all = "snake_case")]
pub enum LatticeValue {
    VectorSum {
        counts: BTreeMap<String, u64>,
    },
    PnVectorSum {
        counts: PnVector,
    },
    FieldVectorSum {
        fields: BTreeMap<String, PnVector>,
    },
    SetUnion {
        elements: BTreeSet<String>,
    },
    ObservedRemoveSet {
        adds: BTreeSet<(String, Tag)>,
        removed: BTreeSet<Tag>,
    },
    LwwRegister {
        stamp: Option<Stamp>,
    },
    MaxRegister {
        value: u64,
    },
    /// Lexicographic maximum of (token, holder); every acquire or release
    /// bumps the token.
    TokenMax {
        token: u64,
        holder: Option<String>,
    },
    GraphUnion {
        vertices: BTreeSet<String>,
        edges: BTreeSet<(String, String)>,
    },
    FlagOr {
        enabled: bool,
    },
    StateJoin {
        state: String,
    },
    GeneratorSet {
        applied: BTreeSet<String>,
    },
}

fn join_counts(a: &BTreeMap<String, u64>, b: &BTreeMap<String, u64>) -> BTreeMap<String, u64> {
    let mut out = a.clone();
    for (replica, &count) in b {
        let entry = out.entry(replica.clone()).or_insert(0);
        *entry = (*entry).max(count);
    }
    out
}

fn union<T: Ord + Clone>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> BTreeSet<T> {
    a.union(b).cloned().collect()
}

impl LatticeValue {
    pub fn lattice(&self) -> &'static str {
        match self {
            LatticeValue::VectorSum { .. } => "vector_sum",
            LatticeValue::PnVectorSum { .. } => "pn_vector_sum",
            LatticeValue::FieldVectorSum { .. } => "field_vector_sum",
            LatticeValue::SetUnion { .. } => "set_union",
            LatticeValue::ObservedRemoveSet { .. } => "observed_remove_set",
            LatticeValue::LwwRegister { .. } => "lww_register",
            LatticeValue::MaxRegister { .. } => "max_register",
            LatticeValue::TokenMax { .. } => "token_max",
            LatticeValue::GraphUnion { .. } => "graph_union",
            LatticeValue::FlagOr { .. } => "flag_or",
            LatticeValue::StateJoin { .. } => "state_join",
            LatticeValue::GeneratorSet { .. } => "generator_set",
        }
    }

    /// Join two values of the same lattice.
    ///
    /// `StateJoin` needs the machine order and is joined by
    /// `MergeFn::join`; here it only accepts equal states.
    pub fn join(&self, other: &LatticeValue) -> Result<LatticeValue, MergeError> {
        use LatticeValue::*;
        Ok(match (self, other) {
            (VectorSum { counts: a }, VectorSum { counts: b }) => VectorSum {
                counts: join_counts(a, b),
            },
            (PnVectorSum { counts: a }, PnVectorSum { counts: b }) => PnVectorSum { counts: a.join(b) },
            (FieldVectorSum { fields: a }, FieldVectorSum { fields: b }) => {
                let mut fields = a.clone();
                for (field, vector) in b {
                    let joined = fields.get(field).map_or_else(|| vector.clone(), |v| v.join(vector));
                    fields.insert(field.clone(), joined);
                }
                FieldVectorSum { fields }
            }
            (SetUnion { elements: a }, SetUnion { elements: b }) => SetUnion {
                elements: union(a, b),
            },
            (
                ObservedRemoveSet { adds: a, removed: ra },
                ObservedRemoveSet { adds: b, removed: rb },
            ) => ObservedRemoveSet {
                adds: union(a, b),
                removed: union(ra, rb),
            },
            (LwwRegister { stamp: a }, LwwRegister { stamp: b }) => LwwRegister {
                stamp: a.clone().max(b.clone()),
            },
            (MaxRegister { value: a }, MaxRegister { value: b }) => MaxRegister { value: *a.max(b) },
            (
                TokenMax { token: ta, holder: ha },
                TokenMax { token: tb, holder: hb },
            ) => {
                let (token, holder) = (ta, ha).max((tb, hb));
                TokenMax {
                    token: *token,
                    holder: holder.clone(),
                }
            }
            (
                GraphUnion { vertices: va, edges: ea },
                GraphUnion { vertices: vb, edges: eb },
            ) => GraphUnion {
                vertices: union(va, vb),
                edges: union(ea, eb),
            },
            (FlagOr { enabled: a }, FlagOr { enabled: b }) => FlagOr { enabled: *a || *b },
            (StateJoin { state: a }, StateJoin { state: b }) if a == b => self.clone(),
            (GeneratorSet { applied: a }, GeneratorSet { applied: b }) => GeneratorSet {
                applied: union(a, b),
            },
            _ => {
                return Err(MergeError::Mismatch {
                    expected: self.lattice(),
                    found: other.lattice(),
                })
            }
        })
    }

    /// What a reader on this replica observes.
    pub fn observe(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            LatticeValue::VectorSum { counts } => json!(counts.values().sum::<u64>()),
            LatticeValue::PnVectorSum { counts } => json!(counts.value()),
            LatticeValue::FieldVectorSum { fields } => {
                let values: BTreeMap<&String, i64> =
                    fields.iter().map(|(f, v)| (f, v.value())).collect();
                json!(values)
            }
            LatticeValue::SetUnion { elements } => json!(elements),
            LatticeValue::ObservedRemoveSet { adds, removed } => {
                let live: BTreeSet<&String> = adds
                    .iter()
                    .filter(|(_, tag)| !removed.contains(tag))
                    .map(|(element, _)| element)
                    .collect();
                json!(live)
            }
            LatticeValue::LwwRegister { stamp } => json!(stamp.as_ref().map(|s| &s.value)),
            LatticeValue::MaxRegister { value } => json!(value),
            LatticeValue::TokenMax { token, holder } => json!({ "token": token, "holder": holder }),
            LatticeValue::GraphUnion { vertices, edges } => {
                json!({ "vertices": vertices, "edges": edges })
            }
            LatticeValue::FlagOr { enabled } => json!(enabled),
            LatticeValue::StateJoin { state } => json!(state),
            LatticeValue::GeneratorSet { applied } => json!(applied),
        }
    }
}
