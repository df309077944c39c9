//! Caller requirements bounding what restructuring may give up.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use lifter_ir::hash::{StructuralHash, StructuralHasher};

use crate::catalog::RestructuringOperator;

/// Requirements JSON schema version.
pub const REQUIREMENTS_SCHEMA_VERSION: u32 = 1;

/// Consistency levels, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    #[default]
    Eventual,
    Causal,
    Sequential,
    Linearizable,
}

impl Consistency {
    pub const ALL: [Consistency; 4] = [
        Consistency::Eventual,
        Consistency::Causal,
        Consistency::Sequential,
        Consistency::Linearizable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Consistency::Eventual => "eventual",
            Consistency::Causal => "causal",
            Consistency::Sequential => "sequential",
            Consistency::Linearizable => "linearizable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RequirementsError {
    #[error("Invalid requirements JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported requirements schema_version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },
    #[error("Invalid {field}: {value} (must be finite and non-negative)")]
    InvalidCost { field: &'static str, value: f64 },
}

/// What the caller will not give up. Supplied per call, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Requirements {
    /// Operator ids that must not be used; also blocks operators refining them.
    pub forbidden: BTreeSet<String>,
    /// Weakest consistency any applied operator may provide.
    pub min_consistency: Consistency,
    /// Ceiling on the cumulative semantic cost the caller accepts.
    pub max_semantic_cost: Option<f64>,
    /// Cumulative cost the synthesis run may spend.
    pub budget: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequirementsFile {
    schema_version: u32,
    #[serde(default)]
    forbidden: BTreeSet<String>,
    #[serde(default)]
    min_consistency: Consistency,
    #[serde(default)]
    max_semantic_cost: Option<f64>,
    #[serde(default)]
    budget: Option<f64>,
}

/// The first requirement an operator would violate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "requirement", rename_all = "snake_case")]
pub enum Blocker {
    Forbidden {
        operator: String,
        matched: String,
    },
    MinConsistency {
        operator: String,
        required: Consistency,
        provided: Consistency,
    },
    MaxSemanticCost {
        operator: String,
        limit: f64,
        would_spend: f64,
    },
    Budget {
        operator: String,
        limit: f64,
        would_spend: f64,
    },
}

impl Blocker {
    pub fn operator(&self) -> &str {
        match self {
            Blocker::Forbidden { operator, .. }
            | Blocker::MinConsistency { operator, .. }
            | Blocker::MaxSemanticCost { operator, .. }
            | Blocker::Budget { operator, .. } => operator,
        }
    }

    /// Budget exhaustion makes a target unreachable; the others are conflicts
    /// with what the caller asked to keep.
    pub fn is_budget(&self) -> bool {
        matches!(self, Blocker::Budget { .. })
    }
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Blocker::Forbidden { operator, matched } if operator == matched => {
                write!(f, "{operator} is forbidden")
            }
            Blocker::Forbidden { operator, matched } => {
                write!(f, "{operator} refines forbidden {matched}")
            }
            Blocker::MinConsistency {
                operator,
                required,
                provided,
            } => write!(f, "{operator} provides {provided}, {required} required"),
            Blocker::MaxSemanticCost {
                operator,
                limit,
                would_spend,
            } => write!(
                f,
                "{operator} would raise semantic cost to {would_spend} (max {limit})"
            ),
            Blocker::Budget {
                operator,
                limit,
                would_spend,
            } => write!(f, "{operator} would spend {would_spend} of budget {limit}"),
        }
    }
}

impl Requirements {
    pub fn from_json(json: &str) -> Result<Self, RequirementsError> {
        let file: RequirementsFile = serde_json::from_str(json)?;
        if file.schema_version != REQUIREMENTS_SCHEMA_VERSION {
            return Err(RequirementsError::SchemaVersion {
                found: file.schema_version,
                expected: REQUIREMENTS_SCHEMA_VERSION,
            });
        }
        let requirements = Requirements {
            forbidden: file.forbidden,
            min_consistency: file.min_consistency,
            max_semantic_cost: file.max_semantic_cost,
            budget: file.budget,
        };
        requirements.validate()?;
        Ok(requirements)
    }

    pub fn validate(&self) -> Result<(), RequirementsError> {
        for (field, value) in [
            ("max_semantic_cost", self.max_semantic_cost),
            ("budget", self.budget),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(RequirementsError::InvalidCost { field, value: v });
                }
            }
        }
        Ok(())
    }

    /// Check `op` against every requirement, given `spent` so far.
    ///
    /// Requirements are checked in a fixed order (forbidden, consistency,
    /// semantic cost, budget) and the first failure is reported.
    pub fn admit<O: RestructuringOperator + ?Sized>(&self, op: &O, spent: f64) -> Result<(), Blocker> {
        let id = op.id();
        if let Some(matched) = std::iter::once(id)
            .chain(op.refines().iter().copied())
            .find(|candidate| self.forbidden.contains(*candidate))
        {
            return Err(Blocker::Forbidden {
                operator: id.to_string(),
                matched: matched.to_string(),
            });
        }
        if op.consistency() < self.min_consistency {
            return Err(Blocker::MinConsistency {
                operator: id.to_string(),
                required: self.min_consistency,
                provided: op.consistency(),
            });
        }
        let would_spend = spent + op.semantic_cost();
        if let Some(limit) = self.max_semantic_cost {
            if would_spend > limit {
                return Err(Blocker::MaxSemanticCost {
                    operator: id.to_string(),
                    limit,
                    would_spend,
                });
            }
        }
        if let Some(limit) = self.budget {
            if would_spend > limit {
                return Err(Blocker::Budget {
                    operator: id.to_string(),
                    limit,
                    would_spend,
                });
            }
        }
        Ok(())
    }

    /// Stable hash over every field, used as a protocol cache key.
    pub fn structural_hash(&self) -> StructuralHash {
        let mut hasher = StructuralHasher::new("requirements");
        for id in &self.forbidden {
            hasher = hasher.field(id.as_bytes());
        }
        let cost = |v: Option<f64>| v.map(|v| v.to_bits().to_le_bytes().to_vec()).unwrap_or_default();
        hasher
            .field(b"min_consistency")
            .field(self.min_consistency.as_str().as_bytes())
            .field(b"max_semantic_cost")
            .field(&cost(self.max_semantic_cost))
            .field(b"budget")
            .field(&cost(self.budget))
            .finish()
    }
}
