#![doc = include_str!("../README.md")]

//! Hybrid protocol emission.
//!
//! [`emit`] turns a decomposition into a [`HybridProtocol`]: a product of
//! join-semilattices for the liftable states and a named agreement boundary
//! for the residual. The protocol is plain data; [`boundary::HybridReplica`]
//! runs it and [`rust_gen::render_rust`] renders a Rust scaffold from it.

pub mod boundary;
pub mod cache;
pub mod common;
pub mod lattice;
pub mod merge;
pub mod rust_gen;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use lifter_engine::decompose::Decomposition;
use lifter_ir::operation::Effect;
use lifter_ir::StructuralHash;

use crate::merge::{merge_fn_for, MergeFunction};

/// JSON schema version of [`HybridProtocol`].
pub const PROTOCOL_SCHEMA_VERSION: u32 = 1;

/// Errors returned by emission and rendering.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("state '{0}' is not declared")]
    UnknownState(String),
    /// A liftable state whose kind has no join-semilattice.
    #[error("no merge lattice for state '{state}' of kind {kind}: {reason}")]
    NoLattice {
        state: String,
        kind: String,
        reason: String,
    },
    #[error("machine '{machine}' behind state '{state}' is not a join-semilattice: {reason}")]
    NotASemilattice {
        state: String,
        machine: String,
        reason: String,
    },
    #[error("failed to render protocol: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Kind of agreement primitive the residual is bound to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgreementKind {
    #[default]
    Consensus,
    AtomicBroadcast,
}

impl AgreementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgreementKind::Consensus => "consensus",
            AgreementKind::AtomicBroadcast => "atomic-broadcast",
        }
    }
}

/// Named reference the caller wires to its own agreement library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgreementBinding {
    pub name: String,
    pub primitive: AgreementKind,
}

/// What crosses into the agreement round and what comes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundaryContract {
    /// The residual `O_U`, rendered.
    pub residual: String,
    pub residual_conjuncts: Vec<String>,
    /// States snapshotted into each round.
    pub handoff_states: Vec<String>,
    /// States an agreement round may write back.
    pub returns: Vec<String>,
    pub coordinated_updates: Vec<String>,
    pub primitive: AgreementKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Applied to local CRDT state without coordination.
    Local,
    /// Submitted to the agreement primitive.
    Agreement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateRoute {
    pub state: String,
    pub effect: Effect,
    pub route: Route,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridProtocol {
    pub schema_version: u32,
    pub operation: String,
    pub spec_hash: StructuralHash,
    pub lifting: f64,
    pub workload_lifting: Option<f64>,
    pub crdt_merge: MergeFunction,
    pub agreement_binding: Option<AgreementBinding>,
    pub boundary_contract: BoundaryContract,
    pub routes: IndexMap<String, UpdateRoute>,
}

impl HybridProtocol {
    /// No update ever needs agreement.
    pub fn is_coordination_free(&self) -> bool {
        self.agreement_binding.is_none()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EmitOptions {
    pub primitive: AgreementKind,
    /// Binding name; defaults to `<operation>-agreement`.
    pub binding_name: Option<String>,
}

/// Emit the hybrid protocol for a decomposition.
///
/// Every liftable state must have a merge lattice. Handoff states are left
/// to the agreement primitive and need none.
pub fn emit(decomposition: &Decomposition, options: &EmitOptions) -> Result<HybridProtocol, EmitError> {
    let op = &decomposition.operation;
    let mut crdt_merge = MergeFunction::default();
    for state in &decomposition.liftable_states {
        crdt_merge
            .components
            .insert(state.clone(), merge_fn_for(op, state)?);
    }

    let agreement_binding = (!decomposition.universal_conjuncts.is_empty()).then(|| AgreementBinding {
        name: options
            .binding_name
            .clone()
            .unwrap_or_else(|| format!("{}-agreement", op.name)),
        primitive: options.primitive,
    });

    let routes: IndexMap<String, UpdateRoute> = op
        .updates
        .values()
        .map(|u| {
            let route = if decomposition.handoff_states.contains(&u.state) {
                Route::Agreement
            } else {
                Route::Local
            };
            (
                u.name.clone(),
                UpdateRoute {
                    state: u.state.clone(),
                    effect: u.effect.clone(),
                    route,
                },
            )
        })
        .collect();

    let boundary_contract = BoundaryContract {
        residual: decomposition.universal.to_string(),
        residual_conjuncts: decomposition
            .universal_conjuncts
            .iter()
            .map(ToString::to_string)
            .collect(),
        handoff_states: decomposition.handoff_states.clone(),
        returns: decomposition.handoff_states.clone(),
        coordinated_updates: routes
            .iter()
            .filter(|(_, r)| r.route == Route::Agreement)
            .map(|(name, _)| name.clone())
            .collect(),
        primitive: options.primitive,
    };

    info!(
        operation = %op.name,
        lifting = decomposition.lifting,
        merged = crdt_merge.components.len(),
        handoff = boundary_contract.handoff_states.len(),
        "emitted hybrid protocol"
    );
    Ok(HybridProtocol {
        schema_version: PROTOCOL_SCHEMA_VERSION,
        operation: op.name.clone(),
        spec_hash: op.structural_hash(),
        lifting: decomposition.lifting,
        workload_lifting: decomposition.workload_lifting,
        crdt_merge,
        agreement_binding,
        boundary_contract,
        routes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::MergeFn;
    use lifter_engine::decompose::decompose;
    use lifter_engine::pipeline::load_operation;

    const COUNTER: &str = r#"
(operation counter
  (domain replica (r1 r2))
  (state value counter)
  (update increment value increment)
  (exists (n replica) (value-eq-sum value n)))
"#;

    const MUTEX: &str = r#"
(operation mutex
  (domain time (t0 t1))
  (state holder lock)
  (update acquire holder acquire)
  (predicate one-holder exclusion)
  (forall (t time) (one-holder holder t)))
"#;

    fn emit_src(src: &str) -> Result<HybridProtocol, EmitError> {
        let op = load_operation(src, "test.lift").unwrap();
        emit(&decompose(&op).unwrap(), &EmitOptions::default())
    }

    #[test]
    fn counter_emits_vector_sum_without_binding() {
        let protocol = emit_src(COUNTER).unwrap();
        assert!(protocol.is_coordination_free());
        assert_eq!(protocol.crdt_merge.components["value"], MergeFn::VectorSum);
        assert_eq!(protocol.routes["increment"].route, Route::Local);
        assert!(protocol.boundary_contract.handoff_states.is_empty());
    }

    #[test]
    fn unsynthesized_mutex_is_all_boundary() {
        let protocol = emit_src(MUTEX).unwrap();
        assert!(protocol.crdt_merge.components.is_empty());
        let binding = protocol.agreement_binding.as_ref().unwrap();
        assert_eq!(binding.name, "mutex-agreement");
        assert_eq!(binding.primitive, AgreementKind::Consensus);
        assert_eq!(protocol.boundary_contract.returns, vec!["holder".to_string()]);
        assert_eq!(protocol.boundary_contract.coordinated_updates, vec!["acquire".to_string()]);
    }

    #[test]
    fn protocol_json_names_lattices_and_binding() {
        let json: serde_json::Value =
            serde_json::from_str(&emit_src(MUTEX).unwrap().to_json().unwrap()).unwrap();
        assert_eq!(json["schema_version"], 1);
        assert_eq!(json["agreement_binding"]["primitive"], "consensus");
        assert_eq!(json["routes"]["acquire"]["route"], "agreement");
        assert_eq!(json["spec_hash"].as_str().unwrap().len(), 64);
    }
}
