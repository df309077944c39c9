//! Runtime seam between local CRDT state and the caller's agreement
//! primitive.
//!
//! Liftable updates apply locally and never block. Updates on handoff
//! states are packaged as a [`Handoff`] and passed to the caller's
//! [`AgreementPrimitive`], which may block for as many rounds as it needs.
//! Timeouts and retries belong to the primitive.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::lattice::MergeError;
use crate::merge::{Delta, ReplicaState};
use crate::{AgreementBinding, HybridProtocol, Route};

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("operation has no update named '{0}'")]
    UnknownUpdate(String),
    #[error("update '{0}' needs agreement but the protocol has no agreement binding")]
    NoAgreementBinding(String),
    #[error("agreement wrote state '{0}', which the boundary contract does not return")]
    UnexpectedWrite(String),
    #[error("agreement primitive failed: {0}")]
    Agreement(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// State that crosses into one agreement round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Handoff {
    pub binding: String,
    pub operation: String,
    pub replica: String,
    pub update: String,
    pub state: String,
    pub argument: Option<String>,
    /// Last agreed value of every handoff state.
    pub snapshot: BTreeMap<String, serde_json::Value>,
}

/// What an agreement round returns: new values for handoff states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decided {
    pub writes: BTreeMap<String, serde_json::Value>,
}

/// A caller-supplied agreement primitive (consensus, atomic broadcast).
///
/// Calls block until the round decides or the implementation gives up.
pub trait AgreementPrimitive {
    type Error: std::error::Error + Send + Sync + 'static;

    fn decide(&mut self, binding: &AgreementBinding, handoff: &Handoff) -> Result<Decided, Self::Error>;
}

/// One replica of an emitted hybrid protocol.
#[derive(Debug, Clone)]
pub struct HybridReplica {
    id: String,
    protocol: Arc<HybridProtocol>,
    crdt: ReplicaState,
    agreed: BTreeMap<String, serde_json::Value>,
    clock: u64,
}

impl HybridReplica {
    pub fn new(id: impl Into<String>, protocol: Arc<HybridProtocol>) -> Self {
        let crdt = protocol.crdt_merge.bottom();
        Self {
            id: id.into(),
            protocol,
            crdt,
            agreed: BTreeMap::new(),
            clock: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn protocol(&self) -> &HybridProtocol {
        &self.protocol
    }

    /// CRDT part of the state, the payload for anti-entropy.
    pub fn crdt_state(&self) -> &ReplicaState {
        &self.crdt
    }

    pub fn agreed(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.agreed
    }

    /// Current value of `state` as a reader on this replica sees it.
    pub fn observe(&self, state: &str) -> Option<serde_json::Value> {
        self.crdt
            .get(state)
            .map(|v| v.observe())
            .or_else(|| self.agreed.get(state).cloned())
    }

    /// Apply `update`, locally when its state is liftable and through
    /// `primitive` otherwise. Returns the route taken.
    pub fn update<P: AgreementPrimitive + ?Sized>(
        &mut self,
        update: &str,
        argument: Option<&str>,
        primitive: &mut P,
    ) -> Result<Route, BoundaryError> {
        let route = self
            .protocol
            .routes
            .get(update)
            .ok_or_else(|| BoundaryError::UnknownUpdate(update.to_string()))?
            .clone();
        self.clock += 1;
        match route.route {
            Route::Local => {
                let delta = Delta {
                    replica: &self.id,
                    clock: self.clock,
                    effect: &route.effect,
                    argument,
                };
                self.protocol
                    .crdt_merge
                    .apply(&mut self.crdt, &route.state, delta)?;
            }
            Route::Agreement => {
                let binding = self
                    .protocol
                    .agreement_binding
                    .as_ref()
                    .ok_or_else(|| BoundaryError::NoAgreementBinding(update.to_string()))?;
                let handoff = Handoff {
                    binding: binding.name.clone(),
                    operation: self.protocol.operation.clone(),
                    replica: self.id.clone(),
                    update: update.to_string(),
                    state: route.state.clone(),
                    argument: argument.map(str::to_string),
                    snapshot: self.agreed.clone(),
                };
                debug!(replica = %self.id, update, binding = %binding.name, "handing off to agreement");
                let decided = primitive
                    .decide(binding, &handoff)
                    .map_err(|e| BoundaryError::Agreement(Box::new(e)))?;
                let returns = &self.protocol.boundary_contract.returns;
                if let Some(stray) = decided.writes.keys().find(|k| !returns.contains(k)) {
                    return Err(BoundaryError::UnexpectedWrite(stray.clone()));
                }
                self.agreed.extend(decided.writes);
            }
        }
        Ok(route.route)
    }

    /// Merge a remote replica's CRDT state. Never blocks.
    pub fn merge_from(&mut self, remote: &ReplicaState) -> Result<(), BoundaryError> {
        self.crdt = self.protocol.crdt_merge.merge(&self.crdt, remote)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{emit, EmitOptions};
    use lifter_engine::decompose::decompose;
    use lifter_engine::pipeline::load_operation;
    use std::convert::Infallible;

    const LEADER: &str = r#"
(operation leader_election
  (domain replica (r1 r2))
  (state leader register)
  (state votes counter)
  (update elect leader assign)
  (update vote votes increment)
  (predicate same-leader agreement)
  (and
    (exists (r replica) (seen votes r))
    (forall (r replica) (same-leader leader r))))
"#;

    /// Decides every proposal immediately, echoing the argument.
    #[derive(Default)]
    struct Echo {
        rounds: usize,
    }

    impl AgreementPrimitive for Echo {
        type Error = Infallible;

        fn decide(&mut self, _: &AgreementBinding, handoff: &Handoff) -> Result<Decided, Infallible> {
            self.rounds += 1;
            Ok(Decided {
                writes: BTreeMap::from([(
                    handoff.state.clone(),
                    serde_json::json!(handoff.argument),
                )]),
            })
        }
    }

    fn protocol() -> Arc<HybridProtocol> {
        let op = load_operation(LEADER, "leader.lift").unwrap();
        Arc::new(emit(&decompose(&op).unwrap(), &EmitOptions::default()).unwrap())
    }

    #[test]
    fn liftable_updates_never_reach_the_primitive() {
        let mut replica = HybridReplica::new("r1", protocol());
        let mut echo = Echo::default();
        assert_eq!(replica.update("vote", None, &mut echo).unwrap(), Route::Local);
        assert_eq!(echo.rounds, 0);
        assert_eq!(replica.observe("votes"), Some(serde_json::json!(1)));
    }

    #[test]
    fn residual_updates_go_through_agreement() {
        let mut replica = HybridReplica::new("r1", protocol());
        let mut echo = Echo::default();
        let route = replica.update("elect", Some("r2"), &mut echo).unwrap();
        assert_eq!(route, Route::Agreement);
        assert_eq!(echo.rounds, 1);
        assert_eq!(replica.observe("leader"), Some(serde_json::json!("r2")));
    }

    #[test]
    fn replicas_converge_after_merging() {
        let protocol = protocol();
        let mut a = HybridReplica::new("r1", protocol.clone());
        let mut b = HybridReplica::new("r2", protocol);
        let mut echo = Echo::default();
        a.update("vote", None, &mut echo).unwrap();
        b.update("vote", None, &mut echo).unwrap();
        b.update("vote", None, &mut echo).unwrap();
        let (sa, sb) = (a.crdt_state().clone(), b.crdt_state().clone());
        a.merge_from(&sb).unwrap();
        b.merge_from(&sa).unwrap();
        assert_eq!(a.crdt_state(), b.crdt_state());
        assert_eq!(a.observe("votes"), Some(serde_json::json!(3)));
    }

    struct Rogue;

    impl AgreementPrimitive for Rogue {
        type Error = Infallible;

        fn decide(&mut self, _: &AgreementBinding, _: &Handoff) -> Result<Decided, Infallible> {
            Ok(Decided {
                writes: BTreeMap::from([("votes".to_string(), serde_json::json!(99))]),
            })
        }
    }

    #[test]
    fn writes_outside_the_contract_are_rejected() {
        let mut replica = HybridReplica::new("r1", protocol());
        let err = replica.update("elect", Some("r1"), &mut Rogue).unwrap_err();
        assert!(matches!(err, BoundaryError::UnexpectedWrite(s) if s == "votes"));
    }

    #[test]
    fn unknown_updates_are_rejected() {
        let mut replica = HybridReplica::new("r1", protocol());
        let err = replica.update("nope", None, &mut Echo::default()).unwrap_err();
        assert!(matches!(err, BoundaryError::UnknownUpdate(_)));
    }
}
