mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;

use common::{load_operation, synthesized_protocol};
use lifter_codegen::boundary::{AgreementPrimitive, Decided, Handoff, HybridReplica};
use lifter_codegen::merge::MergeFn;
use lifter_codegen::rust_gen::{render_rust, ProvenanceInfo};
use lifter_codegen::{emit, AgreementBinding, AgreementKind, EmitError, EmitOptions, Route};
use lifter_engine::catalog::Catalog;
use lifter_engine::decompose::decompose;
use lifter_engine::requirements::Requirements;
use lifter_engine::synthesis::{synthesize, Synthesis, SynthesisOptions};
use serde_json::json;

/// Fails the test if any update reaches agreement.
struct NoAgreement;

impl AgreementPrimitive for NoAgreement {
    type Error = Infallible;

    fn decide(&mut self, binding: &AgreementBinding, _: &Handoff) -> Result<Decided, Infallible> {
        panic!("unexpected agreement round on {}", binding.name)
    }
}

#[test]
fn counter_emits_a_vector_sum() {
    let protocol = emit(&decompose(&load_operation("counter.lift")).unwrap(), &EmitOptions::default()).unwrap();
    assert!(protocol.is_coordination_free());
    assert_eq!(protocol.crdt_merge.components["value"], MergeFn::VectorSum);
}

#[test]
fn session_machine_merges_by_reachability() {
    let protocol = emit(&decompose(&load_operation("session.lift")).unwrap(), &EmitOptions::default()).unwrap();
    let MergeFn::StateJoin { machine, order, .. } = &protocol.crdt_merge.components["phase"] else {
        panic!("phase should merge as a machine join");
    };
    assert_eq!(machine, "lifecycle");
    assert_eq!(order.bottom, "idle");
}

#[test]
fn unsynthesized_cart_hands_its_set_to_agreement() {
    let dec = decompose(&load_operation("shopping_cart.lift")).unwrap();
    let protocol = emit(&dec, &EmitOptions::default()).unwrap();
    assert!(!protocol.crdt_merge.components.contains_key("items"));
    assert!(protocol.boundary_contract.handoff_states.contains(&"items".to_string()));
    assert_eq!(protocol.routes["remove-item"].route, Route::Agreement);
}

#[test]
fn synthesized_mutex_is_coordination_free() {
    let protocol = synthesized_protocol("mutex.lift");
    assert!(protocol.is_coordination_free());
    assert_eq!(protocol.crdt_merge.components["holder"], MergeFn::TokenMax);

    let mut a = HybridReplica::new("r1", protocol.clone());
    let mut b = HybridReplica::new("r2", protocol);
    assert_eq!(a.update("acquire", None, &mut NoAgreement).unwrap(), Route::Local);
    b.update("acquire", None, &mut NoAgreement).unwrap();
    b.update("release", None, &mut NoAgreement).unwrap();
    let (sa, sb) = (a.crdt_state().clone(), b.crdt_state().clone());
    a.merge_from(&sb).unwrap();
    b.merge_from(&sa).unwrap();
    assert_eq!(a.crdt_state(), b.crdt_state());
    assert_eq!(a.observe("holder"), Some(json!({ "token": 2, "holder": null })));
}

#[test]
fn synthesized_cart_merges_every_state() {
    let protocol = synthesized_protocol("shopping_cart.lift");
    assert!(protocol.is_coordination_free());
    let lattices: BTreeMap<&str, &str> = protocol
        .crdt_merge
        .components
        .iter()
        .map(|(state, f)| (state.as_str(), f.lattice()))
        .collect();
    assert_eq!(lattices["items"], "observed_remove_set");
    assert_eq!(lattices["qty"], "field_vector_sum");
    assert_eq!(lattices["orders"], "lww_register");
}

#[test]
fn concurrent_add_survives_a_remove() {
    let protocol = synthesized_protocol("shopping_cart.lift");
    let mut a = HybridReplica::new("r1", protocol.clone());
    let mut b = HybridReplica::new("r2", protocol);
    a.update("add-item", Some("apple"), &mut NoAgreement).unwrap();
    b.update("add-item", Some("apple"), &mut NoAgreement).unwrap();
    b.update("add-item", Some("pear"), &mut NoAgreement).unwrap();
    a.update("remove-item", Some("apple"), &mut NoAgreement).unwrap();
    a.update("bump-qty", Some("units"), &mut NoAgreement).unwrap();
    b.update("bump-qty", Some("units"), &mut NoAgreement).unwrap();

    let (sa, sb) = (a.crdt_state().clone(), b.crdt_state().clone());
    a.merge_from(&sb).unwrap();
    b.merge_from(&sa).unwrap();
    assert_eq!(a.crdt_state(), b.crdt_state());
    assert_eq!(a.observe("items"), Some(json!(["apple", "pear"])));
}

#[test]
fn leader_election_keeps_an_agreement_binding() {
    let s = synthesize(
        &load_operation("leader_election.lift"),
        &Catalog::standard(),
        &Requirements::default(),
        1.0,
        &SynthesisOptions::default(),
    )
    .unwrap();
    let options = EmitOptions {
        primitive: AgreementKind::AtomicBroadcast,
        binding_name: Some("raft".into()),
    };
    let protocol = emit(&s.decomposition, &options).unwrap();
    let binding = protocol.agreement_binding.as_ref().unwrap();
    assert_eq!(binding.name, "raft");
    assert_eq!(binding.primitive, AgreementKind::AtomicBroadcast);
    assert_eq!(protocol.boundary_contract.handoff_states, vec!["leader".to_string()]);
    assert_eq!(protocol.boundary_contract.coordinated_updates, vec!["elect".to_string()]);
}

#[test]
fn liftable_lock_has_no_lattice() {
    let src = r#"
(operation guard
  (domain replica (r1 r2))
  (state latch lock)
  (update take latch acquire)
  (exists (r replica) (held latch r)))
"#;
    let op = lifter_engine::pipeline::load_operation(src, "guard.lift").unwrap();
    let err = emit(&decompose(&op).unwrap(), &EmitOptions::default()).unwrap_err();
    assert!(matches!(err, EmitError::NoLattice { ref state, .. } if state == "latch"), "{err}");
}

const LATEST_WRITE: &str = r#"
(operation latest
  (domain replica (r1 r2))
  (state value register)
  (update write value assign)
  (predicate last-write register)
  (forall (r replica) (last-write value r)))
"#;

fn synthesize_latest(requirements: &Requirements) -> Synthesis {
    let op = lifter_engine::pipeline::load_operation(LATEST_WRITE, "latest.lift").unwrap();
    synthesize(&op, &Catalog::standard(), requirements, 1.0, &SynthesisOptions::default()).unwrap()
}

#[test]
fn register_merges_only_through_its_lww_conversion() {
    let s = synthesize_latest(&Requirements::default());
    assert_eq!(s.trace.operators(), vec!["crdt_lww_register"]);
    let protocol = emit(&s.decomposition, &EmitOptions::default()).unwrap();
    assert_eq!(protocol.crdt_merge.components["value"], MergeFn::LwwRegister);
}

#[test]
fn forbidden_lww_leaves_the_register_with_agreement() {
    let requirements = Requirements {
        forbidden: BTreeSet::from(["crdt_lww_register".to_string()]),
        ..Requirements::default()
    };
    let s = synthesize_latest(&requirements);
    assert!(!s.is_success(), "{}", s.outcome);
    assert!(s.trace.is_empty());
    let protocol = emit(&s.decomposition, &EmitOptions::default()).unwrap();
    assert!(!protocol.crdt_merge.components.contains_key("value"));
    assert_eq!(protocol.boundary_contract.handoff_states, vec!["value".to_string()]);
    assert_eq!(protocol.routes["write"].route, Route::Agreement);
}

#[test]
fn liftable_plain_register_has_no_lattice() {
    let src = r#"
(operation scratch
  (domain replica (r1 r2))
  (state note register)
  (update jot note assign)
  (exists (r replica) (seen note r)))
"#;
    let op = lifter_engine::pipeline::load_operation(src, "scratch.lift").unwrap();
    let err = emit(&decompose(&op).unwrap(), &EmitOptions::default()).unwrap_err();
    assert!(matches!(err, EmitError::NoLattice { ref state, .. } if state == "note"), "{err}");
}

#[test]
fn rendered_cart_scaffold_carries_its_lattices() {
    let protocol = synthesized_protocol("shopping_cart.lift");
    let provenance = ProvenanceInfo {
        source_sha256: lifter_codegen::common::sha256_hex(common::load_spec("shopping_cart.lift").as_bytes()),
        requirements_sha256: Some("00ff".into()),
        target: Some(1.0),
    };
    let code = render_rust(&protocol, &provenance).unwrap();
    assert!(code.starts_with("// @lifter-provenance source_sha256="));
    assert!(code.contains("// @lifter-provenance requirements_sha256=00ff"));
    assert!(code.contains("pub struct OrSet {"));
    assert!(code.contains("pub struct PnCounter {"));
    assert!(code.contains("pub items: OrSet,"));
    assert!(code.contains("pub qty: BTreeMap<String, PnCounter>,"));
    assert!(code.contains("pub orders: Option<(u64, String, String)>,"));
    assert!(!code.contains("pub trait"));
    assert!(code.contains("pub const COORDINATED_UPDATES: &[&str] = &[];"));
}
