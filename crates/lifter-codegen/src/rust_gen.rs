//! Rust scaffold rendering for emitted protocols.
//!
//! The scaffold carries the merge code for the lifted state and the trait
//! the caller implements to bind the residual to its agreement library.
//! Networking and persistence are left to the integrator.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::common::{rust_type, to_field_ident, to_pascal_case};
use crate::merge::{MachineOrder, MergeFn};
use crate::{EmitError, HybridProtocol, Route};

/// Provenance metadata written as header annotations.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceInfo {
    /// SHA-256 of the `.lift` source the protocol came from.
    pub source_sha256: String,
    pub requirements_sha256: Option<String>,
    pub target: Option<f64>,
}

/// Render a Rust source file for `protocol`, headed by provenance lines.
pub fn render_rust(protocol: &HybridProtocol, provenance: &ProvenanceInfo) -> Result<String, EmitError> {
    let mut out = String::new();
    write_provenance(&mut out, protocol, provenance)?;
    write_header(&mut out, protocol)?;
    write_helpers(&mut out, protocol)?;
    write_machines(&mut out, protocol)?;
    write_replica_state(&mut out, protocol)?;
    write_agreement(&mut out, protocol)?;
    write_routes(&mut out, protocol)?;
    Ok(out)
}

fn write_provenance(
    out: &mut String,
    protocol: &HybridProtocol,
    provenance: &ProvenanceInfo,
) -> std::fmt::Result {
    writeln!(out, "// @lifter-provenance source_sha256={}", provenance.source_sha256)?;
    writeln!(out, "// @lifter-provenance spec_hash={}", protocol.spec_hash)?;
    if let Some(hash) = &provenance.requirements_sha256 {
        writeln!(out, "// @lifter-provenance requirements_sha256={hash}")?;
    }
    if let Some(target) = provenance.target {
        writeln!(out, "// @lifter-provenance target={target}")?;
    }
    writeln!(out, "// @lifter-provenance lifting={}", protocol.lifting)?;
    writeln!(out, "// @lifter-provenance schema_version={}", protocol.schema_version)?;
    writeln!(out)
}

fn write_header(out: &mut String, protocol: &HybridProtocol) -> std::fmt::Result {
    writeln!(out, "// Generated from operation: {}", protocol.operation)?;
    if protocol.is_coordination_free() {
        writeln!(out, "// Every update is coordination-free.")?;
    } else {
        writeln!(
            out,
            "// Updates on {} go through agreement; the rest merge locally.",
            protocol.boundary_contract.handoff_states.join(", ")
        )?;
    }
    writeln!(out)?;
    writeln!(out, "#![allow(unused)]")?;
    writeln!(out)?;
    writeln!(out, "use std::collections::{{BTreeMap, BTreeSet}};")?;
    writeln!(out)
}

fn uses(protocol: &HybridProtocol, pred: impl Fn(&MergeFn) -> bool) -> bool {
    protocol.crdt_merge.components.values().any(pred)
}

fn write_helpers(out: &mut String, protocol: &HybridProtocol) -> std::fmt::Result {
    let counters = uses(protocol, |f| {
        matches!(
            f,
            MergeFn::VectorSum | MergeFn::PnVectorSum | MergeFn::FieldVectorSum { .. }
        )
    });
    if counters {
        writeln!(out, "fn join_counts(into: &mut BTreeMap<String, u64>, from: &BTreeMap<String, u64>) {{")?;
        writeln!(out, "    for (replica, n) in from {{")?;
        writeln!(out, "        let slot = into.entry(replica.clone()).or_insert(0);")?;
        writeln!(out, "        *slot = (*slot).max(*n);")?;
        writeln!(out, "    }}")?;
        writeln!(out, "}}")?;
        writeln!(out)?;
    }
    if uses(protocol, |f| matches!(f, MergeFn::PnVectorSum | MergeFn::FieldVectorSum { .. })) {
        writeln!(out, "#[derive(Debug, Clone, Default, PartialEq, Eq)]")?;
        writeln!(out, "pub struct PnCounter {{")?;
        writeln!(out, "    pub inc: BTreeMap<String, u64>,")?;
        writeln!(out, "    pub dec: BTreeMap<String, u64>,")?;
        writeln!(out, "}}")?;
        writeln!(out)?;
        writeln!(out, "impl PnCounter {{")?;
        writeln!(out, "    pub fn join(&mut self, other: &Self) {{")?;
        writeln!(out, "        join_counts(&mut self.inc, &other.inc);")?;
        writeln!(out, "        join_counts(&mut self.dec, &other.dec);")?;
        writeln!(out, "    }}")?;
        writeln!(out)?;
        writeln!(out, "    pub fn value(&self) -> i64 {{")?;
        writeln!(out, "        let inc: u64 = self.inc.values().sum();")?;
        writeln!(out, "        let dec: u64 = self.dec.values().sum();")?;
        writeln!(out, "        inc as i64 - dec as i64")?;
        writeln!(out, "    }}")?;
        writeln!(out, "}}")?;
        writeln!(out)?;
    }
    if uses(protocol, |f| matches!(f, MergeFn::ObservedRemoveSet)) {
        writeln!(out, "/// Observed-remove set: adds are tagged (element, replica, seq).")?;
        writeln!(out, "#[derive(Debug, Clone, Default, PartialEq, Eq)]")?;
        writeln!(out, "pub struct OrSet {{")?;
        writeln!(out, "    pub adds: BTreeSet<(String, String, u64)>,")?;
        writeln!(out, "    pub removed: BTreeSet<(String, u64)>,")?;
        writeln!(out, "}}")?;
        writeln!(out)?;
        writeln!(out, "impl OrSet {{")?;
        writeln!(out, "    pub fn join(&mut self, other: &Self) {{")?;
        writeln!(out, "        self.adds.extend(other.adds.iter().cloned());")?;
        writeln!(out, "        self.removed.extend(other.removed.iter().cloned());")?;
        writeln!(out, "    }}")?;
        writeln!(out)?;
        writeln!(out, "    pub fn contains(&self, element: &str) -> bool {{")?;
        writeln!(out, "        self.adds.iter().any(|(e, replica, seq)| {{")?;
        writeln!(out, "            e == element && !self.removed.contains(&(replica.clone(), *seq))")?;
        writeln!(out, "        }})")?;
        writeln!(out, "    }}")?;
        writeln!(out, "}}")?;
        writeln!(out)?;
    }
    if uses(protocol, |f| matches!(f, MergeFn::GraphUnion)) {
        writeln!(out, "#[derive(Debug, Clone, Default, PartialEq, Eq)]")?;
        writeln!(out, "pub struct Graph {{")?;
        writeln!(out, "    pub vertices: BTreeSet<String>,")?;
        writeln!(out, "    pub edges: BTreeSet<(String, String)>,")?;
        writeln!(out, "}}")?;
        writeln!(out)?;
        writeln!(out, "impl Graph {{")?;
        writeln!(out, "    pub fn join(&mut self, other: &Self) {{")?;
        writeln!(out, "        self.vertices.extend(other.vertices.iter().cloned());")?;
        writeln!(out, "        self.edges.extend(other.edges.iter().cloned());")?;
        writeln!(out, "    }}")?;
        writeln!(out, "}}")?;
        writeln!(out)?;
    }
    Ok(())
}

fn write_machines(out: &mut String, protocol: &HybridProtocol) -> std::fmt::Result {
    let mut written = BTreeSet::new();
    for f in protocol.crdt_merge.components.values() {
        let MergeFn::StateJoin { machine, order, .. } = f else {
            continue;
        };
        if written.insert(machine.clone()) {
            write_machine_enum(out, machine, order)?;
        }
    }
    Ok(())
}

fn write_machine_enum(out: &mut String, machine: &str, order: &MachineOrder) -> std::fmt::Result {
    let name = format!("{}State", to_pascal_case(machine));
    writeln!(out, "/// States of `{machine}`, joined by reachability.")?;
    writeln!(out, "#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]")?;
    writeln!(out, "pub enum {name} {{")?;
    for state in order.up.keys() {
        if *state == order.bottom {
            writeln!(out, "    #[default]")?;
        }
        writeln!(out, "    {},", to_pascal_case(state))?;
    }
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(out, "impl {name} {{")?;
    writeln!(out, "    pub fn join(self, other: Self) -> Self {{")?;
    writeln!(out, "        match (self, other) {{")?;
    for a in order.up.keys() {
        for b in order.up.keys() {
            // MachineOrder::of already checked every pair has a join.
            let Some(c) = order.join(a, b) else { continue };
            writeln!(
                out,
                "            ({name}::{}, {name}::{}) => {name}::{},",
                to_pascal_case(a),
                to_pascal_case(b),
                to_pascal_case(&c)
            )?;
        }
    }
    writeln!(out, "        }}")?;
    writeln!(out, "    }}")?;
    writeln!(out, "}}")?;
    writeln!(out)
}

fn write_replica_state(out: &mut String, protocol: &HybridProtocol) -> std::fmt::Result {
    let components = &protocol.crdt_merge.components;
    writeln!(out, "/// Lifted state of one replica. Merging is a join: commutative,")?;
    writeln!(out, "/// associative and idempotent.")?;
    writeln!(out, "#[derive(Debug, Clone, Default, PartialEq, Eq)]")?;
    writeln!(out, "pub struct ReplicaState {{")?;
    for (state, f) in components {
        writeln!(out, "    /// {}", f.lattice())?;
        writeln!(out, "    pub {}: {},", to_field_ident(state), rust_type(f))?;
    }
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(out, "impl ReplicaState {{")?;
    writeln!(out, "    pub fn merge(&mut self, other: &Self) {{")?;
    for (state, f) in components {
        let field = to_field_ident(state);
        match f {
            MergeFn::VectorSum => {
                writeln!(out, "        join_counts(&mut self.{field}, &other.{field});")?;
            }
            MergeFn::PnVectorSum | MergeFn::ObservedRemoveSet | MergeFn::GraphUnion => {
                writeln!(out, "        self.{field}.join(&other.{field});")?;
            }
            MergeFn::FieldVectorSum { .. } => {
                writeln!(out, "        for (key, counter) in &other.{field} {{")?;
                writeln!(out, "            self.{field}.entry(key.clone()).or_default().join(counter);")?;
                writeln!(out, "        }}")?;
            }
            MergeFn::SetUnion | MergeFn::GeneratorSet { .. } => {
                writeln!(out, "        self.{field}.extend(other.{field}.iter().cloned());")?;
            }
            MergeFn::LwwRegister | MergeFn::TokenMax => {
                writeln!(out, "        if other.{field} > self.{field} {{")?;
                writeln!(out, "            self.{field} = other.{field}.clone();")?;
                writeln!(out, "        }}")?;
            }
            MergeFn::MaxRegister => {
                writeln!(out, "        self.{field} = self.{field}.max(other.{field});")?;
            }
            MergeFn::FlagOr => {
                writeln!(out, "        self.{field} |= other.{field};")?;
            }
            MergeFn::StateJoin { .. } => {
                writeln!(out, "        self.{field} = self.{field}.join(other.{field});")?;
            }
        }
    }
    writeln!(out, "    }}")?;
    writeln!(out, "}}")?;
    writeln!(out)
}

fn write_agreement(out: &mut String, protocol: &HybridProtocol) -> std::fmt::Result {
    let Some(binding) = &protocol.agreement_binding else {
        return Ok(());
    };
    let contract = &protocol.boundary_contract;
    writeln!(out, "/// Snapshot handed to one agreement round.")?;
    writeln!(out, "#[derive(Debug, Clone, PartialEq, Eq)]")?;
    writeln!(out, "pub struct Handoff {{")?;
    writeln!(out, "    pub replica: String,")?;
    writeln!(out, "    pub update: &'static str,")?;
    writeln!(out, "    pub argument: Option<String>,")?;
    writeln!(out, "    pub snapshot: BTreeMap<String, String>,")?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(out, "#[derive(Debug, Clone, Default, PartialEq, Eq)]")?;
    writeln!(out, "pub struct Decided {{")?;
    writeln!(out, "    pub writes: BTreeMap<String, String>,")?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(out, "/// Binding `{}` ({}).", binding.name, binding.primitive.as_str())?;
    writeln!(out, "///")?;
    writeln!(out, "/// Residual: {}", contract.residual)?;
    writeln!(out, "/// Returns: {}", contract.returns.join(", "))?;
    writeln!(out, "pub trait {} {{", to_pascal_case(&binding.name))?;
    writeln!(out, "    type Error;")?;
    writeln!(out)?;
    writeln!(out, "    /// Blocks until the round decides.")?;
    writeln!(out, "    fn decide(&mut self, handoff: &Handoff) -> Result<Decided, Self::Error>;")?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    write_str_list(out, "HANDOFF_STATES", &contract.handoff_states)
}

fn write_routes(out: &mut String, protocol: &HybridProtocol) -> std::fmt::Result {
    let mut coordinated = Vec::new();
    let mut local = Vec::new();
    for (name, r) in &protocol.routes {
        match r.route {
            Route::Agreement => coordinated.push(name.clone()),
            Route::Local => local.push(name.clone()),
        }
    }
    write_str_list(out, "COORDINATED_UPDATES", &coordinated)?;
    write_str_list(out, "LOCAL_UPDATES", &local)
}

fn write_str_list(out: &mut String, name: &str, items: &[String]) -> std::fmt::Result {
    let quoted: Vec<String> = items.iter().map(|s| format!("{s:?}")).collect();
    writeln!(out, "pub const {name}: &[&str] = &[{}];", quoted.join(", "))
}
