#![allow(dead_code)]

use std::sync::Arc;

use lifter_codegen::{emit, EmitOptions, HybridProtocol};
use lifter_engine::catalog::Catalog;
use lifter_engine::pipeline;
use lifter_engine::requirements::Requirements;
use lifter_engine::synthesis::{synthesize, SynthesisOptions};
use lifter_ir::Operation;

pub fn load_spec(name: &str) -> String {
    let path = format!("{}/../../specs/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load {path}: {e}"))
}

pub fn load_operation(name: &str) -> Operation {
    pipeline::load_operation(&load_spec(name), name)
        .unwrap_or_else(|e| panic!("Failed to lower {name}: {e}"))
}

/// Synthesize `name` to full lifting with default requirements and emit it.
pub fn synthesized_protocol(name: &str) -> Arc<HybridProtocol> {
    let s = synthesize(
        &load_operation(name),
        &Catalog::standard(),
        &Requirements::default(),
        1.0,
        &SynthesisOptions::default(),
    )
    .unwrap_or_else(|e| panic!("synthesis of {name} failed: {e}"));
    Arc::new(emit(&s.decomposition, &EmitOptions::default()).unwrap_or_else(|e| panic!("emit {name}: {e}")))
}
