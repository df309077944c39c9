#![allow(dead_code)]

use lifter_engine::decompose::WorkloadTrace;
use lifter_engine::pipeline;
use lifter_engine::requirements::Requirements;
use lifter_ir::Operation;

pub fn specs_dir() -> String {
    format!("{}/../../specs", env!("CARGO_MANIFEST_DIR"))
}

pub fn load_spec(name: &str) -> String {
    let path = format!("{}/{name}", specs_dir());
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load {path}: {e}"))
}

pub fn load_operation(name: &str) -> Operation {
    pipeline::load_operation(&load_spec(name), name)
        .unwrap_or_else(|e| panic!("Failed to lower {name}: {e}"))
}

pub fn load_requirements(name: &str) -> Requirements {
    let json = load_spec(&format!("requirements/{name}"));
    Requirements::from_json(&json).unwrap_or_else(|e| panic!("Bad requirements {name}: {e}"))
}

pub fn load_workload(name: &str) -> WorkloadTrace {
    let json = load_spec(&format!("workloads/{name}"));
    WorkloadTrace::from_json(&json).unwrap_or_else(|e| panic!("Bad workload {name}: {e}"))
}
