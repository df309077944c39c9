#![doc = include_str!("../README.md")]

//! Lifter intermediate representation and lowering.
//!
//! This crate defines the operation model consumed by the engine, the
//! lowering pass from the DSL AST, structural hashing and a finite-domain
//! evaluator used to check decomposition soundness.

pub mod eval;
pub mod formula;
pub mod hash;
pub mod lowering;
pub mod operation;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;

pub use formula::{Atom, Formula};
pub use hash::StructuralHash;
pub use operation::{Domains, Operation, PredicateKind, StateKind};
