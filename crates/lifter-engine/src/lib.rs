#![doc = include_str!("../README.md")]

//! Lifter decomposition and synthesis engine.
//!
//! This crate classifies correctness formulas, decomposes operations into a
//! coordination-free part and an agreement residual, and restructures
//! operations toward a target lifting fraction.

pub mod catalog;
pub mod classify;
pub mod commutativity;
pub mod decompose;
pub mod pipeline;
pub mod requirements;
pub mod result;
pub mod sequencer;
pub mod synthesis;
