pub(crate) mod catalog;
pub(crate) mod classify;
pub(crate) mod decompose;
pub(crate) mod emit;
pub(crate) mod helpers;
pub(crate) mod synthesize;
