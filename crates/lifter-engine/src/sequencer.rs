//! Canonical operator order and plan composition.
//!
//! Weakenings come before structural rewrites, which come before CRDT
//! conversions. Within a category, cheaper operators go first and ties are
//! broken by id, so the order is total and deterministic.

use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::catalog::{Catalog, RestructuringOperator};
use crate::requirements::Consistency;

pub fn canonical_cmp(a: &dyn RestructuringOperator, b: &dyn RestructuringOperator) -> Ordering {
    a.category()
        .cmp(&b.category())
        .then_with(|| a.semantic_cost().total_cmp(&b.semantic_cost()))
        .then_with(|| a.id().cmp(b.id()))
}

pub fn canonical_order(catalog: &Catalog) -> Vec<Arc<dyn RestructuringOperator>> {
    let mut ordered = catalog.operators.clone();
    ordered.sort_by(|a, b| canonical_cmp(a.as_ref(), b.as_ref()));
    ordered
}

/// Whether `ids` name catalog operators in strictly increasing canonical order.
pub fn is_canonical(catalog: &Catalog, ids: &[&str]) -> bool {
    let order = canonical_order(catalog);
    let mut positions = Vec::with_capacity(ids.len());
    for id in ids {
        match order.iter().position(|op| op.id() == *id) {
            Some(pos) => positions.push(pos),
            None => return false,
        }
    }
    positions.windows(2).all(|w| w[0] < w[1])
}

/// A sequence of restructurings viewed as one.
///
/// Composition is associative with the empty plan as identity, but it is
/// not commutative and nothing has an inverse: once a guarantee is given up,
/// no further composition restores it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Composition {
    pub operators: Vec<String>,
    pub cost: f64,
    pub consistency: Consistency,
}

impl Composition {
    pub fn identity() -> Self {
        Self {
            operators: Vec::new(),
            cost: 0.0,
            consistency: Consistency::Linearizable,
        }
    }

    pub fn of<O: RestructuringOperator + ?Sized>(op: &O) -> Self {
        Self {
            operators: vec![op.id().to_string()],
            cost: op.semantic_cost(),
            consistency: op.consistency(),
        }
    }

    /// `self` followed by `next`.
    pub fn then(mut self, next: Composition) -> Self {
        self.operators.extend(next.operators);
        self.cost += next.cost;
        self.consistency = self.consistency.min(next.consistency);
        self
    }

    pub fn is_identity(&self) -> bool {
        self.operators.is_empty()
    }
}

impl Default for Composition {
    fn default() -> Self {
        Self::identity()
    }
}

impl FromIterator<Composition> for Composition {
    fn from_iter<I: IntoIterator<Item = Composition>>(iter: I) -> Self {
        iter.into_iter().fold(Composition::identity(), Composition::then)
    }
}
