//! Verification classifier.
//!
//! A formula is existential when a single witness assignment certifies it
//! and universal when every element of a domain has to be checked. The
//! classification is a bottom-up pass over the supported fragment.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use lifter_ir::eval::{evaluate_in, Assignment, EvalError, Interpretation};
use lifter_ir::{Domains, Formula, StructuralHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Existential,
    Universal,
    Mixed,
}

impl Verification {
    pub fn as_str(self) -> &'static str {
        match self {
            Verification::Existential => "existential",
            Verification::Universal => "universal",
            Verification::Mixed => "mixed",
        }
    }

    fn swapped(self) -> Self {
        match self {
            Verification::Existential => Verification::Universal,
            Verification::Universal => Verification::Existential,
            Verification::Mixed => Verification::Mixed,
        }
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finds a witness for an existential formula: the leading `exists` binders
/// and the body they scope over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessExtractor {
    binders: Vec<(String, String)>,
    body: Formula,
}

impl WitnessExtractor {
    fn new(formula: &Formula) -> Self {
        let mut binders = Vec::new();
        let mut current = formula;
        while let Formula::Exists { var, domain, body } = current {
            binders.push((var.clone(), domain.clone()));
            current = body;
        }
        Self {
            binders,
            body: current.clone(),
        }
    }

    /// `(variable, domain)` pairs, outermost first.
    pub fn binders(&self) -> &[(String, String)] {
        &self.binders
    }

    /// First assignment (in domain order) under which the body holds, or
    /// `None` when the formula is false under `interpretation`.
    pub fn extract(
        &self,
        domains: &Domains,
        interpretation: &Interpretation,
    ) -> Result<Option<Assignment>, EvalError> {
        let mut assignment = Assignment::new();
        self.search(0, domains, interpretation, &mut assignment)
    }

    fn search(
        &self,
        depth: usize,
        domains: &Domains,
        interpretation: &Interpretation,
        assignment: &mut Assignment,
    ) -> Result<Option<Assignment>, EvalError> {
        let Some((var, domain)) = self.binders.get(depth) else {
            return Ok(evaluate_in(&self.body, domains, interpretation, assignment)?
                .then(|| assignment.clone()));
        };
        let elements = domains
            .get(domain)
            .ok_or_else(|| EvalError::UnknownDomain(domain.clone()))?;
        for value in elements {
            let shadowed = assignment.insert(var.clone(), value.clone());
            let found = self.search(depth + 1, domains, interpretation, assignment)?;
            match shadowed {
                Some(old) => assignment.insert(var.clone(), old),
                None => assignment.remove(var),
            };
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCertificate {
    pub verification: Verification,
    /// Present exactly when the formula is existential.
    pub witness: Option<WitnessExtractor>,
}

/// Memoizing classifier. The cache lives as long as the instance.
#[derive(Debug, Default)]
pub struct Classifier {
    cache: HashMap<StructuralHash, Verification>,
    hits: usize,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, formula: &Formula) -> VerificationCertificate {
        let verification = self.verification(formula);
        VerificationCertificate {
            verification,
            witness: (verification == Verification::Existential)
                .then(|| WitnessExtractor::new(formula)),
        }
    }

    pub fn verification(&mut self, formula: &Formula) -> Verification {
        let key = formula.structural_hash();
        if let Some(cached) = self.cache.get(&key) {
            self.hits += 1;
            return *cached;
        }
        let verification = match formula {
            Formula::Atom(_) => Verification::Existential,
            Formula::Not(inner) => {
                if inner.is_quantifier_free() {
                    Verification::Existential
                } else {
                    self.verification(inner).swapped()
                }
            }
            Formula::Exists { body, .. } => match self.verification(body) {
                Verification::Existential => Verification::Existential,
                _ => Verification::Mixed,
            },
            Formula::Forall { .. } => Verification::Universal,
            Formula::And(items) => {
                let tags: Vec<Verification> = items.iter().map(|i| self.verification(i)).collect();
                if tags.iter().all(|t| *t == Verification::Existential) {
                    Verification::Existential
                } else if tags.iter().all(|t| *t == Verification::Universal) {
                    Verification::Universal
                } else {
                    Verification::Mixed
                }
            }
            Formula::Or(items) => {
                let mut all_existential = true;
                for item in items {
                    if self.verification(item) != Verification::Existential {
                        all_existential = false;
                    }
                }
                if all_existential {
                    Verification::Existential
                } else {
                    Verification::Mixed
                }
            }
        };
        self.cache.insert(key, verification);
        verification
    }

    /// Number of distinct subtrees classified so far.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_hits(&self) -> usize {
        self.hits
    }
}

/// Classify with a fresh classifier.
pub fn classify(formula: &Formula) -> VerificationCertificate {
    Classifier::new().classify(formula)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifter_ir::Atom;

    fn p(x: &str) -> Formula {
        Formula::atom("p", &[x])
    }

    fn domains() -> Domains {
        let mut d = Domains::new();
        d.insert("d".into(), vec!["a".into(), "b".into(), "c".into()]);
        d
    }

    #[test]
    fn atoms_and_exists_are_existential() {
        assert_eq!(classify(&p("k")).verification, Verification::Existential);
        let f = Formula::exists("x", "d", p("x"));
        assert_eq!(classify(&f).verification, Verification::Existential);
    }

    #[test]
    fn forall_is_universal() {
        let f = Formula::forall("x", "d", p("x"));
        let cert = classify(&f);
        assert_eq!(cert.verification, Verification::Universal);
        assert!(cert.witness.is_none());
    }

    #[test]
    fn negation_swaps_quantified_classification() {
        let f = Formula::negate(Formula::forall("x", "d", p("x")));
        assert_eq!(classify(&f).verification, Verification::Existential);
        let g = Formula::negate(Formula::exists("x", "d", p("x")));
        assert_eq!(classify(&g).verification, Verification::Universal);
        let h = Formula::negate(Formula::And(vec![p("a"), p("b")]));
        assert_eq!(classify(&h).verification, Verification::Existential);
    }

    #[test]
    fn exists_over_universal_is_mixed() {
        let f = Formula::exists("x", "d", Formula::forall("y", "d", Formula::atom("r", &["x", "y"])));
        assert_eq!(classify(&f).verification, Verification::Mixed);
    }

    #[test]
    fn connectives_combine_conservatively() {
        let e = Formula::exists("x", "d", p("x"));
        let u = Formula::forall("x", "d", p("x"));
        assert_eq!(
            classify(&Formula::And(vec![e.clone(), e.clone()])).verification,
            Verification::Existential
        );
        assert_eq!(
            classify(&Formula::And(vec![u.clone(), u.clone()])).verification,
            Verification::Universal
        );
        assert_eq!(
            classify(&Formula::And(vec![e.clone(), u.clone()])).verification,
            Verification::Mixed
        );
        // A disjunction of universals is not automatically universal.
        assert_eq!(
            classify(&Formula::Or(vec![u.clone(), u])).verification,
            Verification::Mixed
        );
        assert_eq!(classify(&Formula::Or(vec![e.clone(), e])).verification, Verification::Existential);
    }

    #[test]
    fn identical_subtrees_hit_the_cache() {
        let mut classifier = Classifier::new();
        let sub = Formula::exists("x", "d", p("x"));
        classifier.classify(&Formula::And(vec![sub.clone(), sub]));
        assert!(classifier.cache_hits() >= 1);
        assert_eq!(classifier.cache_len(), 3);
    }

    #[test]
    fn witness_extractor_finds_first_satisfying_element() {
        let f = Formula::exists("x", "d", p("x"));
        let cert = classify(&f);
        let witness = cert.witness.expect("existential has witness");
        assert_eq!(witness.binders(), &[("x".to_string(), "d".to_string())]);
        let interp = Interpretation::from([Atom::new("p", vec!["b".into()])]);
        let found = witness.extract(&domains(), &interp).unwrap().expect("witness");
        assert_eq!(found.get("x").map(String::as_str), Some("b"));
        assert_eq!(witness.extract(&domains(), &Interpretation::new()).unwrap(), None);
    }

    #[test]
    fn nested_binders_are_all_assigned() {
        let f = Formula::exists("x", "d", Formula::exists("y", "d", Formula::atom("r", &["x", "y"])));
        let witness = classify(&f).witness.unwrap();
        let interp = Interpretation::from([Atom::new("r", vec!["c".into(), "a".into()])]);
        let found = witness.extract(&domains(), &interp).unwrap().unwrap();
        assert_eq!(found["x"], "c");
        assert_eq!(found["y"], "a");
    }
}
