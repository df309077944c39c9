//! Finite-domain evaluation of formulas.
//!
//! An interpretation is the set of ground atoms that hold. Quantifiers range
//! over the declared domain elements, so every formula of the supported
//! fragment has a decidable truth value.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::formula::{Atom, Formula};
use crate::operation::Domains;

/// Ground atoms that are true.
pub type Interpretation = BTreeSet<Atom>;

/// Values for variables, innermost binding wins.
pub type Assignment = BTreeMap<String, String>;

/// Largest atom count for which exhaustive comparison is attempted.
pub const MAX_EXHAUSTIVE_ATOMS: usize = 20;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("Unknown domain '{0}'")]
    UnknownDomain(String),
    #[error("More than {limit} ground atoms")]
    TooManyAtoms { limit: usize },
}

/// Outcome of an exhaustive equivalence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Equivalence {
    Equivalent,
    /// An interpretation on which the two formulas disagree.
    Counterexample(Interpretation),
    /// Too many ground atoms to enumerate every interpretation.
    TooLarge { atoms: usize },
}

pub fn evaluate(
    formula: &Formula,
    domains: &Domains,
    interpretation: &Interpretation,
) -> Result<bool, EvalError> {
    evaluate_in(formula, domains, interpretation, &Assignment::new())
}

/// Evaluate under an initial assignment for free variables.
pub fn evaluate_in(
    formula: &Formula,
    domains: &Domains,
    interpretation: &Interpretation,
    assignment: &Assignment,
) -> Result<bool, EvalError> {
    match formula {
        Formula::And(items) => {
            for item in items {
                if !evaluate_in(item, domains, interpretation, assignment)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Formula::Or(items) => {
            for item in items {
                if evaluate_in(item, domains, interpretation, assignment)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Formula::Not(inner) => Ok(!evaluate_in(inner, domains, interpretation, assignment)?),
        Formula::Exists { var, domain, body } => {
            for value in domain_elements(domains, domain)? {
                let mut inner = assignment.clone();
                inner.insert(var.clone(), value.clone());
                if evaluate_in(body, domains, interpretation, &inner)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Formula::Forall { var, domain, body } => {
            for value in domain_elements(domains, domain)? {
                let mut inner = assignment.clone();
                inner.insert(var.clone(), value.clone());
                if !evaluate_in(body, domains, interpretation, &inner)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Formula::Atom(atom) => Ok(interpretation.contains(&ground(atom, assignment))),
    }
}

fn domain_elements<'d>(domains: &'d Domains, name: &str) -> Result<&'d [String], EvalError> {
    domains
        .get(name)
        .map(Vec::as_slice)
        .ok_or_else(|| EvalError::UnknownDomain(name.to_string()))
}

fn ground(atom: &Atom, assignment: &Assignment) -> Atom {
    Atom {
        predicate: atom.predicate.clone(),
        args: atom
            .args
            .iter()
            .map(|a| assignment.get(a).cloned().unwrap_or_else(|| a.clone()))
            .collect(),
    }
}

/// Every ground atom instance that `formula` can observe, failing once more
/// than `limit` are found.
pub fn ground_atoms(
    formula: &Formula,
    domains: &Domains,
    limit: usize,
) -> Result<Interpretation, EvalError> {
    let mut out = Interpretation::new();
    collect_ground(formula, domains, &Assignment::new(), limit, &mut out)?;
    Ok(out)
}

fn collect_ground(
    formula: &Formula,
    domains: &Domains,
    assignment: &Assignment,
    limit: usize,
    out: &mut Interpretation,
) -> Result<(), EvalError> {
    match formula {
        Formula::And(items) | Formula::Or(items) => {
            for item in items {
                collect_ground(item, domains, assignment, limit, out)?;
            }
        }
        Formula::Not(inner) => collect_ground(inner, domains, assignment, limit, out)?,
        Formula::Exists { var, domain, body } | Formula::Forall { var, domain, body } => {
            for value in domain_elements(domains, domain)? {
                let mut inner = assignment.clone();
                inner.insert(var.clone(), value.clone());
                collect_ground(body, domains, &inner, limit, out)?;
            }
        }
        Formula::Atom(atom) => {
            out.insert(ground(atom, assignment));
            if out.len() > limit {
                return Err(EvalError::TooManyAtoms { limit });
            }
        }
    }
    Ok(())
}

/// Compare `a` and `b` on every interpretation of their ground atoms.
pub fn check_equivalence(
    a: &Formula,
    b: &Formula,
    domains: &Domains,
    max_atoms: usize,
) -> Result<Equivalence, EvalError> {
    let max_atoms = max_atoms.min(MAX_EXHAUSTIVE_ATOMS);
    let mut atoms = match ground_atoms(a, domains, max_atoms) {
        Ok(atoms) => atoms,
        Err(EvalError::TooManyAtoms { .. }) => {
            return Ok(Equivalence::TooLarge {
                atoms: max_atoms + 1,
            })
        }
        Err(err) => return Err(err),
    };
    match ground_atoms(b, domains, max_atoms) {
        Ok(more) => atoms.extend(more),
        Err(EvalError::TooManyAtoms { .. }) => {
            return Ok(Equivalence::TooLarge {
                atoms: max_atoms + 1,
            })
        }
        Err(err) => return Err(err),
    }
    if atoms.len() > max_atoms {
        return Ok(Equivalence::TooLarge { atoms: atoms.len() });
    }

    let atoms: Vec<Atom> = atoms.into_iter().collect();
    for mask in 0u64..(1u64 << atoms.len()) {
        let interpretation: Interpretation = atoms
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, atom)| atom.clone())
            .collect();
        if evaluate(a, domains, &interpretation)? != evaluate(b, domains, &interpretation)? {
            return Ok(Equivalence::Counterexample(interpretation));
        }
    }
    Ok(Equivalence::Equivalent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains() -> Domains {
        let mut d = Domains::new();
        d.insert("d".into(), vec!["a".into(), "b".into()]);
        d
    }

    fn fact(p: &str, arg: &str) -> Atom {
        Atom::new(p, vec![arg.to_string()])
    }

    #[test]
    fn quantifiers_range_over_domain() {
        let d = domains();
        let interp = Interpretation::from([fact("p", "a")]);
        let exists = Formula::exists("x", "d", Formula::atom("p", &["x"]));
        let forall = Formula::forall("x", "d", Formula::atom("p", &["x"]));
        assert!(evaluate(&exists, &d, &interp).unwrap());
        assert!(!evaluate(&forall, &d, &interp).unwrap());
    }

    #[test]
    fn unknown_domain_is_an_error() {
        let f = Formula::exists("x", "nope", Formula::atom("p", &["x"]));
        assert_eq!(
            evaluate(&f, &domains(), &Interpretation::new()),
            Err(EvalError::UnknownDomain("nope".into()))
        );
    }

    #[test]
    fn ground_atoms_respects_limit() {
        let f = Formula::forall("x", "d", Formula::atom("p", &["x"]));
        assert_eq!(ground_atoms(&f, &domains(), 8).unwrap().len(), 2);
        assert!(matches!(
            ground_atoms(&f, &domains(), 1),
            Err(EvalError::TooManyAtoms { limit: 1 })
        ));
    }

    #[test]
    fn forall_distributes_over_and() {
        let d = domains();
        let lhs = Formula::forall(
            "x",
            "d",
            Formula::And(vec![Formula::atom("p", &["x"]), Formula::atom("q", &["x"])]),
        );
        let rhs = Formula::And(vec![
            Formula::forall("x", "d", Formula::atom("p", &["x"])),
            Formula::forall("x", "d", Formula::atom("q", &["x"])),
        ]);
        assert_eq!(check_equivalence(&lhs, &rhs, &d, 12).unwrap(), Equivalence::Equivalent);
    }

    #[test]
    fn exists_does_not_distribute_over_and() {
        let d = domains();
        let lhs = Formula::exists(
            "x",
            "d",
            Formula::And(vec![Formula::atom("p", &["x"]), Formula::atom("q", &["x"])]),
        );
        let rhs = Formula::And(vec![
            Formula::exists("x", "d", Formula::atom("p", &["x"])),
            Formula::exists("x", "d", Formula::atom("q", &["x"])),
        ]);
        assert!(matches!(
            check_equivalence(&lhs, &rhs, &d, 12).unwrap(),
            Equivalence::Counterexample(_)
        ));
    }

    #[test]
    fn large_formulas_are_reported_not_enumerated() {
        let mut d = Domains::new();
        d.insert("big".into(), (0..30).map(|i| i.to_string()).collect());
        let f = Formula::forall("x", "big", Formula::atom("p", &["x"]));
        assert!(matches!(
            check_equivalence(&f, &f, &d, 12).unwrap(),
            Equivalence::TooLarge { .. }
        ));
    }
}
