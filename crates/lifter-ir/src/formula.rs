use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::hash::{StructuralHash, StructuralHasher};

/// A predicate applied to arguments. Arguments are either variables bound by
/// an enclosing quantifier or constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Atom {
    pub predicate: String,
    pub args: Vec<String>,
}

impl Atom {
    pub fn new(predicate: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            predicate: predicate.into(),
            args,
        }
    }
}

/// Immutable correctness formula over finite domains.
///
/// `And(vec![])` is *true* and `Or(vec![])` is *false*.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Formula {
    And(Vec<Formula>),
    Or(Vec<Formula>),
    Not(Box<Formula>),
    Exists {
        var: String,
        domain: String,
        body: Box<Formula>,
    },
    Forall {
        var: String,
        domain: String,
        body: Box<Formula>,
    },
    Atom(Atom),
}

impl Formula {
    pub fn truth() -> Self {
        Formula::And(Vec::new())
    }

    pub fn is_truth(&self) -> bool {
        matches!(self, Formula::And(items) if items.is_empty())
    }

    pub fn atom(predicate: impl Into<String>, args: &[&str]) -> Self {
        Formula::Atom(Atom::new(
            predicate,
            args.iter().map(|a| a.to_string()).collect(),
        ))
    }

    pub fn exists(var: impl Into<String>, domain: impl Into<String>, body: Formula) -> Self {
        Formula::Exists {
            var: var.into(),
            domain: domain.into(),
            body: Box::new(body),
        }
    }

    pub fn forall(var: impl Into<String>, domain: impl Into<String>, body: Formula) -> Self {
        Formula::Forall {
            var: var.into(),
            domain: domain.into(),
            body: Box::new(body),
        }
    }

    pub fn negate(inner: Formula) -> Self {
        Formula::Not(Box::new(inner))
    }

    /// Conjunction of `items`, flattening nested conjunctions.
    /// A single conjunct is returned unwrapped.
    pub fn conjoin(items: impl IntoIterator<Item = Formula>) -> Self {
        let mut flat = Vec::new();
        for item in items {
            match item {
                Formula::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap_or_else(Formula::truth)
        } else {
            Formula::And(flat)
        }
    }

    /// Top-level conjuncts (the formula itself when it is not a conjunction).
    pub fn conjuncts(&self) -> Vec<&Formula> {
        match self {
            Formula::And(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    /// Node count, the size metric used for the lifting fraction.
    pub fn size(&self) -> usize {
        match self {
            Formula::And(items) | Formula::Or(items) => {
                1 + items.iter().map(Formula::size).sum::<usize>()
            }
            Formula::Not(inner) => 1 + inner.size(),
            Formula::Exists { body, .. } | Formula::Forall { body, .. } => 1 + body.size(),
            Formula::Atom(_) => 1,
        }
    }

    pub fn is_quantifier_free(&self) -> bool {
        match self {
            Formula::And(items) | Formula::Or(items) => items.iter().all(Formula::is_quantifier_free),
            Formula::Not(inner) => inner.is_quantifier_free(),
            Formula::Exists { .. } | Formula::Forall { .. } => false,
            Formula::Atom(_) => true,
        }
    }

    /// Whether `var` appears as an argument not shadowed by an inner binder.
    pub fn occurs_free(&self, var: &str) -> bool {
        match self {
            Formula::And(items) | Formula::Or(items) => items.iter().any(|f| f.occurs_free(var)),
            Formula::Not(inner) => inner.occurs_free(var),
            Formula::Exists { var: bound, body, .. } | Formula::Forall { var: bound, body, .. } => {
                bound != var && body.occurs_free(var)
            }
            Formula::Atom(atom) => atom.args.iter().any(|a| a == var),
        }
    }

    pub fn atoms(&self) -> Vec<&Atom> {
        let mut out = Vec::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms<'a>(&'a self, out: &mut Vec<&'a Atom>) {
        match self {
            Formula::And(items) | Formula::Or(items) => {
                for item in items {
                    item.collect_atoms(out);
                }
            }
            Formula::Not(inner) => inner.collect_atoms(out),
            Formula::Exists { body, .. } | Formula::Forall { body, .. } => body.collect_atoms(out),
            Formula::Atom(atom) => out.push(atom),
        }
    }

    pub fn predicates(&self) -> BTreeSet<&str> {
        self.atoms().into_iter().map(|a| a.predicate.as_str()).collect()
    }

    /// Rebuild the formula, replacing every atom by `f(atom)`.
    pub fn map_atoms(&self, f: &mut impl FnMut(&Atom) -> Formula) -> Formula {
        match self {
            Formula::And(items) => Formula::And(items.iter().map(|i| i.map_atoms(f)).collect()),
            Formula::Or(items) => Formula::Or(items.iter().map(|i| i.map_atoms(f)).collect()),
            Formula::Not(inner) => Formula::negate(inner.map_atoms(f)),
            Formula::Exists { var, domain, body } => {
                Formula::exists(var.clone(), domain.clone(), body.map_atoms(f))
            }
            Formula::Forall { var, domain, body } => {
                Formula::forall(var.clone(), domain.clone(), body.map_atoms(f))
            }
            Formula::Atom(atom) => f(atom),
        }
    }

    /// Capture-avoiding substitution of free variables.
    pub fn substitute(&self, map: &BTreeMap<String, String>) -> Formula {
        match self {
            Formula::And(items) => Formula::And(items.iter().map(|i| i.substitute(map)).collect()),
            Formula::Or(items) => Formula::Or(items.iter().map(|i| i.substitute(map)).collect()),
            Formula::Not(inner) => Formula::negate(inner.substitute(map)),
            Formula::Exists { var, domain, body } | Formula::Forall { var, domain, body } => {
                let mut inner = map.clone();
                inner.remove(var);
                let mut bound = var.clone();
                if inner.values().any(|v| v == var) {
                    let mut n = 1usize;
                    loop {
                        let candidate = format!("{var}_{n}");
                        if !inner.values().any(|v| *v == candidate) && !body.occurs_free(&candidate)
                        {
                            bound = candidate;
                            break;
                        }
                        n += 1;
                    }
                    inner.insert(var.clone(), bound.clone());
                }
                let body = Box::new(body.substitute(&inner));
                match self {
                    Formula::Exists { .. } => Formula::Exists {
                        var: bound,
                        domain: domain.clone(),
                        body,
                    },
                    _ => Formula::Forall {
                        var: bound,
                        domain: domain.clone(),
                        body,
                    },
                }
            }
            Formula::Atom(atom) => Formula::Atom(Atom {
                predicate: atom.predicate.clone(),
                args: atom
                    .args
                    .iter()
                    .map(|a| map.get(a).cloned().unwrap_or_else(|| a.clone()))
                    .collect(),
            }),
        }
    }

    /// Negation normal form: negations only directly above atoms.
    pub fn to_nnf(&self) -> Formula {
        self.nnf(false)
    }

    fn nnf(&self, negated: bool) -> Formula {
        match self {
            Formula::Atom(atom) if negated => Formula::negate(Formula::Atom(atom.clone())),
            Formula::Atom(atom) => Formula::Atom(atom.clone()),
            Formula::Not(inner) => inner.nnf(!negated),
            Formula::And(items) => {
                let items = items.iter().map(|i| i.nnf(negated)).collect();
                if negated {
                    Formula::Or(items)
                } else {
                    Formula::And(items)
                }
            }
            Formula::Or(items) => {
                let items = items.iter().map(|i| i.nnf(negated)).collect();
                if negated {
                    Formula::And(items)
                } else {
                    Formula::Or(items)
                }
            }
            Formula::Exists { var, domain, body } => {
                let body = body.nnf(negated);
                if negated {
                    Formula::forall(var.clone(), domain.clone(), body)
                } else {
                    Formula::exists(var.clone(), domain.clone(), body)
                }
            }
            Formula::Forall { var, domain, body } => {
                let body = body.nnf(negated);
                if negated {
                    Formula::exists(var.clone(), domain.clone(), body)
                } else {
                    Formula::forall(var.clone(), domain.clone(), body)
                }
            }
        }
    }

    pub fn structural_hash(&self) -> StructuralHash {
        StructuralHasher::new("formula")
            .field(self.to_string().as_bytes())
            .finish()
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-.*+<>=!?/:@".contains(c)
}

fn write_symbol(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    if !s.is_empty() && s.chars().all(is_symbol_char) {
        write!(f, "{s}")
    } else {
        write!(f, "{s:?}")
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        write_symbol(f, &self.predicate)?;
        for arg in &self.args {
            write!(f, " ")?;
            write_symbol(f, arg)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::And(items) if items.is_empty() => write!(f, "true"),
            Formula::Or(items) if items.is_empty() => write!(f, "false"),
            Formula::And(items) | Formula::Or(items) => {
                let head = if matches!(self, Formula::And(_)) { "and" } else { "or" };
                write!(f, "({head}")?;
                for item in items {
                    write!(f, " {item}")?;
                }
                write!(f, ")")
            }
            Formula::Not(inner) => write!(f, "(not {inner})"),
            Formula::Exists { var, domain, body } => write!(f, "(exists ({var} {domain}) {body})"),
            Formula::Forall { var, domain, body } => write!(f, "(forall ({var} {domain}) {body})"),
            Formula::Atom(atom) => write!(f, "{atom}"),
        }
    }
}
