#![allow(unused_assignments)]

mod validation;

use indexmap::IndexMap;
use miette::{Diagnostic, NamedSource, SourceSpan};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

use crate::formula::{Atom, Formula};
use crate::operation::*;
use lifter_dsl::ast;

use validation::*;

/// Largest `(range LO HI)` domain accepted.
pub const MAX_RANGE_ELEMENTS: i128 = 4096;

#[derive(Debug, Error)]
pub enum LoweringError {
    #[error("Unknown domain '{0}'")]
    UnknownDomain(String),
    #[error("Domain '{0}' is empty")]
    EmptyDomain(String),
    #[error("Domain '{0}' is infinite; quantifiers must range over finite domains")]
    InfiniteDomain(String),
    #[error("Invalid range for domain '{0}': {1}..{2}")]
    InvalidRange(String, i64, i64),
    #[error("Domain '{domain}' has {size} elements (limit {limit})")]
    DomainTooLarge {
        domain: String,
        size: i128,
        limit: i128,
    },
    #[error("Unknown state kind '{kind}' for state '{state}'")]
    UnknownStateKind { state: String, kind: String },
    #[error("Unknown predicate kind '{kind}' for predicate '{predicate}'")]
    UnknownPredicateKind { predicate: String, kind: String },
    #[error("Update '{update}' targets unknown state '{state}'")]
    UnknownState { update: String, state: String },
    #[error("Effect '{effect}' of update '{update}' is not valid for {kind} state")]
    InvalidEffect {
        update: String,
        effect: String,
        kind: String,
    },
    #[error("Update '{update}' uses '{input}', which is not an input of '{fragment}'")]
    UnknownInput {
        update: String,
        input: String,
        fragment: String,
    },
    #[error("Unknown machine '{0}'")]
    UnknownMachine(String),
    #[error("Unknown algebra '{0}'")]
    UnknownAlgebra(String),
    #[error("Machine '{machine}' has no state '{state}'")]
    UnknownMachineState { machine: String, state: String },
    #[error("Machine '{machine}' has two transitions from '{state}' on '{input}'")]
    NondeterministicMachine {
        machine: String,
        state: String,
        input: String,
    },
    #[error("Algebra '{algebra}' has no generator '{generator}'")]
    UnknownGenerator { algebra: String, generator: String },
    #[error("Definition '{0}' is recursive")]
    RecursiveDefinition(String),
    #[error("Definition '{name}' expects {expected} argument(s), found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// A lowering error enriched with source span information for pretty-printed diagnostics.
#[derive(Debug, Error, Diagnostic)]
#[error("{inner}")]
#[allow(unused_assignments)]
pub struct SpannedLoweringError {
    #[source_code]
    pub src: NamedSource<String>,
    pub inner: LoweringError,
    #[label("here")]
    pub span: Option<SourceSpan>,
}

impl SpannedLoweringError {
    fn new(err: LoweringError, source: String, filename: String, span: Option<ast::Span>) -> Self {
        Self {
            src: NamedSource::new(filename, source),
            inner: err,
            span: span.map(|s| SourceSpan::new(s.start.into(), s.end.saturating_sub(s.start))),
        }
    }
}

/// Lower an AST Program into an Operation, with rich source-span diagnostics.
#[allow(clippy::result_large_err)]
pub fn lower_with_source(
    program: &ast::Program,
    source: &str,
    filename: &str,
) -> Result<Operation, SpannedLoweringError> {
    lower(program).map_err(|err| {
        let span = find_span_for_error(&err, program);
        SpannedLoweringError::new(err, source.to_string(), filename.to_string(), span)
    })
}

/// Lower an AST Program into an Operation.
///
/// Rejects everything outside the decidable fragment: infinite or empty
/// domains, recursive definitions, unsupported constructs, and declarations
/// whose kinds or effects do not fit together.
pub fn lower(program: &ast::Program) -> Result<Operation, LoweringError> {
    let decl = &program.operation.node;

    let domains = lower_domains(&decl.domains)?;
    let machines = lower_machines(&decl.machines)?;
    let algebras = lower_algebras(&decl.algebras)?;

    let mut predicates = IndexMap::new();
    for p in &decl.predicates {
        let kind = PredicateKind::parse(&p.kind).ok_or_else(|| LoweringError::UnknownPredicateKind {
            predicate: p.name.clone(),
            kind: p.kind.clone(),
        })?;
        predicates.insert(p.name.clone(), kind);
    }

    let mut states = IndexMap::new();
    for s in &decl.states {
        let kind = StateKind::parse(&s.kind).ok_or_else(|| LoweringError::UnknownStateKind {
            state: s.name.clone(),
            kind: s.kind.clone(),
        })?;
        match &kind {
            StateKind::Machine(m) if !machines.contains_key(m) => {
                return Err(LoweringError::UnknownMachine(m.clone()))
            }
            StateKind::Algebra(a) if !algebras.contains_key(a) => {
                return Err(LoweringError::UnknownAlgebra(a.clone()))
            }
            _ => {}
        }
        if !s.fields.is_empty() && !kind.is_counter_like() {
            return Err(LoweringError::Validation(format!(
                "state '{}' declares fields but {kind} state has none",
                s.name
            )));
        }
        states.insert(
            s.name.clone(),
            StateVar {
                name: s.name.clone(),
                kind,
                fields: s.fields.clone(),
            },
        );
    }

    let mut updates = IndexMap::new();
    for u in &decl.updates {
        let state = states.get(&u.state).ok_or_else(|| LoweringError::UnknownState {
            update: u.name.clone(),
            state: u.state.clone(),
        })?;
        let effect = Effect::parse(&u.effect);
        if !state.kind.accepts(&effect) {
            return Err(LoweringError::InvalidEffect {
                update: u.name.clone(),
                effect: u.effect.clone(),
                kind: state.kind.to_string(),
            });
        }
        if let Effect::Input(input) = &effect {
            check_input(&u.name, input, &state.kind, &machines, &algebras)?;
        }
        updates.insert(
            u.name.clone(),
            Update {
                name: u.name.clone(),
                state: u.state.clone(),
                effect,
            },
        );
    }

    let mut lowerer = FormulaLowerer {
        domains: &domains,
        states: &states,
        definitions: decl.definitions.iter().map(|d| (d.name.as_str(), d)).collect(),
        resolved: HashMap::new(),
        visiting: Vec::new(),
    };
    let formula = lowerer.lower(&decl.formula.node)?;

    tracing::debug!(
        operation = %decl.name,
        size = formula.size(),
        "lowered operation"
    );

    Ok(Operation {
        name: decl.name.clone(),
        domains,
        states,
        updates,
        predicates,
        machines,
        algebras,
        formula,
    })
}

fn lower_domains(decls: &[ast::DomainDecl]) -> Result<Domains, LoweringError> {
    let mut domains = Domains::new();
    for d in decls {
        let elements = match &d.elements {
            ast::DomainElements::Enumerated(elems) => {
                if elems.is_empty() {
                    return Err(LoweringError::EmptyDomain(d.name.clone()));
                }
                let unique: HashSet<&String> = elems.iter().collect();
                if unique.len() != elems.len() {
                    return Err(LoweringError::Validation(format!(
                        "domain '{}' lists an element twice",
                        d.name
                    )));
                }
                elems.clone()
            }
            ast::DomainElements::Range { lo, hi } => {
                if lo > hi {
                    return Err(LoweringError::InvalidRange(d.name.clone(), *lo, *hi));
                }
                let size = *hi as i128 - *lo as i128 + 1;
                if size > MAX_RANGE_ELEMENTS {
                    return Err(LoweringError::DomainTooLarge {
                        domain: d.name.clone(),
                        size,
                        limit: MAX_RANGE_ELEMENTS,
                    });
                }
                (*lo..=*hi).map(|i| i.to_string()).collect()
            }
            ast::DomainElements::Builtin(name) => match name.as_str() {
                "bool" => vec!["false".into(), "true".into()],
                "nat" | "int" | "string" => {
                    return Err(LoweringError::InfiniteDomain(d.name.clone()))
                }
                other => {
                    return Err(LoweringError::Validation(format!(
                        "unknown builtin domain '{other}' for '{}'",
                        d.name
                    )))
                }
            },
        };
        domains.insert(d.name.clone(), elements);
    }
    Ok(domains)
}

fn lower_machines(decls: &[ast::MachineDecl]) -> Result<IndexMap<String, Machine>, LoweringError> {
    let mut machines = IndexMap::new();
    for m in decls {
        if m.states.is_empty() {
            return Err(LoweringError::Validation(format!(
                "machine '{}' declares no states",
                m.name
            )));
        }
        let mut seen = HashSet::new();
        let mut transitions = Vec::new();
        for t in &m.transitions {
            for s in [&t.from, &t.to] {
                if !m.states.contains(s) {
                    return Err(LoweringError::UnknownMachineState {
                        machine: m.name.clone(),
                        state: s.clone(),
                    });
                }
            }
            if !seen.insert((t.from.as_str(), t.input.as_str())) {
                return Err(LoweringError::NondeterministicMachine {
                    machine: m.name.clone(),
                    state: t.from.clone(),
                    input: t.input.clone(),
                });
            }
            transitions.push(Transition {
                input: t.input.clone(),
                from: t.from.clone(),
                to: t.to.clone(),
            });
        }
        machines.insert(
            m.name.clone(),
            Machine {
                name: m.name.clone(),
                states: m.states.clone(),
                transitions,
            },
        );
    }
    Ok(machines)
}

fn lower_algebras(decls: &[ast::AlgebraDecl]) -> Result<IndexMap<String, Algebra>, LoweringError> {
    let mut algebras = IndexMap::new();
    for a in decls {
        let mut relations = Vec::new();
        for rel in &a.relations {
            for g in rel.lhs.iter().chain(&rel.rhs) {
                if !a.generators.contains(g) {
                    return Err(LoweringError::UnknownGenerator {
                        algebra: a.name.clone(),
                        generator: g.clone(),
                    });
                }
            }
            relations.push(Relation {
                lhs: rel.lhs.clone(),
                rhs: rel.rhs.clone(),
            });
        }
        algebras.insert(
            a.name.clone(),
            Algebra {
                name: a.name.clone(),
                generators: a.generators.clone(),
                relations,
            },
        );
    }
    Ok(algebras)
}

fn check_input(
    update: &str,
    input: &str,
    kind: &StateKind,
    machines: &IndexMap<String, Machine>,
    algebras: &IndexMap<String, Algebra>,
) -> Result<(), LoweringError> {
    let (known, fragment) = match kind {
        StateKind::Machine(name) => (
            machines
                .get(name)
                .is_some_and(|m| m.transitions.iter().any(|t| t.input == input)),
            name,
        ),
        StateKind::Algebra(name) => (
            algebras
                .get(name)
                .is_some_and(|a| a.generators.iter().any(|g| g == input)),
            name,
        ),
        _ => return Ok(()),
    };
    if known {
        Ok(())
    } else {
        Err(LoweringError::UnknownInput {
            update: update.to_string(),
            input: input.to_string(),
            fragment: fragment.clone(),
        })
    }
}

struct FormulaLowerer<'a> {
    domains: &'a Domains,
    states: &'a IndexMap<String, StateVar>,
    definitions: HashMap<&'a str, &'a ast::DefineDecl>,
    resolved: HashMap<String, (Vec<String>, Formula)>,
    visiting: Vec<String>,
}

impl FormulaLowerer<'_> {
    fn lower(&mut self, expr: &ast::FormulaExpr) -> Result<Formula, LoweringError> {
        Ok(match expr {
            ast::FormulaExpr::And(items) => Formula::And(self.lower_all(items)?),
            ast::FormulaExpr::Or(items) => Formula::Or(self.lower_all(items)?),
            ast::FormulaExpr::Not(inner) => Formula::negate(self.lower(&inner.node)?),
            ast::FormulaExpr::Implies(lhs, rhs) => Formula::Or(vec![
                Formula::negate(self.lower(&lhs.node)?),
                self.lower(&rhs.node)?,
            ]),
            ast::FormulaExpr::Exists { var, domain, body } => {
                self.check_binder(var, domain)?;
                Formula::exists(var.clone(), domain.clone(), self.lower(&body.node)?)
            }
            ast::FormulaExpr::Forall { var, domain, body } => {
                self.check_binder(var, domain)?;
                Formula::forall(var.clone(), domain.clone(), self.lower(&body.node)?)
            }
            ast::FormulaExpr::Atom { predicate, args } => {
                if self.definitions.contains_key(predicate.as_str()) {
                    self.inline(predicate, args)?
                } else {
                    Formula::Atom(Atom::new(predicate.clone(), args.clone()))
                }
            }
            ast::FormulaExpr::Unsupported { construct } => {
                return Err(LoweringError::Unsupported(format!(
                    "'{construct}' is outside the finite first-order fragment"
                )))
            }
        })
    }

    fn lower_all(
        &mut self,
        items: &[ast::Spanned<ast::FormulaExpr>],
    ) -> Result<Vec<Formula>, LoweringError> {
        items.iter().map(|i| self.lower(&i.node)).collect()
    }

    fn check_binder(&self, var: &str, domain: &str) -> Result<(), LoweringError> {
        if !self.domains.contains_key(domain) {
            return Err(LoweringError::UnknownDomain(domain.to_string()));
        }
        if self.states.contains_key(var) {
            return Err(LoweringError::Validation(format!(
                "quantified variable '{var}' shadows a state of the same name"
            )));
        }
        Ok(())
    }

    fn inline(&mut self, name: &str, args: &[String]) -> Result<Formula, LoweringError> {
        let (params, body) = self.resolve(name)?;
        if params.len() != args.len() {
            return Err(LoweringError::ArityMismatch {
                name: name.to_string(),
                expected: params.len(),
                found: args.len(),
            });
        }
        let map: BTreeMap<String, String> = params.into_iter().zip(args.iter().cloned()).collect();
        Ok(body.substitute(&map))
    }

    fn resolve(&mut self, name: &str) -> Result<(Vec<String>, Formula), LoweringError> {
        if let Some(done) = self.resolved.get(name) {
            return Ok(done.clone());
        }
        if self.visiting.iter().any(|v| v == name) {
            return Err(LoweringError::RecursiveDefinition(name.to_string()));
        }
        let Some(def) = self.definitions.get(name).copied() else {
            return Err(LoweringError::Validation(format!("unknown definition '{name}'")));
        };
        self.visiting.push(name.to_string());
        let body = self.lower(&def.body.node)?;
        self.visiting.pop();
        let entry = (def.params.clone(), body);
        self.resolved.insert(name.to_string(), entry.clone());
        Ok(entry)
    }
}
