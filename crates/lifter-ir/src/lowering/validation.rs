//! Span lookup for lowering diagnostics.

use lifter_dsl::ast;

use super::LoweringError;

/// Best-effort span lookup for a lowering error by examining the AST.
pub(super) fn find_span_for_error(
    err: &LoweringError,
    program: &ast::Program,
) -> Option<ast::Span> {
    let op = &program.operation.node;
    match err {
        LoweringError::EmptyDomain(name)
        | LoweringError::InfiniteDomain(name)
        | LoweringError::InvalidRange(name, ..)
        | LoweringError::DomainTooLarge { domain: name, .. } => op
            .domains
            .iter()
            .find(|d| d.name == *name)
            .map(|d| d.span),
        LoweringError::UnknownDomain(name) => {
            find_formula_span(&op.formula, &|f: &ast::FormulaExpr| match f {
                ast::FormulaExpr::Exists { domain, .. } | ast::FormulaExpr::Forall { domain, .. } => {
                    domain == name
                }
                _ => false,
            })
            .or_else(|| find_in_definitions(op, name))
        }
        LoweringError::UnknownStateKind { state, .. } => {
            op.states.iter().find(|s| s.name == *state).map(|s| s.span)
        }
        LoweringError::UnknownMachine(name) | LoweringError::UnknownAlgebra(name) => op
            .states
            .iter()
            .find(|s| s.kind.ends_with(&format!(":{name}")))
            .map(|s| s.span),
        LoweringError::UnknownPredicateKind { predicate, .. } => op
            .predicates
            .iter()
            .find(|p| p.name == *predicate)
            .map(|p| p.span),
        LoweringError::UnknownState { update, .. }
        | LoweringError::InvalidEffect { update, .. }
        | LoweringError::UnknownInput { update, .. } => {
            op.updates.iter().find(|u| u.name == *update).map(|u| u.span)
        }
        LoweringError::UnknownMachineState { machine, state } => {
            let m = op.machines.iter().find(|m| m.name == *machine)?;
            m.transitions
                .iter()
                .find(|t| t.from == *state || t.to == *state)
                .map(|t| t.span)
                .or(Some(m.span))
        }
        LoweringError::NondeterministicMachine {
            machine,
            state,
            input,
        } => {
            let m = op.machines.iter().find(|m| m.name == *machine)?;
            // Point at the second, conflicting transition.
            m.transitions
                .iter()
                .filter(|t| t.from == *state && t.input == *input)
                .nth(1)
                .map(|t| t.span)
        }
        LoweringError::UnknownGenerator { algebra, generator } => {
            let a = op.algebras.iter().find(|a| a.name == *algebra)?;
            a.relations
                .iter()
                .find(|r| r.lhs.contains(generator) || r.rhs.contains(generator))
                .map(|r| r.span)
        }
        LoweringError::RecursiveDefinition(name) | LoweringError::ArityMismatch { name, .. } => op
            .definitions
            .iter()
            .find(|d| d.name == *name)
            .map(|d| d.span),
        LoweringError::Unsupported(_) => {
            let unsupported = |f: &ast::FormulaExpr| matches!(f, ast::FormulaExpr::Unsupported { .. });
            find_formula_span(&op.formula, &unsupported).or_else(|| {
                op.definitions
                    .iter()
                    .find_map(|d| find_formula_span(&d.body, &unsupported))
            })
        }
        LoweringError::Validation(_) => Some(program.operation.span),
    }
}

fn find_in_definitions(op: &ast::OperationDecl, domain_name: &str) -> Option<ast::Span> {
    op.definitions.iter().find_map(|d| {
        find_formula_span(&d.body, &|f: &ast::FormulaExpr| match f {
            ast::FormulaExpr::Exists { domain, .. } | ast::FormulaExpr::Forall { domain, .. } => {
                domain == domain_name
            }
            _ => false,
        })
    })
}

fn find_formula_span(
    formula: &ast::Spanned<ast::FormulaExpr>,
    pred: &dyn Fn(&ast::FormulaExpr) -> bool,
) -> Option<ast::Span> {
    if pred(&formula.node) {
        return Some(formula.span);
    }
    match &formula.node {
        ast::FormulaExpr::And(items) | ast::FormulaExpr::Or(items) => {
            items.iter().find_map(|i| find_formula_span(i, pred))
        }
        ast::FormulaExpr::Not(inner) => find_formula_span(inner, pred),
        ast::FormulaExpr::Implies(lhs, rhs) => {
            find_formula_span(lhs, pred).or_else(|| find_formula_span(rhs, pred))
        }
        ast::FormulaExpr::Exists { body, .. } | ast::FormulaExpr::Forall { body, .. } => {
            find_formula_span(body, pred)
        }
        ast::FormulaExpr::Atom { .. } | ast::FormulaExpr::Unsupported { .. } => None,
    }
}
