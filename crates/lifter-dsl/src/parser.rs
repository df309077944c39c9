#![allow(clippy::result_large_err)]

use std::collections::HashSet;

use pest::Parser;
use pest_derive::Parser;

use crate::ast::*;
use crate::errors::{ParseDiagnostic, ParseDiagnosticSeverity, ParseError};

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct LifterParser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;

fn span_from(pair: &Pair<'_>) -> Span {
    let s = pair.as_span();
    Span::new(s.start(), s.end())
}

/// Parse a `.lift` source file into an AST Program.
pub fn parse(source: &str, filename: &str) -> Result<Program, ParseError> {
    let (program, _) = parse_with_diagnostics(source, filename)?;
    Ok(program)
}

/// Parse raw s-expressions without interpreting them.
pub fn parse_sexprs(source: &str, filename: &str) -> Result<Vec<SExpr>, ParseError> {
    let pairs = LifterParser::parse(Rule::document, source).map_err(|e| {
        let (start, end) = match e.location {
            pest::error::InputLocation::Pos(p) => (p, p + 1),
            pest::error::InputLocation::Span((s, e)) => (s, e),
        };
        ParseError::syntax(format!("{e}"), Span::new(start, end), source, filename)
    })?;

    let mut out = Vec::new();
    for document in pairs {
        for pair in document.into_inner() {
            if pair.as_rule() != Rule::EOI {
                out.push(to_sexpr(pair));
            }
        }
    }
    Ok(out)
}

fn to_sexpr(pair: Pair<'_>) -> SExpr {
    let span = span_from(&pair);
    match pair.as_rule() {
        Rule::list => SExpr::List(pair.into_inner().map(to_sexpr).collect(), span),
        Rule::string => {
            let raw = pair.as_str();
            SExpr::Str(raw[1..raw.len() - 1].to_string(), span)
        }
        _ => SExpr::Symbol(pair.as_str().to_string(), span),
    }
}

/// Parse a `.lift` source file into an AST Program and emit parser diagnostics.
pub fn parse_with_diagnostics(
    source: &str,
    filename: &str,
) -> Result<(Program, Vec<ParseDiagnostic>), ParseError> {
    let forms = parse_sexprs(source, filename)?;
    let builder = Builder { source, filename };

    let mut forms = forms.into_iter();
    let Some(top) = forms.next() else {
        return Err(ParseError::MissingSection {
            section: "operation".into(),
        });
    };
    if let Some(extra) = forms.next() {
        return Err(builder.unexpected(
            "a single (operation ...) form",
            "additional top-level form",
            extra.span(),
        ));
    }

    let operation = builder.operation(&top)?;
    let program = Program { operation };
    let diagnostics = collect_parser_diagnostics(&program);
    Ok((program, diagnostics))
}

fn collect_parser_diagnostics(program: &Program) -> Vec<ParseDiagnostic> {
    let op = &program.operation.node;
    let mut diagnostics = Vec::new();

    let mut used_domains = HashSet::new();
    let mut used_predicates = Vec::new();
    collect_formula_refs(&op.formula.node, &mut used_domains, &mut used_predicates);
    for def in &op.definitions {
        collect_formula_refs(&def.body.node, &mut used_domains, &mut used_predicates);
    }

    for domain in &op.domains {
        if !used_domains.contains(domain.name.as_str()) {
            diagnostics.push(ParseDiagnostic {
                code: "unused_domain".into(),
                severity: ParseDiagnosticSeverity::Warning,
                message: format!("Domain '{}' is declared but never quantified over.", domain.name),
                suggestion: None,
                span: Some(domain.span),
            });
        }
    }

    let annotated: HashSet<&str> = op.predicates.iter().map(|p| p.name.as_str()).collect();
    let defined: HashSet<&str> = op.definitions.iter().map(|d| d.name.as_str()).collect();
    let mut reported = HashSet::new();
    for pred in used_predicates {
        if annotated.contains(pred.as_str()) || defined.contains(pred.as_str()) {
            continue;
        }
        if reported.insert(pred.clone()) {
            diagnostics.push(ParseDiagnostic {
                code: "unannotated_predicate".into(),
                severity: ParseDiagnosticSeverity::Warning,
                message: format!(
                    "Predicate '{pred}' has no kind annotation and is treated as a local predicate."
                ),
                suggestion: Some(format!("Add `(predicate {pred} <kind>)` if it is not local.")),
                span: Some(program.operation.span),
            });
        }
    }

    diagnostics
}

fn collect_formula_refs<'a>(
    formula: &'a FormulaExpr,
    domains: &mut HashSet<&'a str>,
    predicates: &mut Vec<String>,
) {
    match formula {
        FormulaExpr::And(items) | FormulaExpr::Or(items) => {
            for item in items {
                collect_formula_refs(&item.node, domains, predicates);
            }
        }
        FormulaExpr::Not(inner) => collect_formula_refs(&inner.node, domains, predicates),
        FormulaExpr::Implies(lhs, rhs) => {
            collect_formula_refs(&lhs.node, domains, predicates);
            collect_formula_refs(&rhs.node, domains, predicates);
        }
        FormulaExpr::Exists { domain, body, .. } | FormulaExpr::Forall { domain, body, .. } => {
            domains.insert(domain.as_str());
            collect_formula_refs(&body.node, domains, predicates);
        }
        FormulaExpr::Atom { predicate, .. } => predicates.push(predicate.clone()),
        FormulaExpr::Unsupported { .. } => {}
    }
}

struct Builder<'s> {
    source: &'s str,
    filename: &'s str,
}

impl Builder<'_> {
    fn unexpected(&self, expected: &str, found: &str, span: Span) -> ParseError {
        ParseError::unexpected(expected, found, span, self.source, self.filename)
    }

    fn describe(expr: &SExpr) -> String {
        match expr {
            SExpr::Symbol(s, _) => format!("symbol '{s}'"),
            SExpr::Str(s, _) => format!("string \"{s}\""),
            SExpr::List(items, _) if items.is_empty() => "empty list".into(),
            SExpr::List(..) => "list".into(),
        }
    }

    fn symbol(&self, expr: &SExpr, expected: &str) -> Result<String, ParseError> {
        expr.as_symbol()
            .map(str::to_string)
            .ok_or_else(|| self.unexpected(expected, &Self::describe(expr), expr.span()))
    }

    fn list<'e>(&self, expr: &'e SExpr, expected: &str) -> Result<&'e [SExpr], ParseError> {
        expr.as_list()
            .ok_or_else(|| self.unexpected(expected, &Self::describe(expr), expr.span()))
    }

    fn symbols(&self, expr: &SExpr, expected: &str) -> Result<Vec<String>, ParseError> {
        self.list(expr, expected)?
            .iter()
            .map(|item| self.symbol(item, "symbol"))
            .collect()
    }

    fn arity(&self, expr: &SExpr, items: &[SExpr], n: usize, form: &str) -> Result<(), ParseError> {
        if items.len() != n {
            return Err(self.unexpected(
                &format!("{form} with {} argument(s)", n.saturating_sub(1)),
                &format!("{} argument(s)", items.len().saturating_sub(1)),
                expr.span(),
            ));
        }
        Ok(())
    }

    fn operation(&self, top: &SExpr) -> Result<Spanned<OperationDecl>, ParseError> {
        let items = self.list(top, "(operation ...)")?;
        if top.head() != Some("operation") {
            return Err(self.unexpected("(operation ...)", &Self::describe(top), top.span()));
        }
        if items.len() < 2 {
            return Err(ParseError::MissingSection {
                section: "operation name".into(),
            });
        }
        let name = self.symbol(&items[1], "operation name")?;

        let rest = &items[2..];
        let Some((formula_expr, clauses)) = rest.split_last() else {
            return Err(ParseError::MissingSection {
                section: "formula".into(),
            });
        };
        if formula_expr.head().is_some_and(is_clause_head) {
            return Err(ParseError::MissingSection {
                section: "formula".into(),
            });
        }

        let mut decl = OperationDecl {
            name,
            domains: Vec::new(),
            states: Vec::new(),
            updates: Vec::new(),
            predicates: Vec::new(),
            definitions: Vec::new(),
            machines: Vec::new(),
            algebras: Vec::new(),
            formula: self.formula(formula_expr)?,
        };

        let mut seen: HashSet<(&'static str, String)> = HashSet::new();
        for clause in clauses {
            let head = clause.head().unwrap_or_default();
            let (category, clause_name) = match head {
                "domain" => {
                    let d = self.domain(clause)?;
                    let n = d.name.clone();
                    decl.domains.push(d);
                    ("domain", n)
                }
                "state" => {
                    let s = self.state(clause)?;
                    let n = s.name.clone();
                    decl.states.push(s);
                    ("state", n)
                }
                "update" => {
                    let u = self.update(clause)?;
                    let n = u.name.clone();
                    decl.updates.push(u);
                    ("update", n)
                }
                "predicate" => {
                    let p = self.predicate(clause)?;
                    let n = p.name.clone();
                    decl.predicates.push(p);
                    ("predicate", n)
                }
                "define" => {
                    let d = self.define(clause)?;
                    let n = d.name.clone();
                    decl.definitions.push(d);
                    ("define", n)
                }
                "machine" => {
                    let m = self.machine(clause)?;
                    let n = m.name.clone();
                    decl.machines.push(m);
                    ("machine", n)
                }
                "algebra" => {
                    let a = self.algebra(clause)?;
                    let n = a.name.clone();
                    decl.algebras.push(a);
                    ("algebra", n)
                }
                other => {
                    let found = if other.is_empty() {
                        Self::describe(clause)
                    } else {
                        other.to_string()
                    };
                    return Err(ParseError::unknown_clause(
                        found,
                        clause.span(),
                        self.source,
                        self.filename,
                    ));
                }
            };
            if !seen.insert((category, clause_name.clone())) {
                return Err(ParseError::duplicate(
                    format!("{category} '{clause_name}'"),
                    clause.span(),
                    self.source,
                    self.filename,
                ));
            }
        }

        Ok(Spanned::new(decl, top.span()))
    }

    fn domain(&self, clause: &SExpr) -> Result<DomainDecl, ParseError> {
        let items = self.list(clause, "(domain NAME ELEMENTS)")?;
        self.arity(clause, items, 3, "domain")?;
        let name = self.symbol(&items[1], "domain name")?;
        let elements = match &items[2] {
            SExpr::Symbol(builtin, _) => DomainElements::Builtin(builtin.clone()),
            list @ SExpr::List(parts, _) if list.head() == Some("range") && parts.len() == 3 => {
                let lo = self.integer(&parts[1])?;
                let hi = self.integer(&parts[2])?;
                DomainElements::Range { lo, hi }
            }
            other => DomainElements::Enumerated(self.symbols(other, "(ELEMENT*)")?),
        };
        Ok(DomainDecl {
            name,
            elements,
            span: clause.span(),
        })
    }

    fn integer(&self, expr: &SExpr) -> Result<i64, ParseError> {
        let raw = self.symbol(expr, "integer")?;
        raw.parse::<i64>().map_err(|_| {
            ParseError::syntax(
                format!("invalid integer '{raw}'"),
                expr.span(),
                self.source,
                self.filename,
            )
        })
    }

    fn state(&self, clause: &SExpr) -> Result<StateDecl, ParseError> {
        let items = self.list(clause, "(state NAME KIND)")?;
        if items.len() != 3 && items.len() != 4 {
            return Err(self.unexpected(
                "(state NAME KIND [(fields ...)])",
                &format!("{} argument(s)", items.len() - 1),
                clause.span(),
            ));
        }
        let name = self.symbol(&items[1], "state name")?;
        let kind = self.symbol(&items[2], "state kind")?;
        let fields = match items.get(3) {
            Some(fields) if fields.head() == Some("fields") => {
                let parts = self.list(fields, "(fields ...)")?;
                parts[1..]
                    .iter()
                    .map(|p| self.symbol(p, "field name"))
                    .collect::<Result<Vec<_>, _>>()?
            }
            Some(other) => {
                return Err(self.unexpected("(fields ...)", &Self::describe(other), other.span()))
            }
            None => Vec::new(),
        };
        Ok(StateDecl {
            name,
            kind,
            fields,
            span: clause.span(),
        })
    }

    fn update(&self, clause: &SExpr) -> Result<UpdateDecl, ParseError> {
        let items = self.list(clause, "(update NAME STATE EFFECT)")?;
        self.arity(clause, items, 4, "update")?;
        Ok(UpdateDecl {
            name: self.symbol(&items[1], "update name")?,
            state: self.symbol(&items[2], "state name")?,
            effect: self.symbol(&items[3], "effect")?,
            span: clause.span(),
        })
    }

    fn predicate(&self, clause: &SExpr) -> Result<PredicateDecl, ParseError> {
        let items = self.list(clause, "(predicate NAME KIND)")?;
        self.arity(clause, items, 3, "predicate")?;
        Ok(PredicateDecl {
            name: self.symbol(&items[1], "predicate name")?,
            kind: self.symbol(&items[2], "predicate kind")?,
            span: clause.span(),
        })
    }

    fn define(&self, clause: &SExpr) -> Result<DefineDecl, ParseError> {
        let items = self.list(clause, "(define NAME (PARAM*) FORMULA)")?;
        self.arity(clause, items, 4, "define")?;
        Ok(DefineDecl {
            name: self.symbol(&items[1], "definition name")?,
            params: self.symbols(&items[2], "(PARAM*)")?,
            body: self.formula(&items[3])?,
            span: clause.span(),
        })
    }

    fn machine(&self, clause: &SExpr) -> Result<MachineDecl, ParseError> {
        let items = self.list(clause, "(machine NAME (states ...) (on ...)*)")?;
        if items.len() < 3 {
            return Err(self.unexpected(
                "(machine NAME (states ...) (on ...)*)",
                "too few arguments",
                clause.span(),
            ));
        }
        let name = self.symbol(&items[1], "machine name")?;
        if items[2].head() != Some("states") {
            return Err(self.unexpected("(states ...)", &Self::describe(&items[2]), items[2].span()));
        }
        let states = self.symbols(&items[2], "(states ...)")?[1..].to_vec();
        let mut transitions = Vec::new();
        for item in &items[3..] {
            if item.head() != Some("on") {
                return Err(self.unexpected("(on INPUT FROM TO)", &Self::describe(item), item.span()));
            }
            let parts = self.symbols(item, "(on INPUT FROM TO)")?;
            if parts.len() != 4 {
                return Err(self.unexpected(
                    "(on INPUT FROM TO)",
                    &format!("{} argument(s)", parts.len() - 1),
                    item.span(),
                ));
            }
            transitions.push(MachineTransition {
                input: parts[1].clone(),
                from: parts[2].clone(),
                to: parts[3].clone(),
                span: item.span(),
            });
        }
        Ok(MachineDecl {
            name,
            states,
            transitions,
            span: clause.span(),
        })
    }

    fn algebra(&self, clause: &SExpr) -> Result<AlgebraDecl, ParseError> {
        let items = self.list(clause, "(algebra NAME (generators ...) (rel ...)*)")?;
        if items.len() < 3 {
            return Err(self.unexpected(
                "(algebra NAME (generators ...) (rel ...)*)",
                "too few arguments",
                clause.span(),
            ));
        }
        let name = self.symbol(&items[1], "algebra name")?;
        if items[2].head() != Some("generators") {
            return Err(self.unexpected(
                "(generators ...)",
                &Self::describe(&items[2]),
                items[2].span(),
            ));
        }
        let generators = self.symbols(&items[2], "(generators ...)")?[1..].to_vec();
        let mut relations = Vec::new();
        for item in &items[3..] {
            let parts = self.list(item, "(rel (WORD) (WORD))")?;
            if item.head() != Some("rel") || parts.len() != 3 {
                return Err(self.unexpected("(rel (WORD) (WORD))", &Self::describe(item), item.span()));
            }
            relations.push(RelationDecl {
                lhs: self.symbols(&parts[1], "(WORD)")?,
                rhs: self.symbols(&parts[2], "(WORD)")?,
                span: item.span(),
            });
        }
        Ok(AlgebraDecl {
            name,
            generators,
            relations,
            span: clause.span(),
        })
    }

    fn formula(&self, expr: &SExpr) -> Result<Spanned<FormulaExpr>, ParseError> {
        let span = expr.span();
        let items = match expr {
            SExpr::Symbol(sym, _) => {
                let node = match sym.as_str() {
                    "true" => FormulaExpr::And(Vec::new()),
                    "false" => FormulaExpr::Or(Vec::new()),
                    _ => FormulaExpr::Atom {
                        predicate: sym.clone(),
                        args: Vec::new(),
                    },
                };
                return Ok(Spanned::new(node, span));
            }
            SExpr::Str(..) => return Err(self.unexpected("formula", &Self::describe(expr), span)),
            SExpr::List(items, _) => items,
        };
        let Some(head_expr) = items.first() else {
            return Err(self.unexpected("formula", "empty list", span));
        };
        let head = self.symbol(head_expr, "formula head")?;
        let args = &items[1..];

        let node = match head.as_str() {
            "and" => FormulaExpr::And(self.formulas(args)?),
            "or" => {
                if args.is_empty() {
                    return Err(self.unexpected("(or F+)", "no operands", span));
                }
                FormulaExpr::Or(self.formulas(args)?)
            }
            "not" => {
                self.arity(expr, items, 2, "not")?;
                FormulaExpr::Not(Box::new(self.formula(&args[0])?))
            }
            "implies" => {
                self.arity(expr, items, 3, "implies")?;
                FormulaExpr::Implies(
                    Box::new(self.formula(&args[0])?),
                    Box::new(self.formula(&args[1])?),
                )
            }
            "exists" | "forall" => {
                self.arity(expr, items, 3, &head)?;
                let binder = self.symbols(&args[0], "(VAR DOMAIN)")?;
                if binder.len() != 2 {
                    return Err(self.unexpected(
                        "(VAR DOMAIN)",
                        &format!("{} symbol(s)", binder.len()),
                        args[0].span(),
                    ));
                }
                let body = Box::new(self.formula(&args[1])?);
                let (var, domain) = (binder[0].clone(), binder[1].clone());
                if head == "exists" {
                    FormulaExpr::Exists { var, domain, body }
                } else {
                    FormulaExpr::Forall { var, domain, body }
                }
            }
            "atom" => {
                let Some(pred) = args.first() else {
                    return Err(self.unexpected("(atom PRED ARG*)", "no predicate", span));
                };
                let predicate = self.symbol(pred, "predicate name")?;
                self.atom(predicate, &args[1..])
            }
            h if UNSUPPORTED_HEADS.contains(&h) => FormulaExpr::Unsupported {
                construct: h.to_string(),
            },
            _ => self.atom(head, args),
        };
        Ok(Spanned::new(node, span))
    }

    fn formulas(&self, exprs: &[SExpr]) -> Result<Vec<Spanned<FormulaExpr>>, ParseError> {
        exprs.iter().map(|e| self.formula(e)).collect()
    }

    fn atom(&self, predicate: String, args: &[SExpr]) -> FormulaExpr {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                SExpr::Symbol(s, _) | SExpr::Str(s, _) => out.push(s.clone()),
                SExpr::List(..) => {
                    return FormulaExpr::Unsupported {
                        construct: format!("term application in '{predicate}'"),
                    }
                }
            }
        }
        FormulaExpr::Atom {
            predicate,
            args: out,
        }
    }
}

fn is_clause_head(head: &str) -> bool {
    matches!(
        head,
        "domain" | "state" | "update" | "predicate" | "define" | "machine" | "algebra"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTER: &str = r#"
        ; grow-only counter
        (operation counter
          (domain replica (r1 r2 r3))
          (state value counter)
          (update increment value increment)
          (predicate value-eq-sum local)
          (exists (n replica) (value-eq-sum value n)))
    "#;

    #[test]
    fn parses_counter_operation() {
        let program = parse(COUNTER, "counter.lift").expect("parse failed");
        let op = &program.operation.node;
        assert_eq!(op.name, "counter");
        assert_eq!(op.domains.len(), 1);
        assert_eq!(
            op.domains[0].elements,
            DomainElements::Enumerated(vec!["r1".into(), "r2".into(), "r3".into()])
        );
        assert_eq!(op.states[0].kind, "counter");
        assert_eq!(op.updates[0].effect, "increment");
        match &op.formula.node {
            FormulaExpr::Exists { var, domain, body } => {
                assert_eq!(var, "n");
                assert_eq!(domain, "replica");
                assert!(matches!(body.node, FormulaExpr::Atom { .. }));
            }
            other => panic!("expected exists, got {other:?}"),
        }
    }

    #[test]
    fn range_domains_and_fields_parse() {
        let src = "(operation x (domain slot (range 0 3)) (state qty counter (fields a b)) (p qty))";
        let program = parse(src, "x.lift").expect("parse failed");
        let op = &program.operation.node;
        assert_eq!(op.domains[0].elements, DomainElements::Range { lo: 0, hi: 3 });
        assert_eq!(op.states[0].fields, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn builtin_domain_is_kept_for_lowering() {
        let src = "(operation x (domain n nat) (forall (i n) (p i)))";
        let program = parse(src, "x.lift").expect("parse failed");
        assert_eq!(
            program.operation.node.domains[0].elements,
            DomainElements::Builtin("nat".into())
        );
    }

    #[test]
    fn machine_and_algebra_clauses_parse() {
        let src = r#"
            (operation m
              (machine light (states off on) (on toggle off on) (on toggle on off))
              (algebra ops (generators a b) (rel (a b) (b a)) (rel (a a) (a)))
              true)
        "#;
        let program = parse(src, "m.lift").expect("parse failed");
        let op = &program.operation.node;
        assert_eq!(op.machines[0].states, vec!["off".to_string(), "on".to_string()]);
        assert_eq!(op.machines[0].transitions.len(), 2);
        assert_eq!(op.algebras[0].relations[1].rhs, vec!["a".to_string()]);
        assert_eq!(op.formula.node, FormulaExpr::And(Vec::new()));
    }

    #[test]
    fn unsupported_heads_are_preserved() {
        let src = "(operation x (fix f (p f)))";
        let program = parse(src, "x.lift").expect("parse failed");
        assert_eq!(
            program.operation.node.formula.node,
            FormulaExpr::Unsupported {
                construct: "fix".into()
            }
        );
    }

    #[test]
    fn nested_terms_are_marked_unsupported() {
        let src = "(operation x (value-eq (sum increments)))";
        let program = parse(src, "x.lift").expect("parse failed");
        assert!(matches!(
            program.operation.node.formula.node,
            FormulaExpr::Unsupported { .. }
        ));
    }

    #[test]
    fn missing_formula_is_reported() {
        let err = parse("(operation x (domain d (a)))", "x.lift").unwrap_err();
        assert!(matches!(err, ParseError::MissingSection { ref section } if section == "formula"));
    }

    #[test]
    fn duplicate_domain_is_rejected() {
        let src = "(operation x (domain d (a)) (domain d (b)) (p))";
        let err = parse(src, "x.lift").unwrap_err();
        assert!(matches!(err, ParseError::Duplicate { .. }));
    }

    #[test]
    fn unknown_clause_is_rejected() {
        let src = "(operation x (frobnicate d) (p))";
        let err = parse(src, "x.lift").unwrap_err();
        assert!(matches!(err, ParseError::UnknownClause { .. }));
    }

    #[test]
    fn unbalanced_parens_are_syntax_errors() {
        let err = parse("(operation x (p)", "x.lift").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn second_top_level_form_is_rejected() {
        let err = parse("(operation x (p)) (operation y (q))", "x.lift").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedToken { .. }));
    }

    #[test]
    fn diagnostics_flag_unused_domain_and_unannotated_predicate() {
        let src = "(operation x (domain d (a)) (domain e (b)) (exists (i d) (p i)))";
        let (_, diagnostics) = parse_with_diagnostics(src, "x.lift").expect("parse failed");
        let codes: Vec<&str> = diagnostics.iter().map(|d| d.code.as_str()).collect();
        assert!(codes.contains(&"unused_domain"));
        assert!(codes.contains(&"unannotated_predicate"));
    }

    #[test]
    fn display_renders_canonical_sexpr() {
        let src = "(operation x (domain d (a)) (forall (i d) (not (and (p i) (q i)))))";
        let program = parse(src, "x.lift").expect("parse failed");
        assert_eq!(
            program.operation.node.formula.node.to_string(),
            "(forall (i d) (not (and (p i) (q i))))"
        );
    }
}
