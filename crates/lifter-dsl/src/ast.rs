use std::fmt;

/// Source span for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A spanned AST node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Raw s-expression as produced by the grammar, before shape checking.
#[derive(Debug, Clone, PartialEq)]
pub enum SExpr {
    Symbol(String, Span),
    Str(String, Span),
    List(Vec<SExpr>, Span),
}

impl SExpr {
    pub fn span(&self) -> Span {
        match self {
            SExpr::Symbol(_, span) | SExpr::Str(_, span) | SExpr::List(_, span) => *span,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            SExpr::Symbol(s, _) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::List(items, _) => Some(items),
            _ => None,
        }
    }

    /// Head symbol of a list form, e.g. `and` in `(and a b)`.
    pub fn head(&self) -> Option<&str> {
        self.as_list()
            .and_then(|items| items.first())
            .and_then(SExpr::as_symbol)
    }
}

/// Top-level program = a single operation declaration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Program {
    pub operation: Spanned<OperationDecl>,
}

/// `(operation NAME CLAUSE* FORMULA)`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct OperationDecl {
    pub name: String,
    pub domains: Vec<DomainDecl>,
    pub states: Vec<StateDecl>,
    pub updates: Vec<UpdateDecl>,
    pub predicates: Vec<PredicateDecl>,
    pub definitions: Vec<DefineDecl>,
    pub machines: Vec<MachineDecl>,
    pub algebras: Vec<AlgebraDecl>,
    pub formula: Spanned<FormulaExpr>,
}

/// `(domain NAME ...)`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct DomainDecl {
    pub name: String,
    pub elements: DomainElements,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum DomainElements {
    /// `(a b c)`
    Enumerated(Vec<String>),
    /// `(range LO HI)`, inclusive.
    Range { lo: i64, hi: i64 },
    /// A built-in domain name such as `nat`.
    Builtin(String),
}

/// `(state NAME KIND (fields ...))`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct StateDecl {
    pub name: String,
    pub kind: String,
    pub fields: Vec<String>,
    pub span: Span,
}

/// `(update NAME STATE EFFECT)`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct UpdateDecl {
    pub name: String,
    pub state: String,
    pub effect: String,
    pub span: Span,
}

/// `(predicate NAME KIND)`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct PredicateDecl {
    pub name: String,
    pub kind: String,
    pub span: Span,
}

/// `(define NAME (PARAM*) FORMULA)`, a predicate macro inlined during lowering.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct DefineDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Spanned<FormulaExpr>,
    pub span: Span,
}

/// `(machine NAME (states ...) (on INPUT FROM TO)*)`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct MachineDecl {
    pub name: String,
    pub states: Vec<String>,
    pub transitions: Vec<MachineTransition>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct MachineTransition {
    pub input: String,
    pub from: String,
    pub to: String,
    pub span: Span,
}

/// `(algebra NAME (generators ...) (rel (W*) (W*))*)`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct AlgebraDecl {
    pub name: String,
    pub generators: Vec<String>,
    pub relations: Vec<RelationDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct RelationDecl {
    pub lhs: Vec<String>,
    pub rhs: Vec<String>,
    pub span: Span,
}

/// Correctness formula as written. Lowering decides what is supported.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum FormulaExpr {
    And(Vec<Spanned<FormulaExpr>>),
    Or(Vec<Spanned<FormulaExpr>>),
    Not(Box<Spanned<FormulaExpr>>),
    Implies(Box<Spanned<FormulaExpr>>, Box<Spanned<FormulaExpr>>),
    Exists {
        var: String,
        domain: String,
        body: Box<Spanned<FormulaExpr>>,
    },
    Forall {
        var: String,
        domain: String,
        body: Box<Spanned<FormulaExpr>>,
    },
    Atom {
        predicate: String,
        args: Vec<String>,
    },
    /// A construct outside the decidable fragment (`fix`, `lambda`, ...).
    Unsupported { construct: String },
}

/// Heads that are recognised but never supported.
pub const UNSUPPORTED_HEADS: &[&str] = &["fix", "mu", "lambda", "let-rec", "call", "while", "loop"];

/// Heads reserved by the formula grammar.
pub const FORMULA_HEADS: &[&str] = &["and", "or", "not", "implies", "exists", "forall", "atom"];

impl fmt::Display for FormulaExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, head: &str, items: &[Spanned<FormulaExpr>]) -> fmt::Result {
            write!(f, "({head}")?;
            for item in items {
                write!(f, " {}", item.node)?;
            }
            write!(f, ")")
        }
        match self {
            FormulaExpr::And(items) => join(f, "and", items),
            FormulaExpr::Or(items) => join(f, "or", items),
            FormulaExpr::Not(inner) => write!(f, "(not {})", inner.node),
            FormulaExpr::Implies(lhs, rhs) => write!(f, "(implies {} {})", lhs.node, rhs.node),
            FormulaExpr::Exists { var, domain, body } => {
                write!(f, "(exists ({var} {domain}) {})", body.node)
            }
            FormulaExpr::Forall { var, domain, body } => {
                write!(f, "(forall ({var} {domain}) {})", body.node)
            }
            FormulaExpr::Atom { predicate, args } => {
                write!(f, "({predicate}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            FormulaExpr::Unsupported { construct } => write!(f, "({construct} ...)"),
        }
    }
}
