#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

use crate::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseDiagnosticSeverity {
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    pub code: String,
    pub severity: ParseDiagnosticSeverity,
    pub message: String,
    pub suggestion: Option<String>,
    pub span: Option<Span>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("Syntax error: {message}")]
    #[diagnostic(code(lifter::parse::syntax))]
    Syntax {
        message: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Unexpected token: expected {expected}, found {found}")]
    #[diagnostic(code(lifter::parse::unexpected))]
    UnexpectedToken {
        expected: String,
        found: String,
        #[label("unexpected token")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Missing required section: {section}")]
    #[diagnostic(code(lifter::parse::missing_section))]
    MissingSection { section: String },

    #[error("Duplicate definition: {name}")]
    #[diagnostic(code(lifter::parse::duplicate))]
    Duplicate {
        name: String,
        #[label("duplicate")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Unknown clause '{clause}'")]
    #[diagnostic(
        code(lifter::parse::unknown_clause),
        help("valid clauses are: domain, state, update, predicate, define, machine, algebra")
    )]
    UnknownClause {
        clause: String,
        #[label("unknown clause")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },
}

impl ParseError {
    pub fn syntax(message: impl Into<String>, span: Span, source: &str, filename: &str) -> Self {
        ParseError::Syntax {
            message: message.into(),
            span: to_source_span(span),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }

    pub fn unexpected(
        expected: impl Into<String>,
        found: impl Into<String>,
        span: Span,
        source: &str,
        filename: &str,
    ) -> Self {
        ParseError::UnexpectedToken {
            expected: expected.into(),
            found: found.into(),
            span: to_source_span(span),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }

    pub fn duplicate(name: impl Into<String>, span: Span, source: &str, filename: &str) -> Self {
        ParseError::Duplicate {
            name: name.into(),
            span: to_source_span(span),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }

    pub fn unknown_clause(
        clause: impl Into<String>,
        span: Span,
        source: &str,
        filename: &str,
    ) -> Self {
        ParseError::UnknownClause {
            clause: clause.into(),
            span: to_source_span(span),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }
}

fn to_source_span(span: Span) -> miette::SourceSpan {
    (span.start, span.end.saturating_sub(span.start)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_keeps_offsets() {
        let err = ParseError::syntax("boom", Span::new(3, 7), "(operation x)", "x.lift");
        match err {
            ParseError::Syntax { span, .. } => {
                assert_eq!(span.offset(), 3);
                assert_eq!(span.len(), 4);
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn zero_width_span_does_not_underflow() {
        let err = ParseError::duplicate("d", Span::new(5, 5), "", "x.lift");
        match err {
            ParseError::Duplicate { span, .. } => assert_eq!(span.len(), 0),
            other => panic!("expected duplicate error, got {other:?}"),
        }
    }
}
