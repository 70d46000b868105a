use miette::{Diagnostic, SourceSpan};

use crate::ast::{Ident, Span};

/// Contextual errors found while checking or encoding a program.
///
/// None of these stop the walk that found them; the offending node is given
/// the error type and its consumers stay silent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Diagnostic)]
pub enum SemanticError {
    #[error("`{name}` is declared twice in the same scope")]
    #[diagnostic(code(triangle::duplicate_declaration))]
    DuplicateDeclaration {
        name: Ident,
        #[label("redeclared here")]
        span: SourceSpan,
        #[label("first declared here")]
        previous: Option<SourceSpan>,
    },
    #[error("cannot find `{name}` in this scope")]
    #[diagnostic(code(triangle::undeclared_identifier))]
    UndeclaredIdentifier {
        name: Ident,
        #[label("not found in this scope")]
        span: SourceSpan,
    },
    #[error("mismatched types: expected {expected}, found {found}")]
    #[diagnostic(code(triangle::type_mismatch))]
    TypeMismatch {
        expected: String,
        found: String,
        #[label("expected {expected}")]
        span: SourceSpan,
    },
    #[error("`{name}` takes {expected} arguments but {found} were supplied")]
    #[diagnostic(code(triangle::arity_mismatch))]
    ArityMismatch {
        name: Ident,
        expected: usize,
        found: usize,
        #[label("called here")]
        span: SourceSpan,
    },
    #[error("cannot assign to this expression")]
    #[diagnostic(code(triangle::not_assignable), help("only variables and var parameters can be updated"))]
    NotAssignable {
        #[label("not a variable")]
        span: SourceSpan,
    },
    #[error("`{name}` is not a procedure")]
    #[diagnostic(code(triangle::not_callable))]
    NotCallable {
        name: Ident,
        #[label("called here")]
        span: SourceSpan,
    },
    #[error("`{name}` is not a function")]
    #[diagnostic(code(triangle::not_a_function))]
    NotAFunction {
        name: Ident,
        #[label("called here")]
        span: SourceSpan,
    },
    #[error("`{name}` is not a type")]
    #[diagnostic(code(triangle::not_a_type))]
    NotAType {
        name: Ident,
        #[label("expected a type")]
        span: SourceSpan,
    },
    #[error("`{name}` does not denote a value")]
    #[diagnostic(code(triangle::not_a_value))]
    NotAValue {
        name: Ident,
        #[label("expected a constant or variable")]
        span: SourceSpan,
    },
    #[error("argument does not match a {expected} parameter")]
    #[diagnostic(code(triangle::param_kind_mismatch))]
    ParamKindMismatch {
        expected: &'static str,
        #[label("expected a {expected} argument")]
        span: SourceSpan,
    },
    #[error("array types must have a positive length")]
    #[diagnostic(code(triangle::empty_array))]
    EmptyArray {
        #[label("length declared here")]
        span: SourceSpan,
    },
    #[error("integer literal {value} exceeds maxint")]
    #[diagnostic(code(triangle::literal_out_of_range))]
    LiteralOutOfRange {
        value: i64,
        #[label("out of range")]
        span: SourceSpan,
    },
    #[error("field `{name}` is specified more than once")]
    #[diagnostic(code(triangle::duplicate_field))]
    DuplicateField {
        name: Ident,
        #[label("duplicate field")]
        span: SourceSpan,
    },
    #[error("no field `{name}` on type {ty}")]
    #[diagnostic(code(triangle::no_such_field))]
    NoSuchField {
        name: Ident,
        ty: String,
        #[label("unknown field")]
        span: SourceSpan,
    },
    #[error("routines are nested too deeply to address")]
    #[diagnostic(code(triangle::nesting_too_deep), help("TAM reaches at most six enclosing frames"))]
    NestingTooDeep {
        #[label("used here")]
        span: SourceSpan,
    },
    #[error("operand {value} does not fit in an instruction")]
    #[diagnostic(code(triangle::operand_too_large))]
    OperandTooLarge {
        value: i64,
        #[label("too large")]
        span: SourceSpan,
    },
    #[error("program does not fit in the code store")]
    #[diagnostic(code(triangle::code_store_full))]
    CodeStoreFull {
        #[label("while encoding this")]
        span: SourceSpan,
    },
}

/// Collects diagnostics for one compilation.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    errors: Vec<SemanticError>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, error: SemanticError) {
        log::debug!("reported: {error}");
        self.errors.push(error);
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[SemanticError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Bundles every diagnostic into one report rendered against `src`.
    pub fn into_report(self, src: impl Into<String>) -> miette::Report {
        miette::Report::new(Failed { src: src.into(), errors: self.errors })
    }
}

#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("compilation failed with {} error(s)", errors.len())]
struct Failed {
    #[source_code]
    src: String,
    #[related]
    errors: Vec<SemanticError>,
}

/// Broken contract between the checker and the encoder. Never caused by user
/// input alone, so compilation stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InternalError {
    #[error("{what} at {span:?} was never decorated")]
    Undecorated { what: &'static str, span: Span },
    #[error("{what} at {span:?} has the error type")]
    ErrorTyped { what: &'static str, span: Span },
    #[error("`{name}` has no runtime entity")]
    MissingEntity { name: Ident },
    #[error("`{name}` was expected to be {expected}")]
    WrongEntity { name: Ident, expected: &'static str },
    #[error("no field `{name}` in {ty}")]
    MissingField { name: Ident, ty: String },
    #[error("label {0} was never bound")]
    UnboundLabel(usize),
}

pub fn source_span(span: &Span) -> SourceSpan {
    span.clone().into()
}
