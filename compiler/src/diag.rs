// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types and the `CompileError` taxonomy used
// across all compiler phases. Every failure aborts the current compilation;
// there are no warnings.
//
// Preconditions: none (types only).
// Postconditions: every `CompileError` maps to exactly one stable code.
// Failure modes: none.
// Side effects: none.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `E0300`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable codes, grouped by phase: `E00xx` syntax, `E01xx` type inference,
/// `E02xx` resolution, `E03xx` typing of operators, `E04xx` graph naming,
/// `E05xx` extraction, `E06xx` artifact I/O.
pub mod codes {
    use super::DiagCode;

    pub const E0001: DiagCode = DiagCode("E0001"); // syntax error
    pub const E0100: DiagCode = DiagCode("E0100"); // missing annotation
    pub const E0101: DiagCode = DiagCode("E0101"); // unsupported type
    pub const E0102: DiagCode = DiagCode("E0102"); // duplicate definition
    pub const E0103: DiagCode = DiagCode("E0103"); // unbound variable
    pub const E0104: DiagCode = DiagCode("E0104"); // unsupported return
    pub const E0105: DiagCode = DiagCode("E0105"); // unsupported expression
    pub const E0200: DiagCode = DiagCode("E0200"); // unresolved symbol
    pub const E0201: DiagCode = DiagCode("E0201"); // not callable
    pub const E0202: DiagCode = DiagCode("E0202"); // not a method call
    pub const E0203: DiagCode = DiagCode("E0203"); // unknown operator
    pub const E0300: DiagCode = DiagCode("E0300"); // type mismatch
    pub const E0301: DiagCode = DiagCode("E0301"); // arity mismatch
    pub const E0400: DiagCode = DiagCode("E0400"); // redefinition
    pub const E0401: DiagCode = DiagCode("E0401"); // undeclared output
    pub const E0500: DiagCode = DiagCode("E0500"); // unknown boundary names
    pub const E0501: DiagCode = DiagCode("E0501"); // unsupported model
    pub const E0502: DiagCode = DiagCode("E0502"); // unbound subgraph inputs
    pub const E0600: DiagCode = DiagCode("E0600"); // not found
    pub const E0601: DiagCode = DiagCode("E0601"); // write failure
    pub const E0602: DiagCode = DiagCode("E0602"); // malformed artifact
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A rendered compiler error. Every diagnostic is fatal.
///
/// Errors raised outside source text (registry, artifacts, manifests) have
/// no span.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub span: Option<Span>,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code or hint.
    pub fn new(span: Option<Span>, message: impl Into<String>) -> Self {
        Self {
            code: None,
            span,
            message: message.into(),
            hint: None,
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "error[{}]: {}", code, self.message)?,
            None => write!(f, "error: {}", self.message)?,
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

// ── Compile errors ───────────────────────────────────────────────────────

/// Every way a compilation, extraction or artifact operation can fail.
#[derive(Debug)]
pub enum CompileError {
    Syntax {
        messages: Vec<String>,
        span: Option<Span>,
    },
    MissingAnnotation {
        function: String,
        parameter: String,
        span: Span,
    },
    UnsupportedType {
        annotation: String,
        span: Option<Span>,
    },
    DuplicateDefinition {
        name: String,
        span: Span,
    },
    UnboundVariable {
        name: String,
        span: Span,
    },
    UnsupportedReturn {
        message: String,
        span: Span,
    },
    UnsupportedExpression {
        construct: String,
        span: Span,
    },
    UnresolvedSymbol {
        path: String,
        segment: String,
        namespace: String,
    },
    NotCallable {
        path: String,
        kind: &'static str,
    },
    NotAMethod {
        callable: String,
    },
    UnknownOperator {
        callable: String,
    },
    TypeMismatch {
        context: String,
        left: String,
        right: String,
        span: Option<Span>,
    },
    ArityMismatch {
        context: String,
        expected: usize,
        found: usize,
        span: Option<Span>,
    },
    Redefinition {
        name: String,
    },
    UndeclaredOutput {
        name: String,
    },
    UnknownBoundaryNames {
        graph: String,
        names: Vec<String>,
    },
    UnsupportedModel {
        graph: String,
        reason: String,
    },
    UnboundSubgraphInputs {
        graph: String,
        names: Vec<String>,
    },
    NotFound {
        path: PathBuf,
    },
    WriteFailure {
        path: PathBuf,
        source: io::Error,
    },
    MalformedArtifact {
        path: PathBuf,
        message: String,
    },
}

impl CompileError {
    pub fn code(&self) -> DiagCode {
        match self {
            CompileError::Syntax { .. } => codes::E0001,
            CompileError::MissingAnnotation { .. } => codes::E0100,
            CompileError::UnsupportedType { .. } => codes::E0101,
            CompileError::DuplicateDefinition { .. } => codes::E0102,
            CompileError::UnboundVariable { .. } => codes::E0103,
            CompileError::UnsupportedReturn { .. } => codes::E0104,
            CompileError::UnsupportedExpression { .. } => codes::E0105,
            CompileError::UnresolvedSymbol { .. } => codes::E0200,
            CompileError::NotCallable { .. } => codes::E0201,
            CompileError::NotAMethod { .. } => codes::E0202,
            CompileError::UnknownOperator { .. } => codes::E0203,
            CompileError::TypeMismatch { .. } => codes::E0300,
            CompileError::ArityMismatch { .. } => codes::E0301,
            CompileError::Redefinition { .. } => codes::E0400,
            CompileError::UndeclaredOutput { .. } => codes::E0401,
            CompileError::UnknownBoundaryNames { .. } => codes::E0500,
            CompileError::UnsupportedModel { .. } => codes::E0501,
            CompileError::UnboundSubgraphInputs { .. } => codes::E0502,
            CompileError::NotFound { .. } => codes::E0600,
            CompileError::WriteFailure { .. } => codes::E0601,
            CompileError::MalformedArtifact { .. } => codes::E0602,
        }
    }

    /// Source location, when the error originates in function source.
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::MissingAnnotation { span, .. }
            | CompileError::DuplicateDefinition { span, .. }
            | CompileError::UnboundVariable { span, .. }
            | CompileError::UnsupportedReturn { span, .. }
            | CompileError::UnsupportedExpression { span, .. } => Some(*span),
            CompileError::Syntax { span, .. }
            | CompileError::UnsupportedType { span, .. }
            | CompileError::TypeMismatch { span, .. }
            | CompileError::ArityMismatch { span, .. } => *span,
            _ => None,
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            CompileError::MissingAnnotation { .. } => {
                Some("every parameter except the receiver needs a type annotation")
            }
            CompileError::UnsupportedType { .. } => {
                Some("supported types are bool, int, float, str and List[...] of those")
            }
            CompileError::DuplicateDefinition { .. } => {
                Some("annotated names may be bound once; use a plain assignment to rebind")
            }
            CompileError::UnsupportedReturn { .. } => {
                Some("return a single name or a tuple of names")
            }
            CompileError::UnknownOperator { .. } => {
                Some("register the operator signature or declare a return annotation")
            }
            CompileError::UndeclaredOutput { .. } => {
                Some("returned names must be produced by a node in the function body")
            }
            CompileError::UnboundSubgraphInputs { .. } => {
                Some("list every input the requested outputs depend on in the subgraph binding")
            }
            _ => None,
        }
    }

    /// Render as a shared `Diagnostic`.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::new(self.span(), self.to_string()).with_code(self.code());
        if let Some(hint) = self.hint() {
            diag = diag.with_hint(hint);
        }
        diag
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Syntax { messages, .. } => {
                write!(f, "syntax error: {}", messages.join("; "))
            }
            CompileError::MissingAnnotation {
                function,
                parameter,
                ..
            } => write!(
                f,
                "parameter '{}' of function '{}' has no type annotation",
                parameter, function
            ),
            CompileError::UnsupportedType { annotation, .. } => {
                write!(f, "unsupported type annotation '{}'", annotation)
            }
            CompileError::DuplicateDefinition { name, .. } => {
                write!(f, "'{}' is already defined", name)
            }
            CompileError::UnboundVariable { name, .. } => {
                write!(f, "'{}' is used before it is bound", name)
            }
            CompileError::UnsupportedReturn { message, .. } => {
                write!(f, "unsupported return: {}", message)
            }
            CompileError::UnsupportedExpression { construct, .. } => {
                write!(f, "unsupported expression: {}", construct)
            }
            CompileError::UnresolvedSymbol {
                path,
                segment,
                namespace,
            } => write!(
                f,
                "cannot resolve '{}': no '{}' in {}",
                path, segment, namespace
            ),
            CompileError::NotCallable { path, kind } => {
                write!(f, "'{}' resolves to a {}, not a function", path, kind)
            }
            CompileError::NotAMethod { callable } => {
                write!(f, "call to '{}' is not a method call", callable)
            }
            CompileError::UnknownOperator { callable } => {
                write!(f, "no signature known for operator '{}'", callable)
            }
            CompileError::TypeMismatch {
                context,
                left,
                right,
                ..
            } => write!(f, "type mismatch in {}: {} vs {}", context, left, right),
            CompileError::ArityMismatch {
                context,
                expected,
                found,
                ..
            } => write!(
                f,
                "arity mismatch in {}: expected {}, found {}",
                context, expected, found
            ),
            CompileError::Redefinition { name } => {
                write!(f, "graph variable '{}' is already declared", name)
            }
            CompileError::UndeclaredOutput { name } => {
                write!(f, "returned name '{}' is not produced by any node", name)
            }
            CompileError::UnknownBoundaryNames { graph, names } => write!(
                f,
                "graph '{}' has no boundary tensors named {}",
                graph,
                names.join(", ")
            ),
            CompileError::UnsupportedModel { graph, reason } => {
                write!(f, "graph '{}' is not supported: {}", graph, reason)
            }
            CompileError::UnboundSubgraphInputs { graph, names } => write!(
                f,
                "graph '{}' needs inputs outside the requested boundary: {}",
                graph,
                names.join(", ")
            ),
            CompileError::NotFound { path } => write!(f, "{}: not found", path.display()),
            CompileError::WriteFailure { path, source } => {
                write!(f, "{}: write failed: {}", path.display(), source)
            }
            CompileError::MalformedArtifact { path, message } => {
                write!(f, "{}: malformed: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::WriteFailure { source, .. } => Some(source),
            _ => None,
        }
    }
}
