// AST node types for annotated function source.
//
// A tagged-variant tree over the flat, branch-free statement subset.
// Every node carries a `SimpleSpan` for error reporting in downstream phases.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use std::fmt;

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// One function definition: the unit of compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: Ident,
    pub params: Vec<Param>,
    pub returns: Option<TypeExpr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// `name` or `name: annotation`
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub annotation: Option<TypeExpr>,
}

// ── Type annotations ──

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// `int`, `str`, ...
    Name(Ident),
    /// `List[int]`, `Tuple[str, List[int]]`
    Generic {
        base: Ident,
        args: Vec<TypeExpr>,
        span: Span,
    },
    /// `...` inside a generic argument list.
    Ellipsis(Span),
}

impl TypeExpr {
    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Name(id) => id.span,
            TypeExpr::Generic { span, .. } => *span,
            TypeExpr::Ellipsis(span) => *span,
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Name(id) => write!(f, "{}", id.name),
            TypeExpr::Generic { base, args, .. } => {
                write!(f, "{}[", base.name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, "]")
            }
            TypeExpr::Ellipsis(_) => write!(f, "..."),
        }
    }
}

// ── Statements ──

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    AnnAssign(AnnAssign),
    Assign(Assign),
    /// `return` with an optional value.
    Return(Option<Expr>),
    /// A bare expression evaluated for its value only.
    Expr(Expr),
    Pass,
}

/// `target: annotation (= value)?`
#[derive(Debug, Clone, PartialEq)]
pub struct AnnAssign {
    pub target: Ident,
    pub annotation: TypeExpr,
    pub value: Option<Expr>,
}

/// `target = value` or `t1, t2 = value`
#[derive(Debug, Clone, PartialEq)]
pub struct Assign {
    pub target: Target,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(Ident),
    Tuple(Vec<Ident>, Span),
}

impl Target {
    /// Target names in left-to-right order.
    pub fn names(&self) -> Vec<&Ident> {
        match self {
            Target::Name(id) => vec![id],
            Target::Tuple(ids, _) => ids.iter().collect(),
        }
    }
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Name(String),
    /// `a.b.c` read without a call.
    Attribute(Vec<Ident>),
    Literal(Literal),
    Call(Call),
    Add(Box<Expr>, Box<Expr>),
    Tuple(Vec<Expr>),
}

/// `a.b.c(args)`: the callee is kept as its dotted name path.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub path: Vec<Ident>,
    pub args: Vec<Expr>,
}

impl Call {
    pub fn path_segments(&self) -> Vec<String> {
        self.path.iter().map(|id| id.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

// ── Identifier ──

/// An identifier with its source text and span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
