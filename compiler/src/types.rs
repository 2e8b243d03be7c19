// types.rs — Static types of the annotated surface
//
// Closed scalar set plus a homogeneous list wrapper, mapping from source
// annotations, return-type decomposition and the tensor-level view used by
// the graph artifact.
//
// Preconditions: annotations come from the parser (or `parse_annotation`).
// Postconditions: `Type` equality is structural.
// Failure modes: `UnsupportedType` for annotations outside the closed set.
// Side effects: none.

use std::fmt;

use crate::artifact::{Dim, ElemType, TensorProto, TensorType};
use crate::ast::{Literal, TypeExpr};
use crate::diag::CompileError;

// ── Data types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarType {
    Bool,
    Int,
    Float,
    Str,
}

impl ScalarType {
    pub fn from_name(name: &str) -> Option<ScalarType> {
        match name {
            "bool" => Some(ScalarType::Bool),
            "int" => Some(ScalarType::Int),
            "float" => Some(ScalarType::Float),
            "str" => Some(ScalarType::Str),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int => "int",
            ScalarType::Float => "float",
            ScalarType::Str => "str",
        }
    }

    pub fn elem_type(self) -> ElemType {
        match self {
            ScalarType::Bool => ElemType::Bool,
            ScalarType::Int => ElemType::Int64,
            ScalarType::Float => ElemType::Double,
            ScalarType::Str => ElemType::String,
        }
    }
}

/// A static type: a scalar, or a homogeneous sequence of one scalar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Scalar(ScalarType),
    List(ScalarType),
}

impl Type {
    pub const BOOL: Type = Type::Scalar(ScalarType::Bool);
    pub const INT: Type = Type::Scalar(ScalarType::Int);
    pub const FLOAT: Type = Type::Scalar(ScalarType::Float);
    pub const STR: Type = Type::Scalar(ScalarType::Str);

    pub fn elem_type(self) -> ElemType {
        match self {
            Type::Scalar(s) | Type::List(s) => s.elem_type(),
        }
    }

    /// Scalars are shape `[1]`; lists have one symbolic dimension `N`.
    pub fn tensor_type(self) -> TensorType {
        let shape = match self {
            Type::Scalar(_) => vec![Dim::Value(1)],
            Type::List(_) => vec![Dim::Param("N".to_string())],
        };
        TensorType {
            elem_type: self.elem_type(),
            shape,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Scalar(s) => write!(f, "{}", s.name()),
            Type::List(s) => write!(f, "List[{}]", s.name()),
        }
    }
}

/// Declared return of an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnType {
    Single(Type),
    /// Product return. A variadic tail has already been dropped.
    Tuple(Vec<Type>),
}

impl ReturnType {
    pub fn types(&self) -> Vec<Type> {
        match self {
            ReturnType::Single(t) => vec![*t],
            ReturnType::Tuple(ts) => ts.clone(),
        }
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnType::Single(t) => write!(f, "{t}"),
            ReturnType::Tuple(ts) => {
                write!(f, "Tuple[")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// ── Annotation mapping ──────────────────────────────────────────────────────

fn unsupported(annotation: &TypeExpr) -> CompileError {
    CompileError::UnsupportedType {
        annotation: annotation.to_string(),
        span: Some(annotation.span()),
    }
}

/// Map a value annotation (`int`, `List[str]`, ...) to a `Type`.
pub fn annotation_to_type(annotation: &TypeExpr) -> Result<Type, CompileError> {
    match annotation {
        TypeExpr::Name(id) => ScalarType::from_name(&id.name)
            .map(Type::Scalar)
            .ok_or_else(|| unsupported(annotation)),
        TypeExpr::Generic { base, args, .. } if matches!(base.name.as_str(), "List" | "list") => {
            match args.as_slice() {
                [TypeExpr::Name(elem)] => ScalarType::from_name(&elem.name)
                    .map(Type::List)
                    .ok_or_else(|| unsupported(annotation)),
                _ => Err(unsupported(annotation)),
            }
        }
        _ => Err(unsupported(annotation)),
    }
}

/// Map a return annotation. `Tuple[...]` decomposes per element; a trailing
/// `...` marks the tail as variadic and only the fixed prefix is kept.
pub fn return_type(annotation: &TypeExpr) -> Result<ReturnType, CompileError> {
    let TypeExpr::Generic { base, args, .. } = annotation else {
        return annotation_to_type(annotation).map(ReturnType::Single);
    };
    if !matches!(base.name.as_str(), "Tuple" | "tuple") {
        return annotation_to_type(annotation).map(ReturnType::Single);
    }

    let fixed = match args.split_last() {
        Some((TypeExpr::Ellipsis(_), prefix)) => prefix,
        _ => args.as_slice(),
    };
    let types = fixed
        .iter()
        .map(annotation_to_type)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ReturnType::Tuple(types))
}

/// Flattened return types of an annotation.
pub fn decompose_returns(annotation: &TypeExpr) -> Result<Vec<Type>, CompileError> {
    return_type(annotation).map(|r| r.types())
}

/// Parse and map an annotation given as text (manifests, registrations).
pub fn parse_type(text: &str) -> Result<TypeExpr, CompileError> {
    crate::parser::parse_annotation(text).map_err(|errors| CompileError::Syntax {
        messages: if errors.is_empty() {
            vec![format!("invalid annotation '{}'", text)]
        } else {
            errors.iter().map(|e| format!("'{}': {}", text, e)).collect()
        },
        span: None,
    })
}

// ── Literals ────────────────────────────────────────────────────────────────

pub fn literal_type(lit: &Literal) -> Type {
    match lit {
        Literal::Bool(_) => Type::BOOL,
        Literal::Int(_) => Type::INT,
        Literal::Float(_) => Type::FLOAT,
        Literal::Str(_) => Type::STR,
    }
}

/// Literal as a one-element constant tensor.
pub fn literal_tensor(name: &str, lit: &Literal) -> TensorProto {
    let mut t = TensorProto::new(name, literal_type(lit).elem_type(), vec![1]);
    match lit {
        Literal::Bool(b) => t.int32_data = vec![i32::from(*b)],
        Literal::Int(n) => t.int64_data = vec![*n],
        Literal::Float(v) => t.double_data = vec![*v],
        Literal::Str(s) => t.string_data = vec![s.clone()],
    }
    t
}
