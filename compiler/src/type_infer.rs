// type_infer.rs — Type inference over one function body
//
// Single forward pass over the flat statement sequence. Seeds the type map
// from parameter annotations, then binds targets from annotations or from the
// inferred types of assigned values. Every call expression gets a `CallSite`,
// keyed by the call's span, which the graph builder reuses without
// re-resolving.
//
// Preconditions: the function parsed without errors.
// Postconditions: every name read is bound; `outputs` lists returned names
//   in order; every call in the body has a cached-resolution call site.
// Failure modes: MissingAnnotation, DuplicateDefinition, UnboundVariable,
//   UnsupportedReturn, UnsupportedExpression, TypeMismatch, ArityMismatch,
//   and any resolution or registry error raised by a call site.
// Side effects: none.

use std::collections::{BTreeMap, HashMap};

use log::{debug, trace};

use crate::ast::*;
use crate::call_site::CallSite;
use crate::diag::CompileError;
use crate::pipeline::CompileOptions;
use crate::registry::{CallableId, OperatorRegistry};
use crate::resolve::Environment;
use crate::types::{annotation_to_type, literal_type, Type};

// ── Output types ────────────────────────────────────────────────────────────

/// Result of type inference for one function.
#[derive(Debug)]
pub struct TypedFunction {
    /// Final name → type mapping (plain reassignment keeps the last binding).
    pub types: BTreeMap<String, Type>,
    /// Non-receiver parameters in declaration order.
    pub params: Vec<String>,
    /// One call site per call expression, keyed by the call's span.
    pub call_sites: HashMap<Span, CallSite>,
    /// Names returned by the function, in order.
    pub outputs: Vec<String>,
}

impl TypedFunction {
    pub fn type_of(&self, name: &str) -> Option<Type> {
        self.types.get(name).copied()
    }
}

// ── Type inference engine ───────────────────────────────────────────────────

/// Run type inference on one function.
pub fn type_infer(
    function: &Function,
    env: &Environment,
    registry: &OperatorRegistry,
    options: &CompileOptions,
) -> Result<TypedFunction, CompileError> {
    let mut engine = TypeInferEngine {
        env,
        registry,
        options,
        function: &function.name.name,
        types: BTreeMap::new(),
        params: Vec::new(),
        call_sites: HashMap::new(),
        outputs: None,
    };
    engine.seed_params(&function.params)?;
    for stmt in &function.body {
        engine.infer_stmt(stmt)?;
    }
    debug!(
        "type_infer '{}': {} names, {} call sites, {} outputs",
        function.name.name,
        engine.types.len(),
        engine.call_sites.len(),
        engine.outputs.as_ref().map_or(0, Vec::len)
    );
    Ok(TypedFunction {
        types: engine.types,
        params: engine.params,
        call_sites: engine.call_sites,
        outputs: engine.outputs.unwrap_or_default(),
    })
}

struct TypeInferEngine<'a> {
    env: &'a Environment,
    registry: &'a OperatorRegistry,
    options: &'a CompileOptions,
    function: &'a str,
    types: BTreeMap<String, Type>,
    params: Vec<String>,
    call_sites: HashMap<Span, CallSite>,
    /// `Some` once a return statement has been seen.
    outputs: Option<Vec<String>>,
}

impl<'a> TypeInferEngine<'a> {
    // ── Parameters ──────────────────────────────────────────────────────

    fn seed_params(&mut self, params: &[Param]) -> Result<(), CompileError> {
        for (i, param) in params.iter().enumerate() {
            let name = &param.name.name;
            if i == 0 && *name == self.options.receiver_name {
                continue;
            }
            let annotation =
                param
                    .annotation
                    .as_ref()
                    .ok_or_else(|| CompileError::MissingAnnotation {
                        function: self.function.to_string(),
                        parameter: name.clone(),
                        span: param.name.span,
                    })?;
            if self.types.contains_key(name) {
                return Err(CompileError::DuplicateDefinition {
                    name: name.clone(),
                    span: param.name.span,
                });
            }
            let ty = annotation_to_type(annotation)?;
            trace!("param {}: {}", name, ty);
            self.types.insert(name.clone(), ty);
            self.params.push(name.clone());
        }
        Ok(())
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn infer_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::AnnAssign(assign) => self.infer_ann_assign(assign),
            StmtKind::Assign(assign) => self.infer_assign(assign, stmt.span),
            StmtKind::Return(value) => self.infer_return(value.as_ref(), stmt.span),
            StmtKind::Expr(expr) => self.infer_values(expr).map(|_| ()),
            StmtKind::Pass => Ok(()),
        }
    }

    /// `x: T = value` binds `x → T`; the value's type is not cross-checked.
    fn infer_ann_assign(&mut self, assign: &AnnAssign) -> Result<(), CompileError> {
        let target = &assign.target;
        if self.types.contains_key(&target.name) {
            return Err(CompileError::DuplicateDefinition {
                name: target.name.clone(),
                span: target.span,
            });
        }
        let ty = annotation_to_type(&assign.annotation)?;
        if let Some(value) = &assign.value {
            self.infer_values(value)?;
        }
        self.bind(&target.name, ty);
        Ok(())
    }

    /// `x = value` / `a, b = value`; overwrites earlier bindings.
    fn infer_assign(&mut self, assign: &Assign, span: Span) -> Result<(), CompileError> {
        let targets = assign.target.names();
        let values = self.infer_values(&assign.value)?;
        if values.len() != targets.len() {
            return Err(CompileError::ArityMismatch {
                context: format!("assignment to {}", target_list(&targets)),
                expected: targets.len(),
                found: values.len(),
                span: Some(span),
            });
        }
        for (target, ty) in targets.iter().zip(values) {
            self.bind(&target.name, ty);
        }
        Ok(())
    }

    fn infer_return(&mut self, value: Option<&Expr>, span: Span) -> Result<(), CompileError> {
        if self.outputs.is_some() {
            return Err(CompileError::UnsupportedReturn {
                message: "more than one return statement".into(),
                span,
            });
        }
        let Some(value) = value else {
            return Err(CompileError::UnsupportedReturn {
                message: "return without a value".into(),
                span,
            });
        };
        let names: Vec<(&str, Span)> = match &value.kind {
            ExprKind::Name(name) => vec![(name.as_str(), value.span)],
            ExprKind::Tuple(items) => items
                .iter()
                .map(|item| match &item.kind {
                    ExprKind::Name(name) => Ok((name.as_str(), item.span)),
                    _ => Err(CompileError::UnsupportedReturn {
                        message: "tuple elements must be names".into(),
                        span: item.span,
                    }),
                })
                .collect::<Result<_, _>>()?,
            _ => {
                return Err(CompileError::UnsupportedReturn {
                    message: "expected a name or a tuple of names".into(),
                    span: value.span,
                })
            }
        };
        for (idx, (name, span)) in names.iter().enumerate() {
            self.lookup(name, *span)?;
            if names[..idx].iter().any(|(earlier, _)| earlier == name) {
                return Err(CompileError::UnsupportedReturn {
                    message: format!("name '{}' returned more than once", name),
                    span: *span,
                });
            }
        }
        self.outputs = Some(names.into_iter().map(|(n, _)| n.to_string()).collect());
        Ok(())
    }

    fn bind(&mut self, name: &str, ty: Type) {
        if name == self.options.wildcard {
            return;
        }
        trace!("bind {}: {}", name, ty);
        self.types.insert(name.to_string(), ty);
    }

    fn lookup(&self, name: &str, span: Span) -> Result<Type, CompileError> {
        self.types
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::UnboundVariable {
                name: name.to_string(),
                span,
            })
    }

    // ── Expressions ─────────────────────────────────────────────────────

    /// Types of a value in multi-value position: a tuple yields one type per
    /// element, a call all of its return types, anything else one type.
    fn infer_values(&mut self, expr: &Expr) -> Result<Vec<Type>, CompileError> {
        match &expr.kind {
            ExprKind::Tuple(items) => items.iter().map(|item| self.infer_expr(item)).collect(),
            ExprKind::Call(call) => self.infer_call(call, expr.span),
            _ => Ok(vec![self.infer_expr(expr)?]),
        }
    }

    /// Type of a value in single-value position.
    fn infer_expr(&mut self, expr: &Expr) -> Result<Type, CompileError> {
        match &expr.kind {
            ExprKind::Name(name) => self.lookup(name, expr.span),
            ExprKind::Literal(lit) => Ok(literal_type(lit)),
            ExprKind::Add(left, right) => {
                let l = self.infer_expr(left)?;
                let r = self.infer_expr(right)?;
                if l != r {
                    return Err(CompileError::TypeMismatch {
                        context: "addition".into(),
                        left: l.to_string(),
                        right: r.to_string(),
                        span: Some(expr.span),
                    });
                }
                Ok(l)
            }
            ExprKind::Call(call) => {
                let types = self.infer_call(call, expr.span)?;
                match types.as_slice() {
                    [ty] => Ok(*ty),
                    _ => Err(CompileError::ArityMismatch {
                        context: format!("value of call to '{}'", call.path_segments().join(".")),
                        expected: 1,
                        found: types.len(),
                        span: Some(expr.span),
                    }),
                }
            }
            ExprKind::Attribute(_) => Err(CompileError::UnsupportedExpression {
                construct: "attribute read".into(),
                span: expr.span,
            }),
            ExprKind::Tuple(_) => Err(CompileError::UnsupportedExpression {
                construct: "nested tuple".into(),
                span: expr.span,
            }),
        }
    }

    fn infer_call(&mut self, call: &Call, span: Span) -> Result<Vec<Type>, CompileError> {
        let args = call
            .args
            .iter()
            .map(|arg| self.infer_expr(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let (env, registry, options) = (self.env, self.registry, self.options);
        let site = self
            .call_sites
            .entry(span)
            .or_insert_with(|| CallSite::new(call.path_segments(), &options.receiver_name, span));
        let types = site.return_types(env, registry)?.to_vec();
        let callable = &site.resolved_callable(env)?.id;
        if let Some(signature) = registry.get(callable) {
            check_arguments(callable, &signature.args, &args, span)?;
        }
        trace!(
            "call {} ({}) -> {:?}",
            site.qualname(),
            if site.is_global() { "free" } else { "method" },
            types
        );
        Ok(types)
    }
}

/// Registered argument types must match the call's arguments one to one.
fn check_arguments(
    callable: &CallableId,
    expected: &[Type],
    found: &[Type],
    span: Span,
) -> Result<(), CompileError> {
    if expected.len() != found.len() {
        return Err(CompileError::ArityMismatch {
            context: format!("arguments of '{}'", callable),
            expected: expected.len(),
            found: found.len(),
            span: Some(span),
        });
    }
    for (idx, (want, got)) in expected.iter().zip(found).enumerate() {
        if want != got {
            return Err(CompileError::TypeMismatch {
                context: format!("argument {} of '{}'", idx + 1, callable),
                left: want.to_string(),
                right: got.to_string(),
                span: Some(span),
            });
        }
    }
    Ok(())
}

fn target_list(targets: &[&Ident]) -> String {
    targets
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Tests ───────────────────────────────────────────────────────────────────
