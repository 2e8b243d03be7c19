// call_site.rs — Resolved, typed representation of one call expression
//
// A call is classified structurally from its dotted path: a path rooted at
// the receiver name is a method call on (an attribute of) the receiver,
// anything else is a free function. Resolution and return types are computed
// on first use and cached for the lifetime of the call site.
//
// Preconditions: the environment and registry outlive every query.
// Postconditions: repeated queries return the cached results.
// Failure modes: resolution errors, `UnknownOperator`, `NotAMethod` for
//   receiver accessors on free-function calls.
// Side effects: none beyond the internal caches.

use std::cell::OnceCell;

use crate::ast::Span;
use crate::diag::CompileError;
use crate::registry::OperatorRegistry;
use crate::resolve::{self, ClassDef, Environment, FunctionDef, ObjectDef};
use crate::types::Type;

/// Shape of a call target, decided once from the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    FreeFunction {
        path: Vec<String>,
    },
    /// `receiver_path` is the attribute chain below the receiver; empty for
    /// methods of the receiver itself.
    Method {
        receiver_path: Vec<String>,
        method: String,
    },
}

impl CallTarget {
    pub fn classify(path: &[String], receiver_name: &str) -> CallTarget {
        match path.split_first() {
            Some((first, rest)) if first == receiver_name => match rest.split_last() {
                Some((method, receiver_path)) => CallTarget::Method {
                    receiver_path: receiver_path.to_vec(),
                    method: method.clone(),
                },
                // Calling the receiver itself.
                None => CallTarget::Method {
                    receiver_path: Vec::new(),
                    method: "__call__".to_string(),
                },
            },
            _ => CallTarget::FreeFunction {
                path: path.to_vec(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallSite {
    path: Vec<String>,
    target: CallTarget,
    span: Span,
    callable: OnceCell<FunctionDef>,
    returns: OnceCell<Vec<Type>>,
}

impl CallSite {
    pub fn new(path: Vec<String>, receiver_name: &str, span: Span) -> Self {
        let target = CallTarget::classify(&path, receiver_name);
        CallSite {
            path,
            target,
            span,
            callable: OnceCell::new(),
            returns: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn target(&self) -> &CallTarget {
        &self.target
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn is_global(&self) -> bool {
        matches!(self.target, CallTarget::FreeFunction { .. })
    }

    /// Dotted path as written at the call.
    pub fn qualname(&self) -> String {
        self.path.join(".")
    }

    pub fn resolved_callable(&self, env: &Environment) -> Result<&FunctionDef, CompileError> {
        if let Some(callable) = self.callable.get() {
            return Ok(callable);
        }
        let callable = match &self.target {
            CallTarget::FreeFunction { path } => resolve::resolve_free_function(env, path)?,
            CallTarget::Method {
                receiver_path,
                method,
            } => resolve::resolve_method(env, receiver_path, method)?,
        };
        Ok(self.callable.get_or_init(|| callable.clone()))
    }

    /// Declared return types, one per produced value.
    pub fn return_types(
        &self,
        env: &Environment,
        registry: &OperatorRegistry,
    ) -> Result<&[Type], CompileError> {
        if let Some(types) = self.returns.get() {
            return Ok(types);
        }
        let signature = registry.lookup(self.resolved_callable(env)?)?;
        Ok(self.returns.get_or_init(|| signature.ret.types()))
    }

    /// Instance the method is invoked on.
    pub fn receiver_instance<'e>(&self, env: &'e Environment) -> Result<&'e ObjectDef, CompileError> {
        match &self.target {
            CallTarget::Method { receiver_path, .. } => resolve::resolve_receiver(env, receiver_path),
            CallTarget::FreeFunction { .. } => Err(CompileError::NotAMethod {
                callable: self.qualname(),
            }),
        }
    }

    /// Runtime class of the receiver instance.
    pub fn receiver_type<'e>(&self, env: &'e Environment) -> Result<&'e ClassDef, CompileError> {
        let instance = self.receiver_instance(env)?;
        resolve::class_of(env, instance)
    }
}
