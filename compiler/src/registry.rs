// registry.rs — Operator signature registry
//
// Maps a callable identity to its declared argument and return types. The
// registry is an explicitly constructed value passed by reference into the
// passes; it is populated once before compilation and read-only afterwards.
//
// Preconditions: registrations happen before any pass borrows the registry.
// Postconditions: `lookup` consults the table first, then the callable's own
//   declared return annotation.
// Failure modes: `UnknownOperator` when neither tier yields a signature.
// Side effects: none.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::debug;

use crate::resolve::FunctionDef;
use crate::types::{return_type, ReturnType, Type};

use crate::diag::CompileError;

// ── Data types ──────────────────────────────────────────────────────────────

/// Qualified identity of a callable, e.g. `tok.Tokenizer.run`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallableId(pub String);

impl CallableId {
    pub fn new(id: impl Into<String>) -> Self {
        CallableId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final dotted segment (`run` for `tok.Tokenizer.run`).
    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for CallableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Argument and return types of one operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub args: Vec<Type>,
    pub ret: ReturnType,
}

// ── Registry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OperatorRegistry {
    signatures: HashMap<CallableId, Signature>,
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorRegistry {
    pub fn new() -> Self {
        OperatorRegistry {
            signatures: HashMap::new(),
        }
    }

    /// Store a signature, replacing any earlier entry for the same callable.
    pub fn register(&mut self, callable: CallableId, args: Vec<Type>, ret: ReturnType) {
        debug!("register operator {} ({} args) -> {}", callable, args.len(), ret);
        if self
            .signatures
            .insert(callable.clone(), Signature { args, ret })
            .is_some()
        {
            debug!("operator {} re-registered; previous signature replaced", callable);
        }
    }

    pub fn get(&self, callable: &CallableId) -> Option<&Signature> {
        self.signatures.get(callable)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Signature for a resolved callable.
    ///
    /// The registered table wins. Otherwise a callable that carries its own
    /// return annotation yields a signature with unknown (empty) arguments.
    pub fn lookup(&self, callable: &FunctionDef) -> Result<Signature, CompileError> {
        if let Some(sig) = self.signatures.get(&callable.id) {
            return Ok(sig.clone());
        }
        match &callable.returns {
            Some(annotation) => {
                let ret = return_type(annotation)?;
                debug!("operator {} typed from its annotation: {}", callable.id, ret);
                Ok(Signature {
                    args: Vec::new(),
                    ret,
                })
            }
            None => Err(CompileError::UnknownOperator {
                callable: callable.id.to_string(),
            }),
        }
    }

    /// Compact, key-sorted JSON rendering of the table.
    ///
    /// Stable across insertion order; used for provenance fingerprints.
    pub fn canonical_json(&self) -> String {
        let table: BTreeMap<&str, serde_json::Value> = self
            .signatures
            .iter()
            .map(|(id, sig)| {
                let args: Vec<String> = sig.args.iter().map(|t| t.to_string()).collect();
                (
                    id.as_str(),
                    serde_json::json!({ "args": args, "returns": sig.ret.to_string() }),
                )
            })
            .collect();
        serde_json::to_string(&table).unwrap_or_default()
    }
}
