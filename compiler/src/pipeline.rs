// pipeline.rs — Compilation options and pass orchestration
//
// Runs parse → type inference → graph build for one function and carries the
// results, plus provenance, up to serialization.
//
// Preconditions: the environment and registry are fully populated.
// Postconditions: a `Compiled` holds the AST, the typed function and the
//   graph; `to_model` / `save` produce the artifact.
// Failure modes: the first error of any phase aborts compilation.
// Side effects: `save` writes the artifact file.

use std::path::Path;
use std::time::Instant;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::artifact::{Model, StringStringEntry};
use crate::ast::Function;
use crate::diag::CompileError;
use crate::graph::{build_graph, Graph};
use crate::registry::OperatorRegistry;
use crate::resolve::Environment;
use crate::type_infer::{type_infer, TypedFunction};

// ── Options ────────────────────────────────────────────────────────────────

/// Compilation settings. Every field has a default, so a partial JSON object
/// (or none at all) deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Name of the implicit receiver parameter and call-path root.
    pub receiver_name: String,
    /// Assignment target that is never bound.
    pub wildcard: String,
    pub producer_name: String,
    pub producer_version: String,
    pub ir_version: i64,
    pub opset_version: i64,
    /// Operator domain for opaque operator nodes.
    pub custom_domain: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            receiver_name: "self".to_string(),
            wildcard: "_".to_string(),
            producer_name: "annograph".to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            ir_version: 8,
            opset_version: 15,
            custom_domain: "ai.annograph".to_string(),
        }
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Metadata key for the SHA-256 of the function source.
pub const SOURCE_SHA256: &str = "source_sha256";
/// Metadata key for the SHA-256 of `OperatorRegistry::canonical_json()`.
pub const REGISTRY_SHA256: &str = "registry_sha256";

/// Provenance metadata recorded in every artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the registry fingerprint (64 characters).
    pub fn registry_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.registry_fingerprint)
    }

    pub fn to_metadata(&self) -> Vec<StringStringEntry> {
        vec![
            StringStringEntry {
                key: SOURCE_SHA256.to_string(),
                value: self.source_hash_hex(),
            },
            StringStringEntry {
                key: REGISTRY_SHA256.to_string(),
                value: self.registry_fingerprint_hex(),
            },
        ]
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from source text and registry.
pub fn compute_provenance(source: &str, registry: &OperatorRegistry) -> Provenance {
    Provenance {
        source_hash: sha256(source.as_bytes()),
        registry_fingerprint: sha256(registry.canonical_json().as_bytes()),
    }
}

// ── Pipeline ───────────────────────────────────────────────────────────────

/// Everything produced by one compilation.
#[derive(Debug)]
pub struct Compiled {
    pub function: Function,
    pub typed: TypedFunction,
    pub graph: Graph,
    pub provenance: Provenance,
    pub options: CompileOptions,
}

impl Compiled {
    /// Serialize the graph under `graph_name`.
    pub fn to_model(&self, graph_name: &str) -> Result<Model, CompileError> {
        self.graph
            .to_model(graph_name, &self.options, self.provenance.to_metadata())
    }

    /// Write the artifact to `path`; the graph is named after the file stem.
    pub fn save(&self, path: &Path) -> Result<Model, CompileError> {
        let model = self.to_model(&graph_name_for(path))?;
        model.save(path)?;
        info!(
            "wrote {} ({} nodes, {} outputs)",
            path.display(),
            model.graph.node.len(),
            model.graph.output.len()
        );
        Ok(model)
    }
}

/// Graph name for an output path: the file stem, with every non-ASCII
/// character replaced by `_`.
pub fn graph_name_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect()
}

fn timed<T>(
    phase: &str,
    f: impl FnOnce() -> Result<T, CompileError>,
) -> Result<T, CompileError> {
    let t = Instant::now();
    let result = f();
    debug!(
        "{} complete, {:.1}ms{}",
        phase,
        t.elapsed().as_secs_f64() * 1000.0,
        if result.is_err() { " (failed)" } else { "" }
    );
    result
}

/// Parse one function and return its AST, folding syntax errors into one error.
pub fn parse_function(source: &str) -> Result<Function, CompileError> {
    let result = crate::parser::parse(source);
    if let Some(first) = result.errors.first() {
        return Err(CompileError::Syntax {
            span: Some(*first.span()),
            messages: result.errors.iter().map(|e| e.to_string()).collect(),
        });
    }
    result.function.ok_or_else(|| CompileError::Syntax {
        messages: vec!["expected a function definition".to_string()],
        span: None,
    })
}

/// Compile one annotated function.
pub fn compile(
    source: &str,
    env: &Environment,
    registry: &OperatorRegistry,
    options: &CompileOptions,
) -> Result<Compiled, CompileError> {
    let function = timed("parse", || parse_function(source))?;
    let typed = timed("type_infer", || {
        type_infer(&function, env, registry, options)
    })?;
    let graph = timed("build_graph", || {
        build_graph(&function, &typed, env, registry, options)
    })?;
    let provenance = compute_provenance(source, registry);
    info!(
        "compiled '{}': {} nodes",
        function.name.name,
        graph.nodes().len()
    );
    Ok(Compiled {
        function,
        typed,
        graph,
        provenance,
        options: options.clone(),
    })
}
