// dot.rs — Graphviz DOT output for compiled artifacts
//
// Renders a model's graph with one vertex per boundary tensor, initializer and
// node, and one edge per tensor use. Nodes spliced from a subgraph artifact
// (named `scope/inner`) are grouped into a cluster per scope.
//
// Preconditions: none; dangling tensor references are simply not drawn.
// Postconditions: output is deterministic for a given model.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write};

use crate::artifact::{Model, NodeProto};

/// Emit the model graph as a Graphviz DOT string.
pub fn emit_dot(model: &Model) -> String {
    let mut buf = String::new();
    // Writing to a String cannot fail.
    let _ = write_dot(&mut buf, model);
    buf
}

fn write_dot(buf: &mut String, model: &Model) -> fmt::Result {
    let graph = &model.graph;
    writeln!(buf, "digraph \"{}\" {{", escape(&graph.name))?;
    writeln!(buf, "    rankdir=LR;")?;
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];")?;

    // Tensor name → DOT id of the vertex that produces it.
    let mut producer: HashMap<&str, String> = HashMap::new();

    writeln!(buf)?;
    for v in &graph.input {
        let id = format!("in_{}", sanitize(&v.name));
        let ty = v.ty.as_ref().map(|t| format!("\\n{}", t)).unwrap_or_default();
        writeln!(
            buf,
            "    {id} [shape=invhouse, style=filled, fillcolor=lightgreen, label=\"{}{}\"];",
            escape(&v.name),
            ty
        )?;
        producer.insert(&v.name, id);
    }
    for t in &graph.initializer {
        let id = format!("init_{}", sanitize(&t.name));
        writeln!(
            buf,
            "    {id} [shape=note, style=filled, fillcolor=lightyellow, label=\"{}\"];",
            escape(&t.name)
        )?;
        producer.insert(&t.name, id);
    }

    // Top-level nodes first, then one cluster per splice scope.
    let mut scopes: BTreeMap<&str, Vec<(usize, &NodeProto)>> = BTreeMap::new();
    writeln!(buf)?;
    for (idx, node) in graph.node.iter().enumerate() {
        for out in node.output.iter().filter(|o| !o.is_empty()) {
            producer.insert(out, format!("n{idx}"));
        }
        match node.name.split_once('/') {
            Some((scope, _)) => scopes.entry(scope).or_default().push((idx, node)),
            None => writeln!(buf, "    n{idx} [{}];", node_attrs(node))?,
        }
    }
    for (scope, nodes) in &scopes {
        writeln!(buf)?;
        writeln!(buf, "    subgraph cluster_{} {{", sanitize(scope))?;
        writeln!(buf, "        label=\"{}\";", escape(scope))?;
        writeln!(buf, "        style=dashed;")?;
        writeln!(buf, "        color=gray60;")?;
        for (idx, node) in nodes {
            writeln!(buf, "        n{idx} [{}];", node_attrs(node))?;
        }
        writeln!(buf, "    }}")?;
    }

    writeln!(buf)?;
    for v in &graph.output {
        writeln!(
            buf,
            "    out_{} [shape=house, style=filled, fillcolor=lightsalmon, label=\"{}\"];",
            sanitize(&v.name),
            escape(&v.name)
        )?;
    }

    writeln!(buf)?;
    for (idx, node) in graph.node.iter().enumerate() {
        for input in node.input.iter().filter(|i| !i.is_empty()) {
            if let Some(src) = producer.get(input.as_str()) {
                writeln!(buf, "    {src} -> n{idx} [label=\"{}\"];", escape(input))?;
            }
        }
    }
    for v in &graph.output {
        if let Some(src) = producer.get(v.name.as_str()) {
            writeln!(buf, "    {src} -> out_{} [style=bold];", sanitize(&v.name))?;
        }
    }
    writeln!(buf, "}}")
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Opaque operators in a custom domain are drawn apart from standard ops.
fn node_attrs(node: &NodeProto) -> String {
    let color = if node.domain.is_empty() {
        "lightblue"
    } else {
        "plum"
    };
    let label = match node.name.split_once('/') {
        Some((_, inner)) => format!("{}\\n{}", escape(inner), escape(&node.op_type)),
        None => format!("{}\\n{}", escape(&node.name), escape(&node.op_type)),
    };
    format!("shape=box, style=filled, fillcolor={color}, label=\"{label}\"")
}
