// subgraph.rs — Minimal closure between boundary tensors of a graph
//
// Given a graph and two boundary name sets, keeps exactly the nodes needed to
// compute the requested outputs from the requested inputs, plus the tensor
// declarations those nodes reference.
//
// Preconditions: the graph is acyclic.
// Postconditions: kept nodes are in their original relative order (still a
//   topological order); every kept tensor is referenced by a kept node.
// Failure modes: `UnknownBoundaryNames` (all offending names, sorted),
//   `UnsupportedModel` for sparse initializers or quantization annotations.
// Side effects: none.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::debug;

use crate::artifact::{GraphProto, Model, NodeProto, TensorProto, ValueInfo};
use crate::diag::CompileError;

/// Nodes and tensor declarations of an extracted closure.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub nodes: Vec<NodeProto>,
    pub initializers: Vec<TensorProto>,
    pub value_infos: Vec<ValueInfo>,
}

/// Extract the closure of `graph` between `inputs` and `outputs`.
pub fn extract(
    graph: &GraphProto,
    inputs: &[String],
    outputs: &[String],
) -> Result<Extracted, CompileError> {
    check_supported(graph)?;
    check_boundary(graph, inputs, outputs)?;

    let stop: HashSet<&str> = inputs.iter().map(String::as_str).collect();
    let reachable = reachable_nodes(&graph.node, &stop, outputs);

    let nodes: Vec<NodeProto> = graph
        .node
        .iter()
        .zip(&reachable)
        .filter(|(_, keep)| **keep)
        .map(|(n, _)| n.clone())
        .collect();

    let referenced: HashSet<&str> = nodes
        .iter()
        .flat_map(|n| n.input.iter().chain(&n.output))
        .map(String::as_str)
        .collect();
    let initializers = graph
        .initializer
        .iter()
        .filter(|t| referenced.contains(t.name.as_str()))
        .cloned()
        .collect();
    let value_infos = graph
        .value_info
        .iter()
        .filter(|v| referenced.contains(v.name.as_str()))
        .cloned()
        .collect();

    debug!(
        "extract '{}': kept {} of {} nodes",
        graph.name,
        nodes.len(),
        graph.node.len()
    );
    Ok(Extracted {
        nodes,
        initializers,
        value_infos,
    })
}

/// Extract a complete artifact whose boundary is exactly `inputs` / `outputs`
/// in the requested order.
pub fn extract_model(
    model: &Model,
    inputs: &[String],
    outputs: &[String],
) -> Result<Model, CompileError> {
    let graph = &model.graph;
    let extracted = extract(graph, inputs, outputs)?;

    // Boundary names were validated, so every lookup hits.
    let pick = |decls: &[ValueInfo], names: &[String]| -> Vec<ValueInfo> {
        names
            .iter()
            .filter_map(|name| decls.iter().find(|v| &v.name == name).cloned())
            .collect()
    };

    let mut out = GraphProto::new(graph.name.clone());
    out.node = extracted.nodes;
    out.input = pick(&graph.input, inputs);
    out.output = pick(&graph.output, outputs);
    out.initializer = extracted.initializers;
    out.value_info = extracted.value_infos;

    Ok(Model {
        graph: out,
        ..model.clone()
    })
}

// ── Validation ──────────────────────────────────────────────────────────────

fn check_supported(graph: &GraphProto) -> Result<(), CompileError> {
    let reason = if !graph.sparse_initializer.is_empty() {
        "sparse initializers"
    } else if !graph.quantization_annotation.is_empty() {
        "quantization annotations"
    } else {
        return Ok(());
    };
    Err(CompileError::UnsupportedModel {
        graph: graph.name.clone(),
        reason: format!("{} cannot be extracted", reason),
    })
}

fn check_boundary(
    graph: &GraphProto,
    inputs: &[String],
    outputs: &[String],
) -> Result<(), CompileError> {
    let declared_in: HashSet<&str> = graph.input.iter().map(|v| v.name.as_str()).collect();
    let declared_out: HashSet<&str> = graph.output.iter().map(|v| v.name.as_str()).collect();

    let unknown: BTreeSet<String> = inputs
        .iter()
        .filter(|n| !declared_in.contains(n.as_str()))
        .chain(outputs.iter().filter(|n| !declared_out.contains(n.as_str())))
        .cloned()
        .collect();

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(CompileError::UnknownBoundaryNames {
            graph: graph.name.clone(),
            names: unknown.into_iter().collect(),
        })
    }
}

// ── Reachability ────────────────────────────────────────────────────────────

/// Reverse depth-first search from each output. A node is included when it
/// produces a frontier name; traversal does not continue past names in `stop`.
fn reachable_nodes(nodes: &[NodeProto], stop: &HashSet<&str>, outputs: &[String]) -> Vec<bool> {
    let mut producers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, node) in nodes.iter().enumerate() {
        for out in node.output.iter().filter(|o| !o.is_empty()) {
            producers.entry(out.as_str()).or_default().push(idx);
        }
    }

    let mut reachable = vec![false; nodes.len()];
    let mut frontier: Vec<&str> = outputs.iter().map(String::as_str).collect();
    while let Some(name) = frontier.pop() {
        if stop.contains(name) {
            continue;
        }
        let Some(indices) = producers.get(name) else {
            continue;
        };
        for &idx in indices {
            if reachable[idx] {
                continue;
            }
            reachable[idx] = true;
            frontier.extend(
                nodes[idx]
                    .input
                    .iter()
                    .filter(|i| !i.is_empty())
                    .map(String::as_str),
            );
        }
    }
    reachable
}
