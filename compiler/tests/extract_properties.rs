// Property-based tests for subgraph extraction.
//
// Graphs are random DAGs: every node reads from graph inputs or earlier node
// outputs and produces one fresh tensor, declared as a graph output.
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use std::collections::HashSet;

use annograph::artifact::{Dim, ElemType, GraphProto, NodeProto, TensorType, ValueInfo};
use annograph::subgraph::extract;
use proptest::prelude::*;

// ── DAG generator ───────────────────────────────────────────────────────────

fn value(name: String) -> ValueInfo {
    ValueInfo {
        name,
        ty: Some(TensorType {
            elem_type: ElemType::Float,
            shape: vec![Dim::Value(1)],
        }),
    }
}

/// `seeds[i]` picks node i's inputs among the names visible at that point.
fn build_dag(n_inputs: usize, seeds: &[Vec<usize>]) -> GraphProto {
    let mut graph = GraphProto::new("dag");
    let mut visible: Vec<String> = (0..n_inputs).map(|i| format!("in{i}")).collect();
    graph.input = visible.iter().cloned().map(value).collect();

    for (i, picks) in seeds.iter().enumerate() {
        let inputs: Vec<String> = picks
            .iter()
            .map(|p| visible[p % visible.len()].clone())
            .collect();
        let out = format!("t{i}");
        graph.node.push(NodeProto {
            name: format!("n{i}"),
            op_type: "Sum".into(),
            domain: String::new(),
            input: inputs,
            output: vec![out.clone()],
            attribute: Vec::new(),
        });
        graph.output.push(value(out.clone()));
        visible.push(out);
    }
    graph
}

fn arb_dag() -> impl Strategy<Value = GraphProto> {
    (
        1usize..4,
        prop::collection::vec(prop::collection::vec(0usize..64, 1..4), 1..12),
    )
        .prop_map(|(n_inputs, seeds)| build_dag(n_inputs, &seeds))
}

fn all_inputs(g: &GraphProto) -> Vec<String> {
    g.input.iter().map(|v| v.name.clone()).collect()
}

fn all_outputs(g: &GraphProto) -> Vec<String> {
    g.output.iter().map(|v| v.name.clone()).collect()
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn full_boundary_keeps_every_node(g in arb_dag()) {
        let e = extract(&g, &all_inputs(&g), &all_outputs(&g)).unwrap();
        prop_assert_eq!(e.nodes, g.node);
    }

    #[test]
    fn closure_is_sound_and_minimal(
        g in arb_dag(),
        mask in prop::collection::vec(any::<bool>(), 12),
    ) {
        let requested: Vec<String> = all_outputs(&g)
            .into_iter()
            .zip(&mask)
            .filter(|(_, keep)| **keep)
            .map(|(name, _)| name)
            .collect();
        let e = extract(&g, &all_inputs(&g), &requested).unwrap();

        let produced: HashSet<&str> = e
            .nodes
            .iter()
            .flat_map(|n| n.output.iter().map(String::as_str))
            .collect();
        let consumed: HashSet<&str> = e
            .nodes
            .iter()
            .flat_map(|n| n.input.iter().map(String::as_str))
            .collect();
        let inputs: HashSet<String> = all_inputs(&g).into_iter().collect();

        // Every requested output is computed.
        for name in &requested {
            prop_assert!(produced.contains(name.as_str()));
        }
        // Every kept node's operands are boundary inputs or kept outputs.
        for name in &consumed {
            prop_assert!(inputs.contains(*name) || produced.contains(name));
        }
        // Every kept node contributes to a requested output.
        for node in &e.nodes {
            let out = node.output[0].as_str();
            prop_assert!(requested.iter().any(|r| r == out) || consumed.contains(out));
        }
        // Original relative order.
        let positions: Vec<usize> = e
            .nodes
            .iter()
            .map(|n| g.node.iter().position(|m| m == n).unwrap())
            .collect();
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn extraction_is_deterministic(g in arb_dag()) {
        let outputs: Vec<String> = all_outputs(&g).into_iter().rev().take(2).collect();
        let a = extract(&g, &all_inputs(&g), &outputs).unwrap();
        let b = extract(&g, &all_inputs(&g), &outputs).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn unknown_names_reported_sorted(g in arb_dag(), extra in "[a-z]{3,6}") {
        let bogus = vec![format!("zz_{extra}"), format!("aa_{extra}")];
        let err = extract(&g, &bogus, &all_outputs(&g)).unwrap_err();
        let annograph::diag::CompileError::UnknownBoundaryNames { names, .. } = err else {
            panic!("expected UnknownBoundaryNames, got {err:?}")
        };
        prop_assert_eq!(names, vec![format!("aa_{extra}"), format!("zz_{extra}")]);
    }
}
