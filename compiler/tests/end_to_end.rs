// End-to-end tests: source + manifest → artifact on disk → reloaded artifact.
//
// Exercises the public library API the way an embedding tool would: load a
// manifest (with subgraph artifacts beside it), compile, save, reload.

use std::path::Path;

use annograph::artifact::{AttributeValue, Dim, ElemType, GraphProto, Model, NodeProto, TensorType, ValueInfo};
use annograph::diag::CompileError;
use annograph::manifest::Manifest;
use annograph::pipeline::{compile, CompileOptions, REGISTRY_SHA256, SOURCE_SHA256};
use annograph::registry::OperatorRegistry;
use annograph::resolve::{Environment, ObjectDef};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn plain_env() -> Environment {
    Environment::new(ObjectDef::new("models.IntPlus"))
}

fn names(values: &[ValueInfo]) -> Vec<&str> {
    values.iter().map(|v| v.name.as_str()).collect()
}

fn scalar(elem_type: ElemType) -> Option<TensorType> {
    Some(TensorType {
        elem_type,
        shape: vec![Dim::Value(1)],
    })
}

fn value(name: &str, elem_type: ElemType, dim: Dim) -> ValueInfo {
    ValueInfo {
        name: name.into(),
        ty: Some(TensorType {
            elem_type,
            shape: vec![dim],
        }),
    }
}

fn node(name: &str, op_type: &str, inputs: &[&str], outputs: &[&str]) -> NodeProto {
    NodeProto {
        name: name.into(),
        op_type: op_type.into(),
        domain: String::new(),
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: outputs.iter().map(|s| s.to_string()).collect(),
        attribute: Vec::new(),
    }
}

/// Tokenizer artifact: `text → pieces → ids`, plus an unrelated debug branch.
fn tokenizer_model() -> Model {
    let n = || Dim::Param("N".into());
    let mut graph = GraphProto::new("tokenizer");
    graph.input = vec![value("text", ElemType::String, Dim::Value(1))];
    graph.output = vec![
        value("ids", ElemType::Int64, n()),
        value("debug", ElemType::String, Dim::Value(1)),
    ];
    graph.value_info = vec![value("pieces", ElemType::String, n())];
    graph.node = vec![
        node("split", "StringSplit", &["text"], &["pieces"]),
        node("echo", "Identity", &["text"], &["debug"]),
        node("lookup", "LabelEncoder", &["pieces"], &["ids"]),
    ];
    Model {
        ir_version: 8,
        producer_name: "tokenizer-export".into(),
        producer_version: "2.1".into(),
        opset_import: Vec::new(),
        metadata_props: Vec::new(),
        graph,
    }
}

const MANIFEST: &str = r#"{
    "modules": {
        "models": {"text": {"module": "models.text"}},
        "models.text": {"normalize": {"function": {"returns": "str"}}}
    },
    "classes": {
        "models.Encoder": {"module": "models"},
        "models.text.Tokenizer": {
            "module": "models.text",
            "methods": {
                "run": {
                    "returns": "List[int]",
                    "subgraph": {"model": "tokenizer.json", "inputs": ["text"], "outputs": ["ids"]}
                }
            }
        }
    },
    "receiver": {
        "class": "models.Encoder",
        "attributes": {"tok": {"class": "models.text.Tokenizer"}}
    },
    "operators": [
        {"callable": "models.text.normalize", "args": ["str"], "returns": "str"}
    ]
}"#;

fn write_fixture(dir: &Path) {
    tokenizer_model().save(&dir.join("tokenizer.json")).unwrap();
    std::fs::write(dir.join("manifest.json"), MANIFEST).unwrap();
}

// ── Plain arithmetic ────────────────────────────────────────────────────────

#[test_log::test]
fn int_plus_single_output() {
    let source = "def forward(self, x: int, y: int) -> int:\n    r1: int = x + y\n    return r1\n";
    let compiled = compile(source, &plain_env(), &OperatorRegistry::new(), &CompileOptions::default())
        .unwrap();
    let model = compiled.to_model("int_plus").unwrap();
    let graph = &model.graph;

    assert_eq!(names(&graph.input), vec!["x", "y"]);
    assert!(graph.input.iter().all(|v| v.ty == scalar(ElemType::Int64)));
    assert_eq!(names(&graph.output), vec!["r1"]);
    assert_eq!(graph.output[0].ty, scalar(ElemType::Int64));
    assert_eq!(graph.node.len(), 1);
    assert_eq!(graph.node[0].op_type, "Add");
    assert_eq!(graph.node[0].input, vec!["x", "y"]);
    assert_eq!(graph.node[0].output, vec!["r1"]);
    assert!(graph.value_info.is_empty());
}

#[test_log::test]
fn int_plus_two_outputs() {
    let source = "\
def forward(self, x: int, y: int) -> Tuple[int, int]:
    r1: int = x + y
    r2: int = r1 + x
    return r1, r2
";
    let compiled = compile(source, &plain_env(), &OperatorRegistry::new(), &CompileOptions::default())
        .unwrap();
    let model = compiled.to_model("int_plus2").unwrap();

    assert_eq!(names(&model.graph.output), vec!["r1", "r2"]);
    assert_eq!(model.graph.node[1].input, vec!["r1", "x"]);
    assert!(model.graph.value_info.is_empty());
}

#[test]
fn intermediates_become_value_info() {
    let source = "\
def forward(self, x: float) -> float:
    a: float = x + x
    b: float = a + 1.5
    return b
";
    let compiled = compile(source, &plain_env(), &OperatorRegistry::new(), &CompileOptions::default())
        .unwrap();
    let model = compiled.to_model("g").unwrap();
    let intermediates = names(&model.graph.value_info);
    assert!(intermediates.contains(&"a"));
    assert!(!intermediates.contains(&"b"));
    assert_eq!(model.graph.output[0].ty, scalar(ElemType::Double));
}

// ── Manifest-driven compilation ─────────────────────────────────────────────

#[test_log::test]
fn subgraph_spliced_from_manifest() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());

    let (env, registry, options) = Manifest::load(&dir.path().join("manifest.json"))
        .unwrap()
        .into_parts(dir.path())
        .unwrap();
    let source = "\
def encode(self, text: str) -> List[int]:
    ids = self.tok.run(text)
    return ids
";
    let compiled = compile(source, &env, &registry, &options).unwrap();
    let model = compiled.save(&dir.path().join("encode.json")).unwrap();
    let graph = &model.graph;

    let node_names: Vec<&str> = graph.node.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(node_names, vec!["run_0/split", "run_0/lookup"]);
    assert_eq!(graph.node[0].input, vec!["text"]);
    assert_eq!(graph.node[0].output, vec!["run_0/pieces"]);
    assert_eq!(graph.node[1].output, vec!["ids"]);
    assert_eq!(names(&graph.input), vec!["text"]);
    assert_eq!(names(&graph.output), vec!["ids"]);
    assert_eq!(graph.output[0].ty.as_ref().unwrap().elem_type, ElemType::Int64);
    assert!(names(&graph.value_info).contains(&"run_0/pieces"));

    let reloaded = Model::load(&dir.path().join("encode.json")).unwrap();
    assert_eq!(reloaded, model);
    assert_eq!(reloaded.graph.name, "encode");
}

#[test]
fn registered_operator_becomes_opaque_node() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let (env, registry, options) = Manifest::load(&dir.path().join("manifest.json"))
        .unwrap()
        .into_parts(dir.path())
        .unwrap();
    // Free functions resolve from `models`, the module of the receiver class.
    let source = "\
def clean(self, s: str) -> str:
    out = text.normalize(s)
    return out
";
    let model = compile(source, &env, &registry, &options)
        .unwrap()
        .to_model("clean")
        .unwrap();
    let node = &model.graph.node[0];
    assert_eq!(node.op_type, "normalize");
    assert_eq!(node.domain, options.custom_domain);
    assert_eq!(
        node.attribute("callable"),
        Some(&AttributeValue::S("models.text.normalize".into()))
    );
    assert!(node.attribute("receiver").is_none());
    assert!(model
        .opset_import
        .iter()
        .any(|o| o.domain == options.custom_domain));

    let source = "def clean(self, s: str) -> str:\n    out = missing.normalize(s)\n    return out\n";
    let err = compile(source, &env, &registry, &options).unwrap_err();
    assert!(matches!(err, CompileError::UnresolvedSymbol { .. }), "{err:?}");
}

#[test]
fn provenance_tracks_source_and_registry() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let (env, registry, options) = Manifest::load(&dir.path().join("manifest.json"))
        .unwrap()
        .into_parts(dir.path())
        .unwrap();
    let source = "def f(self, x: str) -> str:\n    y = x\n    return y\n";

    let with_ops = compile(source, &env, &registry, &options).unwrap();
    let without_ops = compile(source, &env, &OperatorRegistry::new(), &options).unwrap();
    let a = with_ops.to_model("f").unwrap();
    let b = without_ops.to_model("f").unwrap();

    assert_eq!(a.metadata(SOURCE_SHA256), b.metadata(SOURCE_SHA256));
    assert_ne!(a.metadata(REGISTRY_SHA256), b.metadata(REGISTRY_SHA256));
}

#[test]
fn compilation_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let load = || {
        Manifest::load(&dir.path().join("manifest.json"))
            .unwrap()
            .into_parts(dir.path())
            .unwrap()
    };
    let source = "\
def encode(self, text: str) -> Tuple[List[int], List[int]]:
    a = self.tok.run(text)
    b = self.tok.run(text)
    return a, b
";
    let render = || {
        let (env, registry, options) = load();
        compile(source, &env, &registry, &options)
            .unwrap()
            .to_model("encode")
            .unwrap()
            .to_json()
    };
    let first = render();
    assert_eq!(first, render());
    // Two splices of the same artifact get distinct scopes.
    assert!(first.contains("run_0/pieces"));
    assert!(first.contains("run_1/pieces"));
}

#[test]
fn boundary_type_mismatch_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let (env, registry, options) = Manifest::load(&dir.path().join("manifest.json"))
        .unwrap()
        .into_parts(dir.path())
        .unwrap();
    let source = "\
def encode(self, n: int) -> List[int]:
    ids = self.tok.run(n)
    return ids
";
    let err = compile(source, &env, &registry, &options).unwrap_err();
    assert!(matches!(err, CompileError::TypeMismatch { .. }), "{err:?}");
}
