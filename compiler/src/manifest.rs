// manifest.rs — Out-of-band environment description
//
// A JSON manifest names the modules, classes and receiver instance visible to
// the compiled function, the operator registrations, and compile options.
// `into_parts` turns it into the explicit symbol table, registry and options
// the passes consume.
//
// Preconditions: subgraph artifact paths are relative to `base_dir`.
// Postconditions: every subgraph artifact is loaded exactly once.
// Failure modes: NotFound / MalformedArtifact for the manifest or a subgraph
//   artifact, Syntax / UnsupportedType for annotations.
// Side effects: reads the manifest and referenced artifacts.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use serde::Deserialize;

use crate::artifact::Model;
use crate::diag::CompileError;
use crate::pipeline::CompileOptions;
use crate::registry::{CallableId, OperatorRegistry};
use crate::resolve::{ClassDef, Environment, FunctionDef, Member, Module, ObjectDef, SubgraphBinding};
use crate::types::{annotation_to_type, parse_type, return_type};

// ── Schema ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Module name → member name → member.
    #[serde(default)]
    pub modules: BTreeMap<String, BTreeMap<String, MemberEntry>>,
    /// Qualified class name → class.
    #[serde(default)]
    pub classes: BTreeMap<String, ClassEntry>,
    pub receiver: ObjectEntry,
    #[serde(default)]
    pub operators: Vec<OperatorEntry>,
    #[serde(default)]
    pub options: CompileOptions,
}

/// `{"module": "text"}`, `{"class": "text.Tokenizer"}`, `{"function": {...}}`,
/// `{"object": {...}}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberEntry {
    Module(String),
    Class(String),
    Function(FunctionEntry),
    Object(ObjectEntry),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassEntry {
    pub module: String,
    #[serde(default)]
    pub methods: BTreeMap<String, FunctionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectEntry {
    pub class: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, ObjectEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionEntry {
    /// Overrides the default `<owner>.<name>` identity.
    #[serde(default)]
    pub id: Option<String>,
    /// Return annotation, e.g. `"Tuple[str, List[int]]"`.
    #[serde(default)]
    pub returns: Option<String>,
    #[serde(default)]
    pub subgraph: Option<SubgraphEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubgraphEntry {
    pub model: PathBuf,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorEntry {
    pub callable: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub returns: String,
}

// ── Loading ─────────────────────────────────────────────────────────────────

impl Manifest {
    pub fn load(path: &Path) -> Result<Manifest, CompileError> {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CompileError::NotFound {
                path: path.to_path_buf(),
            },
            _ => CompileError::MalformedArtifact {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        })?;
        Self::parse(&text, path)
    }

    pub fn from_json(text: &str) -> Result<Manifest, CompileError> {
        Self::parse(text, Path::new("<manifest>"))
    }

    fn parse(text: &str, origin: &Path) -> Result<Manifest, CompileError> {
        serde_json::from_str(text).map_err(|e| CompileError::MalformedArtifact {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Build the symbol table, registry and options.
    pub fn into_parts(
        self,
        base_dir: &Path,
    ) -> Result<(Environment, OperatorRegistry, CompileOptions), CompileError> {
        let mut loader = ArtifactCache {
            base_dir,
            loaded: HashMap::new(),
        };

        let mut env = Environment::new(object(&self.receiver));
        for (name, members) in &self.modules {
            let mut module = Module::new(name.clone());
            for (member_name, entry) in members {
                let member = match entry {
                    MemberEntry::Module(q) => Member::Module(q.clone()),
                    MemberEntry::Class(q) => Member::Class(q.clone()),
                    MemberEntry::Object(o) => Member::Object(object(o)),
                    MemberEntry::Function(f) => {
                        Member::Function(function(name, member_name, f, &mut loader)?)
                    }
                };
                module = module.with_member(member_name.clone(), member);
            }
            env.add_module(module);
        }
        for (name, entry) in &self.classes {
            let mut class = ClassDef::new(name.clone(), entry.module.clone());
            for (method, f) in &entry.methods {
                class
                    .methods
                    .insert(method.clone(), function(name, method, f, &mut loader)?);
            }
            env.add_class(class);
        }

        let mut registry = OperatorRegistry::new();
        for op in &self.operators {
            let args = op
                .args
                .iter()
                .map(|a| annotation_to_type(&parse_type(a)?))
                .collect::<Result<Vec<_>, _>>()?;
            let ret = return_type(&parse_type(&op.returns)?)?;
            registry.register(CallableId::new(op.callable.clone()), args, ret);
        }

        info!(
            "manifest: {} modules, {} classes, {} operators, {} subgraph artifacts",
            self.modules.len(),
            self.classes.len(),
            registry.len(),
            loader.loaded.len()
        );
        Ok((env, registry, self.options))
    }
}

fn object(entry: &ObjectEntry) -> ObjectDef {
    entry
        .attributes
        .iter()
        .fold(ObjectDef::new(entry.class.clone()), |obj, (name, attr)| {
            obj.with_attribute(name.clone(), object(attr))
        })
}

fn function(
    owner: &str,
    name: &str,
    entry: &FunctionEntry,
    loader: &mut ArtifactCache<'_>,
) -> Result<FunctionDef, CompileError> {
    let id = entry
        .id
        .clone()
        .unwrap_or_else(|| format!("{}.{}", owner, name));
    let mut def = FunctionDef::new(id);
    if let Some(returns) = &entry.returns {
        def = def.with_returns(parse_type(returns)?);
    }
    if let Some(sub) = &entry.subgraph {
        def = def.with_subgraph(SubgraphBinding {
            model: loader.load(&sub.model)?,
            inputs: sub.inputs.clone(),
            outputs: sub.outputs.clone(),
        });
    }
    Ok(def)
}

/// Loads each referenced artifact once, relative to the manifest directory.
struct ArtifactCache<'a> {
    base_dir: &'a Path,
    loaded: HashMap<PathBuf, Arc<Model>>,
}

impl ArtifactCache<'_> {
    fn load(&mut self, relative: &Path) -> Result<Arc<Model>, CompileError> {
        let path = self.base_dir.join(relative);
        if let Some(model) = self.loaded.get(&path) {
            return Ok(Arc::clone(model));
        }
        let model = Arc::new(Model::load(&path)?);
        debug!("subgraph artifact {} loaded", path.display());
        self.loaded.insert(path, Arc::clone(&model));
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::GraphProto;
    use crate::types::{ReturnType, ScalarType, Type};

    const MANIFEST: &str = r#"{
        "modules": {
            "app": {
                "text": {"module": "app.text"},
                "normalize": {"function": {"returns": "str"}}
            },
            "app.text": {}
        },
        "classes": {
            "app.Model": {"module": "app"},
            "app.Tokenizer": {
                "module": "app.text",
                "methods": {"run": {"returns": "Tuple[List[str], ...]"}}
            }
        },
        "receiver": {
            "class": "app.Model",
            "attributes": {"tok": {"class": "app.Tokenizer"}}
        },
        "operators": [
            {"callable": "native.match", "args": ["str"], "returns": "List[int]"}
        ],
        "options": {"opset_version": 17}
    }"#;

    #[test]
    fn builds_environment_registry_and_options() {
        let (env, registry, options) = Manifest::from_json(MANIFEST)
            .unwrap()
            .into_parts(Path::new("."))
            .unwrap();

        assert_eq!(env.receiver().attributes["tok"].class, "app.Tokenizer");
        assert_eq!(
            env.class("app.Tokenizer").unwrap().methods["run"].id.as_str(),
            "app.Tokenizer.run"
        );
        assert!(matches!(
            env.module("app").unwrap().members.get("normalize"),
            Some(Member::Function(f)) if f.id.as_str() == "app.normalize"
        ));

        let sig = registry.get(&CallableId::new("native.match")).unwrap();
        assert_eq!(sig.args, vec![Type::STR]);
        assert_eq!(sig.ret, ReturnType::Single(Type::List(ScalarType::Int)));

        assert_eq!(options.opset_version, 17);
        assert_eq!(options.receiver_name, "self");
    }

    #[test]
    fn unknown_fields_rejected() {
        let err = Manifest::from_json(r#"{"receiver": {"class": "a.A"}, "extra": 1}"#).unwrap_err();
        assert!(matches!(err, CompileError::MalformedArtifact { .. }));
    }

    #[test]
    fn bad_operator_annotation() {
        let manifest = Manifest::from_json(
            r#"{"receiver": {"class": "a.A"}, "operators": [{"callable": "f", "returns": "Dict[str, int]"}]}"#,
        )
        .unwrap();
        let err = manifest.into_parts(Path::new(".")).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedType { .. }));
    }

    #[test]
    fn subgraph_artifacts_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let model = Model {
            ir_version: 8,
            producer_name: "p".into(),
            producer_version: "1".into(),
            opset_import: Vec::new(),
            metadata_props: Vec::new(),
            graph: GraphProto::new("sub"),
        };
        model.save(&dir.path().join("sub.json")).unwrap();

        let manifest = Manifest::from_json(
            r#"{
                "classes": {"a.A": {"module": "a", "methods": {
                    "f": {"returns": "str", "subgraph": {"model": "sub.json", "inputs": ["x"], "outputs": ["y"]}},
                    "g": {"returns": "str", "subgraph": {"model": "sub.json", "inputs": ["x"], "outputs": ["y"]}}
                }}},
                "receiver": {"class": "a.A"}
            }"#,
        )
        .unwrap();
        let (env, _, _) = manifest.into_parts(dir.path()).unwrap();
        let class = env.class("a.A").unwrap();
        let f = class.methods["f"].subgraph.as_ref().unwrap();
        let g = class.methods["g"].subgraph.as_ref().unwrap();
        assert!(Arc::ptr_eq(&f.model, &g.model));
        assert_eq!(f.inputs, vec!["x"]);
    }

    #[test]
    fn missing_subgraph_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::from_json(
            r#"{"modules": {"a": {"f": {"function": {"subgraph": {"model": "nope.json", "inputs": [], "outputs": []}}}}}, "receiver": {"class": "a.A"}}"#,
        )
        .unwrap();
        let err = manifest.into_parts(dir.path()).unwrap_err();
        assert!(matches!(err, CompileError::NotFound { .. }));
    }

    #[test]
    fn missing_manifest_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::load(&dir.path().join("manifest.json")).unwrap_err();
        assert!(matches!(err, CompileError::NotFound { .. }));
    }
}
