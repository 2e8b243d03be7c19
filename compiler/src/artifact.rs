// artifact.rs — Graph artifact data model and file I/O
//
// A serde rendition of the portable node/tensor/attribute interchange
// structure, encoded as JSON. Both compiled graphs and precompiled subgraphs
// embedded by black-box operators use this model.
//
// Preconditions: none.
// Postconditions: `save` either leaves a complete artifact at the destination
//   or leaves the destination untouched.
// Failure modes: `NotFound` / `MalformedArtifact` on load, `WriteFailure` on save.
// Side effects: file system reads and writes in `load` / `save`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::diag::CompileError;

// ── Element types ───────────────────────────────────────────────────────────

/// Tensor element type, named as in the interchange format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElemType {
    Float,
    Int32,
    Int64,
    String,
    Bool,
    Double,
}

impl ElemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ElemType::Float => "FLOAT",
            ElemType::Int32 => "INT32",
            ElemType::Int64 => "INT64",
            ElemType::String => "STRING",
            ElemType::Bool => "BOOL",
            ElemType::Double => "DOUBLE",
        }
    }
}

/// One tensor dimension: a fixed extent or a symbolic parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Value(i64),
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorType {
    pub elem_type: ElemType,
    #[serde(default)]
    pub shape: Vec<Dim>,
}

impl std::fmt::Display for TensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[", self.elem_type.as_str())?;
        for (i, dim) in self.shape.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match dim {
                Dim::Value(v) => write!(f, "{v}")?,
                Dim::Param(p) => write!(f, "{p}")?,
            }
        }
        write!(f, "]")
    }
}

// ── Graph structure ─────────────────────────────────────────────────────────

/// A named tensor declaration (graph input, output or intermediate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TensorType>,
}

/// A constant tensor (graph initializer or `Constant` attribute value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorProto {
    #[serde(default)]
    pub name: String,
    pub data_type: ElemType,
    #[serde(default)]
    pub dims: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub int32_data: Vec<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub int64_data: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub float_data: Vec<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub double_data: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub string_data: Vec<String>,
}

impl TensorProto {
    /// An empty tensor of the given type; fill one of the data vectors.
    pub fn new(name: impl Into<String>, data_type: ElemType, dims: Vec<i64>) -> Self {
        TensorProto {
            name: name.into(),
            data_type,
            dims,
            int32_data: Vec::new(),
            int64_data: Vec::new(),
            float_data: Vec::new(),
            double_data: Vec::new(),
            string_data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    I(i64),
    F(f64),
    S(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Strings(Vec<String>),
    T(TensorProto),
}

/// `{"name": "axis", "i": 0}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeProto {
    pub name: String,
    #[serde(flatten)]
    pub value: AttributeValue,
}

impl AttributeProto {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        AttributeProto {
            name: name.into(),
            value: AttributeValue::S(value.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProto {
    #[serde(default)]
    pub name: String,
    pub op_type: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub input: Vec<String>,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attribute: Vec<AttributeProto>,
}

impl NodeProto {
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attribute
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphProto {
    pub name: String,
    #[serde(default)]
    pub node: Vec<NodeProto>,
    #[serde(default)]
    pub input: Vec<ValueInfo>,
    #[serde(default)]
    pub output: Vec<ValueInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initializer: Vec<TensorProto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_info: Vec<ValueInfo>,
    /// Carried only so that unsupported content is detected, never produced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sparse_initializer: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quantization_annotation: Vec<serde_json::Value>,
}

impl GraphProto {
    pub fn new(name: impl Into<String>) -> Self {
        GraphProto {
            name: name.into(),
            node: Vec::new(),
            input: Vec::new(),
            output: Vec::new(),
            initializer: Vec::new(),
            value_info: Vec::new(),
            sparse_initializer: Vec::new(),
            quantization_annotation: Vec::new(),
        }
    }

    /// Declared type of `name` from inputs, outputs, value_info or initializers.
    pub fn tensor_type(&self, name: &str) -> Option<TensorType> {
        self.input
            .iter()
            .chain(&self.output)
            .chain(&self.value_info)
            .find(|v| v.name == name)
            .and_then(|v| v.ty.clone())
            .or_else(|| {
                self.initializer
                    .iter()
                    .find(|t| t.name == name)
                    .map(|t| TensorType {
                        elem_type: t.data_type,
                        shape: t.dims.iter().map(|d| Dim::Value(*d)).collect(),
                    })
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSetId {
    #[serde(default)]
    pub domain: String,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringStringEntry {
    pub key: String,
    pub value: String,
}

/// Top-level artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub ir_version: i64,
    #[serde(default)]
    pub producer_name: String,
    #[serde(default)]
    pub producer_version: String,
    #[serde(default)]
    pub opset_import: Vec<OperatorSetId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_props: Vec<StringStringEntry>,
    pub graph: GraphProto,
}

// ── File I/O ────────────────────────────────────────────────────────────────

impl Model {
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata_props
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// Decode an artifact from JSON text. `origin` names the source in errors.
    pub fn from_json(text: &str, origin: &Path) -> Result<Model, CompileError> {
        serde_json::from_str(text).map_err(|e| CompileError::MalformedArtifact {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn to_json(&self) -> String {
        // Serializing plain data structs with string keys cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Read an artifact from disk.
    pub fn load(path: &Path) -> Result<Model, CompileError> {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CompileError::NotFound {
                path: path.to_path_buf(),
            },
            _ => CompileError::MalformedArtifact {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        })?;
        let model = Model::from_json(&text, path)?;
        debug!(
            "loaded artifact {} (graph '{}', {} nodes)",
            path.display(),
            model.graph.name,
            model.graph.node.len()
        );
        Ok(model)
    }

    /// Write the artifact to `path`, all or nothing.
    ///
    /// Writes a sibling temporary file and renames it over the destination.
    /// On any failure the temporary is removed and the destination is untouched.
    pub fn save(&self, path: &Path) -> Result<(), CompileError> {
        let tmp = temp_sibling(path);
        trace!("writing {} via {}", path.display(), tmp.display());

        let result = fs::write(&tmp, self.to_json()).and_then(|()| fs::rename(&tmp, path));
        if let Err(source) = result {
            let _ = fs::remove_file(&tmp);
            return Err(CompileError::WriteFailure {
                path: path.to_path_buf(),
                source,
            });
        }

        debug!(
            "saved artifact {} ({} nodes)",
            path.display(),
            self.graph.node.len()
        );
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
}
