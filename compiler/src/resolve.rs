// resolve.rs — Symbol table and dotted-path resolution
//
// The environment is a statically typed symbol table built ahead of time:
// modules, classes, object instances and functions. Resolution walks a dotted
// path through it one segment at a time.
//
// Preconditions: the environment is fully populated before compilation.
// Postconditions: `resolve` returns the namespace reached by the whole path.
// Failure modes: `UnresolvedSymbol` naming the path, the failing segment and
//   the namespace searched; `NotCallable` when a call path ends on a non-function.
// Side effects: none.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::trace;

use crate::artifact::Model;
use crate::ast::TypeExpr;
use crate::diag::CompileError;
use crate::registry::CallableId;

// ── Symbol table ────────────────────────────────────────────────────────────

/// A precompiled graph wrapped by a black-box operator, with its interface.
#[derive(Debug, Clone, PartialEq)]
pub struct SubgraphBinding {
    pub model: Arc<Model>,
    /// Boundary input names, matched positionally to call arguments.
    pub inputs: Vec<String>,
    /// Boundary output names, matched positionally to assignment targets.
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub id: CallableId,
    pub returns: Option<TypeExpr>,
    pub subgraph: Option<Arc<SubgraphBinding>>,
}

impl FunctionDef {
    pub fn new(id: impl Into<String>) -> Self {
        FunctionDef {
            id: CallableId::new(id),
            returns: None,
            subgraph: None,
        }
    }

    pub fn with_returns(mut self, annotation: TypeExpr) -> Self {
        self.returns = Some(annotation);
        self
    }

    pub fn with_subgraph(mut self, binding: SubgraphBinding) -> Self {
        self.subgraph = Some(Arc::new(binding));
        self
    }
}

/// What a module exposes under one name.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    /// Re-exported module, by qualified name.
    Module(String),
    /// Class, by qualified name.
    Class(String),
    Function(FunctionDef),
    Object(ObjectDef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub members: BTreeMap<String, Member>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn with_member(mut self, name: impl Into<String>, member: Member) -> Self {
        self.members.insert(name.into(), member);
        self
    }

    /// Add a function whose identity is `<module>.<name>`.
    pub fn with_function(self, name: &str, build: impl FnOnce(FunctionDef) -> FunctionDef) -> Self {
        let def = build(FunctionDef::new(format!("{}.{}", self.name, name)));
        self.with_member(name, Member::Function(def))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    /// Qualified name, e.g. `tok.Tokenizer`.
    pub name: String,
    /// Qualified name of the defining module.
    pub module: String,
    pub methods: BTreeMap<String, FunctionDef>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        ClassDef {
            name: name.into(),
            module: module.into(),
            methods: BTreeMap::new(),
        }
    }

    /// Add a method whose identity is `<class>.<name>`.
    pub fn with_method(mut self, name: &str, build: impl FnOnce(FunctionDef) -> FunctionDef) -> Self {
        let def = build(FunctionDef::new(format!("{}.{}", self.name, name)));
        self.methods.insert(name.to_string(), def);
        self
    }
}

/// An object instance: its runtime class and attribute values.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDef {
    pub class: String,
    pub attributes: BTreeMap<String, ObjectDef>,
}

impl ObjectDef {
    pub fn new(class: impl Into<String>) -> Self {
        ObjectDef {
            class: class.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: ObjectDef) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// The whole symbol table; `receiver` is the object whose method is compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    modules: BTreeMap<String, Module>,
    classes: BTreeMap<String, ClassDef>,
    receiver: ObjectDef,
}

impl Environment {
    pub fn new(receiver: ObjectDef) -> Self {
        Environment {
            modules: BTreeMap::new(),
            classes: BTreeMap::new(),
            receiver,
        }
    }

    pub fn add_module(&mut self, module: Module) {
        self.modules.insert(module.name.clone(), module);
    }

    pub fn add_class(&mut self, class: ClassDef) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn with_module(mut self, module: Module) -> Self {
        self.add_module(module);
        self
    }

    pub fn with_class(mut self, class: ClassDef) -> Self {
        self.add_class(class);
        self
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    pub fn receiver(&self) -> &ObjectDef {
        &self.receiver
    }
}

// ── Namespaces ──────────────────────────────────────────────────────────────

/// A point in the symbol table that a path segment can be looked up in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Namespace<'e> {
    Module(&'e Module),
    Class(&'e ClassDef),
    Object(&'e ObjectDef),
    Function(&'e FunctionDef),
}

impl<'e> Namespace<'e> {
    pub fn kind(&self) -> &'static str {
        match self {
            Namespace::Module(_) => "module",
            Namespace::Class(_) => "class",
            Namespace::Object(_) => "object",
            Namespace::Function(_) => "function",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Namespace::Module(m) => format!("module '{}'", m.name),
            Namespace::Class(c) => format!("class '{}'", c.name),
            Namespace::Object(o) => format!("instance of '{}'", o.class),
            Namespace::Function(f) => format!("function '{}'", f.id),
        }
    }

    /// Member exposed directly under `name`, if any.
    ///
    /// Objects expose their attributes, then their class's methods.
    fn member(&self, env: &'e Environment, name: &str) -> Option<Namespace<'e>> {
        match *self {
            Namespace::Module(m) => match m.members.get(name)? {
                Member::Module(q) => env.module(q).map(Namespace::Module),
                Member::Class(q) => env.class(q).map(Namespace::Class),
                Member::Function(f) => Some(Namespace::Function(f)),
                Member::Object(o) => Some(Namespace::Object(o)),
            },
            Namespace::Class(c) => c.methods.get(name).map(Namespace::Function),
            Namespace::Object(o) => o.attributes.get(name).map(Namespace::Object).or_else(|| {
                env.class(&o.class)?
                    .methods
                    .get(name)
                    .map(Namespace::Function)
            }),
            Namespace::Function(_) => None,
        }
    }

    /// Importable submodule `<module>.<name>` known to the table.
    fn submodule(&self, env: &'e Environment, name: &str) -> Option<Namespace<'e>> {
        match self {
            Namespace::Module(m) => env
                .module(&format!("{}.{}", m.name, name))
                .map(Namespace::Module),
            _ => None,
        }
    }
}

// ── Resolution ──────────────────────────────────────────────────────────────

/// Resolve `path` starting at `root`. An empty path yields `root`.
pub fn resolve<'e>(
    env: &'e Environment,
    root: Namespace<'e>,
    path: &[String],
) -> Result<Namespace<'e>, CompileError> {
    let mut current = root;
    for segment in path {
        let next = current
            .member(env, segment)
            .or_else(|| current.submodule(env, segment));
        match next {
            Some(ns) => {
                trace!("resolve {}: '{}' -> {}", path.join("."), segment, ns.describe());
                current = ns;
            }
            None => {
                return Err(CompileError::UnresolvedSymbol {
                    path: path.join("."),
                    segment: segment.clone(),
                    namespace: current.describe(),
                });
            }
        }
    }
    Ok(current)
}

fn expect_function<'e>(ns: Namespace<'e>, path: String) -> Result<&'e FunctionDef, CompileError> {
    match ns {
        Namespace::Function(f) => Ok(f),
        other => Err(CompileError::NotCallable {
            path,
            kind: other.kind(),
        }),
    }
}

/// Instance reached by following attributes from the receiver.
pub fn resolve_receiver<'e>(
    env: &'e Environment,
    receiver_path: &[String],
) -> Result<&'e ObjectDef, CompileError> {
    let mut object = env.receiver();
    for segment in receiver_path {
        object = object
            .attributes
            .get(segment)
            .ok_or_else(|| CompileError::UnresolvedSymbol {
                path: receiver_path.join("."),
                segment: segment.clone(),
                namespace: format!("instance of '{}'", object.class),
            })?;
    }
    Ok(object)
}

/// Runtime class of an instance.
pub fn class_of<'e>(env: &'e Environment, object: &ObjectDef) -> Result<&'e ClassDef, CompileError> {
    env.class(&object.class)
        .ok_or_else(|| CompileError::UnresolvedSymbol {
            path: object.class.clone(),
            segment: object.class.clone(),
            namespace: "class table".to_string(),
        })
}

/// Method `method` on the instance at `receiver_path`, looked up against the
/// instance's runtime class.
pub fn resolve_method<'e>(
    env: &'e Environment,
    receiver_path: &[String],
    method: &str,
) -> Result<&'e FunctionDef, CompileError> {
    let object = resolve_receiver(env, receiver_path)?;
    let class = class_of(env, object)?;
    let path = vec![method.to_string()];
    let ns = resolve(env, Namespace::Class(class), &path)?;
    expect_function(ns, format!("{}.{}", class.name, method))
}

/// Free function `path`, resolved from the module defining the receiver's class.
pub fn resolve_free_function<'e>(
    env: &'e Environment,
    path: &[String],
) -> Result<&'e FunctionDef, CompileError> {
    let class = class_of(env, env.receiver())?;
    let module = env
        .module(&class.module)
        .ok_or_else(|| CompileError::UnresolvedSymbol {
            path: class.module.clone(),
            segment: class.module.clone(),
            namespace: "module table".to_string(),
        })?;
    let ns = resolve(env, Namespace::Module(module), path)?;
    expect_function(ns, path.join("."))
}
