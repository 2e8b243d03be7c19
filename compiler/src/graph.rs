// graph.rs — Dataflow graph construction
//
// Second forward pass over the statement sequence. Uses the type map and call
// sites from type inference (never re-resolving) to emit typed nodes, binding
// each node port to a graph variable.
//
// Preconditions: `typed` was produced by `type_infer` for the same function.
// Postconditions: node order is construction order, which is topological
//   because every node input is declared before the node is added; a name is
//   declared at most once across inputs, outputs and initializers.
// Failure modes: Redefinition, UndeclaredOutput, TypeMismatch, ArityMismatch,
//   UnsupportedExpression, UnboundSubgraphInputs, and extraction errors from
//   spliced subgraphs.
// Side effects: none.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::{debug, trace};

use crate::artifact::{
    AttributeProto, AttributeValue, GraphProto, Model, NodeProto, OperatorSetId,
    StringStringEntry, TensorProto, TensorType, ValueInfo,
};
use crate::ast::*;
use crate::call_site::CallTarget;
use crate::diag::CompileError;
use crate::pipeline::CompileOptions;
use crate::registry::{CallableId, OperatorRegistry};
use crate::resolve::{Environment, SubgraphBinding};
use crate::subgraph;
use crate::type_infer::TypedFunction;
use crate::types::{literal_tensor, literal_type, Type};

// ── Graph ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Input,
    Output,
    Initializer,
}

/// A graph under construction.
///
/// Outputs are declared only by node creation. Inputs are declared on first
/// use by a node. Names are unique across both maps and initializers.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    inputs: Vec<ValueInfo>,
    outputs: Vec<ValueInfo>,
    roles: HashMap<String, Role>,
    nodes: Vec<NodeProto>,
    initializers: Vec<TensorProto>,
    returned: Vec<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declared inputs in first-seen order.
    pub fn inputs(&self) -> &[ValueInfo] {
        &self.inputs
    }

    /// Every node-produced variable in declaration order.
    pub fn outputs(&self) -> &[ValueInfo] {
        &self.outputs
    }

    pub fn nodes(&self) -> &[NodeProto] {
        &self.nodes
    }

    pub fn initializers(&self) -> &[TensorProto] {
        &self.initializers
    }

    /// Names recorded by the return statement.
    pub fn returned(&self) -> &[String] {
        &self.returned
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    fn get_or_create_input(&mut self, name: &str, ty: Option<TensorType>) {
        if self.roles.contains_key(name) {
            return;
        }
        trace!("declare input {}", name);
        self.roles.insert(name.to_string(), Role::Input);
        self.inputs.push(ValueInfo {
            name: name.to_string(),
            ty,
        });
    }

    fn create_output(&mut self, name: &str, ty: Option<TensorType>) -> Result<(), CompileError> {
        if self.roles.contains_key(name) {
            return Err(CompileError::Redefinition {
                name: name.to_string(),
            });
        }
        self.roles.insert(name.to_string(), Role::Output);
        self.outputs.push(ValueInfo {
            name: name.to_string(),
            ty,
        });
        Ok(())
    }

    pub fn add_initializer(&mut self, tensor: TensorProto) -> Result<(), CompileError> {
        if self.roles.contains_key(&tensor.name) {
            return Err(CompileError::Redefinition { name: tensor.name });
        }
        self.roles.insert(tensor.name.clone(), Role::Initializer);
        self.initializers.push(tensor);
        Ok(())
    }

    /// Append a node. Undeclared inputs become graph inputs; every non-empty
    /// output must be a fresh name. `type_of` supplies declaration types.
    pub fn create_node<F>(&mut self, node: NodeProto, type_of: F) -> Result<(), CompileError>
    where
        F: Fn(&str) -> Option<TensorType>,
    {
        for name in node.input.iter().filter(|n| !n.is_empty()) {
            self.get_or_create_input(name, type_of(name));
        }
        for name in node.output.iter().filter(|n| !n.is_empty()) {
            self.create_output(name, type_of(name))?;
        }
        trace!(
            "node {} {:?} -> {:?}",
            node.op_type,
            node.input,
            node.output
        );
        self.nodes.push(node);
        Ok(())
    }

    pub fn set_returned(&mut self, names: Vec<String>) {
        self.returned = names;
    }

    /// Serialize into an artifact.
    ///
    /// External outputs are the returned names, in order. Other node-produced
    /// variables are listed as intermediate value descriptors.
    pub fn to_model(
        &self,
        name: &str,
        options: &CompileOptions,
        metadata: Vec<StringStringEntry>,
    ) -> Result<Model, CompileError> {
        let mut output = Vec::with_capacity(self.returned.len());
        for returned in &self.returned {
            let decl = self
                .outputs
                .iter()
                .find(|v| &v.name == returned)
                .ok_or_else(|| CompileError::UndeclaredOutput {
                    name: returned.clone(),
                })?;
            output.push(decl.clone());
        }

        let mut graph = GraphProto::new(name);
        graph.node = self.nodes.clone();
        graph.input = self.inputs.clone();
        graph.output = output;
        graph.initializer = self.initializers.clone();
        graph.value_info = self
            .outputs
            .iter()
            .filter(|v| v.ty.is_some() && !self.returned.contains(&v.name))
            .cloned()
            .collect();

        let mut opset_import = vec![OperatorSetId {
            domain: String::new(),
            version: options.opset_version,
        }];
        if self.nodes.iter().any(|n| n.domain == options.custom_domain) {
            opset_import.push(OperatorSetId {
                domain: options.custom_domain.clone(),
                version: 1,
            });
        }

        Ok(Model {
            ir_version: options.ir_version,
            producer_name: options.producer_name.clone(),
            producer_version: options.producer_version.clone(),
            opset_import,
            metadata_props: metadata,
            graph,
        })
    }
}

// ── Graph builder ───────────────────────────────────────────────────────────

/// Build the dataflow graph of one typed function.
pub fn build_graph(
    function: &Function,
    typed: &TypedFunction,
    env: &Environment,
    registry: &OperatorRegistry,
    options: &CompileOptions,
) -> Result<Graph, CompileError> {
    let mut builder = GraphBuilder {
        typed,
        env,
        registry,
        options,
        graph: Graph::new(),
        temp_types: HashMap::new(),
        temps: 0,
        splices: 0,
    };
    for stmt in &function.body {
        builder.lower_stmt(stmt)?;
    }
    debug!(
        "build_graph '{}': {} nodes, {} inputs, {} outputs",
        function.name.name,
        builder.graph.nodes.len(),
        builder.graph.inputs.len(),
        builder.graph.returned.len()
    );
    Ok(builder.graph)
}

struct GraphBuilder<'a> {
    typed: &'a TypedFunction,
    env: &'a Environment,
    registry: &'a OperatorRegistry,
    options: &'a CompileOptions,
    graph: Graph,
    /// Types of generated temporaries (not in the inferred type map).
    temp_types: HashMap<String, Type>,
    temps: usize,
    splices: usize,
}

impl<'a> GraphBuilder<'a> {
    fn type_of(&self, name: &str) -> Option<Type> {
        self.typed
            .type_of(name)
            .or_else(|| self.temp_types.get(name).copied())
    }

    fn is_wildcard(&self, name: &str) -> bool {
        name == self.options.wildcard
    }

    /// `#` opens a comment in source and `/` marks splice scopes, so
    /// `root#kind<N>` cannot name a user variable or a spliced tensor.
    fn temp(&mut self, root: &str, kind: &str) -> String {
        let name = format!("{}#{}{}", root, kind, self.temps);
        self.temps += 1;
        name
    }

    /// Type new names that the inferred map does not know.
    fn note_temp(&mut self, name: &str, ty: Type) {
        if self.typed.type_of(name).is_none() && !self.is_wildcard(name) {
            self.temp_types.insert(name.to_string(), ty);
        }
    }

    fn emit(
        &mut self,
        op_type: &str,
        domain: &str,
        input: Vec<String>,
        output: Vec<String>,
        attribute: Vec<AttributeProto>,
    ) -> Result<(), CompileError> {
        let node = NodeProto {
            name: format!("{}_{}", op_type, self.graph.nodes.len()),
            op_type: op_type.to_string(),
            domain: domain.to_string(),
            input,
            output,
            attribute,
        };
        let typed = self.typed;
        let temps = &self.temp_types;
        self.graph.create_node(node, |name| {
            typed
                .type_of(name)
                .or_else(|| temps.get(name).copied())
                .map(Type::tensor_type)
        })
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::AnnAssign(assign) => match &assign.value {
                Some(value) => self.lower_assign(&[assign.target.name.as_str()], value),
                None => Ok(()),
            },
            StmtKind::Assign(assign) => {
                let names: Vec<&str> = assign
                    .target
                    .names()
                    .into_iter()
                    .map(|id| id.name.as_str())
                    .collect();
                self.lower_assign(&names, &assign.value)
            }
            StmtKind::Return(_) => {
                self.graph.set_returned(self.typed.outputs.clone());
                Ok(())
            }
            StmtKind::Expr(_) | StmtKind::Pass => Ok(()),
        }
    }

    fn lower_assign(&mut self, targets: &[&str], value: &Expr) -> Result<(), CompileError> {
        match (&value.kind, targets) {
            (ExprKind::Call(call), _) => self.lower_call(targets, call, value.span),
            (ExprKind::Tuple(items), _) if items.len() == targets.len() => {
                for (target, item) in targets.iter().zip(items) {
                    self.lower_value(target, item)?;
                }
                Ok(())
            }
            (ExprKind::Tuple(items), _) => Err(CompileError::ArityMismatch {
                context: format!("assignment to {}", targets.join(", ")),
                expected: targets.len(),
                found: items.len(),
                span: Some(value.span),
            }),
            (_, [target]) => self.lower_value(target, value),
            _ => Err(CompileError::ArityMismatch {
                context: format!("assignment to {}", targets.join(", ")),
                expected: targets.len(),
                found: 1,
                span: Some(value.span),
            }),
        }
    }

    /// Lower one value into `target`.
    fn lower_value(&mut self, target: &str, expr: &Expr) -> Result<(), CompileError> {
        if let ExprKind::Call(call) = &expr.kind {
            return self.lower_call(&[target], call, expr.span);
        }
        if self.is_wildcard(target) {
            return Ok(());
        }
        match &expr.kind {
            ExprKind::Name(source) => self.emit(
                "Identity",
                "",
                vec![source.clone()],
                vec![target.to_string()],
                Vec::new(),
            ),
            ExprKind::Literal(lit) => self.lower_constant(target, lit, expr.span),
            ExprKind::Add(left, right) => self
                .lower_add(target, target, left, right, expr.span)
                .map(|_| ()),
            _ => Err(unsupported(expr)),
        }
    }

    fn lower_constant(&mut self, out: &str, lit: &Literal, span: Span) -> Result<(), CompileError> {
        let lit_ty = literal_type(lit);
        match self.typed.type_of(out) {
            Some(ty) if ty != lit_ty => {
                return Err(CompileError::TypeMismatch {
                    context: format!("constant assigned to '{}'", out),
                    left: ty.to_string(),
                    right: lit_ty.to_string(),
                    span: Some(span),
                })
            }
            Some(_) => {}
            None => self.note_temp(out, lit_ty),
        }
        self.emit(
            "Constant",
            "",
            Vec::new(),
            vec![out.to_string()],
            vec![AttributeProto {
                name: "value".into(),
                value: AttributeValue::T(literal_tensor(out, lit)),
            }],
        )
    }

    /// `out = left + right`; nested operands go through temporaries named
    /// after the statement target `root`.
    fn lower_add(
        &mut self,
        root: &str,
        out: &str,
        left: &Expr,
        right: &Expr,
        span: Span,
    ) -> Result<Type, CompileError> {
        let (l, lt) = self.operand(root, left)?;
        let (r, rt) = self.operand(root, right)?;
        if lt != rt {
            return Err(CompileError::TypeMismatch {
                context: format!("addition into '{}'", out),
                left: lt.to_string(),
                right: rt.to_string(),
                span: Some(span),
            });
        }
        self.note_temp(out, lt);
        self.emit("Add", "", vec![l, r], vec![out.to_string()], Vec::new())?;
        Ok(lt)
    }

    fn operand(&mut self, root: &str, expr: &Expr) -> Result<(String, Type), CompileError> {
        match &expr.kind {
            ExprKind::Name(name) => {
                let ty = self
                    .type_of(name)
                    .ok_or_else(|| CompileError::UnboundVariable {
                        name: name.clone(),
                        span: expr.span,
                    })?;
                Ok((name.clone(), ty))
            }
            ExprKind::Literal(lit) => {
                let temp = self.temp(root, "const");
                self.lower_constant(&temp, lit, expr.span)?;
                Ok((temp, literal_type(lit)))
            }
            ExprKind::Add(left, right) => {
                let temp = self.temp(root, "add");
                let ty = self.lower_add(root, &temp, left, right, expr.span)?;
                Ok((temp, ty))
            }
            ExprKind::Call(call) => {
                let temp = self.temp(root, "call");
                self.lower_call(&[temp.as_str()], call, expr.span)?;
                let ty = self.type_of(&temp).ok_or_else(|| CompileError::ArityMismatch {
                    context: format!("value of call to '{}'", call.path_segments().join(".")),
                    expected: 1,
                    found: 0,
                    span: Some(expr.span),
                })?;
                Ok((temp, ty))
            }
            _ => Err(unsupported(expr)),
        }
    }

    // ── Calls ───────────────────────────────────────────────────────────

    fn lower_call(&mut self, targets: &[&str], call: &Call, span: Span) -> Result<(), CompileError> {
        let typed = self.typed;
        let site = typed
            .call_sites
            .get(&span)
            .ok_or_else(|| CompileError::UnsupportedExpression {
                construct: format!(
                    "call to '{}' not seen by type inference",
                    call.path_segments().join(".")
                ),
                span,
            })?;
        let callable = site.resolved_callable(self.env)?;
        let returns = site.return_types(self.env, self.registry)?;
        if returns.len() != targets.len() {
            return Err(CompileError::ArityMismatch {
                context: format!("results of '{}'", site.qualname()),
                expected: returns.len(),
                found: targets.len(),
                span: Some(span),
            });
        }

        let args = call
            .args
            .iter()
            .map(|arg| match &arg.kind {
                ExprKind::Name(name) => Ok(name.clone()),
                _ => Err(CompileError::UnsupportedExpression {
                    construct: "call argument other than a name".into(),
                    span: arg.span,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (target, ty) in targets.iter().zip(returns) {
            self.note_temp(target, *ty);
        }

        if let Some(binding) = &callable.subgraph {
            return self.splice(&callable.id, binding, &args, targets, span);
        }

        let mut attribute = vec![AttributeProto::string("callable", callable.id.as_str())];
        if let CallTarget::Method { receiver_path, .. } = site.target() {
            let receiver = std::iter::once(self.options.receiver_name.as_str())
                .chain(receiver_path.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(".");
            attribute.push(AttributeProto::string("receiver", receiver));
        }
        let outputs = targets
            .iter()
            .map(|t| {
                if self.is_wildcard(t) {
                    String::new()
                } else {
                    t.to_string()
                }
            })
            .collect();
        let domain = self.options.custom_domain.clone();
        self.emit(callable.id.name(), &domain, args, outputs, attribute)
    }

    /// Inline the closure of a precompiled graph between its declared
    /// boundary. Arguments bind boundary inputs and targets bind boundary
    /// outputs, both positionally; every other tensor and node name is
    /// prefixed with a per-splice scope.
    fn splice(
        &mut self,
        callable: &CallableId,
        binding: &SubgraphBinding,
        args: &[String],
        targets: &[&str],
        span: Span,
    ) -> Result<(), CompileError> {
        if args.len() != binding.inputs.len() {
            return Err(CompileError::ArityMismatch {
                context: format!("arguments of subgraph '{}'", callable),
                expected: binding.inputs.len(),
                found: args.len(),
                span: Some(span),
            });
        }
        if targets.len() != binding.outputs.len() {
            return Err(CompileError::ArityMismatch {
                context: format!("results of subgraph '{}'", callable),
                expected: binding.outputs.len(),
                found: targets.len(),
                span: Some(span),
            });
        }

        let inner = &binding.model.graph;
        let extracted = subgraph::extract(inner, &binding.inputs, &binding.outputs)?;
        check_closed(inner, &extracted, &binding.inputs)?;
        let scope = format!("{}_{}", callable.name(), self.splices);
        self.splices += 1;

        let mut rename: HashMap<&str, String> = HashMap::new();
        for (boundary, arg) in binding.inputs.iter().zip(args) {
            self.check_boundary(callable, inner, boundary, arg, span)?;
            rename.insert(boundary.as_str(), arg.clone());
        }
        for (boundary, target) in binding.outputs.iter().zip(targets) {
            if self.is_wildcard(target) {
                continue;
            }
            self.check_boundary(callable, inner, boundary, target, span)?;
            rename.insert(boundary.as_str(), target.to_string());
        }
        let map = |name: &str| -> String {
            if name.is_empty() {
                return String::new();
            }
            rename
                .get(name)
                .cloned()
                .unwrap_or_else(|| format!("{}/{}", scope, name))
        };

        let mut inner_types: HashMap<String, TensorType> = HashMap::new();
        for name in extracted
            .nodes
            .iter()
            .flat_map(|n| n.input.iter().chain(&n.output))
        {
            if let Some(ty) = inner.tensor_type(name) {
                inner_types.insert(map(name), ty);
            }
        }

        for mut tensor in extracted.initializers {
            tensor.name = map(&tensor.name);
            self.graph.add_initializer(tensor)?;
        }

        let node_count = extracted.nodes.len();
        for mut node in extracted.nodes {
            let local = if node.name.is_empty() {
                node.op_type.clone()
            } else {
                node.name.clone()
            };
            node.name = format!("{}/{}", scope, local);
            node.input = node.input.iter().map(|n| map(n)).collect();
            node.output = node.output.iter().map(|n| map(n)).collect();

            let typed = self.typed;
            let temps = &self.temp_types;
            self.graph.create_node(node, |name| {
                typed
                    .type_of(name)
                    .or_else(|| temps.get(name).copied())
                    .map(Type::tensor_type)
                    .or_else(|| inner_types.get(name).cloned())
            })?;
        }

        debug!(
            "spliced subgraph '{}' from {} as '{}' ({} nodes)",
            inner.name, callable, scope, node_count
        );
        Ok(())
    }

    /// The variable bound to a boundary tensor must have its element type.
    fn check_boundary(
        &self,
        callable: &CallableId,
        inner: &GraphProto,
        boundary: &str,
        variable: &str,
        span: Span,
    ) -> Result<(), CompileError> {
        let actual = self
            .type_of(variable)
            .ok_or_else(|| CompileError::UnboundVariable {
                name: variable.to_string(),
                span,
            })?;
        match inner.tensor_type(boundary) {
            Some(expected) if expected.elem_type != actual.elem_type() => {
                Err(CompileError::TypeMismatch {
                    context: format!("subgraph '{}' boundary '{}'", callable, boundary),
                    left: expected.elem_type.as_str().to_string(),
                    right: format!("{} ({})", actual, actual.elem_type().as_str()),
                    span: Some(span),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Every tensor the extracted nodes read must come from the binding inputs,
/// an extracted initializer or another extracted node. Anything else would
/// surface as a new, unrequested input of the outer graph.
fn check_closed(
    inner: &GraphProto,
    extracted: &subgraph::Extracted,
    inputs: &[String],
) -> Result<(), CompileError> {
    let bound: HashSet<&str> = inputs
        .iter()
        .map(String::as_str)
        .chain(extracted.initializers.iter().map(|t| t.name.as_str()))
        .chain(
            extracted
                .nodes
                .iter()
                .flat_map(|n| n.output.iter().map(String::as_str)),
        )
        .collect();
    let missing: BTreeSet<&str> = extracted
        .nodes
        .iter()
        .flat_map(|n| n.input.iter().map(String::as_str))
        .filter(|name| !name.is_empty() && !bound.contains(name))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(CompileError::UnboundSubgraphInputs {
        graph: inner.name.clone(),
        names: missing.into_iter().map(String::from).collect(),
    })
}

fn unsupported(expr: &Expr) -> CompileError {
    let construct = match &expr.kind {
        ExprKind::Attribute(_) => "attribute read",
        ExprKind::Tuple(_) => "nested tuple",
        _ => "expression",
    };
    CompileError::UnsupportedExpression {
        construct: construct.into(),
        span: expr.span,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::artifact::{Dim, ElemType};
    use crate::parser::{parse, parse_annotation};
    use crate::resolve::{ClassDef, Module, ObjectDef};
    use crate::type_infer::type_infer;

    fn build_with(
        source: &str,
        env: &Environment,
        registry: &OperatorRegistry,
    ) -> Result<Graph, CompileError> {
        let result = parse(source);
        assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
        let function = result.function.expect("parse failed");
        let options = CompileOptions::default();
        let typed = type_infer(&function, env, registry, &options)?;
        build_graph(&function, &typed, env, registry, &options)
    }

    fn build(source: &str) -> Result<Graph, CompileError> {
        build_with(source, &Environment::new(ObjectDef::new("m.M")), &OperatorRegistry::new())
    }

    fn model(source: &str) -> Model {
        build(source)
            .unwrap()
            .to_model("g", &CompileOptions::default(), Vec::new())
            .unwrap()
    }

    fn render(graph: &Graph) -> String {
        graph
            .nodes()
            .iter()
            .map(|n| format!("{} {:?} -> {:?}", n.op_type, n.input, n.output))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn names(values: &[ValueInfo]) -> Vec<&str> {
        values.iter().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn single_add() {
        let m = model("def f(self, x: int, y: int) -> int:\n    r1: int = x + y\n    return r1\n");
        assert_eq!(names(&m.graph.input), vec!["x", "y"]);
        assert_eq!(names(&m.graph.output), vec!["r1"]);
        assert_eq!(m.graph.node.len(), 1);
        assert_eq!(m.graph.node[0].op_type, "Add");
        assert_eq!(m.graph.node[0].input, vec!["x", "y"]);
        assert_eq!(m.graph.node[0].output, vec!["r1"]);
        assert_eq!(
            m.graph.output[0].ty,
            Some(TensorType {
                elem_type: ElemType::Int64,
                shape: vec![Dim::Value(1)]
            })
        );
    }

    #[test]
    fn int_plus_two_outputs() {
        let m = model(
            "def forward(self, x: int, y: int) -> Tuple[int, int]:\n    r1: int = x + y\n    r2: int = x + y\n    return (r1, r2)\n",
        );
        assert_eq!(names(&m.graph.input), vec!["x", "y"]);
        assert_eq!(names(&m.graph.output), vec!["r1", "r2"]);
        assert_eq!(m.graph.node.len(), 2);
        assert!(m.graph.value_info.is_empty());
    }

    #[test]
    fn intermediates_become_value_info() {
        let m = model("def f(a: int, b: int):\n    c = a + b\n    d = c + a\n    return d\n");
        assert_eq!(names(&m.graph.value_info), vec!["c"]);
        assert_eq!(names(&m.graph.input), vec!["a", "b"]);
    }

    #[test]
    fn nested_additions_use_temporaries() {
        let graph = build("def f(a: int, b: int, c: int):\n    s = a + b + c + 1\n").unwrap();
        insta::assert_snapshot!(render(&graph), @r#"
        Add ["a", "b"] -> ["s#add1"]
        Add ["s#add1", "c"] -> ["s#add0"]
        Constant [] -> ["s#const2"]
        Add ["s#add0", "s#const2"] -> ["s"]
        "#);
    }

    #[test]
    fn temporaries_never_shadow_user_names() {
        let graph = build("def f(a: int, b: int, s__add0: int):\n    s = a + b + s__add0\n").unwrap();
        insta::assert_snapshot!(render(&graph), @r#"
        Add ["a", "b"] -> ["s#add0"]
        Add ["s#add0", "s__add0"] -> ["s"]
        "#);
        assert_eq!(names(graph.inputs()), vec!["a", "b", "s__add0"]);

        let graph = build("def f(a: int, b: int, c: int):\n    s = a + b + c\n    s__add0 = a\n").unwrap();
        insta::assert_snapshot!(render(&graph), @r#"
        Add ["a", "b"] -> ["s#add0"]
        Add ["s#add0", "c"] -> ["s"]
        Identity ["a"] -> ["s__add0"]
        "#);
    }

    #[test]
    fn identity_and_constants() {
        let graph = build("def f(q: str):\n    a = q\n    b, c = 1, 'x'\n").unwrap();
        insta::assert_snapshot!(render(&graph), @r#"
        Identity ["q"] -> ["a"]
        Constant [] -> ["b"]
        Constant [] -> ["c"]
        "#);
        let AttributeValue::T(tensor) = graph.nodes()[2].attribute("value").unwrap() else {
            panic!("expected tensor attribute")
        };
        assert_eq!(tensor.string_data, vec!["x".to_string()]);
    }

    #[test]
    fn constant_must_match_annotation() {
        let err = build("def f():\n    x: float = 1\n").unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }));
    }

    #[test]
    fn add_type_mismatch() {
        let err = build("def f(a: List[int], b: int):\n    c: int = a + b\n").unwrap_err();
        assert!(matches!(
            err,
            CompileError::TypeMismatch { left, right, .. } if left == "List[int]" && right == "int"
        ));
    }

    #[test]
    fn output_redefinition() {
        let err = build("def f(a: int):\n    x = a\n    x = a\n").unwrap_err();
        assert!(matches!(err, CompileError::Redefinition { name } if name == "x"));

        let err = build("def f(a: int, b: int):\n    c = a\n    a = b\n").unwrap_err();
        assert!(matches!(err, CompileError::Redefinition { name } if name == "a"));
    }

    #[test]
    fn returning_an_input_is_undeclared() {
        let graph = build("def f(a: int, b: int):\n    c = a + b\n    return a\n").unwrap();
        let err = graph
            .to_model("g", &CompileOptions::default(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, CompileError::UndeclaredOutput { name } if name == "a"));
    }

    #[test]
    fn create_node_declares_inputs_once() {
        let mut graph = Graph::new();
        let node = |inputs: &[&str], outputs: &[&str]| NodeProto {
            name: String::new(),
            op_type: "Op".into(),
            domain: String::new(),
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: outputs.iter().map(|s| s.to_string()).collect(),
            attribute: Vec::new(),
        };
        graph.create_node(node(&["a", "b"], &["c"]), |_| None).unwrap();
        graph.create_node(node(&["c", "a"], &["d"]), |_| None).unwrap();
        assert_eq!(names(graph.inputs()), vec!["a", "b"]);
        assert_eq!(names(graph.outputs()), vec!["c", "d"]);
        assert!(matches!(
            graph.create_node(node(&["d"], &["b"]), |_| None),
            Err(CompileError::Redefinition { .. })
        ));
    }

    // ── Operator calls ──────────────────────────────────────────────────

    fn tokenizer_env() -> (Environment, OperatorRegistry) {
        let env = Environment::new(
            ObjectDef::new("app.Model").with_attribute("tok", ObjectDef::new("app.Tokenizer")),
        )
        .with_module(Module::new("app").with_function("normalize", |f| {
            f.with_returns(parse_annotation("str").unwrap())
        }))
        .with_class(ClassDef::new("app.Model", "app"))
        .with_class(ClassDef::new("app.Tokenizer", "app").with_method("run", |f| {
            f.with_returns(parse_annotation("Tuple[List[str], List[int]]").unwrap())
        }));
        (env, OperatorRegistry::new())
    }

    #[test]
    fn method_call_emits_custom_node() {
        let (env, registry) = tokenizer_env();
        let graph = build_with(
            "def forward(self, q: str):\n    n = normalize(q)\n    toks, _ = self.tok.run(n)\n    return toks\n",
            &env,
            &registry,
        )
        .unwrap();
        insta::assert_snapshot!(render(&graph), @r#"
        normalize ["q"] -> ["n"]
        run ["n"] -> ["toks", ""]
        "#);
        let run = &graph.nodes()[1];
        assert_eq!(run.domain, "ai.annograph");
        assert_eq!(
            run.attribute("callable"),
            Some(&AttributeValue::S("app.Tokenizer.run".into()))
        );
        assert_eq!(
            run.attribute("receiver"),
            Some(&AttributeValue::S("self.tok".into()))
        );
        assert!(graph.nodes()[0].attribute("receiver").is_none());

        let m = graph
            .to_model("g", &CompileOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(m.opset_import.len(), 2);
    }

    #[test]
    fn call_arguments_must_be_names() {
        let (env, registry) = tokenizer_env();
        let err = build_with("def f(self):\n    n = normalize('x')\n", &env, &registry).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedExpression { .. }));
    }

    #[test]
    fn call_inside_addition() {
        let (env, registry) = tokenizer_env();
        let graph = build_with(
            "def f(self, q: str):\n    s = normalize(q) + q\n",
            &env,
            &registry,
        )
        .unwrap();
        insta::assert_snapshot!(render(&graph), @r#"
        normalize ["q"] -> ["s#call0"]
        Add ["s#call0", "q"] -> ["s"]
        "#);
    }

    // ── Subgraph splice ─────────────────────────────────────────────────

    fn value(name: &str, elem_type: ElemType) -> ValueInfo {
        ValueInfo {
            name: name.into(),
            ty: Some(TensorType {
                elem_type,
                shape: vec![Dim::Param("N".into())],
            }),
        }
    }

    /// text -> Split -> pieces ; pieces, vocab -> Lookup -> ids ; text -> Len -> n
    fn vocab_model() -> Model {
        let mut g = GraphProto::new("vocab");
        g.input = vec![value("text", ElemType::String)];
        g.output = vec![value("ids", ElemType::Int64), value("n", ElemType::Int64)];
        g.value_info = vec![value("pieces", ElemType::String)];
        let mut vocab = TensorProto::new("vocab", ElemType::String, vec![2]);
        vocab.string_data = vec!["a".into(), "b".into()];
        g.initializer = vec![vocab];
        let node = |name: &str, op: &str, i: &[&str], o: &[&str]| NodeProto {
            name: name.into(),
            op_type: op.into(),
            domain: String::new(),
            input: i.iter().map(|s| s.to_string()).collect(),
            output: o.iter().map(|s| s.to_string()).collect(),
            attribute: Vec::new(),
        };
        g.node = vec![
            node("split", "Split", &["text"], &["pieces"]),
            node("lookup", "Lookup", &["pieces", "vocab"], &["ids"]),
            node("len", "Len", &["text"], &["n"]),
        ];
        Model {
            ir_version: 8,
            producer_name: "other".into(),
            producer_version: "1".into(),
            opset_import: Vec::new(),
            metadata_props: Vec::new(),
            graph: g,
        }
    }

    fn splice_env() -> (Environment, OperatorRegistry) {
        splice_env_for(vocab_model())
    }

    fn splice_env_for(model: Model) -> (Environment, OperatorRegistry) {
        let binding = SubgraphBinding {
            model: Arc::new(model),
            inputs: vec!["text".into()],
            outputs: vec!["ids".into()],
        };
        let env = Environment::new(
            ObjectDef::new("app.Model").with_attribute("vocab", ObjectDef::new("app.Vocab")),
        )
        .with_module(Module::new("app"))
        .with_class(ClassDef::new("app.Model", "app"))
        .with_class(ClassDef::new("app.Vocab", "app").with_method("encode", |f| {
            f.with_returns(parse_annotation("List[int]").unwrap())
                .with_subgraph(binding)
        }));
        (env, OperatorRegistry::new())
    }

    #[test]
    fn subgraph_splice_uses_declared_boundary() {
        let (env, registry) = splice_env();
        let graph = build_with(
            "def f(self, q: List[str]):\n    ids = self.vocab.encode(q)\n    return ids\n",
            &env,
            &registry,
        )
        .unwrap();
        insta::assert_snapshot!(render(&graph), @r#"
        Split ["q"] -> ["encode_0/pieces"]
        Lookup ["encode_0/pieces", "encode_0/vocab"] -> ["ids"]
        "#);
        assert_eq!(graph.nodes()[0].name, "encode_0/split");
        assert_eq!(graph.initializers()[0].name, "encode_0/vocab");
        assert_eq!(names(graph.inputs()), vec!["q"]);

        let m = graph
            .to_model("g", &CompileOptions::default(), Vec::new())
            .unwrap();
        assert_eq!(names(&m.graph.value_info), vec!["encode_0/pieces"]);
        assert_eq!(
            m.graph.value_info[0].ty.as_ref().unwrap().elem_type,
            ElemType::String
        );
    }

    #[test]
    fn subgraph_splices_are_scoped_apart() {
        let (env, registry) = splice_env();
        let graph = build_with(
            "def f(self, q: List[str], r: List[str]):\n    a = self.vocab.encode(q)\n    b = self.vocab.encode(r)\n",
            &env,
            &registry,
        )
        .unwrap();
        assert_eq!(graph.nodes().len(), 4);
        assert_eq!(graph.initializers().len(), 2);
        assert_eq!(graph.nodes()[2].name, "encode_1/split");
    }

    #[test]
    fn subgraph_boundary_type_checked() {
        let (env, registry) = splice_env();
        let err = build_with(
            "def f(self, q: List[int]):\n    ids = self.vocab.encode(q)\n",
            &env,
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { context, .. } if context.contains("'text'")));
    }

    #[test]
    fn subgraph_needing_unbound_inputs_rejected() {
        // `lookup` also reads `lang`, a graph input left out of the binding.
        let mut model = vocab_model();
        model.graph.input.push(value("lang", ElemType::String));
        model.graph.node[1].input.push("lang".into());
        let (env, registry) = splice_env_for(model);

        let err = build_with(
            "def f(self, q: List[str]):\n    ids = self.vocab.encode(q)\n",
            &env,
            &registry,
        )
        .unwrap_err();
        let CompileError::UnboundSubgraphInputs { graph, names } = err else {
            panic!("expected UnboundSubgraphInputs, got {err:?}")
        };
        assert_eq!(graph, "vocab");
        assert_eq!(names, vec!["lang".to_string()]);
    }
}
