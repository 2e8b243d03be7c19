// annograph — Annotated function to dataflow graph compiler
//
// Library root. Phases run lexer → parser → type_infer → graph; the artifact
// model, symbol table and registry are shared by all of them.

pub mod artifact;
pub mod ast;
pub mod call_site;
pub mod diag;
pub mod dot;
pub mod graph;
pub mod lexer;
pub mod manifest;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod resolve;
pub mod subgraph;
pub mod type_infer;
pub mod types;
