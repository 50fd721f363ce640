mod dsl;
mod model;
mod resolver;
mod store;

pub use dsl::{DslError, DslErrorKind, GraphDslParser, ParseResult, ParsedEdge, ParsedNode};
pub use model::{DependencyGraph, GraphNode};
pub use resolver::{Cycle, DependencyResolver, Resolution};
pub use store::GraphStore;
