//! Schema input, implements-graph, rule binding, and the schema registry

pub mod binder;
pub mod definition;
pub mod graph;
pub mod registry;
pub mod sdl;

pub use binder::{bind, CompiledSchema, EffectiveAuthSpec, EffectiveRule, TypeInfo};
pub use definition::{AuthDeclaration, SchemaDefinition, TypeDefinition, TypeKind};
pub use graph::ImplementsGraph;
pub use registry::SchemaRegistry;
pub use sdl::parse_sdl;
