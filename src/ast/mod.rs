// Jvmgen AST Module
// Typed tree consumed by the emitter

mod builder;
mod node;
mod oracle;

pub use builder::AstBuilder;
pub use node::*;
pub use oracle::{TypeMap, TypeOracle};
