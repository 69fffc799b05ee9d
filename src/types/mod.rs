// Jvmgen Types Module
// Type facade: classification, hierarchy queries and per-type instructions

mod primitive;
mod system;
mod ty;

pub use primitive::Primitive;
pub use system::TypeSystem;
pub use ty::{ClassMirror, Type, TypeKind};
