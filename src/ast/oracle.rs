// Jvmgen Type Oracle
// Read-only view of the inference results the backend consumes

use rustc_hash::FxHashMap;

use super::node::NodeId;
use crate::types::Type;

/// Supplies the inferred type of every node. Dead or ill-typed nodes get
/// the unreachable or error sentinel rather than no answer.
pub trait TypeOracle {
    fn inferred_type(&self, id: NodeId) -> Option<Type>;
}

/// Plain map from node id to type
#[derive(Debug, Default, Clone)]
pub struct TypeMap {
    types: FxHashMap<NodeId, Type>,
}

impl TypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: NodeId, ty: Type) {
        self.types.insert(id, ty);
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl TypeOracle for TypeMap {
    fn inferred_type(&self, id: NodeId) -> Option<Type> {
        self.types.get(&id).cloned()
    }
}
