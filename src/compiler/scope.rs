// Jvmgen Scopes
// Lexical scopes, captured locals and the binding classes that carry them

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::{Argument, Node, NodeId, NodeKind, TypeOracle};
use crate::error::{EmitResult, Fault};
use crate::types::{Type, TypeSystem};

pub type ScopeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Method, constructor, static initializer or script body
    Method,
    /// A method of a closure class; sees the enclosing scope's locals
    Closure,
    /// A rescue clause; its exception variable lives here
    Block,
}

/// One lexical scope
#[derive(Debug, Clone)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    /// Node that introduced the scope
    pub owner: NodeId,
    /// Class whose code the scope belongs to
    pub class_name: String,
    locals: Vec<String>,
    local_types: FxHashMap<String, Type>,
    captured: FxHashSet<String>,
    binding: Option<Type>,
}

impl Scope {
    fn new(id: ScopeId, kind: ScopeKind, parent: Option<ScopeId>, owner: NodeId, class_name: &str) -> Self {
        Self {
            id,
            kind,
            parent,
            owner,
            class_name: class_name.to_string(),
            locals: Vec::new(),
            local_types: FxHashMap::default(),
            captured: FxHashSet::default(),
            binding: None,
        }
    }

    /// Locals in declaration order
    pub fn locals(&self) -> &[String] {
        &self.locals
    }

    pub fn local_type(&self, name: &str) -> Option<&Type> {
        self.local_types.get(name)
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.local_types.contains_key(name)
    }

    /// Referenced from a nested closure
    pub fn is_captured(&self, name: &str) -> bool {
        self.captured.contains(name)
    }

    pub fn has_captures(&self) -> bool {
        !self.captured.is_empty()
    }

    fn define(&mut self, name: &str, ty: Type) {
        if !self.local_types.contains_key(name) {
            self.locals.push(name.to_string());
            self.local_types.insert(name.to_string(), ty);
        }
    }
}

/// Result of scope analysis for one compile unit
#[derive(Debug, Default)]
pub struct ScopeTable {
    scopes: Vec<Scope>,
    /// Scope-introducing node -> its scope
    introduced: FxHashMap<NodeId, ScopeId>,
    /// Local variable node -> scope that defines the variable
    resolved: FxHashMap<NodeId, ScopeId>,
}

impl ScopeTable {
    /// Analyze a script whose top-level code belongs to `main_class`
    pub fn analyze(
        main_class: &str,
        script: &Node,
        oracle: &dyn TypeOracle,
        types: &TypeSystem,
    ) -> EmitResult<ScopeTable> {
        let mut analyzer = Analyzer {
            table: ScopeTable::default(),
            oracle,
            types,
            current: None,
            class_name: main_class.to_string(),
        };
        analyzer.visit(script)?;
        analyzer.assign_bindings()?;
        Ok(analyzer.table)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    /// Scope introduced by a node (method, class initializer, rescue clause)
    pub fn scope_for(&self, node: NodeId) -> Option<&Scope> {
        self.introduced.get(&node).map(|id| &self.scopes[*id])
    }

    /// Scope defining the variable a local declaration/access/assignment refers to
    pub fn defining_scope(&self, node: NodeId) -> Option<&Scope> {
        self.resolved.get(&node).map(|id| &self.scopes[*id])
    }

    pub fn is_captured(&self, scope: ScopeId, name: &str) -> bool {
        self.scopes[scope].is_captured(name)
    }

    /// Nearest enclosing method-kind scope; closures share it
    pub fn root_of(&self, scope: ScopeId) -> ScopeId {
        let mut id = scope;
        loop {
            let current = &self.scopes[id];
            match (current.kind, current.parent) {
                (ScopeKind::Method, _) | (_, None) => return id,
                (_, Some(parent)) => id = parent,
            }
        }
    }

    /// Binding class shared by every scope of a method activation, if any
    /// of them has captured locals
    pub fn binding_type(&self, scope: ScopeId) -> Option<&Type> {
        self.scopes[self.root_of(scope)].binding.as_ref()
    }

    /// Slot name of a local. Block scopes suffix their id so that reused
    /// names in sibling clauses do not share a slot.
    pub fn scoped_local_name(&self, scope: ScopeId, name: &str) -> String {
        match self.scopes[scope].kind {
            ScopeKind::Block => format!("{}${}", name, scope),
            _ => name.to_string(),
        }
    }
}

struct Analyzer<'o> {
    table: ScopeTable,
    oracle: &'o dyn TypeOracle,
    types: &'o TypeSystem,
    current: Option<ScopeId>,
    class_name: String,
}

impl Analyzer<'_> {
    fn open(&mut self, kind: ScopeKind, owner: NodeId, parent: Option<ScopeId>) -> ScopeId {
        let id = self.table.scopes.len();
        self.table
            .scopes
            .push(Scope::new(id, kind, parent, owner, &self.class_name));
        self.table.introduced.insert(owner, id);
        id
    }

    fn within(&mut self, scope: ScopeId, f: impl FnOnce(&mut Self) -> EmitResult<()>) -> EmitResult<()> {
        let saved = self.current.replace(scope);
        let result = f(self);
        self.current = saved;
        result
    }

    fn type_of(&self, id: NodeId) -> EmitResult<Type> {
        self.oracle
            .inferred_type(id)
            .ok_or_else(|| Fault::Internal(format!("no inferred type for node {}", id)))
    }

    fn visit(&mut self, node: &Node) -> EmitResult<()> {
        match &node.kind {
            NodeKind::Script(statements) => {
                let main = self.open(ScopeKind::Method, node.id, None);
                let argv = self.types.array_of(&self.types.string());
                self.table.scopes[main].define("argv", argv);
                self.visit_members(main, statements)
            }
            NodeKind::ClassDefinition(def) => {
                let saved = std::mem::replace(&mut self.class_name, def.name.clone());
                let initializer = self.open(ScopeKind::Method, node.id, None);
                let result = self.visit_members(initializer, &def.body);
                self.class_name = saved;
                result
            }
            NodeKind::MethodDefinition(def) => {
                self.method_scope(node, ScopeKind::Method, None, &def.args, def.body.as_ref(), &[])
            }
            NodeKind::ConstructorDefinition(def) => {
                let delegate = def.delegate.as_ref().map(|d| d.args.as_slice()).unwrap_or(&[]);
                self.method_scope(node, ScopeKind::Method, None, &def.args, def.body.as_ref(), delegate)
            }
            NodeKind::ClosureDefinition(def) => {
                let parent = self.current;
                for method in &def.methods {
                    match &method.kind {
                        NodeKind::MethodDefinition(m) => {
                            self.method_scope(method, ScopeKind::Closure, parent, &m.args, m.body.as_ref(), &[])?
                        }
                        _ => self.visit(method)?,
                    }
                }
                Ok(())
            }
            NodeKind::Rescue(rescue) => {
                self.visit(&rescue.body)?;
                for clause in &rescue.clauses {
                    let block = self.open(ScopeKind::Block, clause.id, self.current);
                    if let Some(name) = &clause.name {
                        let ty = self.type_of(clause.id)?;
                        self.table.scopes[block].define(name, ty);
                    }
                    self.within(block, |a| a.visit(&clause.body))?;
                }
                match &rescue.else_clause {
                    Some(else_clause) => self.visit(else_clause),
                    None => Ok(()),
                }
            }
            NodeKind::LocalDeclaration(name) | NodeKind::LocalAccess(name) => self.reference(node, name),
            NodeKind::LocalAssignment { name, value } => {
                self.visit(value)?;
                self.reference(node, name)
            }
            _ => {
                for child in node.children() {
                    self.visit(child)?;
                }
                Ok(())
            }
        }
    }

    /// Definitions open their own scopes; other statements run in `scope`
    fn visit_members(&mut self, scope: ScopeId, members: &[Node]) -> EmitResult<()> {
        for member in members {
            if member.kind.is_definition() {
                self.visit(member)?;
            } else {
                self.within(scope, |a| a.visit(member))?;
            }
        }
        Ok(())
    }

    fn method_scope(
        &mut self,
        node: &Node,
        kind: ScopeKind,
        parent: Option<ScopeId>,
        args: &[Argument],
        body: Option<&Node>,
        prologue: &[Node],
    ) -> EmitResult<()> {
        let scope = self.open(kind, node.id, parent);
        for arg in args {
            let ty = self.type_of(arg.id)?;
            self.table.scopes[scope].define(&arg.name, ty);
        }
        self.within(scope, |a| {
            for arg in args {
                if let Some(default) = &arg.default {
                    a.visit(default)?;
                }
            }
            for node in prologue {
                a.visit(node)?;
            }
            match body {
                Some(body) => a.visit(body),
                None => Ok(()),
            }
        })
    }

    fn reference(&mut self, node: &Node, name: &str) -> EmitResult<()> {
        let current = self
            .current
            .ok_or_else(|| Fault::Internal(format!("local {} outside of any scope", name)))?;
        let scope = match self.lookup(current, name) {
            Some(scope) => scope,
            None => {
                let target = self.definition_scope(current);
                let ty = self.type_of(node.id)?;
                self.table.scopes[target].define(name, ty);
                target
            }
        };
        self.table.resolved.insert(node.id, scope);
        Ok(())
    }

    /// Find the defining scope of `name`, marking it captured when the
    /// search crosses a closure boundary. Method scopes end the search.
    fn lookup(&mut self, from: ScopeId, name: &str) -> Option<ScopeId> {
        let mut cursor = Some(from);
        let mut crossed_closure = false;
        while let Some(id) = cursor {
            let scope = &mut self.table.scopes[id];
            if scope.has_local(name) {
                if crossed_closure {
                    scope.captured.insert(name.to_string());
                }
                return Some(id);
            }
            match scope.kind {
                ScopeKind::Method => return None,
                ScopeKind::Closure => crossed_closure = true,
                ScopeKind::Block => {}
            }
            cursor = scope.parent;
        }
        None
    }

    /// New locals go to the nearest method or closure scope
    fn definition_scope(&self, from: ScopeId) -> ScopeId {
        let mut id = from;
        while let (ScopeKind::Block, Some(parent)) = (self.table.scopes[id].kind, self.table.scopes[id].parent) {
            id = parent;
        }
        id
    }

    fn assign_bindings(&mut self) -> EmitResult<()> {
        let mut roots: Vec<ScopeId> = Vec::new();
        for scope in &self.table.scopes {
            if scope.has_captures() {
                let root = self.table.root_of(scope.id);
                if !roots.contains(&root) {
                    roots.push(root);
                }
            }
        }
        for (n, root) in roots.into_iter().enumerate() {
            let name = format!("{}$Binding{}", self.table.scopes[root].class_name, n + 1);
            let binding = match self.types.get(&name) {
                Ok(existing) if existing.is_complete() => existing,
                _ => self.types.define_class(&name, None, &[], false)?,
            };
            self.table.scopes[root].binding = Some(binding);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstBuilder, TypeMap};
    use crate::types::Primitive;
    use pretty_assertions::assert_eq;

    fn analyze(types: &TypeSystem, map: &TypeMap, script: &Node) -> ScopeTable {
        ScopeTable::analyze("Demo", script, map, types).unwrap()
    }

    #[test]
    fn test_closure_captures_only_what_it_reads() {
        let types = TypeSystem::new();
        let mut b = AstBuilder::new(&types);
        let int = b.prim(Primitive::Int);
        let one = b.int(1);
        let set_x = b.assign("x", one);
        let two = b.int(2);
        let set_y = b.assign("y", two);
        let read_x = b.local("x", int.clone());
        let void = b.types().void();
        let print = b.puts(vec![read_x]);
        let run = b.method("run", Vec::new(), void, Some(print));
        let closure = b.closure("Demo$Closure1", &["java.lang.Runnable"], vec![run]);
        let script = b.script(vec![set_x, set_y, closure]);
        let map = b.finish();

        let table = analyze(&types, &map, &script);
        let main = table.scope_for(script.id).unwrap();
        assert!(main.is_captured("x"));
        assert!(!main.is_captured("y"));
        assert_eq!(main.locals(), &["argv".to_string(), "x".to_string(), "y".to_string()]);
        assert_eq!(table.binding_type(main.id).map(|t| t.name().to_string()), Some("Demo$Binding1".to_string()));
    }

    #[test]
    fn test_no_binding_without_captures() {
        let types = TypeSystem::new();
        let mut b = AstBuilder::new(&types);
        let one = b.int(1);
        let set_x = b.assign("x", one);
        let script = b.script(vec![set_x]);
        let map = b.finish();

        let table = analyze(&types, &map, &script);
        let main = table.scope_for(script.id).unwrap();
        assert!(table.binding_type(main.id).is_none());
        assert_eq!(table.defining_scope(set_x_id(&script)).map(|s| s.id), Some(main.id));
    }

    fn set_x_id(script: &Node) -> NodeId {
        script.children()[0].id
    }

    #[test]
    fn test_methods_do_not_see_script_locals() {
        let types = TypeSystem::new();
        let mut b = AstBuilder::new(&types);
        let int = b.prim(Primitive::Int);
        let one = b.int(1);
        let set_x = b.assign("x", one);
        let read_x = b.local("x", int.clone());
        let read_id = read_x.id;
        let method = b.static_method("f", Vec::new(), int, Some(read_x));
        let method_id = method.id;
        let script = b.script(vec![set_x, method]);
        let map = b.finish();

        let table = analyze(&types, &map, &script);
        let method_scope = table.scope_for(method_id).unwrap();
        assert_eq!(table.defining_scope(read_id).map(|s| s.id), Some(method_scope.id));
        assert!(!table.scope_for(script.id).unwrap().has_captures());
    }

    #[test]
    fn test_rescue_variable_lives_in_block_scope() {
        let types = TypeSystem::new();
        let mut b = AstBuilder::new(&types);
        let exception = b.ty("java.lang.Exception");
        let body = b.int(1);
        let read_e = b.local("e", exception);
        let read_id = read_e.id;
        let clause = b.rescue_clause(Some("e"), &["java.lang.Exception"], read_e);
        let clause_id = clause.id;
        let void = b.types().void();
        let rescue = b.rescue(body, vec![clause], None, void);
        let script = b.script(vec![rescue]);
        let map = b.finish();

        let table = analyze(&types, &map, &script);
        let block = table.scope_for(clause_id).unwrap();
        assert_eq!(block.kind, ScopeKind::Block);
        assert_eq!(table.defining_scope(read_id).map(|s| s.id), Some(block.id));
        assert_eq!(table.scoped_local_name(block.id, "e"), format!("e${}", block.id));
        assert_eq!(table.root_of(block.id), table.scope_for(script.id).unwrap().id);
    }
}
