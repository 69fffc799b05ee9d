// Jvmgen AST Builder
// Constructs typed trees: allocates node ids and records each node's type

use super::node::*;
use super::oracle::TypeMap;
use crate::error::Span;
use crate::types::{Primitive, Type, TypeSystem};

/// Builds nodes and their inferred types together, standing in for the
/// parser and inference phases
pub struct AstBuilder<'t> {
    types: &'t TypeSystem,
    map: TypeMap,
    next_id: NodeId,
    line: Option<usize>,
}

impl<'t> AstBuilder<'t> {
    pub fn new(types: &'t TypeSystem) -> Self {
        Self {
            types,
            map: TypeMap::new(),
            next_id: 0,
            line: None,
        }
    }

    /// Hand over the recorded types
    pub fn finish(self) -> TypeMap {
        self.map
    }

    pub fn types(&self) -> &'t TypeSystem {
        self.types
    }

    /// Nodes built after this call carry a span on `line`
    pub fn at_line(&mut self, line: usize) -> &mut Self {
        self.line = Some(line);
        self
    }

    /// Nodes built after this call carry no position
    pub fn no_position(&mut self) -> &mut Self {
        self.line = None;
        self
    }

    fn next_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn node(&mut self, kind: NodeKind, ty: Type) -> Node {
        let id = self.next_id();
        self.map.insert(id, ty);
        Node {
            id,
            span: self.line.map(Span::line),
            kind,
        }
    }

    fn type_of(&self, node: &Node) -> Type {
        use super::oracle::TypeOracle;
        self.map
            .inferred_type(node.id)
            .unwrap_or_else(|| self.types.void())
    }

    // ==================== Types ====================

    /// Resolve a type name; unknown names yield the error sentinel
    pub fn ty(&self, name: &str) -> Type {
        self.types
            .get(name)
            .unwrap_or_else(|fault| self.types.error(fault.to_string()))
    }

    pub fn prim(&self, primitive: Primitive) -> Type {
        self.types.primitive(primitive)
    }

    /// Define a class ahead of the code that uses it
    pub fn define_class(&self, name: &str, superclass: Option<&str>, interfaces: &[&str], is_interface: bool) -> Type {
        if let Ok(existing) = self.types.get(name) {
            if existing.is_complete() {
                return existing;
            }
        }
        self.types
            .define_class(name, superclass, interfaces, is_interface)
            .unwrap_or_else(|fault| self.types.error(fault.to_string()))
    }

    // ==================== Literals ====================

    pub fn int(&mut self, value: i64) -> Node {
        let ty = self.prim(Primitive::Int);
        self.node(NodeKind::Fixnum(value), ty)
    }

    pub fn long(&mut self, value: i64) -> Node {
        let ty = self.prim(Primitive::Long);
        self.node(NodeKind::Fixnum(value), ty)
    }

    pub fn float(&mut self, value: f64) -> Node {
        let ty = self.prim(Primitive::Float);
        self.node(NodeKind::Float(value), ty)
    }

    pub fn double(&mut self, value: f64) -> Node {
        let ty = self.prim(Primitive::Double);
        self.node(NodeKind::Float(value), ty)
    }

    pub fn char(&mut self, value: char) -> Node {
        let ty = self.prim(Primitive::Char);
        self.node(NodeKind::Char(value), ty)
    }

    pub fn string(&mut self, value: &str) -> Node {
        let ty = self.types.string();
        self.node(NodeKind::Str(value.to_string()), ty)
    }

    pub fn boolean(&mut self, value: bool) -> Node {
        let ty = self.prim(Primitive::Boolean);
        self.node(NodeKind::Boolean(value), ty)
    }

    pub fn null(&mut self) -> Node {
        let ty = self.types.null();
        self.node(NodeKind::Null, ty)
    }

    pub fn regex(&mut self, pattern: &str) -> Node {
        let ty = self.ty("java.util.regex.Pattern");
        self.node(NodeKind::Regex(pattern.to_string()), ty)
    }

    // ==================== References ====================

    pub fn self_ref(&mut self, ty: Type) -> Node {
        self.node(NodeKind::SelfRef, ty)
    }

    /// Class used as a receiver; typed as its meta type
    pub fn type_ref(&mut self, name: &str) -> Node {
        let base = self.ty(name);
        let ty = self.types.meta_of(&base);
        self.node(NodeKind::TypeRef(name.to_string()), ty)
    }

    pub fn binding_ref(&mut self) -> Node {
        let ty = self.types.object();
        self.node(NodeKind::BindingReference, ty)
    }

    // ==================== Control flow ====================

    /// Statement list typed by its last statement
    pub fn body(&mut self, nodes: Vec<Node>) -> Node {
        let ty = nodes
            .last()
            .map(|n| self.type_of(n))
            .unwrap_or_else(|| self.types.void());
        self.node(NodeKind::Body(nodes), ty)
    }

    pub fn if_else(&mut self, condition: Node, body: Option<Node>, else_body: Option<Node>, ty: Type) -> Node {
        self.node(
            NodeKind::If {
                condition: Box::new(condition),
                body: body.map(Box::new),
                else_body: else_body.map(Box::new),
            },
            ty,
        )
    }

    /// Statement-form `if` without a value
    pub fn if_stmt(&mut self, condition: Node, body: Option<Node>, else_body: Option<Node>) -> Node {
        let void = self.types.void();
        self.if_else(condition, body, else_body, void)
    }

    pub fn loop_node(&mut self, parts: LoopNode) -> Node {
        let ty = self.types.null();
        self.node(NodeKind::Loop(Box::new(parts)), ty)
    }

    fn simple_loop(&mut self, condition: Node, body: Node, skip_first_check: bool, negative: bool) -> Node {
        self.loop_node(LoopNode {
            init: Vec::new(),
            condition,
            pre: Vec::new(),
            body: Some(body),
            post: Vec::new(),
            skip_first_check,
            negative,
        })
    }

    pub fn while_loop(&mut self, condition: Node, body: Node) -> Node {
        self.simple_loop(condition, body, false, false)
    }

    pub fn until_loop(&mut self, condition: Node, body: Node) -> Node {
        self.simple_loop(condition, body, false, true)
    }

    pub fn do_while(&mut self, condition: Node, body: Node) -> Node {
        self.simple_loop(condition, body, true, false)
    }

    pub fn break_(&mut self) -> Node {
        let ty = self.types.unreachable();
        self.node(NodeKind::Break, ty)
    }

    pub fn next_(&mut self) -> Node {
        let ty = self.types.unreachable();
        self.node(NodeKind::Next, ty)
    }

    pub fn redo_(&mut self) -> Node {
        let ty = self.types.unreachable();
        self.node(NodeKind::Redo, ty)
    }

    /// `return value`; typed by the value (void when bare)
    pub fn return_(&mut self, value: Option<Node>) -> Node {
        let ty = value
            .as_ref()
            .map(|v| self.type_of(v))
            .unwrap_or_else(|| self.types.void());
        self.node(NodeKind::Return(value.map(Box::new)), ty)
    }

    /// `return value` converted to the method's declared return type
    pub fn return_as(&mut self, value: Node, ty: Type) -> Node {
        self.node(NodeKind::Return(Some(Box::new(value))), ty)
    }

    pub fn raise(&mut self, value: Node) -> Node {
        let ty = self.types.unreachable();
        self.node(NodeKind::Raise(Box::new(value)), ty)
    }

    pub fn rescue_clause(&mut self, name: Option<&str>, types: &[&str], body: Node) -> RescueClause {
        let caught = match types.first() {
            Some(first) => self.ty(first),
            None => self.ty("java.lang.Exception"),
        };
        let id = self.next_id();
        self.map.insert(id, caught);
        RescueClause {
            id,
            name: name.map(String::from),
            types: types.iter().map(|t| t.to_string()).collect(),
            body,
        }
    }

    pub fn rescue(&mut self, body: Node, clauses: Vec<RescueClause>, else_clause: Option<Node>, ty: Type) -> Node {
        self.node(
            NodeKind::Rescue(Box::new(RescueNode {
                body,
                clauses,
                else_clause,
            })),
            ty,
        )
    }

    pub fn ensure(&mut self, body: Node, clause: Node) -> Node {
        let ty = self.type_of(&body);
        self.node(
            NodeKind::Ensure {
                body: Box::new(body),
                clause: Box::new(clause),
            },
            ty,
        )
    }

    // ==================== Calls ====================

    pub fn call(&mut self, target: Node, name: &str, args: Vec<Node>, ty: Type) -> Node {
        self.node(
            NodeKind::Call {
                target: Box::new(target),
                name: name.to_string(),
                args,
            },
            ty,
        )
    }

    pub fn fcall(&mut self, name: &str, args: Vec<Node>, ty: Type) -> Node {
        self.node(
            NodeKind::FunctionalCall {
                name: name.to_string(),
                args,
            },
            ty,
        )
    }

    pub fn super_call(&mut self, name: &str, args: Vec<Node>, ty: Type) -> Node {
        self.node(
            NodeKind::Super {
                name: name.to_string(),
                args,
            },
            ty,
        )
    }

    /// `Type.new(args)`
    pub fn new_object(&mut self, class: &str, args: Vec<Node>) -> Node {
        let target = self.type_ref(class);
        let ty = self.ty(class);
        self.call(target, "new", args, ty)
    }

    pub fn cast(&mut self, value: Node, ty: Type) -> Node {
        self.node(NodeKind::Cast(Box::new(value)), ty)
    }

    pub fn print(&mut self, args: Vec<Node>) -> Node {
        let ty = self.types.void();
        self.node(NodeKind::Print { println: false, args }, ty)
    }

    pub fn puts(&mut self, args: Vec<Node>) -> Node {
        let ty = self.types.void();
        self.node(NodeKind::Print { println: true, args }, ty)
    }

    // ==================== Strings and arrays ====================

    pub fn concat(&mut self, parts: Vec<Node>) -> Node {
        let ty = self.types.string();
        self.node(NodeKind::StringConcat(parts), ty)
    }

    pub fn eval(&mut self, value: Node) -> Node {
        let ty = self.types.string();
        self.node(NodeKind::StringEval(Box::new(value)), ty)
    }

    pub fn array(&mut self, elements: Vec<Node>) -> Node {
        let ty = self.ty("java.util.List");
        self.node(NodeKind::Array(elements), ty)
    }

    pub fn empty_array(&mut self, component: Type, size: Node) -> Node {
        let ty = self.types.array_of(&component);
        self.node(NodeKind::EmptyArray(Box::new(size)), ty)
    }

    // ==================== Variables ====================

    pub fn declare(&mut self, name: &str, ty: Type) -> Node {
        self.node(NodeKind::LocalDeclaration(name.to_string()), ty)
    }

    pub fn local(&mut self, name: &str, ty: Type) -> Node {
        self.node(NodeKind::LocalAccess(name.to_string()), ty)
    }

    /// `name = value`, with the variable typed like the value
    pub fn assign(&mut self, name: &str, value: Node) -> Node {
        let ty = self.type_of(&value);
        self.assign_as(name, ty, value)
    }

    pub fn assign_as(&mut self, name: &str, ty: Type, value: Node) -> Node {
        self.node(
            NodeKind::LocalAssignment {
                name: name.to_string(),
                value: Box::new(value),
            },
            ty,
        )
    }

    pub fn field_decl(&mut self, field: FieldDef, ty: Type) -> Node {
        self.node(NodeKind::FieldDeclaration(field), ty)
    }

    pub fn field(&mut self, name: &str, ty: Type, is_static: bool) -> Node {
        self.node(
            NodeKind::FieldAccess {
                name: name.to_string(),
                is_static,
            },
            ty,
        )
    }

    pub fn field_assign(&mut self, name: &str, value: Node, is_static: bool) -> Node {
        let ty = self.type_of(&value);
        self.node(
            NodeKind::FieldAssign {
                name: name.to_string(),
                value: Box::new(value),
                is_static,
                annotations: Vec::new(),
            },
            ty,
        )
    }

    // ==================== Definitions ====================

    pub fn arg(&mut self, name: &str, ty: Type) -> Argument {
        let id = self.next_id();
        self.map.insert(id, ty);
        Argument {
            id,
            name: name.to_string(),
            default: None,
        }
    }

    pub fn opt_arg(&mut self, name: &str, ty: Type, default: Node) -> Argument {
        let mut arg = self.arg(name, ty);
        arg.default = Some(default);
        arg
    }

    pub fn method_def(&mut self, def: MethodDef, return_type: Type) -> Node {
        self.node(NodeKind::MethodDefinition(Box::new(def)), return_type)
    }

    pub fn method(&mut self, name: &str, args: Vec<Argument>, return_type: Type, body: Option<Node>) -> Node {
        self.method_def(
            MethodDef {
                name: name.to_string(),
                args,
                body,
                is_static: false,
                throws: Vec::new(),
                annotations: Vec::new(),
            },
            return_type,
        )
    }

    pub fn static_method(&mut self, name: &str, args: Vec<Argument>, return_type: Type, body: Option<Node>) -> Node {
        self.method_def(
            MethodDef {
                name: name.to_string(),
                args,
                body,
                is_static: true,
                throws: Vec::new(),
                annotations: Vec::new(),
            },
            return_type,
        )
    }

    pub fn constructor(&mut self, args: Vec<Argument>, delegate: Option<Delegation>, body: Option<Node>) -> Node {
        let ty = self.types.void();
        self.node(
            NodeKind::ConstructorDefinition(Box::new(ConstructorDef { args, body, delegate })),
            ty,
        )
    }

    /// Class definition; the class type is defined if it is not already
    pub fn class_def(&mut self, def: ClassDef) -> Node {
        let interfaces: Vec<&str> = def.interfaces.iter().map(String::as_str).collect();
        let ty = self.define_class(&def.name, def.superclass.as_deref(), &interfaces, def.is_interface);
        self.node(NodeKind::ClassDefinition(Box::new(def)), ty)
    }

    /// Closure literal implementing `interfaces`; typed as the closure class
    pub fn closure(&mut self, name: &str, interfaces: &[&str], methods: Vec<Node>) -> Node {
        let ty = self.define_class(name, None, interfaces, false);
        self.node(
            NodeKind::ClosureDefinition(Box::new(ClosureDef {
                name: name.to_string(),
                interfaces: interfaces.iter().map(|i| i.to_string()).collect(),
                methods,
            })),
            ty,
        )
    }

    pub fn script(&mut self, statements: Vec<Node>) -> Node {
        let ty = self.types.void();
        self.node(NodeKind::Script(statements), ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TypeOracle;

    #[test]
    fn test_ids_are_unique_and_typed() {
        let types = TypeSystem::new();
        let mut b = AstBuilder::new(&types);
        let one = b.int(1);
        let two = b.long(2);
        let sum = b.body(vec![one, two]);
        let map = b.finish();
        assert_eq!(map.inferred_type(sum.id).map(|t| t.name().to_string()), Some("long".to_string()));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_unknown_type_becomes_error_sentinel() {
        let types = TypeSystem::new();
        let b = AstBuilder::new(&types);
        assert!(b.ty("no.Such").is_error());
    }

    #[test]
    fn test_at_line_sets_spans() {
        let types = TypeSystem::new();
        let mut b = AstBuilder::new(&types);
        b.at_line(7);
        let brk = b.break_();
        b.no_position();
        let nxt = b.next_();
        assert_eq!(brk.line(), Some(7));
        assert_eq!(nxt.line(), None);
    }
}
