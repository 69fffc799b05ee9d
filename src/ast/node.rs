// Jvmgen AST Nodes
// The typed tree handed to the backend. Types live beside the tree in a
// `TypeOracle`, keyed by node id.

use crate::error::Span;

/// Identity of a node, used to look up its inferred type and its scope
pub type NodeId = usize;

/// A node of the typed tree
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub span: Option<Span>,
    pub kind: NodeKind,
}

impl Node {
    /// Short name of the node kind, used in fault messages and logs
    pub fn describe(&self) -> &'static str {
        self.kind.describe()
    }

    pub fn line(&self) -> Option<usize> {
        self.span.map(|s| s.start.line)
    }

    /// Direct children in evaluation order. Rescue clause bodies and
    /// argument defaults are included.
    pub fn children(&self) -> Vec<&Node> {
        let mut out: Vec<&Node> = Vec::new();
        match &self.kind {
            NodeKind::Body(nodes)
            | NodeKind::StringConcat(nodes)
            | NodeKind::Array(nodes)
            | NodeKind::Script(nodes) => out.extend(nodes),
            NodeKind::If {
                condition,
                body,
                else_body,
            } => {
                out.push(condition);
                out.extend(body.as_deref());
                out.extend(else_body.as_deref());
            }
            NodeKind::Loop(parts) => {
                out.extend(&parts.init);
                out.push(&parts.condition);
                out.extend(&parts.pre);
                out.extend(&parts.body);
                out.extend(&parts.post);
            }
            NodeKind::Return(value) => out.extend(value.as_deref()),
            NodeKind::Raise(value)
            | NodeKind::Cast(value)
            | NodeKind::StringEval(value)
            | NodeKind::EmptyArray(value) => out.push(value),
            NodeKind::Rescue(rescue) => {
                out.push(&rescue.body);
                out.extend(rescue.clauses.iter().map(|c| &c.body));
                out.extend(&rescue.else_clause);
            }
            NodeKind::Ensure { body, clause } => {
                out.push(body);
                out.push(clause);
            }
            NodeKind::Call { target, args, .. } => {
                out.push(target);
                out.extend(args);
            }
            NodeKind::FunctionalCall { args, .. }
            | NodeKind::Super { args, .. }
            | NodeKind::Print { args, .. } => out.extend(args),
            NodeKind::LocalAssignment { value, .. } | NodeKind::FieldAssign { value, .. } => out.push(value),
            NodeKind::ClassDefinition(def) => out.extend(&def.body),
            NodeKind::ClosureDefinition(def) => out.extend(&def.methods),
            NodeKind::MethodDefinition(def) => {
                out.extend(def.args.iter().filter_map(|a| a.default.as_ref()));
                out.extend(&def.body);
            }
            NodeKind::ConstructorDefinition(def) => {
                out.extend(def.args.iter().filter_map(|a| a.default.as_ref()));
                if let Some(delegate) = &def.delegate {
                    out.extend(&delegate.args);
                }
                out.extend(&def.body);
            }
            _ => {}
        }
        out
    }
}

/// Loop parts. `pre` runs before the body on every iteration, `post` after it.
#[derive(Debug, Clone)]
pub struct LoopNode {
    pub init: Vec<Node>,
    pub condition: Node,
    pub pre: Vec<Node>,
    pub body: Option<Node>,
    pub post: Vec<Node>,
    /// do-while: run the body once before the first test
    pub skip_first_check: bool,
    /// `until` instead of `while`
    pub negative: bool,
}

/// One `rescue` clause. The clause introduces a scope for its exception variable.
#[derive(Debug, Clone)]
pub struct RescueClause {
    pub id: NodeId,
    pub name: Option<String>,
    /// Caught classes (dotted names); empty means `java.lang.Exception`
    pub types: Vec<String>,
    pub body: Node,
}

#[derive(Debug, Clone)]
pub struct RescueNode {
    pub body: Node,
    pub clauses: Vec<RescueClause>,
    pub else_clause: Option<Node>,
}

/// Annotation as written in source
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Dotted class name of the annotation type
    pub type_name: String,
    pub runtime: bool,
    pub values: Vec<(String, AnnotationArg)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationArg {
    Str(String),
    Int(i64),
    Bool(bool),
    Class(String),
    Array(Vec<AnnotationArg>),
    Nested(Annotation),
}

/// Initial value of a `static final` constant
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
}

/// A field declaration inside a class body
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub is_static: bool,
    pub transient: bool,
    pub constant: Option<Literal>,
    pub annotations: Vec<Annotation>,
}

/// Method parameter. Its type is the inferred type of `id`.
#[derive(Debug, Clone)]
pub struct Argument {
    pub id: NodeId,
    pub name: String,
    /// Optional arguments get an overload that fills in this value
    pub default: Option<Node>,
}

/// Method definition. The inferred type of the node is the return type.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    pub args: Vec<Argument>,
    pub body: Option<Node>,
    pub is_static: bool,
    pub throws: Vec<String>,
    pub annotations: Vec<Annotation>,
}

/// Explicit `super(...)` or `initialize(...)` at the start of a constructor
#[derive(Debug, Clone)]
pub struct Delegation {
    pub calls_super: bool,
    pub args: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct ConstructorDef {
    pub args: Vec<Argument>,
    pub body: Option<Node>,
    pub delegate: Option<Delegation>,
}

/// Class or interface definition
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
    /// Field, method and constructor definitions; other statements form the static initializer
    pub body: Vec<Node>,
}

/// Closure literal: an anonymous class implementing `interfaces`, instantiated
/// where it appears and sharing the enclosing binding
#[derive(Debug, Clone)]
pub struct ClosureDef {
    pub name: String,
    pub interfaces: Vec<String>,
    /// Method definitions
    pub methods: Vec<Node>,
}

/// Node kinds
#[derive(Debug, Clone)]
pub enum NodeKind {
    // ==================== Literals ====================
    /// Integer literal, typed `int` or `long`
    Fixnum(i64),
    /// Floating literal, typed `float` or `double`
    Float(f64),
    Char(char),
    Str(String),
    Boolean(bool),
    Null,
    /// Regular expression literal, compiled to a `Pattern`
    Regex(String),

    // ==================== References ====================
    /// `self`
    SelfRef,
    /// A class name used as a value (static receiver)
    TypeRef(String),
    /// The binding object of the current frame
    BindingReference,

    // ==================== Control flow ====================
    /// Statement list; the last statement supplies the value
    Body(Vec<Node>),
    If {
        condition: Box<Node>,
        body: Option<Box<Node>>,
        else_body: Option<Box<Node>>,
    },
    Loop(Box<LoopNode>),
    Break,
    Next,
    Redo,
    Return(Option<Box<Node>>),
    Raise(Box<Node>),
    Rescue(Box<RescueNode>),
    Ensure {
        body: Box<Node>,
        clause: Box<Node>,
    },

    // ==================== Calls ====================
    /// `target.name(args)`
    Call {
        target: Box<Node>,
        name: String,
        args: Vec<Node>,
    },
    /// `name(args)` with an implicit receiver
    FunctionalCall { name: String, args: Vec<Node> },
    /// `super(args)` inside method `name`
    Super { name: String, args: Vec<Node> },
    /// Cast of `value` to the node's type
    Cast(Box<Node>),
    /// `print`/`puts`
    Print { println: bool, args: Vec<Node> },

    // ==================== Strings and arrays ====================
    /// Interpolated string
    StringConcat(Vec<Node>),
    /// `#{value}` segment
    StringEval(Box<Node>),
    /// Array literal `[a, b]`
    Array(Vec<Node>),
    /// `T[size]`; the element type is the component of the node's type
    EmptyArray(Box<Node>),

    // ==================== Variables ====================
    LocalDeclaration(String),
    LocalAccess(String),
    LocalAssignment { name: String, value: Box<Node> },
    FieldDeclaration(FieldDef),
    FieldAccess { name: String, is_static: bool },
    FieldAssign {
        name: String,
        value: Box<Node>,
        is_static: bool,
        annotations: Vec<Annotation>,
    },

    // ==================== Definitions ====================
    ClassDefinition(Box<ClassDef>),
    ClosureDefinition(Box<ClosureDef>),
    MethodDefinition(Box<MethodDef>),
    ConstructorDefinition(Box<ConstructorDef>),
    /// Top-level statements of a file
    Script(Vec<Node>),
}

impl NodeKind {
    pub fn describe(&self) -> &'static str {
        match self {
            NodeKind::Fixnum(_) => "Fixnum",
            NodeKind::Float(_) => "Float",
            NodeKind::Char(_) => "Char",
            NodeKind::Str(_) => "String",
            NodeKind::Boolean(_) => "Boolean",
            NodeKind::Null => "Null",
            NodeKind::Regex(_) => "Regex",
            NodeKind::SelfRef => "Self",
            NodeKind::TypeRef(_) => "TypeRef",
            NodeKind::BindingReference => "BindingReference",
            NodeKind::Body(_) => "Body",
            NodeKind::If { .. } => "If",
            NodeKind::Loop(_) => "Loop",
            NodeKind::Break => "Break",
            NodeKind::Next => "Next",
            NodeKind::Redo => "Redo",
            NodeKind::Return(_) => "Return",
            NodeKind::Raise(_) => "Raise",
            NodeKind::Rescue(_) => "Rescue",
            NodeKind::Ensure { .. } => "Ensure",
            NodeKind::Call { .. } => "Call",
            NodeKind::FunctionalCall { .. } => "FunctionalCall",
            NodeKind::Super { .. } => "Super",
            NodeKind::Cast(_) => "Cast",
            NodeKind::Print { .. } => "Print",
            NodeKind::StringConcat(_) => "StringConcat",
            NodeKind::StringEval(_) => "StringEval",
            NodeKind::Array(_) => "Array",
            NodeKind::EmptyArray(_) => "EmptyArray",
            NodeKind::LocalDeclaration(_) => "LocalDeclaration",
            NodeKind::LocalAccess(_) => "LocalAccess",
            NodeKind::LocalAssignment { .. } => "LocalAssignment",
            NodeKind::FieldDeclaration(_) => "FieldDeclaration",
            NodeKind::FieldAccess { .. } => "FieldAccess",
            NodeKind::FieldAssign { .. } => "FieldAssign",
            NodeKind::ClassDefinition(_) => "ClassDefinition",
            NodeKind::ClosureDefinition(_) => "ClosureDefinition",
            NodeKind::MethodDefinition(_) => "MethodDefinition",
            NodeKind::ConstructorDefinition(_) => "ConstructorDefinition",
            NodeKind::Script(_) => "Script",
        }
    }

    /// Definitions are compiled as members, not as statements
    pub fn is_definition(&self) -> bool {
        matches!(
            self,
            NodeKind::ClassDefinition(_)
                | NodeKind::MethodDefinition(_)
                | NodeKind::ConstructorDefinition(_)
                | NodeKind::FieldDeclaration(_)
        )
    }
}
