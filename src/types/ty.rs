// Jvmgen Types
// A resolvable type plus the per-type instruction choices the emitter needs

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use super::primitive::Primitive;
use super::system::TypeSystem;
use crate::bytecode::{ArrayKind, Constant, Instruction, InvokeKind, Kind, MethodBuilder};
use crate::error::{EmitResult, Fault};

/// What sort of type this is
#[derive(Debug, Clone)]
pub enum TypeKind {
    Void,
    Primitive(Primitive),
    /// A class or interface, backed by a `ClassMirror` once complete
    Object,
    Array(Type),
    /// The class object of a type (static member lookups, `Foo.class`)
    Meta(Type),
    /// Type of the `null` literal
    Null,
    /// An ill-typed node that an earlier phase already reported
    Error(Vec<String>),
    /// Dead code
    Unreachable,
    /// A closure literal before it is bound to an interface
    Block,
}

/// Class descriptor: resolved superclass and directly implemented interfaces
#[derive(Debug, Clone)]
pub struct ClassMirror {
    pub superclass: Option<Type>,
    pub interfaces: Vec<Type>,
    pub is_interface: bool,
}

#[derive(Debug)]
struct TypeData {
    name: String,
    kind: TypeKind,
    mirror: OnceLock<ClassMirror>,
    array: OnceLock<Type>,
    meta: OnceLock<Type>,
}

/// A type in the target type system. Cheap to clone; identity is the name
/// plus the meta flag.
#[derive(Clone)]
pub struct Type(Arc<TypeData>);

impl Type {
    pub(crate) fn new(name: impl Into<String>, kind: TypeKind) -> Type {
        Type(Arc::new(TypeData {
            name: name.into(),
            kind,
            mirror: OnceLock::new(),
            array: OnceLock::new(),
            meta: OnceLock::new(),
        }))
    }

    pub(crate) fn with_mirror(name: impl Into<String>, kind: TypeKind, mirror: ClassMirror) -> Type {
        let ty = Type::new(name, kind);
        let _ = ty.0.mirror.set(mirror);
        ty
    }

    /// Complete a forward-declared type. Returns false if it was already complete.
    pub(crate) fn complete(&self, mirror: ClassMirror) -> bool {
        self.0.mirror.set(mirror).is_ok()
    }

    pub(crate) fn memo_array(&self, make: impl FnOnce() -> Type) -> Type {
        self.0.array.get_or_init(make).clone()
    }

    pub(crate) fn memo_meta(&self, make: impl FnOnce() -> Type) -> Type {
        self.0.meta.get_or_init(make).clone()
    }

    // ==================== Classification ====================

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    pub fn mirror(&self) -> Option<&ClassMirror> {
        self.0.mirror.get()
    }

    pub fn is_void(&self) -> bool {
        matches!(self.0.kind, TypeKind::Void)
    }

    pub fn primitive(&self) -> Option<Primitive> {
        match self.0.kind {
            TypeKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        self.primitive().is_some()
    }

    pub fn is_boolean(&self) -> bool {
        self.primitive() == Some(Primitive::Boolean)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.0.kind, TypeKind::Array(_))
    }

    pub fn is_meta(&self) -> bool {
        matches!(self.0.kind, TypeKind::Meta(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self.0.kind, TypeKind::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.0.kind, TypeKind::Error(_))
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self.0.kind, TypeKind::Unreachable)
    }

    pub fn is_block(&self) -> bool {
        matches!(self.0.kind, TypeKind::Block)
    }

    pub fn is_interface(&self) -> bool {
        self.mirror().map(|m| m.is_interface).unwrap_or(false)
    }

    /// Has a class descriptor (or needs none)
    pub fn is_complete(&self) -> bool {
        match self.0.kind {
            TypeKind::Object | TypeKind::Array(_) => self.mirror().is_some(),
            _ => true,
        }
    }

    /// Occupies two machine words
    pub fn is_wide(&self) -> bool {
        self.primitive().map(Primitive::is_wide).unwrap_or(false)
    }

    pub fn error_messages(&self) -> &[String] {
        match &self.0.kind {
            TypeKind::Error(messages) => messages,
            _ => &[],
        }
    }

    pub fn component_type(&self) -> Option<&Type> {
        match &self.0.kind {
            TypeKind::Array(component) => Some(component),
            _ => None,
        }
    }

    pub fn unmeta(&self) -> &Type {
        match &self.0.kind {
            TypeKind::Meta(base) => base,
            _ => self,
        }
    }

    /// Memoized array type, if it has been derived already
    pub fn array_type(&self) -> Option<Type> {
        self.0.array.get().cloned()
    }

    /// Memoized meta type, if it has been derived already
    pub fn meta_type(&self) -> Option<Type> {
        self.0.meta.get().cloned()
    }

    // ==================== Names and descriptors ====================

    /// Slash-separated name used in symbolic references
    pub fn internal_name(&self) -> String {
        match &self.0.kind {
            TypeKind::Array(_) => self.descriptor(),
            TypeKind::Meta(_) => "java/lang/Class".to_string(),
            TypeKind::Null | TypeKind::Error(_) | TypeKind::Unreachable | TypeKind::Block => {
                "java/lang/Object".to_string()
            }
            _ => self.0.name.replace('.', "/"),
        }
    }

    /// Field/method descriptor of this type
    pub fn descriptor(&self) -> String {
        match &self.0.kind {
            TypeKind::Void => "V".to_string(),
            TypeKind::Primitive(p) => p.descriptor().to_string(),
            TypeKind::Array(component) => format!("[{}", component.descriptor()),
            _ => format!("L{};", self.internal_name()),
        }
    }

    /// Operand category on the stack, `None` for void
    pub fn stack_kind(&self) -> Option<Kind> {
        match &self.0.kind {
            TypeKind::Void => None,
            TypeKind::Primitive(p) => Some(Kind::of(*p)),
            _ => Some(Kind::Ref),
        }
    }

    fn expect_stack_kind(&self) -> EmitResult<Kind> {
        self.stack_kind()
            .ok_or_else(|| Fault::Internal(format!("no value of type {}", self)))
    }

    /// Element kind for xaload/xastore on an array of this type
    pub fn array_kind(&self) -> ArrayKind {
        self.primitive().map(ArrayKind::of).unwrap_or(ArrayKind::Ref)
    }

    // ==================== Hierarchy ====================

    fn require_mirror(&self) -> EmitResult<&ClassMirror> {
        self.mirror()
            .ok_or_else(|| Fault::IncompleteType(self.0.name.clone()))
    }

    /// Direct superclass; `None` for Object, interfaces and non-class types
    pub fn superclass(&self) -> EmitResult<Option<Type>> {
        match self.0.kind {
            TypeKind::Object | TypeKind::Array(_) => Ok(self.require_mirror()?.superclass.clone()),
            _ => Ok(None),
        }
    }

    /// Implemented interfaces, optionally including those inherited from the superclass
    pub fn interfaces(&self, include_parent: bool) -> EmitResult<Vec<Type>> {
        match self.0.kind {
            TypeKind::Object | TypeKind::Array(_) => {}
            _ => return Ok(Vec::new()),
        }
        let mirror = self.require_mirror()?;
        let mut interfaces = mirror.interfaces.clone();
        if include_parent {
            if let Some(superclass) = &mirror.superclass {
                for inherited in superclass.interfaces(true)? {
                    if !interfaces.contains(&inherited) {
                        interfaces.push(inherited);
                    }
                }
            }
        }
        Ok(interfaces)
    }

    /// Linearized ancestors (superclass chain interleaved with interfaces),
    /// always terminated by Object. Empty for primitives.
    pub fn ancestors_and_interfaces(&self, types: &TypeSystem) -> Vec<Type> {
        if self.is_primitive() || self.is_void() {
            return Vec::new();
        }
        let object = types.object();
        let parents = |ty: &Type| -> Vec<Type> {
            let mut found: Vec<Type> = ty.superclass().ok().flatten().into_iter().collect();
            found.extend(ty.interfaces(false).unwrap_or_default());
            found
        };

        let mut ancestors: Vec<Type> = Vec::new();
        let mut pending = parents(self);
        while !pending.is_empty() {
            let klass = pending.remove(0);
            if klass == object {
                continue;
            }
            pending.extend(parents(&klass));
            ancestors.push(klass);
        }
        ancestors.push(object);
        ancestors
    }

    /// Can a value of `other` be stored where `self` is expected?
    pub fn assignable_from(&self, other: &Type) -> bool {
        if !self.is_primitive() && other.is_null() {
            return true;
        }
        if other == self {
            return true;
        }
        if other.is_error() || other.is_unreachable() {
            return true;
        }
        if other.is_block() {
            return self.is_interface();
        }
        if self.is_primitive() || other.is_primitive() {
            return false;
        }
        if let (Some(mine), Some(theirs)) = (self.component_type(), other.component_type()) {
            if !mine.is_primitive() && !theirs.is_primitive() {
                return mine.assignable_from(theirs);
            }
        }

        let superclass_ok = other
            .superclass()
            .ok()
            .flatten()
            .map(|s| self.assignable_from(&s))
            .unwrap_or(false);
        superclass_ok
            || other
                .interfaces(false)
                .unwrap_or_default()
                .iter()
                .any(|i| self.assignable_from(i))
    }

    /// Nearest common ancestor of two types, or an error type if there is none
    pub fn widen(&self, other: &Type, types: &TypeSystem) -> Type {
        if other.is_error() {
            return other.clone();
        }
        if self.is_error() || self == other {
            return self.clone();
        }
        if let (Some(a), Some(b)) = (self.primitive(), other.primitive()) {
            if a.is_numeric() && b.is_numeric() {
                return types.primitive(a.promote(b));
            }
        }
        if self.assignable_from(other) {
            return self.clone();
        }
        if other.assignable_from(self) {
            return other.clone();
        }
        let theirs = other.ancestors_and_interfaces(types);
        self.ancestors_and_interfaces(types)
            .into_iter()
            .find(|ancestor| theirs.contains(ancestor))
            .unwrap_or_else(|| types.error(format!("Incompatible types {} and {}.", self, other)))
    }

    // ==================== Emission ====================

    /// Read a local slot
    pub fn load(&self, method: &mut MethodBuilder, slot: u16) -> EmitResult<()> {
        method.emit(Instruction::Load(self.expect_stack_kind()?, slot));
        Ok(())
    }

    /// Write a local slot
    pub fn store(&self, method: &mut MethodBuilder, slot: u16) -> EmitResult<()> {
        method.emit(Instruction::Store(self.expect_stack_kind()?, slot));
        Ok(())
    }

    /// Push the default value (zero, false or null)
    pub fn init_value(&self, method: &mut MethodBuilder) {
        match &self.0.kind {
            TypeKind::Void => {}
            TypeKind::Primitive(p) => match Kind::of(*p) {
                Kind::Long => method.emit(Instruction::Lconst(0)),
                Kind::Float => method.emit(Instruction::Fconst(0.0)),
                Kind::Double => method.emit(Instruction::Dconst(0.0)),
                _ => method.emit(Instruction::Iconst(0)),
            },
            _ => method.emit(Instruction::AconstNull),
        }
    }

    /// Return from the method with a value of this type (or `return` for void)
    pub fn ret(&self, method: &mut MethodBuilder) {
        method.emit(Instruction::Return(self.stack_kind()));
    }

    /// Discard a value of this type
    pub fn pop(&self, method: &mut MethodBuilder) {
        if self.is_void() {
            return;
        }
        if self.is_wide() {
            method.emit(Instruction::Pop2);
        } else {
            method.emit(Instruction::Pop);
        }
    }

    /// Duplicate a value of this type on top of the stack
    pub fn dup(&self, method: &mut MethodBuilder) {
        if self.is_wide() {
            method.emit(Instruction::Dup2);
        } else {
            method.emit(Instruction::Dup);
        }
    }

    pub fn needs_boxing(&self) -> bool {
        self.is_primitive()
    }

    /// Box a primitive on top of the stack into its wrapper class
    pub fn box_value(&self, method: &mut MethodBuilder) {
        if let Some(p) = self.primitive() {
            let wrapper = p.wrapper().replace('.', "/");
            let descriptor = format!("({})L{};", p.descriptor(), wrapper);
            method.emit(Instruction::invoke(InvokeKind::Static, &wrapper, "valueOf", &descriptor));
        }
    }

    /// Allocate an array of this element type; the length is on the stack
    pub fn newarray(&self, method: &mut MethodBuilder) {
        match self.primitive() {
            Some(p) => method.emit(Instruction::NewArray(p)),
            None => method.emit(Instruction::ANewArray(self.internal_name())),
        }
    }

    /// Load an element from an array of this element type
    pub fn array_load(&self, method: &mut MethodBuilder) {
        method.emit(Instruction::ArrayLoad(self.array_kind()));
    }

    /// Store an element into an array of this element type
    pub fn array_store(&self, method: &mut MethodBuilder) {
        method.emit(Instruction::ArrayStore(self.array_kind()));
    }

    /// Push the class object for this type
    pub fn class_literal(&self, method: &mut MethodBuilder) {
        match self.primitive() {
            Some(p) => {
                let wrapper = p.wrapper().replace('.', "/");
                method.emit(Instruction::GetStatic(crate::bytecode::FieldRef {
                    owner: wrapper,
                    name: "TYPE".to_string(),
                    descriptor: "Ljava/lang/Class;".to_string(),
                }));
            }
            None => method.emit(Instruction::Ldc(Constant::Class(self.unmeta().internal_name()))),
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.name == other.0.name && self.is_meta() == other.is_meta())
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
        self.is_meta().hash(state);
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_meta() {
            write!(f, "{}.class", self.0.name)
        } else {
            write!(f, "{}", self.0.name)
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.0.kind {
            TypeKind::Void => "Void",
            TypeKind::Primitive(_) => "Primitive",
            TypeKind::Object => "Type",
            TypeKind::Array(_) => "ArrayType",
            TypeKind::Meta(_) => "MetaType",
            TypeKind::Null => "NullType",
            TypeKind::Error(_) => "ErrorType",
            TypeKind::Unreachable => "UnreachableType",
            TypeKind::Block => "BlockType",
        };
        write!(f, "#<{} {}>", label, self.0.name)
    }
}
