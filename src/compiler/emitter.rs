// Jvmgen Emitter
// Walks the typed tree and emits stack-machine instructions through the method builder

use std::sync::Arc;

use super::jump::JumpScopes;
use super::scope::{ScopeId, ScopeTable};
use super::unit::CompileUnit;
use super::Env;
use crate::ast::{Annotation as NodeAnnotation, Node, NodeKind};
use crate::bytecode::{
    access, ClassBuilder, Cond, Constant, FieldRef, Instruction, InvokeKind, Kind, Label, MethodBuilder,
};
use crate::error::{EmitResult, Fault};
use crate::log::Logger;
use crate::lookup::{CallSite, Method, Target};
use crate::types::{Primitive, Type, TypeSystem};

const OBJECT: &str = "java/lang/Object";
const BUILDER: &str = "java/lang/StringBuilder";

/// How a method frame gets hold of its binding object
#[derive(Debug, Clone)]
pub enum BindingStrategy {
    /// Allocate a fresh binding for every activation
    Construct,
    /// Read it from the `binding` field of the closure receiver. Closures
    /// created where no binding exists carry none.
    FromReceiver { carried: Option<Type> },
}

/// State of the method currently being emitted
#[derive(Debug)]
pub(super) struct Frame {
    pub(super) method: MethodBuilder,
    pub(super) binding: Option<Type>,
    pub(super) binding_slot: Option<u16>,
    pub(super) return_type: Type,
}

/// Emits one class. Nested classes and closures get emitters of their own
/// that share the compile unit.
pub struct Emitter<'u, 'a> {
    pub(super) unit: &'u mut CompileUnit,
    pub(super) env: &'u Env<'u>,
    pub(super) scopes: &'u ScopeTable,
    pub(super) log: Logger,
    pub(super) class: ClassBuilder,
    pub(super) class_type: Type,
    pub(super) static_ctx: bool,
    pub(super) frame: Option<Frame>,
    pub(super) jumps: JumpScopes<'a>,
    pub(super) strategy: BindingStrategy,
}

impl<'u, 'a> Emitter<'u, 'a> {
    pub fn new(
        unit: &'u mut CompileUnit,
        env: &'u Env<'u>,
        scopes: &'u ScopeTable,
        class: ClassBuilder,
        class_type: Type,
        log: Logger,
    ) -> Self {
        Self {
            unit,
            env,
            scopes,
            log,
            class,
            class_type,
            static_ctx: false,
            frame: None,
            jumps: JumpScopes::new(),
            strategy: BindingStrategy::Construct,
        }
    }

    pub fn with_strategy(mut self, strategy: BindingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Hand back the class once every member has been emitted
    pub fn into_class(self) -> ClassBuilder {
        self.class
    }

    pub fn types(&self) -> &'u TypeSystem {
        self.env.types
    }

    pub fn class_type(&self) -> &Type {
        &self.class_type
    }

    /// Builder of the method being emitted
    pub fn method(&mut self) -> EmitResult<&mut MethodBuilder> {
        self.frame
            .as_mut()
            .map(|frame| &mut frame.method)
            .ok_or_else(|| Fault::Internal("no method is being emitted".to_string()))
    }

    pub(super) fn frame(&self) -> EmitResult<&Frame> {
        self.frame
            .as_ref()
            .ok_or_else(|| Fault::Internal("no method is being emitted".to_string()))
    }

    pub fn node_type(&self, node: &Node) -> EmitResult<Type> {
        self.env.oracle.inferred_type(node.id).ok_or_else(|| {
            Fault::Internal(format!("no inferred type for {} node {}", node.describe(), node.id))
        })
    }

    /// Type of `self` here: the class, or its meta type in static code
    pub(super) fn self_type(&self) -> Type {
        if self.static_ctx {
            self.env.types.meta_of(&self.class_type)
        } else {
            self.class_type.clone()
        }
    }

    fn mark_line(&mut self, node: &Node) {
        if !self.env.config.line_numbers {
            return;
        }
        if let (Some(line), Some(frame)) = (node.line(), self.frame.as_mut()) {
            frame.method.line(line);
        }
    }

    // ==================== Dispatch ====================

    /// Emit `node`, leaving its value on the stack only if `want_value`
    pub fn emit(&mut self, node: &'a Node, want_value: bool) -> EmitResult<()> {
        self.mark_line(node);
        self.log
            .trace(format_args!("emit {} #{} (value: {})", node.describe(), node.id, want_value));
        match &node.kind {
            NodeKind::Fixnum(value) => self.compile_fixnum(node, *value, want_value),
            NodeKind::Float(value) => self.compile_float(node, *value, want_value),
            NodeKind::Char(c) => self.push(want_value, Instruction::Iconst(*c as i32)),
            NodeKind::Str(s) => self.push(want_value, Instruction::Ldc(Constant::String(s.clone()))),
            NodeKind::Boolean(b) => self.push(want_value, Instruction::Iconst(i32::from(*b))),
            NodeKind::Null => self.push(want_value, Instruction::AconstNull),
            NodeKind::Regex(pattern) => self.compile_regex(pattern, want_value),

            NodeKind::SelfRef => {
                if want_value {
                    self.emit_self()?;
                }
                Ok(())
            }
            NodeKind::TypeRef(_) => {
                if want_value {
                    let ty = self.node_type(node)?;
                    ty.unmeta().class_literal(self.method()?);
                }
                Ok(())
            }
            NodeKind::BindingReference => {
                if want_value {
                    self.load_binding()?;
                }
                Ok(())
            }

            NodeKind::Body(nodes) => self.compile_body(nodes, want_value),
            NodeKind::If {
                condition,
                body,
                else_body,
            } => self.compile_if(node, condition, body.as_deref(), else_body.as_deref(), want_value),
            NodeKind::Loop(parts) => self.compile_loop(parts, want_value),
            NodeKind::Break => self.compile_loop_jump(node, super::control::LoopJump::Break),
            NodeKind::Next => self.compile_loop_jump(node, super::control::LoopJump::Next),
            NodeKind::Redo => self.compile_loop_jump(node, super::control::LoopJump::Redo),
            NodeKind::Return(value) => self.compile_return(node, value.as_deref()),
            NodeKind::Raise(value) => self.compile_raise(value),
            NodeKind::Rescue(rescue) => self.compile_rescue(node, rescue, want_value),
            NodeKind::Ensure { body, clause } => self.compile_ensure(node, body, clause, want_value),

            NodeKind::Call { .. } | NodeKind::FunctionalCall { .. } => {
                let (member, site) = self.resolve_call(node)?;
                member.call(self, &site, want_value)
            }
            NodeKind::Super { name, args } => self.compile_super(node, name, args, want_value),
            NodeKind::Cast(value) => self.compile_cast(node, value, want_value),
            NodeKind::Print { println, args } => self.compile_print(*println, args, want_value),

            NodeKind::StringConcat(parts) => self.compile_string_concat(parts, want_value),
            NodeKind::StringEval(value) => self.compile_string_eval(value, want_value),
            NodeKind::Array(elements) => self.compile_array(elements, want_value),
            NodeKind::EmptyArray(size) => self.compile_empty_array(node, size, want_value),

            NodeKind::LocalDeclaration(name) | NodeKind::LocalAccess(name) => {
                self.compile_local_access(node, name, want_value)
            }
            NodeKind::LocalAssignment { name, value } => self.compile_local_assign(node, name, value, want_value),
            NodeKind::FieldDeclaration(_) => Ok(()),
            NodeKind::FieldAccess { name, is_static } => {
                self.compile_field_access(node, name, *is_static, want_value)
            }
            NodeKind::FieldAssign {
                name,
                value,
                is_static,
                annotations,
            } => self.compile_field_assign(name, value, *is_static, annotations, want_value),

            NodeKind::ClassDefinition(def) => {
                self.compile_class(node, def)?;
                self.push(want_value, Instruction::AconstNull)
            }
            NodeKind::MethodDefinition(def) => {
                let force_static = self.static_ctx;
                self.compile_method(node, def, force_static)?;
                self.push(want_value, Instruction::AconstNull)
            }
            NodeKind::ConstructorDefinition(def) => {
                self.compile_constructor(node, def)?;
                self.push(want_value, Instruction::AconstNull)
            }
            NodeKind::ClosureDefinition(def) => self.compile_closure(node, def, want_value),
            NodeKind::Script(_) => Err(Fault::Unsupported("nested script")),
        }
    }

    /// Emit `node` and convert its value to `target`
    pub fn emit_as(&mut self, node: &'a Node, target: &Type) -> EmitResult<()> {
        let ty = self.node_type(node)?;
        self.emit(node, true)?;
        if !self.method()?.reachable() {
            return Ok(());
        }
        self.convert(&ty, target)
    }

    /// Push the receiver of the current method; static code pushes the class
    pub fn emit_self(&mut self) -> EmitResult<()> {
        if self.static_ctx {
            let ty = self.class_type.clone();
            ty.class_literal(self.method()?);
        } else {
            self.method()?.emit(Instruction::Load(Kind::Ref, 0));
        }
        Ok(())
    }

    fn push(&mut self, want_value: bool, instruction: Instruction) -> EmitResult<()> {
        if want_value {
            self.method()?.emit(instruction);
        }
        Ok(())
    }

    // ==================== Branches ====================

    /// Jump to `target` if the boolean `node` is true
    pub fn jump_if(&mut self, node: &'a Node, target: Label) -> EmitResult<()> {
        self.branch(node, target, true)
    }

    /// Jump to `target` if the boolean `node` is false
    pub fn jump_if_not(&mut self, node: &'a Node, target: Label) -> EmitResult<()> {
        self.branch(node, target, false)
    }

    fn branch(&mut self, node: &'a Node, target: Label, when: bool) -> EmitResult<()> {
        let ty = self.node_type(node)?;
        if !ty.is_boolean() {
            return Err(Fault::NonBooleanPredicate {
                found: ty.to_string(),
            });
        }
        self.mark_line(node);
        match &node.kind {
            NodeKind::Boolean(value) => {
                if *value == when {
                    self.method()?.goto(target);
                }
                return Ok(());
            }
            NodeKind::Call { .. } | NodeKind::FunctionalCall { .. } => {
                let (member, site) = self.resolve_call(node)?;
                if member.branches() {
                    return if when {
                        member.jump_if(self, &site, target)
                    } else {
                        member.jump_if_not(self, &site, target)
                    };
                }
                member.call(self, &site, true)?;
            }
            _ => self.emit(node, true)?,
        }
        let cond = if when { Cond::Ne } else { Cond::Eq };
        self.method()?.emit(Instruction::If(cond, target));
        Ok(())
    }

    // ==================== Literals ====================

    fn compile_fixnum(&mut self, node: &Node, value: i64, want_value: bool) -> EmitResult<()> {
        if !want_value {
            return Ok(());
        }
        let instruction = match self.node_type(node)?.primitive() {
            Some(Primitive::Long) => Instruction::Lconst(value),
            Some(Primitive::Float) => Instruction::Fconst(value as f32),
            Some(Primitive::Double) => Instruction::Dconst(value as f64),
            _ => Instruction::Iconst(value as i32),
        };
        self.method()?.emit(instruction);
        Ok(())
    }

    fn compile_float(&mut self, node: &Node, value: f64, want_value: bool) -> EmitResult<()> {
        if !want_value {
            return Ok(());
        }
        let instruction = match self.node_type(node)?.primitive() {
            Some(Primitive::Float) => Instruction::Fconst(value as f32),
            _ => Instruction::Dconst(value),
        };
        self.method()?.emit(instruction);
        Ok(())
    }

    fn compile_regex(&mut self, pattern: &str, want_value: bool) -> EmitResult<()> {
        if !want_value {
            return Ok(());
        }
        let method = self.method()?;
        method.emit(Instruction::Ldc(Constant::String(pattern.to_string())));
        method.emit(Instruction::invoke(
            InvokeKind::Static,
            "java/util/regex/Pattern",
            "compile",
            "(Ljava/lang/String;)Ljava/util/regex/Pattern;",
        ));
        Ok(())
    }

    fn compile_body(&mut self, nodes: &'a [Node], want_value: bool) -> EmitResult<()> {
        let Some((last, init)) = nodes.split_last() else {
            return self.push(want_value, Instruction::AconstNull);
        };
        for statement in init {
            self.emit(statement, false)?;
        }
        self.emit(last, want_value)
    }

    // ==================== Calls ====================

    /// Resolve the member a `Call` or `FunctionalCall` node invokes
    pub(super) fn resolve_call(&self, node: &'a Node) -> EmitResult<(Arc<dyn Method>, CallSite<'a>)> {
        let (receiver, name, args, target) = match &node.kind {
            NodeKind::Call { target, name, args } => {
                let target: &'a Node = target;
                (self.node_type(target)?, name, args, Target::Expr(target))
            }
            NodeKind::FunctionalCall { name, args } => (self.self_type(), name, args, Target::ImplicitSelf),
            _ => return Err(Fault::Internal(format!("{} is not a call", node.describe()))),
        };
        let member = self.lookup(&receiver, name, args)?;
        Ok((member, CallSite { target, args, node }))
    }

    pub(super) fn lookup(&self, receiver: &Type, name: &str, args: &[Node]) -> EmitResult<Arc<dyn Method>> {
        let arg_types = args
            .iter()
            .map(|arg| self.node_type(arg))
            .collect::<EmitResult<Vec<_>>>()?;
        self.env
            .methods
            .resolve(receiver, name, &arg_types)
            .ok_or_else(|| Fault::MissingMethod {
                receiver: receiver.to_string(),
                name: name.to_string(),
                args: arg_types.iter().map(Type::to_string).collect(),
            })
    }

    fn compile_super(&mut self, node: &'a Node, name: &str, args: &'a [Node], want_value: bool) -> EmitResult<()> {
        let superclass = self
            .class_type
            .superclass()?
            .ok_or_else(|| Fault::Internal(format!("{} has no superclass", self.class_type)))?;
        let member = self.lookup(&superclass, name, args)?;
        let site = CallSite {
            target: Target::ImplicitSelf,
            args,
            node,
        };
        member.call_special(self, &site, want_value)
    }

    fn compile_print(&mut self, println: bool, args: &'a [Node], want_value: bool) -> EmitResult<()> {
        let out = FieldRef {
            owner: "java/lang/System".to_string(),
            name: "out".to_string(),
            descriptor: "Ljava/io/PrintStream;".to_string(),
        };
        if args.is_empty() && println {
            let method = self.method()?;
            method.emit(Instruction::GetStatic(out.clone()));
            method.emit(Instruction::invoke(InvokeKind::Virtual, "java/io/PrintStream", "println", "()V"));
        }
        for (i, arg) in args.iter().enumerate() {
            let name = if println && i + 1 == args.len() { "println" } else { "print" };
            let param = self.print_param(&self.node_type(arg)?);
            self.method()?.emit(Instruction::GetStatic(out.clone()));
            self.emit_as(arg, &param)?;
            let descriptor = format!("({})V", param.descriptor());
            self.method()?
                .emit(Instruction::invoke(InvokeKind::Virtual, "java/io/PrintStream", name, &descriptor));
        }
        self.push(want_value, Instruction::AconstNull)
    }

    /// PrintStream overload for a value of type `ty`
    fn print_param(&self, ty: &Type) -> Type {
        let types = self.env.types;
        match ty.primitive() {
            Some(Primitive::Byte) | Some(Primitive::Short) => types.primitive(Primitive::Int),
            Some(p) => types.primitive(p),
            None if *ty == types.string() => types.string(),
            None => types.object(),
        }
    }

    // ==================== Casts and conversions ====================

    fn compile_cast(&mut self, node: &'a Node, value: &'a Node, want_value: bool) -> EmitResult<()> {
        let to = self.node_type(node)?;
        let from = self.node_type(value)?;
        check_cast(&from, &to)?;
        self.emit(value, true)?;
        let method = self.method()?;
        match (from.primitive(), to.primitive()) {
            (Some(a), Some(b)) => convert_primitive(method, a, b),
            _ => {
                if from != to && !from.is_null() {
                    method.emit(Instruction::Checkcast(to.internal_name()));
                }
            }
        }
        if !want_value {
            to.pop(method);
        }
        Ok(())
    }

    /// Convert the value on top of the stack from `from` to `to`: numeric
    /// widening, boxing, unboxing or a reference check
    pub(super) fn convert(&mut self, from: &Type, to: &Type) -> EmitResult<()> {
        if from == to
            || to.is_void()
            || from.is_void()
            || from.is_unreachable()
            || from.is_error()
            || to.is_error()
        {
            return Ok(());
        }
        let method = self.method()?;
        match (from.primitive(), to.primitive()) {
            (Some(a), Some(b)) => convert_primitive(method, a, b),
            (Some(_), None) => from.box_value(method),
            (None, Some(p)) => {
                if from.is_null() {
                    return Err(Fault::IncompatibleCast(format!("Cannot convert null to {}", to)));
                }
                let wrapper = p.wrapper().replace('.', "/");
                if from.internal_name() != wrapper {
                    method.emit(Instruction::Checkcast(wrapper.clone()));
                }
                let name = format!("{}Value", p.name());
                let descriptor = format!("(){}", p.descriptor());
                method.emit(Instruction::invoke(InvokeKind::Virtual, &wrapper, &name, &descriptor));
            }
            (None, None) => {
                if !from.is_null() && !to.assignable_from(from) {
                    method.emit(Instruction::Checkcast(to.internal_name()));
                }
            }
        }
        Ok(())
    }

    // ==================== Strings and arrays ====================

    fn compile_string_concat(&mut self, parts: &'a [Node], want_value: bool) -> EmitResult<()> {
        if !want_value {
            for part in parts {
                self.emit(part, false)?;
            }
            return Ok(());
        }
        let string = self.env.types.string();
        let method = self.method()?;
        method.emit(Instruction::New(BUILDER.to_string()));
        method.emit(Instruction::Dup);
        method.emit(Instruction::invoke(InvokeKind::Special, BUILDER, "<init>", "()V"));
        for part in parts {
            let ty = self.node_type(part)?;
            self.emit(part, true)?;
            let method = self.method()?;
            let descriptor = if ty == string {
                "(Ljava/lang/String;)Ljava/lang/StringBuilder;"
            } else {
                ty.box_value(method);
                "(Ljava/lang/Object;)Ljava/lang/StringBuilder;"
            };
            method.emit(Instruction::invoke(InvokeKind::Virtual, BUILDER, "append", descriptor));
        }
        self.method()?
            .emit(Instruction::invoke(InvokeKind::Virtual, BUILDER, "toString", "()Ljava/lang/String;"));
        Ok(())
    }

    /// String form of any value; `null` becomes "null"
    fn compile_string_eval(&mut self, value: &'a Node, want_value: bool) -> EmitResult<()> {
        if !want_value {
            return self.emit(value, false);
        }
        let ty = self.node_type(value)?;
        self.emit(value, true)?;
        let method = self.method()?;
        ty.box_value(method);
        let not_null = method.label();
        let done = method.label();
        method.emit(Instruction::Dup);
        method.emit(Instruction::IfNonNull(not_null));
        method.emit(Instruction::Pop);
        method.emit(Instruction::Ldc(Constant::String("null".to_string())));
        method.goto(done);
        method.set(not_null);
        method.emit(Instruction::invoke(InvokeKind::Virtual, OBJECT, "toString", "()Ljava/lang/String;"));
        method.set(done);
        Ok(())
    }

    /// `[a, b]`: an unmodifiable list of boxed elements
    fn compile_array(&mut self, elements: &'a [Node], want_value: bool) -> EmitResult<()> {
        if !want_value {
            for element in elements {
                let ty = self.node_type(element)?;
                self.emit(element, true)?;
                let method = self.method()?;
                ty.box_value(method);
                ty.pop(method);
            }
            return Ok(());
        }
        let method = self.method()?;
        method.emit(Instruction::New("java/util/ArrayList".to_string()));
        method.emit(Instruction::Dup);
        method.emit(Instruction::Iconst(elements.len() as i32));
        method.emit(Instruction::invoke(InvokeKind::Special, "java/util/ArrayList", "<init>", "(I)V"));
        for element in elements {
            let ty = self.node_type(element)?;
            self.method()?.emit(Instruction::Dup);
            self.emit(element, true)?;
            let method = self.method()?;
            ty.box_value(method);
            method.emit(Instruction::invoke(InvokeKind::Interface, "java/util/List", "add", "(Ljava/lang/Object;)Z"));
            method.emit(Instruction::Pop);
        }
        self.method()?.emit(Instruction::invoke(
            InvokeKind::Static,
            "java/util/Collections",
            "unmodifiableList",
            "(Ljava/util/List;)Ljava/util/List;",
        ));
        Ok(())
    }

    fn compile_empty_array(&mut self, node: &'a Node, size: &'a Node, want_value: bool) -> EmitResult<()> {
        let ty = self.node_type(node)?;
        let component = ty
            .component_type()
            .cloned()
            .ok_or_else(|| Fault::Internal(format!("{} is not an array type", ty)))?;
        let int = self.env.types.primitive(Primitive::Int);
        self.emit_as(size, &int)?;
        let method = self.method()?;
        component.newarray(method);
        if !want_value {
            method.emit(Instruction::Pop);
        }
        Ok(())
    }

    // ==================== Locals ====================

    /// Defining scope, declared type and capture flag of a local reference
    fn local_info(&self, node: &Node, name: &str) -> EmitResult<(ScopeId, Type, bool)> {
        let scope = self
            .scopes
            .defining_scope(node.id)
            .ok_or_else(|| Fault::Internal(format!("local {} was never scoped", name)))?;
        let ty = match scope.local_type(name) {
            Some(ty) => ty.clone(),
            None => self.node_type(node)?,
        };
        Ok((scope.id, ty, scope.is_captured(name)))
    }

    /// Slot of an uncaptured local, allocated on first use
    pub(super) fn local_slot(&mut self, scope: ScopeId, name: &str, ty: &Type) -> EmitResult<u16> {
        let slot_name = self.scopes.scoped_local_name(scope, name);
        Ok(self.method()?.local(&slot_name, ty))
    }

    /// Push the frame's binding object
    pub(super) fn load_binding(&mut self) -> EmitResult<Type> {
        let frame = self
            .frame
            .as_mut()
            .ok_or_else(|| Fault::Internal("no method is being emitted".to_string()))?;
        match (&frame.binding, frame.binding_slot) {
            (Some(binding), Some(slot)) => {
                frame.method.emit(Instruction::Load(Kind::Ref, slot));
                Ok(binding.clone())
            }
            _ => Err(Fault::Internal("captured local without a binding".to_string())),
        }
    }

    /// Field of `binding` holding the captured local `name`
    pub(super) fn capture_ref(&mut self, binding: &Type, name: &str, ty: &Type) -> FieldRef {
        let field_type = self.unit.binding_field(binding, name, ty);
        FieldRef {
            owner: binding.internal_name(),
            name: name.to_string(),
            descriptor: field_type.descriptor(),
        }
    }

    fn compile_local_access(&mut self, node: &'a Node, name: &str, want_value: bool) -> EmitResult<()> {
        if !want_value {
            return Ok(());
        }
        let (scope, ty, captured) = self.local_info(node, name)?;
        if captured {
            let binding = self.load_binding()?;
            let field = self.capture_ref(&binding, name, &ty);
            self.method()?.emit(Instruction::GetField(field));
            Ok(())
        } else {
            let slot = self.local_slot(scope, name, &ty)?;
            ty.load(self.method()?, slot)
        }
    }

    fn compile_local_assign(&mut self, node: &'a Node, name: &str, value: &'a Node, want_value: bool) -> EmitResult<()> {
        let (scope, ty, captured) = self.local_info(node, name)?;
        if captured {
            let binding = self.load_binding()?;
            let field = self.capture_ref(&binding, name, &ty);
            self.emit_as(value, &ty)?;
            let method = self.method()?;
            if want_value {
                method.emit(if ty.is_wide() { Instruction::Dup2X1 } else { Instruction::DupX1 });
            }
            method.emit(Instruction::PutField(field));
            Ok(())
        } else {
            let slot = self.local_slot(scope, name, &ty)?;
            self.emit_as(value, &ty)?;
            let method = self.method()?;
            if want_value {
                ty.dup(method);
            }
            ty.store(method, slot)
        }
    }

    // ==================== Fields ====================

    /// Declare a field of the current class once; later declarations keep
    /// the first type
    pub(super) fn declare_field(
        &mut self,
        name: &str,
        ty: &Type,
        flags: u16,
        annotations: &[NodeAnnotation],
    ) -> EmitResult<Type> {
        let (declared, fresh) = self.unit.declare_field(self.class.name(), name, ty);
        if fresh && !self.class.has_field(name) {
            let mut field = crate::bytecode::FieldInfo::new(name, &declared, flags);
            for annotation in annotations {
                field.annotate(self.annotation(annotation));
            }
            self.log
                .debug(format_args!("field {}.{} : {}", self.class.name(), name, declared));
            self.class.add_field(field);
        }
        Ok(declared)
    }

    fn field_ref(&self, name: &str, ty: &Type) -> FieldRef {
        FieldRef {
            owner: self.class.name().to_string(),
            name: name.to_string(),
            descriptor: ty.descriptor(),
        }
    }

    fn compile_field_access(&mut self, node: &'a Node, name: &str, is_static: bool, want_value: bool) -> EmitResult<()> {
        let is_static = is_static || self.static_ctx;
        let ty = self.node_type(node)?;
        let ty = self.declare_field(name, &ty, field_flags(is_static), &[])?;
        if !want_value {
            return Ok(());
        }
        let field = self.field_ref(name, &ty);
        if is_static {
            self.method()?.emit(Instruction::GetStatic(field));
        } else {
            self.emit_self()?;
            self.method()?.emit(Instruction::GetField(field));
        }
        Ok(())
    }

    fn compile_field_assign(
        &mut self,
        name: &str,
        value: &'a Node,
        is_static: bool,
        annotations: &[NodeAnnotation],
        want_value: bool,
    ) -> EmitResult<()> {
        let is_static = is_static || self.static_ctx;
        let value_type = self.node_type(value)?;
        let ty = self.declare_field(name, &value_type, field_flags(is_static), annotations)?;
        let field = self.field_ref(name, &ty);
        if is_static {
            self.emit_as(value, &ty)?;
            let method = self.method()?;
            if want_value {
                ty.dup(method);
            }
            method.emit(Instruction::PutStatic(field));
        } else {
            self.emit_self()?;
            self.emit_as(value, &ty)?;
            let method = self.method()?;
            if want_value {
                method.emit(if ty.is_wide() { Instruction::Dup2X1 } else { Instruction::DupX1 });
            }
            method.emit(Instruction::PutField(field));
        }
        Ok(())
    }
}

fn field_flags(is_static: bool) -> u16 {
    if is_static {
        access::PRIVATE | access::STATIC
    } else {
        access::PRIVATE
    }
}


/// Boolean only casts to boolean, and primitives never cast to references
/// (or back) without boxing
fn check_cast(from: &Type, to: &Type) -> EmitResult<()> {
    if from.is_error() || from.is_unreachable() || to.is_error() {
        return Ok(());
    }
    let mixed = from.is_primitive() != to.is_primitive();
    let boolean_mismatch = from.is_primitive() && to.is_primitive() && from.is_boolean() != to.is_boolean();
    if mixed || boolean_mismatch {
        return Err(Fault::IncompatibleCast(format!("Cannot cast {} to {}", from, to)));
    }
    Ok(())
}

/// Primitive conversion on top of the stack. Byte, short and char targets
/// narrow through int; identical types emit nothing.
pub(super) fn convert_primitive(method: &mut MethodBuilder, from: Primitive, to: Primitive) {
    if from == to {
        return;
    }
    let source = match from {
        Primitive::Boolean => Primitive::Int,
        other => other.stack_type(),
    };
    match to {
        Primitive::Boolean => {}
        Primitive::Byte | Primitive::Short | Primitive::Char => {
            if source != Primitive::Int {
                method.emit(Instruction::Convert(source, Primitive::Int));
            }
            method.emit(Instruction::Convert(Primitive::Int, to));
        }
        _ => {
            if source != to {
                method.emit(Instruction::Convert(source, to));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;
    use crate::compiler::{compile_script, CompiledUnit};
    use crate::config::CompilerConfig;
    use crate::lookup::MethodTable;
    use crate::types::TypeSystem;
    use pretty_assertions::assert_eq;

    fn compile(types: &TypeSystem, build: impl FnOnce(&mut AstBuilder<'_>) -> Node) -> CompiledUnit {
        crate::test_utils::init_test_logging();
        let mut b = AstBuilder::new(types);
        let script = build(&mut b);
        let map = b.finish();
        let table = MethodTable::new(types).unwrap();
        let config = CompilerConfig::default();
        let env = Env {
            types,
            oracle: &map,
            methods: &table,
            config: &config,
        };
        compile_script(&env, "demo.mirah", &script).unwrap()
    }

    /// Names of the binding fields `main` reads or writes
    fn binding_traffic(unit: &CompiledUnit) -> Vec<String> {
        let main = unit.main_class().unwrap().method("main", "([Ljava/lang/String;)V").unwrap();
        main.code
            .iter()
            .filter_map(|insn| match insn {
                Instruction::GetField(field) | Instruction::PutField(field) if field.owner.starts_with("Demo$Binding") => {
                    Some(field.name.clone())
                }
                _ => None,
            })
            .collect()
    }

    fn conversions(from: Primitive, to: Primitive) -> Vec<Instruction> {
        let mut method = MethodBuilder::new("c", "()V", access::STATIC);
        convert_primitive(&mut method, from, to);
        method.stop().unwrap().code
    }

    #[test]
    fn test_identical_primitives_convert_to_nothing() {
        for p in Primitive::ALL {
            assert_eq!(conversions(p, p), Vec::<Instruction>::new());
        }
    }

    #[test]
    fn test_narrowing_goes_through_int() {
        assert_eq!(
            conversions(Primitive::Long, Primitive::Byte),
            vec![
                Instruction::Convert(Primitive::Long, Primitive::Int),
                Instruction::Convert(Primitive::Int, Primitive::Byte)
            ]
        );
        assert_eq!(
            conversions(Primitive::Int, Primitive::Char),
            vec![Instruction::Convert(Primitive::Int, Primitive::Char)]
        );
        assert_eq!(conversions(Primitive::Char, Primitive::Int), Vec::<Instruction>::new());
        assert_eq!(
            conversions(Primitive::Int, Primitive::Double),
            vec![Instruction::Convert(Primitive::Int, Primitive::Double)]
        );
    }

    #[test]
    fn test_cast_validation() {
        let types = TypeSystem::new();
        let boolean = types.primitive(Primitive::Boolean);
        let int = types.primitive(Primitive::Int);
        let string = types.string();
        assert!(check_cast(&boolean, &boolean).is_ok());
        assert!(check_cast(&int, &types.primitive(Primitive::Short)).is_ok());
        assert!(matches!(check_cast(&boolean, &int), Err(Fault::IncompatibleCast(_))));
        assert!(matches!(check_cast(&int, &string), Err(Fault::IncompatibleCast(_))));
        assert!(check_cast(&types.object(), &string).is_ok());
    }

    #[test]
    fn test_capture_free_locals_live_in_slots() {
        let types = TypeSystem::new();
        let unit = compile(&types, |b| {
            let one = b.int(1);
            let init = b.assign("x", one);
            let int = b.prim(Primitive::Int);
            let x = b.local("x", int);
            let show = b.puts(vec![x]);
            b.script(vec![init, show])
        });
        assert_eq!(binding_traffic(&unit), Vec::<String>::new());
        assert_eq!(unit.classes().len(), 1);
        let main = unit.main_class().unwrap().method("main", "([Ljava/lang/String;)V").unwrap();
        assert!(main.code.iter().any(|insn| matches!(insn, Instruction::Store(Kind::Int, _))));
    }

    #[test]
    fn test_only_captured_locals_go_through_the_binding() {
        // x = 1; y = 2; r = Runnable { puts y }; puts x
        let types = TypeSystem::new();
        let unit = compile(&types, |b| {
            let int = b.prim(Primitive::Int);
            let void = b.types().void();
            let one = b.int(1);
            let init_x = b.assign("x", one);
            let two = b.int(2);
            let init_y = b.assign("y", two);
            let y = b.local("y", int.clone());
            let body = b.puts(vec![y]);
            let run = b.method("run", Vec::new(), void, Some(body));
            let closure = b.closure("Demo$Closure1", &["java.lang.Runnable"], vec![run]);
            let keep = b.assign("r", closure);
            let x = b.local("x", int);
            let show = b.puts(vec![x]);
            b.script(vec![init_x, init_y, keep, show])
        });
        assert_eq!(binding_traffic(&unit), vec!["y".to_string()]);
    }
}
