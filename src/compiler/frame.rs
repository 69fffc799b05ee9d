// Jvmgen Method Frames
// Builds one method: parameters, local initialization, the binding object,
// constructor prologues and the final return

use super::emitter::{BindingStrategy, Emitter, Frame};
use super::jump::{JumpScope, JumpScopes};
use super::scope::ScopeId;
use crate::ast::{Delegation, Node};
use crate::bytecode::{access, Annotation, FieldRef, Instruction, InvokeKind, Kind, MethodBuilder, MethodRef};
use crate::error::{EmitResult, Fault};
use crate::lookup::{emit_args, CallSite, Target};
use crate::types::Type;

const OBJECT: &str = "java/lang/Object";

/// Code run before a constructor body
#[derive(Debug, Clone, Copy)]
pub(super) enum Prologue<'a> {
    None,
    /// Explicit `super(...)` or `initialize(...)`; the node is the constructor
    Delegate(&'a Delegation, &'a Node),
    /// Implicit no-argument superclass constructor
    SuperInit,
}

/// What the method does after its prologue
#[derive(Debug, Clone)]
pub(super) enum FrameBody<'a> {
    Node(Option<&'a Node>),
    /// Script and static initializer statements, values discarded
    Statements(Vec<&'a Node>),
    /// Overload of a method with optional arguments: pass every parameter
    /// on, fill the next one with its default and call `next`
    Forward {
        default: &'a Node,
        next: MethodRef,
        invoke: InvokeKind,
        next_args: Vec<Type>,
    },
}

#[derive(Debug, Clone)]
pub(super) struct MethodSpec<'a> {
    pub(super) name: String,
    pub(super) access: u16,
    pub(super) params: Vec<(String, Type)>,
    pub(super) return_type: Type,
    pub(super) scope: Option<ScopeId>,
    pub(super) body: FrameBody<'a>,
    pub(super) prologue: Prologue<'a>,
    /// Internal names
    pub(super) throws: Vec<String>,
    pub(super) annotations: Vec<Annotation>,
}

impl<'a> MethodSpec<'a> {
    pub(super) fn new(name: impl Into<String>, access: u16, return_type: Type, body: FrameBody<'a>) -> Self {
        Self {
            name: name.into(),
            access,
            params: Vec::new(),
            return_type,
            scope: None,
            body,
            prologue: Prologue::None,
            throws: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub(super) fn descriptor(&self) -> String {
        descriptor(self.params.iter().map(|(_, ty)| ty), &self.return_type)
    }

    fn is_param(&self, name: &str) -> bool {
        self.params.iter().any(|(param, _)| param == name)
    }
}

pub(super) fn descriptor<'t>(params: impl Iterator<Item = &'t Type>, ret: &Type) -> String {
    let args: String = params.map(Type::descriptor).collect();
    format!("({}){}", args, ret.descriptor())
}

impl<'u, 'a> Emitter<'u, 'a> {
    /// Emit a whole method into the current class. The enclosing frame, if
    /// any, is suspended and restored afterwards.
    pub(super) fn method_body(&mut self, spec: MethodSpec<'a>) -> EmitResult<()> {
        let descriptor = spec.descriptor();
        let mut method = MethodBuilder::new(spec.name.as_str(), descriptor.as_str(), spec.access);
        for class in &spec.throws {
            method.throws(class.clone());
        }
        for annotation in &spec.annotations {
            method.annotate(annotation.clone());
        }
        if spec.access & access::ABSTRACT != 0 {
            self.log
                .debug(format_args!("abstract {}.{}{}", self.class.name(), spec.name, descriptor));
            self.class.add_method(method.stop()?);
            return Ok(());
        }
        for (name, ty) in &spec.params {
            method.local(name, ty);
        }

        let scopes = self.scopes;
        let binding = spec.scope.and_then(|scope| scopes.binding_type(scope).cloned());
        let frame = Frame {
            method,
            binding,
            binding_slot: None,
            return_type: spec.return_type.clone(),
        };
        let saved_frame = self.frame.replace(frame);
        let saved_static = std::mem::replace(&mut self.static_ctx, spec.access & access::STATIC != 0);
        let saved_jumps = std::mem::replace(&mut self.jumps, JumpScopes::new());
        self.jumps.push(JumpScope::Method);

        let result = self.emit_frame(&spec);

        let frame = std::mem::replace(&mut self.frame, saved_frame);
        self.static_ctx = saved_static;
        self.jumps = saved_jumps;
        result?;

        let frame = frame.ok_or_else(|| Fault::Internal("method frame disappeared".to_string()))?;
        let info = frame.method.stop()?;
        self.log.debug(format_args!(
            "method {}.{}{} ({} instructions)",
            self.class.name(),
            info.name,
            info.descriptor,
            info.code.len()
        ));
        self.class.add_method(info);
        Ok(())
    }

    fn emit_frame(&mut self, spec: &MethodSpec<'a>) -> EmitResult<()> {
        self.declare_locals(spec)?;
        self.prepare_binding(spec)?;
        self.emit_prologue(spec.prologue)?;

        match &spec.body {
            FrameBody::Node(Some(body)) if spec.return_type.is_void() => self.emit(*body, false)?,
            FrameBody::Node(Some(body)) => self.emit_as(*body, &spec.return_type)?,
            FrameBody::Node(None) => spec.return_type.init_value(self.method()?),
            FrameBody::Statements(statements) => {
                for statement in statements {
                    self.emit(*statement, false)?;
                }
            }
            FrameBody::Forward {
                default,
                next,
                invoke,
                next_args,
            } => self.emit_forward(spec, *default, next, *invoke, next_args)?,
        }

        let method = self.method()?;
        if method.reachable() {
            spec.return_type.ret(method);
        }
        Ok(())
    }

    /// Give every plain local its initial value so each slot is assigned
    /// before any read
    fn declare_locals(&mut self, spec: &MethodSpec<'a>) -> EmitResult<()> {
        let Some(scope) = spec.scope else {
            return Ok(());
        };
        let scopes = self.scopes;
        let scope = scopes.scope(scope);
        for name in scope.locals() {
            if spec.is_param(name) || scope.is_captured(name) {
                continue;
            }
            let Some(ty) = scope.local_type(name) else {
                continue;
            };
            if ty.stack_kind().is_none() {
                continue;
            }
            let slot = self.local_slot(scope.id, name, ty)?;
            let method = self.method()?;
            ty.init_value(method);
            ty.store(method, slot)?;
        }
        Ok(())
    }

    /// Put the binding object in a local and move captured parameters into it
    fn prepare_binding(&mut self, spec: &MethodSpec<'a>) -> EmitResult<()> {
        let Some(binding) = self.frame()?.binding.clone() else {
            return Ok(());
        };
        match self.strategy.clone() {
            BindingStrategy::Construct => {
                self.unit.declare_binding(&binding);
                let class = binding.internal_name();
                self.class.inner_class(class.clone());
                let method = self.method()?;
                method.emit(Instruction::New(class.clone()));
                method.emit(Instruction::Dup);
                method.emit(Instruction::invoke(InvokeKind::Special, &class, "<init>", "()V"));
            }
            BindingStrategy::FromReceiver { carried: Some(carried) } => {
                let field = FieldRef {
                    owner: self.class_type.internal_name(),
                    name: "binding".to_string(),
                    descriptor: carried.descriptor(),
                };
                let method = self.method()?;
                method.emit(Instruction::Load(Kind::Ref, 0));
                method.emit(Instruction::GetField(field));
            }
            BindingStrategy::FromReceiver { carried: None } => {
                self.log
                    .warn(format_args!("closure {} has no binding to read", self.class_type));
                if let Some(frame) = self.frame.as_mut() {
                    frame.binding = None;
                }
                return Ok(());
            }
        }

        let method = self.method()?;
        let slot = method.temp_local(&binding);
        method.emit(Instruction::Store(Kind::Ref, slot));
        if let Some(frame) = self.frame.as_mut() {
            frame.binding_slot = Some(slot);
        }

        let Some(scope) = spec.scope else {
            return Ok(());
        };
        let scopes = self.scopes;
        let scope = scopes.scope(scope);
        for (name, ty) in &spec.params {
            if !scope.is_captured(name) {
                continue;
            }
            let field = self.capture_ref(&binding, name, ty);
            let method = self.method()?;
            let param = method.local(name, ty);
            method.emit(Instruction::Load(Kind::Ref, slot));
            ty.load(method, param)?;
            method.emit(Instruction::PutField(field));
        }
        Ok(())
    }

    fn emit_prologue(&mut self, prologue: Prologue<'a>) -> EmitResult<()> {
        match prologue {
            Prologue::None => Ok(()),
            Prologue::SuperInit => {
                let superclass = self.superclass_name()?;
                let method = self.method()?;
                method.emit(Instruction::Load(Kind::Ref, 0));
                method.emit(Instruction::invoke(InvokeKind::Special, &superclass, "<init>", "()V"));
                Ok(())
            }
            Prologue::Delegate(delegation, node) => {
                let target = if delegation.calls_super {
                    self.class_type.superclass()?.unwrap_or_else(|| self.types().object())
                } else {
                    self.class_type.clone()
                };
                let args = delegation
                    .args
                    .iter()
                    .map(|arg| self.node_type(arg))
                    .collect::<EmitResult<Vec<_>>>()?;
                let constructor = self
                    .env
                    .methods
                    .constructor(&target, &args)
                    .ok_or_else(|| Fault::MissingMethod {
                        receiver: target.to_string(),
                        name: "initialize".to_string(),
                        args: args.iter().map(|a| a.to_string()).collect(),
                    })?;
                let params = constructor.argument_types().to_vec();
                self.method()?.emit(Instruction::Load(Kind::Ref, 0));
                let site = CallSite {
                    target: Target::ImplicitSelf,
                    args: &delegation.args,
                    node,
                };
                emit_args(self, &site, &params)?;
                let descriptor = constructor.descriptor();
                self.method()?.emit(Instruction::invoke(
                    InvokeKind::Special,
                    &target.internal_name(),
                    "<init>",
                    &descriptor,
                ));
                Ok(())
            }
        }
    }

    fn emit_forward(
        &mut self,
        spec: &MethodSpec<'a>,
        default: &'a Node,
        next: &MethodRef,
        kind: InvokeKind,
        next_args: &[Type],
    ) -> EmitResult<()> {
        let filled = next_args
            .last()
            .ok_or_else(|| Fault::Internal(format!("{} forwards no argument", spec.name)))?;
        let method = self.method()?;
        if kind != InvokeKind::Static {
            method.emit(Instruction::Load(Kind::Ref, 0));
        }
        for (name, ty) in &spec.params {
            let slot = method.local(name, ty);
            ty.load(method, slot)?;
        }
        self.emit_as(default, filled)?;
        self.method()?.emit(Instruction::Invoke(kind, next.clone()));
        Ok(())
    }

    fn superclass_name(&self) -> EmitResult<String> {
        Ok(self
            .class_type
            .superclass()?
            .map(|s| s.internal_name())
            .unwrap_or_else(|| OBJECT.to_string()))
    }

    /// Public no-argument constructor calling the superclass one
    pub(super) fn default_constructor(&mut self) -> EmitResult<()> {
        if self.class.has_method("<init>", "()V") {
            return Ok(());
        }
        let void = self.types().void();
        let mut spec = MethodSpec::new("<init>", access::PUBLIC, void, FrameBody::Node(None));
        spec.prologue = Prologue::SuperInit;
        self.method_body(spec)
    }
}
