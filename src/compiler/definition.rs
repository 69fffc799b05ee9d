// Jvmgen Definitions
// Classes, methods, constructors, closures, fields and annotations

use super::emitter::{BindingStrategy, Emitter};
use super::frame::{descriptor, FrameBody, MethodSpec, Prologue};
use crate::ast::{
    Annotation as NodeAnnotation, AnnotationArg, Argument, ClassDef, ClosureDef, ConstructorDef, FieldDef, Literal,
    MethodDef, Node, NodeKind,
};
use crate::bytecode::{
    access, Annotation, AnnotationValue, ClassBuilder, ConstantValue, FieldInfo, FieldRef, Instruction, InvokeKind,
    Kind, MethodBuilder, MethodRef,
};
use crate::error::{EmitResult, Fault};
use crate::types::{Primitive, Type};

const OBJECT: &str = "java/lang/Object";

impl<'u, 'a> Emitter<'u, 'a> {
    /// A fresh class builder carrying the configured version and source file
    pub(super) fn new_class(&self, ty: &Type, superclass: Option<String>, interfaces: Vec<String>, flags: u16) -> ClassBuilder {
        let mut class = ClassBuilder::new(ty.internal_name(), superclass, interfaces, flags);
        class.set_version(self.env.config.class_version);
        if let Some(file) = &self.env.config.source_file {
            class.set_source_file(file.clone());
        }
        class
    }

    // ==================== Classes ====================

    pub(super) fn compile_class(&mut self, node: &'a Node, def: &'a ClassDef) -> EmitResult<()> {
        let ty = self.node_type(node)?;
        let interfaces = ty
            .interfaces(false)?
            .iter()
            .map(Type::internal_name)
            .collect::<Vec<_>>();
        let (superclass, flags) = if def.is_interface {
            (OBJECT.to_string(), access::PUBLIC | access::INTERFACE | access::ABSTRACT)
        } else {
            let superclass = ty
                .superclass()?
                .map(|s| s.internal_name())
                .unwrap_or_else(|| OBJECT.to_string());
            (superclass, access::PUBLIC | access::SUPER)
        };
        self.log.debug(format_args!("class {} < {}", ty, superclass));

        let class = self.new_class(&ty, Some(superclass), interfaces, flags);
        let log = self.log.clone();
        let mut nested = Emitter::new(&mut *self.unit, self.env, self.scopes, class, ty, log);
        nested.compile_class_body(node, def)?;
        let class = nested.into_class();
        self.unit.add_class(class.finish());
        Ok(())
    }

    fn compile_class_body(&mut self, node: &'a Node, def: &'a ClassDef) -> EmitResult<()> {
        for member in &def.body {
            if let NodeKind::FieldDeclaration(field) = &member.kind {
                self.compile_field_declaration(member, field)?;
            }
        }

        let mut initializer = Vec::new();
        for member in &def.body {
            match &member.kind {
                NodeKind::FieldDeclaration(_) => {}
                NodeKind::MethodDefinition(method) => self.compile_method(member, method, false)?,
                NodeKind::ConstructorDefinition(ctor) => self.compile_constructor(member, ctor)?,
                NodeKind::ClassDefinition(class) => self.compile_class(member, class)?,
                _ => initializer.push(member),
            }
        }

        if !initializer.is_empty() {
            let void = self.types().void();
            let mut spec = MethodSpec::new(
                "<clinit>",
                access::STATIC,
                void,
                FrameBody::Statements(initializer),
            );
            spec.scope = self.scopes.scope_for(node.id).map(|s| s.id);
            self.method_body(spec)?;
        }
        let has_constructor = def
            .body
            .iter()
            .any(|member| matches!(member.kind, NodeKind::ConstructorDefinition(_)));
        if !def.is_interface && !has_constructor {
            self.default_constructor()?;
        }
        Ok(())
    }

    fn compile_field_declaration(&mut self, node: &'a Node, def: &'a FieldDef) -> EmitResult<()> {
        let ty = self.node_type(node)?;
        let mut flags = access::PRIVATE;
        if def.is_static {
            flags |= access::STATIC;
        }
        if def.transient {
            flags |= access::TRANSIENT;
        }
        let (declared, fresh) = self.unit.declare_field(self.class.name(), &def.name, &ty);
        if !fresh || self.class.has_field(&def.name) {
            return Ok(());
        }
        let mut field = FieldInfo::new(def.name.as_str(), &declared, flags);
        if let Some(literal) = &def.constant {
            field = field.constant(constant_value(literal, &declared)?);
        }
        for annotation in &def.annotations {
            field.annotate(self.annotation(annotation));
        }
        self.log
            .debug(format_args!("field {}.{} : {}", self.class.name(), def.name, declared));
        self.class.add_field(field);
        Ok(())
    }

    // ==================== Methods ====================

    fn params(&self, args: &[Argument]) -> EmitResult<Vec<(String, Type)>> {
        args.iter()
            .map(|arg| {
                let ty = self
                    .env
                    .oracle
                    .inferred_type(arg.id)
                    .ok_or_else(|| Fault::Internal(format!("argument {} has no type", arg.name)))?;
                Ok((arg.name.clone(), ty))
            })
            .collect()
    }

    pub(super) fn compile_method(&mut self, node: &'a Node, def: &'a MethodDef, force_static: bool) -> EmitResult<()> {
        let return_type = self.node_type(node)?;
        let is_static = def.is_static || force_static;
        let interface = self.class.is_interface();
        let mut flags = access::PUBLIC;
        if is_static {
            flags |= access::STATIC;
        }
        let params = self.params(&def.args)?;
        let scope = self.scopes.scope_for(node.id).map(|s| s.id);
        let throws = def
            .throws
            .iter()
            .map(|name| self.types().get(name).map(|t| t.internal_name()))
            .collect::<EmitResult<Vec<_>>>()?;

        if !interface {
            let kind = if is_static { InvokeKind::Static } else { InvokeKind::Virtual };
            self.compile_overloads(&def.name, flags, &def.args, &params, &return_type, scope, kind)?;
        }

        let mut spec = MethodSpec::new(def.name.as_str(), flags, return_type, FrameBody::Node(def.body.as_ref()));
        if interface && def.body.is_none() {
            spec.access |= access::ABSTRACT;
        }
        spec.params = params;
        spec.scope = scope;
        spec.throws = throws;
        spec.annotations = def.annotations.iter().map(|a| self.annotation(a)).collect();
        self.method_body(spec)
    }

    /// One forwarding overload per optional argument: the overload taking
    /// the first `n` arguments calls the one taking `n + 1`
    #[allow(clippy::too_many_arguments)]
    fn compile_overloads(
        &mut self,
        name: &str,
        flags: u16,
        args: &'a [Argument],
        params: &[(String, Type)],
        return_type: &Type,
        scope: Option<usize>,
        kind: InvokeKind,
    ) -> EmitResult<()> {
        let required = args.iter().take_while(|arg| arg.default.is_none()).count();
        for count in required..args.len() {
            let Some(default) = &args[count].default else {
                return Err(Fault::Internal(format!(
                    "required argument {} follows an optional one in {}",
                    args[count].name, name
                )));
            };
            let next_args: Vec<Type> = params[..=count].iter().map(|(_, ty)| ty.clone()).collect();
            let next = MethodRef {
                owner: self.class.name().to_string(),
                name: name.to_string(),
                descriptor: descriptor(next_args.iter(), return_type),
            };
            let mut spec = MethodSpec::new(
                name,
                flags,
                return_type.clone(),
                FrameBody::Forward {
                    default,
                    next,
                    invoke: kind,
                    next_args,
                },
            );
            spec.params = params[..count].to_vec();
            spec.scope = scope;
            self.method_body(spec)?;
        }
        Ok(())
    }

    pub(super) fn compile_constructor(&mut self, node: &'a Node, def: &'a ConstructorDef) -> EmitResult<()> {
        let void = self.types().void();
        let params = self.params(&def.args)?;
        let scope = self.scopes.scope_for(node.id).map(|s| s.id);
        self.compile_overloads("<init>", access::PUBLIC, &def.args, &params, &void, scope, InvokeKind::Special)?;

        let mut spec = MethodSpec::new("<init>", access::PUBLIC, void, FrameBody::Node(def.body.as_ref()));
        spec.params = params;
        spec.scope = scope;
        spec.prologue = match &def.delegate {
            Some(delegation) => Prologue::Delegate(delegation, node),
            None => Prologue::SuperInit,
        };
        self.method_body(spec)
    }

    // ==================== Closures ====================

    pub(super) fn compile_closure(&mut self, node: &'a Node, def: &'a ClosureDef, want_value: bool) -> EmitResult<()> {
        let ty = self.node_type(node)?;
        let carried = self.frame()?.binding.clone();
        let interfaces = ty
            .interfaces(false)?
            .iter()
            .map(Type::internal_name)
            .collect::<Vec<_>>();
        self.log.debug(format_args!(
            "closure {} implements {:?} (binding: {})",
            def.name,
            interfaces,
            carried.as_ref().map_or("none".to_string(), Type::to_string)
        ));

        let mut class = self.new_class(&ty, Some(OBJECT.to_string()), interfaces, access::PUBLIC | access::SUPER);
        if let Some(binding) = &carried {
            class.add_field(FieldInfo::new("binding", binding, access::PRIVATE));
            class.add_method(closure_constructor(&ty, binding)?);
        }
        let log = self.log.clone();
        let mut nested = Emitter::new(&mut *self.unit, self.env, self.scopes, class, ty.clone(), log)
            .with_strategy(BindingStrategy::FromReceiver {
                carried: carried.clone(),
            });
        for method in &def.methods {
            match &method.kind {
                NodeKind::MethodDefinition(m) => nested.compile_method(method, m, false)?,
                _ => return Err(Fault::Unsupported("closure member other than a method")),
            }
        }
        if carried.is_none() {
            nested.default_constructor()?;
        }
        let class = nested.into_class();
        self.unit.add_class(class.finish());
        self.class.inner_class(ty.internal_name());

        if !want_value {
            return Ok(());
        }
        let class = ty.internal_name();
        let binding_slot = self.frame()?.binding_slot;
        let method = self.method()?;
        method.emit(Instruction::New(class.clone()));
        method.emit(Instruction::Dup);
        match (&carried, binding_slot) {
            (Some(binding), Some(slot)) => {
                method.emit(Instruction::Load(Kind::Ref, slot));
                let descriptor = format!("({})V", binding.descriptor());
                method.emit(Instruction::invoke(InvokeKind::Special, &class, "<init>", &descriptor));
            }
            (Some(_), None) => return Err(Fault::Internal("binding was never stored".to_string())),
            (None, _) => method.emit(Instruction::invoke(InvokeKind::Special, &class, "<init>", "()V")),
        }
        Ok(())
    }

    // ==================== Annotations ====================

    pub(super) fn annotation(&self, annotation: &NodeAnnotation) -> Annotation {
        let type_name = self.class_descriptor(&annotation.type_name);
        annotation
            .values
            .iter()
            .fold(Annotation::new(type_name, annotation.runtime), |result, (name, value)| {
                result.value(name.clone(), self.annotation_value(value))
            })
    }

    fn annotation_value(&self, value: &AnnotationArg) -> AnnotationValue {
        match value {
            AnnotationArg::Str(s) => AnnotationValue::String(s.clone()),
            AnnotationArg::Int(n) => AnnotationValue::Int(*n),
            AnnotationArg::Bool(b) => AnnotationValue::Boolean(*b),
            AnnotationArg::Class(name) => AnnotationValue::Class(self.class_descriptor(name)),
            AnnotationArg::Array(items) => {
                AnnotationValue::Array(items.iter().map(|item| self.annotation_value(item)).collect())
            }
            AnnotationArg::Nested(nested) => AnnotationValue::Nested(self.annotation(nested)),
        }
    }

    /// Descriptor of a class named in an annotation; unknown classes are
    /// taken at their word
    fn class_descriptor(&self, name: &str) -> String {
        match self.types().get(name) {
            Ok(ty) => ty.descriptor(),
            Err(_) => format!("L{};", name.replace('.', "/")),
        }
    }
}

/// `<init>(binding)`: store the enclosing binding on the closure
fn closure_constructor(closure: &Type, binding: &Type) -> EmitResult<crate::bytecode::MethodInfo> {
    let descriptor = format!("({})V", binding.descriptor());
    let mut ctor = MethodBuilder::new("<init>", descriptor, access::PUBLIC);
    let slot = ctor.local("binding", binding);
    ctor.emit(Instruction::Load(Kind::Ref, 0));
    ctor.emit(Instruction::invoke(InvokeKind::Special, OBJECT, "<init>", "()V"));
    ctor.emit(Instruction::Load(Kind::Ref, 0));
    ctor.emit(Instruction::Load(Kind::Ref, slot));
    ctor.emit(Instruction::PutField(FieldRef {
        owner: closure.internal_name(),
        name: "binding".to_string(),
        descriptor: binding.descriptor(),
    }));
    ctor.emit(Instruction::Return(None));
    ctor.stop()
}

/// ConstantValue of a literal, shaped by the field's type
fn constant_value(literal: &Literal, ty: &Type) -> EmitResult<ConstantValue> {
    let value = match (literal, ty.primitive()) {
        (Literal::Str(s), None) => ConstantValue::String(s.clone()),
        (Literal::Int(n), Some(Primitive::Long)) => ConstantValue::Long(*n),
        (Literal::Int(n), Some(Primitive::Float)) => ConstantValue::Float(*n as f32),
        (Literal::Int(n), Some(Primitive::Double)) => ConstantValue::Double(*n as f64),
        (Literal::Int(n), Some(_)) => ConstantValue::Int(*n as i32),
        (Literal::Float(x), Some(Primitive::Float)) => ConstantValue::Float(*x as f32),
        (Literal::Float(x), Some(Primitive::Double)) => ConstantValue::Double(*x),
        _ => {
            return Err(Fault::IncompatibleCast(format!(
                "Cannot use {:?} as a constant of type {}",
                literal, ty
            )))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeSystem;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_constant_follows_field_type() {
        let types = TypeSystem::new();
        let long = types.primitive(Primitive::Long);
        let double = types.primitive(Primitive::Double);
        assert_eq!(constant_value(&Literal::Int(7), &long).unwrap(), ConstantValue::Long(7));
        assert_eq!(constant_value(&Literal::Int(2), &double).unwrap(), ConstantValue::Double(2.0));
        assert_eq!(
            constant_value(&Literal::Str("hi".into()), &types.string()).unwrap(),
            ConstantValue::String("hi".into())
        );
        assert!(constant_value(&Literal::Str("hi".into()), &long).is_err());
    }

    #[test]
    fn test_closure_constructor_stores_binding() {
        let types = TypeSystem::new();
        let closure = types.define_class("Demo$Closure1", None, &[], false).unwrap();
        let binding = types.define_class("Demo$Binding1", None, &[], false).unwrap();
        let ctor = closure_constructor(&closure, &binding).unwrap();
        assert_eq!(ctor.descriptor, "(LDemo$Binding1;)V");
        assert!(matches!(ctor.code[4], Instruction::PutField(ref f) if f.name == "binding"));
        assert_eq!(ctor.code.last(), Some(&Instruction::Return(None)));
    }
}
