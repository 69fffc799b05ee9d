// Jvmgen Java Members
// Ordinary methods, constructors and fields invoked through real instructions

use super::{emit_args, emit_receiver, finish_result, CallSite, MemberKind, Method};
use crate::bytecode::{FieldRef, Instruction, InvokeKind, MethodRef};
use crate::compiler::Emitter;
use crate::error::{EmitResult, Fault};
use crate::types::Type;

/// A method, constructor or static initializer of a class
#[derive(Debug, Clone)]
pub struct JavaMethod {
    owner: Type,
    name: String,
    args: Vec<Type>,
    ret: Type,
    kind: MemberKind,
}

impl JavaMethod {
    pub fn new(owner: Type, name: impl Into<String>, args: Vec<Type>, ret: Type, is_static: bool) -> Self {
        let kind = if is_static {
            MemberKind::StaticMethod
        } else {
            MemberKind::Method
        };
        Self {
            owner,
            name: name.into(),
            args,
            ret,
            kind,
        }
    }

    /// `<init>`; `void_type` is the declared return of every constructor
    pub fn constructor(owner: Type, args: Vec<Type>, void_type: Type) -> Self {
        Self {
            owner,
            name: "<init>".to_string(),
            args,
            ret: void_type,
            kind: MemberKind::Constructor,
        }
    }

    pub fn static_initializer(owner: Type, void_type: Type) -> Self {
        Self {
            owner,
            name: "<clinit>".to_string(),
            args: Vec::new(),
            ret: void_type,
            kind: MemberKind::StaticInitializer,
        }
    }

    fn reference(&self) -> MethodRef {
        MethodRef {
            owner: self.owner.internal_name(),
            name: self.name.clone(),
            descriptor: self.descriptor(),
        }
    }

    fn invoke_kind(&self) -> InvokeKind {
        match self.kind {
            MemberKind::StaticMethod | MemberKind::StaticInitializer => InvokeKind::Static,
            MemberKind::Constructor => InvokeKind::Special,
            _ if self.owner.is_interface() => InvokeKind::Interface,
            _ => InvokeKind::Virtual,
        }
    }
}

impl Method for JavaMethod {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MemberKind {
        self.kind
    }

    fn declaring_type(&self) -> &Type {
        &self.owner
    }

    fn argument_types(&self) -> &[Type] {
        &self.args
    }

    fn return_type(&self) -> &Type {
        &self.ret
    }

    fn call<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, want_value: bool) -> EmitResult<()> {
        match self.kind {
            MemberKind::Constructor => {
                emit_receiver(em, site, false)?;
                let class = self.owner.internal_name();
                let method = em.method()?;
                method.emit(Instruction::New(class));
                method.emit(Instruction::Dup);
                emit_args(em, site, &self.args)?;
                let method = em.method()?;
                method.emit(Instruction::Invoke(InvokeKind::Special, self.reference()));
                if !want_value {
                    method.emit(Instruction::Pop);
                }
                Ok(())
            }
            MemberKind::StaticMethod => {
                emit_receiver(em, site, false)?;
                emit_args(em, site, &self.args)?;
                em.method()?
                    .emit(Instruction::Invoke(InvokeKind::Static, self.reference()));
                finish_result(em, &self.ret, want_value)
            }
            MemberKind::StaticInitializer => Err(Fault::Unsupported("explicit static initializer call")),
            _ => {
                emit_receiver(em, site, true)?;
                emit_args(em, site, &self.args)?;
                let kind = self.invoke_kind();
                em.method()?.emit(Instruction::Invoke(kind, self.reference()));
                finish_result(em, &self.ret, want_value)
            }
        }
    }

    fn call_special<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, want_value: bool) -> EmitResult<()> {
        if self.kind != MemberKind::Method {
            return self.call(em, site, want_value);
        }
        em.emit_self()?;
        emit_args(em, site, &self.args)?;
        em.method()?
            .emit(Instruction::Invoke(InvokeKind::Special, self.reference()));
        finish_result(em, &self.ret, want_value)
    }
}

/// A field read or written through member syntax (`obj.name`, `Cls.NAME`,
/// `obj.name = value`)
#[derive(Debug, Clone)]
pub struct JavaField {
    owner: Type,
    name: String,
    field_name: String,
    ty: Type,
    kind: MemberKind,
    args: Vec<Type>,
    ret: Type,
}

impl JavaField {
    pub fn getter(owner: Type, name: impl Into<String>, ty: Type, is_static: bool) -> Self {
        let name = name.into();
        Self {
            owner,
            field_name: name.clone(),
            name,
            ty: ty.clone(),
            kind: if is_static {
                MemberKind::StaticFieldAccess
            } else {
                MemberKind::FieldAccess
            },
            args: Vec::new(),
            ret: ty,
        }
    }

    /// Setter member named `name=`
    pub fn setter(owner: Type, name: impl Into<String>, ty: Type, is_static: bool) -> Self {
        let field_name = name.into();
        Self {
            owner,
            name: format!("{}=", field_name),
            field_name,
            ty: ty.clone(),
            kind: if is_static {
                MemberKind::StaticFieldAssign
            } else {
                MemberKind::FieldAssign
            },
            args: vec![ty.clone()],
            ret: ty,
        }
    }

    fn reference(&self) -> FieldRef {
        FieldRef {
            owner: self.owner.internal_name(),
            name: self.field_name.clone(),
            descriptor: self.ty.descriptor(),
        }
    }
}

impl Method for JavaField {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MemberKind {
        self.kind
    }

    fn declaring_type(&self) -> &Type {
        &self.owner
    }

    fn argument_types(&self) -> &[Type] {
        &self.args
    }

    fn return_type(&self) -> &Type {
        &self.ret
    }

    fn call<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, want_value: bool) -> EmitResult<()> {
        match self.kind {
            MemberKind::FieldAccess => {
                emit_receiver(em, site, true)?;
                em.method()?.emit(Instruction::GetField(self.reference()));
                finish_result(em, &self.ty, want_value)
            }
            MemberKind::StaticFieldAccess => {
                emit_receiver(em, site, false)?;
                if want_value {
                    em.method()?.emit(Instruction::GetStatic(self.reference()));
                }
                Ok(())
            }
            MemberKind::FieldAssign => {
                emit_receiver(em, site, true)?;
                emit_args(em, site, &self.args)?;
                let method = em.method()?;
                if want_value {
                    method.emit(if self.ty.is_wide() {
                        Instruction::Dup2X1
                    } else {
                        Instruction::DupX1
                    });
                }
                method.emit(Instruction::PutField(self.reference()));
                Ok(())
            }
            _ => {
                emit_receiver(em, site, false)?;
                emit_args(em, site, &self.args)?;
                let method = em.method()?;
                if want_value {
                    self.ty.dup(method);
                }
                method.emit(Instruction::PutStatic(self.reference()));
                Ok(())
            }
        }
    }
}
