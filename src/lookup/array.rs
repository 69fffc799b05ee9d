// Jvmgen Array Extensions
// Inline members on array receivers: indexing, length and join

use super::{emit_receiver, CallSite, MemberKind, Method};
use crate::bytecode::{ArithOp, Cond, Instruction, InvokeKind, Kind, Label};
use crate::compiler::Emitter;
use crate::error::{EmitResult, Fault};
use crate::types::Type;

const BUILDER: &str = "java/lang/StringBuilder";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOp {
    /// `a[i]`
    Get,
    /// `a[i] = v`
    Set,
    /// `a.length`, `a.size`
    Length,
    /// `a.empty?`
    Empty,
    /// `a.first!`
    First,
    /// `a.last!`
    Last,
    /// `a.join`, `a.join(sep)`
    Join,
}

/// A member of an array type
#[derive(Debug, Clone)]
pub struct ArrayMember {
    name: String,
    op: ArrayOp,
    array: Type,
    component: Type,
    args: Vec<Type>,
    ret: Type,
}

impl ArrayMember {
    pub fn new(name: &str, op: ArrayOp, array: Type, args: Vec<Type>, ret: Type) -> EmitResult<Self> {
        let component = array
            .component_type()
            .cloned()
            .ok_or_else(|| Fault::Internal(format!("{} is not an array", array)))?;
        Ok(Self {
            name: name.to_string(),
            op,
            array,
            component,
            args,
            ret,
        })
    }

    fn emit_index<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>) -> EmitResult<()> {
        let index = site
            .args
            .first()
            .ok_or_else(|| Fault::Internal("array index missing".to_string()))?;
        em.emit_as(index, &self.args[0])
    }

    /// Inline loop appending every element (and separators) to a builder
    fn emit_join<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>) -> EmitResult<()> {
        let types = em.types();
        let int = types.primitive(crate::types::Primitive::Int);
        let builder_type = types.get("java.lang.StringBuilder")?;
        let string = types.string();

        emit_receiver(em, site, true)?;
        let method = em.method()?;
        let array = method.temp_local(&self.array);
        method.emit(Instruction::Store(Kind::Ref, array));

        let separator = match site.args.first() {
            Some(sep) => {
                em.emit_as(sep, &string)?;
                let method = em.method()?;
                let slot = method.temp_local(&string);
                method.emit(Instruction::Store(Kind::Ref, slot));
                Some(slot)
            }
            None => None,
        };

        let method = em.method()?;
        let builder = method.temp_local(&builder_type);
        let index = method.temp_local(&int);
        method.emit(Instruction::New(BUILDER.to_string()));
        method.emit(Instruction::Dup);
        method.emit(Instruction::invoke(InvokeKind::Special, BUILDER, "<init>", "()V"));
        method.emit(Instruction::Store(Kind::Ref, builder));
        method.emit(Instruction::Iconst(0));
        method.emit(Instruction::Store(Kind::Int, index));

        let top = method.label();
        let done = method.label();
        method.set(top);
        method.emit(Instruction::Load(Kind::Int, index));
        method.emit(Instruction::Load(Kind::Ref, array));
        method.emit(Instruction::ArrayLength);
        method.emit(Instruction::IfIcmp(Cond::Ge, done));

        if let Some(sep) = separator {
            let skip = method.label();
            method.emit(Instruction::Load(Kind::Int, index));
            method.emit(Instruction::If(Cond::Eq, skip));
            method.emit(Instruction::Load(Kind::Ref, builder));
            method.emit(Instruction::Load(Kind::Ref, sep));
            method.emit(Instruction::invoke(InvokeKind::Virtual, BUILDER, "append", "(Ljava/lang/String;)Ljava/lang/StringBuilder;"));
            method.emit(Instruction::Pop);
            method.set(skip);
        }

        method.emit(Instruction::Load(Kind::Ref, builder));
        method.emit(Instruction::Load(Kind::Ref, array));
        method.emit(Instruction::Load(Kind::Int, index));
        self.component.array_load(method);
        self.component.box_value(method);
        method.emit(Instruction::invoke(InvokeKind::Virtual, BUILDER, "append", "(Ljava/lang/Object;)Ljava/lang/StringBuilder;"));
        method.emit(Instruction::Pop);
        method.emit(Instruction::Iinc(index, 1));
        method.goto(top);

        method.set(done);
        method.emit(Instruction::Load(Kind::Ref, builder));
        method.emit(Instruction::invoke(InvokeKind::Virtual, BUILDER, "toString", "()Ljava/lang/String;"));
        Ok(())
    }

    fn emit_length<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>) -> EmitResult<()> {
        emit_receiver(em, site, true)?;
        em.method()?.emit(Instruction::ArrayLength);
        Ok(())
    }

    fn branch_empty<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, target: Label, cond: Cond) -> EmitResult<()> {
        self.emit_length(em, site)?;
        em.method()?.emit(Instruction::If(cond, target));
        Ok(())
    }
}


impl Method for ArrayMember {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MemberKind {
        match self.op {
            ArrayOp::Get | ArrayOp::First | ArrayOp::Last => MemberKind::ArrayAccess,
            ArrayOp::Set => MemberKind::ArrayAssign,
            ArrayOp::Length | ArrayOp::Empty => MemberKind::ArrayLength,
            ArrayOp::Join => MemberKind::Method,
        }
    }

    fn declaring_type(&self) -> &Type {
        &self.array
    }

    fn argument_types(&self) -> &[Type] {
        &self.args
    }

    fn return_type(&self) -> &Type {
        &self.ret
    }

    fn call<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, want_value: bool) -> EmitResult<()> {
        match self.op {
            ArrayOp::Get => {
                emit_receiver(em, site, true)?;
                self.emit_index(em, site)?;
                self.component.array_load(em.method()?);
            }
            ArrayOp::First => {
                emit_receiver(em, site, true)?;
                let method = em.method()?;
                method.emit(Instruction::Iconst(0));
                self.component.array_load(method);
            }
            ArrayOp::Last => {
                emit_receiver(em, site, true)?;
                let method = em.method()?;
                method.emit(Instruction::Dup);
                method.emit(Instruction::ArrayLength);
                method.emit(Instruction::Iconst(1));
                method.emit(Instruction::Arith(Kind::Int, ArithOp::Sub));
                self.component.array_load(method);
            }
            ArrayOp::Set => {
                emit_receiver(em, site, true)?;
                self.emit_index(em, site)?;
                let value = site
                    .args
                    .get(1)
                    .ok_or_else(|| Fault::Internal("array store without a value".to_string()))?;
                em.emit_as(value, &self.component)?;
                let method = em.method()?;
                if want_value {
                    method.emit(if self.component.is_wide() {
                        Instruction::Dup2X2
                    } else {
                        Instruction::DupX2
                    });
                }
                self.component.array_store(method);
                return Ok(());
            }
            ArrayOp::Length => self.emit_length(em, site)?,
            ArrayOp::Empty => {
                if !want_value {
                    return emit_receiver(em, site, false);
                }
                let method = em.method()?;
                let falsy = method.label();
                let done = method.label();
                self.jump_if_not(em, site, falsy)?;
                let method = em.method()?;
                method.emit(Instruction::Iconst(1));
                method.goto(done);
                method.set(falsy);
                method.emit(Instruction::Iconst(0));
                method.set(done);
                return Ok(());
            }
            ArrayOp::Join => self.emit_join(em, site)?,
        }
        if !want_value {
            self.ret.pop(em.method()?);
        }
        Ok(())
    }

    fn branches(&self) -> bool {
        self.op == ArrayOp::Empty
    }

    fn jump_if<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, target: Label) -> EmitResult<()> {
        if self.op != ArrayOp::Empty {
            return Err(Fault::Unsupported("branch on a non-boolean array member"));
        }
        self.branch_empty(em, site, target, Cond::Eq)
    }

    fn jump_if_not<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, target: Label) -> EmitResult<()> {
        if self.op != ArrayOp::Empty {
            return Err(Fault::Unsupported("branch on a non-boolean array member"));
        }
        self.branch_empty(em, site, target, Cond::Ne)
    }
}
