// Jvmgen Intrinsics
// Members on primitives and classes that emit inline code instead of a call

use super::{emit_receiver, CallSite, MemberKind, Method, Target};
use crate::ast::Node;
use crate::bytecode::{ArithOp, Cond, Instruction, Kind, Label};
use crate::compiler::Emitter;
use crate::error::{EmitResult, Fault};
use crate::types::{Primitive, Type};

fn explicit_target<'a>(site: &CallSite<'a>) -> EmitResult<&'a Node> {
    match site.target {
        Target::Expr(node) => Ok(node),
        Target::ImplicitSelf => Err(Fault::Internal(format!(
            "intrinsic {} needs an explicit receiver",
            site.node.describe()
        ))),
    }
}

fn single_arg<'a>(site: &CallSite<'a>) -> EmitResult<&'a Node> {
    site.args
        .first()
        .ok_or_else(|| Fault::Internal("binary intrinsic called without an operand".to_string()))
}

/// Operator name for an arithmetic instruction
pub(crate) fn math_op(name: &str) -> Option<ArithOp> {
    let op = match name {
        "+" => ArithOp::Add,
        "-" => ArithOp::Sub,
        "*" => ArithOp::Mul,
        "/" => ArithOp::Div,
        "%" => ArithOp::Rem,
        "&" => ArithOp::And,
        "|" => ArithOp::Or,
        "^" => ArithOp::Xor,
        "<<" => ArithOp::Shl,
        ">>" => ArithOp::Shr,
        ">>>" => ArithOp::Ushr,
        _ => return None,
    };
    Some(op)
}

/// Operator name for a comparison
pub(crate) fn comparison_op(name: &str) -> Option<Cond> {
    let cond = match name {
        "==" => Cond::Eq,
        "!=" => Cond::Ne,
        "<" => Cond::Lt,
        ">=" => Cond::Ge,
        ">" => Cond::Gt,
        "<=" => Cond::Le,
        _ => return None,
    };
    Some(cond)
}

// ==================== Arithmetic ====================

/// Binary arithmetic or unary negation on promoted primitive operands
#[derive(Debug, Clone)]
pub struct Math {
    name: String,
    op: Option<ArithOp>, // None is negation
    receiver: Type,
    args: Vec<Type>,
    /// Type both operands are converted to (shift counts are always int)
    operand: Type,
    shift_count: Type,
}

impl Math {
    pub fn binary(name: &str, op: ArithOp, receiver: Type, arg: Type, operand: Type, int: Type) -> Self {
        Self {
            name: name.to_string(),
            op: Some(op),
            receiver,
            args: vec![arg],
            operand,
            shift_count: int,
        }
    }

    pub fn negate(receiver: Type, operand: Type, int: Type) -> Self {
        Self {
            name: "-@".to_string(),
            op: None,
            receiver,
            args: Vec::new(),
            operand,
            shift_count: int,
        }
    }

    fn kind_of_operand(&self) -> EmitResult<Kind> {
        self.operand
            .stack_kind()
            .ok_or_else(|| Fault::Internal(format!("math on {}", self.operand)))
    }
}

impl Method for Math {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MemberKind {
        MemberKind::MathOp
    }

    fn declaring_type(&self) -> &Type {
        &self.receiver
    }

    fn argument_types(&self) -> &[Type] {
        &self.args
    }

    fn return_type(&self) -> &Type {
        &self.operand
    }

    fn call<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, want_value: bool) -> EmitResult<()> {
        let lhs = explicit_target(site)?;
        let kind = self.kind_of_operand()?;
        em.emit_as(lhs, &self.operand)?;
        match self.op {
            Some(op) => {
                let rhs = single_arg(site)?;
                let shift = matches!(op, ArithOp::Shl | ArithOp::Shr | ArithOp::Ushr);
                em.emit_as(rhs, if shift { &self.shift_count } else { &self.operand })?;
                em.method()?.emit(Instruction::Arith(kind, op));
            }
            None => em.method()?.emit(Instruction::Neg(kind)),
        }
        if !want_value {
            self.operand.pop(em.method()?);
        }
        Ok(())
    }
}

// ==================== Comparison ====================

/// Numeric or boolean comparison with a direct branch form
#[derive(Debug, Clone)]
pub struct Comparison {
    name: String,
    cond: Cond,
    receiver: Type,
    args: Vec<Type>,
    operand: Type,
    boolean: Type,
}

impl Comparison {
    pub fn new(name: &str, cond: Cond, receiver: Type, arg: Type, operand: Type, boolean: Type) -> Self {
        Self {
            name: name.to_string(),
            cond,
            receiver,
            args: vec![arg],
            operand,
            boolean,
        }
    }

    /// Compare the operands and jump to `target` when `test` holds. The
    /// NaN bias of float compares follows the source operator, not `test`.
    fn branch<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, target: Label, test: Cond) -> EmitResult<()> {
        let lhs = explicit_target(site)?;
        let rhs = single_arg(site)?;
        em.emit_as(lhs, &self.operand)?;
        em.emit_as(rhs, &self.operand)?;

        let greater_bias = matches!(self.cond, Cond::Lt | Cond::Le);
        let method = em.method()?;
        match self.operand.stack_kind() {
            Some(Kind::Int) => method.emit(Instruction::IfIcmp(test, target)),
            Some(Kind::Long) => {
                method.emit(Instruction::Lcmp);
                method.emit(Instruction::If(test, target));
            }
            Some(Kind::Float) => {
                method.emit(if greater_bias { Instruction::Fcmpg } else { Instruction::Fcmpl });
                method.emit(Instruction::If(test, target));
            }
            Some(Kind::Double) => {
                method.emit(if greater_bias { Instruction::Dcmpg } else { Instruction::Dcmpl });
                method.emit(Instruction::If(test, target));
            }
            _ => return Err(Fault::Internal(format!("comparison on {}", self.operand))),
        }
        Ok(())
    }
}

impl Method for Comparison {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MemberKind {
        MemberKind::ComparisonOp
    }

    fn declaring_type(&self) -> &Type {
        &self.receiver
    }

    fn argument_types(&self) -> &[Type] {
        &self.args
    }

    fn return_type(&self) -> &Type {
        &self.boolean
    }

    fn call<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, want_value: bool) -> EmitResult<()> {
        if !want_value {
            em.emit(explicit_target(site)?, false)?;
            return em.emit(single_arg(site)?, false);
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
        Ok(())
    }

    fn branches(&self) -> bool {
        true
    }

    fn jump_if<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, target: Label) -> EmitResult<()> {
        self.branch(em, site, target, self.cond)
    }

    fn jump_if_not<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, target: Label) -> EmitResult<()> {
        self.branch(em, site, target, self.cond.negate())
    }
}

/// Boolean negation `!x`
#[derive(Debug, Clone)]
pub struct Not {
    boolean: Type,
}

impl Not {
    pub fn new(boolean: Type) -> Self {
        Self { boolean }
    }
}

impl Method for Not {
    fn name(&self) -> &str {
        "!"
    }

    fn kind(&self) -> MemberKind {
        MemberKind::ComparisonOp
    }

    fn declaring_type(&self) -> &Type {
        &self.boolean
    }

    fn argument_types(&self) -> &[Type] {
        &[]
    }

    fn return_type(&self) -> &Type {
        &self.boolean
    }

    fn call<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, want_value: bool) -> EmitResult<()> {
        let operand = explicit_target(site)?;
        em.emit(operand, want_value)?;
        if want_value {
            let method = em.method()?;
            method.emit(Instruction::Iconst(1));
            method.emit(Instruction::Arith(Kind::Int, ArithOp::Xor));
        }
        Ok(())
    }

    fn branches(&self) -> bool {
        true
    }

    fn jump_if<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, target: Label) -> EmitResult<()> {
        em.jump_if_not(explicit_target(site)?, target)
    }

    fn jump_if_not<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, target: Label) -> EmitResult<()> {
        em.jump_if(explicit_target(site)?, target)
    }
}

// ==================== Classes ====================

/// `obj.kind_of?(Type)`
#[derive(Debug, Clone)]
pub struct InstanceOf {
    receiver: Type,
    args: Vec<Type>,
    tested: Type,
    boolean: Type,
}

impl InstanceOf {
    /// `class_arg` is the meta type of the tested class
    pub fn new(receiver: Type, class_arg: Type, boolean: Type) -> Self {
        let tested = class_arg.unmeta().clone();
        Self {
            receiver,
            args: vec![class_arg],
            tested,
            boolean,
        }
    }

    fn test<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>) -> EmitResult<()> {
        emit_receiver(em, site, true)?;
        em.method()?
            .emit(Instruction::InstanceOf(self.tested.internal_name()));
        Ok(())
    }
}

impl Method for InstanceOf {
    fn name(&self) -> &str {
        "kind_of?"
    }

    fn kind(&self) -> MemberKind {
        MemberKind::InstanceOf
    }

    fn declaring_type(&self) -> &Type {
        &self.receiver
    }

    fn argument_types(&self) -> &[Type] {
        &self.args
    }

    fn return_type(&self) -> &Type {
        &self.boolean
    }

    fn call<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, want_value: bool) -> EmitResult<()> {
        self.test(em, site)?;
        if !want_value {
            em.method()?.emit(Instruction::Pop);
        }
        Ok(())
    }

    fn branches(&self) -> bool {
        true
    }

    fn jump_if<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, target: Label) -> EmitResult<()> {
        self.test(em, site)?;
        em.method()?.emit(Instruction::If(Cond::Ne, target));
        Ok(())
    }

    fn jump_if_not<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, target: Label) -> EmitResult<()> {
        self.test(em, site)?;
        em.method()?.emit(Instruction::If(Cond::Eq, target));
        Ok(())
    }
}

/// `Type.class`
#[derive(Debug, Clone)]
pub struct ClassLiteral {
    meta: Type,
    class: Type,
}

impl ClassLiteral {
    pub fn new(meta: Type, class: Type) -> Self {
        Self { meta, class }
    }
}

impl Method for ClassLiteral {
    fn name(&self) -> &str {
        "class"
    }

    fn kind(&self) -> MemberKind {
        MemberKind::ClassLiteral
    }

    fn declaring_type(&self) -> &Type {
        &self.meta
    }

    fn argument_types(&self) -> &[Type] {
        &[]
    }

    fn return_type(&self) -> &Type {
        &self.class
    }

    fn call<'a>(&self, em: &mut Emitter<'_, 'a>, _site: &CallSite<'a>, want_value: bool) -> EmitResult<()> {
        if want_value {
            self.meta.class_literal(em.method()?);
        }
        Ok(())
    }
}

/// Whether a primitive converts to another without an explicit cast
pub(crate) fn widens_to(from: Primitive, to: Primitive) -> bool {
    if from == to {
        return true;
    }
    match from {
        Primitive::Boolean => false,
        Primitive::Byte => matches!(to, Primitive::Short | Primitive::Int | Primitive::Long | Primitive::Float | Primitive::Double),
        Primitive::Short | Primitive::Char => {
            matches!(to, Primitive::Int | Primitive::Long | Primitive::Float | Primitive::Double)
        }
        Primitive::Int => matches!(to, Primitive::Long | Primitive::Float | Primitive::Double),
        Primitive::Long => matches!(to, Primitive::Float | Primitive::Double),
        Primitive::Float => to == Primitive::Double,
        Primitive::Double => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_tables() {
        assert_eq!(math_op(">>>"), Some(ArithOp::Ushr));
        assert_eq!(math_op("=="), None);
        assert_eq!(comparison_op("<="), Some(Cond::Le));
    }

    #[test]
    fn test_widening() {
        assert!(widens_to(Primitive::Char, Primitive::Long));
        assert!(!widens_to(Primitive::Char, Primitive::Short));
        assert!(!widens_to(Primitive::Double, Primitive::Int));
        assert!(!widens_to(Primitive::Boolean, Primitive::Int));
    }
}
