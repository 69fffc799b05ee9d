// Jvmgen Bytecode Instructions
// Opcode-level instruction set of the target class-file format

use serde::Serialize;
use std::fmt;

use crate::types::Primitive;

/// A branch target inside one method body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Operand category for typed load/store/arith/return instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Kind {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

impl Kind {
    pub fn letter(self) -> char {
        match self {
            Kind::Int => 'i',
            Kind::Long => 'l',
            Kind::Float => 'f',
            Kind::Double => 'd',
            Kind::Ref => 'a',
        }
    }

    pub fn is_wide(self) -> bool {
        matches!(self, Kind::Long | Kind::Double)
    }

    pub fn of(primitive: Primitive) -> Kind {
        match primitive.stack_type() {
            Primitive::Long => Kind::Long,
            Primitive::Float => Kind::Float,
            Primitive::Double => Kind::Double,
            _ => Kind::Int,
        }
    }
}

/// Element category for array load/store (baload, caload, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArrayKind {
    Byte, // also boolean arrays
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Ref,
}

impl ArrayKind {
    pub fn letter(self) -> char {
        match self {
            ArrayKind::Byte => 'b',
            ArrayKind::Char => 'c',
            ArrayKind::Short => 's',
            ArrayKind::Int => 'i',
            ArrayKind::Long => 'l',
            ArrayKind::Float => 'f',
            ArrayKind::Double => 'd',
            ArrayKind::Ref => 'a',
        }
    }

    pub fn of(primitive: Primitive) -> ArrayKind {
        match primitive {
            Primitive::Boolean | Primitive::Byte => ArrayKind::Byte,
            Primitive::Char => ArrayKind::Char,
            Primitive::Short => ArrayKind::Short,
            Primitive::Int => ArrayKind::Int,
            Primitive::Long => ArrayKind::Long,
            Primitive::Float => ArrayKind::Float,
            Primitive::Double => ArrayKind::Double,
        }
    }
}

/// Arithmetic and bitwise operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

impl ArithOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
            ArithOp::And => "and",
            ArithOp::Or => "or",
            ArithOp::Xor => "xor",
            ArithOp::Shl => "shl",
            ArithOp::Shr => "shr",
            ArithOp::Ushr => "ushr",
        }
    }
}

/// Branch conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Cond {
    pub fn negate(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Ge => "ge",
            Cond::Gt => "gt",
            Cond::Le => "le",
        }
    }

    pub fn test(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Cond::Eq => ordering == Equal,
            Cond::Ne => ordering != Equal,
            Cond::Lt => ordering == Less,
            Cond::Ge => ordering != Less,
            Cond::Gt => ordering == Greater,
            Cond::Le => ordering != Greater,
        }
    }
}

/// Method dispatch flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

impl InvokeKind {
    pub fn mnemonic(self) -> &'static str {
        match self {
            InvokeKind::Virtual => "invokevirtual",
            InvokeKind::Special => "invokespecial",
            InvokeKind::Static => "invokestatic",
            InvokeKind::Interface => "invokeinterface",
        }
    }
}

/// Symbolic reference to a field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldRef {
    pub owner: String, // internal name
    pub name: String,
    pub descriptor: String,
}

/// Symbolic reference to a method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MethodRef {
    pub owner: String, // internal name, or array descriptor
    pub name: String,
    pub descriptor: String,
}

/// Loadable constants
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Constant {
    String(String),
    Class(String), // internal name or array descriptor
}

/// One instruction of a method body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Instruction {
    // Constants
    AconstNull,
    Iconst(i32), // iconst_n / bipush / sipush / ldc
    Lconst(i64),
    Fconst(f32),
    Dconst(f64),
    Ldc(Constant),

    // Locals
    Load(Kind, u16),
    Store(Kind, u16),
    Iinc(u16, i16),

    // Arrays
    NewArray(Primitive),
    ANewArray(String),
    ArrayLoad(ArrayKind),
    ArrayStore(ArrayKind),
    ArrayLength,

    // Stack
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,

    // Arithmetic
    Arith(Kind, ArithOp),
    Neg(Kind),
    Convert(Primitive, Primitive), // i2l, l2i, i2b, ...
    Lcmp,
    Fcmpl,
    Fcmpg,
    Dcmpl,
    Dcmpg,

    // Control flow
    If(Cond, Label),    // compare int with zero
    IfIcmp(Cond, Label),
    IfAcmp(Cond, Label), // Eq / Ne only
    IfNull(Label),
    IfNonNull(Label),
    Goto(Label),
    Return(Option<Kind>),
    Athrow,

    // Objects
    New(String),
    Checkcast(String),
    InstanceOf(String),
    GetField(FieldRef),
    PutField(FieldRef),
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    Invoke(InvokeKind, MethodRef),
}

impl Instruction {
    pub fn invoke(kind: InvokeKind, owner: &str, name: &str, descriptor: &str) -> Instruction {
        Instruction::Invoke(
            kind,
            MethodRef {
                owner: owner.to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            },
        )
    }

    /// The label this instruction may transfer control to
    pub fn jump_target(&self) -> Option<Label> {
        match self {
            Instruction::If(_, label)
            | Instruction::IfIcmp(_, label)
            | Instruction::IfAcmp(_, label)
            | Instruction::IfNull(label)
            | Instruction::IfNonNull(label)
            | Instruction::Goto(label) => Some(*label),
            _ => None,
        }
    }

    /// Control never falls through to the next instruction
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Instruction::Goto(_) | Instruction::Return(_) | Instruction::Athrow
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::AconstNull => write!(f, "aconst_null"),
            Instruction::Iconst(n) => match n {
                -1..=5 => write!(f, "iconst_{}", n),
                -128..=127 => write!(f, "bipush         {}", n),
                -32768..=32767 => write!(f, "sipush         {}", n),
                _ => write!(f, "ldc            {}", n),
            },
            Instruction::Lconst(n) => write!(f, "ldc2_w         {}L", n),
            Instruction::Fconst(n) => write!(f, "ldc            {}f", n),
            Instruction::Dconst(n) => write!(f, "ldc2_w         {}d", n),
            Instruction::Ldc(Constant::String(s)) => write!(f, "ldc            {:?}", s),
            Instruction::Ldc(Constant::Class(c)) => write!(f, "ldc            class {}", c),

            Instruction::Load(kind, slot) => write!(f, "{}load          {}", kind.letter(), slot),
            Instruction::Store(kind, slot) => write!(f, "{}store         {}", kind.letter(), slot),
            Instruction::Iinc(slot, delta) => write!(f, "iinc           {} {}", slot, delta),

            Instruction::NewArray(p) => write!(f, "newarray       {}", p.name()),
            Instruction::ANewArray(c) => write!(f, "anewarray      {}", c),
            Instruction::ArrayLoad(kind) => write!(f, "{}aload", kind.letter()),
            Instruction::ArrayStore(kind) => write!(f, "{}astore", kind.letter()),
            Instruction::ArrayLength => write!(f, "arraylength"),

            Instruction::Pop => write!(f, "pop"),
            Instruction::Pop2 => write!(f, "pop2"),
            Instruction::Dup => write!(f, "dup"),
            Instruction::DupX1 => write!(f, "dup_x1"),
            Instruction::DupX2 => write!(f, "dup_x2"),
            Instruction::Dup2 => write!(f, "dup2"),
            Instruction::Dup2X1 => write!(f, "dup2_x1"),
            Instruction::Dup2X2 => write!(f, "dup2_x2"),
            Instruction::Swap => write!(f, "swap"),

            Instruction::Arith(kind, op) => write!(f, "{}{}", kind.letter(), op.mnemonic()),
            Instruction::Neg(kind) => write!(f, "{}neg", kind.letter()),
            Instruction::Convert(from, to) => write!(f, "{}2{}", from.letter(), to.letter()),
            Instruction::Lcmp => write!(f, "lcmp"),
            Instruction::Fcmpl => write!(f, "fcmpl"),
            Instruction::Fcmpg => write!(f, "fcmpg"),
            Instruction::Dcmpl => write!(f, "dcmpl"),
            Instruction::Dcmpg => write!(f, "dcmpg"),

            Instruction::If(cond, label) => write!(f, "if{:<13}{}", cond.mnemonic(), label),
            Instruction::IfIcmp(cond, label) => write!(f, "if_icmp{:<8}{}", cond.mnemonic(), label),
            Instruction::IfAcmp(cond, label) => write!(f, "if_acmp{:<8}{}", cond.mnemonic(), label),
            Instruction::IfNull(label) => write!(f, "ifnull         {}", label),
            Instruction::IfNonNull(label) => write!(f, "ifnonnull      {}", label),
            Instruction::Goto(label) => write!(f, "goto           {}", label),
            Instruction::Return(None) => write!(f, "return"),
            Instruction::Return(Some(kind)) => write!(f, "{}return", kind.letter()),
            Instruction::Athrow => write!(f, "athrow"),

            Instruction::New(c) => write!(f, "new            {}", c),
            Instruction::Checkcast(c) => write!(f, "checkcast      {}", c),
            Instruction::InstanceOf(c) => write!(f, "instanceof     {}", c),
            Instruction::GetField(r) => write!(f, "getfield       {}.{}:{}", r.owner, r.name, r.descriptor),
            Instruction::PutField(r) => write!(f, "putfield       {}.{}:{}", r.owner, r.name, r.descriptor),
            Instruction::GetStatic(r) => write!(f, "getstatic      {}.{}:{}", r.owner, r.name, r.descriptor),
            Instruction::PutStatic(r) => write!(f, "putstatic      {}.{}:{}", r.owner, r.name, r.descriptor),
            Instruction::Invoke(kind, r) => write!(
                f,
                "{:<15}{}.{}{}",
                kind.mnemonic(),
                r.owner,
                r.name,
                r.descriptor
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_mnemonics() {
        assert_eq!(Instruction::Iconst(3).to_string(), "iconst_3");
        assert_eq!(Instruction::Iconst(100).to_string(), "bipush         100");
        assert_eq!(
            Instruction::Convert(Primitive::Int, Primitive::Byte).to_string(),
            "i2b"
        );
        assert_eq!(Instruction::Load(Kind::Ref, 0).to_string(), "aload          0");
        assert_eq!(Instruction::Arith(Kind::Long, ArithOp::Add).to_string(), "ladd");
    }

    #[test]
    fn test_cond_negate_roundtrip() {
        for cond in [Cond::Eq, Cond::Ne, Cond::Lt, Cond::Ge, Cond::Gt, Cond::Le] {
            assert_eq!(cond.negate().negate(), cond);
        }
    }
}
