// Jvmgen Method Lookup
// Resolution of calls to members that know how to emit themselves

mod array;
mod intrinsics;
mod java;
mod table;

use std::fmt;
use std::sync::Arc;

use crate::ast::Node;
use crate::bytecode::Label;
use crate::compiler::Emitter;
use crate::error::{EmitResult, Fault};
use crate::types::Type;

pub use array::{ArrayMember, ArrayOp};
pub use intrinsics::{ClassLiteral, Comparison, InstanceOf, Math, Not};
pub use java::{JavaField, JavaMethod};
pub use table::MethodTable;

/// What a resolved member does when called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    MathOp,
    ComparisonOp,
    Method,
    StaticMethod,
    FieldAccess,
    StaticFieldAccess,
    FieldAssign,
    StaticFieldAssign,
    Constructor,
    StaticInitializer,
    ArrayAccess,
    ArrayAssign,
    ArrayLength,
    ClassLiteral,
    InstanceOf,
}

impl MemberKind {
    /// Called on the class rather than on an instance
    pub fn is_static(self) -> bool {
        matches!(
            self,
            MemberKind::StaticMethod
                | MemberKind::StaticFieldAccess
                | MemberKind::StaticFieldAssign
                | MemberKind::Constructor
                | MemberKind::StaticInitializer
                | MemberKind::ClassLiteral
        )
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberKind::MathOp => "MATH_OP",
            MemberKind::ComparisonOp => "COMPARISON_OP",
            MemberKind::Method => "METHOD",
            MemberKind::StaticMethod => "STATIC_METHOD",
            MemberKind::FieldAccess => "FIELD_ACCESS",
            MemberKind::StaticFieldAccess => "STATIC_FIELD_ACCESS",
            MemberKind::FieldAssign => "FIELD_ASSIGN",
            MemberKind::StaticFieldAssign => "STATIC_FIELD_ASSIGN",
            MemberKind::Constructor => "CONSTRUCTOR",
            MemberKind::StaticInitializer => "STATIC_INITIALIZER",
            MemberKind::ArrayAccess => "ARRAY_ACCESS",
            MemberKind::ArrayAssign => "ARRAY_ASSIGN",
            MemberKind::ArrayLength => "ARRAY_LENGTH",
            MemberKind::ClassLiteral => "CLASS_LITERAL",
            MemberKind::InstanceOf => "INSTANCEOF",
        };
        write!(f, "{}", name)
    }
}

/// The receiver of a call
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// An explicit receiver expression
    Expr(&'a Node),
    /// Unqualified and `super` calls: `self` (or the class, when static)
    ImplicitSelf,
}

/// One call being emitted
#[derive(Debug, Clone, Copy)]
pub struct CallSite<'a> {
    pub target: Target<'a>,
    pub args: &'a [Node],
    pub node: &'a Node,
}

/// A resolved member. Each member emits its own invocation, which lets
/// intrinsics inline code and supply branch fast paths.
pub trait Method: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> MemberKind;

    fn declaring_type(&self) -> &Type;

    fn argument_types(&self) -> &[Type];

    fn return_type(&self) -> &Type;

    fn is_static(&self) -> bool {
        self.kind().is_static()
    }

    /// Method descriptor built from the argument and return types
    fn descriptor(&self) -> String {
        let args: String = self.argument_types().iter().map(Type::descriptor).collect();
        format!("({}){}", args, self.return_type().descriptor())
    }

    /// Emit the call, leaving the result on the stack only if `want_value`
    fn call<'a>(&self, em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, want_value: bool) -> EmitResult<()>;

    /// Non-virtual call on the superclass implementation
    fn call_special<'a>(&self, _em: &mut Emitter<'_, 'a>, _site: &CallSite<'a>, _want_value: bool) -> EmitResult<()> {
        Err(Fault::Unsupported("super call to a non-method member"))
    }

    /// Whether `jump_if`/`jump_if_not` avoid materializing a boolean
    fn branches(&self) -> bool {
        false
    }

    fn jump_if<'a>(&self, _em: &mut Emitter<'_, 'a>, _site: &CallSite<'a>, _target: Label) -> EmitResult<()> {
        Err(Fault::Unsupported("branch on a non-branching member"))
    }

    fn jump_if_not<'a>(&self, _em: &mut Emitter<'_, 'a>, _site: &CallSite<'a>, _target: Label) -> EmitResult<()> {
        Err(Fault::Unsupported("branch on a non-branching member"))
    }
}

/// Maps a receiver type, a name and argument types to a member
pub trait MethodResolver {
    fn resolve(&self, receiver: &Type, name: &str, args: &[Type]) -> Option<Arc<dyn Method>>;

    /// Constructor of `ty` accepting `args`
    fn constructor(&self, ty: &Type, args: &[Type]) -> Option<Arc<dyn Method>>;

    /// Make a member of user code visible to resolution
    fn declare(&self, member: Arc<dyn Method>);
}

/// Emit the receiver of a member. Class receivers (meta types) push nothing.
pub(crate) fn emit_receiver<'a>(em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, want_value: bool) -> EmitResult<()> {
    match site.target {
        Target::Expr(node) => {
            let ty = em.node_type(node)?;
            em.emit(node, want_value && !ty.is_meta())
        }
        Target::ImplicitSelf => {
            if want_value {
                em.emit_self()?;
            }
            Ok(())
        }
    }
}

/// Emit every argument converted to the parameter type
pub(crate) fn emit_args<'a>(em: &mut Emitter<'_, 'a>, site: &CallSite<'a>, params: &[Type]) -> EmitResult<()> {
    for (arg, param) in site.args.iter().zip(params) {
        em.emit_as(arg, param)?;
    }
    Ok(())
}

/// Leave, drop or fake a call result depending on what the caller wants
pub(crate) fn finish_result(em: &mut Emitter<'_, '_>, ret: &Type, want_value: bool) -> EmitResult<()> {
    let method = em.method()?;
    if want_value && ret.is_void() {
        method.emit(crate::bytecode::Instruction::AconstNull);
    } else if !want_value {
        ret.pop(method);
    }
    Ok(())
}
