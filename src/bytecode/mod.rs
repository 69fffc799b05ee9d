// Jvmgen Bytecode Module
// Instruction set and the builders that assemble class files

mod class;
mod method;
mod opcode;

pub use class::{Annotation, AnnotationValue, ClassBuilder, ClassFile, ConstantValue, FieldInfo};
pub use method::{access, ExceptionEntry, LocalVar, MethodBuilder, MethodInfo};
pub use opcode::{ArithOp, ArrayKind, Cond, Constant, FieldRef, Instruction, InvokeKind, Kind, Label, MethodRef};
