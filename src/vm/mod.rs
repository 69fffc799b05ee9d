// Jvmgen VM Module
// Reference interpreter used to execute compiled units in tests

mod caller;
mod natives;
mod value;
#[allow(clippy::module_inception)]
mod vm;

pub use caller::{Flow, NativeCaller, Unwind};
pub use value::{format_double, format_float, Object, ObjectRef, Value};
pub use vm::Vm;
