// Jvmgen Native Caller
// Lets native methods call back into the interpreter and raise Java exceptions

use super::value::{ObjectRef, Value};
use crate::error::VmError;

/// Why execution of a method stopped early
#[derive(Debug)]
pub enum Unwind {
    /// A Java exception in flight; handlers may catch it
    Throw(ObjectRef),
    /// A broken class model or interpreter limit; never caught
    Fatal(VmError),
}

impl From<VmError> for Unwind {
    fn from(error: VmError) -> Self {
        Unwind::Fatal(error)
    }
}

pub type Flow<T> = Result<T, Unwind>;

/// What native methods may ask of the interpreter
pub trait NativeCaller {
    /// Virtual call on `receiver`, dispatched through user classes first
    fn call_virtual(&mut self, receiver: Value, name: &str, descriptor: &str, args: Vec<Value>) -> Flow<Option<Value>>;

    /// Build a throwable of `class` (internal name) carrying `message`
    fn exception(&mut self, class: &str, message: Option<&str>) -> Unwind;

    /// Standard output sink
    fn out(&mut self) -> &mut String;
}
