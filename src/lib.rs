// Jvmgen Bytecode Backend
// Lowers a type-checked script tree to class files and runs them on a reference VM

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod error;
pub mod log;
pub mod lookup;
pub mod types;
pub mod vm;

pub use compiler::{classname_from_filename, compile_script, CompiledUnit, Env};
pub use config::CompilerConfig;
pub use error::{CompileError, Diagnostic, Fault, VmError};

#[cfg(test)]
pub mod test_utils {
    use std::sync::Once;

    static INIT: Once = Once::new();

    /// Route `tracing` output through the test harness; `RUST_LOG` filters it
    pub fn init_test_logging() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}
