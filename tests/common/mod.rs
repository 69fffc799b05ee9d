// Jvmgen Test Harness
// Compiles typed trees into a unit and runs its main class on the reference VM

#![allow(dead_code)]

use std::sync::Once;

use jvmgen::ast::{AstBuilder, Node};
use jvmgen::lookup::MethodTable;
use jvmgen::types::TypeSystem;
use jvmgen::vm::Vm;
use jvmgen::{compile_script, CompileError, CompiledUnit, CompilerConfig, Env, VmError};

static INIT: Once = Once::new();

/// `RUST_LOG=jvmgen=debug cargo test` shows emission progress
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Compile the script built by `build` as `demo.mirah`
pub fn compile(types: &TypeSystem, build: impl FnOnce(&mut AstBuilder<'_>) -> Node) -> Result<CompiledUnit, CompileError> {
    init_logging();
    let mut b = AstBuilder::new(types);
    let script = build(&mut b);
    let map = b.finish();
    let table = MethodTable::new(types)?;
    let config = CompilerConfig::default().verbose(true);
    let env = Env {
        types,
        oracle: &map,
        methods: &table,
        config: &config,
    };
    compile_script(&env, "demo.mirah", &script)
}

/// Compile and run `Demo.main`; returns what it printed and how it ended
pub fn run(build: impl FnOnce(&mut AstBuilder<'_>) -> Node) -> (String, Result<(), VmError>) {
    let types = TypeSystem::new();
    let unit = match compile(&types, build) {
        Ok(unit) => unit,
        Err(error) => panic!("script failed to compile: {}", error),
    };
    let mut vm = Vm::new();
    vm.load_unit(unit);
    let result = vm.run_main("Demo", &[]);
    (vm.take_output(), result)
}

/// Output of a script that must finish normally
pub fn output_of(build: impl FnOnce(&mut AstBuilder<'_>) -> Node) -> String {
    let (output, result) = run(build);
    if let Err(error) = result {
        panic!("script failed: {} (printed {:?})", error, output);
    }
    output
}
