// Jvmgen Compiler Module
// Turns a typed script tree into class files

mod control;
mod definition;
mod emitter;
mod frame;
mod jump;
mod scope;
mod unit;

use std::sync::Arc;

pub use emitter::{BindingStrategy, Emitter};
pub use jump::{JumpScope, JumpScopes, JumpTarget, LoopLabels, PendingEnsures};
pub use scope::{Scope, ScopeId, ScopeKind, ScopeTable};
pub use unit::{CompileUnit, CompiledUnit};

use frame::{FrameBody, MethodSpec};

use crate::ast::{Argument, Node, NodeKind, TypeOracle};
use crate::bytecode::{access, ClassBuilder};
use crate::config::CompilerConfig;
use crate::error::{CompileError, EmitResult, Fault};
use crate::lookup::{JavaMethod, MethodResolver};
use crate::types::{Type, TypeSystem};

/// Everything emission reads but never changes
#[derive(Clone, Copy)]
pub struct Env<'e> {
    pub types: &'e TypeSystem,
    pub oracle: &'e dyn TypeOracle,
    pub methods: &'e dyn MethodResolver,
    pub config: &'e CompilerConfig,
}

/// `foo_bar.mirah` -> `FooBar`
pub fn classname_from_filename(file: &str) -> String {
    let base = file.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(file);
    let stem = match base.rfind('.') {
        Some(0) | None => base,
        Some(dot) => &base[..dot],
    };
    let mut name = String::with_capacity(stem.len());
    for word in stem.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
    }
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "Script");
    }
    name
}

/// Compile one script. Top-level methods become static methods of the
/// script class and the remaining statements its `main`.
pub fn compile_script(env: &Env<'_>, file: &str, script: &Node) -> Result<CompiledUnit, CompileError> {
    let log = env.config.logger("compiler");
    let NodeKind::Script(statements) = &script.kind else {
        return Err(Fault::Unsupported("compile unit other than a script").into());
    };
    let class_name = classname_from_filename(file);
    log.debug(format_args!("compiling {} as {}", file, class_name));

    let main_type = match env.types.get(&class_name) {
        Ok(ty) if ty.is_complete() => ty,
        _ => env.types.define_class(&class_name, None, &[], false)?,
    };
    let scopes = ScopeTable::analyze(&class_name, script, env.oracle, env.types)?;
    log.debug(format_args!("{} scopes", scopes.len()));
    register_members(env, &main_type, script, true)?;
    env.methods
        .declare(Arc::new(JavaMethod::constructor(main_type.clone(), Vec::new(), env.types.void())));

    let mut unit = CompileUnit::new(file, env.config.logger("unit"));
    let mut class = ClassBuilder::new(
        main_type.internal_name(),
        Some("java/lang/Object".to_string()),
        Vec::new(),
        access::PUBLIC | access::SUPER,
    );
    class.set_version(env.config.class_version);
    if let Some(source) = &env.config.source_file {
        class.set_source_file(source.clone());
    }

    let class = {
        let mut emitter = Emitter::new(&mut unit, env, &scopes, class, main_type, env.config.logger("emitter"));
        emitter.compile_script_class(script, statements)?;
        emitter.into_class()
    };
    unit.add_main_class(class.finish());
    unit.finish(env.config)
}

impl<'u, 'a> Emitter<'u, 'a> {
    fn compile_script_class(&mut self, script: &'a Node, statements: &'a [Node]) -> EmitResult<()> {
        let mut main = Vec::new();
        for statement in statements {
            match &statement.kind {
                NodeKind::MethodDefinition(def) => self.compile_method(statement, def, true)?,
                NodeKind::ConstructorDefinition(def) => self.compile_constructor(statement, def)?,
                NodeKind::ClassDefinition(def) => self.compile_class(statement, def)?,
                _ => main.push(statement),
            }
        }

        let types = self.types();
        let mut spec = MethodSpec::new(
            "main",
            access::PUBLIC | access::STATIC,
            types.void(),
            FrameBody::Statements(main),
        );
        spec.params = vec![("argv".to_string(), types.array_of(&types.string()))];
        spec.scope = self.scopes.scope_for(script.id).map(|s| s.id);
        self.method_body(spec)?;
        self.default_constructor()
    }
}

// ==================== Member Registration ====================

/// Make every user-defined method and constructor resolvable before any
/// body is emitted, so calls may precede definitions
fn register_members(env: &Env<'_>, owner: &Type, node: &Node, static_ctx: bool) -> EmitResult<()> {
    match &node.kind {
        NodeKind::Script(statements) => {
            for statement in statements {
                register_members(env, owner, statement, static_ctx)?;
            }
        }
        NodeKind::ClassDefinition(def) => {
            let ty = inferred(env, node)?;
            let mut has_constructor = false;
            for member in &def.body {
                has_constructor |= matches!(member.kind, NodeKind::ConstructorDefinition(_));
                register_members(env, &ty, member, false)?;
            }
            if !def.is_interface && !has_constructor {
                env.methods
                    .declare(Arc::new(JavaMethod::constructor(ty, Vec::new(), env.types.void())));
            }
        }
        NodeKind::MethodDefinition(def) => {
            let ret = inferred(env, node)?;
            let is_static = def.is_static || static_ctx;
            for args in arities(env, &def.args)? {
                env.methods
                    .declare(Arc::new(JavaMethod::new(owner.clone(), def.name.as_str(), args, ret.clone(), is_static)));
            }
            register_nested(env, owner, def.args.iter().filter_map(|a| a.default.as_ref()), def.body.as_ref())?;
        }
        NodeKind::ConstructorDefinition(def) => {
            for args in arities(env, &def.args)? {
                env.methods
                    .declare(Arc::new(JavaMethod::constructor(owner.clone(), args, env.types.void())));
            }
            let delegate = def.delegate.iter().flat_map(|d| d.args.iter());
            register_nested(
                env,
                owner,
                def.args.iter().filter_map(|a| a.default.as_ref()).chain(delegate),
                def.body.as_ref(),
            )?;
        }
        NodeKind::ClosureDefinition(def) => {
            let ty = inferred(env, node)?;
            for method in &def.methods {
                register_members(env, &ty, method, false)?;
            }
        }
        _ => {
            for child in node.children() {
                register_members(env, owner, child, static_ctx)?;
            }
        }
    }
    Ok(())
}

/// Closures inside argument defaults, delegation arguments and bodies
fn register_nested<'n>(
    env: &Env<'_>,
    owner: &Type,
    extra: impl Iterator<Item = &'n Node>,
    body: Option<&'n Node>,
) -> EmitResult<()> {
    for node in extra.chain(body) {
        register_members(env, owner, node, false)?;
    }
    Ok(())
}

/// Parameter lists of a method and of each optional-argument overload
fn arities(env: &Env<'_>, args: &[Argument]) -> EmitResult<Vec<Vec<Type>>> {
    let types = args
        .iter()
        .map(|arg| {
            env.oracle
                .inferred_type(arg.id)
                .ok_or_else(|| Fault::Internal(format!("argument {} has no type", arg.name)))
        })
        .collect::<EmitResult<Vec<_>>>()?;
    let required = args.iter().take_while(|arg| arg.default.is_none()).count();
    Ok((required..=args.len()).map(|n| types[..n].to_vec()).collect())
}

fn inferred(env: &Env<'_>, node: &Node) -> EmitResult<Type> {
    env.oracle
        .inferred_type(node.id)
        .ok_or_else(|| Fault::Internal(format!("no inferred type for {} node {}", node.describe(), node.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classname_from_filename() {
        assert_eq!(classname_from_filename("foo_bar.mirah"), "FooBar");
        assert_eq!(classname_from_filename("src/demo/hello.mirah"), "Hello");
        assert_eq!(classname_from_filename("my-script.duby"), "MyScript");
        assert_eq!(classname_from_filename("Already"), "Already");
        assert_eq!(classname_from_filename("9lives.mirah"), "Script9lives");
    }
}
