// Jvmgen Compile Unit
// Per-file state shared by every emitter: finished classes, declared
// fields, binding layouts and collected diagnostics

use rustc_hash::FxHashMap;

use crate::bytecode::{access, ClassBuilder, ClassFile, FieldInfo, Instruction, InvokeKind, Kind, MethodBuilder};
use crate::config::CompilerConfig;
use crate::error::{CompileError, Diagnostic, EmitResult, Span};
use crate::log::Logger;
use crate::types::Type;

/// Fields of one binding class, in the order captures were first emitted
#[derive(Debug, Clone)]
struct BindingLayout {
    ty: Type,
    fields: Vec<(String, Type)>,
}

#[derive(Debug)]
pub struct CompileUnit {
    file: String,
    classes: Vec<ClassFile>,
    diagnostics: Vec<Diagnostic>,
    declared_fields: FxHashMap<(String, String), Type>,
    bindings: Vec<BindingLayout>,
    log: Logger,
}

impl CompileUnit {
    pub fn new(file: impl Into<String>, log: Logger) -> Self {
        Self {
            file: file.into(),
            classes: Vec::new(),
            diagnostics: Vec::new(),
            declared_fields: FxHashMap::default(),
            bindings: Vec::new(),
            log,
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Report a source-level error; emission carries on
    pub fn report(&mut self, message: impl Into<String>, span: Span) {
        let diagnostic = Diagnostic::syntax_error(message, span, self.file.clone());
        self.log.warn(format_args!("{}", diagnostic));
        self.diagnostics.push(diagnostic);
    }

    pub fn had_error(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn add_class(&mut self, class: ClassFile) {
        self.log.debug(format_args!("finished class {}", class.name));
        self.classes.push(class);
    }

    /// The script class goes first so that it is the unit's entry point
    pub fn add_main_class(&mut self, class: ClassFile) {
        self.log.debug(format_args!("finished main class {}", class.name));
        self.classes.insert(0, class);
    }

    /// Declare a field once per (class, name). Returns the type of the first
    /// declaration and whether this call declared it.
    pub fn declare_field(&mut self, class: &str, name: &str, ty: &Type) -> (Type, bool) {
        let key = (class.to_string(), name.to_string());
        if let Some(existing) = self.declared_fields.get(&key) {
            return (existing.clone(), false);
        }
        self.declared_fields.insert(key, ty.clone());
        (ty.clone(), true)
    }

    pub fn is_binding(&self, ty: &Type) -> bool {
        self.bindings.iter().any(|b| &b.ty == ty)
    }

    /// Make sure a class is generated for `binding`
    pub fn declare_binding(&mut self, binding: &Type) -> usize {
        match self.bindings.iter().position(|b| &b.ty == binding) {
            Some(index) => index,
            None => {
                self.log.debug(format_args!("binding class {}", binding));
                self.bindings.push(BindingLayout {
                    ty: binding.clone(),
                    fields: Vec::new(),
                });
                self.bindings.len() - 1
            }
        }
    }

    /// Field of a binding holding the captured local `name`, added the first
    /// time the capture is emitted. Returns the field's type.
    pub fn binding_field(&mut self, binding: &Type, name: &str, ty: &Type) -> Type {
        let index = self.declare_binding(binding);
        let layout = &mut self.bindings[index];
        if let Some((_, existing)) = layout.fields.iter().find(|(field, _)| field == name) {
            return existing.clone();
        }
        self.log
            .debug(format_args!("captured {} as {}.{}", ty, binding, name));
        layout.fields.push((name.to_string(), ty.clone()));
        ty.clone()
    }

    /// Close the unit: emit binding classes, or fail with the collected diagnostics
    pub fn finish(mut self, config: &CompilerConfig) -> Result<CompiledUnit, CompileError> {
        if !self.diagnostics.is_empty() {
            return Err(CompileError::Failed(self.diagnostics));
        }
        for layout in std::mem::take(&mut self.bindings) {
            let class = binding_class(&layout, config)?;
            self.add_class(class);
        }
        Ok(CompiledUnit {
            classes: self.classes,
        })
    }
}

fn binding_class(layout: &BindingLayout, config: &CompilerConfig) -> EmitResult<ClassFile> {
    let mut class = ClassBuilder::new(
        layout.ty.internal_name(),
        Some("java/lang/Object".to_string()),
        Vec::new(),
        access::PUBLIC | access::SUPER,
    );
    class.set_version(config.class_version);
    if let Some(file) = &config.source_file {
        class.set_source_file(file.clone());
    }
    for (name, ty) in &layout.fields {
        class.add_field(FieldInfo::new(name.clone(), ty, access::PUBLIC));
    }

    let mut ctor = MethodBuilder::new("<init>", "()V", access::PUBLIC);
    ctor.emit(Instruction::Load(Kind::Ref, 0));
    ctor.emit(Instruction::invoke(InvokeKind::Special, "java/lang/Object", "<init>", "()V"));
    ctor.emit(Instruction::Return(None));
    class.add_method(ctor.stop()?);
    Ok(class.finish())
}

/// Classes produced from one file. The first class is the script class.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    classes: Vec<ClassFile>,
}

impl CompiledUnit {
    pub fn classes(&self) -> &[ClassFile] {
        &self.classes
    }

    /// Look up a class by dotted or internal name
    pub fn class(&self, name: &str) -> Option<&ClassFile> {
        let internal = name.replace('.', "/");
        self.classes.iter().find(|c| c.name == internal)
    }

    pub fn main_class(&self) -> Option<&ClassFile> {
        self.classes.first()
    }

    pub fn into_classes(self) -> Vec<ClassFile> {
        self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Primitive, TypeSystem};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fields_keep_first_seen_type() {
        let types = TypeSystem::new();
        let mut unit = CompileUnit::new("demo.mirah", Logger::quiet("unit"));
        let int = types.primitive(Primitive::Int);
        let (first, declared) = unit.declare_field("Demo", "count", &int);
        assert!(declared);
        let (again, declared) = unit.declare_field("Demo", "count", &types.string());
        assert!(!declared);
        assert_eq!(first, again);
        assert_eq!(again.name(), "int");
    }

    #[test]
    fn test_binding_fields_in_encounter_order() {
        let types = TypeSystem::new();
        let binding = types.define_class("Demo$Binding1", None, &[], false).unwrap();
        let mut unit = CompileUnit::new("demo.mirah", Logger::quiet("unit"));
        unit.binding_field(&binding, "y", &types.string());
        unit.binding_field(&binding, "x", &types.primitive(Primitive::Long));
        unit.binding_field(&binding, "y", &types.string());

        let compiled = unit.finish(&CompilerConfig::default()).unwrap();
        let class = compiled.class("Demo$Binding1").unwrap();
        let names: Vec<&str> = class.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["y", "x"]);
        assert_eq!(class.fields[1].descriptor, "J");
        assert!(class.method("<init>", "()V").is_some());
    }

    #[test]
    fn test_diagnostics_fail_the_unit() {
        let mut unit = CompileUnit::new("demo.mirah", Logger::quiet("unit"));
        unit.report("break outside of loop", Span::line(4));
        assert!(unit.had_error());
        match unit.finish(&CompilerConfig::default()) {
            Err(CompileError::Failed(diagnostics)) => {
                assert_eq!(diagnostics.len(), 1);
                assert_eq!(diagnostics[0].span.start.line, 4);
            }
            other => panic!("expected failure, got {:?}", other.map(|u| u.classes().len())),
        }
    }
}
