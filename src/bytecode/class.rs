// Jvmgen Class Builder
// Classes, fields and annotations of one output class file

use serde::Serialize;
use std::fmt;

use super::method::{access, MethodInfo};
use crate::config::DEFAULT_CLASS_VERSION;
use crate::types::Type;

/// Element value of an annotation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AnnotationValue {
    String(String),
    Int(i64),
    Boolean(bool),
    Class(String),
    Array(Vec<AnnotationValue>),
    Nested(Annotation),
}

impl fmt::Display for AnnotationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationValue::String(s) => write!(f, "{:?}", s),
            AnnotationValue::Int(n) => write!(f, "{}", n),
            AnnotationValue::Boolean(b) => write!(f, "{}", b),
            AnnotationValue::Class(c) => write!(f, "{}.class", c),
            AnnotationValue::Array(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            AnnotationValue::Nested(annotation) => write!(f, "{}", annotation),
        }
    }
}

/// An annotation on a field or method
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    /// Descriptor of the annotation type
    pub type_name: String,
    /// Retained at runtime (RuntimeVisibleAnnotations) or class-only
    pub runtime: bool,
    pub values: Vec<(String, AnnotationValue)>,
}

impl Annotation {
    pub fn new(type_name: impl Into<String>, runtime: bool) -> Self {
        Self {
            type_name: type_name.into(),
            runtime,
            values: Vec::new(),
        }
    }

    pub fn value(mut self, name: impl Into<String>, value: AnnotationValue) -> Self {
        self.values.push((name.into(), value));
        self
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.type_name)?;
        if !self.values.is_empty() {
            write!(f, "(")?;
            for (i, (name, value)) in self.values.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}={}", name, value)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// ConstantValue attribute of a static final field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConstantValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantValue::Int(n) => write!(f, "{}", n),
            ConstantValue::Long(n) => write!(f, "{}L", n),
            ConstantValue::Float(n) => write!(f, "{}f", n),
            ConstantValue::Double(n) => write!(f, "{}d", n),
            ConstantValue::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// A field declaration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub descriptor: String,
    pub access: u16,
    pub constant: Option<ConstantValue>,
    pub annotations: Vec<Annotation>,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, ty: &Type, access: u16) -> Self {
        Self {
            name: name.into(),
            descriptor: ty.descriptor(),
            access,
            constant: None,
            annotations: Vec::new(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    /// Turn into a `static final` constant with an initial value
    pub fn constant(mut self, value: ConstantValue) -> Self {
        self.access |= access::STATIC | access::FINAL;
        self.constant = Some(value);
        self
    }

    pub fn annotate(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }
}

/// Accumulates one class while its members are emitted
#[derive(Debug)]
pub struct ClassBuilder {
    name: String,
    superclass: Option<String>,
    interfaces: Vec<String>,
    access: u16,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
    inner_classes: Vec<String>,
    source_file: Option<String>,
    version: u16,
}

impl ClassBuilder {
    /// All names are internal (slash-separated)
    pub fn new(name: impl Into<String>, superclass: Option<String>, interfaces: Vec<String>, access: u16) -> Self {
        Self {
            name: name.into(),
            superclass,
            interfaces,
            access,
            fields: Vec::new(),
            methods: Vec::new(),
            inner_classes: Vec::new(),
            source_file: None,
            version: DEFAULT_CLASS_VERSION,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn superclass(&self) -> Option<&str> {
        self.superclass.as_deref()
    }

    pub fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }

    pub fn set_version(&mut self, version: u16) {
        self.version = version;
    }

    pub fn set_source_file(&mut self, file: impl Into<String>) {
        self.source_file = Some(file.into());
    }

    pub fn add_field(&mut self, field: FieldInfo) {
        self.fields.push(field);
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn add_method(&mut self, method: MethodInfo) {
        self.methods.push(method);
    }

    pub fn has_method(&self, name: &str, descriptor: &str) -> bool {
        self.methods
            .iter()
            .any(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Reference a nested class (closures, bindings)
    pub fn inner_class(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.inner_classes.contains(&name) {
            self.inner_classes.push(name);
        }
    }

    pub fn finish(self) -> ClassFile {
        ClassFile {
            name: self.name,
            superclass: self.superclass,
            interfaces: self.interfaces,
            access: self.access,
            version: self.version,
            source_file: self.source_file,
            fields: self.fields,
            methods: self.methods,
            inner_classes: self.inner_classes,
        }
    }
}

/// One finished class file
#[derive(Debug, Clone, Serialize)]
pub struct ClassFile {
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub access: u16,
    pub version: u16,
    pub source_file: Option<String>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub inner_classes: Vec<String>,
}

impl ClassFile {
    pub fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodInfo> + 'a {
        self.methods.iter().filter(move |m| m.name == name)
    }

    /// Machine-readable dump of the class model
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ClassFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_interface() { "interface" } else { "class" };
        let modifiers = access::describe(self.access & !access::ABSTRACT);
        write!(f, "{} {} {}", modifiers, kind, self.name)?;
        if let Some(superclass) = &self.superclass {
            write!(f, " extends {}", superclass)?;
        }
        if !self.interfaces.is_empty() {
            write!(f, " implements {}", self.interfaces.join(", "))?;
        }
        writeln!(f)?;
        if let Some(file) = &self.source_file {
            writeln!(f, "  // source: {} (version {})", file, self.version)?;
        }
        for inner in &self.inner_classes {
            writeln!(f, "  inner {}", inner)?;
        }
        for field in &self.fields {
            for annotation in &field.annotations {
                writeln!(f, "  {}", annotation)?;
            }
            write!(f, "  {} {} {}", access::describe(field.access), field.descriptor, field.name)?;
            if let Some(constant) = &field.constant {
                write!(f, " = {}", constant)?;
            }
            writeln!(f)?;
        }
        for method in &self.methods {
            writeln!(f)?;
            write!(f, "{}", method)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Instruction, MethodBuilder};
    use crate::types::{Primitive, TypeSystem};

    fn sample() -> ClassFile {
        let types = TypeSystem::new();
        let mut class = ClassBuilder::new(
            "demo/Counter",
            Some("java/lang/Object".to_string()),
            vec!["java/lang/Runnable".to_string()],
            access::PUBLIC | access::SUPER,
        );
        let mut field = FieldInfo::new("count", &types.primitive(Primitive::Int), access::PRIVATE);
        field.annotate(Annotation::new("Ldemo/Tag;", true).value("level", AnnotationValue::Int(2)));
        class.add_field(field);
        class.add_field(
            FieldInfo::new("LIMIT", &types.primitive(Primitive::Long), access::PUBLIC)
                .constant(ConstantValue::Long(10)),
        );
        let mut run = MethodBuilder::new("run", "()V", access::PUBLIC);
        run.emit(Instruction::Return(None));
        class.add_method(run.stop().unwrap());
        class.finish()
    }

    #[test]
    fn test_disassembly_lists_members() {
        let text = sample().to_string();
        assert!(text.starts_with("public class demo/Counter extends java/lang/Object implements java/lang/Runnable"));
        assert!(text.contains("@Ldemo/Tag;(level=2)"));
        assert!(text.contains("private I count"));
        assert!(text.contains("public static final J LIMIT = 10L"));
        assert!(text.contains("public run()V"));
        assert!(text.contains("0000 return"));
    }

    #[test]
    fn test_constant_makes_static_final() {
        let class = sample();
        let limit = class.field("LIMIT").unwrap();
        assert!(limit.is_static());
        assert_eq!(limit.access & access::FINAL, access::FINAL);
        assert!(!class.field("count").unwrap().is_static());
    }

    #[test]
    fn test_json_dump() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["name"], "demo/Counter");
        assert_eq!(value["methods"][0]["name"], "run");
    }
}
