// Jvmgen Type System
// Name-keyed registry of types, lazily created and cached per name

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use rustc_hash::FxHashMap;

use super::primitive::Primitive;
use super::ty::{ClassMirror, Type, TypeKind};
use crate::error::{EmitResult, Fault};

/// Qualified class name: dotted identifiers, `$` allowed for nested classes
static CLASS_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(\.[A-Za-z_$][A-Za-z0-9_$]*)*$")
        .expect("class name pattern")
});

/// Trailing `[]` pairs of an array type name
static ARRAY_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)((\[\])+)$").expect("array suffix pattern"));

const OBJECT: &str = "java.lang.Object";

/// (name, superclass, interfaces, is_interface)
type CoreClass = (&'static str, Option<&'static str>, &'static [&'static str], bool);

/// Classes known before any user code is compiled. Parents come first.
const CORE_CLASSES: &[CoreClass] = &[
    ("java.io.Serializable", None, &[], true),
    ("java.lang.Comparable", None, &[], true),
    ("java.lang.CharSequence", None, &[], true),
    ("java.lang.Cloneable", None, &[], true),
    ("java.lang.Runnable", None, &[], true),
    ("java.lang.Iterable", None, &[], true),
    ("java.util.Collection", None, &["java.lang.Iterable"], true),
    ("java.util.List", None, &["java.util.Collection"], true),
    ("java.util.RandomAccess", None, &[], true),
    ("java.lang.String", Some(OBJECT), &["java.io.Serializable", "java.lang.Comparable", "java.lang.CharSequence"], false),
    ("java.lang.StringBuilder", Some(OBJECT), &["java.io.Serializable", "java.lang.CharSequence"], false),
    ("java.lang.Number", Some(OBJECT), &["java.io.Serializable"], false),
    ("java.lang.Integer", Some("java.lang.Number"), &["java.lang.Comparable"], false),
    ("java.lang.Long", Some("java.lang.Number"), &["java.lang.Comparable"], false),
    ("java.lang.Short", Some("java.lang.Number"), &["java.lang.Comparable"], false),
    ("java.lang.Byte", Some("java.lang.Number"), &["java.lang.Comparable"], false),
    ("java.lang.Float", Some("java.lang.Number"), &["java.lang.Comparable"], false),
    ("java.lang.Double", Some("java.lang.Number"), &["java.lang.Comparable"], false),
    ("java.lang.Boolean", Some(OBJECT), &["java.io.Serializable", "java.lang.Comparable"], false),
    ("java.lang.Character", Some(OBJECT), &["java.io.Serializable", "java.lang.Comparable"], false),
    ("java.lang.Class", Some(OBJECT), &["java.io.Serializable"], false),
    ("java.lang.System", Some(OBJECT), &[], false),
    ("java.io.PrintStream", Some(OBJECT), &[], false),
    ("java.util.regex.Pattern", Some(OBJECT), &["java.io.Serializable"], false),
    ("java.lang.Throwable", Some(OBJECT), &["java.io.Serializable"], false),
    ("java.lang.Exception", Some("java.lang.Throwable"), &[], false),
    ("java.lang.Error", Some("java.lang.Throwable"), &[], false),
    ("java.lang.RuntimeException", Some("java.lang.Exception"), &[], false),
    ("java.lang.IllegalArgumentException", Some("java.lang.RuntimeException"), &[], false),
    ("java.lang.IllegalStateException", Some("java.lang.RuntimeException"), &[], false),
    ("java.lang.UnsupportedOperationException", Some("java.lang.RuntimeException"), &[], false),
    ("java.lang.ArithmeticException", Some("java.lang.RuntimeException"), &[], false),
    ("java.lang.NullPointerException", Some("java.lang.RuntimeException"), &[], false),
    ("java.lang.ClassCastException", Some("java.lang.RuntimeException"), &[], false),
    ("java.lang.IndexOutOfBoundsException", Some("java.lang.RuntimeException"), &[], false),
    ("java.lang.ArrayIndexOutOfBoundsException", Some("java.lang.IndexOutOfBoundsException"), &[], false),
    ("java.util.AbstractCollection", Some(OBJECT), &["java.util.Collection"], false),
    ("java.util.AbstractList", Some("java.util.AbstractCollection"), &["java.util.List"], false),
    ("java.util.ArrayList", Some("java.util.AbstractList"), &["java.util.List", "java.util.RandomAccess", "java.lang.Cloneable", "java.io.Serializable"], false),
    ("java.util.Collections", Some(OBJECT), &[], false),
    ("java.util.Calendar", Some(OBJECT), &["java.io.Serializable", "java.lang.Cloneable", "java.lang.Comparable"], false),
    ("java.util.GregorianCalendar", Some("java.util.Calendar"), &[], false),
];

/// The process-wide type registry. Types are immutable once complete; only
/// the name map is guarded.
pub struct TypeSystem {
    registry: RwLock<FxHashMap<String, Type>>,
    primitives: FxHashMap<Primitive, Type>,
    void: Type,
    null: Type,
    unreachable: Type,
    block: Type,
}

impl TypeSystem {
    pub fn new() -> Self {
        let primitives = Primitive::ALL
            .into_iter()
            .map(|p| (p, Type::new(p.name(), TypeKind::Primitive(p))))
            .collect();

        let object = Type::with_mirror(
            OBJECT,
            TypeKind::Object,
            ClassMirror {
                superclass: None,
                interfaces: Vec::new(),
                is_interface: false,
            },
        );
        let mut registry = FxHashMap::default();
        registry.insert(OBJECT.to_string(), object);

        let system = Self {
            registry: RwLock::new(registry),
            primitives,
            void: Type::new("void", TypeKind::Void),
            null: Type::new("null", TypeKind::Null),
            unreachable: Type::new(":unreachable", TypeKind::Unreachable),
            block: Type::new(":block", TypeKind::Block),
        };
        for (name, superclass, interfaces, is_interface) in CORE_CLASSES {
            // Parents are listed before children, so this cannot miss
            if let Err(fault) = system.define_class(name, *superclass, interfaces, *is_interface) {
                panic!("core class {}: {}", name, fault);
            }
        }
        system
    }

    // ==================== Special types ====================

    pub fn object(&self) -> Type {
        self.registry.read()[OBJECT].clone()
    }

    pub fn string(&self) -> Type {
        self.registry.read()["java.lang.String"].clone()
    }

    pub fn void(&self) -> Type {
        self.void.clone()
    }

    pub fn null(&self) -> Type {
        self.null.clone()
    }

    pub fn unreachable(&self) -> Type {
        self.unreachable.clone()
    }

    pub fn block(&self) -> Type {
        self.block.clone()
    }

    pub fn primitive(&self, primitive: Primitive) -> Type {
        self.primitives[&primitive].clone()
    }

    /// An error sentinel carrying the message an earlier phase reported
    pub fn error(&self, message: impl Into<String>) -> Type {
        Type::new(":error", TypeKind::Error(vec![message.into()]))
    }

    // ==================== Lookup ====================

    /// Find a type by source name: primitives, `void`, classes and `T[]` arrays
    pub fn get(&self, name: &str) -> EmitResult<Type> {
        if name == "void" {
            return Ok(self.void());
        }
        if let Some(p) = Primitive::from_name(name) {
            return Ok(self.primitive(p));
        }
        if let Some(caps) = ARRAY_SUFFIX.captures(name) {
            let mut ty = self.get(&caps[1])?;
            for _ in 0..caps[2].len() / 2 {
                ty = self.array_of(&ty);
            }
            return Ok(ty);
        }
        self.registry
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Fault::UnknownType(name.to_string()))
    }

    /// Like `get`, but accepts internal (slash-separated) names
    pub fn get_internal(&self, internal: &str) -> EmitResult<Type> {
        self.get(&internal.replace('/', "."))
    }

    fn validate_name(name: &str) -> EmitResult<()> {
        if CLASS_NAME.is_match(name) && Primitive::from_name(name).is_none() && name != "void" {
            Ok(())
        } else {
            Err(Fault::BadTypeName(name.to_string()))
        }
    }

    /// Forward-declare a class so it can be referenced before its
    /// hierarchy is known. The result stays incomplete until defined.
    pub fn declare(&self, name: &str) -> EmitResult<Type> {
        Self::validate_name(name)?;
        let mut registry = self.registry.write();
        let ty = registry
            .entry(name.to_string())
            .or_insert_with(|| Type::new(name, TypeKind::Object));
        Ok(ty.clone())
    }

    /// Define (or complete a forward-declared) class type
    pub fn define_class(
        &self,
        name: &str,
        superclass: Option<&str>,
        interfaces: &[&str],
        is_interface: bool,
    ) -> EmitResult<Type> {
        Self::validate_name(name)?;
        let superclass = match superclass {
            Some(s) => Some(self.get(s)?),
            None if is_interface || name == OBJECT => None,
            None => Some(self.object()),
        };
        let interfaces = interfaces
            .iter()
            .map(|i| self.get(i))
            .collect::<EmitResult<Vec<_>>>()?;
        let mirror = ClassMirror {
            superclass,
            interfaces,
            is_interface,
        };

        let ty = self.declare(name)?;
        if !ty.complete(mirror) {
            return Err(Fault::Internal(format!("class {} defined twice", name)));
        }
        Ok(ty)
    }

    /// Array of `component`, memoized on the component type
    pub fn array_of(&self, component: &Type) -> Type {
        component.memo_array(|| {
            Type::with_mirror(
                format!("{}[]", component.name()),
                TypeKind::Array(component.clone()),
                ClassMirror {
                    superclass: Some(self.object()),
                    interfaces: Vec::new(),
                    is_interface: false,
                },
            )
        })
    }

    /// Class-object type of `base`, memoized on the base type
    pub fn meta_of(&self, base: &Type) -> Type {
        base.memo_meta(|| Type::new(base.name(), TypeKind::Meta(base.clone())))
    }

    /// Builder callback: first common superclass of two internal names,
    /// used when merging stack states at branch targets
    pub fn widen_names(&self, a: &str, b: &str) -> String {
        match (self.get_internal(a), self.get_internal(b)) {
            (Ok(left), Ok(right)) => {
                let common = left.widen(&right, self);
                if common.is_error() {
                    "java/lang/Object".to_string()
                } else {
                    common.internal_name()
                }
            }
            _ => "java/lang/Object".to_string(),
        }
    }
}

impl Default for TypeSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_types_are_cached_per_name() {
        let types = TypeSystem::new();
        let a = types.get("java.lang.String").unwrap();
        let b = types.get("java.lang.String").unwrap();
        assert_eq!(a, b);
        assert_eq!(types.get("int[]").unwrap(), types.array_of(&types.get("int").unwrap()));
    }

    #[test]
    fn test_unknown_and_bad_names() {
        let types = TypeSystem::new();
        assert_eq!(types.get("Nope").unwrap_err(), Fault::UnknownType("Nope".to_string()));
        assert!(matches!(types.declare("1abc"), Err(Fault::BadTypeName(_))));
        assert!(matches!(types.declare("int"), Err(Fault::BadTypeName(_))));
    }

    #[test]
    fn test_assignable_from_is_reflexive() {
        let types = TypeSystem::new();
        let mut all: Vec<Type> = Primitive::ALL.into_iter().map(|p| types.primitive(p)).collect();
        for name in ["java.lang.Object", "java.lang.String", "java.util.List", "java.util.ArrayList"] {
            all.push(types.get(name).unwrap());
        }
        all.push(types.get("int[]").unwrap());
        all.push(types.meta_of(&types.string()));
        for ty in &all {
            assert!(ty.assignable_from(ty), "{} not reflexive", ty);
            assert_eq!(&ty.widen(ty, &types), ty);
        }
    }

    #[test]
    fn test_assignable_special_cases() {
        let types = TypeSystem::new();
        let list = types.get("java.util.List").unwrap();
        let string = types.string();
        let int = types.primitive(Primitive::Int);

        assert!(string.assignable_from(&types.null()));
        assert!(!int.assignable_from(&types.null()));
        assert!(int.assignable_from(&types.error("boom")));
        assert!(string.assignable_from(&types.unreachable()));
        assert!(list.assignable_from(&types.block()));
        assert!(!string.assignable_from(&types.block()));
        assert!(list.assignable_from(&types.get("java.util.ArrayList").unwrap()));
        assert!(!string.assignable_from(&list));
    }

    #[test]
    fn test_widen_finds_common_ancestor() {
        let types = TypeSystem::new();
        let integer = types.get("java.lang.Integer").unwrap();
        let long = types.get("java.lang.Long").unwrap();
        assert_eq!(integer.widen(&long, &types).name(), "java.lang.Number");

        let string = types.string();
        let list = types.get("java.util.ArrayList").unwrap();
        assert_eq!(string.widen(&list, &types).name(), "java.io.Serializable");

        let int = types.primitive(Primitive::Int);
        let double = types.primitive(Primitive::Double);
        assert_eq!(int.widen(&double, &types), double);
        assert!(int.widen(&string, &types).is_error());
    }

    #[test]
    fn test_ancestors_end_with_object() {
        let types = TypeSystem::new();
        let ancestors = types.get("java.util.ArrayList").unwrap().ancestors_and_interfaces(&types);
        assert_eq!(ancestors[0].name(), "java.util.AbstractList");
        assert_eq!(ancestors.last().map(|t| t.name()), Some("java.lang.Object"));
        assert!(types.primitive(Primitive::Long).ancestors_and_interfaces(&types).is_empty());
    }

    #[test]
    fn test_incomplete_type_faults() {
        let types = TypeSystem::new();
        let pending = types.declare("demo.Later").unwrap();
        assert!(!pending.is_complete());
        assert_eq!(pending.superclass(), Err(Fault::IncompleteType("demo.Later".to_string())));
        types.define_class("demo.Later", None, &["java.lang.Runnable"], false).unwrap();
        assert_eq!(pending.superclass().unwrap(), Some(types.object()));
    }

    #[test]
    fn test_widen_names_callback() {
        let types = TypeSystem::new();
        assert_eq!(types.widen_names("java/lang/Integer", "java/lang/Double"), "java/lang/Number");
        assert_eq!(types.widen_names("java/lang/Integer", "no/such/Type"), "java/lang/Object");
    }

    #[test]
    fn test_descriptors() {
        let types = TypeSystem::new();
        assert_eq!(types.get("int[][]").unwrap().descriptor(), "[[I");
        assert_eq!(types.string().descriptor(), "Ljava/lang/String;");
        assert_eq!(types.get("java.lang.String[]").unwrap().internal_name(), "[Ljava/lang/String;");
    }
}
