// Jvmgen VM Natives
// The slice of the Java runtime library that generated code calls into

use super::caller::{Flow, NativeCaller, Unwind};
use super::value::{
    format_char, format_double, format_float, identity_hash, string_hash, Object, ObjectRef, Value, MESSAGE_FIELD,
};
use crate::error::{VmError, VmResult};
use crate::types::Primitive;

pub const OBJECT: &str = "java/lang/Object";
pub const STRING: &str = "java/lang/String";
pub const THROWABLE: &str = "java/lang/Throwable";

pub const NULL_POINTER: &str = "java/lang/NullPointerException";
pub const ARITHMETIC: &str = "java/lang/ArithmeticException";
pub const CLASS_CAST: &str = "java/lang/ClassCastException";
pub const ARRAY_INDEX: &str = "java/lang/ArrayIndexOutOfBoundsException";
pub const NEGATIVE_SIZE: &str = "java/lang/NegativeArraySizeException";
const INDEX: &str = "java/lang/IndexOutOfBoundsException";
const UNSUPPORTED: &str = "java/lang/UnsupportedOperationException";
const ILLEGAL_ARGUMENT: &str = "java/lang/IllegalArgumentException";
const NUMBER_FORMAT: &str = "java/lang/NumberFormatException";
const PATTERN_SYNTAX: &str = "java/util/regex/PatternSyntaxException";

const LIST_INTERFACES: &[&str] = &["java/util/List", "java/util/Collection", "java/lang/Iterable"];

/// Superclass of each library class that is not a direct Object subclass
const NATIVE_SUPERS: &[(&str, &str)] = &[
    ("java/lang/Exception", THROWABLE),
    ("java/lang/Error", THROWABLE),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    (ILLEGAL_ARGUMENT, "java/lang/RuntimeException"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    (UNSUPPORTED, "java/lang/RuntimeException"),
    (ARITHMETIC, "java/lang/RuntimeException"),
    (NULL_POINTER, "java/lang/RuntimeException"),
    (CLASS_CAST, "java/lang/RuntimeException"),
    (INDEX, "java/lang/RuntimeException"),
    (ARRAY_INDEX, INDEX),
    (NEGATIVE_SIZE, "java/lang/RuntimeException"),
    (NUMBER_FORMAT, ILLEGAL_ARGUMENT),
    (PATTERN_SYNTAX, ILLEGAL_ARGUMENT),
    ("java/lang/Byte", "java/lang/Number"),
    ("java/lang/Short", "java/lang/Number"),
    ("java/lang/Integer", "java/lang/Number"),
    ("java/lang/Long", "java/lang/Number"),
    ("java/lang/Float", "java/lang/Number"),
    ("java/lang/Double", "java/lang/Number"),
    ("java/util/GregorianCalendar", "java/util/Calendar"),
];

const NATIVE_INTERFACES: &[(&str, &[&str])] = &[
    ("java/util/ArrayList", LIST_INTERFACES),
    ("java/util/Collections$UnmodifiableList", LIST_INTERFACES),
    ("java/util/List", &["java/util/Collection", "java/lang/Iterable"]),
    ("java/util/Collection", &["java/lang/Iterable"]),
    (STRING, &["java/lang/CharSequence", "java/lang/Comparable"]),
    ("java/lang/StringBuilder", &["java/lang/CharSequence"]),
    (THROWABLE, &["java/io/Serializable"]),
];

/// Superclass of a library class; `None` only for Object
pub fn native_super(class: &str) -> Option<&'static str> {
    if class == OBJECT {
        return None;
    }
    Some(
        NATIVE_SUPERS
            .iter()
            .find(|(sub, _)| *sub == class)
            .map(|(_, sup)| *sup)
            .unwrap_or(OBJECT),
    )
}

pub fn native_interfaces(class: &str) -> &'static [&'static str] {
    NATIVE_INTERFACES
        .iter()
        .find(|(name, _)| *name == class)
        .map(|(_, interfaces)| *interfaces)
        .unwrap_or(&[])
}

pub fn is_throwable(class: &str) -> bool {
    let mut current = Some(class);
    while let Some(name) = current {
        if name == THROWABLE {
            return true;
        }
        current = native_super(name);
    }
    false
}

/// A fresh, unconstructed library object
pub fn allocate(class: &str) -> VmResult<Object> {
    let object = match class {
        "java/lang/StringBuilder" => Object::Builder(String::new()),
        "java/util/ArrayList" => Object::List {
            items: Vec::new(),
            mutable: true,
        },
        OBJECT | "java/util/GregorianCalendar" => Object::Instance {
            class: class.to_string(),
            fields: Vec::new(),
        },
        _ if is_throwable(class) => throwable(class, None),
        _ => return Err(VmError::ClassNotFound(class.replace('/', "."))),
    };
    Ok(object)
}

pub fn throwable(class: &str, message: Option<&str>) -> Object {
    Object::Instance {
        class: class.to_string(),
        fields: vec![(MESSAGE_FIELD.to_string(), message.map(Value::string).unwrap_or(Value::Null))],
    }
}

/// Static fields of library classes
pub fn get_static(owner: &str, name: &str) -> Option<Value> {
    match (owner, name) {
        ("java/lang/System", "out") => Some(Value::object(Object::PrintStream)),
        ("java/util/Calendar", "AM") => Some(Value::Int(0)),
        ("java/util/Calendar", "PM") => Some(Value::Int(1)),
        (_, "TYPE") => wrapped_primitive(owner).map(|p| Value::object(Object::Class(p.name().to_string()))),
        _ => None,
    }
}

fn wrapped_primitive(wrapper: &str) -> Option<Primitive> {
    let dotted = wrapper.replace('/', ".");
    Primitive::ALL.into_iter().find(|p| p.wrapper() == dotted)
}

fn no_such_method(owner: &str, name: &str, descriptor: &str) -> Unwind {
    Unwind::Fatal(VmError::NoSuchMethod {
        owner: owner.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    })
}

// ==================== Static Methods ====================

pub fn invoke_static(
    caller: &mut dyn NativeCaller,
    owner: &str,
    name: &str,
    descriptor: &str,
    args: Vec<Value>,
) -> Flow<Option<Value>> {
    match (owner, name, args.as_slice()) {
        ("java/lang/Integer", "parseInt", [text]) => {
            let text = text.as_string()?;
            match text.as_deref().map(str::parse::<i32>) {
                Some(Ok(value)) => Ok(Some(Value::Int(value))),
                _ => {
                    let shown = text.unwrap_or_else(|| "null".to_string());
                    Err(caller.exception(NUMBER_FORMAT, Some(&format!("For input string: \"{}\"", shown))))
                }
            }
        }
        (_, "valueOf", [value]) if wrapped_primitive(owner).is_some() => Ok(Some(Value::object(Object::Boxed {
            class: owner.to_string(),
            value: value.clone(),
        }))),
        ("java/util/Collections", "unmodifiableList", [list]) => {
            let Some(list) = list.as_ref()? else {
                return Err(caller.exception(NULL_POINTER, None));
            };
            // Snapshot, not a view
            let items = match &*list.lock() {
                Object::List { items, .. } => items.clone(),
                other => {
                    return Err(VmError::TypeMismatch(format!("expected List, found {}", other.class_name())).into())
                }
            };
            Ok(Some(Value::object(Object::List { items, mutable: false })))
        }
        ("java/util/regex/Pattern", "compile", [source]) => {
            let Some(source) = source.as_string()? else {
                return Err(caller.exception(NULL_POINTER, None));
            };
            match regex::Regex::new(&source) {
                Ok(pattern) => Ok(Some(Value::object(Object::Pattern(pattern)))),
                Err(error) => Err(caller.exception(PATTERN_SYNTAX, Some(&error.to_string()))),
            }
        }
        _ => Err(no_such_method(owner, name, descriptor)),
    }
}

// ==================== Instance Methods ====================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Instance,
    Str,
    Builder,
    Array,
    List,
    Boxed,
    Pattern,
    PrintStream,
    Class,
}

impl Shape {
    fn of(object: &Object) -> Shape {
        match object {
            Object::Instance { .. } => Shape::Instance,
            Object::Str(_) => Shape::Str,
            Object::Builder(_) => Shape::Builder,
            Object::Array { .. } => Shape::Array,
            Object::List { .. } => Shape::List,
            Object::Boxed { .. } => Shape::Boxed,
            Object::Pattern(_) => Shape::Pattern,
            Object::PrintStream => Shape::PrintStream,
            Object::Class(_) => Shape::Class,
        }
    }
}

/// Instance method of a library class. `this` is never null here.
pub fn invoke_instance(
    caller: &mut dyn NativeCaller,
    this: &ObjectRef,
    owner: &str,
    name: &str,
    descriptor: &str,
    args: Vec<Value>,
) -> Flow<Option<Value>> {
    let shape = Shape::of(&this.lock());
    if name == "<init>" {
        return construct(caller, this, shape, owner, descriptor, args).map(|_| None);
    }

    let handled = match shape {
        Shape::Str => string_method(caller, this, name, &args)?,
        Shape::Builder => builder_method(caller, this, name, descriptor, &args)?,
        Shape::List => list_method(caller, this, name, &args)?,
        Shape::Boxed if name.ends_with("Value") && args.is_empty() => {
            let value = match &*this.lock() {
                Object::Boxed { value, .. } => value.clone(),
                _ => Value::Null,
            };
            Some(Some(coerce(value, return_descriptor(descriptor)?)?))
        }
        Shape::Pattern if name == "pattern" => {
            let source = match &*this.lock() {
                Object::Pattern(pattern) => pattern.as_str().to_string(),
                _ => String::new(),
            };
            Some(Some(Value::string(source)))
        }
        Shape::PrintStream if name == "print" || name == "println" => {
            let mut text = match (params(descriptor)?.first(), args.first()) {
                (Some(param), Some(value)) => render(caller, param, value)?,
                _ => String::new(),
            };
            if name == "println" {
                text.push('\n');
            }
            caller.out().push_str(&text);
            Some(None)
        }
        Shape::Instance if name == "getMessage" => Some(Some(
            this.lock().field(MESSAGE_FIELD).cloned().unwrap_or(Value::Null),
        )),
        _ => None,
    };
    if let Some(result) = handled {
        return Ok(result);
    }

    // java.lang.Object
    match (name, args.as_slice()) {
        ("toString", []) => Ok(Some(Value::string(object_to_string(this)))),
        ("hashCode", []) => Ok(Some(Value::Int(hash_code(this)))),
        ("equals", [other]) => Ok(Some(Value::boolean(java_equals(caller, this, other)?))),
        _ => Err(no_such_method(owner, name, descriptor)),
    }
}

fn construct(
    caller: &mut dyn NativeCaller,
    this: &ObjectRef,
    shape: Shape,
    owner: &str,
    descriptor: &str,
    args: Vec<Value>,
) -> Flow<()> {
    match (shape, args.as_slice()) {
        (_, []) => Ok(()),
        (Shape::Builder, [text]) => {
            let Some(text) = text.as_string()? else {
                return Err(caller.exception(NULL_POINTER, None));
            };
            if let Object::Builder(contents) = &mut *this.lock() {
                *contents = text;
            }
            Ok(())
        }
        (Shape::List, [capacity]) => {
            let capacity = capacity.as_int()?;
            if capacity < 0 {
                return Err(caller.exception(ILLEGAL_ARGUMENT, Some(&format!("Illegal Capacity: {}", capacity))));
            }
            Ok(())
        }
        (Shape::Instance, [message]) if descriptor == "(Ljava/lang/String;)V" => {
            this.lock().set_field(MESSAGE_FIELD, message.clone())?;
            Ok(())
        }
        _ => Err(no_such_method(owner, "<init>", descriptor)),
    }
}

/// `Some(result)` when the method belongs to String
fn string_method(
    caller: &mut dyn NativeCaller,
    this: &ObjectRef,
    name: &str,
    args: &[Value],
) -> Flow<Option<Option<Value>>> {
    let text = match &*this.lock() {
        Object::Str(text) => text.clone(),
        _ => return Ok(None),
    };
    let result = match (name, args) {
        ("length", []) => Value::Int(text.encode_utf16().count() as i32),
        ("toString", []) => Value::Ref(this.clone()),
        ("toUpperCase", []) => Value::string(text.to_uppercase()),
        ("isEmpty", []) => Value::boolean(text.is_empty()),
        ("concat", [other]) => match other.as_string()? {
            Some(other) => Value::string(text + &other),
            None => return Err(caller.exception(NULL_POINTER, None)),
        },
        _ => return Ok(None),
    };
    Ok(Some(Some(result)))
}

fn builder_method(
    caller: &mut dyn NativeCaller,
    this: &ObjectRef,
    name: &str,
    descriptor: &str,
    args: &[Value],
) -> Flow<Option<Option<Value>>> {
    match (name, args) {
        ("append", [value]) => {
            let param = params(descriptor)?.first().copied().unwrap_or("Ljava/lang/Object;");
            let text = render(caller, param, value)?;
            if let Object::Builder(contents) = &mut *this.lock() {
                contents.push_str(&text);
            }
            Ok(Some(Some(Value::Ref(this.clone()))))
        }
        ("toString", []) => {
            let contents = match &*this.lock() {
                Object::Builder(contents) => contents.clone(),
                _ => String::new(),
            };
            Ok(Some(Some(Value::string(contents))))
        }
        ("length", []) => {
            let length = match &*this.lock() {
                Object::Builder(contents) => contents.encode_utf16().count() as i32,
                _ => 0,
            };
            Ok(Some(Some(Value::Int(length))))
        }
        _ => Ok(None),
    }
}

fn list_method(
    caller: &mut dyn NativeCaller,
    this: &ObjectRef,
    name: &str,
    args: &[Value],
) -> Flow<Option<Option<Value>>> {
    match (name, args) {
        ("add", [value]) => {
            let added = match &mut *this.lock() {
                Object::List { items, mutable: true } => {
                    items.push(value.clone());
                    true
                }
                Object::List { .. } => false,
                _ => return Ok(None),
            };
            if !added {
                return Err(caller.exception(UNSUPPORTED, None));
            }
            Ok(Some(Some(Value::Int(1))))
        }
        ("get", [index]) => {
            let index = index.as_int()?;
            let found = match &*this.lock() {
                Object::List { items, .. } => usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .ok_or(items.len()),
                _ => return Ok(None),
            };
            match found {
                Ok(value) => Ok(Some(Some(value))),
                Err(length) => Err(caller.exception(
                    INDEX,
                    Some(&format!("Index {} out of bounds for length {}", index, length)),
                )),
            }
        }
        ("size", []) => match &*this.lock() {
            Object::List { items, .. } => Ok(Some(Some(Value::Int(items.len() as i32)))),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

// ==================== String Conversion ====================

/// Text of a value passed where a parameter of type `param` (a
/// descriptor) is expected, as `print` and `append` show it
pub fn render(caller: &mut dyn NativeCaller, param: &str, value: &Value) -> Flow<String> {
    match (param, value) {
        ("Z", Value::Int(v)) => Ok((*v != 0).to_string()),
        ("C", Value::Int(v)) => Ok(format_char(*v)),
        _ => to_java_string(caller, value),
    }
}

enum Shown {
    Text(String),
    Items(Vec<Value>),
    /// User classes may override `toString`
    Dispatch,
    Identity,
}

/// `String.valueOf(Object)`
pub fn to_java_string(caller: &mut dyn NativeCaller, value: &Value) -> Flow<String> {
    let object = match value {
        Value::Int(v) => return Ok(v.to_string()),
        Value::Long(v) => return Ok(v.to_string()),
        Value::Float(v) => return Ok(format_float(*v)),
        Value::Double(v) => return Ok(format_double(*v)),
        Value::Null => return Ok("null".to_string()),
        Value::Ref(object) => object,
    };

    let shown = match &*object.lock() {
        Object::Str(text) | Object::Builder(text) => Shown::Text(text.clone()),
        Object::Boxed { class, value } => Shown::Text(boxed_to_string(class, value)),
        Object::Pattern(pattern) => Shown::Text(pattern.as_str().to_string()),
        Object::List { items, .. } => Shown::Items(items.clone()),
        Object::Instance { .. } => Shown::Dispatch,
        _ => Shown::Identity,
    };

    match shown {
        Shown::Text(text) => Ok(text),
        Shown::Identity => Ok(object_to_string(object)),
        Shown::Items(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                parts.push(to_java_string(caller, item)?);
            }
            Ok(format!("[{}]", parts.join(", ")))
        }
        Shown::Dispatch => {
            let text = caller.call_virtual(value.clone(), "toString", "()Ljava/lang/String;", Vec::new())?;
            Ok(text
                .map(|t| t.as_string())
                .transpose()?
                .flatten()
                .unwrap_or_else(|| "null".to_string()))
        }
    }
}

fn boxed_to_string(class: &str, value: &Value) -> String {
    match (class, value) {
        ("java/lang/Boolean", Value::Int(v)) => (*v != 0).to_string(),
        ("java/lang/Character", Value::Int(v)) => format_char(*v),
        (_, Value::Int(v)) => v.to_string(),
        (_, Value::Long(v)) => v.to_string(),
        (_, Value::Float(v)) => format_float(*v),
        (_, Value::Double(v)) => format_double(*v),
        _ => "null".to_string(),
    }
}

/// `Object.toString` and `Throwable.toString`
fn object_to_string(object: &ObjectRef) -> String {
    let guard = object.lock();
    let class = guard.class_name();
    let dotted = class.replace('/', ".");
    match &*guard {
        Object::Class(name) if Primitive::from_name(name).is_some() => name.clone(),
        Object::Class(name) => format!("class {}", name.replace('/', ".")),
        Object::Str(text) | Object::Builder(text) => text.clone(),
        Object::Instance { .. } if is_instance_throwable(&guard) => match guard.field(MESSAGE_FIELD) {
            Some(Value::Ref(message)) => match &*message.lock() {
                Object::Str(text) => format!("{}: {}", dotted, text),
                _ => dotted,
            },
            _ => dotted,
        },
        _ => format!("{}@{:x}", dotted, identity_hash(object)),
    }
}

/// Library throwables and their user subclasses both carry a message field
fn is_instance_throwable(object: &Object) -> bool {
    object.field(MESSAGE_FIELD).is_some()
}

fn hash_code(object: &ObjectRef) -> i32 {
    match &*object.lock() {
        Object::Str(text) => return string_hash(text),
        Object::Boxed { class, value } => match (class.as_str(), value) {
            ("java/lang/Boolean", Value::Int(v)) => return if *v != 0 { 1231 } else { 1237 },
            (_, Value::Int(v)) => return *v,
            (_, Value::Long(v)) => return (*v ^ ((*v as u64) >> 32) as i64) as i32,
            (_, Value::Float(v)) => return v.to_bits() as i32,
            (_, Value::Double(v)) => {
                let bits = v.to_bits();
                return (bits ^ (bits >> 32)) as i32;
            }
            _ => {}
        },
        _ => {}
    }
    identity_hash(object)
}

/// `equals` for library objects: value equality for strings, boxes and
/// lists, identity otherwise
fn java_equals(caller: &mut dyn NativeCaller, this: &ObjectRef, other: &Value) -> Flow<bool> {
    let Some(other) = other.as_ref()? else {
        return Ok(false);
    };
    if std::sync::Arc::ptr_eq(this, other) {
        return Ok(true);
    }
    let pairs = {
        let a = this.lock();
        let b = other.lock();
        match (&*a, &*b) {
            (Object::Str(x), Object::Str(y)) => return Ok(x == y),
            (Object::Boxed { class: c1, value: v1 }, Object::Boxed { class: c2, value: v2 }) => {
                return Ok(c1 == c2 && same_primitive(v1, v2))
            }
            (Object::List { items: x, .. }, Object::List { items: y, .. }) if x.len() == y.len() => {
                x.iter().cloned().zip(y.iter().cloned()).collect::<Vec<_>>()
            }
            _ => return Ok(false),
        }
    };
    for (x, y) in pairs {
        let equal = match &x {
            Value::Null => y.is_null(),
            Value::Ref(_) => {
                let result = caller.call_virtual(x.clone(), "equals", "(Ljava/lang/Object;)Z", vec![y])?;
                matches!(result, Some(Value::Int(v)) if v != 0)
            }
            primitive => same_primitive(primitive, &y),
        };
        if !equal {
            return Ok(false);
        }
    }
    Ok(true)
}

fn same_primitive(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Long(x), Value::Long(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        _ => false,
    }
}

/// Convert an unboxed value to the primitive named by `descriptor`
fn coerce(value: Value, descriptor: &str) -> VmResult<Value> {
    let converted = match (descriptor, &value) {
        ("J", Value::Int(v)) => Value::Long(i64::from(*v)),
        ("F", Value::Int(v)) => Value::Float(*v as f32),
        ("D", Value::Int(v)) => Value::Double(f64::from(*v)),
        ("D", Value::Float(v)) => Value::Double(f64::from(*v)),
        ("D", Value::Long(v)) => Value::Double(*v as f64),
        ("I" | "S" | "B" | "C" | "Z", Value::Long(v)) => Value::Int(*v as i32),
        ("I" | "S" | "B" | "C" | "Z", Value::Double(v)) => Value::Int(*v as i32),
        ("I" | "S" | "B" | "C" | "Z", Value::Float(v)) => Value::Int(*v as i32),
        _ => value,
    };
    Ok(converted)
}

// ==================== Descriptors ====================

/// Parameter descriptors of a method descriptor
pub fn params(descriptor: &str) -> VmResult<Vec<&str>> {
    let bad = || VmError::TypeMismatch(format!("malformed descriptor {}", descriptor));
    let inner = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .map(|(inner, _)| inner)
        .ok_or_else(bad)?;
    let bytes = inner.as_bytes();
    let mut params = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let mut end = start;
        while bytes.get(end) == Some(&b'[') {
            end += 1;
        }
        match bytes.get(end) {
            Some(b'L') => {
                let close = inner[end..].find(';').ok_or_else(bad)?;
                end += close + 1;
            }
            Some(_) => end += 1,
            None => return Err(bad()),
        }
        params.push(&inner[start..end]);
        start = end;
    }
    Ok(params)
}

pub fn return_descriptor(descriptor: &str) -> VmResult<&str> {
    descriptor
        .rsplit_once(')')
        .map(|(_, ret)| ret)
        .ok_or_else(|| VmError::TypeMismatch(format!("malformed descriptor {}", descriptor)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_params_split_descriptors() {
        assert_eq!(
            params("(I[Ljava/lang/String;JLjava/lang/Object;[[D)V").unwrap(),
            vec!["I", "[Ljava/lang/String;", "J", "Ljava/lang/Object;", "[[D"]
        );
        assert!(params("()V").unwrap().is_empty());
        assert!(params("(Ljava/lang)V").is_err());
        assert_eq!(return_descriptor("(I)Ljava/lang/String;").unwrap(), "Ljava/lang/String;");
    }

    #[test]
    fn test_native_hierarchy() {
        assert!(is_throwable(ARRAY_INDEX));
        assert!(is_throwable("java/lang/Error"));
        assert!(!is_throwable(STRING));
        assert_eq!(native_super(ARRAY_INDEX), Some(INDEX));
        assert_eq!(native_super("java/lang/StringBuilder"), Some(OBJECT));
        assert_eq!(native_super(OBJECT), None);
        assert!(native_interfaces("java/util/ArrayList").contains(&"java/util/List"));
    }

    #[test]
    fn test_boxed_text() {
        assert_eq!(boxed_to_string("java/lang/Boolean", &Value::Int(1)), "true");
        assert_eq!(boxed_to_string("java/lang/Character", &Value::Int(65)), "A");
        assert_eq!(boxed_to_string("java/lang/Double", &Value::Double(2.0)), "2.0");
    }

    #[test]
    fn test_static_fields() {
        assert!(matches!(get_static("java/util/Calendar", "PM"), Some(Value::Int(1))));
        let int_class = get_static("java/lang/Integer", "TYPE").unwrap();
        let object = int_class.as_ref().unwrap().unwrap().clone();
        assert_eq!(object_to_string(&object), "int");
        assert!(get_static("java/lang/String", "TYPE").is_none());
    }

    #[test]
    fn test_throwable_text_includes_message() {
        let error = Value::object(throwable("java/lang/IllegalStateException", Some("bad")));
        let object = error.as_ref().unwrap().unwrap().clone();
        assert_eq!(object_to_string(&object), "java.lang.IllegalStateException: bad");
        let bare = Value::object(throwable("java/lang/Exception", None));
        let object = bare.as_ref().unwrap().unwrap().clone();
        assert_eq!(object_to_string(&object), "java.lang.Exception");
    }
}
