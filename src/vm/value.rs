// Jvmgen VM Values
// Operand-stack values, heap objects and Java-compatible string forms

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{VmError, VmResult};

pub type ObjectRef = Arc<Mutex<Object>>;

/// One operand-stack entry or local. Long and double are a single entry
/// here, but still occupy two local slots.
#[derive(Clone)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Ref(ObjectRef),
}

/// Heap objects. User classes and every throwable are `Instance`s.
#[derive(Debug)]
pub enum Object {
    Instance {
        class: String,
        fields: Vec<(String, Value)>,
    },
    Str(String),
    Builder(String),
    Array {
        /// Element descriptor: `I`, `Ljava/lang/String;`, ...
        component: String,
        items: Vec<Value>,
    },
    List {
        items: Vec<Value>,
        mutable: bool,
    },
    /// Boxed primitive of a wrapper class
    Boxed {
        class: String,
        value: Value,
    },
    Pattern(regex::Regex),
    PrintStream,
    /// A class literal; holds the internal name or primitive name
    Class(String),
}

/// Field holding a throwable's message
pub const MESSAGE_FIELD: &str = "$message";

impl Value {
    pub fn object(object: Object) -> Value {
        Value::Ref(Arc::new(Mutex::new(object)))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::object(Object::Str(s.into()))
    }

    pub fn boolean(b: bool) -> Value {
        Value::Int(i32::from(b))
    }

    /// Default value of a field or array element with this descriptor
    pub fn default_for(descriptor: &str) -> Value {
        match descriptor.as_bytes().first() {
            Some(b'J') => Value::Long(0),
            Some(b'F') => Value::Float(0.0),
            Some(b'D') => Value::Double(0.0),
            Some(b'L') | Some(b'[') | None => Value::Null,
            Some(_) => Value::Int(0),
        }
    }

    /// Takes two local slots
    pub fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Null => "null",
            Value::Ref(_) => "reference",
        }
    }

    fn mismatch(&self, expected: &str) -> VmError {
        VmError::TypeMismatch(format!("expected {}, found {}", expected, self.type_name()))
    }

    pub fn as_int(&self) -> VmResult<i32> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(other.mismatch("int")),
        }
    }

    pub fn as_long(&self) -> VmResult<i64> {
        match self {
            Value::Long(v) => Ok(*v),
            other => Err(other.mismatch("long")),
        }
    }

    pub fn as_float(&self) -> VmResult<f32> {
        match self {
            Value::Float(v) => Ok(*v),
            other => Err(other.mismatch("float")),
        }
    }

    pub fn as_double(&self) -> VmResult<f64> {
        match self {
            Value::Double(v) => Ok(*v),
            other => Err(other.mismatch("double")),
        }
    }

    /// `None` for null
    pub fn as_ref(&self) -> VmResult<Option<&ObjectRef>> {
        match self {
            Value::Ref(object) => Ok(Some(object)),
            Value::Null => Ok(None),
            other => Err(other.mismatch("reference")),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Same object, or both null
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Ref(a), Value::Ref(b)) => Arc::ptr_eq(a, b),
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }

    /// Contents of a string object
    pub fn as_string(&self) -> VmResult<Option<String>> {
        match self.as_ref()? {
            None => Ok(None),
            Some(object) => match &*object.lock() {
                Object::Str(s) => Ok(Some(s.clone())),
                other => Err(VmError::TypeMismatch(format!("expected String, found {}", other.class_name()))),
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}L", v),
            Value::Float(v) => write!(f, "{}f", format_float(*v)),
            Value::Double(v) => write!(f, "{}d", format_double(*v)),
            Value::Null => write!(f, "null"),
            Value::Ref(object) => match object.try_lock() {
                Some(object) => write!(f, "<{}>", object.class_name()),
                None => write!(f, "<locked>"),
            },
        }
    }
}

impl Object {
    /// Runtime class, as an internal name
    pub fn class_name(&self) -> String {
        match self {
            Object::Instance { class, .. } => class.clone(),
            Object::Str(_) => "java/lang/String".to_string(),
            Object::Builder(_) => "java/lang/StringBuilder".to_string(),
            Object::Array { component, .. } => format!("[{}", component),
            Object::List { mutable: true, .. } => "java/util/ArrayList".to_string(),
            Object::List { mutable: false, .. } => "java/util/Collections$UnmodifiableList".to_string(),
            Object::Boxed { class, .. } => class.clone(),
            Object::Pattern(_) => "java/util/regex/Pattern".to_string(),
            Object::PrintStream => "java/io/PrintStream".to_string(),
            Object::Class(_) => "java/lang/Class".to_string(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Object::Instance { fields, .. } => fields.iter().find(|(field, _)| field == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn set_field(&mut self, name: &str, value: Value) -> VmResult<()> {
        match self {
            Object::Instance { fields, .. } => {
                match fields.iter_mut().find(|(field, _)| field == name) {
                    Some(slot) => slot.1 = value,
                    None => fields.push((name.to_string(), value)),
                }
                Ok(())
            }
            other => Err(VmError::TypeMismatch(format!(
                "cannot set field {} on {}",
                name,
                other.class_name()
            ))),
        }
    }
}

// ==================== Java string forms ====================

/// `Double.toString`: `1.0`, `0.25`, `1.0E10`, `NaN`, `Infinity`
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if value == 0.0 || (1e-3..1e7).contains(&magnitude) {
        let text = format!("{}", value);
        return if text.contains('.') { text } else { format!("{}.0", text) };
    }
    scientific(format!("{:E}", value))
}

/// `Float.toString`
pub fn format_float(value: f32) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if value == 0.0 || (1e-3..1e7).contains(&magnitude) {
        let text = format!("{}", value);
        return if text.contains('.') { text } else { format!("{}.0", text) };
    }
    scientific(format!("{:E}", value))
}

/// Rust prints `1E10`; Java wants a fractional digit in the mantissa
fn scientific(text: String) -> String {
    match text.split_once('E') {
        Some((mantissa, exponent)) if !mantissa.contains('.') => format!("{}.0E{}", mantissa, exponent),
        _ => text,
    }
}

pub fn format_char(value: i32) -> String {
    char::from_u32(value as u32 & 0xFFFF)
        .map(String::from)
        .unwrap_or_else(|| "\u{FFFD}".to_string())
}

/// `String.hashCode`
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Identity hash derived from the object's address
pub fn identity_hash(object: &ObjectRef) -> i32 {
    (Arc::as_ptr(object) as usize >> 4) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_double_formatting_matches_java() {
        assert_eq!(format_double(1.0), "1.0");
        assert_eq!(format_double(-2.5), "-2.5");
        assert_eq!(format_double(0.0), "0.0");
        assert_eq!(format_double(1e10), "1.0E10");
        assert_eq!(format_double(1.5e-5), "1.5E-5");
        assert_eq!(format_double(f64::NAN), "NaN");
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(0.1), "0.1");
    }

    #[test]
    fn test_string_hash_matches_java() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("hello"), 99162322);
    }

    #[test]
    fn test_defaults_follow_descriptor() {
        assert!(matches!(Value::default_for("J"), Value::Long(0)));
        assert!(matches!(Value::default_for("Z"), Value::Int(0)));
        assert!(Value::default_for("Ljava/lang/String;").is_null());
        assert!(Value::default_for("[I").is_null());
    }

    #[test]
    fn test_instance_fields() {
        let mut object = Object::Instance {
            class: "Demo".to_string(),
            fields: Vec::new(),
        };
        object.set_field("x", Value::Int(3)).unwrap();
        object.set_field("x", Value::Int(4)).unwrap();
        assert!(matches!(object.field("x"), Some(Value::Int(4))));
        assert!(Object::PrintStream.field("x").is_none());
    }
}
