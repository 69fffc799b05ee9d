// Jvmgen Primitive Types

use serde::Serialize;

/// The eight JVM primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Primitive {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl Primitive {
    pub const ALL: [Primitive; 8] = [
        Primitive::Boolean,
        Primitive::Byte,
        Primitive::Char,
        Primitive::Short,
        Primitive::Int,
        Primitive::Long,
        Primitive::Float,
        Primitive::Double,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Boolean => "boolean",
            Primitive::Byte => "byte",
            Primitive::Char => "char",
            Primitive::Short => "short",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
        }
    }

    pub fn from_name(name: &str) -> Option<Primitive> {
        Primitive::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn descriptor(self) -> char {
        match self {
            Primitive::Boolean => 'Z',
            Primitive::Byte => 'B',
            Primitive::Char => 'C',
            Primitive::Short => 'S',
            Primitive::Int => 'I',
            Primitive::Long => 'J',
            Primitive::Float => 'F',
            Primitive::Double => 'D',
        }
    }

    /// Occupies two stack words / local slots
    pub fn is_wide(self) -> bool {
        matches!(self, Primitive::Long | Primitive::Double)
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, Primitive::Boolean)
    }

    /// byte, short and char are computed as int on the operand stack
    pub fn is_int_like(self) -> bool {
        matches!(
            self,
            Primitive::Boolean | Primitive::Byte | Primitive::Char | Primitive::Short | Primitive::Int
        )
    }

    /// Type used on the operand stack: sub-int types collapse to int
    pub fn stack_type(self) -> Primitive {
        match self {
            Primitive::Byte | Primitive::Char | Primitive::Short => Primitive::Int,
            other => other,
        }
    }

    /// Binary numeric promotion rank (int < long < float < double)
    pub fn rank(self) -> u8 {
        match self.stack_type() {
            Primitive::Long => 1,
            Primitive::Float => 2,
            Primitive::Double => 3,
            _ => 0,
        }
    }

    /// The wider of two numeric types after promotion
    pub fn promote(self, other: Primitive) -> Primitive {
        if self.rank() >= other.rank() {
            self.stack_type()
        } else {
            other.stack_type()
        }
    }

    /// Boxed wrapper class
    pub fn wrapper(self) -> &'static str {
        match self {
            Primitive::Boolean => "java.lang.Boolean",
            Primitive::Byte => "java.lang.Byte",
            Primitive::Char => "java.lang.Character",
            Primitive::Short => "java.lang.Short",
            Primitive::Int => "java.lang.Integer",
            Primitive::Long => "java.lang.Long",
            Primitive::Float => "java.lang.Float",
            Primitive::Double => "java.lang.Double",
        }
    }

    /// Letter used in conversion mnemonics (i2l, l2i, i2b, ...)
    pub fn letter(self) -> char {
        match self {
            Primitive::Boolean => 'z',
            Primitive::Byte => 'b',
            Primitive::Char => 'c',
            Primitive::Short => 's',
            Primitive::Int => 'i',
            Primitive::Long => 'l',
            Primitive::Float => 'f',
            Primitive::Double => 'd',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote() {
        assert_eq!(Primitive::Byte.promote(Primitive::Short), Primitive::Int);
        assert_eq!(Primitive::Int.promote(Primitive::Long), Primitive::Long);
        assert_eq!(Primitive::Double.promote(Primitive::Float), Primitive::Double);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Primitive::from_name("char"), Some(Primitive::Char));
        assert_eq!(Primitive::from_name("void"), None);
    }
}
