//! JVM type descriptors.
//!
//! A recursive-descent `FromStr` over a descriptor string, generalized so
//! the debug-info model can ask a [`FieldType`] for its slot width and
//! primitive-class name without reaching back into the interpreter.

use std::fmt::{self, Display};
use std::str::{Chars, FromStr};

use itertools::Itertools;
use thiserror::Error;

use crate::frame::Slots;

/// A reference to a JVM class, interface, or array type by binary name
/// (e.g. `java/lang/String`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassRef {
    /// The binary name, using `/` as the package separator.
    pub binary_name: String,
}

impl ClassRef {
    /// Creates a reference to the class with the given binary name.
    pub fn new(binary_name: impl Into<String>) -> Self {
        Self {
            binary_name: binary_name.into(),
        }
    }
}

impl Display for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.binary_name)
    }
}

/// A JVM primitive type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    /// `boolean`.
    Boolean,
    /// `byte`.
    Byte,
    /// `char`.
    Char,
    /// `short`.
    Short,
    /// `int`.
    Int,
    /// `long` — a two-slot type.
    Long,
    /// `float`.
    Float,
    /// `double` — a two-slot type.
    Double,
}

impl PrimitiveType {
    /// The slot width occupied by a value of this type.
    #[must_use]
    pub const fn slots(self) -> Slots {
        match self {
            Self::Long | Self::Double => Slots::Two,
            _ => Slots::One,
        }
    }

    /// The single-character descriptor prefix (e.g. `I` for `int`).
    #[must_use]
    pub const fn descriptor_char(self) -> char {
        match self {
            Self::Boolean => 'Z',
            Self::Byte => 'B',
            Self::Char => 'C',
            Self::Short => 'S',
            Self::Int => 'I',
            Self::Long => 'J',
            Self::Float => 'F',
            Self::Double => 'D',
        }
    }

    /// The binary name of this type's boxed-class-free primitive class
    /// entry (e.g. `int`), used when synthesizing debug-info locals for
    /// untracked slots.
    #[must_use]
    pub const fn java_name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
        }
    }
}

impl TryFrom<char> for PrimitiveType {
    type Error = InvalidDescriptor;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            'Z' => Ok(Self::Boolean),
            'B' => Ok(Self::Byte),
            'C' => Ok(Self::Char),
            'S' => Ok(Self::Short),
            'I' => Ok(Self::Int),
            'J' => Ok(Self::Long),
            'F' => Ok(Self::Float),
            'D' => Ok(Self::Double),
            other => Err(InvalidDescriptor(other.to_string())),
        }
    }
}

/// The type of a field, local variable, or (non-void) method parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// A primitive type.
    Base(PrimitiveType),
    /// A class or interface instance type.
    Object(ClassRef),
    /// An array type, one dimension per nesting of [`FieldType::Array`].
    Array(Box<FieldType>),
}

impl FieldType {
    /// The slot width of this type: always one slot, except for
    /// non-array `long`/`double`.
    #[must_use]
    pub fn slots(&self) -> Slots {
        match self {
            Self::Base(p) => p.slots(),
            Self::Object(_) | Self::Array(_) => Slots::One,
        }
    }

    /// Wraps `self` in one more array dimension.
    #[must_use]
    pub fn make_array_type(self) -> Self {
        Self::Array(Box::new(self))
    }

    /// The JVM descriptor string for this type (e.g. `[Ljava/lang/String;`).
    #[must_use]
    pub fn descriptor_string(&self) -> String {
        match self {
            Self::Base(p) => p.descriptor_char().to_string(),
            Self::Object(c) => format!("L{};", c.binary_name),
            Self::Array(elem) => format!("[{}", elem.descriptor_string()),
        }
    }

    fn parse_single_param(
        prefix: char,
        remaining: &mut Chars<'_>,
    ) -> Result<Self, InvalidDescriptor> {
        if let Ok(p) = PrimitiveType::try_from(prefix) {
            return Ok(Self::Base(p));
        }
        let build_err = |rem: &Chars<'_>| InvalidDescriptor(format!("{prefix}{}", rem.as_str()));
        match prefix {
            'L' => {
                let binary_name: String = remaining.take_while_ref(|c| *c != ';').collect();
                match remaining.next() {
                    Some(';') => Ok(Self::Object(ClassRef::new(binary_name))),
                    _ => Err(build_err(remaining)),
                }
            }
            '[' => {
                let next_prefix = remaining.next().ok_or_else(|| build_err(remaining))?;
                Self::parse_single_param(next_prefix, remaining).map(Self::make_array_type)
            }
            _ => Err(build_err(remaining)),
        }
    }
}

impl FromStr for FieldType {
    type Err = InvalidDescriptor;

    fn from_str(descriptor: &str) -> Result<Self, Self::Err> {
        let mut chars = descriptor.chars();
        let prefix = chars.next().ok_or_else(|| InvalidDescriptor(String::new()))?;
        let result = Self::parse_single_param(prefix, &mut chars)?;
        if chars.as_str().is_empty() {
            Ok(result)
        } else {
            Err(InvalidDescriptor(descriptor.to_owned()))
        }
    }
}

/// The return type of a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReturnType {
    /// The method returns a value of the given type.
    Some(FieldType),
    /// The method returns `void`.
    Void,
}

impl ReturnType {
    fn descriptor_string(&self) -> String {
        match self {
            Self::Some(t) => t.descriptor_string(),
            Self::Void => "V".to_owned(),
        }
    }
}

impl FromStr for ReturnType {
    type Err = InvalidDescriptor;

    fn from_str(descriptor: &str) -> Result<Self, Self::Err> {
        if descriptor == "V" {
            Ok(Self::Void)
        } else {
            FieldType::from_str(descriptor).map(Self::Some)
        }
    }
}

impl Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Some(t) => write!(f, "{}", t.descriptor_string()),
            Self::Void => write!(f, "void"),
        }
    }
}

/// A method descriptor: parameter types plus return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// The parameter types, in declaration order.
    pub parameters_types: Vec<FieldType>,
    /// The return type.
    pub return_type: ReturnType,
}

impl MethodDescriptor {
    /// The total slot width occupied by this descriptor's parameters (not
    /// including an implicit receiver).
    #[must_use]
    pub fn parameter_slots(&self) -> u16 {
        self.parameters_types
            .iter()
            .map(|t| t.slots().count())
            .sum()
    }

    /// The full descriptor string, e.g. `(I)V`.
    #[must_use]
    pub fn descriptor_string(&self) -> String {
        let params: String = self
            .parameters_types
            .iter()
            .map(FieldType::descriptor_string)
            .collect();
        format!("({params}){}", self.return_type.descriptor_string())
    }
}

impl FromStr for MethodDescriptor {
    type Err = InvalidDescriptor;

    fn from_str(descriptor: &str) -> Result<Self, Self::Err> {
        let mut chars = descriptor.chars();
        let mut parameters_types = Vec::new();
        let return_type = loop {
            match chars.next() {
                Some('(') => {}
                Some(')') => break ReturnType::from_str(chars.as_str())?,
                Some(c) => {
                    let param = FieldType::parse_single_param(c, &mut chars)?;
                    parameters_types.push(param);
                }
                None => return Err(InvalidDescriptor(descriptor.to_owned())),
            }
        };
        Ok(Self {
            parameters_types,
            return_type,
        })
    }
}

/// An error indicating that a type or method descriptor string is invalid.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("invalid descriptor: {0}")]
pub struct InvalidDescriptor(pub String);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_param() {
        let d = MethodDescriptor::from_str("(I)V").unwrap();
        assert_eq!(d.return_type, ReturnType::Void);
        assert_eq!(d.parameters_types, vec![FieldType::Base(PrimitiveType::Int)]);
    }

    #[test]
    fn complex_descriptor() {
        let d = MethodDescriptor::from_str("(I[JLjava/lang/String;J)I").unwrap();
        assert_eq!(
            d.return_type,
            ReturnType::Some(FieldType::Base(PrimitiveType::Int))
        );
        assert_eq!(d.parameter_slots(), 1 + 1 + 1 + 2);
    }

    #[test]
    fn empty_descriptor_invalid() {
        assert!(MethodDescriptor::from_str("").is_err());
    }

    #[test]
    fn long_and_double_are_two_slots() {
        assert_eq!(PrimitiveType::Long.slots(), Slots::Two);
        assert_eq!(PrimitiveType::Double.slots(), Slots::Two);
        assert_eq!(PrimitiveType::Int.slots(), Slots::One);
        assert_eq!(FieldType::Base(PrimitiveType::Long).slots(), Slots::Two);
        assert_eq!(
            FieldType::Array(Box::new(FieldType::Base(PrimitiveType::Long))).slots(),
            Slots::One
        );
    }
}
