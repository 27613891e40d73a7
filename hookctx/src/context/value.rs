//! Values stored in context nodes and the registry of wire-capable scalar types.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A value stored under a context key.
///
/// The scalar variants and `String` may cross process boundaries through the
/// propagation codec and may be exported as tags. `Object` holds an arbitrary
/// shared reference that stays inside the call tree of one process.
#[derive(Clone)]
pub enum ContextValue {
    /// A string.
    String(String),
    /// A boolean.
    Bool(bool),
    /// An 8-bit signed integer.
    Byte(i8),
    /// A 16-bit signed integer.
    Short(i16),
    /// A 32-bit signed integer.
    Int(i32),
    /// A 64-bit signed integer.
    Long(i64),
    /// A 32-bit float.
    Float(f32),
    /// A 64-bit float.
    Double(f64),
    /// A single character.
    Char(char),
    /// An opaque in-process object. Compared by identity.
    Object(Arc<dyn Any + Send + Sync>),
}

impl ContextValue {
    /// Wraps an arbitrary object.
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Self::Object(Arc::new(value))
    }

    /// Returns the registered wire type, `None` for strings and objects.
    #[must_use]
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::String(_) | Self::Object(_) => None,
            Self::Bool(_) => Some(ValueType::Boolean),
            Self::Byte(_) => Some(ValueType::Byte),
            Self::Short(_) => Some(ValueType::Short),
            Self::Int(_) => Some(ValueType::Int),
            Self::Long(_) => Some(ValueType::Long),
            Self::Float(_) => Some(ValueType::Float),
            Self::Double(_) => Some(ValueType::Double),
            Self::Char(_) => Some(ValueType::Char),
        }
    }

    /// Returns true for every variant except `Object`.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Object(_))
    }

    /// Returns the string form used on the wire and for tags.
    ///
    /// `None` for objects.
    #[must_use]
    pub fn to_wire_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Bool(v) => Some(v.to_string()),
            Self::Byte(v) => Some(v.to_string()),
            Self::Short(v) => Some(v.to_string()),
            Self::Int(v) => Some(v.to_string()),
            Self::Long(v) => Some(v.to_string()),
            Self::Float(v) => Some(v.to_string()),
            Self::Double(v) => Some(v.to_string()),
            Self::Char(v) => Some(v.to_string()),
            Self::Object(_) => None,
        }
    }

    /// Returns the string slice if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Widens any integer variant to `i64`.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(*v as i64),
            Self::Short(v) => Some(*v as i64),
            Self::Int(v) => Some(*v as i64),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Widens any floating-point variant to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Downcasts an object value.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Object(obj) => obj.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl PartialEq for ContextValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Byte(a), Self::Byte(b)) => a == b,
            (Self::Short(a), Self::Short(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(v) => f.debug_tuple("String").field(v).finish(),
            Self::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Self::Byte(v) => f.debug_tuple("Byte").field(v).finish(),
            Self::Short(v) => f.debug_tuple("Short").field(v).finish(),
            Self::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Self::Long(v) => f.debug_tuple("Long").field(v).finish(),
            Self::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Self::Double(v) => f.debug_tuple("Double").field(v).finish(),
            Self::Char(v) => f.debug_tuple("Char").field(v).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_wire_string() {
            Some(s) => f.write_str(&s),
            None => f.write_str("<object>"),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i8> for ContextValue {
    fn from(value: i8) -> Self {
        Self::Byte(value)
    }
}

impl From<i16> for ContextValue {
    fn from(value: i16) -> Self {
        Self::Short(value)
    }
}

impl From<i32> for ContextValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f32> for ContextValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<char> for ContextValue {
    fn from(value: char) -> Self {
        Self::Char(value)
    }
}

/// The registry of non-string scalar types that may cross the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// `i8`, tag `y`.
    Byte,
    /// `i16`, tag `s`.
    Short,
    /// `i32`, tag `i`.
    Int,
    /// `i64`, tag `l`.
    Long,
    /// `f32`, tag `f`.
    Float,
    /// `f64`, tag `d`.
    Double,
    /// `char`, tag `c`.
    Char,
    /// `bool`, tag `b`.
    Boolean,
}

impl ValueType {
    /// All registered types.
    pub const ALL: [Self; 8] = [
        Self::Byte,
        Self::Short,
        Self::Int,
        Self::Long,
        Self::Float,
        Self::Double,
        Self::Char,
        Self::Boolean,
    ];

    /// Returns the single-character wire tag.
    #[must_use]
    pub const fn id(self) -> char {
        match self {
            Self::Byte => 'y',
            Self::Short => 's',
            Self::Int => 'i',
            Self::Long => 'l',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::Char => 'c',
            Self::Boolean => 'b',
        }
    }

    /// Looks up a type by its wire tag.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        let mut chars = id.chars();
        let first = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        Self::ALL.into_iter().find(|t| t.id() == first)
    }

    /// Parses the string form of a value of this type.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse failure.
    pub fn parse(self, raw: &str) -> Result<ContextValue, String> {
        let value = match self {
            Self::Byte => ContextValue::Byte(raw.parse().map_err(|e| format!("{e}"))?),
            Self::Short => ContextValue::Short(raw.parse().map_err(|e| format!("{e}"))?),
            Self::Int => ContextValue::Int(raw.parse().map_err(|e| format!("{e}"))?),
            Self::Long => ContextValue::Long(raw.parse().map_err(|e| format!("{e}"))?),
            Self::Float => ContextValue::Float(raw.parse().map_err(|e| format!("{e}"))?),
            Self::Double => ContextValue::Double(raw.parse().map_err(|e| format!("{e}"))?),
            Self::Char => {
                let mut chars = raw.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => ContextValue::Char(c),
                    _ => return Err(format!("expected exactly one character, got '{raw}'")),
                }
            }
            Self::Boolean => {
                if raw.eq_ignore_ascii_case("true") {
                    ContextValue::Bool(true)
                } else if raw.eq_ignore_ascii_case("false") {
                    ContextValue::Bool(false)
                } else {
                    return Err(format!("expected 'true' or 'false', got '{raw}'"));
                }
            }
        };
        Ok(value)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte => write!(f, "byte"),
            Self::Short => write!(f, "short"),
            Self::Int => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::Char => write!(f, "char"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ids_are_unique() {
        let mut ids: Vec<char> = ValueType::ALL.iter().map(|t| t.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), ValueType::ALL.len());
    }

    #[test]
    fn test_from_id() {
        assert_eq!(ValueType::from_id("d"), Some(ValueType::Double));
        assert_eq!(ValueType::from_id("b"), Some(ValueType::Boolean));
        assert_eq!(ValueType::from_id("dd"), None);
        assert_eq!(ValueType::from_id(""), None);
        assert_eq!(ValueType::from_id("x"), None);
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(ValueType::Int.parse("42").unwrap(), ContextValue::Int(42));
        assert_eq!(ValueType::Byte.parse("-7").unwrap(), ContextValue::Byte(-7));
        assert_eq!(ValueType::Double.parse("3.14").unwrap(), ContextValue::Double(3.14));
        assert_eq!(ValueType::Char.parse("x").unwrap(), ContextValue::Char('x'));
        assert_eq!(ValueType::Boolean.parse("TRUE").unwrap(), ContextValue::Bool(true));
        assert!(ValueType::Byte.parse("300").is_err());
        assert!(ValueType::Char.parse("xy").is_err());
        assert!(ValueType::Boolean.parse("yes").is_err());
    }

    #[test]
    fn test_value_type_of_values() {
        assert_eq!(ContextValue::from("a").value_type(), None);
        assert_eq!(ContextValue::from(1.5f32).value_type(), Some(ValueType::Float));
        assert_eq!(ContextValue::object(5u8).value_type(), None);
    }

    #[test]
    fn test_object_equality_is_identity() {
        let a = ContextValue::object(String::from("same"));
        let b = ContextValue::object(String::from("same"));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.downcast_ref::<String>().map(String::as_str), Some("same"));
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(ContextValue::Short(3).as_i64(), Some(3));
        assert_eq!(ContextValue::Float(0.5).as_f64(), Some(0.5));
        assert_eq!(ContextValue::Bool(true).as_i64(), None);
    }
}
