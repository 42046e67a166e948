//! Typed attribute values reported by packages and items

use std::fmt;

/// Value of one package or item attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Yes/no flag
    Boolean(bool),
    /// Signed integer
    Integer(i32),
    /// Unsigned integer, optionally displayed in hexadecimal
    UnsignedInteger {
        /// Value
        value: u32,
        /// Display as `0x` prefixed hexadecimal
        hex: bool,
    },
    /// Floating point value (percentages and ratios)
    Float(f32),
    /// Text
    String(String),
}

impl AttributeValue {
    /// Decimal unsigned integer.
    pub const fn unsigned(value: u32) -> Self {
        Self::UnsignedInteger { value, hex: false }
    }

    /// Hexadecimal unsigned integer.
    pub const fn hex(value: u32) -> Self {
        Self::UnsignedInteger { value, hex: true }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(true) => f.write_str("True"),
            Self::Boolean(false) => f.write_str("False"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::UnsignedInteger { value, hex: false } => write!(f, "{value}"),
            Self::UnsignedInteger { value, hex: true } => write!(f, "{value:#010x}"),
            Self::Float(value) => write!(f, "{value:.2}"),
            Self::String(value) => f.write_str(value),
        }
    }
}

/// Named attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Display name from the format's attribute table
    pub name: &'static str,
    /// Value
    pub value: AttributeValue,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(AttributeValue::Boolean(true).to_string(), "True");
        assert_eq!(AttributeValue::hex(0x4000).to_string(), "0x00004000");
        assert_eq!(AttributeValue::unsigned(8192).to_string(), "8192");
        assert_eq!(AttributeValue::Float(12.5).to_string(), "12.50");

        let attribute = Attribute {
            name: "Cache ID",
            value: AttributeValue::unsigned(70),
        };
        assert_eq!(attribute.to_string(), "Cache ID: 70");
    }
}
