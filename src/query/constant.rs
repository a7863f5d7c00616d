use std::fmt::Display;

use crate::error::{DbError, DbResult};

/// A value stored in a field: either a signed integer or a string
///
/// Values of the same kind are totally ordered; every integer sorts before every string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Constant {
    Int(i32),
    Str(String),
}

impl Constant {
    pub fn as_int(&self) -> DbResult<i32> {
        match self {
            Constant::Int(value) => Ok(*value),
            Constant::Str(value) => Err(DbError::TypeMismatch(format!(
                "expected an integer, found '{value}'"
            ))),
        }
    }

    pub fn as_str(&self) -> DbResult<&str> {
        match self {
            Constant::Str(value) => Ok(value),
            Constant::Int(value) => Err(DbError::TypeMismatch(format!(
                "expected a string, found {value}"
            ))),
        }
    }

    /// The value as shown to a user, strings without quotes
    pub fn to_plain_string(&self) -> String {
        match self {
            Constant::Int(value) => value.to_string(),
            Constant::Str(value) => value.clone(),
        }
    }
}

impl From<i32> for Constant {
    fn from(value: i32) -> Self {
        Constant::Int(value)
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Constant::Str(value.to_string())
    }
}

impl From<String> for Constant {
    fn from(value: String) -> Self {
        Constant::Str(value)
    }
}

/// Renders the value as it would appear in SQL text
impl Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Int(value) => write!(f, "{value}"),
            Constant::Str(value) => write!(f, "'{value}'"),
        }
    }
}

#[cfg(test)]
mod constant_tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Constant::Int(-3) < Constant::Int(2));
        assert!(Constant::from("abc") < Constant::from("abd"));
        assert!(Constant::Int(i32::MAX) < Constant::from(""));
        assert_eq!(Constant::from("x"), Constant::Str("x".to_string()));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Constant::Int(4).as_int().unwrap(), 4);
        assert!(matches!(
            Constant::Int(4).as_str(),
            Err(DbError::TypeMismatch(_))
        ));
        assert_eq!(Constant::from("a").as_str().unwrap(), "a");
    }

    #[test]
    fn test_display() {
        assert_eq!(Constant::Int(-12).to_string(), "-12");
        assert_eq!(Constant::from("bob").to_string(), "'bob'");
        assert_eq!(Constant::from("bob").to_plain_string(), "bob");
    }
}
