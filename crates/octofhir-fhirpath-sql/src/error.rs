use std::fmt;

use thiserror::Error;

/// Expected argument count for a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    Between(usize, usize),
}

impl Arity {
    /// Check whether `count` arguments satisfy this arity.
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Self::Exactly(n) => count == n,
            Self::Between(min, max) => (min..=max).contains(&count),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(1) => write!(f, "exactly 1 argument"),
            Self::Exactly(n) => write!(f, "exactly {n} arguments"),
            Self::Between(min, max) => write!(f, "between {min} and {max} arguments"),
        }
    }
}

/// Errors raised while parsing or translating a FHIRPath expression.
///
/// Every error aborts the translation in progress; no partial fragment list
/// is ever returned alongside one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslationError {
    #[error("Function '{function}' expects {expected}, got {actual}")]
    ArgumentArity {
        function: String,
        expected: Arity,
        actual: usize,
    },

    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Undefined reference: {0}")]
    UndefinedReference(String),

    #[error("Scope discipline violated: {0}")]
    ScopeDiscipline(String),

    #[error("Unsupported dialect: {0}")]
    UnsupportedDialect(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },
}

impl TranslationError {
    /// Create a new ArgumentArity error
    pub fn arity(function: impl Into<String>, expected: Arity, actual: usize) -> Self {
        Self::ArgumentArity {
            function: function.into(),
            expected,
            actual,
        }
    }

    /// Create a new UnsupportedFunction error
    pub fn unsupported_function(name: impl Into<String>) -> Self {
        Self::UnsupportedFunction(name.into())
    }

    /// Create a new UnsupportedOperator error
    pub fn unsupported_operator(symbol: impl Into<String>) -> Self {
        Self::UnsupportedOperator(symbol.into())
    }

    /// Create a new UndefinedReference error
    pub fn undefined_reference(name: impl Into<String>) -> Self {
        Self::UndefinedReference(name.into())
    }

    /// Create a new ScopeDiscipline error
    pub fn scope_discipline(message: impl Into<String>) -> Self {
        Self::ScopeDiscipline(message.into())
    }

    /// Create a new UnsupportedDialect error
    pub fn unsupported_dialect(name: impl Into<String>) -> Self {
        Self::UnsupportedDialect(name.into())
    }

    /// Create a new Parse error
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Check if the error is caused by the input expression rather than the engine.
    ///
    /// `ScopeDiscipline` indicates an engine bug and is never user-correctable.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, Self::ScopeDiscipline(_))
    }
}

/// Result type alias for translation operations.
pub type Result<T> = std::result::Result<T, TranslationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_accepts() {
        assert!(Arity::Exactly(1).accepts(1));
        assert!(!Arity::Exactly(1).accepts(0));
        assert!(!Arity::Exactly(1).accepts(2));
        assert!(Arity::Between(0, 1).accepts(0));
        assert!(Arity::Between(0, 1).accepts(1));
        assert!(!Arity::Between(0, 1).accepts(2));
    }

    #[test]
    fn test_arity_error_message() {
        let err = TranslationError::arity("where", Arity::Exactly(1), 2);
        assert_eq!(
            err.to_string(),
            "Function 'where' expects exactly 1 argument, got 2"
        );

        let err = TranslationError::arity("round", Arity::Between(0, 1), 3);
        assert_eq!(
            err.to_string(),
            "Function 'round' expects between 0 and 1 arguments, got 3"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(TranslationError::undefined_reference("%x").is_user_error());
        assert!(!TranslationError::scope_discipline("pop on empty stack").is_user_error());
    }
}
