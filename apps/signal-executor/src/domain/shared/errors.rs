//! Domain errors for the signal executor.

use std::fmt;

/// Domain-level errors raised by value objects and domain services.
///
/// Independent of infrastructure concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid value for a field.
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },

    /// Business rule violation.
    BusinessRuleViolation {
        /// Rule name or code.
        rule: String,
        /// Description of the violation.
        message: String,
    },
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { field, message } => {
                write!(f, "Invalid value for {field}: {message}")
            }
            Self::BusinessRuleViolation { rule, message } => {
                write!(f, "Business rule violation [{rule}]: {message}")
            }
        }
    }
}

impl std::error::Error for DomainError {}
