//! Error taxonomy for the execution pipeline.
//!
//! Failures are classified once, at the boundary where they enter the
//! pipeline, and travel as [`TradingError`] from then on.
//!
//! - `category`: the closed [`ErrorCategory`] set and its [`ClassificationTable`]
//! - `classifier`: ordered first-match-wins rules over message and name
//! - `trading_error`: the immutable carrier and the caller-facing response

mod category;
mod classifier;
mod trading_error;

pub use category::{ClassificationTable, ErrorCategory, ErrorClassification};
pub use classifier::{ClassificationRule, Classify, DEFAULT_RULES, ErrorClassifier, Pattern};
pub use trading_error::{
    ErrorContext, ErrorResponse, RETRY_AFTER_MS, TradingError, format_error_response,
};
