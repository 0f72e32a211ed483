use thiserror::Error;

/// Raised when a principal attempts an operation reserved for administrators.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("Only {required} can delete queue records (attempted by {principal})")]
    DeleteNotAllowed {
        principal: String,
        required: &'static str,
    },
}
