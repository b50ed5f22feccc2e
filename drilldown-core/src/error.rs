use thiserror::Error;

/// Typed failures of a reporting request.
///
/// They travel inside `anyhow::Error`, callers that need to tell them apart use
/// `downcast_ref::<ReportingError>()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReportingError {
    /// The service answered with an error status.
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The request was superseded by a newer request for the same caller, or torn down.
    #[error("request for caller {caller} was cancelled")]
    Cancelled { caller: String },

    /// The transport task failed before producing a response.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ReportingError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReportingError::Cancelled { .. })
    }
}
