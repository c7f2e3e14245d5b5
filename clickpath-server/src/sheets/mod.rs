//! Spreadsheet destination for exported engagement rows

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpSheetClient;

/// Spreadsheet client errors
#[derive(Debug, Error)]
pub enum SheetError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Spreadsheet call timed out")]
    Timeout,
}

impl SheetError {
    /// Transient failures worth another attempt
    ///
    /// Auth and bad-request responses are terminal. Some backends report quota
    /// exhaustion with a non-429 status, so the message is checked as well.
    pub fn is_retryable(&self) -> bool {
        match self {
            SheetError::Network(_) | SheetError::RateLimited(_) | SheetError::Timeout => true,
            SheetError::Api { status, message } => {
                *status == 429 || *status >= 500 || mentions_rate_limit(message)
            }
            SheetError::Parse(_) => false,
        }
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("quota") || lower.contains("rate limit") || lower.contains("ratelimit")
}

/// One spreadsheet row, left to right
pub type Row = Vec<String>;

/// Operations the exporter needs from a spreadsheet
#[async_trait]
pub trait SheetClient: Send + Sync {
    async fn sheet_exists(&self, title: &str) -> Result<bool, SheetError>;

    async fn create_sheet(&self, title: &str) -> Result<(), SheetError>;

    /// Values in an A1 range; trailing empty rows are omitted
    async fn read_range(&self, range: &str) -> Result<Vec<Row>, SheetError>;

    /// Append after the last populated row of the range's table
    async fn append_rows(&self, range: &str, rows: &[Row]) -> Result<(), SheetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(SheetError::Network("reset".into()).is_retryable());
        assert!(SheetError::Timeout.is_retryable());
        assert!(SheetError::Api { status: 429, message: String::new() }.is_retryable());
        assert!(SheetError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(SheetError::Api {
            status: 403,
            message: "Quota exceeded for quota metric 'Write requests'".into()
        }
        .is_retryable());

        assert!(!SheetError::Api { status: 401, message: "invalid credentials".into() }.is_retryable());
        assert!(!SheetError::Api { status: 400, message: "bad range".into() }.is_retryable());
        assert!(!SheetError::Parse("eof".into()).is_retryable());
    }
}
