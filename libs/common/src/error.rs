//! Unified error type for the alert pipeline.

use thiserror::Error;

use crate::types::SourceId;

/// Longest slice of a failed response body kept in an error message.
pub const BODY_EXCERPT_CHARS: usize = 500;

/// First [`BODY_EXCERPT_CHARS`] characters of an error response body.
pub fn body_excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV parse error: {0}")]
    Csv(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{source_id} query failed: {message}")]
    SourceQuery { source_id: SourceId, message: String },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Fit did not converge: {0}")]
    NonConvergence(String),

    #[error("Fit service error: {0}")]
    FitService(String),

    #[error("Notification delivery failed: {0}")]
    Notify(String),

    #[error("Dedup store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Failures that only disqualify the candidate being processed.
    ///
    /// Everything else raised while handling a candidate aborts the run.
    pub fn is_candidate_scoped(&self) -> bool {
        match self {
            Error::Http(_)
            | Error::Json(_)
            | Error::Csv(_)
            | Error::NotFound(_)
            | Error::MalformedRecord(_)
            | Error::InsufficientData(_)
            | Error::NonConvergence(_)
            | Error::FitService(_) => true,
            Error::Config(_)
            | Error::SourceQuery { .. }
            | Error::Notify(_)
            | Error::Store(_)
            | Error::Io(_)
            | Error::Other(_) => false,
        }
    }

    /// Short machine-readable code for journal events.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Http(_) => "HTTP",
            Error::Json(_) => "JSON",
            Error::Csv(_) => "CSV",
            Error::Config(_) => "CONFIG",
            Error::SourceQuery { .. } => "SOURCE_QUERY",
            Error::NotFound(_) => "NOT_FOUND",
            Error::MalformedRecord(_) => "MALFORMED_RECORD",
            Error::InsufficientData(_) => "INSUFFICIENT_DATA",
            Error::NonConvergence(_) => "NON_CONVERGENCE",
            Error::FitService(_) => "FIT_SERVICE",
            Error::Notify(_) => "NOTIFY",
            Error::Store(_) => "STORE",
            Error::Io(_) => "IO",
            Error::Other(_) => "OTHER",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_failures_are_candidate_scoped() {
        assert!(Error::InsufficientData("3 points".into()).is_candidate_scoped());
        assert!(Error::NonConvergence("t0 at bound".into()).is_candidate_scoped());
        assert!(Error::NotFound("2023xyz".into()).is_candidate_scoped());
        assert!(Error::Http("timeout".into()).is_candidate_scoped());
    }

    #[test]
    fn test_systemic_failures_propagate() {
        let query = Error::SourceQuery {
            source_id: SourceId::Antares,
            message: "503".into(),
        };
        assert!(!query.is_candidate_scoped());
        assert!(!Error::Store("disk full".into()).is_candidate_scoped());
        assert!(!Error::Config("missing token".into()).is_candidate_scoped());
        assert_eq!(query.to_string(), "antares query failed: 503");
    }

    #[test]
    fn test_body_excerpt_cuts_on_char_boundary() {
        let body = format!("{}é rest of the error page", "x".repeat(499));
        let excerpt = body_excerpt(&body);
        assert_eq!(excerpt.chars().count(), 500);
        assert!(excerpt.ends_with('é'));

        assert_eq!(body_excerpt("Bad Gateway"), "Bad Gateway");
        assert_eq!(body_excerpt(&"日本".repeat(400)).chars().count(), 500);
    }
}
