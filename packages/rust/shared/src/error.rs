//! Error types for docimport.
//!
//! Library crates use [`ImportError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Error code the docx API returns for malformed block payloads.
pub const INVALID_PARAM_CODE: i64 = 1_770_001;

/// Top-level error type for all docimport operations.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// Configuration loading or validation error. Fatal before any write.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level HTTP failure (connect, timeout, non-JSON body).
    #[error("network error: {0}")]
    Network(String),

    /// The remote platform answered with a non-zero business code.
    #[error("API request {endpoint} failed: code = {code}, msg = {msg}")]
    Api {
        endpoint: String,
        code: i64,
        msg: String,
    },

    /// Markdown, TOC, or protocol payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad path, missing field in a response, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A worker process failed to start, crashed, or spoke garbage.
    #[error("worker error: {0}")]
    Worker(String),

    /// The run was cancelled by the user.
    #[error("import interrupted")]
    Interrupted,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ImportError>;

impl ImportError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an API error from an endpoint and the response envelope.
    pub fn api(endpoint: impl Into<String>, code: i64, msg: impl Into<String>) -> Self {
        Self::Api {
            endpoint: endpoint.into(),
            code,
            msg: msg.into(),
        }
    }

    /// Business code of an [`ImportError::Api`], if any.
    pub fn api_code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the remote rejected the payload as malformed.
    ///
    /// Matches the numeric code as well as the message phrasing, since some
    /// endpoints only report the latter (including the localized variant).
    pub fn is_invalid_param(&self) -> bool {
        if self.api_code() == Some(INVALID_PARAM_CODE) {
            return true;
        }
        let message = self.to_string().to_lowercase();
        message.contains("1770001")
            || message.contains("invalid param")
            || (message.contains("参数") && message.contains("合法"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ImportError::config("FEISHU_APP_ID is not set");
        assert_eq!(err.to_string(), "config error: FEISHU_APP_ID is not set");

        let err = ImportError::api("/open-apis/docx/v1/documents", 99991663, "token expired");
        assert_eq!(
            err.to_string(),
            "API request /open-apis/docx/v1/documents failed: code = 99991663, msg = token expired"
        );
    }

    #[test]
    fn invalid_param_signature() {
        assert!(ImportError::api("/convert", INVALID_PARAM_CODE, "bad").is_invalid_param());
        assert!(ImportError::api("/children", 400, "Invalid Param: block").is_invalid_param());
        assert!(ImportError::api("/documents", 1, "参数不合法").is_invalid_param());
        assert!(ImportError::Network("wrapped code 1770001".into()).is_invalid_param());

        assert!(!ImportError::api("/children", 1061045, "busy").is_invalid_param());
        assert!(!ImportError::Interrupted.is_invalid_param());
    }

    #[test]
    fn api_code_only_for_api_errors() {
        assert_eq!(ImportError::api("/x", 7, "m").api_code(), Some(7));
        assert_eq!(ImportError::validation("nope").api_code(), None);
    }
}
