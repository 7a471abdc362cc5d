use reqwest::StatusCode;

/// Unified error type for all reservoir operations.
///
/// Lower-layer failures are carried as sources and passed through to the
/// caller unmodified. The executor performs no retries and no error
/// translation; retry/backoff policy belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or unusable connection parameters. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Connection refused, TLS failure, timeout.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server rejected the query (syntax error, row ceiling exceeded, ...).
    /// `code` is the ClickHouse exception code when the response carried one.
    #[error("query rejected by server: {message}")]
    Query {
        code: Option<i32>,
        message: String,
    },

    /// A placeholder in the query template has no binding.
    #[error("no binding for parameter '{name}'")]
    UnknownParameter { name: String },

    /// The query template itself is malformed (unterminated placeholder,
    /// unsupported conversion).
    #[error("malformed query template: {0}")]
    Template(String),

    /// The driver response could not be decoded.
    #[error("malformed driver response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A cache store failure. Only surfaced when strict cache writes are
    /// configured; otherwise store failures degrade to direct execution.
    #[error("cache store failure: {0}")]
    Cache(#[source] anyhow::Error),

    /// The connection pool has been shut down.
    #[error("connection pool closed")]
    PoolClosed,
}

/// High-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    Config,
    Transport,
    Query,
    Cache,
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Config,
            Error::Transport(_) => ErrorCategory::Transport,
            Error::Query { .. }
            | Error::UnknownParameter { .. }
            | Error::Template(_)
            | Error::Decode(_) => ErrorCategory::Query,
            Error::Cache(_) => ErrorCategory::Cache,
            Error::PoolClosed => ErrorCategory::Internal,
        }
    }

    /// Build a query error from a non-success HTTP response.
    ///
    /// ClickHouse exception bodies lead with `Code: NNN. DB::Exception: ...`;
    /// the numeric code is extracted when present and the text is passed
    /// through verbatim.
    pub(crate) fn server_rejection(status: StatusCode, body: String) -> Self {
        let message = if body.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            body
        };
        Error::Query {
            code: parse_exception_code(&message),
            message,
        }
    }
}

fn parse_exception_code(body: &str) -> Option<i32> {
    let rest = body.trim_start().strip_prefix("Code:")?.trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Result type alias for reservoir operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_code_parsing() {
        assert_eq!(
            parse_exception_code("Code: 62. DB::Exception: Syntax error"),
            Some(62)
        );
        assert_eq!(
            parse_exception_code("Code: 396. DB::Exception: Limit for result exceeded"),
            Some(396)
        );
        assert_eq!(parse_exception_code("upstream connect error"), None);
        assert_eq!(parse_exception_code("Code: abc"), None);
    }

    #[test]
    fn test_server_rejection_empty_body() {
        let err = Error::server_rejection(StatusCode::BAD_GATEWAY, String::new());
        match err {
            Error::Query { code, message } => {
                assert_eq!(code, None);
                assert_eq!(message, "HTTP 502 Bad Gateway");
            }
            other => panic!("expected query error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::Config("x".into()).category(),
            ErrorCategory::Config
        );
        assert_eq!(
            Error::Query {
                code: None,
                message: "x".into()
            }
            .category(),
            ErrorCategory::Query
        );
        assert_eq!(
            Error::UnknownParameter { name: "x".into() }.category(),
            ErrorCategory::Query
        );
        assert_eq!(
            Error::Cache(anyhow::anyhow!("down")).category(),
            ErrorCategory::Cache
        );
        assert_eq!(Error::PoolClosed.category(), ErrorCategory::Internal);
    }
}
