use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T, E = ProxyError> = std::result::Result<T, E>;

/// Largest slice of a remote response body kept in error detail.
const BODY_SNIPPET_LEN: usize = 256;

/// Errors produced by calls against the remote staging service.
///
/// Cloneable so a single session-creation failure can be fanned out to every
/// caller waiting on that session. Transport failures are captured as
/// strings for the same reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StagingError {
    #[error("unexpected response [{method} {uri}, status {status}{detail}]", detail = format_body(.body))]
    UnexpectedResponse {
        method: &'static str,
        uri: String,
        status: u16,
        body: String,
    },

    #[error("no session id found in response [{uri}{detail}]", detail = format_body(.body))]
    MalformedSessionResponse { uri: String, body: String },

    #[error("transport error for {uri}: {message}")]
    Transport { uri: String, message: String },
}

fn format_body(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(", {body}")
    }
}

/// Truncate a response body for inclusion in error detail.
pub fn body_snippet(body: &str) -> String {
    let mut end = BODY_SNIPPET_LEN.min(body.len());
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// Errors that can occur while running the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("failed to build response: {0}")]
    ResponseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_response_display() {
        let err = StagingError::UnexpectedResponse {
            method: "POST",
            uri: "/service/local/staging/profiles/p1/start".into(),
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected response [POST /service/local/staging/profiles/p1/start, status 500, boom]"
        );
    }

    #[test]
    fn test_empty_body_omitted_from_detail() {
        let err = StagingError::UnexpectedResponse {
            method: "PUT",
            uri: "/x".into(),
            status: 404,
            body: String::new(),
        };
        assert_eq!(err.to_string(), "unexpected response [PUT /x, status 404]");
    }

    #[test]
    fn test_body_snippet_truncates_on_char_boundary() {
        let body = "é".repeat(200);
        let snippet = body_snippet(&body);
        assert!(snippet.len() <= 256);
        assert!(body.starts_with(&snippet));
    }
}
