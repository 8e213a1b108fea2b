/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Connection, timeout or body-read failure of a single attempt.
    ///
    /// Retried with backoff until the attempt budget is spent.
    #[error("transport error: {0}")]
    Transport(String),
    /// Server asked to slow down; recovered by raising the post-request delay.
    #[error("rate limited, retry after {retry_after:.2}s")]
    RateLimited { retry_after: f64 },
    /// Every attempt of a logical request failed or was rate limited.
    #[error("max retry amount exceeded after {attempts} attempts")]
    RetryExhausted {
        attempts: u32,
        /// Message of the last transport failure, if any.
        last_error: Option<String>,
    },
    /// Response arrived but its body is not what the caller expected.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// Request could not be built (invalid URL, bad header value).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FlowError {
    /// Whether the controller retries an attempt that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited { .. })
    }
}
