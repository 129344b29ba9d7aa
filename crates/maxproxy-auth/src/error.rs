use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not authenticated; run the login flow first")]
    Absent,

    #[error("credentials expired; please re-authenticate")]
    Expired,

    #[error("cannot refresh a long-term token; generate a new one")]
    LongTermRefresh,

    #[error("no PKCE verifier found; start the login flow first")]
    MissingPkce,

    #[error("token endpoint returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
