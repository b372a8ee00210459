//! Error types shared by the CAS client.

use thiserror::Error;

pub type CasResult<T> = Result<T, CasError>;

/// Errors raised while talking to the CAS server or building protocol URLs.
#[derive(Debug, Error)]
pub enum CasError {
    /// The CAS server could not be reached or answered something unreadable.
    #[error("CAS validation transport failure: {0}")]
    ValidationTransport(String),

    /// The CAS server refused to issue a proxy ticket.
    #[error("proxy ticket refused by CAS server: {0}")]
    ProxyRejected(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP client error: {0}")]
    Http(#[from] isahc::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors raised by PGT registry backends.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A record already exists for this IOU. The first write wins.
    #[error("PGT IOU already registered: {0}")]
    Duplicate(String),

    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry record is malformed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors raised while establishing or reading a local session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

/// Startup configuration errors. These abort launch.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cas.server_url is invalid: {0}")]
    InvalidServerUrl(url::ParseError),

    #[error("cas.server_url must be an http(s) URL, got {0}")]
    UnsupportedServerScheme(String),

    #[error("cas.proxy_callback must be an absolute https URL: {0}")]
    InvalidProxyCallback(String),

    #[error("cas.version must be 1 or 2, got {0}")]
    UnsupportedVersion(u8),

    #[error("cas.validation_timeout_secs must be at least 1")]
    ZeroValidationTimeout,

    #[error("cas.session_secret must be at least {min} bytes")]
    WeakSessionSecret { min: usize },

    #[error("cas.mount_path must start with '/': {0}")]
    InvalidMountPath(String),
}
