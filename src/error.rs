use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream answered, but the advertised resource has no payload.
    #[error("Does not exist: {0}")]
    NotExist(String),

    #[error("Upstream returned {status} for {url}")]
    TransientUpstream { status: u16, url: String },

    #[error("Request rejected with {status} for {url}")]
    PermanentRequest { status: u16, url: String },

    #[error("Malformed {what}: {source}")]
    MalformedDocument {
        what: String,
        #[source]
        source: serde_json::Error,
        body: String,
    },

    #[error("Invalid asset name: {0:?}")]
    InvalidAssetName(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Rate limiting and server-side failures; the only class worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientUpstream { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_) | AppError::NotExist(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
