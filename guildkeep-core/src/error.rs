//! Error types for guildkeep operations

use thiserror::Error;

/// Bounded cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache rejects all inserts (max_entries = 0)")]
    CapacityRejection,
}

/// Errors raised while populating a cache from an external API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} failed with status {status}")]
    Http { url: String, status: u16 },

    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },
}

impl FetchError {
    /// Returns true if retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Request { .. } => true,
            FetchError::Http { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Remote document store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Document store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Write rejected for document {id}: {reason}")]
    WriteRejected { id: String, reason: String },

    #[error("Change stream closed")]
    StreamClosed,

    #[error("Live cache {collection} has no change subscription")]
    NotSubscribed { collection: String },
}

/// Guild directory lookup errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Guild {guild_id} is not available")]
    GuildUnavailable { guild_id: String },

    #[error("Directory lookup failed: {reason}")]
    LookupFailed { reason: String },
}

/// Sequenced task errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task for key {key} was aborted before completing")]
    Aborted { key: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all guildkeep errors.
#[derive(Debug, Clone, Error)]
pub enum GuildkeepError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for guildkeep operations.
pub type GuildkeepResult<T> = Result<T, GuildkeepError>;
