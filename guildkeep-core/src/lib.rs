//! Guildkeep Core - Shared Types
//!
//! Identifiers, error types, configuration, collaborator traits and the
//! `ObservableState` readiness primitive. Every other guildkeep crate depends
//! on this one.

pub mod config;
pub mod document;
pub mod error;
pub mod guild;
pub mod observable;
pub mod position;

pub use config::{
    ApiCacheConfig, AuthConfig, GuildkeepConfig, HttpConfig, LiveCacheConfig, TelemetryConfig,
};
pub use document::{ChangeEvent, Document, DocumentStore};
pub use error::{
    CacheError, ConfigError, DirectoryError, FetchError, GuildkeepError, GuildkeepResult,
    StoreError, TaskError,
};
pub use guild::{GuildDirectory, GuildMember, RoleGrantLedger};
pub use observable::ObservableState;
pub use position::{PositionRoleBinding, BANNED_POSITION};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the raw identifier.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Platform guild (server) identifier.
    GuildId
);
string_id!(
    /// Platform user identifier.
    UserId
);
string_id!(
    /// Platform role identifier.
    RoleId
);
string_id!(
    /// Stable identifier of a document in the remote store.
    DocumentId
);
