//! Guildkeep Runtime - Wiring and Lifecycle
//!
//! Builds the shared infrastructure from a [`GuildkeepConfig`]: the live
//! position binding mirror, the authorization engine on top of it, the
//! sequenced executor, and any number of swept API caches. Also installs the
//! tracing subscriber.
//!
//! ```ignore
//! let config = GuildkeepConfig::from_env();
//! telemetry::init_tracing(&config.telemetry)?;
//!
//! let infra = Infrastructure::start(config, binding_store, directory)?;
//! infra.ready().await;
//!
//! let allowed = infra
//!     .engine()
//!     .has_permissions(&user_id, &guild_id, &requirement)
//!     .await
//!     .allowed_or(false);
//! ```

pub mod infrastructure;
pub mod telemetry;

pub use guildkeep_core::GuildkeepConfig;
pub use infrastructure::{Infrastructure, BINDINGS_COLLECTION};
pub use telemetry::init_tracing;
