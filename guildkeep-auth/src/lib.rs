//! Guildkeep Auth - Position-Based Authorization
//!
//! Guilds bind named positions ("Council", "Member", ...) to platform roles.
//! The [`AuthorizationEngine`] answers whether a member holds a position,
//! holds a position level (directly or through a higher-ranked role), or
//! satisfies a command's [`PermissionRequirement`].
//!
//! Every check returns a tri-state [`PositionCheck`]. `Unconfigured` is kept
//! distinct from `Denied` so callers can decide their own default when a
//! guild has not set anything up.

pub mod check;
pub mod engine;

pub use check::{CheckOutcome, Grant, GrantSource, PermissionRequirement, PositionCheck};
pub use engine::AuthorizationEngine;
