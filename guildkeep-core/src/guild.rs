//! Guild membership collaborators consumed by the authorization engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::DirectoryError;
use crate::{GuildId, RoleId, Timestamp, UserId};

/// Membership facts about one user in one guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMember {
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub role_ids: Vec<RoleId>,
    /// Platform-level administrator permission.
    pub administrator: bool,
}

impl GuildMember {
    pub fn new(user_id: UserId, guild_id: GuildId, role_ids: Vec<RoleId>) -> Self {
        Self {
            user_id,
            guild_id,
            role_ids,
            administrator: false,
        }
    }

    pub fn has_role(&self, role_id: &RoleId) -> bool {
        self.role_ids.contains(role_id)
    }

    pub fn has_any_role<'a>(&self, mut roles: impl Iterator<Item = &'a RoleId>) -> bool {
        roles.any(|role| self.has_role(role))
    }
}

/// Guild membership and role lookups on the chat platform.
#[async_trait]
pub trait GuildDirectory: Send + Sync {
    /// Resolve a guild member. `Ok(None)` means the user is not a member.
    async fn member(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Result<Option<GuildMember>, DirectoryError>;

    /// Whether the user is banned from the guild.
    async fn is_banned(&self, guild_id: &GuildId, user_id: &UserId)
        -> Result<bool, DirectoryError>;

    /// Platform-native ordering between two roles of the same guild.
    ///
    /// `Greater` means `a` ranks above `b`. `None` if either role is unknown.
    fn compare_roles(&self, guild_id: &GuildId, a: &RoleId, b: &RoleId) -> Option<Ordering>;
}

/// Source of expirations for temporarily granted roles.
#[async_trait]
pub trait RoleGrantLedger: Send + Sync {
    /// When the user's grant of `role_id` lapses, or `None` if it is permanent
    /// or untracked.
    async fn expires_at(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        role_id: &RoleId,
    ) -> Option<Timestamp>;
}
