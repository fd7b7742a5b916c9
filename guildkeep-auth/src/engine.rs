//! Position resolution against the live binding mirror.

use std::cmp::Ordering;
use std::sync::Arc;

use guildkeep_core::{
    AuthConfig, GuildDirectory, GuildId, GuildMember, PositionRoleBinding, RoleGrantLedger,
    RoleId, UserId, BANNED_POSITION,
};
use guildkeep_storage::LiveDocumentCache;

use crate::check::{Grant, GrantSource, PermissionRequirement, PositionCheck};

/// Directory state of the user being checked. `None` fields mean the lookup
/// failed or the user is not a member.
struct Subject {
    user_id: UserId,
    banned: Option<bool>,
    member: Option<GuildMember>,
}

/// Resolves position checks for guild members.
///
/// Checks never fail: collaborator errors are logged and the check comes
/// back [`PositionCheck::Unconfigured`].
pub struct AuthorizationEngine {
    bindings: Arc<LiveDocumentCache<PositionRoleBinding>>,
    directory: Arc<dyn GuildDirectory>,
    ledger: Option<Arc<dyn RoleGrantLedger>>,
    config: AuthConfig,
}

impl std::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("bindings", &self.bindings)
            .field("has_ledger", &self.ledger.is_some())
            .field("admin_users", &self.config.admin_users.len())
            .finish()
    }
}

impl AuthorizationEngine {
    pub fn new(
        bindings: Arc<LiveDocumentCache<PositionRoleBinding>>,
        directory: Arc<dyn GuildDirectory>,
        config: AuthConfig,
    ) -> Self {
        Self {
            bindings,
            directory,
            ledger: None,
            config,
        }
    }

    /// Attach a ledger so role grants can report their expiration.
    pub fn with_ledger(mut self, ledger: Arc<dyn RoleGrantLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn bindings(&self) -> &Arc<LiveDocumentCache<PositionRoleBinding>> {
        &self.bindings
    }

    /// Roles bound to `position` in `guild_id`, without duplicates.
    pub fn roles_for_position(&self, position: &str, guild_id: &GuildId) -> Vec<RoleId> {
        let mut roles: Vec<RoleId> = self
            .bindings
            .filter(|b| b.matches(position, guild_id))
            .into_iter()
            .map(|b| b.role_id)
            .collect();
        roles.sort();
        roles.dedup();
        roles
    }

    // ========================================================================
    // Checks
    // ========================================================================

    /// Does the user hold `position` in the guild?
    pub async fn has_position(
        &self,
        user_id: &UserId,
        position: &str,
        guild_id: &GuildId,
    ) -> PositionCheck {
        self.ensure_bindings_loaded().await;
        let subject = self.resolve_subject(guild_id, user_id).await;
        self.position_check(&subject, position, guild_id)
    }

    /// Does the user hold `level` or any position ranked at or above it?
    pub async fn has_position_level(
        &self,
        user_id: &UserId,
        level: &str,
        guild_id: &GuildId,
    ) -> PositionCheck {
        self.ensure_bindings_loaded().await;
        let subject = self.resolve_subject(guild_id, user_id).await;
        self.level_check(&subject, level, guild_id)
    }

    /// Does the user satisfy `requirement`?
    ///
    /// Administrators pass without any lookup of positions. Otherwise the
    /// direct positions and the level are checked and OR-combined. The
    /// member and ban state are looked up once for the whole requirement.
    pub async fn has_permissions(
        &self,
        user_id: &UserId,
        guild_id: &GuildId,
        requirement: &PermissionRequirement,
    ) -> PositionCheck {
        if self.config.is_admin(user_id) {
            return PositionCheck::Granted(self.grant(guild_id, user_id, GrantSource::Administrator));
        }

        self.ensure_bindings_loaded().await;
        let subject = self.resolve_subject(guild_id, user_id).await;
        if subject.member.as_ref().is_some_and(|m| m.administrator) {
            return PositionCheck::Granted(self.grant(guild_id, user_id, GrantSource::Administrator));
        }

        let mut checks: Vec<PositionCheck> = requirement
            .positions
            .iter()
            .map(|position| self.position_check(&subject, position, guild_id))
            .collect();
        if let Some(level) = &requirement.level {
            checks.push(self.level_check(&subject, level, guild_id));
        }

        let result = PositionCheck::any(checks);
        tracing::debug!(
            user_id = %user_id,
            guild_id = %guild_id,
            outcome = %result.outcome(),
            "Permission check"
        );
        result
    }

    /// Positions the member holds directly in the guild, sorted.
    pub async fn member_positions(&self, user_id: &UserId, guild_id: &GuildId) -> Vec<String> {
        self.ensure_bindings_loaded().await;

        let Some(member) = self.resolve_member(guild_id, user_id).await else {
            return Vec::new();
        };
        let mut positions: Vec<String> = self
            .bindings
            .filter(|b| &b.guild_id == guild_id && member.has_role(&b.role_id))
            .into_iter()
            .map(|b| b.position)
            .collect();
        positions.sort();
        positions.dedup();
        positions
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn position_check(&self, subject: &Subject, position: &str, guild_id: &GuildId) -> PositionCheck {
        if position == BANNED_POSITION {
            return match subject.banned {
                Some(true) => {
                    PositionCheck::Granted(self.grant(guild_id, &subject.user_id, GrantSource::Ban))
                }
                Some(false) => PositionCheck::Denied,
                None => PositionCheck::Unconfigured,
            };
        }

        match subject.banned {
            Some(true) => return PositionCheck::Denied,
            Some(false) => {}
            None => return PositionCheck::Unconfigured,
        }

        let roles = self.roles_for_position(position, guild_id);
        if roles.is_empty() {
            tracing::trace!(guild_id = %guild_id, position, "No roles bound to position");
            return PositionCheck::Unconfigured;
        }

        match &subject.member {
            Some(member) => self.decide(member, &roles),
            None => PositionCheck::Unconfigured,
        }
    }

    fn level_check(&self, subject: &Subject, level: &str, guild_id: &GuildId) -> PositionCheck {
        match subject.banned {
            Some(true) => return PositionCheck::Denied,
            Some(false) => {}
            None => return PositionCheck::Unconfigured,
        }

        let level_roles = self.roles_for_position(level, guild_id);
        if level_roles.is_empty() {
            tracing::trace!(guild_id = %guild_id, level, "No roles bound to position level");
            return PositionCheck::Unconfigured;
        }

        let Some(member) = &subject.member else {
            return PositionCheck::Unconfigured;
        };
        let closure = self.level_closure(guild_id, level_roles);
        self.decide(member, &closure)
    }

    async fn resolve_subject(&self, guild_id: &GuildId, user_id: &UserId) -> Subject {
        let (banned, member) = futures_util::join!(
            self.is_banned(guild_id, user_id),
            self.resolve_member(guild_id, user_id)
        );
        Subject {
            user_id: user_id.clone(),
            banned,
            member,
        }
    }

    async fn ensure_bindings_loaded(&self) {
        if !self.bindings.is_ready() && !self.bindings.wait_until_ready().await {
            tracing::warn!("Position bindings not loaded, checking against partial state");
        }
    }

    /// `level_roles` plus every role bound in the guild that ranks at or
    /// above the highest of them.
    fn level_closure(&self, guild_id: &GuildId, mut level_roles: Vec<RoleId>) -> Vec<RoleId> {
        let compare = |a: &RoleId, b: &RoleId| self.directory.compare_roles(guild_id, a, b);

        let highest = level_roles
            .iter()
            .filter(|role| compare(*role, *role).is_some())
            .fold(None::<&RoleId>, |best, role| match best {
                Some(best) if compare(role, best) != Some(Ordering::Greater) => Some(best),
                _ => Some(role),
            })
            .cloned();

        let Some(highest) = highest else {
            tracing::debug!(guild_id = %guild_id, "Level roles unknown to the platform, no closure");
            return level_roles;
        };

        for binding in self.bindings.filter(|b| &b.guild_id == guild_id) {
            let ranks_at_or_above = matches!(
                compare(&binding.role_id, &highest),
                Some(Ordering::Greater | Ordering::Equal)
            );
            if ranks_at_or_above && !level_roles.contains(&binding.role_id) {
                level_roles.push(binding.role_id);
            }
        }
        level_roles
    }

    fn decide(&self, member: &GuildMember, roles: &[RoleId]) -> PositionCheck {
        match roles.iter().find(|role| member.has_role(role)) {
            Some(role_id) => PositionCheck::Granted(self.grant(
                &member.guild_id,
                &member.user_id,
                GrantSource::Role {
                    role_id: role_id.clone(),
                },
            )),
            None => PositionCheck::Denied,
        }
    }

    fn grant(&self, guild_id: &GuildId, user_id: &UserId, source: GrantSource) -> Grant {
        Grant::new(guild_id.clone(), user_id.clone(), source, self.ledger.clone())
    }

    async fn is_banned(&self, guild_id: &GuildId, user_id: &UserId) -> Option<bool> {
        match self.directory.is_banned(guild_id, user_id).await {
            Ok(banned) => Some(banned),
            Err(e) => {
                tracing::warn!(guild_id = %guild_id, user_id = %user_id, error = %e, "Ban lookup failed");
                None
            }
        }
    }

    async fn resolve_member(&self, guild_id: &GuildId, user_id: &UserId) -> Option<GuildMember> {
        match self.directory.member(guild_id, user_id).await {
            Ok(Some(member)) => Some(member),
            Ok(None) => {
                tracing::trace!(guild_id = %guild_id, user_id = %user_id, "User is not a guild member");
                None
            }
            Err(e) => {
                tracing::warn!(guild_id = %guild_id, user_id = %user_id, error = %e, "Member lookup failed");
                None
            }
        }
    }
}
