//! Guildkeep Test Utilities
//!
//! Shared test infrastructure for the guildkeep workspace:
//! - Mock collaborators (guild directory, role grant ledger)
//! - Proptest generators for identifiers and position bindings
//! - Fixtures for a ranked guild and its bindings

pub use guildkeep_core::{
    DirectoryError, GuildDirectory, GuildId, GuildMember, PositionRoleBinding, RoleGrantLedger,
    RoleId, Timestamp, UserId, BANNED_POSITION,
};
pub use guildkeep_storage::InMemoryDocumentStore;

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError};

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

#[derive(Debug, Default)]
struct DirectoryState {
    /// Rank of each role per guild; higher ranks above lower.
    ranks: HashMap<GuildId, HashMap<RoleId, i64>>,
    members: HashMap<(GuildId, UserId), GuildMember>,
    bans: HashSet<(GuildId, UserId)>,
    unavailable: HashSet<GuildId>,
}

/// In-memory guild directory.
#[derive(Debug, Default)]
pub struct MockGuildDirectory {
    state: Mutex<DirectoryState>,
    member_lookups: AtomicUsize,
    ban_lookups: AtomicUsize,
}

impl MockGuildDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a role with its rank in the guild hierarchy.
    pub fn with_role(self, guild: &str, role: &str, rank: i64) -> Self {
        self.add_role(guild, role, rank);
        self
    }

    /// Register a member holding `roles`.
    pub fn with_member(self, guild: &str, user: &str, roles: &[&str]) -> Self {
        self.add_member(guild, user, roles);
        self
    }

    /// Register a member with the platform administrator permission.
    pub fn with_administrator(self, guild: &str, user: &str) -> Self {
        let mut member = GuildMember::new(UserId::new(user), GuildId::new(guild), Vec::new());
        member.administrator = true;
        self.state()
            .members
            .insert((GuildId::new(guild), UserId::new(user)), member);
        self
    }

    pub fn with_ban(self, guild: &str, user: &str) -> Self {
        self.ban(guild, user);
        self
    }

    pub fn add_role(&self, guild: &str, role: &str, rank: i64) {
        self.state()
            .ranks
            .entry(GuildId::new(guild))
            .or_default()
            .insert(RoleId::new(role), rank);
    }

    pub fn add_member(&self, guild: &str, user: &str, roles: &[&str]) {
        let member = GuildMember::new(
            UserId::new(user),
            GuildId::new(guild),
            roles.iter().map(|r| RoleId::new(*r)).collect(),
        );
        self.state()
            .members
            .insert((GuildId::new(guild), UserId::new(user)), member);
    }

    pub fn remove_member(&self, guild: &str, user: &str) {
        self.state()
            .members
            .remove(&(GuildId::new(guild), UserId::new(user)));
    }

    pub fn ban(&self, guild: &str, user: &str) {
        self.state()
            .bans
            .insert((GuildId::new(guild), UserId::new(user)));
    }

    pub fn unban(&self, guild: &str, user: &str) {
        self.state()
            .bans
            .remove(&(GuildId::new(guild), UserId::new(user)));
    }

    /// Make every lookup for `guild` fail.
    pub fn set_unavailable(&self, guild: &str, unavailable: bool) {
        let guild = GuildId::new(guild);
        let mut state = self.state();
        if unavailable {
            state.unavailable.insert(guild);
        } else {
            state.unavailable.remove(&guild);
        }
    }

    /// Number of `member` lookups served so far.
    pub fn member_lookups(&self) -> usize {
        self.member_lookups.load(AtomicOrdering::SeqCst)
    }

    /// Number of `is_banned` lookups served so far.
    pub fn ban_lookups(&self) -> usize {
        self.ban_lookups.load(AtomicOrdering::SeqCst)
    }

    fn check_available(state: &DirectoryState, guild_id: &GuildId) -> Result<(), DirectoryError> {
        if state.unavailable.contains(guild_id) {
            return Err(DirectoryError::GuildUnavailable {
                guild_id: guild_id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl GuildDirectory for MockGuildDirectory {
    async fn member(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Result<Option<GuildMember>, DirectoryError> {
        self.member_lookups.fetch_add(1, AtomicOrdering::SeqCst);
        let state = self.state();
        Self::check_available(&state, guild_id)?;
        Ok(state
            .members
            .get(&(guild_id.clone(), user_id.clone()))
            .cloned())
    }

    async fn is_banned(&self, guild_id: &GuildId, user_id: &UserId) -> Result<bool, DirectoryError> {
        self.ban_lookups.fetch_add(1, AtomicOrdering::SeqCst);
        let state = self.state();
        Self::check_available(&state, guild_id)?;
        Ok(state.bans.contains(&(guild_id.clone(), user_id.clone())))
    }

    fn compare_roles(&self, guild_id: &GuildId, a: &RoleId, b: &RoleId) -> Option<Ordering> {
        let state = self.state();
        let ranks = state.ranks.get(guild_id)?;
        Some(ranks.get(a)?.cmp(ranks.get(b)?))
    }
}

/// In-memory ledger of time-bounded role grants.
#[derive(Debug, Default)]
pub struct MockRoleGrantLedger {
    grants: Mutex<HashMap<(GuildId, UserId, RoleId), Timestamp>>,
}

impl MockRoleGrantLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grant(self, guild: &str, user: &str, role: &str, expires_at: Timestamp) -> Self {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (GuildId::new(guild), UserId::new(user), RoleId::new(role)),
                expires_at,
            );
        self
    }
}

#[async_trait]
impl RoleGrantLedger for MockRoleGrantLedger {
    async fn expires_at(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        role_id: &RoleId,
    ) -> Option<Timestamp> {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(guild_id.clone(), user_id.clone(), role_id.clone()))
            .copied()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for guildkeep types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a numeric snowflake-style guild id.
    pub fn arb_guild_id() -> impl Strategy<Value = GuildId> {
        (1u64..1_000_000).prop_map(|n| GuildId::new(n.to_string()))
    }

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        (1u64..1_000_000).prop_map(|n| UserId::new(n.to_string()))
    }

    pub fn arb_role_id() -> impl Strategy<Value = RoleId> {
        "r[0-9]{1,3}".prop_map(RoleId::new)
    }

    /// Generate a position name, never the reserved ban position.
    pub fn arb_position() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("Council".to_string()),
            Just("Officer".to_string()),
            Just("Member".to_string()),
            "[A-Z][a-z]{3,10}",
        ]
        .prop_filter("reserved position", |p| p != BANNED_POSITION)
    }

    pub fn arb_binding() -> impl Strategy<Value = PositionRoleBinding> {
        (arb_position(), arb_guild_id(), arb_role_id())
            .prop_map(|(position, guild, role)| PositionRoleBinding::new(position, guild, role))
    }

    /// Generate bindings that all belong to `guild`.
    pub fn arb_guild_bindings(
        guild: &str,
        max: usize,
    ) -> impl Strategy<Value = Vec<PositionRoleBinding>> {
        let guild = guild.to_string();
        prop::collection::vec((arb_position(), arb_role_id()), 0..max).prop_map(move |pairs| {
            pairs
                .into_iter()
                .map(|(position, role)| PositionRoleBinding::new(position, guild.as_str(), role))
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures: a guild with a four-step role hierarchy.
    //!
    //! | role        | rank |
    //! |-------------|------|
    //! | `r-admin`   | 30   |
    //! | `r-council` | 20   |
    //! | `r-member`  | 10   |
    //! | `r-guest`   | 0    |

    use super::*;
    use std::sync::Arc;

    pub const GUILD: &str = "g-100";
    pub const OTHER_GUILD: &str = "g-200";

    pub fn guild_id() -> GuildId {
        GuildId::new(GUILD)
    }

    /// Directory with the ranked roles of [`GUILD`] and no members.
    pub fn ranked_directory() -> MockGuildDirectory {
        MockGuildDirectory::new()
            .with_role(GUILD, "r-admin", 30)
            .with_role(GUILD, "r-council", 20)
            .with_role(GUILD, "r-member", 10)
            .with_role(GUILD, "r-guest", 0)
    }

    /// Bindings for [`GUILD`]: Admin, Council and Member, one role each.
    pub fn standard_bindings() -> Vec<PositionRoleBinding> {
        vec![
            PositionRoleBinding::new("Admin", GUILD, "r-admin"),
            PositionRoleBinding::new("Council", GUILD, "r-council"),
            PositionRoleBinding::new("Member", GUILD, "r-member"),
        ]
    }

    pub fn binding_store(
        bindings: impl IntoIterator<Item = PositionRoleBinding>,
    ) -> Arc<InMemoryDocumentStore<PositionRoleBinding>> {
        Arc::new(InMemoryDocumentStore::with_documents(bindings))
    }

    /// Timestamp `hours` from now, for temporary role grants.
    pub fn expiring_in(hours: i64) -> Timestamp {
        chrono::Utc::now() + chrono::Duration::hours(hours)
    }

    pub fn member(guild: &str, user: &str, roles: &[&str]) -> GuildMember {
        GuildMember::new(
            UserId::new(user),
            GuildId::new(guild),
            roles.iter().map(|r| RoleId::new(*r)).collect(),
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
