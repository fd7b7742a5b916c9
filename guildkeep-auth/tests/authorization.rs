//! Authorization engine tests against the mock guild directory and an
//! in-memory binding store.

use std::sync::Arc;
use std::time::Duration;

use guildkeep_auth::{AuthorizationEngine, CheckOutcome, GrantSource, PermissionRequirement, PositionCheck};
use guildkeep_core::{AuthConfig, LiveCacheConfig, PositionRoleBinding, RoleId, UserId};
use guildkeep_storage::LiveDocumentCache;
use guildkeep_test_utils::fixtures::{self, GUILD, OTHER_GUILD};
use guildkeep_test_utils::{MockGuildDirectory, MockRoleGrantLedger, BANNED_POSITION};

async fn engine_with(
    bindings: Vec<PositionRoleBinding>,
    directory: MockGuildDirectory,
    config: AuthConfig,
) -> (AuthorizationEngine, Arc<MockGuildDirectory>) {
    let store = fixtures::binding_store(bindings);
    let cache = LiveDocumentCache::open("position_bindings", store, LiveCacheConfig::default());
    assert!(cache.wait_for_reload(Duration::from_secs(5)).await);
    let directory = Arc::new(directory);
    let engine = AuthorizationEngine::new(cache, directory.clone(), config);
    (engine, directory)
}

fn user(id: &str) -> UserId {
    UserId::new(id)
}

// ============================================================================
// has_position
// ============================================================================

#[tokio::test]
async fn test_member_with_bound_role_is_granted() {
    let directory = fixtures::ranked_directory().with_member(GUILD, "u1", &["r-council"]);
    let (engine, _) = engine_with(fixtures::standard_bindings(), directory, AuthConfig::default()).await;

    let check = engine.has_position(&user("u1"), "Council", &fixtures::guild_id()).await;
    let grant = check.grant().expect("granted");
    assert_eq!(grant.role_id(), Some(&RoleId::new("r-council")));
    assert_eq!(grant.expiration().await, None);

    let check = engine.has_position(&user("u1"), "Admin", &fixtures::guild_id()).await;
    assert_eq!(check, PositionCheck::Denied);
}

#[tokio::test]
async fn test_unbound_position_is_unconfigured() {
    let directory = fixtures::ranked_directory().with_member(GUILD, "u1", &["r-council"]);
    let (engine, _) = engine_with(fixtures::standard_bindings(), directory, AuthConfig::default()).await;

    let check = engine.has_position(&user("u1"), "Treasurer", &fixtures::guild_id()).await;
    assert_eq!(check, PositionCheck::Unconfigured);

    // Bindings of another guild do not count.
    let other = guildkeep_core::GuildId::new(OTHER_GUILD);
    let check = engine.has_position(&user("u1"), "Council", &other).await;
    assert_eq!(check, PositionCheck::Unconfigured);
}

#[tokio::test]
async fn test_unresolved_member_is_unconfigured() {
    let (engine, directory) = engine_with(
        fixtures::standard_bindings(),
        fixtures::ranked_directory(),
        AuthConfig::default(),
    )
    .await;

    let check = engine.has_position(&user("stranger"), "Council", &fixtures::guild_id()).await;
    assert!(check.is_unconfigured());
    assert!(!check.is_denied());

    directory.add_member(GUILD, "stranger", &["r-council"]);
    directory.set_unavailable(GUILD, true);
    let check = engine.has_position(&user("stranger"), "Council", &fixtures::guild_id()).await;
    assert!(check.is_unconfigured());
}

#[tokio::test]
async fn test_ban_overrides_bound_role() {
    let directory = fixtures::ranked_directory()
        .with_member(GUILD, "u1", &["r-council"])
        .with_ban(GUILD, "u1");
    let (engine, _) = engine_with(fixtures::standard_bindings(), directory, AuthConfig::default()).await;

    let check = engine.has_position(&user("u1"), "Council", &fixtures::guild_id()).await;
    assert_eq!(check, PositionCheck::Denied);

    let level = engine.has_position_level(&user("u1"), "Member", &fixtures::guild_id()).await;
    assert_eq!(level, PositionCheck::Denied);
}

#[tokio::test]
async fn test_banned_position_checks_ban_list() {
    let directory = fixtures::ranked_directory()
        .with_member(GUILD, "u1", &[])
        .with_ban(GUILD, "u2");
    let (engine, directory) = engine_with(Vec::new(), directory, AuthConfig::default()).await;

    let banned = engine.has_position(&user("u2"), BANNED_POSITION, &fixtures::guild_id()).await;
    let grant = banned.grant().expect("banned user holds the ban position");
    assert_eq!(grant.source(), &GrantSource::Ban);
    assert_eq!(grant.expiration().await, None);

    let clean = engine.has_position(&user("u1"), BANNED_POSITION, &fixtures::guild_id()).await;
    assert_eq!(clean, PositionCheck::Denied);

    directory.unban(GUILD, "u2");
    let lifted = engine.has_position(&user("u2"), BANNED_POSITION, &fixtures::guild_id()).await;
    assert_eq!(lifted, PositionCheck::Denied);
}

#[tokio::test]
async fn test_temporary_grant_reports_expiration() {
    let expires = fixtures::expiring_in(24);
    let directory = fixtures::ranked_directory().with_member(GUILD, "u1", &["r-member"]);
    let store = fixtures::binding_store(fixtures::standard_bindings());
    let cache = LiveDocumentCache::open("position_bindings", store, LiveCacheConfig::default());
    let ledger = MockRoleGrantLedger::new().with_grant(GUILD, "u1", "r-member", expires);
    let engine = AuthorizationEngine::new(cache, Arc::new(directory), AuthConfig::default())
        .with_ledger(Arc::new(ledger));

    let check = engine.has_position(&user("u1"), "Member", &fixtures::guild_id()).await;
    assert_eq!(check.grant().expect("granted").expiration().await, Some(expires));
}

// ============================================================================
// has_position_level
// ============================================================================

#[tokio::test]
async fn test_higher_position_satisfies_lower_level() {
    let directory = fixtures::ranked_directory()
        .with_member(GUILD, "high", &["r-council"])
        .with_member(GUILD, "low", &["r-member"])
        .with_member(GUILD, "guest", &["r-guest"]);
    let (engine, _) = engine_with(fixtures::standard_bindings(), directory, AuthConfig::default()).await;
    let guild = fixtures::guild_id();

    // No Member binding for r-council, yet Council ranks above Member.
    let check = engine.has_position_level(&user("high"), "Member", &guild).await;
    assert_eq!(check.grant().and_then(|g| g.role_id()), Some(&RoleId::new("r-council")));

    assert!(engine.has_position_level(&user("low"), "Member", &guild).await.is_granted());
    assert!(engine.has_position_level(&user("low"), "Council", &guild).await.is_denied());
    assert!(engine.has_position_level(&user("guest"), "Member", &guild).await.is_denied());
}

#[tokio::test]
async fn test_level_without_binding_is_unconfigured() {
    let directory = fixtures::ranked_directory().with_member(GUILD, "u1", &["r-admin"]);
    let (engine, _) = engine_with(fixtures::standard_bindings(), directory, AuthConfig::default()).await;

    let check = engine.has_position_level(&user("u1"), "Moderator", &fixtures::guild_id()).await;
    assert_eq!(check, PositionCheck::Unconfigured);
}

#[tokio::test]
async fn test_level_closure_ignores_unranked_roles() {
    // Council is bound to a role the platform does not know about.
    let bindings = vec![
        PositionRoleBinding::new("Council", GUILD, "r-vanished"),
        PositionRoleBinding::new("Member", GUILD, "r-member"),
    ];
    let directory = fixtures::ranked_directory()
        .with_member(GUILD, "u1", &["r-vanished"])
        .with_member(GUILD, "u2", &["r-admin"]);
    let (engine, _) = engine_with(bindings, directory, AuthConfig::default()).await;
    let guild = fixtures::guild_id();

    assert!(engine.has_position_level(&user("u1"), "Member", &guild).await.is_denied());
    // r-admin outranks r-member but is not bound to any position.
    assert!(engine.has_position_level(&user("u2"), "Member", &guild).await.is_denied());
    assert!(engine.has_position_level(&user("u1"), "Council", &guild).await.is_granted());
}

// ============================================================================
// has_permissions
// ============================================================================

#[tokio::test]
async fn test_administrators_short_circuit() {
    let directory = fixtures::ranked_directory()
        .with_administrator(GUILD, "owner")
        .with_member(GUILD, "operator", &[]);
    let config = AuthConfig::default().with_admin(user("operator"));
    let (engine, _) = engine_with(fixtures::standard_bindings(), directory, config).await;
    let guild = fixtures::guild_id();
    let requirement = PermissionRequirement::positions(["Admin"]);

    for admin in ["owner", "operator"] {
        let check = engine.has_permissions(&user(admin), &guild, &requirement).await;
        assert_eq!(check.grant().map(|g| g.source()), Some(&GrantSource::Administrator));
    }
}

#[tokio::test]
async fn test_permissions_or_combine_positions_and_level() {
    let directory = fixtures::ranked_directory()
        .with_member(GUILD, "council", &["r-council"])
        .with_member(GUILD, "admin", &["r-admin"])
        .with_member(GUILD, "guest", &["r-guest"]);
    let (engine, _) = engine_with(fixtures::standard_bindings(), directory, AuthConfig::default()).await;
    let guild = fixtures::guild_id();

    let requirement = PermissionRequirement::positions(["Treasurer", "Council"]);
    assert!(engine.has_permissions(&user("council"), &guild, &requirement).await.is_granted());

    let requirement = PermissionRequirement::positions(["Treasurer"]).or_level("Council");
    assert!(engine.has_permissions(&user("admin"), &guild, &requirement).await.is_granted());

    let outcome = engine
        .has_permissions(&user("guest"), &guild, &requirement)
        .await
        .outcome();
    assert_eq!(outcome, CheckOutcome::Denied);

    let requirement = PermissionRequirement::positions(["Treasurer"]);
    let outcome = engine
        .has_permissions(&user("guest"), &guild, &requirement)
        .await
        .outcome();
    assert_eq!(outcome, CheckOutcome::Unconfigured);
}

#[tokio::test]
async fn test_permissions_look_up_member_once() {
    let directory = fixtures::ranked_directory().with_member(GUILD, "u1", &["r-member"]);
    let (engine, directory) =
        engine_with(fixtures::standard_bindings(), directory, AuthConfig::default()).await;
    let requirement = PermissionRequirement::positions(["Admin", "Council", "Treasurer"]).or_level("Member");

    let check = engine
        .has_permissions(&user("u1"), &fixtures::guild_id(), &requirement)
        .await;

    assert!(check.is_granted());
    assert_eq!(directory.member_lookups(), 1);
    assert_eq!(directory.ban_lookups(), 1);
}

// ============================================================================
// Live updates and listings
// ============================================================================

#[tokio::test]
async fn test_binding_changes_apply_without_restart() {
    let directory = fixtures::ranked_directory().with_member(GUILD, "u1", &["r-guest"]);
    let (engine, _) = engine_with(fixtures::standard_bindings(), directory, AuthConfig::default()).await;
    let guild = fixtures::guild_id();

    assert!(engine.has_position(&user("u1"), "Greeter", &guild).await.is_unconfigured());

    engine
        .bindings()
        .upsert(PositionRoleBinding::new("Greeter", GUILD, "r-guest"))
        .await
        .unwrap();
    assert!(engine.has_position(&user("u1"), "Greeter", &guild).await.is_granted());
    assert_eq!(engine.roles_for_position("Greeter", &guild), vec![RoleId::new("r-guest")]);
}

#[tokio::test]
async fn test_member_positions_lists_direct_positions() {
    let bindings = vec![
        PositionRoleBinding::new("Council", GUILD, "r-council"),
        PositionRoleBinding::new("Member", GUILD, "r-member"),
        PositionRoleBinding::new("Member", GUILD, "r-council"),
        PositionRoleBinding::new("Council", OTHER_GUILD, "r-council"),
    ];
    let directory = fixtures::ranked_directory().with_member(GUILD, "u1", &["r-council"]);
    let (engine, _) = engine_with(bindings, directory, AuthConfig::default()).await;

    let positions = engine.member_positions(&user("u1"), &fixtures::guild_id()).await;
    assert_eq!(positions, vec!["Council".to_string(), "Member".to_string()]);
    assert!(engine
        .member_positions(&user("nobody"), &fixtures::guild_id())
        .await
        .is_empty());
}
