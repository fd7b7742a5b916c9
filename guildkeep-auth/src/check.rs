//! Authorization outcomes and requirements.

use std::fmt;
use std::sync::Arc;

use guildkeep_core::{GuildId, RoleGrantLedger, RoleId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

// ============================================================================
// GRANTS
// ============================================================================

/// What satisfied a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrantSource {
    /// The member holds a role bound to the requested position.
    Role { role_id: RoleId },
    /// The user is banned (for checks on the ban position).
    Ban,
    /// Platform administrator or configured bot admin.
    Administrator,
}

/// A successful check.
///
/// Role grants may be temporary; [`Grant::expiration`] asks the role grant
/// ledger when the underlying role lapses.
#[derive(Clone)]
pub struct Grant {
    guild_id: GuildId,
    user_id: UserId,
    source: GrantSource,
    ledger: Option<Arc<dyn RoleGrantLedger>>,
}

impl Grant {
    pub(crate) fn new(
        guild_id: GuildId,
        user_id: UserId,
        source: GrantSource,
        ledger: Option<Arc<dyn RoleGrantLedger>>,
    ) -> Self {
        Self {
            guild_id,
            user_id,
            source,
            ledger,
        }
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn source(&self) -> &GrantSource {
        &self.source
    }

    /// The role that satisfied the check, if it was role based.
    pub fn role_id(&self) -> Option<&RoleId> {
        match &self.source {
            GrantSource::Role { role_id } => Some(role_id),
            GrantSource::Ban | GrantSource::Administrator => None,
        }
    }

    /// When this grant lapses. `None` means permanent or unknown.
    ///
    /// Ban expirations are not tracked and always report `None`.
    pub async fn expiration(&self) -> Option<Timestamp> {
        let role_id = self.role_id()?;
        let ledger = self.ledger.as_ref()?;
        ledger
            .expires_at(&self.guild_id, &self.user_id, role_id)
            .await
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant")
            .field("guild_id", &self.guild_id)
            .field("user_id", &self.user_id)
            .field("source", &self.source)
            .finish()
    }
}

impl PartialEq for Grant {
    fn eq(&self, other: &Self) -> bool {
        self.guild_id == other.guild_id
            && self.user_id == other.user_id
            && self.source == other.source
    }
}

impl Eq for Grant {}

// ============================================================================
// CHECK RESULTS
// ============================================================================

/// Tri-state result of an authorization check.
///
/// `Unconfigured` means the check could not be decided (nothing bound to the
/// position, or the member could not be resolved). It is not a denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionCheck {
    Granted(Grant),
    Denied,
    Unconfigured,
}

/// Field-free view of a [`PositionCheck`], for logging and serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Granted,
    Denied,
    Unconfigured,
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckOutcome::Granted => "granted",
            CheckOutcome::Denied => "denied",
            CheckOutcome::Unconfigured => "unconfigured",
        };
        f.write_str(s)
    }
}

impl PositionCheck {
    pub fn outcome(&self) -> CheckOutcome {
        match self {
            PositionCheck::Granted(_) => CheckOutcome::Granted,
            PositionCheck::Denied => CheckOutcome::Denied,
            PositionCheck::Unconfigured => CheckOutcome::Unconfigured,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, PositionCheck::Granted(_))
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, PositionCheck::Denied)
    }

    pub fn is_unconfigured(&self) -> bool {
        matches!(self, PositionCheck::Unconfigured)
    }

    pub fn grant(&self) -> Option<&Grant> {
        match self {
            PositionCheck::Granted(grant) => Some(grant),
            _ => None,
        }
    }

    /// Collapse to a boolean, treating `Unconfigured` as `default`.
    pub fn allowed_or(&self, default: bool) -> bool {
        match self {
            PositionCheck::Granted(_) => true,
            PositionCheck::Denied => false,
            PositionCheck::Unconfigured => default,
        }
    }

    /// OR-combine several checks: any grant wins, then any denial, else
    /// unconfigured.
    pub fn any(checks: impl IntoIterator<Item = PositionCheck>) -> PositionCheck {
        let mut denied = false;
        for check in checks {
            match check {
                granted @ PositionCheck::Granted(_) => return granted,
                PositionCheck::Denied => denied = true,
                PositionCheck::Unconfigured => {}
            }
        }
        if denied {
            PositionCheck::Denied
        } else {
            PositionCheck::Unconfigured
        }
    }
}

// ============================================================================
// REQUIREMENTS
// ============================================================================

/// Permission requirement of a command: any listed position, or the level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequirement {
    #[serde(default)]
    pub positions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl PermissionRequirement {
    /// Requirement satisfied by any of `positions`.
    pub fn positions<I, S>(positions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            positions: positions.into_iter().map(Into::into).collect(),
            level: None,
        }
    }

    /// Requirement satisfied by `level` or anything ranked above it.
    pub fn level(level: impl Into<String>) -> Self {
        Self {
            positions: Vec::new(),
            level: Some(level.into()),
        }
    }

    pub fn or_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    /// Only administrators satisfy an empty requirement.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.level.is_none()
    }
}
