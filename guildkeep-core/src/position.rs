//! Position → role bindings.

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::{DocumentId, GuildId, RoleId};

/// Position name checked against guild bans instead of roles.
pub const BANNED_POSITION: &str = "Banned";

/// Binds a named position to one platform role inside one guild.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionRoleBinding {
    pub id: DocumentId,
    pub position: String,
    pub guild_id: GuildId,
    pub role_id: RoleId,
}

impl PositionRoleBinding {
    pub fn new(
        position: impl Into<String>,
        guild_id: impl Into<GuildId>,
        role_id: impl Into<RoleId>,
    ) -> Self {
        let position = position.into();
        let guild_id = guild_id.into();
        let role_id = role_id.into();
        let id = DocumentId::new(format!("{}:{}:{}", guild_id, position, role_id));
        Self {
            id,
            position,
            guild_id,
            role_id,
        }
    }

    pub fn matches(&self, position: &str, guild_id: &GuildId) -> bool {
        self.position == position && &self.guild_id == guild_id
    }
}

impl Document for PositionRoleBinding {
    fn document_id(&self) -> DocumentId {
        self.id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_binding_id_is_derived_from_fields() {
        let binding = PositionRoleBinding::new("Council", "g1", "r9");
        assert_eq!(binding.document_id().as_str(), "g1:Council:r9");
        assert!(binding.matches("Council", &GuildId::new("g1")));
        assert!(!binding.matches("Council", &GuildId::new("g2")));
        assert!(!binding.matches("Member", &GuildId::new("g1")));
    }

    proptest! {
        /// Distinct (guild, position, role) triples never share a document id.
        #[test]
        fn prop_binding_ids_identify_fields(
            a in ("[a-z0-9]{1,6}", "[A-Za-z]{1,8}", "[a-z0-9]{1,6}"),
            b in ("[a-z0-9]{1,6}", "[A-Za-z]{1,8}", "[a-z0-9]{1,6}"),
        ) {
            let first = PositionRoleBinding::new(a.1.clone(), a.0.clone(), a.2.clone());
            let second = PositionRoleBinding::new(b.1.clone(), b.0.clone(), b.2.clone());
            prop_assert_eq!(first.document_id() == second.document_id(), a == b);
        }
    }
}
