//! Owner identity of a graph document.

use serde::{Deserialize, Serialize};

use crate::config::ScopeMode;
use crate::error::{Error, Result};

/// Joins user id and scope in [`OwnerKey::tenant`]; never part of either.
pub const TENANT_SEPARATOR: &str = "::";

/// Key of one graph document: a user, optionally narrowed to a conversation.
///
/// An empty `scope` is the user's default graph. Under [`ScopeMode::PerUser`]
/// the scope is always empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey {
    pub user_id: String,
    pub scope: String,
}

impl OwnerKey {
    /// Owner key of a user's default graph.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            scope: String::new(),
        }
    }

    /// Build the key for a request, honouring the configured scope mode.
    ///
    /// Fails when the user id or the scope contains [`TENANT_SEPARATOR`] or
    /// touches it with a colon, so that two owners never share a tenant string.
    pub fn resolve(user_id: impl Into<String>, scope: Option<&str>, mode: ScopeMode) -> Result<Self> {
        let user_id = user_id.into();
        let scope = match mode {
            ScopeMode::PerUser => String::new(),
            ScopeMode::PerConversation => scope.map(str::trim).unwrap_or_default().to_string(),
        };
        // a colon next to the separator would make the split ambiguous too
        let ambiguous = user_id.contains(TENANT_SEPARATOR)
            || scope.contains(TENANT_SEPARATOR)
            || (!scope.is_empty() && (user_id.ends_with(':') || scope.starts_with(':')));
        if ambiguous {
            return Err(Error::BadRequest(format!(
                "owner {:?} / scope {:?}: {:?} is reserved",
                user_id, scope, TENANT_SEPARATOR
            )));
        }
        Ok(Self { user_id, scope })
    }

    /// Tenant string sent to the external vector services.
    pub fn tenant(&self) -> String {
        if self.scope.is_empty() {
            self.user_id.clone()
        } else {
            format!("{}{}{}", self.user_id, TENANT_SEPARATOR, self.scope)
        }
    }
}

impl std::fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tenant())
    }
}
