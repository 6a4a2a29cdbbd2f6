//! Role-based access control over the folder tree: principals, actions,
//! role configuration, and the resolver/enforcer built on top of them.

pub mod enforce;
pub mod resolver;

pub use enforce::AccessEnforcer;
pub use resolver::AccessResolver;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Opaque role identifier.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(String);

impl RoleId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Fallback access rule applied when a folder has no explicit entry for a
/// role. Exactly one role is configured `FullAccessByDefault`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultPolicy {
    NoAccess,
    FullAccessByDefault,
}

/// Closed set of gated folder actions.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionKind {
    View,
    MoveTo,
    UploadTo,
    Delete,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::View,
        ActionKind::MoveTo,
        ActionKind::UploadTo,
        ActionKind::Delete,
    ];
}

/// Set of explicitly allowed actions. An empty set is an explicit deny-all,
/// which is not the same thing as no entry at all.
pub type ActionSet = BTreeSet<ActionKind>;

/// The acting user. Roles are kept ordered so multi-role resolution (inbox
/// selection in particular) is deterministic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub roles: BTreeSet<RoleId>,
    pub superuser: bool,
}

impl Principal {
    pub fn new(id: impl Into<String>, roles: impl IntoIterator<Item = RoleId>) -> Self {
        Self {
            id: id.into(),
            roles: roles.into_iter().collect(),
            superuser: false,
        }
    }

    pub fn superuser(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: BTreeSet::new(),
            superuser: true,
        }
    }
}

/// Static role configuration: per-role default policy plus the inbox map
/// routing new uploads. Loaded once at startup; which role gets full access
/// by default is data here, not a hardcoded role name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoleRegistry {
    policies: BTreeMap<RoleId, DefaultPolicy>,
    #[serde(default)]
    inboxes: BTreeMap<RoleId, Uuid>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, role: RoleId, policy: DefaultPolicy) {
        self.policies.insert(role, policy);
    }

    pub fn set_inbox(&mut self, role: RoleId, folder: Uuid) {
        self.inboxes.insert(role, folder);
    }

    pub fn clear_inbox(&mut self, role: &RoleId) {
        self.inboxes.remove(role);
    }

    /// Default policy for a role; roles never defined fall back to `NoAccess`.
    pub fn policy(&self, role: &RoleId) -> DefaultPolicy {
        self.policies
            .get(role)
            .copied()
            .unwrap_or(DefaultPolicy::NoAccess)
    }

    pub fn inbox(&self, role: &RoleId) -> Option<Uuid> {
        self.inboxes.get(role).copied()
    }

    pub fn roles(&self) -> impl Iterator<Item = &RoleId> {
        self.policies.keys()
    }
}
