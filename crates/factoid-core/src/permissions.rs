//! Hostmask-based permission authority.
//!
//! A [`CapabilityTable`] is an ordered list of `(hostmask glob, grants)`
//! rules. A user holds a permission if any rule whose glob matches their
//! `nick!user@host` grants it, or grants `*`.

use factoid_config::PermissionRuleConfig;
use tracing::trace;

use crate::BoxFuture;
use crate::event::Sender;
use crate::mask::matches_hostmask;
use crate::transport::PermissionAuthority;

/// Grant name that stands for every permission.
pub const ALL_PERMISSIONS: &str = "*";

#[derive(Debug, Clone)]
struct Grant {
    hostmask: String,
    permissions: Vec<String>,
}

/// Static permission table built from configuration.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    grants: Vec<Grant>,
}

impl CapabilityTable {
    /// An empty table: nobody holds anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from configured rules.
    pub fn from_config(rules: &[PermissionRuleConfig]) -> Self {
        let mut table = Self::new();
        for rule in rules {
            table.grant(&rule.hostmask, rule.grants.iter().map(String::as_str));
        }
        table
    }

    /// Add a rule granting `permissions` to users matching `hostmask`.
    pub fn grant<'a>(&mut self, hostmask: &str, permissions: impl IntoIterator<Item = &'a str>) {
        self.grants.push(Grant {
            hostmask: hostmask.to_string(),
            permissions: permissions.into_iter().map(str::to_lowercase).collect(),
        });
    }

    /// Whether `user` holds `permission`.
    pub fn allows(&self, user: &Sender, permission: &str) -> bool {
        let hostmask = user.hostmask();
        let permission = permission.to_lowercase();
        self.grants
            .iter()
            .filter(|g| matches_hostmask(&g.hostmask, &hostmask))
            .any(|g| {
                g.permissions
                    .iter()
                    .any(|p| p == ALL_PERMISSIONS || *p == permission)
            })
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Whether the table has no rules.
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl PermissionAuthority for CapabilityTable {
    fn check_permission<'a>(
        &'a self,
        network: &'a str,
        user: &'a Sender,
        permission: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let allowed = self.allows(user, permission);
            trace!(network = %network, nick = %user.nick, permission = %permission, allowed, "Permission checked");
            allowed
        })
    }
}
