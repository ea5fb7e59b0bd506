//! Scripted permission authority.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use factoid_core::{BoxFuture, PermissionAuthority, Sender};

/// Grants a fixed set of `(nick, permission)` pairs, optionally after a
/// delay, and counts how often it was asked.
#[derive(Default)]
pub struct ScriptedPermissions {
    grants: Mutex<HashSet<(String, String)>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every check only after `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Grant `permission` to `nick` (case-insensitive).
    pub fn grant(&self, nick: &str, permission: &str) -> &Self {
        self.grants
            .lock()
            .expect("grants lock poisoned")
            .insert((nick.to_lowercase(), permission.to_lowercase()));
        self
    }

    /// Number of checks answered so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PermissionAuthority for ScriptedPermissions {
    fn check_permission<'a>(
        &'a self,
        _network: &'a str,
        user: &'a Sender,
        permission: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.grants
                .lock()
                .expect("grants lock poisoned")
                .contains(&(user.nick.to_lowercase(), permission.to_lowercase()))
        })
    }
}
