//! Key and alias resolution.
//!
//! Turns what a user typed into exactly one factoid:
//!
//! 1. `.` stands for the user's last resolved key (the dot target).
//! 2. An exact factoid key resolves to itself.
//! 3. An exact alias key resolves, one level deep, to its target.
//! 4. Otherwise the key is treated as local to every context whose channel
//!    list matches the current channel. One hit resolves; several are
//!    ambiguous.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::factoid::{Factoid, normalize_key};
use crate::mask::match_channel_list;
use crate::store::{FactoidDb, FactoidStore};
use crate::transport::ChatTransport;

/// Key typed to refer to the last resolved factoid.
pub const DOT: &str = ".";

/// Expected failures of a lookup, reported back to the requester.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no such factoid")]
    NotFound,

    #[error("alias or last target points at a missing factoid")]
    BrokenAlias,

    #[error("ambiguous: could be {}", .0.join(", "))]
    Ambiguous(Vec<String>),
}

/// Where a lookup happens: a connection and, optionally, a channel.
#[derive(Clone, Copy)]
pub struct Location<'a> {
    pub transport: &'a dyn ChatTransport,
    pub channel: Option<&'a str>,
}

impl<'a> Location<'a> {
    /// A location in `channel` on `transport`'s network.
    pub fn channel(transport: &'a dyn ChatTransport, channel: &'a str) -> Self {
        Self {
            transport,
            channel: Some(channel),
        }
    }

    /// A private location (no channel).
    pub fn private(transport: &'a dyn ChatTransport) -> Self {
        Self {
            transport,
            channel: None,
        }
    }
}

/// A successfully resolved factoid.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Canonical full key.
    pub key: String,
    /// Context part of `key`, split against the same snapshot the key was
    /// resolved in.
    pub context: Option<String>,
    /// `key` without its context.
    pub local_key: String,
    /// The factoid itself.
    pub factoid: Arc<Factoid>,
    /// Whether the key was found through the current channel's context
    /// rather than typed in full.
    pub implicit_context: bool,
}

/// Contexts whose channel list matches `location`, ordered by name.
pub fn contexts_at<'db>(db: &'db FactoidDb, location: &Location<'_>) -> Vec<&'db str> {
    db.contexts()
        .filter(|c| match_channel_list(&c.channels, location.transport, location.channel).is_match())
        .map(|c| c.name())
        .collect()
}

/// Resolve `key` against one database snapshot. Does not touch dot targets.
pub fn resolve_in(
    db: &FactoidDb,
    key: &str,
    location: &Location<'_>,
) -> Result<Resolved, ResolveError> {
    let key = normalize_key(key);
    if let Some(hit) = direct(db, &key)? {
        return Ok(hit);
    }

    let mut hits: Vec<Resolved> = Vec::new();
    let mut broken = 0usize;
    for context in contexts_at(db, location) {
        let qualified = format!("{context}/{key}");
        match direct(db, &qualified) {
            Ok(Some(hit)) => {
                if !hits.iter().any(|h| h.key == hit.key) {
                    hits.push(Resolved {
                        implicit_context: true,
                        ..hit
                    });
                }
            }
            Ok(None) => {}
            Err(_) => broken += 1,
        }
    }

    match hits.len() {
        0 if broken > 0 => Err(ResolveError::BrokenAlias),
        0 => Err(ResolveError::NotFound),
        1 => Ok(hits.remove(0)),
        _ => Err(ResolveError::Ambiguous(
            hits.into_iter().map(|h| h.key).collect(),
        )),
    }
}

/// Exact factoid, then exact alias (one level).
fn direct(db: &FactoidDb, key: &str) -> Result<Option<Resolved>, ResolveError> {
    if let Some(factoid) = db.factoid(key) {
        return Ok(Some(resolved(db, factoid)));
    }
    let Some(target) = db.alias(key) else {
        return Ok(None);
    };
    match db.factoid(target) {
        Some(factoid) => Ok(Some(resolved(db, factoid))),
        None => Err(ResolveError::BrokenAlias),
    }
}

fn resolved(db: &FactoidDb, factoid: &Arc<Factoid>) -> Resolved {
    let (context, local) = db.split_context_and_key(factoid.key());
    Resolved {
        key: factoid.key().to_string(),
        context: context.map(str::to_string),
        local_key: local.to_string(),
        factoid: Arc::clone(factoid),
        implicit_context: false,
    }
}

/// The single context of `location`.
pub fn context_lookup(db: &FactoidDb, location: &Location<'_>) -> Result<String, ResolveError> {
    let mut names = contexts_at(db, location);
    match names.len() {
        0 => Err(ResolveError::NotFound),
        1 => Ok(names.remove(0).to_string()),
        _ => Err(ResolveError::Ambiguous(
            names.into_iter().map(str::to_string).collect(),
        )),
    }
}

/// Bounded map of user identity to last resolved key.
///
/// When full, the least recently written entry is evicted.
#[derive(Debug)]
pub struct DotTargets {
    entries: HashMap<String, (String, u64)>,
    capacity: usize,
    clock: u64,
}

impl DotTargets {
    /// Create a map holding at most `capacity` users.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    /// The last key resolved by `user`.
    pub fn get(&self, user: &str) -> Option<&str> {
        self.entries.get(user).map(|(key, _)| key.as_str())
    }

    /// Remember `key` as `user`'s last target.
    pub fn record(&mut self, user: &str, key: &str) {
        self.clock += 1;
        self.entries
            .insert(user.to_string(), (key.to_string(), self.clock));
        if self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, stamp))| *stamp)
                .map(|(user, _)| user.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Number of remembered users.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no users are remembered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves keys against the shared store and tracks dot targets.
pub struct Resolver {
    store: Arc<FactoidStore>,
    dot_targets: Mutex<DotTargets>,
}

impl Resolver {
    /// Create a resolver remembering at most `max_dot_targets` users.
    pub fn new(store: Arc<FactoidStore>, max_dot_targets: usize) -> Self {
        Self {
            store,
            dot_targets: Mutex::new(DotTargets::new(max_dot_targets)),
        }
    }

    /// Resolve `key` for `user` (a `network/nick` identity) at `location`.
    ///
    /// Every successful resolution of a key other than `.` becomes the
    /// user's new dot target.
    pub fn resolve(
        &self,
        key: &str,
        user: &str,
        location: &Location<'_>,
    ) -> Result<Resolved, ResolveError> {
        let db = self.store.snapshot();
        let mut targets = self.dot_targets.lock().unwrap_or_else(PoisonError::into_inner);

        if key.trim() == DOT {
            let last = targets.get(user).ok_or(ResolveError::BrokenAlias)?;
            return resolve_in(&db, last, location).map_err(|e| match e {
                ResolveError::NotFound => ResolveError::BrokenAlias,
                other => other,
            });
        }

        let resolved = resolve_in(&db, key, location)?;
        debug!(user = %user, key = %resolved.key, "Dot target updated");
        targets.record(user, &resolved.key);
        Ok(resolved)
    }

    /// The single context of `location`, for operations that need "this
    /// channel's context".
    pub fn context_lookup(&self, location: &Location<'_>) -> Result<String, ResolveError> {
        context_lookup(&self.store.snapshot(), location)
    }

    /// Split a full key into `(context, local_key)` against the current
    /// context names.
    pub fn split_context_and_key(&self, key: &str) -> (Option<String>, String) {
        let db = self.store.snapshot();
        let (context, local) = db.split_context_and_key(key);
        (context.map(normalize_key), local.to_string())
    }

    /// The current dot target of `user`.
    pub fn dot_target(&self, user: &str) -> Option<String> {
        self.dot_targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .map(str::to_string)
    }
}
