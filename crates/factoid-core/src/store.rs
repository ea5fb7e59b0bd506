//! Shared factoid, alias, and context store.
//!
//! The store holds an immutable [`FactoidDb`] behind an `Arc`. Readers take
//! a cheap [`snapshot`](FactoidStore::snapshot) and work against it without
//! holding any lock. Writers go through [`FactoidStore::edit`], which clones
//! the current database, applies the edit, and swaps the result in only if
//! the edit succeeded. A trigger scan therefore always sees either the whole
//! edit or none of it.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use factoid_config::TriggerConfig;
use tracing::{debug, info, warn};

use crate::factoid::{Context, Factoid, RateLimit, normalize_key};
use crate::trigger::TriggerRule;

/// Errors from administrative edits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no such factoid: {0}")]
    NoSuchFactoid(String),

    #[error("no such alias: {0}")]
    NoSuchAlias(String),

    #[error("no such context: {0}")]
    NoSuchContext(String),

    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    #[error("factoid body must contain at least one non-empty line")]
    EmptyBody,

    #[error("line text must not contain line breaks")]
    MultiLine,

    #[error("{0} is already used by {1}")]
    NameCollision(String, &'static str),

    #[error("alias target {0} is itself an alias")]
    AliasChain(String),

    #[error("line {index} out of range (factoid has {len} lines)")]
    LineOutOfRange { index: usize, len: usize },

    #[error("trigger {index} out of range (factoid has {len} triggers)")]
    TriggerOutOfRange { index: usize, len: usize },
}

/// The complete set of factoids, aliases, and contexts.
#[derive(Debug, Clone, Default)]
pub struct FactoidDb {
    factoids: BTreeMap<String, Arc<Factoid>>,
    aliases: BTreeMap<String, String>,
    contexts: BTreeMap<String, Context>,
    defaults: TriggerConfig,
}

impl FactoidDb {
    /// Create an empty database whose new factoids use `defaults`.
    pub fn new(defaults: TriggerConfig) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    // ── Reads ─────────────────────────────────────────────────────────

    /// Look up a factoid by exact key.
    pub fn factoid(&self, key: &str) -> Option<&Arc<Factoid>> {
        self.factoids.get(&normalize_key(key))
    }

    /// Look up an alias target by exact alias key.
    pub fn alias(&self, key: &str) -> Option<&str> {
        self.aliases.get(&normalize_key(key)).map(String::as_str)
    }

    /// Look up a context by name.
    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts.get(&normalize_key(name))
    }

    /// All factoids, ordered by key.
    pub fn factoids(&self) -> impl Iterator<Item = &Arc<Factoid>> {
        self.factoids.values()
    }

    /// All aliases as `(alias, target)`, ordered by alias.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// All contexts, ordered by name.
    pub fn contexts(&self) -> impl Iterator<Item = &Context> {
        self.contexts.values()
    }

    /// Factoids that have at least one trigger rule.
    pub fn triggered_factoids(&self) -> Vec<Arc<Factoid>> {
        self.factoids
            .values()
            .filter(|f| f.has_triggers())
            .cloned()
            .collect()
    }

    /// Number of factoids.
    pub fn len(&self) -> usize {
        self.factoids.len()
    }

    /// Whether the database holds no factoids.
    pub fn is_empty(&self) -> bool {
        self.factoids.is_empty()
    }

    /// Split a full key into `(context, local_key)`.
    ///
    /// Scans `/` positions from the end of the key backwards and returns
    /// the longest prefix that names a known context. Keys without such a
    /// prefix have no context and are their own local key.
    pub fn split_context_and_key<'k>(&self, key: &'k str) -> (Option<&'k str>, &'k str) {
        for (pos, _) in key.rmatch_indices('/') {
            let prefix = &key[..pos];
            if self.contexts.contains_key(&normalize_key(prefix)) {
                return (Some(prefix), &key[pos + 1..]);
            }
        }
        (None, key)
    }

    /// Channel masks governing a key: its context's list, or `["*"]` if
    /// the key has no context.
    pub fn channels_for(&self, key: &str) -> Vec<String> {
        match self.split_context_and_key(key).0.and_then(|c| self.context(c)) {
            Some(context) => context.channels.clone(),
            None => vec!["*".to_string()],
        }
    }

    /// Keys of factoids, optionally restricted to one context. Hidden
    /// factoids are left out unless `include_hidden` is set.
    pub fn list_keys(&self, include_hidden: bool, context: Option<&str>) -> Vec<String> {
        let context = context.map(normalize_key);
        self.factoids
            .values()
            .filter(|f| include_hidden || !f.hidden)
            .filter(|f| match &context {
                Some(wanted) => self.split_context_and_key(f.key()).0 == Some(wanted.as_str()),
                None => true,
            })
            .map(|f| f.key().to_string())
            .collect()
    }

    /// Keys of factoids whose body contains `needle` (case-insensitive).
    pub fn search(&self, needle: &str, include_hidden: bool) -> Vec<String> {
        let needle = needle.to_lowercase();
        self.factoids
            .values()
            .filter(|f| include_hidden || !f.hidden)
            .filter(|f| f.lines().iter().any(|l| l.to_lowercase().contains(&needle)))
            .map(|f| f.key().to_string())
            .collect()
    }

    // ── Factoid edits ─────────────────────────────────────────────────

    /// Create a factoid or replace the body of an existing one. Triggers
    /// and flags of an existing factoid are kept.
    pub fn set_factoid(&mut self, key: &str, text: &str) -> Result<(), StoreError> {
        let key = self.check_new_factoid_key(key)?;
        match self.factoids.get_mut(&key) {
            Some(existing) => {
                if !Arc::make_mut(existing).set_body(text) {
                    return Err(StoreError::EmptyBody);
                }
            }
            None => {
                let factoid = Factoid::with_defaults(&key, text, &self.defaults)
                    .ok_or(StoreError::EmptyBody)?;
                self.factoids.insert(key.clone(), Arc::new(factoid));
            }
        }
        debug!(key = %key, "Factoid set");
        Ok(())
    }

    /// Append a line, creating the factoid if needed.
    pub fn append_line(&mut self, key: &str, line: &str) -> Result<(), StoreError> {
        let line = single_line(line)?;
        let normalized = normalize_key(key);
        if !self.factoids.contains_key(&normalized) {
            return self.set_factoid(key, &line);
        }
        self.update(&normalized, |f| {
            f.body_mut().push(line);
            Ok(())
        })
    }

    /// Insert a line before `index` (0-based; `index == len` appends).
    pub fn insert_line(&mut self, key: &str, index: usize, line: &str) -> Result<(), StoreError> {
        let line = single_line(line)?;
        self.update(key, |f| {
            let len = f.lines().len();
            if index > len {
                return Err(StoreError::LineOutOfRange { index, len });
            }
            f.body_mut().insert(index, line);
            Ok(())
        })
    }

    /// Replace line `index` (0-based).
    pub fn replace_line(&mut self, key: &str, index: usize, line: &str) -> Result<(), StoreError> {
        let line = single_line(line)?;
        self.update(key, |f| {
            let len = f.lines().len();
            let slot = f
                .body_mut()
                .get_mut(index)
                .ok_or(StoreError::LineOutOfRange { index, len })?;
            *slot = line;
            Ok(())
        })
    }

    /// Remove line `index` (0-based). Removing the last line deletes the
    /// factoid; returns `true` in that case.
    pub fn remove_line(&mut self, key: &str, index: usize) -> Result<bool, StoreError> {
        let factoid = self.factoid_mut(key)?;
        let len = factoid.lines().len();
        if index >= len {
            return Err(StoreError::LineOutOfRange { index, len });
        }
        if len == 1 {
            self.delete_factoid(key)?;
            return Ok(true);
        }
        factoid.body_mut().remove(index);
        Ok(false)
    }

    /// Delete a factoid.
    pub fn delete_factoid(&mut self, key: &str) -> Result<Arc<Factoid>, StoreError> {
        let key = normalize_key(key);
        let removed = self
            .factoids
            .remove(&key)
            .ok_or_else(|| StoreError::NoSuchFactoid(key.clone()))?;
        info!(key = %key, "Factoid deleted");
        Ok(removed)
    }

    /// Append a trigger rule. Returns `true` if the rule is malformed (it is
    /// stored anyway and never matches).
    pub fn add_trigger(&mut self, key: &str, rule: &str) -> Result<bool, StoreError> {
        let rule = TriggerRule::new(rule);
        let malformed = rule.is_malformed();
        self.update(key, |f| {
            f.triggers.push(rule);
            Ok(())
        })?;
        Ok(malformed)
    }

    /// Remove trigger rule `index` (0-based).
    pub fn remove_trigger(&mut self, key: &str, index: usize) -> Result<TriggerRule, StoreError> {
        let factoid = self.factoid_mut(key)?;
        let len = factoid.triggers.len();
        if index >= len {
            return Err(StoreError::TriggerOutOfRange { index, len });
        }
        Ok(factoid.triggers.remove(index))
    }

    /// Hide or unhide a factoid from listings.
    pub fn set_hidden(&mut self, key: &str, hidden: bool) -> Result<(), StoreError> {
        self.update(key, |f| {
            f.hidden = hidden;
            Ok(())
        })
    }

    /// Suppress or show the label on display.
    pub fn set_hide_label(&mut self, key: &str, hide_label: bool) -> Result<(), StoreError> {
        self.update(key, |f| {
            f.hide_label = hide_label;
            Ok(())
        })
    }

    /// Toggle private delivery for join/invite triggered output.
    pub fn set_notice_on_join(&mut self, key: &str, notice: bool) -> Result<(), StoreError> {
        self.update(key, |f| {
            f.notice_on_join = notice;
            Ok(())
        })
    }

    /// Set the per-user rate limit.
    pub fn set_rate_limit(&mut self, key: &str, limit: RateLimit) -> Result<(), StoreError> {
        self.update(key, |f| {
            f.rate_limit = limit;
            Ok(())
        })
    }

    // ── Alias edits ───────────────────────────────────────────────────

    /// Point `alias` at `target`. The target need not exist yet, but may
    /// not itself be an alias.
    pub fn add_alias(&mut self, alias: &str, target: &str) -> Result<(), StoreError> {
        let alias = valid_key(alias)?;
        let target = valid_key(target)?;
        if self.factoids.contains_key(&alias) {
            return Err(StoreError::NameCollision(alias, "a factoid"));
        }
        if self.contexts.contains_key(&alias) {
            return Err(StoreError::NameCollision(alias, "a context"));
        }
        if self.aliases.contains_key(&target) {
            return Err(StoreError::AliasChain(target));
        }
        if self.aliases.values().any(|t| *t == alias) {
            return Err(StoreError::AliasChain(alias));
        }
        debug!(alias = %alias, target = %target, "Alias set");
        self.aliases.insert(alias, target);
        Ok(())
    }

    /// Remove an alias.
    pub fn remove_alias(&mut self, alias: &str) -> Result<String, StoreError> {
        let alias = normalize_key(alias);
        self.aliases
            .remove(&alias)
            .ok_or(StoreError::NoSuchAlias(alias))
    }

    // ── Context edits ─────────────────────────────────────────────────

    /// Create a context or replace its channel list.
    pub fn set_context(&mut self, name: &str, channels: Vec<String>) -> Result<(), StoreError> {
        let name = valid_key(name)?;
        if self.factoids.contains_key(&name) {
            return Err(StoreError::NameCollision(name, "a factoid"));
        }
        if self.aliases.contains_key(&name) {
            return Err(StoreError::NameCollision(name, "an alias"));
        }
        debug!(context = %name, channels = channels.len(), "Context set");
        self.contexts
            .insert(name.clone(), Context::new(&name, channels));
        Ok(())
    }

    /// Remove a context. Factoids under it keep their full keys.
    pub fn remove_context(&mut self, name: &str) -> Result<Context, StoreError> {
        let name = normalize_key(name);
        self.contexts
            .remove(&name)
            .ok_or(StoreError::NoSuchContext(name))
    }

    /// Add a channel mask to a context (no-op if already present).
    pub fn add_context_channel(&mut self, name: &str, mask: &str) -> Result<(), StoreError> {
        let context = self.context_mut(name)?;
        if !context.channels.iter().any(|c| c.eq_ignore_ascii_case(mask)) {
            context.channels.push(mask.to_string());
        }
        Ok(())
    }

    /// Remove a channel mask from a context. Returns whether it was present.
    pub fn remove_context_channel(&mut self, name: &str, mask: &str) -> Result<bool, StoreError> {
        let context = self.context_mut(name)?;
        let before = context.channels.len();
        context.channels.retain(|c| !c.eq_ignore_ascii_case(mask));
        Ok(context.channels.len() != before)
    }

    // ── Helpers ───────────────────────────────────────────────────────

    fn check_new_factoid_key(&self, key: &str) -> Result<String, StoreError> {
        let key = valid_key(key)?;
        if self.contexts.contains_key(&key) {
            return Err(StoreError::NameCollision(key, "a context"));
        }
        if self.aliases.contains_key(&key) {
            return Err(StoreError::NameCollision(key, "an alias"));
        }
        Ok(key)
    }

    fn factoid_mut(&mut self, key: &str) -> Result<&mut Factoid, StoreError> {
        let key = normalize_key(key);
        match self.factoids.get_mut(&key) {
            Some(factoid) => Ok(Arc::make_mut(factoid)),
            None => Err(StoreError::NoSuchFactoid(key)),
        }
    }

    fn context_mut(&mut self, name: &str) -> Result<&mut Context, StoreError> {
        let name = normalize_key(name);
        match self.contexts.get_mut(&name) {
            Some(context) => Ok(context),
            None => Err(StoreError::NoSuchContext(name)),
        }
    }

    fn update(
        &mut self,
        key: &str,
        f: impl FnOnce(&mut Factoid) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        f(self.factoid_mut(key)?)
    }

    // ── Bulk load ─────────────────────────────────────────────────────

    /// Insert a fully built factoid during bulk load. The first definition
    /// of a name wins; a clash is returned as a [`Collision`].
    pub(crate) fn load_factoid(&mut self, factoid: Factoid) -> Result<(), Collision> {
        let key = factoid.key().to_string();
        if self.contexts.contains_key(&key) {
            return Err(Collision::new(&key, "factoid", "context"));
        }
        if self.factoids.contains_key(&key) {
            return Err(Collision::new(&key, "factoid", "factoid"));
        }
        self.factoids.insert(key, Arc::new(factoid));
        Ok(())
    }

    pub(crate) fn load_context(&mut self, context: Context) -> Result<(), Collision> {
        if self.contexts.contains_key(context.name()) {
            return Err(Collision::new(context.name(), "context", "context"));
        }
        self.contexts.insert(context.name().to_string(), context);
        Ok(())
    }

    pub(crate) fn load_alias(&mut self, alias: &str, target: &str) -> Result<(), Collision> {
        let alias = normalize_key(alias);
        let target = normalize_key(target);
        for (kind, taken) in [
            ("context", self.contexts.contains_key(&alias)),
            ("factoid", self.factoids.contains_key(&alias)),
            ("alias", self.aliases.contains_key(&alias)),
        ] {
            if taken {
                return Err(Collision::new(&alias, "alias", kind));
            }
        }
        self.aliases.insert(alias, target);
        Ok(())
    }

    /// Drop aliases whose target is another alias. Returns the dropped keys.
    pub(crate) fn drop_chained_aliases(&mut self) -> Vec<String> {
        let chained: Vec<String> = self
            .aliases
            .iter()
            .filter(|(_, target)| self.aliases.contains_key(*target))
            .map(|(alias, _)| alias.clone())
            .collect();
        for alias in &chained {
            self.aliases.remove(alias);
        }
        chained
    }

    /// The creation defaults for new factoids.
    pub fn defaults(&self) -> &TriggerConfig {
        &self.defaults
    }
}

/// A name clash found while bulk loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    /// The contested name.
    pub name: String,
    /// What was being loaded (and dropped).
    pub dropped: &'static str,
    /// What already held the name.
    pub existing: &'static str,
}

impl Collision {
    fn new(name: &str, dropped: &'static str, existing: &'static str) -> Self {
        Self {
            name: name.to_string(),
            dropped,
            existing,
        }
    }
}

impl std::fmt::Display for Collision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:?} dropped: name already used by a {}",
            self.dropped, self.name, self.existing
        )
    }
}

fn valid_key(key: &str) -> Result<String, StoreError> {
    let key = normalize_key(key);
    let invalid = key.is_empty()
        || key == "."
        || key.starts_with('/')
        || key.ends_with('/')
        || key.chars().any(char::is_whitespace);
    if invalid {
        return Err(StoreError::InvalidKey(key));
    }
    Ok(key)
}

fn single_line(line: &str) -> Result<String, StoreError> {
    let mut lines = crate::display::split_lines(line);
    match (lines.next(), lines.next()) {
        (Some(only), None) => Ok(only.to_string()),
        (None, _) => Err(StoreError::EmptyBody),
        (Some(_), Some(_)) => Err(StoreError::MultiLine),
    }
}

/// Shared handle to the current [`FactoidDb`].
#[derive(Debug)]
pub struct FactoidStore {
    db: RwLock<Arc<FactoidDb>>,
}

impl FactoidStore {
    /// Create an empty store.
    pub fn new(defaults: TriggerConfig) -> Self {
        Self::from_db(FactoidDb::new(defaults))
    }

    /// Create a store holding `db`.
    pub fn from_db(db: FactoidDb) -> Self {
        Self {
            db: RwLock::new(Arc::new(db)),
        }
    }

    /// A consistent view of the current database.
    pub fn snapshot(&self) -> Arc<FactoidDb> {
        Arc::clone(&self.db.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Apply an edit atomically. On error the database is left unchanged.
    pub fn edit<R>(
        &self,
        f: impl FnOnce(&mut FactoidDb) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut guard = self.db.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = FactoidDb::clone(&guard);
        let result = f(&mut next);
        match &result {
            Ok(_) => *guard = Arc::new(next),
            Err(e) => warn!(error = %e, "Factoid edit rejected"),
        }
        result
    }

    /// Replace the whole database (bulk load).
    pub fn replace_all(&self, db: FactoidDb) {
        let mut guard = self.db.write().unwrap_or_else(PoisonError::into_inner);
        info!(factoids = db.len(), "Factoid database replaced");
        *guard = Arc::new(db);
    }
}

impl Default for FactoidStore {
    fn default() -> Self {
        Self::new(TriggerConfig::default())
    }
}
