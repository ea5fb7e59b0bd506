//! Factoid and context data model.

use std::time::Duration;

use factoid_config::TriggerConfig;

use crate::display::split_lines;
use crate::trigger::TriggerRule;

/// Normalise a user-supplied key: trimmed and lower-cased.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// How often a factoid may fire for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Fires allowed per window.
    pub count: u32,
    /// Window length.
    pub window: Duration,
}

impl RateLimit {
    /// Create a rate limit.
    pub fn new(count: u32, window_secs: u64) -> Self {
        Self {
            count,
            window: Duration::from_secs(window_secs),
        }
    }

    /// A zero count or zero window disables limiting.
    pub fn is_enabled(&self) -> bool {
        self.count > 0 && !self.window.is_zero()
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(1, 120)
    }
}

/// One canned response.
#[derive(Debug, Clone)]
pub struct Factoid {
    key: String,
    body: Vec<String>,
    /// Trigger rules in evaluation order; the first match wins.
    pub triggers: Vec<TriggerRule>,
    /// Excluded from listings unless the caller asks for hidden entries.
    pub hidden: bool,
    /// Suppress the `[context/key]` label on display.
    pub hide_label: bool,
    /// Deliver join/invite triggered output privately.
    pub notice_on_join: bool,
    /// Per-user firing limit.
    pub rate_limit: RateLimit,
}

impl Factoid {
    /// Create a factoid from text using the built-in defaults.
    ///
    /// Returns `None` if `text` contains no non-empty lines.
    pub fn new(key: &str, text: &str) -> Option<Self> {
        Self::with_defaults(key, text, &TriggerConfig::default())
    }

    /// Create a factoid from text using configured defaults.
    pub fn with_defaults(key: &str, text: &str, defaults: &TriggerConfig) -> Option<Self> {
        let body: Vec<String> = split_lines(text).map(str::to_string).collect();
        if body.is_empty() {
            return None;
        }
        Some(Self {
            key: normalize_key(key),
            body,
            triggers: Vec::new(),
            hidden: false,
            hide_label: false,
            notice_on_join: defaults.default_notice_on_join,
            rate_limit: RateLimit::new(
                defaults.default_rate_limit_count,
                defaults.default_rate_limit_window_secs,
            ),
        })
    }

    /// The canonical (lower-cased) key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Body lines. Never empty.
    pub fn lines(&self) -> &[String] {
        &self.body
    }

    /// The body joined with `\n`.
    pub fn text(&self) -> String {
        self.body.join("\n")
    }

    /// Whether any trigger rule is attached.
    pub fn has_triggers(&self) -> bool {
        !self.triggers.is_empty()
    }

    /// Replace the body. Rejects text with no non-empty lines.
    pub(crate) fn set_body(&mut self, text: &str) -> bool {
        let body: Vec<String> = split_lines(text).map(str::to_string).collect();
        if body.is_empty() {
            return false;
        }
        self.body = body;
        true
    }

    pub(crate) fn body_mut(&mut self) -> &mut Vec<String> {
        &mut self.body
    }
}

/// A named group of channels sharing a namespace of local keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    name: String,
    /// Channel masks (`network/channel`) belonging to this context.
    pub channels: Vec<String>,
}

impl Context {
    /// Create a context. The name is lower-cased.
    pub fn new(name: &str, channels: Vec<String>) -> Self {
        Self {
            name: normalize_key(name),
            channels,
        }
    }

    /// The canonical (lower-cased) name.
    pub fn name(&self) -> &str {
        &self.name
    }
}
