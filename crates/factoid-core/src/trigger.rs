//! Trigger rule grammar and evaluation.
//!
//! A rule is written as
//!
//! ```text
//! [TAG:][predicate:]*<regex>
//! ```
//!
//! `TAG` is an [`EventKind`] tag. Without a tag the whole string is a regex
//! evaluated against `MSG` events only. With a tag, up to
//! [`MAX_PREDICATES`] fields follow, classified by shape:
//!
//! - contains `!`: hostmask glob matched against the sender's `nick!user@host`
//! - contains `#`: channel mask matched against the event's channel
//! - `*` or empty: no-op
//! - anything else: permission name checked with the [`PermissionAuthority`]
//!
//! The last field, plus any surplus fields rejoined with `:`, is the regex.
//! Rules are parsed and compiled once when they are added; a rule that
//! fails to parse is kept but never matches.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::event::{ChatEvent, EventKind};
use crate::mask::{match_channel_mask, matches_hostmask};
use crate::transport::{ChatTransport, PermissionAuthority};

/// Maximum predicate fields between the tag and the regex.
pub const MAX_PREDICATES: usize = 3;

/// Name of the capture group that overrides `$nickname`.
pub const TARGET_CAPTURE: &str = "target";

/// One predicate field of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Sender hostmask glob.
    UserMask(String),
    /// Channel mask, same syntax as context channel lists.
    ChannelMask(String),
    /// Named permission the sender must hold.
    Permission(String),
    /// Always passes.
    Any,
}

impl Predicate {
    /// Classify a raw field by its shape.
    pub fn classify(field: &str) -> Self {
        if field.contains('!') {
            Predicate::UserMask(field.to_string())
        } else if field.contains('#') {
            Predicate::ChannelMask(field.to_string())
        } else if field.is_empty() || field == "*" {
            Predicate::Any
        } else {
            Predicate::Permission(field.to_string())
        }
    }
}

/// Errors from parsing a rule.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
}

/// A parsed, compiled rule.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// Event kind the rule applies to; `None` means untagged (`MSG` only).
    pub tag: Option<EventKind>,
    /// Predicates in evaluation order.
    pub predicates: Vec<Predicate>,
    /// Case-insensitive pattern matched against the event text.
    pub pattern: Regex,
}

impl CompiledRule {
    /// Parse and compile a raw rule string.
    pub fn parse(raw: &str) -> Result<Self, RuleError> {
        let fields: Vec<&str> = raw.split(':').collect();
        let tag = match fields.as_slice() {
            [first, _, ..] => first.parse::<EventKind>().ok(),
            _ => None,
        };

        let (predicates, pattern) = match tag {
            None => (Vec::new(), raw.to_string()),
            Some(_) => {
                let pattern_start = (MAX_PREDICATES + 1).min(fields.len() - 1);
                let predicates = fields[1..pattern_start]
                    .iter()
                    .map(|f| Predicate::classify(f))
                    .collect();
                (predicates, fields[pattern_start..].join(":"))
            }
        };

        let pattern = RegexBuilder::new(&pattern).case_insensitive(true).build()?;
        Ok(Self {
            tag,
            predicates,
            pattern,
        })
    }

    /// The event kind this rule listens to.
    pub fn kind(&self) -> EventKind {
        self.tag.unwrap_or(EventKind::Msg)
    }
}

/// Everything a rule is evaluated against.
pub struct RuleContext<'a> {
    pub event: &'a ChatEvent,
    pub transport: &'a dyn ChatTransport,
    pub permissions: &'a dyn PermissionAuthority,
}

/// The outcome of a matching rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleMatch {
    /// Value of the `target` capture, if the regex set one.
    pub target: Option<String>,
}

impl CompiledRule {
    /// Evaluate the rule. Predicates short-circuit left to right.
    pub async fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<RuleMatch> {
        let event = ctx.event;
        if self.kind() != event.kind {
            return None;
        }

        for predicate in &self.predicates {
            let passed = match predicate {
                Predicate::Any => true,
                Predicate::UserMask(mask) => matches_hostmask(mask, &event.sender.hostmask()),
                Predicate::ChannelMask(mask) => {
                    match_channel_mask(mask, ctx.transport, event.channel.as_deref()).is_match()
                }
                Predicate::Permission(name) => {
                    ctx.permissions
                        .check_permission(ctx.transport.network_name(), &event.sender, name)
                        .await
                }
            };
            if !passed {
                return None;
            }
        }

        let Some(text) = event.text.as_deref() else {
            return Some(RuleMatch::default());
        };
        let captures = self.pattern.captures(text)?;
        let target = captures
            .name(TARGET_CAPTURE)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Some(RuleMatch { target })
    }
}

/// A trigger rule as written by an administrator, with its compiled form.
#[derive(Debug, Clone)]
pub struct TriggerRule {
    raw: String,
    compiled: Option<CompiledRule>,
}

impl TriggerRule {
    /// Parse a rule. Malformed rules are kept and never match.
    pub fn new(raw: &str) -> Self {
        let compiled = match CompiledRule::parse(raw) {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(rule = %raw, error = %e, "Malformed trigger rule, it will never match");
                None
            }
        };
        Self {
            raw: raw.to_string(),
            compiled,
        }
    }

    /// The rule as written.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The compiled rule, or `None` if malformed.
    pub fn compiled(&self) -> Option<&CompiledRule> {
        self.compiled.as_ref()
    }

    /// Whether the rule failed to parse.
    pub fn is_malformed(&self) -> bool {
        self.compiled.is_none()
    }

    /// Evaluate; malformed rules fail closed.
    pub async fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<RuleMatch> {
        match &self.compiled {
            Some(rule) => rule.evaluate(ctx).await,
            None => None,
        }
    }
}

/// Evaluate rules in order and return the first match.
pub async fn first_match(rules: &[TriggerRule], ctx: &RuleContext<'_>) -> Option<RuleMatch> {
    for rule in rules {
        if let Some(m) = rule.evaluate(ctx).await {
            return Some(m);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxFuture;
    use crate::event::Sender;
    use crate::mask::tests::FREENODE;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Grants exactly one permission and counts how often it was asked.
    struct OnePermission {
        name: &'static str,
        calls: AtomicUsize,
    }

    impl OnePermission {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl PermissionAuthority for OnePermission {
        fn check_permission<'a>(
            &'a self,
            _network: &'a str,
            _user: &'a Sender,
            permission: &'a str,
        ) -> BoxFuture<'a, bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { permission == self.name })
        }
    }

    fn alice() -> Sender {
        Sender::parse("Alice!alice@example.org")
    }

    async fn eval(raw: &str, event: &ChatEvent, perms: &OnePermission) -> Option<RuleMatch> {
        let ctx = RuleContext {
            event,
            transport: &FREENODE,
            permissions: perms,
        };
        TriggerRule::new(raw).evaluate(&ctx).await
    }

    #[test]
    fn test_parse_untagged() {
        let rule = CompiledRule::parse("^hello: world$").unwrap();
        assert_eq!(rule.tag, None);
        assert!(rule.predicates.is_empty());
        assert_eq!(rule.kind(), EventKind::Msg);
        assert_eq!(rule.pattern.as_str(), "^hello: world$");
    }

    #[test]
    fn test_parse_tag_alone_is_untagged_regex() {
        let rule = CompiledRule::parse("join").unwrap();
        assert_eq!(rule.tag, None);
        assert_eq!(rule.pattern.as_str(), "join");
    }

    #[test]
    fn test_parse_predicates() {
        let rule = CompiledRule::parse("msg:nobody!*@*:#general:voice:^hi$").unwrap();
        assert_eq!(rule.tag, Some(EventKind::Msg));
        assert_eq!(
            rule.predicates,
            vec![
                Predicate::UserMask("nobody!*@*".to_string()),
                Predicate::ChannelMask("#general".to_string()),
                Predicate::Permission("voice".to_string()),
            ]
        );
        assert_eq!(rule.pattern.as_str(), "^hi$");
    }

    #[test]
    fn test_parse_surplus_fields_rejoin_into_regex() {
        let rule = CompiledRule::parse("MSG:*:*:*:a:b:c").unwrap();
        assert_eq!(rule.predicates, vec![Predicate::Any; 3]);
        assert_eq!(rule.pattern.as_str(), "a:b:c");
    }

    #[test]
    fn test_parse_tag_with_empty_regex() {
        let rule = CompiledRule::parse("JOIN:").unwrap();
        assert_eq!(rule.tag, Some(EventKind::Join));
        assert!(rule.predicates.is_empty());
        assert_eq!(rule.pattern.as_str(), "");
    }

    #[test]
    fn test_malformed_rule_is_kept() {
        let rule = TriggerRule::new("MSG:(unclosed");
        assert!(rule.is_malformed());
        assert_eq!(rule.raw(), "MSG:(unclosed");
    }

    #[tokio::test]
    async fn test_untagged_rule_only_sees_messages() {
        let perms = OnePermission::new("none");
        let msg = ChatEvent::message(alice(), "#general", "Hello there");
        assert!(eval("^hello", &msg, &perms).await.is_some());

        let action = ChatEvent::new(EventKind::Action, alice())
            .in_channel("#general")
            .with_text("hello");
        assert!(eval("^hello", &action, &perms).await.is_none());
        assert!(eval("ACTION:^hello", &action, &perms).await.is_some());
    }

    #[tokio::test]
    async fn test_textless_event_matches_after_predicates() {
        let perms = OnePermission::new("none");
        let join = ChatEvent::join(alice(), "#general");
        assert!(eval("JOIN:#general:", &join, &perms).await.is_some());
        assert!(eval("JOIN:#general:anything", &join, &perms).await.is_some());
        assert!(eval("JOIN:#other:", &join, &perms).await.is_none());
    }

    #[tokio::test]
    async fn test_hostmask_predicate_short_circuits() {
        let perms = OnePermission::new("voice");
        let msg = ChatEvent::message(alice(), "#general", "regex");
        let rule = "MSG:nobody!*@*:voice:regex";
        assert!(eval(rule, &msg, &perms).await.is_none());
        assert_eq!(perms.calls.load(Ordering::SeqCst), 0);

        let rule = "MSG:alice!*@*:voice:regex";
        assert!(eval(rule, &msg, &perms).await.is_some());
        assert_eq!(perms.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permission_predicate() {
        let perms = OnePermission::new("voice");
        let msg = ChatEvent::message(alice(), "#general", "hi");
        assert!(eval("MSG:voice:hi", &msg, &perms).await.is_some());
        assert!(eval("MSG:op:hi", &msg, &perms).await.is_none());
    }

    #[tokio::test]
    async fn test_channel_predicate_with_network() {
        let perms = OnePermission::new("none");
        let msg = ChatEvent::message(alice(), "#General", "hi");
        assert!(eval("MSG:Freenode/#general:hi", &msg, &perms).await.is_some());
        assert!(eval("MSG:OFTC/#general:hi", &msg, &perms).await.is_none());

        let quit = ChatEvent::new(EventKind::Quit, alice()).with_text("bye");
        assert!(eval("QUIT:#general:bye", &quit, &perms).await.is_none());
        assert!(eval("QUIT:*:bye", &quit, &perms).await.is_some());
    }

    #[tokio::test]
    async fn test_regex_case_insensitive_and_target_capture() {
        let perms = OnePermission::new("none");
        let msg = ChatEvent::message(alice(), "#general", "!Tell Bob about rust");
        let m = eval(r"^!tell (?P<target>\S+) about", &msg, &perms)
            .await
            .unwrap();
        assert_eq!(m.target.as_deref(), Some("Bob"));

        let m = eval("about", &msg, &perms).await.unwrap();
        assert_eq!(m.target, None);
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let perms = OnePermission::new("none");
        let msg = ChatEvent::message(alice(), "#general", "tell carol");
        let rules = vec![
            TriggerRule::new("MSG:(unclosed"),
            TriggerRule::new(r"tell (?P<target>\w+)"),
            TriggerRule::new("tell"),
        ];
        let ctx = RuleContext {
            event: &msg,
            transport: &FREENODE,
            permissions: &perms,
        };
        let m = first_match(&rules, &ctx).await.unwrap();
        assert_eq!(m.target.as_deref(), Some("carol"));
    }
}
