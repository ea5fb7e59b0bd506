//! Trigger engine.
//!
//! For every inbound event the engine takes one snapshot of the store and
//! walks every factoid that has trigger rules:
//!
//! 1. skip it if the user is already over its rate limit,
//! 2. skip it if the event's channel is outside the factoid's context,
//! 3. evaluate its rules in order (first match wins),
//! 4. on a match, record the fire and render the output.
//!
//! Step 3 may wait on the permission authority, so each factoid is
//! evaluated in its own task and fires as soon as its own evaluation is
//! done. The rate limit is checked again and recorded in one critical
//! section at fire time, so a burst of identical events cannot slip past it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::dispatch::{Dispatcher, OutboundLine};
use crate::display::{Label, Placeholders, Renderer};
use crate::event::{ChatEvent, user_identity};
use crate::factoid::Factoid;
use crate::mask::{MaskMatch, match_channel_list};
use crate::rate_limit::RateLimiter;
use crate::store::{FactoidDb, FactoidStore};
use crate::transport::{ChatTransport, PermissionAuthority};
use crate::trigger::{RuleContext, RuleMatch, first_match};

/// One factoid fired by an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired {
    /// Full key of the fired factoid.
    pub key: String,
    /// The lines handed to the dispatcher.
    pub lines: Vec<OutboundLine>,
}

/// Matches chat events against factoid trigger rules.
pub struct TriggerEngine {
    store: Arc<FactoidStore>,
    permissions: Arc<dyn PermissionAuthority>,
    limiter: Mutex<RateLimiter>,
    renderer: Renderer,
    dispatcher: Dispatcher,
}

impl TriggerEngine {
    pub fn new(
        store: Arc<FactoidStore>,
        permissions: Arc<dyn PermissionAuthority>,
        renderer: Renderer,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            store,
            permissions,
            limiter: Mutex::new(RateLimiter::new()),
            renderer,
            dispatcher,
        }
    }

    fn limiter(&self) -> MutexGuard<'_, RateLimiter> {
        self.limiter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Process one event now.
    pub async fn handle_event(
        &self,
        transport: &Arc<dyn ChatTransport>,
        event: &ChatEvent,
    ) -> Vec<Fired> {
        self.handle_event_at(transport, event, Instant::now()).await
    }

    /// Process one event as if it arrived at `now`.
    ///
    /// Returns the factoids that fired, ordered by key. Their lines were
    /// queued on the dispatcher as each one fired.
    pub async fn handle_event_at(
        &self,
        transport: &Arc<dyn ChatTransport>,
        event: &ChatEvent,
        now: Instant,
    ) -> Vec<Fired> {
        let db = self.store.snapshot();
        let user = user_identity(transport.network_name(), &event.sender.nick);
        let event = Arc::new(event.clone());
        let mut tasks = JoinSet::new();

        for factoid in db.triggered_factoids() {
            let listens = factoid
                .triggers
                .iter()
                .filter_map(|rule| rule.compiled())
                .any(|rule| rule.kind() == event.kind);
            if !listens {
                continue;
            }
            if self
                .limiter()
                .is_limited(factoid.key(), &user, factoid.rate_limit, now)
            {
                trace!(key = %factoid.key(), user = %user, "Skipping rate-limited factoid");
                continue;
            }
            let scope = match_channel_list(
                &db.channels_for(factoid.key()),
                transport.as_ref(),
                event.channel.as_deref(),
            );
            if !scope.is_match() {
                continue;
            }

            let transport = Arc::clone(transport);
            let permissions = Arc::clone(&self.permissions);
            let event = Arc::clone(&event);
            tasks.spawn(async move {
                let ctx = RuleContext {
                    event: &event,
                    transport: transport.as_ref(),
                    permissions: permissions.as_ref(),
                };
                let matched = first_match(&factoid.triggers, &ctx).await;
                matched.map(|m| (factoid, scope, m))
            });
        }

        let mut fired = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (factoid, scope, matched) = match joined {
                Ok(Some(hit)) => hit,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "Trigger evaluation task failed");
                    continue;
                }
            };
            if !self
                .limiter()
                .try_acquire(factoid.key(), &user, factoid.rate_limit, now)
            {
                debug!(key = %factoid.key(), user = %user, "Trigger suppressed by rate limit");
                continue;
            }
            let lines = self.render_fire(&db, transport.as_ref(), &event, &factoid, scope, &matched);
            info!(
                key = %factoid.key(),
                user = %user,
                kind = %event.kind,
                lines = lines.len(),
                "Trigger fired"
            );
            self.dispatcher.enqueue(transport, lines.clone());
            fired.push(Fired {
                key: factoid.key().to_string(),
                lines,
            });
        }
        fired.sort_by(|a, b| a.key.cmp(&b.key));
        fired
    }

    fn render_fire(
        &self,
        db: &FactoidDb,
        transport: &dyn ChatTransport,
        event: &ChatEvent,
        factoid: &Factoid,
        scope: MaskMatch,
        matched: &RuleMatch,
    ) -> Vec<OutboundLine> {
        let private = event.kind.is_arrival() && factoid.notice_on_join;
        let destination = match (&event.channel, private) {
            (Some(channel), false) => channel.as_str(),
            _ => event.sender.nick.as_str(),
        };
        let recipient = matched
            .target
            .as_deref()
            .unwrap_or_else(|| event.default_recipient());
        let me = transport.bot_nickname();
        let values = Placeholders {
            nickname: recipient,
            channel: event.channel.as_deref().unwrap_or(""),
            me: &me,
            sender: &event.sender.nick,
        };

        let (context, local) = db.split_context_and_key(factoid.key());
        let label = Label {
            notice: private,
            destination,
            context: if scope == MaskMatch::Specific {
                None
            } else {
                context
            },
            key: local,
        };
        let show_label = !factoid.hide_label && !private;

        self.renderer
            .render(&factoid.text(), &values, show_label.then_some(&label))
            .into_iter()
            .map(|text| OutboundLine::new(destination, private, &text))
            .collect()
    }

    /// Drop all rate-limit history of a factoid.
    pub fn forget_factoid(&self, key: &str) {
        self.limiter().forget_factoid(key);
    }

    /// Remove stale rate-limit history. Returns the number of queues left.
    pub fn sweep(&self, now: Instant) -> usize {
        let db = self.store.snapshot();
        let mut limiter = self.limiter();
        limiter.sweep(now, |key| db.factoid(key).map(|f| f.rate_limit));
        limiter.len()
    }

    /// The dispatcher output is queued on.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
