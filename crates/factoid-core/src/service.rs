//! The factoid service: one handle the host bot holds.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use factoid_config::AppConfig;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, OutboundLine};
use crate::display::{Label, Placeholders, Renderer};
use crate::engine::{Fired, TriggerEngine};
use crate::event::{ChatEvent, Sender, user_identity};
use crate::factoid::Factoid;
use crate::persist::{LoadReport, PersistError, load_snapshot, save_snapshot};
use crate::resolver::{Location, ResolveError, Resolver};
use crate::store::{FactoidDb, FactoidStore, StoreError};
use crate::transport::{ChatTransport, PermissionAuthority};

/// Wires the store, resolver, trigger engine and dispatcher together.
pub struct FactoidService {
    config: AppConfig,
    store: Arc<FactoidStore>,
    resolver: Resolver,
    engine: TriggerEngine,
    renderer: Renderer,
    dispatcher: Dispatcher,
}

impl FactoidService {
    /// Create a service with an empty store.
    pub fn new(config: AppConfig, permissions: Arc<dyn PermissionAuthority>) -> Self {
        let store = FactoidStore::new(config.triggers.clone());
        Self::with_store(config, store, permissions)
    }

    /// Create a service around an existing store.
    pub fn with_store(
        config: AppConfig,
        store: FactoidStore,
        permissions: Arc<dyn PermissionAuthority>,
    ) -> Self {
        let store = Arc::new(store);
        let renderer = Renderer::new(&config.display);
        let dispatcher = Dispatcher::new(config.line_delay());
        let resolver = Resolver::new(Arc::clone(&store), config.session.max_dot_targets);
        let engine = TriggerEngine::new(
            Arc::clone(&store),
            permissions,
            renderer.clone(),
            dispatcher.clone(),
        );
        Self {
            config,
            store,
            resolver,
            engine,
            renderer,
            dispatcher,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<FactoidStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn engine(&self) -> &TriggerEngine {
        &self.engine
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Feed an inbound chat event to the trigger engine.
    pub async fn on_event(
        &self,
        transport: &Arc<dyn ChatTransport>,
        event: &ChatEvent,
    ) -> Vec<Fired> {
        self.engine.handle_event(transport, event).await
    }

    /// Display a factoid on request.
    ///
    /// The output goes to `channel`, or privately to the requester when
    /// there is none. `recipient` overrides `$nickname`, which otherwise is
    /// the requester.
    pub fn show(
        &self,
        transport: &Arc<dyn ChatTransport>,
        key: &str,
        requester: &Sender,
        channel: Option<&str>,
        recipient: Option<&str>,
    ) -> Result<Fired, ResolveError> {
        let user = user_identity(transport.network_name(), &requester.nick);
        let location = Location {
            transport: transport.as_ref(),
            channel,
        };
        let resolved = match self.resolver.resolve(key, &user, &location) {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!(key = %key, user = %user, error = %e, "Lookup failed");
                return Err(e);
            }
        };

        let destination = channel.unwrap_or(&requester.nick);
        let me = transport.bot_nickname();
        let values = Placeholders {
            nickname: recipient.unwrap_or(&requester.nick),
            channel: channel.unwrap_or(""),
            me: &me,
            sender: &requester.nick,
        };

        let label = Label {
            notice: false,
            destination,
            context: if resolved.implicit_context {
                None
            } else {
                resolved.context.as_deref()
            },
            key: &resolved.local_key,
        };
        let label = (!resolved.factoid.hide_label).then_some(&label);

        let lines: Vec<OutboundLine> = self
            .renderer
            .render(&resolved.factoid.text(), &values, label)
            .into_iter()
            .map(|text| OutboundLine::new(destination, false, &text))
            .collect();
        self.dispatcher.enqueue(transport, lines.clone());
        info!(key = %resolved.key, user = %user, lines = lines.len(), "Factoid shown");

        Ok(Fired {
            key: resolved.key,
            lines,
        })
    }

    /// Delete a factoid and forget its rate-limit history.
    pub fn delete_factoid(&self, key: &str) -> Result<Arc<Factoid>, StoreError> {
        let removed = self.store.edit(|db| db.delete_factoid(key))?;
        self.engine.forget_factoid(removed.key());
        Ok(removed)
    }

    /// Replace the database with the snapshot at `path`.
    ///
    /// On error the current database is left untouched.
    pub async fn reload(&self, path: &Path) -> Result<LoadReport, PersistError> {
        let snapshot = match load_snapshot(path).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Reload failed, keeping current factoids");
                return Err(e);
            }
        };
        let (db, report) = FactoidDb::from_snapshot(snapshot, self.config.triggers.clone());
        self.store.replace_all(db);
        Ok(report)
    }

    /// Save the current database to `path`.
    pub async fn save(&self, path: &Path) -> Result<(), PersistError> {
        let snapshot = self.store.snapshot().to_snapshot();
        save_snapshot(path, &snapshot).await.inspect_err(|e| {
            warn!(path = %path.display(), error = %e, "Save failed");
        })
    }

    /// Start the periodic sweep of stale rate-limit history.
    ///
    /// Returns `None` when sweeping is disabled. The task stops once the
    /// service is dropped.
    pub fn spawn_maintenance(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let secs = self.config.session.hit_history_sweep_secs;
        if secs == 0 {
            return None;
        }
        let service = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                let remaining = service.engine.sweep(Instant::now());
                debug!(remaining, "Rate-limit history swept");
            }
        }))
    }
}
