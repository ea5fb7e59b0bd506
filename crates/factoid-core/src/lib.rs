#![deny(unsafe_code)]

//! Factoid engine core.
//!
//! A keyed store of reusable text snippets ("factoids") for a chat bot.
//! Factoids are fetched on command through the [`resolver`], or fire
//! automatically when an incoming chat event matches one of their trigger
//! rules through the [`engine`]. Both paths end in the [`display`]
//! formatter, whose output is paced per destination by the [`dispatch`]
//! queue.
//!
//! The chat protocol client and the permission system are external
//! collaborators, consumed through the traits in [`transport`].

use std::future::Future;
use std::pin::Pin;

/// A boxed, `Send` future: the return type of async trait methods that must
/// work behind `dyn Trait`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Paced per-destination outbound queue.
pub mod dispatch;
/// Line splitting, placeholder substitution, and label formatting.
pub mod display;
/// Trigger engine: matches chat events against factoid trigger rules.
pub mod engine;
/// Inbound chat event types.
pub mod event;
/// Factoid and context data model.
pub mod factoid;
/// Channel masks, hostmask globs, and RFC 1459 case mapping.
pub mod mask;
/// Hostmask-based permission authority.
pub mod permissions;
/// Snapshot loading and saving.
pub mod persist;
/// Per-(factoid, user) sliding-window rate limiter.
pub mod rate_limit;
/// Key and alias resolution.
pub mod resolver;
/// Facade wiring store, resolver, engine and dispatcher together.
pub mod service;
/// Shared factoid/context/alias store.
pub mod store;
/// Trigger rule grammar and evaluation.
pub mod trigger;
/// Capability traits for the chat transport and permission authority.
pub mod transport;

pub use dispatch::{Dispatcher, OutboundLine};
pub use engine::{Fired, TriggerEngine};
pub use event::{ChatEvent, EventKind, Sender};
pub use factoid::{Context, Factoid};
pub use permissions::CapabilityTable;
pub use persist::{LoadReport, PersistError, Snapshot};
pub use resolver::{Location, ResolveError, Resolved, Resolver};
pub use service::FactoidService;
pub use store::{FactoidStore, StoreError};
pub use transport::{ChatTransport, PermissionAuthority, TransportError};
