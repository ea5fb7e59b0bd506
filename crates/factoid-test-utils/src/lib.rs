#![deny(unsafe_code)]

//! Shared test utilities for the factoid workspace.
//!
//! Provides a recording chat transport, a scripted permission authority,
//! config builders, and tracing helpers so that individual crate tests stay
//! concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! factoid-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod permissions;
pub mod service;
pub mod tracing_setup;
pub mod transport;

pub use permissions::ScriptedPermissions;
pub use transport::{MockTransport, SentLine};
