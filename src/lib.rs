//! Offline cache and deferred-sync engine for task reminders.
//!
//! tideover sits between an application and the network: it keeps a
//! versioned shell generation installed for offline continuity, routes
//! data requests network-first with a cache fallback, and runs deferred
//! work (sync reconciliation, due-task reminders, push notifications)
//! when the platform signals it. Each platform event is handled as one
//! awaitable task; see [`engine::Engine::dispatch`].

pub mod channel;
pub mod config;
pub mod deferred;
pub mod engine;
pub mod fetch;
pub mod identity;
pub mod lifecycle;
pub mod notify;
pub mod router;
pub mod store;
pub mod tasks;

pub use config::Config;
pub use engine::{Engine, EventOutcome, PlatformEvent};
pub use store::{CacheStore, MemoryStore, ResponseSnapshot, SqliteStore};
