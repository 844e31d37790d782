//! Sync core: registry, persistence, commands and scheduling.
//!
//! Glues the provider connectors to an embedder: [`ServiceRegistry`]
//! owns the connected accounts and the fetch rounds, [`KeyValueStore`]
//! is where config and merged events land, [`CommandHandler`] maps UI
//! commands onto the registry, and [`SyncScheduler`] drives periodic
//! rounds.

pub mod commands;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use commands::{BackendStatus, Command, CommandHandler};
pub use error::{SyncError, SyncResult};
pub use registry::ServiceRegistry;
pub use scheduler::{SchedulerConfig, SchedulerHandle, SyncScheduler};
pub use store::{
    CONFIG_KEY, EVENTS_KEY, FileStore, KeyValueStore, MemoryStore, STATUS_KEY, StoreError,
    StoreResult,
};
