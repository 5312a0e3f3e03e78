//! Guild Core - replicated guild and stronghold state
//!
//! Keeps a process-local replica of guilds and strongholds consistent with a
//! remote system of record reached only through fire-and-forget requests:
//! - Guild replica store (membership, ranks, relationships, skills, presence)
//! - Membership and relationship operations (validate, forward, apply reply)
//! - Pending-event ledger for work deferred until remote data arrives
//! - Experience write-coalescing pool with periodic flush
//! - Stronghold ledger with ownership fan-out and drift persistence
//! - Bevy plugin driving the periodic jobs

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod exp_pool;
pub mod guild;
pub mod logging;
pub mod pending;
pub mod plugin;
pub mod ports;
pub mod protocol;
pub mod skill_tree;
pub mod stronghold;
pub mod testutil;
pub mod types;

pub use config::{GuildConfig, StaticData};
pub use engine::{GuildAction, GuildEngine};
pub use error::{ConfigError, GuildError};
pub use plugin::{GuildEngineResource, GuildSyncPlugin};
pub use ports::WorldHost;
