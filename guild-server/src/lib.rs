//! Guild Server Library
//!
//! Hosts the guild engine inside a headless Bevy app:
//! - Session registry backing the engine's session layer
//! - Channel bridge between the Bevy schedule and tokio
//! - Loopback authority (in-process system of record)
//! - Notification mailbox for the development API
//! - Server metrics (Prometheus + JSON export)
//! - HTTP/JSON API

pub mod api;
pub mod authority;
pub mod bridge;
pub mod mailbox;
pub mod metrics;
pub mod sessions;

use std::sync::{Arc, RwLock};

use bevy::prelude::*;
use guild_core::{GuildEngine, GuildSyncPlugin};

use crate::bridge::{GuildDirectoryResource, ServerHost, ServerUptime};

pub use authority::LoopbackAuthority;
pub use bridge::{create_bridge, GuildCommand, OutboundEvent};
pub use sessions::{SessionLogin, SessionRegistry};

pub type SharedEngine = Arc<RwLock<GuildEngine<ServerHost>>>;

/// Wire the engine and the bridge resources into a Bevy app.
///
/// Replies are applied before commands, and the directory is rebuilt last so
/// API readers see the state after this tick's work.
pub fn install_guild_systems(
    app: &mut App,
    engine: SharedEngine,
    command_receiver: bridge::GuildCommandReceiver,
    reply_receiver: bridge::AuthorityReplyReceiver,
    directory: bridge::SharedGuildDirectory,
) {
    app.add_plugins(GuildSyncPlugin::new(engine))
        .insert_resource(command_receiver)
        .insert_resource(reply_receiver)
        .insert_resource(GuildDirectoryResource { directory })
        .insert_resource(ServerUptime::default())
        .add_systems(
            Update,
            (
                bridge::update_uptime,
                bridge::apply_authority_replies,
                bridge::process_guild_commands,
                bridge::update_guild_directory,
            )
                .chain(),
        );
}
