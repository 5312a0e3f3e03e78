use anyhow::Context;
use bevy::app::ScheduleRunnerPlugin;
use bevy::prelude::*;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info};

use guild_core::config::{GuildConfig, StaticData, GUILD_CONFIG_FILE};
use guild_core::logging::init_tracing;
use guild_core::GuildEngine;
use guild_server::{
    api::{self, ApiState},
    bridge::{self, ServerHost},
    install_guild_systems,
    mailbox::{self, Mailbox},
    metrics::ServerMetrics,
    LoopbackAuthority, SessionRegistry,
};

fn main() -> anyhow::Result<()> {
    // ========================================================================
    // 1. Configuration and logging
    // ========================================================================
    let config_dir = PathBuf::from(std::env::var("GUILD_CONFIG_DIR").unwrap_or_else(|_| "config".to_string()));
    let config_path = config_dir.join(GUILD_CONFIG_FILE);
    let config = if config_path.exists() {
        GuildConfig::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        GuildConfig::default()
    };
    init_tracing(&config.logging);

    let data = StaticData::load(&config_dir)
        .with_context(|| format!("loading static data from {}", config_dir.display()))?;
    info!(
        castles = data.castles.len(),
        skills = data.skill_tree.len(),
        "Static guild data loaded"
    );

    let tick_rate: f64 = std::env::var("TICK_RATE_HZ")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|hz: &f64| *hz > 0.0)
        .unwrap_or(20.0);
    let port: u16 = std::env::var("API_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8090);

    // ========================================================================
    // 2. Engine + bridge
    // ========================================================================
    let metrics = ServerMetrics::new();
    let mailbox = Mailbox::new();
    let channels = bridge::create_bridge();

    let siege_zones = data.castles.iter().map(|c| c.zone.clone());
    let host = ServerHost::new(
        SessionRegistry::with_siege_zones(siege_zones),
        channels.requests.clone(),
        channels.outbound.clone(),
        metrics.clone(),
    );
    let base_capacity = config.base_member_capacity;
    let engine = Arc::new(RwLock::new(GuildEngine::new(host, config, data)));

    // ========================================================================
    // 3. Async side: loopback authority, outbound pump, HTTP API
    // ========================================================================
    let api_state = ApiState {
        commands: channels.commands.clone(),
        directory: channels.directory.clone(),
        mailbox: mailbox.clone(),
        metrics: metrics.clone(),
    };
    let request_receiver = channels.request_receiver;
    let replies = channels.replies;
    let outbound_receiver = channels.outbound_receiver;
    let authority_metrics = metrics.clone();
    let runtime = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
    std::thread::spawn(move || {
        runtime.block_on(async {
            let authority = LoopbackAuthority::new(base_capacity);
            tokio::spawn(authority.run(request_receiver, replies, authority_metrics));
            tokio::spawn(mailbox::pump_outbound(outbound_receiver, mailbox));

            if let Err(e) = api::start_api_server(api_state, port).await {
                error!("API server error: {}", e);
            }
        });
    });

    // ========================================================================
    // 4. Headless Bevy loop
    // ========================================================================
    info!(tick_rate, port, "Guild server starting");
    let mut app = App::new();
    app.add_plugins(
        MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(1.0 / tick_rate))),
    );
    install_guild_systems(
        &mut app,
        engine,
        channels.command_receiver,
        channels.reply_receiver,
        channels.directory,
    );
    app.run();
    Ok(())
}
