//! Bevy integration: the engine as a shared resource, ticked every frame.

use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use bevy::prelude::*;

use crate::engine::GuildEngine;
use crate::ports::WorldHost;

/// Shared handle to the engine. Clone the `Arc` to reach it from outside the
/// app (HTTP handlers, bridges).
#[derive(Resource)]
pub struct GuildEngineResource<H: WorldHost>(pub Arc<RwLock<GuildEngine<H>>>);

pub struct GuildSyncPlugin<H: WorldHost> {
    engine: Arc<RwLock<GuildEngine<H>>>,
    _host: PhantomData<fn() -> H>,
}

impl<H: WorldHost> GuildSyncPlugin<H> {
    pub fn new(engine: Arc<RwLock<GuildEngine<H>>>) -> Self {
        Self {
            engine,
            _host: PhantomData,
        }
    }
}

impl<H: WorldHost> Plugin for GuildSyncPlugin<H> {
    fn build(&self, app: &mut App) {
        app.insert_resource(GuildEngineResource(self.engine.clone()))
            .add_systems(Startup, stronghold_load_system::<H>)
            .add_systems(Update, guild_tick_system::<H>);
    }
}

/// Kick off the bulk stronghold load once at startup
fn stronghold_load_system<H: WorldHost>(engine_res: Res<GuildEngineResource<H>>) {
    if let Ok(mut engine) = engine_res.0.write() {
        engine.request_stronghold_data();
    }
}

fn guild_tick_system<H: WorldHost>(time: Res<Time>, engine_res: Res<GuildEngineResource<H>>) {
    if let Ok(mut engine) = engine_res.0.write() {
        engine.tick(time.elapsed().as_millis() as u64);
    }
}
