//! Guild Bridge - Connects the guild engine inside Bevy to the async world
//!
//! The engine runs on the Bevy schedule, while the authority link and the
//! HTTP API run on tokio. Everything crosses over unbounded mpsc channels:
//!
//! ```text
//! API handler / session layer             Authority (loopback or remote)
//!       │                                        │
//!       ▼                                        ▼
//! GuildCommand ──► process_guild_commands   AuthorityReply ──► apply_authority_replies
//!       ▲                  │                                        │
//!       │                  ▼                                        ▼
//! oneshot reply      GuildEngine<ServerHost> ◄──────────────────────┘
//!                          │
//!                          ├──► AuthorityRequest  (to the authority)
//!                          └──► OutboundEvent     (client pushes, scripts, defenders)
//! ```
//!
//! Read-only queries go through a `GuildDirectory` snapshot rebuilt every
//! tick, so HTTP handlers never contend for the engine lock.

use bevy::prelude::*;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use guild_core::engine::EngineStats;
use guild_core::guild::RelationKind;
use guild_core::ports::{
    ClientNotifier, DefenderRegistry, Notification, RemoteAuthority, ScriptEngine, SessionInfo,
    SessionLayer,
};
use guild_core::protocol::{AuthorityReply, AuthorityRequest};
use guild_core::types::{AccountId, CastleId, CharId, GuildId, SessionId};
use guild_core::{GuildAction, GuildEngineResource, GuildError};

use crate::metrics::ServerMetrics;
use crate::sessions::{SessionLogin, SessionRegistry};

/// Commands handled per tick before yielding to the rest of the schedule
const MAX_COMMANDS_PER_TICK: usize = 64;

/// Authority replies applied per tick
const MAX_REPLIES_PER_TICK: usize = 256;

// ============================================================================
// Outbound events (engine → outside world)
// ============================================================================

/// Everything the engine pushes out besides authority requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundEvent {
    Notify {
        session: SessionId,
        notification: Notification,
    },
    ScriptEvent(String),
    StrongholdBroadcast(String),
    DefenderRefresh {
        zone: String,
        owner: GuildId,
    },
}

// ============================================================================
// Server host
// ============================================================================

/// World host backed by the session registry and the bridge channels
pub struct ServerHost {
    pub sessions: SessionRegistry,
    requests: mpsc::UnboundedSender<AuthorityRequest>,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
    metrics: Arc<ServerMetrics>,
}

impl ServerHost {
    pub fn new(
        sessions: SessionRegistry,
        requests: mpsc::UnboundedSender<AuthorityRequest>,
        outbound: mpsc::UnboundedSender<OutboundEvent>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            sessions,
            requests,
            outbound,
            metrics,
        }
    }

    fn emit(&self, event: OutboundEvent) {
        if self.outbound.send(event).is_err() {
            debug!("Outbound channel closed, event dropped");
        }
    }
}

impl SessionLayer for ServerHost {
    fn resolve_session(&self, account_id: AccountId, char_id: CharId) -> Option<SessionInfo> {
        self.sessions.find(account_id, char_id).cloned()
    }

    fn session(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.get(id).cloned()
    }

    fn live_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.iter().cloned().collect()
    }

    fn set_session_guild(&mut self, id: SessionId, guild_id: GuildId) {
        self.sessions.set_guild(id, guild_id);
    }

    fn consume_creation_token(&mut self, id: SessionId) -> bool {
        self.sessions.take_creation_token(id)
    }

    fn close_guild_storage(&mut self, id: SessionId) {
        if self.sessions.close_guild_storage(id) {
            debug!(session = id, "Guild storage force-closed");
        }
    }

    fn lock_skills(&mut self, id: SessionId, skills: &[u16], duration_ms: u64) {
        self.sessions.lock_skills(id, skills, duration_ms, Utc::now());
    }
}

impl RemoteAuthority for ServerHost {
    fn send(&mut self, request: AuthorityRequest) {
        self.metrics.record_authority_request();
        if self.requests.send(request).is_err() {
            warn!("Authority link closed, request dropped");
        }
    }
}

impl ClientNotifier for ServerHost {
    fn notify(&mut self, session: SessionId, notification: Notification) {
        self.metrics.record_notification();
        self.emit(OutboundEvent::Notify {
            session,
            notification,
        });
    }
}

impl ScriptEngine for ServerHost {
    fn fire_named_event(&mut self, name: &str) {
        self.metrics.record_script_event();
        self.emit(OutboundEvent::ScriptEvent(name.to_string()));
    }

    fn fire_for_all_strongholds(&mut self, suffix: &str) {
        self.metrics.record_script_event();
        self.emit(OutboundEvent::StrongholdBroadcast(suffix.to_string()));
    }
}

impl DefenderRegistry for ServerHost {
    fn refresh_defender_affiliation(&mut self, zone: &str, owner: GuildId) {
        self.emit(OutboundEvent::DefenderRefresh {
            zone: zone.to_string(),
            owner,
        });
    }
}

// ============================================================================
// Guild Directory (read-only, rebuilt every tick)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildDirectory {
    pub tick: u64,
    pub uptime_secs: f64,
    pub online_sessions: usize,
    pub siege_active: bool,
    pub stats: EngineStats,
    pub exp_pool_records: usize,
    pub guilds: BTreeMap<GuildId, GuildSummary>,
    pub strongholds: Vec<StrongholdSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildSummary {
    pub id: GuildId,
    pub name: String,
    pub master: String,
    pub level: u16,
    pub member_count: usize,
    pub online_count: usize,
    pub max_members: usize,
    pub average_level: u32,
    pub skill_points: u32,
    pub notice_title: String,
    pub alliances: Vec<GuildId>,
    pub oppositions: Vec<GuildId>,
    pub strongholds: Vec<CastleId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongholdSummary {
    pub id: CastleId,
    pub name: String,
    pub zone: String,
    pub owner: GuildId,
}

/// Shared handle to the directory (Arc<RwLock<>> for API access)
pub type SharedGuildDirectory = Arc<RwLock<GuildDirectory>>;

// ============================================================================
// Guild Commands (API / session layer → Bevy)
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub code: u16,
    pub message: String,
}

impl ActionResult {
    fn from_result(result: Result<(), GuildError>) -> Self {
        match result {
            Ok(()) => Self {
                success: true,
                code: 0,
                message: "Accepted".into(),
            },
            Err(err) => Self {
                success: false,
                code: err.code(),
                message: err.to_string(),
            },
        }
    }
}

#[derive(Debug)]
pub enum GuildCommand {
    /// Bring a session online
    Connect {
        login: SessionLogin,
        reply: oneshot::Sender<Option<SessionId>>,
    },
    /// Tear a session down
    Disconnect {
        session: SessionId,
        reply: oneshot::Sender<bool>,
    },
    /// Position update from the movement layer
    Move {
        session: SessionId,
        zone: String,
        x: u16,
        y: u16,
    },
    /// Player guild action
    Action {
        session: SessionId,
        action: GuildAction,
        reply: oneshot::Sender<ActionResult>,
    },
    /// Open the guild storage window
    OpenStorage {
        session: SessionId,
        reply: oneshot::Sender<ActionResult>,
    },
    /// Cast a guild skill, refused while the skill is locked
    UseSkill {
        session: SessionId,
        skill_id: u16,
        reply: oneshot::Sender<ActionResult>,
    },
    /// Open or close the siege window
    SetSiege { active: bool },
}

pub type CommandSender = mpsc::UnboundedSender<GuildCommand>;
pub type CommandReceiver = mpsc::UnboundedReceiver<GuildCommand>;

// ============================================================================
// Bevy Resources
// ============================================================================

#[derive(Resource)]
pub struct GuildCommandReceiver {
    pub receiver: CommandReceiver,
}

#[derive(Resource)]
pub struct AuthorityReplyReceiver {
    pub receiver: mpsc::UnboundedReceiver<AuthorityReply>,
}

#[derive(Resource)]
pub struct GuildDirectoryResource {
    pub directory: SharedGuildDirectory,
}

#[derive(Resource, Default)]
pub struct ServerUptime {
    pub ticks: u64,
    pub total_time: f64,
}

// ============================================================================
// Bevy Systems
// ============================================================================

/// System: Apply queued authority replies to the engine
pub fn apply_authority_replies(
    mut replies: ResMut<AuthorityReplyReceiver>,
    engine_res: Res<GuildEngineResource<ServerHost>>,
) {
    let Ok(mut engine) = engine_res.0.write() else {
        return;
    };
    let mut applied = 0;
    while applied < MAX_REPLIES_PER_TICK {
        let Ok(reply) = replies.receiver.try_recv() else {
            break;
        };
        engine.handle_reply(reply);
        applied += 1;
    }
}

/// System: Process incoming guild commands
pub fn process_guild_commands(
    mut cmd_res: ResMut<GuildCommandReceiver>,
    engine_res: Res<GuildEngineResource<ServerHost>>,
) {
    let Ok(mut engine) = engine_res.0.write() else {
        return;
    };
    let mut processed = 0;
    while processed < MAX_COMMANDS_PER_TICK {
        let Ok(cmd) = cmd_res.receiver.try_recv() else {
            break;
        };
        processed += 1;

        match cmd {
            GuildCommand::Connect { login, reply } => {
                let session = engine.host_mut().sessions.connect(login);
                if let Some(session) = session {
                    engine.session_connected(session);
                }
                let _ = reply.send(session);
            }

            GuildCommand::Disconnect { session, reply } => {
                let known = engine.host_mut().sessions.begin_disconnect(session);
                if known {
                    engine.session_closed(session);
                    engine.host_mut().sessions.remove(session);
                }
                let _ = reply.send(known);
            }

            GuildCommand::Move { session, zone, x, y } => {
                if !engine.host_mut().sessions.move_to(session, &zone, x, y) {
                    debug!(session, "Move for unknown session dropped");
                }
            }

            GuildCommand::Action {
                session,
                action,
                reply,
            } => {
                let result = engine.dispatch(session, action);
                let _ = reply.send(ActionResult::from_result(result));
            }

            GuildCommand::OpenStorage { session, reply } => {
                let result = engine.host_mut().sessions.open_guild_storage(session);
                let _ = reply.send(ActionResult::from_result(result));
            }

            GuildCommand::UseSkill {
                session,
                skill_id,
                reply,
            } => {
                let result = engine
                    .host()
                    .sessions
                    .check_guild_skill(session, skill_id, Utc::now());
                if let Err(err) = &result {
                    debug!(session, skill_id, %err, "Guild skill refused");
                }
                let _ = reply.send(ActionResult::from_result(result));
            }

            GuildCommand::SetSiege { active } => {
                if active {
                    engine.start_siege();
                } else {
                    engine.end_siege();
                }
            }
        }
    }
}

/// System: Rebuild the guild directory
pub fn update_guild_directory(
    directory_res: Res<GuildDirectoryResource>,
    engine_res: Res<GuildEngineResource<ServerHost>>,
    uptime: Res<ServerUptime>,
) {
    let Ok(engine) = engine_res.0.read() else {
        return;
    };

    let mut directory = GuildDirectory {
        tick: uptime.ticks,
        uptime_secs: uptime.total_time,
        online_sessions: engine.host().sessions.len(),
        siege_active: engine.siege_active(),
        stats: engine.stats(),
        exp_pool_records: engine.exp_pool().len(),
        ..Default::default()
    };

    for guild in engine.guilds().iter() {
        let related = |kind: RelationKind| {
            guild
                .relations
                .iter()
                .filter(|r| r.kind == kind)
                .map(|r| r.guild_id)
                .collect::<Vec<_>>()
        };
        directory.guilds.insert(
            guild.id,
            GuildSummary {
                id: guild.id,
                name: guild.name.clone(),
                master: guild.master.clone(),
                level: guild.level,
                member_count: guild.member_count(),
                online_count: guild.online_count(),
                max_members: guild.max_members,
                average_level: guild.average_level,
                skill_points: guild.skill_points,
                notice_title: guild.notice.title.clone(),
                alliances: related(RelationKind::Alliance),
                oppositions: related(RelationKind::Opposition),
                strongholds: engine.strongholds().owned_by(guild.id),
            },
        );
    }

    directory.strongholds = engine
        .strongholds()
        .iter()
        .map(|castle| StrongholdSummary {
            id: castle.id,
            name: castle.name.clone(),
            zone: castle.zone.clone(),
            owner: castle.owner,
        })
        .collect();
    directory.strongholds.sort_by_key(|s| s.id);

    if let Ok(mut lock) = directory_res.directory.write() {
        *lock = directory;
    }
}

/// System: Track server uptime
pub fn update_uptime(time: Res<Time>, mut uptime: ResMut<ServerUptime>) {
    uptime.ticks += 1;
    uptime.total_time += time.delta_secs() as f64;
}

// ============================================================================
// Channel Factory
// ============================================================================

/// Every channel end the server wires together
pub struct BridgeChannels {
    pub commands: CommandSender,
    pub command_receiver: GuildCommandReceiver,
    pub requests: mpsc::UnboundedSender<AuthorityRequest>,
    pub request_receiver: mpsc::UnboundedReceiver<AuthorityRequest>,
    pub replies: mpsc::UnboundedSender<AuthorityReply>,
    pub reply_receiver: AuthorityReplyReceiver,
    pub outbound: mpsc::UnboundedSender<OutboundEvent>,
    pub outbound_receiver: mpsc::UnboundedReceiver<OutboundEvent>,
    pub directory: SharedGuildDirectory,
}

/// Create the bridge channels and the shared directory
pub fn create_bridge() -> BridgeChannels {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let (requests, request_receiver) = mpsc::unbounded_channel();
    let (replies, reply_rx) = mpsc::unbounded_channel();
    let (outbound, outbound_receiver) = mpsc::unbounded_channel();

    BridgeChannels {
        commands,
        command_receiver: GuildCommandReceiver { receiver: command_rx },
        requests,
        request_receiver,
        replies,
        reply_receiver: AuthorityReplyReceiver { receiver: reply_rx },
        outbound,
        outbound_receiver,
        directory: Arc::new(RwLock::new(GuildDirectory::default())),
    }
}

// ============================================================================
// Tests
// ============================================================================
