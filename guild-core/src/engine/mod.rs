//! Guild Engine: single owner of every replicated table.
//!
//! All entry points (player actions, authority replies, periodic jobs) run to
//! completion on one cooperative timeline, so none of the tables need locks.
//! The engine is split by concern:
//! - `membership`: create / invite / leave / expel, session lifecycle
//! - `relations`: alliance and opposition requests
//! - `admin`: master transfer, disband, ranks, notice, emblem, skills, exp
//! - `strongholds`: field loads and saves, bulk load, siege window
//! - `replies`: applying authoritative replies
//! - `jobs`: periodic maintenance
//! - `actions`: the `GuildAction` dispatch surface

mod actions;
mod admin;
mod jobs;
mod membership;
mod relations;
mod replies;
mod strongholds;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{GuildConfig, StaticData};
use crate::constants::MAX_GUILD_RANKS;
use crate::error::GuildError;
use crate::exp_pool::ExpPool;
use crate::guild::{Guild, GuildMember, GuildStore, RelationKind};
use crate::pending::{DeferredAction, FieldKey, PendingEvents};
use crate::ports::{Notification, SessionInfo, WorldHost};
use crate::protocol::AuthorityRequest;
use crate::skill_tree::SkillTree;
use crate::stronghold::{StrongholdField, StrongholdLedger};
use crate::types::{CastleId, GuildId, SessionId};

pub use actions::GuildAction;
pub use jobs::{Interval, JobSchedule};

// =====================================================
// Ephemeral request state
// =====================================================

/// Outstanding invite, keyed by the invited session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInvite {
    pub guild_id: GuildId,
    pub inviter: SessionId,
    pub issued_at_ms: u64,
}

/// Outstanding alliance request, keyed by the target master's session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRelation {
    pub from_guild: GuildId,
    pub from_session: SessionId,
    pub kind: RelationKind,
    pub issued_at_ms: u64,
}

/// Running counters, exported by the server as metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub requests_sent: u64,
    pub replies_applied: u64,
    pub actions_rejected: u64,
    pub notifications_pushed: u64,
    pub script_events_fired: u64,
    pub exp_records_flushed: u64,
    pub stronghold_fields_persisted: u64,
}

// =====================================================
// Engine
// =====================================================

pub struct GuildEngine<H: WorldHost> {
    host: H,
    config: GuildConfig,
    skill_tree: SkillTree,
    guilds: GuildStore,
    strongholds: StrongholdLedger,
    guild_events: PendingEvents<GuildId>,
    field_events: PendingEvents<FieldKey>,
    /// Guild ids with an info request in flight, and when it was sent
    awaiting_info: HashMap<GuildId, u64>,
    /// Field loads with a deferred chain in flight, and when they were sent
    awaiting_fields: HashMap<FieldKey, u64>,
    exp_pool: ExpPool,
    invites: HashMap<SessionId, PendingInvite>,
    relation_requests: HashMap<SessionId, PendingRelation>,
    siege_active: bool,
    clock_ms: u64,
    schedule: JobSchedule,
    stats: EngineStats,
}

impl<H: WorldHost> GuildEngine<H> {
    pub fn new(host: H, config: GuildConfig, data: StaticData) -> Self {
        let schedule = JobSchedule::from_config(&config);
        Self {
            exp_pool: ExpPool::with_capacity(config.exp_pool_capacity),
            strongholds: StrongholdLedger::from_roster(&data.castles),
            skill_tree: data.skill_tree,
            host,
            config,
            guilds: GuildStore::new(),
            guild_events: PendingEvents::new(),
            field_events: PendingEvents::new(),
            awaiting_info: HashMap::new(),
            awaiting_fields: HashMap::new(),
            invites: HashMap::new(),
            relation_requests: HashMap::new(),
            siege_active: false,
            clock_ms: 0,
            schedule,
            stats: EngineStats::default(),
        }
    }

    // ----- read access -----

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> &GuildConfig {
        &self.config
    }

    pub fn guilds(&self) -> &GuildStore {
        &self.guilds
    }

    pub fn lookup(&self, id: GuildId) -> Option<&Guild> {
        self.guilds.lookup(id)
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&Guild> {
        self.guilds.lookup_by_name(name)
    }

    pub fn strongholds(&self) -> &StrongholdLedger {
        &self.strongholds
    }

    pub fn exp_pool(&self) -> &ExpPool {
        &self.exp_pool
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn siege_active(&self) -> bool {
        self.siege_active
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    pub fn pending_invite(&self, target: SessionId) -> Option<&PendingInvite> {
        self.invites.get(&target)
    }

    pub fn pending_relation(&self, target: SessionId) -> Option<&PendingRelation> {
        self.relation_requests.get(&target)
    }

    pub fn is_awaiting_info(&self, id: GuildId) -> bool {
        self.awaiting_info.contains_key(&id)
    }

    pub fn is_awaiting_field(&self, castle_id: CastleId, field: StrongholdField) -> bool {
        self.awaiting_fields.contains_key(&(castle_id, field))
    }

    /// Deferred actions waiting on a guild's data
    pub fn deferred_for_guild(&self, id: GuildId) -> usize {
        self.guild_events.chain_len(&id)
    }

    // ----- outbound helpers -----

    fn send(&mut self, request: AuthorityRequest) {
        self.stats.requests_sent += 1;
        self.host.send(request);
    }

    fn notify(&mut self, session: SessionId, notification: Notification) {
        self.stats.notifications_pushed += 1;
        self.host.notify(session, notification);
    }

    fn reject(&mut self, session: SessionId, err: &GuildError) {
        self.notify(
            session,
            Notification::Rejected {
                code: err.code(),
                reason: err.to_string(),
            },
        );
    }

    /// Push to every online member with an attached session
    fn notify_guild(&mut self, guild_id: GuildId, notification: Notification) {
        let sessions = self
            .guilds
            .lookup(guild_id)
            .map(Guild::attached_sessions)
            .unwrap_or_default();
        for session in sessions {
            self.notify(session, notification.clone());
        }
    }

    /// Push to exactly one online member, if any is online
    fn notify_one(&mut self, guild_id: GuildId, notification: Notification) -> bool {
        let first = self
            .guilds
            .lookup(guild_id)
            .and_then(|g| g.attached_sessions().into_iter().next());
        match first {
            Some(session) => {
                self.notify(session, notification);
                true
            }
            None => false,
        }
    }

    fn fire_event(&mut self, name: &str) {
        self.stats.script_events_fired += 1;
        self.host.fire_named_event(name);
    }

    /// A request stamped at `issued_ms` is still worth waiting for
    fn in_flight(&self, issued_ms: Option<&u64>) -> bool {
        issued_ms.is_some_and(|issued| self.clock_ms.saturating_sub(*issued) < self.config.request_ttl_ms)
    }

    /// Ask the authority for a guild's data unless a live request is already
    /// out. A request older than the TTL counts as lost and is sent again.
    fn request_guild_info(&mut self, guild_id: GuildId) {
        if guild_id == 0 || self.in_flight(self.awaiting_info.get(&guild_id)) {
            return;
        }
        self.awaiting_info.insert(guild_id, self.clock_ms);
        self.send(AuthorityRequest::RequestInfo { guild_id });
    }

    /// Ask the authority for a stronghold field, same rules as guild info
    fn request_field(&mut self, castle_id: CastleId, field: StrongholdField) {
        let key = (castle_id, field);
        if self.in_flight(self.awaiting_fields.get(&key)) {
            return;
        }
        self.awaiting_fields.insert(key, self.clock_ms);
        self.send(AuthorityRequest::StrongholdFieldLoad {
            castle_id,
            field: field.index(),
        });
    }

    /// Run `action` once `guild_id` is known locally (now, if it already is)
    fn defer_until_guild(&mut self, guild_id: GuildId, action: DeferredAction) {
        if self.guilds.contains(guild_id) {
            self.run_deferred(action);
            return;
        }
        self.guild_events.register(guild_id, action);
        self.request_guild_info(guild_id);
    }

    fn run_deferred(&mut self, action: DeferredAction) {
        match action {
            DeferredAction::ScriptEvent(name) => self.fire_event(&name),
            DeferredAction::RefreshDefenders(castle_id) => self.refresh_defenders(castle_id),
        }
    }

    fn refresh_defenders(&mut self, castle_id: CastleId) {
        let Some(castle) = self.strongholds.lookup(castle_id) else {
            debug!(castle_id, "Defender refresh for unknown stronghold dropped");
            return;
        };
        let (zone, owner) = (castle.zone.clone(), castle.owner);
        self.host.refresh_defender_affiliation(&zone, owner);
    }

    // ----- requester resolution -----

    /// Live, non-disconnecting session
    fn live_session(&self, session: SessionId) -> Result<SessionInfo, GuildError> {
        self.host
            .session(session)
            .filter(|s| !s.disconnecting)
            .ok_or(GuildError::SessionNotFound)
    }

    /// Requester, its guild id and its member slot
    fn member_context(&self, session: SessionId) -> Result<(SessionInfo, GuildId, usize), GuildError> {
        let info = self.live_session(session)?;
        if info.guild_id == 0 {
            return Err(GuildError::NotInGuild);
        }
        let guild = self
            .guilds
            .lookup(info.guild_id)
            .ok_or(GuildError::UnknownGuild(info.guild_id))?;
        let slot = guild
            .member_index(info.account_id, info.char_id)
            .ok_or(GuildError::NotInGuild)?;
        let guild_id = info.guild_id;
        Ok((info, guild_id, slot))
    }

    /// Like [`Self::member_context`] but the requester must be the named master
    fn master_context(&self, session: SessionId) -> Result<(SessionInfo, GuildId), GuildError> {
        let (info, guild_id, _) = self.member_context(session)?;
        let is_master = self
            .guilds
            .lookup(guild_id)
            .is_some_and(|g| g.master == info.name);
        if !is_master {
            return Err(GuildError::NotMaster);
        }
        Ok((info, guild_id))
    }
}

/// Member record built from a live session, at the lowest rank
pub(crate) fn member_from_session(info: &SessionInfo) -> GuildMember {
    GuildMember {
        account_id: info.account_id,
        char_id: info.char_id,
        name: info.name.clone(),
        hair: info.hair,
        hair_color: info.hair_color,
        gender: info.gender,
        class: info.class,
        level: info.level,
        rank: MAX_GUILD_RANKS - 1,
        online: true,
        ..Default::default()
    }
}
