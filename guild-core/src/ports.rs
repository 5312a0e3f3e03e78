//! Collaborator interfaces
//!
//! The engine never owns sessions, the network, the script VM or the client
//! framing. It reaches them through these traits:
//! - `SessionLayer`: live sessions, resolved by (account, character)
//! - `RemoteAuthority`: fire-and-forget requests to the system of record
//! - `ClientNotifier`: decides nothing about framing, only receives pushes
//! - `ScriptEngine`: named event triggers
//! - `DefenderRegistry`: zone-resident stronghold defenders
//!
//! `WorldHost` bundles them so the engine stays a single generic parameter.

use serde::{Deserialize, Serialize};

use crate::guild::RelationKind;
use crate::protocol::AuthorityRequest;
use crate::types::{AccountId, CharId, GuildId, SessionId};

/// Point-in-time view of a live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub account_id: AccountId,
    pub char_id: CharId,
    pub name: String,
    /// Guild the session believes it belongs to (0 = none)
    pub guild_id: GuildId,
    pub level: u32,
    pub class: u16,
    pub hair: u16,
    pub hair_color: u16,
    pub gender: u8,
    pub zone: String,
    pub x: u16,
    pub y: u16,
    /// The session is being torn down and must not be attached
    pub disconnecting: bool,
    /// Holds the consumable item required to found a guild
    pub has_creation_token: bool,
    /// Currently inside a siege-restricted zone
    pub in_siege_zone: bool,
}

/// Session layer as seen by the guild engine
pub trait SessionLayer {
    fn resolve_session(&self, account_id: AccountId, char_id: CharId) -> Option<SessionInfo>;
    fn session(&self, id: SessionId) -> Option<SessionInfo>;
    fn live_sessions(&self) -> Vec<SessionInfo>;
    fn set_session_guild(&mut self, id: SessionId, guild_id: GuildId);
    /// Consume the creation token; `false` if it is gone
    fn consume_creation_token(&mut self, id: SessionId) -> bool;
    /// Force-close guild-scoped storage if the session has it open
    fn close_guild_storage(&mut self, id: SessionId);
    /// Block the given guild skills for `duration_ms`
    fn lock_skills(&mut self, id: SessionId, skills: &[u16], duration_ms: u64);
}

/// Outbound channel to the remote authority. No reply is guaranteed.
pub trait RemoteAuthority {
    fn send(&mut self, request: AuthorityRequest);
}

/// Client-facing pushes. The engine decides when, the notifier decides how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    BasicInfo {
        guild_id: GuildId,
    },
    Roster {
        guild_id: GuildId,
        member_count: usize,
    },
    Ranks {
        guild_id: GuildId,
    },
    Skills {
        guild_id: GuildId,
        skill_points: u32,
    },
    Notice {
        guild_id: GuildId,
        title: String,
        body: String,
    },
    Emblem {
        guild_id: GuildId,
        emblem_id: u32,
    },
    Relations {
        guild_id: GuildId,
    },
    RelationChanged {
        guild_id: GuildId,
        other_id: GuildId,
        other_name: String,
        kind: RelationKind,
        added: bool,
    },
    MemberOnline {
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
        online: bool,
    },
    MemberPosition {
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
        x: u16,
        y: u16,
    },
    MemberLeft {
        guild_id: GuildId,
        name: String,
        reason: String,
        expelled: bool,
    },
    InvitePrompt {
        guild_id: GuildId,
        guild_name: String,
        inviter: String,
    },
    InviteAnswered {
        target: String,
        accepted: bool,
    },
    RelationPrompt {
        guild_id: GuildId,
        guild_name: String,
        kind: RelationKind,
    },
    RelationAnswered {
        kind: RelationKind,
        accepted: bool,
    },
    Created {
        guild_id: GuildId,
    },
    Joined {
        guild_id: GuildId,
    },
    Left {
        guild_id: GuildId,
    },
    Disbanded {
        guild_id: GuildId,
    },
    MasterChanged {
        guild_id: GuildId,
        master: String,
    },
    Rejected {
        code: u16,
        reason: String,
    },
}

pub trait ClientNotifier {
    fn notify(&mut self, session: SessionId, notification: Notification);
}

/// Script/event-trigger engine, called by name only
pub trait ScriptEngine {
    fn fire_named_event(&mut self, name: &str);
    fn fire_for_all_strongholds(&mut self, suffix: &str);
}

/// Zone-resident stronghold defenders
pub trait DefenderRegistry {
    /// Ask every defender in `zone` to re-resolve its guild affiliation
    fn refresh_defender_affiliation(&mut self, zone: &str, owner: GuildId);
}

/// Everything the engine talks to
pub trait WorldHost:
    SessionLayer + RemoteAuthority + ClientNotifier + ScriptEngine + DefenderRegistry + Send + Sync + 'static
{
}

impl<T> WorldHost for T where
    T: SessionLayer + RemoteAuthority + ClientNotifier + ScriptEngine + DefenderRegistry + Send + Sync + 'static
{
}
