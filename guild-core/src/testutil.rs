//! Recording world host for tests and benches.
//!
//! Implements every collaborator trait over plain in-memory tables and keeps
//! a log of everything the engine sent out, so tests can assert on outbound
//! traffic without a network or a script VM.

use std::collections::BTreeMap;

use crate::ports::{
    ClientNotifier, DefenderRegistry, Notification, RemoteAuthority, ScriptEngine, SessionInfo,
    SessionLayer,
};
use crate::protocol::AuthorityRequest;
use crate::types::{AccountId, CharId, GuildId, SessionId};

#[derive(Debug, Default)]
pub struct TestHost {
    pub sessions: BTreeMap<SessionId, SessionInfo>,
    next_session: SessionId,
    pub requests: Vec<AuthorityRequest>,
    pub notifications: Vec<(SessionId, Notification)>,
    pub script_events: Vec<String>,
    pub stronghold_broadcasts: Vec<String>,
    pub defender_refreshes: Vec<(String, GuildId)>,
    pub closed_storage: Vec<SessionId>,
    pub skill_locks: Vec<(SessionId, Vec<u16>, u64)>,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            next_session: 1,
            ..Default::default()
        }
    }

    /// Register a live session in `prontera` and return its id
    pub fn add_session(
        &mut self,
        account_id: AccountId,
        char_id: CharId,
        name: &str,
        guild_id: GuildId,
    ) -> SessionId {
        let id = self.next_session;
        self.next_session += 1;
        self.sessions.insert(
            id,
            SessionInfo {
                id,
                account_id,
                char_id,
                name: name.to_string(),
                guild_id,
                level: 50,
                class: 1,
                hair: 1,
                hair_color: 0,
                gender: 0,
                zone: "prontera".to_string(),
                x: 150,
                y: 150,
                disconnecting: false,
                has_creation_token: false,
                in_siege_zone: false,
            },
        );
        id
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut SessionInfo> {
        self.sessions.get_mut(&id)
    }

    pub fn remove_session(&mut self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.remove(&id)
    }

    pub fn take_requests(&mut self) -> Vec<AuthorityRequest> {
        std::mem::take(&mut self.requests)
    }

    pub fn take_notifications(&mut self) -> Vec<(SessionId, Notification)> {
        std::mem::take(&mut self.notifications)
    }

    /// Notifications delivered to one session, in order
    pub fn notifications_for(&self, session: SessionId) -> Vec<&Notification> {
        self.notifications
            .iter()
            .filter(|(s, _)| *s == session)
            .map(|(_, n)| n)
            .collect()
    }
}

impl SessionLayer for TestHost {
    fn resolve_session(&self, account_id: AccountId, char_id: CharId) -> Option<SessionInfo> {
        self.sessions
            .values()
            .find(|s| s.account_id == account_id && s.char_id == char_id)
            .cloned()
    }

    fn session(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.get(&id).cloned()
    }

    fn live_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.values().cloned().collect()
    }

    fn set_session_guild(&mut self, id: SessionId, guild_id: GuildId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.guild_id = guild_id;
        }
    }

    fn consume_creation_token(&mut self, id: SessionId) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) if session.has_creation_token => {
                session.has_creation_token = false;
                true
            }
            _ => false,
        }
    }

    fn close_guild_storage(&mut self, id: SessionId) {
        self.closed_storage.push(id);
    }

    fn lock_skills(&mut self, id: SessionId, skills: &[u16], duration_ms: u64) {
        self.skill_locks.push((id, skills.to_vec(), duration_ms));
    }
}

impl RemoteAuthority for TestHost {
    fn send(&mut self, request: AuthorityRequest) {
        self.requests.push(request);
    }
}

impl ClientNotifier for TestHost {
    fn notify(&mut self, session: SessionId, notification: Notification) {
        self.notifications.push((session, notification));
    }
}

impl ScriptEngine for TestHost {
    fn fire_named_event(&mut self, name: &str) {
        self.script_events.push(name.to_string());
    }

    fn fire_for_all_strongholds(&mut self, suffix: &str) {
        self.stronghold_broadcasts.push(suffix.to_string());
    }
}

impl DefenderRegistry for TestHost {
    fn refresh_defender_affiliation(&mut self, zone: &str, owner: GuildId) {
        self.defender_refreshes.push((zone.to_string(), owner));
    }
}
