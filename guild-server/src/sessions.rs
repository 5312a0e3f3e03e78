//! Session Registry - live player sessions as seen by the guild engine
//!
//! The real session layer (network, character load) lives elsewhere; this
//! registry is the in-process table the bridge feeds with connect, move and
//! disconnect commands. It also tracks the two pieces of per-session state
//! the engine can change: open guild storage and master-transfer skill locks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use guild_core::ports::SessionInfo;
use guild_core::types::{AccountId, CharId, GuildId, SessionId};
use guild_core::GuildError;

/// Character data supplied when a session comes online
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLogin {
    pub account_id: AccountId,
    pub char_id: CharId,
    pub name: String,
    /// Guild recorded on the character (0 = none)
    #[serde(default)]
    pub guild_id: GuildId,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub class: u16,
    #[serde(default = "default_zone")]
    pub zone: String,
    #[serde(default)]
    pub x: u16,
    #[serde(default)]
    pub y: u16,
    #[serde(default)]
    pub has_creation_token: bool,
}

fn default_level() -> u32 {
    1
}

fn default_zone() -> String {
    "prontera".to_string()
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, SessionInfo>,
    next_id: SessionId,
    storage_open: HashSet<SessionId>,
    skill_locks: HashMap<(SessionId, u16), DateTime<Utc>>,
    /// Zones where the siege restriction applies
    siege_zones: HashSet<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Registry whose sessions in `zones` count as inside a siege zone
    pub fn with_siege_zones(zones: impl IntoIterator<Item = String>) -> Self {
        Self {
            siege_zones: zones.into_iter().collect(),
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Register a session and return its id.
    ///
    /// A second login for the same character replaces nothing: the old
    /// session must be closed first, so `None` is returned.
    pub fn connect(&mut self, login: SessionLogin) -> Option<SessionId> {
        if self
            .sessions
            .values()
            .any(|s| s.account_id == login.account_id && s.char_id == login.char_id)
        {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        let in_siege_zone = self.siege_zones.contains(&login.zone);
        self.sessions.insert(
            id,
            SessionInfo {
                id,
                account_id: login.account_id,
                char_id: login.char_id,
                name: login.name,
                guild_id: login.guild_id,
                level: login.level,
                class: login.class,
                hair: 0,
                hair_color: 0,
                gender: 0,
                zone: login.zone,
                x: login.x,
                y: login.y,
                disconnecting: false,
                has_creation_token: login.has_creation_token,
                in_siege_zone,
            },
        );
        Some(id)
    }

    /// Flag a session as tearing down; it stays resolvable until removed
    pub fn begin_disconnect(&mut self, id: SessionId) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.disconnecting = true;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: SessionId) -> Option<SessionInfo> {
        self.storage_open.remove(&id);
        self.skill_locks.retain(|(session, _), _| *session != id);
        self.sessions.remove(&id)
    }

    pub fn move_to(&mut self, id: SessionId, zone: &str, x: u16, y: u16) -> bool {
        let in_siege_zone = self.siege_zones.contains(zone);
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        if session.zone != zone {
            session.zone = zone.to_string();
        }
        session.x = x;
        session.y = y;
        session.in_siege_zone = in_siege_zone;
        true
    }

    /// Open guild storage for a guild member. Opening twice is harmless.
    pub fn open_guild_storage(&mut self, id: SessionId) -> Result<(), GuildError> {
        let session = self.sessions.get(&id).ok_or(GuildError::SessionNotFound)?;
        if session.disconnecting {
            return Err(GuildError::SessionNotFound);
        }
        if session.guild_id == 0 {
            return Err(GuildError::NotInGuild);
        }
        self.storage_open.insert(id);
        Ok(())
    }

    pub fn is_storage_open(&self, id: SessionId) -> bool {
        self.storage_open.contains(&id)
    }

    /// Whether `skill_id` is still blocked for the session at `now`
    pub fn is_skill_locked(&self, id: SessionId, skill_id: u16, now: DateTime<Utc>) -> bool {
        self.skill_locks
            .get(&(id, skill_id))
            .is_some_and(|until| *until > now)
    }

    /// Gate a guild skill use on the post-transfer lockout
    pub fn check_guild_skill(&self, id: SessionId, skill_id: u16, now: DateTime<Utc>) -> Result<(), GuildError> {
        let session = self.sessions.get(&id).ok_or(GuildError::SessionNotFound)?;
        if session.guild_id == 0 {
            return Err(GuildError::NotInGuild);
        }
        if self.is_skill_locked(id, skill_id, now) {
            return Err(GuildError::SkillLocked(skill_id));
        }
        Ok(())
    }

    pub fn get(&self, id: SessionId) -> Option<&SessionInfo> {
        self.sessions.get(&id)
    }

    pub fn find(&self, account_id: AccountId, char_id: CharId) -> Option<&SessionInfo> {
        self.sessions
            .values()
            .find(|s| s.account_id == account_id && s.char_id == char_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionInfo> {
        self.sessions.values()
    }

    pub(crate) fn set_guild(&mut self, id: SessionId, guild_id: GuildId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.guild_id = guild_id;
        }
    }

    pub(crate) fn take_creation_token(&mut self, id: SessionId) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) if session.has_creation_token => {
                session.has_creation_token = false;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if storage was open
    pub(crate) fn close_guild_storage(&mut self, id: SessionId) -> bool {
        self.storage_open.remove(&id)
    }

    pub(crate) fn lock_skills(&mut self, id: SessionId, skills: &[u16], duration_ms: u64, now: DateTime<Utc>) {
        let until = now + Duration::milliseconds(duration_ms as i64);
        for &skill in skills {
            self.skill_locks.insert((id, skill), until);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn login(account_id: u32, zone: &str) -> SessionLogin {
        SessionLogin {
            account_id,
            char_id: account_id * 10,
            name: format!("Char{account_id}"),
            guild_id: 0,
            level: 10,
            class: 0,
            zone: zone.into(),
            x: 5,
            y: 5,
            has_creation_token: false,
        }
    }

    #[test]
    fn test_connect_assigns_ids_and_rejects_duplicates() {
        let mut registry = SessionRegistry::new();
        assert_eq!(registry.connect(login(1, "prontera")), Some(1));
        assert_eq!(registry.connect(login(2, "prontera")), Some(2));
        assert_eq!(registry.connect(login(1, "geffen")), None);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find(2, 20).map(|s| s.id), Some(2));
    }

    #[test]
    fn test_siege_zone_flag_follows_movement() {
        let mut registry = SessionRegistry::with_siege_zones(["payg_cas01".to_string()]);
        let id = registry.connect(login(1, "payg_cas01")).unwrap();
        assert!(registry.get(id).unwrap().in_siege_zone);
        registry.move_to(id, "prontera", 100, 100);
        assert!(!registry.get(id).unwrap().in_siege_zone);
    }

    #[test]
    fn test_skill_lock_expires() {
        let mut registry = SessionRegistry::new();
        let id = registry.connect(login(1, "prontera")).unwrap();
        let now = Utc::now();
        registry.lock_skills(id, &[10010, 10011], 300_000, now);
        assert!(registry.is_skill_locked(id, 10010, now));
        assert!(!registry.is_skill_locked(id, 10012, now));
        assert!(!registry.is_skill_locked(id, 10010, now + Duration::minutes(6)));
    }

    #[test]
    fn test_remove_clears_side_tables() {
        let mut registry = SessionRegistry::new();
        let id = registry.connect(SessionLogin {
            guild_id: 7,
            ..login(1, "prontera")
        })
        .unwrap();
        assert!(registry.open_guild_storage(id).is_ok());
        assert!(registry.is_storage_open(id));
        registry.lock_skills(id, &[10010], 1_000, Utc::now());
        registry.remove(id);
        assert!(!registry.is_storage_open(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_storage_requires_guild() {
        let mut registry = SessionRegistry::new();
        let id = registry.connect(login(1, "prontera")).unwrap();
        assert_eq!(registry.open_guild_storage(id), Err(GuildError::NotInGuild));
        assert_eq!(registry.open_guild_storage(99), Err(GuildError::SessionNotFound));

        registry.set_guild(id, 7);
        assert!(registry.open_guild_storage(id).is_ok());
        assert!(registry.close_guild_storage(id));
        assert!(!registry.is_storage_open(id));
    }

    #[test]
    fn test_locked_skill_is_refused_until_expiry() {
        let mut registry = SessionRegistry::new();
        let id = registry
            .connect(SessionLogin {
                guild_id: 7,
                ..login(1, "prontera")
            })
            .unwrap();
        let now = Utc::now();
        registry.lock_skills(id, &[10010], 300_000, now);
        assert_eq!(
            registry.check_guild_skill(id, 10010, now),
            Err(GuildError::SkillLocked(10010))
        );
        assert!(registry.check_guild_skill(id, 10000, now).is_ok());
        assert!(registry
            .check_guild_skill(id, 10010, now + Duration::minutes(6))
            .is_ok());
    }
}
