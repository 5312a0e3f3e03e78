//! Guild Replica Store
//!
//! In-memory table of replicated guilds keyed by guild id. The store owns the
//! records; sessions are only referenced through cached handles that
//! [`GuildStore::reconcile_presence`] revalidates against the session layer.
//!
//! Snapshot application is a pure diff: the returned [`SnapshotDelta`] says
//! which parts changed so the engine can push exactly those to clients.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::Guild;
use crate::constants::MASTER_RANK;
use crate::ports::SessionLayer;
use crate::types::{GuildId, SessionId};

/// What changed when a snapshot was applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotDelta {
    /// The guild was unknown and has just been materialized
    pub created: bool,
    pub basic_info: bool,
    pub roster: bool,
    pub ranks: bool,
    pub skills: bool,
    pub notice: bool,
    pub emblem: bool,
    pub relations: bool,
    /// The snapshot did not fit the local tables and was clamped
    pub clamped: bool,
}

impl SnapshotDelta {
    fn everything() -> Self {
        Self {
            created: true,
            basic_info: true,
            roster: true,
            ranks: true,
            skills: true,
            notice: true,
            emblem: true,
            relations: true,
            clamped: false,
        }
    }

    /// No client-visible change
    pub fn is_empty(&self) -> bool {
        !(self.created
            || self.basic_info
            || self.roster
            || self.ranks
            || self.skills
            || self.notice
            || self.emblem
            || self.relations)
    }
}

/// Process-local table of replicated guilds
#[derive(Debug, Default)]
pub struct GuildStore {
    guilds: HashMap<GuildId, Guild>,
}

impl GuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }

    pub fn contains(&self, id: GuildId) -> bool {
        self.guilds.contains_key(&id)
    }

    pub fn lookup(&self, id: GuildId) -> Option<&Guild> {
        self.guilds.get(&id)
    }

    pub fn lookup_mut(&mut self, id: GuildId) -> Option<&mut Guild> {
        self.guilds.get_mut(&id)
    }

    /// Case-insensitive linear scan by display name
    pub fn lookup_by_name(&self, name: &str) -> Option<&Guild> {
        let wanted = name.to_lowercase();
        self.guilds
            .values()
            .find(|g| g.name.to_lowercase() == wanted)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Guild> {
        self.guilds.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Guild> {
        self.guilds.values_mut()
    }

    pub fn ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<GuildId> = self.guilds.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn remove(&mut self, id: GuildId) -> Option<Guild> {
        self.guilds.remove(&id)
    }

    /// Apply an authoritative snapshot, creating the guild if it is unknown.
    ///
    /// Locally derived state (attached sessions, last pushed positions) is
    /// carried over for members whose identity is unchanged, so applying the
    /// same snapshot twice yields an empty delta the second time.
    pub fn materialize_or_update(&mut self, mut snapshot: Guild) -> SnapshotDelta {
        let clamped = snapshot.normalize();
        if clamped {
            warn!(
                guild_id = snapshot.id,
                "Snapshot exceeds local table capacity, clamped"
            );
        }

        let Some(existing) = self.guilds.get_mut(&snapshot.id) else {
            debug!(guild_id = snapshot.id, name = %snapshot.name, "Materializing guild");
            let id = snapshot.id;
            self.guilds.insert(id, snapshot);
            return SnapshotDelta {
                clamped,
                ..SnapshotDelta::everything()
            };
        };

        for (slot, incoming) in snapshot.members.iter_mut().enumerate() {
            let previous = &existing.members[slot];
            if incoming.is_empty() || !previous.is(incoming.account_id, incoming.char_id) {
                continue;
            }
            incoming.last_seen = previous.last_seen.clone();
            if previous.session.is_some() {
                incoming.session = previous.session;
                incoming.online = true;
            }
        }

        let delta = SnapshotDelta {
            created: false,
            basic_info: existing.name != snapshot.name
                || existing.master != snapshot.master
                || existing.level != snapshot.level
                || existing.exp != snapshot.exp
                || existing.next_exp != snapshot.next_exp
                || existing.average_level != snapshot.average_level
                || existing.max_members != snapshot.max_members,
            roster: existing
                .members
                .iter()
                .zip(snapshot.members.iter())
                .any(|(a, b)| !a.roster_eq(b)),
            ranks: existing.ranks != snapshot.ranks,
            skills: existing.skill_points != snapshot.skill_points
                || existing.skills != snapshot.skills,
            notice: existing.notice != snapshot.notice,
            emblem: existing.emblem_id != snapshot.emblem_id,
            relations: existing.relations != snapshot.relations,
            clamped,
        };

        *existing = snapshot;
        delta
    }

    /// Revalidate every slot's cached session against the session layer.
    ///
    /// A slot keeps (or gains) a handle only if the resolved session claims
    /// this guild and is not disconnecting. Returns the number of slots whose
    /// handle changed.
    pub fn reconcile_presence<S>(&mut self, id: GuildId, sessions: &S) -> usize
    where
        S: SessionLayer + ?Sized,
    {
        let Some(guild) = self.guilds.get_mut(&id) else {
            return 0;
        };
        let mut changed = 0;
        for member in guild.members.iter_mut().filter(|m| m.account_id > 0) {
            let resolved = sessions
                .resolve_session(member.account_id, member.char_id)
                .filter(|s| s.guild_id == id && !s.disconnecting)
                .map(|s| s.id);
            if resolved != member.session {
                changed += 1;
                if resolved.is_some() {
                    member.online = true;
                } else if member.session.is_some() {
                    member.online = false;
                    member.last_seen = None;
                }
                member.session = resolved;
            }
        }
        changed
    }

    /// Sessions that claim guild `id` but are missing from its member table.
    ///
    /// Run once when a guild is first materialized; the caller clears the
    /// guild id on each returned session.
    pub fn audit_new_guild<S>(&self, id: GuildId, sessions: &S) -> Vec<SessionId>
    where
        S: SessionLayer + ?Sized,
    {
        let Some(guild) = self.guilds.get(&id) else {
            return Vec::new();
        };
        sessions
            .live_sessions()
            .into_iter()
            .filter(|s| s.guild_id == id && guild.member_index(s.account_id, s.char_id).is_none())
            .map(|s| s.id)
            .collect()
    }

    /// Swap the promoted slot into slot 0 and make it master.
    ///
    /// The displaced master takes the promoted member's former rank. Only
    /// these two slots move.
    pub fn hand_off_master(&mut self, id: GuildId, promoted_slot: usize) -> bool {
        let Some(guild) = self.guilds.get_mut(&id) else {
            return false;
        };
        if promoted_slot == 0
            || promoted_slot >= guild.members.len()
            || guild.members[promoted_slot].is_empty()
        {
            return false;
        }
        let former_rank = guild.members[promoted_slot].rank;
        let demoted_rank = if former_rank == MASTER_RANK {
            MASTER_RANK + 1
        } else {
            former_rank
        };
        guild.members.swap(0, promoted_slot);
        guild.members[0].rank = MASTER_RANK;
        guild.members[promoted_slot].rank = demoted_rank;
        guild.master = guild.members[0].name.clone();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guild::GuildMember;
    use crate::testutil::TestHost;

    fn member(account_id: u32, char_id: u32, name: &str, rank: usize) -> GuildMember {
        GuildMember {
            account_id,
            char_id,
            name: name.into(),
            rank,
            level: 10,
            ..Default::default()
        }
    }

    fn sample_guild() -> Guild {
        let mut guild = Guild::founded(7, "Wolves".into(), member(1, 10, "Alpha", 0), 16);
        guild.members[1] = member(2, 20, "Beta", 3);
        guild.members[2] = member(3, 30, "Gamma", 5);
        guild
    }

    #[test]
    fn test_materialize_creates_then_is_idempotent() {
        let mut store = GuildStore::new();
        let first = store.materialize_or_update(sample_guild());
        assert!(first.created);
        let second = store.materialize_or_update(sample_guild());
        assert!(second.is_empty(), "identical snapshot must not produce a delta");
    }

    #[test]
    fn test_materialize_reports_only_changed_parts() {
        let mut store = GuildStore::new();
        store.materialize_or_update(sample_guild());

        let mut next = sample_guild();
        next.notice.title = "War tonight".into();
        let delta = store.materialize_or_update(next);
        assert!(delta.notice);
        assert!(!delta.roster);
        assert!(!delta.basic_info);
        assert!(!delta.emblem);
    }

    #[test]
    fn test_materialize_keeps_attached_sessions() {
        let mut host = TestHost::new();
        host.add_session(1, 10, "Alpha", 7);
        let mut store = GuildStore::new();
        store.materialize_or_update(sample_guild());
        assert_eq!(store.reconcile_presence(7, &host), 1);

        let delta = store.materialize_or_update(sample_guild());
        assert!(delta.is_empty());
        assert!(store.lookup(7).unwrap().members[0].session.is_some());
    }

    #[test]
    fn test_reconcile_rejects_foreign_and_disconnecting_sessions() {
        let mut host = TestHost::new();
        let alpha = host.add_session(1, 10, "Alpha", 7);
        host.add_session(2, 20, "Beta", 99);
        let mut store = GuildStore::new();
        store.materialize_or_update(sample_guild());
        store.reconcile_presence(7, &host);

        let guild = store.lookup(7).unwrap();
        assert_eq!(guild.members[0].session, Some(alpha));
        assert_eq!(guild.members[1].session, None);

        host.session_mut(alpha).unwrap().disconnecting = true;
        assert_eq!(store.reconcile_presence(7, &host), 1);
        let guild = store.lookup(7).unwrap();
        assert_eq!(guild.members[0].session, None);
        assert!(!guild.members[0].online);
    }

    #[test]
    fn test_audit_finds_sessions_missing_from_roster() {
        let mut host = TestHost::new();
        host.add_session(1, 10, "Alpha", 7);
        let stray = host.add_session(9, 90, "Stray", 7);
        let mut store = GuildStore::new();
        store.materialize_or_update(sample_guild());
        assert_eq!(store.audit_new_guild(7, &host), vec![stray]);
    }

    #[test]
    fn test_hand_off_master_swaps_two_slots() {
        let mut store = GuildStore::new();
        store.materialize_or_update(sample_guild());
        assert!(store.hand_off_master(7, 2));

        let guild = store.lookup(7).unwrap();
        assert_eq!(guild.members[0].name, "Gamma");
        assert_eq!(guild.members[0].rank, MASTER_RANK);
        assert_eq!(guild.members[2].name, "Alpha");
        assert_eq!(guild.members[2].rank, 5);
        assert_eq!(guild.members[1].name, "Beta");
        assert_eq!(guild.master, "Gamma");
        assert_eq!(
            guild.members.iter().filter(|m| !m.is_empty() && m.rank == MASTER_RANK).count(),
            1
        );
    }

    #[test]
    fn test_lookup_by_name_is_case_insensitive() {
        let mut store = GuildStore::new();
        store.materialize_or_update(sample_guild());
        assert_eq!(store.lookup_by_name("wOLVES").map(|g| g.id), Some(7));
        assert!(store.lookup_by_name("Bears").is_none());
    }
}
