//! Applying authoritative replies.
//!
//! Replies arrive late, out of order, or for state that has moved on, so every
//! handler re-validates identity and membership before touching the store.
//! Anything that no longer resolves is dropped with a debug log.

use tracing::{debug, info, warn};

use super::GuildEngine;
use crate::constants::{GD_EXTENSION, MAX_GUILD_MEMBERS, MAX_GUILD_RANKS};
use crate::error::GuildError;
use crate::guild::{Guild, GuildMember, GuildNotice, GuildRank, RelationKind, SnapshotDelta};
use crate::ports::{Notification, WorldHost};
use crate::protocol::AuthorityReply;
use crate::types::{AccountId, CharId, GuildId};

/// Member slots gained per level of the extension skill
const EXTENSION_SLOTS_PER_LEVEL: usize = 10;

impl<H: WorldHost> GuildEngine<H> {
    /// Single entry point for everything the authority sends back
    pub fn handle_reply(&mut self, reply: AuthorityReply) {
        self.stats.replies_applied += 1;
        match reply {
            AuthorityReply::GuildInfo(guild) => self.on_guild_info(guild),
            AuthorityReply::GuildInfoMissing { guild_id } => self.on_guild_missing(guild_id),
            AuthorityReply::Created {
                account_id,
                char_id,
                guild_id,
            } => self.on_created(account_id, char_id, guild_id),
            AuthorityReply::MemberAdded { guild_id, member, ok } => {
                self.on_member_added(guild_id, member, ok)
            }
            AuthorityReply::MemberRemoved {
                guild_id,
                account_id,
                char_id,
                name,
                reason,
                expelled,
            } => self.on_member_removed(guild_id, account_id, char_id, name, reason, expelled),
            AuthorityReply::MemberStatus {
                guild_id,
                account_id,
                char_id,
                online,
                level,
                class,
            } => self.on_member_status(guild_id, account_id, char_id, online, level, class),
            AuthorityReply::RankChanged { guild_id, index, rank } => {
                self.on_rank_changed(guild_id, index, rank)
            }
            AuthorityReply::MemberRankChanged {
                guild_id,
                account_id,
                char_id,
                rank,
            } => self.on_member_rank_changed(guild_id, account_id, char_id, rank),
            AuthorityReply::NoticeChanged { guild_id, notice } => {
                self.on_notice_changed(guild_id, notice)
            }
            AuthorityReply::EmblemChanged {
                guild_id,
                emblem_id,
                emblem,
            } => self.on_emblem_changed(guild_id, emblem_id, emblem),
            AuthorityReply::MasterChanged {
                guild_id,
                account_id,
                char_id,
            } => self.on_master_changed(guild_id, account_id, char_id),
            AuthorityReply::RelationChanged {
                guild_a,
                guild_b,
                name_a,
                name_b,
                kind,
                added,
            } => self.on_relation_changed(guild_a, guild_b, name_a, name_b, kind, added),
            AuthorityReply::Disbanded { guild_id } => self.on_disbanded(guild_id),
            AuthorityReply::SkillUpdated {
                guild_id,
                skill_id,
                level,
                skill_points,
            } => self.on_skill_updated(guild_id, skill_id, level, skill_points),
            AuthorityReply::StrongholdData(snapshots) => self.on_stronghold_data(snapshots),
            AuthorityReply::StrongholdField {
                castle_id,
                field,
                value,
            } => self.on_stronghold_field(castle_id, field, value),
        }
    }

    // =====================================================
    // Snapshots
    // =====================================================

    fn on_guild_info(&mut self, guild: Guild) {
        let guild_id = guild.id;
        self.awaiting_info.remove(&guild_id);
        let delta = self.guilds.materialize_or_update(guild);

        if delta.created {
            for stray in self.guilds.audit_new_guild(guild_id, &self.host) {
                debug!(session = stray, guild_id, "Clearing guild id on unlisted session");
                self.host.set_session_guild(stray, 0);
            }
        }
        self.guilds.reconcile_presence(guild_id, &self.host);
        self.push_delta(guild_id, delta);

        for action in self.guild_events.take(&guild_id) {
            self.run_deferred(action);
        }
    }

    /// Push only what changed, once per attached session
    fn push_delta(&mut self, guild_id: GuildId, delta: SnapshotDelta) {
        if delta.created {
            let sessions = self
                .guilds
                .lookup(guild_id)
                .map(Guild::attached_sessions)
                .unwrap_or_default();
            for session in sessions {
                self.push_guild_info(session, guild_id);
            }
            return;
        }
        let Some(guild) = self.guilds.lookup(guild_id) else {
            return;
        };
        let mut pushes = Vec::new();
        if delta.basic_info {
            pushes.push(Notification::BasicInfo { guild_id });
        }
        if delta.roster {
            pushes.push(Notification::Roster {
                guild_id,
                member_count: guild.member_count(),
            });
        }
        if delta.ranks {
            pushes.push(Notification::Ranks { guild_id });
        }
        if delta.skills {
            pushes.push(Notification::Skills {
                guild_id,
                skill_points: guild.skill_points,
            });
        }
        if delta.notice {
            pushes.push(Notification::Notice {
                guild_id,
                title: guild.notice.title.clone(),
                body: guild.notice.body.clone(),
            });
        }
        if delta.emblem {
            pushes.push(Notification::Emblem {
                guild_id,
                emblem_id: guild.emblem_id,
            });
        }
        if delta.relations {
            pushes.push(Notification::Relations { guild_id });
        }
        for push in pushes {
            self.notify_guild(guild_id, push);
        }
    }

    fn on_guild_missing(&mut self, guild_id: GuildId) {
        self.awaiting_info.remove(&guild_id);
        let dropped = self.guild_events.take(&guild_id);
        if !dropped.is_empty() {
            debug!(guild_id, dropped = dropped.len(), "Discarding deferred actions for missing guild");
        }
        self.guilds.remove(guild_id);
        self.exp_pool.discard_guild(guild_id);
        let claimants: Vec<_> = self
            .host
            .live_sessions()
            .into_iter()
            .filter(|s| s.guild_id == guild_id)
            .map(|s| s.id)
            .collect();
        for session in claimants {
            self.host.set_session_guild(session, 0);
        }
    }

    // =====================================================
    // Membership
    // =====================================================

    fn on_created(&mut self, account_id: AccountId, char_id: CharId, guild_id: Option<GuildId>) {
        let session = self
            .host
            .resolve_session(account_id, char_id)
            .filter(|s| !s.disconnecting);
        let Some(guild_id) = guild_id else {
            if let Some(session) = session {
                self.reject(session.id, &GuildError::NameConflict);
            }
            return;
        };
        info!(guild_id, account_id, "Guild created");
        let Some(session) = session else {
            debug!(guild_id, account_id, "Founder gone before creation was confirmed");
            return;
        };
        if session.guild_id != 0 {
            debug!(guild_id, account_id, joined = session.guild_id, "Founder joined another guild while creating");
            return;
        }
        if !self.host.consume_creation_token(session.id) {
            warn!(guild_id, account_id, "Creation token already gone at confirmation");
        }
        self.host.set_session_guild(session.id, guild_id);
        self.notify(session.id, Notification::Created { guild_id });
        self.request_guild_info(guild_id);
    }

    fn on_member_added(&mut self, guild_id: GuildId, mut member: GuildMember, ok: bool) {
        let session = self
            .host
            .resolve_session(member.account_id, member.char_id)
            .filter(|s| !s.disconnecting);
        if !ok {
            if let Some(session) = session {
                self.reject(session.id, &GuildError::GuildFull);
            }
            return;
        }
        if let Some(session) = &session {
            if session.guild_id != 0 && session.guild_id != guild_id {
                debug!(session = session.id, guild_id, "Joined member already belongs elsewhere");
                return;
            }
            self.host.set_session_guild(session.id, guild_id);
        }

        let Some(guild) = self.guilds.lookup_mut(guild_id) else {
            self.request_guild_info(guild_id);
            return;
        };
        if guild.member_index(member.account_id, member.char_id).is_none() {
            match guild.free_slot() {
                Some(slot) => {
                    member.session = None;
                    member.last_seen = None;
                    member.rank = member.rank.min(MAX_GUILD_RANKS - 1);
                    guild.members[slot] = member;
                    guild.recalc_average_level();
                }
                None => {
                    warn!(guild_id, "Member table full on confirmed add, resyncing");
                    self.request_guild_info(guild_id);
                    return;
                }
            }
        }
        self.guilds.reconcile_presence(guild_id, &self.host);
        if let Some(session) = session {
            self.notify(session.id, Notification::Joined { guild_id });
            self.push_guild_info(session.id, guild_id);
        }
        self.push_roster(guild_id);
    }

    fn on_member_removed(
        &mut self,
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
        name: String,
        reason: String,
        expelled: bool,
    ) {
        if let Some(guild) = self.guilds.lookup_mut(guild_id) {
            if let Some(slot) = guild.member_index(account_id, char_id) {
                guild.members[slot] = GuildMember::default();
                guild.recalc_average_level();
            }
            // One online member hears about it, not all
            self.notify_one(
                guild_id,
                Notification::MemberLeft {
                    guild_id,
                    name,
                    reason,
                    expelled,
                },
            );
        }

        let removed = self
            .host
            .resolve_session(account_id, char_id)
            .filter(|s| s.guild_id == guild_id);
        if let Some(session) = removed {
            self.host.close_guild_storage(session.id);
            self.host.set_session_guild(session.id, 0);
            self.notify(session.id, Notification::Left { guild_id });
        }
    }

    fn on_member_status(
        &mut self,
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
        online: bool,
        level: u32,
        class: u16,
    ) {
        let Some(guild) = self.guilds.lookup_mut(guild_id) else {
            return;
        };
        let Some(slot) = guild.member_index(account_id, char_id) else {
            debug!(guild_id, account_id, "Status for unlisted member dropped");
            return;
        };
        let member = &mut guild.members[slot];
        let level_changed = member.level != level;
        member.level = level;
        member.class = class;
        // A locally attached session is authoritative for presence
        let flipped = member.session.is_none() && member.online != online;
        if flipped {
            member.online = online;
        }
        if level_changed {
            guild.recalc_average_level();
        }
        if flipped {
            self.notify_guild(
                guild_id,
                Notification::MemberOnline {
                    guild_id,
                    account_id,
                    char_id,
                    online,
                },
            );
        }
    }

    fn on_member_rank_changed(&mut self, guild_id: GuildId, account_id: AccountId, char_id: CharId, rank: usize) {
        let Some(guild) = self.guilds.lookup_mut(guild_id) else {
            return;
        };
        let Some(slot) = guild.member_index(account_id, char_id) else {
            return;
        };
        guild.members[slot].rank = rank.min(MAX_GUILD_RANKS - 1);
        self.push_roster(guild_id);
    }

    pub(super) fn push_roster(&mut self, guild_id: GuildId) {
        let Some(member_count) = self.guilds.lookup(guild_id).map(Guild::member_count) else {
            return;
        };
        self.notify_guild(guild_id, Notification::Roster { guild_id, member_count });
    }

    // =====================================================
    // Ranks, notice, emblem, skills
    // =====================================================

    fn on_rank_changed(&mut self, guild_id: GuildId, index: usize, rank: GuildRank) {
        let Some(guild) = self.guilds.lookup_mut(guild_id) else {
            return;
        };
        let Some(entry) = guild.ranks.get_mut(index) else {
            warn!(guild_id, index, "Rank index out of range in reply");
            return;
        };
        *entry = rank;
        self.notify_guild(guild_id, Notification::Ranks { guild_id });
    }

    fn on_notice_changed(&mut self, guild_id: GuildId, notice: GuildNotice) {
        let Some(guild) = self.guilds.lookup_mut(guild_id) else {
            return;
        };
        guild.notice = notice.clone();
        self.notify_guild(
            guild_id,
            Notification::Notice {
                guild_id,
                title: notice.title,
                body: notice.body,
            },
        );
    }

    fn on_emblem_changed(&mut self, guild_id: GuildId, emblem_id: u32, emblem: Vec<u8>) {
        let Some(guild) = self.guilds.lookup_mut(guild_id) else {
            return;
        };
        guild.emblem_id = emblem_id;
        guild.emblem = emblem;
        self.notify_guild(guild_id, Notification::Emblem { guild_id, emblem_id });
        for castle_id in self.strongholds.owned_by(guild_id) {
            self.refresh_defenders(castle_id);
        }
    }

    fn on_skill_updated(&mut self, guild_id: GuildId, skill_id: u16, level: u16, skill_points: u32) {
        let base = self.config.base_member_capacity;
        let Some(guild) = self.guilds.lookup_mut(guild_id) else {
            return;
        };
        if skill_id != 0 {
            guild.set_skill_level(skill_id, level);
        }
        guild.skill_points = skill_points;
        let capacity_changed = skill_id == GD_EXTENSION && {
            let capacity = (base + level as usize * EXTENSION_SLOTS_PER_LEVEL).min(MAX_GUILD_MEMBERS);
            let changed = guild.max_members != capacity;
            guild.max_members = capacity;
            changed
        };
        self.notify_guild(guild_id, Notification::Skills { guild_id, skill_points });
        if capacity_changed {
            self.notify_guild(guild_id, Notification::BasicInfo { guild_id });
        }
    }

    // =====================================================
    // Master transfer
    // =====================================================

    fn on_master_changed(&mut self, guild_id: GuildId, account_id: AccountId, char_id: CharId) {
        let Some(slot) = self
            .guilds
            .lookup(guild_id)
            .and_then(|g| g.member_index(account_id, char_id))
        else {
            debug!(guild_id, account_id, "Master change for unlisted member, resyncing");
            self.request_guild_info(guild_id);
            return;
        };
        if slot == 0 {
            let settled = self
                .guilds
                .lookup(guild_id)
                .is_some_and(|g| g.master == g.members[0].name);
            if settled {
                debug!(guild_id, account_id, "Master change already applied");
                return;
            }
        } else if !self.guilds.hand_off_master(guild_id, slot) {
            return;
        }
        let Some(guild) = self.guilds.lookup(guild_id) else {
            return;
        };
        let master = guild.master.clone();
        let promoted = guild.members[0].session;
        info!(guild_id, master = %master, "Guild master changed");

        if let Some(session) = promoted {
            let skills = self.config.master_locked_skills.clone();
            self.host
                .lock_skills(session, &skills, self.config.master_skill_lock_ms);
        }
        self.notify_guild(guild_id, Notification::MasterChanged { guild_id, master });
        self.push_roster(guild_id);
        self.notify_guild(guild_id, Notification::BasicInfo { guild_id });
    }

    // =====================================================
    // Relationships
    // =====================================================

    fn on_relation_changed(
        &mut self,
        guild_a: GuildId,
        guild_b: GuildId,
        name_a: String,
        name_b: String,
        kind: RelationKind,
        added: bool,
    ) {
        self.apply_edge(guild_a, guild_b, name_b, kind, added);
        if kind == RelationKind::Alliance {
            self.apply_edge(guild_b, guild_a, name_a, kind, added);
        }
    }

    /// Apply one directed edge on `owner`'s side, if `owner` is replicated here
    fn apply_edge(&mut self, owner: GuildId, other: GuildId, other_name: String, kind: RelationKind, added: bool) {
        let Some(guild) = self.guilds.lookup_mut(owner) else {
            return;
        };
        let changed = if added {
            let inserted = guild.add_relation(other, other_name.clone(), kind);
            if !inserted && !guild.has_relation(other, kind) {
                warn!(guild_id = owner, other, ?kind, "Relationship table full, edge dropped");
            }
            inserted
        } else {
            guild.remove_relation(other, kind)
        };
        if changed {
            self.notify_guild(
                owner,
                Notification::RelationChanged {
                    guild_id: owner,
                    other_id: other,
                    other_name,
                    kind,
                    added,
                },
            );
        }
    }

    // =====================================================
    // Disband
    // =====================================================

    fn on_disbanded(&mut self, guild_id: GuildId) {
        info!(guild_id, "Guild disbanded");

        let others: Vec<GuildId> = self
            .guilds
            .iter()
            .filter(|g| g.id != guild_id && g.relations.iter().any(|r| r.guild_id == guild_id))
            .map(|g| g.id)
            .collect();
        for other in others {
            let removed: Vec<_> = self
                .guilds
                .lookup(other)
                .map(|g| {
                    g.relations
                        .iter()
                        .filter(|r| r.guild_id == guild_id)
                        .map(|r| (r.kind, r.name.clone()))
                        .collect()
                })
                .unwrap_or_default();
            for (kind, name) in removed {
                self.apply_edge(other, guild_id, name, kind, false);
            }
        }

        for castle_id in self.strongholds.owned_by(guild_id) {
            if let Err(err) = self.apply_stronghold_field(castle_id, crate::stronghold::StrongholdField::Owner, 0) {
                warn!(castle_id, %err, "Failed to clear stronghold owner");
            }
        }

        let members = self
            .guilds
            .lookup(guild_id)
            .map(Guild::attached_sessions)
            .unwrap_or_default();
        for session in members {
            self.host.close_guild_storage(session);
            self.host.set_session_guild(session, 0);
            self.notify(session, Notification::Disbanded { guild_id });
        }

        self.guilds.remove(guild_id);
        self.exp_pool.discard_guild(guild_id);
        self.guild_events.take(&guild_id);
        self.invites.retain(|_, invite| invite.guild_id != guild_id);
        self.relation_requests.retain(|_, req| req.from_guild != guild_id);
    }

    fn on_stronghold_field(&mut self, castle_id: u32, index: u32, value: u32) {
        let Some(field) = crate::stronghold::StrongholdField::from_index(index) else {
            warn!(castle_id, index, "Unknown stronghold field index in reply");
            return;
        };
        match self.apply_stronghold_field(castle_id, field, value) {
            Ok(()) => self.strongholds.mark_persisted(castle_id, field),
            Err(err) => warn!(castle_id, %err, "Stronghold field reply dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{GuildConfig, StaticData};
    use crate::constants::{GD_BATTLEORDER, MASTER_RANK};
    use crate::engine::GuildEngine;
    use crate::guild::{Guild, GuildMember, RelationKind};
    use crate::ports::Notification;
    use crate::protocol::{AuthorityReply, StrongholdSnapshot};
    use crate::stronghold::StrongholdDef;
    use crate::testutil::TestHost;

    fn member(account_id: u32, name: &str, rank: usize) -> GuildMember {
        GuildMember {
            account_id,
            char_id: account_id * 10,
            name: name.into(),
            rank,
            level: 40,
            ..Default::default()
        }
    }

    fn wolves() -> Guild {
        let mut guild = Guild::founded(7, "Wolves".into(), member(1, "Alpha", 0), 16);
        guild.members[1] = member(2, "Beta", 4);
        guild.members[2] = member(3, "Gamma", 6);
        guild
    }

    fn engine() -> (GuildEngine<TestHost>, [u64; 3]) {
        let mut host = TestHost::new();
        let sessions = [
            host.add_session(1, 10, "Alpha", 7),
            host.add_session(2, 20, "Beta", 7),
            host.add_session(3, 30, "Gamma", 7),
        ];
        let data = StaticData {
            castles: vec![StrongholdDef {
                id: 3,
                zone: "gefg_cas03".into(),
                name: "Yesnelph".into(),
                event: "Agit#gefg_cas03".into(),
            }],
            ..Default::default()
        };
        (GuildEngine::new(host, GuildConfig::default(), data), sessions)
    }

    #[test]
    fn test_first_snapshot_pushes_full_info_to_attached_members() {
        let (mut engine, [alpha, ..]) = engine();
        engine.handle_reply(AuthorityReply::GuildInfo(wolves()));
        let pushed = engine.host().notifications_for(alpha);
        assert_eq!(pushed.len(), 7);
        assert!(matches!(pushed[1], Notification::Roster { member_count: 3, .. }));
    }

    #[test]
    fn test_repeated_snapshot_pushes_nothing() {
        let (mut engine, _) = engine();
        engine.handle_reply(AuthorityReply::GuildInfo(wolves()));
        engine.host_mut().take_notifications();
        engine.handle_reply(AuthorityReply::GuildInfo(wolves()));
        assert!(engine.host().notifications.is_empty());
    }

    #[test]
    fn test_stray_session_is_corrected_on_first_snapshot() {
        let (mut engine, _) = engine();
        let stray = engine.host_mut().add_session(9, 90, "Stray", 7);
        engine.handle_reply(AuthorityReply::GuildInfo(wolves()));
        assert_eq!(engine.host().sessions[&stray].guild_id, 0);
    }

    #[test]
    fn test_member_removed_notifies_one_and_closes_storage() {
        let (mut engine, [_, beta, _]) = engine();
        engine.handle_reply(AuthorityReply::GuildInfo(wolves()));
        engine.host_mut().take_notifications();

        engine.handle_reply(AuthorityReply::MemberRemoved {
            guild_id: 7,
            account_id: 2,
            char_id: 20,
            name: "Beta".into(),
            reason: "inactive".into(),
            expelled: true,
        });
        let left = engine
            .host()
            .notifications
            .iter()
            .filter(|(_, n)| matches!(n, Notification::MemberLeft { .. }))
            .count();
        assert_eq!(left, 1);
        assert_eq!(engine.host().closed_storage, vec![beta]);
        assert_eq!(engine.host().sessions[&beta].guild_id, 0);
        assert_eq!(engine.lookup(7).unwrap().member_count(), 2);
        assert!(engine.lookup(7).unwrap().members[1].is_empty());
    }

    #[test]
    fn test_master_change_swaps_and_locks_skills() {
        let (mut engine, [_, _, gamma]) = engine();
        engine.handle_reply(AuthorityReply::GuildInfo(wolves()));
        engine.handle_reply(AuthorityReply::MasterChanged {
            guild_id: 7,
            account_id: 3,
            char_id: 30,
        });
        let guild = engine.lookup(7).unwrap();
        assert_eq!(guild.members[0].name, "Gamma");
        assert_eq!(guild.members[0].rank, MASTER_RANK);
        assert_eq!(guild.members[2].rank, 6);
        let (session, skills, duration) = &engine.host().skill_locks[0];
        assert_eq!(*session, gamma);
        assert!(skills.contains(&GD_BATTLEORDER));
        assert_eq!(*duration, 300_000);
    }

    #[test]
    fn test_disband_cascades_relations_and_ownership() {
        let (mut engine, [alpha, ..]) = engine();
        let mut other = Guild::founded(8, "Bears".into(), member(4, "Delta", 0), 16);
        other.add_relation(7, "Wolves".into(), RelationKind::Alliance);
        other.add_relation(7, "Wolves".into(), RelationKind::Opposition);
        engine.handle_reply(AuthorityReply::GuildInfo(other));
        engine.handle_reply(AuthorityReply::GuildInfo(wolves()));
        engine.handle_reply(AuthorityReply::StrongholdData(vec![StrongholdSnapshot {
            castle_id: 3,
            owner: 7,
            ..Default::default()
        }]));
        engine.host_mut().defender_refreshes.clear();

        engine.handle_reply(AuthorityReply::Disbanded { guild_id: 7 });

        assert!(engine.lookup(7).is_none());
        assert!(engine.lookup(8).unwrap().relations.is_empty());
        assert_eq!(engine.strongholds().lookup(3).unwrap().owner, 0);
        assert_eq!(engine.host().defender_refreshes, vec![("gefg_cas03".to_string(), 0)]);
        assert!(engine.host().closed_storage.contains(&alpha));
        assert_eq!(engine.host().sessions[&alpha].guild_id, 0);
    }

    #[test]
    fn test_guild_missing_clears_claimants() {
        let (mut engine, [alpha, ..]) = engine();
        engine.session_connected(alpha);
        assert!(engine.is_awaiting_info(7));
        engine.handle_reply(AuthorityReply::GuildInfoMissing { guild_id: 7 });
        assert!(!engine.is_awaiting_info(7));
        assert_eq!(engine.host().sessions[&alpha].guild_id, 0);
    }

    #[test]
    fn test_member_status_for_remote_member() {
        let (mut engine, [alpha, beta, gamma]) = engine();
        engine.host_mut().remove_session(gamma);
        engine.handle_reply(AuthorityReply::GuildInfo(wolves()));
        engine.host_mut().take_notifications();

        engine.handle_reply(AuthorityReply::MemberStatus {
            guild_id: 7,
            account_id: 3,
            char_id: 30,
            online: true,
            level: 60,
            class: 4,
        });
        assert!(engine.lookup(7).unwrap().members[2].online);
        assert_eq!(engine.host().notifications_for(alpha).len(), 1);
        assert_eq!(engine.host().notifications_for(beta).len(), 1);
    }

    #[test]
    fn test_repeated_master_change_is_ignored() {
        let (mut engine, [alpha, beta, gamma]) = engine();
        engine.handle_reply(AuthorityReply::GuildInfo(wolves()));
        let change = AuthorityReply::MasterChanged {
            guild_id: 7,
            account_id: 3,
            char_id: 30,
        };
        engine.handle_reply(change.clone());
        engine.host_mut().take_notifications();

        engine.handle_reply(change);
        assert_eq!(engine.host().skill_locks.len(), 1);
        assert_eq!(engine.host().skill_locks[0].0, gamma);
        assert!(engine.host().notifications_for(alpha).is_empty());
        assert!(engine.host().notifications_for(beta).is_empty());
        assert_eq!(engine.lookup(7).unwrap().master, "Gamma");
    }

    #[test]
    fn test_created_reply_leaves_founder_who_joined_elsewhere() {
        let mut host = TestHost::new();
        let founder = host.add_session(5, 50, "Echo", 0);
        host.session_mut(founder).unwrap().has_creation_token = true;
        let mut engine = GuildEngine::new(host, GuildConfig::default(), StaticData::default());

        // Joined guild 8 while the creation was in flight
        engine.host_mut().session_mut(founder).unwrap().guild_id = 8;
        engine.handle_reply(AuthorityReply::Created {
            account_id: 5,
            char_id: 50,
            guild_id: Some(12),
        });

        let session = &engine.host().sessions[&founder];
        assert_eq!(session.guild_id, 8);
        assert!(session.has_creation_token);
        assert!(engine.host().requests.is_empty());
    }
}
