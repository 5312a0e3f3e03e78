//! Periodic maintenance driven by `tick`.
//!
//! - exp flush: drain the coalescing pool into `SetMemberExp` writes
//! - position push: tell online guildmates in the same zone where you moved
//! - stronghold persistence: save owner / defender hp fields that drifted
//! - request sweep: expire unanswered invites and alliance requests, resend
//!   lost info and field loads that still have deferred work waiting

use std::collections::HashMap;

use tracing::debug;

use super::GuildEngine;
use crate::config::GuildConfig;
use crate::guild::SeenPosition;
use crate::ports::{Notification, WorldHost};
use crate::protocol::AuthorityRequest;
use crate::types::{AccountId, CharId, GuildId, SessionId};

/// Fixed-period timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub period_ms: u64,
    next_due_ms: u64,
}

impl Interval {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            next_due_ms: period_ms,
        }
    }

    /// `true` once per elapsed period. Missed periods collapse into one run.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if now_ms < self.next_due_ms {
            return false;
        }
        self.next_due_ms = now_ms + self.period_ms;
        true
    }
}

#[derive(Debug, Clone)]
pub struct JobSchedule {
    pub exp_flush: Interval,
    pub position_push: Interval,
    pub stronghold_persist: Interval,
    pub request_sweep: Interval,
}

impl JobSchedule {
    pub fn from_config(config: &GuildConfig) -> Self {
        Self {
            exp_flush: Interval::new(config.exp_flush_interval_ms),
            position_push: Interval::new(config.position_push_interval_ms),
            stronghold_persist: Interval::new(config.stronghold_persist_interval_ms),
            request_sweep: Interval::new(config.request_sweep_interval_ms),
        }
    }
}

impl<H: WorldHost> GuildEngine<H> {
    /// Advance the engine clock and run whichever jobs are due
    pub fn tick(&mut self, now_ms: u64) {
        self.clock_ms = self.clock_ms.max(now_ms);
        let now = self.clock_ms;
        if self.schedule.request_sweep.poll(now) {
            self.sweep_requests();
        }
        if self.schedule.exp_flush.poll(now) {
            self.flush_exp();
        }
        if self.schedule.position_push.poll(now) {
            self.push_positions();
        }
        if self.schedule.stronghold_persist.poll(now) {
            self.persist_strongholds();
        }
    }

    /// Drain every pooled record into the member tables and the authority.
    ///
    /// Records whose guild or member is gone are discarded. Returns the
    /// number of writes sent.
    pub fn flush_exp(&mut self) -> usize {
        let records = self.exp_pool.drain();
        let mut writes = Vec::with_capacity(records.len());
        for record in records {
            let key = record.key;
            let Some(guild) = self.guilds.lookup_mut(key.guild_id) else {
                debug!(guild_id = key.guild_id, "Discarding exp for unknown guild");
                continue;
            };
            let Some(slot) = guild.member_index(key.account_id, key.char_id) else {
                debug!(guild_id = key.guild_id, account_id = key.account_id, "Discarding exp for departed member");
                continue;
            };
            let member = &mut guild.members[slot];
            member.exp = member.exp.saturating_add(record.exp);
            writes.push(AuthorityRequest::SetMemberExp {
                guild_id: key.guild_id,
                account_id: key.account_id,
                char_id: key.char_id,
                exp: member.exp,
            });
        }
        let count = writes.len();
        self.stats.exp_records_flushed += count as u64;
        for write in writes {
            self.send(write);
        }
        count
    }

    /// Push moved members' positions to online guildmates in the same zone
    pub fn push_positions(&mut self) -> usize {
        let mut moves: Vec<(GuildId, AccountId, CharId, SessionId, SeenPosition)> = Vec::new();
        let mut zones: HashMap<SessionId, String> = HashMap::new();

        for guild_id in self.guilds.ids() {
            self.guilds.reconcile_presence(guild_id, &self.host);
            let Some(guild) = self.guilds.lookup_mut(guild_id) else {
                continue;
            };
            for member in guild.members.iter_mut() {
                let Some(session) = member.session else {
                    continue;
                };
                let Some(info) = self.host.session(session) else {
                    continue;
                };
                zones.insert(session, info.zone.clone());
                let position = SeenPosition {
                    zone: info.zone,
                    x: info.x,
                    y: info.y,
                };
                if member.last_seen.as_ref() == Some(&position) {
                    continue;
                }
                member.last_seen = Some(position.clone());
                moves.push((guild_id, member.account_id, member.char_id, session, position));
            }
        }

        let mut pushed = 0;
        for (guild_id, account_id, char_id, mover, position) in moves {
            let peers: Vec<SessionId> = self
                .guilds
                .lookup(guild_id)
                .map(|g| g.attached_sessions())
                .unwrap_or_default()
                .into_iter()
                .filter(|s| *s != mover && zones.get(s) == Some(&position.zone))
                .collect();
            for peer in peers {
                self.notify(
                    peer,
                    Notification::MemberPosition {
                        guild_id,
                        account_id,
                        char_id,
                        x: position.x,
                        y: position.y,
                    },
                );
                pushed += 1;
            }
        }
        pushed
    }

    /// Persist drifted owner and defender hp fields, one write per field
    pub fn persist_strongholds(&mut self) -> usize {
        let drift = self.strongholds.take_drift();
        let count = drift.len();
        for (castle_id, field, value) in drift {
            self.stats.stronghold_fields_persisted += 1;
            self.send(AuthorityRequest::StrongholdFieldSave {
                castle_id,
                field: field.index(),
                value,
            });
        }
        count
    }

    /// Expire invites and alliance requests older than the configured TTL
    pub fn sweep_requests(&mut self) -> usize {
        let ttl = self.config.request_ttl_ms;
        let now = self.clock_ms;
        let expired = |issued: u64| now.saturating_sub(issued) >= ttl;

        let stale_invites: Vec<_> = self
            .invites
            .iter()
            .filter(|(_, i)| expired(i.issued_at_ms))
            .map(|(target, i)| (*target, i.inviter))
            .collect();
        let stale_relations: Vec<_> = self
            .relation_requests
            .iter()
            .filter(|(_, r)| expired(r.issued_at_ms))
            .map(|(target, r)| (*target, r.from_session, r.kind))
            .collect();

        for (target, inviter) in &stale_invites {
            self.invites.remove(target);
            let name = self.host.session(*target).map(|s| s.name).unwrap_or_default();
            self.notify(
                *inviter,
                Notification::InviteAnswered {
                    target: name,
                    accepted: false,
                },
            );
        }
        for (target, from, kind) in &stale_relations {
            self.relation_requests.remove(target);
            self.notify(
                *from,
                Notification::RelationAnswered {
                    kind: *kind,
                    accepted: false,
                },
            );
        }

        let count = stale_invites.len() + stale_relations.len();
        if count > 0 {
            debug!(expired = count, "Expired unanswered guild requests");
        }
        self.retry_lost_loads();
        count
    }

    /// Info requests and field loads past the TTL are treated as lost. Keys
    /// with deferred work are asked for again, the rest are forgotten so the
    /// next action that needs them sends a fresh request.
    fn retry_lost_loads(&mut self) {
        let lost_guilds: Vec<GuildId> = self
            .awaiting_info
            .iter()
            .filter(|(_, issued)| !self.in_flight(Some(*issued)))
            .map(|(id, _)| *id)
            .collect();
        for guild_id in lost_guilds {
            if self.guild_events.is_pending(&guild_id) {
                debug!(guild_id, "Guild info reply overdue, asking again");
                self.request_guild_info(guild_id);
            } else {
                self.awaiting_info.remove(&guild_id);
            }
        }

        let lost_fields: Vec<_> = self
            .awaiting_fields
            .iter()
            .filter(|(_, issued)| !self.in_flight(Some(*issued)))
            .map(|(key, _)| *key)
            .collect();
        for (castle_id, field) in lost_fields {
            if self.field_events.is_pending(&(castle_id, field)) {
                debug!(castle_id, field = field.index(), "Stronghold field reply overdue, asking again");
                self.request_field(castle_id, field);
            } else {
                self.awaiting_fields.remove(&(castle_id, field));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Interval;
    use crate::config::{GuildConfig, StaticData};
    use crate::engine::GuildEngine;
    use crate::guild::{Guild, GuildMember};
    use crate::ports::Notification;
    use crate::protocol::{AuthorityReply, AuthorityRequest};
    use crate::testutil::TestHost;

    fn member(account_id: u32, name: &str) -> GuildMember {
        GuildMember {
            account_id,
            char_id: account_id * 10,
            name: name.into(),
            rank: if account_id == 1 { 0 } else { 5 },
            ..Default::default()
        }
    }

    fn engine() -> (GuildEngine<TestHost>, u64, u64, u64) {
        let mut host = TestHost::new();
        let a = host.add_session(1, 10, "Alpha", 7);
        let b = host.add_session(2, 20, "Beta", 7);
        let outsider = host.add_session(3, 30, "Gamma", 0);
        let mut engine = GuildEngine::new(host, GuildConfig::default(), StaticData::default());
        let mut guild = Guild::founded(7, "Wolves".into(), member(1, "Alpha"), 16);
        guild.members[1] = member(2, "Beta");
        engine.handle_reply(AuthorityReply::GuildInfo(guild));
        engine.host_mut().take_requests();
        engine.host_mut().take_notifications();
        (engine, a, b, outsider)
    }

    #[test]
    fn test_interval_fires_once_per_period() {
        let mut interval = Interval::new(100);
        assert!(!interval.poll(50));
        assert!(interval.poll(100));
        assert!(!interval.poll(150));
        assert!(interval.poll(450));
        assert!(!interval.poll(500));
    }

    #[test]
    fn test_flush_writes_and_discards_departed() {
        let (mut engine, ..) = engine();
        engine.exp_pool_contribute_raw(7, 2, 20, 30);
        engine.exp_pool_contribute_raw(7, 9, 90, 30);
        assert_eq!(engine.flush_exp(), 1);
        assert_eq!(
            engine.host().requests,
            vec![AuthorityRequest::SetMemberExp {
                guild_id: 7,
                account_id: 2,
                char_id: 20,
                exp: 30
            }]
        );
        assert!(engine.exp_pool().is_empty());
        assert_eq!(engine.flush_exp(), 0);
    }

    #[test]
    fn test_position_push_only_when_moved_and_same_zone() {
        let (mut engine, a, b, _) = engine();
        // first observation of each member counts as a move
        assert_eq!(engine.push_positions(), 2);
        engine.host_mut().take_notifications();
        assert_eq!(engine.push_positions(), 0);

        engine.host_mut().session_mut(a).unwrap().x = 160;
        assert_eq!(engine.push_positions(), 1);
        assert!(matches!(
            engine.host().notifications_for(b)[0],
            Notification::MemberPosition { x: 160, .. }
        ));

        engine.host_mut().session_mut(b).unwrap().zone = "geffen".into();
        engine.host_mut().session_mut(a).unwrap().x = 170;
        engine.host_mut().take_notifications();
        engine.push_positions();
        assert!(engine.host().notifications_for(b).is_empty());
    }

    #[test]
    fn test_sweep_expires_after_ttl() {
        let (mut engine, a, _, outsider) = engine();
        engine.tick(1_000);
        engine.invite(a, outsider).unwrap();
        engine.tick(20_000);
        assert!(engine.pending_invite(outsider).is_some());
        engine.tick(31_000);
        assert!(engine.pending_invite(outsider).is_none());
        assert!(engine.host().notifications_for(a).contains(&&Notification::InviteAnswered {
            target: "Gamma".into(),
            accepted: false
        }));
    }

    #[test]
    fn test_tick_runs_flush_on_schedule() {
        let (mut engine, ..) = engine();
        engine.exp_pool_contribute_raw(7, 2, 20, 5);
        engine.tick(9_999);
        assert_eq!(engine.exp_pool().len(), 1);
        engine.tick(10_000);
        assert!(engine.exp_pool().is_empty());
    }

    impl GuildEngine<TestHost> {
        fn exp_pool_contribute_raw(&mut self, guild_id: u32, account_id: u32, char_id: u32, exp: u64) {
            self.exp_pool
                .contribute(
                    crate::exp_pool::ExpKey {
                        guild_id,
                        account_id,
                        char_id,
                    },
                    exp,
                )
                .unwrap();
        }
    }
}
