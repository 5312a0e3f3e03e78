//! Create, invite, leave, expel, and the session lifecycle hooks.

use tracing::{debug, info};

use super::{member_from_session, GuildEngine, PendingInvite};
use crate::error::GuildError;
use crate::ports::{Notification, WorldHost};
use crate::protocol::AuthorityRequest;
use crate::types::{AccountId, CharId, GuildId, SessionId};

impl<H: WorldHost> GuildEngine<H> {
    /// Found a guild. The creation token is consumed only when the authority
    /// confirms the new id.
    pub fn create_guild(&mut self, session: SessionId, name: &str) -> Result<(), GuildError> {
        let info = self.live_session(session)?;
        if info.guild_id != 0 {
            return Err(GuildError::AlreadyInGuild);
        }
        let name = name.trim();
        if name.is_empty()
            || name.len() > self.config.name_max_len
            || name.chars().any(char::is_control)
        {
            return Err(GuildError::InvalidName);
        }
        if self.guilds.lookup_by_name(name).is_some() {
            return Err(GuildError::NameConflict);
        }
        if !info.has_creation_token {
            return Err(GuildError::NoCreationToken);
        }
        info!(account_id = info.account_id, name, "Requesting guild creation");
        self.send(AuthorityRequest::CreateGuild {
            account_id: info.account_id,
            char_id: info.char_id,
            name: name.to_string(),
            founder: member_from_session(&info),
        });
        Ok(())
    }

    /// Offer membership to another session. Purely local until answered.
    pub fn invite(&mut self, session: SessionId, target: SessionId) -> Result<(), GuildError> {
        let (inviter, guild_id, slot) = self.member_context(session)?;
        let guild = self
            .guilds
            .lookup(guild_id)
            .ok_or(GuildError::UnknownGuild(guild_id))?;
        if !guild.rank_of(slot).is_some_and(|r| r.can_invite()) {
            return Err(GuildError::NoPermission);
        }
        let invitee = self
            .live_session(target)
            .map_err(|_| GuildError::TargetNotFound)?;
        if invitee.guild_id != 0 {
            return Err(GuildError::TargetHasGuild);
        }
        if self.invites.contains_key(&target) {
            return Err(GuildError::TargetBusy);
        }
        if self.siege_active && invitee.in_siege_zone {
            return Err(GuildError::TargetInSiegeZone);
        }
        if guild.free_slot().is_none() {
            return Err(GuildError::GuildFull);
        }
        let guild_name = guild.name.clone();

        self.invites.insert(
            target,
            PendingInvite {
                guild_id,
                inviter: session,
                issued_at_ms: self.clock_ms,
            },
        );
        self.notify(
            target,
            Notification::InvitePrompt {
                guild_id,
                guild_name,
                inviter: inviter.name,
            },
        );
        Ok(())
    }

    /// Answer the invite held by `session`. Rejection only informs the inviter.
    pub fn answer_invite(&mut self, session: SessionId, accept: bool) -> Result<(), GuildError> {
        let invite = self
            .invites
            .remove(&session)
            .ok_or(GuildError::NoPendingRequest)?;
        let invitee = self.live_session(session)?;
        self.notify(
            invite.inviter,
            Notification::InviteAnswered {
                target: invitee.name.clone(),
                accepted: accept,
            },
        );
        if !accept {
            return Ok(());
        }
        if invitee.guild_id != 0 {
            return Err(GuildError::AlreadyInGuild);
        }
        let guild = self
            .guilds
            .lookup(invite.guild_id)
            .ok_or(GuildError::UnknownGuild(invite.guild_id))?;
        // Capacity may have changed since the invite went out
        if guild.free_slot().is_none() {
            return Err(GuildError::GuildFull);
        }
        self.send(AuthorityRequest::AddMember {
            guild_id: invite.guild_id,
            member: member_from_session(&invitee),
        });
        Ok(())
    }

    /// Leave voluntarily. The master must hand off or disband instead.
    pub fn leave(&mut self, session: SessionId, reason: &str) -> Result<(), GuildError> {
        let (info, guild_id, slot) = self.member_context(session)?;
        let is_master = slot == 0
            || self
                .guilds
                .lookup(guild_id)
                .is_some_and(|g| g.master == info.name);
        if is_master {
            return Err(GuildError::MasterCannotLeave);
        }
        self.send(AuthorityRequest::RemoveMember {
            guild_id,
            account_id: info.account_id,
            char_id: info.char_id,
            reason: reason.to_string(),
            expelled: false,
        });
        Ok(())
    }

    pub fn expel(
        &mut self,
        session: SessionId,
        account_id: AccountId,
        char_id: CharId,
        reason: &str,
    ) -> Result<(), GuildError> {
        let (_, guild_id, slot) = self.member_context(session)?;
        let guild = self
            .guilds
            .lookup(guild_id)
            .ok_or(GuildError::UnknownGuild(guild_id))?;
        if !guild.rank_of(slot).is_some_and(|r| r.can_expel()) {
            return Err(GuildError::NoPermission);
        }
        let target_slot = guild
            .member_index(account_id, char_id)
            .ok_or(GuildError::TargetNotFound)?;
        if target_slot == 0 || guild.members[target_slot].name == guild.master {
            return Err(GuildError::CannotExpelMaster);
        }
        self.send(AuthorityRequest::RemoveMember {
            guild_id,
            account_id,
            char_id,
            reason: reason.to_string(),
            expelled: true,
        });
        Ok(())
    }

    // =====================================================
    // Session lifecycle
    // =====================================================

    /// A character finished loading into the world
    pub fn session_connected(&mut self, session: SessionId) {
        let Ok(info) = self.live_session(session) else {
            return;
        };
        if info.guild_id == 0 {
            return;
        }
        let guild_id = info.guild_id;
        self.send(AuthorityRequest::MemberOnline {
            guild_id,
            account_id: info.account_id,
            char_id: info.char_id,
            online: true,
        });

        let Some(guild) = self.guilds.lookup(guild_id) else {
            // Pushed to the session once the snapshot lands
            self.request_guild_info(guild_id);
            return;
        };
        if guild.member_index(info.account_id, info.char_id).is_none() {
            debug!(session, guild_id, "Session claims a guild it is not listed in");
            self.host.set_session_guild(session, 0);
            return;
        }

        self.guilds.reconcile_presence(guild_id, &self.host);
        self.push_guild_info(session, guild_id);
        self.notify_guild_except(
            guild_id,
            session,
            Notification::MemberOnline {
                guild_id,
                account_id: info.account_id,
                char_id: info.char_id,
                online: true,
            },
        );
    }

    /// A session is going away. Called while its info is still resolvable.
    pub fn session_closed(&mut self, session: SessionId) {
        self.invites
            .retain(|target, invite| *target != session && invite.inviter != session);
        self.relation_requests
            .retain(|target, req| *target != session && req.from_session != session);

        let Some(info) = self.host.session(session) else {
            return;
        };
        let guild_id = info.guild_id;
        if guild_id == 0 {
            return;
        }
        self.send(AuthorityRequest::MemberOnline {
            guild_id,
            account_id: info.account_id,
            char_id: info.char_id,
            online: false,
        });

        let Some(guild) = self.guilds.lookup_mut(guild_id) else {
            return;
        };
        let Some(member) = guild.members.iter_mut().find(|m| m.session == Some(session)) else {
            return;
        };
        member.session = None;
        member.online = false;
        member.last_seen = None;
        let (account_id, char_id) = (member.account_id, member.char_id);
        self.notify_guild(
            guild_id,
            Notification::MemberOnline {
                guild_id,
                account_id,
                char_id,
                online: false,
            },
        );
    }

    // =====================================================
    // Pushes
    // =====================================================

    /// Everything a client needs to draw the guild window
    pub(super) fn push_guild_info(&mut self, session: SessionId, guild_id: GuildId) {
        let Some(guild) = self.guilds.lookup(guild_id) else {
            return;
        };
        let pushes = [
            Notification::BasicInfo { guild_id },
            Notification::Roster {
                guild_id,
                member_count: guild.member_count(),
            },
            Notification::Ranks { guild_id },
            Notification::Skills {
                guild_id,
                skill_points: guild.skill_points,
            },
            Notification::Notice {
                guild_id,
                title: guild.notice.title.clone(),
                body: guild.notice.body.clone(),
            },
            Notification::Emblem {
                guild_id,
                emblem_id: guild.emblem_id,
            },
            Notification::Relations { guild_id },
        ];
        for push in pushes {
            self.notify(session, push);
        }
    }

    pub(super) fn notify_guild_except(
        &mut self,
        guild_id: GuildId,
        skip: SessionId,
        notification: Notification,
    ) {
        let sessions = self
            .guilds
            .lookup(guild_id)
            .map(|g| g.attached_sessions())
            .unwrap_or_default();
        for session in sessions.into_iter().filter(|s| *s != skip) {
            self.notify(session, notification.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::GuildEngine;
    use crate::error::GuildError;
    use crate::guild::{Guild, GuildMember};
    use crate::ports::Notification;
    use crate::protocol::{AuthorityReply, AuthorityRequest};
    use crate::testutil::TestHost;
    use crate::config::{GuildConfig, StaticData};

    fn engine_with_guild() -> (GuildEngine<TestHost>, u64, u64) {
        let mut host = TestHost::new();
        let master = host.add_session(1, 10, "Alpha", 7);
        let outsider = host.add_session(2, 20, "Beta", 0);
        let mut engine = GuildEngine::new(host, GuildConfig::default(), StaticData::default());
        let founder = GuildMember {
            account_id: 1,
            char_id: 10,
            name: "Alpha".into(),
            level: 50,
            ..Default::default()
        };
        engine.handle_reply(AuthorityReply::GuildInfo(Guild::founded(
            7,
            "Wolves".into(),
            founder,
            16,
        )));
        engine.host_mut().take_requests();
        engine.host_mut().take_notifications();
        (engine, master, outsider)
    }

    #[test]
    fn test_create_requires_token_and_no_guild() {
        let (mut engine, master, outsider) = engine_with_guild();
        assert_eq!(engine.create_guild(master, "Bears"), Err(GuildError::AlreadyInGuild));
        assert_eq!(engine.create_guild(outsider, "Bears"), Err(GuildError::NoCreationToken));
        assert_eq!(engine.create_guild(outsider, ""), Err(GuildError::InvalidName));
        assert_eq!(engine.create_guild(outsider, "wolves"), Err(GuildError::NameConflict));
        assert!(engine.host().requests.is_empty());
    }

    #[test]
    fn test_invite_then_reject_informs_inviter_only() {
        let (mut engine, master, outsider) = engine_with_guild();
        engine.invite(master, outsider).unwrap();
        assert_eq!(engine.invite(master, outsider), Err(GuildError::TargetBusy));

        engine.answer_invite(outsider, false).unwrap();
        assert!(engine.host().requests.is_empty());
        assert!(engine.host().notifications_for(master).contains(&&Notification::InviteAnswered {
            target: "Beta".into(),
            accepted: false
        }));
        assert_eq!(engine.answer_invite(outsider, true), Err(GuildError::NoPendingRequest));
    }

    #[test]
    fn test_invite_blocked_in_siege_zone_during_siege() {
        let (mut engine, master, outsider) = engine_with_guild();
        engine.host_mut().session_mut(outsider).unwrap().in_siege_zone = true;
        assert!(engine.invite(master, outsider).is_ok());
        engine.answer_invite(outsider, false).unwrap();

        engine.start_siege();
        assert_eq!(engine.invite(master, outsider), Err(GuildError::TargetInSiegeZone));
    }

    #[test]
    fn test_invite_requires_permission() {
        let (mut engine, master, outsider) = engine_with_guild();
        engine.invite(master, outsider).unwrap();
        engine.answer_invite(outsider, true).unwrap();
        let requests = engine.host_mut().take_requests();
        let Some(AuthorityRequest::AddMember { member, .. }) = requests.last().cloned() else {
            panic!("expected AddMember, got {requests:?}");
        };
        engine.handle_reply(AuthorityReply::MemberAdded {
            guild_id: 7,
            member,
            ok: true,
        });

        let third = engine.host_mut().add_session(3, 30, "Gamma", 0);
        assert_eq!(engine.invite(outsider, third), Err(GuildError::NoPermission));
    }

    #[test]
    fn test_master_cannot_leave_or_be_expelled() {
        let (mut engine, master, _) = engine_with_guild();
        assert_eq!(engine.leave(master, "bye"), Err(GuildError::MasterCannotLeave));
        assert_eq!(engine.expel(master, 1, 10, "x"), Err(GuildError::CannotExpelMaster));
        assert_eq!(engine.expel(master, 5, 50, "x"), Err(GuildError::TargetNotFound));
    }

    #[test]
    fn test_session_closed_clears_requests_and_presence() {
        let (mut engine, master, outsider) = engine_with_guild();
        engine.invite(master, outsider).unwrap();
        engine.session_closed(master);

        assert!(engine.pending_invite(outsider).is_none());
        let guild = engine.lookup(7).unwrap();
        assert_eq!(guild.members[0].session, None);
        assert!(!guild.members[0].online);
        assert!(engine.host().requests.contains(&AuthorityRequest::MemberOnline {
            guild_id: 7,
            account_id: 1,
            char_id: 10,
            online: false
        }));
    }

    #[test]
    fn test_session_connected_for_unknown_guild_requests_info_once() {
        let mut host = TestHost::new();
        let a = host.add_session(1, 10, "Alpha", 9);
        let b = host.add_session(2, 20, "Beta", 9);
        let mut engine = GuildEngine::new(host, GuildConfig::default(), StaticData::default());
        engine.session_connected(a);
        engine.session_connected(b);

        let info_requests = engine
            .host()
            .requests
            .iter()
            .filter(|r| matches!(r, AuthorityRequest::RequestInfo { guild_id: 9 }))
            .count();
        assert_eq!(info_requests, 1);
        assert!(engine.is_awaiting_info(9));
    }

    #[test]
    fn test_lost_info_reply_does_not_block_later_requests() {
        let mut host = TestHost::new();
        let a = host.add_session(1, 10, "Alpha", 9);
        let b = host.add_session(2, 20, "Beta", 9);
        let mut engine = GuildEngine::new(host, GuildConfig::default(), StaticData::default());
        engine.session_connected(a);

        // No reply; once the TTL passes the next login asks again
        engine.tick(31_000);
        assert!(!engine.is_awaiting_info(9));
        engine.session_connected(b);

        let info_requests = engine
            .host()
            .requests
            .iter()
            .filter(|r| matches!(r, AuthorityRequest::RequestInfo { guild_id: 9 }))
            .count();
        assert_eq!(info_requests, 2);
        assert!(engine.is_awaiting_info(9));
    }
}
