//! Alliance and opposition management.
//!
//! Alliances are two-sided: the target guild's master has to accept, and the
//! authority's single confirmation is applied by both sides. Oppositions are
//! one-sided and need no answer. Caps are checked against the current tables
//! at request time and again at acceptance.

use super::{GuildEngine, PendingRelation};
use crate::error::GuildError;
use crate::guild::RelationKind;
use crate::ports::{Notification, WorldHost};
use crate::protocol::AuthorityRequest;
use crate::types::{GuildId, SessionId};

impl<H: WorldHost> GuildEngine<H> {
    /// Ask the master behind `target` to ally with the requester's guild
    pub fn request_alliance(&mut self, session: SessionId, target: SessionId) -> Result<(), GuildError> {
        let (_, guild_id) = self.master_context(session)?;
        let other_id = self.target_master_guild(guild_id, target)?;
        self.check_relation_room(guild_id, other_id, RelationKind::Alliance)?;
        if self.relation_requests.contains_key(&target) {
            return Err(GuildError::TargetBusy);
        }
        let guild_name = self
            .guilds
            .lookup(guild_id)
            .map(|g| g.name.clone())
            .unwrap_or_default();

        self.relation_requests.insert(
            target,
            PendingRelation {
                from_guild: guild_id,
                from_session: session,
                kind: RelationKind::Alliance,
                issued_at_ms: self.clock_ms,
            },
        );
        self.notify(
            target,
            Notification::RelationPrompt {
                guild_id,
                guild_name,
                kind: RelationKind::Alliance,
            },
        );
        Ok(())
    }

    /// Answer the alliance request held by `session`
    pub fn answer_alliance(&mut self, session: SessionId, accept: bool) -> Result<(), GuildError> {
        let request = self
            .relation_requests
            .remove(&session)
            .ok_or(GuildError::NoPendingRequest)?;
        self.notify(
            request.from_session,
            Notification::RelationAnswered {
                kind: request.kind,
                accepted: accept,
            },
        );
        if !accept {
            return Ok(());
        }
        let (_, guild_id) = self.master_context(session)?;
        // Either side may have filled up while the request was pending
        self.check_relation_room(request.from_guild, guild_id, request.kind)?;
        self.send(AuthorityRequest::AddRelation {
            guild_id: request.from_guild,
            other_id: guild_id,
            kind: request.kind,
        });
        Ok(())
    }

    /// Declare the guild behind `target` hostile. One-sided, no answer needed.
    pub fn declare_opposition(&mut self, session: SessionId, target: SessionId) -> Result<(), GuildError> {
        let (_, guild_id) = self.master_context(session)?;
        let target_info = self
            .live_session(target)
            .map_err(|_| GuildError::TargetNotFound)?;
        let other_id = target_info.guild_id;
        if other_id == 0 {
            return Err(GuildError::TargetNotFound);
        }
        if other_id == guild_id {
            return Err(GuildError::SameGuild);
        }
        let guild = self
            .guilds
            .lookup(guild_id)
            .ok_or(GuildError::UnknownGuild(guild_id))?;
        if guild.has_relation(other_id, RelationKind::Opposition) {
            return Err(GuildError::AlreadyRelated);
        }
        if guild.relation_count(RelationKind::Opposition) >= RelationKind::Opposition.cap() {
            return Err(GuildError::RelationCapReached {
                kind: RelationKind::Opposition,
            });
        }
        self.send(AuthorityRequest::AddRelation {
            guild_id,
            other_id,
            kind: RelationKind::Opposition,
        });
        Ok(())
    }

    /// Break exactly the `(other, kind)` edge
    pub fn break_relation(
        &mut self,
        session: SessionId,
        other_id: GuildId,
        kind: RelationKind,
    ) -> Result<(), GuildError> {
        let (_, guild_id) = self.master_context(session)?;
        let related = self
            .guilds
            .lookup(guild_id)
            .is_some_and(|g| g.has_relation(other_id, kind));
        if !related {
            return Err(GuildError::RelationNotFound);
        }
        self.send(AuthorityRequest::RemoveRelation {
            guild_id,
            other_id,
            kind,
        });
        Ok(())
    }

    /// Guild id of `target`, which must be another guild's master
    fn target_master_guild(&self, own: GuildId, target: SessionId) -> Result<GuildId, GuildError> {
        let info = self
            .live_session(target)
            .map_err(|_| GuildError::TargetNotFound)?;
        if info.guild_id == 0 {
            return Err(GuildError::TargetNotFound);
        }
        if info.guild_id == own {
            return Err(GuildError::SameGuild);
        }
        let other = self
            .guilds
            .lookup(info.guild_id)
            .ok_or(GuildError::UnknownGuild(info.guild_id))?;
        if other.master != info.name {
            return Err(GuildError::NotMaster);
        }
        Ok(info.guild_id)
    }

    /// Both sides must have room for one more edge of `kind`
    fn check_relation_room(&self, a: GuildId, b: GuildId, kind: RelationKind) -> Result<(), GuildError> {
        for (id, other) in [(a, b), (b, a)] {
            let guild = self.guilds.lookup(id).ok_or(GuildError::UnknownGuild(id))?;
            if guild.has_relation(other, kind) {
                return Err(GuildError::AlreadyRelated);
            }
            if guild.relation_count(kind) >= kind.cap() {
                return Err(GuildError::RelationCapReached { kind });
            }
        }
        Ok(())
    }
}
