//! Master-only administration and experience contributions.

use tracing::debug;

use super::GuildEngine;
use crate::constants::{
    MASTER_RANK, MAX_GUILD_RANKS, MAX_NOTICE_BODY_LEN, MAX_NOTICE_TITLE_LEN, PERM_EXPEL,
    PERM_INVITE,
};
use crate::error::GuildError;
use crate::exp_pool::{taxed_amount, ExpKey};
use crate::guild::{GuildNotice, GuildRank};
use crate::ports::WorldHost;
use crate::protocol::AuthorityRequest;
use crate::types::{AccountId, CharId, GuildId, SessionId};

impl<H: WorldHost> GuildEngine<H> {
    /// Hand mastership to another member
    pub fn change_master(
        &mut self,
        session: SessionId,
        account_id: AccountId,
        char_id: CharId,
    ) -> Result<(), GuildError> {
        let (info, guild_id) = self.master_context(session)?;
        if info.account_id == account_id && info.char_id == char_id {
            return Err(GuildError::TargetNotFound);
        }
        let listed = self
            .guilds
            .lookup(guild_id)
            .and_then(|g| g.member_index(account_id, char_id))
            .is_some();
        if !listed {
            return Err(GuildError::TargetNotFound);
        }
        self.send(AuthorityRequest::ChangeMaster {
            guild_id,
            account_id,
            char_id,
        });
        Ok(())
    }

    /// Disband. The master must be the only member left.
    pub fn disband(&mut self, session: SessionId) -> Result<(), GuildError> {
        let (info, guild_id) = self.master_context(session)?;
        let alone = self.guilds.lookup(guild_id).is_some_and(|g| {
            g.members
                .iter()
                .filter(|m| !m.is_empty())
                .all(|m| m.is(info.account_id, info.char_id))
        });
        if !alone {
            return Err(GuildError::MembersRemain);
        }
        self.send(AuthorityRequest::Disband { guild_id });
        Ok(())
    }

    /// Rewrite one entry of the rank table
    pub fn change_rank(
        &mut self,
        session: SessionId,
        index: usize,
        mut rank: GuildRank,
    ) -> Result<(), GuildError> {
        let (_, guild_id) = self.master_context(session)?;
        if index >= MAX_GUILD_RANKS {
            return Err(GuildError::RankOutOfRange(index));
        }
        if rank.exp_tax > self.config.max_exp_tax {
            return Err(GuildError::TaxTooHigh(rank.exp_tax));
        }
        if index == MASTER_RANK {
            rank.mode |= PERM_INVITE | PERM_EXPEL;
        }
        self.send(AuthorityRequest::ChangeRank {
            guild_id,
            index,
            rank,
        });
        Ok(())
    }

    /// Move a member to another rank. Rank 0 is only reachable by transfer.
    pub fn assign_rank(
        &mut self,
        session: SessionId,
        account_id: AccountId,
        char_id: CharId,
        rank: usize,
    ) -> Result<(), GuildError> {
        let (_, guild_id) = self.master_context(session)?;
        if rank == MASTER_RANK || rank >= MAX_GUILD_RANKS {
            return Err(GuildError::RankOutOfRange(rank));
        }
        let slot = self
            .guilds
            .lookup(guild_id)
            .and_then(|g| g.member_index(account_id, char_id))
            .ok_or(GuildError::TargetNotFound)?;
        if slot == 0 {
            return Err(GuildError::NoPermission);
        }
        self.send(AuthorityRequest::AssignRank {
            guild_id,
            account_id,
            char_id,
            rank,
        });
        Ok(())
    }

    pub fn change_notice(&mut self, session: SessionId, title: &str, body: &str) -> Result<(), GuildError> {
        let (_, guild_id) = self.master_context(session)?;
        if title.len() > MAX_NOTICE_TITLE_LEN || body.len() > MAX_NOTICE_BODY_LEN {
            return Err(GuildError::NoticeTooLong);
        }
        self.send(AuthorityRequest::ChangeNotice {
            guild_id,
            notice: GuildNotice {
                title: title.to_string(),
                body: body.to_string(),
            },
        });
        Ok(())
    }

    pub fn change_emblem(&mut self, session: SessionId, emblem: Vec<u8>) -> Result<(), GuildError> {
        let (_, guild_id) = self.master_context(session)?;
        if emblem.len() > self.config.emblem_max_bytes {
            return Err(GuildError::EmblemTooLarge(emblem.len()));
        }
        self.send(AuthorityRequest::ChangeEmblem { guild_id, emblem });
        Ok(())
    }

    /// Spend one skill point, subject to the prerequisite tree
    pub fn learn_skill(&mut self, session: SessionId, skill_id: u16) -> Result<(), GuildError> {
        let (_, guild_id) = self.master_context(session)?;
        let guild = self
            .guilds
            .lookup(guild_id)
            .ok_or(GuildError::UnknownGuild(guild_id))?;
        self.skill_tree.check_learnable(guild, skill_id)?;
        let max_level = self.skill_tree.max_level(skill_id);
        self.send(AuthorityRequest::SkillUp {
            guild_id,
            skill_id,
            max_level,
        });
        Ok(())
    }

    // =====================================================
    // Experience
    // =====================================================

    /// Buffer a member's contribution at their rank's tax.
    ///
    /// Returns the amount credited to the guild, which the caller can show
    /// right away; the authority sees it on the next flush.
    pub fn contribute_exp(
        &mut self,
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
        amount: u64,
    ) -> Result<u64, GuildError> {
        let guild = self
            .guilds
            .lookup(guild_id)
            .ok_or(GuildError::UnknownGuild(guild_id))?;
        let slot = guild
            .member_index(account_id, char_id)
            .ok_or(GuildError::NotInGuild)?;
        let tax = guild.rank_of(slot).map(|r| r.exp_tax).unwrap_or(0);
        let accepted = taxed_amount(amount, tax);
        if accepted == 0 {
            return Ok(0);
        }
        let key = ExpKey {
            guild_id,
            account_id,
            char_id,
        };
        let total = self.exp_pool.contribute(key, accepted)?;
        debug!(guild_id, account_id, accepted, total, "Buffered guild experience");
        Ok(accepted)
    }

    /// [`Self::contribute_exp`] for the member behind `session`
    pub fn contribute_exp_from(&mut self, session: SessionId, amount: u64) -> Result<u64, GuildError> {
        let (info, guild_id, _) = self.member_context(session)?;
        self.contribute_exp(guild_id, info.account_id, info.char_id, amount)
    }
}
