//! Player-facing action surface.
//!
//! Hosts that receive guild commands from clients (the server bridge, test
//! drivers) turn them into a [`GuildAction`] and call [`GuildEngine::dispatch`].
//! A rejected action is answered to the requester with its reason code.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::GuildEngine;
use crate::error::GuildError;
use crate::guild::{GuildRank, RelationKind};
use crate::ports::WorldHost;
use crate::types::{AccountId, CharId, GuildId, SessionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GuildAction {
    Create { name: String },
    Invite { target: SessionId },
    AnswerInvite { accept: bool },
    Leave { reason: String },
    Expel { account_id: AccountId, char_id: CharId, reason: String },
    RequestAlliance { target: SessionId },
    AnswerAlliance { accept: bool },
    DeclareOpposition { target: SessionId },
    BreakRelation { guild_id: GuildId, kind: RelationKind },
    ChangeMaster { account_id: AccountId, char_id: CharId },
    Disband,
    ChangeRank { index: usize, rank: GuildRank },
    AssignRank { account_id: AccountId, char_id: CharId, rank: usize },
    ChangeNotice { title: String, body: String },
    ChangeEmblem { emblem: Vec<u8> },
    LearnSkill { skill_id: u16 },
    ContributeExp { amount: u64 },
}

impl GuildAction {
    pub fn name(&self) -> &'static str {
        match self {
            GuildAction::Create { .. } => "create",
            GuildAction::Invite { .. } => "invite",
            GuildAction::AnswerInvite { .. } => "answer_invite",
            GuildAction::Leave { .. } => "leave",
            GuildAction::Expel { .. } => "expel",
            GuildAction::RequestAlliance { .. } => "request_alliance",
            GuildAction::AnswerAlliance { .. } => "answer_alliance",
            GuildAction::DeclareOpposition { .. } => "declare_opposition",
            GuildAction::BreakRelation { .. } => "break_relation",
            GuildAction::ChangeMaster { .. } => "change_master",
            GuildAction::Disband => "disband",
            GuildAction::ChangeRank { .. } => "change_rank",
            GuildAction::AssignRank { .. } => "assign_rank",
            GuildAction::ChangeNotice { .. } => "change_notice",
            GuildAction::ChangeEmblem { .. } => "change_emblem",
            GuildAction::LearnSkill { .. } => "learn_skill",
            GuildAction::ContributeExp { .. } => "contribute_exp",
        }
    }
}

impl<H: WorldHost> GuildEngine<H> {
    /// Run one player action on behalf of `session`
    pub fn dispatch(&mut self, session: SessionId, action: GuildAction) -> Result<(), GuildError> {
        let name = action.name();
        let result = match action {
            GuildAction::Create { name } => self.create_guild(session, &name),
            GuildAction::Invite { target } => self.invite(session, target),
            GuildAction::AnswerInvite { accept } => self.answer_invite(session, accept),
            GuildAction::Leave { reason } => self.leave(session, &reason),
            GuildAction::Expel {
                account_id,
                char_id,
                reason,
            } => self.expel(session, account_id, char_id, &reason),
            GuildAction::RequestAlliance { target } => self.request_alliance(session, target),
            GuildAction::AnswerAlliance { accept } => self.answer_alliance(session, accept),
            GuildAction::DeclareOpposition { target } => self.declare_opposition(session, target),
            GuildAction::BreakRelation { guild_id, kind } => self.break_relation(session, guild_id, kind),
            GuildAction::ChangeMaster { account_id, char_id } => {
                self.change_master(session, account_id, char_id)
            }
            GuildAction::Disband => self.disband(session),
            GuildAction::ChangeRank { index, rank } => self.change_rank(session, index, rank),
            GuildAction::AssignRank {
                account_id,
                char_id,
                rank,
            } => self.assign_rank(session, account_id, char_id, rank),
            GuildAction::ChangeNotice { title, body } => self.change_notice(session, &title, &body),
            GuildAction::ChangeEmblem { emblem } => self.change_emblem(session, emblem),
            GuildAction::LearnSkill { skill_id } => self.learn_skill(session, skill_id),
            GuildAction::ContributeExp { amount } => self.contribute_exp_from(session, amount).map(|_| ()),
        };
        if let Err(err) = &result {
            debug!(session, action = name, %err, "Guild action rejected");
            self.stats.actions_rejected += 1;
            self.reject(session, err);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GuildConfig, StaticData};
    use crate::ports::Notification;
    use crate::testutil::TestHost;

    #[test]
    fn test_rejection_is_reported_to_requester() {
        let mut host = TestHost::new();
        let session = host.add_session(1, 10, "Alpha", 0);
        let mut engine = GuildEngine::new(host, GuildConfig::default(), StaticData::default());

        let result = engine.dispatch(session, GuildAction::Leave { reason: "bye".into() });
        assert_eq!(result, Err(GuildError::NotInGuild));
        assert_eq!(engine.stats().actions_rejected, 1);
        assert_eq!(
            engine.host().notifications_for(session),
            vec![&Notification::Rejected {
                code: GuildError::NotInGuild.code(),
                reason: GuildError::NotInGuild.to_string(),
            }]
        );
    }

    #[test]
    fn test_action_json_shape() {
        let action: GuildAction =
            serde_json::from_str(r#"{"action": "create", "name": "Wolves"}"#).unwrap();
        assert_eq!(action, GuildAction::Create { name: "Wolves".into() });
        let disband = serde_json::to_string(&GuildAction::Disband).unwrap();
        assert_eq!(disband, r#"{"action":"disband"}"#);
    }
}
