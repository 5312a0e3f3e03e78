//! Loopback Authority - in-process system of record
//!
//! Stands in for the remote guild authority during development and in
//! end-to-end tests. It keeps the canonical guild and stronghold tables and
//! answers each request with the replies the real authority would send.
//! Writes with no reply (experience totals) are simply stored.
//!
//! `handle` is synchronous so tests can drive it directly; `run` wraps it in
//! the async loop the server spawns on tokio.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use guild_core::constants::{GD_EXTENSION, MAX_GUARDIANS, MAX_GUILD_MEMBERS};
use guild_core::guild::{Guild, GuildMember, RelationKind};
use guild_core::protocol::{AuthorityReply, AuthorityRequest, StrongholdSnapshot};
use guild_core::stronghold::{Guardian, StrongholdField};
use guild_core::types::{CastleId, GuildId};

use crate::metrics::ServerMetrics;

/// Member slots gained per extension skill level
const EXTENSION_SLOTS_PER_LEVEL: usize = 10;

#[derive(Debug)]
pub struct LoopbackAuthority {
    guilds: BTreeMap<GuildId, Guild>,
    strongholds: HashMap<CastleId, StrongholdSnapshot>,
    next_guild_id: GuildId,
    next_emblem_id: u32,
    base_member_capacity: usize,
}

impl LoopbackAuthority {
    pub fn new(base_member_capacity: usize) -> Self {
        Self {
            guilds: BTreeMap::new(),
            strongholds: HashMap::new(),
            next_guild_id: 1,
            next_emblem_id: 1,
            base_member_capacity,
        }
    }

    /// Seed a guild record, e.g. from a fixture
    pub fn insert_guild(&mut self, mut guild: Guild) {
        guild.normalize();
        self.next_guild_id = self.next_guild_id.max(guild.id + 1);
        self.guilds.insert(guild.id, guild);
    }

    pub fn guild(&self, id: GuildId) -> Option<&Guild> {
        self.guilds.get(&id)
    }

    pub fn stronghold(&self, id: CastleId) -> Option<&StrongholdSnapshot> {
        self.strongholds.get(&id)
    }

    /// Apply one request and return the replies it produces, in order
    pub fn handle(&mut self, request: AuthorityRequest) -> Vec<AuthorityReply> {
        match request {
            AuthorityRequest::RequestInfo { guild_id } => match self.guilds.get(&guild_id) {
                Some(guild) => vec![AuthorityReply::GuildInfo(guild.clone())],
                None => vec![AuthorityReply::GuildInfoMissing { guild_id }],
            },

            AuthorityRequest::CreateGuild {
                account_id,
                char_id,
                name,
                founder,
            } => {
                let taken = self.guilds.values().any(|g| g.name.eq_ignore_ascii_case(&name));
                let founded = self
                    .guilds
                    .values()
                    .any(|g| g.member_index(account_id, char_id).is_some());
                if taken || founded {
                    return vec![AuthorityReply::Created {
                        account_id,
                        char_id,
                        guild_id: None,
                    }];
                }
                let guild_id = self.next_guild_id;
                self.next_guild_id += 1;
                info!(guild_id, %name, "Authority founded guild");
                let mut founder = founder;
                founder.session = None;
                founder.online = true;
                self.guilds.insert(
                    guild_id,
                    Guild::founded(guild_id, name, founder, self.base_member_capacity),
                );
                vec![AuthorityReply::Created {
                    account_id,
                    char_id,
                    guild_id: Some(guild_id),
                }]
            }

            AuthorityRequest::AddMember { guild_id, member } => {
                let ok = self.add_member(guild_id, member.clone());
                vec![AuthorityReply::MemberAdded { guild_id, member, ok }]
            }

            AuthorityRequest::RemoveMember {
                guild_id,
                account_id,
                char_id,
                reason,
                expelled,
            } => {
                let Some(guild) = self.guilds.get_mut(&guild_id) else {
                    return Vec::new();
                };
                let Some(slot) = guild.member_index(account_id, char_id) else {
                    return Vec::new();
                };
                let name = std::mem::take(&mut guild.members[slot]).name;
                guild.recalc_average_level();
                vec![AuthorityReply::MemberRemoved {
                    guild_id,
                    account_id,
                    char_id,
                    name,
                    reason,
                    expelled,
                }]
            }

            AuthorityRequest::MemberOnline {
                guild_id,
                account_id,
                char_id,
                online,
            } => {
                let Some(member) = self.member_mut(guild_id, account_id, char_id) else {
                    return Vec::new();
                };
                member.online = online;
                let (level, class) = (member.level, member.class);
                vec![AuthorityReply::MemberStatus {
                    guild_id,
                    account_id,
                    char_id,
                    online,
                    level,
                    class,
                }]
            }

            AuthorityRequest::ChangeRank { guild_id, index, rank } => {
                let Some(slot) = self.guilds.get_mut(&guild_id).and_then(|g| g.ranks.get_mut(index))
                else {
                    return Vec::new();
                };
                *slot = rank.clone();
                vec![AuthorityReply::RankChanged { guild_id, index, rank }]
            }

            AuthorityRequest::AssignRank {
                guild_id,
                account_id,
                char_id,
                rank,
            } => {
                let Some(member) = self.member_mut(guild_id, account_id, char_id) else {
                    return Vec::new();
                };
                member.rank = rank;
                vec![AuthorityReply::MemberRankChanged {
                    guild_id,
                    account_id,
                    char_id,
                    rank,
                }]
            }

            AuthorityRequest::ChangeNotice { guild_id, notice } => {
                let Some(guild) = self.guilds.get_mut(&guild_id) else {
                    return Vec::new();
                };
                guild.notice = notice.clone();
                vec![AuthorityReply::NoticeChanged { guild_id, notice }]
            }

            AuthorityRequest::ChangeEmblem { guild_id, emblem } => {
                let Some(guild) = self.guilds.get_mut(&guild_id) else {
                    return Vec::new();
                };
                guild.emblem_id = self.next_emblem_id;
                self.next_emblem_id += 1;
                guild.emblem = emblem.clone();
                vec![AuthorityReply::EmblemChanged {
                    guild_id,
                    emblem_id: guild.emblem_id,
                    emblem,
                }]
            }

            AuthorityRequest::ChangeMaster {
                guild_id,
                account_id,
                char_id,
            } => {
                let Some(guild) = self.guilds.get_mut(&guild_id) else {
                    return Vec::new();
                };
                let Some(slot) = guild.member_index(account_id, char_id) else {
                    return Vec::new();
                };
                if slot != 0 {
                    let promoted_rank = guild.members[slot].rank.max(1);
                    guild.members.swap(0, slot);
                    guild.members[0].rank = 0;
                    guild.members[slot].rank = promoted_rank;
                    guild.master = guild.members[0].name.clone();
                }
                vec![AuthorityReply::MasterChanged {
                    guild_id,
                    account_id,
                    char_id,
                }]
            }

            AuthorityRequest::AddRelation {
                guild_id,
                other_id,
                kind,
            } => self.change_relation(guild_id, other_id, kind, true),

            AuthorityRequest::RemoveRelation {
                guild_id,
                other_id,
                kind,
            } => self.change_relation(guild_id, other_id, kind, false),

            AuthorityRequest::Disband { guild_id } => {
                if self.guilds.remove(&guild_id).is_none() {
                    return Vec::new();
                }
                for guild in self.guilds.values_mut() {
                    guild.relations.retain(|r| r.guild_id != guild_id);
                }
                for castle in self.strongholds.values_mut() {
                    if castle.owner == guild_id {
                        castle.owner = 0;
                    }
                }
                vec![AuthorityReply::Disbanded { guild_id }]
            }

            AuthorityRequest::SetMemberExp {
                guild_id,
                account_id,
                char_id,
                exp,
            } => {
                match self.member_mut(guild_id, account_id, char_id) {
                    Some(member) => member.exp = exp,
                    None => debug!(guild_id, account_id, "Exp write for unlisted member ignored"),
                }
                Vec::new()
            }

            AuthorityRequest::SkillUp {
                guild_id,
                skill_id,
                max_level,
            } => {
                let base = self.base_member_capacity;
                let Some(guild) = self.guilds.get_mut(&guild_id) else {
                    return Vec::new();
                };
                let level = guild.skill_level(skill_id);
                if guild.skill_points == 0 || level >= max_level {
                    // Not learnable after all: report the unchanged points only
                    return vec![AuthorityReply::SkillUpdated {
                        guild_id,
                        skill_id: 0,
                        level: 0,
                        skill_points: guild.skill_points,
                    }];
                }
                guild.skill_points -= 1;
                guild.set_skill_level(skill_id, level + 1);
                if skill_id == GD_EXTENSION {
                    guild.max_members =
                        (base + (level as usize + 1) * EXTENSION_SLOTS_PER_LEVEL).min(MAX_GUILD_MEMBERS);
                }
                vec![AuthorityReply::SkillUpdated {
                    guild_id,
                    skill_id,
                    level: level + 1,
                    skill_points: guild.skill_points,
                }]
            }

            AuthorityRequest::StrongholdLoadAll { castle_ids } => {
                let snapshots = castle_ids
                    .into_iter()
                    .map(|id| self.stronghold_entry(id).clone())
                    .collect();
                vec![AuthorityReply::StrongholdData(snapshots)]
            }

            AuthorityRequest::StrongholdFieldLoad { castle_id, field } => {
                let Some(field_kind) = StrongholdField::from_index(field) else {
                    warn!(castle_id, field, "Load for unknown stronghold field");
                    return Vec::new();
                };
                let value = snapshot_field(self.stronghold_entry(castle_id), field_kind);
                vec![AuthorityReply::StrongholdField {
                    castle_id,
                    field,
                    value,
                }]
            }

            AuthorityRequest::StrongholdFieldSave {
                castle_id,
                field,
                value,
            } => {
                let Some(field_kind) = StrongholdField::from_index(field) else {
                    warn!(castle_id, field, "Save for unknown stronghold field");
                    return Vec::new();
                };
                set_snapshot_field(self.stronghold_entry(castle_id), field_kind, value);
                vec![AuthorityReply::StrongholdField {
                    castle_id,
                    field,
                    value,
                }]
            }
        }
    }

    /// Serve requests until either channel closes
    pub async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<AuthorityRequest>,
        replies: mpsc::UnboundedSender<AuthorityReply>,
        metrics: Arc<ServerMetrics>,
    ) {
        info!("Loopback authority serving requests");
        while let Some(request) = requests.recv().await {
            for reply in self.handle(request) {
                metrics.record_authority_reply();
                if replies.send(reply).is_err() {
                    info!("Reply channel closed, loopback authority stopping");
                    return;
                }
            }
        }
        info!("Request channel closed, loopback authority stopping");
    }

    fn member_mut(
        &mut self,
        guild_id: GuildId,
        account_id: u32,
        char_id: u32,
    ) -> Option<&mut GuildMember> {
        let guild = self.guilds.get_mut(&guild_id)?;
        let slot = guild.member_index(account_id, char_id)?;
        guild.members.get_mut(slot)
    }

    fn add_member(&mut self, guild_id: GuildId, mut member: GuildMember) -> bool {
        if self
            .guilds
            .values()
            .any(|g| g.member_index(member.account_id, member.char_id).is_some())
        {
            return false;
        }
        let Some(guild) = self.guilds.get_mut(&guild_id) else {
            return false;
        };
        let Some(slot) = guild.free_slot() else {
            return false;
        };
        member.session = None;
        member.last_seen = None;
        guild.members[slot] = member;
        guild.recalc_average_level();
        true
    }

    fn change_relation(
        &mut self,
        guild_id: GuildId,
        other_id: GuildId,
        kind: RelationKind,
        added: bool,
    ) -> Vec<AuthorityReply> {
        let (Some(name_a), Some(name_b)) = (
            self.guilds.get(&guild_id).map(|g| g.name.clone()),
            self.guilds.get(&other_id).map(|g| g.name.clone()),
        ) else {
            return Vec::new();
        };

        let changed = if added {
            let fits = |g: &Guild, other: GuildId| {
                !g.has_relation(other, kind) && g.relation_count(kind) < kind.cap()
            };
            let room = self.guilds.get(&guild_id).is_some_and(|g| fits(g, other_id))
                && (kind == RelationKind::Opposition
                    || self.guilds.get(&other_id).is_some_and(|g| fits(g, guild_id)));
            if !room {
                return Vec::new();
            }
            self.edit_edge(guild_id, other_id, &name_b, kind, true);
            if kind == RelationKind::Alliance {
                self.edit_edge(other_id, guild_id, &name_a, kind, true);
            }
            true
        } else {
            let removed = self.edit_edge(guild_id, other_id, &name_b, kind, false);
            if kind == RelationKind::Alliance {
                self.edit_edge(other_id, guild_id, &name_a, kind, false);
            }
            removed
        };
        if !changed {
            return Vec::new();
        }
        vec![AuthorityReply::RelationChanged {
            guild_a: guild_id,
            guild_b: other_id,
            name_a,
            name_b,
            kind,
            added,
        }]
    }

    fn edit_edge(&mut self, owner: GuildId, other: GuildId, other_name: &str, kind: RelationKind, add: bool) -> bool {
        let Some(guild) = self.guilds.get_mut(&owner) else {
            return false;
        };
        if add {
            guild.add_relation(other, other_name.to_string(), kind)
        } else {
            guild.remove_relation(other, kind)
        }
    }

    fn stronghold_entry(&mut self, castle_id: CastleId) -> &mut StrongholdSnapshot {
        self.strongholds
            .entry(castle_id)
            .or_insert_with(|| StrongholdSnapshot {
                castle_id,
                guardians: vec![Guardian::default(); MAX_GUARDIANS],
                ..Default::default()
            })
    }
}

fn snapshot_field(snapshot: &StrongholdSnapshot, field: StrongholdField) -> u32 {
    match field {
        StrongholdField::Owner => snapshot.owner,
        StrongholdField::Economy => snapshot.economy,
        StrongholdField::Defense => snapshot.defense,
        StrongholdField::TriggerEconomy => snapshot.trigger_economy,
        StrongholdField::TriggerDefense => snapshot.trigger_defense,
        StrongholdField::NextTime => snapshot.next_time,
        StrongholdField::PayTime => snapshot.pay_time,
        StrongholdField::CreateTime => snapshot.create_time,
        StrongholdField::CashierVisible => snapshot.cashier_visible as u32,
        StrongholdField::GuardianVisible(i) => snapshot
            .guardians
            .get(i as usize)
            .map(|g| g.visible as u32)
            .unwrap_or(0),
        StrongholdField::GuardianHp(i) => snapshot.guardians.get(i as usize).map(|g| g.hp).unwrap_or(0),
    }
}

fn set_snapshot_field(snapshot: &mut StrongholdSnapshot, field: StrongholdField, value: u32) {
    match field {
        StrongholdField::Owner => snapshot.owner = value,
        StrongholdField::Economy => snapshot.economy = value,
        StrongholdField::Defense => snapshot.defense = value,
        StrongholdField::TriggerEconomy => snapshot.trigger_economy = value,
        StrongholdField::TriggerDefense => snapshot.trigger_defense = value,
        StrongholdField::NextTime => snapshot.next_time = value,
        StrongholdField::PayTime => snapshot.pay_time = value,
        StrongholdField::CreateTime => snapshot.create_time = value,
        StrongholdField::CashierVisible => snapshot.cashier_visible = value != 0,
        StrongholdField::GuardianVisible(i) => {
            if let Some(g) = snapshot.guardians.get_mut(i as usize) {
                g.visible = value != 0;
            }
        }
        StrongholdField::GuardianHp(i) => {
            if let Some(g) = snapshot.guardians.get_mut(i as usize) {
                g.hp = value;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn founder(account_id: u32, name: &str) -> GuildMember {
        GuildMember {
            account_id,
            char_id: account_id * 10,
            name: name.into(),
            level: 50,
            ..Default::default()
        }
    }

    fn create(authority: &mut LoopbackAuthority, account_id: u32, name: &str) -> GuildId {
        let replies = authority.handle(AuthorityRequest::CreateGuild {
            account_id,
            char_id: account_id * 10,
            name: name.into(),
            founder: founder(account_id, &format!("Master{account_id}")),
        });
        match replies.as_slice() {
            [AuthorityReply::Created {
                guild_id: Some(id), ..
            }] => *id,
            other => panic!("unexpected replies {other:?}"),
        }
    }

    #[test]
    fn test_create_rejects_duplicate_names() {
        let mut authority = LoopbackAuthority::new(16);
        assert_eq!(create(&mut authority, 1, "Wolves"), 1);
        let replies = authority.handle(AuthorityRequest::CreateGuild {
            account_id: 2,
            char_id: 20,
            name: "WOLVES".into(),
            founder: founder(2, "Other"),
        });
        assert_eq!(
            replies,
            vec![AuthorityReply::Created {
                account_id: 2,
                char_id: 20,
                guild_id: None
            }]
        );
    }

    #[test]
    fn test_alliance_respects_cap_on_both_sides() {
        let mut authority = LoopbackAuthority::new(16);
        let home = create(&mut authority, 1, "Home");
        let allies: Vec<_> = (2..=5).map(|i| create(&mut authority, i, &format!("Ally{i}"))).collect();

        for &ally in &allies[..3] {
            let replies = authority.handle(AuthorityRequest::AddRelation {
                guild_id: home,
                other_id: ally,
                kind: RelationKind::Alliance,
            });
            assert_eq!(replies.len(), 1);
        }
        let refused = authority.handle(AuthorityRequest::AddRelation {
            guild_id: home,
            other_id: allies[3],
            kind: RelationKind::Alliance,
        });
        assert!(refused.is_empty());
        assert_eq!(authority.guild(allies[0]).unwrap().relation_count(RelationKind::Alliance), 1);
    }

    #[test]
    fn test_opposition_is_one_sided() {
        let mut authority = LoopbackAuthority::new(16);
        let a = create(&mut authority, 1, "A");
        let b = create(&mut authority, 2, "B");
        authority.handle(AuthorityRequest::AddRelation {
            guild_id: a,
            other_id: b,
            kind: RelationKind::Opposition,
        });
        assert!(authority.guild(a).unwrap().has_relation(b, RelationKind::Opposition));
        assert!(authority.guild(b).unwrap().relations.is_empty());
    }

    #[test]
    fn test_extension_skill_grows_capacity() {
        let mut authority = LoopbackAuthority::new(16);
        let id = create(&mut authority, 1, "Growers");
        authority.guilds.get_mut(&id).unwrap().skill_points = 2;
        let replies = authority.handle(AuthorityRequest::SkillUp {
            guild_id: id,
            skill_id: GD_EXTENSION,
            max_level: 10,
        });
        assert_eq!(
            replies,
            vec![AuthorityReply::SkillUpdated {
                guild_id: id,
                skill_id: GD_EXTENSION,
                level: 1,
                skill_points: 1
            }]
        );
        assert_eq!(authority.guild(id).unwrap().max_members, 26);
    }

    #[test]
    fn test_stronghold_save_then_load() {
        let mut authority = LoopbackAuthority::new(16);
        let index = StrongholdField::GuardianHp(2).index();
        authority.handle(AuthorityRequest::StrongholdFieldSave {
            castle_id: 4,
            field: index,
            value: 900,
        });
        let replies = authority.handle(AuthorityRequest::StrongholdFieldLoad {
            castle_id: 4,
            field: index,
        });
        assert_eq!(
            replies,
            vec![AuthorityReply::StrongholdField {
                castle_id: 4,
                field: index,
                value: 900
            }]
        );
    }

    #[test]
    fn test_disband_clears_edges_and_castles() {
        let mut authority = LoopbackAuthority::new(16);
        let a = create(&mut authority, 1, "A");
        let b = create(&mut authority, 2, "B");
        authority.handle(AuthorityRequest::AddRelation {
            guild_id: b,
            other_id: a,
            kind: RelationKind::Opposition,
        });
        authority.handle(AuthorityRequest::StrongholdFieldSave {
            castle_id: 1,
            field: StrongholdField::Owner.index(),
            value: a,
        });
        assert_eq!(
            authority.handle(AuthorityRequest::Disband { guild_id: a }),
            vec![AuthorityReply::Disbanded { guild_id: a }]
        );
        assert!(authority.guild(b).unwrap().relations.is_empty());
        assert_eq!(authority.stronghold(1).unwrap().owner, 0);
        assert_eq!(
            authority.handle(AuthorityRequest::RequestInfo { guild_id: a }),
            vec![AuthorityReply::GuildInfoMissing { guild_id: a }]
        );
    }
}
