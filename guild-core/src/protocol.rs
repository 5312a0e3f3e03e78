//! Messages exchanged with the remote authority.
//!
//! Requests are fire-and-forget; replies arrive later as ordinary events, in
//! any order, or never. The framing on the wire is not defined here, both
//! enums only derive serde so a transport can pick its own encoding.

use serde::{Deserialize, Serialize};

use crate::guild::{Guild, GuildMember, GuildNotice, GuildRank, RelationKind};
use crate::stronghold::Guardian;
use crate::types::{AccountId, CastleId, CharId, GuildId};

/// Full authoritative state of one guild
pub type GuildSnapshot = Guild;

/// Outbound request to the system of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuthorityRequest {
    RequestInfo {
        guild_id: GuildId,
    },
    CreateGuild {
        account_id: AccountId,
        char_id: CharId,
        name: String,
        founder: GuildMember,
    },
    AddMember {
        guild_id: GuildId,
        member: GuildMember,
    },
    RemoveMember {
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
        reason: String,
        expelled: bool,
    },
    MemberOnline {
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
        online: bool,
    },
    ChangeRank {
        guild_id: GuildId,
        index: usize,
        rank: GuildRank,
    },
    AssignRank {
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
        rank: usize,
    },
    ChangeNotice {
        guild_id: GuildId,
        notice: GuildNotice,
    },
    ChangeEmblem {
        guild_id: GuildId,
        emblem: Vec<u8>,
    },
    ChangeMaster {
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
    },
    AddRelation {
        guild_id: GuildId,
        other_id: GuildId,
        kind: RelationKind,
    },
    RemoveRelation {
        guild_id: GuildId,
        other_id: GuildId,
        kind: RelationKind,
    },
    Disband {
        guild_id: GuildId,
    },
    SetMemberExp {
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
        exp: u64,
    },
    SkillUp {
        guild_id: GuildId,
        skill_id: u16,
        max_level: u16,
    },
    StrongholdLoadAll {
        castle_ids: Vec<CastleId>,
    },
    StrongholdFieldLoad {
        castle_id: CastleId,
        field: u32,
    },
    StrongholdFieldSave {
        castle_id: CastleId,
        field: u32,
        value: u32,
    },
}

/// Full authoritative state of one stronghold
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongholdSnapshot {
    pub castle_id: CastleId,
    pub owner: GuildId,
    pub economy: u32,
    pub defense: u32,
    pub trigger_economy: u32,
    pub trigger_defense: u32,
    pub next_time: u32,
    pub pay_time: u32,
    pub create_time: u32,
    pub cashier_visible: bool,
    pub guardians: Vec<Guardian>,
}

/// Inbound reply or push from the system of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuthorityReply {
    GuildInfo(GuildSnapshot),
    GuildInfoMissing {
        guild_id: GuildId,
    },
    /// `guild_id` is `None` when the name was already taken
    Created {
        account_id: AccountId,
        char_id: CharId,
        guild_id: Option<GuildId>,
    },
    MemberAdded {
        guild_id: GuildId,
        member: GuildMember,
        ok: bool,
    },
    MemberRemoved {
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
        name: String,
        reason: String,
        expelled: bool,
    },
    MemberStatus {
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
        online: bool,
        level: u32,
        class: u16,
    },
    RankChanged {
        guild_id: GuildId,
        index: usize,
        rank: GuildRank,
    },
    MemberRankChanged {
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
        rank: usize,
    },
    NoticeChanged {
        guild_id: GuildId,
        notice: GuildNotice,
    },
    EmblemChanged {
        guild_id: GuildId,
        emblem_id: u32,
        emblem: Vec<u8>,
    },
    MasterChanged {
        guild_id: GuildId,
        account_id: AccountId,
        char_id: CharId,
    },
    /// Fanned out to both sides; each side applies its own edge
    RelationChanged {
        guild_a: GuildId,
        guild_b: GuildId,
        name_a: String,
        name_b: String,
        kind: RelationKind,
        added: bool,
    },
    Disbanded {
        guild_id: GuildId,
    },
    SkillUpdated {
        guild_id: GuildId,
        skill_id: u16,
        level: u16,
        skill_points: u32,
    },
    StrongholdData(Vec<StrongholdSnapshot>),
    StrongholdField {
        castle_id: CastleId,
        field: u32,
        value: u32,
    },
}
