//! Guild data model: members, ranks, relationships, skills, notice, emblem.
//!
//! Tables are positional. The member table always holds
//! [`MAX_GUILD_MEMBERS`] slots and an empty slot is a zero-valued record
//! (`account_id == 0`); slots are never compacted, so a new member may reuse
//! a freed index while everyone else keeps theirs.

pub mod store;

use serde::{Deserialize, Serialize};

use crate::constants::{
    MASTER_RANK, MAX_ALLIANCES, MAX_GUILD_MEMBERS, MAX_GUILD_RANKS, MAX_GUILD_RELATIONS,
    MAX_OPPOSITIONS, PERM_EXPEL, PERM_INVITE,
};
use crate::types::{AccountId, CharId, GuildId, SessionId};

pub use store::{GuildStore, SnapshotDelta};

// =====================
// Members
// =====================

/// Last position pushed to guildmates for a member
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeenPosition {
    pub zone: String,
    pub x: u16,
    pub y: u16,
}

/// One slot of the member table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildMember {
    pub account_id: AccountId,
    pub char_id: CharId,
    pub name: String,
    pub hair: u16,
    pub hair_color: u16,
    pub gender: u8,
    pub class: u16,
    pub level: u32,
    pub exp: u64,
    /// Index into the rank table
    pub rank: usize,
    pub online: bool,
    /// Cached live session. Lookup aid only: revalidated, never trusted.
    #[serde(skip)]
    pub session: Option<SessionId>,
    #[serde(skip)]
    pub last_seen: Option<SeenPosition>,
}

impl GuildMember {
    pub fn is_empty(&self) -> bool {
        self.account_id == 0
    }

    pub fn is(&self, account_id: AccountId, char_id: CharId) -> bool {
        !self.is_empty() && self.account_id == account_id && self.char_id == char_id
    }

    /// Compare the fields shown in the client roster
    pub fn roster_eq(&self, other: &GuildMember) -> bool {
        self.account_id == other.account_id
            && self.char_id == other.char_id
            && self.name == other.name
            && self.class == other.class
            && self.level == other.level
            && self.rank == other.rank
            && self.online == other.online
    }
}

// =====================
// Ranks
// =====================

/// One entry of the rank table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRank {
    pub name: String,
    /// Permission bitmask (`PERM_INVITE`, `PERM_EXPEL`)
    pub mode: u32,
    /// Percentage of member experience paid to the guild
    pub exp_tax: u32,
}

impl GuildRank {
    pub fn can_invite(&self) -> bool {
        self.mode & PERM_INVITE != 0
    }

    pub fn can_expel(&self) -> bool {
        self.mode & PERM_EXPEL != 0
    }
}

/// Rank table every new guild starts with
pub fn default_ranks() -> Vec<GuildRank> {
    (0..MAX_GUILD_RANKS)
        .map(|i| {
            if i == MASTER_RANK {
                GuildRank {
                    name: "Guild Master".into(),
                    mode: PERM_INVITE | PERM_EXPEL,
                    exp_tax: 0,
                }
            } else {
                GuildRank {
                    name: format!("Position {}", i + 1),
                    mode: 0,
                    exp_tax: 0,
                }
            }
        })
        .collect()
}

// =====================
// Relationships
// =====================

/// Alliance or hostility between two guilds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    Alliance,
    Opposition,
}

impl RelationKind {
    /// Maximum simultaneous edges of this kind per guild
    pub fn cap(&self) -> usize {
        match self {
            RelationKind::Alliance => MAX_ALLIANCES,
            RelationKind::Opposition => MAX_OPPOSITIONS,
        }
    }
}

/// Directed edge stored on one side of a relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub guild_id: GuildId,
    pub name: String,
    pub kind: RelationKind,
}

// =====================
// Skills / notice
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSkill {
    pub id: u16,
    pub level: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildNotice {
    pub title: String,
    pub body: String,
}

// =====================
// Guild
// =====================

/// A replicated guild
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    /// Master's display name, denormalized for equality checks
    pub master: String,
    pub level: u16,
    pub exp: u64,
    pub next_exp: u64,
    pub skill_points: u32,
    pub average_level: u32,
    /// Usable member slots (grows with the extension skill)
    pub max_members: usize,
    pub members: Vec<GuildMember>,
    pub ranks: Vec<GuildRank>,
    pub relations: Vec<Relationship>,
    pub skills: Vec<GuildSkill>,
    pub notice: GuildNotice,
    pub emblem_id: u32,
    pub emblem: Vec<u8>,
}

impl Guild {
    /// A freshly founded guild with the founder in slot 0 as master
    pub fn founded(id: GuildId, name: String, mut founder: GuildMember, max_members: usize) -> Self {
        founder.rank = MASTER_RANK;
        let mut guild = Self {
            id,
            name,
            master: founder.name.clone(),
            level: 1,
            exp: 0,
            next_exp: 2_000_000,
            skill_points: 0,
            average_level: founder.level,
            max_members,
            members: vec![founder],
            ranks: default_ranks(),
            relations: Vec::new(),
            skills: Vec::new(),
            notice: GuildNotice::default(),
            emblem_id: 0,
            emblem: Vec::new(),
        };
        guild.normalize();
        guild
    }

    /// Pad tables to their fixed sizes and clamp anything beyond them.
    ///
    /// Returns `true` if data had to be dropped to fit.
    pub fn normalize(&mut self) -> bool {
        let mut clamped = false;
        if self.members.len() > MAX_GUILD_MEMBERS {
            self.members.truncate(MAX_GUILD_MEMBERS);
            clamped = true;
        }
        self.members.resize_with(MAX_GUILD_MEMBERS, GuildMember::default);
        if self.max_members > MAX_GUILD_MEMBERS {
            self.max_members = MAX_GUILD_MEMBERS;
            clamped = true;
        }
        if self.ranks.len() > MAX_GUILD_RANKS {
            self.ranks.truncate(MAX_GUILD_RANKS);
            clamped = true;
        }
        if self.ranks.len() < MAX_GUILD_RANKS {
            let defaults = default_ranks();
            let start = self.ranks.len();
            self.ranks.extend(defaults.into_iter().skip(start));
        }
        if self.relations.len() > MAX_GUILD_RELATIONS {
            self.relations.truncate(MAX_GUILD_RELATIONS);
            clamped = true;
        }
        for member in self.members.iter_mut().filter(|m| !m.is_empty()) {
            if member.rank >= MAX_GUILD_RANKS {
                member.rank = MAX_GUILD_RANKS - 1;
                clamped = true;
            }
        }
        clamped
    }

    pub fn member_index(&self, account_id: AccountId, char_id: CharId) -> Option<usize> {
        self.members.iter().position(|m| m.is(account_id, char_id))
    }

    pub fn member_index_by_name(&self, name: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|m| !m.is_empty() && m.name == name)
    }

    /// First empty slot within the usable capacity
    pub fn free_slot(&self) -> Option<usize> {
        self.members
            .iter()
            .take(self.max_members)
            .position(|m| m.is_empty())
    }

    pub fn member_count(&self) -> usize {
        self.members.iter().filter(|m| !m.is_empty()).count()
    }

    pub fn online_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| !m.is_empty() && m.online)
            .count()
    }

    /// Sessions currently attached to member slots
    pub fn attached_sessions(&self) -> Vec<SessionId> {
        self.members.iter().filter_map(|m| m.session).collect()
    }

    pub fn rank_of(&self, slot: usize) -> Option<&GuildRank> {
        let member = self.members.get(slot)?;
        self.ranks.get(member.rank)
    }

    pub fn relation_count(&self, kind: RelationKind) -> usize {
        self.relations.iter().filter(|r| r.kind == kind).count()
    }

    pub fn has_relation(&self, other: GuildId, kind: RelationKind) -> bool {
        self.relations
            .iter()
            .any(|r| r.guild_id == other && r.kind == kind)
    }

    /// Insert a directed edge, respecting the per-kind cap and table size
    pub fn add_relation(&mut self, other: GuildId, name: String, kind: RelationKind) -> bool {
        if self.has_relation(other, kind)
            || self.relation_count(kind) >= kind.cap()
            || self.relations.len() >= MAX_GUILD_RELATIONS
        {
            return false;
        }
        self.relations.push(Relationship {
            guild_id: other,
            name,
            kind,
        });
        true
    }

    /// Remove only the `(other, kind)` edge
    pub fn remove_relation(&mut self, other: GuildId, kind: RelationKind) -> bool {
        let before = self.relations.len();
        self.relations
            .retain(|r| !(r.guild_id == other && r.kind == kind));
        self.relations.len() < before
    }

    pub fn skill_level(&self, skill_id: u16) -> u16 {
        self.skills
            .iter()
            .find(|s| s.id == skill_id)
            .map(|s| s.level)
            .unwrap_or(0)
    }

    pub fn set_skill_level(&mut self, skill_id: u16, level: u16) {
        match self.skills.iter_mut().find(|s| s.id == skill_id) {
            Some(skill) => skill.level = level,
            None => self.skills.push(GuildSkill { id: skill_id, level }),
        }
    }

    /// Recompute the average level over populated slots
    pub fn recalc_average_level(&mut self) {
        let (sum, count) = self
            .members
            .iter()
            .filter(|m| !m.is_empty())
            .fold((0u64, 0u64), |(s, c), m| (s + m.level as u64, c + 1));
        self.average_level = if count > 0 { (sum / count) as u32 } else { 0 };
    }
}

// =====================
// Tests
// =====================
