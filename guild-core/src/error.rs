//! Error types for guild operations and configuration loading.
//!
//! `GuildError` doubles as the user-facing reason code: every rejected action
//! maps to one variant, and `code()` gives the stable numeric id the client
//! layer frames into its reply.

use crate::guild::RelationKind;
use crate::types::{CastleId, GuildId};

/// Reasons a guild action is rejected, locally or by the remote authority
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuildError {
    #[error("session not found")]
    SessionNotFound,
    #[error("not a member of any guild")]
    NotInGuild,
    #[error("already a member of a guild")]
    AlreadyInGuild,
    #[error("guild {0} is not known locally")]
    UnknownGuild(GuildId),
    #[error("no guild creation token held")]
    NoCreationToken,
    #[error("invalid guild name")]
    InvalidName,
    #[error("guild name already taken")]
    NameConflict,
    #[error("rank lacks the required permission")]
    NoPermission,
    #[error("only the guild master may do this")]
    NotMaster,
    #[error("target not found")]
    TargetNotFound,
    #[error("target already belongs to a guild")]
    TargetHasGuild,
    #[error("target already has a pending request")]
    TargetBusy,
    #[error("target is inside a siege zone during an active siege")]
    TargetInSiegeZone,
    #[error("guild member table is full")]
    GuildFull,
    #[error("no pending request to answer")]
    NoPendingRequest,
    #[error("the guild master cannot be expelled")]
    CannotExpelMaster,
    #[error("the guild master cannot leave")]
    MasterCannotLeave,
    #[error("other members remain in the guild")]
    MembersRemain,
    #[error("{kind:?} limit reached")]
    RelationCapReached { kind: RelationKind },
    #[error("relationship already exists")]
    AlreadyRelated,
    #[error("relationship not found")]
    RelationNotFound,
    #[error("cannot target your own guild")]
    SameGuild,
    #[error("rank index {0} out of range")]
    RankOutOfRange(usize),
    #[error("experience tax {0}% exceeds the configured ceiling")]
    TaxTooHigh(u32),
    #[error("notice text too long")]
    NoticeTooLong,
    #[error("emblem of {0} bytes exceeds the size limit")]
    EmblemTooLarge(usize),
    #[error("guild skill {0} cannot be learned")]
    SkillUnavailable(u16),
    #[error("no guild skill points available")]
    NoSkillPoints,
    #[error("experience buffer is full")]
    ExpPoolExhausted,
    #[error("stronghold {0} is not known")]
    UnknownStronghold(CastleId),
    #[error("unknown stronghold field index {0}")]
    UnknownStrongholdField(u32),
    #[error("guild skill {0} is locked after the master change")]
    SkillLocked(u16),
}

impl GuildError {
    /// Stable numeric reason code for the client layer
    pub fn code(&self) -> u16 {
        match self {
            GuildError::SessionNotFound => 1,
            GuildError::NotInGuild => 2,
            GuildError::AlreadyInGuild => 3,
            GuildError::UnknownGuild(_) => 4,
            GuildError::NoCreationToken => 5,
            GuildError::InvalidName => 6,
            GuildError::NameConflict => 7,
            GuildError::NoPermission => 8,
            GuildError::NotMaster => 9,
            GuildError::TargetNotFound => 10,
            GuildError::TargetHasGuild => 11,
            GuildError::TargetBusy => 12,
            GuildError::TargetInSiegeZone => 13,
            GuildError::GuildFull => 14,
            GuildError::NoPendingRequest => 15,
            GuildError::CannotExpelMaster => 16,
            GuildError::MasterCannotLeave => 17,
            GuildError::MembersRemain => 18,
            GuildError::RelationCapReached { .. } => 19,
            GuildError::AlreadyRelated => 20,
            GuildError::RelationNotFound => 21,
            GuildError::SameGuild => 22,
            GuildError::RankOutOfRange(_) => 23,
            GuildError::TaxTooHigh(_) => 24,
            GuildError::NoticeTooLong => 25,
            GuildError::EmblemTooLarge(_) => 26,
            GuildError::SkillUnavailable(_) => 27,
            GuildError::NoSkillPoints => 28,
            GuildError::ExpPoolExhausted => 29,
            GuildError::UnknownStronghold(_) => 30,
            GuildError::UnknownStrongholdField(_) => 31,
            GuildError::SkillLocked(_) => 32,
        }
    }
}

/// Error type for configuration and static data loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
