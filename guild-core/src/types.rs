//! Identifier aliases shared across the crate.
//!
//! Zero is the "none" value for every id: an empty member slot has account
//! id 0, an unowned stronghold has owner 0, a guildless session has guild 0.

/// Remote-assigned guild identity
pub type GuildId = u32;

/// Account identity (one account may own several characters)
pub type AccountId = u32;

/// Character identity
pub type CharId = u32;

/// Stronghold identity, loaded from the static roster
pub type CastleId = u32;

/// Live session handle issued by the session layer
pub type SessionId = u64;
