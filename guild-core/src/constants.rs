//! Centralized guild constants.
//!
//! Table capacities and fixed protocol values shared by the replica store,
//! the stronghold ledger and the operations layer. Values that operators may
//! tune live in [`crate::config::GuildConfig`] instead.

// =====================================================
// Guild tables
// =====================================================

/// Member table slots per guild (16 base + 10 per extension level, 6 levels)
pub const MAX_GUILD_MEMBERS: usize = 76;

/// Rank table slots per guild
pub const MAX_GUILD_RANKS: usize = 20;

/// Relationship table slots per guild (alliances + oppositions)
pub const MAX_GUILD_RELATIONS: usize = 16;

/// Skill table slots per guild
pub const MAX_GUILD_SKILLS: usize = 15;

/// Maximum active alliances per guild
pub const MAX_ALLIANCES: usize = 3;

/// Maximum active oppositions per guild
pub const MAX_OPPOSITIONS: usize = 3;

/// Rank index reserved for the guild master
pub const MASTER_RANK: usize = 0;

/// Rank permission bit: may invite new members
pub const PERM_INVITE: u32 = 0x01;

/// Rank permission bit: may expel members
pub const PERM_EXPEL: u32 = 0x10;

/// Experience tax at or above which the whole contribution goes to the guild
pub const FULL_TAX: u32 = 100;

/// Maximum guild name length in bytes
pub const MAX_GUILD_NAME_LEN: usize = 24;

/// Maximum notice title / body lengths in bytes
pub const MAX_NOTICE_TITLE_LEN: usize = 60;
pub const MAX_NOTICE_BODY_LEN: usize = 120;

// =====================================================
// Strongholds
// =====================================================

/// Defender slots per stronghold
pub const MAX_GUARDIANS: usize = 8;

/// Event fired once the last piece of stronghold ownership data has arrived
pub const WORLD_ACTIVATION_EVENT: &str = "::OnAgitInit";

/// Suffix broadcast to every stronghold when the siege window opens
pub const SIEGE_START_EVENT: &str = "::OnAgitStart";

/// Suffix broadcast to every stronghold when the siege window closes
pub const SIEGE_END_EVENT: &str = "::OnAgitEnd";

// =====================================================
// Guild skills
// =====================================================

/// Guild skill: member capacity extension
pub const GD_EXTENSION: u16 = 10004;

/// Guild skills locked for a freshly promoted master
pub const GD_BATTLEORDER: u16 = 10010;
pub const GD_REGENERATION: u16 = 10011;
pub const GD_RESTORE: u16 = 10012;
pub const GD_EMERGENCYCALL: u16 = 10013;
