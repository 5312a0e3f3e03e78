//! Guild engine configuration
//!
//! Two inputs, both JSON and both read once at load time:
//! - `guild.json`: tunables ([`GuildConfig`]); every field has a default so a
//!   partial file is fine
//! - static data ([`StaticData`]): the guild skill tree and the stronghold
//!   roster, from `guild_skill_tree.json` and `castles.json`

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    FULL_TAX, GD_BATTLEORDER, GD_EMERGENCYCALL, GD_REGENERATION, GD_RESTORE, MAX_GUILD_MEMBERS,
    MAX_GUILD_NAME_LEN,
};
use crate::error::ConfigError;
use crate::logging::TracingConfig;
use crate::skill_tree::{SkillTree, SkillTreeEntry};
use crate::stronghold::StrongholdDef;

pub const GUILD_CONFIG_FILE: &str = "guild.json";
pub const SKILL_TREE_FILE: &str = "guild_skill_tree.json";
pub const CASTLE_ROSTER_FILE: &str = "castles.json";

/// Operator tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildConfig {
    /// Usable member slots of a newly founded guild
    pub base_member_capacity: usize,
    /// Highest experience tax a rank may be given
    pub max_exp_tax: u32,
    /// Records in the experience coalescing pool
    pub exp_pool_capacity: usize,
    pub exp_flush_interval_ms: u64,
    pub position_push_interval_ms: u64,
    pub stronghold_persist_interval_ms: u64,
    pub request_sweep_interval_ms: u64,
    /// Lifetime of an unanswered invite or relationship request
    pub request_ttl_ms: u64,
    /// Skills blocked for a freshly promoted master
    pub master_locked_skills: Vec<u16>,
    pub master_skill_lock_ms: u64,
    pub emblem_max_bytes: usize,
    pub name_max_len: usize,
    pub logging: TracingConfig,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            base_member_capacity: 16,
            max_exp_tax: 50,
            exp_pool_capacity: 1024,
            exp_flush_interval_ms: 10_000,
            position_push_interval_ms: 5_000,
            stronghold_persist_interval_ms: 60_000,
            request_sweep_interval_ms: 1_000,
            request_ttl_ms: 30_000,
            master_locked_skills: vec![GD_BATTLEORDER, GD_REGENERATION, GD_RESTORE, GD_EMERGENCYCALL],
            master_skill_lock_ms: 300_000,
            emblem_max_bytes: 2048,
            name_max_len: MAX_GUILD_NAME_LEN,
            logging: TracingConfig::default(),
        }
    }
}

impl GuildConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: GuildConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_member_capacity == 0 || self.base_member_capacity > MAX_GUILD_MEMBERS {
            return Err(ConfigError::Invalid(format!(
                "base_member_capacity must be within 1..={MAX_GUILD_MEMBERS}"
            )));
        }
        if self.max_exp_tax > FULL_TAX {
            return Err(ConfigError::Invalid(format!(
                "max_exp_tax {} exceeds {FULL_TAX}",
                self.max_exp_tax
            )));
        }
        if self.exp_pool_capacity == 0 {
            return Err(ConfigError::Invalid("exp_pool_capacity must be positive".into()));
        }
        let intervals = [
            ("exp_flush_interval_ms", self.exp_flush_interval_ms),
            ("position_push_interval_ms", self.position_push_interval_ms),
            ("stronghold_persist_interval_ms", self.stronghold_persist_interval_ms),
            ("request_sweep_interval_ms", self.request_sweep_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if self.name_max_len == 0 {
            return Err(ConfigError::Invalid("name_max_len must be positive".into()));
        }
        Ok(())
    }
}

/// Read-only data loaded at startup
#[derive(Debug, Clone, Default)]
pub struct StaticData {
    pub skill_tree: SkillTree,
    pub castles: Vec<StrongholdDef>,
}

impl StaticData {
    /// Load both static files from `dir`
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let skills = std::fs::read_to_string(dir.join(SKILL_TREE_FILE))?;
        let castles = std::fs::read_to_string(dir.join(CASTLE_ROSTER_FILE))?;
        Self::from_json(&skills, &castles)
    }

    pub fn from_json(skill_tree_json: &str, castles_json: &str) -> Result<Self, ConfigError> {
        let entries: Vec<SkillTreeEntry> = serde_json::from_str(skill_tree_json)?;
        let castles: Vec<StrongholdDef> = serde_json::from_str(castles_json)?;

        let mut ids: Vec<_> = castles.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid("duplicate stronghold id".into()));
        }

        Ok(Self {
            skill_tree: SkillTree::new(entries)?,
            castles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_defaults_validate() {
        let config = GuildConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.exp_flush_interval_ms, 10_000);
        assert_eq!(config.request_ttl_ms, 30_000);
        assert_eq!(config.master_locked_skills.len(), 4);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, r#"{{"max_exp_tax": 80, "exp_pool_capacity": 8}}"#).unwrap();

        let config = GuildConfig::load(temp.path()).unwrap();
        assert_eq!(config.max_exp_tax, 80);
        assert_eq!(config.exp_pool_capacity, 8);
        assert_eq!(config.position_push_interval_ms, 5_000);
    }

    #[test]
    fn test_rejects_tax_above_full() {
        let result = GuildConfig::from_json(r#"{"max_exp_tax": 120}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = GuildConfig::from_json(r#"{"exp_flush_interval_ms": 0}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_json() {
        let result = GuildConfig::from_json("{invalid");
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = GuildConfig::load(dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_static_data_from_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SKILL_TREE_FILE),
            r#"[{"id": 10000, "max_level": 1},
                {"id": 10004, "max_level": 10,
                 "prerequisites": [{"skill_id": 10000, "level": 1}]}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(CASTLE_ROSTER_FILE),
            r#"[{"id": 0, "zone": "prtg_cas01", "name": "Kriemhild", "event": "Agit#prtg_cas01"}]"#,
        )
        .unwrap();

        let data = StaticData::load(dir.path()).unwrap();
        assert_eq!(data.skill_tree.len(), 2);
        assert_eq!(data.castles[0].zone, "prtg_cas01");
    }

    #[test]
    fn test_static_data_rejects_duplicate_castles() {
        let castles = r#"[{"id": 1, "zone": "a", "name": "A", "event": "A"},
                          {"id": 1, "zone": "b", "name": "B", "event": "B"}]"#;
        let result = StaticData::from_json("[]", castles);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
