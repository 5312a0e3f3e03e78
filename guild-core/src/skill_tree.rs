//! Guild skill prerequisite tree
//!
//! Loaded once at startup. Each entry names a skill, its maximum level and up
//! to five `(skill, level)` prerequisites that must be met before the first
//! point can be spent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, GuildError};
use crate::guild::Guild;

/// Maximum prerequisites per skill
pub const MAX_PREREQUISITES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prerequisite {
    pub skill_id: u16,
    pub level: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillTreeEntry {
    pub id: u16,
    pub max_level: u16,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
}

/// Lookup table of learnable guild skills
#[derive(Debug, Clone, Default)]
pub struct SkillTree {
    entries: HashMap<u16, SkillTreeEntry>,
}

impl SkillTree {
    pub fn new(entries: Vec<SkillTreeEntry>) -> Result<Self, ConfigError> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if entry.prerequisites.len() > MAX_PREREQUISITES {
                return Err(ConfigError::Invalid(format!(
                    "skill {} lists {} prerequisites (max {})",
                    entry.id,
                    entry.prerequisites.len(),
                    MAX_PREREQUISITES
                )));
            }
            if entry.max_level == 0 {
                return Err(ConfigError::Invalid(format!(
                    "skill {} has max_level 0",
                    entry.id
                )));
            }
            if map.insert(entry.id, entry.clone()).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "skill {} listed twice",
                    entry.id
                )));
            }
        }
        Ok(Self { entries: map })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, skill_id: u16) -> Option<&SkillTreeEntry> {
        self.entries.get(&skill_id)
    }

    pub fn max_level(&self, skill_id: u16) -> u16 {
        self.entries.get(&skill_id).map(|e| e.max_level).unwrap_or(0)
    }

    /// Check that `guild` may put one more point into `skill_id`
    pub fn check_learnable(&self, guild: &Guild, skill_id: u16) -> Result<(), GuildError> {
        let entry = self
            .entries
            .get(&skill_id)
            .ok_or(GuildError::SkillUnavailable(skill_id))?;
        if guild.skill_points == 0 {
            return Err(GuildError::NoSkillPoints);
        }
        if guild.skill_level(skill_id) >= entry.max_level {
            return Err(GuildError::SkillUnavailable(skill_id));
        }
        let unmet = entry
            .prerequisites
            .iter()
            .any(|p| guild.skill_level(p.skill_id) < p.level);
        if unmet {
            return Err(GuildError::SkillUnavailable(skill_id));
        }
        Ok(())
    }
}
