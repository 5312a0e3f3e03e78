//! Stronghold Ledger
//!
//! Every stronghold is created once from the static roster and never
//! destroyed; only ownership and the numeric fields change. Fields are
//! addressed by a small index shared with the remote authority:
//!
//! | index  | field                         |
//! |--------|-------------------------------|
//! | 1      | owning guild                  |
//! | 2..=5  | economy / defense counters    |
//! | 6..=8  | schedule timestamps           |
//! | 9      | cashier visibility            |
//! | 10..17 | defender visibility (8 slots) |
//! | 18..25 | defender hit points (8 slots) |
//!
//! The ledger also keeps a purely in-memory "last persisted" view of the
//! owner and defender hit points so the drift job only writes what changed.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::constants::MAX_GUARDIANS;
use crate::error::GuildError;
use crate::protocol::StrongholdSnapshot;
use crate::types::{CastleId, GuildId};

/// Addressable stronghold field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrongholdField {
    Owner,
    Economy,
    Defense,
    TriggerEconomy,
    TriggerDefense,
    NextTime,
    PayTime,
    CreateTime,
    CashierVisible,
    GuardianVisible(u8),
    GuardianHp(u8),
}

const GUARDIAN_VISIBLE_BASE: u32 = 10;
const GUARDIAN_HP_BASE: u32 = GUARDIAN_VISIBLE_BASE + MAX_GUARDIANS as u32;

impl StrongholdField {
    pub fn index(&self) -> u32 {
        match self {
            StrongholdField::Owner => 1,
            StrongholdField::Economy => 2,
            StrongholdField::Defense => 3,
            StrongholdField::TriggerEconomy => 4,
            StrongholdField::TriggerDefense => 5,
            StrongholdField::NextTime => 6,
            StrongholdField::PayTime => 7,
            StrongholdField::CreateTime => 8,
            StrongholdField::CashierVisible => 9,
            StrongholdField::GuardianVisible(i) => GUARDIAN_VISIBLE_BASE + *i as u32,
            StrongholdField::GuardianHp(i) => GUARDIAN_HP_BASE + *i as u32,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        let field = match index {
            1 => StrongholdField::Owner,
            2 => StrongholdField::Economy,
            3 => StrongholdField::Defense,
            4 => StrongholdField::TriggerEconomy,
            5 => StrongholdField::TriggerDefense,
            6 => StrongholdField::NextTime,
            7 => StrongholdField::PayTime,
            8 => StrongholdField::CreateTime,
            9 => StrongholdField::CashierVisible,
            i if (GUARDIAN_VISIBLE_BASE..GUARDIAN_HP_BASE).contains(&i) => {
                StrongholdField::GuardianVisible((i - GUARDIAN_VISIBLE_BASE) as u8)
            }
            i if (GUARDIAN_HP_BASE..GUARDIAN_HP_BASE + MAX_GUARDIANS as u32).contains(&i) => {
                StrongholdField::GuardianHp((i - GUARDIAN_HP_BASE) as u8)
            }
            _ => return None,
        };
        Some(field)
    }
}

/// One defender slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardian {
    pub visible: bool,
    pub hp: u32,
}

/// Static roster entry, loaded at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongholdDef {
    pub id: CastleId,
    pub zone: String,
    pub name: String,
    /// Script event owned by this stronghold's controller
    pub event: String,
}

/// A capturable stronghold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stronghold {
    pub id: CastleId,
    pub zone: String,
    pub name: String,
    pub event: String,
    /// Owning guild, 0 when unowned
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

impl Stronghold {
    pub fn from_def(def: &StrongholdDef) -> Self {
        Self {
            id: def.id,
            zone: def.zone.clone(),
            name: def.name.clone(),
            event: def.event.clone(),
            owner: 0,
            economy: 0,
            defense: 0,
            trigger_economy: 0,
            trigger_defense: 0,
            next_time: 0,
            pay_time: 0,
            create_time: 0,
            cashier_visible: false,
            guardians: vec![Guardian::default(); MAX_GUARDIANS],
        }
    }

    pub fn field(&self, field: StrongholdField) -> u32 {
        match field {
            StrongholdField::Owner => self.owner,
            StrongholdField::Economy => self.economy,
            StrongholdField::Defense => self.defense,
            StrongholdField::TriggerEconomy => self.trigger_economy,
            StrongholdField::TriggerDefense => self.trigger_defense,
            StrongholdField::NextTime => self.next_time,
            StrongholdField::PayTime => self.pay_time,
            StrongholdField::CreateTime => self.create_time,
            StrongholdField::CashierVisible => self.cashier_visible as u32,
            StrongholdField::GuardianVisible(i) => self.guardians[i as usize].visible as u32,
            StrongholdField::GuardianHp(i) => self.guardians[i as usize].hp,
        }
    }

    /// Write one field, returning its previous value
    pub fn set_field(&mut self, field: StrongholdField, value: u32) -> u32 {
        let previous = self.field(field);
        match field {
            StrongholdField::Owner => self.owner = value,
            StrongholdField::Economy => self.economy = value,
            StrongholdField::Defense => self.defense = value,
            StrongholdField::TriggerEconomy => self.trigger_economy = value,
            StrongholdField::TriggerDefense => self.trigger_defense = value,
            StrongholdField::NextTime => self.next_time = value,
            StrongholdField::PayTime => self.pay_time = value,
            StrongholdField::CreateTime => self.create_time = value,
            StrongholdField::CashierVisible => self.cashier_visible = value != 0,
            StrongholdField::GuardianVisible(i) => self.guardians[i as usize].visible = value != 0,
            StrongholdField::GuardianHp(i) => self.guardians[i as usize].hp = value,
        }
        previous
    }
}

/// Result of a single-field write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldChange {
    pub field: StrongholdField,
    pub previous: u32,
    pub value: u32,
}

impl FieldChange {
    pub fn owner_changed(&self) -> bool {
        self.field == StrongholdField::Owner && self.previous != self.value
    }
}

#[derive(Debug, Clone, Default)]
struct Observed {
    owner: GuildId,
    guardian_hp: Vec<u32>,
}

/// In-memory table of strongholds keyed by id
#[derive(Debug, Default)]
pub struct StrongholdLedger {
    castles: BTreeMap<CastleId, Stronghold>,
    observed: HashMap<CastleId, Observed>,
}

impl StrongholdLedger {
    pub fn from_roster(defs: &[StrongholdDef]) -> Self {
        let mut ledger = Self::default();
        for def in defs {
            ledger.castles.insert(def.id, Stronghold::from_def(def));
            ledger.observed.insert(
                def.id,
                Observed {
                    owner: 0,
                    guardian_hp: vec![0; MAX_GUARDIANS],
                },
            );
        }
        ledger
    }

    pub fn len(&self) -> usize {
        self.castles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.castles.is_empty()
    }

    pub fn ids(&self) -> Vec<CastleId> {
        self.castles.keys().copied().collect()
    }

    pub fn lookup(&self, id: CastleId) -> Option<&Stronghold> {
        self.castles.get(&id)
    }

    pub fn lookup_mut(&mut self, id: CastleId) -> Option<&mut Stronghold> {
        self.castles.get_mut(&id)
    }

    pub fn lookup_by_zone(&self, zone: &str) -> Option<&Stronghold> {
        self.castles.values().find(|c| c.zone.eq_ignore_ascii_case(zone))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stronghold> {
        self.castles.values()
    }

    pub fn owned_by(&self, guild_id: GuildId) -> Vec<CastleId> {
        self.castles
            .values()
            .filter(|c| guild_id != 0 && c.owner == guild_id)
            .map(|c| c.id)
            .collect()
    }

    /// Mutate exactly one field
    pub fn apply_field(
        &mut self,
        id: CastleId,
        field: StrongholdField,
        value: u32,
    ) -> Result<FieldChange, GuildError> {
        let castle = self
            .castles
            .get_mut(&id)
            .ok_or(GuildError::UnknownStronghold(id))?;
        let previous = castle.set_field(field, value);
        Ok(FieldChange {
            field,
            previous,
            value,
        })
    }

    /// Overwrite every mutable field from an authoritative snapshot
    pub fn apply_snapshot(&mut self, snapshot: &StrongholdSnapshot) -> Result<GuildId, GuildError> {
        let castle = self
            .castles
            .get_mut(&snapshot.castle_id)
            .ok_or(GuildError::UnknownStronghold(snapshot.castle_id))?;
        let previous_owner = castle.owner;
        castle.owner = snapshot.owner;
        castle.economy = snapshot.economy;
        castle.defense = snapshot.defense;
        castle.trigger_economy = snapshot.trigger_economy;
        castle.trigger_defense = snapshot.trigger_defense;
        castle.next_time = snapshot.next_time;
        castle.pay_time = snapshot.pay_time;
        castle.create_time = snapshot.create_time;
        castle.cashier_visible = snapshot.cashier_visible;
        for (slot, guardian) in castle.guardians.iter_mut().enumerate() {
            *guardian = snapshot.guardians.get(slot).copied().unwrap_or_default();
        }
        Ok(previous_owner)
    }

    /// Record the current value of a tracked field as already persisted
    pub fn mark_persisted(&mut self, id: CastleId, field: StrongholdField) {
        let (Some(castle), Some(observed)) = (self.castles.get(&id), self.observed.get_mut(&id))
        else {
            return;
        };
        match field {
            StrongholdField::Owner => observed.owner = castle.owner,
            StrongholdField::GuardianHp(i) => {
                if let Some(hp) = observed.guardian_hp.get_mut(i as usize) {
                    *hp = castle.guardians[i as usize].hp;
                }
            }
            _ => {}
        }
    }

    /// Record every tracked field of `id` as already persisted
    pub fn mark_all_persisted(&mut self, id: CastleId) {
        self.mark_persisted(id, StrongholdField::Owner);
        for slot in 0..MAX_GUARDIANS as u8 {
            self.mark_persisted(id, StrongholdField::GuardianHp(slot));
        }
    }

    /// Tracked fields that moved since they were last persisted.
    ///
    /// The persisted view is advanced as part of the call, so each drift is
    /// reported exactly once.
    pub fn take_drift(&mut self) -> Vec<(CastleId, StrongholdField, u32)> {
        let mut drift = Vec::new();
        for castle in self.castles.values() {
            let observed = self.observed.entry(castle.id).or_default();
            if observed.guardian_hp.len() < MAX_GUARDIANS {
                observed.guardian_hp.resize(MAX_GUARDIANS, 0);
            }
            if observed.owner != castle.owner {
                observed.owner = castle.owner;
                drift.push((castle.id, StrongholdField::Owner, castle.owner));
            }
            for (slot, guardian) in castle.guardians.iter().enumerate() {
                if observed.guardian_hp[slot] != guardian.hp {
                    observed.guardian_hp[slot] = guardian.hp;
                    drift.push((castle.id, StrongholdField::GuardianHp(slot as u8), guardian.hp));
                }
            }
        }
        drift
    }
}
