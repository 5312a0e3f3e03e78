//! Write-Coalescing Buffer for guild experience
//!
//! Contributions are accumulated per (guild, account, character) between
//! flush cycles so the authority sees one write per member per cycle instead
//! of one per kill. The pool is a fixed-capacity arena with a free list:
//! - a new key takes a slot from the free list
//! - an existing key keeps accumulating (saturating, never wraps)
//! - when no slot is free, contributions for new keys are rejected
//! - `drain` empties every slot back onto the free list

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::GuildError;
use crate::types::{AccountId, CharId, GuildId};

/// Key of one accumulator record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpKey {
    pub guild_id: GuildId,
    pub account_id: AccountId,
    pub char_id: CharId,
}

/// Accumulated experience for one member within a flush window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpRecord {
    pub key: ExpKey,
    pub exp: u64,
}

/// Bounded pool of accumulator records
#[derive(Debug)]
pub struct ExpPool {
    slots: Vec<Option<ExpRecord>>,
    free: Vec<usize>,
    index: HashMap<ExpKey, usize>,
}

impl ExpPool {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            // reversed so slot 0 is handed out first
            free: (0..capacity).rev().collect(),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Records currently holding experience
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, key: &ExpKey) -> Option<u64> {
        let slot = *self.index.get(key)?;
        self.slots[slot].map(|r| r.exp)
    }

    /// Add `amount` to the key's record, allocating one if needed.
    ///
    /// Returns the record's new total.
    pub fn contribute(&mut self, key: ExpKey, amount: u64) -> Result<u64, GuildError> {
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                let slot = self.free.pop().ok_or(GuildError::ExpPoolExhausted)?;
                self.slots[slot] = Some(ExpRecord { key, exp: 0 });
                self.index.insert(key, slot);
                slot
            }
        };
        let record = self.slots[slot]
            .as_mut()
            .ok_or(GuildError::ExpPoolExhausted)?;
        record.exp = record.exp.saturating_add(amount);
        Ok(record.exp)
    }

    /// Take every record and return all slots to the free list
    pub fn drain(&mut self) -> Vec<ExpRecord> {
        let mut records = Vec::with_capacity(self.index.len());
        for (_, slot) in self.index.drain() {
            if let Some(record) = self.slots[slot].take() {
                records.push(record);
            }
            self.free.push(slot);
        }
        records
    }

    /// Drop every record belonging to `guild_id` (the guild is gone)
    pub fn discard_guild(&mut self, guild_id: GuildId) -> usize {
        let doomed: Vec<ExpKey> = self
            .index
            .keys()
            .filter(|k| k.guild_id == guild_id)
            .copied()
            .collect();
        for key in &doomed {
            if let Some(slot) = self.index.remove(key) {
                self.slots[slot] = None;
                self.free.push(slot);
            }
        }
        doomed.len()
    }
}

/// Portion of `amount` paid to the guild at `tax` percent
pub fn taxed_amount(amount: u64, tax: u32) -> u64 {
    if tax == 0 {
        return 0;
    }
    if tax >= crate::constants::FULL_TAX {
        return amount;
    }
    ((amount as u128 * tax as u128) / 100) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(char_id: CharId) -> ExpKey {
        ExpKey {
            guild_id: 7,
            account_id: char_id,
            char_id,
        }
    }

    #[test]
    fn test_contribute_accumulates_per_key() {
        let mut pool = ExpPool::with_capacity(4);
        assert_eq!(pool.contribute(key(1), 10), Ok(10));
        assert_eq!(pool.contribute(key(1), 5), Ok(15));
        assert_eq!(pool.contribute(key(2), 3), Ok(3));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(&key(1)), Some(15));
    }

    #[test]
    fn test_contribute_saturates() {
        let mut pool = ExpPool::with_capacity(1);
        pool.contribute(key(1), u64::MAX - 1).unwrap();
        assert_eq!(pool.contribute(key(1), 10), Ok(u64::MAX));
    }

    #[test]
    fn test_full_pool_rejects_new_keys_only() {
        let mut pool = ExpPool::with_capacity(2);
        pool.contribute(key(1), 1).unwrap();
        pool.contribute(key(2), 1).unwrap();
        assert_eq!(pool.contribute(key(3), 1), Err(GuildError::ExpPoolExhausted));
        assert_eq!(pool.contribute(key(1), 1), Ok(2));
    }

    #[test]
    fn test_drain_recycles_slots() {
        let mut pool = ExpPool::with_capacity(2);
        pool.contribute(key(1), 4).unwrap();
        pool.contribute(key(2), 6).unwrap();
        let mut drained = pool.drain();
        drained.sort_by_key(|r| r.key.char_id);
        assert_eq!(drained.iter().map(|r| r.exp).collect::<Vec<_>>(), vec![4, 6]);
        assert!(pool.is_empty());
        assert_eq!(pool.get(&key(1)), None);

        pool.contribute(key(3), 1).unwrap();
        pool.contribute(key(4), 1).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_discard_guild() {
        let mut pool = ExpPool::with_capacity(3);
        pool.contribute(key(1), 1).unwrap();
        pool.contribute(
            ExpKey {
                guild_id: 8,
                account_id: 9,
                char_id: 9,
            },
            1,
        )
        .unwrap();
        assert_eq!(pool.discard_guild(7), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_taxed_amount() {
        assert_eq!(taxed_amount(50, 40), 20);
        assert_eq!(taxed_amount(50, 0), 0);
        assert_eq!(taxed_amount(50, 100), 50);
        assert_eq!(taxed_amount(50, 150), 50);
        assert_eq!(taxed_amount(u64::MAX, 99), ((u64::MAX as u128 * 99) / 100) as u64);
    }
}
