//! Pending-Event Ledger
//!
//! Multi-map from a key (guild id, or stronghold + field) to the deferred
//! actions waiting for that key's data. Resolving a key detaches the whole
//! chain at once; actions run in registration order.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::stronghold::StrongholdField;
use crate::types::CastleId;

/// Work deferred until a key's data arrives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeferredAction {
    /// Fire a script event by name
    ScriptEvent(String),
    /// Re-resolve the defenders of a stronghold
    RefreshDefenders(CastleId),
}

/// Ledger key for stronghold field loads
pub type FieldKey = (CastleId, StrongholdField);

/// Keyed chains of deferred actions
#[derive(Debug, Clone)]
pub struct PendingEvents<K: Eq + Hash> {
    chains: HashMap<K, Vec<DeferredAction>>,
}

impl<K: Eq + Hash> Default for PendingEvents<K> {
    fn default() -> Self {
        Self {
            chains: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> PendingEvents<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action to the key's chain.
    ///
    /// Returns `true` if this started a new chain, i.e. nobody has asked for
    /// this key's data yet.
    pub fn register(&mut self, key: K, action: DeferredAction) -> bool {
        let chain = self.chains.entry(key).or_default();
        chain.push(action);
        chain.len() == 1
    }

    /// Detach and return the key's chain, oldest first
    pub fn take(&mut self, key: &K) -> Vec<DeferredAction> {
        self.chains.remove(key).unwrap_or_default()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.chains.contains_key(key)
    }

    pub fn chain_len(&self, key: &K) -> usize {
        self.chains.get(key).map(Vec::len).unwrap_or(0)
    }

    /// Number of keys with a waiting chain
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
