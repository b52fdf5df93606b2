//! Pending join table for timestamp-synchronized patterns.
//!
//! Facts that temporal patterns may join on wait here, grouped by
//! `(item_id, timestamp)`. The table is split into independently locked
//! shards so writes to different slots rarely contend.

use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};
use crate::fact::Fact;
use crate::ids::{ItemId, RuleId};
use crate::time::Timestamp;

/// `(item_id, timestamp)`
pub(crate) type SlotKey = (ItemId, Timestamp);

/// Lifecycle of one rule's instantiation over one pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstantiationState {
    /// Some but not all patterns matched.
    Pending,
    /// Every pattern matched; firing is being decided.
    Satisfied,
    /// Terminal: the actions were emitted.
    Fired,
    /// Terminal: the retention window elapsed first.
    Expired,
}

impl InstantiationState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Fired | Self::Expired)
    }
}

#[derive(Debug)]
struct PendingSlot {
    created_at: Timestamp,
    facts: HashMap<String, Vec<Fact>>,
    states: HashMap<RuleId, InstantiationState>,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Slots discarded.
    pub slots: usize,
    /// Instantiations that were still pending when their slot was discarded.
    pub expired: usize,
}

type Shard = HashMap<SlotKey, PendingSlot>;

pub(crate) struct PendingTable {
    shards: Vec<Mutex<Shard>>,
    /// Terminal states of swept slots, kept for lookups.
    settled: Mutex<HashMap<(RuleId, SlotKey), (InstantiationState, Timestamp)>>,
}

fn poisoned() -> FlowError {
    FlowError::internal("pending join table lock poisoned")
}

impl PendingTable {
    pub(crate) fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
            settled: Mutex::new(HashMap::new()),
        }
    }

    fn shard(&self, key: &SlotKey) -> FlowResult<MutexGuard<'_, Shard>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() as usize) % self.shards.len();
        self.shards[index].lock().map_err(|_| poisoned())
    }

    /// Adds `fact` to its slot. Returns `false` if the slot already held an
    /// identical fact.
    pub(crate) fn insert(&self, key: SlotKey, fact: &Fact, now: Timestamp) -> FlowResult<bool> {
        let mut shard = self.shard(&key)?;
        let slot = shard.entry(key).or_insert_with(|| PendingSlot {
            created_at: now,
            facts: HashMap::new(),
            states: HashMap::new(),
        });
        let facts = slot.facts.entry(fact.predicate.clone()).or_default();
        if facts.contains(fact) {
            return Ok(false);
        }
        facts.push(fact.clone());
        Ok(true)
    }

    /// Facts of `predicate` in one slot.
    pub(crate) fn facts(&self, key: SlotKey, predicate: &str) -> FlowResult<Vec<Fact>> {
        let shard = self.shard(&key)?;
        Ok(shard
            .get(&key)
            .and_then(|slot| slot.facts.get(predicate))
            .cloned()
            .unwrap_or_default())
    }

    /// Facts of `predicate` across all slots, optionally narrowed by item or timestamp.
    pub(crate) fn scan(
        &self,
        predicate: &str,
        item: Option<ItemId>,
        timestamp: Option<Timestamp>,
    ) -> FlowResult<Vec<Fact>> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock().map_err(|_| poisoned())?;
            for ((slot_item, slot_ts), slot) in shard.iter() {
                if item.is_some_and(|i| i != *slot_item) || timestamp.is_some_and(|t| t != *slot_ts) {
                    continue;
                }
                if let Some(facts) = slot.facts.get(predicate) {
                    out.extend(facts.iter().cloned());
                }
            }
        }
        Ok(out)
    }

    /// Moves `rule`'s instantiation on `key` to `state`.
    ///
    /// Terminal states are never left, and `Pending` is only entered from
    /// nothing. A slot that has been swept meanwhile is ignored.
    pub(crate) fn mark(&self, key: SlotKey, rule: RuleId, state: InstantiationState) -> FlowResult<()> {
        let mut shard = self.shard(&key)?;
        let Some(slot) = shard.get_mut(&key) else {
            return Ok(());
        };
        match slot.states.entry(rule) {
            Entry::Vacant(v) => {
                v.insert(state);
            }
            Entry::Occupied(mut o) => {
                let current = *o.get();
                if !current.is_terminal() && state != InstantiationState::Pending {
                    o.insert(state);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn state(&self, key: SlotKey, rule: RuleId) -> FlowResult<Option<InstantiationState>> {
        if let Some(state) = self
            .shard(&key)?
            .get(&key)
            .and_then(|slot| slot.states.get(&rule).copied())
        {
            return Ok(Some(state));
        }
        let settled = self.settled.lock().map_err(|_| poisoned())?;
        Ok(settled.get(&(rule, key)).map(|(state, _)| *state))
    }

    /// Drops every state held for `rule`.
    pub(crate) fn forget_rule(&self, rule: RuleId) -> FlowResult<()> {
        for shard in &self.shards {
            let mut shard = shard.lock().map_err(|_| poisoned())?;
            for slot in shard.values_mut() {
                slot.states.remove(&rule);
            }
        }
        self.settled
            .lock()
            .map_err(|_| poisoned())?
            .retain(|(r, _), _| *r != rule);
        Ok(())
    }

    /// Discards slots created before `cutoff`; pending instantiations in them
    /// become `Expired`. Settled records older than `settled_cutoff` are forgotten.
    pub(crate) fn sweep(&self, cutoff: Timestamp, settled_cutoff: Timestamp, now: Timestamp) -> FlowResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut settled_now = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock().map_err(|_| poisoned())?;
            shard.retain(|key, slot| {
                if slot.created_at >= cutoff {
                    return true;
                }
                report.slots += 1;
                for (rule, state) in &slot.states {
                    let terminal = if state.is_terminal() {
                        *state
                    } else {
                        report.expired += 1;
                        InstantiationState::Expired
                    };
                    settled_now.push(((*rule, *key), terminal));
                }
                false
            });
        }

        let mut settled = self.settled.lock().map_err(|_| poisoned())?;
        settled.retain(|_, (_, at)| *at >= settled_cutoff);
        for (key, state) in settled_now {
            settled.insert(key, (state, now));
        }
        Ok(report)
    }

    /// `(slots, pending instantiations)` currently held.
    pub(crate) fn occupancy(&self) -> FlowResult<(usize, usize)> {
        let mut slots = 0;
        let mut pending = 0;
        for shard in &self.shards {
            let shard = shard.lock().map_err(|_| poisoned())?;
            slots += shard.len();
            pending += shard
                .values()
                .flat_map(|slot| slot.states.values())
                .filter(|s| !s.is_terminal())
                .count();
        }
        Ok((slots, pending))
    }
}
