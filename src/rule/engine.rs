//! Forward-chaining matcher.
//!
//! Working memory has two views:
//! - the *current* view keeps the latest fact per `(predicate, item)`; non-temporal
//!   patterns (relations, static attributes, latest dynamic values) join against it
//! - the pending join table keeps timestamped facts per `(item, timestamp)` for
//!   patterns that constrain `timestamp`
//!
//! A new fact seeds every pattern it unifies with; the remaining patterns are
//! joined greedily, most-constrained first. Complete binding tuples are claimed
//! in the fired set, so each tuple fires at most once per rule.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use crate::config::RuleEngineConfig;
use crate::error::{FlowError, FlowResult};
use crate::fact::Fact;
use crate::ids::{ItemId, RuleId};
use crate::rule::ast::{FactPattern, Term};
use crate::rule::compiler::CompiledRule;
use crate::rule::pending::{InstantiationState, PendingTable, SlotKey, SweepReport};
use crate::rule::{Activation, Bindings};
use crate::time::Timestamp;
use crate::value::Value;

#[derive(Debug, Default)]
struct RuleSet {
    by_name: HashMap<String, Arc<CompiledRule>>,
    /// predicate -> (rule, pattern index)
    by_predicate: HashMap<String, Vec<(Arc<CompiledRule>, usize)>>,
    temporal_predicates: HashSet<String>,
}

impl RuleSet {
    fn reindex(&mut self) {
        self.by_predicate.clear();
        self.temporal_predicates.clear();
        let mut rules: Vec<&Arc<CompiledRule>> = self.by_name.values().collect();
        rules.sort_by(|a, b| a.name().cmp(b.name()));
        for rule in rules {
            for (index, pattern) in rule.def.patterns.iter().enumerate() {
                self.by_predicate
                    .entry(pattern.predicate.clone())
                    .or_default()
                    .push((Arc::clone(rule), index));
                if rule.is_temporal(index) {
                    self.temporal_predicates.insert(pattern.predicate.clone());
                }
            }
        }
    }
}

/// Counters and gauges of the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub rules: usize,
    /// Total firings since construction.
    pub fired: u64,
    /// Total instantiations discarded by the retention window.
    pub expired: u64,
    /// Instantiations currently waiting for more facts.
    pub pending: usize,
    pub pending_slots: usize,
    /// Binding tuples currently remembered for duplicate suppression.
    pub remembered_firings: usize,
}

/// The rule engine. Shared across writer threads.
pub struct RuleEngine {
    config: RuleEngineConfig,
    rules: RwLock<RuleSet>,
    current: RwLock<HashMap<String, HashMap<ItemId, Fact>>>,
    pending: PendingTable,
    fired: Mutex<HashMap<[u8; 32], Timestamp>>,
    fired_total: AtomicU64,
    expired_total: AtomicU64,
    last_sweep: AtomicI64,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("config", &self.config)
            .field("fired", &self.fired_total.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn lock_err(what: &str) -> FlowError {
    FlowError::internal(format!("rule engine lock poisoned: {what}"))
}

fn millis(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

impl RuleEngine {
    #[must_use]
    pub fn new(config: RuleEngineConfig) -> Self {
        let pending = PendingTable::new(config.pending_shards);
        Self {
            config,
            rules: RwLock::new(RuleSet::default()),
            current: RwLock::new(HashMap::new()),
            pending,
            fired: Mutex::new(HashMap::new()),
            fired_total: AtomicU64::new(0),
            expired_total: AtomicU64::new(0),
            last_sweep: AtomicI64::new(Timestamp::now().as_millis()),
        }
    }

    /// Installs `rule`, replacing any rule of the same name. Returns the replaced rule.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn register(&self, rule: CompiledRule) -> FlowResult<Option<Arc<CompiledRule>>> {
        let rule = Arc::new(rule);
        let replaced = {
            let mut rules = self.rules.write().map_err(|_| lock_err("rules"))?;
            let replaced = rules.by_name.insert(rule.name().to_string(), Arc::clone(&rule));
            rules.reindex();
            replaced
        };
        if let Some(old) = &replaced {
            self.pending.forget_rule(old.id)?;
        }
        info!(rule = rule.name(), rule_id = %rule.id, replaced = replaced.is_some(), "rule registered");
        Ok(replaced)
    }

    /// Removes the rule named `name`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn remove(&self, name: &str) -> FlowResult<Option<Arc<CompiledRule>>> {
        let removed = {
            let mut rules = self.rules.write().map_err(|_| lock_err("rules"))?;
            let removed = rules.by_name.remove(name);
            if removed.is_some() {
                rules.reindex();
            }
            removed
        };
        if let Some(rule) = &removed {
            self.pending.forget_rule(rule.id)?;
            info!(rule = name, "rule removed");
        }
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn get(&self, name: &str) -> FlowResult<Option<Arc<CompiledRule>>> {
        let rules = self.rules.read().map_err(|_| lock_err("rules"))?;
        Ok(rules.by_name.get(name).cloned())
    }

    /// All rules, by name.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn list(&self) -> FlowResult<Vec<Arc<CompiledRule>>> {
        let rules = self.rules.read().map_err(|_| lock_err("rules"))?;
        let mut out: Vec<_> = rules.by_name.values().cloned().collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(out)
    }

    /// Asserts facts in order and collects the activations they produce.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn assert_facts(&self, facts: impl IntoIterator<Item = Fact>) -> FlowResult<Vec<Activation>> {
        let mut out = Vec::new();
        for fact in facts {
            out.extend(self.assert_fact(fact)?);
        }
        Ok(out)
    }

    /// Adds one fact to working memory and returns the rule instantiations it
    /// completes. Each returned activation is fired exactly here: asserting
    /// the same facts again returns nothing.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn assert_fact(&self, fact: Fact) -> FlowResult<Vec<Activation>> {
        let now = Timestamp::now();
        self.maybe_sweep(now)?;

        let (candidates, temporal) = {
            let rules = self.rules.read().map_err(|_| lock_err("rules"))?;
            (
                rules.by_predicate.get(&fact.predicate).cloned().unwrap_or_default(),
                rules.temporal_predicates.contains(&fact.predicate),
            )
        };

        self.remember_current(&fact)?;
        let slot = fact.timestamp.map(|ts| (fact.item_id, ts));
        if let (Some(key), true) = (slot, temporal) {
            if !self.pending.insert(key, &fact, now)? {
                debug!(predicate = %fact.predicate, item_id = %fact.item_id, "duplicate fact ignored");
                return Ok(Vec::new());
            }
        }

        let mut activations = Vec::new();
        for (rule, index) in candidates {
            let pattern = &rule.def.patterns[index];
            let seeds_slot = rule.is_temporal(index);
            let Some(seed) = unify(pattern, &fact, &Bindings::new()) else {
                continue;
            };

            let remaining: Vec<usize> = (0..rule.def.patterns.len()).filter(|i| *i != index).collect();
            let mut complete = Vec::new();
            self.join(&rule, &remaining, seed, &mut complete)?;
            debug!(rule = rule.name(), predicate = %fact.predicate, matches = complete.len(), "join evaluated");

            if complete.is_empty() {
                if let Some(key) = slot.filter(|_| seeds_slot) {
                    self.pending.mark(key, rule.id, InstantiationState::Pending)?;
                }
                continue;
            }
            for bindings in complete {
                let slots = temporal_slots(&rule, &bindings);
                for key in &slots {
                    self.pending.mark(*key, rule.id, InstantiationState::Satisfied)?;
                }
                let claimed = self.claim(rule.id, &bindings, now)?;
                // An already claimed tuple fired earlier, so its slots are settled too.
                for key in &slots {
                    self.pending.mark(*key, rule.id, InstantiationState::Fired)?;
                }
                if claimed {
                    self.fired_total.fetch_add(1, Ordering::Relaxed);
                    info!(rule = rule.name(), item_id = %fact.item_id, "rule fired");
                    activations.push(Activation {
                        rule: Arc::clone(&rule),
                        bindings,
                    });
                }
            }
        }
        Ok(activations)
    }

    /// Expires pending slots older than the retention window, relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn sweep_at(&self, now: Timestamp) -> FlowResult<SweepReport> {
        let cutoff = Timestamp::from_millis(now.as_millis().saturating_sub(millis(self.config.retention_window_ms)));
        let fired_cutoff =
            Timestamp::from_millis(now.as_millis().saturating_sub(millis(self.config.fired_retention_ms)));

        let report = self.pending.sweep(cutoff, fired_cutoff, now)?;
        self.expired_total.fetch_add(report.expired as u64, Ordering::Relaxed);
        self.fired
            .lock()
            .map_err(|_| lock_err("fired"))?
            .retain(|_, at| *at >= fired_cutoff);
        self.last_sweep.store(now.as_millis(), Ordering::Relaxed);
        if report.slots > 0 {
            debug!(slots = report.slots, expired = report.expired, "pending slots swept");
        }
        Ok(report)
    }

    /// Sweeps relative to the wall clock.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn sweep(&self) -> FlowResult<SweepReport> {
        self.sweep_at(Timestamp::now())
    }

    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn stats(&self) -> FlowResult<EngineStats> {
        let rules = self.rules.read().map_err(|_| lock_err("rules"))?.by_name.len();
        let (pending_slots, pending) = self.pending.occupancy()?;
        let remembered_firings = self.fired.lock().map_err(|_| lock_err("fired"))?.len();
        Ok(EngineStats {
            rules,
            fired: self.fired_total.load(Ordering::Relaxed),
            expired: self.expired_total.load(Ordering::Relaxed),
            pending,
            pending_slots,
            remembered_firings,
        })
    }

    /// State of rule `name`'s instantiation over the samples of `item` at `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn instantiation_state(
        &self,
        name: &str,
        item: ItemId,
        timestamp: Timestamp,
    ) -> FlowResult<Option<InstantiationState>> {
        let Some(rule) = self.get(name)? else {
            return Ok(None);
        };
        self.pending.state((item, timestamp), rule.id)
    }

    fn maybe_sweep(&self, now: Timestamp) -> FlowResult<()> {
        let interval = millis(self.config.retention_window_ms / 4).max(1);
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.as_millis().saturating_sub(last) < interval {
            return Ok(());
        }
        if self
            .last_sweep
            .compare_exchange(last, now.as_millis(), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.sweep_at(now)?;
        }
        Ok(())
    }

    /// Last write wins, whatever the producer timestamp.
    fn remember_current(&self, fact: &Fact) -> FlowResult<()> {
        let mut current = self.current.write().map_err(|_| lock_err("current"))?;
        current
            .entry(fact.predicate.clone())
            .or_default()
            .insert(fact.item_id, fact.clone());
        Ok(())
    }

    fn claim(&self, rule: RuleId, bindings: &Bindings, now: Timestamp) -> FlowResult<bool> {
        let key = binding_key(rule, bindings);
        let mut fired = self.fired.lock().map_err(|_| lock_err("fired"))?;
        if fired.contains_key(&key) {
            return Ok(false);
        }
        fired.insert(key, now);
        Ok(true)
    }

    fn join(
        &self,
        rule: &CompiledRule,
        remaining: &[usize],
        bindings: Bindings,
        out: &mut Vec<Bindings>,
    ) -> FlowResult<()> {
        let Some((at, &next)) = remaining
            .iter()
            .enumerate()
            .min_by_key(|(_, i)| (Reverse(constraint_score(&rule.def.patterns[**i], &bindings)), **i))
        else {
            out.push(bindings);
            return Ok(());
        };
        let pattern = &rule.def.patterns[next];
        let rest: Vec<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != at)
            .map(|(_, p)| *p)
            .collect();

        for fact in self.candidates(pattern, rule.is_temporal(next), &bindings)? {
            if let Some(extended) = unify(pattern, &fact, &bindings) {
                self.join(rule, &rest, extended, out)?;
            }
        }
        Ok(())
    }

    fn candidates(&self, pattern: &FactPattern, temporal: bool, bindings: &Bindings) -> FlowResult<Vec<Fact>> {
        let item = pattern
            .term("item_id")
            .and_then(|t| resolve(t, bindings))
            .and_then(|v| v.as_item());
        if temporal {
            let timestamp = pattern
                .term("timestamp")
                .and_then(|t| resolve(t, bindings))
                .and_then(|v| v.as_int())
                .map(Timestamp::from_millis);
            return match (item, timestamp) {
                (Some(item), Some(ts)) => self.pending.facts((item, ts), &pattern.predicate),
                _ => self.pending.scan(&pattern.predicate, item, timestamp),
            };
        }

        let current = self.current.read().map_err(|_| lock_err("current"))?;
        let Some(by_item) = current.get(&pattern.predicate) else {
            return Ok(Vec::new());
        };
        Ok(match item {
            Some(item) => by_item.get(&item).cloned().into_iter().collect(),
            None => by_item.values().cloned().collect(),
        })
    }
}

/// How strongly `bindings` narrow `pattern`: bound item ids and timestamps
/// hit the indexes directly.
fn constraint_score(pattern: &FactPattern, bindings: &Bindings) -> usize {
    pattern
        .fields
        .iter()
        .filter(|f| resolve(&f.term, bindings).is_some())
        .map(|f| match f.field.as_str() {
            "item_id" => 4,
            "timestamp" => 2,
            _ => 1,
        })
        .sum()
}

fn resolve(term: &Term, bindings: &Bindings) -> Option<Value> {
    match term {
        Term::Var(name) => bindings.get(name).cloned(),
        Term::Const(value) => Some(value.clone()),
        Term::List(items) => items
            .iter()
            .map(|t| resolve(t, bindings))
            .collect::<Option<Vec<_>>>()
            .map(Value::List),
    }
}

fn unify(pattern: &FactPattern, fact: &Fact, bindings: &Bindings) -> Option<Bindings> {
    if pattern.predicate != fact.predicate {
        return None;
    }
    let mut out = bindings.clone();
    for constraint in &pattern.fields {
        let actual = fact.field(&constraint.field)?;
        match &constraint.term {
            Term::Var(name) => match out.get(name) {
                Some(bound) if *bound != actual => return None,
                Some(_) => {}
                None => {
                    out.insert(name.clone(), actual);
                }
            },
            term => {
                if resolve(term, &out)? != actual {
                    return None;
                }
            }
        }
    }
    Some(out)
}

/// The pending slots a complete binding tuple was joined from.
fn temporal_slots(rule: &CompiledRule, bindings: &Bindings) -> Vec<SlotKey> {
    let mut out = Vec::new();
    for (index, pattern) in rule.def.patterns.iter().enumerate() {
        if !rule.is_temporal(index) {
            continue;
        }
        let item = pattern
            .term("item_id")
            .and_then(|t| resolve(t, bindings))
            .and_then(|v| v.as_item());
        let timestamp = pattern
            .term("timestamp")
            .and_then(|t| resolve(t, bindings))
            .and_then(|v| v.as_int())
            .map(Timestamp::from_millis);
        if let (Some(item), Some(ts)) = (item, timestamp) {
            if !out.contains(&(item, ts)) {
                out.push((item, ts));
            }
        }
    }
    out
}

fn binding_key(rule: RuleId, bindings: &Bindings) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(rule.as_uuid().as_bytes());
    for (name, value) in bindings {
        let value = value.canonical_key();
        hasher.update(&(name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(&(value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    }
    *hasher.finalize().as_bytes()
}
