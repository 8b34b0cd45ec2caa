//! Condition storage.
//!
//! Conditions are the only state that survives between reconcile passes apart
//! from the cluster/update states themselves. Two flavours exist:
//!
//! - [`UpdateConditions`]: flags scoped to one update episode, persisted in
//!   `status.updateStatus.conditions` and wiped when an episode starts or ends.
//! - [`ConditionBuilder`]: long-lived conditions in `status.conditions`.
//!
//! Components only write through [`ScopedConditions`], which prefixes every
//! name with the owner so that each key has exactly one writer.

use crate::crd::{Condition, ConditionStatus};

/// Read-modify-write access to named tri-state flags.
pub trait ConditionStore {
    /// Status of a condition, `Unknown` when it was never set.
    fn get(&self, name: &str) -> ConditionStatus;

    /// Create or update a condition.
    fn set(&mut self, name: &str, status: ConditionStatus, reason: &str, message: &str);

    /// Message of a condition, `None` when it was never set.
    fn message(&self, name: &str) -> Option<&str>;

    /// Whether the condition is currently `True`.
    fn is_true(&self, name: &str) -> bool {
        self.get(name) == ConditionStatus::True
    }
}

/// Replace the condition of the same type, keeping the transition time when
/// the status did not change. Returns whether anything changed.
fn upsert(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing) => {
            if existing.status == condition.status
                && existing.reason == condition.reason
                && existing.message == condition.message
            {
                return false;
            }
            let keep_time = existing.status == condition.status;
            let last_transition_time = std::mem::take(&mut existing.last_transition_time);
            *existing = condition;
            if keep_time {
                existing.last_transition_time = last_transition_time;
            }
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

/// Episode-scoped conditions loaded from the cluster status.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateConditions {
    conditions: Vec<Condition>,
    dirty: bool,
}

impl UpdateConditions {
    /// Load the conditions persisted in the cluster status.
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            dirty: false,
        }
    }

    /// Drop every condition. Called when an episode starts or ends so that no
    /// flag leaks from one episode into the next.
    pub fn clear(&mut self) {
        if !self.conditions.is_empty() {
            self.conditions.clear();
            self.dirty = true;
        }
    }

    /// Write access restricted to names owned by `owner`.
    pub fn scoped<'a>(&'a mut self, owner: &'a str) -> ScopedConditions<'a> {
        ScopedConditions { owner, store: self }
    }

    /// Whether any condition changed since loading.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn as_slice(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn into_vec(self) -> Vec<Condition> {
        self.conditions
    }
}

impl ConditionStore for UpdateConditions {
    fn get(&self, name: &str) -> ConditionStatus {
        self.conditions
            .iter()
            .find(|c| c.r#type == name)
            .map(|c| c.status)
            .unwrap_or_default()
    }

    fn message(&self, name: &str) -> Option<&str> {
        self.conditions
            .iter()
            .find(|c| c.r#type == name)
            .map(|c| c.message.as_str())
    }

    fn set(&mut self, name: &str, status: ConditionStatus, reason: &str, message: &str) {
        if upsert(
            &mut self.conditions,
            Condition::new(name, status, reason, message),
        ) {
            self.dirty = true;
        }
    }
}

/// View of [`UpdateConditions`] that reads and writes `<owner><name>` keys.
pub struct ScopedConditions<'a> {
    owner: &'a str,
    store: &'a mut UpdateConditions,
}

impl ScopedConditions<'_> {
    /// Fully qualified name of an owned condition.
    pub fn key(&self, name: &str) -> String {
        format!("{}{}", self.owner, name)
    }
}

impl ConditionStore for ScopedConditions<'_> {
    fn get(&self, name: &str) -> ConditionStatus {
        self.store.get(&self.key(name))
    }

    fn message(&self, name: &str) -> Option<&str> {
        self.store.message(&self.key(name))
    }

    fn set(&mut self, name: &str, status: ConditionStatus, reason: &str, message: &str) {
        let key = self.key(name);
        self.store.set(&key, status, reason, message);
    }
}

/// Builder for managing the long-lived conditions list
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Start from the conditions currently persisted
    pub fn new(existing: Vec<Condition>) -> Self {
        Self {
            conditions: existing,
        }
    }

    /// Add or update a condition
    pub fn set(&mut self, condition: Condition) -> &mut Self {
        upsert(&mut self.conditions, condition);
        self
    }

    /// Set Ready condition
    pub fn ready(&mut self, ready: bool, reason: &str, message: &str) -> &mut Self {
        self.set(Condition::ready(ready, reason, message))
    }

    /// Set FullUpdateRequired condition
    pub fn full_update_required(&mut self, required: bool, reason: &str, message: &str) -> &mut Self {
        self.set(Condition::full_update_required(required, reason, message))
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}
