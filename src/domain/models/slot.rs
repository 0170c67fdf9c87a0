//! Instance slot domain model.
//!
//! Slot `n` of provider `p` is always named `{p}-{n}`. Occupancy is derived
//! from active assignments plus the ledger of live [`SlotClaim`]s; a claim is
//! the only way to hold a slot and it frees the slot when dropped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Display name of the sentinel owner used while the pipeline works on an assignment.
pub const MERGE_WORKER: &str = "merge-worker";

/// Deterministic instance id for a slot.
pub fn instance_id(provider: &str, slot_number: u32) -> String {
    format!("{provider}-{slot_number}")
}

/// Who currently holds a claimed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "assignment_id", rename_all = "snake_case")]
pub enum SlotOwner {
    /// The agent run of an assignment
    Assignment(Uuid),
    /// The integration pipeline, on behalf of an assignment
    MergeWorker(Uuid),
}

impl SlotOwner {
    /// Assignment the slot is held for, whoever holds it.
    pub fn assignment_id(&self) -> Uuid {
        match self {
            Self::Assignment(id) | Self::MergeWorker(id) => *id,
        }
    }

    /// Holder name shown in slot views.
    pub fn label(&self) -> String {
        match self {
            Self::Assignment(id) => id.to_string(),
            Self::MergeWorker(_) => MERGE_WORKER.to_string(),
        }
    }
}

/// Shared record of live claims, keyed by instance id.
#[derive(Debug, Clone, Default)]
pub struct SlotLedger {
    inner: Arc<Mutex<HashMap<String, SlotOwner>>>,
}

impl SlotLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<String, SlotOwner>) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Insert `owner` for `instance_id` unless it is already held.
    pub(crate) fn try_insert(&self, instance_id: &str, owner: SlotOwner) -> bool {
        self.with(|map| {
            if map.contains_key(instance_id) {
                false
            } else {
                map.insert(instance_id.to_string(), owner);
                true
            }
        })
    }

    fn set_owner(&self, instance_id: &str, owner: SlotOwner) {
        self.with(|map| {
            if let Some(entry) = map.get_mut(instance_id) {
                *entry = owner;
            }
        });
    }

    fn remove(&self, instance_id: &str) -> Option<SlotOwner> {
        self.with(|map| map.remove(instance_id))
    }

    /// Current owner of `instance_id`, if claimed.
    pub fn owner(&self, instance_id: &str) -> Option<SlotOwner> {
        self.with(|map| map.get(instance_id).copied())
    }

    /// Whether a live claim exists for `instance_id`.
    pub fn is_held(&self, instance_id: &str) -> bool {
        self.owner(instance_id).is_some()
    }

    /// Number of live claims across all providers.
    pub fn held_count(&self) -> usize {
        self.with(|map| map.len())
    }
}

/// Owned handle of an occupied slot.
///
/// Not `Clone`: exactly one handle exists per occupied slot, and releasing
/// consumes it. Dropping the handle also releases the slot.
#[derive(Debug)]
pub struct SlotClaim {
    provider: String,
    slot_number: u32,
    instance_id: String,
    owner: SlotOwner,
    ledger: SlotLedger,
}

impl SlotClaim {
    /// Only the allocator mints claims, after winning `try_insert`.
    pub(crate) fn new(provider: &str, slot_number: u32, owner: SlotOwner, ledger: SlotLedger) -> Self {
        Self {
            provider: provider.to_string(),
            slot_number,
            instance_id: instance_id(provider, slot_number),
            owner,
            ledger,
        }
    }

    /// Provider the slot belongs to.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// 1-based slot index within the provider.
    pub fn slot_number(&self) -> u32 {
        self.slot_number
    }

    /// `{provider}-{slot_number}`
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Current holder of the slot.
    pub fn owner(&self) -> SlotOwner {
        self.owner
    }

    /// Mark the slot as held by the merge worker on behalf of the same assignment.
    pub fn hand_to_merge_worker(&mut self) {
        self.owner = SlotOwner::MergeWorker(self.owner.assignment_id());
        self.ledger.set_owner(&self.instance_id, self.owner);
    }

    /// Release the slot. Consumes the handle.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        self.ledger.remove(&self.instance_id);
        tracing::debug!(instance_id = %self.instance_id, "slot released");
    }
}

/// Point-in-time view of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSlot {
    /// Provider name.
    pub provider: String,
    /// 1-based slot index.
    pub slot_number: u32,
    /// `{provider}-{slot_number}`
    pub instance_id: String,
    /// No claim and no active assignment on the slot.
    pub is_available: bool,
    /// Assignment occupying the slot, if any
    pub assignment_id: Option<Uuid>,
    /// `merge-worker` while the pipeline holds it, else the assignment id
    pub holder: Option<String>,
}

/// Slot occupancy for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSlots {
    /// Provider name.
    pub provider: String,
    /// Configured `max_concurrent_issues`.
    pub max_slots: u32,
    /// Every slot, in slot-number order.
    pub slots: Vec<InstanceSlot>,
}

impl ProviderSlots {
    /// Lowest-numbered free slot.
    pub fn next_available(&self) -> Option<&InstanceSlot> {
        self.slots.iter().find(|s| s.is_available)
    }
}

/// Derived utilization numbers; never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStats {
    /// Provider name.
    pub provider: String,
    /// Configured slot count.
    pub total_slots: u32,
    /// Slots claimed or occupied by an active assignment.
    pub used_slots: u32,
    /// `total_slots - used_slots`
    pub available_slots: u32,
    /// Occupied slots whose assignment has been idle past the threshold.
    pub abandoned_slots: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_format() {
        assert_eq!(instance_id("claude", 3), "claude-3");
    }

    #[test]
    fn test_claim_drop_releases_ledger_entry() {
        let ledger = SlotLedger::new();
        let owner = SlotOwner::Assignment(Uuid::new_v4());
        assert!(ledger.try_insert("claude-1", owner));
        let claim = SlotClaim::new("claude", 1, owner, ledger.clone());
        assert!(ledger.is_held("claude-1"));
        claim.release();
        assert!(!ledger.is_held("claude-1"));
    }

    #[test]
    fn test_double_insert_rejected() {
        let ledger = SlotLedger::new();
        assert!(ledger.try_insert("claude-1", SlotOwner::Assignment(Uuid::new_v4())));
        assert!(!ledger.try_insert("claude-1", SlotOwner::Assignment(Uuid::new_v4())));
    }

    #[test]
    fn test_hand_to_merge_worker_keeps_assignment() {
        let ledger = SlotLedger::new();
        let id = Uuid::new_v4();
        assert!(ledger.try_insert("claude-2", SlotOwner::Assignment(id)));
        let mut claim = SlotClaim::new("claude", 2, SlotOwner::Assignment(id), ledger.clone());
        claim.hand_to_merge_worker();
        assert_eq!(ledger.owner("claude-2"), Some(SlotOwner::MergeWorker(id)));
        assert_eq!(claim.owner().label(), MERGE_WORKER);
    }
}
