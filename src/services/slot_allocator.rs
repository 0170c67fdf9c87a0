//! Bounded per-provider concurrency over named instance slots.

use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::slot::instance_id;
use crate::domain::models::{
    Assignment, InstanceSlot, ProviderConfig, ProviderSlots, SlotClaim, SlotLedger, SlotOwner,
    SlotStats,
};

/// Hands out instance slots. Claims never queue: a full provider fails fast
/// with `ResourceExhausted`.
#[derive(Debug, Clone)]
pub struct InstanceSlotAllocator {
    max_slots: BTreeMap<String, u32>,
    ledger: SlotLedger,
}

impl InstanceSlotAllocator {
    /// Allocator for the configured providers, with an empty ledger.
    pub fn new(providers: &[ProviderConfig]) -> Self {
        Self {
            max_slots: providers
                .iter()
                .map(|p| (p.name.clone(), p.max_concurrent_issues))
                .collect(),
            ledger: SlotLedger::new(),
        }
    }

    /// Shared record of live claims.
    pub fn ledger(&self) -> &SlotLedger {
        &self.ledger
    }

    /// Configured provider names.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.max_slots.keys().map(String::as_str)
    }

    /// Slot count of `provider`, or a validation error for an unknown one.
    pub fn max_slots(&self, provider: &str) -> DomainResult<u32> {
        self.max_slots
            .get(provider)
            .copied()
            .ok_or_else(|| DomainError::ValidationFailed(format!("Unknown provider '{provider}'")))
    }

    /// Occupancy of every slot of `provider`.
    pub fn get_provider_slots(
        &self,
        provider: &str,
        assignments: &[Assignment],
    ) -> DomainResult<ProviderSlots> {
        let max_slots = self.max_slots(provider)?;
        let slots = (1..=max_slots)
            .map(|n| self.slot_view(provider, n, assignments))
            .collect();
        Ok(ProviderSlots {
            provider: provider.to_string(),
            max_slots,
            slots,
        })
    }

    fn slot_view(&self, provider: &str, slot_number: u32, assignments: &[Assignment]) -> InstanceSlot {
        let id = instance_id(provider, slot_number);
        let occupant = assignments.iter().find(|a| {
            a.provider == provider && a.occupies_slot() && a.instance_id.as_deref() == Some(id.as_str())
        });
        let claim_owner = self.ledger.owner(&id);

        let assignment_id = claim_owner
            .map(|o| o.assignment_id())
            .or_else(|| occupant.map(|a| a.id));
        let holder = claim_owner
            .map(|o| o.label())
            .or_else(|| occupant.map(|a| a.id.to_string()));

        InstanceSlot {
            provider: provider.to_string(),
            slot_number,
            instance_id: id,
            is_available: assignment_id.is_none(),
            assignment_id,
            holder,
        }
    }

    /// Lowest free slot of `provider`, without claiming it.
    pub fn get_next_available_slot(
        &self,
        provider: &str,
        assignments: &[Assignment],
    ) -> DomainResult<Option<InstanceSlot>> {
        let slots = self.get_provider_slots(provider, assignments)?;
        Ok(slots.next_available().cloned())
    }

    /// Claim the lowest free slot of `provider` for `owner`.
    #[instrument(skip(self, assignments), fields(provider = %provider))]
    pub fn claim(
        &self,
        provider: &str,
        owner: SlotOwner,
        assignments: &[Assignment],
    ) -> DomainResult<SlotClaim> {
        let max_slots = self.max_slots(provider)?;
        for n in 1..=max_slots {
            let view = self.slot_view(provider, n, assignments);
            if view.is_available && self.ledger.try_insert(&view.instance_id, owner) {
                debug!(instance_id = %view.instance_id, holder = %owner.label(), "slot claimed");
                return Ok(SlotClaim::new(provider, n, owner, self.ledger.clone()));
            }
        }
        warn!(max_slots, "no free instance slot");
        Err(DomainError::ResourceExhausted {
            provider: provider.to_string(),
            max_slots,
        })
    }

    /// Re-establish the claim on a specific instance, e.g. after a restart.
    pub fn claim_instance(&self, instance: &str, owner: SlotOwner) -> DomainResult<SlotClaim> {
        let (provider, slot_number) = parse_instance_id(instance)?;
        let max_slots = self.max_slots(provider)?;
        if slot_number == 0 || slot_number > max_slots {
            return Err(DomainError::ValidationFailed(format!(
                "Instance '{instance}' is outside 1..={max_slots}"
            )));
        }
        if !self.ledger.try_insert(instance, owner) {
            return Err(DomainError::ValidationFailed(format!(
                "Instance '{instance}' is already claimed"
            )));
        }
        Ok(SlotClaim::new(provider, slot_number, owner, self.ledger.clone()))
    }

    /// Slots whose holder stopped making progress.
    ///
    /// Abandonment criteria are not defined yet, so nothing is reported.
    pub fn detect_abandoned_slots(&self, provider: &str) -> DomainResult<Vec<InstanceSlot>> {
        self.max_slots(provider)?;
        Ok(Vec::new())
    }

    pub fn stats(&self, provider: &str, assignments: &[Assignment]) -> DomainResult<SlotStats> {
        let slots = self.get_provider_slots(provider, assignments)?;
        let used = slots.slots.iter().filter(|s| !s.is_available).count() as u32;
        let abandoned = self.detect_abandoned_slots(provider)?.len() as u32;
        Ok(SlotStats {
            provider: provider.to_string(),
            total_slots: slots.max_slots,
            used_slots: used,
            available_slots: slots.max_slots - used,
            abandoned_slots: abandoned,
        })
    }
}

/// Split `claude-2` into `("claude", 2)`. Provider names may contain dashes.
pub fn parse_instance_id(instance: &str) -> DomainResult<(&str, u32)> {
    instance
        .rsplit_once('-')
        .and_then(|(provider, n)| Some((provider, n.parse().ok()?)))
        .filter(|(provider, _)| !provider.is_empty())
        .ok_or_else(|| DomainError::ValidationFailed(format!("Malformed instance id '{instance}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AssignmentStatus, NewAssignment};
    use uuid::Uuid;

    fn allocator(max: u32) -> InstanceSlotAllocator {
        InstanceSlotAllocator::new(&[ProviderConfig {
            name: "claude".to_string(),
            max_concurrent_issues: max,
        }])
    }

    fn assignment(issue: u64, instance: &str) -> Assignment {
        Assignment::new(
            NewAssignment {
                issue_number: issue,
                issue_title: format!("Issue {issue}"),
                external_link_id: None,
                provider: "claude".to_string(),
                worktree_path: format!("/tmp/issue-{issue}"),
                branch_name: format!("foreman/issue-{issue}"),
                is_phase_master: false,
            },
            instance,
        )
    }

    #[test]
    fn test_claims_lowest_free_slot() {
        let alloc = allocator(3);
        let first = alloc.claim("claude", SlotOwner::Assignment(Uuid::new_v4()), &[]).unwrap();
        let second = alloc.claim("claude", SlotOwner::Assignment(Uuid::new_v4()), &[]).unwrap();
        assert_eq!(first.instance_id(), "claude-1");
        assert_eq!(second.instance_id(), "claude-2");
        drop(first);
        let third = alloc.claim("claude", SlotOwner::Assignment(Uuid::new_v4()), &[]).unwrap();
        assert_eq!(third.instance_id(), "claude-1");
    }

    #[test]
    fn test_exhaustion_with_single_slot() {
        let alloc = allocator(1);
        let _held = alloc.claim("claude", SlotOwner::Assignment(Uuid::new_v4()), &[]).unwrap();
        let err = alloc
            .claim("claude", SlotOwner::Assignment(Uuid::new_v4()), &[])
            .unwrap_err();
        assert!(matches!(err, DomainError::ResourceExhausted { max_slots: 1, .. }));
    }

    #[test]
    fn test_active_assignment_occupies_slot_without_claim() {
        let alloc = allocator(2);
        let existing = assignment(7, "claude-1");
        let next = alloc.get_next_available_slot("claude", &[existing.clone()]).unwrap().unwrap();
        assert_eq!(next.instance_id, "claude-2");

        let mut merged = existing;
        merged.status = AssignmentStatus::Merged;
        let next = alloc.get_next_available_slot("claude", &[merged]).unwrap().unwrap();
        assert_eq!(next.instance_id, "claude-1");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let alloc = allocator(1);
        assert!(matches!(
            alloc.get_provider_slots("gpt", &[]),
            Err(DomainError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_stats_are_derived() {
        let alloc = allocator(3);
        let _claim = alloc.claim("claude", SlotOwner::MergeWorker(Uuid::new_v4()), &[]).unwrap();
        let stats = alloc.stats("claude", &[assignment(9, "claude-3")]).unwrap();
        assert_eq!(stats.used_slots, 2);
        assert_eq!(stats.available_slots, 1);
        assert_eq!(stats.abandoned_slots, 0);
        let slots = alloc.get_provider_slots("claude", &[]).unwrap();
        assert_eq!(slots.slots[0].holder.as_deref(), Some("merge-worker"));
    }

    #[test]
    fn test_parse_instance_id() {
        assert_eq!(parse_instance_id("claude-code-2").unwrap(), ("claude-code", 2));
        assert!(parse_instance_id("claude").is_err());
        assert!(parse_instance_id("-3").is_err());
    }
}
