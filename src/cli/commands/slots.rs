//! `foreman slots`: instance slot occupancy per provider.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::models::{Assignment, Config, ProviderSlots, SlotStats};
use crate::services::InstanceSlotAllocator;

#[derive(Args, Debug)]
pub struct SlotsArgs {
    /// Only show this provider
    #[arg(short, long)]
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProviderSlotsOutput {
    pub stats: SlotStats,
    pub slots: ProviderSlots,
}

#[derive(Debug, Serialize)]
pub struct SlotsOutput {
    pub providers: Vec<ProviderSlotsOutput>,
}

impl CommandOutput for SlotsOutput {
    fn to_human(&self) -> String {
        let mut sections = Vec::new();
        for provider in &self.providers {
            let stats = &provider.stats;
            let mut table = list_table(&["instance", "state", "holder"]);
            for slot in &provider.slots.slots {
                table.add_row(vec![
                    slot.instance_id.clone(),
                    if slot.is_available { "free" } else { "busy" }.to_string(),
                    slot.holder.clone().unwrap_or_default(),
                ]);
            }
            sections.push(format!(
                "{}: {}/{} used, {} available\n{table}",
                stats.provider, stats.used_slots, stats.total_slots, stats.available_slots
            ));
        }
        sections.join("\n\n")
    }
}

/// Slot view derived from persisted assignments.
pub fn slot_report(
    allocator: &InstanceSlotAllocator,
    providers: &[String],
    assignments: &[Assignment],
) -> Result<SlotsOutput> {
    let providers = providers
        .iter()
        .map(|name| {
            Ok(ProviderSlotsOutput {
                stats: allocator.stats(name, assignments)?,
                slots: allocator.get_provider_slots(name, assignments)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SlotsOutput { providers })
}

pub async fn execute(args: SlotsArgs, config: Config, json_mode: bool) -> Result<()> {
    let context = AppContext::open(config).await?;
    let providers = match args.provider.as_deref() {
        Some(name) => vec![context.provider(Some(name))?],
        None => context.config.providers.iter().map(|p| p.name.clone()).collect(),
    };
    let assignments = context.repository.list_all().await?;
    let allocator = InstanceSlotAllocator::new(&context.config.providers);
    output(&slot_report(&allocator, &providers, &assignments)?, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AssignmentStatus, NewAssignment, ProviderConfig};

    #[test]
    fn test_slot_report_marks_occupied_instances() {
        let allocator = InstanceSlotAllocator::new(&[ProviderConfig {
            name: "claude".to_string(),
            max_concurrent_issues: 2,
        }]);
        let mut running = Assignment::new(NewAssignment {
            issue_number: 7,
            issue_title: "Cache".to_string(),
            external_link_id: None,
            provider: "claude".to_string(),
            worktree_path: ".foreman/worktrees/issue-7".to_string(),
            branch_name: "foreman/issue-7".to_string(),
            is_phase_master: false,
        }, "claude-1");
        running.status = AssignmentStatus::InProgress;

        let report = slot_report(&allocator, &["claude".to_string()], &[running]).unwrap();
        let claude = &report.providers[0];
        assert_eq!(claude.stats.used_slots, 1);
        assert_eq!(claude.stats.available_slots, 1);
        assert!(!claude.slots.slots[0].is_available);
        assert!(claude.slots.slots[1].is_available);
        assert!(report.to_human().contains("1/2 used"));

        assert!(slot_report(&allocator, &["codex".to_string()], &[]).is_err());
    }
}
