pub mod assignment;
pub mod config;
pub mod graph;
pub mod issue;
pub mod process;
pub mod review;
pub mod signal;
pub mod slot;
pub mod tracker;

pub use assignment::{Assignment, AssignmentStatus, NewAssignment, WorkSession};
pub use config::{
    AgentConfig, Config, DatabaseConfig, LoggingConfig, PipelineConfig, ProviderConfig,
    RepositoryConfig, ReviewConfig, TrackerConfig,
};
pub use graph::{DependencyGraph, GraphNode, GraphValidation};
pub use issue::{Issue, IssueState, PhaseTag, RelationKind, RelationshipRef};
pub use process::{ProcessControl, ProcessHandle, ProcessState};
pub use review::{Persona, PersonaVerdict, ReviewPolicy, ReviewResult};
pub use signal::CompletionSignal;
pub use slot::{
    InstanceSlot, ProviderSlots, SlotClaim, SlotLedger, SlotOwner, SlotStats, MERGE_WORKER,
};
pub use tracker::{FieldSchema, FieldUpdate, TrackerFields, TrackerRecord};
