pub mod assignment_registry;
pub mod completion_detector;
pub mod conflict_resolution;
pub mod dependency_graph;
pub mod dispatcher;
pub mod integration_pipeline;
pub mod persona_review;
pub mod relationship_parser;
pub mod slot_allocator;
pub mod stage_branch;

pub use assignment_registry::AssignmentRegistry;
pub use completion_detector::{CompletionDetector, RunObservation};
pub use conflict_resolution::{ConflictContext, ConflictResolutionService};
pub use dependency_graph::DependencyGraphAnalyzer;
pub use dispatcher::{PollEvent, ScheduleReport, WorkDispatcher};
pub use integration_pipeline::{BatchReport, IntegrationPipeline, PipelineOutcome};
pub use persona_review::{AgentPersonaReviewer, PersonaReviewGate};
pub use relationship_parser::RegexRelationshipParser;
pub use slot_allocator::InstanceSlotAllocator;
pub use stage_branch::{StageBranchConfig, StageBranchController};
