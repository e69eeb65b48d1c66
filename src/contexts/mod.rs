mod candidate_indexer;
mod idempotency_guard;
mod location_scorer;
mod patch_applier;
mod patch_planner;
mod pipeline;
mod response;
mod rollback;

pub use candidate_indexer::{CandidateIndexer, SourceFile, SourceIndex};
pub use idempotency_guard::{GuardDecision, IdempotencyGuard};
pub use location_scorer::LocationScorer;
pub use patch_applier::PatchApplier;
pub use patch_planner::PatchPlanner;
pub use pipeline::{PipelineConfig, PipelineError, TaggingPipeline};
pub use response::extract_json_object;
pub use rollback::RollbackEngine;
