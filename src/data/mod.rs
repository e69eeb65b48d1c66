mod cache;
mod completion;
mod instruction;
mod location;
mod report;
mod spec_item;

pub use cache::ResponseCache;
pub use completion::{CompletionService, EmbeddingService, ServiceError};
pub use instruction::{CodeSection, EditInstruction, EditResult};
pub use location::{Candidate, CodeLocation};
pub use report::{
    ItemOutcome, MatchSuggestion, OutcomeStatus, PlanItem, RollbackError, RollbackReport,
    RunReport, RunStats,
};
pub use spec_item::{ActionKind, SpecificationItem};
