use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{ActionKind, CodeLocation, SpecificationItem};

/// How one specification item ended up after a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Applied,
    DryRun,
    NoChange,
    SkippedAlreadyTagged,
    NoLocation,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_index: usize,
    pub file: Option<String>,
    pub status: OutcomeStatus,
    pub reason: String,
    #[serde(default)]
    pub backup: Option<String>,
}

/// Summary counters for a run. Mirrors what the per-item outcomes say,
/// so callers can print a summary without re-walking the outcome list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total_items: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_already_tagged: usize,
    pub no_location: usize,
    pub imports_added: usize,
    pub hooks_added: usize,
    pub tracking_calls_added: usize,
}

/// Aggregate of one pipeline invocation. Created fresh per run, written out
/// once at the end, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub repo: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub outcomes: Vec<ItemOutcome>,
    pub stats: RunStats,
}

impl RunReport {
    pub fn new(repo: impl Into<String>, total_items: usize, dry_run: bool) -> Self {
        RunReport {
            repo: repo.into(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            outcomes: Vec::new(),
            stats: RunStats {
                total_items,
                ..RunStats::default()
            },
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackError {
    pub backup: String,
    pub message: String,
}

/// Result of a bulk restore. Per-file failures land in `errors`; the batch
/// itself never aborts early.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackReport {
    pub restored: usize,
    pub deleted: usize,
    pub restored_files: Vec<String>,
    pub errors: Vec<RollbackError>,
}

/// Ranked match list produced for one specification item by the
/// indexer + scorer stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSuggestion {
    pub item_index: usize,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub row_index: Option<u32>,
    pub description: String,
    pub action: ActionKind,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub target_terms: Vec<String>,
    pub matches: Vec<CodeLocation>,
}

impl MatchSuggestion {
    pub fn for_item(item: &SpecificationItem, matches: Vec<CodeLocation>) -> Self {
        MatchSuggestion {
            item_index: item.item_index,
            sheet: item.sheet.clone(),
            row_index: item.row_index,
            description: item.description.clone(),
            action: item.action,
            page: item.page.clone(),
            target_terms: item.target_terms.clone(),
            matches,
        }
    }

    /// The match consumed downstream, when any location was suggested.
    pub fn top_match(&self) -> Option<&CodeLocation> {
        self.matches.first()
    }
}

/// One row of an externally authored apply plan: the specification fields
/// plus the chosen location and any code fragments the advisor produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    #[serde(flatten)]
    pub item: SpecificationItem,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub top_match: Option<CodeLocation>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    #[serde(default)]
    pub code: BTreeMap<String, String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

impl PlanItem {
    /// Resolves the target file: an explicit `file` field wins, else the
    /// recorded top match.
    pub fn target_file(&self) -> Option<&str> {
        self.file
            .as_deref()
            .or_else(|| self.top_match.as_ref().map(|m| m.file.as_str()))
    }
}
