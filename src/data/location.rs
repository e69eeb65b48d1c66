use serde::{Deserialize, Serialize};

/// A (file, line, context-window) triple collected by the indexer as a
/// possible match for a specification item. File paths are repo-relative
/// with `/` separators; lines are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub file: String,
    pub line: usize,
    pub window: String,
}

/// A scored insertion point. `confidence` is clamped to [0, 0.95] and
/// rounded to two decimals; `evidence` lists the heuristics that fired,
/// for explainability only. `snippet` keeps the candidate's context window
/// so the anchor can be re-derived later if the file has shifted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeLocation {
    pub file: String,
    pub line: usize,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}
