use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

use crate::data::{Candidate, CodeLocation, EmbeddingService, SpecificationItem};

use super::candidate_indexer::{CLICKABLE_MARKUP_HINTS, EVENT_HANDLER_HINTS};
use super::PipelineConfig;

const BASE_SCORE: f64 = 0.55;
const EVENT_HANDLER_BONUS: f64 = 0.20;
const CLICKABLE_MARKUP_BONUS: f64 = 0.10;
const PAGE_FILE_BONUS: f64 = 0.05;
const MAX_SEMANTIC_BOOST: f64 = 0.25;
const CONFIDENCE_CAP: f64 = 0.95;

/// Ranks an item's candidates by keyword heuristics plus an optional
/// semantic boost, returning at most `top_k` locations in descending
/// confidence order.
pub struct LocationScorer<'a> {
    embeddings: Option<&'a dyn EmbeddingService>,
    config: &'a PipelineConfig,
}

impl<'a> LocationScorer<'a> {
    pub fn new(embeddings: Option<&'a dyn EmbeddingService>, config: &'a PipelineConfig) -> Self {
        LocationScorer { embeddings, config }
    }

    pub fn score(&self, item: &SpecificationItem, candidates: &[Candidate]) -> Vec<CodeLocation> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let similarities = self.semantic_similarities(item, candidates);

        let mut scored: Vec<CodeLocation> = candidates
            .iter()
            .enumerate()
            .map(|(idx, candidate)| {
                let sim = similarities.as_ref().map(|s| s[idx]).unwrap_or(0.0);
                self.score_candidate(item, candidate, sim)
            })
            .collect();

        // Stable sort keeps original candidate order as the tiebreak.
        scored.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });
        scored.truncate(self.config.top_k);
        scored
    }

    fn score_candidate(
        &self,
        item: &SpecificationItem,
        candidate: &Candidate,
        similarity: f64,
    ) -> CodeLocation {
        let mut score = BASE_SCORE;
        let mut evidence = Vec::new();

        if EVENT_HANDLER_HINTS.iter().any(|h| candidate.window.contains(h)) {
            score += EVENT_HANDLER_BONUS;
            evidence.push("nearby event handler".to_string());
        }
        if CLICKABLE_MARKUP_HINTS.iter().any(|h| candidate.window.contains(h)) {
            score += CLICKABLE_MARKUP_BONUS;
            evidence.push("clickable JSX element".to_string());
        }
        if item.action == crate::data::ActionKind::View && page_like_file(&candidate.file) {
            score += PAGE_FILE_BONUS;
            evidence.push("page-like file name".to_string());
        }

        if similarity != 0.0 {
            // Cosine values below 0.5 contribute nothing; ~1.0 maps to the
            // full boost.
            let boost = ((similarity - 0.5) * 0.5).clamp(0.0, MAX_SEMANTIC_BOOST);
            score += boost;
            evidence.push(format!("semantic_sim={:.3}", similarity));
        }

        CodeLocation {
            file: candidate.file.clone(),
            line: candidate.line,
            confidence: round2(score.min(CONFIDENCE_CAP)),
            evidence,
            snippet: Some(candidate.window.clone()),
        }
    }

    /// Embeds the item's query plus every candidate window and returns
    /// per-candidate cosine similarities. Any service failure, or a result
    /// of the wrong shape, disables semantic scoring for this item.
    fn semantic_similarities(
        &self,
        item: &SpecificationItem,
        candidates: &[Candidate],
    ) -> Option<Vec<f64>> {
        if !self.config.use_embeddings {
            return None;
        }
        let service = self.embeddings?;

        let mut texts = Vec::with_capacity(candidates.len() + 1);
        texts.push(item.query_text());
        texts.extend(candidates.iter().map(|c| c.window.clone()));

        let vectors = service.embed(&texts).ok()?;
        if vectors.len() != texts.len() {
            return None;
        }

        let query = &vectors[0];
        Some(
            vectors[1..]
                .iter()
                .map(|v| cosine(query, v) as f64)
                .collect(),
        )
    }
}

fn page_like_file(rel_path: &str) -> bool {
    static PAGE_NAME: OnceLock<Regex> = OnceLock::new();
    let re = PAGE_NAME.get_or_init(|| Regex::new(r"(Page|Screen|Route)").unwrap());

    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    re.is_match(name)
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom == 0.0 { 0.0 } else { dot / denom }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
