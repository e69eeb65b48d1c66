use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::data::{CodeLocation, CodeSection, EditInstruction, SpecificationItem};

use super::PipelineConfig;

/// Merges a matched location, the item's action/event/parameters, and any
/// externally authored code fragments into one [`EditInstruction`].
///
/// The planner never talks to the completion service; its only judgement
/// call is the anchor line, where a snippet re-derived against the current
/// file content beats the originally recorded line (files may have shifted
/// between matching and applying).
pub struct PatchPlanner<'a> {
    config: &'a PipelineConfig,
}

impl<'a> PatchPlanner<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        PatchPlanner { config }
    }

    pub fn plan(
        &self,
        item: &SpecificationItem,
        location: &CodeLocation,
        event: &str,
        params: Map<String, Value>,
        code: &BTreeMap<String, String>,
        snippet: Option<&str>,
        file_content: &str,
    ) -> EditInstruction {
        let snippet = snippet
            .map(|s| s.to_string())
            .or_else(|| location.snippet.clone())
            .map(|s| clean_numbered_snippet(&s))
            .filter(|s| !s.is_empty());

        let line_count = file_content.lines().count().max(1);
        let recorded = location.line.clamp(1, line_count);
        let anchor_line = snippet
            .as_deref()
            .and_then(|s| {
                best_anchor_from_snippet(file_content, s, self.config.anchor_min_similarity)
            })
            .unwrap_or(recorded);

        let sections = code
            .iter()
            .filter(|(_, fragment)| !fragment.trim().is_empty())
            .map(|(key, fragment)| CodeSection::categorize(key, fragment))
            .collect();

        EditInstruction {
            file: location.file.clone(),
            action: item.action,
            event: event.to_string(),
            params,
            anchor_line,
            snippet,
            sections,
        }
    }
}

/// Strips `  12: ` style line-number prefixes a stored snippet may carry.
pub(crate) fn clean_numbered_snippet(snippet: &str) -> String {
    static NUMBER_PREFIX: OnceLock<Regex> = OnceLock::new();
    let re = NUMBER_PREFIX.get_or_init(|| Regex::new(r"^\s*\d+:\s?").unwrap());

    snippet
        .lines()
        .map(|line| re.replace(line, "").into_owned())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Fuzzily locates `snippet` inside `file_text` and returns a 1-based
/// anchor at the middle of the best-matching window, or `None` when no
/// window clears `min_similarity`.
pub(crate) fn best_anchor_from_snippet(
    file_text: &str,
    snippet: &str,
    min_similarity: f64,
) -> Option<usize> {
    let file_lines: Vec<&str> = file_text.lines().collect();
    let snip_lines: Vec<&str> = snippet.lines().filter(|l| !l.trim().is_empty()).collect();
    if snip_lines.is_empty() || file_lines.is_empty() || snip_lines.len() > file_lines.len() {
        return None;
    }

    let target = snip_lines.join("\n");
    let mut best_score = 0.0f64;
    let mut best_start = None;

    for start in 0..=(file_lines.len() - snip_lines.len()) {
        let chunk = file_lines[start..start + snip_lines.len()].join("\n");
        // Cheap upper bound first; the LCS pass only runs when it could win.
        if quick_ratio(&chunk, &target) <= best_score {
            continue;
        }
        let score = similarity_ratio(&chunk, &target);
        if score > best_score {
            best_score = score;
            best_start = Some(start);
        }
    }

    match best_start {
        Some(start) if best_score >= min_similarity => {
            let mid = start + snip_lines.len() / 2;
            Some((mid + 1).clamp(1, file_lines.len()))
        }
        _ => None,
    }
}

/// Similarity in [0, 1]: `2 * lcs / (len_a + len_b)` over characters.
pub(crate) fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    // Two-row LCS table.
    let mut prev = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }

    2.0 * prev[b.len()] as f64 / total as f64
}

/// Upper bound on `similarity_ratio` from character multisets alone.
fn quick_ratio(a: &str, b: &str) -> f64 {
    let mut counts = std::collections::HashMap::new();
    for c in a.chars() {
        *counts.entry(c).or_insert(0i64) += 1;
    }
    let mut matches = 0usize;
    for c in b.chars() {
        if let Some(n) = counts.get_mut(&c) {
            if *n > 0 {
                *n -= 1;
                matches += 1;
            }
        }
    }

    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        1.0
    } else {
        2.0 * matches as f64 / total as f64
    }
}
