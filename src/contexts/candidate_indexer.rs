use std::fs;
use std::path::{Path, PathBuf};

use crate::data::{Candidate, SpecificationItem};

use super::PipelineConfig;

/// Attribute names that mark a line as belonging to an interactive element.
/// Used both by the indexer's fallback scan and by the scorer's
/// event-handler bonus.
pub(crate) const EVENT_HANDLER_HINTS: &[&str] =
    &["onClick", "onSubmit", "onChange", "onSelect", "onPress"];

/// Opening-tag fragments that suggest clickable markup near a candidate.
pub(crate) const CLICKABLE_MARKUP_HINTS: &[&str] = &[
    "<Button",
    "<button",
    "<Link",
    "<a ",
    "<IconButton",
    "<Touchable",
    "<Pressable",
];

/// Context captured around a literal term hit, in lines either side.
const TERM_WINDOW_RADIUS: usize = 8;
/// Fallback hits use a tighter window: 4 lines above, 6 below.
const FALLBACK_WINDOW_ABOVE: usize = 4;
const FALLBACK_WINDOW_BELOW: usize = 6;

/// One source file held in memory as its line array.
#[derive(Debug)]
pub struct SourceFile {
    /// Repo-relative path with `/` separators.
    pub rel_path: String,
    pub lines: Vec<String>,
}

/// All candidate source files of a repository, loaded once per run and
/// shared across every specification item's scan.
#[derive(Debug, Default)]
pub struct SourceIndex {
    pub files: Vec<SourceFile>,
}

impl SourceIndex {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Scans a source tree and proposes (file, line, window) candidates for
/// each specification item. The scan is best-effort: unreadable files are
/// treated as empty and a missing candidate degrades match quality rather
/// than failing the run.
pub struct CandidateIndexer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> CandidateIndexer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        CandidateIndexer { config }
    }

    /// Loads every matching text file under `root` into memory.
    ///
    /// Only the top-level directory read is allowed to fail; everything
    /// below is skipped silently when unreadable. File bytes that are not
    /// valid UTF-8 are decoded lossily instead of rejected.
    pub fn load(&self, root: &Path) -> std::io::Result<SourceIndex> {
        let mut index = SourceIndex::default();
        // Surface an error for a missing or unreadable root only.
        fs::read_dir(root)?;
        self.visit(root, root, &mut index);
        Ok(index)
    }

    fn visit(&self, root: &Path, dir: &Path, index: &mut SourceIndex) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if !self.is_excluded_dir(&path) {
                    self.visit(root, &path, index);
                }
            } else if self.is_source_file(&path) {
                if let Some(file) = self.read_source(root, &path) {
                    index.files.push(file);
                }
            }
        }
    }

    fn is_excluded_dir(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| self.config.excluded_dirs.iter().any(|d| d == name))
            .unwrap_or(true)
    }

    fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.config.source_extensions.iter().any(|e| e == ext))
            .unwrap_or(false)
    }

    fn read_source(&self, root: &Path, path: &PathBuf) -> Option<SourceFile> {
        let bytes = fs::read(path).ok()?;
        let content = String::from_utf8_lossy(&bytes);
        let rel_path = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        Some(SourceFile {
            rel_path,
            lines: content.lines().map(|l| l.to_string()).collect(),
        })
    }

    /// Candidate locations for one item: every line that contains one of
    /// the item's terms case-insensitively, with a ±8 line context window.
    ///
    /// When the item has no terms, or no term matched anywhere, falls back
    /// to lines bearing an event-handler hint, capped at the configured
    /// fallback limit with a tighter window.
    pub fn candidates_for(&self, index: &SourceIndex, item: &SpecificationItem) -> Vec<Candidate> {
        let terms: Vec<String> = item
            .effective_terms()
            .iter()
            .map(|t| t.to_lowercase())
            .collect();

        let mut out = Vec::new();

        if !terms.is_empty() {
            for file in &index.files {
                for (idx, line) in file.lines.iter().enumerate() {
                    let low = line.to_lowercase();
                    if !terms.iter().any(|t| low.contains(t)) {
                        continue;
                    }
                    let line_no = idx + 1;
                    out.push(Candidate {
                        file: file.rel_path.clone(),
                        line: line_no,
                        window: window_text(
                            &file.lines,
                            line_no,
                            TERM_WINDOW_RADIUS,
                            TERM_WINDOW_RADIUS,
                        ),
                    });
                }
            }
        }

        if out.is_empty() {
            self.fallback_candidates(index, &mut out);
        }

        out
    }

    /// Collects generic interactive-element lines when term matching found
    /// nothing to work with.
    fn fallback_candidates(&self, index: &SourceIndex, out: &mut Vec<Candidate>) {
        'files: for file in &index.files {
            for (idx, line) in file.lines.iter().enumerate() {
                if !EVENT_HANDLER_HINTS.iter().any(|h| line.contains(h)) {
                    continue;
                }
                let line_no = idx + 1;
                out.push(Candidate {
                    file: file.rel_path.clone(),
                    line: line_no,
                    window: window_text(
                        &file.lines,
                        line_no,
                        FALLBACK_WINDOW_ABOVE,
                        FALLBACK_WINDOW_BELOW,
                    ),
                });
                if out.len() >= self.config.fallback_cap {
                    break 'files;
                }
            }
        }
    }
}

/// Joins the lines around a 1-based hit into a single window string.
fn window_text(lines: &[String], line_no: usize, above: usize, below: usize) -> String {
    let start = line_no.saturating_sub(above).max(1);
    let end = (line_no + below).min(lines.len());
    lines[start - 1..end].join("\n")
}
