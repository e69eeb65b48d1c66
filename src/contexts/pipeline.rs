use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::data::{
    CompletionService, EditResult, EmbeddingService, ItemOutcome, MatchSuggestion, OutcomeStatus,
    PlanItem, RollbackReport, RunReport, SpecificationItem,
};

use super::candidate_indexer::CandidateIndexer;
use super::idempotency_guard::IdempotencyGuard;
use super::location_scorer::LocationScorer;
use super::patch_applier::PatchApplier;
use super::patch_planner::PatchPlanner;
use super::response::extract_json_object;
use super::rollback::RollbackEngine;

/// Tunables shared by every pipeline stage. Defaults match the values the
/// stages were calibrated against; callers override individual fields.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Appended to a file name to form its backup path.
    pub backup_suffix: String,
    /// Directory names never descended into during scans.
    pub excluded_dirs: Vec<String>,
    /// Extensions treated as candidate source files.
    pub source_extensions: Vec<String>,
    /// Ranked matches kept per item.
    pub top_k: usize,
    /// Upper bound on fallback candidates per item.
    pub fallback_cap: usize,
    /// Lines the anchor shifts down on the silent-no-change retry.
    pub retry_offset: usize,
    /// Minimum similarity for a snippet to re-anchor an instruction.
    pub anchor_min_similarity: f64,
    /// Whether match scoring may call the embeddings service.
    pub use_embeddings: bool,
    /// Whether the already-tagged guard runs before each edit.
    pub skip_if_tagged: bool,
    /// Candidate locations of the tracking helper module, repo-relative,
    /// first hit wins.
    pub framework_paths: Vec<String>,
    /// Name of the tracking helper function the framework exports.
    pub tracking_helper: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            backup_suffix: ".taggingai.bak".to_string(),
            excluded_dirs: vec![
                "node_modules".to_string(),
                "build".to_string(),
                "dist".to_string(),
                ".git".to_string(),
                "target".to_string(),
            ],
            source_extensions: vec![
                "js".to_string(),
                "jsx".to_string(),
                "ts".to_string(),
                "tsx".to_string(),
            ],
            top_k: 5,
            fallback_cap: 30,
            retry_offset: 20,
            anchor_min_similarity: 0.6,
            use_embeddings: true,
            skip_if_tagged: true,
            framework_paths: vec![
                "src/analytics/track.js".to_string(),
                "src/analytics/track.ts".to_string(),
                "src/utils/track.js".to_string(),
                "src/tracking/index.js".to_string(),
            ],
            tracking_helper: "track".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum PipelineError {
    /// The repository root could not be read at all.
    RepoAccess { path: PathBuf, source: std::io::Error },
    /// The repository was readable but held no candidate source files.
    EmptyRepository { path: PathBuf },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PipelineError::RepoAccess { path, source } => {
                write!(f, "cannot access repository {}: {}", path.display(), source)
            }
            PipelineError::EmptyRepository { path } => {
                write!(
                    f,
                    "no candidate source files found under {}",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::RepoAccess { source, .. } => Some(source),
            PipelineError::EmptyRepository { .. } => None,
        }
    }
}

/// Advisor output for one item: what to call, with what payload, and any
/// ready-made code fragments.
struct Advice {
    event: String,
    params: Map<String, Value>,
    code: BTreeMap<String, String>,
}

/// The full match-plan-apply pipeline over one target repository.
///
/// Stage wiring is fixed; behavior differences come from the config and
/// from which service implementations are plugged in. All stages run on
/// the calling thread, one item at a time, so at most one edit per file is
/// ever in flight.
pub struct TaggingPipeline<'a> {
    completion: &'a dyn CompletionService,
    embeddings: Option<&'a dyn EmbeddingService>,
    config: &'a PipelineConfig,
    verbose: bool,
}

impl<'a> TaggingPipeline<'a> {
    pub fn new(
        completion: &'a dyn CompletionService,
        embeddings: Option<&'a dyn EmbeddingService>,
        config: &'a PipelineConfig,
    ) -> Self {
        TaggingPipeline {
            completion,
            embeddings,
            config,
            verbose: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Match stage only: ranked code locations per item, no edits.
    pub fn suggest(
        &self,
        repo_root: &Path,
        items: &[SpecificationItem],
    ) -> Result<Vec<MatchSuggestion>, PipelineError> {
        let indexer = CandidateIndexer::new(self.config);
        let index = indexer
            .load(repo_root)
            .map_err(|source| PipelineError::RepoAccess {
                path: repo_root.to_path_buf(),
                source,
            })?;
        if index.is_empty() {
            return Err(PipelineError::EmptyRepository {
                path: repo_root.to_path_buf(),
            });
        }

        if self.verbose {
            println!(
                "Indexed {} source files under {}",
                index.files.len(),
                repo_root.display()
            );
        }

        let scorer = LocationScorer::new(self.embeddings, self.config);
        let suggestions = items
            .iter()
            .map(|item| {
                let candidates = indexer.candidates_for(&index, item);
                let matches = scorer.score(item, &candidates);
                if self.verbose {
                    println!(
                        "Item {} ({}): {} candidates, {} ranked matches",
                        item.item_index,
                        item.description,
                        candidates.len(),
                        matches.len()
                    );
                }
                MatchSuggestion::for_item(item, matches)
            })
            .collect();

        Ok(suggestions)
    }

    /// Full pipeline: match, advise, guard, plan, and apply every item.
    pub fn run(
        &self,
        repo_root: &Path,
        items: &[SpecificationItem],
        dry_run: bool,
    ) -> Result<RunReport, PipelineError> {
        let suggestions = self.suggest(repo_root, items)?;
        let framework = self.framework_source(repo_root);

        let mut report = RunReport::new(repo_root.to_string_lossy(), items.len(), dry_run);
        let guard = IdempotencyGuard::new(self.completion, self.config);
        let planner = PatchPlanner::new(self.config);
        let applier = PatchApplier::new(self.completion, self.config);

        for (item, suggestion) in items.iter().zip(&suggestions) {
            let Some(location) = suggestion.top_match() else {
                self.record(
                    &mut report,
                    ItemOutcome {
                        item_index: item.item_index,
                        file: None,
                        status: OutcomeStatus::NoLocation,
                        reason: "no code location matched".to_string(),
                        backup: None,
                    },
                );
                continue;
            };

            let path = repo_root.join(&location.file);
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    self.record(
                        &mut report,
                        ItemOutcome {
                            item_index: item.item_index,
                            file: Some(location.file.clone()),
                            status: OutcomeStatus::Failed,
                            reason: format!("cannot read {}: {}", location.file, err),
                            backup: None,
                        },
                    );
                    continue;
                }
            };

            let advice = self.advise(item, &location.file, &content, framework.as_deref());
            let instruction = planner.plan(
                item,
                location,
                &advice.event,
                advice.params,
                &advice.code,
                None,
                &content,
            );

            let decision = guard.check(item, &instruction, &content, framework.as_deref());
            if decision.already_tagged {
                self.record(
                    &mut report,
                    ItemOutcome {
                        item_index: item.item_index,
                        file: Some(location.file.clone()),
                        status: OutcomeStatus::SkippedAlreadyTagged,
                        reason: decision
                            .reason
                            .unwrap_or_else(|| "already tagged".to_string()),
                        backup: None,
                    },
                );
                continue;
            }

            let result = applier.apply(repo_root, &instruction, framework.as_deref(), dry_run);
            let outcome = outcome_for(item.item_index, &location.file, &result, dry_run);
            self.record(&mut report, outcome);
            self.tally_edit(&mut report, &result);
        }

        report.finish();
        Ok(report)
    }

    /// Applies an externally authored plan, bypassing the match stage for
    /// rows that carry their own location.
    pub fn apply_plan(
        &self,
        repo_root: &Path,
        plan: &[PlanItem],
        dry_run: bool,
    ) -> Result<RunReport, PipelineError> {
        fs::read_dir(repo_root).map_err(|source| PipelineError::RepoAccess {
            path: repo_root.to_path_buf(),
            source,
        })?;
        let framework = self.framework_source(repo_root);

        let mut report = RunReport::new(repo_root.to_string_lossy(), plan.len(), dry_run);
        let guard = IdempotencyGuard::new(self.completion, self.config);
        let planner = PatchPlanner::new(self.config);
        let applier = PatchApplier::new(self.completion, self.config);

        for row in plan {
            let Some(file) = row.target_file().map(str::to_string) else {
                self.record(
                    &mut report,
                    ItemOutcome {
                        item_index: row.item.item_index,
                        file: None,
                        status: OutcomeStatus::NoLocation,
                        reason: "plan row names no target file".to_string(),
                        backup: None,
                    },
                );
                continue;
            };

            let location = row.top_match.clone().unwrap_or(crate::data::CodeLocation {
                file: file.clone(),
                line: 1,
                confidence: 0.0,
                evidence: Vec::new(),
                snippet: None,
            });

            let path = repo_root.join(&file);
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    self.record(
                        &mut report,
                        ItemOutcome {
                            item_index: row.item.item_index,
                            file: Some(file.clone()),
                            status: OutcomeStatus::Failed,
                            reason: format!("cannot read {}: {}", file, err),
                            backup: None,
                        },
                    );
                    continue;
                }
            };

            let event = row
                .event
                .clone()
                .unwrap_or_else(|| row.item.action.default_event().to_string());
            let params = row
                .params
                .clone()
                .unwrap_or_else(|| default_params(&row.item));

            let instruction = planner.plan(
                &row.item,
                &location,
                &event,
                params,
                &row.code,
                row.snippet.as_deref(),
                &content,
            );

            let decision = guard.check(&row.item, &instruction, &content, framework.as_deref());
            if decision.already_tagged {
                self.record(
                    &mut report,
                    ItemOutcome {
                        item_index: row.item.item_index,
                        file: Some(file.clone()),
                        status: OutcomeStatus::SkippedAlreadyTagged,
                        reason: decision
                            .reason
                            .unwrap_or_else(|| "already tagged".to_string()),
                        backup: None,
                    },
                );
                continue;
            }

            let result = applier.apply(repo_root, &instruction, framework.as_deref(), dry_run);
            let outcome = outcome_for(row.item.item_index, &file, &result, dry_run);
            self.record(&mut report, outcome);
            self.tally_edit(&mut report, &result);
        }

        report.finish();
        Ok(report)
    }

    /// Restores every backed-up file under the repository.
    pub fn rollback(
        &self,
        repo_root: &Path,
        delete_backups: bool,
    ) -> Result<RollbackReport, PipelineError> {
        RollbackEngine::new(self.config)
            .rollback(repo_root, delete_backups)
            .map_err(|source| PipelineError::RepoAccess {
                path: repo_root.to_path_buf(),
                source,
            })
    }

    /// Asks the service what to call and with what payload for one item.
    /// Any failure falls back to the action's default event and the item's
    /// vendor fields, so an advisor outage degrades edits rather than
    /// dropping them.
    fn advise(
        &self,
        item: &SpecificationItem,
        file: &str,
        content: &str,
        framework_source: Option<&str>,
    ) -> Advice {
        let fallback = Advice {
            event: item.action.default_event().to_string(),
            params: default_params(item),
            code: BTreeMap::new(),
        };

        let prompt = self.advise_prompt(item, file, content, framework_source);
        let response = match self.completion.complete(&prompt) {
            Ok(response) => response,
            Err(err) => {
                if self.verbose {
                    eprintln!("Advisor call failed for item {}: {}", item.item_index, err);
                }
                return fallback;
            }
        };

        let Some(value) = extract_json_object(&response) else {
            return fallback;
        };

        let event = value
            .get("suggested_event_name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback.event);
        let params = value
            .get("suggested_params")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or(fallback.params);
        let code = value
            .get("code")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Advice {
            event,
            params,
            code,
        }
    }

    fn advise_prompt(
        &self,
        item: &SpecificationItem,
        file: &str,
        content: &str,
        framework_source: Option<&str>,
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str(
            "You are planning one analytics tracking call for a JavaScript/TypeScript \
repository.\n",
        );
        if let Some(framework) = framework_source {
            prompt.push_str("The project's tracking helper module:\n```\n");
            prompt.push_str(framework);
            prompt.push_str("\n```\n\n");
        }
        prompt.push_str(&format!(
            "Tracking requirement:\n- description: {}\n- action: {}\n",
            item.description, item.action
        ));
        if let Some(page) = &item.page {
            prompt.push_str(&format!("- page: {}\n", page));
        }
        if let Some(var) = &item.vendor_var {
            prompt.push_str(&format!(
                "- vendor variable: {} = {}\n",
                var,
                item.vendor_value.as_deref().unwrap_or("")
            ));
        }
        prompt.push_str(&format!(
            "\nTarget file `{}`:\n```\n{}\n```\n\n",
            file, content
        ));
        prompt.push_str(&format!(
            "Suggest which `{}` event to emit and with what parameters, plus the code \
fragments to insert (imports, hook, jsx_attrs, handler_wrap as applicable).\n\
Reply with strict JSON only: {{\"suggested_event_name\": \"...\", \
\"suggested_params\": {{...}}, \"code\": {{\"imports\": \"...\", ...}}}}",
            self.config.tracking_helper
        ));
        prompt
    }

    /// First framework path that exists under the repo, read whole.
    fn framework_source(&self, repo_root: &Path) -> Option<String> {
        self.config
            .framework_paths
            .iter()
            .map(|rel| repo_root.join(rel))
            .find_map(|path| fs::read_to_string(path).ok())
    }

    fn record(&self, report: &mut RunReport, outcome: ItemOutcome) {
        if self.verbose {
            println!(
                "Item {}: {:?} ({})",
                outcome.item_index, outcome.status, outcome.reason
            );
        }
        report.stats.processed += 1;
        match outcome.status {
            OutcomeStatus::Applied | OutcomeStatus::DryRun => report.stats.succeeded += 1,
            OutcomeStatus::Failed => report.stats.failed += 1,
            OutcomeStatus::SkippedAlreadyTagged => report.stats.skipped_already_tagged += 1,
            OutcomeStatus::NoLocation => report.stats.no_location += 1,
            OutcomeStatus::NoChange => {}
        }
        report.outcomes.push(outcome);
    }

    fn tally_edit(&self, report: &mut RunReport, result: &EditResult) {
        if !result.applied {
            return;
        }
        if result.import_added {
            report.stats.imports_added += 1;
        }
        if result.hook_added {
            report.stats.hooks_added += 1;
        }
        if result.tracking_added {
            report.stats.tracking_calls_added += 1;
        }
    }
}

fn outcome_for(item_index: usize, file: &str, result: &EditResult, dry_run: bool) -> ItemOutcome {
    let status = if result.failed {
        OutcomeStatus::Failed
    } else if result.applied && dry_run {
        OutcomeStatus::DryRun
    } else if result.applied {
        OutcomeStatus::Applied
    } else {
        OutcomeStatus::NoChange
    };

    ItemOutcome {
        item_index,
        file: Some(file.to_string()),
        status,
        reason: result.reason.clone(),
        backup: result.backup.clone(),
    }
}

/// Parameters used when the advisor produced none: the vendor mapping from
/// the spec row, else a label derived from the description.
fn default_params(item: &SpecificationItem) -> Map<String, Value> {
    let mut params = Map::new();
    if let Some(var) = &item.vendor_var {
        params.insert(
            var.clone(),
            Value::String(item.vendor_value.clone().unwrap_or_default()),
        );
    } else if !item.description.is_empty() {
        params.insert(
            "label".to_string(),
            Value::String(item.description.clone()),
        );
    }
    if let Some(page) = &item.page {
        params.insert("page".to_string(), Value::String(page.clone()));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ActionKind, ServiceError};
    use std::cell::RefCell;

    struct ScriptedService {
        responses: RefCell<Vec<String>>,
    }

    impl ScriptedService {
        fn new(responses: &[&str]) -> Self {
            ScriptedService {
                responses: RefCell::new(responses.iter().rev().map(|s| s.to_string()).collect()),
            }
        }
    }

    impl CompletionService for ScriptedService {
        fn complete(&self, _prompt: &str) -> Result<String, ServiceError> {
            self.responses
                .borrow_mut()
                .pop()
                .ok_or_else(|| ServiceError::Transport("script exhausted".into()))
        }
    }

    fn item(description: &str, action: ActionKind) -> SpecificationItem {
        SpecificationItem {
            item_index: 0,
            sheet: None,
            row_index: None,
            description: description.to_string(),
            action,
            page: None,
            vendor_var: Some("eVar12".to_string()),
            vendor_value: Some("pay:button".to_string()),
            target_terms: vec![],
        }
    }

    #[test]
    fn test_default_params_prefer_vendor_mapping() {
        let params = default_params(&item("Pay button", ActionKind::Click));
        assert_eq!(params["eVar12"], "pay:button");
        assert!(!params.contains_key("label"));
    }

    #[test]
    fn test_default_params_fall_back_to_label() {
        let mut spec = item("Pay button", ActionKind::Click);
        spec.vendor_var = None;
        spec.page = Some("Payment".to_string());
        let params = default_params(&spec);
        assert_eq!(params["label"], "Pay button");
        assert_eq!(params["page"], "Payment");
    }

    #[test]
    fn test_advise_falls_back_on_service_failure() {
        let service = ScriptedService::new(&[]);
        let config = PipelineConfig::default();
        let pipeline = TaggingPipeline::new(&service, None, &config);

        let advice = pipeline.advise(&item("Pay button", ActionKind::Submit), "src/A.js", "", None);
        assert_eq!(advice.event, "trackSubmit");
        assert_eq!(advice.params["eVar12"], "pay:button");
        assert!(advice.code.is_empty());
    }

    #[test]
    fn test_advise_uses_service_suggestion() {
        let service = ScriptedService::new(&[r#"{
            "suggested_event_name": "trackClick",
            "suggested_params": {"eVar12": "pay:button", "events": "event4"},
            "code": {"imports": "import { track } from './track';", "bogus": 7}
        }"#]);
        let config = PipelineConfig::default();
        let pipeline = TaggingPipeline::new(&service, None, &config);

        let advice = pipeline.advise(&item("Pay button", ActionKind::Click), "src/A.js", "", None);
        assert_eq!(advice.event, "trackClick");
        assert_eq!(advice.params["events"], "event4");
        // Non-string fragments are dropped.
        assert_eq!(advice.code.len(), 1);
        assert!(advice.code.contains_key("imports"));
    }

    #[test]
    fn test_outcome_for_maps_statuses() {
        let original = "x\n";
        let mut result = EditResult::not_applied("nothing to do", original);
        assert_eq!(
            outcome_for(1, "a.js", &result, false).status,
            OutcomeStatus::NoChange
        );

        result.applied = true;
        assert_eq!(
            outcome_for(1, "a.js", &result, false).status,
            OutcomeStatus::Applied
        );
        assert_eq!(
            outcome_for(1, "a.js", &result, true).status,
            OutcomeStatus::DryRun
        );

        let failed = EditResult::failure("boom", original);
        assert_eq!(
            outcome_for(1, "a.js", &failed, false).status,
            OutcomeStatus::Failed
        );
    }

    #[test]
    fn test_missing_repo_root_is_a_pipeline_error() {
        let service = ScriptedService::new(&[]);
        let config = PipelineConfig::default();
        let pipeline = TaggingPipeline::new(&service, None, &config);

        let err = pipeline
            .suggest(Path::new("/tmp/tagsmith_definitely_missing"), &[])
            .unwrap_err();
        assert!(matches!(err, PipelineError::RepoAccess { .. }));
    }
}
