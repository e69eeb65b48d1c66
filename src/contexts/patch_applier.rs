use serde_json::{json, Value};
use std::fs;
use std::path::Path;

use crate::data::{CompletionService, EditInstruction, EditResult};

use super::response::extract_json_object;
use super::PipelineConfig;

/// Applies one [`EditInstruction`] to its target file through the
/// completion service and persists the result.
///
/// The service receives the full file plus the instruction payload and
/// must return the complete updated file; the applier never splices text
/// itself. Before the first write to a file a backup copy is taken next to
/// it, and a file that already has a backup keeps the original one so a
/// later rollback restores the true pre-run content.
pub struct PatchApplier<'a> {
    service: &'a dyn CompletionService,
    config: &'a PipelineConfig,
}

/// Raw parse of one service reply, before retry/persist decisions.
struct Attempt {
    applied: bool,
    reason: Option<String>,
    updated: Option<String>,
    hard_failure: Option<String>,
}

impl<'a> PatchApplier<'a> {
    pub fn new(service: &'a dyn CompletionService, config: &'a PipelineConfig) -> Self {
        PatchApplier { service, config }
    }

    pub fn apply(
        &self,
        repo_root: &Path,
        instruction: &EditInstruction,
        framework_source: Option<&str>,
        dry_run: bool,
    ) -> EditResult {
        let path = repo_root.join(&instruction.file);
        let original = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                return EditResult::failure(
                    format!("cannot read {}: {}", instruction.file, err),
                    "",
                );
            }
        };

        let mut retried = false;
        let mut attempt = self.attempt(instruction, &original, instruction.anchor_line, framework_source);

        // One retry at a shifted anchor when the service neither changed the
        // file nor said why. An explicit reason means the refusal stands.
        let unchanged = attempt
            .updated
            .as_deref()
            .map(|u| u == original)
            .unwrap_or(true);
        if attempt.hard_failure.is_none() && unchanged && attempt.reason.is_none() {
            let line_count = original.lines().count().max(1);
            let shifted = (instruction.anchor_line + self.config.retry_offset).min(line_count);
            if shifted != instruction.anchor_line {
                retried = true;
                attempt = self.attempt(instruction, &original, shifted, framework_source);
            }
        }

        if let Some(message) = attempt.hard_failure {
            let mut result = EditResult::failure(message, &original);
            result.retried = retried;
            return result;
        }

        let updated = attempt.updated.unwrap_or_else(|| original.clone());

        if !attempt.applied {
            let mut result = EditResult::not_applied(
                attempt
                    .reason
                    .unwrap_or_else(|| "service declined the edit".to_string()),
                &original,
            );
            result.retried = retried;
            return result;
        }

        if updated == original {
            let mut result = EditResult::not_applied(
                attempt
                    .reason
                    .unwrap_or_else(|| "file already up to date".to_string()),
                &original,
            );
            result.retried = retried;
            return result;
        }

        let mut backup = None;
        if !dry_run {
            match self.backup_once(&path) {
                Ok(rel) => backup = rel,
                Err(err) => {
                    let mut result = EditResult::failure(
                        format!("cannot back up {}: {}", instruction.file, err),
                        &original,
                    );
                    result.retried = retried;
                    return result;
                }
            }
            if let Err(err) = fs::write(&path, &updated) {
                let mut result = EditResult::failure(
                    format!("cannot write {}: {}", instruction.file, err),
                    &original,
                );
                result.retried = retried;
                return result;
            }
        }

        EditResult {
            applied: true,
            reason: attempt.reason.unwrap_or_default(),
            import_added: section_landed(instruction, &original, &updated, "imports"),
            hook_added: section_landed(instruction, &original, &updated, "hook"),
            tracking_added: call_count(&updated, &self.config.tracking_helper)
                > call_count(&original, &self.config.tracking_helper),
            updated_file: updated,
            backup,
            retried,
            failed: false,
        }
    }

    fn attempt(
        &self,
        instruction: &EditInstruction,
        original: &str,
        anchor_line: usize,
        framework_source: Option<&str>,
    ) -> Attempt {
        let prompt = self.build_prompt(instruction, original, anchor_line, framework_source);
        let response = match self.service.complete(&prompt) {
            Ok(response) => response,
            Err(err) => {
                return Attempt {
                    applied: false,
                    reason: None,
                    updated: None,
                    hard_failure: Some(err.to_string()),
                };
            }
        };

        match extract_json_object(&response) {
            Some(value) => Attempt {
                applied: value
                    .get("applied")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                reason: value
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .filter(|s| !s.is_empty()),
                updated: value
                    .get("updated_file")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                hard_failure: None,
            },
            None => Attempt {
                applied: false,
                reason: None,
                updated: None,
                hard_failure: None,
            },
        }
    }

    fn build_prompt(
        &self,
        instruction: &EditInstruction,
        original: &str,
        anchor_line: usize,
        framework_source: Option<&str>,
    ) -> String {
        let payload: Value = json!({
            "file": instruction.file,
            "action": instruction.action.as_str(),
            "event": instruction.event,
            "params": instruction.params,
            "anchor_line": anchor_line,
            "snippet": instruction.snippet,
            "sections": instruction.sections_json(),
        });

        let mut prompt = String::new();
        prompt.push_str(
            "You are editing a JavaScript/TypeScript source file to add one analytics \
tracking call.\n",
        );
        if let Some(framework) = framework_source {
            prompt.push_str("The project's tracking helper module:\n```\n");
            prompt.push_str(framework);
            prompt.push_str("\n```\n\n");
        }
        prompt.push_str("Edit instruction:\n```json\n");
        prompt.push_str(&serde_json::to_string_pretty(&payload).unwrap_or_default());
        prompt.push_str("\n```\n\nCurrent file content:\n```\n");
        prompt.push_str(original);
        prompt.push_str("\n```\n\n");
        prompt.push_str(&format!(
            "Merge the sections into the file near line {}: keep all unrelated code \
exactly as it is, ensure a single canonical import of the tracking helper, merge the \
`{}` call into the nearest matching JSX element or handler, and never invent functions \
that do not exist in the helper module. If the edit cannot be made safely, do not guess.\n\
Reply with strict JSON only: {{\"applied\": true|false, \"reason\": \"...\", \
\"updated_file\": \"<the complete new file content>\"}}",
            anchor_line, instruction.event
        ));
        prompt
    }

    /// Copies `path` to `path + backup_suffix` unless a backup already
    /// exists from an earlier instruction in this or a previous run.
    fn backup_once(&self, path: &Path) -> std::io::Result<Option<String>> {
        let backup_path = backup_path_for(path, &self.config.backup_suffix);
        if backup_path.exists() {
            return Ok(None);
        }
        fs::copy(path, &backup_path)?;
        Ok(Some(backup_path.to_string_lossy().into_owned()))
    }
}

fn backup_path_for(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    path.with_file_name(name)
}

/// Whether the section's first meaningful line newly appears in the update.
fn section_landed(
    instruction: &EditInstruction,
    original: &str,
    updated: &str,
    label: &str,
) -> bool {
    instruction
        .sections
        .iter()
        .filter(|s| s.label() == label)
        .filter_map(|s| s.code().lines().find(|l| !l.trim().is_empty()))
        .any(|line| {
            let needle = line.trim();
            updated.contains(needle) && !original.contains(needle)
        })
}

fn call_count(content: &str, helper: &str) -> usize {
    let needle = format!("{}(", helper);
    content.matches(&needle).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ActionKind, CodeSection, ServiceError};
    use serde_json::Map;
    use std::cell::RefCell;
    use std::path::PathBuf;

    struct TestRepo {
        root: PathBuf,
    }

    impl TestRepo {
        fn new(label: &str) -> Self {
            let root = PathBuf::from(format!(
                "/tmp/tagsmith_test_{}_{}",
                std::process::id(),
                label
            ));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(root.join("src")).unwrap();
            TestRepo { root }
        }

        fn write(&self, rel: &str, content: &str) {
            fs::write(self.root.join(rel), content).unwrap();
        }

        fn read(&self, rel: &str) -> String {
            fs::read_to_string(self.root.join(rel)).unwrap()
        }
    }

    impl Drop for TestRepo {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    /// Returns queued responses in order; repeats the last one when drained.
    struct ScriptedService {
        responses: RefCell<Vec<String>>,
        prompts: RefCell<Vec<String>>,
    }

    impl ScriptedService {
        fn new(responses: &[&str]) -> Self {
            ScriptedService {
                responses: RefCell::new(responses.iter().rev().map(|s| s.to_string()).collect()),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl CompletionService for ScriptedService {
        fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            let mut responses = self.responses.borrow_mut();
            match responses.len() {
                0 => Err(ServiceError::Transport("script exhausted".into())),
                1 => Ok(responses[0].clone()),
                _ => Ok(responses.pop().unwrap()),
            }
        }
    }

    struct FailingService;

    impl CompletionService for FailingService {
        fn complete(&self, _prompt: &str) -> Result<String, ServiceError> {
            Err(ServiceError::Transport("connection refused".into()))
        }
    }

    fn instruction(file: &str, anchor: usize) -> EditInstruction {
        EditInstruction {
            file: file.to_string(),
            action: ActionKind::Click,
            event: "trackClick".to_string(),
            params: Map::new(),
            anchor_line: anchor,
            snippet: None,
            sections: vec![CodeSection::categorize(
                "imports",
                "import { track } from './track';",
            )],
        }
    }

    fn applied_response(updated: &str) -> String {
        serde_json::to_string(&json!({
            "applied": true,
            "reason": "",
            "updated_file": updated,
        }))
        .unwrap()
    }

    #[test]
    fn test_apply_writes_file_and_backup() {
        let repo = TestRepo::new("applier_apply");
        let original = "const x = 1;\n";
        repo.write("src/App.js", original);

        let updated = "import { track } from './track';\nconst x = 1;\ntrack('trackClick', {});\n";
        let service = ScriptedService::new(&[&applied_response(updated)]);
        let config = PipelineConfig::default();
        let applier = PatchApplier::new(&service, &config);

        let result = applier.apply(&repo.root, &instruction("src/App.js", 1), None, false);
        assert!(result.applied);
        assert!(!result.failed);
        assert!(result.import_added);
        assert!(result.tracking_added);
        assert_eq!(repo.read("src/App.js"), updated);
        assert_eq!(repo.read("src/App.js.taggingai.bak"), original);
        assert!(result.backup.unwrap().ends_with("App.js.taggingai.bak"));
    }

    #[test]
    fn test_existing_backup_is_preserved() {
        let repo = TestRepo::new("applier_backup_once");
        repo.write("src/App.js", "version two\n");
        repo.write("src/App.js.taggingai.bak", "version one\n");

        let service = ScriptedService::new(&[&applied_response("version three\n")]);
        let config = PipelineConfig::default();
        let applier = PatchApplier::new(&service, &config);

        let result = applier.apply(&repo.root, &instruction("src/App.js", 1), None, false);
        assert!(result.applied);
        assert!(result.backup.is_none());
        // The original pre-run content survives.
        assert_eq!(repo.read("src/App.js.taggingai.bak"), "version one\n");
    }

    #[test]
    fn test_dry_run_leaves_disk_untouched() {
        let repo = TestRepo::new("applier_dry");
        let original = "const x = 1;\n";
        repo.write("src/App.js", original);

        let service = ScriptedService::new(&[&applied_response("changed\n")]);
        let config = PipelineConfig::default();
        let applier = PatchApplier::new(&service, &config);

        let result = applier.apply(&repo.root, &instruction("src/App.js", 1), None, true);
        assert!(result.applied);
        assert_eq!(result.updated_file, "changed\n");
        assert_eq!(repo.read("src/App.js"), original);
        assert!(!repo.root.join("src/App.js.taggingai.bak").exists());
    }

    #[test]
    fn test_explicit_refusal_is_not_retried() {
        let repo = TestRepo::new("applier_refusal");
        let original = "const x = 1;\n";
        repo.write("src/App.js", original);

        let service = ScriptedService::new(&[
            r#"{"applied": false, "reason": "already tagged", "updated_file": ""}"#,
        ]);
        let config = PipelineConfig::default();
        let applier = PatchApplier::new(&service, &config);

        let result = applier.apply(&repo.root, &instruction("src/App.js", 1), None, false);
        assert!(!result.applied);
        assert!(!result.retried);
        assert!(!result.failed);
        assert_eq!(result.reason, "already tagged");
        assert_eq!(service.prompts.borrow().len(), 1);
    }

    #[test]
    fn test_silent_no_change_retries_at_shifted_anchor() {
        let repo = TestRepo::new("applier_retry");
        let original: String = (1..=40).map(|i| format!("line {}\n", i)).collect();
        repo.write("src/App.js", &original);

        let updated = format!("{}track('trackClick', {{}});\n", original);
        let first = applied_response(&original); // unchanged, no reason
        let second = applied_response(&updated);
        let service = ScriptedService::new(&[&first, &second]);
        let config = PipelineConfig::default();
        let applier = PatchApplier::new(&service, &config);

        let result = applier.apply(&repo.root, &instruction("src/App.js", 5), None, false);
        assert!(result.applied);
        assert!(result.retried);
        assert_eq!(service.prompts.borrow().len(), 2);
        // The second prompt carries the shifted anchor.
        assert!(service.prompts.borrow()[1].contains("\"anchor_line\": 25"));
    }

    #[test]
    fn test_unchanged_on_both_attempts_is_benign_no_change() {
        let repo = TestRepo::new("applier_nochange");
        let original: String = (1..=40).map(|i| format!("line {}\n", i)).collect();
        repo.write("src/App.js", &original);

        let response = applied_response(&original);
        let service = ScriptedService::new(&[&response]);
        let config = PipelineConfig::default();
        let applier = PatchApplier::new(&service, &config);

        let result = applier.apply(&repo.root, &instruction("src/App.js", 5), None, false);
        assert!(!result.applied);
        assert!(!result.failed);
        assert!(result.retried);
        assert_eq!(result.reason, "file already up to date");
        assert!(!repo.root.join("src/App.js.taggingai.bak").exists());
    }

    #[test]
    fn test_transport_failure_is_hard() {
        let repo = TestRepo::new("applier_transport");
        repo.write("src/App.js", "const x = 1;\n");

        let config = PipelineConfig::default();
        let applier = PatchApplier::new(&FailingService, &config);

        let result = applier.apply(&repo.root, &instruction("src/App.js", 1), None, false);
        assert!(!result.applied);
        assert!(result.failed);
        assert!(result.reason.contains("connection refused"));
    }

    #[test]
    fn test_missing_file_is_hard_failure() {
        let repo = TestRepo::new("applier_missing");
        let service = ScriptedService::new(&[r#"{"applied": true}"#]);
        let config = PipelineConfig::default();
        let applier = PatchApplier::new(&service, &config);

        let result = applier.apply(&repo.root, &instruction("src/Gone.js", 1), None, false);
        assert!(result.failed);
        assert!(service.prompts.borrow().is_empty());
    }
}
