use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use tagsmith::contexts::{PipelineConfig, TaggingPipeline};
use tagsmith::data::{
    ActionKind, CompletionService, OutcomeStatus, ServiceError, SpecificationItem,
};

const ORIGINAL_PAGE: &str = r#"import React from 'react';

export default function PayPage() {
  const handlePay = () => submitPayment();
  return (
    <button onClick={handlePay}>Pay now</button>
  );
}
"#;

const INSTRUMENTED_PAGE: &str = r#"import React from 'react';
import { track } from '../analytics/track';

export default function PayPage() {
  const handlePay = () => {
    track('trackClick', { eVar12: 'pay:button' });
    submitPayment();
  };
  return (
    <button onClick={handlePay}>Pay now</button>
  );
}
"#;

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
        fs::write(root.join("src/PayPage.jsx"), ORIGINAL_PAGE).unwrap();
        TestRepo { root }
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

/// Routes each prompt to a canned answer by which stage produced it.
struct RoutingService {
    guard_says_tagged: bool,
    updated_file: String,
    prompts: RefCell<Vec<String>>,
}

impl RoutingService {
    fn new(guard_says_tagged: bool, updated_file: &str) -> Self {
        RoutingService {
            guard_says_tagged,
            updated_file: updated_file.to_string(),
            prompts: RefCell::new(Vec::new()),
        }
    }

    fn guard_calls(&self) -> usize {
        self.prompts
            .borrow()
            .iter()
            .filter(|p| p.contains("already_tagged"))
            .count()
    }
}

impl CompletionService for RoutingService {
    fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        self.prompts.borrow_mut().push(prompt.to_string());

        if prompt.contains("already_tagged") {
            return Ok(format!(
                r#"{{"already_tagged": {}, "reason": "trackClick already covers this button"}}"#,
                self.guard_says_tagged
            ));
        }
        if prompt.contains("suggested_event_name") {
            return Ok(r#"{
                "suggested_event_name": "trackClick",
                "suggested_params": {"eVar12": "pay:button"},
                "code": {"imports": "import { track } from '../analytics/track';"}
            }"#
            .to_string());
        }

        // Apply stage: return the full rewritten file.
        Ok(serde_json::to_string(&serde_json::json!({
            "applied": true,
            "reason": "",
            "updated_file": self.updated_file,
        }))
        .unwrap())
    }
}

fn pay_button_item() -> SpecificationItem {
    SpecificationItem {
        item_index: 0,
        sheet: Some("Payments".to_string()),
        row_index: Some(4),
        description: "User taps the Pay now button".to_string(),
        action: ActionKind::Click,
        page: Some("Payment".to_string()),
        vendor_var: Some("eVar12".to_string()),
        vendor_value: Some("pay:button".to_string()),
        target_terms: vec!["Pay now".to_string()],
    }
}

#[test]
fn test_full_run_applies_edit_then_skips_then_rolls_back() {
    let repo = TestRepo::new("e2e_full");
    let config = PipelineConfig::default();

    // First run: file is untagged, so the guard's substring pre-filter
    // answers without a service call and the edit goes through.
    let service = RoutingService::new(false, INSTRUMENTED_PAGE);
    let pipeline = TaggingPipeline::new(&service, None, &config);
    let report = pipeline
        .run(&repo.root, &[pay_button_item()], false)
        .unwrap();

    assert_eq!(report.stats.succeeded, 1);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Applied);
    assert_eq!(report.stats.imports_added, 1);
    assert_eq!(report.stats.tracking_calls_added, 1);
    assert_eq!(repo.read("src/PayPage.jsx"), INSTRUMENTED_PAGE);
    assert_eq!(repo.read("src/PayPage.jsx.taggingai.bak"), ORIGINAL_PAGE);
    assert_eq!(service.guard_calls(), 0);

    // Second run: the helper name is present now, the guard consults the
    // service, and the item is skipped before any edit is attempted.
    let service = RoutingService::new(true, INSTRUMENTED_PAGE);
    let pipeline = TaggingPipeline::new(&service, None, &config);
    let report = pipeline
        .run(&repo.root, &[pay_button_item()], false)
        .unwrap();

    assert_eq!(report.stats.skipped_already_tagged, 1);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::SkippedAlreadyTagged);
    assert_eq!(service.guard_calls(), 1);
    assert_eq!(repo.read("src/PayPage.jsx"), INSTRUMENTED_PAGE);

    // Rollback restores the pre-run content and removes the backup.
    let rollback = pipeline.rollback(&repo.root, true).unwrap();
    assert_eq!(rollback.restored, 1);
    assert_eq!(rollback.deleted, 1);
    assert!(rollback.errors.is_empty());
    assert_eq!(repo.read("src/PayPage.jsx"), ORIGINAL_PAGE);
    assert!(!repo.root.join("src/PayPage.jsx.taggingai.bak").exists());
}

#[test]
fn test_dry_run_reports_without_touching_disk() {
    let repo = TestRepo::new("e2e_dry");
    let config = PipelineConfig::default();

    let service = RoutingService::new(false, INSTRUMENTED_PAGE);
    let pipeline = TaggingPipeline::new(&service, None, &config);
    let report = pipeline
        .run(&repo.root, &[pay_button_item()], true)
        .unwrap();

    assert_eq!(report.stats.succeeded, 1);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::DryRun);
    assert!(report.dry_run);
    assert_eq!(repo.read("src/PayPage.jsx"), ORIGINAL_PAGE);
    assert!(!repo.root.join("src/PayPage.jsx.taggingai.bak").exists());
}

#[test]
fn test_suggest_ranks_the_pay_button() {
    let repo = TestRepo::new("e2e_suggest");
    let config = PipelineConfig::default();

    let service = RoutingService::new(false, INSTRUMENTED_PAGE);
    let pipeline = TaggingPipeline::new(&service, None, &config);
    let suggestions = pipeline.suggest(&repo.root, &[pay_button_item()]).unwrap();

    assert_eq!(suggestions.len(), 1);
    let top = suggestions[0].top_match().unwrap();
    assert_eq!(top.file, "src/PayPage.jsx");
    assert_eq!(top.line, 6);
    // Base score plus the event-handler and clickable-markup bonuses.
    assert_eq!(top.confidence, 0.85);
    // Suggest never edits and never calls the service.
    assert!(service.prompts.borrow().is_empty());
    assert_eq!(repo.read("src/PayPage.jsx"), ORIGINAL_PAGE);
}

#[test]
fn test_unmatched_item_is_reported_as_no_location() {
    let repo = TestRepo::new("e2e_nomatch");
    // A repo with no interactive elements at all: term matching and the
    // fallback scan both come up empty.
    fs::write(
        repo.root.join("src/PayPage.jsx"),
        "export const constants = { currency: 'DKK' };\n",
    )
    .unwrap();

    let config = PipelineConfig::default();
    let service = RoutingService::new(false, INSTRUMENTED_PAGE);
    let pipeline = TaggingPipeline::new(&service, None, &config);

    let mut item = pay_button_item();
    item.target_terms = vec!["No such phrase anywhere".to_string()];
    item.description = "No such phrase anywhere".to_string();

    let report = pipeline.run(&repo.root, &[item], false).unwrap();
    assert_eq!(report.stats.no_location, 1);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::NoLocation);
    assert!(service.prompts.borrow().is_empty());
}
