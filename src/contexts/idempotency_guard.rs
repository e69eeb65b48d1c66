use serde_json::json;

use crate::data::{CompletionService, EditInstruction, SpecificationItem};

use super::response::extract_json_object;
use super::PipelineConfig;

/// Outcome of the already-tagged check for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardDecision {
    pub already_tagged: bool,
    pub reason: Option<String>,
}

impl GuardDecision {
    fn not_tagged() -> Self {
        GuardDecision {
            already_tagged: false,
            reason: None,
        }
    }
}

/// Decides whether a target file already carries the tracking call an
/// instruction would add, so repeated runs do not stack duplicate
/// instrumentation.
///
/// The check is two-phase. A substring pre-filter answers "definitely not
/// tagged" without spending a completion call: a file that never mentions
/// the tracking helper cannot already call it. Only files that pass the
/// pre-filter are sent to the service, with the full file and the intended
/// instruction, for a judgement on whether the existing call covers this
/// specific requirement. Any service failure fails open (the file is
/// treated as not tagged) so a flaky endpoint cannot silently drop
/// requirements.
pub struct IdempotencyGuard<'a> {
    service: &'a dyn CompletionService,
    config: &'a PipelineConfig,
}

impl<'a> IdempotencyGuard<'a> {
    pub fn new(service: &'a dyn CompletionService, config: &'a PipelineConfig) -> Self {
        IdempotencyGuard { service, config }
    }

    pub fn check(
        &self,
        item: &SpecificationItem,
        instruction: &EditInstruction,
        file_content: &str,
        framework_source: Option<&str>,
    ) -> GuardDecision {
        if !self.config.skip_if_tagged {
            return GuardDecision::not_tagged();
        }
        // Pre-filter: no helper name, no existing tagging, no service call.
        if !file_content.contains(&self.config.tracking_helper) {
            return GuardDecision::not_tagged();
        }

        let prompt = self.build_prompt(item, instruction, file_content, framework_source);
        let response = match self.service.complete(&prompt) {
            Ok(response) => response,
            Err(err) => {
                return GuardDecision {
                    already_tagged: false,
                    reason: Some(format!("guard check unavailable: {}", err)),
                };
            }
        };

        match extract_json_object(&response) {
            Some(value) => {
                let already_tagged = value
                    .get("already_tagged")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let reason = value
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .filter(|s| !s.is_empty());
                GuardDecision {
                    already_tagged,
                    reason,
                }
            }
            None => GuardDecision {
                already_tagged: false,
                reason: Some("guard response was not parseable".to_string()),
            },
        }
    }

    fn build_prompt(
        &self,
        item: &SpecificationItem,
        instruction: &EditInstruction,
        file_content: &str,
        framework_source: Option<&str>,
    ) -> String {
        let intended = json!({
            "event": instruction.event,
            "params": instruction.params,
            "anchor_line": instruction.anchor_line,
            "sections": instruction.sections_json(),
        });

        let mut prompt = String::new();
        prompt.push_str(
            "You are auditing analytics instrumentation in a JavaScript/TypeScript repository.\n",
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
        prompt.push_str("\nIntended edit:\n```json\n");
        prompt.push_str(&serde_json::to_string_pretty(&intended).unwrap_or_default());
        prompt.push_str(&format!(
            "\n```\n\nTarget file `{}`:\n```\n{}\n```\n\n",
            instruction.file, file_content
        ));
        prompt.push_str(&format!(
            "Does the file already contain a `{}` call that satisfies this exact \
requirement, matching its purpose and parameters? An unrelated tracking call elsewhere \
in the file does not count.\n\
Reply with strict JSON only: {{\"already_tagged\": true|false, \"reason\": \"...\"}}",
            self.config.tracking_helper
        ));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ActionKind, ServiceError};
    use serde_json::Map;
    use std::cell::Cell;

    struct ScriptedService {
        response: Result<String, ServiceError>,
        calls: Cell<usize>,
    }

    impl ScriptedService {
        fn answering(response: &str) -> Self {
            ScriptedService {
                response: Ok(response.to_string()),
                calls: Cell::new(0),
            }
        }

        fn failing() -> Self {
            ScriptedService {
                response: Err(ServiceError::Transport("boom".into())),
                calls: Cell::new(0),
            }
        }
    }

    impl CompletionService for ScriptedService {
        fn complete(&self, _prompt: &str) -> Result<String, ServiceError> {
            self.calls.set(self.calls.get() + 1);
            self.response.clone()
        }
    }

    fn item() -> SpecificationItem {
        SpecificationItem {
            item_index: 0,
            sheet: None,
            row_index: None,
            description: "Pay button click".to_string(),
            action: ActionKind::Click,
            page: None,
            vendor_var: None,
            vendor_value: None,
            target_terms: vec![],
        }
    }

    fn instruction() -> EditInstruction {
        EditInstruction {
            file: "src/Pay.js".to_string(),
            action: ActionKind::Click,
            event: "trackClick".to_string(),
            params: Map::new(),
            anchor_line: 2,
            snippet: None,
            sections: vec![],
        }
    }

    #[test]
    fn test_prefilter_skips_service_when_helper_absent() {
        let config = PipelineConfig::default();
        let service = ScriptedService::answering(r#"{"already_tagged": true}"#);
        let guard = IdempotencyGuard::new(&service, &config);

        let decision = guard.check(&item(), &instruction(), "const x = 1;\n", None);
        assert!(!decision.already_tagged);
        assert_eq!(service.calls.get(), 0);
    }

    #[test]
    fn test_tagged_file_is_detected() {
        let config = PipelineConfig::default();
        let service = ScriptedService::answering(
            r#"{"already_tagged": true, "reason": "trackClick already wired to this button"}"#,
        );
        let guard = IdempotencyGuard::new(&service, &config);

        let content = "import { track } from './track';\ntrack('trackClick', {});\n";
        let decision = guard.check(&item(), &instruction(), content, None);
        assert!(decision.already_tagged);
        assert_eq!(
            decision.reason.as_deref(),
            Some("trackClick already wired to this button")
        );
        assert_eq!(service.calls.get(), 1);
    }

    #[test]
    fn test_service_failure_fails_open() {
        let config = PipelineConfig::default();
        let service = ScriptedService::failing();
        let guard = IdempotencyGuard::new(&service, &config);

        let content = "track('trackClick', {});\n";
        let decision = guard.check(&item(), &instruction(), content, None);
        assert!(!decision.already_tagged);
        assert!(decision.reason.unwrap().contains("unavailable"));
    }

    #[test]
    fn test_unparseable_response_fails_open() {
        let config = PipelineConfig::default();
        let service = ScriptedService::answering("I think it might be tagged already?");
        let guard = IdempotencyGuard::new(&service, &config);

        let content = "track('trackClick', {});\n";
        let decision = guard.check(&item(), &instruction(), content, None);
        assert!(!decision.already_tagged);
        assert!(decision.reason.unwrap().contains("not parseable"));
    }

    #[test]
    fn test_disabled_guard_never_calls_the_service() {
        let mut config = PipelineConfig::default();
        config.skip_if_tagged = false;
        let service = ScriptedService::answering(r#"{"already_tagged": true}"#);
        let guard = IdempotencyGuard::new(&service, &config);

        let content = "track('trackClick', {});\n";
        let decision = guard.check(&item(), &instruction(), content, None);
        assert!(!decision.already_tagged);
        assert_eq!(service.calls.get(), 0);
    }
}
