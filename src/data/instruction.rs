use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

use super::ActionKind;

/// A code fragment the completion service is asked to merge into the target
/// file. Plans carry these as a free-form string-keyed map; the variant is
/// chosen once, at construction, by [`CodeSection::categorize`] — the fuzzy
/// key matching lives nowhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeSection {
    /// Import lines that must exist exactly once in the file.
    Import { code: String },
    /// Hook/effect body placed inside the component after its declaration.
    Hook { code: String },
    /// Attributes merged into the opening JSX tag nearest the anchor.
    JsxAttributes { code: String },
    /// Wrapper that replaces an existing handler while preserving it.
    HandlerWrap { code: String },
    /// Anything unrecognized: an opaque snippet inserted near the anchor.
    Fragment { label: String, code: String },
}

impl CodeSection {
    /// Maps a plan key to a recognized category. Import sections are
    /// normalized so a default import of the tracking helper becomes the
    /// named form the framework exports.
    pub fn categorize(key: &str, code: &str) -> CodeSection {
        let k = key.to_lowercase();
        let code = code.trim().to_string();

        if k.contains("import") {
            CodeSection::Import {
                code: normalize_import(&code),
            }
        } else if k.contains("hook") || k.contains("effect") {
            CodeSection::Hook { code }
        } else if k.contains("attr") || k.contains("jsx") {
            CodeSection::JsxAttributes { code }
        } else if k.contains("wrap") || k.contains("handler") {
            CodeSection::HandlerWrap { code }
        } else {
            CodeSection::Fragment {
                label: key.to_string(),
                code,
            }
        }
    }

    /// Key used when the section is rendered back into a prompt payload.
    pub fn label(&self) -> &str {
        match self {
            CodeSection::Import { .. } => "imports",
            CodeSection::Hook { .. } => "hook",
            CodeSection::JsxAttributes { .. } => "jsx_attrs",
            CodeSection::HandlerWrap { .. } => "handler_wrap",
            CodeSection::Fragment { label, .. } => label,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            CodeSection::Import { code }
            | CodeSection::Hook { code }
            | CodeSection::JsxAttributes { code }
            | CodeSection::HandlerWrap { code }
            | CodeSection::Fragment { code, .. } => code,
        }
    }
}

/// Rewrites `import track from '…'` style lines to the named-import form.
fn normalize_import(line: &str) -> String {
    static DEFAULT_IMPORT: OnceLock<Regex> = OnceLock::new();
    let re = DEFAULT_IMPORT
        .get_or_init(|| Regex::new(r"^import\s+([A-Za-z_$][\w$]*)\s+from\s+").unwrap());

    re.replace(line, "import { $1 } from ").to_string()
}

/// The unit of work handed to the completion service: one file, one anchor,
/// one set of desired code sections. At most one instruction is in flight
/// per target file within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditInstruction {
    pub file: String,
    pub action: ActionKind,
    pub event: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub anchor_line: usize,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub sections: Vec<CodeSection>,
}

impl EditInstruction {
    /// Renders the sections as the string-keyed map the prompt payload uses.
    pub fn sections_json(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for section in &self.sections {
            out.insert(
                section.label().to_string(),
                Value::String(section.code().to_string()),
            );
        }
        out
    }
}

/// Outcome of applying one instruction. When `applied` is false the
/// `updated_file` text equals the original content — no partial mutation
/// is ever reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditResult {
    pub applied: bool,
    pub reason: String,
    pub updated_file: String,
    #[serde(default)]
    pub import_added: bool,
    #[serde(default)]
    pub hook_added: bool,
    #[serde(default)]
    pub tracking_added: bool,
    #[serde(default)]
    pub backup: Option<String>,
    #[serde(default)]
    pub retried: bool,
    /// True only for hard failures (I/O, service transport); a benign
    /// "no changes needed" result keeps this false.
    #[serde(default)]
    pub failed: bool,
}

impl EditResult {
    pub fn not_applied(reason: impl Into<String>, original: &str) -> Self {
        EditResult {
            applied: false,
            reason: reason.into(),
            updated_file: original.to_string(),
            import_added: false,
            hook_added: false,
            tracking_added: false,
            backup: None,
            retried: false,
            failed: false,
        }
    }

    pub fn failure(reason: impl Into<String>, original: &str) -> Self {
        EditResult {
            failed: true,
            ..EditResult::not_applied(reason, original)
        }
    }
}
