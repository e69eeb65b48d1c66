use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Classification of the user interaction a tracking requirement describes.
///
/// The vocabulary is fixed; anything a specification row cannot be mapped to
/// falls back to `General`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Click,
    Submit,
    View,
    Back,
    Exit,
    Select,
    Nav,
    #[default]
    General,
}

impl ActionKind {
    /// Canonical tracking-helper function for this action, used when the
    /// advisor step cannot produce a better suggestion.
    pub fn default_event(&self) -> &'static str {
        match self {
            ActionKind::View => "trackPageLoad",
            ActionKind::Submit => "trackSubmit",
            ActionKind::Click | ActionKind::Select | ActionKind::Back | ActionKind::Exit
            | ActionKind::Nav => "trackClick",
            ActionKind::General => "trackAction",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Submit => "submit",
            ActionKind::View => "view",
            ActionKind::Back => "back",
            ActionKind::Exit => "exit",
            ActionKind::Select => "select",
            ActionKind::Nav => "nav",
            ActionKind::General => "general",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One required tracking event, normalized from a tech-spec row.
///
/// Items are created once per input row and never mutated afterwards;
/// `item_index` is the stable handle used to correlate an item with its
/// match results and report outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecificationItem {
    #[serde(default)]
    pub item_index: usize,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub row_index: Option<u32>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub action: ActionKind,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub vendor_var: Option<String>,
    #[serde(default)]
    pub vendor_value: Option<String>,
    #[serde(default)]
    pub target_terms: Vec<String>,
}

impl SpecificationItem {
    /// Terms to search the source tree for.
    ///
    /// When the spec row carried no explicit target terms, literal phrases
    /// are recovered from the description: quoted phrases first, else the
    /// trimmed description itself. An item with neither terms nor a
    /// description yields an empty list and relies on the indexer's
    /// interactive-element fallback.
    pub fn effective_terms(&self) -> Vec<String> {
        if !self.target_terms.is_empty() {
            return self
                .target_terms
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }

        let quoted = quoted_phrases(&self.description);
        if !quoted.is_empty() {
            return quoted;
        }

        let desc = self.description.trim();
        if desc.is_empty() {
            Vec::new()
        } else {
            vec![desc.to_string()]
        }
    }

    /// Single query string embedded when semantic scoring is enabled.
    pub fn query_text(&self) -> String {
        format!(
            "page:{} action:{} desc:{} terms:{}",
            self.page.as_deref().unwrap_or(""),
            self.action,
            self.description,
            self.effective_terms().join(", "),
        )
    }
}

/// Extracts phrases wrapped in single or double quotes from free text.
fn quoted_phrases(text: &str) -> Vec<String> {
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    let re = QUOTED.get_or_init(|| Regex::new(r#""([^"]{2,80})"|'([^']{2,80})'"#).unwrap());

    re.captures_iter(text)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
