//! Separation of `<think>` reasoning segments from displayed content

use regex::Regex;
use std::sync::OnceLock;

const OPEN_TAG: &str = "<think>";

/// Content split into the visible answer and the collapsible reasoning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThoughtSplit {
    pub main: String,
    pub thought: String,
}

impl ThoughtSplit {
    pub fn has_thought(&self) -> bool {
        !self.thought.is_empty()
    }
}

fn closed_segment() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid think pattern"))
}

/// Split reasoning out of a snapshot of message content.
///
/// Every closed `<think>…</think>` block is moved into `thought`. An opening
/// tag with no close yet (a response still streaming its reasoning) moves
/// the remainder into `thought` as well, so `main` never contains `<think>`.
pub fn extract_thought(content: &str) -> ThoughtSplit {
    let mut thoughts: Vec<&str> = Vec::new();
    for captures in closed_segment().captures_iter(content) {
        if let Some(inner) = captures.get(1) {
            let inner = inner.as_str().trim();
            if !inner.is_empty() {
                thoughts.push(inner);
            }
        }
    }

    let stripped = closed_segment().replace_all(content, "");
    let main = match stripped.find(OPEN_TAG) {
        Some(open) => {
            let unfinished = stripped[open + OPEN_TAG.len()..].trim();
            if !unfinished.is_empty() {
                thoughts.push(unfinished);
            }
            stripped[..open].trim().to_string()
        }
        None => stripped.trim().to_string(),
    };

    ThoughtSplit {
        main,
        thought: thoughts.join("\n\n"),
    }
}
