//! Status-driven auto-Enter: the "press enter to confirm" detector is a
//! pattern match on pane-bottom text, kept as a configurable predicate
//! so new agent variants can register their own prompt signatures
//! without touching the instance state machine.

use regex::Regex;

/// How many trailing lines of a capture are inspected for a confirm
/// prompt. 4 covers agents that print a blank line before the prompt
/// itself, while still bounding the match window to "2-4 lines".
const TAIL_LINES: usize = 4;

#[derive(Clone)]
pub struct PromptClassifier {
    patterns: Vec<Regex>,
}

impl Default for PromptClassifier {
    fn default() -> Self {
        Self::from_patterns(&crate::config::Config::default().confirm_patterns)
    }
}

impl PromptClassifier {
    /// Compile a classifier from user-supplied pattern strings. A pattern
    /// that fails to compile is dropped with a warning rather than
    /// aborting startup — one malformed config entry shouldn't disable
    /// auto-confirm entirely.
    pub fn from_patterns(patterns: &[String]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "prompt: ignoring invalid confirm pattern");
                    None
                }
            })
            .collect();
        Self { patterns: compiled }
    }

    /// True if the tail of `content` matches any registered confirm-prompt
    /// pattern.
    pub fn matches(&self, content: &str) -> bool {
        let tail = last_n_lines(content, TAIL_LINES);
        self.patterns.iter().any(|re| re.is_match(&tail))
    }
}

fn last_n_lines(content: &str, n: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_default_yes_no_shape() {
        let classifier = PromptClassifier::default();
        assert!(classifier.matches("Running command...\nDo you want to proceed? (y/n)"));
    }

    #[test]
    fn does_not_match_ordinary_output() {
        let classifier = PromptClassifier::default();
        assert!(!classifier.matches("compiling...\nfinished in 1.2s"));
    }

    #[test]
    fn only_inspects_the_tail() {
        let classifier = PromptClassifier::default();
        let mut content = "(y/n)\n".to_string();
        for _ in 0..20 {
            content.push_str("ordinary output line\n");
        }
        assert!(!classifier.matches(&content));
    }

    #[test]
    fn invalid_pattern_is_dropped_not_fatal() {
        let classifier = PromptClassifier::from_patterns(&["(unterminated".to_string()]);
        assert!(!classifier.matches("anything"));
    }
}
