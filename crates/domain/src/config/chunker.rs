use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Block chunker configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ranked preference for where a streamed-text segment may be split.
/// Fallback order is always paragraph → newline → sentence → forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BreakPreference {
    #[default]
    Paragraph,
    Newline,
    Sentence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Below this many buffered chars, nothing is emitted.
    #[serde(default = "d_min_chars")]
    pub min_chars: usize,

    /// At or above this many buffered chars, a split is forced.
    #[serde(default = "d_max_chars")]
    pub max_chars: usize,

    #[serde(default)]
    pub break_preference: BreakPreference,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chars: d_min_chars(),
            max_chars: d_max_chars(),
            break_preference: BreakPreference::default(),
        }
    }
}

fn d_min_chars() -> usize {
    200
}

fn d_max_chars() -> usize {
    800
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ChunkerConfig::default();
        assert_eq!(cfg.min_chars, 200);
        assert_eq!(cfg.max_chars, 800);
        assert_eq!(cfg.break_preference, BreakPreference::Paragraph);
    }

    #[test]
    fn break_preference_snake_case() {
        let p: BreakPreference = serde_json::from_str("\"sentence\"").unwrap();
        assert_eq!(p, BreakPreference::Sentence);
    }
}
