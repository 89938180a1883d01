//! Block chunker — turns an unbounded stream of token deltas into bounded,
//! boundary-safe text segments for push delivery to human-facing channels.
//!
//! Segments never cut a fenced code block open: a split landing inside a
//! fence closes it with a synthetic ```` ``` ```` and re-opens the fence on
//! the buffered remainder. Concatenating all emitted segments with those
//! synthetic markers stripped reproduces the pushed text exactly.

use sb_domain::config::{BreakPreference, ChunkerConfig};

const FENCE: &str = "```";
/// Appended to a segment that would otherwise end mid-fence.
pub const FENCE_CLOSE: &str = "\n```";
/// Prepended to the remainder after a mid-fence split.
pub const FENCE_REOPEN: &str = "```\n";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BlockChunker {
    min_chars: usize,
    max_chars: usize,
    preference: BreakPreference,
    buffer: String,
    /// Fence state at the start of `buffer` (true = inside a fence).
    in_code_fence: bool,
}

impl BlockChunker {
    pub fn new(config: &ChunkerConfig) -> Self {
        let min_chars = config.min_chars;
        // An inverted configuration would deadlock the buffer.
        let max_chars = if min_chars > config.max_chars {
            min_chars + 1
        } else {
            config.max_chars
        };
        Self {
            min_chars,
            max_chars,
            preference: config.break_preference,
            buffer: String::new(),
            in_code_fence: false,
        }
    }

    /// Append a delta and return every segment it completes.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let mut segments = Vec::new();

        loop {
            if self.buffer.len() < self.min_chars {
                break;
            }

            let split = match self.find_split() {
                Some(pos) => pos,
                None if self.buffer.len() >= self.max_chars => self.forced_split(),
                None => break,
            };
            if split == 0 {
                break;
            }
            segments.push(self.emit(split));
        }

        segments
    }

    /// Emit whatever remains as one final segment, closing any open fence.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.trim().is_empty() {
            self.buffer.clear();
            return None;
        }
        let mut segment = std::mem::take(&mut self.buffer);
        if self.fence_state_at(segment.len(), &segment) {
            segment.push_str(FENCE_CLOSE);
        }
        self.in_code_fence = false;
        Some(segment)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    // ── Split selection ───────────────────────────────────────────

    /// Latest acceptable split position ≤ max_chars, per the preference
    /// chain paragraph → newline → sentence.
    fn find_split(&self) -> Option<usize> {
        let window = self.window_end();
        let chain: &[BreakPreference] = match self.preference {
            BreakPreference::Paragraph => &[
                BreakPreference::Paragraph,
                BreakPreference::Newline,
                BreakPreference::Sentence,
            ],
            BreakPreference::Newline => {
                &[BreakPreference::Newline, BreakPreference::Sentence]
            }
            BreakPreference::Sentence => &[BreakPreference::Sentence],
        };

        for kind in chain {
            let found = match kind {
                BreakPreference::Paragraph => self.buffer[..window]
                    .rfind("\n\n")
                    .map(|pos| pos + 2),
                BreakPreference::Newline => {
                    self.buffer[..window].rfind('\n').map(|pos| pos + 1)
                }
                BreakPreference::Sentence => last_sentence_end(&self.buffer[..window]),
            };
            // A split at 0 would emit an empty segment.
            if let Some(pos) = found {
                if pos > 0 {
                    return Some(pos);
                }
            }
        }
        None
    }

    /// Forced split at the nearest whitespace ≤ max_chars, or hard at the
    /// window edge when the text has no whitespace at all.
    fn forced_split(&self) -> usize {
        let window = self.window_end();
        let ws = self.buffer[..window]
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .next_back();
        match ws {
            Some(pos) if pos > 0 => pos,
            _ => window,
        }
    }

    /// Byte index of the window edge: max_chars snapped down to a char
    /// boundary (and never past the buffer end).
    fn window_end(&self) -> usize {
        let mut end = self.max_chars.min(self.buffer.len());
        while end > 0 && !self.buffer.is_char_boundary(end) {
            end -= 1;
        }
        end
    }

    // ── Emission ──────────────────────────────────────────────────

    fn emit(&mut self, split: usize) -> String {
        let remainder = self.buffer.split_off(split);
        let mut segment = std::mem::replace(&mut self.buffer, remainder);

        let open_at_split = self.fence_state_at(segment.len(), &segment);
        if open_at_split {
            // Close the fence for this segment and re-open it on the
            // remainder so both sides render standalone.
            segment.push_str(FENCE_CLOSE);
            self.buffer.insert_str(0, FENCE_REOPEN);
            self.in_code_fence = false;
        } else {
            self.in_code_fence = open_at_split;
        }
        segment
    }

    /// Fence state after consuming `upto` bytes of `text`, given the state
    /// at the start of the buffer.
    fn fence_state_at(&self, upto: usize, text: &str) -> bool {
        let toggles = text[..upto].matches(FENCE).count();
        self.in_code_fence ^ (toggles % 2 == 1)
    }
}

/// End position of the last sentence in `text`: a `.`/`!`/`?` (optionally
/// followed by a closing quote/bracket) followed by whitespace. Text with
/// no such terminator yields `None` and the caller falls through to the
/// forced whitespace split.
fn last_sentence_end(text: &str) -> Option<usize> {
    let re = sentence_regex();
    re.find_iter(text).last().map(|m| m.end())
}

fn sentence_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r#"[.!?]["')\]]?\s"#).expect("static regex")
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(min: usize, max: usize, pref: BreakPreference) -> BlockChunker {
        BlockChunker::new(&ChunkerConfig {
            min_chars: min,
            max_chars: max,
            break_preference: pref,
        })
    }

    /// Reassemble the original text from segments by stripping the
    /// synthetic close/re-open pair introduced at mid-fence splits.
    fn reassemble(segments: &[String]) -> String {
        let mut out = String::new();
        let mut strip_reopen_next = false;
        for seg in segments {
            let mut s = seg.as_str();
            if strip_reopen_next {
                s = s.strip_prefix(FENCE_REOPEN).unwrap_or(s);
                strip_reopen_next = false;
            }
            if let Some(body) = s.strip_suffix(FENCE_CLOSE) {
                // A synthetic close only exists when the fence was cut;
                // the next segment then starts with the re-open marker.
                if body.matches(FENCE).count() % 2 == 1 {
                    out.push_str(body);
                    strip_reopen_next = true;
                    continue;
                }
            }
            out.push_str(s);
        }
        out
    }

    #[test]
    fn below_min_emits_nothing_until_flush() {
        let mut c = chunker(200, 800, BreakPreference::Paragraph);
        assert!(c.push("short text").is_empty());
        assert_eq!(c.flush().unwrap(), "short text");
        assert!(c.flush().is_none());
    }

    #[test]
    fn paragraph_boundary_preferred() {
        let mut c = chunker(10, 200, BreakPreference::Paragraph);
        let text = "first paragraph here.\n\nsecond paragraph follows and runs on.";
        let segs = c.push(text);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0], "first paragraph here.\n\n");
        assert_eq!(c.flush().unwrap(), "second paragraph follows and runs on.");
    }

    #[test]
    fn falls_back_to_newline_then_sentence() {
        let mut c = chunker(10, 40, BreakPreference::Paragraph);
        // No double newline inside the window; single newline wins.
        let segs = c.push("line one here\nline two is much longer than the window");
        assert_eq!(segs[0], "line one here\n");

        let mut c = chunker(10, 40, BreakPreference::Sentence);
        let segs = c.push("A short sentence. And then trailing words beyond");
        assert_eq!(segs[0], "A short sentence. ");
    }

    #[test]
    fn totality_over_many_small_pushes() {
        let mut c = chunker(20, 60, BreakPreference::Paragraph);
        let input = "Sentence one is here. Sentence two follows it.\n\n\
                     Sentence three lands in a new paragraph and keeps going \
                     with more words. Sentence four wraps things up nicely.";
        let mut segments = Vec::new();
        // Push in 7-byte deltas like a token stream.
        let bytes = input.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let end = (i + 7).min(bytes.len());
            // Keep pushes on char boundaries (input is ASCII).
            segments.extend(c.push(std::str::from_utf8(&bytes[i..end]).unwrap()));
            i = end;
        }
        segments.extend(c.flush());
        assert_eq!(reassemble(&segments), input);
        // Every emitted segment (except possibly the flush) is bounded.
        for seg in &segments {
            assert!(seg.len() <= 60 + FENCE_CLOSE.len());
        }
    }

    #[test]
    fn forced_split_at_whitespace_when_no_boundary() {
        let mut c = chunker(10, 30, BreakPreference::Paragraph);
        let segs = c.push("word1 word2 word3 word4 word5 word6 word7");
        assert!(!segs.is_empty());
        // The split landed after a space, not mid-word.
        assert!(segs[0].ends_with(' '));
        assert!(segs[0].len() <= 30);
    }

    #[test]
    fn forced_split_hard_when_no_whitespace() {
        let mut c = chunker(10, 30, BreakPreference::Paragraph);
        let segs = c.push(&"x".repeat(95));
        assert_eq!(segs.len(), 3);
        assert!(segs.iter().all(|s| s.len() == 30));
        assert_eq!(c.flush().unwrap(), "x".repeat(5));
    }

    #[test]
    fn fence_never_left_open_in_a_segment() {
        let mut c = chunker(10, 40, BreakPreference::Newline);
        let input = "intro\n```\nlet x = 1;\nlet y = 2;\nlet z = 3;\nlet w = 4;\n```\ndone\n";
        let mut segments = c.push(input);
        segments.extend(c.flush());

        for seg in &segments {
            let toggles = seg.matches(FENCE).count();
            assert_eq!(
                toggles % 2,
                0,
                "segment leaves the stream mid-fence: {seg:?}"
            );
        }
        assert_eq!(reassemble(&segments), input);
    }

    #[test]
    fn fence_split_closes_and_reopens() {
        let mut c = chunker(10, 25, BreakPreference::Newline);
        let segs = c.push("```\ncode line one\ncode line two\n");
        assert!(!segs.is_empty());
        assert!(segs[0].ends_with(FENCE_CLOSE));
        // The remainder was re-opened; the eventual flush closes it again.
        let rest = c.flush().unwrap();
        assert!(rest.starts_with(FENCE_REOPEN));
        assert_eq!(rest.matches(FENCE).count() % 2, 0);
    }

    #[test]
    fn inverted_bounds_are_clamped() {
        let mut c = chunker(50, 10, BreakPreference::Paragraph);
        // max was raised to min + 1; a 60-char push must emit.
        let segs = c.push(&"a ".repeat(30));
        assert!(!segs.is_empty());
        assert!(segs[0].len() <= 51);
    }

    #[test]
    fn whitespace_only_flush_is_none() {
        let mut c = chunker(10, 40, BreakPreference::Paragraph);
        c.push("   ");
        assert!(c.flush().is_none());
    }

    #[test]
    fn sentence_detection_handles_quotes() {
        assert_eq!(last_sentence_end("He said \"go.\" Then left"), Some(14));
        assert_eq!(last_sentence_end("no terminator here"), None);
    }

    #[test]
    fn no_ascii_terminator_falls_through_to_forced_split() {
        let mut c = chunker(10, 30, BreakPreference::Sentence);
        // No `.`/`!`/`?` anywhere: the sentence scanner finds nothing and
        // the forced whitespace split takes over at max_chars.
        let segs = c.push("один два три четыре пять шесть семь");
        assert!(!segs.is_empty());
        assert!(segs[0].len() <= 30);
    }

    #[test]
    fn multiple_segments_from_one_large_push() {
        let mut c = chunker(10, 40, BreakPreference::Newline);
        let input = (0..10)
            .map(|i| format!("this is line number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let mut segs = c.push(&input);
        segs.extend(c.flush());
        assert!(segs.len() > 2);
        assert_eq!(reassemble(&segs), input);
    }
}
