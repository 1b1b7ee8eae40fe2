// src/tools/markers.rs
//! Delimiters of the inline tool invocation mini-language.
//!
//! Format:
//! `<｜tool▁calls▁begin｜><｜tool▁call▁begin｜>function<｜tool▁sep｜>{name}\n```json\n{args}\n```<｜tool▁call▁end｜><｜tool▁calls▁end｜>`
//!
//! The outer `calls` pair wraps every call emitted in one turn; each call is
//! wrapped in its own `call` pair.

use serde::{Deserialize, Serialize};

pub const TOOL_CALLS_BEGIN: &str = "<｜tool▁calls▁begin｜>";
pub const TOOL_CALL_BEGIN: &str = "<｜tool▁call▁begin｜>";
pub const TOOL_SEP: &str = "<｜tool▁sep｜>";
pub const TOOL_CALL_END: &str = "<｜tool▁call▁end｜>";
pub const TOOL_CALLS_END: &str = "<｜tool▁calls▁end｜>";

/// The five marker strings bounding a tool invocation block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerSet {
    pub tool_calls_begin: String,
    pub tool_call_begin: String,
    pub tool_sep: String,
    pub tool_call_end: String,
    pub tool_calls_end: String,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self::deepseek()
    }
}

impl MarkerSet {
    /// DeepSeek V3 / R1 special tokens.
    pub fn deepseek() -> Self {
        Self {
            tool_calls_begin: TOOL_CALLS_BEGIN.to_string(),
            tool_call_begin: TOOL_CALL_BEGIN.to_string(),
            tool_sep: TOOL_SEP.to_string(),
            tool_call_end: TOOL_CALL_END.to_string(),
            tool_calls_end: TOOL_CALLS_END.to_string(),
        }
    }

    /// Length of the opening marker in chars. The sliding text window must be
    /// at least this long for a split opening marker to be found.
    pub fn open_marker_chars(&self) -> usize {
        self.tool_calls_begin.chars().count()
    }

    /// Length in bytes of the longest suffix of `text` that is a proper prefix
    /// of the opening marker, i.e. text that could still turn into the marker
    /// once more tokens arrive.
    pub fn partial_open_len(&self, text: &str) -> usize {
        let marker = self.tool_calls_begin.as_str();
        (1..marker.len())
            .rev()
            .filter(|&len| marker.is_char_boundary(len))
            .find(|&len| text.ends_with(&marker[..len]))
            .unwrap_or(0)
    }

    pub fn all(&self) -> [&str; 5] {
        [
            &self.tool_calls_begin,
            &self.tool_call_begin,
            &self.tool_sep,
            &self.tool_call_end,
            &self.tool_calls_end,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deepseek_markers_fit_default_window() {
        let markers = MarkerSet::deepseek();
        assert!(markers.open_marker_chars() <= 200);
        assert!(markers.all().iter().all(|m| !m.is_empty()));
    }

    #[test]
    fn partial_open_len_finds_longest_prefix() {
        let markers = MarkerSet::deepseek();
        assert_eq!(markers.partial_open_len("Hello"), 0);
        assert_eq!(markers.partial_open_len("Hello <"), "<".len());
        assert_eq!(markers.partial_open_len("a <｜tool▁"), "<｜tool▁".len());
        // A complete marker is not a partial one.
        assert_eq!(markers.partial_open_len(TOOL_CALLS_BEGIN), 0);
    }

    #[test]
    fn partial_open_len_stops_on_char_boundaries() {
        let markers = MarkerSet::deepseek();
        // Every proper prefix cut on a char boundary is held back whole.
        for (len, _) in TOOL_CALLS_BEGIN.char_indices().skip(1) {
            let text = format!("say {}", &TOOL_CALLS_BEGIN[..len]);
            assert_eq!(markers.partial_open_len(&text), len);
        }
        assert_eq!(markers.partial_open_len("｜"), 0);
        assert_eq!(markers.partial_open_len(""), 0);
    }

    #[test]
    fn partial_open_len_ignores_other_markers() {
        let markers = MarkerSet::deepseek();
        assert_eq!(markers.partial_open_len("<｜tool▁call▁"), 0);
    }
}
