// src/utils/config.rs
use crate::tools::markers::MarkerSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chars of recent text kept to spot an opening marker split across tokens.
pub const DEFAULT_WINDOW_CHARS: usize = 200;

/// Ceiling on a single captured invocation block.
pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 1_048_576; // 1 MB

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("text window of {window} chars cannot hold the {marker} char opening marker")]
    WindowTooSmall { window: usize, marker: usize },
    #[error("marker set has an empty marker")]
    EmptyMarker,
    #[error("capture ceiling must be non-zero")]
    ZeroCaptureLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserConfig {
    pub markers: MarkerSet,
    pub window_chars: usize,
    pub max_capture_bytes: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            markers: MarkerSet::default(),
            window_chars: DEFAULT_WINDOW_CHARS,
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }
}

impl ParserConfig {
    pub fn new(
        markers: MarkerSet,
        window_chars: usize,
        max_capture_bytes: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            markers,
            window_chars,
            max_capture_bytes,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_capture_bytes(mut self, max_capture_bytes: usize) -> Result<Self, ConfigError> {
        self.max_capture_bytes = max_capture_bytes;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.markers.all().iter().any(|m| m.is_empty()) {
            return Err(ConfigError::EmptyMarker);
        }
        let marker = self.markers.open_marker_chars();
        if self.window_chars < marker {
            return Err(ConfigError::WindowTooSmall {
                window: self.window_chars,
                marker,
            });
        }
        if self.max_capture_bytes == 0 {
            return Err(ConfigError::ZeroCaptureLimit);
        }
        Ok(())
    }
}

/// Per-request behavior of the streaming path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Keep consuming the backend after the first tool call block instead of
    /// finishing the stream right after it. Later calls get increasing
    /// indices and the `tool_calls` finish frame is sent once at the end.
    pub continue_after_tool_call: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(ParserConfig::default().validate(), Ok(()));
    }

    #[test]
    fn window_must_hold_opening_marker() {
        let err = ParserConfig::new(MarkerSet::default(), 5, DEFAULT_MAX_CAPTURE_BYTES);
        assert!(matches!(err, Err(ConfigError::WindowTooSmall { window: 5, .. })));
    }

    #[test]
    fn empty_marker_rejected() {
        let mut markers = MarkerSet::default();
        markers.tool_sep.clear();
        assert_eq!(
            ParserConfig::new(markers, DEFAULT_WINDOW_CHARS, DEFAULT_MAX_CAPTURE_BYTES),
            Err(ConfigError::EmptyMarker)
        );
    }

    #[test]
    fn zero_capture_limit_rejected() {
        assert_eq!(
            ParserConfig::default().with_max_capture_bytes(0),
            Err(ConfigError::ZeroCaptureLimit)
        );
    }
}
