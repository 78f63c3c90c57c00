use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A decoded frame ready for GPU upload.
pub struct DecodedFrame {
    pub data: Vec<u8>, // RGBA8
    pub width: u32,
    pub height: u32,
}

/// End-of-media behavior for a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopMode {
    /// Stop at the end.
    #[default]
    None,
    /// Seek to 0 and keep playing.
    Loop,
    /// Rewind by stepping backwards, then play forward again.
    Reverse,
    /// Same as reverse; entered on end of media.
    PingPong,
}

impl LoopMode {
    pub const ALL: &[LoopMode] = &[
        LoopMode::None,
        LoopMode::Loop,
        LoopMode::Reverse,
        LoopMode::PingPong,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopMode::None => "none",
            LoopMode::Loop => "loop",
            LoopMode::Reverse => "reverse",
            LoopMode::PingPong => "ping-pong",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == s)
    }

    /// Next mode in `ALL`, wrapping.
    pub fn next(&self) -> Self {
        let index = Self::ALL.iter().position(|m| m == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn steps_backwards(&self) -> bool {
        matches!(self, LoopMode::Reverse | LoopMode::PingPong)
    }
}

/// Failure loading or playing a media source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MediaError {
    #[error("failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("failed to decode media: {0}")]
    Decode(String),
    #[error("media is not playable: {0}")]
    NotPlayable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_mode_wire_values() {
        let json = serde_json::to_string(&LoopMode::PingPong).unwrap();
        assert_eq!(json, "\"ping-pong\"");
        for mode in LoopMode::ALL {
            let encoded = serde_json::to_string(mode).unwrap();
            assert_eq!(encoded, format!("\"{}\"", mode.as_str()));
            let decoded: LoopMode = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, *mode);
        }
    }

    #[test]
    fn loop_mode_parse() {
        assert_eq!(LoopMode::parse("reverse"), Some(LoopMode::Reverse));
        assert_eq!(LoopMode::parse("pingpong"), None);
        assert_eq!(LoopMode::default(), LoopMode::None);
    }

    #[test]
    fn loop_mode_next_wraps() {
        assert_eq!(LoopMode::None.next(), LoopMode::Loop);
        assert_eq!(LoopMode::PingPong.next(), LoopMode::None);
    }

    #[test]
    fn steps_backwards_only_for_reverse_modes() {
        assert!(LoopMode::Reverse.steps_backwards());
        assert!(LoopMode::PingPong.steps_backwards());
        assert!(!LoopMode::Loop.steps_backwards());
        assert!(!LoopMode::None.steps_backwards());
    }

    #[test]
    fn media_error_messages() {
        let e = MediaError::Load {
            path: PathBuf::from("clip.gif"),
            reason: "missing".into(),
        };
        assert_eq!(e.to_string(), "failed to load clip.gif: missing");
    }
}
