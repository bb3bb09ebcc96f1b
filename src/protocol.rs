use serde::{Deserialize, Serialize};

/// Text control frames exchanged with the agent.
///
/// `transcript`, `response` and `speak` only come down; `unmute` only goes up.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Recognized user speech, display only
    Transcript { text: String },
    /// Agent reply text, display only
    Response { text: String },
    /// Directive: synthesize and render locally
    Speak { text: String },
    /// Capture has resumed after local playback
    Unmute,
}

impl ControlMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> String {
        // Every variant is a plain struct of strings, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
