//! Runtime configuration.
//!
//! Every section has defaults, so an empty JSON object is a valid config
//! file. Command-line flags override file values.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tool invocation.
    pub invoker: InvokerConfig,
    /// Conversation loop.
    pub conversation: ConversationConfig,
    /// Example prompt refresh heuristics.
    pub prompts: ChangeThresholds,
}

impl Config {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Tool invocation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokerConfig {
    /// Milliseconds to wait for a tool response.
    pub call_timeout_ms: u64,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5000,
        }
    }
}

impl InvokerConfig {
    /// Timeout as a duration.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Conversation loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Most recent messages forwarded to the model.
    pub history_limit: usize,
    /// Instruction appended to the follow-up request after tool execution.
    pub summary_instruction: String,
    /// Reply used when the follow-up is not a usable assistant message.
    pub fallback_reply: String,
    /// Client name announced to the server on first use.
    pub client_name: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            summary_instruction: "Summarize the results of the tool calls above for the user \
                                  in plain language."
                .into(),
            fallback_reply: "Tools executed successfully.".into(),
            client_name: "dom-agent-client".into(),
        }
    }
}

/// Thresholds deciding when the tool/resource catalog changed enough to
/// regenerate example prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeThresholds {
    /// Tool count delta that counts as major.
    pub tool_count_delta: usize,
    /// Resource count delta that counts as major.
    pub resource_count_delta: usize,
    /// Fraction of differing tool names that counts as major.
    pub tool_name_change: f64,
    /// Fraction of differing resource names that counts as major.
    pub resource_name_change: f64,
}

impl Default for ChangeThresholds {
    fn default() -> Self {
        Self {
            tool_count_delta: 2,
            resource_count_delta: 3,
            tool_name_change: 0.3,
            resource_name_change: 0.4,
        }
    }
}
