use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// OpenAI-compatible chat completions endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout() -> u64 {
    10
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}
