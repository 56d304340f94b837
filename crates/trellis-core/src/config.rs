// Execution configuration

use serde::{Deserialize, Serialize};

/// Default cap on LLM↔tool loop iterations per run
pub const DEFAULT_MAX_STEPS: u32 = 20;

/// Configuration for the step loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum loop iterations; exceeding this completes the run with the
    /// last assistant content (not a failure)
    pub max_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl ExecutionConfig {
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExecutionConfig::default();
        assert_eq!(config.max_steps, DEFAULT_MAX_STEPS);
        assert!(config.temperature.is_none());
    }

    #[test]
    fn test_builder_style() {
        let config = ExecutionConfig::default()
            .with_max_steps(3)
            .with_temperature(0.2)
            .with_max_tokens(512);
        assert_eq!(config.max_steps, 3);
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.max_tokens, Some(512));
    }
}
