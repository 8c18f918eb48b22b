//! Gateway endpoint configuration.
//!
//! Credentials are read once at startup. A missing endpoint is not an error
//! until someone tries to start a run; `require_endpoint` is the fail-fast
//! check behind the 503 on `run`.

use std::time::Duration;

use fairplay::PipelineError;
use serde::Deserialize;

/// An OpenAI-compatible chat-completion endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmEndpoint {
    pub url: String,
    pub api_key: String,
    pub model: String,
}

/// Configuration for the agent layer.
#[derive(Debug, Clone)]
pub struct AgentsConfig {
    /// Absent when credentials are not configured; runs fail fast with 503.
    pub endpoint: Option<LlmEndpoint>,
    /// Per-call timeout enforced by the gateway.
    pub request_timeout: Duration,
    /// Transport-level retries with exponential backoff.
    pub max_transport_retries: u32,
    /// Gateway concurrency bound (shared semaphore).
    pub concurrency: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout: Duration::from_secs(120),
            max_transport_retries: 3,
            concurrency: 4,
        }
    }
}

impl AgentsConfig {
    /// Build from environment. `MYSTERY_LLM_URL` and `MYSTERY_LLM_API_KEY`
    /// must both be present for the endpoint to exist.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: endpoint_from_env(),
            request_timeout: std::env::var("MYSTERY_LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_transport_retries: std::env::var("MYSTERY_LLM_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_transport_retries),
            concurrency: std::env::var("MYSTERY_LLM_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.concurrency),
        }
    }

    /// The credential gate run-start goes through.
    pub fn require_endpoint(&self) -> Result<&LlmEndpoint, PipelineError> {
        self.endpoint.as_ref().ok_or(PipelineError::CredentialMissing)
    }
}

fn endpoint_from_env() -> Option<LlmEndpoint> {
    let url = std::env::var("MYSTERY_LLM_URL").ok()?;
    let api_key = std::env::var("MYSTERY_LLM_API_KEY").ok()?;
    let model =
        std::env::var("MYSTERY_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    Some(LlmEndpoint {
        url,
        api_key,
        model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_endpoint_is_credential_error() {
        let config = AgentsConfig::default();
        let err = config.require_endpoint().unwrap_err();
        assert!(matches!(err, PipelineError::CredentialMissing));
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn test_endpoint_passes_gate() {
        let config = AgentsConfig {
            endpoint: Some(LlmEndpoint {
                url: "http://localhost:8080/v1".into(),
                api_key: "k".into(),
                model: "m".into(),
            }),
            ..AgentsConfig::default()
        };
        assert!(config.require_endpoint().is_ok());
    }
}
