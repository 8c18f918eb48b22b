//! LLM gateway: the single call contract every agent goes through.
//!
//! `(prompt, json_mode, timeout, max_tokens) → (text, tokens, cost, latency)`.
//! Transport and rate-limit failures retry with exponential backoff up to a
//! fixed budget; every call — success or failure — appends one operational
//! log record (metadata only, never prompt or response bodies). Estimated
//! cost always comes from the gateway's own rate table, never from model
//! output. Concurrency is bounded by a shared semaphore.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use fairplay::{ArtifactStore, LlmLogRecord, PipelineError};

use crate::config::LlmEndpoint;
use crate::prompts::RenderedPrompt;

/// Backoff base for transport retries: 500ms, 1s, 2s, ...
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// A single completion request, vendor-agnostic.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub json_mode: bool,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// What a backend returns on success.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Backend failures, classified for retry policy.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited")]
    RateLimited,

    #[error("request timed out")]
    Timeout,

    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
}

impl BackendError {
    fn retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited | Self::Timeout => true,
            Self::Api { status, .. } => *status >= 500,
        }
    }
}

/// Seam for the external vendor client. The shipped implementation speaks
/// the OpenAI-compatible chat-completions contract; tests script their own.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, BackendError>;
}

// ── OpenAI-compatible backend ───────────────────────────────────────

pub struct OpenAiBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiBackend {
    pub fn new(endpoint: &LlmEndpoint) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Llm(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, BackendError> {
        let mut body = json!({
            "model": request.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "max_tokens": request.max_tokens,
        });
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(BackendError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: message.chars().take(300).collect(),
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::Transport(format!("bad response body: {e}")))?;
        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let input_tokens = payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let output_tokens = payload["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32;
        Ok(ChatCompletion {
            text,
            input_tokens,
            output_tokens,
        })
    }
}

// ── Rate table ──────────────────────────────────────────────────────

/// USD per million tokens, matched by model-name prefix.
#[derive(Debug, Clone)]
struct RateRow {
    prefix: &'static str,
    input_per_mtok: f64,
    output_per_mtok: f64,
}

#[derive(Debug, Clone)]
pub struct RateTable {
    rows: Vec<RateRow>,
    fallback: RateRow,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            rows: vec![
                RateRow {
                    prefix: "gpt-4o-mini",
                    input_per_mtok: 0.15,
                    output_per_mtok: 0.60,
                },
                RateRow {
                    prefix: "gpt-4o",
                    input_per_mtok: 2.50,
                    output_per_mtok: 10.00,
                },
                RateRow {
                    prefix: "gpt-4.1",
                    input_per_mtok: 2.00,
                    output_per_mtok: 8.00,
                },
                RateRow {
                    prefix: "claude-3-5-haiku",
                    input_per_mtok: 0.80,
                    output_per_mtok: 4.00,
                },
                RateRow {
                    prefix: "claude-sonnet",
                    input_per_mtok: 3.00,
                    output_per_mtok: 15.00,
                },
            ],
            fallback: RateRow {
                prefix: "",
                input_per_mtok: 1.00,
                output_per_mtok: 4.00,
            },
        }
    }
}

impl RateTable {
    /// Estimated USD cost for one call. Longest matching prefix wins.
    pub fn estimate(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        let row = self
            .rows
            .iter()
            .filter(|r| model.starts_with(r.prefix))
            .max_by_key(|r| r.prefix.len())
            .unwrap_or(&self.fallback);
        (f64::from(input_tokens) * row.input_per_mtok
            + f64::from(output_tokens) * row.output_per_mtok)
            / 1_000_000.0
    }
}

// ── Gateway ─────────────────────────────────────────────────────────

/// Attribution for the operational log.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub project_id: String,
    pub run_id: Option<String>,
    pub agent: String,
    pub operation: String,
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
    pub latency_ms: u64,
}

pub struct LlmGateway {
    backend: Arc<dyn ChatBackend>,
    model: String,
    rates: RateTable,
    store: Arc<dyn ArtifactStore>,
    permits: Arc<Semaphore>,
    max_retries: u32,
}

impl LlmGateway {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        model: impl Into<String>,
        store: Arc<dyn ArtifactStore>,
        concurrency: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            rates: RateTable::default(),
            store,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            max_retries,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Execute one prompt through the backend with transport retries.
    pub async fn call(
        &self,
        ctx: &CallContext,
        prompt: &RenderedPrompt,
        json_mode: bool,
        timeout: Duration,
        max_tokens: u32,
    ) -> Result<GatewayResponse, PipelineError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PipelineError::Llm("gateway semaphore closed".into()))?;

        let request = ChatRequest {
            model: self.model.clone(),
            system: prompt.system.clone(),
            user: prompt.user.clone(),
            json_mode,
            max_tokens,
            timeout,
        };

        let started = Instant::now();
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match self.backend.complete(&request).await {
                Ok(completion) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    let estimated_cost = self.rates.estimate(
                        &self.model,
                        completion.input_tokens,
                        completion.output_tokens,
                    );
                    self.log_call(ctx, &completion, estimated_cost, latency_ms, None);
                    debug!(
                        agent = %ctx.agent,
                        operation = %ctx.operation,
                        latency_ms,
                        cost = estimated_cost,
                        "gateway call completed"
                    );
                    return Ok(GatewayResponse {
                        total_tokens: completion.input_tokens + completion.output_tokens,
                        input_tokens: completion.input_tokens,
                        output_tokens: completion.output_tokens,
                        text: completion.text,
                        estimated_cost,
                        latency_ms,
                    });
                }
                Err(e) => {
                    let retryable = e.retryable() && attempt < self.max_retries;
                    warn!(
                        agent = %ctx.agent,
                        attempt,
                        error = %e,
                        retryable,
                        "gateway call failed"
                    );
                    if retryable {
                        tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt)).await;
                        last_error = Some(e);
                        continue;
                    }
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.log_failure(ctx, latency_ms, &e);
                    return Err(PipelineError::Llm(e.to_string()));
                }
            }
        }
        // Unreachable in practice; the loop always returns.
        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "exhausted retries".into());
        Err(PipelineError::Llm(message))
    }

    fn log_call(
        &self,
        ctx: &CallContext,
        completion: &ChatCompletion,
        estimated_cost: f64,
        latency_ms: u64,
        error: Option<String>,
    ) {
        let record = LlmLogRecord {
            timestamp: chrono::Utc::now(),
            project_id: ctx.project_id.clone(),
            run_id: ctx.run_id.clone(),
            agent: ctx.agent.clone(),
            operation: ctx.operation.clone(),
            model: self.model.clone(),
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            total_tokens: completion.input_tokens + completion.output_tokens,
            estimated_cost,
            latency_ms,
            error,
        };
        if let Err(e) = self.store.append_llm_log(record) {
            warn!(error = %e, "failed to append llm operational log");
        }
    }

    fn log_failure(&self, ctx: &CallContext, latency_ms: u64, error: &BackendError) {
        let empty = ChatCompletion {
            text: String::new(),
            input_tokens: 0,
            output_tokens: 0,
        };
        self.log_call(ctx, &empty, 0.0, latency_ms, Some(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairplay::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedBackend {
        failures_before_success: AtomicU32,
        error_kind: fn() -> BackendError,
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, _req: &ChatRequest) -> Result<ChatCompletion, BackendError> {
            if self.failures_before_success.load(Ordering::SeqCst) > 0 {
                self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
                return Err((self.error_kind)());
            }
            Ok(ChatCompletion {
                text: "{\"ok\": true}".into(),
                input_tokens: 1000,
                output_tokens: 500,
            })
        }
    }

    fn prompt() -> RenderedPrompt {
        RenderedPrompt {
            template_id: "test.v1".into(),
            system: "system".into(),
            user: "user".into(),
        }
    }

    fn ctx() -> CallContext {
        CallContext {
            project_id: "p1".into(),
            run_id: Some("r1".into()),
            agent: "setting".into(),
            operation: "generate".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_retried() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(ScriptedBackend {
            failures_before_success: AtomicU32::new(2),
            error_kind: || BackendError::Transport("connection reset".into()),
        });
        let gateway = LlmGateway::new(backend, "gpt-4o-mini", store.clone(), 4, 3);

        let response = gateway
            .call(&ctx(), &prompt(), true, Duration::from_secs(120), 1024)
            .await
            .unwrap();
        assert_eq!(response.total_tokens, 1500);
        // Only the successful call is logged with token counts.
        let logs = store.llm_logs("p1").unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].error.is_none());
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(ScriptedBackend {
            failures_before_success: AtomicU32::new(10),
            error_kind: || BackendError::Api {
                status: 400,
                message: "bad request".into(),
            },
        });
        let gateway = LlmGateway::new(backend, "gpt-4o-mini", store.clone(), 4, 3);

        let err = gateway
            .call(&ctx(), &prompt(), true, Duration::from_secs(120), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Llm(_)));
        let logs = store.llm_logs("p1").unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_exhausts_budget() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(ScriptedBackend {
            failures_before_success: AtomicU32::new(100),
            error_kind: || BackendError::RateLimited,
        });
        let gateway = LlmGateway::new(backend, "gpt-4o-mini", store, 4, 2);

        let err = gateway
            .call(&ctx(), &prompt(), true, Duration::from_secs(120), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Llm(_)));
    }

    #[test]
    fn test_rate_table_prefix_match() {
        let rates = RateTable::default();
        // gpt-4o-mini must not match the shorter gpt-4o row.
        let mini = rates.estimate("gpt-4o-mini", 1_000_000, 0);
        assert!((mini - 0.15).abs() < 1e-9);
        let full = rates.estimate("gpt-4o-2024-08-06", 1_000_000, 0);
        assert!((full - 2.50).abs() < 1e-9);
    }

    #[test]
    fn test_rate_table_fallback() {
        let rates = RateTable::default();
        let cost = rates.estimate("some-local-model", 500_000, 250_000);
        assert!((cost - (0.5 + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_cost_combines_input_and_output() {
        let rates = RateTable::default();
        let cost = rates.estimate("gpt-4o-mini", 1000, 500);
        let expected = (1000.0 * 0.15 + 500.0 * 0.60) / 1_000_000.0;
        assert!((cost - expected).abs() < 1e-12);
    }
}
