//! Validation-retry wrapper: the generic loop every artifact-producing agent
//! runs inside.
//!
//! Call the gateway, parse, normalize, validate; on schema errors re-call
//! with the violation list folded into the prompt, up to `max_attempts`.
//! Warnings never trigger a retry, only errors do. The wrapper is
//! non-blocking: after the budget it returns the last candidate payload with
//! its validation report and lets the orchestrator decide.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fairplay::model::ArtifactType;
use fairplay::parse::parse_payload;
use fairplay::schema::normalize_and_validate;
use fairplay::{PipelineError, ValidationReport};

use crate::gateway::{CallContext, LlmGateway};
use crate::prompts;

/// Options for one wrapped agent invocation.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_attempts: u32,
    /// Optional USD ceiling across all attempts of this invocation.
    pub cost_ceiling: Option<f64>,
    pub json_mode: bool,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            cost_ceiling: None,
            json_mode: true,
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }
}

impl RetryOptions {
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_ceiling(mut self, ceiling: f64) -> Self {
        self.cost_ceiling = Some(ceiling);
        self
    }
}

/// One attempt in the retry history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    /// Why this attempt happened: `initial`, or the violation summary that
    /// triggered it.
    pub reason: String,
    pub cost: f64,
    pub backoff_ms: u64,
}

/// Result of a wrapped invocation. `validation` may still carry errors when
/// the budget ran out; downstream policy decides whether to continue.
#[derive(Debug, Clone)]
pub struct ValidatedCall {
    pub payload: serde_json::Value,
    pub validation: ValidationReport,
    pub attempts: Vec<RetryAttempt>,
    pub cost: f64,
}

impl ValidatedCall {
    pub fn is_valid(&self) -> bool {
        self.validation.is_valid()
    }
}

/// Run the validation-retry loop for one agent call.
///
/// `vars` is augmented with a `previous_violations` section between
/// attempts; callers keep ownership so loop-level feedback (blind reader,
/// guardrails) composes with schema feedback.
pub async fn call_validated(
    gateway: &LlmGateway,
    ctx: &CallContext,
    artifact_type: ArtifactType,
    template_id: &str,
    vars: &mut BTreeMap<String, String>,
    options: &RetryOptions,
) -> Result<ValidatedCall, PipelineError> {
    let mut attempts: Vec<RetryAttempt> = Vec::new();
    let mut total_cost = 0.0;
    let mut reason = "initial".to_string();
    let mut last: Option<(serde_json::Value, ValidationReport)> = None;

    for attempt in 1..=options.max_attempts {
        let prompt = prompts::render(template_id, vars)?;
        let response = gateway
            .call(ctx, &prompt, options.json_mode, options.timeout, options.max_tokens)
            .await?;
        total_cost += response.estimated_cost;
        attempts.push(RetryAttempt {
            attempt,
            timestamp: Utc::now(),
            reason: std::mem::take(&mut reason),
            cost: response.estimated_cost,
            backoff_ms: 0,
        });

        let parsed = match parse_payload(&response.text) {
            Ok(value) => value,
            Err(parse_err) => {
                warn!(
                    agent = %ctx.agent,
                    attempt,
                    error = %parse_err,
                    "agent output unparseable"
                );
                if attempt < options.max_attempts && below_ceiling(total_cost, options) {
                    reason = format!("unparseable output: {parse_err}");
                    vars.insert(
                        "previous_violations".into(),
                        format!(
                            "Previous attempt could not be parsed ({parse_err}). \
                             Respond with exactly one JSON object."
                        ),
                    );
                    continue;
                }
                return Err(PipelineError::Parse(parse_err.to_string()));
            }
        };

        let mut payload = parsed;
        let validation = normalize_and_validate(artifact_type, &mut payload);
        if validation.is_valid() {
            info!(
                agent = %ctx.agent,
                attempt,
                warnings = validation.warnings.len(),
                "agent output accepted"
            );
            return Ok(ValidatedCall {
                payload,
                validation,
                attempts,
                cost: total_cost,
            });
        }

        let lines = validation.error_lines();
        warn!(
            agent = %ctx.agent,
            attempt,
            errors = lines.len(),
            "agent output failed schema validation"
        );
        if attempt < options.max_attempts && below_ceiling(total_cost, options) {
            reason = format!("{} schema violations", lines.len());
            vars.insert(
                "previous_violations".into(),
                format!(
                    "Previous attempt had these violations; fix every one:\n- {}",
                    lines.join("\n- ")
                ),
            );
            last = Some((payload, validation));
            continue;
        }
        last = Some((payload, validation));
        break;
    }

    // Budget exhausted: return the final candidate, violations and all.
    let (payload, validation) = last.unwrap_or((serde_json::Value::Null, ValidationReport::default()));
    Ok(ValidatedCall {
        payload,
        validation,
        attempts,
        cost: total_cost,
    })
}

fn below_ceiling(total_cost: f64, options: &RetryOptions) -> bool {
    options.cost_ceiling.map(|c| total_cost < c).unwrap_or(true)
}
