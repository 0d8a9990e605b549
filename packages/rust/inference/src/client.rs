//! OpenAI-compatible reasoning-service client.
//!
//! One `chat/completions` request per actor per attempt, low temperature,
//! JSON response format. Transient failures (timeouts, rate limits, 5xx,
//! malformed or invalid responses) are retried with exponential backoff up
//! to the configured budget; rejected credentials fail fast instead.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use actorlens_shared::{ActorLensError, Confidence, InferenceConfig, Result};
use actorlens_taxonomy::TaxonomyIndex;

use crate::{ActorContext, InferenceOutcome, TechniqueInferrer};

/// Base delay for attempt-level retry backoff.
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Output token cap per inference request.
const MAX_OUTPUT_TOKENS: u32 = 1024;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

/// The structured payload the service is instructed to return.
#[derive(Debug, Deserialize)]
struct InferenceReply {
    #[serde(default)]
    techniques: Vec<String>,
    #[serde(default)]
    confidence: String,
    #[serde(default)]
    rationale: String,
}

/// Attempt-level failure classification.
enum AttemptError {
    /// Worth retrying: timeout, rate limit, server error, bad payload.
    Transient(String),
    /// Not worth retrying: e.g. rejected credentials.
    Fatal(ActorLensError),
}

// ---------------------------------------------------------------------------
// ReasoningClient
// ---------------------------------------------------------------------------

/// Production [`TechniqueInferrer`] backed by an OpenAI-compatible API.
pub struct ReasoningClient {
    client: Client,
    config: InferenceConfig,
    index: Arc<TaxonomyIndex>,
    provider: String,
}

impl ReasoningClient {
    /// Create a new client. The taxonomy index is shared with the mapping
    /// stage and used to validate every returned technique identifier.
    pub fn new(config: InferenceConfig, index: Arc<TaxonomyIndex>) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ActorLensError::Inference(format!("failed to build HTTP client: {e}")))?;

        let provider = provider_label(&config.base_url);

        Ok(Self {
            client,
            config,
            index,
            provider,
        })
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a threat intelligence analyst. Given a threat actor profile, \
             identify the adversary technique identifiers (format Tnnnn or Tnnnn.nnn) \
             the actor is most strongly associated with. Respond with a single JSON \
             object: {{\"techniques\": [\"T1566.001\", ...], \"confidence\": \
             \"low\"|\"medium\"|\"high\", \"rationale\": \"one or two sentences\"}}. \
             List between {} and {} techniques and nothing else.",
            self.config.min_techniques, self.config.max_techniques
        )
    }

    /// One request-parse-validate cycle.
    async fn attempt(&self, ctx: &ActorContext) -> std::result::Result<InferenceOutcome, AttemptError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: ctx.render(self.config.context_chars),
                },
            ],
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: self.config.temperature,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            stream: false,
        };

        let mut http_request = self.client.post(self.chat_completions_url());
        if let Some(key) = &self.config.api_key {
            http_request = http_request.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = http_request
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AttemptError::Fatal(ActorLensError::Inference(format!(
                "reasoning service rejected credentials: HTTP {status}"
            ))));
        }
        if !status.is_success() {
            return Err(AttemptError::Transient(format!("HTTP {status}")));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Transient(format!("invalid response body: {e}")))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AttemptError::Transient("response has no content".into()))?;

        let reply: InferenceReply = serde_json::from_str(strip_code_fences(&content))
            .map_err(|e| AttemptError::Transient(format!("unparseable reply: {e}")))?;

        let (techniques, confidence, rationale) = validate_reply(
            reply,
            &self.index,
            self.config.min_techniques,
            self.config.max_techniques,
        )
        .map_err(AttemptError::Transient)?;

        Ok(InferenceOutcome::Resolved {
            techniques,
            confidence,
            rationale,
        })
    }
}

#[async_trait]
impl TechniqueInferrer for ReasoningClient {
    async fn infer(&self, ctx: &ActorContext) -> Result<InferenceOutcome> {
        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            match self.attempt(ctx).await {
                Ok(outcome) => {
                    debug!(actor = %ctx.name, attempt, "inference resolved");
                    return Ok(outcome);
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Transient(reason)) => {
                    warn!(actor = %ctx.name, attempt, %reason, "inference attempt failed");
                    if attempt < attempts {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                }
            }
        }

        warn!(actor = %ctx.name, "inference retries exhausted, marking no techniques");
        Ok(InferenceOutcome::NoTechniquesFound)
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Validate a parsed reply against the taxonomy index and cardinality bounds.
///
/// Unknown identifiers are dropped silently. A result below the minimum, an
/// unrecognized confidence, or a blank rationale fails the attempt. A result
/// above the maximum is truncated deterministically.
fn validate_reply(
    reply: InferenceReply,
    index: &TaxonomyIndex,
    min: usize,
    max: usize,
) -> std::result::Result<(BTreeSet<String>, Confidence, String), String> {
    let mut techniques: BTreeSet<String> = BTreeSet::new();
    let mut dropped = 0usize;
    for id in &reply.techniques {
        let id = id.trim().to_ascii_uppercase();
        if index.contains_technique(&id) {
            techniques.insert(id);
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        debug!(dropped, "dropped technique identifiers not in the taxonomy");
    }

    if techniques.len() < min {
        return Err(format!(
            "only {} valid techniques after validation (minimum {min})",
            techniques.len()
        ));
    }
    if techniques.len() > max {
        warn!(count = techniques.len(), max, "truncating oversized technique set");
        techniques = techniques.into_iter().take(max).collect();
    }

    let confidence = Confidence::parse(&reply.confidence)
        .ok_or_else(|| format!("unrecognized confidence {:?}", reply.confidence))?;

    let rationale = reply.rationale.trim().to_string();
    if rationale.is_empty() {
        return Err("reply has no rationale".into());
    }

    Ok((techniques, confidence, rationale))
}

/// Strip a surrounding Markdown code fence, if the model added one despite
/// the JSON response format.
fn strip_code_fences(s: &str) -> &str {
    let t = s.trim();
    if let Some(rest) = t.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(body) = rest.strip_suffix("```") {
            return body.trim();
        }
    }
    t
}

/// Exponential backoff delay for the given retry attempt (1-based).
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(RETRY_BASE_DELAY_MS << (attempt - 1).min(6))
}

/// Short provider label derived from the API base URL, for provenance.
fn provider_label(base_url: &str) -> String {
    base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or("unknown")
        .to_string()
}
