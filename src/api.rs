//! LLM-backed similarity oracle with exponential backoff retry logic.
//!
//! The semantic half of keyword deduplication is delegated to an
//! OpenAI-compatible chat-completions endpoint. The module keeps a small
//! trait-based design so retry behavior stays separate from transport:
//! - [`AskAsync`]: core trait defining one async prompt/response exchange
//! - [`ChatClient`]: posts a single user message and returns the reply text
//! - [`RetryAsk`]: decorator that adds retry logic to any `AskAsync` implementation
//! - [`LlmSimilarityOracle`]: builds the comparison prompt and parses the verdict
//!
//! # Retry Strategy
//!
//! - Configurable maximum retry attempts (5 by default)
//! - Exponential backoff from a configurable base delay
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use async_trait::async_trait;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

use crate::config::OracleConfig;
use crate::dedup::SimilarityOracle;
use crate::models::BoxError;
use crate::utils::truncate_for_log;

/// Trait for async prompt/response interaction.
pub trait AskAsync {
    /// The type of response returned by the model.
    type Response;

    /// Send text to the model and receive a response.
    async fn ask(&self, text: &str) -> Result<Self::Response, BoxError>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    /// The underlying client to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + fmt::Debug,
{
    type Response = T::Response;

    #[instrument(level = "debug", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, BoxError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Minimal OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    pub fn new(config: &OracleConfig, api_key: String) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
        })
    }
}

impl AskAsync for ChatClient {
    type Response = String;

    async fn ask(&self, text: &str) -> Result<Self::Response, BoxError> {
        let t0 = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: text,
            }],
            temperature: 0.0,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                elapsed_ms = t0.elapsed().as_millis() as u64,
                %status,
                body = %truncate_for_log(&body, 300),
                "Chat API call failed"
            );
            return Err(format!("chat API returned {status}").into());
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| "chat API returned no choices".into())
    }
}

/// [`SimilarityOracle`] that asks a chat model for a true/false verdict.
#[derive(Debug)]
pub struct LlmSimilarityOracle {
    api: RetryAsk<ChatClient>,
}

impl LlmSimilarityOracle {
    pub fn new(config: &OracleConfig, api_key: String) -> Result<Self, reqwest::Error> {
        let client = ChatClient::new(config, api_key)?;
        Ok(Self {
            api: RetryAsk::new(
                client,
                config.max_retries,
                StdDuration::from_millis(config.base_delay_ms),
            ),
        })
    }
}

#[async_trait]
impl SimilarityOracle for LlmSimilarityOracle {
    #[instrument(level = "info", skip_all, fields(candidate = %candidate, reference = reference.len()))]
    async fn is_similar(&self, candidate: &str, reference: &[String]) -> Result<bool, BoxError> {
        let prompt = similarity_prompt(candidate, reference);
        let reply = self.api.ask(&prompt).await?;
        let verdict = parse_verdict(&reply).ok_or_else(|| {
            format!(
                "unexpected oracle reply: {}",
                truncate_for_log(&reply, 120)
            )
        })?;
        debug!(verdict, "Similarity verdict");
        Ok(verdict)
    }
}

/// Build the comparison prompt for one candidate.
pub fn similarity_prompt(candidate: &str, reference: &[String]) -> String {
    let quoted: Vec<String> = reference.iter().map(|r| format!("{r:?}")).collect();
    format!(
        "Compare if this keyword {candidate:?} is semantically similar to any of these keywords: [{}].\n\
         Consider them similar if they refer to the same news story, event, person or topic.\n\
         Respond with only \"true\" or \"false\".",
        quoted.join(", ")
    )
}

/// Read a `true`/`false` verdict, tolerating case, quotes and trailing punctuation.
pub fn parse_verdict(reply: &str) -> Option<bool> {
    let normalized = reply
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.' || c.is_whitespace())
        .to_ascii_lowercase();
    match normalized.as_str() {
        "true" | "yes" => Some(true),
        "false" | "no" => Some(false),
        _ => None,
    }
}
