//! Hook text synthesis: prompt construction, LLM call and output cleanup.

use std::fmt::Write as _;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, info, warn};

use crate::error::FmtCompact as _;

const LOG_TARGET: &str = "hntldr::synth";

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

const TEMPERATURE: f32 = 0.4;
/// Shorter responses are treated as garbage
const MIN_RESPONSE_CHARS: usize = 15;
/// Article/body text shorter than this is not worth including in the prompt
const MIN_CONTENT_CHARS: usize = 100;

pub const NO_TITLE_HOOK: &str = "No title available.";

/// Input for [`Synthesizer::derive`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub title: String,
    pub url: Option<String>,
    /// Article or self-post text, already truncated
    pub content: String,
    pub score: u32,
    pub comment_count: u32,
}

#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    /// Derive a short hook for the item. Never fails: degrades to a cleaned
    /// up title instead.
    async fn derive(&self, req: &SynthesisRequest) -> String;
}

/// Items with no link and next to no text get an empty hook instead of a
/// synthesis call
pub fn needs_synthesis(url: Option<&str>, body_text: &str) -> bool {
    url.is_some_and(|u| !u.is_empty()) || MIN_CONTENT_CHARS <= body_text.chars().count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LlmProvider {
    #[value(name = "claude")]
    Claude,
    #[value(name = "openai")]
    OpenAi,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Claude => write!(f, "claude"),
            LlmProvider::OpenAi => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    /// Override for OpenAI-compatible endpoints
    pub openai_base_url: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Snafu)]
pub enum LlmError {
    #[snafu(display("Failed to build HTTP client"))]
    LlmClientBuild { source: reqwest::Error },
    #[snafu(display("LLM request failed"))]
    LlmHttp { source: reqwest::Error },
    #[snafu(display("LLM API error ({status}): {body}"))]
    LlmStatus { status: StatusCode, body: String },
    #[snafu(display("LLM response had no text"))]
    EmptyCompletion,
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    content: Vec<ClaudeContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

/// Minimal client for the Claude Messages API and OpenAI-compatible chat
/// completions
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context(LlmClientBuildSnafu)?;
        info!(target: LOG_TARGET, provider = %config.provider, model = %config.model, "LLM client ready");
        Ok(Self { http, config })
    }

    pub async fn complete(&self, prompt: &str) -> LlmResult<String> {
        let text = match self.config.provider {
            LlmProvider::Claude => self.complete_claude(prompt).await?,
            LlmProvider::OpenAi => self.complete_openai(prompt).await?,
        };
        let text = text.trim();
        if text.is_empty() {
            return EmptyCompletionSnafu.fail();
        }
        Ok(text.to_owned())
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> LlmResult<reqwest::Response> {
        let resp = req.send().await.context(LlmHttpSnafu)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return LlmStatusSnafu { status, body }.fail();
        }
        Ok(resp)
    }

    async fn complete_claude(&self, prompt: &str) -> LlmResult<String> {
        let req = self
            .http
            .post(format!("{ANTHROPIC_API_URL}/messages"))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "temperature": TEMPERATURE,
                "messages": [{ "role": "user", "content": prompt }],
            }));

        let resp: ClaudeResponse = self
            .send(req)
            .await?
            .json()
            .await
            .context(LlmHttpSnafu)?;
        Ok(resp
            .content
            .into_iter()
            .find_map(|block| block.text)
            .unwrap_or_default())
    }

    async fn complete_openai(&self, prompt: &str) -> LlmResult<String> {
        let base = self
            .config
            .openai_base_url
            .as_deref()
            .unwrap_or(OPENAI_API_URL)
            .trim_end_matches('/');
        let req = self
            .http
            .post(format!("{base}/chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "max_tokens": self.config.max_tokens,
                "temperature": TEMPERATURE,
                "messages": [{ "role": "user", "content": prompt }],
            }));

        let resp: OpenAiResponse = self
            .send(req)
            .await?
            .json()
            .await
            .context(LlmHttpSnafu)?;
        Ok(resp
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

pub fn build_prompt(req: &SynthesisRequest) -> String {
    let mut prompt = String::from(
        "Summarize a Hacker News submission for technical readers who want to know \
         what it is before clicking.\n\n",
    );
    let _ = writeln!(prompt, "Title: {}", req.title);
    let _ = writeln!(prompt, "Link: {}", req.url.as_deref().unwrap_or("none"));
    let content_chars = req.content.chars().count();
    if MIN_CONTENT_CHARS < content_chars {
        let _ = writeln!(
            prompt,
            "Content (first {content_chars} characters):\n{}",
            req.content
        );
    }
    let _ = writeln!(
        prompt,
        "Points: {}, comments: {}\n",
        req.score, req.comment_count
    );
    prompt.push_str(
        "Reply with a single line starting with `HOOK:` followed by one or two \
         sentences (20 to 45 words) saying plainly what this is and why it matters. \
         Name concrete things. Skip openers like \"This article\" and avoid hedging.",
    );
    prompt
}

/// Split after `.`, `!` or `?` followed by whitespace
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = vec![];
    let mut start = 0;
    let mut prev_end: Option<char> = None;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() && matches!(prev_end, Some('.' | '!' | '?')) {
            let sentence = text[start..i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i;
        }
        prev_end = Some(c);
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

fn trim_quotes(s: &str) -> &str {
    s.trim().trim_matches(|c| c == '"' || c == '\'')
}

/// Extract the hook from raw LLM output.
///
/// Uses the last `HOOK:` line, or the first sentence of the whole reply when
/// there is none, and caps it at two sentences. Empty if nothing usable is left.
pub fn parse_hook(raw: &str) -> String {
    let mut hook_line = None;
    for line in raw.lines().map(str::trim) {
        if line
            .get(..5)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("hook:"))
        {
            hook_line = Some(trim_quotes(&line[5..]));
        }
    }

    let hook = match hook_line {
        Some(hook) => hook,
        None => split_sentences(trim_quotes(raw))
            .first()
            .copied()
            .unwrap_or_default(),
    };

    split_sentences(hook)
        .into_iter()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Title with a trailing `(YYYY)` dropped and `[pdf]` turned into ` (PDF)`
pub fn title_fallback(title: &str) -> String {
    let mut title = title.trim_end();

    if let Some(rest) = title.strip_suffix(')') {
        if let Some(split) = rest.len().checked_sub(5) {
            if let (Some(head), Some(year)) = (rest.get(..split), rest.get(split..)) {
                if year.starts_with('(') && year[1..].bytes().all(|b| b.is_ascii_digit()) {
                    title = head.trim_end();
                }
            }
        }
    }

    if title.to_ascii_lowercase().ends_with("[pdf]") {
        return format!("{} (PDF)", title[..title.len() - 5].trim_end());
    }
    title.to_owned()
}

pub struct LlmSynthesizer {
    llm: LlmClient,
}

impl LlmSynthesizer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn derive(&self, req: &SynthesisRequest) -> String {
        if req.title.trim().is_empty() {
            return NO_TITLE_HOOK.to_owned();
        }

        let raw = match self.llm.complete(&build_prompt(req)).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(target: LOG_TARGET, title = %req.title, err = %err.fmt_compact(), "Synthesis failed, using title");
                return title_fallback(&req.title);
            }
        };

        if raw.chars().count() < MIN_RESPONSE_CHARS {
            warn!(target: LOG_TARGET, title = %req.title, len = raw.len(), "Synthesis too short, using title");
            return title_fallback(&req.title);
        }

        let hook = parse_hook(&raw);
        if hook.is_empty() {
            return title_fallback(&req.title);
        }
        debug!(target: LOG_TARGET, title = %req.title, %hook, "Derived hook");
        hook
    }
}
