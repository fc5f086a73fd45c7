//! Chat client for Ollama-compatible and hosted model endpoints.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agents::profiles::CONNECTION_TEST;
use crate::config::{AgentConfig, Provider};
use crate::history::ChatMessage;
use crate::logging::{with_logger, LogCategory};
use crate::normalizer::{excerpt, recover_json};
use crate::{log_debug, log_warning};

const MAX_TOKENS: u32 = 1000;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure of a single request, before classification
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    Timeout,
    Connect(String),
    Status { code: u16, body: String },
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Connect(e) => write!(f, "connection failed: {}", e),
            Self::Status { code, body } => write!(f, "HTTP {}: {}", code, body),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TransportError {}

/// The HTTP seam. Tests substitute a scripted implementation.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, TransportError>;

    async fn get_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<Value, TransportError>;
}

pub struct HttpTransport {
    client: Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, TransportError> {
        let response = request.send().await.map_err(classify_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                code: status.as_u16(),
                body: excerpt(&body),
            });
        }

        let raw = response.text().await.map_err(classify_reqwest)?;
        serde_json::from_str(&raw)
            .map_err(|_| TransportError::Other(format!("non-JSON response: {}", excerpt(&raw))))
    }
}

fn classify_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let mut request = self.client.post(url).json(body).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        self.send(request).await
    }

    async fn get_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        self.send(request).await
    }
}

/// A classified failure with the hint shown to the user
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    Timeout { seconds: u64 },
    ServiceUnavailable { base_url: String },
    Server { status: u16 },
    ModelNotFound { model: String },
    RateLimited,
    Http { status: u16, detail: String },
    Transport(String),
    InvalidPayload { reason: String, excerpt: String },
}

impl ClientError {
    fn classify(error: TransportError, config: &AgentConfig) -> Self {
        match error {
            TransportError::Timeout => Self::Timeout {
                seconds: config.timeout,
            },
            TransportError::Connect(_) => Self::ServiceUnavailable {
                base_url: config.base_url.clone(),
            },
            TransportError::Status { code: 404, .. } => Self::ModelNotFound {
                model: config.model.clone(),
            },
            TransportError::Status { code: 429, .. } => Self::RateLimited,
            TransportError::Status { code, .. } if code >= 500 => Self::Server { status: code },
            TransportError::Status { code, body } => Self::Http { status: code, detail: body },
            TransportError::Other(e) => Self::Transport(e),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ModelNotFound { .. } | Self::InvalidPayload { .. })
    }

    /// Short code used in log entries
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::ServiceUnavailable { .. } => "connection_refused",
            Self::Server { .. } => "server_error",
            Self::ModelNotFound { .. } => "model_not_found",
            Self::RateLimited => "rate_limited",
            Self::Http { .. } => "http_error",
            Self::Transport(_) => "transport",
            Self::InvalidPayload { .. } => "invalid_payload",
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { seconds } => write!(
                f,
                "Request timed out after {} seconds. Try increasing timeout in AI settings or using a faster model.",
                seconds
            ),
            Self::ServiceUnavailable { base_url } => write!(
                f,
                "Could not connect to the model server at {}. Make sure Ollama is running: ollama serve",
                base_url
            ),
            Self::Server { status } => write!(
                f,
                "Server error ({}) - likely a memory/resource issue. Try a smaller model or restart Ollama.",
                status
            ),
            Self::ModelNotFound { model } => write!(
                f,
                "Model '{}' not found. Check if the model is installed: ollama pull {}",
                model, model
            ),
            Self::RateLimited => write!(f, "Too many requests. Please wait and try again."),
            Self::Http { status, detail } => write!(f, "HTTP {}: {}", status, detail),
            Self::Transport(e) => write!(f, "LLM API call failed: {}", e),
            Self::InvalidPayload { reason, excerpt } => write!(f, "{}: {}", reason, excerpt),
        }
    }
}

impl std::error::Error for ClientError {}

/// Waits between attempts, per failure class
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub connection: Duration,
    pub server: Duration,
    pub rate_limit: Duration,
    /// Multiplied by 2^attempt for every other failure
    pub exponential_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connection: Duration::from_secs(3),
            server: Duration::from_secs(5),
            rate_limit: Duration::from_secs(10),
            exponential_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No waiting at all
    pub fn immediate() -> Self {
        Self {
            timeout: Duration::ZERO,
            connection: Duration::ZERO,
            server: Duration::ZERO,
            rate_limit: Duration::ZERO,
            exponential_base: Duration::ZERO,
        }
    }

    /// `None` when the error should not be retried. `attempt` is zero-based.
    pub fn backoff(&self, error: &ClientError, attempt: u32) -> Option<Duration> {
        if !error.is_retryable() {
            return None;
        }
        Some(match error {
            ClientError::Timeout { .. } => self.timeout,
            ClientError::ServiceUnavailable { .. } => self.connection,
            ClientError::Server { .. } => self.server,
            ClientError::RateLimited => self.rate_limit,
            _ => self.exponential_base * 2u32.saturating_pow(attempt),
        })
    }
}

/// What a model reply carried
#[derive(Debug, Clone, PartialEq)]
pub enum LlmPayload {
    Code(String),
    /// The whole envelope, with its `commands` array
    Commands(Value),
}

/// Wire format of the configured endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    /// `{base}/chat/completions`
    Completions,
    /// Ollama `{base}/api/chat`
    Native,
    /// Anthropic `{base}/v1/messages`
    Messages,
}

pub struct LlmClient {
    config: AgentConfig,
    transport: Arc<dyn ChatTransport>,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(config: AgentConfig) -> Self {
        Self::with_transport(config, Arc::new(HttpTransport::new()))
    }

    pub fn with_transport(config: AgentConfig, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            config,
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    pub fn api_style(&self) -> ApiStyle {
        if self.config.provider == Provider::Anthropic {
            ApiStyle::Messages
        } else if self.base().ends_with("/v1") {
            ApiStyle::Completions
        } else {
            ApiStyle::Native
        }
    }

    pub fn chat_url(&self) -> String {
        match self.api_style() {
            ApiStyle::Completions => format!("{}/chat/completions", self.base()),
            ApiStyle::Native => format!("{}/api/chat", self.base()),
            ApiStyle::Messages => format!("{}/v1/messages", self.base().trim_end_matches("/v1")),
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        let key = self.config.api_key.clone().unwrap_or_default();
        match self.config.provider {
            Provider::Ollama => {}
            Provider::OpenAi => headers.push(("Authorization".to_string(), format!("Bearer {}", key))),
            Provider::Anthropic => {
                headers.push(("x-api-key".to_string(), key));
                headers.push(("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()));
            }
        }
        headers
    }

    pub fn build_body(&self, messages: &[ChatMessage]) -> Value {
        match self.api_style() {
            ApiStyle::Completions => json!({
                "model": self.config.model,
                "messages": messages,
                "temperature": self.config.temperature,
                "max_tokens": MAX_TOKENS,
            }),
            ApiStyle::Native => {
                let mut body = json!({
                    "model": self.config.model,
                    "format": "json",
                    "stream": false,
                    "messages": messages,
                    "options": {"temperature": self.config.temperature},
                });
                if let Some(keep_alive) = &self.config.keep_alive {
                    body["keep_alive"] = json!(keep_alive);
                }
                body
            }
            ApiStyle::Messages => {
                let system: Vec<&str> = messages
                    .iter()
                    .filter(|m| m.role == "system")
                    .map(|m| m.content.as_str())
                    .collect();
                let rest: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != "system").collect();
                json!({
                    "model": self.config.model,
                    "system": system.join("\n\n"),
                    "messages": rest,
                    "temperature": self.config.temperature,
                    "max_tokens": MAX_TOKENS,
                })
            }
        }
    }

    /// Send `messages` and return the reply text, retrying classified
    /// failures up to `max_retries` attempts in total.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ClientError> {
        let url = self.chat_url();
        let headers = self.headers();
        let body = self.build_body(messages);
        let provider = self.config.provider.to_string();
        let attempts = self.config.max_retries.max(1);

        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let result = self
                .transport
                .post_json(&url, &headers, &body, self.config.timeout_duration())
                .await;
            let elapsed = started.elapsed().as_millis() as u64;

            let error = match result {
                Ok(outer) => {
                    with_logger(|l| l.log_provider_attempt(&provider, attempt + 1, elapsed, None));
                    return extract_content(&outer);
                }
                Err(e) => ClientError::classify(e, &self.config),
            };
            with_logger(|l| l.log_provider_attempt(&provider, attempt + 1, elapsed, Some(error.code())));

            attempt += 1;
            let wait = match self.retry.backoff(&error, attempt - 1) {
                Some(wait) if attempt < attempts => wait,
                _ => return Err(error),
            };

            log_warning!(
                LogCategory::Provider,
                format!("Attempt {}: {} Retrying...", attempt, error.code())
            );
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// The code-or-commands contract: system instruction, replayed
    /// history, then the prompt.
    pub async fn ask(
        &self,
        system_prompt: &str,
        prompt: &str,
        history: &[ChatMessage],
    ) -> Result<LlmPayload, ClientError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(prompt));

        let content = self.chat(&messages).await?;
        extract_payload(&content)
    }

    /// Warm-up request that keeps the model loaded. Never fails.
    pub async fn ping(&self) -> bool {
        let url = self.chat_url();
        let body = self.build_body(&[ChatMessage::user("ping")]);
        let ok = self
            .transport
            .post_json(&url, &self.headers(), &body, PING_TIMEOUT)
            .await
            .is_ok();
        log_debug!(LogCategory::Provider, format!("Warm-up ping: {}", ok));
        ok
    }

    pub async fn test_connection(&self) -> Result<String, ClientError> {
        let reply = self
            .chat(&[ChatMessage::user(CONNECTION_TEST)])
            .await?;
        Ok(reply.trim().to_string())
    }

    /// Installed models. Ollama's `/api/tags` for local servers, the
    /// `/models` listing otherwise.
    pub async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        let (url, field, key) = match self.config.provider {
            Provider::Ollama => (
                format!("{}/api/tags", self.base().trim_end_matches("/v1")),
                "models",
                "name",
            ),
            Provider::OpenAi => (format!("{}/models", self.base()), "data", "id"),
            Provider::Anthropic => (
                format!("{}/v1/models", self.base().trim_end_matches("/v1")),
                "data",
                "id",
            ),
        };

        let value = self
            .transport
            .get_json(&url, &self.headers(), self.config.timeout_duration())
            .await
            .map_err(|e| ClientError::classify(e, &self.config))?;

        let mut models: Vec<String> = value[field]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|m| m[key].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        models.sort();
        Ok(models)
    }
}

/// Pull the reply text out of any of the three response shapes
pub fn extract_content(outer: &Value) -> Result<String, ClientError> {
    outer["message"]["content"]
        .as_str()
        .or_else(|| outer["choices"][0]["message"]["content"].as_str())
        .or_else(|| outer["content"][0]["text"].as_str())
        .map(str::to_string)
        .ok_or_else(|| ClientError::InvalidPayload {
            reason: "Unexpected payload (no message content)".to_string(),
            excerpt: excerpt(&outer.to_string()),
        })
}

/// Recover the JSON envelope from reply text and pick out `code` or
/// `commands`.
pub fn extract_payload(content: &str) -> Result<LlmPayload, ClientError> {
    let inner = recover_json(content).map_err(|e| ClientError::InvalidPayload {
        reason: "Assistant content is not valid JSON".to_string(),
        excerpt: e.excerpt,
    })?;

    if let Some(code) = inner.get("code").and_then(Value::as_str) {
        if !code.trim().is_empty() {
            return Ok(LlmPayload::Code(code.trim().to_string()));
        }
    }
    if inner.get("commands").map_or(false, Value::is_array) {
        return Ok(LlmPayload::Commands(inner));
    }

    Err(ClientError::InvalidPayload {
        reason: "No 'code' or 'commands' field in assistant JSON".to_string(),
        excerpt: excerpt(&inner.to_string()),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned results in order and records every request
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<Value, TransportError>>>,
        pub requests: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedTransport {
        pub(crate) fn with_responses(responses: Vec<Result<Value, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn next(&self, url: &str, body: Value) -> Result<Value, TransportError> {
            self.requests.lock().unwrap().push((url.to_string(), body));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Other("no scripted response left".to_string())))
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn post_json(
            &self,
            url: &str,
            _headers: &[(String, String)],
            body: &Value,
            _timeout: Duration,
        ) -> Result<Value, TransportError> {
            self.next(url, body.clone())
        }

        async fn get_json(
            &self,
            url: &str,
            _headers: &[(String, String)],
            _timeout: Duration,
        ) -> Result<Value, TransportError> {
            self.next(url, Value::Null)
        }
    }

    /// A native-style reply whose content is `inner`
    pub(crate) fn native_reply(inner: &str) -> Result<Value, TransportError> {
        Ok(json!({"message": {"role": "assistant", "content": inner}}))
    }

    fn client(config: AgentConfig, transport: Arc<ScriptedTransport>) -> LlmClient {
        LlmClient::with_transport(config, transport).with_retry_policy(RetryPolicy::immediate())
    }

    #[tokio::test]
    async fn test_timeout_exhausts_exactly_max_retries() {
        let transport = ScriptedTransport::with_responses(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ]);
        let client = client(AgentConfig::default(), transport.clone());

        let err = client.ask("system", "a box", &[]).await.unwrap_err();

        assert_eq!(transport.request_count(), 2);
        assert_eq!(err, ClientError::Timeout { seconds: 120 });
        let message = err.to_string();
        assert!(message.contains("timed out"));
        assert!(message.contains("increasing timeout"));
        assert!(message.contains("faster model"));
    }

    #[tokio::test]
    async fn test_model_not_found_is_not_retried() {
        let transport = ScriptedTransport::with_responses(vec![
            Err(TransportError::Status {
                code: 404,
                body: "model not found".to_string(),
            }),
            native_reply(r#"{"code": "x = 1"}"#),
        ]);
        let client = client(AgentConfig::default(), transport.clone());

        let err = client.ask("system", "a box", &[]).await.unwrap_err();

        assert_eq!(transport.request_count(), 1);
        assert!(err.to_string().contains("ollama pull llama3.1:8b"));
    }

    #[tokio::test]
    async fn test_recovers_after_server_error() {
        let transport = ScriptedTransport::with_responses(vec![
            Err(TransportError::Status {
                code: 500,
                body: String::new(),
            }),
            Ok(json!({"choices": [{"message": {"content": "```json\n{\"code\": \"doc = App.newDocument()\"}\n```"}}]})),
        ]);
        let client = client(AgentConfig::default(), transport.clone());

        let payload = client.ask("system", "a box", &[]).await.unwrap();

        assert_eq!(payload, LlmPayload::Code("doc = App.newDocument()".to_string()));
        assert_eq!(transport.request_count(), 2);
    }

    #[test]
    fn test_backoff_per_failure_class() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff(&ClientError::Timeout { seconds: 1 }, 0), Some(Duration::from_secs(5)));
        assert_eq!(
            policy.backoff(&ClientError::ServiceUnavailable { base_url: String::new() }, 0),
            Some(Duration::from_secs(3))
        );
        assert_eq!(policy.backoff(&ClientError::RateLimited, 1), Some(Duration::from_secs(10)));
        assert_eq!(policy.backoff(&ClientError::Transport(String::new()), 3), Some(Duration::from_secs(8)));
        assert_eq!(policy.backoff(&ClientError::ModelNotFound { model: String::new() }, 0), None);
    }

    #[test]
    fn test_endpoint_selection() {
        let transport = ScriptedTransport::with_responses(vec![]);

        let completions = client(AgentConfig::default(), transport.clone());
        assert_eq!(completions.chat_url(), "http://localhost:11434/v1/chat/completions");
        assert_eq!(completions.build_body(&[])["max_tokens"], json!(1000));

        let mut native_config = AgentConfig::default();
        native_config.base_url = "http://127.0.0.1:11434/".to_string();
        native_config.keep_alive = Some("1h".to_string());
        let native = client(native_config, transport.clone());
        assert_eq!(native.chat_url(), "http://127.0.0.1:11434/api/chat");
        let body = native.build_body(&[ChatMessage::user("hi")]);
        assert_eq!(body["format"], json!("json"));
        assert_eq!(body["stream"], json!(false));
        assert_eq!(body["keep_alive"], json!("1h"));
        assert_eq!(body["options"]["temperature"], json!(0.1));

        let mut anthropic_config = AgentConfig::default();
        anthropic_config.provider = Provider::Anthropic;
        anthropic_config.base_url = "https://api.anthropic.com".to_string();
        anthropic_config.api_key = Some("key".to_string());
        let anthropic = client(anthropic_config, transport);
        assert_eq!(anthropic.chat_url(), "https://api.anthropic.com/v1/messages");
        let body = anthropic.build_body(&[ChatMessage::system("rules"), ChatMessage::user("hi")]);
        assert_eq!(body["system"], json!("rules"));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_replayed_between_system_and_prompt() {
        let transport = ScriptedTransport::with_responses(vec![native_reply(r#"{"commands": []}"#)]);
        let client = client(AgentConfig::default(), transport.clone());
        let history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("{}")];

        let payload = client.ask("system", "now", &history).await.unwrap();
        assert!(matches!(payload, LlmPayload::Commands(_)));

        let requests = transport.requests.lock().unwrap();
        let roles: Vec<&str> = requests[0].1["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    }

    #[test]
    fn test_payload_errors_carry_excerpt() {
        let err = extract_payload(&"nonsense ".repeat(50)).unwrap_err();
        match err {
            ClientError::InvalidPayload { excerpt, .. } => assert_eq!(excerpt.chars().count(), 200),
            other => panic!("unexpected error {:?}", other),
        }

        let err = extract_payload(r#"{"code": 42}"#).unwrap_err();
        assert!(err.to_string().starts_with("No 'code' or 'commands' field"));

        assert!(extract_content(&json!({"done": true})).is_err());
        assert_eq!(
            extract_content(&json!({"content": [{"type": "text", "text": "OK"}]})).unwrap(),
            "OK"
        );
    }

    #[tokio::test]
    async fn test_list_models_and_ping() {
        let transport = ScriptedTransport::with_responses(vec![
            Ok(json!({"models": [{"name": "qwen2.5:7b"}, {"name": "llama3.1:8b"}]})),
            Err(TransportError::Connect("refused".to_string())),
        ]);
        let client = client(AgentConfig::default(), transport.clone());

        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3.1:8b", "qwen2.5:7b"]);
        assert_eq!(transport.requests.lock().unwrap()[0].0, "http://localhost:11434/api/tags");

        assert!(!client.ping().await);
    }
}
