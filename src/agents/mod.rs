use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::command::CommandBatch;
use crate::config::AgentConfig;
use crate::dispatcher::PromptParser;
use crate::history::{ChatMessage, ConversationHistory};
use crate::logging::{LogCategory, LogContext};
use crate::normalizer::recover_json;
use crate::providers::{ClientError, LlmClient, LlmPayload};
use crate::{log_debug, log_error, log_info, log_warning};

pub mod profiles;

use profiles::{DESIGN_AGENT, SCRIPT_AGENT};

/// Scene state folded into the system prompt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentContext {
    pub created_objects: Vec<String>,
    pub last_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Commands(CommandBatch),
    /// The request failed; callers should fall back to keyword parsing
    Failed { error: String, fallback: bool },
}

/// One conversation with the model
pub struct Agent {
    client: LlmClient,
    history: ConversationHistory,
    context: AgentContext,
    parser: PromptParser,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self::with_client(LlmClient::new(config))
    }

    pub fn with_client(client: LlmClient) -> Self {
        Self {
            client,
            history: ConversationHistory::new(),
            context: AgentContext::default(),
            parser: PromptParser::new(),
        }
    }

    pub fn client(&self) -> &LlmClient {
        &self.client
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn update_context(&mut self, context: AgentContext) {
        self.context = context;
    }

    pub fn system_prompt(&self) -> String {
        let mut prompt = DESIGN_AGENT.system_prompt.to_string();

        if !self.context.created_objects.is_empty() {
            prompt.push_str(&format!(
                "\n\nCURRENT OBJECTS IN SCENE: {}",
                self.context.created_objects.join(", ")
            ));
        }
        if let Some(last) = &self.context.last_command {
            prompt.push_str(&format!("\n\nLAST COMMAND: {}", last));
        }
        prompt
    }

    fn messages(&self, system_prompt: &str, prompt: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(system_prompt)];
        messages.extend(self.history.replay(self.client.config().history_turns));
        messages.push(ChatMessage::user(prompt));
        messages
    }

    /// Ask the model for a command batch. Never fails: errors come back as
    /// `AgentOutcome::Failed`.
    pub async fn process_prompt(&mut self, prompt: &str, context: Option<AgentContext>) -> AgentOutcome {
        if let Some(context) = context {
            self.context = context;
        }

        let started = Instant::now();
        let messages = self.messages(&self.system_prompt(), prompt);

        match self.client.chat(&messages).await {
            Ok(response) => {
                let batch = self.parse_response(&response);
                let parsed = serde_json::to_value(&batch).ok();
                self.history.push(prompt, &response, parsed);

                log_info!(
                    LogCategory::Provider,
                    format!("Prompt produced {} command(s)", batch.commands.len()),
                    LogContext::new()
                        .with_component("agent")
                        .with_operation("process_prompt")
                        .with_duration_ms(started.elapsed().as_millis() as u64)
                        .with_success(!batch.is_empty())
                );
                AgentOutcome::Commands(batch)
            }
            Err(e) => {
                log_error!(
                    LogCategory::Provider,
                    format!("AI Agent Error: {}", e),
                    LogContext::new().with_component("agent").with_error_code(e.code())
                );
                AgentOutcome::Failed {
                    error: e.to_string(),
                    fallback: true,
                }
            }
        }
    }

    /// Read a reply as a command envelope, falling back to keyword
    /// parsing of the reply text.
    pub fn parse_response(&self, response: &str) -> CommandBatch {
        if let Some(batch) = recover_json(response).ok().as_ref().and_then(CommandBatch::from_value) {
            return batch;
        }

        log_warning!(LogCategory::Parser, "Reply had no commands array, using fallback parsing");
        log_debug!(LogCategory::Parser, format!("Unparsed reply: {}", crate::normalizer::excerpt(response)));
        self.parser.to_batch(response)
    }

    /// Ask for a geometry script
    pub async fn generate_code(&mut self, prompt: &str) -> Result<String, ClientError> {
        let history = self.history.replay(self.client.config().history_turns);
        let payload = self.client.ask(SCRIPT_AGENT.system_prompt, prompt, &history).await?;

        match payload {
            LlmPayload::Code(code) => {
                self.history
                    .push(prompt, &code, Some(Value::String(code.clone())));
                Ok(code)
            }
            LlmPayload::Commands(envelope) => Err(ClientError::InvalidPayload {
                reason: "Expected a 'code' field but got commands".to_string(),
                excerpt: crate::normalizer::excerpt(&envelope.to_string()),
            }),
        }
    }
}

/// Returned when a request is already in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentBusy;

impl fmt::Display for AgentBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "The AI agent is still working on a previous request")
    }
}

impl std::error::Error for AgentBusy {}

/// Clears the busy flag when the worker finishes, panics included
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Completion slot for a request started with `process_async`
pub struct PendingResponse {
    rx: oneshot::Receiver<AgentOutcome>,
}

impl PendingResponse {
    pub async fn wait(self) -> AgentOutcome {
        self.rx.await.unwrap_or_else(|_| AgentOutcome::Failed {
            error: "Agent task ended without a result".to_string(),
            fallback: true,
        })
    }
}

/// Runs agent requests on background tasks, at most one at a time
pub struct AgentManager {
    agent: Arc<Mutex<Agent>>,
    busy: Arc<AtomicBool>,
}

impl AgentManager {
    pub fn new(config: AgentConfig) -> Self {
        Self::with_agent(Agent::new(config))
    }

    pub fn with_agent(agent: Agent) -> Self {
        Self {
            agent: Arc::new(Mutex::new(agent)),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_available(&self) -> bool {
        !self.busy.load(Ordering::SeqCst)
    }

    pub fn agent(&self) -> Arc<Mutex<Agent>> {
        Arc::clone(&self.agent)
    }

    /// Start a request on a background task. The busy flag is claimed
    /// before this returns, so a second call fails with `AgentBusy`
    /// until the first completes.
    pub fn process_async(
        &self,
        prompt: &str,
        context: Option<AgentContext>,
    ) -> Result<PendingResponse, AgentBusy> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log_warning!(LogCategory::Provider, "Rejected prompt while a request is in flight");
            return Err(AgentBusy);
        }

        let guard = BusyGuard(Arc::clone(&self.busy));
        let agent = Arc::clone(&self.agent);
        let prompt = prompt.to_string();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let outcome = agent.lock().await.process_prompt(&prompt, context).await;
            drop(guard);
            let _ = tx.send(outcome);
        });

        Ok(PendingResponse { rx })
    }

    pub async fn test_connection(&self) -> bool {
        let agent = self.agent.lock().await;
        match agent.client().test_connection().await {
            Ok(reply) => reply_is_ok(&reply),
            Err(e) => {
                log_warning!(LogCategory::Provider, format!("Connection test failed: {}", e.code()));
                false
            }
        }
    }
}

/// A bare "OK", allowing punctuation the model tends to add
fn reply_is_ok(reply: &str) -> bool {
    reply
        .trim()
        .trim_end_matches(|c: char| c == '.' || c == '!')
        .eq_ignore_ascii_case("ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::tests::{native_reply, ScriptedTransport};
    use crate::providers::{ChatTransport, RetryPolicy, TransportError};
    use crate::shapes::ShapeKind;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn agent_with(transport: Arc<dyn ChatTransport>) -> Agent {
        let client = LlmClient::with_transport(AgentConfig::default(), transport)
            .with_retry_policy(RetryPolicy::immediate());
        Agent::with_client(client)
    }

    /// Holds every request until released
    struct GatedTransport {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl ChatTransport for GatedTransport {
        async fn post_json(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _body: &Value,
            _timeout: Duration,
        ) -> Result<Value, TransportError> {
            self.gate.notified().await;
            native_reply(r#"{"commands": [{"shape": "sphere", "dimensions": {"radius": 3}}]}"#)
        }

        async fn get_json(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _timeout: Duration,
        ) -> Result<Value, TransportError> {
            Err(TransportError::Other("unused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_process_prompt_parses_envelope() {
        let transport = ScriptedTransport::with_responses(vec![native_reply(
            r#"{"commands": [{"type": "create", "shape": "box", "dimensions": {"length": 20}}],
                "explanation": "A box", "confidence": 0.9}"#,
        )]);
        let mut agent = agent_with(transport);

        let outcome = agent.process_prompt("a 20 mm box", None).await;

        match outcome {
            AgentOutcome::Commands(batch) => {
                assert_eq!(batch.commands[0].shape, ShapeKind::Box);
                assert_eq!(batch.confidence, 0.9);
                assert!(!batch.fallback);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(agent.history().len(), 1);
    }

    #[tokio::test]
    async fn test_prose_reply_uses_fallback_parsing() {
        let transport = ScriptedTransport::with_responses(vec![native_reply(
            "Sure! I will make a cylinder with radius 6 and height 40.",
        )]);
        let mut agent = agent_with(transport);

        match agent.process_prompt("a pipe", None).await {
            AgentOutcome::Commands(batch) => {
                assert!(batch.fallback);
                assert_eq!(batch.explanation, "Fallback parsing used");
                assert_eq!(batch.commands[0].shape, ShapeKind::Cylinder);
                assert_eq!(batch.commands[0].dimensions.get("height"), Some(&40.0));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_becomes_fallback_outcome() {
        let transport = ScriptedTransport::with_responses(vec![
            Err(TransportError::Connect("refused".to_string())),
            Err(TransportError::Connect("refused".to_string())),
        ]);
        let mut agent = agent_with(transport);

        match agent.process_prompt("a box", None).await {
            AgentOutcome::Failed { error, fallback } => {
                assert!(fallback);
                assert!(error.contains("ollama serve"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(agent.history().is_empty());
    }

    #[tokio::test]
    async fn test_context_and_history_reach_the_request() {
        let transport = ScriptedTransport::with_responses(vec![
            native_reply(r#"{"commands": []}"#),
            native_reply(r#"{"commands": []}"#),
        ]);
        let mut agent = agent_with(transport.clone());
        let context = AgentContext {
            created_objects: vec!["Box".to_string(), "Cylinder".to_string()],
            last_command: Some("create cylinder".to_string()),
        };

        agent.process_prompt("first", Some(context)).await;
        agent.process_prompt("second", None).await;

        let requests = transport.requests.lock().unwrap();
        let messages = requests[1].1["messages"].as_array().unwrap();
        let system = messages[0]["content"].as_str().unwrap();
        assert!(system.contains("CURRENT OBJECTS IN SCENE: Box, Cylinder"));
        assert!(system.contains("LAST COMMAND: create cylinder"));
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1]["content"], "first");
    }

    #[tokio::test]
    async fn test_generate_code() {
        let transport = ScriptedTransport::with_responses(vec![
            native_reply(r#"{"code": "doc = App.newDocument()\ndoc.recompute()"}"#),
            native_reply(r#"{"commands": []}"#),
        ]);
        let mut agent = agent_with(transport);

        let code = agent.generate_code("an empty document").await.unwrap();
        assert!(code.starts_with("doc = App.newDocument()"));

        let err = agent.generate_code("again").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn test_busy_gate_rejects_second_request() {
        let gate = Arc::new(Notify::new());
        let manager = AgentManager::with_agent(agent_with(Arc::new(GatedTransport { gate: gate.clone() })));

        let pending = manager.process_async("a ball", None).unwrap();
        assert!(!manager.is_available());
        assert_eq!(manager.process_async("another", None).err(), Some(AgentBusy));

        gate.notify_one();
        match pending.wait().await {
            AgentOutcome::Commands(batch) => assert_eq!(batch.commands[0].shape, ShapeKind::Sphere),
            other => panic!("unexpected outcome {:?}", other),
        }

        assert!(manager.is_available());
        gate.notify_one();
        let third = manager.process_async("a third", None).unwrap().wait().await;
        assert!(matches!(third, AgentOutcome::Commands(_)));
    }

    #[tokio::test]
    async fn test_connection_check() {
        let transport = ScriptedTransport::with_responses(vec![
            native_reply(" ok.\n"),
            native_reply("nope"),
            native_reply("Token limit reached"),
            native_reply("look, I can't"),
        ]);
        let manager = AgentManager::with_agent(agent_with(transport));

        assert!(manager.test_connection().await);
        assert!(!manager.test_connection().await);
        assert!(!manager.test_connection().await);
        assert!(!manager.test_connection().await);
    }
}
