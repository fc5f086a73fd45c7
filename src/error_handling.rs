use colored::*;
use std::fmt;

use crate::agents::AgentBusy;
use crate::document::DocumentError;
use crate::executor::{ErrorKind, ExecutorError};
use crate::log_error;
use crate::logging::{LogCategory, LogContext};
use crate::normalizer::NormalizeError;
use crate::providers::ClientError;

/// Error with actionable suggestions for the terminal
#[derive(Debug, Clone)]
pub struct UserFriendlyError {
    pub error_type: ErrorType,
    pub message: String,
    pub suggestions: Vec<String>,
    pub technical_details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorType {
    Connection,
    Configuration,
    Validation,
    Provider,
    Syntax,
    Runtime,
    Parse,
    Timeout,
    Permission,
    NotFound,
    General,
}

impl ErrorType {
    fn icon(self) -> &'static str {
        match self {
            Self::Connection => "🔌",
            Self::Configuration => "⚙️",
            Self::Validation => "🛡️",
            Self::Provider => "🤖",
            Self::Syntax => "📝",
            Self::Runtime => "💥",
            Self::Parse => "🧩",
            Self::Timeout => "⏱️",
            Self::Permission => "🚫",
            Self::NotFound => "🔍",
            Self::General => "❌",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Connection => "Connection Error",
            Self::Configuration => "Configuration Error",
            Self::Validation => "Blocked Script",
            Self::Provider => "AI Provider Error",
            Self::Syntax => "Syntax Error",
            Self::Runtime => "Script Error",
            Self::Parse => "Unreadable AI Response",
            Self::Timeout => "Timeout Error",
            Self::Permission => "Permission Error",
            Self::NotFound => "Not Found",
            Self::General => "Error",
        }
    }
}

impl UserFriendlyError {
    pub fn new(error_type: ErrorType, message: String) -> Self {
        Self {
            error_type,
            message,
            suggestions: Vec::new(),
            technical_details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions.extend(suggestions);
        self
    }

    pub fn with_technical_details(mut self, details: String) -> Self {
        self.technical_details = Some(details);
        self
    }

    pub fn display(&self) {
        log_error!(
            LogCategory::System,
            format!("{:?}: {}", self.error_type, self.message),
            LogContext::new()
                .with_component("error_handling")
                .with_operation("display_error")
                .with_error_code(&format!("{:?}", self.error_type))
                .with_success(false)
        );

        eprintln!(
            "{} {}: {}",
            self.error_type.icon(),
            self.error_type.title().bold().red(),
            self.message
        );

        if !self.suggestions.is_empty() {
            eprintln!();
            eprintln!("{} {}", "💡".cyan(), "Suggested solutions:".bold().yellow());
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                eprintln!("  {}. {}", (i + 1).to_string().green(), suggestion);
            }
        }

        if let Some(details) = &self.technical_details {
            eprintln!();
            eprintln!("{} {}", "🔧".dimmed(), "Technical details:".dimmed());
            eprintln!("   {}", details.dimmed());
        }
    }
}

impl fmt::Display for UserFriendlyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UserFriendlyError {}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn from_client_error(error: &ClientError) -> UserFriendlyError {
    let (error_type, message, suggestions) = match error {
        ClientError::Timeout { .. } => (
            ErrorType::Timeout,
            "The model did not answer in time",
            strings(&[
                "Increase the timeout: vibecad timeout 240",
                "Use a smaller or faster model: vibecad select qwen2.5:7b",
                "Use the offline parser instead: vibecad --no-ai <prompt>",
            ]),
        ),
        ClientError::ServiceUnavailable { .. } => (
            ErrorType::Connection,
            "Unable to connect to the model server",
            strings(&[
                "Ensure Ollama is running: ollama serve",
                "Check the configured URL: vibecad config",
                "Change it with: vibecad set-url <url>",
            ]),
        ),
        ClientError::Server { .. } => (
            ErrorType::Provider,
            "The model server failed while answering",
            strings(&[
                "Try a smaller model: vibecad select llama3.1:8b",
                "Restart Ollama to free memory",
            ]),
        ),
        ClientError::ModelNotFound { .. } => (
            ErrorType::Provider,
            "The requested AI model is not available",
            strings(&[
                "List installed models: vibecad list-models",
                "Install the model with ollama pull <model>",
                "Select a different model: vibecad select <model-name>",
            ]),
        ),
        ClientError::RateLimited => (
            ErrorType::Provider,
            "Rate limit exceeded for AI provider",
            strings(&["Wait a moment and try again", "Switch to a local provider: vibecad provider ollama"]),
        ),
        ClientError::Http { .. } | ClientError::Transport(_) => (
            ErrorType::Provider,
            "The AI request failed",
            strings(&["Test the connection: vibecad test-connection", "Check the logs: vibecad log-status"]),
        ),
        ClientError::InvalidPayload { .. } => (
            ErrorType::Parse,
            "The model answered in an unexpected format",
            strings(&[
                "Try again, or rephrase the request",
                "Lower the temperature: vibecad temperature 0.1",
                "Use the offline parser: vibecad --no-ai <prompt>",
            ]),
        ),
    };
    UserFriendlyError::new(error_type, message.to_string())
        .with_suggestions(suggestions)
        .with_technical_details(error.to_string())
}

fn from_executor_error(error: &ExecutorError) -> UserFriendlyError {
    match error {
        ExecutorError::Empty | ExecutorError::TooLong { .. } | ExecutorError::Blocked { .. } => {
            UserFriendlyError::new(ErrorType::Validation, error.to_string()).with_suggestions(strings(&[
                "Scripts may only use App, FreeCAD and Part",
                "Files, imports and the network are not available to scripts",
            ]))
        }
        ExecutorError::Syntax(e) => UserFriendlyError::new(ErrorType::Syntax, format!("Invalid script at line {}", e.line))
            .with_suggestion("Check brackets, quotes and indentation around that line".to_string())
            .with_technical_details(e.to_string()),
        ExecutorError::Runtime(e) => {
            let hint = match e.kind {
                ErrorKind::Name => "Only App, FreeCAD, Part and a few builtins are defined",
                ErrorKind::Attribute => "Check the property name against the object type",
                ErrorKind::Limit => "The script ran too long; avoid large loops",
                _ => "Fix the failing statement and run the script again",
            };
            UserFriendlyError::new(ErrorType::Runtime, format!("Script failed at line {}", e.line))
                .with_suggestion(hint.to_string())
                .with_technical_details(e.to_string())
        }
    }
}

/// Convert errors into user-friendly errors with actionable suggestions.
/// Known error types are matched first, then the message text.
pub fn enhance_error(error: &anyhow::Error) -> UserFriendlyError {
    if let Some(e) = error.downcast_ref::<ClientError>() {
        return from_client_error(e);
    }
    if let Some(e) = error.downcast_ref::<ExecutorError>() {
        return from_executor_error(e);
    }
    if let Some(e) = error.downcast_ref::<DocumentError>() {
        return UserFriendlyError::new(ErrorType::Validation, e.to_string())
            .with_suggestion("Check the shape dimensions; all of them must be positive".to_string());
    }
    if error.downcast_ref::<AgentBusy>().is_some() {
        return UserFriendlyError::new(ErrorType::Provider, error.to_string())
            .with_suggestion("Wait for the current request to finish".to_string());
    }
    if let Some(e) = error.downcast_ref::<NormalizeError>() {
        return UserFriendlyError::new(ErrorType::Parse, "The text is not valid JSON".to_string())
            .with_technical_details(e.to_string());
    }

    let error_msg = error.to_string().to_lowercase();

    if error_msg.contains("connection refused") || error_msg.contains("failed to connect") {
        return UserFriendlyError::new(ErrorType::Connection, "Unable to connect to AI provider".to_string())
            .with_suggestions(strings(&[
                "Ensure Ollama is running: ollama serve",
                "Check if the service is accessible at the configured URL",
            ]))
            .with_technical_details(error.to_string());
    }

    if error_msg.contains("config") || error_msg.contains("settings") || error_msg.contains("must be") {
        return UserFriendlyError::new(ErrorType::Configuration, "Configuration issue detected".to_string())
            .with_suggestions(strings(&[
                "Check your settings: vibecad config",
                "Reset to defaults: vibecad reset",
            ]))
            .with_technical_details(error.to_string());
    }

    if error_msg.contains("timeout") || error_msg.contains("timed out") {
        return UserFriendlyError::new(ErrorType::Timeout, "Request timed out".to_string())
            .with_suggestions(strings(&["Try again", "Increase the timeout: vibecad timeout 240"]))
            .with_technical_details(error.to_string());
    }

    if error_msg.contains("permission denied") || error_msg.contains("access denied") {
        return UserFriendlyError::new(ErrorType::Permission, "Permission denied".to_string())
            .with_suggestions(strings(&[
                "Check file/directory permissions",
                "Ensure you have write access to the target location",
            ]))
            .with_technical_details(error.to_string());
    }

    if error_msg.contains("not found") || error_msg.contains("no such file") {
        return UserFriendlyError::new(ErrorType::NotFound, "File or resource not found".to_string())
            .with_suggestions(strings(&["Check if the file path is correct"]))
            .with_technical_details(error.to_string());
    }

    UserFriendlyError::new(ErrorType::General, "An unexpected error occurred".to_string())
        .with_suggestions(strings(&[
            "Try the command again",
            "Check the log for details: vibecad log-status",
        ]))
        .with_technical_details(error.to_string())
}

pub fn display_success(message: &str) {
    println!("{} {}", "✅".green(), message);
}

pub fn display_warning(message: &str) {
    println!("{} {}", "⚠️".yellow(), message.yellow());
}

pub fn display_info(message: &str) {
    println!("{} {}", "💡".cyan(), message.dimmed());
}

pub fn display_config_change(setting: &str, old_value: &str, new_value: &str) {
    println!("{} Configuration updated:", "✅".green());
    println!("  {}: {} → {}", setting.bold(), old_value.dimmed(), new_value.green().bold());
}

pub fn display_tip(message: &str) {
    println!("{} {}: {}", "💡".cyan(), "Tip".bold().cyan(), message.dimmed());
}

pub fn display_status(component: &str, status: &str, is_healthy: bool) {
    let icon = if is_healthy { "✅" } else { "❌" };
    let status_color = if is_healthy { status.green() } else { status.red() };
    println!("{} {}: {}", icon, component.bold(), status_color);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::GuardedExecutor;
    use crate::document::Workspace;
    use anyhow::anyhow;

    #[test]
    fn test_user_friendly_error_builders() {
        let error = UserFriendlyError::new(ErrorType::Configuration, "Config error".to_string())
            .with_suggestion("Try this".to_string())
            .with_technical_details("details".to_string());

        assert_eq!(error.suggestions, vec!["Try this"]);
        assert_eq!(error.technical_details.as_deref(), Some("details"));
        assert_eq!(format!("{}", error), "Config error");
    }

    #[test]
    fn test_enhance_client_errors() {
        let enhanced = enhance_error(&anyhow::Error::new(ClientError::Timeout { seconds: 120 }));
        assert_eq!(enhanced.error_type, ErrorType::Timeout);
        assert!(enhanced.technical_details.unwrap().contains("120 seconds"));

        let enhanced = enhance_error(&anyhow::Error::new(ClientError::ServiceUnavailable {
            base_url: "http://localhost:11434/v1".to_string(),
        }));
        assert_eq!(enhanced.error_type, ErrorType::Connection);
        assert!(enhanced.suggestions.iter().any(|s| s.contains("ollama serve")));

        let enhanced = enhance_error(&anyhow::Error::new(ClientError::InvalidPayload {
            reason: "bad".to_string(),
            excerpt: "x".to_string(),
        }));
        assert_eq!(enhanced.error_type, ErrorType::Parse);
    }

    #[test]
    fn test_enhance_executor_errors() {
        let executor = GuardedExecutor::new();
        let mut workspace = Workspace::new();

        let blocked = executor.run("import os", &mut workspace).unwrap_err();
        assert_eq!(enhance_error(&anyhow::Error::new(blocked)).error_type, ErrorType::Validation);

        let syntax = executor.run("x = (", &mut workspace).unwrap_err();
        let enhanced = enhance_error(&anyhow::Error::new(syntax));
        assert_eq!(enhanced.error_type, ErrorType::Syntax);
        assert_eq!(enhanced.message, "Invalid script at line 1");

        let runtime = executor.run("y = nothing", &mut workspace).unwrap_err();
        assert_eq!(enhance_error(&anyhow::Error::new(runtime)).error_type, ErrorType::Runtime);
    }

    #[test]
    fn test_enhance_busy_and_text_errors() {
        assert_eq!(enhance_error(&anyhow::Error::new(AgentBusy)).error_type, ErrorType::Provider);
        assert_eq!(enhance_error(&anyhow!("Permission denied")).error_type, ErrorType::Permission);
        assert_eq!(
            enhance_error(&anyhow!("timeout must be between 5 and 300 seconds")).error_type,
            ErrorType::Configuration
        );
        assert_eq!(enhance_error(&anyhow!("Some random error")).error_type, ErrorType::General);
    }
}
