use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// Privacy-preserving file logger for vibecad
///
/// Prompts, generated code and model replies are never written in normal
/// mode. Only failures, retry attempts, timings and configuration changes
/// are recorded. Debug mode needs explicit consent and marks every entry.
pub struct PrivacyLogger {
    log_file_path: PathBuf,
    debug_mode: bool,
    debug_consent_given: bool,
    writer: Arc<Mutex<Option<fs::File>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    pub context: Option<LogContext>,
    pub is_debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

/// Subsystem an entry originates from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LogCategory {
    System,
    Configuration,
    Provider,
    Parser,
    Executor,
    Geometry,
    Safety,
    Debug,
}

/// Structured, privacy-safe context attached to an entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogContext {
    pub component: Option<String>,
    pub operation: Option<String>,
    pub duration_ms: Option<u64>,
    pub error_code: Option<String>,
    pub provider: Option<String>,
    pub attempt: Option<u32>,
    pub success: Option<bool>,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(mut self, component: &str) -> Self {
        self.component = Some(component.to_string());
        self
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error_code(mut self, error_code: &str) -> Self {
        self.error_code = Some(error_code.to_string());
        self
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    /// 1-based attempt counter for retried requests
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }
}

impl PrivacyLogger {
    /// Logger writing to `<config_dir>/vibecad/vibecad.log`
    pub fn new() -> Result<Self> {
        Self::at_path(Self::default_log_file_path()?)
    }

    /// Logger writing to an explicit file, creating its parent directory
    pub fn at_path(log_file_path: impl Into<PathBuf>) -> Result<Self> {
        let log_file_path = log_file_path.into();
        if let Some(parent) = log_file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(Self {
            log_file_path,
            debug_mode: false,
            debug_consent_given: false,
            writer: Arc::new(Mutex::new(None)),
        })
    }

    /// Restore consent recorded by an earlier run without re-announcing it
    pub fn with_debug_consent(mut self, consent_given: bool) -> Self {
        self.debug_mode = consent_given;
        self.debug_consent_given = consent_given;
        self
    }

    /// Enable debug mode; refuses without explicit consent
    pub fn enable_debug_mode(&mut self, consent_given: bool) -> Result<()> {
        if !consent_given {
            return Err(anyhow!("Debug mode requires explicit user consent"));
        }

        self.debug_mode = true;
        self.debug_consent_given = true;

        self.log_info(
            LogCategory::System,
            "Debug mode enabled with user consent".to_string(),
            None,
        )?;
        self.log_warning(
            LogCategory::Debug,
            "DEBUG MODE ACTIVE: prompts and model replies will be written to this file"
                .to_string(),
            None,
        )?;

        Ok(())
    }

    pub fn disable_debug_mode(&mut self) -> Result<()> {
        if self.debug_mode {
            self.log_info(LogCategory::System, "Debug mode disabled".to_string(), None)?;
        }

        self.debug_mode = false;
        self.debug_consent_given = false;
        Ok(())
    }

    pub fn log_error(
        &self,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        self.write_level(LogLevel::Error, category, &message, context)
    }

    pub fn log_warning(
        &self,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        self.write_level(LogLevel::Warning, category, &message, context)
    }

    pub fn log_info(
        &self,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        self.write_level(LogLevel::Info, category, &message, context)
    }

    /// Only written when debug mode is on with consent
    pub fn log_debug(
        &self,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        if !self.is_debug_mode() {
            return Ok(());
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Debug,
            category,
            message: format!("[DEBUG] {}", message),
            context,
            is_debug: true,
        };

        self.write_log_entry(&entry)
    }

    fn write_level(
        &self,
        level: LogLevel,
        category: LogCategory,
        message: &str,
        context: Option<LogContext>,
    ) -> Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            category,
            message: self.redact_sensitive_info(message),
            context,
            is_debug: false,
        };

        self.write_log_entry(&entry)
    }

    pub fn log_startup(&self, version: &str) -> Result<()> {
        let context = LogContext::new()
            .with_component("system")
            .with_operation("startup");

        self.log_info(
            LogCategory::System,
            format!("vibecad {} started", version),
            Some(context),
        )
    }

    pub fn log_config_change(&self, setting: &str, old_value: &str, new_value: &str) -> Result<()> {
        let context = LogContext::new()
            .with_component("configuration")
            .with_operation("update");

        let safe_old = self.redact_config_value(setting, old_value);
        let safe_new = self.redact_config_value(setting, new_value);

        self.log_info(
            LogCategory::Configuration,
            format!(
                "Configuration updated: {} changed from {} to {}",
                setting, safe_old, safe_new
            ),
            Some(context),
        )
    }

    /// One chat request attempt against the model endpoint
    pub fn log_provider_attempt(
        &self,
        provider: &str,
        attempt: u32,
        duration_ms: u64,
        failure: Option<&str>,
    ) -> Result<()> {
        let success = failure.is_none();
        let mut context = LogContext::new()
            .with_component("provider")
            .with_operation("chat")
            .with_provider(provider)
            .with_attempt(attempt)
            .with_duration_ms(duration_ms)
            .with_success(success);
        if let Some(code) = failure {
            context = context.with_error_code(code);
        }

        let (level, message) = match failure {
            None => (
                LogLevel::Info,
                format!("Provider {} chat: success ({}ms)", provider, duration_ms),
            ),
            Some(code) => (
                LogLevel::Warning,
                format!(
                    "Provider {} chat attempt {} failed: {} ({}ms)",
                    provider, attempt, code, duration_ms
                ),
            ),
        };

        self.write_level(level, LogCategory::Provider, &message, Some(context))
    }

    /// Geometry created in a document; names and kinds only
    pub fn log_geometry(&self, operation: &str, object: &str, type_id: &str) -> Result<()> {
        let context = LogContext::new()
            .with_component("document")
            .with_operation(operation);

        self.log_info(
            LogCategory::Geometry,
            format!("{} {} ({})", operation, object, type_id),
            Some(context),
        )
    }

    /// A script rejected before or during execution
    pub fn log_guard_decision(&self, rule: &str, severity: &str, details: Option<&str>) -> Result<()> {
        let context = LogContext::new()
            .with_component("executor")
            .with_operation(rule);

        let level = match severity.to_lowercase().as_str() {
            "high" | "critical" => LogLevel::Error,
            "medium" | "warning" => LogLevel::Warning,
            _ => LogLevel::Info,
        };

        let message = match details {
            Some(details) => format!("Guard {}: {} severity ({})", rule, severity, details),
            None => format!("Guard {}: {} severity", rule, severity),
        };

        self.write_level(level, LogCategory::Safety, &message, Some(context))
    }

    fn default_log_file_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not find config directory"))?;

        Ok(config_dir.join("vibecad").join("vibecad.log"))
    }

    fn write_log_entry(&self, entry: &LogEntry) -> Result<()> {
        let mut writer_guard = self
            .writer
            .lock()
            .map_err(|_| anyhow!("Failed to acquire log writer lock"))?;

        if writer_guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file_path)?;
            *writer_guard = Some(file);
        }

        if let Some(ref mut file) = *writer_guard {
            writeln!(file, "{}", self.format_log_entry(entry))?;
            file.flush()?;
        }

        Ok(())
    }

    fn format_log_entry(&self, entry: &LogEntry) -> String {
        let timestamp = entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC");
        let level = format!("{:?}", entry.level).to_uppercase();
        let category = format!("{:?}", entry.category).to_uppercase();

        let mut formatted = format!("[{}] {} {} {}", timestamp, level, category, entry.message);

        if let Some(ref context) = entry.context {
            let mut parts = Vec::new();

            if let Some(ref component) = context.component {
                parts.push(format!("component={}", component));
            }
            if let Some(ref operation) = context.operation {
                parts.push(format!("operation={}", operation));
            }
            if let Some(duration) = context.duration_ms {
                parts.push(format!("duration={}ms", duration));
            }
            if let Some(ref error_code) = context.error_code {
                parts.push(format!("error={}", error_code));
            }
            if let Some(ref provider) = context.provider {
                parts.push(format!("provider={}", provider));
            }
            if let Some(attempt) = context.attempt {
                parts.push(format!("attempt={}", attempt));
            }
            if let Some(success) = context.success {
                parts.push(format!("success={}", success));
            }

            if !parts.is_empty() {
                formatted.push_str(&format!(" [{}]", parts.join(", ")));
            }
        }

        if entry.is_debug {
            formatted = format!("DEBUG: {}", formatted);
        }

        formatted
    }

    fn redact_sensitive_info(&self, message: &str) -> String {
        if self.debug_mode {
            return message.to_string();
        }

        let rules = redaction_rules();
        let mut redacted = message.to_string();
        for (pattern, replacement) in rules.iter() {
            redacted = pattern.replace_all(&redacted, *replacement).to_string();
        }
        redacted
    }

    fn redact_config_value(&self, setting: &str, value: &str) -> String {
        match setting.to_lowercase().as_str() {
            "api_key" | "token" | "password" | "secret" => "[REDACTED]".to_string(),
            "base_url" if value.contains('@') => Regex::new(r"://[^@]+@")
                .map(|re| re.replace_all(value, "://[REDACTED]@").to_string())
                .unwrap_or_else(|_| "[REDACTED]".to_string()),
            _ => value.to_string(),
        }
    }

    pub fn is_debug_mode(&self) -> bool {
        self.debug_mode && self.debug_consent_given
    }

    pub fn get_current_log_path(&self) -> &Path {
        &self.log_file_path
    }

    pub fn clear_logs(&self) -> Result<()> {
        {
            let mut writer_guard = self
                .writer
                .lock()
                .map_err(|_| anyhow!("Failed to acquire log writer lock"))?;
            *writer_guard = None;
        }

        if self.log_file_path.exists() {
            fs::remove_file(&self.log_file_path)?;
        }

        self.log_info(LogCategory::System, "Log file cleared".to_string(), None)
    }
}

fn redaction_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"/home/[^/\s]+", "/home/[USER]"),
            (r"/Users/[^/\s]+", "/Users/[USER]"),
            (r"api_key=\S+", "api_key=[REDACTED]"),
            (r"Bearer\s+\S+", "Bearer [REDACTED]"),
            (r"x-api-key:\s*\S+", "x-api-key: [REDACTED]"),
            (r"token=\S+", "token=[REDACTED]"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|re| (re, replacement))
        })
        .collect()
    })
}

static GLOBAL_LOGGER: OnceLock<Arc<Mutex<PrivacyLogger>>> = OnceLock::new();

/// Install the process-wide logger at the default location, with debug
/// mode on when consent was saved in the settings
pub fn init_logger(debug_consent: bool) -> Result<()> {
    let logger = PrivacyLogger::new()?.with_debug_consent(debug_consent);
    let _ = GLOBAL_LOGGER.set(Arc::new(Mutex::new(logger)));
    Ok(())
}

pub fn get_logger() -> Result<Arc<Mutex<PrivacyLogger>>> {
    GLOBAL_LOGGER
        .get()
        .cloned()
        .ok_or_else(|| anyhow!("Logger not initialized. Call init_logger() first."))
}

#[macro_export]
macro_rules! log_error {
    ($category:expr, $message:expr) => {
        $crate::logging::with_logger(|l| l.log_error($category, $message.to_string(), None))
    };
    ($category:expr, $message:expr, $context:expr) => {
        $crate::logging::with_logger(|l| l.log_error($category, $message.to_string(), Some($context)))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($category:expr, $message:expr) => {
        $crate::logging::with_logger(|l| l.log_warning($category, $message.to_string(), None))
    };
    ($category:expr, $message:expr, $context:expr) => {
        $crate::logging::with_logger(|l| l.log_warning($category, $message.to_string(), Some($context)))
    };
}

#[macro_export]
macro_rules! log_info {
    ($category:expr, $message:expr) => {
        $crate::logging::with_logger(|l| l.log_info($category, $message.to_string(), None))
    };
    ($category:expr, $message:expr, $context:expr) => {
        $crate::logging::with_logger(|l| l.log_info($category, $message.to_string(), Some($context)))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($category:expr, $message:expr) => {
        $crate::logging::with_logger(|l| l.log_debug($category, $message.to_string(), None))
    };
}

/// Run a closure against the global logger, ignoring a missing logger
pub fn with_logger<F>(f: F)
where
    F: FnOnce(&PrivacyLogger) -> Result<()>,
{
    if let Ok(logger) = get_logger() {
        if let Ok(guard) = logger.lock() {
            let _ = f(&guard);
        }
    }
}
