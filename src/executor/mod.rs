//! Guarded execution of geometry scripts.
//!
//! A snippet passes three gates before it touches a document: size and
//! deny-list checks on the raw text, a syntax check, and then the
//! interpreter itself, which only knows the geometry namespace.

pub mod interpreter;
pub mod parser;

use regex::{Regex, RegexBuilder};
use std::fmt;

use crate::document::Workspace;
use crate::log_warning;
use crate::logging::{with_logger, LogCategory, LogContext};
use crate::normalizer::normalize_code;

pub use interpreter::{ErrorKind, Interpreter, RuntimeError, Value};
pub use parser::{Program, SyntaxError};

pub const MAX_CODE_LENGTH: usize = 5000;
pub const DEFAULT_STATEMENT_BUDGET: usize = 100_000;

/// Deny-list rule with the text shown to the user when it fires
struct DenyRule {
    pattern: Regex,
    source: &'static str,
}

const DENY_PATTERNS: [&str; 18] = [
    r"\bimport\b",
    r"\bfrom\s+\S+\s+import\b",
    r"__\w+__",
    r"\beval\s*\(",
    r"\bexec\s*\(",
    r"\bopen\s*\(",
    r"\bos\.",
    r"\bsys\.",
    r"\bsubprocess\b",
    r"\bsocket\b",
    r"\brequests?\b",
    r"\burllib\b",
    r"\bhttpx\b",
    r"\bctypes\b",
    r"\bpathlib\b",
    r"\bshutil\b",
    r"\bthreading\b",
    r"\basyncio\b",
];

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorError {
    Empty,
    TooLong { length: usize, max: usize },
    Blocked { pattern: String },
    Syntax(SyntaxError),
    Runtime(RuntimeError),
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty or invalid code snippet."),
            Self::TooLong { length, max } => write!(f, "Code too long ({} chars > {}).", length, max),
            Self::Blocked { pattern } => write!(f, "Blocked unsafe code by rule: /{}/", pattern),
            Self::Syntax(e) => write!(f, "{}", e),
            Self::Runtime(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ExecutorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Syntax(e) => Some(e),
            Self::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SyntaxError> for ExecutorError {
    fn from(e: SyntaxError) -> Self {
        Self::Syntax(e)
    }
}

impl From<RuntimeError> for ExecutorError {
    fn from(e: RuntimeError) -> Self {
        Self::Runtime(e)
    }
}

pub struct GuardedExecutor {
    rules: Vec<DenyRule>,
    max_length: usize,
    statement_budget: usize,
    strip_imports: bool,
}

impl Default for GuardedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardedExecutor {
    pub fn new() -> Self {
        let rules = DENY_PATTERNS
            .iter()
            .map(|&source| DenyRule {
                pattern: RegexBuilder::new(source)
                    .case_insensitive(true)
                    .multi_line(true)
                    .build()
                    .unwrap(),
                source,
            })
            .collect();

        Self {
            rules,
            max_length: MAX_CODE_LENGTH,
            statement_budget: DEFAULT_STATEMENT_BUDGET,
            strip_imports: false,
        }
    }

    pub fn with_statement_budget(mut self, budget: usize) -> Self {
        self.statement_budget = budget;
        self
    }

    /// Drop `import` lines during normalization instead of rejecting them.
    /// Model output routinely opens with `import FreeCAD as App`; the
    /// namespace already provides those modules.
    pub fn with_import_stripping(mut self, strip: bool) -> Self {
        self.strip_imports = strip;
        self
    }

    /// Size and deny-list checks on already-normalized text
    pub fn assert_safe(&self, code: &str) -> Result<(), ExecutorError> {
        if code.trim().is_empty() {
            return Err(ExecutorError::Empty);
        }

        let length = code.chars().count();
        if length > self.max_length {
            with_logger(|l| l.log_guard_decision("max_length", "medium", Some(length.to_string().as_str())));
            return Err(ExecutorError::TooLong {
                length,
                max: self.max_length,
            });
        }

        if let Some(rule) = self.rules.iter().find(|r| r.pattern.is_match(code)) {
            with_logger(|l| l.log_guard_decision("deny_list", "high", Some(rule.source)));
            return Err(ExecutorError::Blocked {
                pattern: rule.source.to_string(),
            });
        }
        Ok(())
    }

    pub fn check_syntax(&self, code: &str) -> Result<Program, ExecutorError> {
        parser::parse(code).map_err(|e| {
            with_logger(|l| l.log_guard_decision("syntax", "low", Some(format!("line {}", e.line).as_str())));
            ExecutorError::Syntax(e)
        })
    }

    /// Normalize and run every static check, returning the cleaned code
    /// and its parsed form.
    pub fn prepare(&self, code: &str) -> Result<(String, Program), ExecutorError> {
        let code = normalize_code(code, self.strip_imports);
        self.assert_safe(&code)?;
        let program = self.check_syntax(&code)?;
        Ok((code, program))
    }

    pub fn run(&self, code: &str, workspace: &mut Workspace) -> Result<(), ExecutorError> {
        let (_, program) = self.prepare(code)?;

        let mut interpreter = Interpreter::new(workspace, self.statement_budget);
        interpreter.run(&program).map_err(|e| {
            log_warning!(
                LogCategory::Executor,
                format!("Script failed at line {}", e.line),
                LogContext::new()
                    .with_component("executor")
                    .with_error_code(&format!("{:?}", e.kind))
            );
            ExecutorError::Runtime(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_oversized() {
        let executor = GuardedExecutor::new();
        let mut workspace = Workspace::new();

        assert_eq!(executor.run("   \n", &mut workspace), Err(ExecutorError::Empty));
        assert_eq!(executor.run("```python\n```", &mut workspace), Err(ExecutorError::Empty));

        let long = "x = 1\n".repeat(1000);
        let err = executor.run(&long, &mut workspace).unwrap_err();
        assert!(matches!(err, ExecutorError::TooLong { max: 5000, .. }));
        assert!(err.to_string().starts_with("Code too long ("));
    }

    #[test]
    fn test_length_limit_boundary() {
        let executor = GuardedExecutor::new();
        let body = "x = 1\n".repeat(832);

        let at_limit = format!("{}y = 1234", body);
        assert_eq!(at_limit.len(), 5000);
        executor.run(&at_limit, &mut Workspace::new()).unwrap();

        let over = format!("{}y = 12345", body);
        assert_eq!(
            executor.run(&over, &mut Workspace::new()),
            Err(ExecutorError::TooLong { length: 5001, max: 5000 })
        );
    }

    #[test]
    fn test_hostile_scripts_fail_cleanly() {
        let executor = GuardedExecutor::new();

        for code in [
            "s = 'ab' * 1e19",
            "r = range(-1e30, 1e30)",
            "a = [1]\nfor i in range(40):\n    a = a + a\n",
            "a = []\nfor i in range(100):\n    a = [a, a]\n",
        ] {
            let err = executor.run(code, &mut Workspace::new()).unwrap_err();
            assert!(matches!(err, ExecutorError::Runtime(_)), "{} gave {:?}", code, err);
        }

        let deep = format!("x = {}1", "-".repeat(4900));
        let err = executor.run(&deep, &mut Workspace::new()).unwrap_err();
        assert!(matches!(err, ExecutorError::Syntax(_)));
    }

    #[test]
    fn test_deny_list() {
        let executor = GuardedExecutor::new();
        let mut workspace = Workspace::new();

        let err = executor.run("import os\nos.system('ls')", &mut workspace).unwrap_err();
        assert_eq!(err.to_string(), r"Blocked unsafe code by rule: /\bimport\b/");

        for code in [
            "x = __builtins__",
            "EVAL ('1')",
            "f = open('/etc/passwd')",
            "r = requests",
            "os.remove('x')",
        ] {
            assert!(
                matches!(executor.assert_safe(code), Err(ExecutorError::Blocked { .. })),
                "{} should be blocked",
                code
            );
        }

        assert!(executor.assert_safe("important = 1\nopened = 2").is_ok());
        assert!(workspace.documents().is_empty());
    }

    #[test]
    fn test_import_stripping_still_guards_usage() {
        let executor = GuardedExecutor::new().with_import_stripping(true);
        let mut workspace = Workspace::new();

        executor
            .run("import FreeCAD as App\nimport Part\ndoc = App.newDocument()\n", &mut workspace)
            .unwrap();
        assert_eq!(workspace.documents().len(), 1);

        let err = executor.run("import os\nos.getcwd()", &mut workspace).unwrap_err();
        assert!(matches!(err, ExecutorError::Blocked { .. }));
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let executor = GuardedExecutor::new();
        let err = executor.run("x = 1\ny = (2 +", &mut Workspace::new()).unwrap_err();

        match err {
            ExecutorError::Syntax(e) => assert_eq!(e.line, 2),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_runtime_error_passes_through() {
        let executor = GuardedExecutor::new();
        let err = executor.run("x = 1\nbox = undefined_thing", &mut Workspace::new()).unwrap_err();

        assert_eq!(err.to_string(), "line 2: NameError: name 'undefined_thing' is not defined");
    }

    #[test]
    fn test_runs_fenced_script() {
        let executor = GuardedExecutor::new();
        let mut workspace = Workspace::new();
        let code = "```python\ndoc = App.newDocument('Gear')\n\
                    for i in range(4):\n    b = doc.addObject('Part::Box', 'Tooth')\n    b.Placement.Base.x = i * 12\n\
                    doc.recompute()\n```";

        executor.run(code, &mut workspace).unwrap();

        let doc = workspace.active_document().unwrap();
        assert_eq!(doc.name, "Gear");
        assert_eq!(doc.object_names(), vec!["Tooth", "Tooth001", "Tooth002", "Tooth003"]);
        assert_eq!(doc.get_object("Tooth003").unwrap().placement.base.x, 36.0);
    }

    #[test]
    fn test_statement_budget() {
        let executor = GuardedExecutor::new().with_statement_budget(50);
        let err = executor
            .run("n = 0\nfor i in range(1000):\n    n += 1\n", &mut Workspace::new())
            .unwrap_err();

        match err {
            ExecutorError::Runtime(e) => assert_eq!(e.kind, ErrorKind::Limit),
            other => panic!("expected budget error, got {:?}", other),
        }
    }
}
