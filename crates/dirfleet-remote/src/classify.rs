//! Standard-error classification
//!
//! Several tools report benign conditions on stderr. An allow-list maps known
//! substrings to a log level; everything else is logged at the severity the
//! caller chose. Classification never fails a step.

use dirfleet_core::LogLevel;

/// slaptest reports success on stderr
pub const CONFIG_TEST_SUCCEEDED: &str = "config file testing succeeded";

/// dsreplication when the base DN is already configured for replication
pub const NO_BASE_DNS_AVAILABLE: &str = "no base DNs available";

/// dsreplication re-run against an already replicated pair
pub const ALREADY_REPLICATED: &str = "is already replicated";

pub const ALREADY_ENABLED: &str = "already enabled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowRule {
    pub needle: String,
    pub level: LogLevel,
}

/// Ordered allow-list; the first matching rule wins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StderrAllowList {
    rules: Vec<AllowRule>,
}

impl StderrAllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules every remote command is classified with
    pub fn standard() -> Self {
        Self::new().with(CONFIG_TEST_SUCCEEDED, LogLevel::Success)
    }

    /// Rules for replication enable/initialize steps
    pub fn replication() -> Self {
        Self::standard()
            .with(NO_BASE_DNS_AVAILABLE, LogLevel::Debug)
            .with(ALREADY_REPLICATED, LogLevel::Debug)
            .with(ALREADY_ENABLED, LogLevel::Debug)
    }

    pub fn with(mut self, needle: impl Into<String>, level: LogLevel) -> Self {
        self.rules.push(AllowRule {
            needle: needle.into(),
            level,
        });
        self
    }

    pub fn rules(&self) -> &[AllowRule] {
        &self.rules
    }

    /// First rule whose needle occurs in `stderr`
    pub fn matching(&self, stderr: &str) -> Option<&AllowRule> {
        self.rules.iter().find(|rule| stderr.contains(&rule.needle))
    }

    pub fn is_allowed(&self, stderr: &str) -> bool {
        self.matching(stderr).is_some()
    }

    /// Log level for a stderr text
    pub fn classify(&self, stderr: &str, fallback: LogLevel) -> LogLevel {
        self.matching(stderr)
            .map(|rule| rule.level)
            .unwrap_or(fallback)
    }
}
