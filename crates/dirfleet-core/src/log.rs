//! タスク単位のログストリーム
//!
//! パイプラインの進捗はすべて `(task_id, server_id, level, message)` として
//! `LogSink` に流す。呼び出し元へのエラー通知はこのストリームと成功フラグのみ。

use crate::model::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// パイプライン実行を識別するタスク ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// 新しいタスク ID を払い出す
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ログレベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// ログエントリ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub task_id: TaskId,
    pub server_id: Option<NodeId>,
    pub level: LogLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// ログの出力先
pub trait LogSink: Send + Sync {
    fn log(&self, entry: LogEntry);
}

/// `tracing` へ転送するシンク
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, entry: LogEntry) {
        let task = entry.task_id.as_str();
        let server = entry.server_id.map(|id| id.0);
        match entry.level {
            LogLevel::Debug => tracing::debug!(task, server, "{}", entry.message),
            LogLevel::Info | LogLevel::Success => {
                tracing::info!(task, server, level = %entry.level, "{}", entry.message)
            }
            LogLevel::Warning => tracing::warn!(task, server, "{}", entry.message),
            LogLevel::Error => tracing::error!(task, server, "{}", entry.message),
        }
    }
}

/// メモリに保持するシンク（ステータス照会・テスト用）
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// 指定タスクのエントリ
    pub fn for_task(&self, task_id: &TaskId) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| &e.task_id == task_id)
            .collect()
    }

    /// 指定レベルのメッセージに `needle` を含むものがあるか
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// 複数のシンクへ同時に流す
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl LogSink for FanoutSink {
    fn log(&self, entry: LogEntry) {
        for sink in &self.sinks {
            sink.log(entry.clone());
        }
    }
}

/// タスク ID を束縛したロガー
#[derive(Clone)]
pub struct TaskLogger {
    task_id: TaskId,
    sink: Arc<dyn LogSink>,
}

impl TaskLogger {
    pub fn new(task_id: TaskId, sink: Arc<dyn LogSink>) -> Self {
        Self { task_id, sink }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn log(&self, server_id: Option<NodeId>, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogEntry {
            task_id: self.task_id.clone(),
            server_id,
            level,
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn debug(&self, server_id: Option<NodeId>, message: impl Into<String>) {
        self.log(server_id, LogLevel::Debug, message);
    }

    pub fn info(&self, server_id: Option<NodeId>, message: impl Into<String>) {
        self.log(server_id, LogLevel::Info, message);
    }

    pub fn success(&self, server_id: Option<NodeId>, message: impl Into<String>) {
        self.log(server_id, LogLevel::Success, message);
    }

    pub fn warning(&self, server_id: Option<NodeId>, message: impl Into<String>) {
        self.log(server_id, LogLevel::Warning, message);
    }

    pub fn error(&self, server_id: Option<NodeId>, message: impl Into<String>) {
        self.log(server_id, LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_logger_writes_to_sink() {
        let memory = MemorySink::new();
        let logger = TaskLogger::new(TaskId::from("task-1"), Arc::new(memory.clone()));

        logger.info(None, "start");
        logger.success(Some(NodeId(2)), "installed");
        logger.error(Some(NodeId(2)), "boom");

        let entries = memory.for_task(&TaskId::from("task-1"));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].server_id, Some(NodeId(2)));
        assert_eq!(entries[1].level, LogLevel::Success);
        assert!(memory.contains(LogLevel::Error, "boom"));
        assert!(!memory.contains(LogLevel::Warning, "boom"));
        assert!(memory.for_task(&TaskId::from("other")).is_empty());
    }

    #[test]
    fn test_fanout_sink() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let fanout = FanoutSink::new()
            .with(Arc::new(a.clone()))
            .with(Arc::new(b.clone()));
        let logger = TaskLogger::new(TaskId::new(), Arc::new(fanout));
        logger.warning(None, "careful");
        assert_eq!(a.entries().len(), 1);
        assert_eq!(b.entries().len(), 1);
    }

    #[test]
    fn test_task_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn test_level_serialization() {
        assert_eq!(
            serde_json::to_string(&LogLevel::Warning).unwrap(),
            "\"warning\""
        );
    }
}
