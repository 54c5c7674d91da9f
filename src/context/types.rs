use crate::runner::types::TestId;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
    #[serde(alias = "fatal")]
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// 是否计入错误统计（ERROR / CRITICAL）
    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::INFO => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

/// 当前测试的属性，由引擎在创建上下文时填入
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestAttributes {
    pub id: TestId,
    pub tags: Vec<String>,
}

impl TestAttributes {
    pub fn new(id: TestId, tags: Vec<String>) -> Self {
        Self { id, tags }
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// 单条日志记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Local::now(),
        }
    }
}

/// 按写入顺序保存日志的共享容器
///
/// 测试上下文和捕获层（见 `logger::capture`）持有同一个 sink，
/// 因此直接调用 `ctx.debug()` 与代码里的 `tracing::info!()` 落在同一序列里。
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    /// 当前记录的快照
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取出全部记录，sink 变为空
    pub fn take(&self) -> Vec<LogRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// 测试过程中记录的产物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Artifact {
    /// 普通数据（字符串、数字、JSON 对象等）
    Primitive { value: serde_json::Value },

    /// 文件引用，`exists` 在写入上下文时检查
    Filename { value: PathBuf, exists: bool },
}

impl Artifact {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Artifact::Filename {
            value: path.into(),
            exists: false,
        }
    }

    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Artifact::Primitive { value } => Some(value),
            Artifact::Filename { .. } => None,
        }
    }
}

impl From<serde_json::Value> for Artifact {
    fn from(value: serde_json::Value) -> Self {
        Artifact::Primitive { value }
    }
}

impl From<&str> for Artifact {
    fn from(value: &str) -> Self {
        Artifact::Primitive {
            value: serde_json::Value::String(value.to_string()),
        }
    }
}

impl From<String> for Artifact {
    fn from(value: String) -> Self {
        Artifact::Primitive {
            value: serde_json::Value::String(value),
        }
    }
}

impl From<i64> for Artifact {
    fn from(value: i64) -> Self {
        Artifact::Primitive {
            value: value.into(),
        }
    }
}

impl From<bool> for Artifact {
    fn from(value: bool) -> Self {
        Artifact::Primitive {
            value: value.into(),
        }
    }
}

impl From<PathBuf> for Artifact {
    fn from(path: PathBuf) -> Self {
        Artifact::file(path)
    }
}

impl From<&std::path::Path> for Artifact {
    fn from(path: &std::path::Path) -> Self {
        Artifact::file(path)
    }
}
