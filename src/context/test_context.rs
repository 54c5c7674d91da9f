use crate::context::types::{Artifact, LogLevel, LogRecord, LogSink, TestAttributes};
use crate::logger::capture::CONTEXT_TARGET;
use crate::runner::outcome::TestSignal;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 每个测试调用独享的上下文：收集日志和产物
///
/// 上下文不在测试之间复用，也不要求线程安全：
/// 同一时刻只服务于一个测试函数。
///
/// 需要额外资源（连接、客户端等）时，用 `TestRunner::with_context_factory`
/// 在创建上下文时放入按类型索引的状态，测试中通过 `state::<T>()` 取回。
#[derive(Debug)]
pub struct TestContext {
    sink: LogSink,
    artifacts: BTreeMap<String, Artifact>,
    start: Instant,
    args: Vec<String>,
    fatal: Option<String>,
    test: Option<TestAttributes>,
    state: HashMap<TypeId, Box<dyn Any>>,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            sink: LogSink::new(),
            artifacts: BTreeMap::new(),
            start: Instant::now(),
            args: Vec::new(),
            fatal: None,
            test: None,
            state: HashMap::new(),
        }
    }

    /// 附加本次运行的额外参数（`rutest -- ...`）
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_test(mut self, test: TestAttributes) -> Self {
        self.test = Some(test);
        self
    }

    pub fn with_state<T: Any>(mut self, value: T) -> Self {
        self.insert_state(value);
        self
    }

    /// 放入一个状态值，返回同类型的旧值
    pub fn insert_state<T: Any>(&mut self, value: T) -> Option<T> {
        self.state
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn state<T: Any>(&self) -> Option<&T> {
        self.state
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn state_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.state
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    /// 正在运行的测试；独立创建的上下文为 None
    pub fn test(&self) -> Option<&TestAttributes> {
        self.test.as_ref()
    }

    pub fn debug(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        debug!(target: CONTEXT_TARGET, "{}", msg);
        self.push(LogLevel::Debug, msg);
    }

    pub fn info(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        info!(target: CONTEXT_TARGET, "{}", msg);
        self.push(LogLevel::Info, msg);
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!(target: CONTEXT_TARGET, "{}", msg);
        self.push(LogLevel::Warning, msg);
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        error!(target: CONTEXT_TARGET, "{}", msg);
        self.push(LogLevel::Error, msg);
    }

    /// 记录 CRITICAL 日志，并把当前测试标记为失败（无需 panic）
    pub fn fatal(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        error!(target: CONTEXT_TARGET, fatal = true, "{}", msg);
        if self.fatal.is_none() {
            self.fatal = Some(msg.clone());
        }
        self.push(LogLevel::Critical, msg);
    }

    /// 按日志级别记录
    pub fn log(&mut self, level: LogLevel, msg: impl Into<String>) {
        match level {
            LogLevel::Debug => self.debug(msg),
            LogLevel::Info => self.info(msg),
            LogLevel::Warning => self.warn(msg),
            LogLevel::Error => self.error(msg),
            LogLevel::Critical => self.fatal(msg),
        }
    }

    /// 记录产物，同名 key 会被覆盖
    ///
    /// 文件类产物会检查路径是否存在：不存在时只记录 warn，仍然保存该产物。
    pub fn add_artifact(&mut self, key: impl Into<String>, value: impl Into<Artifact>) {
        let key = key.into();
        let artifact = match value.into() {
            Artifact::Filename { value: path, .. } => {
                let exists = path.is_file();
                if exists {
                    self.debug(format!("Artifact file '{}' exists.", path.display()));
                } else {
                    self.warn(format!("Artifact file '{}' does NOT exist.", path.display()));
                }
                Artifact::Filename {
                    value: path,
                    exists,
                }
            }
            primitive => primitive,
        };
        self.artifacts.insert(key, artifact);
    }

    /// 生成跳过信号，调用方应直接 `return Err(ctx.skip_test(..))`
    pub fn skip_test(&mut self, reason: impl Into<String>) -> TestSignal {
        let reason = reason.into();
        self.info(format!("Skipping test: {}", reason));
        TestSignal::Skip(reason)
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.sink.snapshot()
    }

    pub fn artifacts(&self) -> &BTreeMap<String, Artifact> {
        &self.artifacts
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    /// 第一条 fatal 消息
    pub fn fatal_message(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// 捕获层写入的 sink（与上下文共享）
    pub(crate) fn sink(&self) -> &LogSink {
        &self.sink
    }

    /// 拆出日志与产物，用于构建测试结果
    pub(crate) fn into_parts(self) -> (Vec<LogRecord>, BTreeMap<String, Artifact>) {
        (self.sink.take(), self.artifacts)
    }

    fn push(&mut self, level: LogLevel, msg: String) {
        self.sink.push(LogRecord::new(level, msg));
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
