use crate::context::{Artifact, LogLevel, LogRecord, TestContext};
use crate::runner::outcome::{FailureDetail, TestOutcome, TestReturn};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// 加载失败时生成的合成结果使用的测试名
pub const LOAD_ERROR_TEST: &str = "<load>";

/// 测试标识：相对根目录的文件路径（`/` 分隔）+ 测试名
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestId {
    pub file: String,
    pub name: String,
}

impl TestId {
    pub fn new(file: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
        }
    }

    /// 耗时存储使用的 key：`<file>::<name>`
    pub fn key(&self) -> String {
        format!("{}::{}", self.file, self.name)
    }

    /// 文件路径或测试名包含 `pattern`
    pub fn matches(&self, pattern: &str) -> bool {
        self.file.contains(pattern) || self.name.contains(pattern)
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.file, self.name)
    }
}

/// 无参测试函数
pub type PlainFn = Box<dyn Fn() -> TestReturn>;

/// 接收上下文的测试函数
pub type ContextFn = Box<dyn Fn(&mut TestContext) -> TestReturn>;

/// 借用上下文的 future，不要求 `Send`
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// 异步测试函数
pub type AsyncFn = Box<dyn for<'a> Fn(&'a mut TestContext) -> LocalBoxFuture<'a, TestReturn>>;

/// 测试函数体；是否注入上下文由变体决定
///
/// 异步函数体在当前线程的 tokio 运行时上执行，每次调用新建一个运行时。
pub enum TestBody {
    Plain(PlainFn),
    WithContext(ContextFn),
    Async { body: AsyncFn, wants_context: bool },
}

impl TestBody {
    pub fn plain<F>(f: F) -> Self
    where
        F: Fn() -> TestReturn + 'static,
    {
        TestBody::Plain(Box::new(f))
    }

    pub fn with_context<F>(f: F) -> Self
    where
        F: Fn(&mut TestContext) -> TestReturn + 'static,
    {
        TestBody::WithContext(Box::new(f))
    }

    /// 不接收上下文的异步测试：`TestBody::async_plain(|| async { .. })`
    pub fn async_plain<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = TestReturn> + 'static,
    {
        Self::async_body(move |_ctx| Box::pin(f()), false)
    }

    /// 接收上下文的异步测试：`TestBody::async_with_context(|ctx| Box::pin(async move { .. }))`
    pub fn async_with_context<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut TestContext) -> LocalBoxFuture<'a, TestReturn> + 'static,
    {
        Self::async_body(f, true)
    }

    fn async_body<F>(f: F, wants_context: bool) -> Self
    where
        F: for<'a> Fn(&'a mut TestContext) -> LocalBoxFuture<'a, TestReturn> + 'static,
    {
        TestBody::Async {
            body: Box::new(f),
            wants_context,
        }
    }

    pub fn wants_context(&self) -> bool {
        match self {
            TestBody::Plain(_) => false,
            TestBody::WithContext(_) => true,
            TestBody::Async { wants_context, .. } => *wants_context,
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, TestBody::Async { .. })
    }

    /// 调用函数体；无参函数不会看到上下文
    pub(crate) fn call(&self, ctx: &mut TestContext) -> TestReturn {
        match self {
            TestBody::Plain(f) => f(),
            TestBody::WithContext(f) => f(ctx),
            TestBody::Async { body, .. } => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(body(ctx))
            }
        }
    }
}

impl fmt::Debug for TestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestBody::Plain(_) => f.write_str("TestBody::Plain"),
            TestBody::WithContext(_) => f.write_str("TestBody::WithContext"),
            TestBody::Async { wants_context, .. } => f
                .debug_struct("TestBody::Async")
                .field("wants_context", wants_context)
                .finish(),
        }
    }
}

/// 一个已发现、可独立运行的测试
#[derive(Debug)]
pub struct TestUnit {
    pub id: TestId,
    pub tags: Vec<String>,
    wants_context: bool,
    body: TestBody,
}

impl TestUnit {
    pub fn new(id: TestId, body: TestBody) -> Self {
        Self {
            id,
            tags: Vec::new(),
            wants_context: body.wants_context(),
            body,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// 发现时确定，之后不变
    pub fn wants_context(&self) -> bool {
        self.wants_context
    }

    /// 带有 `tags` 中的任意一个标签
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }

    pub(crate) fn body(&self) -> &TestBody {
        &self.body
    }
}

/// 测试状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Skip => "SKIP",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个测试的执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// 相对根目录的文件路径
    pub file: String,

    /// 测试名
    pub test: String,

    pub status: TestStatus,

    /// 执行耗时（秒）
    pub duration_s: f64,

    /// 测试期间的日志（按产生顺序）
    #[serde(default)]
    pub logs: Vec<LogRecord>,

    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,

    /// 失败详情（仅 fail）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,

    /// 跳过原因（仅 skip）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl TestResult {
    pub fn from_outcome(
        id: &TestId,
        outcome: TestOutcome,
        duration: Duration,
        logs: Vec<LogRecord>,
        artifacts: BTreeMap<String, Artifact>,
    ) -> Self {
        let (status, failure, skip_reason) = match outcome {
            TestOutcome::Passed => (TestStatus::Pass, None, None),
            TestOutcome::Failed(detail) => (TestStatus::Fail, Some(detail), None),
            TestOutcome::Skipped(reason) => (TestStatus::Skip, None, Some(reason)),
        };

        Self {
            file: id.file.clone(),
            test: id.name.clone(),
            status,
            duration_s: duration.as_secs_f64(),
            logs,
            artifacts,
            failure,
            skip_reason,
        }
    }

    /// 测试文件无法加载时的合成失败结果
    pub fn load_error(file: impl Into<String>, message: impl Into<String>) -> Self {
        let file = file.into();
        let message = message.into();
        Self {
            logs: vec![LogRecord::new(LogLevel::Error, message.clone())],
            failure: Some(FailureDetail::new(message).with_location(file.clone())),
            file,
            test: LOAD_ERROR_TEST.to_string(),
            status: TestStatus::Fail,
            duration_s: 0.0,
            artifacts: BTreeMap::new(),
            skip_reason: None,
        }
    }

    /// `<file>::<test>`
    pub fn key(&self) -> String {
        format!("{}::{}", self.file, self.test)
    }

    pub fn is_failed(&self) -> bool {
        self.status == TestStatus::Fail
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_s.max(0.0))
    }

    /// WARNING 日志条数
    pub fn warnings(&self) -> usize {
        self.logs
            .iter()
            .filter(|r| r.level == LogLevel::Warning)
            .count()
    }

    /// ERROR / CRITICAL 日志条数
    pub fn errors(&self) -> usize {
        self.logs.iter().filter(|r| r.level.is_error()).count()
    }
}

/// 测试摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub warnings: usize,
    pub errors: usize,
    #[serde(rename = "duration_s", serialize_with = "serialize_secs")]
    pub total_duration: Duration,
}

impl TestSummary {
    pub fn from_results(results: &[TestResult]) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();

        Self {
            total: results.len(),
            passed: count(TestStatus::Pass),
            failed: count(TestStatus::Fail),
            skipped: count(TestStatus::Skip),
            warnings: results.iter().map(TestResult::warnings).sum(),
            errors: results.iter().map(TestResult::errors).sum(),
            total_duration: results.iter().map(TestResult::duration).sum(),
        }
    }

    /// 通过的百分比，向下取整；分母包含跳过的测试，没有测试时为 0
    pub fn pass_percent(&self) -> usize {
        if self.total == 0 {
            return 0;
        }
        self.passed * 100 / self.total
    }

    /// 没有失败、警告和错误
    pub fn is_perfect(&self) -> bool {
        self.failed == 0 && self.warnings == 0 && self.errors == 0
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::outcome::TestSignal;

    fn result(status: TestStatus, levels: &[LogLevel]) -> TestResult {
        let outcome = match status {
            TestStatus::Pass => TestOutcome::Passed,
            TestStatus::Fail => TestOutcome::Failed(FailureDetail::new("boom")),
            TestStatus::Skip => TestOutcome::Skipped("later".to_string()),
        };
        let logs = levels.iter().map(|l| LogRecord::new(*l, "m")).collect();
        TestResult::from_outcome(
            &TestId::new("test_a.toml", "test_x"),
            outcome,
            Duration::from_millis(100),
            logs,
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_summary_counts() {
        let results = vec![
            result(TestStatus::Pass, &[LogLevel::Info, LogLevel::Warning]),
            result(TestStatus::Fail, &[LogLevel::Error, LogLevel::Critical]),
            result(TestStatus::Skip, &[]),
        ];

        let summary = TestSummary::from_results(&results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.warnings, 1);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.total_duration, Duration::from_millis(300));
        assert_eq!(summary.pass_percent(), 33);
        assert!(!summary.is_perfect());
    }

    #[test]
    fn test_summary_empty_is_perfect() {
        let summary = TestSummary::from_results(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.pass_percent(), 0);
        assert!(summary.is_perfect());
    }

    #[test]
    fn test_result_serialization() {
        let skipped = result(TestStatus::Skip, &[]);
        let json = serde_json::to_value(&skipped).unwrap();
        assert_eq!(json["status"], "skip");
        assert_eq!(json["skip_reason"], "later");
        assert!(json.get("failure").is_none());

        let failed = result(TestStatus::Fail, &[]);
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["failure"]["message"], "boom");
    }

    #[test]
    fn test_load_error_result() {
        let result = TestResult::load_error("broken/test_x.toml", "Invalid TOML");
        assert_eq!(result.test, LOAD_ERROR_TEST);
        assert!(result.is_failed());
        assert_eq!(result.key(), "broken/test_x.toml::<load>");
        assert_eq!(result.errors(), 1);
    }

    #[test]
    fn test_id_matches() {
        let id = TestId::new("sub/test_io.toml", "test_read");
        assert!(id.matches("sub/"));
        assert!(id.matches("read"));
        assert!(!id.matches("write"));
        assert_eq!(id.key(), "sub/test_io.toml::test_read");
    }

    #[test]
    fn test_unit_wants_context_from_body() {
        let plain = TestUnit::new(TestId::new("f", "a"), TestBody::plain(|| Ok(())));
        let with_ctx = TestUnit::new(
            TestId::new("f", "b"),
            TestBody::with_context(|ctx| {
                ctx.info("hi");
                Ok(())
            }),
        );
        assert!(!plain.wants_context());
        assert!(with_ctx.wants_context());
    }

    #[test]
    fn test_async_bodies() {
        let plain = TestBody::async_plain(|| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        });
        assert!(plain.is_async());
        assert!(!plain.wants_context());

        let with_ctx = TestBody::async_with_context(|ctx| {
            Box::pin(async move {
                ctx.info("before");
                tokio::task::yield_now().await;
                ctx.info("after");
                Err::<(), _>(TestSignal::fail("after await"))
            })
        });
        assert!(with_ctx.wants_context());

        let mut ctx = TestContext::new();
        assert!(plain.call(&mut ctx).is_ok());
        assert!(matches!(with_ctx.call(&mut ctx), Err(TestSignal::Fail(_))));
        assert_eq!(ctx.logs().len(), 2);
    }
}
