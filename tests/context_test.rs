use rutest::context::{LogLevel, TestAttributes};
use rutest::runner::{
    RunOptions, TestBody, TestId, TestLoader, TestRunner, TestSignal, TestStatus, TestUnit,
};
use rutest::TestContext;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// 测试里共享的模拟数据库
#[derive(Debug, Default)]
struct FakeDb {
    label: String,
    queries: Vec<String>,
}

/// 给上下文加上数据库相关的便捷方法
trait DbContext {
    fn query(&mut self, sql: &str) -> Option<usize>;
}

impl DbContext for TestContext {
    fn query(&mut self, sql: &str) -> Option<usize> {
        let label = self.state::<FakeDb>()?.label.clone();
        self.debug(format!("[{}] {}", label, sql));
        let db = self.state_mut::<FakeDb>()?;
        db.queries.push(sql.to_string());
        Some(db.queries.len())
    }
}

struct AsyncLoader;

impl TestLoader for AsyncLoader {
    fn accepts(&self, _path: &Path) -> bool {
        true
    }

    fn load(&self, _path: &Path, relative: &str) -> rutest::Result<Vec<TestUnit>> {
        let id = |name: &str| TestId::new(relative, name);
        Ok(vec![
            TestUnit::new(
                id("test_async_sleep"),
                TestBody::async_with_context(|ctx| {
                    Box::pin(async move {
                        ctx.debug("starting");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        let value = async { 42 }.await;
                        ctx.debug(format!("computed {}", value));
                        assert_eq!(value, 42);
                        Ok(())
                    })
                }),
            ),
            TestUnit::new(
                id("test_async_plain_panics"),
                TestBody::async_plain(|| async {
                    tokio::task::yield_now().await;
                    assert_eq!(1 + 1, 3, "async assertion");
                    Ok(())
                }),
            ),
            TestUnit::new(
                id("test_attributes"),
                TestBody::with_context(|ctx| {
                    let Some(test) = ctx.test().cloned() else {
                        return Err(TestSignal::fail("no test attributes"));
                    };
                    ctx.info(format!("tags: {}", test.tags.join(",")));
                    if !test.has_tag("weekly") {
                        return Err(ctx.skip_test("not a weekly run"));
                    }
                    Ok(())
                }),
            )
            .with_tags(vec!["weekly".to_string(), "fast".to_string()]),
            TestUnit::new(
                id("test_db_usage"),
                TestBody::with_context(|ctx| {
                    if ctx.state::<FakeDb>().is_none() {
                        return Err(ctx.skip_test("no database in this context"));
                    }
                    assert_eq!(ctx.query("SELECT 1"), Some(1));
                    assert_eq!(ctx.query("SELECT 2"), Some(2));
                    Ok(())
                }),
            ),
        ])
    }
}

fn root() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("test_async.rs"), "").unwrap();
    temp_dir
}

fn options(root: &Path) -> RunOptions {
    let mut options = RunOptions::new(root);
    options.persist_durations = false;
    options
}

#[test]
fn test_async_units() {
    let root = root();
    let results = TestRunner::empty()
        .with_loader(AsyncLoader)
        .run(&options(root.path()))
        .unwrap();

    let sleep = &results[0];
    assert_eq!(sleep.status, TestStatus::Pass);
    assert!(sleep.duration_s >= 0.045);
    let messages: Vec<_> = sleep.logs.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, vec!["starting", "computed 42"]);

    let panicked = &results[1];
    assert_eq!(panicked.status, TestStatus::Fail);
    assert!(
        panicked
            .failure
            .as_ref()
            .unwrap()
            .message
            .contains("async assertion")
    );
}

#[test]
fn test_context_exposes_test_attributes() {
    let root = root();
    let results = TestRunner::empty()
        .with_loader(AsyncLoader)
        .run(&options(root.path()))
        .unwrap();

    let attributes = &results[2];
    assert_eq!(attributes.status, TestStatus::Pass);
    assert_eq!(attributes.logs[0].message, "tags: weekly,fast");
}

#[test]
fn test_default_context_has_no_state() {
    let root = root();
    let results = TestRunner::empty()
        .with_loader(AsyncLoader)
        .run(&options(root.path()))
        .unwrap();

    assert_eq!(results[3].status, TestStatus::Skip);
}

#[test]
fn test_context_factory_provides_state() {
    let root = root();
    let runner = TestRunner::empty()
        .with_loader(AsyncLoader)
        .with_context_factory(|test: &TestAttributes| {
            TestContext::new().with_state(FakeDb {
                label: format!("db:{}", test.name()),
                ..FakeDb::default()
            })
        });

    let results = runner.run(&options(root.path())).unwrap();
    let db = &results[3];
    assert_eq!(db.status, TestStatus::Pass);
    assert_eq!(db.logs.len(), 2);
    assert_eq!(db.logs[0].level, LogLevel::Debug);
    assert_eq!(db.logs[0].message, "[db:test_db_usage] SELECT 1");

    // 其他测试不受影响
    assert_eq!(results[0].status, TestStatus::Pass);
    assert_eq!(results[2].status, TestStatus::Pass);
}

#[test]
fn test_panicking_context_factory_fails_unit() {
    let root = root();
    let runner = TestRunner::empty()
        .with_loader(AsyncLoader)
        .with_context_factory(|test: &TestAttributes| {
            if test.name() == "test_db_usage" {
                panic!("database unavailable");
            }
            TestContext::new()
        });

    let results = runner.run(&options(root.path())).unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(results[3].status, TestStatus::Fail);
    assert!(
        results[3]
            .failure
            .as_ref()
            .unwrap()
            .message
            .contains("database unavailable")
    );
    assert_eq!(results[0].status, TestStatus::Pass);
}
