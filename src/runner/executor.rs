use crate::Result;
use crate::context::{TestAttributes, TestContext};
use crate::error::RutestError;
use crate::logger::CaptureHandle;
use crate::runner::discovery::{self, DEFAULT_EXCLUDE, TestLoader};
use crate::runner::loader::TomlLoader;
use crate::runner::outcome::{FailureDetail, TestOutcome, catch_panic, guarded};
use crate::runner::types::{TestResult, TestStatus, TestUnit};
use crate::store::DurationStore;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static EXTRA_ARGS: RwLock<Vec<String>> = RwLock::new(Vec::new());

/// 当前运行的额外参数（`rutest -- ...`），运行开始时设置
pub fn extra_args() -> Vec<String> {
    EXTRA_ARGS.read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn set_extra_args(args: &[String]) {
    *EXTRA_ARGS.write().unwrap_or_else(|e| e.into_inner()) = args.to_vec();
}

/// 一次运行的参数
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// 测试根目录
    pub root: PathBuf,

    /// 只运行文件路径或测试名包含该子串的测试
    pub filter: Option<String>,

    /// 只运行带有其中任一标签的测试（为空时不过滤）
    pub tags: Vec<String>,

    /// 透传给测试的额外参数，引擎不解释
    pub extra_args: Vec<String>,

    /// 是否输出耗时预估
    pub show_estimates: bool,

    /// 运行结束后是否写回耗时记录
    pub persist_durations: bool,

    /// 发现阶段跳过的目录名
    pub exclude_dirs: Vec<String>,
}

impl RunOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            filter: None,
            tags: Vec::new(),
            extra_args: Vec::new(),
            show_estimates: true,
            persist_durations: true,
            exclude_dirs: DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}

/// 发现阶段的产物：可运行的测试，或加载失败的文件
enum Planned {
    Unit(TestUnit),
    LoadError(TestResult),
}

/// 为每个测试创建上下文，可以预先放入共享资源
pub type ContextFactory = Box<dyn Fn(&TestAttributes) -> TestContext>;

/// 测试执行引擎
pub struct TestRunner {
    loaders: Vec<Box<dyn TestLoader>>,
    capture: Option<CaptureHandle>,
    context_factory: Option<ContextFactory>,
}

impl TestRunner {
    /// 默认配置：TOML 加载器 + 全局日志捕获
    pub fn new() -> Self {
        Self::empty()
            .with_loader(TomlLoader::new())
            .with_capture(CaptureHandle::global())
    }

    /// 没有任何加载器，也不捕获日志
    pub fn empty() -> Self {
        Self {
            loaders: Vec::new(),
            capture: None,
            context_factory: None,
        }
    }

    /// 注册加载器；按注册顺序匹配，第一个接受文件的加载器生效
    pub fn with_loader(mut self, loader: impl TestLoader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }

    /// 替换已注册的加载器
    pub fn with_loaders(mut self, loaders: Vec<Box<dyn TestLoader>>) -> Self {
        self.loaders = loaders;
        self
    }

    pub fn with_capture(mut self, capture: CaptureHandle) -> Self {
        self.capture = Some(capture);
        self
    }

    /// 自定义上下文的创建方式
    ///
    /// 引擎随后仍会设置额外参数和测试属性。
    pub fn with_context_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&TestAttributes) -> TestContext + 'static,
    {
        self.context_factory = Some(Box::new(factory));
        self
    }

    /// 发现并依次运行所有测试，按发现顺序返回结果
    pub fn run(&self, options: &RunOptions) -> Result<Vec<TestResult>> {
        if !options.root.is_dir() {
            return Err(RutestError::RootNotFound(options.root.clone()));
        }
        set_extra_args(&options.extra_args);

        let mut store = DurationStore::load(&options.root);
        let planned = self.discover(options)?;

        if options.show_estimates {
            let keys: Vec<String> = planned
                .iter()
                .filter_map(|p| match p {
                    Planned::Unit(unit) => Some(unit.id.key()),
                    Planned::LoadError(_) => None,
                })
                .collect();
            let total = store.total_estimate(keys.iter().map(String::as_str));
            if total > 0.0 {
                info!(
                    "Running {} tests, estimated time: ~{:.1}s",
                    keys.len(),
                    total
                );
            }
        }

        let mut results = Vec::with_capacity(planned.len());
        for item in planned {
            let unit = match item {
                Planned::Unit(unit) => unit,
                Planned::LoadError(result) => {
                    results.push(result);
                    continue;
                }
            };

            let key = unit.id.key();
            if options.show_estimates {
                match store.estimate(&key) {
                    Some(est) => info!("STARTING: {} (est ~{:.1}s)", key, est),
                    None => info!("STARTING: {}", key),
                }
            }

            let result = self.run_unit(&unit, &options.extra_args);
            debug!("{} {} ({:.3}s)", result.status, key, result.duration_s);

            if result.status != TestStatus::Skip {
                store.record(key, result.duration_s);
            }
            results.push(result);
        }

        if options.persist_durations {
            if let Err(e) = store.save() {
                warn!(
                    "Failed to save durations to {}: {}",
                    store.path().display(),
                    e
                );
            }
        }

        Ok(results)
    }

    /// 发现测试文件并交给加载器，再应用过滤条件
    fn discover(&self, options: &RunOptions) -> Result<Vec<Planned>> {
        let files = discovery::discover_test_files(&options.root, &options.exclude_dirs)?;
        let mut planned = Vec::new();

        for path in files {
            let Some(loader) = self.loaders.iter().find(|l| l.accepts(&path)) else {
                debug!("No loader for {}", path.display());
                continue;
            };
            let relative = discovery::relative_name(&options.root, &path);

            let loaded = catch_panic(|| loader.load(&path, &relative)).unwrap_or_else(|detail| {
                Err(RutestError::Other(format!("loader panicked: {}", detail)))
            });

            match loaded {
                Ok(units) => planned.extend(
                    units
                        .into_iter()
                        .filter(|unit| Self::selected(unit, options))
                        .map(Planned::Unit),
                ),
                Err(e) => {
                    warn!("Failed to load {}: {}", relative, e);
                    let matches = options
                        .filter
                        .as_deref()
                        .is_none_or(|pattern| relative.contains(pattern));
                    if matches {
                        planned.push(Planned::LoadError(TestResult::load_error(
                            relative,
                            e.to_string(),
                        )));
                    }
                }
            }
        }

        Ok(planned)
    }

    fn selected(unit: &TestUnit, options: &RunOptions) -> bool {
        if let Some(pattern) = options.filter.as_deref() {
            if !unit.id.matches(pattern) {
                return false;
            }
        }
        options.tags.is_empty() || unit.has_any_tag(&options.tags)
    }

    /// 运行单个测试
    ///
    /// 上下文总会创建：即使函数体不接收它，捕获的日志也需要落到某个 sink。
    fn run_unit(&self, unit: &TestUnit, args: &[String]) -> TestResult {
        let attributes = TestAttributes::new(unit.id.clone(), unit.tags.clone());
        let created = catch_panic(|| match &self.context_factory {
            Some(factory) => factory(&attributes),
            None => TestContext::new(),
        });
        let mut ctx = match created {
            Ok(ctx) => ctx.with_args(args.to_vec()).with_test(attributes),
            Err(detail) => {
                warn!("Context factory panicked for {}: {}", unit.id, detail);
                return TestResult::from_outcome(
                    &unit.id,
                    TestOutcome::Failed(detail),
                    Duration::ZERO,
                    Vec::new(),
                    BTreeMap::new(),
                );
            }
        };
        let capture_guard = self
            .capture
            .as_ref()
            .map(|capture| capture.bind(ctx.sink().clone()));

        let start = Instant::now();
        let outcome = guarded(|| unit.body().call(&mut ctx));
        let duration = start.elapsed();
        drop(capture_guard);

        let outcome = match outcome {
            TestOutcome::Passed if ctx.is_fatal() => TestOutcome::Failed(FailureDetail::new(
                ctx.fatal_message().unwrap_or("fatal error logged"),
            )),
            other => other,
        };

        let (logs, artifacts) = ctx.into_parts();
        TestResult::from_outcome(&unit.id, outcome, duration, logs, artifacts)
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// 使用默认配置运行 `root` 下的测试
pub fn run_tests(
    root: impl AsRef<Path>,
    filter: Option<&str>,
    extra_args: &[String],
) -> Result<Vec<TestResult>> {
    let options = RunOptions::new(root.as_ref())
        .with_filter(filter.map(str::to_string))
        .with_extra_args(extra_args.to_vec());
    TestRunner::new().run(&options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::types::{TestBody, TestId};
    use std::fs;
    use tempfile::TempDir;

    /// 把 `*.rs` 文件名映射为固定的一组闭包测试
    struct ClosureLoader;

    impl TestLoader for ClosureLoader {
        fn accepts(&self, path: &Path) -> bool {
            path.extension().and_then(|e| e.to_str()) == Some("rs")
        }

        fn load(&self, _path: &Path, relative: &str) -> Result<Vec<TestUnit>> {
            Ok(vec![
                TestUnit::new(TestId::new(relative, "test_ok"), TestBody::plain(|| Ok(()))),
                TestUnit::new(
                    TestId::new(relative, "test_fatal"),
                    TestBody::with_context(|ctx| {
                        ctx.fatal("bad state");
                        ctx.info("continuing");
                        Ok(())
                    }),
                ),
                TestUnit::new(
                    TestId::new(relative, "test_args"),
                    TestBody::with_context(|ctx| {
                        assert_eq!(ctx.args(), ["--fast".to_string()]);
                        assert_eq!(extra_args(), vec!["--fast".to_string()]);
                        Ok(())
                    }),
                )
                .with_tags(vec!["args".to_string()]),
            ])
        }
    }

    /// 加载 `*.bad` 文件时 panic
    struct PanickingLoader;

    impl TestLoader for PanickingLoader {
        fn accepts(&self, path: &Path) -> bool {
            path.extension().and_then(|e| e.to_str()) == Some("bad")
        }

        fn load(&self, _path: &Path, _relative: &str) -> Result<Vec<TestUnit>> {
            panic!("cannot read suite");
        }
    }

    fn runner() -> TestRunner {
        TestRunner::empty().with_loader(ClosureLoader)
    }

    fn options(root: &Path) -> RunOptions {
        RunOptions::new(root).with_extra_args(vec!["--fast".to_string()])
    }

    #[test]
    fn test_run_closure_units() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("test_units.rs"), "").unwrap();

        let results = runner().run(&options(temp_dir.path())).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, TestStatus::Pass);
        assert_eq!(results[1].status, TestStatus::Fail);
        assert_eq!(results[1].failure.as_ref().unwrap().message, "bad state");
        assert_eq!(results[1].logs.len(), 2);
        assert_eq!(results[2].status, TestStatus::Pass);
    }

    #[test]
    fn test_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let result = runner().run(&options(&temp_dir.path().join("missing")));
        assert!(matches!(result, Err(RutestError::RootNotFound(_))));
    }

    #[test]
    fn test_filter_and_tags() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("test_units.rs"), "").unwrap();

        let opts = options(temp_dir.path()).with_filter(Some("fatal".to_string()));
        let results = runner().run(&opts).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].test, "test_fatal");

        let opts = options(temp_dir.path()).with_tags(vec!["args".to_string()]);
        let results = runner().run(&opts).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].test, "test_args");

        let opts = options(temp_dir.path()).with_filter(Some("nothing-matches".to_string()));
        assert!(runner().run(&opts).unwrap().is_empty());
    }

    #[test]
    fn test_durations_persisted() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("test_units.rs"), "").unwrap();

        runner().run(&options(temp_dir.path())).unwrap();

        let store = DurationStore::load(temp_dir.path());
        assert_eq!(store.durations().len(), 3);
        assert!(store.estimate("test_units.rs::test_ok").is_some());
    }

    #[test]
    fn test_no_persist() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("test_units.rs"), "").unwrap();

        let mut opts = options(temp_dir.path());
        opts.persist_durations = false;
        runner().run(&opts).unwrap();

        assert!(!temp_dir.path().join(crate::store::STORE_FILE).exists());
    }

    #[test]
    fn test_panicking_loader_becomes_load_failure() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("test_a.bad"), "").unwrap();
        fs::write(temp_dir.path().join("test_b.rs"), "").unwrap();

        let mut opts = options(temp_dir.path());
        opts.persist_durations = false;
        let results = TestRunner::empty()
            .with_loader(PanickingLoader)
            .with_loader(ClosureLoader)
            .run(&opts)
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].key(), "test_a.bad::<load>");
        assert_eq!(results[0].status, TestStatus::Fail);
        assert!(
            results[0]
                .failure
                .as_ref()
                .unwrap()
                .message
                .contains("cannot read suite")
        );
        assert!(results[1..].iter().all(|r| r.file == "test_b.rs"));
    }
}
