use crate::Result;
use crate::parser::{self, ParsedTest};
use crate::process::DEFAULT_GRACE_PERIOD;
use crate::runner::discovery::TestLoader;
use crate::runner::steps::{self, FileScope};
use crate::runner::types::{TestBody, TestId, TestUnit};
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

/// 声明式 TOML 测试文件的加载器
#[derive(Debug, Clone)]
pub struct TomlLoader {
    env: BTreeMap<String, String>,
    grace_period: Duration,
}

impl TomlLoader {
    pub fn new() -> Self {
        Self {
            env: BTreeMap::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// 注入到每个 `run` 步骤的环境变量（优先级最低）
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// `run` 步骤关闭进程时的宽限期
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

impl Default for TomlLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TestLoader for TomlLoader {
    fn accepts(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("toml")
    }

    fn load(&self, path: &Path, relative: &str) -> Result<Vec<TestUnit>> {
        let parsed = parser::parse_file(path)?;

        let scope = Rc::new(FileScope {
            file: relative.to_string(),
            base_dir: parsed.base_dir(),
            defaults: parsed.defaults.clone(),
            env: self.env.clone(),
            grace_period: self.grace_period,
        });

        Ok(parsed
            .tests
            .into_iter()
            .map(|test| {
                let id = TestId::new(relative, test.name.clone());
                let tags = test.tags.clone();
                TestUnit::new(id, build_body(Rc::clone(&scope), test)).with_tags(tags)
            })
            .collect())
    }
}

fn build_body(scope: Rc<FileScope>, test: ParsedTest) -> TestBody {
    if test.wants_context() {
        TestBody::with_context(move |ctx| steps::run_test(&scope, &test, Some(ctx)))
    } else {
        TestBody::plain(move || steps::run_test(&scope, &test, None))
    }
}
