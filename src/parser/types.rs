use crate::context::LogLevel;
use crate::parser::metadata;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 单个测试单元（`[test_xxx]` 表）
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTest {
    /// 表名，即测试名
    pub name: String,

    /// 标签（已合并 `[defaults]` 中的标签）
    pub tags: Vec<String>,

    /// 显式声明是否需要上下文；None 时根据步骤推断
    pub context: Option<bool>,

    /// 跳过原因（`skip = "..."`）
    pub skip: Option<String>,

    /// 按声明顺序执行的步骤
    pub steps: Vec<Step>,
}

impl ParsedTest {
    /// 是否有步骤必须使用上下文（写日志 / 记录产物）
    pub fn needs_context(&self) -> bool {
        self.steps.iter().any(Step::needs_context)
    }

    /// 最终是否注入上下文
    pub fn wants_context(&self) -> bool {
        self.context.unwrap_or_else(|| self.needs_context())
    }
}

/// 测试步骤，通过 `action` 字段区分
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// 启动外部进程并检查输出
    Run(RunStep),

    /// 暂停
    Sleep {
        #[serde(deserialize_with = "metadata::deserialize_duration")]
        duration: Duration,
    },

    /// 写一条日志
    Log {
        #[serde(default = "default_level")]
        level: LogLevel,
        message: String,
    },

    /// 记录产物：`value` 为任意数据，`path` 为文件引用
    Artifact {
        key: String,
        #[serde(default)]
        value: Option<toml::Value>,
        #[serde(default)]
        path: Option<PathBuf>,
    },

    /// 跳过当前测试
    Skip {
        #[serde(default)]
        reason: String,
    },

    /// 直接失败
    Fail { message: String },
}

impl Step {
    pub fn needs_context(&self) -> bool {
        match self {
            Step::Log { .. } | Step::Artifact { .. } => true,
            Step::Run(run) => run.capture.is_some(),
            _ => false,
        }
    }

    /// 步骤名称（用于错误定位）
    pub fn action(&self) -> &'static str {
        match self {
            Step::Run(_) => "run",
            Step::Sleep { .. } => "sleep",
            Step::Log { .. } => "log",
            Step::Artifact { .. } => "artifact",
            Step::Skip { .. } => "skip",
            Step::Fail { .. } => "fail",
        }
    }
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

/// `run` 步骤
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunStep {
    /// 参数向量；`{args}` 展开为额外运行参数，`{dir}` 替换为测试文件所在目录
    pub argv: Vec<String>,

    /// 工作目录（相对测试文件所在目录）
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// 环境变量覆盖
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// 依次写入 stdin 的内容
    #[serde(default)]
    pub input: Vec<String>,

    /// 每次写入后的等待时间
    #[serde(
        default = "default_settle",
        deserialize_with = "metadata::deserialize_duration"
    )]
    pub settle: Duration,

    /// 等待进程退出的最长时间
    #[serde(
        default = "default_timeout",
        deserialize_with = "metadata::deserialize_duration"
    )]
    pub timeout: Duration,

    /// 写完 input 后是否关闭 stdin
    #[serde(default = "default_true")]
    pub close_stdin: bool,

    /// 期望的退出码
    #[serde(default)]
    pub exit_code: i32,

    #[serde(default)]
    pub stdout_contains: Vec<String>,

    #[serde(default)]
    pub stderr_contains: Vec<String>,

    /// 期望的 stdout 行数
    #[serde(default)]
    pub stdout_lines: Option<usize>,

    /// 期望的 stderr 行数
    #[serde(default)]
    pub stderr_lines: Option<usize>,

    /// 是否把每一行输出写入日志
    #[serde(default)]
    pub echo: bool,

    /// 把输出记录为该名称的产物
    #[serde(default)]
    pub capture: Option<String>,
}

fn default_settle() -> Duration {
    Duration::from_millis(50)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

/// 文件级默认值（`[defaults]` 表）
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct FileDefaults {
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

/// 整个测试文件的解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    /// 按声明顺序排列的测试
    pub tests: Vec<ParsedTest>,

    /// 文件级默认值
    pub defaults: FileDefaults,

    /// 源文件路径（用于错误报告和相对路径解析）
    pub source_path: Option<PathBuf>,
}

impl ParsedFile {
    /// 创建一个新的空文件解析结果
    pub fn new() -> Self {
        Self {
            tests: Vec::new(),
            defaults: FileDefaults::default(),
            source_path: None,
        }
    }

    /// 设置源文件路径
    pub fn with_source_path(mut self, path: PathBuf) -> Self {
        self.source_path = Some(path);
        self
    }

    /// 添加一个测试
    pub fn add_test(&mut self, test: ParsedTest) {
        self.tests.push(test);
    }

    /// 相对路径的基准目录：测试文件所在目录
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl Default for ParsedFile {
    fn default() -> Self {
        Self::new()
    }
}

/// 解析错误类型
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// TOML 语法错误
    #[error("Invalid TOML: {0}")]
    Syntax(String),

    /// 测试表内容无效
    #[error("Invalid test '{name}': {message}")]
    InvalidTest { name: String, message: String },

    /// `[defaults]` 表无效
    #[error("Invalid [defaults] table: {0}")]
    InvalidDefaults(String),

    /// 步骤需要上下文，但测试声明了 context = false
    #[error("Test '{name}' uses log/artifact steps but declares context = false")]
    ContextRequired { name: String },

    /// 无效的时间格式
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 解析结果类型别名
pub type ParseResult<T> = Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn test_with(steps: Vec<Step>, context: Option<bool>) -> ParsedTest {
        ParsedTest {
            name: "test_x".to_string(),
            tags: Vec::new(),
            context,
            skip: None,
            steps,
        }
    }

    #[test]
    fn test_wants_context_inferred() {
        let plain = test_with(vec![Step::Fail { message: "x".into() }], None);
        assert!(!plain.wants_context());

        let logging = test_with(
            vec![Step::Log {
                level: LogLevel::Debug,
                message: "hi".into(),
            }],
            None,
        );
        assert!(logging.wants_context());
    }

    #[test]
    fn test_wants_context_explicit() {
        let test = test_with(Vec::new(), Some(true));
        assert!(test.wants_context());
        assert!(!test.needs_context());
    }

    #[test]
    fn test_parsed_file_base_dir() {
        let file = ParsedFile::new().with_source_path(PathBuf::from("/suite/sub/test_a.toml"));
        assert_eq!(file.base_dir(), PathBuf::from("/suite/sub"));
        assert_eq!(ParsedFile::new().base_dir(), PathBuf::from("."));
    }
}
