use crate::Result;
use crate::error::RutestError;
use crate::parser::metadata;
use crate::process::DEFAULT_GRACE_PERIOD;
use crate::runner::discovery::DEFAULT_EXCLUDE;
use crate::runner::{RunOptions, TomlLoader};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// `rutest.toml` 的内容
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RutestConfig {
    pub runner: RunnerConfig,
    pub command: CommandConfig,

    /// 注入到每个 `run` 步骤的环境变量
    pub env: BTreeMap<String, String>,
}

/// `[runner]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// 输出耗时预估
    pub estimates: bool,

    /// 写回 `.rutest.json`
    pub persist_durations: bool,

    /// 发现阶段跳过的目录名
    pub exclude: Vec<String>,

    /// 默认的标签过滤（命令行 `--tag` 优先）
    pub tags: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            estimates: true,
            persist_durations: true,
            exclude: DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect(),
            tags: Vec::new(),
        }
    }
}

/// `[command]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandConfig {
    /// 关闭进程时等待其自行退出的时间
    #[serde(deserialize_with = "metadata::deserialize_duration")]
    pub grace_period: Duration,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl RutestConfig {
    /// 按配置构建运行参数，命令行参数随后覆盖
    pub fn run_options(&self, root: impl Into<PathBuf>) -> RunOptions {
        let mut options = RunOptions::new(root).with_tags(self.runner.tags.clone());
        options.show_estimates = self.runner.estimates;
        options.persist_durations = self.runner.persist_durations;
        options.exclude_dirs = self.runner.exclude.clone();
        options
    }

    /// 按配置构建 TOML 加载器
    pub fn toml_loader(&self) -> TomlLoader {
        TomlLoader::new()
            .with_env(self.env.clone())
            .with_grace_period(self.command.grace_period)
    }
}

/// 配置文件加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 配置文件名
    pub const CONFIG_FILE: &'static str = "rutest.toml";

    /// 从指定路径加载配置文件
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<RutestConfig> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RutestError::ConfigError(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        toml::from_str(&content).map_err(|e| {
            RutestError::ConfigError(format!(
                "Failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// 查找并加载配置文件
    /// 查找顺序：
    /// 1. `start` 目录及其父目录
    /// 2. 用户配置目录 ~/.config/rutest/
    ///
    /// 找不到时返回默认配置；找到但内容无效时报错。
    pub fn find_and_load(start: &Path) -> Result<RutestConfig> {
        match Self::find(start) {
            Some(path) => {
                debug!("Loading config from {}", path.display());
                Self::load_from_path(&path)
            }
            None => Ok(RutestConfig::default()),
        }
    }

    /// 查找配置文件路径
    pub fn find(start: &Path) -> Option<PathBuf> {
        Self::find_in_ancestors(start).or_else(Self::user_config_path)
    }

    fn find_in_ancestors(start: &Path) -> Option<PathBuf> {
        let start = fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
        start
            .ancestors()
            .map(|dir| dir.join(Self::CONFIG_FILE))
            .find(|path| path.is_file())
    }

    fn user_config_path() -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        let config_path = home.join(".config").join("rutest").join(Self::CONFIG_FILE);
        config_path.is_file().then_some(config_path)
    }
}
