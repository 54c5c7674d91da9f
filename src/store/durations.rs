use super::model::StoreFile;
use crate::Result;
use crate::error::RutestError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const STORE_FILE: &str = ".rutest.json";

/// 每个测试的历史耗时，用于预估
///
/// `snapshot` 是运行开始时磁盘上的内容，只用于预估；
/// `current` 从它复制而来，接收本次运行测得的耗时。
#[derive(Debug, Clone)]
pub struct DurationStore {
    file_path: PathBuf,
    snapshot: BTreeMap<String, f64>,
    current: BTreeMap<String, f64>,
}

impl DurationStore {
    /// 读取 `<root>/.rutest.json`
    ///
    /// # 容错
    /// 文件不存在、无法读取或格式错误时得到空存储；负数和非有限值会被丢弃。
    pub fn load(root: &Path) -> Self {
        Self::load_from_path(root.join(STORE_FILE))
    }

    /// 从指定路径读取（内部和测试使用）
    pub fn load_from_path(path: PathBuf) -> Self {
        let durations = match Self::read(&path) {
            Ok(durations) => durations,
            Err(e) => {
                if path.exists() {
                    debug!("Ignoring unreadable duration store {}: {}", path.display(), e);
                }
                BTreeMap::new()
            }
        };

        Self {
            file_path: path,
            snapshot: durations.clone(),
            current: durations,
        }
    }

    fn read(path: &Path) -> Result<BTreeMap<String, f64>> {
        let content = fs::read_to_string(path).map_err(RutestError::IoError)?;
        let file: StoreFile = serde_json::from_str(&content)?;
        Ok(file
            .test_durations
            .into_iter()
            .filter(|(_, secs)| secs.is_finite() && *secs >= 0.0)
            .collect())
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// 运行开始时快照中的预估值
    pub fn estimate(&self, key: &str) -> Option<f64> {
        self.snapshot.get(key).copied()
    }

    /// `keys` 的预估总和，未知的 key 按 0 计
    pub fn total_estimate<'a, I>(&self, keys: I) -> f64
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter().filter_map(|k| self.estimate(k)).sum()
    }

    /// 记录测得的耗时，覆盖旧值
    pub fn record(&mut self, key: impl Into<String>, secs: f64) {
        let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        self.current.insert(key.into(), secs);
    }

    /// 将要写回的耗时
    pub fn durations(&self) -> &BTreeMap<String, f64> {
        &self.current
    }

    /// 整体写回
    ///
    /// # 原子性
    /// 先写同目录下的临时文件再重命名覆盖；写入失败时旧文件保持不变。
    /// 不加锁，同一目录的并发运行以最后写入者为准。
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&StoreFile::new(self.current.clone()))?;

        let tmp_path = self.file_path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(RutestError::IoError)?;
        if let Err(e) = fs::rename(&tmp_path, &self.file_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(RutestError::IoError(e));
        }

        debug!(
            "Saved {} durations to {}",
            self.current.len(),
            self.file_path.display()
        );
        Ok(())
    }
}
