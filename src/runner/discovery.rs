use crate::Result;
use crate::runner::types::TestUnit;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 默认跳过的目录
pub const DEFAULT_EXCLUDE: &[&str] = &["target", "node_modules"];

/// 把一个测试文件转换成测试单元
///
/// 发现阶段按文件名挑出候选文件，再交给第一个 `accepts` 返回 true 的加载器。
/// 嵌入方可以实现自己的加载器来支持其他格式，或直接注册 Rust 闭包。
pub trait TestLoader {
    /// 是否能处理该文件
    fn accepts(&self, path: &Path) -> bool;

    /// 加载文件中的测试，保持声明顺序
    ///
    /// `relative` 是相对测试根目录的路径（`/` 分隔），用作 `TestId::file`。
    fn load(&self, path: &Path, relative: &str) -> Result<Vec<TestUnit>>;
}

/// 文件名（不含扩展名）以 `test_` 开头或以 `_test` 结尾
pub fn is_test_file(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|stem| stem.starts_with("test_") || stem.ends_with("_test"))
        .unwrap_or(false)
}

/// 递归查找测试文件
///
/// 每一层目录的条目按名称排序后访问，结果顺序是确定的。
/// 以 `.` 开头的目录、`exclude` 中的目录和指向目录的符号链接会被跳过。
/// 根目录读取失败时返回错误；子目录读取失败只记录警告。
pub fn discover_test_files(root: &Path, exclude: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = sorted_entries(root)?;
    visit(entries, exclude, &mut files);
    debug!("Discovered {} test files under {}", files.len(), root.display());
    Ok(files)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    Ok(entries)
}

fn visit(entries: Vec<PathBuf>, exclude: &[String], files: &mut Vec<PathBuf>) {
    for path in entries {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };

        if meta.file_type().is_symlink() && path.is_dir() {
            debug!("Skipping symlinked directory {}", path.display());
        } else if meta.is_dir() {
            if name.starts_with('.') || exclude.iter().any(|e| e == name) {
                continue;
            }
            match sorted_entries(&path) {
                Ok(children) => visit(children, exclude, files),
                Err(e) => warn!("Cannot read directory {}: {}", path.display(), e),
            }
        } else if is_test_file(&path) {
            files.push(path);
        }
    }
}

/// 相对根目录的路径，统一使用 `/` 分隔
pub fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
