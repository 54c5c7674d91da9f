use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 默认宽限期：关闭 stdin 后等待进程自行退出的时间，超时后强制 kill
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// 轮询进程状态的间隔
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 从现在起 `timeout` 之后的时刻；超出 `Instant` 表示范围时视为不设期限
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// 是否已经过了期限
pub(crate) fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// 输出流标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 每输出一行调用一次的回调，在读取线程上执行
///
/// 回调不应长时间阻塞：阻塞会让对应的流停止读取，
/// 管道写满后子进程也会被卡住。
pub type LineCallback = Arc<dyn Fn(StreamKind, &str) + Send + Sync>;

/// 进程结束后的完整输出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// 被信号终止时为 None
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}
