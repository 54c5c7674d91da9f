pub mod capture;

pub use capture::{CaptureGuard, CaptureHandle, CaptureLayer};

use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// 控制台输出级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// 不输出实时日志，只打印最终摘要
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    fn default_directive(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "off",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }

    fn filter(&self) -> EnvFilter {
        if *self == Verbosity::Quiet {
            return EnvFilter::new(self.default_directive());
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }
}

/// 构建订阅者：实时控制台输出 + 测试日志捕获层
///
/// 控制台层受 verbosity / RUST_LOG 过滤，捕获层不过滤（DEBUG 及以上全部进入当前测试）。
pub fn subscriber(verbosity: Verbosity, capture: CaptureHandle) -> impl Subscriber + Send + Sync {
    let console = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(verbosity.filter());

    tracing_subscriber::registry()
        .with(console)
        .with(capture.layer())
}

/// 初始化日志系统
///
/// 支持通过 RUST_LOG 环境变量控制控制台日志级别（quiet 模式除外）
/// 默认级别: info，verbose: debug
///
/// 返回的 `CaptureHandle` 交给 `TestRunner`，用于把测试期间的日志绑定到测试上下文。
/// 重复初始化不会 panic，只是沿用第一次安装的订阅者。
pub fn init_logger(verbosity: Verbosity) -> CaptureHandle {
    let capture = CaptureHandle::global();

    if subscriber(verbosity, capture.clone()).try_init().is_ok() {
        tracing::debug!("Logger initialized");
    }

    capture
}
