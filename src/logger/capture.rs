//! 把测试运行期间的 `tracing` 事件写入当前测试的日志 sink

use crate::context::{LogLevel, LogRecord, LogSink};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// `TestContext` 回显到控制台时使用的 target
///
/// 这些记录已经写入上下文自己的 sink，捕获层会跳过它们。
pub const CONTEXT_TARGET: &str = "rutest::context";

type Slot = Arc<Mutex<Option<LogSink>>>;

static GLOBAL: OnceLock<CaptureHandle> = OnceLock::new();

/// 引擎和捕获层之间共享的绑定点
#[derive(Debug, Clone, Default)]
pub struct CaptureHandle {
    slot: Slot,
}

impl CaptureHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级句柄，`init_logger` 和 `TestRunner::new` 共用
    pub fn global() -> Self {
        GLOBAL.get_or_init(CaptureHandle::new).clone()
    }

    /// 安装到订阅者中的层；同一句柄创建的层看到同一个绑定
    pub fn layer(&self) -> CaptureLayer {
        CaptureLayer {
            slot: Arc::clone(&self.slot),
        }
    }

    /// 绑定 `sink`，直到返回的 guard 被 drop
    pub fn bind(&self, sink: LogSink) -> CaptureGuard {
        let previous = self
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(sink);
        CaptureGuard {
            slot: Arc::clone(&self.slot),
            previous,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

/// drop 时恢复之前的绑定（panic 展开时同样生效）
#[must_use = "the sink is unbound as soon as the guard is dropped"]
pub struct CaptureGuard {
    slot: Slot,
    previous: Option<LogSink>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = self.previous.take();
    }
}

pub struct CaptureLayer {
    slot: Slot,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target() == CONTEXT_TARGET || *meta.level() == Level::TRACE {
            return;
        }

        // 先克隆出来，格式化时不持有锁
        let sink = match self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            Some(sink) => sink,
            None => return,
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        sink.push(LogRecord::new(LogLevel::from(meta.level()), visitor.finish()));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            return self.message;
        }
        let fields = self.fields.join(" ");
        if self.message.is_empty() {
            fields
        } else {
            format!("{} {}", self.message, fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}
