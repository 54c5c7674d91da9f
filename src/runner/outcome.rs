//! 测试函数的返回值，以及把返回值或 panic 转换成 [`TestOutcome`] 的受保护调用

use crate::error::RutestError;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Once;

/// 失败详情：消息 + 出错位置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub message: String,

    /// `file:line:column`，或声明式测试中的 `<file>::<test>[step N]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl FailureDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    /// 以调用位置作为出错位置
    #[track_caller]
    pub fn here(message: impl Into<String>) -> Self {
        Self::new(message).with_location(Location::caller().to_string())
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} (at {})", self.message, location),
            None => write!(f, "{}", self.message),
        }
    }
}

/// 测试函数可以返回的非正常结果
#[derive(Debug, Clone, PartialEq)]
pub enum TestSignal {
    /// 跳过（不算失败）
    Skip(String),
    /// 失败
    Fail(FailureDetail),
}

impl TestSignal {
    pub fn skip(reason: impl Into<String>) -> Self {
        TestSignal::Skip(reason.into())
    }

    #[track_caller]
    pub fn fail(message: impl Into<String>) -> Self {
        TestSignal::Fail(FailureDetail::here(message))
    }
}

impl From<RutestError> for TestSignal {
    #[track_caller]
    fn from(err: RutestError) -> Self {
        TestSignal::Fail(FailureDetail::here(err.to_string()))
    }
}

impl From<std::io::Error> for TestSignal {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        TestSignal::Fail(FailureDetail::here(err.to_string()))
    }
}

/// 测试函数的返回类型
pub type TestReturn = Result<(), TestSignal>;

/// 一次受保护调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome {
    Passed,
    Failed(FailureDetail),
    Skipped(String),
}

impl TestOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }
}

impl From<TestReturn> for TestOutcome {
    fn from(ret: TestReturn) -> Self {
        match ret {
            Ok(()) => TestOutcome::Passed,
            Err(TestSignal::Skip(reason)) => TestOutcome::Skipped(reason),
            Err(TestSignal::Fail(detail)) => TestOutcome::Failed(detail),
        }
    }
}

thread_local! {
    static GUARDED: Cell<bool> = const { Cell::new(false) };
    static PANIC_LOCATION: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// 安装一次全局 panic hook：受保护调用期间只记录位置，不打印默认的 panic 信息
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let default_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if GUARDED.with(Cell::get) {
                let location = info.location().map(|l| l.to_string());
                PANIC_LOCATION.with(|slot| *slot.borrow_mut() = location);
                return;
            }
            default_hook(info);
        }));
    });
}

/// 运行测试函数，把返回值或 panic 转换成 `TestOutcome`
///
/// 只拦截当前线程上的 panic；测试函数自己创建的线程不受影响。
pub fn guarded<F>(body: F) -> TestOutcome
where
    F: FnOnce() -> TestReturn,
{
    match catch_panic(body) {
        Ok(ret) => TestOutcome::from(ret),
        Err(detail) => TestOutcome::Failed(detail),
    }
}

/// 调用 `f`，panic 时返回带位置的 `FailureDetail`，不打印默认的 panic 信息
pub(crate) fn catch_panic<F, T>(f: F) -> std::result::Result<T, FailureDetail>
where
    F: FnOnce() -> T,
{
    install_panic_hook();

    let previous = GUARDED.with(|g| g.replace(true));
    PANIC_LOCATION.with(|slot| slot.borrow_mut().take());

    let result = panic::catch_unwind(AssertUnwindSafe(f));

    GUARDED.with(|g| g.set(previous));

    result.map_err(|payload| FailureDetail {
        message: panic_message(&*payload),
        location: PANIC_LOCATION.with(|slot| slot.borrow_mut().take()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "test panicked".to_string()
    }
}
