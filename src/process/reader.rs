use crate::process::types::{LineCallback, StreamKind};
use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

const READ_CHUNK: usize = 4096;

/// 只由一个读取线程追加的行缓冲
///
/// 每一行在锁内整体写入，快照不会看到半行。`seal()` 之后不再接受新行。
#[derive(Debug)]
pub struct LineBuffer<T> {
    inner: Mutex<Lines<T>>,
}

#[derive(Debug)]
struct Lines<T> {
    lines: Vec<T>,
    sealed: bool,
}

impl<T: Clone> LineBuffer<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Lines {
                lines: Vec::new(),
                sealed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lines<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 追加一行；已封存时丢弃并返回 false
    pub fn push(&self, line: T) -> bool {
        let mut inner = self.lock();
        if inner.sealed {
            return false;
        }
        inner.lines.push(line);
        true
    }

    /// 封存缓冲，之后的 `push` 都被丢弃
    pub fn seal(&self) {
        self.lock().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.lock().lines.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LineBuffer<String> {
    /// 是否有某一行包含 `pattern`
    pub fn contains(&self, pattern: &str) -> bool {
        self.lock().lines.iter().any(|line| line.contains(pattern))
    }
}

/// 读取线程的输出去向
pub(crate) struct ReaderSink {
    pub kind: StreamKind,
    pub buffer: Arc<LineBuffer<String>>,
    pub merged: Option<Arc<LineBuffer<(StreamKind, String)>>>,
    pub callback: Option<LineCallback>,
}

impl ReaderSink {
    fn emit(&self, raw: &[u8]) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw).into_owned();

        if !self.buffer.push(line.clone()) {
            return;
        }
        if let Some(merged) = &self.merged {
            merged.push((self.kind, line.clone()));
        }

        if let Some(callback) = &self.callback {
            callback(self.kind, &line);
        }
    }
}

/// 启动线程持续读取 `stream` 直到 EOF
pub(crate) fn spawn_reader<R>(stream: R, sink: ReaderSink) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("rutest-{}", sink.kind))
        .spawn(move || read_lines(stream, &sink))
}

fn read_lines<R: Read>(mut stream: R, sink: &ReaderSink) {
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!(stream = %sink.kind, "reader stopped: {}", e);
                break;
            }
        };

        // 只扫描本次读到的字节，之前的 pending 里没有换行
        let mut start = 0;
        for (i, _) in chunk[..n].iter().enumerate().filter(|(_, b)| **b == b'\n') {
            if pending.is_empty() {
                sink.emit(&chunk[start..i]);
            } else {
                pending.extend_from_slice(&chunk[start..i]);
                sink.emit(&pending);
                pending.clear();
            }
            start = i + 1;
        }
        pending.extend_from_slice(&chunk[start..n]);
    }

    // 没有换行结尾的最后一行
    if !pending.is_empty() {
        sink.emit(&pending);
    }
}
