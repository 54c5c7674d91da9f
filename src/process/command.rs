use crate::error::{Result, RutestError};
use crate::process::reader::{LineBuffer, ReaderSink, spawn_reader};
use crate::process::types::{
    CommandOutput, DEFAULT_GRACE_PERIOD, LineCallback, POLL_INTERVAL, StreamKind, deadline_after,
    expired,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 外部进程的构建参数
pub struct CommandBuilder {
    argv: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    callback: Option<LineCallback>,
    merge_output: bool,
    grace_period: Duration,
}

impl CommandBuilder {
    /// 工作目录
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// 环境变量覆盖（在继承的环境之上合并）
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// 批量设置环境变量
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// 每输出一行调用一次（在读取线程上执行）
    pub fn on_line<F>(mut self, callback: F) -> Self
    where
        F: Fn(StreamKind, &str) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// 额外维护一份 stdout/stderr 合并视图
    pub fn merge_output(mut self, merge: bool) -> Self {
        self.merge_output = merge;
        self
    }

    /// 关闭时等待进程自行退出的时间
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// 启动进程和两个读取线程
    ///
    /// 启动失败（找不到程序、没有权限）时同步返回错误，不会启动任何读取线程。
    pub fn spawn(self) -> Result<Command> {
        let (program, args) = self.argv.split_first().ok_or_else(|| RutestError::Spawn {
            program: String::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty argument vector"),
        })?;

        let mut cmd = std::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|source| RutestError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        let stdout = Arc::new(LineBuffer::new());
        let stderr = Arc::new(LineBuffer::new());
        let merged = self.merge_output.then(|| Arc::new(LineBuffer::new()));

        let readers = match start_readers(
            &mut child,
            &stdout,
            &stderr,
            merged.as_ref(),
            self.callback.as_ref(),
        ) {
            Ok(readers) => readers,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        };

        debug!(pid, argv = ?self.argv, "spawned process");

        Ok(Command {
            stdin: child.stdin.take(),
            argv: self.argv,
            cwd: self.cwd,
            env: self.env,
            child,
            pid,
            stdout,
            stderr,
            merged,
            readers,
            exit_code: None,
            exited: false,
            closed: false,
            grace_period: self.grace_period,
        })
    }
}

fn start_readers(
    child: &mut Child,
    stdout: &Arc<LineBuffer<String>>,
    stderr: &Arc<LineBuffer<String>>,
    merged: Option<&Arc<LineBuffer<(StreamKind, String)>>>,
    callback: Option<&LineCallback>,
) -> io::Result<Vec<JoinHandle<()>>> {
    let sink = |kind, buffer: &Arc<LineBuffer<String>>| ReaderSink {
        kind,
        buffer: Arc::clone(buffer),
        merged: merged.cloned(),
        callback: callback.cloned(),
    };

    let mut readers = Vec::with_capacity(2);
    if let Some(pipe) = child.stdout.take() {
        readers.push(spawn_reader(pipe, sink(StreamKind::Stdout, stdout))?);
    }
    if let Some(pipe) = child.stderr.take() {
        readers.push(spawn_reader(pipe, sink(StreamKind::Stderr, stderr))?);
    }
    Ok(readers)
}

/// 一个正在运行（或已结束）的外部进程
///
/// stdout / stderr 各由一个后台线程持续读取，调用方可以随时写入 stdin、
/// 读取已缓冲的输出。`close()` 或 `Drop` 保证进程被终止、读取线程被回收。
pub struct Command {
    argv: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    child: Child,
    pid: u32,
    stdin: Option<ChildStdin>,
    stdout: Arc<LineBuffer<String>>,
    stderr: Arc<LineBuffer<String>>,
    merged: Option<Arc<LineBuffer<(StreamKind, String)>>>,
    readers: Vec<JoinHandle<()>>,
    exit_code: Option<i32>,
    exited: bool,
    closed: bool,
    grace_period: Duration,
}

impl Command {
    /// 以参数向量创建构建器，`argv[0]` 为程序
    #[allow(clippy::new_ret_no_self)]
    pub fn new<I, S>(argv: I) -> CommandBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandBuilder {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
            callback: None,
            merge_output: false,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// 启动进程，把它交给 `f`，结束后关闭并返回完整输出
    ///
    /// `f` panic 时进程同样会在展开过程中被终止。
    pub fn scoped<F, T>(builder: CommandBuilder, f: F) -> Result<(T, CommandOutput)>
    where
        F: FnOnce(&mut Command) -> T,
    {
        let mut cmd = builder.spawn()?;
        let value = f(&mut cmd);
        Ok((value, cmd.finish()))
    }

    /// 写入 stdin，需要的换行符由调用方提供
    pub fn write(&mut self, text: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(RutestError::StdinClosed)?;
        match stdin.write_all(text.as_bytes()).and_then(|_| stdin.flush()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.stdin = None;
                Err(RutestError::StdinClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 关闭 stdin（发送 EOF）
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    pub fn get_stdout(&self) -> Vec<String> {
        self.stdout.snapshot()
    }

    pub fn get_stderr(&self) -> Vec<String> {
        self.stderr.snapshot()
    }

    /// 合并视图；未开启 `merge_output` 时为空
    pub fn get_output(&self) -> Vec<(StreamKind, String)> {
        self.merged
            .as_ref()
            .map(|m| m.snapshot())
            .unwrap_or_default()
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn env_overrides(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn is_running(&mut self) -> bool {
        self.poll();
        !self.exited
    }

    /// 进程退出码；仍在运行或被信号终止时为 None
    pub fn exit_code(&mut self) -> Option<i32> {
        self.poll();
        self.exit_code
    }

    /// 阻塞直到进程退出，并等待两个读取线程读完
    ///
    /// 如果进程在等待 stdin，需要先 `close_stdin()`。
    pub fn wait(&mut self) -> Result<Option<i32>> {
        if !self.exited {
            let status = self.child.wait()?;
            self.record(status);
        }
        self.join_readers(None);
        Ok(self.exit_code)
    }

    /// 最多等待 `timeout`，进程在期限内退出时返回 true
    ///
    /// 进程退出后在剩余时间内等待读取线程读完；没读完的线程继续保留，
    /// 由 `wait()` 或 `close()` 回收。
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = deadline_after(timeout);
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.record(status);
                self.join_finished_readers(deadline);
                return Ok(true);
            }
            if expired(deadline) {
                return Ok(false);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// 等待 stdout 中出现包含 `pattern` 的行
    pub fn wait_for_stdout(&self, pattern: &str, timeout: Duration) -> bool {
        self.wait_for(StreamKind::Stdout, pattern, timeout)
    }

    /// 等待 stderr 中出现包含 `pattern` 的行
    pub fn wait_for_stderr(&self, pattern: &str, timeout: Duration) -> bool {
        self.wait_for(StreamKind::Stderr, pattern, timeout)
    }

    fn wait_for(&self, kind: StreamKind, pattern: &str, timeout: Duration) -> bool {
        let buffer = match kind {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        };
        let deadline = deadline_after(timeout);
        loop {
            if buffer.contains(pattern) {
                return true;
            }
            // 读取线程都结束后不会再有新输出
            if self.readers.iter().all(|h| h.is_finished()) {
                return buffer.contains(pattern);
            }
            if expired(deadline) {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// 关闭并回收进程：关闭 stdin → 宽限期内等待退出 → 超时 kill → 回收读取线程
    ///
    /// 可重复调用；进程已退出时不会报错。返回最终退出码。
    pub fn close(&mut self) -> Option<i32> {
        if self.closed {
            return self.exit_code;
        }
        self.closed = true;
        self.stdin.take();

        let deadline = deadline_after(self.grace_period);
        loop {
            self.poll();
            if self.exited || expired(deadline) {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        if !self.exited {
            warn!(
                pid = self.pid,
                "process still running after {:?}, killing", self.grace_period
            );
            if let Err(e) = self.child.kill() {
                debug!(pid = self.pid, "kill failed: {}", e);
            }
            match self.child.wait() {
                Ok(status) => self.record(status),
                Err(e) => {
                    debug!(pid = self.pid, "wait after kill failed: {}", e);
                    self.exited = true;
                }
            }
        }

        self.join_readers(Some(self.grace_period));
        // 被放弃的读取线程不能再改动缓冲
        self.seal_buffers();
        debug!(pid = self.pid, exit_code = ?self.exit_code, "process closed");
        self.exit_code
    }

    /// 关闭并返回完整输出
    pub fn finish(mut self) -> CommandOutput {
        self.close();
        self.output()
    }

    /// 当前输出快照
    pub fn output(&self) -> CommandOutput {
        CommandOutput {
            stdout: self.get_stdout(),
            stderr: self.get_stderr(),
            exit_code: self.exit_code,
        }
    }

    fn poll(&mut self) {
        if self.exited {
            return;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => self.record(status),
            Ok(None) => {}
            Err(e) => debug!(pid = self.pid, "try_wait failed: {}", e),
        }
    }

    fn record(&mut self, status: ExitStatus) {
        self.exited = true;
        self.exit_code = status.code();
    }

    /// 回收读取线程
    ///
    /// 进程已退出后管道通常马上关闭；如果孙进程仍持有管道，
    /// 最多等待 `limit`，之后放弃该线程。
    fn join_readers(&mut self, limit: Option<Duration>) {
        let Some(limit) = limit else {
            for handle in self.readers.drain(..) {
                join_reader(self.pid, handle);
            }
            return;
        };

        self.join_finished_readers(deadline_after(limit));
        if !self.readers.is_empty() {
            warn!(
                pid = self.pid,
                "output pipe still open, detaching {} reader(s)",
                self.readers.len()
            );
            self.readers.clear();
        }
    }

    /// 在期限内等待读取线程结束，只回收已结束的，其余放回 `readers`
    fn join_finished_readers(&mut self, deadline: Option<Instant>) {
        while !self.readers.iter().all(|h| h.is_finished()) && !expired(deadline) {
            thread::sleep(POLL_INTERVAL);
        }
        let (finished, running): (Vec<_>, Vec<_>) =
            self.readers.drain(..).partition(|h| h.is_finished());
        self.readers = running;
        for handle in finished {
            join_reader(self.pid, handle);
        }
    }

    fn seal_buffers(&self) {
        self.stdout.seal();
        self.stderr.seal();
        if let Some(merged) = &self.merged {
            merged.seal();
        }
    }
}

fn join_reader(pid: u32, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!(pid, "reader thread panicked (line callback?)");
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("argv", &self.argv)
            .field("pid", &self.pid)
            .field("exited", &self.exited)
            .field("exit_code", &self.exit_code)
            .finish()
    }
}
