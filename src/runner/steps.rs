use crate::context::{Artifact, LogLevel, TestContext};
use crate::parser::{FileDefaults, ParsedTest, RunStep, Step};
use crate::process::{Command, CommandOutput, StreamKind};
use crate::runner::outcome::{FailureDetail, TestReturn, TestSignal};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// `{args}` 元素展开为额外运行参数
const ARGS_PLACEHOLDER: &str = "{args}";
/// 替换为测试文件所在目录
const DIR_PLACEHOLDER: &str = "{dir}";

/// 失败消息中附带的 stderr 行数
const STDERR_TAIL: usize = 5;

/// 同一测试文件内所有测试共享的执行环境
#[derive(Debug, Clone)]
pub(crate) struct FileScope {
    /// 相对根目录的文件路径
    pub file: String,
    /// 测试文件所在目录
    pub base_dir: PathBuf,
    pub defaults: FileDefaults,
    /// `rutest.toml` 中 `[env]` 的变量
    pub env: BTreeMap<String, String>,
    pub grace_period: Duration,
}

/// 按顺序执行测试的所有步骤
///
/// 失败位置统一为 `<file>::<test>[step N]`（N 从 1 开始）。
pub(crate) fn run_test(
    scope: &FileScope,
    test: &ParsedTest,
    mut ctx: Option<&mut TestContext>,
) -> TestReturn {
    if let Some(reason) = &test.skip {
        return Err(match ctx {
            Some(ctx) => ctx.skip_test(reason.clone()),
            None => TestSignal::skip(reason.clone()),
        });
    }

    for (index, step) in test.steps.iter().enumerate() {
        debug!("{}::{} step {} ({})", scope.file, test.name, index + 1, step.action());
        if let Err(signal) = run_step(scope, step, ctx.as_deref_mut()) {
            return Err(match signal {
                TestSignal::Fail(detail) => TestSignal::Fail(FailureDetail::new(detail.message).with_location(
                    format!("{}::{}[step {}]", scope.file, test.name, index + 1),
                )),
                skip => skip,
            });
        }
    }

    Ok(())
}

fn run_step(scope: &FileScope, step: &Step, ctx: Option<&mut TestContext>) -> TestReturn {
    match step {
        Step::Run(run) => run_command(scope, run, ctx),
        Step::Sleep { duration } => {
            thread::sleep(*duration);
            Ok(())
        }
        Step::Log { level, message } => {
            match ctx {
                Some(ctx) => ctx.log(*level, message.clone()),
                None => log_ambient(*level, message),
            }
            Ok(())
        }
        Step::Artifact { key, value, path } => {
            let artifact = match (value, path) {
                (Some(value), None) => Artifact::from(
                    serde_json::to_value(value).map_err(|e| TestSignal::fail(e.to_string()))?,
                ),
                (None, Some(path)) => Artifact::file(scope.base_dir.join(path)),
                _ => {
                    return Err(TestSignal::fail(format!(
                        "artifact '{}' needs exactly one of `value` or `path`",
                        key
                    )));
                }
            };
            match ctx {
                Some(ctx) => ctx.add_artifact(key.clone(), artifact),
                None => warn!("artifact '{}' dropped: test has no context", key),
            }
            Ok(())
        }
        Step::Skip { reason } => Err(match ctx {
            Some(ctx) => ctx.skip_test(reason.clone()),
            None => TestSignal::skip(reason.clone()),
        }),
        Step::Fail { message } => Err(TestSignal::fail(message.clone())),
    }
}

fn log_ambient(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => debug!("{}", message),
        LogLevel::Info => info!("{}", message),
        LogLevel::Warning => warn!("{}", message),
        LogLevel::Error | LogLevel::Critical => error!("{}", message),
    }
}

/// 执行 `run` 步骤：启动进程 → 写入 input → 等待退出 → 检查输出
fn run_command(scope: &FileScope, run: &RunStep, ctx: Option<&mut TestContext>) -> TestReturn {
    let args = match &ctx {
        Some(ctx) => ctx.args().to_vec(),
        None => crate::runner::extra_args(),
    };
    let argv = expand_argv(&run.argv, &args, &scope.base_dir);
    let program = argv.first().cloned().unwrap_or_default();

    let cwd = run
        .cwd
        .as_ref()
        .or(scope.defaults.cwd.as_ref())
        .map(|dir| scope.base_dir.join(dir))
        .unwrap_or_else(|| scope.base_dir.clone());

    let mut builder = Command::new(argv.clone())
        .cwd(cwd)
        .envs(scope.env.clone())
        .envs(scope.defaults.env.clone())
        .envs(run.env.clone())
        .grace_period(scope.grace_period);

    if run.echo {
        builder = builder.on_line(|kind, line| match kind {
            StreamKind::Stdout => info!(stream = %kind, "{}", line),
            StreamKind::Stderr => warn!(stream = %kind, "{}", line),
        });
    }

    debug!("Running {:?}", argv);
    let mut cmd = builder.spawn()?;

    for input in &run.input {
        cmd.write(input)?;
        thread::sleep(run.settle);
    }
    if run.close_stdin {
        cmd.close_stdin();
    }

    let exited = cmd.wait_timeout(run.timeout)?;
    let output = cmd.finish();

    if let (Some(key), Some(ctx)) = (&run.capture, ctx) {
        ctx.add_artifact(
            key.clone(),
            serde_json::json!({
                "stdout": output.stdout,
                "stderr": output.stderr,
                "exit_code": output.exit_code,
            }),
        );
    }

    if !exited {
        return Err(TestSignal::fail(format!(
            "'{}' did not exit within {:?}",
            program, run.timeout
        )));
    }

    check_output(run, &program, &output)
}

fn check_output(run: &RunStep, program: &str, output: &CommandOutput) -> TestReturn {
    if output.exit_code != Some(run.exit_code) {
        return Err(TestSignal::fail(format!(
            "'{}' exited with {}, expected {}{}",
            program,
            output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "a signal".to_string()),
            run.exit_code,
            stderr_tail(output)
        )));
    }

    check_stream(StreamKind::Stdout, &output.stdout, &run.stdout_contains, run.stdout_lines)?;
    check_stream(StreamKind::Stderr, &output.stderr, &run.stderr_contains, run.stderr_lines)?;
    Ok(())
}

fn check_stream(
    kind: StreamKind,
    lines: &[String],
    contains: &[String],
    expected_lines: Option<usize>,
) -> TestReturn {
    for pattern in contains {
        if !lines.iter().any(|line| line.contains(pattern.as_str())) {
            return Err(TestSignal::fail(format!(
                "{} does not contain {:?} ({} lines captured)",
                kind,
                pattern,
                lines.len()
            )));
        }
    }

    if let Some(expected) = expected_lines {
        if lines.len() != expected {
            return Err(TestSignal::fail(format!(
                "{} has {} lines, expected {}",
                kind,
                lines.len(),
                expected
            )));
        }
    }

    Ok(())
}

fn stderr_tail(output: &CommandOutput) -> String {
    if output.stderr.is_empty() {
        return String::new();
    }
    let start = output.stderr.len().saturating_sub(STDERR_TAIL);
    format!("\nstderr:\n  {}", output.stderr[start..].join("\n  "))
}

/// 展开 argv 中的占位符
pub(crate) fn expand_argv(argv: &[String], args: &[String], dir: &Path) -> Vec<String> {
    let dir = dir.to_string_lossy();
    let mut expanded = Vec::with_capacity(argv.len() + args.len());
    for item in argv {
        if item == ARGS_PLACEHOLDER {
            expanded.extend(args.iter().cloned());
        } else {
            expanded.push(item.replace(DIR_PLACEHOLDER, &dir));
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_content;
    use crate::runner::outcome::{TestOutcome, guarded};
    use tempfile::TempDir;

    fn scope(dir: &Path) -> FileScope {
        FileScope {
            file: "test_steps.toml".to_string(),
            base_dir: dir.to_path_buf(),
            defaults: FileDefaults::default(),
            env: BTreeMap::new(),
            grace_period: Duration::from_millis(200),
        }
    }

    fn run_single(content: &str, dir: &Path) -> (TestOutcome, TestContext) {
        let parsed = parse_content(content).unwrap();
        let test = parsed.tests.into_iter().next().unwrap();
        let scope = FileScope {
            defaults: parsed.defaults,
            ..scope(dir)
        };
        let mut ctx = TestContext::new();
        let outcome = guarded(|| run_test(&scope, &test, Some(&mut ctx)));
        (outcome, ctx)
    }

    #[test]
    fn test_expand_argv() {
        let argv = vec![
            "tool".to_string(),
            "{args}".to_string(),
            "--config={dir}/cfg".to_string(),
        ];
        let args = vec!["-x".to_string(), "y".to_string()];
        let expanded = expand_argv(&argv, &args, Path::new("/suite"));
        assert_eq!(expanded, vec!["tool", "-x", "y", "--config=/suite/cfg"]);

        let expanded = expand_argv(&argv, &[], Path::new("/suite"));
        assert_eq!(expanded, vec!["tool", "--config=/suite/cfg"]);
    }

    #[test]
    fn test_run_step_with_input() {
        let temp_dir = TempDir::new().unwrap();
        let content = r#"
[test_cat]
[[test_cat.steps]]
action = "run"
argv = ["cat"]
input = ["hello\n", "world\n"]
settle = "10ms"
stdout_contains = ["hello", "world"]
stdout_lines = 2
capture = "cat"
"#;
        let (outcome, ctx) = run_single(content, temp_dir.path());
        assert_eq!(outcome, TestOutcome::Passed);
        let captured = ctx.artifacts()["cat"].value().unwrap();
        assert_eq!(captured["stdout"][1], "world");
        assert_eq!(captured["exit_code"], 0);
    }

    #[test]
    fn test_run_step_exit_code_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let content = r#"
[test_exit]
steps = [
    { action = "log", message = "before" },
    { action = "run", argv = ["sh", "-c", "echo oops >&2; exit 3"] },
]
"#;
        let (outcome, _) = run_single(content, temp_dir.path());
        match outcome {
            TestOutcome::Failed(detail) => {
                assert!(detail.message.contains("exited with 3"));
                assert!(detail.message.contains("oops"));
                assert_eq!(
                    detail.location.as_deref(),
                    Some("test_steps.toml::test_exit[step 2]")
                );
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_run_step_expected_failure_code() {
        let temp_dir = TempDir::new().unwrap();
        let content = r#"
[test_exit]
steps = [{ action = "run", argv = ["sh", "-c", "exit 2"], exit_code = 2 }]
"#;
        let (outcome, _) = run_single(content, temp_dir.path());
        assert_eq!(outcome, TestOutcome::Passed);
    }

    #[test]
    fn test_run_step_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let content = r#"
[test_slow]
steps = [{ action = "run", argv = ["sleep", "5"], timeout = "100ms" }]
"#;
        let (outcome, _) = run_single(content, temp_dir.path());
        match outcome {
            TestOutcome::Failed(detail) => assert!(detail.message.contains("did not exit")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_run_step_env_and_cwd() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("work")).unwrap();
        let content = r#"
[defaults]
cwd = "work"
env = { GREETING = "hi" }

[test_env]
steps = [{ action = "run", argv = ["sh", "-c", "echo $GREETING $TARGET; pwd"], env = { TARGET = "there" }, stdout_contains = ["hi there", "work"] }]
"#;
        let (outcome, _) = run_single(content, temp_dir.path());
        assert_eq!(outcome, TestOutcome::Passed);
    }

    #[test]
    fn test_spawn_failure_fails_step() {
        let temp_dir = TempDir::new().unwrap();
        let content = r#"
[test_missing]
steps = [{ action = "run", argv = ["definitely-not-a-real-program-xyz"] }]
"#;
        let (outcome, _) = run_single(content, temp_dir.path());
        assert!(matches!(outcome, TestOutcome::Failed(_)));
    }

    #[test]
    fn test_log_artifact_and_skip_steps() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("out.txt"), "data").unwrap();
        let content = r#"
[test_mixed]
steps = [
    { action = "log", level = "warning", message = "careful" },
    { action = "artifact", key = "answer", value = 42 },
    { action = "artifact", key = "file", path = "out.txt" },
    { action = "skip", reason = "enough" },
    { action = "fail", message = "never reached" },
]
"#;
        let (outcome, ctx) = run_single(content, temp_dir.path());
        assert_eq!(outcome, TestOutcome::Skipped("enough".to_string()));
        assert_eq!(ctx.artifacts()["answer"].value(), Some(&serde_json::json!(42)));
        assert!(matches!(
            ctx.artifacts()["file"],
            Artifact::Filename { exists: true, .. }
        ));
        assert_eq!(ctx.logs()[0].level, LogLevel::Warning);
    }

    #[test]
    fn test_skip_table_attribute() {
        let temp_dir = TempDir::new().unwrap();
        let content = r#"
[test_later]
skip = "not ready"
steps = [{ action = "fail", message = "should not run" }]
"#;
        let (outcome, _) = run_single(content, temp_dir.path());
        assert_eq!(outcome, TestOutcome::Skipped("not ready".to_string()));
    }
}
