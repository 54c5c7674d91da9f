use crate::context::{Artifact, LogLevel};
use crate::runner::types::{TestResult, TestStatus, TestSummary};
use colored::Colorize;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, Table};

pub struct TestReporter {
    verbose: bool,
}

impl TestReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// 打印单个测试结果
    pub fn print_result(&self, result: &TestResult) {
        let symbol = match result.status {
            TestStatus::Pass => "✓".green(),
            TestStatus::Fail => "✗".red(),
            TestStatus::Skip => "⊘".dimmed(),
        };

        println!(
            " {} {}::{} ({:.3}s)",
            symbol,
            result.file.dimmed(),
            result.test,
            result.duration_s
        );

        if let Some(reason) = &result.skip_reason {
            println!("   {}: {}", "Skipped".dimmed(), reason);
        }

        if let Some(failure) = &result.failure {
            println!("   {}: {}", "Error".red().bold(), failure.message);
            if let Some(location) = &failure.location {
                println!("   {}: {}", "At".bold(), location);
            }
        }

        // verbose 模式或失败时显示日志和产物
        if self.verbose || result.is_failed() {
            self.print_details(result);
        }
    }

    fn print_details(&self, result: &TestResult) {
        let min_level = if self.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warning
        };

        let logs: Vec<_> = result
            .logs
            .iter()
            .filter(|r| r.level >= min_level)
            .collect();
        if !logs.is_empty() {
            println!("   Logs:");
            for record in logs {
                let level = match record.level {
                    LogLevel::Debug => record.level.as_str().dimmed(),
                    LogLevel::Info => record.level.as_str().normal(),
                    LogLevel::Warning => record.level.as_str().yellow(),
                    LogLevel::Error | LogLevel::Critical => record.level.as_str().red(),
                };
                println!(
                    "     {} {:<8} {}",
                    record.timestamp.format("%H:%M:%S%.3f"),
                    level,
                    record.message
                );
            }
        }

        if self.verbose && !result.artifacts.is_empty() {
            println!("   Artifacts:");
            for (key, artifact) in &result.artifacts {
                match artifact {
                    Artifact::Primitive { value } => println!("     {}: {}", key.bold(), value),
                    Artifact::Filename { value, exists } => {
                        let suffix = if *exists { "" } else { " (missing)" };
                        println!("     {}: {}{}", key.bold(), value.display(), suffix.yellow());
                    }
                }
            }
        }
        println!();
    }

    /// 打印全部结果和摘要
    pub fn print_report(&self, results: &[TestResult]) {
        println!();
        for result in results {
            self.print_result(result);
        }
        self.print_summary(&TestSummary::from_results(results));
    }

    /// 打印测试开始
    pub fn print_header(&self, root: &str) {
        println!("\nRunning tests from {}...\n", root.bold());
    }

    /// 打印测试摘要
    pub fn print_summary(&self, summary: &TestSummary) {
        println!("\n{}", "━".repeat(50));
        println!("{}", "Summary".bold());
        println!("{}", "━".repeat(50));

        if summary.skipped > 0 {
            println!(
                "  {}: {} passed, {} failed, {} skipped, {} total",
                "Tests".bold(),
                summary.passed.to_string().green(),
                summary.failed.to_string().red(),
                summary.skipped.to_string().dimmed(),
                summary.total
            );
        } else if summary.failed == 0 {
            println!(
                "  {}: {} passed, {} total",
                "Tests".bold(),
                summary.passed.to_string().green(),
                summary.total
            );
        } else {
            println!(
                "  {}: {} passed, {} failed, {} total",
                "Tests".bold(),
                summary.passed.to_string().green(),
                summary.failed.to_string().red(),
                summary.total
            );
        }

        if summary.warnings > 0 || summary.errors > 0 {
            println!(
                "  {}: {} warnings, {} errors",
                "Logs".bold(),
                summary.warnings.to_string().yellow(),
                summary.errors.to_string().red()
            );
        }

        println!(
            "  {}: {:.3}s",
            "Duration".bold(),
            summary.total_duration.as_secs_f64()
        );
        println!();
    }

    /// 打印一行摘要（quiet 模式）
    pub fn print_quiet(&self, summary: &TestSummary) {
        println!("{}", quiet_line(summary));
    }

    /// 以表格打印结果
    pub fn print_table(&self, results: &[TestResult]) {
        println!("{}", results_table(results));
    }
}

impl Default for TestReporter {
    fn default() -> Self {
        Self::new(false)
    }
}

/// `Tests: 50% passed (1/2) - 1 warnings, 2 errors`
///
/// 数量为 0 的告警或错误不显示，两者都为 0 时以 `All perfect :)` 结尾。
pub fn quiet_line(summary: &TestSummary) -> String {
    let mut notes = Vec::new();
    if summary.warnings > 0 {
        notes.push(format!("{} warnings", summary.warnings));
    }
    if summary.errors > 0 {
        notes.push(format!("{} errors", summary.errors));
    }
    if notes.is_empty() {
        notes.push("All perfect :)".to_string());
    }

    format!(
        "Tests: {}% passed ({}/{}) - {}",
        summary.pass_percent(),
        summary.passed,
        summary.total,
        notes.join(", ")
    )
}

pub fn results_table(results: &[TestResult]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["File", "Test", "Status", "Duration", "Logs", "Detail"]);

    for result in results {
        let status_color = match result.status {
            TestStatus::Pass => Color::Green,
            TestStatus::Fail => Color::Red,
            TestStatus::Skip => Color::DarkGrey,
        };
        let detail = result
            .failure
            .as_ref()
            .map(|f| f.message.clone())
            .or_else(|| result.skip_reason.clone())
            .unwrap_or_default();

        table.add_row(vec![
            Cell::new(&result.file).add_attribute(Attribute::Dim),
            Cell::new(&result.test),
            Cell::new(result.status).fg(status_color),
            Cell::new(format!("{:.3}s", result.duration_s)),
            Cell::new(result.logs.len()),
            Cell::new(detail),
        ]);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LogRecord;
    use crate::runner::outcome::{FailureDetail, TestOutcome};
    use crate::runner::types::TestId;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn result(name: &str, outcome: TestOutcome, levels: &[LogLevel]) -> TestResult {
        TestResult::from_outcome(
            &TestId::new("test_r.toml", name),
            outcome,
            Duration::from_millis(5),
            levels.iter().map(|l| LogRecord::new(*l, "m")).collect(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_quiet_line_perfect() {
        let results = vec![
            result("test_a", TestOutcome::Passed, &[LogLevel::Info]),
            result("test_b", TestOutcome::Skipped("x".into()), &[]),
        ];
        assert_eq!(
            quiet_line(&TestSummary::from_results(&results)),
            "Tests: 50% passed (1/2) - All perfect :)"
        );
    }

    #[test]
    fn test_quiet_line_with_failures() {
        let results = vec![
            result("test_a", TestOutcome::Passed, &[LogLevel::Warning]),
            result(
                "test_b",
                TestOutcome::Failed(FailureDetail::new("boom")),
                &[LogLevel::Error],
            ),
        ];
        assert_eq!(
            quiet_line(&TestSummary::from_results(&results)),
            "Tests: 50% passed (1/2) - 1 warnings, 1 errors"
        );
    }

    #[test]
    fn test_quiet_line_truncates_percentage() {
        let mut results: Vec<_> = (0..249)
            .map(|i| result(&format!("test_{}", i), TestOutcome::Passed, &[]))
            .collect();
        results.push(result(
            "test_last",
            TestOutcome::Failed(FailureDetail::new("boom")),
            &[LogLevel::Critical],
        ));
        assert_eq!(
            quiet_line(&TestSummary::from_results(&results)),
            "Tests: 99% passed (249/250) - 1 errors"
        );
    }

    #[test]
    fn test_quiet_line_all_passed() {
        let results = vec![
            result("test_a", TestOutcome::Passed, &[LogLevel::Debug]),
            result("test_b", TestOutcome::Passed, &[]),
        ];
        assert_eq!(
            quiet_line(&TestSummary::from_results(&results)),
            "Tests: 100% passed (2/2) - All perfect :)"
        );
    }

    #[test]
    fn test_results_table_rows() {
        let results = vec![
            result("test_a", TestOutcome::Passed, &[]),
            result("test_b", TestOutcome::Failed(FailureDetail::new("boom")), &[]),
        ];
        let rendered = results_table(&results).to_string();
        assert!(rendered.contains("test_a"));
        assert!(rendered.contains("FAIL"));
        assert!(rendered.contains("boom"));
    }
}
