use crate::Result;
use crate::runner::types::{TestResult, TestSummary};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// 一次运行的完整 JSON 报告（`--report`）
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub id: String,
    pub started_at: DateTime<Local>,
    pub root: PathBuf,
    pub summary: TestSummary,
    pub results: Vec<TestResult>,
}

impl RunReport {
    pub fn new(root: impl Into<PathBuf>, started_at: DateTime<Local>, results: Vec<TestResult>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at,
            root: root.into(),
            summary: TestSummary::from_results(&results),
            results,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
