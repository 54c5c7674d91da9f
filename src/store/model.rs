use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STORE_COMMENT: &str =
    "This file is optional: it stores data about the last run of tests for doing time estimates.";

/// `.rutest.json` 的文件结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFile {
    /// 说明字段，读取时忽略
    #[serde(rename = "_comment", default)]
    pub comment: String,

    /// 写入该文件的 rutest 版本
    #[serde(default)]
    pub version: String,

    /// "<相对路径>::<测试名>" -> 上次耗时（秒）
    #[serde(default)]
    pub test_durations: BTreeMap<String, f64>,
}

impl StoreFile {
    pub fn new(test_durations: BTreeMap<String, f64>) -> Self {
        Self {
            comment: STORE_COMMENT.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            test_durations,
        }
    }
}
