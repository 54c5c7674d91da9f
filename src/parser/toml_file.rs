use crate::parser::types::{
    FileDefaults, ParseError, ParseResult, ParsedFile, ParsedTest, Step,
};
use serde::Deserialize;
use std::path::Path;

const DEFAULTS_TABLE: &str = "defaults";
const TEST_PREFIX: &str = "test";

/// 测试表的原始结构
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTest {
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    context: Option<bool>,
    #[serde(default)]
    skip: Option<String>,
    #[serde(default)]
    steps: Vec<Step>,
}

/// TOML 测试文件解析器
pub struct TomlFileParser;

impl TomlFileParser {
    /// 从文件路径解析
    pub fn parse_file<P: AsRef<Path>>(path: P) -> ParseResult<ParsedFile> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut parsed = Self::parse_content(&content)?;
        parsed.source_path = Some(path.as_ref().to_path_buf());
        Ok(parsed)
    }

    /// 从字符串内容解析
    pub fn parse_content(content: &str) -> ParseResult<ParsedFile> {
        let table: toml::Table =
            toml::from_str(content).map_err(|e| ParseError::Syntax(e.to_string()))?;

        let mut file = ParsedFile::new();

        if let Some(defaults) = table.get(DEFAULTS_TABLE) {
            file.defaults = defaults
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| ParseError::InvalidDefaults(e.to_string()))?;
        }

        // preserve_order 保证这里是声明顺序
        for (key, value) in &table {
            if !key.starts_with(TEST_PREFIX) {
                continue;
            }
            let test = Self::parse_test(key, value, &file.defaults)?;
            file.add_test(test);
        }

        Ok(file)
    }

    /// 解析单个测试表
    fn parse_test(
        name: &str,
        value: &toml::Value,
        defaults: &FileDefaults,
    ) -> ParseResult<ParsedTest> {
        if !value.is_table() {
            return Err(ParseError::InvalidTest {
                name: name.to_string(),
                message: "expected a table".to_string(),
            });
        }

        let raw: RawTest = value
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| ParseError::InvalidTest {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let mut tags = defaults.tags.clone();
        for tag in raw.tags {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        let test = ParsedTest {
            name: name.to_string(),
            tags,
            context: raw.context,
            skip: raw.skip,
            steps: raw.steps,
        };

        if test.context == Some(false) && test.needs_context() {
            return Err(ParseError::ContextRequired {
                name: test.name,
            });
        }

        Ok(test)
    }
}
