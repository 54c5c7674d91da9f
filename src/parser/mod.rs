pub mod metadata;
pub mod toml_file;
pub mod types;

// Re-export commonly used types
pub use metadata::parse_duration;
pub use toml_file::TomlFileParser;
pub use types::{FileDefaults, ParseError, ParseResult, ParsedFile, ParsedTest, RunStep, Step};

/// 从文件路径解析测试文件
pub fn parse_file<P: AsRef<std::path::Path>>(path: P) -> ParseResult<ParsedFile> {
    TomlFileParser::parse_file(path)
}

/// 从字符串内容解析测试文件
pub fn parse_content(content: &str) -> ParseResult<ParsedFile> {
    TomlFileParser::parse_content(content)
}
