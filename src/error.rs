use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RutestError {
    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("测试根目录不存在: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("无法启动进程 '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("进程标准输入已关闭")]
    StdinClosed,

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

// Add conversion from anyhow::Error
impl From<anyhow::Error> for RutestError {
    fn from(err: anyhow::Error) -> Self {
        RutestError::Other(err.to_string())
    }
}

// Add conversion from parser::ParseError
impl From<crate::parser::ParseError> for RutestError {
    fn from(err: crate::parser::ParseError) -> Self {
        RutestError::ParseError(err.to_string())
    }
}

/// Result type for rutest crate
pub type Result<T> = std::result::Result<T, RutestError>;
