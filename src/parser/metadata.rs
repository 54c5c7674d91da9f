use crate::parser::types::{ParseError, ParseResult};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// 解析时间字符串（支持 "5s", "1000ms", "2m"）
pub fn parse_duration(s: &str) -> ParseResult<Duration> {
    let s = s.trim();

    if let Some(ms) = s.strip_suffix("ms") {
        let millis: u64 = ms
            .parse()
            .map_err(|_| ParseError::InvalidDuration(s.to_string()))?;
        Ok(Duration::from_millis(millis))
    } else if let Some(sec) = s.strip_suffix('s') {
        let secs: u64 = sec
            .parse()
            .map_err(|_| ParseError::InvalidDuration(s.to_string()))?;
        Ok(Duration::from_secs(secs))
    } else if let Some(min) = s.strip_suffix('m') {
        let mins: u64 = min
            .parse()
            .map_err(|_| ParseError::InvalidDuration(s.to_string()))?;
        let secs = mins
            .checked_mul(60)
            .ok_or_else(|| ParseError::InvalidDuration(s.to_string()))?;
        Ok(Duration::from_secs(secs))
    } else {
        Err(ParseError::InvalidDuration(format!(
            "must end with 'ms', 's', or 'm': {}",
            s
        )))
    }
}

/// serde 辅助：从 "500ms" 之类的字符串反序列化 Duration
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
