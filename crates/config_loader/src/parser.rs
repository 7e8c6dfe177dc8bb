//! 配置解析模块
//!
//! TOML 为主，JSON 可选。缺省字段取 `StreamConfig::default()`，
//! 未知字段直接报错（拼错的键不会被静默忽略）。

use std::path::Path;

use contracts::{ContractError, StreamConfig};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式（大小写不敏感）
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("toml") {
            Some(Self::Toml)
        } else if ext.eq_ignore_ascii_case("json") {
            Some(Self::Json)
        } else {
            None
        }
    }

    /// 从路径推断格式
    pub fn from_path(path: &Path) -> Result<Self, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse(format!(
                "cannot determine config format of '{}'",
                path.display()
            ))
        })?;
        Self::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    fn name(self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
        }
    }
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<StreamConfig, ContractError> {
    match format {
        ConfigFormat::Toml => decode(format, toml::from_str(content)),
        ConfigFormat::Json => decode(format, serde_json::from_str(content)),
    }
}

fn decode<T, E>(format: ConfigFormat, result: Result<T, E>) -> Result<T, ContractError>
where
    E: std::error::Error + Send + Sync + 'static,
{
    result.map_err(|e| ContractError::ConfigParse {
        message: format!("{} parse error: {e}", format.name()),
        source: Some(Box::new(e)),
    })
}
