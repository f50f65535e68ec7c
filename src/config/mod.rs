pub mod credentials;

pub use credentials::{mask_key, CredentialPool};

use crate::error::RelayError;
use crate::Result;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// 主配置结构
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_keys: CredentialPool,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub chat: ChatPolicy,
}

/// 上游 Gemini API 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub api_base: String,
    pub model: String,
    /// 单次尝试的超时（秒）
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// 对话规范化策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatPolicy {
    /// 请求未提供 customPrompt 时使用的默认前导提示
    pub system_preamble: Option<String>,
    pub history_limit: usize,
    pub max_body_bytes: usize,
}

impl Default for ChatPolicy {
    fn default() -> Self {
        Self {
            system_preamble: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Config {
    /// 用给定密钥池和默认值构造
    pub fn new(api_keys: CredentialPool) -> Self {
        Self {
            api_keys,
            upstream: UpstreamConfig::default(),
            chat: ChatPolicy::default(),
        }
    }

    /// 从 YAML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file_with(path, |name| std::env::var(name).ok())
    }

    /// 从 YAML 文件加载配置，`${VAR}` 通过查找函数替换
    pub fn from_file_with<P, F>(path: P, lookup: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let content = fs::read_to_string(path)?;
        let content = Self::replace_vars(&content, lookup)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从进程环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 通过变量查找函数构造配置
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_keys = lookup("GEMINI_API_KEYS")
            .or_else(|| lookup("GEMINI_API_KEY"))
            .ok_or_else(|| RelayError::config("环境变量未找到: GEMINI_API_KEYS"))?;

        let mut config = Config::new(CredentialPool::parse(&raw_keys)?);

        if let Some(model) = lookup("GEMINI_MODEL") {
            config.upstream.model = model;
        }
        if let Some(api_base) = lookup("GEMINI_API_BASE") {
            config.upstream.api_base = api_base;
        }
        if let Some(secs) = lookup("GEMINI_TIMEOUT_SECS") {
            config.upstream.timeout_secs = parse_var("GEMINI_TIMEOUT_SECS", &secs)?;
        }
        if let Some(preamble) = lookup("SYSTEM_PREAMBLE") {
            if !preamble.trim().is_empty() {
                config.chat.system_preamble = Some(preamble);
            }
        }
        if let Some(limit) = lookup("HISTORY_LIMIT") {
            config.chat.history_limit = parse_var("HISTORY_LIMIT", &limit)?;
        }
        if let Some(bytes) = lookup("MAX_BODY_BYTES") {
            config.chat.max_body_bytes = parse_var("MAX_BODY_BYTES", &bytes)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// 替换配置中的变量 ${VAR}
    fn replace_vars<F>(content: &str, lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
            .map_err(|e| RelayError::internal(e.to_string()))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = lookup(var_name).ok_or_else(|| {
                RelayError::config(format!("环境变量未找到: {}", var_name))
            })?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// 验证配置
    fn validate(&self) -> Result<()> {
        if self.api_keys.is_empty() {
            return Err(RelayError::config("API 密钥列表不能为空"));
        }
        if self.upstream.model.trim().is_empty() {
            return Err(RelayError::config("model 不能为空"));
        }
        if self.upstream.api_base.trim().is_empty() {
            return Err(RelayError::config("api_base 不能为空"));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(RelayError::config("timeout_secs 必须大于 0"));
        }
        if self.chat.history_limit == 0 {
            return Err(RelayError::config("history_limit 必须大于 0"));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RelayError::config(format!("环境变量 {} 的值无效: {}", name, value)))
}
