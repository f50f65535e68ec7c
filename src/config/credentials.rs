use crate::error::RelayError;
use crate::Result;
use serde::Deserialize;
use std::fmt;

/// 长度不超过此值的密钥不显示任何字符
const MIN_UNMASKED_KEY_CHARS: usize = 8;

/// 有序的 API 密钥池
///
/// 启动时从逗号分隔的字符串解析一次，之后只读。顺序即回退顺序。
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct CredentialPool {
    keys: Vec<String>,
}

impl CredentialPool {
    /// 解析逗号分隔的密钥列表（去除空白、跳过空段、去重保序）
    pub fn parse(raw: &str) -> Result<Self> {
        let mut keys: Vec<String> = Vec::new();
        for key in raw.split(',').map(str::trim).filter(|k| !k.is_empty()) {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }

        if keys.is_empty() {
            return Err(RelayError::config("API 密钥列表不能为空"));
        }

        Ok(Self { keys })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// 构造时保证非空，恒为 false
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl TryFrom<String> for CredentialPool {
    type Error = RelayError;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.keys.iter().map(|k| mask_key(k)))
            .finish()
    }
}

/// 日志中使用的密钥标识：只保留末尾 4 个字符，短密钥完全隐藏
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= MIN_UNMASKED_KEY_CHARS {
        return "***".to_string();
    }
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("***{}", suffix)
}
