use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML 解析错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP 请求错误: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{0}")]
    InvalidInput(String),

    #[error("上游 API 错误: {status} - {message}")]
    UpstreamError { status: u16, message: String },

    #[error("所有 API 密钥均失败 (尝试 {attempts} 次): {last_error}")]
    AllCredentialsExhausted { attempts: usize, last_error: String },

    #[error("内部错误: {0}")]
    InternalError(String),
}

impl RelayError {
    pub fn config(msg: impl Into<String>) -> Self {
        RelayError::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        RelayError::InternalError(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        RelayError::InvalidInput(msg.into())
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        RelayError::UpstreamError {
            status,
            message: message.into(),
        }
    }
}
