//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - JWT认证
//! - 消息存储
//! - 实时连接参数（消息长度、输入状态窗口、写超时、队列容量）
//!
//! 加载顺序：内置默认值 → YAML 配置文件 → `CHATROOM_` 前缀的环境变量。
//! 环境变量使用双下划线分隔层级，例如 `CHATROOM_REALTIME__SEND_TIMEOUT_MS=5000`。

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "chatroom.yaml";

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "CHATROOM_CONFIG";

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// 消息存储配置
    pub database: DatabaseConfig,
    /// 实时连接配置
    pub realtime: RealtimeConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "dev-secret-key-not-for-production-use-minimum-32-chars".to_string(),
            expiration_hours: 24,
        }
    }
}

/// 数据库配置；未设置 url 时使用内存存储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// 实时连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// 消息正文字符上限
    pub max_message_chars: usize,
    /// 输入状态有效窗口（毫秒）
    pub typing_window_ms: u64,
    /// 单次写入连接的超时（毫秒），超时视为连接失效
    pub send_timeout_ms: u64,
    /// 每个连接的出站队列容量
    pub outbound_queue_capacity: usize,
    /// 每个连接的入站队列容量
    pub inbound_queue_capacity: usize,
    /// 单次历史消息查询的最大条数
    pub history_page_limit: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 4000,
            typing_window_ms: 3000,
            send_timeout_ms: 3000,
            outbound_queue_capacity: 256,
            inbound_queue_capacity: 64,
            history_page_limit: 100,
        }
    }
}

impl RealtimeConfig {
    pub fn typing_window(&self) -> Duration {
        Duration::from_millis(self.typing_window_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl AppConfig {
    /// 构建配置源：默认值 → YAML 文件（可选）→ 环境变量
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("CHATROOM_").split("__"))
    }

    /// 加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config: AppConfig = Self::figment(path).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证JWT密钥长度（至少256位/32字节）
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "expiration_hours must be greater than 0".to_string(),
            ));
        }

        if let Some(url) = &self.database.url {
            if url.is_empty() {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "Database URL cannot be empty".to_string(),
                ));
            }
            if self.database.max_connections == 0 {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "Max connections must be greater than 0".to_string(),
                ));
            }
        }

        let realtime = &self.realtime;
        let zero_field = [
            ("max_message_chars", realtime.max_message_chars as u64),
            ("typing_window_ms", realtime.typing_window_ms),
            ("send_timeout_ms", realtime.send_timeout_ms),
            ("outbound_queue_capacity", realtime.outbound_queue_capacity as u64),
            ("inbound_queue_capacity", realtime.inbound_queue_capacity as u64),
            ("history_page_limit", u64::from(realtime.history_page_limit)),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);

        if let Some((field, _)) = zero_field {
            return Err(ConfigError::InvalidRealtimeConfig(format!(
                "{field} must be greater than 0"
            )));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid realtime configuration: {0}")]
    InvalidRealtimeConfig(String),
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}
