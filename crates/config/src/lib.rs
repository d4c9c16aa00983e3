//! 统一配置中心
//!
//! 提供广播中心进程的配置，包括：
//! - 监听地址
//! - 命令队列与出站队列容量
//! - 入站帧大小限制
//!
//! 加载顺序：默认值 -> 可选配置文件（APP_CONFIG_FILE）-> 环境变量（APP_*）。

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// 服务配置
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    /// 广播中心配置
    #[serde(default)]
    #[validate(nested)]
    pub hub: HubConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8888,
        }
    }
}

/// 广播中心配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HubConfig {
    /// 调度器命令队列容量
    #[validate(range(min = 1))]
    pub command_queue_capacity: usize,
    /// 每个会话私有出站队列容量，写满即视为慢消费者
    #[validate(range(min = 1))]
    pub outbound_queue_capacity: usize,
    /// 单个入站帧的最大字节数
    #[validate(range(min = 1))]
    pub max_frame_bytes: usize,
    /// 是否允许客户端通过 join/leave 帧切换自己的房间
    pub allow_client_room_switch: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: 256,
            outbound_queue_capacity: 256,
            max_frame_bytes: 512 * 1024,
            allow_client_room_switch: true,
        }
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        ConfigError::Load(Box::new(value))
    }
}

impl AppConfig {
    /// Load config with precedence: defaults -> optional file (APP_CONFIG_FILE) -> env (APP_*)
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Self::defaults();
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig = fig.merge(Env::prefixed("APP_").split("__"));

        Self::from_figment(fig)
    }

    /// 以默认值为底的 figment，供调用方叠加其他来源
    pub fn defaults() -> Figment {
        Figment::new().merge(Serialized::defaults(AppConfig::default()))
    }

    /// 从任意 figment 提取并校验配置
    pub fn from_figment(fig: Figment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = fig.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 监听地址，形如 `0.0.0.0:8888`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::from_figment(AppConfig::defaults()).unwrap();
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.hub.command_queue_capacity, 256);
        assert_eq!(config.hub.outbound_queue_capacity, 256);
        assert_eq!(config.hub.max_frame_bytes, 512 * 1024);
        assert!(config.hub.allow_client_room_switch);
        assert_eq!(config.bind_address(), "0.0.0.0:8888");
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let fig = AppConfig::defaults().merge(Toml::string(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [hub]
            outbound_queue_capacity = 8
            "#,
        ));

        let config = AppConfig::from_figment(fig).unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.hub.outbound_queue_capacity, 8);
        // 未覆盖的字段保留默认值
        assert_eq!(config.hub.command_queue_capacity, 256);
    }

    #[test]
    fn test_zero_capacity_fails_validation() {
        let fig = AppConfig::defaults().merge(Toml::string(
            r#"
            [hub]
            outbound_queue_capacity = 0
            "#,
        ));

        let result = AppConfig::from_figment(fig);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_host_fails_validation() {
        let fig = AppConfig::defaults().merge(Json::string(r#"{"server": {"host": ""}}"#));
        assert!(AppConfig::from_figment(fig).is_err());
    }

    #[test]
    fn test_malformed_value_is_load_error() {
        let fig = AppConfig::defaults().merge(Yaml::string("hub:\n  max_frame_bytes: lots\n"));
        let result = AppConfig::from_figment(fig);
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
