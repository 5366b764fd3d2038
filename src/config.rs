//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的配置结构和解析逻辑。

use crate::error::{CacheError, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub const CONFIG_VERSION: u32 = 1;

/// 最长缓存过期时间：30天
pub const MAX_EXPIRY_SECS: u32 = 86400 * 30;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache_control: CacheControlConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// 全局配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GlobalConfig {
    /// 缓存命名空间，作为所有缓存键的前缀
    pub namespace: String,
    /// 序列化类型
    pub serialization: SerializationType,
    /// 是否压缩缓存值
    pub compress: bool,
    /// 非事务写入成功后的缓存策略
    pub put_policy: PutPolicy,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            namespace: "oxentity".to_string(),
            serialization: SerializationType::Json,
            compress: false,
            put_policy: PutPolicy::WriteThrough,
        }
    }
}

/// 序列化类型枚举
#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SerializationType {
    /// JSON序列化
    #[default]
    Json,
}

/// 非事务 put 成功后对缓存的处理方式
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PutPolicy {
    /// 通过CAS协议把写入的实体放入缓存
    #[default]
    WriteThrough,
    /// 仅清空对应的缓存键
    Invalidate,
}

/// 重试配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RetryConfig {
    /// 每次后端调用的最大尝试次数
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 4 }
    }
}

/// 缓存策略配置
///
/// 没有单独配置的实体类型使用 `default_expiry_secs`；
/// 过期时间为 `None` 表示不缓存，为 0 表示永不过期。
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct CacheControlConfig {
    pub default_expiry_secs: Option<u32>,
    pub kinds: HashMap<String, KindCacheConfig>,
}

/// 单个实体类型的缓存策略
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct KindCacheConfig {
    pub cacheable: bool,
    pub expiry_secs: Option<u32>,
}

impl Default for KindCacheConfig {
    fn default() -> Self {
        Self {
            cacheable: true,
            expiry_secs: None,
        }
    }
}

/// 缓存后端配置
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// 进程内存后端
    #[default]
    Memory,
    /// Redis后端
    Redis(RedisConfig),
}

/// Redis后端配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis模式
    pub mode: RedisMode,
    /// 连接字符串
    pub connection_string: SecretString,
    /// 连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// 命令执行超时时间（毫秒）
    pub command_timeout_ms: u64,
    /// Redis 密码（可选）
    pub password: Option<SecretString>,
    /// 是否启用 TLS
    pub enable_tls: bool,
    /// 哨兵配置
    pub sentinel: Option<SentinelConfig>,
    /// 集群配置
    pub cluster: Option<ClusterConfig>,
    /// CAS版本号的存活时间（秒），应远大于任何一次读-写往返的耗时
    pub version_ttl_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            mode: RedisMode::Standalone,
            connection_string: SecretString::new("redis://localhost:6379".to_string().into()),
            connection_timeout_ms: 5000,
            command_timeout_ms: 3000,
            password: None,
            enable_tls: false,
            sentinel: None,
            cluster: None,
            version_ttl_secs: 86400,
        }
    }
}

/// 哨兵配置
#[derive(Deserialize, Clone, Debug)]
pub struct SentinelConfig {
    /// 主节点名称
    pub master_name: String,
    /// 哨兵节点列表
    pub nodes: Vec<String>,
}

/// 集群配置
#[derive(Deserialize, Clone, Debug)]
pub struct ClusterConfig {
    /// 初始节点列表
    pub nodes: Vec<String>,
}

/// Redis模式枚举
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    /// 单机模式
    #[default]
    Standalone,
    /// 哨兵模式
    Sentinel,
    /// 集群模式
    Cluster,
}

impl Config {
    /// 从TOML字符串解析配置并验证
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate().map_err(CacheError::ConfigError)?;
        Ok(config)
    }

    /// 从TOML文件加载配置并验证
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有值在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = self.config_version {
            if version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        let namespace = &self.global.namespace;
        if namespace.is_empty() {
            return Err("Namespace cannot be empty".to_string());
        }
        if namespace.len() > 64 {
            return Err(format!(
                "Namespace '{}' exceeds maximum length of 64 characters",
                namespace
            ));
        }
        if namespace.chars().any(|c| c.is_whitespace() || c == '{' || c == '}') {
            return Err(format!(
                "Namespace '{}' cannot contain whitespace or braces",
                namespace
            ));
        }

        if !(1..=16).contains(&self.retry.max_attempts) {
            return Err("retry.max_attempts must be between 1 and 16".to_string());
        }

        if let Some(expiry) = self.cache_control.default_expiry_secs {
            if expiry > MAX_EXPIRY_SECS {
                return Err("Default expiry cannot exceed 30 days (2592000 seconds)".to_string());
            }
        }

        for (kind, policy) in &self.cache_control.kinds {
            if kind.is_empty() {
                return Err("Kind name cannot be empty".to_string());
            }
            if let Some(expiry) = policy.expiry_secs {
                if expiry > MAX_EXPIRY_SECS {
                    return Err(format!("Kind '{}' expiry cannot exceed 30 days", kind));
                }
            }
        }

        if let BackendConfig::Redis(redis) = &self.backend {
            if !(100..=30000).contains(&redis.connection_timeout_ms) {
                return Err("connection_timeout_ms must be between 100 and 30000 ms".to_string());
            }
            if !(100..=60000).contains(&redis.command_timeout_ms) {
                return Err("command_timeout_ms must be between 100 and 60000 ms".to_string());
            }
            if redis.version_ttl_secs < 60 {
                return Err("version_ttl_secs must be at least 60 seconds".to_string());
            }
            match redis.mode {
                RedisMode::Sentinel if redis.sentinel.is_none() => {
                    return Err("Sentinel mode requires a [backend.sentinel] section".to_string());
                }
                RedisMode::Cluster if redis.cluster.is_none() => {
                    return Err("Cluster mode requires a [backend.cluster] section".to_string());
                }
                _ => {}
            }
        }

        Ok(())
    }
}
