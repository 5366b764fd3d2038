//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 统一工具模块
//!
//! 提供测试、基准和命令行共用的工具函数，包括：
//! - 日志设置
//! - 配置创建
//! - Redis连接检查
//! - 命名空间生成

pub mod redaction;

use crate::config::{BackendConfig, CacheControlConfig, Config, GlobalConfig, RedisConfig, RedisMode};
use secrecy::SecretString;
use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .try_init()
            .ok();
    });
}

/// 创建使用内存后端、所有类型都可缓存的配置
pub fn create_memory_config(namespace: &str, expiry_secs: u32) -> Config {
    Config {
        global: GlobalConfig {
            namespace: namespace.to_string(),
            ..Default::default()
        },
        cache_control: CacheControlConfig {
            default_expiry_secs: Some(expiry_secs),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// 创建单机Redis配置，地址可由 `OXENTITY_REDIS_URL` 覆盖
pub fn create_standalone_config() -> RedisConfig {
    let url = std::env::var("OXENTITY_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisConfig {
        mode: RedisMode::Standalone,
        connection_string: SecretString::new(url.into()),
        ..Default::default()
    }
}

/// 创建使用单机Redis后端的配置
pub fn create_redis_config(namespace: &str, expiry_secs: u32) -> Config {
    Config {
        backend: BackendConfig::Redis(create_standalone_config()),
        ..create_memory_config(namespace, expiry_secs)
    }
}

/// 是否运行需要Redis的测试
pub fn is_redis_available() -> bool {
    std::env::var("OXENTITY_SKIP_REDIS_TESTS").is_err()
}

/// 检查指定URL的Redis是否可连接
pub async fn is_redis_available_url(url: &str) -> bool {
    let client = match redis::Client::open(url) {
        Ok(c) => c,
        Err(_) => return false,
    };

    matches!(
        tokio::time::timeout(
            Duration::from_secs(1),
            client.get_multiplexed_async_connection(),
        )
        .await,
        Ok(Ok(_))
    )
}

/// 生成唯一的命名空间，避免测试之间互相影响
pub fn generate_unique_namespace(base: &str) -> String {
    format!("{}_{}", base, uuid::Uuid::new_v4().simple())
}
