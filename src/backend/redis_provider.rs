//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Redis连接的提供者接口和默认实现。

use crate::{
    config::RedisConfig,
    error::{CacheError, Result},
    utils::redaction::redact_connection_string,
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use secrecy::ExposeSecret;
use tokio::time::{timeout, Duration};
use tracing::info;

/// Redis连接提供者
///
/// 把建立连接的细节与缓存后端分开，测试中可以替换。
#[async_trait]
pub trait RedisProvider: Send + Sync {
    async fn get_standalone_client(&self, config: &RedisConfig) -> Result<(Client, ConnectionManager)>;
    async fn get_cluster_client(&self, config: &RedisConfig) -> Result<redis::cluster::ClusterClient>;
    async fn get_sentinel_client(&self, config: &RedisConfig) -> Result<(Client, ConnectionManager)>;
}

pub struct DefaultRedisProvider;

impl DefaultRedisProvider {
    fn connection_string(config: &RedisConfig) -> String {
        let raw = config.connection_string.expose_secret();
        if config.enable_tls && !raw.starts_with("rediss://") {
            raw.replace("redis://", "rediss://")
        } else {
            raw.to_string()
        }
    }

    async fn connect_manager(client: &Client, config: &RedisConfig, target: &str) -> Result<ConnectionManager> {
        match timeout(
            Duration::from_millis(config.connection_timeout_ms),
            client.get_connection_manager(),
        )
        .await
        {
            Ok(res) => Ok(res?),
            Err(_) => Err(CacheError::BackendError(format!(
                "Connection timed out after {}ms. Target: {}",
                config.connection_timeout_ms, target
            ))),
        }
    }
}

#[async_trait]
impl RedisProvider for DefaultRedisProvider {
    async fn get_standalone_client(&self, config: &RedisConfig) -> Result<(Client, ConnectionManager)> {
        let connection_string = Self::connection_string(config);
        let client = Client::open(connection_string.as_str())?;
        info!("Connecting to Redis at {}", redact_connection_string(&connection_string));
        let manager = Self::connect_manager(&client, config, "standalone").await?;
        Ok((client, manager))
    }

    async fn get_cluster_client(&self, config: &RedisConfig) -> Result<redis::cluster::ClusterClient> {
        let cluster_config = config
            .cluster
            .as_ref()
            .ok_or_else(|| CacheError::ConfigError("Cluster configuration is missing".to_string()))?;

        let mut builder = redis::cluster::ClusterClient::builder(cluster_config.nodes.clone());
        if let Some(password) = &config.password {
            builder = builder.password(password.expose_secret().to_string());
        }
        // CAS要求读写都落在主节点，不开启从节点读取
        let client = builder.build()?;

        timeout(
            Duration::from_millis(config.connection_timeout_ms),
            client.get_async_connection(),
        )
        .await
        .map_err(|_| {
            CacheError::BackendError(format!(
                "Cluster connection timed out after {}ms",
                config.connection_timeout_ms
            ))
        })??;
        Ok(client)
    }

    async fn get_sentinel_client(&self, config: &RedisConfig) -> Result<(Client, ConnectionManager)> {
        let sentinel_config = config
            .sentinel
            .as_ref()
            .ok_or_else(|| CacheError::ConfigError("Sentinel configuration is missing".to_string()))?;

        info!("Initializing Sentinel client with automatic failover support");

        // redis+sentinel://[:password@]host:port[,host:port]/service_name
        let mut url = "redis+sentinel://".to_string();
        if let Some(password) = &config.password {
            url.push_str(&format!(":{}@", password.expose_secret()));
        }

        let nodes: Vec<String> = sentinel_config
            .nodes
            .iter()
            .map(|n| {
                n.trim_start_matches("redis://")
                    .trim_start_matches("redis+sentinel://")
                    .to_string()
            })
            .collect();
        if nodes.is_empty() {
            return Err(CacheError::ConfigError("No sentinel nodes provided".to_string()));
        }

        url.push_str(&nodes.join(","));
        url.push('/');
        url.push_str(&sentinel_config.master_name);

        let client = Client::open(url)?;
        let manager = Self::connect_manager(&client, config, &sentinel_config.master_name).await?;
        Ok((client, manager))
    }
}
