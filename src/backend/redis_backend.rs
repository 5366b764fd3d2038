//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于Redis的分布式缓存后端。
//!
//! 每个缓存键对应两个Redis键：值键 `{key}` 和版本键 `{key}:v`。
//! 花括号是集群模式下的哈希标签，保证两者落在同一个槽位，
//! 使Lua脚本可以原子地比较并更新版本号。不同缓存键落在不同槽位，
//! 集群模式下批量操作按键拆成多个管道并发执行。

use super::redis_provider::{DefaultRedisProvider, RedisProvider};
use super::{CacheBackend, CasPut, CasToken, IdentifiableValue};
use crate::config::{RedisConfig, RedisMode};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use redis::aio::ConnectionManager;
use redis::{Client, FromRedisValue, Pipeline};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, instrument};

/// 读取值和版本号，值不存在时返回空串，版本号不存在时返回 "0"
const GET_IDENTIFIABLE_SCRIPT: &str = r#"
local val = redis.call('GET', KEYS[1])
if not val then val = '' end
local ver = redis.call('GET', KEYS[2])
if not ver then ver = '0' end
return {val, ver}
"#;

/// 写入值并递增版本号
///
/// ARGV[1] 为期望的版本号，为空串时不做比较；ARGV[2] 为值，空串表示清空；
/// ARGV[3] 为值的过期秒数（0 为永不过期）；ARGV[4] 为版本号的存活秒数。
/// 版本号至少与值存活得一样久，否则值还在时版本号回到 0，会让旧令牌重新生效。
const STORE_SCRIPT: &str = r#"
if ARGV[1] ~= '' then
  local ver = redis.call('GET', KEYS[2])
  if not ver then ver = '0' end
  if ver ~= ARGV[1] then return 0 end
end
local expiry = tonumber(ARGV[3])
if ARGV[2] == '' then
  redis.call('DEL', KEYS[1])
elseif expiry > 0 then
  redis.call('SET', KEYS[1], ARGV[2], 'EX', expiry)
else
  redis.call('SET', KEYS[1], ARGV[2])
end
redis.call('INCR', KEYS[2])
if ARGV[2] ~= '' and expiry == 0 then
  redis.call('PERSIST', KEYS[2])
else
  redis.call('EXPIRE', KEYS[2], math.max(expiry, tonumber(ARGV[4])))
end
return 1
"#;

/// Redis缓存后端实现
#[derive(Clone)]
pub enum RedisBackend {
    Standalone {
        client: Client,
        manager: ConnectionManager,
        command_timeout_ms: u64,
        version_ttl_secs: u64,
    },
    Cluster {
        client: redis::cluster::ClusterClient,
        command_timeout_ms: u64,
        version_ttl_secs: u64,
    },
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone { .. } => write!(f, "RedisBackend::Standalone"),
            Self::Cluster { .. } => write!(f, "RedisBackend::Cluster"),
        }
    }
}

fn value_key(key: &str) -> String {
    format!("{{{}}}", key)
}

fn version_key(key: &str) -> String {
    format!("{{{}}}:v", key)
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl std::future::Future<Output = redis::RedisResult<T>>,
) -> Result<T> {
    match timeout(limit, fut).await {
        Ok(res) => Ok(res?),
        Err(_) => Err(CacheError::Timeout(format!(
            "Redis command timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

impl RedisBackend {
    /// 创建新的Redis缓存后端
    #[instrument(skip(config), level = "info", name = "init_redis_backend")]
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        Self::new_with_provider(config, Arc::new(DefaultRedisProvider)).await
    }

    /// 使用指定的Redis提供者创建缓存后端
    #[instrument(skip(config, provider), level = "info", fields(mode = ?config.mode))]
    pub async fn new_with_provider(config: &RedisConfig, provider: Arc<dyn RedisProvider>) -> Result<Self> {
        debug!("Initializing RedisBackend with mode: {:?}", config.mode);
        match config.mode {
            RedisMode::Standalone => {
                let (client, manager) = provider.get_standalone_client(config).await?;
                Ok(RedisBackend::Standalone {
                    client,
                    manager,
                    command_timeout_ms: config.command_timeout_ms,
                    version_ttl_secs: config.version_ttl_secs,
                })
            }
            RedisMode::Sentinel => {
                let (client, manager) = provider.get_sentinel_client(config).await?;
                Ok(RedisBackend::Standalone {
                    client,
                    manager,
                    command_timeout_ms: config.command_timeout_ms,
                    version_ttl_secs: config.version_ttl_secs,
                })
            }
            RedisMode::Cluster => {
                let client = provider.get_cluster_client(config).await?;
                Ok(RedisBackend::Cluster {
                    client,
                    command_timeout_ms: config.command_timeout_ms,
                    version_ttl_secs: config.version_ttl_secs,
                })
            }
        }
    }

    /// 获取命令超时时间（毫秒）
    pub fn command_timeout_ms(&self) -> u64 {
        match self {
            RedisBackend::Standalone { command_timeout_ms, .. } => *command_timeout_ms,
            RedisBackend::Cluster { command_timeout_ms, .. } => *command_timeout_ms,
        }
    }

    fn version_ttl_secs(&self) -> u64 {
        match self {
            RedisBackend::Standalone { version_ttl_secs, .. } => *version_ttl_secs,
            RedisBackend::Cluster { version_ttl_secs, .. } => *version_ttl_secs,
        }
    }

    /// 在命令超时限制内执行管道
    async fn query<T: FromRedisValue>(&self, pipe: &Pipeline) -> Result<T> {
        let limit = Duration::from_millis(self.command_timeout_ms());
        let fut = async {
            match self {
                RedisBackend::Standalone { manager, .. } => {
                    pipe.query_async::<T>(&mut manager.clone()).await
                }
                RedisBackend::Cluster { client, .. } => {
                    let mut conn = client.get_async_connection().await?;
                    pipe.query_async::<T>(&mut conn).await
                }
            }
        };
        with_timeout(limit, fut).await
    }

    /// 按键构造批量命令的管道
    ///
    /// 单机模式下所有命令放进一个管道；集群模式下管道不能跨槽位，每个键单独一个管道。
    fn pipelines(&self, count: usize, build: impl Fn(&mut Pipeline, usize)) -> Vec<Pipeline> {
        let per_pipeline = match self {
            RedisBackend::Standalone { .. } => count.max(1),
            RedisBackend::Cluster { .. } => 1,
        };
        let indices: Vec<usize> = (0..count).collect();
        indices
            .chunks(per_pipeline)
            .map(|chunk| {
                let mut pipe = redis::pipe();
                for &i in chunk {
                    build(&mut pipe, i);
                }
                pipe
            })
            .collect()
    }

    /// 执行 [`Self::pipelines`] 构造的管道，按命令顺序合并回复
    ///
    /// 集群模式下复用同一个连接并发执行；整体受命令超时限制。
    async fn query_all<T: FromRedisValue + Send>(&self, pipes: &[Pipeline]) -> Result<Vec<T>> {
        let limit = Duration::from_millis(self.command_timeout_ms());
        let fut = async {
            match self {
                RedisBackend::Standalone { manager, .. } => {
                    let mut replies = Vec::new();
                    for pipe in pipes {
                        replies.extend(pipe.query_async::<Vec<T>>(&mut manager.clone()).await?);
                    }
                    Ok(replies)
                }
                RedisBackend::Cluster { client, .. } => {
                    let conn = client.get_async_connection().await?;
                    let replies = try_join_all(pipes.iter().map(|pipe| {
                        let mut conn = conn.clone();
                        async move { pipe.query_async::<Vec<T>>(&mut conn).await }
                    }))
                    .await?;
                    Ok(replies.into_iter().flatten().collect())
                }
            }
        };
        with_timeout(limit, fut).await
    }

    fn store_command(&self, pipe: &mut Pipeline, key: &str, token: Option<CasToken>, value: Option<&[u8]>, expiry_secs: u64) {
        pipe.cmd("EVAL")
            .arg(STORE_SCRIPT)
            .arg(2)
            .arg(value_key(key))
            .arg(version_key(key))
            .arg(token.map(|t| t.0.to_string()).unwrap_or_default())
            .arg(value.unwrap_or_default())
            .arg(expiry_secs)
            .arg(self.version_ttl_secs());
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn get_identifiables(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, IdentifiableValue<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let pipes = self.pipelines(keys.len(), |pipe, i| {
            pipe.cmd("EVAL")
                .arg(GET_IDENTIFIABLE_SCRIPT)
                .arg(2)
                .arg(value_key(&keys[i]))
                .arg(version_key(&keys[i]));
        });
        let replies: Vec<(Vec<u8>, String)> = self.query_all(&pipes).await?;

        let mut result = HashMap::with_capacity(keys.len());
        for (key, (value, version)) in keys.iter().zip(replies) {
            let version = version.parse::<u64>().map_err(|e| {
                CacheError::BackendError(format!("Invalid version for key {}: {}", key, e))
            })?;
            let value = if value.is_empty() { None } else { Some(value) };
            result.insert(key.clone(), IdentifiableValue::new(value, CasToken(version)));
        }
        Ok(result)
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn get_all(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let pipes = self.pipelines(keys.len(), |pipe, i| {
            pipe.get(value_key(&keys[i]));
        });
        let replies: Vec<Option<Vec<u8>>> = self.query_all(&pipes).await?;
        Ok(keys
            .iter()
            .zip(replies)
            .filter_map(|(key, value)| value.filter(|v| !v.is_empty()).map(|v| (key.clone(), v)))
            .collect())
    }

    #[instrument(skip(self, values), level = "debug", fields(key_count = values.len()))]
    async fn put_all(&self, values: &HashMap<String, Option<Vec<u8>>>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let ordered: Vec<(&String, &Option<Vec<u8>>)> = values.iter().collect();
        let pipes = self.pipelines(ordered.len(), |pipe, i| {
            let (key, value) = ordered[i];
            self.store_command(pipe, key, None, value.as_deref(), 0);
            pipe.ignore();
        });
        self.query_all::<()>(&pipes).await?;
        Ok(())
    }

    #[instrument(skip(self, values), level = "debug", fields(key_count = values.len()))]
    async fn put_if_untouched(&self, values: &HashMap<String, CasPut>) -> Result<HashSet<String>> {
        if values.is_empty() {
            return Ok(HashSet::new());
        }
        let ordered: Vec<(&String, &CasPut)> = values.iter().collect();
        let pipes = self.pipelines(ordered.len(), |pipe, i| {
            let (key, put) = ordered[i];
            let expiry_secs = put.expiry.map(|d| d.as_secs().max(1)).unwrap_or(0);
            self.store_command(pipe, key, Some(put.token), put.value.as_deref(), expiry_secs);
        });
        let replies: Vec<i64> = self.query_all(&pipes).await?;

        let mut successes = HashSet::new();
        for ((key, put), reply) in ordered.into_iter().zip(replies) {
            if reply == 1 {
                successes.insert(key.clone());
            } else {
                debug!("CAS rejected: key={}, token={:?}", key, put.token);
            }
        }
        Ok(successes)
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn delete_all(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let pipes = self.pipelines(keys.len(), |pipe, i| {
            self.store_command(pipe, &keys[i], None, None, 0);
            pipe.ignore();
        });
        self.query_all::<()>(&pipes).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn ping(&self) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.cmd("PING");
        let (response,): (String,) = self.query(&pipe).await?;
        debug!("RedisBackend ping response: {}", response);
        Ok(())
    }
}
