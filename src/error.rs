//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存层与数据存储层的错误类型。

use thiserror::Error;

/// 缓存系统错误类型枚举
///
/// 缓存层内部的错误几乎都会在最底层被记录并吸收，
/// 只有配置、连接初始化等错误会真正返回给调用者。
#[derive(Error, Debug)]
pub enum CacheError {
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 缓存后端操作失败
    #[error("Backend error: {0}")]
    BackendError(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 操作不支持
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Redis错误
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 配置文件解析错误
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// 数据存储错误
    #[error("Datastore error: {0}")]
    Datastore(#[from] DatastoreError),
}

/// 数据存储错误
///
/// 异步操作的结果会被缓存在 future 中并可被多次读取，因此该类型实现了 `Clone`。
/// 缓存层从不解释这些错误，原样返回给调用者。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatastoreError {
    /// 乐观并发冲突（事务提交失败）
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// 事务已提交或已回滚
    #[error("Transaction is no longer active")]
    TransactionInactive,

    /// 数据存储不可用
    #[error("Datastore unavailable: {0}")]
    Unavailable(String),

    /// 等待结果超时
    #[error("Timed out: {0}")]
    Timeout(String),

    /// 操作被取消
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

/// 缓存操作结果类型别名
pub type Result<T> = std::result::Result<T, CacheError>;

/// 数据存储操作结果类型别名
pub type DatastoreResult<T> = std::result::Result<T, DatastoreError>;
