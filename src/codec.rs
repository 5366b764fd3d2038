//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存条目的编码方式。

use crate::config::SerializationType;
use crate::error::{CacheError, Result};
use serde::{de::DeserializeOwned, Serialize};

/// 缓存值编解码器
///
/// 使用 JSON 编码，可选 gzip 压缩。编码结果永远非空，
/// 后端依赖这一点用空字节串表示“已清空”的标记。
#[derive(Clone, Debug, Default)]
pub struct Codec {
    compress: bool,
}

impl Codec {
    /// 创建JSON编解码器
    pub fn json() -> Self {
        Self { compress: false }
    }

    /// 创建启用压缩的JSON编解码器
    pub fn compressed_json() -> Self {
        Self { compress: true }
    }

    /// 根据配置创建编解码器
    pub fn from_config(serialization: &SerializationType, compress: bool) -> Self {
        match serialization {
            SerializationType::Json => Self { compress },
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    /// 编码值为字节数组
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        if !self.compress {
            return Ok(json);
        }

        #[cfg(feature = "flate2")]
        {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            use std::io::Write;

            let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
            encoder
                .write_all(&json)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| CacheError::Serialization(e.to_string()))
        }

        #[cfg(not(feature = "flate2"))]
        {
            Ok(json)
        }
    }

    /// 从字节数组解码值
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        if data.is_empty() {
            return Err(CacheError::Serialization("empty payload".to_string()));
        }

        #[cfg(feature = "flate2")]
        if self.compress {
            use flate2::read::GzDecoder;
            use std::io::Read;

            let mut decoded = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut decoded)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
            return serde_json::from_slice(&decoded)
                .map_err(|e| CacheError::Serialization(e.to_string()));
        }

        serde_json::from_slice(data).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}
