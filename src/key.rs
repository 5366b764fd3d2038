//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了数据存储的键与实体模型。
//!
//! 对象映射与键编码不属于本库的职责，这里只提供缓存引擎所需的最小模型。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 键的标识部分
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyId {
    /// 字符串名称
    Name(String),
    /// 数值ID
    Id(i64),
}

/// 数据存储中的实体键
///
/// 键不可变，可比较、可哈希，其 `Display` 形式是稳定的路径表示，用于构造缓存键。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    kind: String,
    id: KeyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<Box<Key>>,
}

impl Key {
    /// 创建基于名称的键
    pub fn name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: KeyId::Name(name.into()),
            parent: None,
        }
    }

    /// 创建基于数值ID的键
    pub fn id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id: KeyId::Id(id),
            parent: None,
        }
    }

    /// 设置父键
    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key_id(&self) -> &KeyId {
        &self.id
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{}/", parent)?;
        }
        match &self.id {
            KeyId::Name(name) => write!(f, "{}({:?})", self.kind, name),
            KeyId::Id(id) => write!(f, "{}({})", self.kind, id),
        }
    }
}

/// 数据存储中的实体记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    key: Key,
    #[serde(default)]
    properties: BTreeMap<String, serde_json::Value>,
}

impl Entity {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
        }
    }

    /// 设置属性并返回自身，便于链式构造
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.properties
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// 替换实体的键（数据存储可能在写入时分配新键）
    pub fn set_key(&mut self, key: Key) {
        self.key = key;
    }
}
