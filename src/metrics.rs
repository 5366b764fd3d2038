//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存系统的指标收集和监控功能。

use dashmap::DashMap;
use lazy_static::lazy_static;
use std::sync::Arc;
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集和存储缓存系统的各种运行时指标
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 请求总数统计
    /// key: "namespace:layer:op:result"
    pub requests_total: Arc<DashMap<String, u64>>,
    /// 后端健康状态（0: 不健康, 1: 健康）
    pub backend_health_status: Arc<DashMap<String, u8>>,
    /// 操作耗时（累积时间和计数，用于计算平均值）
    /// key: "namespace:layer:op" -> (total_duration_secs, count)
    pub operation_duration: Arc<DashMap<String, (f64, u64)>>,
    /// 尚未触发的 future 数量
    pub pending_futures: Arc<DashMap<String, usize>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

impl Metrics {
    /// 记录请求指标
    ///
    /// # 参数
    ///
    /// * `namespace` - 缓存命名空间
    /// * `layer` - 所在层（memcache/backend/datastore）
    /// * `op` - 操作类型（get/put/cas/empty）
    /// * `result` - 操作结果（hit/miss/rejected/exhausted）
    pub fn record_request(&self, namespace: &str, layer: &str, op: &str, result: &str) {
        let span = span!(Level::DEBUG, "cache_request", namespace, layer, op, result);
        let _enter = span.enter();
        let key = format!("{}:{}:{}:{}", namespace, layer, op, result);
        *self.requests_total.entry(key).or_insert(0) += 1;
    }

    /// 记录操作耗时
    pub fn record_duration(&self, namespace: &str, layer: &str, op: &str, duration_secs: f64) {
        let key = format!("{}:{}:{}", namespace, layer, op);
        let mut entry = self.operation_duration.entry(key).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    /// 设置后端健康状态
    pub fn set_health(&self, namespace: &str, status: u8) {
        self.backend_health_status
            .insert(namespace.to_string(), status);
    }

    /// 设置尚未触发的 future 数量
    pub fn set_pending_futures(&self, scope: &str, count: usize) {
        self.pending_futures.insert(scope.to_string(), count);
    }

    /// 读取某个请求计数，不存在时为 0
    pub fn request_count(&self, namespace: &str, layer: &str, op: &str, result: &str) -> u64 {
        let key = format!("{}:{}:{}:{}", namespace, layer, op, result);
        self.requests_total.get(&key).map(|v| *v).unwrap_or(0)
    }
}

/// 获取指标字符串
///
/// 将所有指标格式化为Prometheus文本格式，用于监控系统采集
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let mut output = String::new();

    for entry in metrics.requests_total.iter() {
        let parts: Vec<&str> = entry.key().splitn(4, ':').collect();
        if parts.len() == 4 {
            output.push_str(&format!(
                "oxentity_requests_total{{namespace=\"{}\", layer=\"{}\", op=\"{}\", result=\"{}\"}} {}\n",
                parts[0], parts[1], parts[2], parts[3], entry.value()
            ));
        }
    }
    for entry in metrics.backend_health_status.iter() {
        output.push_str(&format!(
            "oxentity_backend_health_status{{namespace=\"{}\"}} {}\n",
            entry.key(),
            entry.value()
        ));
    }
    for entry in metrics.operation_duration.iter() {
        let (total, count) = *entry.value();
        let parts: Vec<&str> = entry.key().split(':').collect();
        if parts.len() == 3 {
            output.push_str(&format!(
                "oxentity_operation_duration_seconds_sum{{namespace=\"{}\", layer=\"{}\", op=\"{}\"}} {}\n",
                parts[0], parts[1], parts[2], total
            ));
            output.push_str(&format!(
                "oxentity_operation_duration_seconds_count{{namespace=\"{}\", layer=\"{}\", op=\"{}\"}} {}\n",
                parts[0], parts[1], parts[2], count
            ));
        }
    }
    for entry in metrics.pending_futures.iter() {
        output.push_str(&format!(
            "oxentity_pending_futures{{scope=\"{}\"}} {}\n",
            entry.key(),
            entry.value()
        ));
    }
    output
}
