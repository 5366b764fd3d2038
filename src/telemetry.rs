//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了日志和链路追踪的初始化。

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// 初始化 tracing 订阅者
///
/// 组合控制台输出、`EnvFilter` 过滤以及 OpenTelemetry 层。没有配置导出器时
/// OpenTelemetry 层不会导出任何数据，但 span 上下文仍然可用于关联日志。
///
/// # 参数
///
/// * `service_name` - 服务名称，作为 tracer 名称
/// * `filter` - 过滤指令，例如 `"info,oxentity=debug"`；`RUST_LOG` 优先
///
/// 重复调用是安全的，只有第一次调用生效。
pub fn init_tracing(service_name: &str, filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let provider = SdkTracerProvider::builder().build();
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name.to_string());

    let subscriber = Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(tracing_opentelemetry::layer().with_tracer(tracer));

    let _ = tracing::subscriber::set_global_default(subscriber);
}
