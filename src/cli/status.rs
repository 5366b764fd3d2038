//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了配置校验和后端状态命令的实现。

use crate::backend::{self, CacheBackend};
use crate::cli::{StatusArgs, ValidateArgs};
use crate::config::{BackendConfig, Config};
use crate::metrics::GLOBAL_METRICS;
use crate::utils::redaction::redact_connection_string;
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::time::Instant;

pub fn validate(args: &ValidateArgs) -> Result<()> {
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Invalid configuration: {}", args.config.display()))?;
    println!("Configuration OK: {}", args.config.display());
    print_summary(&config);
    Ok(())
}

pub async fn execute(args: &StatusArgs) -> Result<()> {
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Invalid configuration: {}", args.config.display()))?;
    let namespace = &config.global.namespace;

    if args.verbose {
        print_summary(&config);
        println!();
    }

    let start = Instant::now();
    let result = match backend::connect(&config.backend).await {
        Ok(cache) => cache.ping().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            GLOBAL_METRICS.set_health(namespace, 1);
            println!("Namespace: {}", namespace);
            println!("Status:    ✅ HEALTHY ({} ms)", start.elapsed().as_millis());
            Ok(())
        }
        Err(e) => {
            GLOBAL_METRICS.set_health(namespace, 0);
            println!("Namespace: {}", namespace);
            println!("Status:    ❌ UNREACHABLE");
            Err(e).context("Cache backend is not reachable")
        }
    }
}

fn print_summary(config: &Config) {
    println!("Namespace:     {}", config.global.namespace);
    println!("Put policy:    {:?}", config.global.put_policy);
    println!("Max attempts:  {}", config.retry.max_attempts);
    match config.cache_control.default_expiry_secs {
        Some(secs) => println!("Default expiry: {}s", secs),
        None => println!("Default expiry: not cached"),
    }
    for (kind, policy) in &config.cache_control.kinds {
        println!(
            "  {}: cacheable={}, expiry={:?}",
            kind, policy.cacheable, policy.expiry_secs
        );
    }
    match &config.backend {
        BackendConfig::Memory => println!("Backend:       memory"),
        BackendConfig::Redis(redis) => println!(
            "Backend:       redis ({:?}) {}",
            redis.mode,
            redact_connection_string(redis.connection_string.expose_secret())
        ),
    }
}
