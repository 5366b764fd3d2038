//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了指标查询命令的实现。

use crate::cli::MetricsArgs;
use crate::config::Config;
use crate::manager::{get_memcache, CacheManager, MANAGER};
use crate::metrics::{get_metrics_string, GLOBAL_METRICS};
use anyhow::{Context, Result};

pub async fn execute(args: &MetricsArgs) -> Result<()> {
    if let Some(path) = &args.config {
        let config = Config::from_file(path)
            .with_context(|| format!("Invalid configuration: {}", path.display()))?;
        CacheManager::init(config).await?;
    }

    if args.prometheus {
        println!("{}", get_metrics_string());
        return Ok(());
    }

    println!("=== Cache Metrics ===\n");

    match &args.namespace {
        Some(namespace) => {
            let memcache = get_memcache(namespace)?;
            print_namespace(namespace);
            let kinds = memcache.stats().snapshot();
            if !kinds.is_empty() {
                println!("\nKinds:");
                for (kind, stats) in kinds {
                    println!(
                        "  {}: {} hits, {} misses ({}%)",
                        kind,
                        stats.hits,
                        stats.misses,
                        stats.percent()
                    );
                }
            }
        }
        None => {
            if MANAGER.is_empty() {
                println!("No namespaces registered.");
            }
            for entry in MANAGER.iter() {
                print_namespace(entry.key());
            }
        }
    }

    Ok(())
}

fn print_namespace(namespace: &str) {
    let hits = GLOBAL_METRICS.request_count(namespace, "memcache", "get", "hit");
    let misses = GLOBAL_METRICS.request_count(namespace, "memcache", "get", "miss");
    let total = hits + misses;

    print!("  {}: {} lookups", namespace, total);
    if total > 0 {
        let hit_rate = (hits as f64 / total as f64 * 100.0).round();
        print!(", {:.1}% hit rate", hit_rate);
    }
    println!();

    if let Some(status) = GLOBAL_METRICS.backend_health_status.get(namespace) {
        let status_str = match *status {
            0 => "Unreachable",
            1 => "Healthy",
            _ => "Unknown",
        };
        println!("  Health: {}", status_str);
    }
}
