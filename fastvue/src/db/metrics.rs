//! Database pool metrics sampling.
//!
//! Provides a background task that periodically samples the engine's pool and records gauges
//! through the `metrics` facade. Whether anything scrapes them depends on `enable_metrics`.

use std::time::Duration;

use metrics::gauge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::db::engine::Engine;

/// Configuration for pool metrics sampling
#[derive(Debug, Clone)]
pub struct PoolMetricsConfig {
    /// How often to sample pool metrics
    pub sample_interval: Duration,
}

impl Default for PoolMetricsConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(5),
        }
    }
}

/// Start the pool metrics sampler background task.
///
/// This task periodically samples the pool state and records:
/// - `fastvue_db_pool_connections_total` - Total connections in the pool
/// - `fastvue_db_pool_connections_idle` - Idle connections available
/// - `fastvue_db_pool_connections_in_use` - Connections currently in use
/// - `fastvue_db_pool_connections_max` - Maximum configured connections
///
/// Stops when `shutdown` is cancelled or the engine is disposed.
pub async fn run_pool_metrics_sampler(engine: Engine, config: PoolMetricsConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!("Starting pool metrics sampler with {:?} interval", config.sample_interval);

    let pool = engine.pool();

    // Record max connections once at startup (it doesn't change)
    gauge!("fastvue_db_pool_connections_max").set(pool.options().get_max_connections() as f64);

    let mut interval = tokio::time::interval(config.sample_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Pool metrics sampler shutting down");
                break;
            }
            _ = interval.tick() => {
                if engine.is_disposed() {
                    info!("Engine disposed, stopping pool metrics sampler");
                    break;
                }

                let size = pool.size();
                let idle = pool.num_idle();
                let in_use = (size as usize).saturating_sub(idle);

                gauge!("fastvue_db_pool_connections_total").set(size as f64);
                gauge!("fastvue_db_pool_connections_idle").set(idle as f64);
                gauge!("fastvue_db_pool_connections_in_use").set(in_use as f64);

                debug!(size, idle, in_use, "Sampled pool metrics");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test]
    async fn test_pool_metrics_sampler_runs_and_shuts_down(pool: PgPool) {
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let engine = Engine::from_pool(pool, "_sqlx_migrations");

        let config = PoolMetricsConfig {
            sample_interval: Duration::from_millis(10),
        };

        let handle = tokio::spawn(async move { run_pool_metrics_sampler(engine, config, shutdown_clone).await });

        // Let it run for a few samples
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished(), "Sampler should still be running");

        shutdown.cancel();

        let result = handle.await.unwrap();
        assert!(result.is_ok(), "Sampler should exit cleanly");
    }

    #[sqlx::test]
    async fn test_pool_metrics_sampler_stops_after_dispose(pool: PgPool) {
        let engine = Engine::from_pool(pool, "_sqlx_migrations");
        let config = PoolMetricsConfig {
            sample_interval: Duration::from_millis(10),
        };

        let sampler = engine.clone();
        let handle = tokio::spawn(async move { run_pool_metrics_sampler(sampler, config, CancellationToken::new()).await });

        engine.dispose().await;

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "Sampler should notice the disposed engine");
    }

    #[test]
    fn test_pool_metrics_config_default() {
        let config = PoolMetricsConfig::default();
        assert_eq!(config.sample_interval, Duration::from_secs(5));
    }
}
