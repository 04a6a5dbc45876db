//! Waiting for the database to come up, for container startup ordering.

use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::db::health::HealthProbe;

/// Probe until the database is healthy.
///
/// Makes at most `max_retries` probes, sleeping `retry_interval` between them (never after the
/// last one). Returns `true` on the first healthy report and `false` once the attempts are
/// exhausted. A missing database stops the loop immediately: it needs a human, not a retry.
#[instrument(skip(probe))]
pub async fn wait_for_database(probe: &dyn HealthProbe, max_retries: u32, retry_interval: Duration) -> bool {
    for attempt in 1..=max_retries {
        let report = probe.check_health().await;

        if report.is_healthy() {
            info!(attempt, "Database is ready");
            return true;
        }

        if report.is_database_missing() {
            error!(suggestions = ?report.suggestions, "{}", report.message);
            return false;
        }

        warn!(attempt, max_retries, status = ?report.status, "Database not ready: {}", report.message);

        if attempt < max_retries {
            tokio::time::sleep(retry_interval).await;
        }
    }

    error!(max_retries, "Database did not become ready");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::{engine::Engine, health::DatabaseProber, health::HealthErrorType};
    use crate::lifecycle::tests::{ScriptedProbe, failing, healthy, unmigrated};

    #[tokio::test]
    async fn test_healthy_on_second_probe() {
        let probe = ScriptedProbe::new(vec![failing(HealthErrorType::ConnectionFailed, "starting up"), healthy()]);

        assert!(wait_for_database(&probe, 5, Duration::ZERO).await);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let probe = ScriptedProbe::new(vec![failing(HealthErrorType::ConnectionFailed, "down")]);

        assert!(!wait_for_database(&probe, 3, Duration::ZERO).await);
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn test_degraded_is_not_ready() {
        let probe = ScriptedProbe::new(vec![unmigrated()]);

        assert!(!wait_for_database(&probe, 2, Duration::ZERO).await);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_database_fails_fast() {
        let probe = ScriptedProbe::new(vec![failing(HealthErrorType::DatabaseNotFound, "Database 'x' does not exist")]);

        assert!(!wait_for_database(&probe, 10, Duration::from_secs(60)).await);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_never_probes() {
        let probe = ScriptedProbe::new(vec![healthy()]);

        assert!(!wait_for_database(&probe, 0, Duration::ZERO).await);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_after_last_attempt() {
        let probe = ScriptedProbe::new(vec![failing(HealthErrorType::ConnectionFailed, "down")]);
        let start = tokio::time::Instant::now();

        assert!(!wait_for_database(&probe, 3, Duration::from_secs(10)).await);

        // Two sleeps between three probes
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_unreachable_database() {
        let config = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            name: "fastvue".to_string(),
            username: "postgres".to_string(),
            command_timeout_seconds: 1,
            ..Default::default()
        };
        let prober = DatabaseProber::new(Engine::initialize(&config).unwrap());

        assert!(!wait_for_database(&prober, 2, Duration::ZERO).await);
    }
}
