/// Backend health probing
/// A probe is one `GET /health`; 200 means ready, anything else is a failed attempt.
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HealthConfig;

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub success: bool,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub attempt_number: u32,
    pub elapsed_ms: u64,
}

/// Retry budget for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl HealthPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// Outcome of a whole wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: bool,
    pub attempts: u32,
    pub elapsed: Duration,
    /// The overall wall-clock limit fired first
    pub timed_out: bool,
    pub cancelled: bool,
}

pub struct HealthMonitor {
    client: reqwest::Client,
    host: String,
}

fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    if seconds >= 60 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

impl HealthMonitor {
    pub fn new(host: impl Into<String>, probe_timeout: Duration) -> Self {
        // Never route localhost probes through a system proxy
        let client = reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(0)
            .timeout(probe_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self {
            client,
            host: host.into(),
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(config.host.clone(), config.probe_timeout())
    }

    pub fn health_url(&self, port: u16) -> String {
        format!("http://{}:{}/health", self.host, port)
    }

    /// One probe. The body is always drained so the connection can be reused
    /// or closed instead of piling up over hundreds of attempts.
    pub async fn probe(&self, port: u16, attempt_number: u32, started: Instant) -> HealthCheckResult {
        let result = self.client.get(self.health_url(port)).send().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let status = response.status();
                let _ = response.bytes().await;
                HealthCheckResult {
                    success: status == reqwest::StatusCode::OK,
                    http_status: Some(status.as_u16()),
                    error: None,
                    attempt_number,
                    elapsed_ms,
                }
            }
            Err(e) => HealthCheckResult {
                success: false,
                http_status: None,
                error: Some(if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                }),
                attempt_number,
                elapsed_ms,
            },
        }
    }

    /// `awaitHealthy(port, maxAttempts, interval)`
    pub async fn await_healthy(&self, port: u16, max_attempts: u32, interval: Duration) -> bool {
        self.poll(port, HealthPolicy::new(max_attempts, interval), &CancellationToken::new())
            .await
            .healthy
    }

    /// Probe until healthy, out of attempts, or cancelled
    pub async fn poll(&self, port: u16, policy: HealthPolicy, cancel: &CancellationToken) -> HealthReport {
        let attempts = AtomicU32::new(0);
        self.poll_counted(port, policy, cancel, &attempts, Instant::now()).await
    }

    /// Like `poll`, raced against an overall wall-clock limit.
    /// Losing the race drops the loop together with its pending timer.
    pub async fn poll_within(
        &self,
        port: u16,
        policy: HealthPolicy,
        overall: Duration,
        cancel: &CancellationToken,
    ) -> HealthReport {
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        match tokio::time::timeout(overall, self.poll_counted(port, policy, cancel, &attempts, started)).await {
            Ok(report) => report,
            Err(_) => {
                warn!(
                    "Backend health wait hit the {} overall limit",
                    format_elapsed(overall)
                );
                HealthReport {
                    healthy: false,
                    attempts: attempts.load(Ordering::Relaxed),
                    elapsed: started.elapsed(),
                    timed_out: true,
                    cancelled: false,
                }
            }
        }
    }

    async fn poll_counted(
        &self,
        port: u16,
        policy: HealthPolicy,
        cancel: &CancellationToken,
        attempts: &AtomicU32,
        started: Instant,
    ) -> HealthReport {
        let report = |healthy: bool, cancelled: bool| HealthReport {
            healthy,
            attempts: attempts.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
            timed_out: false,
            cancelled,
        };

        debug!("Checking if backend API is up at {}", self.health_url(port));

        for attempt in 1..=policy.max_attempts {
            attempts.store(attempt, Ordering::Relaxed);

            let result = tokio::select! {
                result = self.probe(port, attempt, started) => result,
                _ = cancel.cancelled() => return report(false, true),
            };

            if result.success {
                info!(
                    "Backend API healthy on port {} after {} attempt(s)",
                    port, attempt
                );
                return report(true, false);
            }

            debug!(
                "Attempt {}/{} ({} elapsed) - backend not ready: {}",
                attempt,
                policy.max_attempts,
                format_elapsed(started.elapsed()),
                match (&result.http_status, &result.error) {
                    (Some(status), _) => format!("status {}", status),
                    (None, Some(error)) => error.clone(),
                    (None, None) => "unknown".to_string(),
                }
            );

            if attempt < policy.max_attempts {
                tokio::select! {
                    _ = sleep(policy.interval) => {}
                    _ = cancel.cancelled() => return report(false, true),
                }
            }
        }

        warn!(
            "Backend API not healthy after {} attempts ({} elapsed)",
            policy.max_attempts,
            format_elapsed(started.elapsed())
        );
        report(false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::get, Router};
    use std::sync::Arc;

    /// Fake backend: `/health` fails until the `healthy_from`-th request
    async fn serve(healthy_from: Option<u32>) -> (u16, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route(
                "/health",
                get(|State((hits, healthy_from)): State<(Arc<AtomicU32>, Option<u32>)>| async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    match healthy_from {
                        Some(from) if n >= from => StatusCode::OK,
                        _ => StatusCode::SERVICE_UNAVAILABLE,
                    }
                }),
            )
            .with_state((hits.clone(), healthy_from));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (port, hits)
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn monitor() -> HealthMonitor {
        HealthMonitor::new("127.0.0.1", Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_healthy_on_third_probe() {
        let (port, hits) = serve(Some(3)).await;
        let report = monitor()
            .poll_within(
                port,
                HealthPolicy::new(10, Duration::from_millis(20)),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await;

        assert!(report.healthy);
        assert!(!report.timed_out);
        assert_eq!(report.attempts, 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_never_healthy_uses_every_attempt() {
        let (port, hits) = serve(None).await;
        let interval = Duration::from_millis(40);
        let started = Instant::now();

        let healthy = monitor().await_healthy(port, 5, interval).await;
        let elapsed = started.elapsed();

        assert!(!healthy);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        // Four waits between five attempts, plus scheduling slack
        assert!(elapsed >= interval * 4, "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn test_connection_refused_counts_as_attempt() {
        let report = monitor()
            .poll(free_port(), HealthPolicy::new(3, Duration::from_millis(10)), &CancellationToken::new())
            .await;
        assert!(!report.healthy);
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test]
    async fn test_probe_reports_status() {
        let (port, _) = serve(None).await;
        let result = monitor().probe(port, 1, Instant::now()).await;
        assert!(!result.success);
        assert_eq!(result.http_status, Some(503));
        assert_eq!(result.attempt_number, 1);

        let refused = monitor().probe(free_port(), 2, Instant::now()).await;
        assert!(refused.http_status.is_none());
        assert!(refused.error.is_some());
    }

    #[tokio::test]
    async fn test_overall_timeout_wins() {
        let (port, _) = serve(None).await;
        let report = monitor()
            .poll_within(
                port,
                HealthPolicy::new(1_000, Duration::from_millis(50)),
                Duration::from_millis(300),
                &CancellationToken::new(),
            )
            .await;

        assert!(!report.healthy);
        assert!(report.timed_out);
        assert!(report.attempts >= 1 && report.attempts < 1_000);
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_loop() {
        let (port, _) = serve(None).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let report = monitor()
            .poll(port, HealthPolicy::new(1_000, Duration::from_millis(50)), &cancel)
            .await;
        assert!(report.cancelled);
        assert!(!report.healthy);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_zero_attempts_is_unhealthy() {
        let (port, hits) = serve(Some(1)).await;
        assert!(!monitor().await_healthy(port, 0, Duration::from_millis(10)).await);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
