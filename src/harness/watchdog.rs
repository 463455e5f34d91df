use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellable one-shot timer guarding a harness run.
///
/// Armed at run start, disarmed on normal completion. If the deadline passes
/// first, [`Watchdog::fired`] resolves and the owner force-releases the run.
#[derive(Debug, Clone)]
pub struct Watchdog {
    token: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl Watchdog {
    pub fn arm(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    pub fn disarm(&self) {
        self.token.cancel();
    }

    pub fn is_armed(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves once the deadline passes while still armed. Never resolves
    /// after `disarm`.
    pub async fn fired(&self) {
        tokio::select! {
            _ = tokio::time::sleep_until(self.deadline) => {
                if self.token.is_cancelled() {
                    std::future::pending::<()>().await;
                }
            }
            _ = self.token.cancelled() => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_timeout() {
        let watchdog = Watchdog::arm(Duration::from_millis(100));
        assert!(watchdog.is_armed());

        timeout(Duration::from_millis(150), watchdog.fired())
            .await
            .expect("watchdog should fire");
    }

    #[tokio::test(start_paused = true)]
    async fn test_does_not_fire_early() {
        let watchdog = Watchdog::arm(Duration::from_millis(100));
        let early = timeout(Duration::from_millis(50), watchdog.fired()).await;
        assert!(early.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_never_fires() {
        let watchdog = Watchdog::arm(Duration::from_millis(100));
        watchdog.disarm();
        assert!(!watchdog.is_armed());

        let result = timeout(Duration::from_secs(1), watchdog.fired()).await;
        assert!(result.is_err());
    }
}
