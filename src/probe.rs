//! Readiness polling against an eventually-consistent remote service.
//!
//! The probe recurs until its check reports ready. A failed check (the
//! underlying remote call itself errored) counts as not-ready: transient
//! connectivity failure while an instance boots is expected, so the error
//! is swallowed and the probe simply tries again. There is no attempt
//! ceiling and no timeout at this layer; that policy belongs to the
//! caller.

use std::{future::Future, time::Duration};

use crate::{EsflowError, Result};

/// What one readiness check observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady,
}

/// Fixed-interval readiness poller with a jittered first attempt.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    interval: Duration,
}

impl HealthProbe {
    pub fn new(interval_ms: u64) -> Result<Self> {
        if interval_ms < 1000 {
            return Err(EsflowError::Validation("gap time between consecutive checks must be >= 1000".to_string()));
        }
        Ok(Self {
            interval: Duration::from_millis(interval_ms),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll `check` until it reports ready.
    ///
    /// The first attempt fires after a random delay within one interval,
    /// so concurrent probes against the same backend spread out; each
    /// later attempt fires exactly one interval after the previous attempt
    /// completed.
    pub async fn wait<C, Fut>(
        &self,
        mut check: C,
    ) where
        C: FnMut() -> Fut,
        Fut: Future<Output = Result<Readiness>>,
    {
        let first = Duration::from_millis(fastrand::u64(..self.interval.as_millis() as u64));
        tokio::time::sleep(first).await;

        loop {
            match check().await {
                Ok(Readiness::Ready) => return,
                // a failed check is indistinguishable from not-ready here
                Ok(Readiness::NotReady) | Err(_) => {}
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    };

    use tokio::time::Instant;

    use super::*;

    #[test]
    fn test_interval_lower_bound() {
        assert!(HealthProbe::new(999).is_err());
        assert!(HealthProbe::new(1000).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_then_ready_spacing() {
        let probe = HealthProbe::new(1000).unwrap();
        let count = Arc::new(AtomicU64::new(0));
        let started = Instant::now();

        let checks = count.clone();
        probe
            .wait(move || {
                let checks = checks.clone();
                async move {
                    if checks.fetch_add(1, Ordering::SeqCst) < 3 {
                        Ok(Readiness::NotReady)
                    } else {
                        Ok(Readiness::Ready)
                    }
                }
            })
            .await;

        let elapsed = started.elapsed();
        assert_eq!(count.load(Ordering::SeqCst), 4);
        // jittered first attempt within [0, interval), then three exact intervals
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_errors_are_swallowed() {
        let probe = HealthProbe::new(1000).unwrap();
        let count = Arc::new(AtomicU64::new(0));

        let checks = count.clone();
        probe
            .wait(move || {
                let checks = checks.clone();
                async move {
                    if checks.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(EsflowError::Execution("connection refused".to_string()))
                    } else {
                        Ok(Readiness::Ready)
                    }
                }
            })
            .await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
