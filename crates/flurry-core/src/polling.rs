//! Generic polling loop trait and runner.

use async_trait::async_trait;
use rand::Rng;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::emit;
use crate::metrics::events::{IterationCompleted, IterationDuration, IterationResultType};

/// Result of a single processing iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationResult {
    /// Items were processed successfully.
    ProcessedItems,
    /// No items were available to process.
    NoItems,
    /// Shutdown was requested.
    Shutdown,
}

/// Trait for implementing a polling-based processor.
#[async_trait]
pub trait PollingProcessor {
    /// The state type prepared for each iteration.
    type State: Send;
    /// The error type for this processor.
    type Error: std::error::Error + Send;

    /// Prepare state for a processing iteration.
    ///
    /// Returns `None` if there's no work to do.
    ///
    /// # Arguments
    /// * `cold_start` - True on the first iteration
    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Self::State>, Self::Error>;

    /// Process the prepared state.
    async fn process(&mut self, state: Self::State) -> Result<IterationResult, Self::Error>;
}

/// Random jitter in `[0, max_secs)` to spread out hosts polling the same account.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}

/// Run a polling loop with the given processor.
///
/// 1. Call `prepare()` (with cold_start=true on the first iteration)
/// 2. Call `process()` if there's work to do
/// 3. Wait for poll_interval (plus random jitter) or shutdown
/// 4. Repeat until shutdown
pub async fn run_polling_loop<P: PollingProcessor>(
    processor: &mut P,
    poll_interval: Duration,
    poll_jitter_secs: u64,
    shutdown: CancellationToken,
    name: &str,
) -> Result<(), P::Error> {
    let mut first_iteration = true;

    loop {
        let iteration_start = Instant::now();
        let state = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(target = name, "Shutdown requested during prepare");
                return Ok(());
            }

            result = async {
                let cold_start = first_iteration;
                first_iteration = false;
                processor.prepare(cold_start).await
            } => result?,
        };

        let result = match state {
            Some(s) => {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        info!(target = name, "Shutdown requested during processing");
                        IterationResult::Shutdown
                    }

                    result = processor.process(s) => result?,
                }
            }
            None => IterationResult::NoItems,
        };

        let result_type = match result {
            IterationResult::Shutdown => break,
            IterationResult::NoItems => IterationResultType::NoItems,
            IterationResult::ProcessedItems => IterationResultType::Processed,
        };
        emit!(IterationCompleted {
            result: result_type,
            target: name.to_string(),
        });
        emit!(IterationDuration {
            duration: iteration_start.elapsed(),
            target: name.to_string(),
        });

        let sleep_duration = poll_interval + random_jitter(poll_jitter_secs);
        debug!(
            target = name,
            "Iteration complete, waiting {}ms before next poll",
            sleep_duration.as_millis()
        );
        if shutdown
            .run_until_cancelled(tokio::time::sleep(sleep_duration))
            .await
            .is_none()
        {
            info!(target = name, "Shutdown requested during poll wait");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(display("never"))]
    struct NeverError;

    struct CountingProcessor {
        prepared: usize,
        processed: usize,
        stop_after: usize,
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl PollingProcessor for CountingProcessor {
        type State = usize;
        type Error = NeverError;

        async fn prepare(&mut self, cold_start: bool) -> Result<Option<usize>, NeverError> {
            assert_eq!(cold_start, self.prepared == 0);
            self.prepared += 1;
            if self.prepared % 2 == 0 {
                Ok(None)
            } else {
                Ok(Some(self.prepared))
            }
        }

        async fn process(&mut self, _state: usize) -> Result<IterationResult, NeverError> {
            self.processed += 1;
            if self.processed >= self.stop_after {
                self.shutdown.cancel();
            }
            Ok(IterationResult::ProcessedItems)
        }
    }

    #[test]
    fn test_random_jitter_zero() {
        assert_eq!(random_jitter(0), Duration::ZERO);
    }

    #[test]
    fn test_random_jitter_bounded() {
        for _ in 0..50 {
            assert!(random_jitter(2) < Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_until_shutdown() {
        let shutdown = CancellationToken::new();
        let mut processor = CountingProcessor {
            prepared: 0,
            processed: 0,
            stop_after: 3,
            shutdown: shutdown.clone(),
        };

        run_polling_loop(
            &mut processor,
            Duration::from_secs(1),
            0,
            shutdown,
            "test",
        )
        .await
        .unwrap();

        assert_eq!(processor.processed, 3);
        assert_eq!(processor.prepared, 5);
    }

    #[tokio::test]
    async fn test_loop_exits_immediately_when_cancelled() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let mut processor = CountingProcessor {
            prepared: 0,
            processed: 0,
            stop_after: 1,
            shutdown: shutdown.clone(),
        };

        run_polling_loop(&mut processor, Duration::from_secs(60), 0, shutdown, "test")
            .await
            .unwrap();

        assert_eq!(processor.prepared, 0);
    }
}
