//! Periodic tick sources for the session heartbeat.
//!
//! Dropping the returned stream stops the underlying timer.

use futures::stream::LocalBoxStream;
use std::time::Duration;

pub trait Ticker {
    /// Ticks every `period`; the first tick arrives after one full period.
    fn ticks(&self, period: Duration) -> LocalBoxStream<'static, ()>;
}

/// `tokio::time` based ticker for native hosts.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTicker;

#[cfg(not(target_arch = "wasm32"))]
impl Ticker for TokioTicker {
    fn ticks(&self, period: Duration) -> LocalBoxStream<'static, ()> {
        use futures::StreamExt;

        let start = tokio::time::Instant::now() + period;
        let interval = tokio::time::interval_at(start, period);
        futures::stream::unfold(interval, |mut interval| async move {
            interval.tick().await;
            Some(((), interval))
        })
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_ticker_waits_one_period() {
        let mut ticks = TokioTicker.ticks(Duration::from_secs(300));
        let started = tokio::time::Instant::now();

        ticks.next().await;
        assert!(started.elapsed() >= Duration::from_secs(300));

        ticks.next().await;
        assert!(started.elapsed() >= Duration::from_secs(600));
    }
}
