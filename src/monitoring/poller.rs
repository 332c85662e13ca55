//! Periodic metrics polling

use super::MetricsSample;
use crate::error::AppResult;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

/// Consecutive failed samples before the poller gives up
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

#[derive(Debug, Clone)]
pub enum MetricsEvent {
    Update(MetricsSample),
    /// A sample failed; polling continues
    ProbeError(String),
    Stopped,
}

/// Stops a running poller
#[derive(Debug)]
pub struct PollerHandle {
    stop_tx: mpsc::Sender<()>,
}

impl PollerHandle {
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(()).await;
    }
}

/// Call `sample` every `interval` (first call immediately) and publish the
/// results until stopped, the receiver is dropped, or sampling keeps failing.
pub fn start_poller<F, Fut>(interval: Duration, sample: F) -> (PollerHandle, mpsc::Receiver<MetricsEvent>)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<MetricsSample>> + Send,
{
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
    let (event_tx, event_rx) = mpsc::channel::<MetricsEvent>(8);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut consecutive_errors: u32 = 0;

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    let _ = event_tx.send(MetricsEvent::Stopped).await;
                    break;
                }
                _ = ticker.tick() => {
                    let event = match sample().await {
                        Ok(metrics) => {
                            consecutive_errors = 0;
                            MetricsEvent::Update(metrics)
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            tracing::debug!(attempt = consecutive_errors, "Metrics sample failed: {}", e);
                            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                                tracing::warn!(
                                    "Polling stopped after {} consecutive failures: {}",
                                    consecutive_errors,
                                    e
                                );
                                let _ = event_tx.send(MetricsEvent::ProbeError(e.to_string())).await;
                                let _ = event_tx.send(MetricsEvent::Stopped).await;
                                break;
                            }
                            MetricsEvent::ProbeError(e.to_string())
                        }
                    };
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    (PollerHandle { stop_tx }, event_rx)
}
