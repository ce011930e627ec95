//! Best-effort server-initiated notifications to one session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bridge::registry::DeliveryRegistry;
use crate::error::{AppError, Result};
use crate::mcp::dispatcher::ToolDispatcher;

/// What a series does when one step fails. Nothing is ever retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    Abort,
    Skip,
}

/// Shape of a multi-step push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Series {
    pub count: usize,
    pub interval: Duration,
    /// Wait one interval before the first push as well.
    pub wait_first: bool,
    pub on_failure: OnFailure,
}

/// How a series went. Steps are numbered from 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesReport {
    pub sent: usize,
    pub skipped: Vec<usize>,
    /// The step that failed and what went wrong, when the series aborted.
    pub aborted: Option<(usize, String)>,
    pub cancelled: bool,
}

impl SeriesReport {
    pub fn completed(&self) -> bool {
        self.aborted.is_none() && !self.cancelled
    }
}

#[derive(Clone)]
pub struct Notifier {
    deliveries: DeliveryRegistry,
    dispatcher: Arc<dyn ToolDispatcher>,
}

impl Notifier {
    pub fn new(deliveries: DeliveryRegistry, dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self {
            deliveries,
            dispatcher,
        }
    }

    /// Whether `session_id` has a live delivery channel.
    pub async fn is_connected(&self, session_id: &str) -> bool {
        self.deliveries.contains(session_id).await
    }

    /// Sends one notification.
    ///
    /// Fails with [`AppError::NotConnected`] when the session has no live
    /// channel. A failed delivery is logged and returned; the session itself
    /// is left alone.
    pub async fn push(&self, session_id: &str, method: &str, payload: Value) -> Result<()> {
        if !self.is_connected(session_id).await {
            tracing::warn!("Push to {} dropped: session not connected", session_id);
            return Err(AppError::NotConnected(session_id.to_string()));
        }

        tracing::debug!("Pushing {} to {}: {}", method, session_id, payload);
        self.dispatcher
            .send_notification(session_id, method, payload)
            .await
            .inspect_err(|e| tracing::warn!("Push to {} failed: {}", session_id, e))
    }

    /// Sends `series.count` notifications spaced by `series.interval`, building
    /// each payload from its step number. Stops early when `cancel` fires.
    pub async fn push_series<F>(
        &self,
        session_id: &str,
        method: &str,
        series: Series,
        cancel: &CancellationToken,
        mut payload: F,
    ) -> SeriesReport
    where
        F: FnMut(usize) -> Value,
    {
        let mut report = SeriesReport::default();

        for step in 1..=series.count {
            if step > 1 || series.wait_first {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(series.interval) => {}
                }
            } else if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.push(session_id, method, payload(step)).await {
                Ok(()) => report.sent += 1,
                Err(e) => match series.on_failure {
                    OnFailure::Abort => {
                        report.aborted = Some((step, e.to_string()));
                        break;
                    }
                    OnFailure::Skip => report.skipped.push(step),
                },
            }
        }

        if report.cancelled {
            tracing::info!("Push series to {} cancelled after {} message(s)", session_id, report.sent);
        } else {
            tracing::debug!("Push series to {} finished: {:?}", session_id, report);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::filter::UnknownRolePolicy;
    use crate::bridge::registry::DeliveryHandle;
    use crate::config::Transport;
    use crate::mcp::protocol::ServerMessage;
    use crate::mcp::server::McpServer;
    use crate::session::identity_index::IdentityIndex;
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn connected(session_id: &str) -> (Notifier, mpsc::Receiver<ServerMessage>) {
        let server = Arc::new(McpServer::new(
            IdentityIndex::new(),
            UnknownRolePolicy::Guest,
            CancellationToken::new(),
        ));
        let deliveries = DeliveryRegistry::new();
        let (handle, rx) = DeliveryHandle::channel(Transport::Sse, &CancellationToken::new());
        deliveries.insert(session_id, handle.clone()).await;
        server.register_session(session_id, handle).await;
        (Notifier::new(deliveries, server), rx)
    }

    fn series(on_failure: OnFailure) -> Series {
        Series {
            count: 5,
            interval: Duration::from_secs(2),
            wait_first: false,
            on_failure,
        }
    }

    #[tokio::test]
    async fn unconnected_sessions_fail_fast() {
        let (notifier, _rx) = connected("s1").await;
        let err = notifier.push("s2", "notification", json!({})).await.unwrap_err();
        assert!(matches!(err, AppError::NotConnected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn series_delivers_every_step_in_order() {
        let (notifier, mut rx) = connected("s1").await;
        let report = notifier
            .push_series("s1", "notification", series(OnFailure::Abort), &CancellationToken::new(), |i| {
                json!({"index": i})
            })
            .await;

        assert!(report.completed());
        assert_eq!(report.sent, 5);
        for i in 1..=5 {
            let ServerMessage::Notification(n) = rx.recv().await.unwrap() else {
                panic!("expected a notification");
            };
            assert_eq!(n.params["index"], json!(i));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abort_stops_at_the_first_failure() {
        let (notifier, rx) = connected("s1").await;
        drop(rx);
        let report = notifier
            .push_series("s1", "notification", series(OnFailure::Abort), &CancellationToken::new(), |_| {
                json!({})
            })
            .await;
        assert_eq!(report.sent, 0);
        assert_eq!(report.aborted.map(|(step, _)| step), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn skip_keeps_going_after_failures() {
        let (notifier, rx) = connected("s1").await;
        drop(rx);
        let report = notifier
            .push_series("s1", "window/progress", series(OnFailure::Skip), &CancellationToken::new(), |_| {
                json!({})
            })
            .await;
        assert_eq!(report.sent, 0);
        assert_eq!(report.skipped, vec![1, 2, 3, 4, 5]);
        assert!(report.completed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_the_series() {
        let (notifier, _rx) = connected("s1").await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = notifier
            .push_series(
                "s1",
                "server_push",
                Series { wait_first: true, ..series(OnFailure::Abort) },
                &cancel,
                |_| json!({}),
            )
            .await;
        assert!(report.cancelled);
        assert_eq!(report.sent, 0);
    }
}
