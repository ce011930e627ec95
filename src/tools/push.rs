//! Tools that exercise server-initiated notifications.

use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};

use crate::mcp::dispatcher::{ToolContext, ToolDispatcher, tool_handler};
use crate::models::tool::{Tool, ToolResult};
use crate::push::notifier::{Notifier, OnFailure, Series};

use super::names;

/// Notification method used by `push_message`.
pub const MESSAGE_METHOD: &str = "notification";
/// Notification method used by `start_sse_push`.
pub const SERVER_PUSH_METHOD: &str = "server_push";
/// Notification method used by `start_stream`.
pub const PROGRESS_METHOD: &str = "window/progress";

/// Upper bound on `start_stream` so one call cannot hold a channel forever.
pub const MAX_STREAM_SECONDS: u64 = 3600;

const MESSAGE_SERIES: Series = Series {
    count: 5,
    interval: Duration::from_secs(2),
    wait_first: false,
    on_failure: OnFailure::Abort,
};

const BACKGROUND_SERIES: Series = Series {
    count: 5,
    interval: Duration::from_secs(3),
    wait_first: true,
    on_failure: OnFailure::Abort,
};

pub async fn register(dispatcher: &dyn ToolDispatcher, notifier: Notifier) {
    let n = notifier.clone();
    dispatcher
        .register_tool(
            Tool::new(
                names::PUSH_MESSAGE,
                "Push a message to the current session five times, two seconds apart",
                json!({
                    "type": "object",
                    "properties": {
                        "message": { "type": "string", "description": "Content to push" }
                    },
                    "required": ["message"]
                }),
            ),
            tool_handler(move |ctx, args| {
                let notifier = n.clone();
                async move { push_message(&notifier, ctx, args).await }
            }),
        )
        .await;

    let n = notifier.clone();
    dispatcher
        .register_tool(
            Tool::new(
                names::START_SSE_PUSH,
                "Starts a background task that pushes notifications to the client",
                json!({ "type": "object", "properties": {} }),
            ),
            tool_handler(move |ctx, _args| {
                let notifier = n.clone();
                async move { start_sse_push(notifier, ctx).await }
            }),
        )
        .await;

    let n = notifier;
    dispatcher
        .register_tool(
            Tool::new(
                names::START_STREAM,
                "Starts a simulated long-running process and streams progress updates",
                json!({
                    "type": "object",
                    "properties": {
                        "duration_seconds": {
                            "type": "number",
                            "description": "Duration of the simulated process in seconds"
                        }
                    },
                    "required": ["duration_seconds"]
                }),
            ),
            tool_handler(move |ctx, args| {
                let notifier = n.clone();
                async move { start_stream(&notifier, ctx, args).await }
            }),
        )
        .await;
}

async fn push_message(notifier: &Notifier, ctx: ToolContext, args: Value) -> ToolResult {
    let Some(message) = args.get("message").and_then(Value::as_str).map(str::to_string) else {
        return ToolResult::error("message is required");
    };
    if !notifier.is_connected(&ctx.session_id).await {
        return ToolResult::error("push failed: user offline or session expired");
    }

    let report = notifier
        .push_series(&ctx.session_id, MESSAGE_METHOD, MESSAGE_SERIES, &ctx.cancel, |index| {
            json!({
                "message": message,
                "index": index,
                "timestamp": Utc::now().to_rfc3339(),
            })
        })
        .await;

    match report.aborted {
        Some((step, err)) => ToolResult::error(format!("push {} failed: {}", step, err)),
        None if report.cancelled => {
            ToolResult::error(format!("push cancelled after {} message(s)", report.sent))
        }
        None => ToolResult::text(format!(
            "{} pushes completed, one every {} seconds",
            report.sent,
            MESSAGE_SERIES.interval.as_secs()
        )),
    }
}

async fn start_sse_push(notifier: Notifier, ctx: ToolContext) -> ToolResult {
    tracing::info!("start_sse_push called for session {}", ctx.session_id);
    if !notifier.is_connected(&ctx.session_id).await {
        return ToolResult::error("session not connected: open an event stream first");
    }

    let session_id = ctx.session_id.clone();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        let report = notifier
            .push_series(&session_id, SERVER_PUSH_METHOD, BACKGROUND_SERIES, &cancel, |count| {
                json!({
                    "message": "This is a push from the server.",
                    "timestamp": Utc::now().to_rfc3339(),
                    "count": count,
                })
            })
            .await;
        if report.completed() {
            tracing::info!("Finished pushing messages for session {}", session_id);
        }
    });

    ToolResult::text(format!(
        "SSE push notifications started. You will receive {} messages over {} seconds.",
        BACKGROUND_SERIES.count,
        BACKGROUND_SERIES.count as u64 * BACKGROUND_SERIES.interval.as_secs()
    ))
}

async fn start_stream(notifier: &Notifier, ctx: ToolContext, args: Value) -> ToolResult {
    let duration = match args.get("duration_seconds").and_then(Value::as_f64) {
        Some(d) if d >= 1.0 && d.fract() == 0.0 && d <= MAX_STREAM_SECONDS as f64 => d as u64,
        _ => {
            return ToolResult::error(format!(
                "Invalid duration: duration_seconds must be a whole number between 1 and {}",
                MAX_STREAM_SECONDS
            ));
        }
    };

    tracing::info!("Starting simulated stream for {}s for session {}", duration, ctx.session_id);
    let series = Series {
        count: duration as usize,
        interval: Duration::from_secs(1),
        wait_first: true,
        on_failure: OnFailure::Skip,
    };
    let report = notifier
        .push_series(&ctx.session_id, PROGRESS_METHOD, series, &ctx.cancel, |step| {
            let progress = step as f64 / duration as f64 * 100.0;
            json!({
                "message": format!("Progress: {:.2}% ({}/{} seconds)", progress, step, duration),
                "progress": progress,
                "timestamp": Utc::now().timestamp(),
            })
        })
        .await;

    if report.cancelled {
        return ToolResult::text("Stream cancelled.");
    }
    if !report.skipped.is_empty() {
        tracing::warn!(
            "Stream for {} missed {} of {} progress updates",
            ctx.session_id,
            report.skipped.len(),
            duration
        );
    }
    ToolResult::text(format!("Simulated process finished after {} seconds.", duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::filter::UnknownRolePolicy;
    use crate::bridge::registry::{DeliveryHandle, DeliveryRegistry};
    use crate::config::Transport;
    use crate::mcp::protocol::ServerMessage;
    use crate::mcp::server::McpServer;
    use crate::models::session::Role;
    use crate::session::identity_index::IdentityIndex;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        notifier: Notifier,
        rx: mpsc::Receiver<ServerMessage>,
        cancel: CancellationToken,
    }

    async fn harness() -> Harness {
        let server = Arc::new(McpServer::new(
            IdentityIndex::new(),
            UnknownRolePolicy::Guest,
            CancellationToken::new(),
        ));
        let deliveries = DeliveryRegistry::new();
        let cancel = CancellationToken::new();
        let (handle, rx) = DeliveryHandle::channel(Transport::Streamable, &cancel);
        deliveries.insert("s1", handle.clone()).await;
        server.register_session("s1", handle).await;
        Harness {
            notifier: Notifier::new(deliveries, server),
            rx,
            cancel,
        }
    }

    fn ctx(session_id: &str, cancel: &CancellationToken) -> ToolContext {
        ToolContext {
            session_id: session_id.to_string(),
            role: Role::Admin,
            transport: Transport::Streamable,
            cancel: cancel.clone(),
        }
    }

    fn method_of(message: ServerMessage) -> String {
        match message {
            ServerMessage::Notification(n) => n.method,
            ServerMessage::Response(_) => panic!("expected a notification"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn push_message_sends_five_notifications() {
        let mut h = harness().await;
        let result = push_message(&h.notifier, ctx("s1", &h.cancel), json!({"message": "hi"})).await;
        assert!(!result.is_error, "{}", result.text_content());
        for _ in 0..5 {
            assert_eq!(method_of(h.rx.recv().await.unwrap()), MESSAGE_METHOD);
        }
    }

    #[tokio::test]
    async fn push_message_needs_a_connection() {
        let h = harness().await;
        let result = push_message(&h.notifier, ctx("other", &h.cancel), json!({"message": "hi"})).await;
        assert!(result.is_error);
        let result = push_message(&h.notifier, ctx("s1", &h.cancel), json!({})).await;
        assert_eq!(result.text_content(), "message is required");
    }

    #[tokio::test(start_paused = true)]
    async fn background_push_runs_after_the_call_returns() {
        let mut h = harness().await;
        let result = start_sse_push(h.notifier.clone(), ctx("s1", &h.cancel)).await;
        assert!(!result.is_error);
        for count in 1..=5 {
            let ServerMessage::Notification(n) = h.rx.recv().await.unwrap() else {
                panic!("expected a notification");
            };
            assert_eq!(n.method, SERVER_PUSH_METHOD);
            assert_eq!(n.params["count"], json!(count));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stream_reports_progress_then_finishes() {
        let mut h = harness().await;
        let result = start_stream(&h.notifier, ctx("s1", &h.cancel), json!({"duration_seconds": 2})).await;
        assert_eq!(result.text_content(), "Simulated process finished after 2 seconds.");

        let ServerMessage::Notification(first) = h.rx.recv().await.unwrap() else {
            panic!("expected a notification");
        };
        assert_eq!(first.method, PROGRESS_METHOD);
        assert_eq!(first.params["message"], json!("Progress: 50.00% (1/2 seconds)"));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_stops_when_cancelled() {
        let h = harness().await;
        h.cancel.cancel();
        let result = start_stream(&h.notifier, ctx("s1", &h.cancel), json!({"duration_seconds": 10})).await;
        assert_eq!(result.text_content(), "Stream cancelled.");
    }

    #[tokio::test]
    async fn stream_rejects_bad_durations() {
        let h = harness().await;
        for bad in [json!({}), json!({"duration_seconds": 0}), json!({"duration_seconds": 1.5})] {
            let result = start_stream(&h.notifier, ctx("s1", &h.cancel), bad).await;
            assert!(result.is_error);
        }
    }
}
