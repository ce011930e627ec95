use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use kube_mcp_gate::build_router;
use kube_mcp_gate::config::{Config, Transport};
use kube_mcp_gate::crypto::token::encode_identity;
use kube_mcp_gate::error::{AppError, Result};
use kube_mcp_gate::k8s::cluster_repo::{ClusterDirectory, ClusterInfo};
use kube_mcp_gate::k8s::ops::{ClusterOps, ResourceKind, RestartKind};
use kube_mcp_gate::models::identity::Identity;
use kube_mcp_gate::session::clock::SystemClock;
use kube_mcp_gate::state::AppState;

const SESSION_HEADER: &str = "mcp-session-id";

struct FakeDirectory;

#[async_trait]
impl ClusterDirectory for FakeDirectory {
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>> {
        Ok(vec![ClusterInfo {
            cluster_name: "prod".to_string(),
            ip: "10.0.0.1".to_string(),
        }])
    }

    async fn kubeconfig(&self, cluster_name: &str) -> Result<String> {
        Err(AppError::NotFound(format!("cluster {}", cluster_name)))
    }
}

struct FakeOps;

#[async_trait]
impl ClusterOps for FakeOps {
    async fn namespaces(&self, _cluster: &str) -> Result<Vec<String>> {
        Ok(vec!["default".to_string()])
    }

    async fn query(&self, _cluster: &str, _namespace: &str, kind: ResourceKind) -> Result<Vec<String>> {
        Ok(vec![format!("{}-0", kind.as_str())])
    }

    async fn restart(&self, _cluster: &str, _namespace: &str, _kind: RestartKind, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn version(&self, _cluster: &str) -> Result<String> {
        Ok("v1.30.0".to_string())
    }

    async fn configmap_detail(&self, _cluster: &str, _namespace: &str, _name: &str) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

// Shared test context
struct TestContext {
    state: AppState,
    app: Router,
}

impl TestContext {
    async fn new(transport: Transport) -> Self {
        let state = AppState::build(
            Config::with_defaults(transport),
            Arc::new(FakeDirectory),
            Arc::new(FakeOps),
            Arc::new(SystemClock),
        )
        .await;
        let app = build_router(state.clone());
        Self { state, app }
    }

    fn token(&self, name: &str, role: &str) -> String {
        let token = encode_identity(&Identity::new(name, role), &self.state.token_key);
        urlencoding::encode(&token).into_owned()
    }

    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.app.clone().oneshot(request).await.unwrap()
    }
}

fn rpc(id: u64, method: &str, params: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string()
}

fn post(uri: &str, session: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(session) = session {
        builder = builder.header(SESSION_HEADER, session);
    }
    builder.body(Body::from(body)).unwrap()
}

fn session_of(response: &axum::response::Response) -> Option<String> {
    response
        .headers()
        .get(SESSION_HEADER)
        .map(|v| v.to_str().unwrap().to_string())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn next_chunk(body: &mut Body) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .expect("timed out waiting for an event")
        .expect("stream ended")
        .unwrap();
    String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
}

fn tool_names(reply: &Value) -> Vec<String> {
    reply["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_token_issues_session_with_filtered_catalog() {
        let context = TestContext::new(Transport::Http).await;
        let uri = format!("/mcp?mcp_id={}", context.token("alice", "user"));

        let response = context.send(post(&uri, None, rpc(1, "tools/list", json!({})))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let session = session_of(&response).expect("session header missing");
        assert!(session.starts_with("mcp-session-"));

        let names = tool_names(&body_json(response).await);
        assert!(names.contains(&"get_pods".to_string()));
        assert!(!names.contains(&"rollout_restart_deployment".to_string()));
        assert!(!names.contains(&"rollout_restart_daemonset".to_string()));

        // The header alone is enough from now on.
        let response = context
            .send(post("/mcp", Some(&session), rpc(2, "tools/list", json!({}))))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(session_of(&response).is_none());
        assert_eq!(tool_names(&body_json(response).await).len(), 4);
    }

    #[tokio::test]
    async fn test_anonymous_callers_only_see_cluster_listing() {
        let context = TestContext::new(Transport::Http).await;
        let response = context.send(post("/mcp", None, rpc(1, "tools/list", json!({})))).await;
        assert_eq!(tool_names(&body_json(response).await), vec!["get_clusters"]);
    }

    #[tokio::test]
    async fn test_stale_session_is_rejected() {
        let context = TestContext::new(Transport::Http).await;
        let response = context
            .send(post("/mcp", Some("mcp-session-gone"), rpc(1, "tools/list", json!({}))))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "session expired or invalid");
    }

    #[tokio::test]
    async fn test_tool_call_and_hidden_tool() {
        let context = TestContext::new(Transport::Http).await;
        let uri = format!("/mcp?mcp_id={}", context.token("alice", "user"));

        let call = rpc(
            1,
            "tools/call",
            json!({"name": "get_clusters", "arguments": {"method": "GET", "url": "/clusters"}}),
        );
        let reply = body_json(context.send(post(&uri, None, call)).await).await;
        let text = reply["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("prod"), "{}", text);

        let restart = rpc(
            2,
            "tools/call",
            json!({"name": "rollout_restart_deployment", "arguments": {}}),
        );
        let reply = body_json(context.send(post(&uri, None, restart)).await).await;
        assert_eq!(reply["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_logout_ends_the_session() {
        let context = TestContext::new(Transport::Http).await;
        let response = context.send(post("/mcp", None, rpc(1, "ping", json!({})))).await;
        let session = session_of(&response).unwrap();

        let response = context.send(post("/logout", Some(&session), String::new())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"logout success");

        let response = context
            .send(post("/mcp", Some(&session), rpc(2, "ping", json!({}))))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(context.state.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_sse_stream_announces_endpoint_and_carries_replies() {
        let context = TestContext::new(Transport::Sse).await;
        let uri = format!("/sse?mcp_id={}", context.token("root", "admin"));
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();

        let response = context.send(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let session = session_of(&response).unwrap();
        let mut body = response.into_body();

        let endpoint = next_chunk(&mut body).await;
        assert!(endpoint.contains("endpoint"), "{}", endpoint);
        assert!(endpoint.contains(&format!("/message?sessionId={}", session)));

        let message_uri = format!("/message?sessionId={}", session);
        let response = context
            .send(post(&message_uri, None, rpc(7, "tools/list", json!({}))))
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let event = next_chunk(&mut body).await;
        assert!(event.contains("message"), "{}", event);
        assert!(event.contains("\"id\":7"), "{}", event);
        assert!(event.contains("session_info"));
    }

    #[tokio::test]
    async fn test_sse_message_for_unknown_session_is_rejected() {
        let context = TestContext::new(Transport::Sse).await;
        let response = context
            .send(post("/message?sessionId=mcp-session-gone", None, rpc(1, "ping", json!({}))))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_streamable_tool_call_streams_progress_then_result() {
        let context = TestContext::new(Transport::Streamable).await;
        let uri = format!("/mcp?mcp_id={}", context.token("root", "admin"));
        let call = rpc(
            3,
            "tools/call",
            json!({"name": "start_stream", "arguments": {"duration_seconds": 1}}),
        );

        let response = context.send(post(&uri, None, call)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(session_of(&response).is_some());

        let bytes = tokio::time::timeout(Duration::from_secs(10), response.into_body().collect())
            .await
            .unwrap()
            .unwrap()
            .to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("window/progress"), "{}", text);
        assert!(text.contains("Simulated process finished after 1 seconds."));
    }

    #[tokio::test]
    async fn test_streamable_delete_ends_the_session() {
        let context = TestContext::new(Transport::Streamable).await;
        let response = context.send(post("/mcp", None, rpc(1, "ping", json!({})))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let session = session_of(&response).unwrap();

        let delete = || {
            Request::builder()
                .method("DELETE")
                .uri("/mcp")
                .header(SESSION_HEADER, session.as_str())
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(context.send(delete()).await.status(), StatusCode::NO_CONTENT);
        assert_eq!(context.send(delete()).await.status(), StatusCode::NOT_FOUND);
    }
}
