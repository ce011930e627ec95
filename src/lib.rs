use axum::{
    Router,
    routing::{get, post},
    middleware::from_fn_with_state,
    extract::DefaultBodyLimit,
};

use http::{HeaderValue, Method, header};
use std::time::Duration;
use tower_cookies::CookieManagerLayer;
use tower_http::{
    trace::{TraceLayer, DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, DefaultOnFailure},
    cors::CorsLayer,
};
use tracing::Level;

pub mod config;
pub mod error;
pub mod state;
pub mod db;

pub mod crypto {
    pub mod token;
}

pub mod models {
    pub mod identity;
    pub mod session;
    pub mod tool;
}

pub mod session {
    pub mod clock;
    pub mod identity_index;
    pub mod store;
}

pub mod access {
    pub mod filter;
}

pub mod bridge {
    pub mod attach;
    pub mod http;
    pub mod registry;
    pub mod resolve;
    pub mod sse;
    pub mod stdio;
    pub mod streamable;
    pub mod token;
}

pub mod push {
    pub mod notifier;
}

pub mod mcp {
    pub mod dispatcher;
    pub mod protocol;
    pub mod server;
}

pub mod k8s {
    pub mod client;
    pub mod cluster_repo;
    pub mod ops;
}

pub mod tools {
    pub mod catalog;
    pub mod envelope;
    pub mod k8s;
    pub mod names;
    pub mod push;
    pub mod session;
}

pub mod handlers {
    pub mod logout;
}

pub mod validation {
    pub mod envelope;
}

use config::Transport;
use state::AppState;

/// Largest JSON-RPC message accepted over HTTP.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Builds the HTTP router for the configured transport. Every transport
/// gets `POST /logout`; stdio gets nothing else.
pub fn build_router(state: AppState) -> Router {
    let transport_routes = match state.config.transport {
        Transport::Http => Router::new()
            .route("/mcp", post(bridge::http::handle_message))
            .route_layer(from_fn_with_state(state.clone(), bridge::http::resolve_session))
            .with_state(state.clone()),

        Transport::Sse => Router::new()
            .route("/sse", get(bridge::sse::connect))
            .route(bridge::sse::MESSAGE_PATH, post(bridge::sse::message))
            .with_state(state.clone()),

        // Only POST goes through session resolution; GET and DELETE resolve
        // their own session.
        Transport::Streamable => Router::new()
            .route(
                "/mcp",
                post(bridge::streamable::post)
                    .route_layer(from_fn_with_state(state.clone(), bridge::http::resolve_session))
                    .get(bridge::streamable::open)
                    .delete(bridge::streamable::close),
            )
            .with_state(state.clone()),

        Transport::Stdio => Router::new(),
    };

    let logout_routes = Router::new()
        .route("/logout", post(handlers::logout::logout))
        .with_state(state.clone());

    Router::new()
        .merge(transport_routes)
        .merge(logout_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors())
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://[::1]:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::COOKIE,
            bridge::http::SESSION_HEADER_NAME,
        ])
        .allow_credentials(true)
        .expose_headers([bridge::http::SESSION_HEADER_NAME])
        .max_age(Duration::from_secs(86400))
}
