use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{AppError, Result};

/// Arguments every cluster tool takes: a virtual HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub body: Option<String>,
}

impl Envelope {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            body: None,
        }
    }

    /// Parses tool-call arguments.
    pub fn from_args(args: &Value) -> Result<Self> {
        serde_json::from_value(args.clone())
            .map_err(|e| AppError::Validation(format!("invalid arguments: {}", e)))
    }

    /// The url up to the query string.
    pub fn path(&self) -> &str {
        match self.url.split_once('?') {
            Some((path, _)) => path,
            None => &self.url,
        }
    }

    /// Query parameters. Pairs without `=` are dropped; values are
    /// percent-decoded where possible.
    pub fn query(&self) -> HashMap<String, String> {
        let Some((_, query)) = self.url.split_once('?') else {
            return HashMap::new();
        };
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(key, value)| {
                let value = urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                (key.to_string(), value)
            })
            .collect()
    }
}

/// A virtual route a tool answers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub method: &'static str,
    pub path: &'static str,
    /// Query parameters that must be present and non-empty.
    pub params: &'static [&'static str],
}

impl Route {
    pub const fn new(method: &'static str, path: &'static str, params: &'static [&'static str]) -> Self {
        Self { method, path, params }
    }

    /// How a valid call looks, e.g. `GET /pods?cluster_name=xxx&namespace=xxx`.
    pub fn usage(&self) -> String {
        let query: Vec<String> = self.params.iter().map(|p| format!("{}=xxx", p)).collect();
        if query.is_empty() {
            format!("{} {}", self.method, self.path)
        } else {
            format!("{} {}?{}", self.method, self.path, query.join("&"))
        }
    }
}

/// JSON schema of [`Envelope`], shared by every cluster tool.
pub fn envelope_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "method": {
                "type": "string",
                "description": "HTTP method: GET/POST/PUT/DELETE",
                "enum": ["GET", "POST", "PUT", "DELETE"]
            },
            "url": {
                "type": "string",
                "description": "API path, e.g. /clusters or /namespaces?cluster_name=xxx"
            },
            "body": {
                "type": "string",
                "description": "Request body (optional, POST/PUT only)"
            }
        },
        "required": ["method", "url"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_path_and_query() {
        let env = Envelope::new("GET", "/pods?cluster_name=prod&namespace=kube%2Dsystem&flag");
        assert_eq!(env.path(), "/pods");
        let query = env.query();
        assert_eq!(query.get("cluster_name").map(String::as_str), Some("prod"));
        assert_eq!(query.get("namespace").map(String::as_str), Some("kube-system"));
        assert!(!query.contains_key("flag"));
    }

    #[test]
    fn urls_without_query_have_no_params() {
        let env = Envelope::new("GET", "/clusters");
        assert_eq!(env.path(), "/clusters");
        assert!(env.query().is_empty());
    }

    #[test]
    fn arguments_parse_with_missing_fields() {
        let env = Envelope::from_args(&json!({"url": "/clusters"})).unwrap();
        assert_eq!(env.method, "");
        assert!(Envelope::from_args(&json!({"url": 5})).is_err());
    }

    #[test]
    fn usage_lists_required_params() {
        let route = Route::new("POST", "/rollout_restart_deployment", &["cluster_name", "namespace", "name"]);
        assert_eq!(
            route.usage(),
            "POST /rollout_restart_deployment?cluster_name=xxx&namespace=xxx&name=xxx"
        );
        assert_eq!(Route::new("GET", "/clusters", &[]).usage(), "GET /clusters");
    }
}
