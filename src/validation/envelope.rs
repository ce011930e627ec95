use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::tools::envelope::{Envelope, Route};

/// Methods an envelope may carry.
pub const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE"];

/// Validates an envelope's method.
///
/// # Arguments
///
/// * `method` - The method to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the method is one of [`ALLOWED_METHODS`].
pub fn validate_method(method: &str) -> Result<()> {
    if method.is_empty() {
        return Err(AppError::Validation("method is required".to_string()));
    }

    if !ALLOWED_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method)) {
        return Err(AppError::Validation(format!(
            "unsupported method '{}', expected one of {}",
            method,
            ALLOWED_METHODS.join("/")
        )));
    }

    Ok(())
}

/// Checks an envelope against the route a tool serves and returns its
/// query parameters.
///
/// # Arguments
///
/// * `envelope` - The request the caller sent.
/// * `route` - The only method and path the tool accepts.
///
/// # Returns
///
/// The query parameters, with every one `route` requires present and non-empty.
pub fn validate_envelope(envelope: &Envelope, route: &Route) -> Result<HashMap<String, String>> {
    validate_method(&envelope.method)?;

    if !envelope.method.eq_ignore_ascii_case(route.method) || envelope.path() != route.path {
        return Err(AppError::Validation(format!("only {} is supported", route.usage())));
    }

    let query = envelope.query();
    let missing: Vec<&str> = route
        .params
        .iter()
        .copied()
        .filter(|p| query.get(*p).is_none_or(|v| v.trim().is_empty()))
        .collect();
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "parameter {} required",
            missing.join(", ")
        )));
    }

    Ok(query)
}
