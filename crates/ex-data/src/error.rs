//! Boundary normalization of backend failures into the common UI-facing
//! error shape. Classification happens exactly once, where backend output
//! is first received; downstream consumers never re-classify.

use ex_core::{QueryError, RawMessage};

use crate::DataError;

/// Normalizes any execution failure. `DataError::Backend` payloads go
/// through raw-shape recognition; every other variant carries a usable
/// message already.
pub fn normalize_query_error(err: &anyhow::Error, key: Option<&str>) -> QueryError {
    let normalized = match err.downcast_ref::<DataError>() {
        Some(DataError::Backend(raw)) => normalize_raw_error(raw),
        Some(other) => QueryError::message(other.to_string()),
        None => QueryError::message(err.to_string()),
    };
    match key {
        Some(key) => normalized.with_key(key),
        None => normalized,
    }
}

/// Recognizes the known raw error shapes; everything else coerces to the
/// unknown-error sentinel and the original payload is logged.
pub fn normalize_raw_error(raw: &RawMessage) -> QueryError {
    if let Some(text) = raw.as_str() {
        return QueryError::message(text);
    }
    if let Some(object) = raw.as_object() {
        let key = object
            .get("key")
            .or_else(|| object.get("refId"))
            .and_then(|v| v.as_str());
        let message = object
            .get("message")
            .or_else(|| object.get("error"))
            .and_then(|v| v.as_str())
            .or_else(|| {
                object
                    .get("data")
                    .and_then(|d| d.get("message"))
                    .and_then(|v| v.as_str())
            });
        if let Some(message) = message {
            let detail = object
                .get("detail")
                .or_else(|| object.get("data").and_then(|d| d.get("error")))
                .and_then(|v| v.as_str());
            let mut error = QueryError::message(message);
            if let Some(detail) = detail {
                error = error.with_detail(detail);
            }
            if let Some(key) = key {
                error = error.with_key(key);
            }
            return error;
        }
    }
    tracing::error!(payload = %raw, "unrecognized backend error shape");
    QueryError::unknown()
}
