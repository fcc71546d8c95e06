use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use staging::{Article, Error};

use crate::AppState;

/// An error rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            Error::LeaseHeld { .. } | Error::LeaseLost { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

/// `POST /save`: stage one article.
///
/// Every failure is reported to the submitter as a 400 with the reason,
/// including store failures.
pub async fn save_article(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let value: Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!("Rejecting submission with invalid JSON: {e}");
        ApiError::new(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}"))
    })?;

    let article = Article::from_value(value).map_err(|e| {
        tracing::warn!("Rejecting submission: {e}");
        ApiError::from(Error::from(e))
    })?;

    let key = state.pending.stage(&article).await.map_err(|e| {
        tracing::error!(url = article.url(), "Failed to stage article: {e}");
        ApiError::new(StatusCode::BAD_REQUEST, e.to_string())
    })?;

    Ok(Json(json!({"status": "ok", "key": key})))
}

/// `POST /compact`: merge everything staged now.
pub async fn compact(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let report = state.compactor.compact().await.map_err(|e| {
        match &e {
            Error::LeaseHeld { .. } | Error::LeaseLost { .. } => tracing::info!("Compaction did not run under the lease: {e}"),
            _ => tracing::error!("Compaction failed: {e}"),
        }
        ApiError::from(e)
    })?;

    let (processed, total) = report.counts();
    Ok(Json(json!({
        "processed": processed,
        "total": total,
        "pending_found": report.pending_found,
        "inserted": report.inserted,
        "replaced": report.replaced,
        "skipped": report.skipped,
        "discard_failures": report.discard_failures,
    })))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_lease_errors_map_to_conflict() {
        let held = ApiError::from(Error::LeaseHeld {
            holder: "elsewhere".to_string(),
            expires_at: Utc::now(),
        });
        let lost = ApiError::from(Error::LeaseLost {
            holder: "here".to_string(),
        });

        assert_eq!(held.status(), StatusCode::CONFLICT);
        assert_eq!(lost.status(), StatusCode::CONFLICT);
    }
}
