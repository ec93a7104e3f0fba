use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Form, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::domain::BatchOptions;
use super::events::EventSink;
use super::service::{BatchError, BatchEvaluationService};
use crate::workflows::candidates::{owner_from_headers, CandidateRepository};

/// Events buffered ahead of a slow reader before workers start waiting on it.
const STREAM_BUFFER: usize = 32;

/// Form fields of a batch request. Flags are on only when sent as `"true"`.
#[derive(Debug, Default, Deserialize)]
pub struct BatchForm {
    #[serde(default)]
    pub jd: String,
    #[serde(default)]
    pub criteria: String,
    #[serde(default)]
    pub force_reevaluate: Option<String>,
    #[serde(default)]
    pub skip_duplicates: Option<String>,
}

impl BatchForm {
    pub fn into_options(self) -> BatchOptions {
        BatchOptions {
            jd: self.jd,
            criteria: self.criteria,
            force_reevaluate: self.force_reevaluate.as_deref() == Some("true"),
            skip_duplicates: self.skip_duplicates.as_deref() == Some("true"),
        }
    }
}

/// Router builder exposing the streaming batch evaluation endpoint.
pub fn batch_router<R>(service: Arc<BatchEvaluationService<R>>) -> Router
where
    R: CandidateRepository + 'static,
{
    Router::new()
        .route("/api/v1/evaluate/batch", post(evaluate_batch_handler::<R>))
        .with_state(service)
}

pub(crate) async fn evaluate_batch_handler<R>(
    State(service): State<Arc<BatchEvaluationService<R>>>,
    headers: HeaderMap,
    Form(form): Form<BatchForm>,
) -> Response
where
    R: CandidateRepository + 'static,
{
    let Some(owner) = owner_from_headers(&headers) else {
        let payload = json!({ "error": "missing or invalid owner" });
        return (StatusCode::UNAUTHORIZED, axum::Json(payload)).into_response();
    };

    let credentials = match service.credentials_for(owner) {
        Ok(credentials) => credentials,
        Err(BatchError::MissingCredentials(_)) => {
            let payload = json!({
                "error": "凭据未找到，请重新登录",
                "code": "CREDENTIALS_NOT_FOUND",
            });
            return (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response();
        }
        Err(other) => {
            error!(%owner, error = %other, "credential lookup failed");
            let payload = json!({ "error": other.to_string() });
            return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response();
        }
    };

    let (sink, receiver) = EventSink::channel(STREAM_BUFFER);
    service.spawn_run(owner, credentials, form.into_options(), sink);

    let frames = futures::stream::unfold(receiver, |mut receiver| async move {
        receiver
            .recv()
            .await
            .map(|event| (Ok::<_, Infallible>(event.to_frame()), receiver))
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}
