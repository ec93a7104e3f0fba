use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::dispatcher::ChatDispatcher;
use super::inbound::{CallbackBoundary, InboundMessage};
use super::service::PushService;
use crate::error::AppError;
use crate::workflows::candidates::{owner_from_headers, CandidateRepository};

pub(crate) struct NotifyState<R, D> {
    service: Arc<PushService<R, D>>,
    boundary: CallbackBoundary,
}

impl<R, D> Clone for NotifyState<R, D> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            boundary: self.boundary.clone(),
        }
    }
}

impl<R, D> NotifyState<R, D>
where
    R: CandidateRepository + 'static,
    D: ChatDispatcher + 'static,
{
    pub(crate) fn new(service: Arc<PushService<R, D>>) -> Self {
        Self {
            boundary: CallbackBoundary::new(service.clone()),
            service,
        }
    }
}

/// Robot callback body as delivered by the chat platform.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackPayload {
    #[serde(default)]
    pub text: CallbackText,
    #[serde(rename = "senderStaffId", default)]
    pub sender_staff_id: String,
    #[serde(rename = "sessionWebhook", default)]
    pub session_webhook: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackText {
    #[serde(default)]
    pub content: String,
}

impl From<CallbackPayload> for InboundMessage {
    fn from(payload: CallbackPayload) -> Self {
        Self {
            content: payload.text.content.trim().to_string(),
            sender_id: payload.sender_staff_id,
            session_webhook: payload.session_webhook,
        }
    }
}

pub fn notify_router<R, D>(service: Arc<PushService<R, D>>) -> Router
where
    R: CandidateRepository + 'static,
    D: ChatDispatcher + 'static,
{
    Router::new()
        .route("/api/v1/notify/push", post(push_handler::<R, D>))
        .route("/api/v1/notify/test", post(test_handler::<R, D>))
        .route("/api/v1/notify/session", get(session_handler::<R, D>))
        .route("/api/v1/notify/callback", post(callback_handler::<R, D>))
        .with_state(NotifyState::new(service))
}

fn unauthorized() -> Response {
    let payload = json!({ "error": "missing or invalid owner" });
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

pub(crate) async fn push_handler<R, D>(
    State(state): State<NotifyState<R, D>>,
    headers: HeaderMap,
) -> Response
where
    R: CandidateRepository + 'static,
    D: ChatDispatcher + 'static,
{
    let Some(owner) = owner_from_headers(&headers) else {
        return unauthorized();
    };

    match state.service.push_manual(owner).await {
        Ok(0) => Json(json!({
            "success": true,
            "message": "没有待推送的候选人",
            "count": 0,
        }))
        .into_response(),
        Ok(count) => Json(json!({
            "success": true,
            "message": format!("已推送 {count} 位候选人"),
            "count": count,
        }))
        .into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub(crate) async fn test_handler<R, D>(
    State(state): State<NotifyState<R, D>>,
    headers: HeaderMap,
) -> Response
where
    R: CandidateRepository + 'static,
    D: ChatDispatcher + 'static,
{
    let Some(owner) = owner_from_headers(&headers) else {
        return unauthorized();
    };

    match state.service.send_test(owner).await {
        Ok(()) => Json(json!({
            "success": true,
            "message": "测试消息已发送，请查看钉钉群",
        }))
        .into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}

pub(crate) async fn session_handler<R, D>(State(state): State<NotifyState<R, D>>) -> Response
where
    R: CandidateRepository + 'static,
    D: ChatDispatcher + 'static,
{
    Json(json!({ "session": state.service.current_session() })).into_response()
}

/// Always acknowledges so the platform never retries; failures are handled by the boundary.
pub(crate) async fn callback_handler<R, D>(
    State(state): State<NotifyState<R, D>>,
    Json(payload): Json<CallbackPayload>,
) -> Response
where
    R: CandidateRepository + 'static,
    D: ChatDispatcher + 'static,
{
    state.boundary.deliver(payload.into()).await;
    (StatusCode::OK, Json(json!({}))).into_response()
}
