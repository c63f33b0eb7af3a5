use crate::config::ServerConfig;
use crate::error::ScoreError;
use crate::forum::PostRepository;
use crate::jobs::{JobQueue, PostEvent};
use crate::pipeline::Moderator;
use crate::policy::submit_check_required;
use crate::rate_limit::RateLimiter;
use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Header the host proxy sets to the authenticated forum user.
pub const USER_ID_HEADER: &str = "x-forum-user-id";

const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub moderator: Arc<Moderator>,
    pub jobs: JobQueue,
    pub limiter: Arc<RateLimiter>,
    pub limits: ServerConfig,
}

/// Draft check form. The host passes the topic context of the draft so
/// the private/restricted bypass rules apply.
#[derive(Debug, Deserialize)]
struct CheckForm {
    concat: Option<String>,
    #[serde(default)]
    private_message: bool,
    #[serde(default)]
    read_restricted: bool,
}

#[derive(Debug, Deserialize)]
struct HookPayload {
    post_id: Option<i64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/perspective/post_toxicity", post(post_toxicity))
        .route("/perspective/hooks/post_created", post(post_created))
        .route("/perspective/hooks/post_edited", post(post_edited))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    log::info!("Listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

fn errors(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "errors": [message.into()] }))).into_response()
}

fn forum_user_id(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(USER_ID_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
}

async fn post_toxicity(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    form: Result<Form<CheckForm>, FormRejection>,
) -> Response {
    if !state.moderator.settings().enabled {
        return errors(StatusCode::NOT_FOUND, "not found");
    }

    let user_id = forum_user_id(&headers);
    let (key, max) = match user_id {
        Some(id) => (format!("user:{id}"), state.limits.authenticated_per_minute),
        None => (format!("ip:{}", addr.ip()), state.limits.anonymous_per_minute),
    };
    if let Err(e) = state.limiter.performed(&key, max, RATE_WINDOW) {
        log::debug!("{e}");
        let mut response = errors(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, e.retry_after_secs.into());
        return response;
    }

    let Form(form) = match form {
        Ok(form) => form,
        Err(e) => return errors(StatusCode::BAD_REQUEST, e.body_text()),
    };
    if !submit_check_required(
        state.moderator.settings(),
        form.private_message,
        form.read_restricted,
    ) {
        return Json(json!({})).into_response();
    }
    let content = match form.concat {
        Some(content) if !content.trim().is_empty() => content,
        _ => return Json(json!({})).into_response(),
    };

    match state.moderator.check_content_toxicity(&content, user_id).await {
        Ok(Some(score)) => Json(json!({ "score": score.score })).into_response(),
        Ok(None) => Json(json!({})).into_response(),
        Err(ScoreError::Network(e)) => {
            log::warn!("Toxicity check failed, letting the post through: {e}");
            Json(json!({})).into_response()
        }
        Err(e) => {
            log::error!("Toxicity check failed: {e}");
            errors(StatusCode::FORBIDDEN, e.to_string())
        }
    }
}

async fn post_created(
    State(state): State<AppState>,
    payload: Result<Json<HookPayload>, JsonRejection>,
) -> Response {
    post_event(state, PostEvent::Created, payload)
}

async fn post_edited(
    State(state): State<AppState>,
    payload: Result<Json<HookPayload>, JsonRejection>,
) -> Response {
    post_event(state, PostEvent::Edited, payload)
}

fn post_event(
    state: AppState,
    event: PostEvent,
    payload: Result<Json<HookPayload>, JsonRejection>,
) -> Response {
    let post_id = match payload {
        Ok(Json(HookPayload {
            post_id: Some(id),
        })) => id,
        Ok(_) => return errors(StatusCode::BAD_REQUEST, "missing post_id"),
        Err(e) => return errors(StatusCode::BAD_REQUEST, e.body_text()),
    };

    let post = match state.moderator.posts().find_post(post_id) {
        Ok(Some(post)) => post,
        Ok(None) => return errors(StatusCode::NOT_FOUND, format!("post {post_id} not found")),
        Err(e) => {
            log::error!("Failed to load post {post_id}: {e:#}");
            return errors(StatusCode::INTERNAL_SERVER_ERROR, "host store failure");
        }
    };

    let queued = state.jobs.on_post_event(event, &post);
    (StatusCode::ACCEPTED, Json(json!({ "queued": queued }))).into_response()
}
