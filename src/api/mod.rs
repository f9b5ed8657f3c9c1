//! HTTP control plane.
//!
//! JSON in, JSON out, with the selector-style PUT operations the
//! queue has always spoken. Handlers validate input, check admin
//! auth when enabled, delegate to the queue manager and map the error
//! taxonomy onto status codes. Every error path returns immediately.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query as UrlQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::error::{QueueError, Result};
use crate::ident::{ClientId, JobId, WuId};
use crate::model::JobSpec;
use crate::qmgr::{ListParams, QMgr};

/// Header carrying the opaque data token for workunit payload I/O.
const DATATOKEN_HEADER: &str = "datatoken";

#[derive(Clone)]
pub struct ApiState {
    pub qmgr: Arc<QMgr>,
}

pub fn router(qmgr: Arc<QMgr>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/job",
            post(submit_job)
                .get(list_jobs)
                .put(update_jobs)
                .delete(delete_jobs),
        )
        .route(
            "/job/:id",
            get(read_job).put(update_job).delete(delete_job),
        )
        .route("/client", post(register_client).get(list_clients))
        .route("/client/:id", put(update_client).delete(deregister_client))
        .route("/work", get(checkout_work))
        .route("/work/:id", put(notify_work))
        .route("/queue", get(queue_status))
        .layer(cors)
        .with_state(ApiState { qmgr })
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct Paginated<T: Serialize> {
    status: u16,
    data: Vec<T>,
    limit: usize,
    offset: usize,
    total_count: usize,
}

fn ok<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            status: 200,
            data: Some(data),
            error: None,
        }),
    )
        .into_response()
}

fn message(text: String) -> Response {
    ok(text)
}

fn failure(status: StatusCode, error: String) -> Response {
    (
        status,
        Json(Envelope::<()> {
            status: status.as_u16(),
            data: None,
            error: Some(error),
        }),
    )
        .into_response()
}

/// Map the error taxonomy onto response codes. `not_found_404`
/// is set only where the surface promises a real 404 (perf lookup,
/// worker polls); elsewhere a missing job is the caller's mistake.
fn fail(err: QueueError, not_found_404: bool) -> Response {
    let status = match &err {
        QueueError::NotFound(_) => {
            if not_found_404 {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::BAD_REQUEST
            }
        }
        QueueError::MalformedId(_)
        | QueueError::BadRequest(_)
        | QueueError::Conflict(_)
        | QueueError::DocTooLarge(_) => StatusCode::BAD_REQUEST,
        QueueError::Unauthorized => StatusCode::UNAUTHORIZED,
        QueueError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        QueueError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    failure(status, err.to_string())
}

/// Admin gate: when enabled, every endpoint requires a recognized
/// bearer token before any work happens.
fn authorized(state: &ApiState, headers: &HeaderMap) -> Result<()> {
    let config = state.qmgr.config();
    if !config.admin_auth {
        return Ok(());
    }
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(QueueError::Unauthorized)?;
    if config.admin_tokens.contains(token) {
        Ok(())
    } else {
        Err(QueueError::Unauthorized)
    }
}

fn data_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(DATATOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// POST /job
async fn submit_job(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(spec): Json<JobSpec>,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    let mut job = match state.qmgr.submit(spec).await {
        Ok(job) => job,
        Err(err) => return fail(err, false),
    };
    if let Some(token) = data_token(&headers) {
        if let Err(err) = state.qmgr.set_data_token(&job.id, &token).await {
            return fail(err, false);
        }
        job.datatoken = Some(token);
    }
    ok(job)
}

// GET /job/{id}
async fn read_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    let id: JobId = match id.parse() {
        Ok(id) => id,
        Err(err) => return fail(err, false),
    };

    if params.contains_key("perf") {
        return match state.qmgr.get_perf(&id).await {
            Ok(perf) => ok(perf),
            Err(err) => fail(err, true),
        };
    }

    if let Some(target) = params.get("export") {
        if target.is_empty() {
            return fail(QueueError::bad_request("lacking export target"), false);
        }
        return failure(
            StatusCode::NOT_IMPLEMENTED,
            format!("workflow export not supported: {}", target),
        );
    }

    match state.qmgr.get_job(&id).await {
        Ok(job) => ok(job),
        Err(err) => fail(err, false),
    }
}

// GET /job
async fn list_jobs(
    State(state): State<ApiState>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }

    let mut list = ListParams {
        active: params.contains_key("active"),
        suspend: params.contains_key("suspend"),
        registered: params.contains_key("registered"),
        descending: true,
        ..ListParams::default()
    };
    if let Some(v) = params.get("limit") {
        match v.parse() {
            Ok(n) => list.limit = Some(n),
            Err(_) => return fail(QueueError::bad_request("limit must be an integer"), false),
        }
    }
    if let Some(v) = params.get("offset") {
        match v.parse() {
            Ok(n) => list.offset = n,
            Err(_) => return fail(QueueError::bad_request("offset must be an integer"), false),
        }
    }
    if let Some(v) = params.get("order") {
        list.order = Some(v.clone());
    }
    if let Some(v) = params.get("direction") {
        list.descending = v != "asc";
    }
    if params.contains_key("query") {
        // Everything that is not a paging/selector key is a field
        // filter with comma-separated alternatives.
        let reserved = [
            "limit",
            "offset",
            "query",
            "recent",
            "order",
            "direction",
            "active",
            "suspend",
            "registered",
        ];
        for (key, value) in &params {
            if !reserved.contains(&key.as_str()) {
                list.query.insert(key.clone(), value.clone());
            }
        }
    }

    let limit = list
        .limit
        .unwrap_or(state.qmgr.config().default_page_size);
    match state.qmgr.list_jobs(&list).await {
        Ok((jobs, total)) => (
            StatusCode::OK,
            Json(Paginated {
                status: 200,
                data: jobs,
                limit,
                offset: list.offset,
                total_count: total,
            }),
        )
            .into_response(),
        Err(err) => fail(err, false),
    }
}

// PUT /job
async fn update_jobs(
    State(state): State<ApiState>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    if params.contains_key("resumeall") {
        return match state.qmgr.resume_all_suspended().await {
            Ok(n) => message(format!("{} suspended jobs resumed", n)),
            Err(err) => fail(err, false),
        };
    }
    failure(
        StatusCode::NOT_IMPLEMENTED,
        "requested job operation not supported".to_string(),
    )
}

// PUT /job/{id}
async fn update_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    let id: JobId = match id.parse() {
        Ok(id) => id,
        Err(err) => return fail(err, false),
    };

    if params.contains_key("resume") {
        return match state.qmgr.resume_job(&id).await {
            Ok(()) => message(format!("job resumed: {}", id)),
            Err(err) => fail(err, false),
        };
    }
    if params.contains_key("suspend") {
        return match state.qmgr.suspend_job(&id, "manually suspended").await {
            Ok(()) => message(format!("job suspended: {}", id)),
            Err(err) => fail(err, false),
        };
    }
    if params.contains_key("resubmit") || params.contains_key("reregister") {
        return match state.qmgr.resubmit_job(&id).await {
            Ok(()) => message(format!("job resubmitted: {}", id)),
            Err(err) => fail(err, false),
        };
    }
    if let Some(stage) = params.get("recompute") {
        return match state.qmgr.recompute_job(&id, stage).await {
            Ok(()) => message(format!("job recompute started: {}", id)),
            Err(err) => fail(err, false),
        };
    }
    if let Some(group) = params.get("clientgroup") {
        return match state.qmgr.update_group(&id, group).await {
            Ok(()) => message(format!("job group updated: {} to {}", id, group)),
            Err(err) => fail(err, false),
        };
    }
    if let Some(value) = params.get("priority") {
        let priority: u8 = match value.parse() {
            Ok(p) => p,
            Err(_) => {
                return fail(
                    QueueError::bad_request("need int for priority value (0-3)"),
                    false,
                )
            }
        };
        return match state.qmgr.update_priority(&id, priority).await {
            Ok(()) => message(format!("job priority updated: {} to {}", id, priority)),
            Err(err) => fail(err, false),
        };
    }
    if params.contains_key("settoken") {
        let Some(token) = data_token(&headers) else {
            return fail(
                QueueError::bad_request("missing data token header"),
                false,
            );
        };
        return match state.qmgr.set_data_token(&id, &token).await {
            Ok(()) => message(format!("data token set for job: {}", id)),
            Err(err) => fail(err, false),
        };
    }

    failure(
        StatusCode::NOT_IMPLEMENTED,
        "requested job operation not supported".to_string(),
    )
}

// DELETE /job/{id}
async fn delete_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    let id: JobId = match id.parse() {
        Ok(id) => id,
        Err(err) => return fail(err, false),
    };
    match state.qmgr.delete_job(&id).await {
        Ok(()) => message(format!("job deleted: {}", id)),
        Err(err) => fail(err, false),
    }
}

// DELETE /job
async fn delete_jobs(
    State(state): State<ApiState>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    if params.contains_key("suspend") {
        return match state.qmgr.delete_suspended_jobs().await {
            Ok(n) => message(format!("deleted {} suspended jobs", n)),
            Err(err) => fail(err, false),
        };
    }
    if params.contains_key("zombie") {
        return match state.qmgr.delete_zombie_jobs().await {
            Ok(n) => message(format!("deleted {} zombie jobs", n)),
            Err(err) => fail(err, false),
        };
    }
    failure(
        StatusCode::NOT_IMPLEMENTED,
        "requested job operation not supported".to_string(),
    )
}

#[derive(Deserialize)]
struct RegisterClientRequest {
    #[serde(default)]
    name: String,
    group: String,
    #[serde(default)]
    capabilities: Vec<String>,
}

// POST /client
async fn register_client(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<RegisterClientRequest>,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    match state
        .qmgr
        .register_client(req.name, req.group, req.capabilities)
        .await
    {
        Ok(client) => ok(client),
        Err(err) => fail(err, false),
    }
}

// GET /client
async fn list_clients(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    match state.qmgr.list_clients().await {
        Ok(clients) => ok(clients),
        Err(err) => fail(err, false),
    }
}

// PUT /client/{id}
async fn update_client(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    let id: ClientId = match id.parse() {
        Ok(id) => id,
        Err(err) => return fail(err, false),
    };
    if params.contains_key("heartbeat") {
        return match state.qmgr.client_heartbeat(&id).await {
            Ok(()) => message(format!("heartbeat received: {}", id)),
            Err(err) => fail(err, false),
        };
    }
    if params.contains_key("suspend") {
        return match state.qmgr.set_client_suspended(&id, true).await {
            Ok(()) => message(format!("client suspended: {}", id)),
            Err(err) => fail(err, false),
        };
    }
    if params.contains_key("resume") {
        return match state.qmgr.set_client_suspended(&id, false).await {
            Ok(()) => message(format!("client resumed: {}", id)),
            Err(err) => fail(err, false),
        };
    }
    failure(
        StatusCode::NOT_IMPLEMENTED,
        "requested client operation not supported".to_string(),
    )
}

// DELETE /client/{id}
async fn deregister_client(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    let id: ClientId = match id.parse() {
        Ok(id) => id,
        Err(err) => return fail(err, false),
    };
    match state.qmgr.deregister_client(&id).await {
        Ok(requeued) => message(format!(
            "client deregistered: {} ({} workunits requeued)",
            id, requeued
        )),
        Err(err) => fail(err, false),
    }
}

// GET /work?client={id}
async fn checkout_work(
    State(state): State<ApiState>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    let Some(client) = params.get("client") else {
        return fail(QueueError::bad_request("missing client parameter"), false);
    };
    let client: ClientId = match client.parse() {
        Ok(id) => id,
        Err(err) => return fail(err, false),
    };
    match state.qmgr.checkout_work(&client).await {
        Ok(wu) => ok(wu),
        // Workers poll; an empty queue is a 404, not a client error.
        Err(err) => fail(err, true),
    }
}

// PUT /work/{id}?status=done|fail&client={id}
async fn notify_work(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    let wuid: WuId = match id.parse() {
        Ok(id) => id,
        Err(err) => return fail(err, false),
    };
    let Some(client) = params.get("client") else {
        return fail(QueueError::bad_request("missing client parameter"), false);
    };
    let client: ClientId = match client.parse() {
        Ok(id) => id,
        Err(err) => return fail(err, false),
    };
    let success = match params.get("status").map(String::as_str) {
        Some("done") => true,
        Some("fail") => false,
        _ => {
            return fail(
                QueueError::bad_request("status must be done or fail"),
                false,
            )
        }
    };
    match state.qmgr.notify_work(&wuid, &client, success).await {
        Ok(()) => message(format!("workunit {} reported {}", wuid, if success { "done" } else { "fail" })),
        Err(err) => fail(err, false),
    }
}

// GET /queue
async fn queue_status(
    State(state): State<ApiState>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = authorized(&state, &headers) {
        return fail(err, false);
    }
    if params.contains_key("admin") {
        let special = params.get("special").map(String::as_str).unwrap_or("");
        return match state.qmgr.admin_overview(special).await {
            Ok(rows) => ok(rows),
            Err(err) => fail(err, false),
        };
    }
    match state.qmgr.queue_status().await {
        Ok(status) => ok(status),
        Err(err) => fail(err, false),
    }
}
