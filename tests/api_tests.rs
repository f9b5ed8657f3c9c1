mod common;

use common::*;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use flowq::api;
use flowq::config::Config;

async fn test_app() -> Router {
    let (qmgr, _store) = new_qmgr().await;
    api::router(qmgr)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn submission(name: &str) -> Value {
    json!({
        "info": {"name": name, "user": "tester"},
        "tasks": [
            {"name": "a"},
            {"name": "b", "inputs": [{"filename": "a.out", "origin": "a"}]}
        ]
    })
}

async fn submit(app: &Router, doc: Value) -> Value {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/job")
                .header("content-type", "application/json")
                .body(Body::from(doc.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn submit_returns_the_job_document() {
    let app = test_app().await;
    let body = submit(&app, submission("demo")).await;
    assert_eq!(body["status"], 200);
    assert_eq!(body["data"]["info"]["name"], "demo");
    assert_eq!(body["data"]["state"], "queueing");
    assert_eq!(body["data"]["tasks"].as_array().unwrap().len(), 2);
    assert!(body["data"]["registered"].as_bool().unwrap());
}

#[tokio::test]
async fn submit_without_tasks_is_rejected() {
    let app = test_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/job")
                .header("content-type", "application/json")
                .body(Body::from(json!({"info": {"name": "empty"}}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submit_accepts_a_workflow_document() {
    let app = test_app().await;
    let doc = json!({
        "info": {"name": "cwl-demo"},
        "workflow": {
            "class": "Workflow",
            "id": "main",
            "steps": [
                {
                    "id": "align",
                    "run": {"class": "CommandLineTool", "baseCommand": ["bwa", "mem"]},
                    "in": [{"id": "reads", "source": "reads"}],
                    "out": ["bam"]
                },
                {
                    "id": "count",
                    "run": {"class": "CommandLineTool", "baseCommand": ["count"]},
                    "in": [{"id": "bam", "source": "align/bam"}],
                    "out": ["counts"]
                }
            ]
        }
    });
    let body = submit(&app, doc).await;
    let tasks = body["data"]["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["cmd"]["name"], "bwa");
}

#[tokio::test]
async fn data_token_header_is_stored() {
    let app = test_app().await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/job")
                .header("content-type", "application/json")
                .header("datatoken", "opaque-token")
                .body(Body::from(submission("tokened").to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["datatoken"], "opaque-token");
}

#[tokio::test]
async fn read_job_reports_registration() {
    let app = test_app().await;
    let body = submit(&app, submission("readable")).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/job/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["id"], id.as_str());
    assert!(body["data"]["registered"].as_bool().unwrap());
}

#[tokio::test]
async fn missing_perf_is_a_404() {
    let app = test_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/job/deadbeef?perf=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn perf_is_served_for_known_jobs() {
    let app = test_app().await;
    let body = submit(&app, submission("perfy")).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/job/{}?perf=1", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["id"], id.as_str());
}

#[tokio::test]
async fn job_list_is_paginated() {
    let app = test_app().await;
    submit(&app, submission("one")).await;
    submit(&app, submission("two")).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/job?limit=1&offset=0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total_count"], 2);
    assert_eq!(body["limit"], 1);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn lifecycle_selectors_drive_the_job() {
    let app = test_app().await;
    let body = submit(&app, submission("lifecycle")).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let put = |uri: String| {
        let app = app.clone();
        async move {
            app.oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
        }
    };

    assert_eq!(
        put(format!("/job/{}?suspend", id)).await.status(),
        StatusCode::OK
    );
    let listed = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/job?suspend")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let listed = body_json(listed).await;
    assert_eq!(listed["total_count"], 1);

    assert_eq!(
        put(format!("/job/{}?resume", id)).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        put(format!("/job/{}?priority=2", id)).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        put(format!("/job/{}?priority=9", id)).await.status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        put(format!("/job/{}?clientgroup=gpu", id)).await.status(),
        StatusCode::OK
    );
    // Empty recompute stage is terminal, not a warning.
    assert_eq!(
        put(format!("/job/{}?recompute=", id)).await.status(),
        StatusCode::BAD_REQUEST
    );
    // Unknown selector.
    assert_eq!(
        put(format!("/job/{}?frobnicate", id)).await.status(),
        StatusCode::NOT_IMPLEMENTED
    );
}

#[tokio::test]
async fn resumeall_and_bulk_delete() {
    let app = test_app().await;
    let body = submit(&app, submission("bulk")).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let suspend = Request::builder()
        .method("PUT")
        .uri(format!("/job/{}?suspend", id))
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(suspend).await.unwrap();

    let resumeall = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/job?resumeall")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resumeall.status(), StatusCode::OK);
    let body = body_json(resumeall).await;
    assert_eq!(body["data"], "1 suspended jobs resumed");

    let bulk = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/job?suspend")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bulk.status(), StatusCode::OK);
    let body = body_json(bulk).await;
    assert_eq!(body["data"], "deleted 0 suspended jobs");

    let unknown = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/job")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn worker_plane_checkout_and_notify() {
    let app = test_app().await;

    let registered = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/client")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"name": "w1", "group": "default"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(registered.status(), StatusCode::OK);
    let client = body_json(registered).await;
    let client_id = client["data"]["id"].as_str().unwrap().to_string();

    // Nothing to do yet.
    let idle = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/work?client={}", client_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(idle.status(), StatusCode::NOT_FOUND);

    submit(&app, submission("dispatchable")).await;

    let checkout = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/work?client={}", client_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(checkout.status(), StatusCode::OK);
    let wu = body_json(checkout).await;
    let wuid = wu["data"]["wuid"].as_str().unwrap().to_string();
    assert_eq!(wu["data"]["state"], "checked-out");

    let notify = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/work/{}?status=done&client={}", wuid, client_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(notify.status(), StatusCode::OK);

    let bad_status = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/work/{}?status=maybe&client={}", wuid, client_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bad_status.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn queue_status_reports_counters() {
    let app = test_app().await;
    submit(&app, submission("counted")).await;

    let response = app
        .oneshot(Request::builder().uri("/queue").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["jobs"], 1);
    assert_eq!(body["data"]["queued_workunits"], 1);
}

#[tokio::test]
async fn admin_auth_gates_every_endpoint() {
    let config = Config {
        admin_auth: true,
        admin_tokens: ["sekret".to_string()].into_iter().collect(),
        ..test_config()
    };
    let (qmgr, _store) = new_qmgr_with(config).await;
    let app = api::router(qmgr);

    let denied = app
        .clone()
        .oneshot(Request::builder().uri("/job").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/job")
                .header("authorization", "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let allowed = app
        .oneshot(
            Request::builder()
                .uri("/job")
                .header("authorization", "Bearer sekret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let app = test_app().await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/job/not_a_valid_id")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/work/norank?status=done&client=w1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn export_is_not_implemented() {
    let app = test_app().await;
    let body = submit(&app, submission("exported")).await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/job/{}?export=taverna", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
}
