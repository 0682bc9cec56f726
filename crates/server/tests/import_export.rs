mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use common::test_app;
use serde_json::json;
use tower::ServiceExt;

fn csv_upload(uri: &str, token: &str, csv: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "text/csv")
        .body(Body::from(csv.to_string()))
        .unwrap()
}

#[tokio::test]
async fn uploads_skip_known_tasks() {
    let app = test_app().await;
    let owner = app.register("owner").await;
    let other = app.register("other").await;
    app.create_project(&owner, "birds", json!({})).await;

    let (status, _) = app
        .send(csv_upload("/projects/birds/tasks/import", &other.token, "question\nq1\n"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(csv_upload(
            "/projects/birds/tasks/import",
            &owner.token,
            "question,n_answers\nq1,2\nq2,2\n",
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["message"], "2 new tasks were imported successfully");

    let (status, body) = app
        .send(csv_upload(
            "/projects/birds/tasks/import",
            &owner.token,
            "question,n_answers\nq1,2\nq3,2\n",
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "1 new task was imported successfully");

    let (status, body) = app
        .send(csv_upload(
            "/projects/birds/tasks/import",
            &owner.token,
            "question,n_answers\nq1,2\n",
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "It looks like there were no new records to import");

    let (status, body) = app
        .send(csv_upload("/projects/birds/tasks/import", &owner.token, "a,a\n1,2\n"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "The file you uploaded has two headers with the same name."
    );

    let (status, body) = app
        .get("/projects/birds/tasks/import", Some(&owner.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["max_sync_import"], 300);
}

#[tokio::test]
async fn export_formats() {
    let app = test_app().await;
    let owner = app.register("owner").await;
    let project_id = app.create_project(&owner, "birds", json!({})).await;

    let (status, body) = app.get("/projects/birds/tasks/export", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["n_tasks"], 0);

    let (status, body) = app
        .get("/projects/birds/tasks/export?type=task&format=csv", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "project does not have tasks");

    app.create_task(&owner, project_id, json!({"photo": "1.jpg"})).await;

    let response = app
        .app
        .clone()
        .oneshot(
            Request::get("/projects/birds/tasks/export?type=task&format=json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=birds_task.json"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let tasks: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(tasks[0]["info"]["photo"], "1.jpg");

    let response = app
        .app
        .clone()
        .oneshot(
            Request::get("/projects/birds/tasks/export?type=task&format=csv")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(csv.lines().next().unwrap().ends_with("taskinfo__photo"));

    let (status, _) = app
        .get("/projects/birds/tasks/export?type=task", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .get("/projects/birds/tasks/export?type=wrong&format=json", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .get("/projects/birds/tasks/export?type=task&format=xml", None)
        .await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let (status, _) = app
        .get("/projects/missing/tasks/export?type=task&format=json", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .get("/projects/birds/tasks/export?type=task_run&format=ckan", Some(&owner.token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "CKAN export is not configured");
}
