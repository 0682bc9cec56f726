#![allow(dead_code)]

use std::net::SocketAddr;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{Method, Request, StatusCode, header},
};
use db::{
    DBService,
    models::user::{CreateUser, User},
};
use deployment::Deployment;
use local_deployment::LocalDeployment;
use serde_json::{Value, json};
use server::routes;
use services::services::{auth::AuthService, config::Config};
use tower::ServiceExt;

pub struct TestApp {
    pub app: Router,
    pub deployment: LocalDeployment,
}

/// A signed-up user with their session token and API key.
pub struct TestUser {
    pub id: i64,
    pub name: String,
    pub token: String,
    pub api_key: String,
}

pub async fn test_app() -> TestApp {
    test_app_with(Config::default()).await
}

pub async fn test_app_with(config: Config) -> TestApp {
    let db = DBService::new_in_memory().await.unwrap();
    let auth = AuthService::new(config.secret_key.clone(), 1).with_bcrypt_cost(4);
    let deployment = LocalDeployment::from_parts(config, db, auth);
    deployment.ensure_default_category().await.unwrap();
    // The first account becomes admin; seed one so registered test users are regular.
    User::create(
        &deployment.db().pool,
        &CreateUser {
            name: "root".to_string(),
            fullname: "Root".to_string(),
            email_addr: "root@example.com".to_string(),
            passwd_hash: None,
            info: None,
        },
    )
    .await
    .unwrap();
    TestApp {
        app: routes::app(deployment.clone()),
        deployment,
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Marks `request` as arriving from `ip`, as the served router would.
pub fn from_peer(mut request: Request<Body>, ip: &str) -> Request<Body> {
    let addr = SocketAddr::new(ip.parse().unwrap(), 40_000);
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(request(Method::GET, uri, token, None)).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(request(Method::POST, uri, token, Some(body))).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(request(Method::PUT, uri, token, Some(body))).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(request(Method::DELETE, uri, token, None)).await
    }

    pub async fn register(&self, name: &str) -> TestUser {
        let (status, body) = self
            .post(
                "/account/register",
                None,
                json!({
                    "fullname": format!("{name} Tester"),
                    "name": name,
                    "email_addr": format!("{name}@example.com"),
                    "password": "p4ssw0rd",
                    "confirm": "p4ssw0rd",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let data = &body["data"];
        TestUser {
            id: data["user"]["id"].as_i64().unwrap(),
            name: name.to_string(),
            token: data["token"].as_str().unwrap().to_string(),
            api_key: data["user"]["api_key"].as_str().unwrap().to_string(),
        }
    }

    pub async fn register_admin(&self, name: &str) -> TestUser {
        let user = self.register(name).await;
        User::set_admin(&self.deployment.db().pool, user.id, true)
            .await
            .unwrap();
        user
    }

    /// Creates a project owned by `owner` and returns its id.
    pub async fn create_project(&self, owner: &TestUser, short_name: &str, extra: Value) -> i64 {
        let mut form = json!({
            "name": format!("Project {short_name}"),
            "short_name": short_name,
            "long_description": "A **crowdsourcing** project",
        });
        if let (Some(form), Value::Object(extra)) = (form.as_object_mut(), extra) {
            form.extend(extra);
        }
        let (status, body) = self.post("/projects", Some(&owner.token), form).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_i64().unwrap()
    }

    /// Adds a task through the REST API and returns its id.
    pub async fn create_task(&self, owner: &TestUser, project_id: i64, info: Value) -> i64 {
        let (status, body) = self
            .post(
                "/api/task",
                Some(&owner.token),
                json!({"project_id": project_id, "info": info, "n_answers": 1}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_i64().unwrap()
    }
}
