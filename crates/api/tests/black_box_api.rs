use std::sync::{Arc, Mutex};

use axum::{Json, Router, extract::State, routing::post};
use chrono::Utc;
use keygate_api::app::AppServices;
use keygate_api::config::Config;
use keygate_auth::{KeyEntry, KeySet, Role};
use keygate_identity::{NewIdentity, PasswordHasher, RecordingNotifier};
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    services: AppServices,
    notifier: Arc<RecordingNotifier>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let notifier = Arc::new(RecordingNotifier::new());
        let services = AppServices::in_memory(
            KeySet::generate("k1").unwrap(),
            notifier.clone(),
            PasswordHasher::new(4),
        );

        // Same router as prod, bound to an ephemeral port.
        let app = keygate_api::app::build_app(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            notifier,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Register, confirm and log in directly through the services.
    async fn seed_user(&self, email: &str, password: &str, roles: Vec<Role>) -> (String, String) {
        let identity = self
            .services
            .identity
            .register(
                NewIdentity {
                    name: "Seed".into(),
                    email: email.into(),
                    password: password.into(),
                    password_confirm: password.into(),
                    roles,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let code = self.notifier.last_code_for(email).unwrap();
        self.services
            .identity
            .confirm(email, code.value(), Utc::now())
            .await
            .unwrap();
        let claims = self
            .services
            .identity
            .authenticate(email, password, Utc::now())
            .await
            .unwrap();
        let token = self.services.tokens.issue(&claims).unwrap();
        (identity.id.to_string(), token)
    }

    async fn admin_token(&self) -> String {
        self.seed_user("root@x.com", "rootpass1", vec![Role::ADMIN, Role::USER])
            .await
            .1
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn ann_registration() -> serde_json::Value {
    json!({
        "name": "Ann",
        "email": "ann@x.com",
        "password": "secret123",
        "password_confirm": "secret123",
        "roles": ["user"],
    })
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn ann_registers_confirms_and_is_forbidden_from_admin_routes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // Register
    let res = client
        .post(srv.url("/v1/users"))
        .json(&ann_registration())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(created["confirmed"], false);
    assert!(created.get("password_hash").is_none());

    // Profile without a token
    let res = client.get(srv.url("/v1/users/me")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Wrong code
    let code = srv.notifier.last_code_for("ann@x.com").unwrap().value();
    let wrong = if code == 999_999 { 100_000 } else { code + 1 };
    let res = client
        .put(srv.url("/v1/users/confirm"))
        .json(&json!({ "email": "ann@x.com", "code": wrong }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let ann = srv.services.identity.query_by_email("ann@x.com").await.unwrap();
    assert!(!ann.is_confirmed());

    // Correct code
    let res = client
        .put(srv.url("/v1/users/confirm"))
        .json(&json!({ "email": "ann@x.com", "code": code }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let ann = srv.services.identity.query_by_email("ann@x.com").await.unwrap();
    assert!(ann.is_confirmed());

    // Token via Basic credentials
    let res = client
        .get(srv.url("/v1/users/token"))
        .basic_auth("ann@x.com", Some("secret123"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    let token = body["token"].as_str().unwrap().to_string();
    assert_eq!(token.matches('.').count(), 2);

    // Role-gated endpoint
    let res = client
        .get(srv.url("/v1/users/1/10"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({"error": "forbidden", "message": "forbidden"}));

    // Own profile works
    let res = client
        .get(srv.url("/v1/users/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let me: serde_json::Value = res.json().await.unwrap();
    assert_eq!(me["id"], id.as_str());
    assert_eq!(me["confirmed"], true);
}

#[tokio::test]
async fn confirm_errors_map_to_statuses() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .put(srv.url("/v1/users/confirm"))
        .json(&json!({ "email": "nobody@x.com", "code": 123456 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    srv.seed_user("ann@x.com", "secret123", vec![Role::USER]).await;
    let res = client
        .put(srv.url("/v1/users/confirm"))
        .json(&json!({ "email": "ann@x.com", "code": 123456 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/v1/users"))
        .json(&ann_registration())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let mut again = ann_registration();
    again["email"] = json!("ANN@x.com");
    again["name"] = json!("Impostor");
    let res = client.post(srv.url("/v1/users")).json(&again).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn invalid_registration_reports_fields() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/v1/users"))
        .json(&json!({ "name": "Ann", "email": "not-an-email", "password": "a", "password_confirm": "b" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation");
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"password_confirm"));
    assert!(fields.contains(&"roles"));
}

#[tokio::test]
async fn granting_admin_requires_admin_token() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let mut body = ann_registration();
    body["roles"] = json!(["user", "admin"]);

    let res = client.post(srv.url("/v1/users")).json(&body).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let (_, user_token) = srv.seed_user("bob@x.com", "hunter22", vec![Role::USER]).await;
    let res = client
        .post(srv.url("/v1/users"))
        .bearer_auth(&user_token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let admin = srv.admin_token().await;
    let res = client
        .post(srv.url("/v1/users"))
        .bearer_auth(&admin)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    // A bad token is rejected even on the public route.
    let res = client
        .post(srv.url("/v1/users"))
        .bearer_auth("not.a.token")
        .json(&ann_registration())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn json_token_endpoint_and_uniform_failures() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    srv.seed_user("ann@x.com", "secret123", vec![Role::USER]).await;

    let res = client
        .post(srv.url("/v1/users/token"))
        .json(&json!({ "email": "ann@x.com", "password": "secret123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let wrong_password = client
        .post(srv.url("/v1/users/token"))
        .json(&json!({ "email": "ann@x.com", "password": "secret124" }))
        .send()
        .await
        .unwrap();
    let unknown = client
        .post(srv.url("/v1/users/token"))
        .json(&json!({ "email": "carl@x.com", "password": "secret123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    let a: serde_json::Value = wrong_password.json().await.unwrap();
    let b: serde_json::Value = unknown.json().await.unwrap();
    assert_eq!(a, b);

    let res = client.get(srv.url("/v1/users/token")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn users_see_themselves_but_not_others() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (ann_id, ann_token) = srv.seed_user("ann@x.com", "secret123", vec![Role::USER]).await;
    let (bob_id, _) = srv.seed_user("bob@x.com", "hunter22", vec![Role::USER]).await;

    let res = client
        .get(srv.url(&format!("/v1/users/{ann_id}")))
        .bearer_auth(&ann_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(srv.url(&format!("/v1/users/{bob_id}")))
        .bearer_auth(&ann_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .delete(srv.url(&format!("/v1/users/{bob_id}")))
        .bearer_auth(&ann_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_lists_updates_and_deletes_users() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = srv.admin_token().await;
    let (ann_id, _) = srv.seed_user("ann@x.com", "secret123", vec![Role::USER]).await;

    let res = client
        .get(srv.url("/v1/users/1/10"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let list: serde_json::Value = res.json().await.unwrap();
    assert_eq!(list["items"].as_array().unwrap().len(), 2);

    let res = client
        .get(srv.url("/v1/users/0/10"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .put(srv.url(&format!("/v1/users/{ann_id}")))
        .bearer_auth(&admin)
        .json(&json!({ "name": "Ann Smith" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(srv.url(&format!("/v1/users/{ann_id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let ann: serde_json::Value = res.json().await.unwrap();
    assert_eq!(ann["name"], "Ann Smith");
    assert_eq!(ann["email"], "ann@x.com");

    let res = client
        .delete(srv.url(&format!("/v1/users/{ann_id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(srv.url(&format!("/v1/users/{ann_id}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url("/v1/users/not-a-uuid"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tokens_from_retired_keys_are_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (_, old_token) = srv.seed_user("ann@x.com", "secret123", vec![Role::USER]).await;

    // Rotate to k2, keeping k1 for verification.
    let keys = srv.services.tokens.keys().clone();
    let rotated = keys
        .snapshot()
        .to_builder()
        .with_entry(KeyEntry::generate("k2").unwrap())
        .current("k2")
        .build()
        .unwrap();
    keys.rotate(rotated);

    let res = client
        .get(srv.url("/v1/users/me"))
        .bearer_auth(&old_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    keys.retire("k1").unwrap();
    let res = client
        .get(srv.url("/v1/users/me"))
        .bearer_auth(&old_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Fresh logins sign with k2 and keep working.
    let res = client
        .post(srv.url("/v1/users/token"))
        .json(&json!({ "email": "ann@x.com", "password": "secret123" }))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    let res = client
        .get(srv.url("/v1/users/me"))
        .bearer_auth(body["token"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_authorization_is_unauthenticated() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for header in ["Basic YTpi", "Bearer ", "Bearer a.b.c"] {
        let res = client
            .get(srv.url("/v1/users/me"))
            .header("Authorization", header)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{header}");
    }
}

#[tokio::test]
async fn bearer_scheme_is_case_insensitive() {
    let srv = TestServer::spawn().await;
    let (_, token) = srv.seed_user("ann@x.com", "secret123", vec![Role::USER]).await;

    let res = reqwest::Client::new()
        .get(srv.url("/v1/users/me"))
        .header("Authorization", format!("bearer {token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_resends_pending_code() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = srv.admin_token().await;

    let res = client
        .post(srv.url("/v1/users"))
        .json(&ann_registration())
        .send()
        .await
        .unwrap();
    let ann: serde_json::Value = res.json().await.unwrap();
    let ann_id = ann["id"].as_str().unwrap().to_string();
    let sent_before = srv.notifier.sent_count();
    let code = srv.notifier.last_code_for("ann@x.com").unwrap();

    let (_, user_token) = srv.seed_user("bob@x.com", "hunter22", vec![Role::USER]).await;
    let res = client
        .post(srv.url(&format!("/v1/users/{ann_id}/confirmation")))
        .bearer_auth(&user_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(srv.url(&format!("/v1/users/{ann_id}/confirmation")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    // bob's seeding sent one code too.
    assert_eq!(srv.notifier.sent_count(), sent_before + 2);
    assert_eq!(srv.notifier.last_code_for("ann@x.com"), Some(code));

    let res = client
        .put(srv.url("/v1/users/confirm"))
        .json(&json!({"email": "ann@x.com", "code": code.value()}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .post(srv.url(&format!("/v1/users/{ann_id}/confirmation")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

type Inbox = Arc<Mutex<Vec<serde_json::Value>>>;

/// Stands in for the mail relay the service posts codes to.
async fn spawn_code_relay() -> (String, Inbox) {
    let inbox: Inbox = Arc::default();
    let app = Router::new()
        .route(
            "/codes",
            post(|State(inbox): State<Inbox>, Json(body): Json<serde_json::Value>| async move {
                inbox.lock().unwrap().push(body);
                StatusCode::ACCEPTED
            }),
        )
        .with_state(inbox.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/codes"), inbox)
}

#[tokio::test]
async fn production_wiring_delivers_codes_through_the_relay() {
    let (relay_url, inbox) = spawn_code_relay().await;
    let config = Config::from_lookup(|key| match key {
        "KEYGATE_NOTIFY_URL" => Some(relay_url.clone()),
        "KEYGATE_BCRYPT_COST" => Some("4".into()),
        _ => None,
    })
    .unwrap();

    let services = keygate_api::app::services::build_services(&config).await.unwrap();
    let app = keygate_api::app::build_app(services);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base_url}/v1/users"))
        .json(&ann_registration())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let delivered = inbox.lock().unwrap().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["email"], "ann@x.com");
    let code = delivered[0]["code"].as_u64().unwrap();

    let res = client
        .put(format!("{base_url}/v1/users/confirm"))
        .json(&json!({"email": "ann@x.com", "code": code}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .post(format!("{base_url}/v1/users/token"))
        .json(&json!({"email": "ann@x.com", "password": "secret123"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let token: serde_json::Value = res.json().await.unwrap();

    let res = client
        .get(format!("{base_url}/v1/users/me"))
        .bearer_auth(token["token"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    server.abort();
}
