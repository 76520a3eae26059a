//! Test end-to-end dell'API sul router completo con database in memoria.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use workday::config::Config;
use workday::db::{self, users, DbPool};
use workday::services::Mailer;
use workday::{create_router, AppState};

const PASSWORD: &str = "password-sicura";

struct TestApp {
    router: Router,
    mailer: Mailer,
    pool: DbPool,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    async fn with_config(config: Config) -> Self {
        let pool = db::init_memory_db().await.unwrap();
        let mailer = Mailer::outbox();
        let state = AppState::new(pool.clone(), config, mailer.clone());
        Self {
            router: create_router(state),
            mailer,
            pool,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Registra un utente e restituisce (token, id)
    async fn register(&self, email: &str, role: &str) -> (String, String) {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/v1/auth/register",
                None,
                Some(json!({
                    "email": email,
                    "password": PASSWORD,
                    "name": "Mario Rossi",
                    "role": role,
                    "captcha_token": captcha(),
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({
                "email": email,
                "password": password,
                "captcha_token": captcha(),
            })),
        )
        .await
    }

    async fn create_job(&self, token: &str, budget_cents: i64) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/v1/jobs",
                Some(token),
                Some(json!({
                    "title": "Montaggio armadio",
                    "description": "Armadio a quattro ante da montare in camera",
                    "category": "Casa",
                    "budget_cents": budget_cents,
                    "location": "Milano",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["status"], "open");
        body["id"].as_str().unwrap().to_string()
    }

    /// Codice OTP dell'ultima email inviata
    fn last_code(&self) -> String {
        let sent = self.mailer.sent();
        let mail = sent.last().expect("nessuna email inviata");
        mail.body
            .split_whitespace()
            .map(|w| w.trim_end_matches('.'))
            .find(|w| w.len() == 6 && w.chars().all(|c| c.is_ascii_digit()))
            .expect("codice non trovato")
            .to_string()
    }

    /// Crea l'admin iniziale e restituisce il suo token
    async fn admin(&self) -> String {
        users::ensure_initial_admin(&self.pool, "admin@example.it", Some("admin-password"))
            .await
            .unwrap();
        let (status, body) = self.login("admin@example.it", "admin-password").await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["token"].as_str().unwrap().to_string()
    }

    /// Richiede un codice OTP e lo legge dall'ultima email
    async fn otp(&self, token: &str, purpose: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/v1/profile/otp",
                Some(token),
                Some(json!({ "purpose": purpose })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        self.last_code()
    }
}

fn captcha() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;
    let (status, body) = app.call(Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
}

#[tokio::test]
async fn test_guest_and_bad_tokens() {
    let app = TestApp::new().await;

    let (status, _) = app.call(Method::GET, "/api/v1/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(Method::GET, "/api/v1/jobs", Some("non-un-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Le letture pubbliche funzionano anche da guest
    let (status, body) = app.call(Method::GET, "/api/v1/jobs", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_captcha_is_required_and_single_use() {
    let app = TestApp::new().await;

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({
                "email": "senza@captcha.it",
                "password": PASSWORD,
                "name": "Anna",
                "role": "customer",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let token = captcha();
    let register = |email: &str| {
        json!({
            "email": email,
            "password": PASSWORD,
            "name": "Anna",
            "role": "customer",
            "captcha_token": token,
        })
    };

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(register("prima@captcha.it")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(register("seconda@captcha.it")),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_rejects_admin_and_duplicates() {
    let app = TestApp::new().await;
    app.register("anna@example.it", "customer").await;

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({
                "email": "ANNA@example.it",
                "password": PASSWORD,
                "name": "Anna",
                "role": "worker",
                "captcha_token": captcha(),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({
                "email": "capo@example.it",
                "password": PASSWORD,
                "name": "Capo",
                "role": "admin",
                "captcha_token": captcha(),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_full_job_lifecycle() {
    let app = TestApp::new().await;
    let (customer, customer_id) = app.register("cliente@example.it", "customer").await;
    let (worker, worker_id) = app.register("lavoratore@example.it", "worker").await;

    // Solo i clienti pubblicano
    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/jobs",
            Some(&worker),
            Some(json!({
                "title": "x",
                "description": "y",
                "category": "z",
                "budget_cents": 100,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let job_id = app.create_job(&customer, 5000).await;
    let job_uri = format!("/api/v1/jobs/{}", job_id);

    let (status, body) = app
        .call(
            Method::POST,
            &format!("{}/requests", job_uri),
            Some(&worker),
            Some(json!({ "message": "Disponibile sabato" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "requested");
    assert_eq!(body["request_count"], 1);

    let (status, _) = app
        .call(
            Method::POST,
            &format!("{}/requests", job_uri),
            Some(&worker),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Il proprietario vede le candidature, un guest no
    let (_, detail) = app.call(Method::GET, &job_uri, Some(&customer), None).await;
    assert_eq!(detail["requests"].as_array().unwrap().len(), 1);
    assert_eq!(detail["requests"][0]["worker_id"], worker_id.as_str());
    let (_, public) = app.call(Method::GET, &job_uri, None, None).await;
    assert!(public.get("requests").is_none());

    // Non ancora assegnato
    let (status, _) = app
        .call(Method::POST, &format!("{}/start", job_uri), Some(&worker), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(
            Method::POST,
            &format!("{}/assign", job_uri),
            Some(&customer),
            Some(json!({ "worker_id": worker_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "assigned");
    assert_eq!(body["assigned_worker_id"], worker_id.as_str());

    // Non piu' modificabile
    let (status, _) = app
        .call(
            Method::PUT,
            &job_uri,
            Some(&customer),
            Some(json!({ "title": "Nuovo titolo" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = app
        .call(Method::POST, &format!("{}/start", job_uri), Some(&worker), None)
        .await;
    assert_eq!(body["status"], "in-progress");
    assert!(body["started_at"].is_string());

    let (_, body) = app
        .call(Method::POST, &format!("{}/complete", job_uri), Some(&worker), None)
        .await;
    assert_eq!(body["status"], "done");
    assert!(body["completed_at"].is_string());

    // Recensione del cliente al lavoratore
    let (status, review) = app
        .call(
            Method::POST,
            &format!("{}/reviews", job_uri),
            Some(&customer),
            Some(json!({ "rating": 5, "comment": "Ottimo lavoro" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", review);
    assert_eq!(review["reviewee_id"], worker_id.as_str());

    let (status, _) = app
        .call(
            Method::POST,
            &format!("{}/reviews", job_uri),
            Some(&customer),
            Some(json!({ "rating": 4 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, reviews) = app
        .call(
            Method::GET,
            &format!("/api/v1/users/{}/reviews", worker_id),
            None,
            None,
        )
        .await;
    assert_eq!(reviews["review_count"], 1);
    assert_eq!(reviews["average_rating"], 5.0);
    assert_eq!(reviews["items"][0]["reviewer_id"], customer_id.as_str());

    // Pagamento del job
    let (status, payment) = app
        .call(
            Method::POST,
            &format!("{}/payment", job_uri),
            Some(&customer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", payment);
    assert_eq!(payment["amount_cents"], 5000);
    assert_eq!(payment["status"], "pending");
    assert_eq!(payment["payee_id"], worker_id.as_str());

    let (status, _) = app
        .call(
            Method::POST,
            &format!("{}/payment", job_uri),
            Some(&customer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let payment_id = payment["id"].as_str().unwrap();
    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/v1/payments/{}/confirm", payment_id),
            Some(&worker),
            Some(json!({ "provider_reference": "tx-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, confirmed) = app
        .call(
            Method::POST,
            &format!("/api/v1/payments/{}/confirm", payment_id),
            Some(&customer),
            Some(json!({ "provider_reference": "tx-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["status"], "completed");
    assert_eq!(confirmed["provider_reference"], "tx-1");

    let (_, mine) = app
        .call(Method::GET, "/api/v1/payments", Some(&worker), None)
        .await;
    assert_eq!(mine["total"], 1);
}

#[tokio::test]
async fn test_invalid_transitions_are_conflicts() {
    let app = TestApp::new().await;
    let (customer, _) = app.register("c@example.it", "customer").await;
    let (worker, worker_id) = app.register("w@example.it", "worker").await;
    let job_id = app.create_job(&customer, 2000).await;
    let job_uri = format!("/api/v1/jobs/{}", job_id);

    let (status, _) = app
        .call(
            Method::POST,
            &format!("{}/complete", job_uri),
            Some(&customer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            Method::POST,
            &format!("{}/fail", job_uri),
            Some(&customer),
            Some(json!({ "reason": "Annullato" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Assegnare senza candidatura
    let (status, _) = app
        .call(
            Method::POST,
            &format!("{}/assign", job_uri),
            Some(&customer),
            Some(json!({ "worker_id": worker_id })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Rinuncia prima di iniziare: il job torna aperto
    app.call(
        Method::POST,
        &format!("{}/requests", job_uri),
        Some(&worker),
        Some(json!({})),
    )
    .await;
    app.call(
        Method::POST,
        &format!("{}/assign", job_uri),
        Some(&customer),
        Some(json!({ "worker_id": worker_id })),
    )
    .await;
    let (status, body) = app
        .call(
            Method::POST,
            &format!("{}/release", job_uri),
            Some(&worker),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "open");
    assert!(body["assigned_worker_id"].is_null());

    // Le recensioni richiedono un job completato
    let (status, _) = app
        .call(
            Method::POST,
            &format!("{}/reviews", job_uri),
            Some(&customer),
            Some(json!({ "rating": 3 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_withdraw_last_request_reopens_job() {
    let app = TestApp::new().await;
    let (customer, _) = app.register("c@example.it", "customer").await;
    let (worker, _) = app.register("w@example.it", "worker").await;
    let job_id = app.create_job(&customer, 2000).await;
    let uri = format!("/api/v1/jobs/{}/requests", job_id);

    app.call(Method::POST, &uri, Some(&worker), Some(json!({})))
        .await;
    let (status, body) = app.call(Method::DELETE, &uri, Some(&worker), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "open");
    assert_eq!(body["request_count"], 0);

    let (status, _) = app.call(Method::DELETE, &uri, Some(&worker), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_chat_between_parties() {
    let app = TestApp::new().await;
    let (customer, customer_id) = app.register("c@example.it", "customer").await;
    let (worker, worker_id) = app.register("w@example.it", "worker").await;
    let (outsider, _) = app.register("o@example.it", "worker").await;
    let job_id = app.create_job(&customer, 2000).await;
    let messages_uri = format!("/api/v1/jobs/{}/messages", job_id);

    // Prima della candidatura il lavoratore non partecipa
    let (status, _) = app
        .call(
            Method::POST,
            &messages_uri,
            Some(&worker),
            Some(json!({ "body": "Ciao" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.call(
        Method::POST,
        &format!("/api/v1/jobs/{}/requests", job_id),
        Some(&worker),
        Some(json!({})),
    )
    .await;

    let (status, message) = app
        .call(
            Method::POST,
            &messages_uri,
            Some(&worker),
            Some(json!({ "body": "Posso passare domani?" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", message);
    assert_eq!(message["recipient_id"], customer_id.as_str());

    // Il cliente deve indicare il lavoratore
    let (status, _) = app
        .call(
            Method::POST,
            &messages_uri,
            Some(&customer),
            Some(json!({ "body": "Va bene" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, unread) = app
        .call(Method::GET, "/api/v1/chat/unread", Some(&customer), None)
        .await;
    assert_eq!(unread["unread"], 1);

    let (_, marked) = app
        .call(
            Method::POST,
            &format!("{}/read", messages_uri),
            Some(&customer),
            Some(json!({ "worker_id": worker_id })),
        )
        .await;
    assert_eq!(marked["marked"], 1);

    let (_, unread) = app
        .call(Method::GET, "/api/v1/chat/unread", Some(&customer), None)
        .await;
    assert_eq!(unread["unread"], 0);
    let (_, marked) = app
        .call(
            Method::POST,
            &format!("{}/read", messages_uri),
            Some(&customer),
            Some(json!({ "worker_id": worker_id })),
        )
        .await;
    assert_eq!(marked["marked"], 0);

    let (status, reply) = app
        .call(
            Method::POST,
            &messages_uri,
            Some(&customer),
            Some(json!({ "body": "Va bene", "worker_id": worker_id })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["recipient_id"], worker_id.as_str());

    let (_, conversation) = app
        .call(
            Method::GET,
            &format!("{}?worker_id={}", messages_uri, worker_id),
            Some(&customer),
            None,
        )
        .await;
    assert_eq!(conversation["total"], 2);
    assert_eq!(conversation["items"][0]["body"], "Posso passare domani?");

    let (status, _) = app
        .call(Method::GET, &messages_uri, Some(&outsider), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_password_change_requires_otp_and_revokes_sessions() {
    let app = TestApp::new().await;
    let (token, _) = app.register("utente@example.it", "customer").await;

    let (status, _) = app
        .call(
            Method::PUT,
            "/api/v1/profile/password",
            Some(&token),
            Some(json!({
                "code": "000000",
                "current_password": PASSWORD,
                "new_password": "nuova-password",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/profile/otp",
            Some(&token),
            Some(json!({ "purpose": "password_change" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Secondo invio troppo ravvicinato
    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/profile/otp",
            Some(&token),
            Some(json!({ "purpose": "password_change" })),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let code = app.last_code();
    let (status, session) = app
        .call(
            Method::PUT,
            "/api/v1/profile/password",
            Some(&token),
            Some(json!({
                "code": code,
                "current_password": PASSWORD,
                "new_password": "nuova-password",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", session);
    let new_token = session["token"].as_str().unwrap();

    let (status, _) = app
        .call(Method::GET, "/api/v1/auth/me", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .call(Method::GET, "/api/v1/auth/me", Some(new_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.login("utente@example.it", PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = app.login("utente@example.it", "nuova-password").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].is_string());
}

#[tokio::test]
async fn test_two_factor_login() {
    let app = TestApp::new().await;
    let (token, _) = app.register("due@example.it", "worker").await;

    let (status, _) = app
        .call(
            Method::PUT,
            "/api/v1/profile",
            Some(&token),
            Some(json!({ "two_factor_enabled": true, "skills": ["Idraulica", "idraulica"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.login("due@example.it", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["two_factor_required"], true);
    assert!(body.get("token").is_none());

    let code = app.last_code();
    let (status, session) = app
        .call(
            Method::POST,
            "/api/v1/auth/login/otp",
            None,
            Some(json!({ "email": "due@example.it", "code": code })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["user"]["skills"], json!(["idraulica"]));

    // Il codice e' monouso
    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/auth/login/otp",
            None,
            Some(json!({ "email": "due@example.it", "code": code })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_worker_verification_flow() {
    let app = TestApp::new().await;
    users::ensure_initial_admin(&app.pool, "admin@example.it", Some("admin-password"))
        .await
        .unwrap()
        .unwrap();
    let (_, body) = app.login("admin@example.it", "admin-password").await;
    let admin = body["token"].as_str().unwrap().to_string();

    let (worker, worker_id) = app.register("w@example.it", "worker").await;

    let (status, created) = app
        .call(
            Method::POST,
            "/api/v1/verification",
            Some(&worker),
            Some(json!({ "document_url": "https://files.example.it/documento.pdf" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    assert_eq!(created["verification"]["status"], "awaiting_payment");
    assert_eq!(created["payment"]["kind"], "verification_fee");
    assert_eq!(created["payment"]["amount_cents"], 1500);

    // Una sola richiesta aperta alla volta
    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/verification",
            Some(&worker),
            Some(json!({ "document_url": "https://files.example.it/altro.pdf" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let verification_id = created["verification"]["id"].as_str().unwrap();
    let approve_uri = format!("/api/v1/admin/verifications/{}/approve", verification_id);

    // Quota non ancora pagata
    let (status, _) = app
        .call(Method::POST, &approve_uri, Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            Method::POST,
            &format!(
                "/api/v1/payments/{}/confirm",
                created["payment"]["id"].as_str().unwrap()
            ),
            Some(&worker),
            Some(json!({ "provider_reference": "fee-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, mine) = app
        .call(Method::GET, "/api/v1/verification", Some(&worker), None)
        .await;
    assert_eq!(mine["status"], "pending_review");

    // Solo gli admin decidono
    let (status, _) = app
        .call(Method::POST, &approve_uri, Some(&worker), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, decided) = app
        .call(Method::POST, &approve_uri, Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", decided);
    assert_eq!(decided["status"], "approved");

    let (_, me) = app
        .call(Method::GET, "/api/v1/auth/me", Some(&worker), None)
        .await;
    assert_eq!(me["is_verified"], true);

    let (_, profile) = app
        .call(Method::GET, &format!("/api/v1/users/{}", worker_id), None, None)
        .await;
    assert_eq!(profile["is_verified"], true);

    let notified = app
        .mailer
        .sent()
        .iter()
        .any(|m| m.to == "w@example.it" && m.body.contains("approvata"));
    assert!(notified);

    let (_, stats) = app
        .call(Method::GET, "/api/v1/admin/stats", Some(&admin), None)
        .await;
    assert_eq!(stats["pending_verifications"], 0);
}

#[tokio::test]
async fn test_verified_workers_required_when_configured() {
    let config = Config {
        require_verified_workers: true,
        ..Config::default()
    };
    let app = TestApp::with_config(config).await;
    let (customer, _) = app.register("c@example.it", "customer").await;
    let (worker, _) = app.register("w@example.it", "worker").await;
    let job_id = app.create_job(&customer, 2000).await;

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/v1/jobs/{}/requests", job_id),
            Some(&worker),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_cannot_demote_self() {
    let app = TestApp::new().await;
    users::ensure_initial_admin(&app.pool, "admin@example.it", Some("admin-password"))
        .await
        .unwrap();
    let (_, body) = app.login("admin@example.it", "admin-password").await;
    let admin = body["token"].as_str().unwrap().to_string();
    let admin_id = body["user"]["id"].as_str().unwrap().to_string();
    let (_, worker_id) = app.register("w@example.it", "worker").await;

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/v1/admin/users/{}", admin_id),
            Some(&admin),
            Some(json!({ "role": "customer" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, updated) = app
        .call(
            Method::PUT,
            &format!("/api/v1/admin/users/{}", worker_id),
            Some(&admin),
            Some(json!({ "is_active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["is_active"], false);

    let (status, _) = app.login("w@example.it", PASSWORD).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, list) = app
        .call(
            Method::GET,
            "/api/v1/admin/users?role=worker",
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(list["total"], 1);
}

#[tokio::test]
async fn test_huge_page_number_returns_empty_page() {
    let app = TestApp::new().await;
    let (customer, _) = app.register("c@example.it", "customer").await;
    app.create_job(&customer, 2000).await;

    let (status, body) = app
        .call(
            Method::GET,
            "/api/v1/jobs?page=9223372036854775807&limit=100",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["total"], 1);
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_change_email() {
    let app = TestApp::new().await;
    let (token, _) = app.register("vecchia@example.it", "customer").await;
    app.register("occupata@example.it", "worker").await;

    let code = app.otp(&token, "email_change").await;

    // Email gia' registrata: il codice non viene consumato
    let (status, _) = app
        .call(
            Method::PUT,
            "/api/v1/profile/email",
            Some(&token),
            Some(json!({ "code": code, "new_email": "Occupata@example.it" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, user) = app
        .call(
            Method::PUT,
            "/api/v1/profile/email",
            Some(&token),
            Some(json!({ "code": code, "new_email": "Nuova@Example.it" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", user);
    assert_eq!(user["email"], "nuova@example.it");

    let (status, _) = app.login("vecchia@example.it", PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login("nuova@example.it", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_delete_account_anonymises_and_revokes() {
    let app = TestApp::new().await;
    let (token, id) = app.register("addio@example.it", "worker").await;

    let (status, _) = app
        .call(
            Method::DELETE,
            "/api/v1/profile",
            Some(&token),
            Some(json!({ "code": "000000" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let code = app.otp(&token, "account_deletion").await;
    let (status, body) = app
        .call(
            Method::DELETE,
            "/api/v1/profile",
            Some(&token),
            Some(json!({ "code": code })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, _) = app
        .call(Method::GET, "/api/v1/auth/me", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.login("addio@example.it", PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(Method::GET, &format!("/api/v1/users/{}", id), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let user = users::find_by_id(&app.pool, &id).await.unwrap().unwrap();
    assert_eq!(user.name, "Utente eliminato");
    assert!(!user.email.contains("addio"));
    assert!(!user.is_active);
}

#[tokio::test]
async fn test_cancel_fee_abandons_verification() {
    let app = TestApp::new().await;
    let (worker, _) = app.register("w@example.it", "worker").await;
    let (customer, _) = app.register("c@example.it", "customer").await;

    let (status, created) = app
        .call(
            Method::POST,
            "/api/v1/verification",
            Some(&worker),
            Some(json!({ "document_url": "https://files.example.it/documento.pdf" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    let cancel_uri = format!(
        "/api/v1/payments/{}/cancel",
        created["payment"]["id"].as_str().unwrap()
    );

    let (status, _) = app
        .call(Method::POST, &cancel_uri, Some(&customer), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, cancelled) = app
        .call(Method::POST, &cancel_uri, Some(&worker), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", cancelled);
    assert_eq!(cancelled["status"], "failed");

    let (_, mine) = app
        .call(Method::GET, "/api/v1/verification", Some(&worker), None)
        .await;
    assert_eq!(mine["status"], "rejected");

    let (status, _) = app
        .call(Method::POST, &cancel_uri, Some(&worker), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // La richiesta abbandonata non blocca una nuova richiesta
    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/verification",
            Some(&worker),
            Some(json!({ "document_url": "https://files.example.it/nuovo.pdf" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_concurrent_job_payments_create_one() {
    let app = TestApp::new().await;
    let (customer, _) = app.register("c@example.it", "customer").await;
    let (worker, worker_id) = app.register("w@example.it", "worker").await;
    let job_id = app.create_job(&customer, 3000).await;
    let job_uri = format!("/api/v1/jobs/{}", job_id);

    app.call(
        Method::POST,
        &format!("{}/requests", job_uri),
        Some(&worker),
        Some(json!({})),
    )
    .await;
    app.call(
        Method::POST,
        &format!("{}/assign", job_uri),
        Some(&customer),
        Some(json!({ "worker_id": worker_id })),
    )
    .await;
    for action in ["start", "complete"] {
        let (status, _) = app
            .call(
                Method::POST,
                &format!("{}/{}", job_uri, action),
                Some(&worker),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let payment_uri = format!("{}/payment", job_uri);
    let results = futures::future::join_all(
        (0..8).map(|_| app.call(Method::POST, &payment_uri, Some(&customer), None)),
    )
    .await;

    let created = results
        .iter()
        .filter(|(status, _)| *status == StatusCode::CREATED)
        .count();
    assert_eq!(created, 1);
    assert!(results
        .iter()
        .all(|(status, _)| *status == StatusCode::CREATED || *status == StatusCode::CONFLICT));

    let (_, mine) = app
        .call(Method::GET, "/api/v1/payments", Some(&customer), None)
        .await;
    assert_eq!(mine["total"], 1);
}

#[tokio::test]
async fn test_admin_refund_only_completed_payments() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let (worker, _) = app.register("w@example.it", "worker").await;

    let (_, created) = app
        .call(
            Method::POST,
            "/api/v1/verification",
            Some(&worker),
            Some(json!({ "document_url": "https://files.example.it/documento.pdf" })),
        )
        .await;
    let payment_id = created["payment"]["id"].as_str().unwrap();
    let refund_uri = format!("/api/v1/admin/payments/{}/refund", payment_id);

    let (status, _) = app
        .call(Method::POST, &refund_uri, Some(&worker), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Ancora in attesa
    let (status, _) = app
        .call(Method::POST, &refund_uri, Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.call(
        Method::POST,
        &format!("/api/v1/payments/{}/confirm", payment_id),
        Some(&worker),
        Some(json!({ "provider_reference": "fee-1" })),
    )
    .await;

    let (status, refunded) = app
        .call(Method::POST, &refund_uri, Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", refunded);
    assert_eq!(refunded["status"], "refunded");

    let (status, _) = app
        .call(Method::POST, &refund_uri, Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/admin/payments/non-esiste/refund",
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_cleanup() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let (worker, _) = app.register("w@example.it", "worker").await;

    let (_, created) = app
        .call(
            Method::POST,
            "/api/v1/verification",
            Some(&worker),
            Some(json!({ "document_url": "https://files.example.it/documento.pdf" })),
        )
        .await;
    app.call(
        Method::POST,
        &format!(
            "/api/v1/payments/{}/cancel",
            created["payment"]["id"].as_str().unwrap()
        ),
        Some(&worker),
        None,
    )
    .await;

    for days in [-1, 4000] {
        let (status, _) = app
            .call(
                Method::POST,
                "/api/v1/admin/cleanup",
                Some(&admin),
                Some(json!({ "days": days })),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "days = {}", days);
    }

    let (status, _) = app
        .call(
            Method::POST,
            "/api/v1/admin/cleanup",
            Some(&worker),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Con il default di 30 giorni il pagamento appena fallito resta
    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/admin/cleanup",
            Some(&admin),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["payments_deleted"], 0);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/admin/cleanup",
            Some(&admin),
            Some(json!({ "days": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["payments_deleted"], 1);
}

#[tokio::test]
async fn test_delete_job_rules() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let (customer, _) = app.register("c@example.it", "customer").await;
    let (worker, worker_id) = app.register("w@example.it", "worker").await;

    // Aperto
    let open_job = app.create_job(&customer, 1000).await;
    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/api/v1/jobs/{}", open_job),
            Some(&worker),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/api/v1/jobs/{}", open_job),
            Some(&customer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .call(Method::GET, &format!("/api/v1/jobs/{}", open_job), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Con candidature
    let requested_job = app.create_job(&customer, 1000).await;
    app.call(
        Method::POST,
        &format!("/api/v1/jobs/{}/requests", requested_job),
        Some(&worker),
        Some(json!({})),
    )
    .await;
    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/api/v1/jobs/{}", requested_job),
            Some(&customer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Assegnato: solo l'admin puo' eliminarlo
    let assigned_job = app.create_job(&customer, 1000).await;
    let assigned_uri = format!("/api/v1/jobs/{}", assigned_job);
    app.call(
        Method::POST,
        &format!("{}/requests", assigned_uri),
        Some(&worker),
        Some(json!({})),
    )
    .await;
    app.call(
        Method::POST,
        &format!("{}/assign", assigned_uri),
        Some(&customer),
        Some(json!({ "worker_id": worker_id })),
    )
    .await;
    let (status, _) = app
        .call(Method::DELETE, &assigned_uri, Some(&customer), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app
        .call(Method::DELETE, &assigned_uri, Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.call(Method::GET, &assigned_uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_my_jobs_for_both_roles() {
    let app = TestApp::new().await;
    let (customer, _) = app.register("c@example.it", "customer").await;
    let (other, _) = app.register("altro@example.it", "customer").await;
    let (worker, _) = app.register("w@example.it", "worker").await;

    let first = app.create_job(&customer, 1000).await;
    app.create_job(&customer, 2000).await;
    app.create_job(&other, 3000).await;

    app.call(
        Method::POST,
        &format!("/api/v1/jobs/{}/requests", first),
        Some(&worker),
        Some(json!({})),
    )
    .await;

    let (status, mine) = app
        .call(Method::GET, "/api/v1/jobs/mine", Some(&customer), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["total"], 2);

    let (_, mine) = app
        .call(Method::GET, "/api/v1/jobs/mine", Some(&worker), None)
        .await;
    assert_eq!(mine["total"], 1);
    assert_eq!(mine["items"][0]["id"], first.as_str());

    let (status, _) = app.call(Method::GET, "/api/v1/jobs/mine", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_public_profiles_hide_contacts() {
    let app = TestApp::new().await;
    let (worker, worker_id) = app.register("w@example.it", "worker").await;
    app.register("c@example.it", "customer").await;

    let (status, _) = app
        .call(
            Method::PUT,
            "/api/v1/profile",
            Some(&worker),
            Some(json!({ "phone": "+39 333 1234567", "location": "Torino" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, profile) = app
        .call(Method::GET, &format!("/api/v1/users/{}", worker_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["location"], "Torino");
    assert!(profile.get("email").is_none());
    assert!(profile.get("phone").is_none());

    let (status, workers) = app.call(Method::GET, "/api/v1/workers", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(workers["total"], 1);
    assert_eq!(workers["items"][0]["id"], worker_id.as_str());
    assert!(workers["items"][0].get("email").is_none());
    assert!(workers["items"][0].get("phone").is_none());

    let (status, _) = app
        .call(Method::GET, "/api/v1/users/non-esiste", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_public_summary() {
    let app = TestApp::new().await;
    let (customer, _) = app.register("c@example.it", "customer").await;
    app.register("w1@example.it", "worker").await;
    app.register("w2@example.it", "worker").await;
    app.create_job(&customer, 1000).await;
    app.create_job(&customer, 2000).await;

    let (status, summary) = app
        .call(Method::GET, "/api/v1/stats/summary", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["open_jobs"], 2);
    assert_eq!(summary["completed_jobs"], 0);
    assert_eq!(summary["workers"], 2);
    assert_eq!(summary["verified_workers"], 0);
}

#[tokio::test]
async fn test_password_change_checks_code_before_password() {
    let config = Config {
        otp_max_attempts: 2,
        ..Config::default()
    };
    let app = TestApp::with_config(config).await;
    let (token, _) = app.register("utente@example.it", "customer").await;
    let code = app.otp(&token, "password_change").await;
    let wrong_code = if code == "000000" { "111111" } else { "000000" };

    let change = |code: &str, current: &str| {
        json!({
            "code": code,
            "current_password": current,
            "new_password": "nuova-password",
        })
    };

    // Senza codice valido la password giusta e quella sbagliata sono indistinguibili
    let (status, with_wrong) = app
        .call(
            Method::PUT,
            "/api/v1/profile/password",
            Some(&token),
            Some(change(wrong_code, "tentativo-a-caso")),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, with_right) = app
        .call(
            Method::PUT,
            "/api/v1/profile/password",
            Some(&token),
            Some(change(wrong_code, PASSWORD)),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(with_wrong, with_right);

    // I tentativi sono esauriti anche per il codice giusto
    let (status, _) = app
        .call(
            Method::PUT,
            "/api/v1/profile/password",
            Some(&token),
            Some(change(&code, PASSWORD)),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.login("utente@example.it", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
}
