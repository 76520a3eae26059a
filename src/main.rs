use std::net::SocketAddr;
use std::time::Duration;

use axum::{http::HeaderValue, middleware, Router};
use chrono::Utc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use workday::config::Config;
use workday::db;
use workday::db::users::{self, AdminUserUpdate};
use workday::middleware::rate_limit;
use workday::models::*;
use workday::routes::{self, admin::CleanupRequest, admin::CleanupResponse, AppState};
use workday::services::Mailer;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "WorkDay API",
        version = "1.0.0",
        description = "API del marketplace WorkDay: job, candidature, verifiche, pagamenti e chat",
        license(name = "MIT"),
    ),
    paths(
        workday::routes::health::health_check,
        workday::routes::stats::get_summary,
        workday::routes::auth::register,
        workday::routes::auth::login,
        workday::routes::auth::login_otp,
        workday::routes::auth::get_current_user,
        workday::routes::profile::get_profile,
        workday::routes::profile::update_profile,
        workday::routes::profile::request_otp,
        workday::routes::profile::change_password,
        workday::routes::profile::change_email,
        workday::routes::profile::delete_account,
        workday::routes::users::get_public_profile,
        workday::routes::users::list_workers,
        workday::routes::jobs::list_jobs,
        workday::routes::jobs::my_jobs,
        workday::routes::jobs::get_job,
        workday::routes::jobs::create_job,
        workday::routes::jobs::update_job,
        workday::routes::jobs::delete_job,
        workday::routes::jobs::request_job,
        workday::routes::jobs::withdraw_request,
        workday::routes::jobs::assign_job,
        workday::routes::jobs::start_job,
        workday::routes::jobs::release_job,
        workday::routes::jobs::complete_job,
        workday::routes::jobs::fail_job,
        workday::routes::reviews::create_review,
        workday::routes::reviews::list_job_reviews,
        workday::routes::reviews::list_user_reviews,
        workday::routes::reviews::delete_review,
        workday::routes::payments::pay_job,
        workday::routes::payments::list_my_payments,
        workday::routes::payments::confirm_payment,
        workday::routes::payments::cancel_payment,
        workday::routes::verification::request_verification,
        workday::routes::verification::get_my_verification,
        workday::routes::chat::list_messages,
        workday::routes::chat::send_message,
        workday::routes::chat::mark_read,
        workday::routes::chat::unread_count,
        workday::routes::chat::chat_stream,
        workday::routes::admin::list_users,
        workday::routes::admin::update_user,
        workday::routes::admin::list_verifications,
        workday::routes::admin::approve_verification,
        workday::routes::admin::reject_verification,
        workday::routes::admin::list_payments,
        workday::routes::admin::refund_payment,
        workday::routes::admin::get_admin_stats,
        workday::routes::admin::cleanup_old_data,
    ),
    components(schemas(
        HealthResponse,
        MessageResponse,
        ErrorResponse,
        PublicSummary,
        CountByKey,
        VolumeByKind,
        AdminStats,
        Role,
        User,
        PublicProfile,
        RegisterRequest,
        LoginRequest,
        LoginOtpRequest,
        AuthResponse,
        LoginResponse,
        UpdateProfileRequest,
        OtpPurpose,
        OtpRequest,
        OtpSentResponse,
        ChangePasswordRequest,
        ChangeEmailRequest,
        DeleteAccountRequest,
        AdminUserUpdate,
        JobStatus,
        JobSort,
        Job,
        JobRequest,
        JobDetail,
        CreateJobRequest,
        UpdateJobRequest,
        ApplyJobRequest,
        AssignJobRequest,
        FailJobRequest,
        Review,
        CreateReviewRequest,
        ReviewSummary,
        UserReviewsResponse,
        PaymentKind,
        PaymentStatus,
        PaymentTransaction,
        ConfirmPaymentRequest,
        VerificationStatus,
        VerificationRequest,
        CreateVerificationRequest,
        VerificationCreatedResponse,
        RejectVerificationRequest,
        ChatMessage,
        SendMessageRequest,
        MarkReadRequest,
        MarkReadResponse,
        UnreadResponse,
        CleanupRequest,
        CleanupResponse,
    )),
    tags(
        (name = "Sistema", description = "Health check e statistiche pubbliche"),
        (name = "Auth", description = "Registrazione, login e secondo fattore"),
        (name = "Profilo", description = "Profilo dell'utente e modifiche protette da OTP"),
        (name = "Utenti", description = "Profili pubblici e ricerca lavoratori"),
        (name = "Jobs", description = "Pubblicazione e ciclo di vita dei job"),
        (name = "Recensioni", description = "Recensioni tra cliente e lavoratore"),
        (name = "Pagamenti", description = "Pagamenti dei job e quote di verifica"),
        (name = "Verifica", description = "Verifica dei lavoratori"),
        (name = "Chat", description = "Messaggi tra cliente e lavoratore"),
        (name = "Admin", description = "Gestione utenti, verifiche, pagamenti e manutenzione"),
    ),
    servers(
        (url = "http://localhost:4000", description = "Server locale"),
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let origin = match frontend_url {
        "*" => AllowOrigin::any(),
        url => match HeaderValue::from_str(url) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                tracing::warn!("FRONTEND_URL non valido ({}), CORS aperto", url);
                AllowOrigin::any()
            }
        },
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[tokio::main]
async fn main() {
    // Carica variabili da .env
    dotenvy::dotenv().ok();

    // Inizializza logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workday=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Carica configurazione
    let config = Config::from_env();

    tracing::info!("Connessione al database: {}", config.database_url);

    let db_pool = match db::init_db(&config.database_url).await {
        Ok(pool) => {
            tracing::info!("Database SQLite inizializzato");
            pool
        }
        Err(e) => {
            tracing::error!("Errore inizializzazione database: {}", e);
            std::process::exit(1);
        }
    };

    // Crea admin iniziale se non esiste
    match users::ensure_initial_admin(
        &db_pool,
        &config.admin_email,
        config.admin_password.as_deref(),
    )
    .await
    {
        Ok(Some(admin)) => {
            tracing::warn!("========================================");
            tracing::warn!("  ADMIN INIZIALE CREATO: {}", admin.email);
            if let Some(password) = admin.generated_password {
                tracing::warn!("  Password: {}", password);
                tracing::warn!("  SALVA QUESTA PASSWORD - NON SARA' PIU' MOSTRATA!");
            }
            tracing::warn!("========================================");
        }
        Ok(None) => {
            tracing::info!("Admin esistente trovato");
        }
        Err(e) => {
            tracing::error!("Errore creazione admin: {}", e);
        }
    }

    let rate_limiter = rate_limit::create_rate_limiter(config.rate_limit_per_minute);
    let cors = cors_layer(&config.frontend_url);
    let addr_text = format!("{}:{}", config.host, config.port);
    let captcha_enabled = config.captcha_enabled();

    let mailer = Mailer::from_webhook(config.mail_webhook_url.clone());
    let state = AppState::new(db_pool.clone(), config, mailer);

    // API routes con middleware
    let api_routes = routes::create_router(state.clone()).layer(middleware::from_fn(
        move |req, next| {
            let limiter = rate_limiter.clone();
            async move { rate_limit::rate_limit_middleware(limiter, req, next).await }
        },
    ));

    // Costruisci router completo con Swagger
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .into_make_service_with_connect_info::<SocketAddr>();

    let addr: SocketAddr = match addr_text.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Indirizzo non valido {}: {}", addr_text, e);
            std::process::exit(1);
        }
    };

    tracing::info!("========================================");
    tracing::info!("  WorkDay API v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("========================================");
    tracing::info!("Server: http://{}", addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui/", addr);
    tracing::info!("----------------------------------------");
    tracing::info!("Ruoli:");
    tracing::info!("  - Guest:    Lettura job e profili pubblici");
    tracing::info!("  - Customer: Pubblica job, assegna, paga, recensisce");
    tracing::info!("  - Worker:   Si candida, svolge i job, chiede la verifica");
    tracing::info!("  - Admin:    Gestione completa");
    tracing::info!("----------------------------------------");
    tracing::info!("Endpoints:");
    tracing::info!("  /api/v1/health, /api/v1/stats/summary    - Sistema");
    tracing::info!("  /api/v1/auth/*                           - Registrazione e login");
    tracing::info!("  /api/v1/profile/*                        - Profilo e OTP");
    tracing::info!("  /api/v1/users/:id, /api/v1/workers       - Profili pubblici");
    tracing::info!("  /api/v1/jobs/*                           - Job e ciclo di vita");
    tracing::info!("  /api/v1/payments/*, /api/v1/verification - Pagamenti e verifica");
    tracing::info!("  /api/v1/chat/*                           - Chat e stream SSE");
    tracing::info!("  /api/v1/admin/*                          - Amministrazione");
    tracing::info!("----------------------------------------");
    if captcha_enabled {
        tracing::info!("reCAPTCHA: Configurato");
    } else {
        tracing::warn!("reCAPTCHA: NON configurato (imposta RECAPTCHA_SECRET)");
    }

    // Task background: scadenza dei token captcha gia' visti (ogni minuto)
    let captcha = state.captcha.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let removed = captcha.replay_cache().sweep();
            if removed > 0 {
                tracing::debug!("Cache captcha: {} token scaduti rimossi", removed);
            }
        }
    });

    // Task background: pulizia codici OTP usati o scaduti (ogni ora)
    let cleanup_pool = db_pool.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            let cutoff = db::to_db_time(&Utc::now());
            match db::otps::delete_stale(&cleanup_pool, &cutoff).await {
                Ok(count) if count > 0 => {
                    tracing::info!("Cleanup OTP: {} codici eliminati", count)
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Errore cleanup OTP: {}", e),
            }
        }
    });

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Impossibile aprire {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Errore del server: {}", e);
        std::process::exit(1);
    }
}
