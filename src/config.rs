#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub otp_ttl_minutes: i64,
    pub otp_max_attempts: i64,
    pub otp_resend_seconds: i64,
    pub recaptcha_secret: Option<String>,
    pub recaptcha_verify_url: String,
    pub captcha_replay_ttl_secs: u64,
    pub verification_fee_cents: i64,
    pub require_verified_workers: bool,
    pub rate_limit_per_minute: u32,
    pub mail_webhook_url: Option<String>,
    pub admin_email: String,
    pub admin_password: Option<String>,
    pub frontend_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            database_url: "sqlite:workday.db?mode=rwc".to_string(),
            jwt_secret: "workday-dev-secret-cambiami".to_string(),
            jwt_expiry_hours: 24,
            otp_ttl_minutes: 10,
            otp_max_attempts: 5,
            otp_resend_seconds: 60,
            recaptcha_secret: None,
            recaptcha_verify_url: "https://www.google.com/recaptcha/api/siteverify".to_string(),
            captcha_replay_ttl_secs: 120,
            verification_fee_cents: 1500,
            require_verified_workers: false,
            rate_limit_per_minute: 100,
            mail_webhook_url: None,
            admin_email: "admin@workday.local".to_string(),
            admin_password: None,
            frontend_url: "http://localhost:3000".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("WORKDAY_HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("WORKDAY_PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(secret) = std::env::var("WORKDAY_JWT_SECRET") {
            config.jwt_secret = secret;
        } else {
            tracing::warn!("WORKDAY_JWT_SECRET non impostato, uso il segreto di sviluppo");
        }

        parse_env("WORKDAY_JWT_EXPIRY_HOURS", &mut config.jwt_expiry_hours);
        parse_env("WORKDAY_OTP_TTL_MINUTES", &mut config.otp_ttl_minutes);
        parse_env("WORKDAY_OTP_MAX_ATTEMPTS", &mut config.otp_max_attempts);
        parse_env("WORKDAY_OTP_RESEND_SECONDS", &mut config.otp_resend_seconds);
        parse_env(
            "WORKDAY_CAPTCHA_REPLAY_TTL_SECS",
            &mut config.captcha_replay_ttl_secs,
        );
        parse_env(
            "WORKDAY_VERIFICATION_FEE_CENTS",
            &mut config.verification_fee_cents,
        );
        parse_env(
            "WORKDAY_REQUIRE_VERIFIED_WORKERS",
            &mut config.require_verified_workers,
        );
        parse_env(
            "WORKDAY_RATE_LIMIT_PER_MINUTE",
            &mut config.rate_limit_per_minute,
        );

        if let Ok(secret) = std::env::var("RECAPTCHA_SECRET") {
            if !secret.is_empty() {
                config.recaptcha_secret = Some(secret);
            }
        }

        if let Ok(url) = std::env::var("RECAPTCHA_VERIFY_URL") {
            config.recaptcha_verify_url = url;
        }

        if let Ok(url) = std::env::var("WORKDAY_MAIL_WEBHOOK_URL") {
            if !url.is_empty() {
                config.mail_webhook_url = Some(url);
            }
        }

        if let Ok(email) = std::env::var("WORKDAY_ADMIN_EMAIL") {
            config.admin_email = email;
        }

        if let Ok(password) = std::env::var("WORKDAY_ADMIN_PASSWORD") {
            config.admin_password = Some(password);
        }

        if let Ok(frontend_url) = std::env::var("FRONTEND_URL") {
            config.frontend_url = frontend_url;
        }

        config
    }

    pub fn captcha_enabled(&self) -> bool {
        self.recaptcha_secret.is_some()
    }
}

/// Sovrascrive `target` solo se la variabile esiste ed e' valida
fn parse_env<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!("Valore non valido per {}: {}", name, raw),
        }
    }
}

// Limiti applicativi
pub mod limits {
    pub const DEFAULT_PAGE_SIZE: i64 = 20;
    pub const MAX_PAGE_SIZE: i64 = 100;

    pub const MIN_PASSWORD_LEN: usize = 8;
    pub const MAX_PASSWORD_LEN: usize = 128;
    pub const MAX_NAME_LEN: usize = 80;
    pub const MAX_BIO_LEN: usize = 1000;
    pub const MAX_SKILLS: usize = 20;

    pub const MAX_TITLE_LEN: usize = 120;
    pub const MAX_DESCRIPTION_LEN: usize = 5000;
    pub const MAX_CATEGORY_LEN: usize = 60;
    pub const MAX_REQUEST_MESSAGE_LEN: usize = 500;

    pub const MIN_RATING: i64 = 1;
    pub const MAX_RATING: i64 = 5;
    pub const MAX_COMMENT_LEN: usize = 2000;

    pub const MAX_MESSAGE_LEN: usize = 2000;

    pub const OTP_DIGITS: usize = 6;

    /// Numero massimo di token captcha tenuti in memoria
    pub const CAPTCHA_CACHE_CAPACITY: usize = 10_000;

    /// Dimensione massima del body JSON
    pub const MAX_BODY_BYTES: usize = 64 * 1024;
}
